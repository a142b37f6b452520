//! Selection and limit resolution through the public service API.

mod common;

use common::*;
use edgequake_transform::{
    PerformanceRecord, StatsKey, TransformationLimits, TransformationOptions, TransformationRequest,
};

fn names(service: &edgequake_transform::TransformService, request: &TransformationRequest) -> Vec<String> {
    service
        .ranked_candidates(request)
        .iter()
        .map(|c| c.name().to_string())
        .collect()
}

fn txt_to_html(size: i64) -> TransformationRequest {
    TransformationRequest::new(TXT, size, HTML)
}

// ── Ranking ──────────────────────────────────────────────────────────────────

#[test]
fn ranking_is_deterministic() {
    let service = builder(&[])
        .transformer(Fake::tagging("A", "a").pair(TXT, HTML))
        .transformer(Fake::tagging("B", "b").pair(TXT, HTML))
        .transformer(Fake::tagging("C", "c").pair(TXT, HTML))
        .build()
        .unwrap();
    service.tracker().record_time("C", TXT, HTML, 5, true);

    let first = names(&service, &txt_to_html(10));
    for _ in 0..10 {
        assert_eq!(names(&service, &txt_to_html(10)), first);
    }
    assert_eq!(first, ["A", "B", "C"]);
}

#[test]
fn priority_dominates_performance() {
    let service = builder(&[
        ("content.transformer.A.priority", "10"),
        ("content.transformer.B.priority", "5"),
    ])
    .transformer(Fake::tagging("A", "a").pair(TXT, HTML))
    .transformer(Fake::tagging("B", "b").pair(TXT, HTML))
    .build()
    .unwrap();
    let tracker = service.tracker();
    tracker.insert(StatsKey::pair("A", TXT, HTML), PerformanceRecord::from_parts(10, 0, 500.0));
    tracker.insert(StatsKey::pair("B", TXT, HTML), PerformanceRecord::from_parts(10, 0, 5000.0));

    assert_eq!(names(&service, &txt_to_html(10)), ["B", "A"]);
}

#[test]
fn performance_breaks_ties_only_above_threshold() {
    let service = builder(&[])
        .transformer(Fake::tagging("A", "a").pair(TXT, HTML))
        .transformer(Fake::tagging("B", "b").pair(TXT, HTML))
        .build()
        .unwrap();
    let tracker = service.tracker();
    for _ in 0..2 {
        tracker.record_time("A", TXT, HTML, 900, true);
        tracker.record_time("B", TXT, HTML, 10, true);
    }
    assert_eq!(names(&service, &txt_to_html(10)), ["A", "B"], "below threshold keeps registration order");

    tracker.record_time("A", TXT, HTML, 900, true);
    tracker.record_time("B", TXT, HTML, 10, true);
    assert_eq!(names(&service, &txt_to_html(10)), ["B", "A"]);
}

#[test]
fn configured_threshold_applies_per_transformer() {
    let service = builder(&[("content.transformer.B.thresholdCount", "1")])
        .transformer(Fake::tagging("A", "a").pair(TXT, HTML))
        .transformer(Fake::tagging("B", "b").pair(TXT, HTML))
        .build()
        .unwrap();
    service.tracker().record_time("B", TXT, HTML, 50, true);
    // B's average counts now, A's does not: 0 < 50
    assert_eq!(names(&service, &txt_to_html(10)), ["A", "B"]);
}

#[test]
fn explicit_transformations_get_their_band() {
    let service = builder(&[])
        .transformer(Fake::tagging("Generic", "g").pair(TXT, HTML))
        .transformer(Fake::tagging("Dedicated", "d").pair(TXT, HTML).explicit(TXT, HTML))
        .build()
        .unwrap();
    let ranked = service.ranked_candidates(&txt_to_html(10));
    assert_eq!(ranked[0].name(), "Dedicated");
    assert_eq!(ranked[0].priority, 50);
    assert_eq!(ranked[1].priority, 100);
}

#[test]
fn unsupported_and_oversized_are_filtered_without_error() {
    let service = builder(&[
        ("content.transformer.Small.maxSourceSizeKBytes", "1"),
        ("content.transformer.Off.mimetypes.text/plain.text/html.supported", "false"),
    ])
    .transformer(Fake::tagging("Small", "s").pair(TXT, HTML))
    .transformer(Fake::tagging("Off", "o").pair(TXT, HTML))
    .transformer(Fake::tagging("Big", "b").pair(TXT, HTML))
    .build()
    .unwrap();

    assert_eq!(names(&service, &txt_to_html(512)), ["Small", "Big"]);
    assert_eq!(names(&service, &txt_to_html(4096)), ["Big"]);
    assert!(names(&service, &TransformationRequest::new(HTML, 10, PDF)).is_empty());
    assert!(!service.is_transformable(&TransformationRequest::new(HTML, 10, PDF)));
}

#[test]
fn request_limits_override_configured_ones() {
    let service = builder(&[("content.transformer.Small.maxSourceSizeKBytes", "1")])
        .transformer(Fake::tagging("Small", "s").pair(TXT, HTML))
        .build()
        .unwrap();
    let mut limits = TransformationLimits::new();
    limits.set_max_source_size_kbytes(8);
    let request = txt_to_html(4096).with_options(TransformationOptions::new().with_limits(limits));
    assert_eq!(names(&service, &request), ["Small"]);
}

#[test]
fn use_context_selects_its_own_limits() {
    let service = builder(&[
        ("content.transformer.A.maxSourceSizeKBytes", "1"),
        ("content.transformer.A.maxSourceSizeKBytes.use.index", "64"),
    ])
    .transformer(Fake::tagging("A", "a").pair(TXT, HTML))
    .build()
    .unwrap();
    assert!(names(&service, &txt_to_html(4096)).is_empty());
    let indexing = txt_to_html(4096).with_options(TransformationOptions::new().with_use("index"));
    assert_eq!(names(&service, &indexing), ["A"]);
}

// ── Limits ───────────────────────────────────────────────────────────────────

#[test]
fn limit_layering_system_then_pair() {
    let service = builder(&[("content.transformer.default.maxSourceSizeKBytes", "100")])
        .transformer(Fake::tagging("A", "a").pair(TXT, HTML))
        .build()
        .unwrap();
    let resolver = service.registry().resolver();
    assert_eq!(resolver.resolve(Some("A"), TXT, HTML, None, false).max_source_size_kbytes(), 100);
    assert_eq!(resolver.resolve(Some("Other"), TXT, HTML, None, false).max_source_size_kbytes(), 100);

    service
        .reconfigure(props(&[
            ("content.transformer.default.maxSourceSizeKBytes", "100"),
            ("content.transformer.A.mimetypes.text/plain.text/html.maxSourceSizeKBytes", "200"),
        ]))
        .unwrap();
    let admin = service.admin();
    let pair = admin.resolved_limits(Some("A"), TXT, HTML, None).unwrap();
    let unrelated = admin.resolved_limits(Some("A"), HTML, PDF, None).unwrap();
    assert_eq!(pair.max_source_size_kbytes(), 200);
    assert_eq!(unrelated.max_source_size_kbytes(), 100);
}

#[test]
fn later_pair_member_clears_the_earlier_one() {
    let service = builder(&[
        ("content.transformer.A.maxSourceSizeKBytes", "50"),
        ("content.transformer.A.readLimitKBytes", "30"),
    ])
    .transformer(Fake::tagging("A", "a").pair(TXT, HTML))
    .build()
    .unwrap();
    let limits = service
        .admin()
        .resolved_limits(Some("A"), TXT, HTML, None)
        .unwrap();
    assert_eq!(limits.max_source_size_kbytes(), -1);
    assert_eq!(limits.read_limit_kbytes(), 30);
}

#[test]
fn extension_keys_resolve_through_the_catalog() {
    let service = builder(&[("content.transformer.A.extensions.txt.html.maxSourceSizeKBytes", "7")])
        .transformer(Fake::tagging("A", "a").pair(TXT, HTML))
        .build()
        .unwrap();
    let limits = service
        .admin()
        .resolved_limits(Some("A"), TXT, HTML, None)
        .unwrap();
    assert_eq!(limits.max_source_size_kbytes(), 7);
}
