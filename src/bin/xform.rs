//! CLI binary for edgequake-transform.
//!
//! A thin shim over the library crate: it loads transformer properties,
//! registers the built-in transformers and exposes the admin reports, the
//! test transform and one-off file conversion.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_transform::{
    Admin, BinaryPassThroughTransformer, EngineConfig, FileReader, FileWriter, MimetypeCatalog,
    StringExtractingTransformer, TestOutcome, TransformListener, TransformService,
    TransformationOptions, TransformationRequest, TransformerProperties,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

fn truncate(msg: &str, max: usize) -> String {
    if msg.chars().count() > max {
        let cut: String = msg.chars().take(max - 1).collect();
        format!("{cut}\u{2026}")
    } else {
        msg.to_string()
    }
}

// ── CLI listener ─────────────────────────────────────────────────────────────

/// Prints one line per attempt above a spinner, indented by nesting depth,
/// so pipeline stages and failover alternatives are visible as they run.
struct CliListener {
    bar: ProgressBar,
    failures: AtomicUsize,
}

impl CliListener {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Selecting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            failures: AtomicUsize::new(0),
        })
    }

    fn indent(depth: u32) -> String {
        "  ".repeat(depth as usize + 1)
    }
}

impl TransformListener for CliListener {
    fn on_selected(&self, source: &str, target: &str, transformer: &str, candidates: usize) {
        self.bar.println(format!(
            "{} {} {}",
            cyan("◆"),
            bold(&format!("{source} → {target}")),
            dim(&format!("{transformer} (1 of {candidates} candidates)"))
        ));
        self.bar.set_prefix("Transforming");
    }

    fn on_attempt_start(&self, transformer: &str, _source: &str, _target: &str, _depth: u32) {
        self.bar.set_message(transformer.to_string());
    }

    fn on_success(&self, transformer: &str, source: &str, target: &str, elapsed_ms: u64, depth: u32) {
        self.bar.println(format!(
            "{}{} {:<24} {}  {}",
            Self::indent(depth),
            green("✓"),
            transformer,
            dim(&format!("{source} → {target}")),
            dim(&format!("{elapsed_ms}ms")),
        ));
    }

    fn on_failure(&self, transformer: &str, _source: &str, _target: &str, error: &str, depth: u32) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "{}{} {:<24} {}",
            Self::indent(depth),
            red("✗"),
            transformer,
            red(&truncate(error, 80)),
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # List registered capabilities
  xform --properties transformers.properties list

  # Which capability would handle an HTML page of 40 KB?
  xform rank text/html text/plain --size 40960

  # Effective limits for one capability
  xform limits text/html text/plain --transformer StringExtracting

  # Run the built-in sample through the engine
  xform test application/json text/plain

  # Exercise every feasible pair, 8 at a time
  xform test-all --concurrency 8

  # Convert a file (types inferred from extensions)
  xform convert page.html -o page.txt

  # JSON output for scripting
  xform --json stats

PROPERTIES:
  <prefix>.<name>.<suffix>[.use.<use>]
  <prefix>.<name>.extensions.<src>.<tgt>.<suffix>[.use.<use>]
  <prefix>.<name>.mimetypes.<src>.<tgt>.<suffix>[.use.<use>]
  <prefix>.<name>.pipeline=<name>|<ext>|<name>
  <prefix>.<name>.failover=<name>|<name>

  Suffixes: priority, supported, available, thresholdCount, errorTime,
  timeoutMs, readLimitTimeMs, maxSourceSizeKBytes, readLimitKBytes,
  maxPages, pageLimit

ENVIRONMENT VARIABLES:
  XFORM_PROPERTIES        Properties file (.properties or .json)
  XFORM_PREFIX            Property prefix (default: content.transformer)
  MIMETYPE_CATALOG_PATH   Extension-to-mimetype mapping file
  RUST_LOG                Overrides --verbose / --quiet log filtering
"#;

/// Select, chain and run document format transformers.
#[derive(Parser, Debug)]
#[command(
    name = "xform",
    version,
    about = "Select, chain and run document format transformers",
    long_about = "Inspect and exercise a transformer registry: list capabilities, show how \
a request would be ranked, print resolved limits and statistics, run test transforms on \
built-in samples, and convert files.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Transformer properties file (.properties or .json).
    #[arg(short, long, global = true, env = "XFORM_PROPERTIES")]
    properties: Option<PathBuf>,

    /// Property key prefix.
    #[arg(long, global = true, env = "XFORM_PREFIX", default_value = edgequake_transform::DEFAULT_PREFIX)]
    prefix: String,

    /// Output structured JSON instead of tables.
    #[arg(long, global = true, env = "XFORM_JSON")]
    json: bool,

    /// Disable progress output.
    #[arg(long, global = true, env = "XFORM_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "XFORM_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "XFORM_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered capabilities.
    List,
    /// Rank the feasible capabilities for a request.
    Rank(RequestArgs),
    /// Show resolved limits for a pair.
    Limits {
        #[command(flatten)]
        request: RequestArgs,
        /// Capability name; omit for the system-wide layer.
        #[arg(short, long)]
        transformer: Option<String>,
    },
    /// Show performance statistics.
    Stats {
        /// Only this capability.
        #[arg(short, long)]
        transformer: Option<String>,
    },
    /// Transform the built-in sample for a source mimetype.
    Test {
        source: String,
        target: String,
        /// Force this capability instead of selecting one.
        #[arg(short, long)]
        transformer: Option<String>,
    },
    /// Test every feasible sample pair.
    TestAll {
        /// Concurrent test transforms.
        #[arg(short, long, default_value_t = 4)]
        concurrency: usize,
    },
    /// Convert a file.
    Convert {
        input: PathBuf,
        /// Output file.
        #[arg(short, long)]
        output: PathBuf,
        /// Source mimetype (default: from the input extension).
        #[arg(long)]
        from: Option<String>,
        /// Target mimetype (default: from the output extension).
        #[arg(long)]
        to: Option<String>,
        /// Force this capability instead of selecting one.
        #[arg(short, long)]
        transformer: Option<String>,
        /// Use context for limit resolution.
        #[arg(long = "use")]
        use_context: Option<String>,
    },
}

#[derive(Args, Debug)]
struct RequestArgs {
    source: String,
    target: String,
    /// Source size in bytes (-1 for unknown).
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    size: i64,
    /// Use context for limit resolution.
    #[arg(long = "use")]
    use_context: Option<String>,
}

impl RequestArgs {
    fn request(&self) -> TransformationRequest {
        let mut options = TransformationOptions::new();
        options.use_context = self.use_context.clone();
        TransformationRequest::new(&self.source, self.size, &self.target).with_options(options)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar provides the feedback for long-running commands;
    // keep library INFO lines out of its way unless asked for.
    let long_running = matches!(cli.command, Command::TestAll { .. } | Command::Convert { .. });
    let show_progress = long_running && !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let listener = (show_progress && matches!(cli.command, Command::Convert { .. })).then(CliListener::new);
    let service = build_service(&cli, listener.clone())?;
    let admin = service.admin();

    match &cli.command {
        Command::List => print_capabilities(&admin, cli.json)?,
        Command::Rank(args) => print_rankings(&admin, &args.request(), cli.json)?,
        Command::Limits {
            request,
            transformer,
        } => {
            let limits = admin
                .resolved_limits(
                    transformer.as_deref(),
                    &request.source,
                    &request.target,
                    request.use_context.as_deref(),
                )
                .context("Failed to resolve limits")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&limits).context("Failed to serialise limits")?);
            } else {
                println!(
                    "{}  {} → {}",
                    bold(transformer.as_deref().unwrap_or("<system>")),
                    request.source,
                    request.target
                );
                println!("  {limits}");
            }
        }
        Command::Stats { transformer } => {
            let entries = match transformer {
                Some(name) => admin.statistics_for(name),
                None => admin.statistics(),
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&entries).context("Failed to serialise statistics")?);
            } else if entries.is_empty() {
                eprintln!("{}", dim("No statistics recorded yet"));
            } else {
                println!("{:<48} {:>8} {:>8} {:>12}", bold("KEY"), "COUNT", "ERRORS", "AVERAGE ms");
                for e in &entries {
                    println!("{:<40} {:>8} {:>8} {:>12.1}", e.key.to_string(), e.count, e.error_count, e.average_ms);
                }
            }
        }
        Command::Test {
            source,
            target,
            transformer,
        } => {
            let outcome = admin.test_transform(source, target, transformer.as_deref()).await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome).context("Failed to serialise outcome")?);
            } else {
                print_outcome(&outcome);
            }
            if !outcome.success {
                std::process::exit(1);
            }
        }
        Command::TestAll { concurrency } => {
            let outcomes = run_test_all(&admin, *concurrency, show_progress).await;
            let failed = outcomes.iter().filter(|o| !o.success).count();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcomes).context("Failed to serialise outcomes")?);
            } else if !show_progress {
                outcomes.iter().for_each(print_outcome);
            }
            if !cli.quiet && !cli.json {
                print_summary(outcomes.len(), failed);
            }
            if failed > 0 {
                std::process::exit(1);
            }
        }
        Command::Convert {
            input,
            output,
            from,
            to,
            transformer,
            use_context,
        } => {
            let catalog = service.executor().catalog();
            let source = mimetype_arg(from.as_deref(), input, catalog)?;
            let target = mimetype_arg(to.as_deref(), output, catalog)?;
            let reader = Box::new(FileReader::new(input, &source));
            let writer = Box::new(FileWriter::new(output, &target));
            let mut options = TransformationOptions::new();
            options.use_context = use_context.clone();

            let result = match transformer {
                Some(name) => service.transform_with(name, reader, writer, options).await,
                None => service.transform(reader, writer, options).await,
            };
            if let Some(l) = &listener {
                l.bar.finish_and_clear();
            }
            let report = result.with_context(|| format!("Failed to convert {}", input.display()))?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report).context("Failed to serialise report")?);
            } else if !cli.quiet {
                eprintln!(
                    "{}  {}  {}ms  →  {}",
                    green("✔"),
                    report.transformer,
                    report.elapsed_ms,
                    bold(&output.display().to_string()),
                );
                let failed_attempts = listener.as_ref().map_or(0, |l| l.failures.load(Ordering::SeqCst));
                if failed_attempts > 0 {
                    eprintln!("   {}", dim(&format!("{failed_attempts} attempts failed before success")));
                }
                if let Some(from) = &report.rerouted_from {
                    eprintln!("   {}", cyan(&format!("{from} failed; content sniffed as {}, rerouted", report.source_mimetype)));
                }
            }
        }
    }

    Ok(())
}

/// Load catalog and properties, then register the built-in transformers.
fn build_service(cli: &Cli, listener: Option<Arc<CliListener>>) -> Result<TransformService> {
    let catalog = MimetypeCatalog::load_default().context("Failed to load mimetype catalog")?;
    let properties = match &cli.properties {
        Some(path) => TransformerProperties::from_file(&cli.prefix, path, &catalog)
            .with_context(|| format!("Invalid transformer properties in {}", path.display()))?,
        None => TransformerProperties::empty(&cli.prefix),
    };
    let config = EngineConfig::builder()
        .prefix(cli.prefix.clone())
        .build()
        .context("Invalid engine configuration")?;

    let mut builder = TransformService::builder()
        .config(config)
        .catalog(Arc::new(catalog))
        .properties(properties)
        .transformer(StringExtractingTransformer)
        .transformer(BinaryPassThroughTransformer);
    if let Some(l) = listener {
        builder = builder.listener(l);
    }
    builder.build().context("Failed to assemble transformers")
}

fn mimetype_arg(explicit: Option<&str>, path: &Path, catalog: &MimetypeCatalog) -> Result<String> {
    if let Some(m) = explicit {
        return Ok(m.to_string());
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .with_context(|| format!("{} has no extension; pass the mimetype explicitly", path.display()))?;
    catalog
        .mimetype_for_extension(ext)
        .map(str::to_string)
        .with_context(|| format!("Unknown extension '{ext}'; pass the mimetype explicitly"))
}

async fn run_test_all(admin: &Admin<'_>, concurrency: usize, show_progress: bool) -> Vec<TestOutcome> {
    if !show_progress {
        return admin.test_all(concurrency, |_| {}).await;
    }
    let total = admin.feasible_pairs().len();
    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pairs  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS),
    );
    bar.set_prefix("Testing");
    bar.enable_steady_tick(Duration::from_millis(80));

    let outcomes = admin
        .test_all(concurrency, |o| {
            bar.println(outcome_line(o));
            bar.inc(1);
        })
        .await;
    bar.finish_and_clear();
    outcomes
}

fn outcome_line(o: &TestOutcome) -> String {
    let pair = format!("{} → {}", o.source_mimetype, o.target_mimetype);
    if o.success {
        format!(
            "  {} {:<44} {:<24} {}",
            green("✓"),
            pair,
            o.transformer.as_deref().unwrap_or("-"),
            dim(&format!("{}ms  {} bytes", o.elapsed_ms, o.output_bytes)),
        )
    } else {
        format!(
            "  {} {:<44} {}",
            red("✗"),
            pair,
            red(&truncate(o.error.as_deref().unwrap_or("failed"), 80)),
        )
    }
}

fn print_outcome(o: &TestOutcome) {
    println!("{}", outcome_line(o));
}

fn print_summary(total: usize, failed: usize) {
    if failed == 0 {
        eprintln!("{} {} pairs transformed successfully", green("✔"), bold(&total.to_string()));
    } else {
        eprintln!(
            "{} {}/{} pairs transformed  ({} failed)",
            if failed == total { red("✘") } else { cyan("⚠") },
            bold(&(total - failed).to_string()),
            total,
            red(&failed.to_string()),
        );
    }
}

fn print_capabilities(admin: &Admin<'_>, json: bool) -> Result<()> {
    let capabilities = admin.list_capabilities();
    if json {
        println!("{}", serde_json::to_string_pretty(&capabilities).context("Failed to serialise capabilities")?);
        return Ok(());
    }
    for c in &capabilities {
        let parts = if c.components.is_empty() {
            String::new()
        } else {
            let named: Vec<&str> = c
                .components
                .iter()
                .map(|p| if p.is_empty() { "<dynamic>" } else { p.as_str() })
                .collect();
            dim(&format!("[{}]", named.join(" | ")))
        };
        println!(
            "{} {:<28} {:<9} {}",
            if c.available { green("●") } else { dim("○") },
            c.name,
            c.kind.to_string(),
            parts
        );
    }
    Ok(())
}

fn print_rankings(admin: &Admin<'_>, request: &TransformationRequest, json: bool) -> Result<()> {
    let ranking = admin.rankings(request);
    if json {
        println!("{}", serde_json::to_string_pretty(&ranking).context("Failed to serialise rankings")?);
        return Ok(());
    }
    if ranking.is_empty() {
        eprintln!("{} no capability can handle {}", red("✘"), request);
        std::process::exit(1);
    }
    println!("{}", bold(&request.to_string()));
    for r in &ranking {
        let max = match r.max_source_size_kbytes {
            -1 => "unlimited".to_string(),
            kb => format!("{kb} KB"),
        };
        println!(
            "  {:>2}. {:<28} priority {:>4}  avg {:>9.1}ms  {}",
            r.rank,
            r.name,
            r.priority,
            r.average_ms,
            dim(&format!("{} runs, {} errors, max {max}", r.count, r.error_count)),
        );
    }
    Ok(())
}
