//! Two-phase registry build from properties.
//!
//! Phase 1 plans: every `pipeline`/`failover` declaration becomes a node,
//! its references edges, and a depth-first walk yields a topological order.
//! References to names that are neither registered nor declared, reference
//! cycles, and declarations depending on a broken one are all collected.
//!
//! Phase 2 instantiates the planned composites in that order, so every
//! reference is already registered when it is looked up. Declarations can
//! therefore appear in any order, and all problems are reported together.

use crate::capability::Capability;
use crate::composite::{Failover, Pipeline, Stage};
use crate::error::ConfigError;
use crate::properties::{CompositeDecl, StageDecl, TransformerProperties};
use crate::registry::TransformerRegistry;
use crate::transformer::Transformer;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of [`build_composites`]: what got registered and what did not.
#[derive(Debug, Default)]
pub struct AssemblyReport {
    pub registered: Vec<String>,
    pub errors: Vec<ConfigError>,
}

impl AssemblyReport {
    pub fn into_result(self) -> Result<Vec<String>, ConfigError> {
        ConfigError::aggregate(self.errors)?;
        Ok(self.registered)
    }
}

/// Register leaf transformers; `available` properties decide which are
/// selectable.
pub fn register_leaves(
    registry: &TransformerRegistry,
    leaves: impl IntoIterator<Item = Arc<dyn Transformer>>,
) -> Result<(), ConfigError> {
    let props = registry.properties();
    let mut errors = Vec::new();
    for leaf in leaves {
        let available = props.available(leaf.name()).unwrap_or(true);
        if let Err(e) = registry.register(Capability::Simple(leaf), available) {
            errors.push(e);
        }
    }
    ConfigError::aggregate(errors)
}

/// Instantiate and register every composite the properties declare.
pub fn build_composites(registry: &TransformerRegistry) -> AssemblyReport {
    let props = registry.properties();
    let mut report = AssemblyReport::default();

    let mut decls: BTreeMap<&str, &CompositeDecl> = BTreeMap::new();
    for (name, decl) in props.composites() {
        if registry.contains(name) {
            report.errors.push(ConfigError::DuplicateName { name: name.to_string() });
        } else {
            decls.insert(name, decl);
        }
    }

    let mut planner = Planner {
        decls: &decls,
        registry,
        marks: HashMap::new(),
        stack: Vec::new(),
        order: Vec::new(),
        errors: Vec::new(),
    };
    for &name in decls.keys() {
        planner.visit(name);
    }
    let Planner { order, errors, .. } = planner;
    report.errors.extend(errors);

    for name in order {
        match instantiate(registry, &props, name, decls[name]) {
            Ok(()) => report.registered.push(name.to_string()),
            Err(e) => report.errors.push(e),
        }
    }

    info!(
        composites = report.registered.len(),
        errors = report.errors.len(),
        "Assembled composite transformers"
    );
    report
}

fn instantiate(
    registry: &TransformerRegistry,
    props: &TransformerProperties,
    name: &str,
    decl: &CompositeDecl,
) -> Result<(), ConfigError> {
    let lookup = |reference: &str| {
        registry
            .resolve_by_name(reference)
            .map_err(|_| ConfigError::Unresolved {
                name: name.to_string(),
                missing: vec![reference.to_string()],
            })
    };
    let capability = match decl {
        CompositeDecl::Pipeline(decls) => {
            let mut stages = Vec::with_capacity(decls.len());
            for StageDecl { name: stage, target_mimetype } in decls {
                let capability = stage.as_deref().map(lookup).transpose()?;
                stages.push(match (capability, target_mimetype) {
                    (Some(c), Some(t)) => Stage::new(c, t.clone()),
                    (Some(c), None) => Stage::last(c),
                    (None, t) => Stage::dynamic(t.clone()),
                });
            }
            Capability::Pipeline(Pipeline::new(name, stages)?)
        }
        CompositeDecl::Failover(names) => {
            let alternatives = names
                .iter()
                .map(|n| lookup(n.as_str()))
                .collect::<Result<Vec<_>, _>>()?;
            Capability::Failover(Failover::new(name, alternatives)?)
        }
    };
    let available = props.available(name).unwrap_or(true);
    registry.register(capability, available)?;
    Ok(())
}

// ── Planning ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Ready,
    Broken,
}

struct Planner<'a> {
    decls: &'a BTreeMap<&'a str, &'a CompositeDecl>,
    registry: &'a TransformerRegistry,
    marks: HashMap<&'a str, Mark>,
    stack: Vec<&'a str>,
    order: Vec<&'a str>,
    errors: Vec<ConfigError>,
}

impl<'a> Planner<'a> {
    /// Returns whether `name` can be instantiated.
    fn visit(&mut self, name: &'a str) -> bool {
        match self.marks.get(name) {
            Some(Mark::Ready) => return true,
            Some(Mark::Broken) => return false,
            Some(Mark::Visiting) => {
                self.report_cycle(name);
                return false;
            }
            None => {}
        }

        let decl: &'a CompositeDecl = self.decls[name];
        self.marks.insert(name, Mark::Visiting);
        self.stack.push(name);
        let mut missing = Vec::new();
        let mut broken = Vec::new();
        for dep in decl.references() {
            if self.decls.contains_key(dep) {
                if !self.visit(dep) {
                    broken.push(dep.to_string());
                }
            } else if !self.registry.contains(dep) {
                missing.push(dep.to_string());
            }
        }
        self.stack.pop();

        // already marked by a cycle through this node
        if self.marks.get(name) == Some(&Mark::Broken) {
            return false;
        }
        if !missing.is_empty() || !broken.is_empty() {
            if !missing.is_empty() {
                self.errors.push(ConfigError::Unresolved {
                    name: name.to_string(),
                    missing,
                });
            }
            if !broken.is_empty() {
                debug!(composite = name, depends_on = ?broken, "Depends on broken composites");
                self.errors.push(ConfigError::Unresolved {
                    name: name.to_string(),
                    missing: broken,
                });
            }
            self.marks.insert(name, Mark::Broken);
            return false;
        }
        self.marks.insert(name, Mark::Ready);
        self.order.push(name);
        true
    }

    fn report_cycle(&mut self, name: &'a str) {
        let start = self.stack.iter().position(|n| *n == name).unwrap_or(0);
        let members: Vec<&'a str> = self.stack[start..].to_vec();
        let mut names: Vec<String> = members.iter().map(|n| n.to_string()).collect();
        names.push(name.to_string());
        for member in members {
            self.marks.insert(member, Mark::Broken);
        }
        self.errors.push(ConfigError::Cycle { names });
    }
}
