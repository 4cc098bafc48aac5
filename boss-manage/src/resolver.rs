//! Turns a selection of configuration modules and an action into the order the modules are
//! applied in.  Planning is a pure function of the selection, the declared dependencies, and the
//! status of the deployed stacks; nothing here talks to the cloud.

use crate::actions::Action;
use crate::stack::StackStatus;
use bosslet_config::LogicalId;
use log::debug;
use snafu::ensure;
use std::collections::{HashMap, HashSet};

/// A selected module and the modules it depends on
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Selected {
    pub(crate) module: LogicalId,
    pub(crate) dependencies: Vec<LogicalId>,
}

impl Selected {
    pub(crate) fn new(module: LogicalId, dependencies: Vec<LogicalId>) -> Self {
        Self {
            module,
            dependencies,
        }
    }
}

/// The ordered list of modules to apply `action` to.  `declared` holds every known module with
/// its dependencies, so a cycle is found even when part of it isn't selected.
pub(crate) fn plan(
    action: Action,
    selection: &[Selected],
    declared: &[Selected],
    deployed: &HashMap<LogicalId, StackStatus>,
) -> Result<Vec<LogicalId>> {
    let known: Vec<Selected> = selection
        .iter()
        .chain(
            declared
                .iter()
                .filter(|entry| !selection.iter().any(|s| s.module == entry.module)),
        )
        .cloned()
        .collect();
    check_acyclic(&known)?;
    check_statuses(action, selection, deployed)?;
    check_dependencies(action, selection, deployed)?;

    let ordered = sort(selection)?;
    let mut planned: Vec<LogicalId> = match action {
        Action::Generate => ordered,
        Action::Create => ordered
            .into_iter()
            .filter(|module| !deployed.contains_key(module))
            .collect(),
        _ => ordered
            .into_iter()
            .filter(|module| deployed.contains_key(module))
            .collect(),
    };
    if action == Action::Delete {
        planned.reverse();
    }

    for module in &planned {
        if let Some(status) = deployed.get(module) {
            ensure!(
                !status.is_in_progress(),
                error::DependencyInProgressSnafu {
                    module: *module,
                    status: status.clone(),
                }
            );
        }
    }
    debug!("Planned {} on {:?}", action, planned);
    Ok(planned)
}

fn check_statuses(
    action: Action,
    selection: &[Selected],
    deployed: &HashMap<LogicalId, StackStatus>,
) -> Result<()> {
    let selected: HashSet<LogicalId> = selection.iter().map(|s| s.module).collect();

    for entry in selection {
        let targets = std::iter::once(&entry.module).chain(entry.dependencies.iter());
        for module in targets {
            if let Some(status) = deployed.get(module) {
                ensure!(
                    !status.is_in_progress(),
                    error::DependencyInProgressSnafu {
                        module: *module,
                        status: status.clone(),
                    }
                );
            }
        }
    }

    // Sorted so the reported module doesn't depend on hash order
    let mut stacks: Vec<_> = deployed.iter().collect();
    stacks.sort_by_key(|(module, _)| **module);
    for (module, status) in stacks {
        ensure!(
            status.as_str() != "UPDATE_ROLLBACK_FAILED",
            error::RollbackFailedSnafu { module: *module }
        );
        if action != Action::Delete && !selected.contains(module) {
            ensure!(
                !status.is_failed(),
                error::FailedStackSnafu {
                    module: *module,
                    status: status.clone(),
                }
            );
        }
    }
    Ok(())
}

fn check_dependencies(
    action: Action,
    selection: &[Selected],
    deployed: &HashMap<LogicalId, StackStatus>,
) -> Result<()> {
    let selected: HashSet<LogicalId> = selection.iter().map(|s| s.module).collect();
    for entry in selection {
        for dependency in &entry.dependencies {
            let satisfied = match action {
                // Deleting or rendering templates never needs the dependencies to exist
                Action::Delete | Action::Generate => true,
                Action::Create => selected.contains(dependency) || deployed.contains_key(dependency),
                _ => deployed.contains_key(dependency),
            };
            ensure!(
                satisfied,
                error::MissingDependencySnafu {
                    module: entry.module,
                    dependency: *dependency,
                }
            );
        }
    }
    Ok(())
}

/// Fails with the first cycle found in the dependencies of `declared`
pub(crate) fn check_acyclic(declared: &[Selected]) -> Result<()> {
    let graph: HashMap<LogicalId, Vec<LogicalId>> = declared
        .iter()
        .map(|entry| (entry.module, entry.dependencies.clone()))
        .collect();
    let mut marks = HashMap::new();
    let mut ordered = Vec::new();
    for entry in declared {
        let mut path = Vec::new();
        visit(entry.module, &graph, &mut marks, &mut path, &mut ordered)?;
    }
    Ok(())
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Depth-first topological sort; dependencies come before the modules needing them.  Roots are
/// visited in selection order, so independent modules keep the order they were asked for in.
fn sort(selection: &[Selected]) -> Result<Vec<LogicalId>> {
    let graph: HashMap<LogicalId, Vec<LogicalId>> = selection
        .iter()
        .map(|entry| {
            let edges = entry
                .dependencies
                .iter()
                .copied()
                .filter(|dependency| selection.iter().any(|s| s.module == *dependency))
                .collect();
            (entry.module, edges)
        })
        .collect();

    let depended_on: HashSet<LogicalId> = graph.values().flatten().copied().collect();
    let roots = selection
        .iter()
        .map(|entry| entry.module)
        .filter(|module| !depended_on.contains(module));
    // Modules that are only reachable through a cycle have no root; visiting them afterwards
    // reports the cycle.
    let everything = selection.iter().map(|entry| entry.module);

    let mut marks = HashMap::new();
    let mut ordered = Vec::new();
    for module in roots.chain(everything) {
        let mut path = Vec::new();
        visit(module, &graph, &mut marks, &mut path, &mut ordered)?;
    }
    Ok(ordered)
}

fn visit(
    module: LogicalId,
    graph: &HashMap<LogicalId, Vec<LogicalId>>,
    marks: &mut HashMap<LogicalId, Mark>,
    path: &mut Vec<LogicalId>,
    ordered: &mut Vec<LogicalId>,
) -> Result<()> {
    match marks.get(&module) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            let start = path.iter().position(|m| *m == module).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].iter().map(|m| m.to_string()).collect();
            cycle.push(module.to_string());
            return error::CircularDependencySnafu { cycle }.fail();
        }
        None => (),
    }

    marks.insert(module, Mark::Visiting);
    path.push(module);
    for dependency in graph.get(&module).into_iter().flatten() {
        visit(*dependency, graph, marks, path, ordered)?;
    }
    path.pop();
    marks.insert(module, Mark::Done);
    ordered.push(module);
    Ok(())
}

mod error {
    use crate::stack::StackStatus;
    use bosslet_config::LogicalId;
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(crate) enum Error {
        #[snafu(display("Circular dependency between modules: {}", cycle.join(" -> ")))]
        CircularDependency { cycle: Vec<String> },

        #[snafu(display("Stack for module '{}' is {}", module, status))]
        DependencyInProgress {
            module: LogicalId,
            status: StackStatus,
        },

        #[snafu(display(
            "Stack for module '{}' is {}; fix or delete it before changing other modules",
            module,
            status
        ))]
        FailedStack {
            module: LogicalId,
            status: StackStatus,
        },

        #[snafu(display(
            "Module '{}' depends on '{}', which is neither selected nor deployed",
            module,
            dependency
        ))]
        MissingDependency {
            module: LogicalId,
            dependency: LogicalId,
        },

        #[snafu(display(
            "Stack for module '{}' is UPDATE_ROLLBACK_FAILED and needs to be recovered in the console",
            module
        ))]
        RollbackFailed { module: LogicalId },
    }
}
pub(crate) use error::Error;
type Result<T> = std::result::Result<T, error::Error>;
