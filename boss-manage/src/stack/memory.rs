//! In-memory stack engine used by the driver and resolver tests.  Mutations move a stack to
//! `<ACTION>_IN_PROGRESS`; the next describe settles it on the configured outcome, so callers
//! have to poll the same way they would against the real engine.

use super::{
    ApiSnafu, ChangeSet, MissingSnafu, NoUpdatesSnafu, ResourceChange, ServiceResult,
    StackDescription, StackEvent, StackRequest, StackService, StackStatus,
};
use async_trait::async_trait;
use snafu::IntoError;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct State {
    stacks: HashMap<String, StackDescription>,
    /// Status a stack settles on after its current operation
    settle: HashMap<String, String>,
    /// Overrides the settled status of the next operation on a stack
    outcomes: HashMap<String, String>,
    events: HashMap<String, Vec<StackEvent>>,
    /// Changes the next change set of a stack will contain
    planned: HashMap<String, Vec<ResourceChange>>,
    change_sets: HashMap<(String, String), ChangeSet>,
    change_set_tags: HashMap<(String, String), Vec<(String, String)>>,
    /// Reason the next change set of a stack fails with
    change_set_failures: HashMap<String, String>,
    /// Stacks whose change sets can't be described
    unreadable_change_sets: HashSet<String>,
    calls: Vec<String>,
    clock: i64,
}

#[derive(Debug, Default)]
pub(crate) struct MemoryStacks {
    state: Mutex<State>,
}

impl MemoryStacks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds an existing stack with the given status and tags
    pub(crate) fn with_stack(self, name: &str, status: &str, tags: &[(&str, &str)]) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.stacks.insert(
                name.to_string(),
                StackDescription {
                    name: name.to_string(),
                    status: StackStatus::new(status),
                    tags: tags
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                    outputs: HashMap::new(),
                },
            );
        }
        self
    }

    /// The next operation on `name` ends in `status`, with a failure event for each of `failures`
    pub(crate) fn fail_next(&self, name: &str, status: &str, failures: &[(&str, &str)]) {
        let mut state = self.state.lock().unwrap();
        state.outcomes.insert(name.to_string(), status.to_string());
        for (logical_id, reason) in failures {
            state.clock += 1;
            let event = StackEvent {
                logical_id: logical_id.to_string(),
                status: "CREATE_FAILED".to_string(),
                reason: Some(reason.to_string()),
                timestamp: state.clock,
            };
            // Newest first, like the real engine
            state.events.entry(name.to_string()).or_default().insert(0, event);
        }
    }

    pub(crate) fn plan_changes(&self, name: &str, changes: Vec<ResourceChange>) {
        self.state
            .lock()
            .unwrap()
            .planned
            .insert(name.to_string(), changes);
    }

    /// The next change set of `name` ends in `FAILED` with `reason`
    pub(crate) fn fail_change_set(&self, name: &str, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .change_set_failures
            .insert(name.to_string(), reason.to_string());
    }

    /// Describing change sets of `name` fails from now on
    pub(crate) fn break_change_sets(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .unreadable_change_sets
            .insert(name.to_string());
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn stack(&self, name: &str) -> Option<StackDescription> {
        self.state.lock().unwrap().stacks.get(name).cloned()
    }

    pub(crate) fn change_sets(&self) -> usize {
        self.state.lock().unwrap().change_sets.len()
    }

    fn start(state: &mut State, name: &str, action: &str, tags: Option<&[(String, String)]>) {
        let settled = state
            .outcomes
            .remove(name)
            .unwrap_or_else(|| format!("{}_COMPLETE", action));
        state.settle.insert(name.to_string(), settled);
        let stack = state
            .stacks
            .entry(name.to_string())
            .or_insert_with(|| StackDescription {
                name: name.to_string(),
                status: StackStatus::new(""),
                tags: HashMap::new(),
                outputs: HashMap::new(),
            });
        stack.status = StackStatus::new(format!("{}_IN_PROGRESS", action));
        if let Some(tags) = tags {
            stack.tags = tags.iter().cloned().collect();
        }
    }
}

fn poisoned() -> super::ServiceError {
    ApiSnafu.into_error("memory stack state poisoned".into())
}

#[async_trait]
impl StackService for MemoryStacks {
    async fn describe_stack(&self, name: &str) -> ServiceResult<Option<StackDescription>> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        if let Some(settled) = state.settle.remove(name) {
            if settled == "DELETE_COMPLETE" {
                state.stacks.remove(name);
            } else if let Some(stack) = state.stacks.get_mut(name) {
                stack.status = StackStatus::new(settled);
            }
        }
        Ok(state.stacks.get(name).cloned())
    }

    async fn list_stacks(&self) -> ServiceResult<HashMap<String, StackStatus>> {
        let state = self.state.lock().map_err(|_| poisoned())?;
        Ok(state
            .stacks
            .iter()
            .map(|(name, stack)| (name.clone(), stack.status.clone()))
            .collect())
    }

    async fn create_stack(&self, request: &StackRequest) -> ServiceResult<()> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        state.calls.push(format!("create_stack {}", request.name));
        if state.stacks.contains_key(&request.name) {
            return Err(ApiSnafu.into_error(
                format!("Stack [{}] already exists", request.name).into(),
            ));
        }
        Self::start(&mut state, &request.name, "CREATE", Some(&request.tags));
        Ok(())
    }

    async fn update_stack(&self, request: &StackRequest) -> ServiceResult<()> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        state.calls.push(format!("update_stack {}", request.name));
        if !state.stacks.contains_key(&request.name) {
            return MissingSnafu {
                stack: &request.name,
            }
            .fail();
        }
        if state
            .planned
            .get(&request.name)
            .map_or(false, |changes| changes.is_empty())
        {
            return NoUpdatesSnafu {
                stack: &request.name,
            }
            .fail();
        }
        Self::start(&mut state, &request.name, "UPDATE", Some(&request.tags));
        Ok(())
    }

    async fn delete_stack(&self, name: &str) -> ServiceResult<()> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        state.calls.push(format!("delete_stack {}", name));
        if !state.stacks.contains_key(name) {
            return MissingSnafu { stack: name }.fail();
        }
        Self::start(&mut state, name, "DELETE", None);
        Ok(())
    }

    async fn stack_events(&self, name: &str) -> ServiceResult<Vec<StackEvent>> {
        let state = self.state.lock().map_err(|_| poisoned())?;
        Ok(state.events.get(name).cloned().unwrap_or_default())
    }

    async fn create_change_set(
        &self,
        request: &StackRequest,
        change_set: &str,
    ) -> ServiceResult<()> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        state
            .calls
            .push(format!("create_change_set {} {}", request.name, change_set));
        if !state.stacks.contains_key(&request.name) {
            return MissingSnafu {
                stack: &request.name,
            }
            .fail();
        }
        state.change_set_tags.insert(
            (request.name.clone(), change_set.to_string()),
            request.tags.clone(),
        );
        state.change_sets.insert(
            (request.name.clone(), change_set.to_string()),
            ChangeSet {
                status: "CREATE_PENDING".to_string(),
                reason: None,
                changes: Vec::new(),
            },
        );
        Ok(())
    }

    async fn describe_change_set(&self, stack: &str, change_set: &str) -> ServiceResult<ChangeSet> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        if state.unreadable_change_sets.contains(stack) {
            return Err(ApiSnafu.into_error("Rate exceeded".into()));
        }
        let planned = state.planned.get(stack).cloned().unwrap_or_default();
        let key = (stack.to_string(), change_set.to_string());
        let pending = state
            .change_sets
            .get(&key)
            .map_or(false, |current| current.is_pending());
        let failure = if pending {
            state.change_set_failures.remove(stack)
        } else {
            None
        };
        let current = state.change_sets.get_mut(&key).ok_or_else(|| {
            ApiSnafu.into_error(format!("ChangeSet [{}] does not exist", change_set).into())
        })?;
        if current.is_pending() {
            if let Some(reason) = failure {
                current.status = "FAILED".to_string();
                current.reason = Some(reason);
            } else if planned.is_empty() {
                current.status = "FAILED".to_string();
                current.reason = Some(
                    "The submitted information didn't contain changes. Submit different information to create a change set."
                        .to_string(),
                );
            } else {
                current.status = "CREATE_COMPLETE".to_string();
                current.changes = planned;
            }
            // Report pending once so callers have to wait
            return Ok(ChangeSet {
                status: "CREATE_PENDING".to_string(),
                reason: None,
                changes: Vec::new(),
            });
        }
        Ok(current.clone())
    }

    async fn execute_change_set(&self, stack: &str, change_set: &str) -> ServiceResult<()> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        state
            .calls
            .push(format!("execute_change_set {} {}", stack, change_set));
        let key = (stack.to_string(), change_set.to_string());
        state.change_sets.remove(&key);
        let tags = state.change_set_tags.remove(&key);
        Self::start(&mut state, stack, "UPDATE", tags.as_deref());
        Ok(())
    }

    async fn delete_change_set(&self, stack: &str, change_set: &str) -> ServiceResult<()> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        state
            .calls
            .push(format!("delete_change_set {} {}", stack, change_set));
        state
            .change_sets
            .remove(&(stack.to_string(), change_set.to_string()));
        Ok(())
    }
}
