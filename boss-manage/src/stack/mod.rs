//! The stack module owns everything that talks to the cloud stack engine: the `StackService`
//! seam, its CloudFormation implementation, and the driver that submits templates and waits for
//! the results.

pub(crate) mod cloudformation;
pub(crate) mod driver;
#[cfg(test)]
pub(crate) mod memory;

pub(crate) use driver::StackDriver;

use async_trait::async_trait;
use snafu::Snafu;
use std::collections::HashMap;
use std::fmt;
use tabled::Tabled;

/// Tag holding the version of the configuration that produced a stack
pub(crate) const VERSION_TAG: &str = "StackVersion";
/// Tag holding the commit of the tooling that last submitted a stack
pub(crate) const COMMIT_TAG: &str = "Commit";

/// How a stack status should be treated
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum StatusClass {
    InProgress,
    Complete,
    /// The engine rolled back; recoverable, but someone should look at why
    RollbackComplete,
    Failed,
    /// The engine couldn't roll back; needs manual intervention in the console
    RollbackFailed,
}

/// A stack status as reported by the engine, e.g. `UPDATE_COMPLETE`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct StackStatus(String);

impl StackStatus {
    pub(crate) fn new<S: Into<String>>(status: S) -> Self {
        Self(status.into())
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn class(&self) -> StatusClass {
        let status = self.0.as_str();
        if status.ends_with("_IN_PROGRESS") {
            StatusClass::InProgress
        } else if status.ends_with("ROLLBACK_FAILED") {
            StatusClass::RollbackFailed
        } else if status.ends_with("_FAILED") {
            StatusClass::Failed
        } else if status.ends_with("ROLLBACK_COMPLETE") {
            StatusClass::RollbackComplete
        } else {
            StatusClass::Complete
        }
    }

    pub(crate) fn is_in_progress(&self) -> bool {
        self.class() == StatusClass::InProgress
    }

    pub(crate) fn is_failed(&self) -> bool {
        self.0.ends_with("_FAILED")
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The parts of a deployed stack the driver needs
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StackDescription {
    pub(crate) name: String,
    pub(crate) status: StackStatus,
    pub(crate) tags: HashMap<String, String>,
    pub(crate) outputs: HashMap<String, String>,
}

/// One entry of a stack's event log
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StackEvent {
    pub(crate) logical_id: String,
    pub(crate) status: String,
    pub(crate) reason: Option<String>,
    /// Seconds since the epoch
    pub(crate) timestamp: i64,
}

/// Everything submitted with a create, update or change set
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StackRequest {
    pub(crate) name: String,
    pub(crate) template_body: String,
    pub(crate) parameters: Vec<(String, String)>,
    pub(crate) tags: Vec<(String, String)>,
    pub(crate) capabilities: Vec<String>,
}

/// One row of a change set preview
#[derive(Debug, Clone, PartialEq, Eq, Tabled)]
pub(crate) struct ResourceChange {
    #[tabled(rename = "Action")]
    pub(crate) action: String,
    #[tabled(rename = "Logical ID")]
    pub(crate) logical_id: String,
    #[tabled(rename = "Physical ID")]
    pub(crate) physical_id: String,
    #[tabled(rename = "Resource Type")]
    pub(crate) resource_type: String,
    #[tabled(rename = "Replacement")]
    pub(crate) replacement: String,
    #[tabled(rename = "Scope")]
    pub(crate) scope: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ChangeSet {
    pub(crate) status: String,
    pub(crate) reason: Option<String>,
    pub(crate) changes: Vec<ResourceChange>,
}

impl ChangeSet {
    pub(crate) fn is_pending(&self) -> bool {
        matches!(
            self.status.as_str(),
            "CREATE_PENDING" | "CREATE_IN_PROGRESS"
        )
    }

    /// The engine fails change sets that wouldn't change anything
    pub(crate) fn is_empty(&self) -> bool {
        self.status == "FAILED"
            && self.reason.as_deref().map_or(false, |reason| {
                reason.contains("didn't contain changes")
                    || reason.contains("No updates are to be performed")
            })
    }
}

/// The operations the driver and resolver need from the cloud stack engine
#[async_trait]
pub(crate) trait StackService: Send + Sync {
    /// Returns `None` when the stack doesn't exist
    async fn describe_stack(&self, name: &str) -> ServiceResult<Option<StackDescription>>;
    /// Every stack that isn't fully deleted, with its status
    async fn list_stacks(&self) -> ServiceResult<HashMap<String, StackStatus>>;
    async fn create_stack(&self, request: &StackRequest) -> ServiceResult<()>;
    async fn update_stack(&self, request: &StackRequest) -> ServiceResult<()>;
    async fn delete_stack(&self, name: &str) -> ServiceResult<()>;
    /// Events in the order the engine reports them, newest first
    async fn stack_events(&self, name: &str) -> ServiceResult<Vec<StackEvent>>;
    async fn create_change_set(&self, request: &StackRequest, change_set: &str)
        -> ServiceResult<()>;
    async fn describe_change_set(&self, stack: &str, change_set: &str) -> ServiceResult<ChangeSet>;
    async fn execute_change_set(&self, stack: &str, change_set: &str) -> ServiceResult<()>;
    async fn delete_change_set(&self, stack: &str, change_set: &str) -> ServiceResult<()>;
}

/// Errors reported by a `StackService`
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum ServiceError {
    #[snafu(display("Stack '{}' does not exist", stack))]
    Missing { stack: String },

    #[snafu(display("No updates are to be performed on stack '{}'", stack))]
    NoUpdates { stack: String },

    #[snafu(display("{}", source))]
    Api {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}
pub(crate) type ServiceResult<T> = std::result::Result<T, ServiceError>;
