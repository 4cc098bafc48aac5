//! The stack driver submits templates to the stack engine and waits for the results.
//!
//! Updates go through a change set unless previews are disabled: the change set is rendered as a
//! table, the operator confirms, and the change set is executed or deleted.  Whatever happens
//! while previewing, the change set is deleted before an error is returned.

use super::{
    ChangeSet, ResourceChange, ServiceError, StackEvent, StackRequest, StackService, StackStatus,
    COMMIT_TAG, VERSION_TAG,
};
use crate::poll::poll;
use crate::prompt::Prompt;
use cfn_template::Template;
use log::{debug, info, warn};
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tabled::Table;

/// Version assumed for stacks created before versions were tagged
pub(crate) const LEGACY_VERSION: u32 = 1;

/// The lifecycle operation being waited on; terminal success is `<ACTION>_COMPLETE`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Action {
    Create,
    Update,
    Delete,
}

impl Action {
    fn complete(self) -> &'static str {
        match self {
            Action::Create => "CREATE_COMPLETE",
            Action::Update => "UPDATE_COMPLETE",
            Action::Delete => "DELETE_COMPLETE",
        }
    }
}

/// The rendered form of a change set, shown to the operator before it's applied
struct ChangePreview<'a> {
    stack: &'a str,
    changes: &'a [ResourceChange],
}

impl fmt::Display for ChangePreview<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Changes to stack {}:", self.stack)?;
        write!(f, "{}", Table::new(self.changes))
    }
}

pub(crate) struct StackDriver<'a> {
    service: &'a dyn StackService,
    prompt: &'a dyn Prompt,
    commit: String,
    poll_interval: Duration,
    preview: bool,
}

impl<'a> StackDriver<'a> {
    pub(crate) fn new<S: Into<String>>(
        service: &'a dyn StackService,
        prompt: &'a dyn Prompt,
        commit: S,
        poll_interval: Duration,
        preview: bool,
    ) -> Self {
        Self {
            service,
            prompt,
            commit: commit.into(),
            poll_interval,
            preview,
        }
    }

    /// Name of the change set used to preview updates
    pub(crate) fn change_set_name(&self) -> String {
        // Change set names must start with a letter and may only hold letters, digits and dashes
        let commit: String = self
            .commit
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        format!("boss-{}", commit)
    }

    fn request(&self, name: &str, template: &Template, version: u32) -> Result<StackRequest> {
        let missing = template.missing_arguments();
        ensure!(
            missing.is_empty(),
            error::MissingArgumentsSnafu {
                stack: name,
                keys: missing,
            }
        );
        template
            .validate()
            .context(error::TemplateSnafu { stack: name })?;

        Ok(StackRequest {
            name: name.to_string(),
            template_body: template
                .to_string_pretty()
                .context(error::TemplateSnafu { stack: name })?,
            parameters: template
                .arguments()
                .filter_map(|(key, value)| Some((key.to_string(), value?.to_string())))
                .collect(),
            tags: vec![
                (VERSION_TAG.to_string(), version.to_string()),
                (COMMIT_TAG.to_string(), self.commit.clone()),
            ],
            capabilities: template
                .capabilities()
                .map(|capability| capability.as_str().to_string())
                .collect(),
        })
    }

    /// Creates the stack and waits for `CREATE_COMPLETE`
    pub(crate) async fn create(&self, name: &str, template: &Template, version: u32) -> Result<()> {
        let request = self.request(name, template, version)?;
        info!("Creating stack {} (version {})", name, version);
        self.service
            .create_stack(&request)
            .await
            .context(error::ServiceSnafu {
                stack: name,
                operation: "create",
            })?;
        self.wait(name, Action::Create).await?;
        info!("Created stack {}", name);
        Ok(())
    }

    /// Updates the stack, through a previewed change set unless previews are disabled.  Returns
    /// `false` when there was nothing to change.
    pub(crate) async fn update(&self, name: &str, template: &Template, version: u32) -> Result<bool> {
        let request = self.request(name, template, version)?;
        if !self.preview {
            return self.update_directly(&request).await;
        }

        let change_set = self.change_set_name();
        info!("Creating change set {} for stack {}", change_set, name);
        self.service
            .create_change_set(&request, &change_set)
            .await
            .context(error::ServiceSnafu {
                stack: name,
                operation: "create change set",
            })?;

        let preview = match self.preview_change_set(name, &change_set).await {
            Ok(preview) => preview,
            Err(e) => {
                self.discard_change_set(name, &change_set).await;
                return Err(e);
            }
        };

        match preview {
            Preview::NoChanges => {
                info!("No changes detected for stack {}", name);
                self.discard_change_set(name, &change_set).await;
                Ok(false)
            }
            Preview::Declined => {
                self.discard_change_set(name, &change_set).await;
                error::CanceledSnafu { stack: name }.fail()
            }
            Preview::Accepted => {
                info!("Executing change set {} for stack {}", change_set, name);
                self.service
                    .execute_change_set(name, &change_set)
                    .await
                    .context(error::ServiceSnafu {
                        stack: name,
                        operation: "execute change set",
                    })?;
                self.wait(name, Action::Update).await?;
                info!("Updated stack {}", name);
                Ok(true)
            }
        }
    }

    async fn update_directly(&self, request: &StackRequest) -> Result<bool> {
        let name = request.name.as_str();
        info!("Updating stack {} without preview", name);
        match self.service.update_stack(request).await {
            Ok(()) => (),
            Err(ServiceError::NoUpdates { .. }) => {
                info!("No changes detected for stack {}", name);
                return Ok(false);
            }
            Err(source) => {
                return Err(source).context(error::ServiceSnafu {
                    stack: name,
                    operation: "update",
                })
            }
        }
        self.wait(name, Action::Update).await?;
        info!("Updated stack {}", name);
        Ok(true)
    }

    /// Waits for the change set to be ready, shows it, and asks whether to apply it
    async fn preview_change_set(&self, name: &str, change_set: &str) -> Result<Preview> {
        let ready: ChangeSet = poll(
            &format!("change set {}", change_set),
            self.poll_interval,
            None,
            move || async move {
                let current = self
                    .service
                    .describe_change_set(name, change_set)
                    .await
                    .context(error::ServiceSnafu {
                        stack: name,
                        operation: "describe change set",
                    })?;
                Ok::<_, Error>(if current.is_pending() {
                    None
                } else {
                    Some(current)
                })
            },
        )
        .await?
        .context(error::TimeoutSnafu {
            what: format!("change set {}", change_set),
        })?;

        if ready.is_empty() {
            return Ok(Preview::NoChanges);
        }
        ensure!(
            ready.status == "CREATE_COMPLETE",
            error::ChangeSetSnafu {
                stack: name,
                change_set,
                status: &ready.status,
                reason: ready.reason.clone().unwrap_or_default(),
            }
        );

        println!(
            "{}",
            ChangePreview {
                stack: name,
                changes: &ready.changes,
            }
        );
        if self
            .prompt
            .confirm(&format!("Apply these changes to {}?", name), false)
        {
            Ok(Preview::Accepted)
        } else {
            Ok(Preview::Declined)
        }
    }

    /// Deletes a change set, logging rather than failing so the original outcome is reported
    async fn discard_change_set(&self, name: &str, change_set: &str) {
        debug!("Deleting change set {} of stack {}", change_set, name);
        if let Err(e) = self.service.delete_change_set(name, change_set).await {
            warn!("Failed to delete change set {} of stack {}: {}", change_set, name, e);
        }
    }

    /// Deletes the stack and waits for it to be gone.  A stack that is already gone counts as
    /// deleted.
    pub(crate) async fn delete(&self, name: &str) -> Result<()> {
        info!("Deleting stack {}", name);
        match self.service.delete_stack(name).await {
            Ok(()) => (),
            Err(ServiceError::Missing { .. }) => {
                info!("Stack {} is already deleted", name);
                return Ok(());
            }
            Err(source) => {
                return Err(source).context(error::ServiceSnafu {
                    stack: name,
                    operation: "delete",
                })
            }
        }
        self.wait(name, Action::Delete).await?;
        info!("Deleted stack {}", name);
        Ok(())
    }

    /// Status of every stack that currently exists
    pub(crate) async fn status(&self) -> Result<HashMap<String, StackStatus>> {
        self.service
            .list_stacks()
            .await
            .context(error::ServiceSnafu {
                stack: "*",
                operation: "list",
            })
    }

    /// The version tagged on the stack, `None` if the stack doesn't exist.  Stacks without a
    /// version tag are from before versions were tracked and count as version 1.
    pub(crate) async fn existing_version(&self, name: &str) -> Result<Option<u32>> {
        let stack = match self
            .service
            .describe_stack(name)
            .await
            .context(error::ServiceSnafu {
                stack: name,
                operation: "describe",
            })? {
            Some(stack) => stack,
            None => return Ok(None),
        };
        match stack.tags.get(VERSION_TAG) {
            Some(version) => version
                .parse()
                .map(Some)
                .context(error::VersionTagSnafu {
                    stack: name,
                    value: version,
                }),
            None => Ok(Some(LEGACY_VERSION)),
        }
    }

    /// Outputs of an existing stack
    pub(crate) async fn outputs(&self, name: &str) -> Result<HashMap<String, String>> {
        let stack = self
            .service
            .describe_stack(name)
            .await
            .context(error::ServiceSnafu {
                stack: name,
                operation: "describe",
            })?
            .context(error::VanishedSnafu { stack: name })?;
        Ok(stack.outputs)
    }

    /// Polls the stack until it leaves `*_IN_PROGRESS`, then checks that it ended where the
    /// action should have left it.
    async fn wait(&self, name: &str, action: Action) -> Result<()> {
        let status = poll(
            &format!("stack {}", name),
            self.poll_interval,
            None,
            move || async move {
                let stack = self
                    .service
                    .describe_stack(name)
                    .await
                    .context(error::ServiceSnafu {
                        stack: name,
                        operation: "describe",
                    })?;
                match stack {
                    None if action == Action::Delete => {
                        Ok(Some(StackStatus::new(Action::Delete.complete())))
                    }
                    None => error::VanishedSnafu { stack: name }.fail(),
                    Some(stack) if stack.status.is_in_progress() => {
                        debug!("Stack {} is {}", name, stack.status);
                        Ok(None)
                    }
                    Some(stack) => Ok(Some(stack.status)),
                }
            },
        )
        .await?
        .context(error::TimeoutSnafu {
            what: format!("stack {}", name),
        })?;

        if status.as_str() == action.complete() {
            return Ok(());
        }
        let causes = self.failure_causes(name).await?;
        error::StackFailedSnafu {
            stack: name,
            status,
            causes,
        }
        .fail()
    }

    /// Every `*_FAILED` event of the stack as `logical-id: reason`, oldest first
    async fn failure_causes(&self, name: &str) -> Result<Vec<String>> {
        let events = match self.service.stack_events(name).await {
            Ok(events) => events,
            // Failed creates may be rolled back and deleted before the events are read
            Err(ServiceError::Missing { .. }) => Vec::new(),
            Err(source) => {
                return Err(source).context(error::ServiceSnafu {
                    stack: name,
                    operation: "describe events",
                })
            }
        };
        Ok(failed_events(events))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Preview {
    NoChanges,
    Declined,
    Accepted,
}

fn failed_events(mut events: Vec<StackEvent>) -> Vec<String> {
    events.sort_by_key(|event| event.timestamp);
    events
        .into_iter()
        .filter(|event| event.status.ends_with("_FAILED"))
        .map(|event| {
            format!(
                "{}: {}",
                event.logical_id,
                event.reason.as_deref().unwrap_or("no reason given")
            )
        })
        .collect()
}

mod error {
    use crate::stack::{ServiceError, StackStatus};
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(crate) enum Error {
        #[snafu(display("Update of stack {} canceled by operator", stack))]
        Canceled { stack: String },

        #[snafu(display(
            "Change set {} for stack {} ended in {}: {}",
            change_set,
            stack,
            status,
            reason
        ))]
        ChangeSet {
            stack: String,
            change_set: String,
            status: String,
            reason: String,
        },

        #[snafu(display("Stack {} has parameters without values: {}", stack, keys.join(", ")))]
        MissingArguments { stack: String, keys: Vec<String> },

        #[snafu(display("Failed to {} stack {}: {}", operation, stack, source))]
        Service {
            stack: String,
            operation: String,
            source: ServiceError,
        },

        #[snafu(display("Stack {} ended in {}", stack, status))]
        StackFailed {
            stack: String,
            status: StackStatus,
            causes: Vec<String>,
        },

        #[snafu(display("Invalid template for stack {}: {}", stack, source))]
        Template {
            stack: String,
            source: cfn_template::Error,
        },

        #[snafu(display("Timed out waiting for {}", what))]
        Timeout { what: String },

        #[snafu(display("Stack {} disappeared while it was being changed", stack))]
        Vanished { stack: String },

        #[snafu(display("Stack {} has invalid version tag '{}': {}", stack, value, source))]
        VersionTag {
            stack: String,
            value: String,
            source: std::num::ParseIntError,
        },
    }
}
pub(crate) use error::Error;
type Result<T> = std::result::Result<T, error::Error>;

#[cfg(test)]
mod test {
    use super::{failed_events, Error, StackDriver};
    use crate::prompt::FixedAnswer;
    use crate::stack::memory::MemoryStacks;
    use crate::stack::{ResourceChange, StackEvent};
    use cfn_template::{Arg, Template};
    use std::time::Duration;

    const STACK: &str = "CoreBossletA";

    fn template() -> Template {
        let mut template = Template::new("Core");
        template.add_vpc("Vpc", "vpc.bosslet.a", "10.10.0.0/16");
        template
    }

    fn driver<'a>(
        stacks: &'a MemoryStacks,
        answer: &'a FixedAnswer,
        preview: bool,
    ) -> StackDriver<'a> {
        StackDriver::new(stacks, answer, "abc123", Duration::from_secs(5), preview)
    }

    fn change() -> ResourceChange {
        ResourceChange {
            action: "Modify".into(),
            logical_id: "Vpc".into(),
            physical_id: "vpc-1234".into(),
            resource_type: "AWS::EC2::VPC".into(),
            replacement: "False".into(),
            scope: "Tags".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn create_tags_version_and_commit() {
        let stacks = MemoryStacks::new();
        let answer = FixedAnswer(true);
        driver(&stacks, &answer, true)
            .create(STACK, &template(), 1)
            .await
            .unwrap();

        let stack = stacks.stack(STACK).unwrap();
        assert_eq!(stack.status.as_str(), "CREATE_COMPLETE");
        assert_eq!(stack.tags["StackVersion"], "1");
        assert_eq!(stack.tags["Commit"], "abc123");
    }

    #[tokio::test(start_paused = true)]
    async fn create_refuses_missing_arguments() {
        let stacks = MemoryStacks::new();
        let answer = FixedAnswer(true);
        let mut template = template();
        template.add_arg(Arg::ami("Ami", None::<String>, "AMI"));

        let err = driver(&stacks, &answer, true)
            .create(STACK, &template, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingArguments { ref keys, .. } if keys == &["Ami"]));
        assert!(stacks.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_causes_are_chronological() {
        let stacks = MemoryStacks::new();
        stacks.fail_next(
            STACK,
            "ROLLBACK_COMPLETE",
            &[("Vpc", "CIDR overlaps"), ("Subnet", "Resource creation cancelled")],
        );
        let answer = FixedAnswer(true);

        let err = driver(&stacks, &answer, true)
            .create(STACK, &template(), 1)
            .await
            .unwrap_err();
        match err {
            Error::StackFailed { status, causes, .. } => {
                assert_eq!(status.as_str(), "ROLLBACK_COMPLETE");
                assert_eq!(
                    causes,
                    vec![
                        "Vpc: CIDR overlaps".to_string(),
                        "Subnet: Resource creation cancelled".to_string()
                    ]
                );
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn empty_change_set_is_not_executed() {
        let stacks = MemoryStacks::new().with_stack(STACK, "CREATE_COMPLETE", &[]);
        stacks.plan_changes(STACK, vec![]);
        let answer = FixedAnswer(true);

        let changed = driver(&stacks, &answer, true)
            .update(STACK, &template(), 2)
            .await
            .unwrap();
        assert!(!changed);
        let calls = stacks.calls();
        assert!(calls.iter().all(|call| !call.starts_with("execute_change_set")));
        assert!(calls.contains(&format!("delete_change_set {} boss-abc123", STACK)));
        assert_eq!(stacks.change_sets(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn declined_change_set_is_deleted() {
        let stacks = MemoryStacks::new().with_stack(STACK, "CREATE_COMPLETE", &[]);
        stacks.plan_changes(STACK, vec![change()]);
        let answer = FixedAnswer(false);

        let err = driver(&stacks, &answer, true)
            .update(STACK, &template(), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Canceled { .. }));
        assert_eq!(stacks.change_sets(), 0);
        assert_eq!(stacks.stack(STACK).unwrap().status.as_str(), "CREATE_COMPLETE");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_change_set_is_deleted() {
        let stacks = MemoryStacks::new().with_stack(STACK, "CREATE_COMPLETE", &[]);
        stacks.plan_changes(STACK, vec![change()]);
        stacks.fail_change_set(STACK, "Template error: unresolved resource dependencies [Gone]");
        let answer = FixedAnswer(true);

        let err = driver(&stacks, &answer, true)
            .update(STACK, &template(), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ChangeSet { ref status, .. } if status == "FAILED"));
        let calls = stacks.calls();
        assert!(calls.contains(&format!("delete_change_set {} boss-abc123", STACK)));
        assert!(calls.iter().all(|call| !call.starts_with("execute_change_set")));
        assert_eq!(stacks.change_sets(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_change_set_is_deleted() {
        let stacks = MemoryStacks::new().with_stack(STACK, "CREATE_COMPLETE", &[]);
        stacks.plan_changes(STACK, vec![change()]);
        stacks.break_change_sets(STACK);
        let answer = FixedAnswer(true);

        let err = driver(&stacks, &answer, true)
            .update(STACK, &template(), 2)
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::Service { ref operation, .. } if operation == "describe change set")
        );
        assert!(stacks
            .calls()
            .contains(&format!("delete_change_set {} boss-abc123", STACK)));
        assert_eq!(stacks.change_sets(), 0);
        assert_eq!(stacks.stack(STACK).unwrap().status.as_str(), "CREATE_COMPLETE");
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_change_set_is_executed() {
        let stacks = MemoryStacks::new().with_stack(STACK, "CREATE_COMPLETE", &[]);
        stacks.plan_changes(STACK, vec![change()]);
        let answer = FixedAnswer(true);

        let changed = driver(&stacks, &answer, true)
            .update(STACK, &template(), 2)
            .await
            .unwrap();
        assert!(changed);
        let stack = stacks.stack(STACK).unwrap();
        assert_eq!(stack.status.as_str(), "UPDATE_COMPLETE");
        assert_eq!(stack.tags["StackVersion"], "2");
    }

    #[tokio::test(start_paused = true)]
    async fn update_without_preview() {
        let stacks = MemoryStacks::new().with_stack(STACK, "CREATE_COMPLETE", &[]);
        stacks.plan_changes(STACK, vec![]);
        let answer = FixedAnswer(false);

        let changed = driver(&stacks, &answer, false)
            .update(STACK, &template(), 2)
            .await
            .unwrap();
        assert!(!changed);
        assert_eq!(stacks.calls(), vec![format!("update_stack {}", STACK)]);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_missing_stack_succeeds() {
        let stacks = MemoryStacks::new();
        let answer = FixedAnswer(true);
        driver(&stacks, &answer, true).delete(STACK).await.unwrap();

        let stacks = MemoryStacks::new().with_stack(STACK, "UPDATE_COMPLETE", &[]);
        driver(&stacks, &answer, true).delete(STACK).await.unwrap();
        assert!(stacks.stack(STACK).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn versions_default_to_legacy() {
        let stacks = MemoryStacks::new()
            .with_stack("ApiBossletA", "UPDATE_COMPLETE", &[("StackVersion", "3")])
            .with_stack(STACK, "UPDATE_COMPLETE", &[]);
        let answer = FixedAnswer(true);
        let driver = driver(&stacks, &answer, true);

        assert_eq!(driver.existing_version("ApiBossletA").await.unwrap(), Some(3));
        assert_eq!(driver.existing_version(STACK).await.unwrap(), Some(1));
        assert_eq!(driver.existing_version("RedisBossletA").await.unwrap(), None);
    }

    #[test]
    fn failed_events_only() {
        let event = |id: &str, status: &str, time| StackEvent {
            logical_id: id.into(),
            status: status.into(),
            reason: Some(format!("{} reason", id)),
            timestamp: time,
        };
        let causes = failed_events(vec![
            event("C", "UPDATE_FAILED", 3),
            event("B", "UPDATE_COMPLETE", 2),
            event("A", "CREATE_FAILED", 1),
        ]);
        assert_eq!(causes, vec!["A: A reason", "C: C reason"]);
    }
}
