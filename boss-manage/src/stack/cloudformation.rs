//! `StackService` backed by the CloudFormation API.

use super::{
    ApiSnafu, ChangeSet, MissingSnafu, NoUpdatesSnafu, ResourceChange, ServiceError,
    ServiceResult, StackDescription, StackEvent, StackRequest, StackService, StackStatus,
};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_cloudformation::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_cloudformation::types::{
    Capability, ChangeSetType, Parameter, StackStatus as SdkStackStatus, Tag,
};
use aws_sdk_cloudformation::Client as CloudFormationClient;
use log::{debug, trace};
use snafu::{IntoError, ResultExt};
use std::collections::HashMap;

/// Stacks in this state are gone and never reported as existing
const DELETED: &str = "DELETE_COMPLETE";

pub(crate) struct CloudFormation {
    client: CloudFormationClient,
    region: String,
}

impl CloudFormation {
    pub(crate) fn new(config: &SdkConfig) -> Self {
        let region = config
            .region()
            .map(|region| region.to_string())
            .unwrap_or_default();
        Self {
            client: CloudFormationClient::new(config),
            region,
        }
    }

    fn parameters(request: &StackRequest) -> Vec<Parameter> {
        request
            .parameters
            .iter()
            .map(|(key, value)| {
                Parameter::builder()
                    .parameter_key(key)
                    .parameter_value(value)
                    .build()
            })
            .collect()
    }

    fn tags(request: &StackRequest) -> Vec<Tag> {
        request
            .tags
            .iter()
            .map(|(key, value)| Tag::builder().key(key).value(value).build())
            .collect()
    }

    fn capabilities(request: &StackRequest) -> Vec<Capability> {
        request
            .capabilities
            .iter()
            .map(|capability| Capability::from(capability.as_str()))
            .collect()
    }
}

/// The stack engine reports most client errors as `ValidationError` and only distinguishes them
/// by message.
fn message_contains<E: ProvideErrorMetadata>(err: &SdkError<E>, needle: &str) -> bool {
    err.message()
        .map_or(false, |message| message.contains(needle))
}

fn is_missing<E: ProvideErrorMetadata>(err: &SdkError<E>) -> bool {
    message_contains(err, "does not exist")
}

fn api_error(err: error::Error) -> ServiceError {
    ApiSnafu.into_error(Box::new(err))
}

#[async_trait]
impl StackService for CloudFormation {
    async fn describe_stack(&self, name: &str) -> ServiceResult<Option<StackDescription>> {
        let response = match self.client.describe_stacks().stack_name(name).send().await {
            Ok(response) => response,
            Err(e) if is_missing(&e) => {
                trace!("Stack {} does not exist", name);
                return Ok(None);
            }
            Err(e) => {
                return Err(api_error(
                    error::DescribeStacksSnafu {
                        stack: name,
                        region: &self.region,
                    }
                    .into_error(e),
                ))
            }
        };

        let stack = match response.stacks().and_then(|stacks| stacks.first()) {
            Some(stack) => stack,
            None => return Ok(None),
        };
        let status = stack
            .stack_status()
            .map(SdkStackStatus::as_str)
            .unwrap_or_default();
        if status == DELETED {
            return Ok(None);
        }

        let tags = stack
            .tags()
            .unwrap_or_default()
            .iter()
            .filter_map(|tag| Some((tag.key()?.to_string(), tag.value()?.to_string())))
            .collect();
        let outputs = stack
            .outputs()
            .unwrap_or_default()
            .iter()
            .filter_map(|output| {
                Some((
                    output.output_key()?.to_string(),
                    output.output_value()?.to_string(),
                ))
            })
            .collect();

        Ok(Some(StackDescription {
            name: stack.stack_name().unwrap_or(name).to_string(),
            status: StackStatus::new(status),
            tags,
            outputs,
        }))
    }

    async fn list_stacks(&self) -> ServiceResult<HashMap<String, StackStatus>> {
        let mut stacks = HashMap::new();
        let mut next_token = None;
        loop {
            let response = self
                .client
                .list_stacks()
                .set_next_token(next_token)
                .send()
                .await
                .context(error::ListStacksSnafu {
                    region: &self.region,
                })
                .map_err(api_error)?;

            for summary in response.stack_summaries().unwrap_or_default() {
                let status = summary
                    .stack_status()
                    .map(SdkStackStatus::as_str)
                    .unwrap_or_default();
                if status == DELETED {
                    continue;
                }
                if let Some(name) = summary.stack_name() {
                    stacks.insert(name.to_string(), StackStatus::new(status));
                }
            }

            next_token = response.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }
        debug!("Found {} stacks in {}", stacks.len(), self.region);
        Ok(stacks)
    }

    async fn create_stack(&self, request: &StackRequest) -> ServiceResult<()> {
        self.client
            .create_stack()
            .stack_name(&request.name)
            .template_body(&request.template_body)
            .set_parameters(Some(Self::parameters(request)))
            .set_tags(Some(Self::tags(request)))
            .set_capabilities(Some(Self::capabilities(request)))
            .send()
            .await
            .context(error::CreateStackSnafu {
                stack: &request.name,
                region: &self.region,
            })
            .map_err(api_error)?;
        Ok(())
    }

    async fn update_stack(&self, request: &StackRequest) -> ServiceResult<()> {
        let result = self
            .client
            .update_stack()
            .stack_name(&request.name)
            .template_body(&request.template_body)
            .set_parameters(Some(Self::parameters(request)))
            .set_tags(Some(Self::tags(request)))
            .set_capabilities(Some(Self::capabilities(request)))
            .send()
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if message_contains(&e, "No updates are to be performed") => {
                NoUpdatesSnafu {
                    stack: &request.name,
                }
                .fail()
            }
            Err(e) if is_missing(&e) => MissingSnafu {
                stack: &request.name,
            }
            .fail(),
            Err(e) => Err(api_error(
                error::UpdateStackSnafu {
                    stack: &request.name,
                    region: &self.region,
                }
                .into_error(e),
            )),
        }
    }

    async fn delete_stack(&self, name: &str) -> ServiceResult<()> {
        match self.client.delete_stack().stack_name(name).send().await {
            Ok(_) => Ok(()),
            Err(e) if is_missing(&e) => MissingSnafu { stack: name }.fail(),
            Err(e) => Err(api_error(
                error::DeleteStackSnafu {
                    stack: name,
                    region: &self.region,
                }
                .into_error(e),
            )),
        }
    }

    async fn stack_events(&self, name: &str) -> ServiceResult<Vec<StackEvent>> {
        let mut events = Vec::new();
        let mut next_token = None;
        loop {
            let response = match self
                .client
                .describe_stack_events()
                .stack_name(name)
                .set_next_token(next_token)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) if is_missing(&e) => return MissingSnafu { stack: name }.fail(),
                Err(e) => {
                    return Err(api_error(
                        error::DescribeStackEventsSnafu {
                            stack: name,
                            region: &self.region,
                        }
                        .into_error(e),
                    ))
                }
            };

            for event in response.stack_events().unwrap_or_default() {
                events.push(StackEvent {
                    logical_id: event.logical_resource_id().unwrap_or_default().to_string(),
                    status: event
                        .resource_status()
                        .map(|status| status.as_str().to_string())
                        .unwrap_or_default(),
                    reason: event.resource_status_reason().map(str::to_string),
                    timestamp: event.timestamp().map_or(0, |time| time.secs()),
                });
            }

            next_token = response.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }
        Ok(events)
    }

    async fn create_change_set(
        &self,
        request: &StackRequest,
        change_set: &str,
    ) -> ServiceResult<()> {
        self.client
            .create_change_set()
            .stack_name(&request.name)
            .change_set_name(change_set)
            .change_set_type(ChangeSetType::Update)
            .template_body(&request.template_body)
            .set_parameters(Some(Self::parameters(request)))
            .set_tags(Some(Self::tags(request)))
            .set_capabilities(Some(Self::capabilities(request)))
            .send()
            .await
            .context(error::CreateChangeSetSnafu {
                stack: &request.name,
                change_set,
            })
            .map_err(api_error)?;
        Ok(())
    }

    async fn describe_change_set(&self, stack: &str, change_set: &str) -> ServiceResult<ChangeSet> {
        let mut status = String::new();
        let mut reason = None;
        let mut changes = Vec::new();
        let mut next_token = None;
        loop {
            let response = self
                .client
                .describe_change_set()
                .stack_name(stack)
                .change_set_name(change_set)
                .set_next_token(next_token)
                .send()
                .await
                .context(error::DescribeChangeSetSnafu { stack, change_set })
                .map_err(api_error)?;

            status = response
                .status()
                .map(|status| status.as_str().to_string())
                .unwrap_or_default();
            reason = response.status_reason().map(str::to_string);
            for change in response.changes().unwrap_or_default() {
                if let Some(resource) = change.resource_change() {
                    changes.push(ResourceChange {
                        action: resource
                            .action()
                            .map(|action| action.as_str().to_string())
                            .unwrap_or_default(),
                        logical_id: resource.logical_resource_id().unwrap_or_default().to_string(),
                        physical_id: resource
                            .physical_resource_id()
                            .unwrap_or_default()
                            .to_string(),
                        resource_type: resource.resource_type().unwrap_or_default().to_string(),
                        replacement: resource
                            .replacement()
                            .map(|replacement| replacement.as_str().to_string())
                            .unwrap_or_default(),
                        scope: resource
                            .scope()
                            .unwrap_or_default()
                            .iter()
                            .map(|scope| scope.as_str())
                            .collect::<Vec<_>>()
                            .join(", "),
                    });
                }
            }

            next_token = response.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }
        Ok(ChangeSet {
            status,
            reason,
            changes,
        })
    }

    async fn execute_change_set(&self, stack: &str, change_set: &str) -> ServiceResult<()> {
        self.client
            .execute_change_set()
            .stack_name(stack)
            .change_set_name(change_set)
            .send()
            .await
            .context(error::ExecuteChangeSetSnafu { stack, change_set })
            .map_err(api_error)?;
        Ok(())
    }

    async fn delete_change_set(&self, stack: &str, change_set: &str) -> ServiceResult<()> {
        self.client
            .delete_change_set()
            .stack_name(stack)
            .change_set_name(change_set)
            .send()
            .await
            .context(error::DeleteChangeSetSnafu { stack, change_set })
            .map_err(api_error)?;
        Ok(())
    }
}

mod error {
    use aws_sdk_cloudformation::error::SdkError;
    use aws_sdk_cloudformation::operation::{
        create_change_set::CreateChangeSetError, create_stack::CreateStackError,
        delete_change_set::DeleteChangeSetError, delete_stack::DeleteStackError,
        describe_change_set::DescribeChangeSetError,
        describe_stack_events::DescribeStackEventsError, describe_stacks::DescribeStacksError,
        execute_change_set::ExecuteChangeSetError, list_stacks::ListStacksError,
        update_stack::UpdateStackError,
    };
    use aws_smithy_types::error::display::DisplayErrorContext;
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    #[allow(clippy::large_enum_variant)]
    pub(crate) enum Error {
        #[snafu(display(
            "Failed to create change set '{}' for stack '{}': {}",
            change_set,
            stack,
            DisplayErrorContext(source)
        ))]
        CreateChangeSet {
            stack: String,
            change_set: String,
            source: SdkError<CreateChangeSetError>,
        },

        #[snafu(display(
            "Failed to create stack '{}' in {}: {}",
            stack,
            region,
            DisplayErrorContext(source)
        ))]
        CreateStack {
            stack: String,
            region: String,
            source: SdkError<CreateStackError>,
        },

        #[snafu(display(
            "Failed to delete change set '{}' of stack '{}': {}",
            change_set,
            stack,
            DisplayErrorContext(source)
        ))]
        DeleteChangeSet {
            stack: String,
            change_set: String,
            source: SdkError<DeleteChangeSetError>,
        },

        #[snafu(display(
            "Failed to delete stack '{}' in {}: {}",
            stack,
            region,
            DisplayErrorContext(source)
        ))]
        DeleteStack {
            stack: String,
            region: String,
            source: SdkError<DeleteStackError>,
        },

        #[snafu(display(
            "Failed to describe change set '{}' of stack '{}': {}",
            change_set,
            stack,
            DisplayErrorContext(source)
        ))]
        DescribeChangeSet {
            stack: String,
            change_set: String,
            source: SdkError<DescribeChangeSetError>,
        },

        #[snafu(display(
            "Failed to fetch events of stack '{}' in {}: {}",
            stack,
            region,
            DisplayErrorContext(source)
        ))]
        DescribeStackEvents {
            stack: String,
            region: String,
            source: SdkError<DescribeStackEventsError>,
        },

        #[snafu(display(
            "Failed to describe stack '{}' in {}: {}",
            stack,
            region,
            DisplayErrorContext(source)
        ))]
        DescribeStacks {
            stack: String,
            region: String,
            source: SdkError<DescribeStacksError>,
        },

        #[snafu(display(
            "Failed to execute change set '{}' of stack '{}': {}",
            change_set,
            stack,
            DisplayErrorContext(source)
        ))]
        ExecuteChangeSet {
            stack: String,
            change_set: String,
            source: SdkError<ExecuteChangeSetError>,
        },

        #[snafu(display("Failed to list stacks in {}: {}", region, DisplayErrorContext(source)))]
        ListStacks {
            region: String,
            source: SdkError<ListStacksError>,
        },

        #[snafu(display(
            "Failed to update stack '{}' in {}: {}",
            stack,
            region,
            DisplayErrorContext(source)
        ))]
        UpdateStack {
            stack: String,
            region: String,
            source: SdkError<UpdateStackError>,
        },
    }
}
