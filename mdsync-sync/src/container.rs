//! Single-file compile through a short-lived metadata container.
//!
//! ```text
//! NoContainer → ContainerCreated → MembersCreated → AsyncRequestSubmitted
//!             → Polling → Completed | Failed → ContainerDeleted
//! ```
//!
//! Once a container exists it is deleted on every exit path, success or
//! failure. A failed delete is logged and never replaces the compile
//! outcome. Member creation fans out concurrently; any member failure
//! fails the whole compile before a request is submitted.

use std::time::Duration;

use futures::future::join_all;
use tokio::time::{sleep, Instant};

use mdsync_core::{Component, LocalStore, SyncConfig, TypeName};

use crate::client::{AsyncRequestStatus, AsyncState, MemberRequest, MetadataClient, ToolingMemberResult};
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    NoContainer,
    ContainerCreated,
    MembersCreated,
    AsyncRequestSubmitted,
    Polling,
    Completed,
    Failed,
    ContainerDeleted,
}

/// One file to compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInput {
    pub file_name: String,
    pub full_name: String,
    pub type_name: TypeName,
    pub content_entity_id: String,
    pub body: String,
}

impl MemberInput {
    /// Build from a resolved component; the store must know its remote id.
    pub fn from_component(component: &Component, store: &LocalStore) -> Result<Self, SyncError> {
        let type_name = component
            .type_name()
            .cloned()
            .ok_or_else(|| SyncError::UnresolvedType {
                path: component.path().to_path_buf(),
            })?;
        let content_entity_id = component
            .local_properties(store)
            .and_then(|e| e.remote_id.clone())
            .ok_or_else(|| SyncError::MissingIndex {
                path: component.path().to_path_buf(),
            })?;
        Ok(Self {
            file_name: component.file_name().to_string(),
            full_name: component.full_name(),
            type_name,
            content_entity_id,
            body: component.body()?,
        })
    }
}

/// Final status of a compile, one result per member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerOutcome {
    pub state: AsyncState,
    pub error_msg: Option<String>,
    pub members: Vec<ToolingMemberResult>,
}

impl ContainerOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == AsyncState::Completed
    }
}

pub struct ContainerCompile<'a, C: ?Sized> {
    client: &'a C,
    poll_interval: Duration,
    timeout: Duration,
    check_only: bool,
    state: ContainerState,
    trace: Vec<ContainerState>,
}

impl<'a, C> ContainerCompile<'a, C>
where
    C: MetadataClient + ?Sized,
{
    pub fn new(client: &'a C, config: &SyncConfig) -> Self {
        Self {
            client,
            poll_interval: config.container_poll_interval,
            timeout: config.timeout,
            check_only: false,
            state: ContainerState::NoContainer,
            trace: vec![ContainerState::NoContainer],
        }
    }

    /// Compile without saving the result on the server.
    pub fn check_only(mut self, check_only: bool) -> Self {
        self.check_only = check_only;
        self
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// Every state entered so far, in order.
    pub fn trace(&self) -> &[ContainerState] {
        &self.trace
    }

    fn transition(&mut self, next: ContainerState) {
        tracing::debug!("container: {:?} -> {next:?}", self.state);
        self.state = next;
        self.trace.push(next);
    }

    /// Run the protocol to completion.
    pub async fn run(&mut self, members: &[MemberInput]) -> Result<ContainerOutcome, SyncError> {
        let container_id = match self.client.create_container(&container_name()).await {
            Ok(id) => id,
            Err(err) => {
                self.transition(ContainerState::Failed);
                return Err(err.into());
            }
        };
        self.transition(ContainerState::ContainerCreated);

        let result = self.compile(&container_id, members).await;
        if result.is_err() {
            self.transition(ContainerState::Failed);
        }

        match self.client.delete_container(&container_id).await {
            Ok(()) => self.transition(ContainerState::ContainerDeleted),
            Err(err) => tracing::warn!("failed to delete container {container_id}: {err}"),
        }

        let status = result?;
        Ok(ContainerOutcome {
            state: status.state,
            members: member_results(members, &status),
            error_msg: status.error_msg,
        })
    }

    async fn compile(
        &mut self,
        container_id: &str,
        members: &[MemberInput],
    ) -> Result<AsyncRequestStatus, SyncError> {
        let requests: Vec<MemberRequest> = members
            .iter()
            .map(|m| MemberRequest {
                member_type: MemberRequest::member_type_for(&m.type_name),
                container_id: container_id.to_string(),
                content_entity_id: m.content_entity_id.clone(),
                body: m.body.clone(),
            })
            .collect();
        let client = self.client;
        let created = join_all(requests.iter().map(|r| client.create_member(r))).await;
        let failed: Vec<String> = members
            .iter()
            .zip(&created)
            .filter_map(|(m, result)| match result {
                Ok(_) => None,
                Err(err) => {
                    tracing::warn!("member {} not created: {err}", m.file_name);
                    Some(m.file_name.clone())
                }
            })
            .collect();
        if !failed.is_empty() {
            return Err(SyncError::PartialMemberFailure { failed });
        }
        self.transition(ContainerState::MembersCreated);

        let request_id = self
            .client
            .create_async_request(container_id, self.check_only)
            .await?;
        self.transition(ContainerState::AsyncRequestSubmitted);

        let status = self.poll(&request_id).await?;
        let next = if status.state == AsyncState::Completed {
            ContainerState::Completed
        } else {
            ContainerState::Failed
        };
        self.transition(next);
        tracing::info!("container request {request_id} finished: {}", status.state);
        Ok(status)
    }

    async fn poll(&mut self, request_id: &str) -> Result<AsyncRequestStatus, SyncError> {
        self.transition(ContainerState::Polling);
        let started = Instant::now();
        loop {
            sleep(self.poll_interval).await;
            let elapsed = started.elapsed();
            if elapsed >= self.timeout {
                return Err(SyncError::ProtocolTimeout {
                    operation: "container compile",
                    elapsed,
                });
            }
            let status = self.client.get_async_request_status(request_id).await?;
            if status.state.is_terminal() {
                return Ok(status);
            }
            tracing::debug!("container request {request_id} queued after {elapsed:?}");
        }
    }
}

fn container_name() -> String {
    format!("mdsync-{}", chrono::Utc::now().timestamp_millis())
}

/// Each member carries the request state, plus its own failure line if any.
fn member_results(members: &[MemberInput], status: &AsyncRequestStatus) -> Vec<ToolingMemberResult> {
    members
        .iter()
        .map(|m| {
            let failure = status.deploy_details.component_failures.iter().find(|f| {
                f.full_name == m.full_name || f.file_name.ends_with(m.file_name.as_str())
            });
            let problem = match failure.and_then(|f| f.problem.clone()) {
                Some(problem) => Some(problem),
                None if status.state != AsyncState::Completed => status.error_msg.clone(),
                None => None,
            };
            ToolingMemberResult {
                state: status.state,
                file_name: m.file_name.clone(),
                full_name: m.full_name.clone(),
                type_name: m.type_name.clone(),
                problem,
                line_number: failure.and_then(|f| f.line_number),
                column_number: failure.and_then(|f| f.column_number),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{DeployDetails, DeployMessage};

    fn member(name: &str) -> MemberInput {
        MemberInput {
            file_name: format!("{name}.cls"),
            full_name: name.to_string(),
            type_name: TypeName::from("ApexClass"),
            content_entity_id: format!("01p{name}"),
            body: format!("public class {name} {{}}"),
        }
    }

    #[test]
    fn failure_lines_attach_to_their_member() {
        let status = AsyncRequestStatus {
            id: "1dr1".into(),
            state: AsyncState::Failed,
            error_msg: Some("compile failed".into()),
            deploy_details: DeployDetails {
                component_successes: Vec::new(),
                component_failures: vec![DeployMessage {
                    full_name: "Bar".into(),
                    file_name: "classes/Bar.cls".into(),
                    problem: Some("unexpected token".into()),
                    line_number: Some(3),
                    ..DeployMessage::default()
                }],
            },
        };
        let results = member_results(&[member("Foo"), member("Bar")], &status);
        assert!(results.iter().all(|r| r.state == AsyncState::Failed));
        assert_eq!(results[1].problem.as_deref(), Some("unexpected token"));
        assert_eq!(results[1].line_number, Some(3));
        assert_eq!(results[0].problem.as_deref(), Some("compile failed"));
    }

    #[test]
    fn completed_members_carry_no_problem() {
        let status = AsyncRequestStatus {
            id: "1dr1".into(),
            state: AsyncState::Completed,
            error_msg: None,
            deploy_details: DeployDetails::default(),
        };
        let results = member_results(&[member("Foo")], &status);
        assert_eq!(results[0].state, AsyncState::Completed);
        assert!(results[0].problem.is_none());
    }
}
