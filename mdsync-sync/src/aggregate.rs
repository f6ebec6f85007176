//! Flatten per-bucket protocol results into one deploy-shaped envelope.
//!
//! Deploy results merge additively (counts add, lists concatenate, success
//! is the conjunction). Tooling member results count one component each and
//! land in the success or failure list by state. Any conflict marks the
//! whole result as a conflict.

use serde::Serialize;

use crate::client::{AsyncState, DeployDetails, DeployMessage, DeployResult, ToolingMemberResult};
use crate::conflict::ConflictSet;
use crate::container::ContainerOutcome;

/// Output of one protocol run.
#[derive(Debug, Clone)]
pub enum ProtocolResult {
    Tooling(ContainerOutcome),
    Deploy(DeployResult),
    Conflict(ConflictSet),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Succeeded,
    Failed,
    Conflict,
}

/// The single result returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedResult {
    status: ResultStatus,
    success: bool,
    number_components_deployed: u32,
    number_component_errors: u32,
    details: DeployDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    conflicts: Option<ConflictSet>,
}

impl UnifiedResult {
    pub fn status(&self) -> ResultStatus {
        self.status
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn number_components_deployed(&self) -> u32 {
        self.number_components_deployed
    }

    pub fn number_component_errors(&self) -> u32 {
        self.number_component_errors
    }

    pub fn component_successes(&self) -> &[DeployMessage] {
        &self.details.component_successes
    }

    pub fn component_failures(&self) -> &[DeployMessage] {
        &self.details.component_failures
    }

    pub fn conflicts(&self) -> Option<&ConflictSet> {
        self.conflicts.as_ref()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl From<&ToolingMemberResult> for DeployMessage {
    fn from(result: &ToolingMemberResult) -> Self {
        let success = result.state == AsyncState::Completed;
        DeployMessage {
            full_name: result.full_name.clone(),
            file_name: result.file_name.clone(),
            component_type: Some(result.type_name.clone()),
            success,
            changed: success,
            problem: result.problem.clone(),
            problem_type: (!success).then(|| "Error".to_string()),
            line_number: result.line_number,
            column_number: result.column_number,
            ..DeployMessage::default()
        }
    }
}

/// Fold `results` into one envelope. An empty input is a success with
/// nothing deployed.
///
/// A later deploy result does not replace the envelope built so far: its
/// counts are added and its component lists appended, so a multi-bucket
/// compile reports every bucket.
pub fn flatten(results: Vec<ProtocolResult>) -> UnifiedResult {
    let mut out = UnifiedResult {
        status: ResultStatus::Succeeded,
        success: true,
        number_components_deployed: 0,
        number_component_errors: 0,
        details: DeployDetails::default(),
        conflicts: None,
    };
    for result in results {
        match result {
            ProtocolResult::Tooling(outcome) => {
                for member in &outcome.members {
                    let message = DeployMessage::from(member);
                    if message.success {
                        out.number_components_deployed += 1;
                        out.details.component_successes.push(message);
                    } else {
                        out.number_component_errors += 1;
                        out.details.component_failures.push(message);
                    }
                }
                out.success &= outcome.succeeded();
            }
            ProtocolResult::Deploy(deploy) => {
                out.number_components_deployed += deploy.number_components_deployed;
                out.number_component_errors += deploy.number_component_errors;
                out.details
                    .component_successes
                    .extend(deploy.details.component_successes);
                out.details
                    .component_failures
                    .extend(deploy.details.component_failures);
                out.success &= deploy.success;
            }
            ProtocolResult::Conflict(set) => {
                out.conflicts.get_or_insert_with(ConflictSet::new).extend(set);
                out.success = false;
            }
        }
    }
    out.status = if out.conflicts.is_some() {
        ResultStatus::Conflict
    } else if out.success {
        ResultStatus::Succeeded
    } else {
        ResultStatus::Failed
    };
    out
}
