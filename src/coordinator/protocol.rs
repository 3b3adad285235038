//! Wire shapes of the control protocol.

use serde::{Deserialize, Serialize};

use super::job::JobSnapshot;
use crate::action::{Action, ExecutionContext, ExecutionResult};
use crate::engine::PartialOptions;
use crate::error::ReplayError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Request {
    Start {
        actions: Vec<Action>,
        #[serde(default)]
        options: PartialOptions,
        #[serde(default)]
        context: ExecutionContext,
    },
    Stop {
        job_id: String,
    },
    Pause {
        job_id: String,
    },
    Resume {
        job_id: String,
    },
    Status {
        #[serde(default)]
        job_id: Option<String>,
    },
    /// A result for a previously relayed action, delivered out of band.
    Execute {
        job_id: String,
        action_index: usize,
        response: ExecutionResult,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobs: Option<Vec<JobSnapshot>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn started(job_id: String) -> Self {
        Self {
            job_id: Some(job_id),
            ..Self::ok()
        }
    }

    pub fn job(snapshot: JobSnapshot) -> Self {
        Self {
            status: Some(snapshot),
            ..Self::ok()
        }
    }

    pub fn jobs(snapshots: Vec<JobSnapshot>) -> Self {
        Self {
            jobs: Some(snapshots),
            ..Self::ok()
        }
    }

    pub fn accepted(accepted: bool) -> Self {
        Self {
            accepted: Some(accepted),
            ..Self::ok()
        }
    }

    pub fn failure(error: &ReplayError) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            code: Some(error.code().to_string()),
            ..Self::default()
        }
    }
}
