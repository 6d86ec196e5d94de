// src/models/run.rs
//! One run per orchestration invocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::plan::WorkflowPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    /// Completed and failed are sink states: once reached, no further
    /// transition is allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

/// One end-to-end orchestration attempt for a plan. Owned exclusively by
/// the orchestrator; no other component mutates run state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub user_id: String,
    /// Frozen copy of the accepted plan, stored by value for auditability.
    pub plan_snapshot: serde_json::Value,
    pub status: RunStatus,
    /// Cumulative micro-units deducted across this run's completed jobs.
    pub credits_used: i64,
    /// Present in the schema but never written by current logic: partial
    /// failure does not refund upstream spend.
    pub credits_refunded: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(user_id: &str, plan: &WorkflowPlan) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            plan_snapshot: serde_json::to_value(plan)?,
            status: RunStatus::Pending,
            credits_used: 0,
            credits_refunded: 0,
            final_video_url: None,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        })
    }
}
