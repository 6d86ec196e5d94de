// src/models/job.rs
//! One job per unit of work: one image generation, one video generation,
//! one voiceover generation, one merge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Image,
    Video,
    Voiceover,
    Merge,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Image => "image",
            NodeType::Video => "video",
            NodeType::Voiceover => "voiceover",
            NodeType::Merge => "merge",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Reserved for adapter-level result caching; no current code path
    /// sets it.
    Cached,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cached
        )
    }
}

/// A trackable unit of work within a run. A job becomes terminal exactly
/// once; `credits_used` is set only on the completed transition and must
/// equal the amount posted to the ledger for this job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub run_id: Uuid,
    pub user_id: String,
    /// Stage-scoped node id: a scene id, "voiceover" or "merge".
    pub node_id: String,
    pub node_type: NodeType,
    pub adapter: String,
    /// Serialized adapter input with nulls stripped.
    pub input_params: serde_json::Value,
    pub status: JobStatus,
    /// Micro-units charged for this job; zero until completed.
    pub credits_used: i64,
    pub cache_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_meta: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        run_id: Uuid,
        user_id: &str,
        node_id: &str,
        node_type: NodeType,
        adapter: &str,
        input_params: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            user_id: user_id.to_string(),
            node_id: node_id.to_string(),
            node_type,
            adapter: adapter.to_string(),
            input_params,
            status: JobStatus::Pending,
            credits_used: 0,
            cache_hit: false,
            provider_meta: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}
