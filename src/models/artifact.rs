// src/models/artifact.rs
//! A produced media file resulting from a completed job. Never created for
//! a failed job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    Image,
    Video,
    Audio,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::Image => "image",
            ArtifactType::Video => "video",
            ArtifactType::Audio => "audio",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub user_id: String,
    pub run_id: Uuid,
    pub job_id: Uuid,
    pub artifact_type: ArtifactType,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_meta: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fields of an artifact known at job completion time; the tracker fills in
/// ownership and ids from the job.
#[derive(Debug, Clone)]
pub struct ArtifactDraft {
    pub artifact_type: ArtifactType,
    pub url: String,
    pub size_bytes: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ArtifactDraft {
    pub fn new(artifact_type: ArtifactType, url: impl Into<String>) -> Self {
        Self {
            artifact_type,
            url: url.into(),
            size_bytes: None,
            duration_seconds: None,
            width: None,
            height: None,
            expires_at: None,
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }
}
