// src/models/plan.rs
//! Planner output consumed by the orchestrator.
//!
//! A `WorkflowPlan` is produced by an external planning step and is treated
//! as read-only input once accepted: the run stores a frozen JSON snapshot
//! of it, so later edits to a live plan object elsewhere can never change
//! what a past run claims it executed.

use serde::{Deserialize, Serialize};

/// One scene of the video brief. Scene ids are stable and become the
/// per-scene job node ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenePlan {
    pub id: String,
    pub description: String,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    /// Per-scene overrides; when absent the plan-level recommended models apply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceoverPlan {
    pub script: String,
    pub voice_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Recommended model per stage, chosen by the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendedModels {
    pub image: String,
    pub video: String,
    pub voiceover: String,
}

/// Final render output settings. Unknown resolution presets fall back to hd
/// in the render client rather than failing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    #[serde(default = "default_resolution")]
    pub resolution: String,
    #[serde(default = "default_transition")]
    pub transition: String,
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_resolution() -> String {
    "hd".to_string()
}

fn default_transition() -> String {
    "fade".to_string()
}

fn default_format() -> String {
    "mp4".to_string()
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self {
            resolution: default_resolution(),
            transition: default_transition(),
            format: default_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowPlan {
    pub scenes: Vec<ScenePlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voiceover: Option<VoiceoverPlan>,
    /// Total cost the planner quoted, in display credits. Must have been
    /// computed with the same pricing functions the pipeline charges with.
    /// Defaults to zero so a plan can be sent to the estimate endpoint
    /// before it has been priced.
    #[serde(default)]
    pub estimated_credits: f64,
    pub models: RecommendedModels,
    #[serde(default)]
    pub output: OutputSpec,
}

impl WorkflowPlan {
    /// Effective image model for a scene (per-scene override wins).
    pub fn image_model_for<'a>(&'a self, scene: &'a ScenePlan) -> &'a str {
        scene.image_model.as_deref().unwrap_or(&self.models.image)
    }

    /// Effective video model for a scene.
    pub fn video_model_for<'a>(&'a self, scene: &'a ScenePlan) -> &'a str {
        scene.video_model.as_deref().unwrap_or(&self.models.video)
    }

    /// Effective voiceover model, if a voiceover is planned.
    pub fn voiceover_model(&self) -> Option<&str> {
        self.voiceover
            .as_ref()
            .map(|v| v.model.as_deref().unwrap_or(&self.models.voiceover))
    }
}
