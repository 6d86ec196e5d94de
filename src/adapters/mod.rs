// src/adapters/mod.rs
//! Generation capability interfaces.
//!
//! The orchestrator consumes these traits opaquely: any adapter error is a
//! stage failure, and the pipeline neither retries nor inspects it. The
//! concrete clients live next to the traits (`fal_client`,
//! `elevenlabs_client`).

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub mod elevenlabs_client;
pub mod fal_client;

pub use elevenlabs_client::ElevenLabsClient;
pub use fal_client::FalClient;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("malformed provider response: {0}")]
    BadResponse(String),
    #[error("unsupported model: {0}")]
    UnsupportedModel(String),
}

pub type AdapterResult<T> = Result<T, AdapterError>;

// ============================================================================
// REQUESTS
// ============================================================================

#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub style: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VideoRequest {
    pub model: String,
    pub image_url: String,
    pub prompt: String,
    pub duration_seconds: f64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct VoiceoverRequest {
    pub model: String,
    pub text: String,
    pub voice_id: String,
    pub language: Option<String>,
}

// ============================================================================
// RESULTS
// ============================================================================

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub meta: Value,
}

#[derive(Debug, Clone)]
pub struct GeneratedVideo {
    pub url: String,
    pub duration_seconds: f64,
    pub width: u32,
    pub height: u32,
    pub meta: Value,
}

#[derive(Debug, Clone)]
pub struct GeneratedAudio {
    pub url: String,
    pub duration_seconds: Option<f64>,
    pub meta: Value,
}

// ============================================================================
// CAPABILITIES
// ============================================================================

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    fn name(&self) -> &str;
    async fn generate_image(&self, request: &ImageRequest) -> AdapterResult<GeneratedImage>;
}

#[async_trait]
pub trait VideoGenerator: Send + Sync {
    fn name(&self) -> &str;
    async fn generate_video(&self, request: &VideoRequest) -> AdapterResult<GeneratedVideo>;
}

#[async_trait]
pub trait VoiceoverGenerator: Send + Sync {
    fn name(&self) -> &str;
    async fn generate_voiceover(&self, request: &VoiceoverRequest) -> AdapterResult<GeneratedAudio>;
}
