// Shotstack render API client
// Turns ordered video clips (+ optional voiceover track) into one final
// video. The vendor renders asynchronously: one POST to submit an edit,
// then GET polls until a terminal state or the attempt ceiling.

use async_trait::async_trait;
use lazy_static::lazy_static;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::WorkflowError;
use crate::models::OutputSpec;

/// Background music/voiceover sits under the scene audio.
const AUDIO_TRACK_VOLUME: f64 = 0.3;

lazy_static! {
    /// Output dimensions by resolution preset. Unknown presets fall back
    /// to hd rather than failing.
    static ref RESOLUTION_PRESETS: HashMap<&'static str, (u32, u32)> = {
        let mut m = HashMap::new();
        m.insert("preview", (512, 288));
        m.insert("mobile", (640, 360));
        m.insert("sd", (1024, 576));
        m.insert("hd", (1280, 720));
        m.insert("1080", (1920, 1080));
        m
    };
}

pub fn resolution_size(preset: &str) -> (u32, u32) {
    RESOLUTION_PRESETS
        .get(preset)
        .copied()
        .unwrap_or_else(|| RESOLUTION_PRESETS["hd"])
}

// ============================================================================
// EDIT / TIMELINE STRUCTURES
// ============================================================================

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Edit {
    pub timeline: Timeline,
    pub output: Output,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Timeline {
    pub background: String,
    pub tracks: Vec<Track>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Track {
    pub clips: Vec<Clip>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Clip {
    pub asset: Asset,
    pub start: f64,
    pub length: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<Transition>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Asset {
    Video {
        src: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        volume: Option<f64>,
    },
    Audio {
        src: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        volume: Option<f64>,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Transition {
    #[serde(rename = "in", skip_serializing_if = "Option::is_none")]
    pub transition_in: Option<String>,
    #[serde(rename = "out", skip_serializing_if = "Option::is_none")]
    pub transition_out: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Output {
    pub format: String,
    pub size: Size,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

/// One source clip for the merge, in final plan order.
#[derive(Debug, Clone)]
pub struct ClipSource {
    pub url: String,
    pub duration_seconds: f64,
}

/// Lay clips sequentially on one video track: clip i starts at the summed
/// duration of clips 0..i. The first clip always fades in and the last
/// always fades out, whatever transition was requested; the requested
/// transition applies to interior boundaries only. The audio track (if
/// present) starts at 0, spans the whole composition and is reduced in
/// volume.
pub fn build_timeline(
    clips: &[ClipSource],
    audio_url: Option<&str>,
    transition: &str,
    output: &OutputSpec,
) -> Edit {
    let mut video_clips = Vec::with_capacity(clips.len());
    let mut cursor = 0.0;
    let last = clips.len().saturating_sub(1);

    for (index, clip) in clips.iter().enumerate() {
        let transition_in = if index == 0 { "fade" } else { transition };
        let transition_out = if index == last { "fade" } else { transition };
        video_clips.push(Clip {
            asset: Asset::Video {
                src: clip.url.clone(),
                volume: None,
            },
            start: cursor,
            length: clip.duration_seconds,
            transition: Some(Transition {
                transition_in: Some(transition_in.to_string()),
                transition_out: Some(transition_out.to_string()),
            }),
        });
        cursor += clip.duration_seconds;
    }

    let mut tracks = vec![Track { clips: video_clips }];

    if let Some(src) = audio_url {
        tracks.push(Track {
            clips: vec![Clip {
                asset: Asset::Audio {
                    src: src.to_string(),
                    volume: Some(AUDIO_TRACK_VOLUME),
                },
                start: 0.0,
                length: cursor,
                transition: None,
            }],
        });
    }

    let (width, height) = resolution_size(&output.resolution);
    Edit {
        timeline: Timeline {
            background: "#000000".to_string(),
            tracks,
        },
        output: Output {
            format: output.format.clone(),
            size: Size { width, height },
        },
    }
}

// ============================================================================
// RENDER SERVICE
// ============================================================================

/// Vendor render states. Anything the vendor reports outside the terminal
/// pair is treated as still in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Queued,
    Fetching,
    Rendering,
    Saving,
    Done,
    Failed,
    InProgress,
}

impl RenderState {
    pub fn parse(value: &str) -> Self {
        match value {
            "queued" => RenderState::Queued,
            "fetching" => RenderState::Fetching,
            "rendering" => RenderState::Rendering,
            "saving" => RenderState::Saving,
            "done" => RenderState::Done,
            "failed" => RenderState::Failed,
            _ => RenderState::InProgress,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RenderState::Done | RenderState::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct RenderPoll {
    pub state: RenderState,
    pub url: Option<String>,
    pub error: Option<String>,
}

#[async_trait]
pub trait RenderService: Send + Sync {
    async fn submit(&self, edit: &Edit) -> Result<String, WorkflowError>;
    async fn poll(&self, render_id: &str) -> Result<RenderPoll, WorkflowError>;
}

/// Poll pacing. The defaults are the production contract (5s x 60 = 5
/// minute hard timeout); tests inject a zero interval to drive the full
/// attempt ceiling without wall-clock delay.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 60,
        }
    }
}

/// Drive a submitted render to a terminal state. `done` must carry a url;
/// `failed` surfaces the vendor message; exhausting the ceiling is a
/// timeout. No cancellation is sent to the vendor on timeout — the caller
/// just stops waiting.
pub async fn wait_for_render(
    service: &dyn RenderService,
    render_id: &str,
    config: &PollConfig,
) -> Result<String, WorkflowError> {
    for attempt in 1..=config.max_attempts {
        let poll = service.poll(render_id).await?;
        match poll.state {
            RenderState::Done => {
                return poll.url.ok_or(WorkflowError::MissingRenderUrl);
            }
            RenderState::Failed => {
                return Err(WorkflowError::RenderVendorFailure(
                    poll.error.unwrap_or_else(|| "no error reported".to_string()),
                ));
            }
            state => {
                tracing::debug!(
                    "⏳ Render {} still {:?} (attempt {}/{})",
                    render_id,
                    state,
                    attempt,
                    config.max_attempts
                );
                if attempt < config.max_attempts {
                    tokio::time::sleep(config.interval).await;
                }
            }
        }
    }
    Err(WorkflowError::RenderTimeout {
        attempts: config.max_attempts,
    })
}

// ============================================================================
// HTTP CLIENT
// ============================================================================

#[derive(Deserialize, Debug)]
struct SubmitResponse {
    response: SubmitDetail,
}

#[derive(Deserialize, Debug)]
struct SubmitDetail {
    id: String,
}

#[derive(Deserialize, Debug)]
struct StatusResponse {
    response: StatusDetail,
}

#[derive(Deserialize, Debug)]
struct StatusDetail {
    status: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Clone)]
pub struct ShotstackClient {
    api_key: String,
    client: Client,
    base_url: String,
}

impl ShotstackClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: Client::new(),
            base_url: "https://api.shotstack.io/v1".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[async_trait]
impl RenderService for ShotstackClient {
    async fn submit(&self, edit: &Edit) -> Result<String, WorkflowError> {
        let url = format!("{}/render", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(edit)
            .send()
            .await
            .map_err(|e| WorkflowError::RenderSubmission(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(WorkflowError::RenderSubmission(format!(
                "{}: {}",
                status, body
            )));
        }

        let data: SubmitResponse = response
            .json()
            .await
            .map_err(|e| WorkflowError::RenderSubmission(e.to_string()))?;
        Ok(data.response.id)
    }

    async fn poll(&self, render_id: &str) -> Result<RenderPoll, WorkflowError> {
        let url = format!("{}/render/{}", self.base_url, render_id);
        let response = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| WorkflowError::RenderVendorFailure(e.to_string()))?;

        if !response.status().is_success() {
            return Err(WorkflowError::RenderVendorFailure(format!(
                "status poll returned {}",
                response.status()
            )));
        }

        let data: StatusResponse = response
            .json()
            .await
            .map_err(|e| WorkflowError::RenderVendorFailure(e.to_string()))?;
        Ok(RenderPoll {
            state: RenderState::parse(&data.response.status),
            url: data.response.url,
            error: data.response.error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn clip(url: &str, seconds: f64) -> ClipSource {
        ClipSource {
            url: url.to_string(),
            duration_seconds: seconds,
        }
    }

    fn transitions_of(clip: &Clip) -> (&str, &str) {
        let t = clip.transition.as_ref().unwrap();
        (
            t.transition_in.as_deref().unwrap(),
            t.transition_out.as_deref().unwrap(),
        )
    }

    #[test]
    fn test_clips_are_laid_out_sequentially_in_plan_order() {
        let edit = build_timeline(
            &[clip("a.mp4", 5.0), clip("b.mp4", 3.0), clip("c.mp4", 4.0)],
            None,
            "slideLeft",
            &OutputSpec::default(),
        );

        let clips = &edit.timeline.tracks[0].clips;
        assert_eq!(clips[0].start, 0.0);
        assert_eq!(clips[1].start, 5.0);
        assert_eq!(clips[2].start, 8.0);
        assert_eq!(clips[2].length, 4.0);
    }

    #[test]
    fn test_first_and_last_clips_fade_even_when_another_transition_was_asked() {
        let edit = build_timeline(
            &[clip("a.mp4", 5.0), clip("b.mp4", 3.0), clip("c.mp4", 4.0)],
            None,
            "slideLeft",
            &OutputSpec::default(),
        );

        let clips = &edit.timeline.tracks[0].clips;
        assert_eq!(transitions_of(&clips[0]), ("fade", "slideLeft"));
        assert_eq!(transitions_of(&clips[1]), ("slideLeft", "slideLeft"));
        assert_eq!(transitions_of(&clips[2]), ("slideLeft", "fade"));
    }

    #[test]
    fn test_single_clip_fades_both_ways() {
        let edit = build_timeline(
            &[clip("a.mp4", 6.0)],
            None,
            "wipeRight",
            &OutputSpec::default(),
        );
        let clips = &edit.timeline.tracks[0].clips;
        assert_eq!(transitions_of(&clips[0]), ("fade", "fade"));
    }

    #[test]
    fn test_audio_track_spans_the_composition_at_reduced_volume() {
        let edit = build_timeline(
            &[clip("a.mp4", 5.0), clip("b.mp4", 3.0)],
            Some("https://cdn.example/vo.mp3"),
            "fade",
            &OutputSpec::default(),
        );

        assert_eq!(edit.timeline.tracks.len(), 2);
        let audio = &edit.timeline.tracks[1].clips[0];
        assert_eq!(audio.start, 0.0);
        assert_eq!(audio.length, 8.0);
        match &audio.asset {
            Asset::Audio { volume, .. } => assert_eq!(*volume, Some(AUDIO_TRACK_VOLUME)),
            other => panic!("expected audio asset, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_resolution_preset_falls_back_to_hd() {
        assert_eq!(resolution_size("8k-ultrawide"), (1280, 720));
        assert_eq!(resolution_size("1080"), (1920, 1080));
    }

    #[test]
    fn test_unrecognized_vendor_state_counts_as_in_progress() {
        assert_eq!(RenderState::parse("warming-up"), RenderState::InProgress);
        assert!(!RenderState::parse("warming-up").is_terminal());
        assert!(RenderState::parse("done").is_terminal());
    }

    struct StuckVendor {
        polls: AtomicU32,
    }

    #[async_trait]
    impl RenderService for StuckVendor {
        async fn submit(&self, _edit: &Edit) -> Result<String, WorkflowError> {
            Ok("render-1".to_string())
        }

        async fn poll(&self, _render_id: &str) -> Result<RenderPoll, WorkflowError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(RenderPoll {
                state: RenderState::Rendering,
                url: None,
                error: None,
            })
        }
    }

    #[tokio::test]
    async fn test_poll_ceiling_produces_timeout_after_sixty_attempts() {
        let vendor = StuckVendor {
            polls: AtomicU32::new(0),
        };
        let config = PollConfig {
            interval: Duration::ZERO,
            max_attempts: 60,
        };

        let err = wait_for_render(&vendor, "render-1", &config)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::RenderTimeout { attempts: 60 }));
        assert_eq!(vendor.polls.load(Ordering::SeqCst), 60);
    }

    struct DoneWithoutUrl;

    #[async_trait]
    impl RenderService for DoneWithoutUrl {
        async fn submit(&self, _edit: &Edit) -> Result<String, WorkflowError> {
            Ok("render-2".to_string())
        }

        async fn poll(&self, _render_id: &str) -> Result<RenderPoll, WorkflowError> {
            Ok(RenderPoll {
                state: RenderState::Done,
                url: None,
                error: None,
            })
        }
    }

    #[tokio::test]
    async fn test_done_without_url_is_a_protocol_violation() {
        let err = wait_for_render(&DoneWithoutUrl, "render-2", &PollConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::MissingRenderUrl));
    }
}
