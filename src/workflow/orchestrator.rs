// Orchestrator - executes a workflow plan as one cost-accounted run
//
// Stage DAG: per-scene image generation feeds that scene's video
// generation (fine-grained dependency, no cross-scene barrier); voiceover
// runs concurrently with the scenes; the merge is a hard barrier over all
// of them. Every adapter call goes through the tracker protocol so each
// unit of work ends with exactly one of {artifact + charge, failure}.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::{
    GeneratedAudio, GeneratedImage, ImageGenerator, ImageRequest, VideoGenerator, VideoRequest,
    VoiceoverGenerator, VoiceoverRequest,
};
use crate::errors::WorkflowError;
use crate::models::{
    ArtifactDraft, ArtifactType, NodeType, Run, RunStatus, ScenePlan, VoiceoverPlan, WorkflowPlan,
};
use crate::services::ledger::CreditLedger;
use crate::services::pricing;
use crate::services::tracker::WorkTracker;
use crate::shotstack_client::{
    build_timeline, resolution_size, wait_for_render, ClipSource, PollConfig, RenderService,
};

/// Terminal result of one orchestration attempt.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// What a spawned stage task hands back to the join.
enum StageOutput {
    Clip(usize, ClipSource),
    Audio(GeneratedAudio),
}

#[derive(Clone)]
pub struct Orchestrator {
    tracker: Arc<WorkTracker>,
    ledger: Arc<CreditLedger>,
    image_gen: Arc<dyn ImageGenerator>,
    video_gen: Arc<dyn VideoGenerator>,
    voice_gen: Arc<dyn VoiceoverGenerator>,
    render: Arc<dyn RenderService>,
    poll: PollConfig,
}

impl Orchestrator {
    pub fn new(
        tracker: Arc<WorkTracker>,
        ledger: Arc<CreditLedger>,
        image_gen: Arc<dyn ImageGenerator>,
        video_gen: Arc<dyn VideoGenerator>,
        voice_gen: Arc<dyn VoiceoverGenerator>,
        render: Arc<dyn RenderService>,
    ) -> Self {
        Self {
            tracker,
            ledger,
            image_gen,
            video_gen,
            voice_gen,
            render,
            poll: PollConfig::default(),
        }
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Run a plan to its terminal status, blocking the caller until the
    /// run completes or fails. Pre-flight failures return an error with no
    /// run created; stage failures return a `failed` outcome.
    pub async fn execute(
        &self,
        plan: WorkflowPlan,
        user_id: &str,
    ) -> Result<RunOutcome, WorkflowError> {
        let run = self.admit(&plan, user_id).await?;
        Ok(self.drive(run, plan).await)
    }

    /// Admission plus background execution: returns the run id as soon as
    /// the run exists so a client can poll it, which is how the HTTP layer
    /// dispatches a pipeline that can legitimately take minutes.
    pub async fn submit(&self, plan: WorkflowPlan, user_id: &str) -> Result<Uuid, WorkflowError> {
        let run = self.admit(&plan, user_id).await?;
        let run_id = run.id;
        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator.drive(run, plan).await;
        });
        Ok(run_id)
    }

    /// Affordability check and run creation. The balance check is advisory:
    /// it closes the common case but concurrent runs by one user can still
    /// jointly overdraw (accepted soft limit).
    async fn admit(&self, plan: &WorkflowPlan, user_id: &str) -> Result<Run, WorkflowError> {
        if plan.scenes.is_empty() {
            return Err(WorkflowError::Internal("plan contains no scenes".to_string()));
        }

        let needed_units = pricing::credits_to_units(plan.estimated_credits);
        let available_units = self.ledger.balance_units(user_id).await;
        if available_units < needed_units {
            return Err(WorkflowError::InsufficientCredits {
                needed_units,
                available_units,
            });
        }

        let run = self.tracker.create_run(user_id, plan).await?;
        self.tracker.mark_run_running(run.id).await;
        info!(
            "🚀 Run {} admitted: {} scenes, voiceover: {}, estimated {} units",
            run.id,
            plan.scenes.len(),
            plan.voiceover.is_some(),
            needed_units
        );
        Ok(run)
    }

    /// Execute the stage DAG and settle the run's terminal status exactly
    /// once.
    async fn drive(&self, run: Run, plan: WorkflowPlan) -> RunOutcome {
        match self.run_stages(&run, &plan).await {
            Ok(final_url) => {
                self.tracker.complete_run(run.id, &final_url).await;
                RunOutcome {
                    run_id: run.id,
                    status: RunStatus::Completed,
                    final_video_url: Some(final_url),
                    error_message: None,
                }
            }
            Err(e) => {
                let message = e.to_string();
                warn!("Run {} failed: {}", run.id, message);
                self.tracker.fail_run(run.id, &message).await;
                RunOutcome {
                    run_id: run.id,
                    status: RunStatus::Failed,
                    final_video_url: None,
                    error_message: Some(message),
                }
            }
        }
    }

    async fn run_stages(&self, run: &Run, plan: &WorkflowPlan) -> Result<String, WorkflowError> {
        let (width, height) = resolution_size(&plan.output.resolution);
        let cancel = CancellationToken::new();

        let mut handles: Vec<JoinHandle<Result<StageOutput, WorkflowError>>> =
            Vec::with_capacity(plan.scenes.len() + 1);

        for (index, scene) in plan.scenes.iter().enumerate() {
            let orchestrator = self.clone();
            let scene = scene.clone();
            let image_model = plan.image_model_for(&scene).to_string();
            let video_model = plan.video_model_for(&scene).to_string();
            let run_id = run.id;
            let user_id = run.user_id.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                orchestrator
                    .run_scene(
                        run_id,
                        &user_id,
                        &scene,
                        &image_model,
                        &video_model,
                        width,
                        height,
                        &cancel,
                    )
                    .await
                    .map(|clip| StageOutput::Clip(index, clip))
            }));
        }

        if let Some(voiceover) = &plan.voiceover {
            let orchestrator = self.clone();
            let voiceover = voiceover.clone();
            // voiceover_model is Some whenever the plan has a voiceover
            let model = plan
                .voiceover_model()
                .unwrap_or(&plan.models.voiceover)
                .to_string();
            let run_id = run.id;
            let user_id = run.user_id.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let result = orchestrator
                    .run_voiceover_job(run_id, &user_id, &voiceover, &model)
                    .await;
                if result.is_err() {
                    cancel.cancel();
                }
                result.map(StageOutput::Audio)
            }));
        }

        // All-succeed-or-abort join in completion order: the first failure
        // returns immediately and cancels the wait. Detached in-flight
        // tasks finish the unit of work they already started (its
        // bookkeeping stays consistent) but begin no further stage work;
        // their results are discarded, not retried or cleaned up.
        let mut clips: Vec<Option<ClipSource>> = vec![None; plan.scenes.len()];
        let mut audio_url: Option<String> = None;
        let mut pending: FuturesUnordered<_> = handles.into_iter().map(flatten_task).collect();
        while let Some(result) = pending.next().await {
            match result? {
                StageOutput::Clip(index, clip) => clips[index] = Some(clip),
                StageOutput::Audio(audio) => audio_url = Some(audio.url),
            }
        }

        // Final clip order is the plan's declared scene order, not
        // generation completion order.
        let clips = clips
            .into_iter()
            .collect::<Option<Vec<ClipSource>>>()
            .ok_or_else(|| WorkflowError::Internal("scene result missing after join".to_string()))?;

        self.run_merge_job(run.id, &run.user_id, &clips, audio_url.as_deref(), plan)
            .await
    }

    /// One scene's chain: image generation, then video generation from
    /// that image. The video stage waits only for this scene's own image.
    #[allow(clippy::too_many_arguments)]
    async fn run_scene(
        &self,
        run_id: Uuid,
        user_id: &str,
        scene: &ScenePlan,
        image_model: &str,
        video_model: &str,
        width: u32,
        height: u32,
        cancel: &CancellationToken,
    ) -> Result<ClipSource, WorkflowError> {
        let image = match self
            .run_image_job(run_id, user_id, scene, image_model, width, height)
            .await
        {
            Ok(image) => image,
            Err(e) => {
                cancel.cancel();
                return Err(e);
            }
        };

        // A sibling failed while this image was in flight: finish nothing
        // further for this run.
        if cancel.is_cancelled() {
            return Err(WorkflowError::Internal(format!(
                "scene {} aborted before video stage",
                scene.id
            )));
        }

        match self
            .run_video_job(run_id, user_id, scene, video_model, &image, width, height)
            .await
        {
            Ok(clip) => Ok(clip),
            Err(e) => {
                cancel.cancel();
                Err(e)
            }
        }
    }

    async fn run_image_job(
        &self,
        run_id: Uuid,
        user_id: &str,
        scene: &ScenePlan,
        model: &str,
        width: u32,
        height: u32,
    ) -> Result<GeneratedImage, WorkflowError> {
        let cost = pricing::image_cost(model)?;
        let params = json!({
            "model": model,
            "prompt": scene.description,
            "width": width,
            "height": height,
            "style": scene.style,
        });
        let job = self
            .tracker
            .begin_job(
                run_id,
                user_id,
                &scene.id,
                NodeType::Image,
                self.image_gen.name(),
                params,
            )
            .await?;

        let request = ImageRequest {
            model: model.to_string(),
            prompt: scene.description.clone(),
            width,
            height,
            style: scene.style.clone(),
        };
        match self.image_gen.generate_image(&request).await {
            Ok(image) => {
                let draft = ArtifactDraft::new(ArtifactType::Image, image.url.clone())
                    .with_dimensions(image.width, image.height);
                self.tracker
                    .complete_job(&job, draft, cost, Some(image.meta.clone()))
                    .await?;
                Ok(image)
            }
            Err(e) => {
                self.tracker.fail_job(&job, &e.to_string()).await;
                Err(WorkflowError::AdapterFailure {
                    stage: "image",
                    message: e.to_string(),
                })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_video_job(
        &self,
        run_id: Uuid,
        user_id: &str,
        scene: &ScenePlan,
        model: &str,
        image: &GeneratedImage,
        width: u32,
        height: u32,
    ) -> Result<ClipSource, WorkflowError> {
        let cost = pricing::video_cost(model, scene.duration_seconds)?;
        let params = json!({
            "model": model,
            "image_url": image.url,
            "prompt": scene.description,
            "duration_seconds": scene.duration_seconds,
            "width": width,
            "height": height,
        });
        let job = self
            .tracker
            .begin_job(
                run_id,
                user_id,
                &scene.id,
                NodeType::Video,
                self.video_gen.name(),
                params,
            )
            .await?;

        let request = VideoRequest {
            model: model.to_string(),
            image_url: image.url.clone(),
            prompt: scene.description.clone(),
            duration_seconds: scene.duration_seconds,
            width,
            height,
        };
        match self.video_gen.generate_video(&request).await {
            Ok(video) => {
                let draft = ArtifactDraft::new(ArtifactType::Video, video.url.clone())
                    .with_dimensions(video.width, video.height)
                    .with_duration(video.duration_seconds);
                self.tracker
                    .complete_job(&job, draft, cost, Some(video.meta.clone()))
                    .await?;
                Ok(ClipSource {
                    url: video.url,
                    duration_seconds: video.duration_seconds,
                })
            }
            Err(e) => {
                self.tracker.fail_job(&job, &e.to_string()).await;
                Err(WorkflowError::AdapterFailure {
                    stage: "video",
                    message: e.to_string(),
                })
            }
        }
    }

    async fn run_voiceover_job(
        &self,
        run_id: Uuid,
        user_id: &str,
        voiceover: &VoiceoverPlan,
        model: &str,
    ) -> Result<GeneratedAudio, WorkflowError> {
        let cost = pricing::voiceover_cost(model)?;
        let params = json!({
            "model": model,
            "text": voiceover.script,
            "voice_id": voiceover.voice_id,
            "language": voiceover.language,
        });
        let job = self
            .tracker
            .begin_job(
                run_id,
                user_id,
                "voiceover",
                NodeType::Voiceover,
                self.voice_gen.name(),
                params,
            )
            .await?;

        let request = VoiceoverRequest {
            model: model.to_string(),
            text: voiceover.script.clone(),
            voice_id: voiceover.voice_id.clone(),
            language: voiceover.language.clone(),
        };
        match self.voice_gen.generate_voiceover(&request).await {
            Ok(audio) => {
                let mut draft = ArtifactDraft::new(ArtifactType::Audio, audio.url.clone());
                draft.duration_seconds = audio.duration_seconds;
                self.tracker
                    .complete_job(&job, draft, cost, Some(audio.meta.clone()))
                    .await?;
                Ok(audio)
            }
            Err(e) => {
                self.tracker.fail_job(&job, &e.to_string()).await;
                Err(WorkflowError::AdapterFailure {
                    stage: "voiceover",
                    message: e.to_string(),
                })
            }
        }
    }

    /// Stage D: merge everything through the render vendor, tracked like
    /// any other unit of work.
    async fn run_merge_job(
        &self,
        run_id: Uuid,
        user_id: &str,
        clips: &[ClipSource],
        audio_url: Option<&str>,
        plan: &WorkflowPlan,
    ) -> Result<String, WorkflowError> {
        let cost = pricing::merge_cost();
        let edit = build_timeline(clips, audio_url, &plan.output.transition, &plan.output);
        let params = json!({
            "clips": clips
                .iter()
                .map(|c| json!({ "url": c.url, "duration_seconds": c.duration_seconds }))
                .collect::<Vec<_>>(),
            "audio_url": audio_url,
            "transition": plan.output.transition,
            "resolution": plan.output.resolution,
        });
        let job = self
            .tracker
            .begin_job(run_id, user_id, "merge", NodeType::Merge, "shotstack", params)
            .await?;

        let render_id = match self.render.submit(&edit).await {
            Ok(id) => id,
            Err(e) => {
                self.tracker.fail_job(&job, &e.to_string()).await;
                return Err(e);
            }
        };

        match wait_for_render(self.render.as_ref(), &render_id, &self.poll).await {
            Ok(url) => {
                let total_seconds: f64 = clips.iter().map(|c| c.duration_seconds).sum();
                let draft = ArtifactDraft::new(ArtifactType::Video, url.clone())
                    .with_duration(total_seconds);
                self.tracker
                    .complete_job(&job, draft, cost, Some(json!({ "render_id": render_id })))
                    .await?;
                Ok(url)
            }
            Err(e) => {
                self.tracker.fail_job(&job, &e.to_string()).await;
                Err(e)
            }
        }
    }
}

/// Collapse a join error into the pipeline error space. Dropping the
/// returned future detaches the task rather than aborting it.
async fn flatten_task(
    handle: JoinHandle<Result<StageOutput, WorkflowError>>,
) -> Result<StageOutput, WorkflowError> {
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(WorkflowError::Internal(format!("stage task died: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{AdapterError, AdapterResult, GeneratedVideo};
    use crate::models::{JobStatus, OutputSpec, RecommendedModels, TransactionType};
    use crate::shotstack_client::{Edit, RenderPoll, RenderState};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    // ------------------------------------------------------------------
    // Stub adapters. Successful calls yield once to mimic a network
    // round-trip; failures return immediately.
    // ------------------------------------------------------------------

    struct StubImages {
        fail_marker: Option<&'static str>,
    }

    #[async_trait]
    impl ImageGenerator for StubImages {
        fn name(&self) -> &str {
            "stub-images"
        }

        async fn generate_image(&self, request: &ImageRequest) -> AdapterResult<GeneratedImage> {
            if let Some(marker) = self.fail_marker {
                if request.prompt.contains(marker) {
                    return Err(AdapterError::Api {
                        status: 500,
                        message: "image backend exploded".to_string(),
                    });
                }
            }
            tokio::task::yield_now().await;
            Ok(GeneratedImage {
                url: format!("https://cdn.test/{}.png", request.prompt),
                width: request.width,
                height: request.height,
                meta: json!({ "stub": true }),
            })
        }
    }

    struct StubVideos {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl VideoGenerator for StubVideos {
        fn name(&self) -> &str {
            "stub-videos"
        }

        async fn generate_video(&self, request: &VideoRequest) -> AdapterResult<GeneratedVideo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(GeneratedVideo {
                url: format!("https://cdn.test/{}.mp4", request.prompt),
                duration_seconds: request.duration_seconds,
                width: request.width,
                height: request.height,
                meta: json!({ "stub": true }),
            })
        }
    }

    struct StubVoice {
        fail: bool,
    }

    #[async_trait]
    impl VoiceoverGenerator for StubVoice {
        fn name(&self) -> &str {
            "stub-voice"
        }

        async fn generate_voiceover(
            &self,
            _request: &VoiceoverRequest,
        ) -> AdapterResult<GeneratedAudio> {
            if self.fail {
                return Err(AdapterError::Api {
                    status: 429,
                    message: "voice quota exhausted".to_string(),
                });
            }
            tokio::task::yield_now().await;
            Ok(GeneratedAudio {
                url: "https://cdn.test/voiceover.mp3".to_string(),
                duration_seconds: Some(11.0),
                meta: json!({ "stub": true }),
            })
        }
    }

    enum VendorMode {
        Succeed,
        StuckRendering,
    }

    struct StubVendor {
        mode: VendorMode,
        polls: AtomicU32,
        submitted: Mutex<Option<Edit>>,
    }

    impl StubVendor {
        fn new(mode: VendorMode) -> Self {
            Self {
                mode,
                polls: AtomicU32::new(0),
                submitted: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl RenderService for StubVendor {
        async fn submit(&self, edit: &Edit) -> Result<String, WorkflowError> {
            *self.submitted.lock().unwrap() = Some(edit.clone());
            Ok("render-test".to_string())
        }

        async fn poll(&self, _render_id: &str) -> Result<RenderPoll, WorkflowError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            match self.mode {
                VendorMode::Succeed => Ok(RenderPoll {
                    state: RenderState::Done,
                    url: Some("https://cdn.shotstack.test/final.mp4".to_string()),
                    error: None,
                }),
                VendorMode::StuckRendering => Ok(RenderPoll {
                    state: RenderState::Rendering,
                    url: None,
                    error: None,
                }),
            }
        }
    }

    // ------------------------------------------------------------------
    // Harness
    // ------------------------------------------------------------------

    struct Harness {
        ledger: Arc<CreditLedger>,
        tracker: Arc<WorkTracker>,
        vendor: Arc<StubVendor>,
        video_calls: Arc<AtomicU32>,
        orchestrator: Orchestrator,
    }

    fn harness(
        fail_image_marker: Option<&'static str>,
        fail_voice: bool,
        vendor_mode: VendorMode,
    ) -> Harness {
        let ledger = Arc::new(CreditLedger::new());
        let tracker = Arc::new(WorkTracker::new(ledger.clone()));
        let vendor = Arc::new(StubVendor::new(vendor_mode));
        let video_calls = Arc::new(AtomicU32::new(0));
        let orchestrator = Orchestrator::new(
            tracker.clone(),
            ledger.clone(),
            Arc::new(StubImages {
                fail_marker: fail_image_marker,
            }),
            Arc::new(StubVideos {
                calls: video_calls.clone(),
            }),
            Arc::new(StubVoice { fail: fail_voice }),
            vendor.clone(),
        )
        .with_poll_config(PollConfig {
            interval: Duration::ZERO,
            max_attempts: 60,
        });
        Harness {
            ledger,
            tracker,
            vendor,
            video_calls,
            orchestrator,
        }
    }

    fn plan(scene_durations: &[f64], voiceover: bool) -> WorkflowPlan {
        let mut plan = WorkflowPlan {
            scenes: scene_durations
                .iter()
                .enumerate()
                .map(|(i, d)| ScenePlan {
                    id: format!("scene-{}", i + 1),
                    description: format!("scene-{}", i + 1),
                    duration_seconds: *d,
                    style: None,
                    image_model: None,
                    video_model: None,
                })
                .collect(),
            voiceover: voiceover.then(|| VoiceoverPlan {
                script: "our story begins".to_string(),
                voice_id: "narrator".to_string(),
                language: None,
                model: None,
            }),
            estimated_credits: 0.0,
            models: RecommendedModels {
                image: "flux-schnell".to_string(),
                video: "kling-v1".to_string(),
                voiceover: "eleven-turbo-v2".to_string(),
            },
            output: OutputSpec::default(),
        };
        plan.estimated_credits =
            pricing::units_to_credits(pricing::estimate_plan(&plan).unwrap());
        plan
    }

    async fn grant(ledger: &CreditLedger, user: &str, units: i64) {
        ledger
            .post(user, TransactionType::Grant, units, "grant-test", None)
            .await
            .unwrap();
    }

    /// Let detached stage tasks finish their in-flight bookkeeping.
    async fn drain() {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }

    // ------------------------------------------------------------------
    // Tests
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_completed_run_charges_exactly_the_estimate() {
        let h = harness(None, false, VendorMode::Succeed);
        let plan = plan(&[5.0, 3.0, 4.0], true);
        let estimate_units = pricing::estimate_plan(&plan).unwrap();
        grant(&h.ledger, "u1", 1_000).await;

        let outcome = h.orchestrator.execute(plan, "u1").await.unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(
            outcome.final_video_url.as_deref(),
            Some("https://cdn.shotstack.test/final.mp4")
        );

        // 3 images + 3 videos + 1 voiceover + 1 merge
        let jobs = h.tracker.run_jobs(outcome.run_id).await;
        assert_eq!(jobs.len(), 8);
        assert!(jobs.iter().all(|j| j.status == JobStatus::Completed));

        // Parity: job charges, run total and ledger spend all equal the
        // estimate produced by the same pricing functions.
        let charged: i64 = jobs.iter().map(|j| j.credits_used).sum();
        assert_eq!(charged, estimate_units);
        let run = h.tracker.get_run(outcome.run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.credits_used, estimate_units);
        assert_eq!(h.ledger.balance_units("u1").await, 1_000 - estimate_units);

        // One artifact per completed job, none orphaned
        let artifacts = h.tracker.run_artifacts(outcome.run_id).await;
        assert_eq!(artifacts.len(), 8);
        for job in &jobs {
            assert_eq!(h.tracker.artifacts_for_job(job.id).await.len(), 1);
            let tx = h.ledger.find(&format!("job-{}", job.id)).await.unwrap();
            assert_eq!(tx.amount_units, -job.credits_used);
        }
    }

    #[tokio::test]
    async fn test_scene_image_failure_aborts_the_whole_run() {
        let h = harness(Some("scene-2"), false, VendorMode::Succeed);
        let plan = plan(&[5.0, 3.0, 4.0], false);
        grant(&h.ledger, "u1", 1_000).await;

        let outcome = h.orchestrator.execute(plan, "u1").await.unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(outcome
            .error_message
            .as_deref()
            .unwrap()
            .contains("image adapter failed"));

        drain().await;

        let jobs = h.tracker.run_jobs(outcome.run_id).await;
        // Stage B never starts: sibling scenes finish their in-flight
        // image bookkeeping but begin no video work.
        assert!(jobs.iter().all(|j| j.node_type != NodeType::Video));
        assert_eq!(h.video_calls.load(Ordering::SeqCst), 0);

        let image_cost = pricing::image_cost("flux-schnell").unwrap();
        for scene in ["scene-1", "scene-3"] {
            let job = jobs
                .iter()
                .find(|j| j.node_id == scene && j.node_type == NodeType::Image)
                .unwrap();
            assert_eq!(job.status, JobStatus::Completed);
            assert_eq!(job.credits_used, image_cost);
            assert_eq!(h.tracker.artifacts_for_job(job.id).await.len(), 1);
        }

        let failed = jobs
            .iter()
            .find(|j| j.node_id == "scene-2" && j.node_type == NodeType::Image)
            .unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(h.tracker.artifacts_for_job(failed.id).await.is_empty());

        // Completed upstream spend stays charged: no refunds.
        let run = h.tracker.get_run(outcome.run_id).await.unwrap();
        assert_eq!(run.credits_refunded, 0);
        assert_eq!(h.ledger.balance_units("u1").await, 1_000 - 2 * image_cost);
    }

    #[tokio::test]
    async fn test_voiceover_failure_fails_the_run_without_a_merge() {
        let h = harness(None, true, VendorMode::Succeed);
        let plan = plan(&[2.0], true);
        grant(&h.ledger, "u1", 1_000).await;

        let outcome = h.orchestrator.execute(plan, "u1").await.unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(outcome
            .error_message
            .as_deref()
            .unwrap()
            .contains("voiceover adapter failed"));

        drain().await;
        let jobs = h.tracker.run_jobs(outcome.run_id).await;
        assert!(jobs.iter().all(|j| j.node_type != NodeType::Merge));
    }

    #[tokio::test]
    async fn test_render_stuck_in_progress_times_out_and_fails_the_run() {
        let h = harness(None, false, VendorMode::StuckRendering);
        let plan = plan(&[2.0], false);
        grant(&h.ledger, "u1", 1_000).await;

        let outcome = h.orchestrator.execute(plan, "u1").await.unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(outcome
            .error_message
            .as_deref()
            .unwrap()
            .contains("render timed out after 60 polls"));
        assert_eq!(h.vendor.polls.load(Ordering::SeqCst), 60);

        let jobs = h.tracker.run_jobs(outcome.run_id).await;
        let merge = jobs
            .iter()
            .find(|j| j.node_type == NodeType::Merge)
            .unwrap();
        assert_eq!(merge.status, JobStatus::Failed);
        assert!(h.tracker.artifacts_for_job(merge.id).await.is_empty());
        // The merge job is never charged on failure
        assert!(h
            .ledger
            .find(&format!("job-{}", merge.id))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_insufficient_credits_short_circuits_without_a_run() {
        let h = harness(None, false, VendorMode::Succeed);
        let mut plan = plan(&[2.0], false);
        plan.estimated_credits = 50.0;
        grant(&h.ledger, "u1", 100).await; // 10 credits

        let err = h.orchestrator.execute(plan, "u1").await.unwrap_err();
        match err {
            WorkflowError::InsufficientCredits {
                needed_units,
                available_units,
            } => {
                assert_eq!(needed_units, 500);
                assert_eq!(available_units, 100);
            }
            other => panic!("expected InsufficientCredits, got {:?}", other),
        }

        assert!(h.tracker.user_runs("u1").await.is_empty());
        assert_eq!(h.ledger.balance_units("u1").await, 100);
    }

    #[tokio::test]
    async fn test_merge_receives_clips_in_plan_order_with_voiceover_track() {
        let h = harness(None, false, VendorMode::Succeed);
        let plan = plan(&[5.0, 3.0, 4.0], true);
        grant(&h.ledger, "u1", 1_000).await;

        let outcome = h.orchestrator.execute(plan, "u1").await.unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);

        let edit = h.vendor.submitted.lock().unwrap().clone().unwrap();
        let clips = &edit.timeline.tracks[0].clips;
        assert_eq!(clips.len(), 3);
        let sources: Vec<&str> = clips
            .iter()
            .map(|c| match &c.asset {
                crate::shotstack_client::Asset::Video { src, .. } => src.as_str(),
                other => panic!("expected video asset, got {:?}", other),
            })
            .collect();
        assert_eq!(
            sources,
            vec![
                "https://cdn.test/scene-1.mp4",
                "https://cdn.test/scene-2.mp4",
                "https://cdn.test/scene-3.mp4",
            ]
        );
        assert_eq!(clips[1].start, 5.0);
        assert_eq!(clips[2].start, 8.0);
        // Voiceover landed on the second track
        assert_eq!(edit.timeline.tracks.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_plan_model_fails_the_run_before_spending() {
        let h = harness(None, false, VendorMode::Succeed);
        let mut plan = plan(&[2.0], false);
        plan.models.video = "sora-max".to_string();
        plan.estimated_credits = 10.0;
        grant(&h.ledger, "u1", 1_000).await;

        let outcome = h.orchestrator.execute(plan, "u1").await.unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(outcome
            .error_message
            .as_deref()
            .unwrap()
            .contains("unknown model"));
        drain().await;
        // The image was generated and charged before the unpriceable video
        // stage was reached; that spend stays.
        let image_cost = pricing::image_cost("flux-schnell").unwrap();
        assert_eq!(h.ledger.balance_units("u1").await, 1_000 - image_cost);
    }
}
