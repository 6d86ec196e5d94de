// Job/artifact tracking service
// Per-unit-of-work bookkeeping around every adapter call: record intent
// before money can be spent, then record exactly one terminal outcome.
// A terminal job always has exactly one of {artifact + ledger transaction,
// nothing} — never a dangling charge, never an uncharged artifact.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::WorkflowError;
use crate::models::{
    Artifact, ArtifactDraft, Job, JobStatus, NodeType, Run, RunStatus, TransactionType,
    WorkflowPlan,
};
use crate::services::ledger::{CreditLedger, LedgerError};

pub struct WorkTracker {
    runs: RwLock<HashMap<Uuid, Run>>,
    jobs: RwLock<HashMap<Uuid, Job>>,
    artifacts: RwLock<HashMap<Uuid, Artifact>>,
    ledger: Arc<CreditLedger>,
}

impl WorkTracker {
    pub fn new(ledger: Arc<CreditLedger>) -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            jobs: RwLock::new(HashMap::new()),
            artifacts: RwLock::new(HashMap::new()),
            ledger,
        }
    }

    // ------------------------------------------------------------------
    // Run lifecycle
    // ------------------------------------------------------------------

    /// Create a pending run holding a frozen snapshot of the plan.
    pub async fn create_run(
        &self,
        user_id: &str,
        plan: &WorkflowPlan,
    ) -> Result<Run, WorkflowError> {
        let run = Run::new(user_id, plan)
            .map_err(|e| WorkflowError::TrackingWriteFailure(format!("plan snapshot: {}", e)))?;
        let mut runs = self.runs.write().await;
        runs.insert(run.id, run.clone());
        tracing::info!("🎬 Created run {} for {}", run.id, user_id);
        Ok(run)
    }

    pub async fn mark_run_running(&self, run_id: Uuid) {
        let mut runs = self.runs.write().await;
        if let Some(run) = runs.get_mut(&run_id) {
            if run.status == RunStatus::Pending {
                run.status = RunStatus::Running;
            }
        }
    }

    pub async fn complete_run(&self, run_id: Uuid, final_video_url: &str) {
        self.finish_run(run_id, RunStatus::Completed, Some(final_video_url), None)
            .await;
    }

    pub async fn fail_run(&self, run_id: Uuid, error_message: &str) {
        self.finish_run(run_id, RunStatus::Failed, None, Some(error_message))
            .await;
    }

    /// Terminal states are sinks: the first terminal write wins, later ones
    /// are ignored with a warning.
    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        final_video_url: Option<&str>,
        error_message: Option<&str>,
    ) {
        let mut runs = self.runs.write().await;
        let Some(run) = runs.get_mut(&run_id) else {
            tracing::warn!("Terminal transition for unknown run {}", run_id);
            return;
        };
        if run.status.is_terminal() {
            tracing::warn!(
                "Ignoring {} transition for run {} already {}",
                status.as_str(),
                run_id,
                run.status.as_str()
            );
            return;
        }
        run.status = status;
        run.final_video_url = final_video_url.map(|s| s.to_string());
        run.error_message = error_message.map(|s| s.to_string());
        run.completed_at = Some(chrono::Utc::now());
        tracing::info!("🏁 Run {} finished: {}", run_id, status.as_str());
    }

    // ------------------------------------------------------------------
    // Job protocol: begin -> adapter call -> complete | fail
    // ------------------------------------------------------------------

    /// Persist a pending job before its adapter is called, then mark it
    /// running. If this fails the unit of work must not proceed: money is
    /// never spent for untracked work.
    pub async fn begin_job(
        &self,
        run_id: Uuid,
        user_id: &str,
        node_id: &str,
        node_type: NodeType,
        adapter: &str,
        input_params: Value,
    ) -> Result<Job, WorkflowError> {
        if !self.runs.read().await.contains_key(&run_id) {
            return Err(WorkflowError::TrackingWriteFailure(format!(
                "run {} does not exist",
                run_id
            )));
        }

        let mut job = Job::new(
            run_id,
            user_id,
            node_id,
            node_type,
            adapter,
            strip_nulls(input_params),
        );
        job.status = JobStatus::Running;
        job.started_at = Some(chrono::Utc::now());

        let mut jobs = self.jobs.write().await;
        jobs.insert(job.id, job.clone());
        tracing::debug!(
            "▶️ Job {} started: {} {} via {}",
            job.id,
            node_type.as_str(),
            node_id,
            adapter
        );
        Ok(job)
    }

    /// Terminal success: create the artifact, post the ledger deduction
    /// keyed by the job id, then mark the job completed — in that order.
    /// A duplicate transaction with a matching amount is a tolerated
    /// replay; a mismatched one is fatal.
    pub async fn complete_job(
        &self,
        job: &Job,
        draft: ArtifactDraft,
        credits_units: i64,
        provider_meta: Option<Value>,
    ) -> Result<Artifact, WorkflowError> {
        let artifact = Artifact {
            id: Uuid::new_v4(),
            user_id: job.user_id.clone(),
            run_id: job.run_id,
            job_id: job.id,
            artifact_type: draft.artifact_type,
            url: draft.url,
            size_bytes: draft.size_bytes,
            duration_seconds: draft.duration_seconds,
            width: draft.width,
            height: draft.height,
            provider_meta: provider_meta.clone(),
            expires_at: draft.expires_at,
            created_at: chrono::Utc::now(),
        };
        self.artifacts
            .write()
            .await
            .insert(artifact.id, artifact.clone());

        let trans_no = format!("job-{}", job.id);
        let reason = format!("{} {}", job.node_type.as_str(), job.node_id);
        match self
            .ledger
            .post(
                &job.user_id,
                TransactionType::Deduct,
                -credits_units,
                &trans_no,
                Some(reason),
            )
            .await
        {
            Ok(_) => {}
            Err(LedgerError::Duplicate { existing }) if existing.amount_units == -credits_units => {
                tracing::info!("Replayed completion of job {}, charge already posted", job.id);
            }
            Err(LedgerError::Duplicate { existing }) => {
                return Err(WorkflowError::DuplicateTransaction(format!(
                    "{} already posted with {} units, attempted {}",
                    trans_no, existing.amount_units, -credits_units
                )));
            }
        }

        {
            let mut jobs = self.jobs.write().await;
            let stored = jobs.get_mut(&job.id).ok_or_else(|| {
                WorkflowError::TrackingWriteFailure(format!("job {} vanished", job.id))
            })?;
            stored.status = JobStatus::Completed;
            stored.credits_used = credits_units;
            stored.provider_meta = provider_meta;
            stored.completed_at = Some(chrono::Utc::now());
        }

        {
            let mut runs = self.runs.write().await;
            if let Some(run) = runs.get_mut(&job.run_id) {
                run.credits_used += credits_units;
            }
        }

        tracing::info!(
            "✅ Job {} completed: {} {} ({} units)",
            job.id,
            job.node_type.as_str(),
            job.node_id,
            credits_units
        );
        Ok(artifact)
    }

    /// Terminal failure: no artifact, no transaction.
    pub async fn fail_job(&self, job: &Job, error_message: &str) {
        let mut jobs = self.jobs.write().await;
        let Some(stored) = jobs.get_mut(&job.id) else {
            tracing::warn!("Failing unknown job {}", job.id);
            return;
        };
        if stored.status.is_terminal() {
            tracing::warn!("Ignoring failure of already-terminal job {}", job.id);
            return;
        }
        stored.status = JobStatus::Failed;
        stored.error_message = Some(error_message.to_string());
        stored.completed_at = Some(chrono::Utc::now());
        tracing::warn!(
            "❌ Job {} failed: {} {}: {}",
            job.id,
            job.node_type.as_str(),
            job.node_id,
            error_message
        );
    }

    // ------------------------------------------------------------------
    // Read side for the polling surface
    // ------------------------------------------------------------------

    pub async fn get_run(&self, run_id: Uuid) -> Option<Run> {
        self.runs.read().await.get(&run_id).cloned()
    }

    pub async fn user_runs(&self, user_id: &str) -> Vec<Run> {
        let runs = self.runs.read().await;
        let mut result: Vec<Run> = runs
            .values()
            .filter(|run| run.user_id == user_id)
            .cloned()
            .collect();
        result.sort_by_key(|run| run.started_at);
        result
    }

    pub async fn get_job(&self, job_id: Uuid) -> Option<Job> {
        self.jobs.read().await.get(&job_id).cloned()
    }

    pub async fn run_jobs(&self, run_id: Uuid) -> Vec<Job> {
        let jobs = self.jobs.read().await;
        let mut result: Vec<Job> = jobs
            .values()
            .filter(|job| job.run_id == run_id)
            .cloned()
            .collect();
        result.sort_by_key(|job| job.created_at);
        result
    }

    pub async fn run_artifacts(&self, run_id: Uuid) -> Vec<Artifact> {
        let artifacts = self.artifacts.read().await;
        let mut result: Vec<Artifact> = artifacts
            .values()
            .filter(|artifact| artifact.run_id == run_id)
            .cloned()
            .collect();
        result.sort_by_key(|artifact| artifact.created_at);
        result
    }

    pub async fn artifacts_for_job(&self, job_id: Uuid) -> Vec<Artifact> {
        let artifacts = self.artifacts.read().await;
        artifacts
            .values()
            .filter(|artifact| artifact.job_id == job_id)
            .cloned()
            .collect()
    }
}

/// Drop null members from serialized adapter input, recursively.
fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_nulls).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ArtifactType, OutputSpec, RecommendedModels, ScenePlan};
    use serde_json::json;

    fn test_plan() -> WorkflowPlan {
        WorkflowPlan {
            scenes: vec![ScenePlan {
                id: "scene-1".to_string(),
                description: "a quiet harbor at dawn".to_string(),
                duration_seconds: 5.0,
                style: None,
                image_model: None,
                video_model: None,
            }],
            voiceover: None,
            estimated_credits: 5.4,
            models: RecommendedModels {
                image: "flux-schnell".to_string(),
                video: "kling-v1".to_string(),
                voiceover: "eleven-turbo-v2".to_string(),
            },
            output: OutputSpec::default(),
        }
    }

    fn tracker() -> (Arc<CreditLedger>, WorkTracker) {
        let ledger = Arc::new(CreditLedger::new());
        let tracker = WorkTracker::new(ledger.clone());
        (ledger, tracker)
    }

    #[tokio::test]
    async fn test_completed_job_has_exactly_one_artifact_and_one_charge() {
        let (ledger, tracker) = tracker();
        let run = tracker.create_run("u1", &test_plan()).await.unwrap();
        let job = tracker
            .begin_job(
                run.id,
                "u1",
                "scene-1",
                NodeType::Image,
                "fal",
                json!({"prompt": "a quiet harbor at dawn", "style": null}),
            )
            .await
            .unwrap();

        // Nulls are stripped from recorded input params
        assert!(job.input_params.get("style").is_none());

        let artifact = tracker
            .complete_job(
                &job,
                ArtifactDraft::new(ArtifactType::Image, "https://cdn.example/img.png"),
                2,
                None,
            )
            .await
            .unwrap();

        let stored = tracker.get_job(job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.credits_used, 2);
        assert_eq!(tracker.artifacts_for_job(job.id).await.len(), 1);
        assert_eq!(artifact.job_id, job.id);

        let tx = ledger.find(&format!("job-{}", job.id)).await.unwrap();
        assert_eq!(tx.amount_units, -2);
        assert_eq!(
            tracker.get_run(run.id).await.unwrap().credits_used,
            stored.credits_used
        );
    }

    #[tokio::test]
    async fn test_failed_job_has_no_artifact_and_no_charge() {
        let (ledger, tracker) = tracker();
        let run = tracker.create_run("u1", &test_plan()).await.unwrap();
        let job = tracker
            .begin_job(run.id, "u1", "scene-1", NodeType::Image, "fal", json!({}))
            .await
            .unwrap();

        tracker.fail_job(&job, "provider 500").await;

        let stored = tracker.get_job(job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("provider 500"));
        assert!(tracker.artifacts_for_job(job.id).await.is_empty());
        assert!(ledger.find(&format!("job-{}", job.id)).await.is_none());
        assert_eq!(ledger.balance_units("u1").await, 0);
    }

    #[tokio::test]
    async fn test_replayed_completion_does_not_double_charge() {
        let (ledger, tracker) = tracker();
        let run = tracker.create_run("u1", &test_plan()).await.unwrap();
        let job = tracker
            .begin_job(run.id, "u1", "scene-1", NodeType::Image, "fal", json!({}))
            .await
            .unwrap();

        let draft = ArtifactDraft::new(ArtifactType::Image, "https://cdn.example/img.png");
        tracker
            .complete_job(&job, draft.clone(), 2, None)
            .await
            .unwrap();
        // Crash-and-retry of completion posts with the same trans_no
        tracker.complete_job(&job, draft, 2, None).await.unwrap();

        assert_eq!(ledger.balance_units("u1").await, -2);
    }

    #[tokio::test]
    async fn test_mismatched_replay_is_fatal() {
        let (_ledger, tracker) = tracker();
        let run = tracker.create_run("u1", &test_plan()).await.unwrap();
        let job = tracker
            .begin_job(run.id, "u1", "scene-1", NodeType::Image, "fal", json!({}))
            .await
            .unwrap();

        let draft = ArtifactDraft::new(ArtifactType::Image, "https://cdn.example/img.png");
        tracker
            .complete_job(&job, draft.clone(), 2, None)
            .await
            .unwrap();

        let err = tracker.complete_job(&job, draft, 5, None).await.unwrap_err();
        assert!(matches!(err, WorkflowError::DuplicateTransaction(_)));
    }

    #[tokio::test]
    async fn test_run_terminal_states_are_sinks() {
        let (_ledger, tracker) = tracker();
        let run = tracker.create_run("u1", &test_plan()).await.unwrap();
        tracker.mark_run_running(run.id).await;
        tracker.fail_run(run.id, "scene-1 image failed").await;
        tracker.complete_run(run.id, "https://cdn.example/final.mp4").await;

        let stored = tracker.get_run(run.id).await.unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert!(stored.final_video_url.is_none());
        assert_eq!(stored.error_message.as_deref(), Some("scene-1 image failed"));
    }

    #[tokio::test]
    async fn test_begin_job_requires_an_existing_run() {
        let (_ledger, tracker) = tracker();
        let err = tracker
            .begin_job(Uuid::new_v4(), "u1", "scene-1", NodeType::Image, "fal", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::TrackingWriteFailure(_)));
    }
}
