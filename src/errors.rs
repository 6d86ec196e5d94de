// src/errors.rs
//! Error taxonomy for the generation pipeline.
//! Any stage failure becomes the run's terminal error message; nothing in
//! this core retries automatically.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkflowError {
    /// Pre-flight affordability check failed. No run is created.
    #[error("insufficient credits: need {needed_units} units, balance is {available_units}")]
    InsufficientCredits {
        needed_units: i64,
        available_units: i64,
    },

    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// A generation adapter call failed. Stage-local, aborts the run.
    #[error("{stage} adapter failed: {message}")]
    AdapterFailure {
        stage: &'static str,
        message: String,
    },

    /// A job/artifact/ledger bookkeeping write failed. Fatal: money must
    /// never be spent for untracked work, and a produced artifact must
    /// never go uncharged.
    #[error("tracking write failed: {0}")]
    TrackingWriteFailure(String),

    #[error("render submission failed: {0}")]
    RenderSubmission(String),

    #[error("render timed out after {attempts} polls")]
    RenderTimeout { attempts: u32 },

    #[error("render reported done without an output url")]
    MissingRenderUrl,

    #[error("render vendor failure: {0}")]
    RenderVendorFailure(String),

    /// An idempotency key collided with an existing transaction whose
    /// amount does not match. A matching replay is tolerated upstream and
    /// never surfaces as this error.
    #[error("duplicate credit transaction: {0}")]
    DuplicateTransaction(String),

    #[error("run not found")]
    RunNotFound,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<crate::services::pricing::PricingError> for WorkflowError {
    fn from(err: crate::services::pricing::PricingError) -> Self {
        match err {
            crate::services::pricing::PricingError::UnknownModel(model) => {
                WorkflowError::UnknownModel(model)
            }
        }
    }
}
