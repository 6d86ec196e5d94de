// lib.rs - Main library file that exports all modules
pub mod adapters;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod services;
pub mod shotstack_client;
pub mod workflow;

use std::sync::Arc;

use services::{CreditLedger, WorkTracker};
use workflow::Orchestrator;

// Re-export commonly used types for convenience
pub use errors::WorkflowError;
pub use workflow::RunOutcome;

/// Shared application state: the ledger, the tracker and the orchestrator
/// wired over them.
pub struct AppState {
    pub ledger: Arc<CreditLedger>,
    pub tracker: Arc<WorkTracker>,
    pub orchestrator: Orchestrator,
}
