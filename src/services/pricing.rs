// Credit pricing service
// One catalog, two callers: the planner estimates with these functions and
// the pipeline deducts with the same ones. If estimate and actual charge
// ever diverge, that is a correctness bug in this file, not a UX nuance.

use lazy_static::lazy_static;
use std::collections::HashMap;
use thiserror::Error;

use crate::models::WorkflowPlan;

/// Fixed-point unit of the ledger: 1 credit = 10 micro-units, giving costs
/// a 0.1-credit resolution with no float drift in stored amounts.
pub const UNITS_PER_CREDIT: i64 = 10;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PricingError {
    #[error("unknown model: {0}")]
    UnknownModel(String),
}

pub fn credits_to_units(credits: f64) -> i64 {
    (credits * UNITS_PER_CREDIT as f64).round() as i64
}

pub fn units_to_credits(units: i64) -> f64 {
    units as f64 / UNITS_PER_CREDIT as f64
}

lazy_static! {
    /// Micro-units per generated image.
    static ref IMAGE_RATES: HashMap<&'static str, i64> = {
        let mut m = HashMap::new();
        m.insert("flux-schnell", 2);
        m.insert("flux-dev", 5);
        m.insert("flux-pro", 10);
        m.insert("sdxl-lightning", 2);
        m
    };

    /// Micro-units per second of generated video.
    static ref VIDEO_RATES: HashMap<&'static str, i64> = {
        let mut m = HashMap::new();
        m.insert("kling-v1", 8);
        m.insert("kling-v1-pro", 15);
        m.insert("runway-gen3", 20);
        m.insert("ltx-video", 5);
        m
    };

    /// Micro-units per voiceover call.
    static ref VOICEOVER_RATES: HashMap<&'static str, i64> = {
        let mut m = HashMap::new();
        m.insert("eleven-multilingual-v2", 15);
        m.insert("eleven-turbo-v2", 8);
        m
    };
}

/// Flat micro-unit cost of one render/merge call.
const MERGE_UNITS: i64 = 10;

pub fn image_cost(model: &str) -> Result<i64, PricingError> {
    IMAGE_RATES
        .get(model)
        .copied()
        .ok_or_else(|| PricingError::UnknownModel(model.to_string()))
}

/// Video generation is billed per started second.
pub fn video_cost(model: &str, duration_seconds: f64) -> Result<i64, PricingError> {
    let rate = VIDEO_RATES
        .get(model)
        .copied()
        .ok_or_else(|| PricingError::UnknownModel(model.to_string()))?;
    let billed_seconds = duration_seconds.ceil().max(1.0) as i64;
    Ok(rate * billed_seconds)
}

pub fn voiceover_cost(model: &str) -> Result<i64, PricingError> {
    VOICEOVER_RATES
        .get(model)
        .copied()
        .ok_or_else(|| PricingError::UnknownModel(model.to_string()))
}

pub fn merge_cost() -> i64 {
    MERGE_UNITS
}

/// Total micro-unit cost of a plan, summed from the same per-stage
/// functions used for deduction. This is what `estimated_credits` must be
/// derived from.
pub fn estimate_plan(plan: &WorkflowPlan) -> Result<i64, PricingError> {
    let mut total = 0;
    for scene in &plan.scenes {
        total += image_cost(plan.image_model_for(scene))?;
        total += video_cost(plan.video_model_for(scene), scene.duration_seconds)?;
    }
    if let Some(model) = plan.voiceover_model() {
        total += voiceover_cost(model)?;
    }
    total += merge_cost();
    Ok(total)
}
