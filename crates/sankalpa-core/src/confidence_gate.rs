//! ============================================================================
//! Confidence Gate - Auto-commit vs. confirm
//! ============================================================================
//! Decides once per extraction result whether the batch can be saved as-is
//! or must be shown to the user first:
//! - every candidate at or above the threshold: save directly
//! - any candidate below it: the whole batch waits for confirmation
//!
//! There is no per-item accept/reject. A confirmed batch is saved unchanged
//! and never passes through the gate again.
//! ============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::HabitCandidate;

/// Candidates below this confidence trigger the confirmation step
pub const CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Inclusive pass mark: exactly this value auto-commits
    pub threshold: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            threshold: CONFIDENCE_THRESHOLD,
        }
    }
}

/// Result of checking a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateCheck {
    pub requires_confirmation: bool,
    /// Lowest confidence seen in the batch (1.0 for an empty batch)
    pub min_confidence: f64,
    /// Number of candidates under the threshold
    pub below_threshold: usize,
}

/// All-or-nothing confidence gate
#[derive(Debug, Clone, Default)]
pub struct ConfidenceGate {
    config: GateConfig,
}

impl ConfidenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Inspect a batch and report whether it needs confirmation
    pub fn check(&self, candidates: &[HabitCandidate]) -> GateCheck {
        let below_threshold = candidates
            .iter()
            .filter(|c| c.confidence < self.config.threshold)
            .count();
        let min_confidence = candidates
            .iter()
            .map(|c| c.confidence)
            .fold(1.0_f64, f64::min);

        let check = GateCheck {
            requires_confirmation: below_threshold > 0,
            min_confidence,
            below_threshold,
        };

        debug!(
            "Confidence gate: {} candidates, {} below {}, min {:.2} -> confirm={}",
            candidates.len(),
            below_threshold,
            self.config.threshold,
            min_confidence,
            check.requires_confirmation
        );

        check
    }

    /// Shorthand for `check(..).requires_confirmation`
    pub fn needs_confirmation(&self, candidates: &[HabitCandidate]) -> bool {
        self.check(candidates).requires_confirmation
    }
}
