//! Partial-progress bookkeeping stored in the job's `metadata` column.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::types::StageName;
use super::units::UnitSet;

/// Backoff currently in effect for a unit, so observers can show
/// "waiting, retry in Ns".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffNote {
    pub stage: StageName,
    pub unit: u64,
    pub attempt: u32,
    pub delay_secs: f64,
    /// Unix seconds at which the unit will be retried.
    pub until: i64,
}

/// Outcome of the last linker run for the job's document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSummary {
    pub chunks_linked: usize,
    pub total_chunks: usize,
    pub boxes_scanned: usize,
    pub timed_out: bool,
}

/// Schema-flexible job metadata.
///
/// Only grows while a job is retried: completed units and stages are never
/// removed, so a retried stage skips everything already recorded here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub units: BTreeMap<StageName, UnitSet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub completed_stages: Vec<StageName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<BackoffNote>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linker: Option<LinkSummary>,
    /// Keys written by embedding applications; preserved verbatim.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One incremental update to a job's progress.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressPatch {
    /// Units of `stage` that finished; unioned into the stored set.
    CompletedUnits { stage: StageName, units: UnitSet },
    /// Fraction (0.0..=1.0) of the current stage done; drives `progress_pct`.
    StageFraction { stage: StageName, fraction: f64 },
    Backoff(BackoffNote),
    ClearBackoff,
    Linker(LinkSummary),
    Extra { key: String, value: serde_json::Value },
}

impl JobProgress {
    pub fn completed_units(&self, stage: StageName) -> Option<&UnitSet> {
        self.units.get(&stage)
    }

    pub fn is_stage_complete(&self, stage: StageName) -> bool {
        self.completed_stages.contains(&stage)
    }

    pub fn mark_stage_complete(&mut self, stage: StageName) {
        if !self.is_stage_complete(stage) {
            self.completed_stages.push(stage);
        }
    }

    /// Apply a metadata patch. `StageFraction` does not touch metadata; the
    /// tracker turns it into a percentage.
    pub fn apply(&mut self, patch: &ProgressPatch) {
        match patch {
            ProgressPatch::CompletedUnits { stage, units } => {
                self.units.entry(*stage).or_default().union_with(units);
            }
            ProgressPatch::StageFraction { .. } => {}
            ProgressPatch::Backoff(note) => self.backoff = Some(note.clone()),
            ProgressPatch::ClearBackoff => self.backoff = None,
            ProgressPatch::Linker(summary) => self.linker = Some(summary.clone()),
            ProgressPatch::Extra { key, value } => {
                self.extra.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Progress percentage for `completed` of `total` stages plus a fraction of
/// the running one. Never reaches 100; only completion does that.
pub fn stage_progress_pct(completed: u32, total: u32, fraction: f64) -> u8 {
    if total == 0 {
        return 0;
    }
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let pct = ((completed as f64 + fraction) * 100.0 / total as f64).floor();
    pct.clamp(0.0, 99.0) as u8
}
