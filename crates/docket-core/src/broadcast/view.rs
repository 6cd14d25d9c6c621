use std::collections::BTreeMap;

use super::message::ProgressMessage;
use crate::tracker::JobId;

/// Consumer-side state of a matter's jobs, reconciled by revision.
///
/// Messages may arrive late, twice, or out of order; a message older than
/// what is already held for its job is ignored.
#[derive(Debug, Default)]
pub struct ProgressView {
    jobs: BTreeMap<JobId, ProgressMessage>,
}

impl ProgressView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a message; returns whether it replaced the held state.
    pub fn apply(&mut self, message: ProgressMessage) -> bool {
        match self.jobs.get(&message.job_id) {
            Some(held) if held.revision > message.revision => false,
            _ => {
                self.jobs.insert(message.job_id, message);
                true
            }
        }
    }

    pub fn get(&self, job_id: JobId) -> Option<&ProgressMessage> {
        self.jobs.get(&job_id)
    }

    /// Held messages ordered by job id.
    pub fn jobs(&self) -> impl Iterator<Item = &ProgressMessage> {
        self.jobs.values()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
