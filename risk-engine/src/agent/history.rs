use std::collections::VecDeque;

use common::types::RiskAssessment;

/// Fixed-capacity assessment log; the oldest entry is evicted on overflow.
#[derive(Debug, Clone)]
pub struct AssessmentHistory {
    entries: VecDeque<RiskAssessment>,
    capacity: usize,
    evicted: u64,
}

impl AssessmentHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
        }
    }

    pub fn push(&mut self, assessment: RiskAssessment) {
        self.entries.push_back(assessment);

        if self.entries.len() > self.capacity {
            self.entries.pop_front();
            self.evicted += 1;
        }
    }

    /// Chronological (oldest first). With a limit, only the newest `limit`
    /// entries are returned, still oldest first.
    pub fn recent(&self, limit: Option<usize>) -> Vec<RiskAssessment> {
        let take = limit.unwrap_or(self.entries.len()).min(self.entries.len());
        self.entries
            .iter()
            .skip(self.entries.len() - take)
            .cloned()
            .collect()
    }

    pub fn latest(&self) -> Option<&RiskAssessment> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}
