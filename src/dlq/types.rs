//! DLQ types for rejected rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metrics::events::FailureStage;

/// A row (or a row of a failed batch) recorded in the DLQ.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedRow {
    /// Job the row belonged to.
    pub job_id: Uuid,
    /// 1-based data line, when the row could be located.
    pub line: Option<u64>,
    /// Stage at which the row was rejected.
    pub stage: FailureStage,
    /// Error message describing the rejection.
    pub error: String,
    /// When the rejection was recorded.
    pub timestamp: DateTime<Utc>,
}

impl RejectedRow {
    pub fn new(job_id: Uuid, line: Option<u64>, stage: FailureStage, error: String) -> Self {
        Self {
            job_id,
            line,
            stage,
            error,
            timestamp: Utc::now(),
        }
    }
}

/// Rejection counts by stage.
#[derive(Debug, Clone, Default)]
pub struct FailureStats {
    pub structural: usize,
    pub validation: usize,
    pub storage: usize,
}

impl FailureStats {
    pub fn increment(&mut self, stage: FailureStage) {
        match stage {
            FailureStage::Structural => self.structural += 1,
            FailureStage::Validation => self.validation += 1,
            FailureStage::Storage => self.storage += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.structural + self.validation + self.storage
    }
}
