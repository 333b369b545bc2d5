//! # Upload Job
//!
//! Bounded retry state machine for one outbound transfer.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Created ──► Resolving ──► Downloading ──► Staging                     │
//! │                                               │                         │
//! │                                               ▼                         │
//! │                          ┌──────────► Uploading{n} ──success──► Uploaded│
//! │                          │                    │                         │
//! │                          │                 failure                      │
//! │                          │                    │                         │
//! │                          │        remaining -= 1                        │
//! │                          │                    │                         │
//! │                          └── remaining > 0 ◄──┤                         │
//! │                               (Failed{n})     │                         │
//! │                                        remaining == 0                   │
//! │                                               ▼                         │
//! │                                           Exhausted                     │
//! │                                                                         │
//! │  Pre-flight failures (missing or empty file) abort before Uploading    │
//! │  and never touch the attempt budget.                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::ErrorReport;
use crate::UPLOAD_ATTEMPT_BUDGET;

// =============================================================================
// States
// =============================================================================

/// Position of an upload job in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UploadState {
    Created,
    Resolving,
    Downloading,
    Staging,
    Uploading { attempt: u32 },
    Failed { attempt: u32 },
    Uploaded,
    Exhausted,
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Uploaded | UploadState::Exhausted)
    }
}

impl std::fmt::Display for UploadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadState::Created => write!(f, "created"),
            UploadState::Resolving => write!(f, "resolving"),
            UploadState::Downloading => write!(f, "downloading"),
            UploadState::Staging => write!(f, "staging"),
            UploadState::Uploading { attempt } => write!(f, "uploading (attempt {})", attempt),
            UploadState::Failed { attempt } => write!(f, "failed (attempt {})", attempt),
            UploadState::Uploaded => write!(f, "uploaded"),
            UploadState::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// What the caller should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Try again immediately.
    Retry { remaining: u32 },
    /// Budget spent; the job is terminal.
    Exhausted,
}

// =============================================================================
// Upload Job
// =============================================================================

/// One `send_file` request, from identifier to terminal outcome.
///
/// Jobs are not persisted; a job lost on restart is not resumed.
#[derive(Debug, Clone)]
pub struct UploadJob {
    file_id: String,
    target_folder: Option<String>,
    budget: u32,
    remaining_attempts: u32,
    remote_name: Option<String>,
    local_staging_path: Option<PathBuf>,
    state: UploadState,
    last_error: Option<ErrorReport>,
}

impl UploadJob {
    /// Creates a job with the default attempt budget.
    pub fn new(file_id: impl Into<String>, target_folder: Option<String>) -> Self {
        Self::with_budget(file_id, target_folder, UPLOAD_ATTEMPT_BUDGET)
    }

    /// Creates a job with an explicit attempt budget (at least one attempt).
    pub fn with_budget(
        file_id: impl Into<String>,
        target_folder: Option<String>,
        budget: u32,
    ) -> Self {
        let budget = budget.max(1);
        Self {
            file_id: file_id.into(),
            target_folder,
            budget,
            remaining_attempts: budget,
            remote_name: None,
            local_staging_path: None,
            state: UploadState::Created,
            last_error: None,
        }
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn target_folder(&self) -> Option<&str> {
        self.target_folder.as_deref()
    }

    pub fn remaining_attempts(&self) -> u32 {
        self.remaining_attempts
    }

    /// Attempts charged against the budget so far.
    pub fn attempts_consumed(&self) -> u32 {
        self.budget - self.remaining_attempts
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Name of the remote artifact, once resolved.
    pub fn remote_name(&self) -> Option<&str> {
        self.remote_name.as_deref()
    }

    pub fn local_staging_path(&self) -> Option<&Path> {
        self.local_staging_path.as_deref()
    }

    /// Detail of the most recent failed attempt.
    pub fn last_error(&self) -> Option<&ErrorReport> {
        self.last_error.as_ref()
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    pub fn begin_resolving(&mut self) -> CoreResult<()> {
        self.transition(UploadState::Created, UploadState::Resolving)
    }

    /// Records the resolved remote name and moves on to fetching content.
    pub fn begin_downloading(&mut self, remote_name: impl Into<String>) -> CoreResult<()> {
        self.transition(UploadState::Resolving, UploadState::Downloading)?;
        self.remote_name = Some(remote_name.into());
        Ok(())
    }

    pub fn begin_staging(&mut self, path: impl Into<PathBuf>) -> CoreResult<()> {
        self.transition(UploadState::Downloading, UploadState::Staging)?;
        self.local_staging_path = Some(path.into());
        Ok(())
    }

    /// Starts the next attempt and returns its 1-based number.
    pub fn begin_attempt(&mut self) -> CoreResult<u32> {
        let attempt = match self.state {
            UploadState::Staging => 1,
            UploadState::Failed { attempt } if self.remaining_attempts > 0 => attempt + 1,
            _ => return Err(self.invalid("uploading")),
        };
        self.state = UploadState::Uploading { attempt };
        Ok(attempt)
    }

    pub fn record_success(&mut self) -> CoreResult<()> {
        match self.state {
            UploadState::Uploading { .. } => {
                self.state = UploadState::Uploaded;
                Ok(())
            }
            _ => Err(self.invalid("uploaded")),
        }
    }

    /// Charges a failed attempt against the budget.
    pub fn record_failure(&mut self, report: ErrorReport) -> CoreResult<AttemptOutcome> {
        let attempt = match self.state {
            UploadState::Uploading { attempt } => attempt,
            _ => return Err(self.invalid("failed")),
        };

        self.remaining_attempts = self.remaining_attempts.saturating_sub(1);
        self.last_error = Some(report);

        if self.remaining_attempts > 0 {
            self.state = UploadState::Failed { attempt };
            Ok(AttemptOutcome::Retry {
                remaining: self.remaining_attempts,
            })
        } else {
            self.state = UploadState::Exhausted;
            Ok(AttemptOutcome::Exhausted)
        }
    }

    fn transition(&mut self, from: UploadState, to: UploadState) -> CoreResult<()> {
        if self.state != from {
            return Err(self.invalid(&to.to_string()));
        }
        self.state = to;
        Ok(())
    }

    fn invalid(&self, to: &str) -> CoreError {
        CoreError::InvalidTransition {
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorCode;

    fn staged_job() -> UploadJob {
        let mut job = UploadJob::new("file-1", Some("out".to_string()));
        job.begin_resolving().unwrap();
        job.begin_downloading("report.pdf").unwrap();
        job.begin_staging("/tmp/x").unwrap();
        job
    }

    fn failure(n: u32) -> ErrorReport {
        ErrorReport::new(ErrorCode::Upload, format!("put failed #{}", n))
    }

    #[test]
    fn test_new_job_has_full_budget() {
        let job = UploadJob::new("file-1", None);
        assert_eq!(job.remaining_attempts(), 3);
        assert_eq!(job.state(), UploadState::Created);
        assert_eq!(job.attempts_consumed(), 0);
    }

    #[test]
    fn test_fails_twice_then_succeeds() {
        let mut job = staged_job();

        assert_eq!(job.begin_attempt().unwrap(), 1);
        assert_eq!(
            job.record_failure(failure(1)).unwrap(),
            AttemptOutcome::Retry { remaining: 2 }
        );
        assert_eq!(job.begin_attempt().unwrap(), 2);
        assert_eq!(
            job.record_failure(failure(2)).unwrap(),
            AttemptOutcome::Retry { remaining: 1 }
        );
        assert_eq!(job.begin_attempt().unwrap(), 3);
        job.record_success().unwrap();

        assert_eq!(job.state(), UploadState::Uploaded);
        assert_eq!(job.attempts_consumed(), 2);
        assert_eq!(job.remaining_attempts(), 1);
    }

    #[test]
    fn test_three_failures_exhaust_budget() {
        let mut job = staged_job();
        for n in 1..=2 {
            job.begin_attempt().unwrap();
            job.record_failure(failure(n)).unwrap();
        }
        job.begin_attempt().unwrap();
        assert_eq!(
            job.record_failure(failure(3)).unwrap(),
            AttemptOutcome::Exhausted
        );

        assert_eq!(job.state(), UploadState::Exhausted);
        assert_eq!(job.last_error().unwrap().message, "put failed #3");
        // No fourth attempt.
        assert!(job.begin_attempt().is_err());
    }

    #[test]
    fn test_invalid_transitions() {
        let mut job = UploadJob::new("file-1", None);
        assert!(job.begin_attempt().is_err());
        assert!(job.begin_staging("/tmp/x").is_err());
        assert!(job.record_success().is_err());

        let err = job.begin_downloading("x").unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }

    #[test]
    fn test_resolution_records_name_and_path() {
        let job = staged_job();
        assert_eq!(job.remote_name(), Some("report.pdf"));
        assert_eq!(job.local_staging_path(), Some(Path::new("/tmp/x")));
        assert_eq!(job.target_folder(), Some("out"));
    }

    #[test]
    fn test_terminal_states() {
        assert!(UploadState::Uploaded.is_terminal());
        assert!(UploadState::Exhausted.is_terminal());
        assert!(!UploadState::Failed { attempt: 1 }.is_terminal());
    }
}
