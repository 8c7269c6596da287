//! Per-job outcomes of a batch run.

use std::fmt;

use steadfast_core::error::RetryError;

/// Identity of a job within one batch: its position in the input list.
///
/// Used only to correlate outcomes with inputs. Jobs complete in any order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub usize);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// How a single job ended.
#[derive(Debug)]
pub enum JobOutcome<T, E> {
    /// The job function eventually returned a value.
    Succeeded(T),
    /// The retry executor gave up; carries the last attempt's failure.
    Failed(RetryError<E>),
    /// The job future panicked.
    Panicked(String),
    /// The batch was cancelled before this job started.
    Skipped,
}

impl<T, E> JobOutcome<T, E> {
    /// Whether the job succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded(_))
    }

    /// Whether the job ran and did not succeed.
    pub fn is_failure(&self) -> bool {
        matches!(self, JobOutcome::Failed(_) | JobOutcome::Panicked(_))
    }

    /// Whether the job never started.
    pub fn is_skipped(&self) -> bool {
        matches!(self, JobOutcome::Skipped)
    }

    /// The success value, if any.
    pub fn value(&self) -> Option<&T> {
        match self {
            JobOutcome::Succeeded(value) => Some(value),
            _ => None,
        }
    }
}

/// Aggregated result of a batch run, indexed by [`JobId`].
#[derive(Debug)]
pub struct BatchReport<T, E> {
    outcomes: Vec<JobOutcome<T, E>>,
}

impl<T, E> BatchReport<T, E> {
    pub(crate) fn new(outcomes: Vec<JobOutcome<T, E>>) -> Self {
        Self { outcomes }
    }

    /// Number of jobs submitted.
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// Outcome of one job.
    pub fn outcome(&self, id: JobId) -> Option<&JobOutcome<T, E>> {
        self.outcomes.get(id.0)
    }

    /// All outcomes in input order.
    pub fn iter(&self) -> impl Iterator<Item = (JobId, &JobOutcome<T, E>)> {
        self.outcomes
            .iter()
            .enumerate()
            .map(|(idx, outcome)| (JobId(idx), outcome))
    }

    /// Successful jobs and their values.
    pub fn succeeded(&self) -> impl Iterator<Item = (JobId, &T)> {
        self.iter()
            .filter_map(|(id, outcome)| outcome.value().map(|value| (id, value)))
    }

    /// Jobs that ran and failed (including panics).
    pub fn failed(&self) -> impl Iterator<Item = (JobId, &JobOutcome<T, E>)> {
        self.iter().filter(|(_, outcome)| outcome.is_failure())
    }

    /// Count of successful jobs.
    pub fn success_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Count of failed jobs.
    pub fn failure_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failure()).count()
    }

    /// Count of jobs that never started.
    pub fn skipped_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_skipped()).count()
    }

    /// Whether every job ran (none were skipped by cancellation).
    pub fn is_complete(&self) -> bool {
        self.skipped_count() == 0
    }

    /// Consume the report, returning outcomes in input order.
    pub fn into_outcomes(self) -> Vec<JobOutcome<T, E>> {
        self.outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BatchReport<u32, std::io::Error> {
        BatchReport::new(vec![
            JobOutcome::Succeeded(10),
            JobOutcome::Failed(RetryError::Cancelled { attempts: 1 }),
            JobOutcome::Skipped,
            JobOutcome::Succeeded(30),
            JobOutcome::Panicked("boom".into()),
        ])
    }

    #[test]
    fn test_counts() {
        let report = sample();

        assert_eq!(report.total(), 5);
        assert_eq!(report.success_count(), 2);
        assert_eq!(report.failure_count(), 2);
        assert_eq!(report.skipped_count(), 1);
        assert!(!report.is_complete());
    }

    #[test]
    fn test_succeeded_keeps_job_ids() {
        let report = sample();
        let ok: Vec<(JobId, u32)> = report.succeeded().map(|(id, v)| (id, *v)).collect();

        assert_eq!(ok, vec![(JobId(0), 10), (JobId(3), 30)]);
        let failed: Vec<JobId> = report.failed().map(|(id, _)| id).collect();
        assert_eq!(failed, vec![JobId(1), JobId(4)]);
    }

    #[test]
    fn test_job_id_display() {
        assert_eq!(JobId(7).to_string(), "job-7");
    }
}
