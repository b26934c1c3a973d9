//! Ordered job groups run one at a time with a shared cancellation policy.

use std::{
    thread,
    time::{Duration, Instant},
};

use serde_json::json;
use uuid::Uuid;

use crate::{
    DEFAULT_POLL_INTERVAL,
    client::SharedApi,
    errors::{Error, Result, ValidationError},
    job::{CancelOutcome, Job, JobSpec, JobStatus},
};

/// Which jobs a sequence-wide cancel applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelScope {
    /// Every job not yet in a terminal state.
    AllActive,
    Running,
    Queued,
    Inactive,
    /// Only jobs currently in exactly this state.
    Exact(JobStatus),
}

impl CancelScope {
    fn matches(&self, status: JobStatus) -> bool {
        match self {
            CancelScope::AllActive => !status.is_terminal(),
            CancelScope::Running => status == JobStatus::Running,
            CancelScope::Queued => status == JobStatus::Queued,
            CancelScope::Inactive => status == JobStatus::Inactive,
            CancelScope::Exact(wanted) => status == *wanted,
        }
    }
}

/// Which jobs to collect logs from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogScope {
    /// Jobs that have started (not `INACTIVE` or `QUEUED`).
    All,
    Running,
    /// Jobs in a terminal state.
    Finished,
}

impl LogScope {
    fn matches(&self, status: JobStatus) -> bool {
        match self {
            LogScope::All => !matches!(status, JobStatus::Inactive | JobStatus::Queued),
            LogScope::Running => status == JobStatus::Running,
            LogScope::Finished => status.is_terminal(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub poll_interval: Duration,
    /// Cancel the rest of the sequence when a job fails to submit or ends in `ERROR`/`CANCELED`.
    pub cancel_on_error: bool,
    /// Log each poll at info level instead of debug.
    pub verbose: bool,
    /// Give up on a job that has not finished after this long. `None` waits forever.
    pub max_wait: Option<Duration>,
    /// Tag each submitted job with `part_of`/`preceded_by`/`followed_by` metadata.
    pub tag_metadata: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel_on_error: true,
            verbose: false,
            max_wait: None,
            tag_metadata: false,
        }
    }
}

impl RunOptions {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_cancel_on_error(mut self, cancel_on_error: bool) -> Self {
        self.cancel_on_error = cancel_on_error;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    pub fn with_tag_metadata(mut self, tag_metadata: bool) -> Self {
        self.tag_metadata = tag_metadata;
        self
    }
}

/// How one job in a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed(JobStatus),
    SubmitFailed { status: u16, body: String },
    /// Did not reach the server's terminal state for another reason: a
    /// rejected validation, a transport error, or an unknown status code.
    Failed(String),
    TimedOut,
    NotRun,
}

impl JobOutcome {
    pub fn is_failure(&self) -> bool {
        match self {
            JobOutcome::Completed(status) => status.is_failure(),
            JobOutcome::SubmitFailed { .. } | JobOutcome::Failed(_) | JobOutcome::TimedOut => {
                true
            }
            JobOutcome::NotRun => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceReport {
    pub outcomes: Vec<JobOutcome>,
    /// The run stopped before reaching every job.
    pub stopped_early: bool,
}

impl SequenceReport {
    pub fn succeeded(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| *o == JobOutcome::Completed(JobStatus::Success))
    }
}

/// Status of one job in a sequence status report.
#[derive(Debug)]
pub struct JobStatusEntry {
    pub name: String,
    pub status: Result<JobStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLogs {
    pub title: String,
    pub lines: Vec<Vec<String>>,
}

#[derive(Debug)]
pub struct Sequence {
    id: String,
    jobs: Vec<Job>,
}

impl Sequence {
    pub fn new(jobs: Vec<Job>) -> Self {
        Self {
            id: unique_id(),
            jobs,
        }
    }

    /// Build every job up front; the first job that fails to resolve aborts.
    pub fn from_specs(api: SharedApi, specs: &[JobSpec]) -> Result<Self> {
        let jobs = specs
            .iter()
            .map(|spec| Job::new(api.clone(), spec))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(jobs))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Submit each job in order and block until it finishes before moving on.
    pub fn run(&mut self, options: &RunOptions) -> Result<SequenceReport> {
        if options.poll_interval.is_zero() {
            return Err(Error::Validation(
                ValidationError::new("poll interval must be positive").with_field("poll_interval"),
            ));
        }

        let mut outcomes = vec![JobOutcome::NotRun; self.jobs.len()];
        let mut stopped_early = false;

        for idx in 0..self.jobs.len() {
            let outcome = self.run_job(idx, options);

            // A job abandoned by the client may still be active on the server;
            // it is canceled before anything else is submitted.
            if matches!(outcome, JobOutcome::TimedOut | JobOutcome::Failed(_)) {
                self.cancel_job(idx);
            }

            let failed = outcome.is_failure();
            #[cfg(feature = "tracing")]
            if failed {
                tracing::warn!(
                    sequence = %self.id,
                    job = self.jobs[idx].title(),
                    outcome = ?outcome,
                    "job failed"
                );
            }
            outcomes[idx] = outcome;

            if failed && options.cancel_on_error {
                #[cfg(feature = "tracing")]
                tracing::info!(sequence = %self.id, "canceling remaining jobs in sequence");
                self.cancel_where(CancelScope::AllActive, Some(idx));
                stopped_early = idx + 1 < self.jobs.len();
                break;
            }
        }

        Ok(SequenceReport {
            outcomes,
            stopped_early,
        })
    }

    /// Submit one job and wait for it. Errors become [`JobOutcome::Failed`]
    /// so the run policy applies to them like any other failure.
    fn run_job(&mut self, idx: usize, options: &RunOptions) -> JobOutcome {
        let resp = match self.jobs[idx].submit() {
            Ok(resp) => resp,
            Err(err) => return JobOutcome::Failed(err.to_string()),
        };
        if !resp.is_success() {
            return JobOutcome::SubmitFailed {
                status: resp.status,
                body: resp.body,
            };
        }
        if options.tag_metadata {
            self.tag_metadata(idx);
        }
        self.wait_for(idx, options)
            .unwrap_or_else(|err| JobOutcome::Failed(err.to_string()))
    }

    fn wait_for(&mut self, idx: usize, options: &RunOptions) -> Result<JobOutcome> {
        let started = Instant::now();
        let job = &mut self.jobs[idx];

        loop {
            let status = job.status()?;
            #[cfg(feature = "tracing")]
            if options.verbose {
                tracing::info!(job = job.title(), status = %status, "polled job");
            } else {
                tracing::debug!(job = job.title(), status = %status, "polled job");
            }
            if status.is_terminal() {
                return Ok(JobOutcome::Completed(status));
            }
            if let Some(max_wait) = options.max_wait {
                if started.elapsed() >= max_wait {
                    return Ok(JobOutcome::TimedOut);
                }
            }
            thread::sleep(options.poll_interval);
        }
    }

    /// Best-effort cancel of a single job. Unsubmitted jobs make no call.
    fn cancel_job(&self, idx: usize) {
        let job = &self.jobs[idx];
        if let Err(_err) = job.cancel() {
            #[cfg(feature = "tracing")]
            tracing::warn!(job = job.title(), error = %_err, "cancel request failed");
        }
    }

    /// Best-effort: failures are logged and ignored.
    fn tag_metadata(&self, idx: usize) {
        let job = &self.jobs[idx];
        let preceded_by = idx
            .checked_sub(1)
            .and_then(|prev| self.jobs[prev].job_id())
            .unwrap_or_default();
        let followed_by = self
            .jobs
            .get(idx + 1)
            .map(|next| next.plugin_id())
            .unwrap_or_default();
        let metadata = json!({
            "part_of": self.id,
            "preceded_by": preceded_by,
            "followed_by": followed_by,
        });

        match job.tag_metadata(&metadata) {
            Ok(resp) if resp.is_success() => {}
            #[cfg(feature = "tracing")]
            Ok(resp) => {
                tracing::warn!(status = resp.status, job = job.title(), "metadata tagging rejected")
            }
            #[cfg(feature = "tracing")]
            Err(err) => tracing::warn!(error = %err, job = job.title(), "metadata tagging failed"),
            #[cfg(not(feature = "tracing"))]
            _ => {}
        }
    }

    /// Current status of every job. A failed status read is reported in its
    /// entry and does not stop the report.
    pub fn status(&mut self) -> Vec<JobStatusEntry> {
        self.jobs
            .iter_mut()
            .map(|job| JobStatusEntry {
                name: job.title().to_string(),
                status: job.status(),
            })
            .collect()
    }

    /// Cancel jobs whose current status matches `scope`. Jobs whose status
    /// cannot be read, or whose cancel request fails, are skipped.
    pub fn cancel(&mut self, scope: CancelScope) -> Vec<CancelOutcome> {
        self.cancel_where(scope, None)
    }

    fn cancel_where(&mut self, scope: CancelScope, except: Option<usize>) -> Vec<CancelOutcome> {
        let mut outcomes = Vec::new();
        for (idx, job) in self.jobs.iter_mut().enumerate() {
            if Some(idx) == except {
                continue;
            }
            let Some(status) = readable_status(job) else {
                continue;
            };
            if !scope.matches(status) {
                continue;
            }
            match job.cancel() {
                Ok(outcome) => outcomes.push(outcome),
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(job = job.title(), error = %_err, "cancel request failed");
                }
            }
        }
        outcomes
    }

    /// Logs of jobs whose current status matches `scope`. Jobs whose status
    /// or logs cannot be read are skipped.
    pub fn logs(&mut self, scope: LogScope) -> Vec<JobLogs> {
        let mut logs = Vec::new();
        for job in &mut self.jobs {
            let Some(status) = readable_status(job) else {
                continue;
            };
            if !scope.matches(status) {
                continue;
            }
            match job.logs() {
                Ok(lines) => logs.push(JobLogs {
                    title: job.title().to_string(),
                    lines,
                }),
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(job = job.title(), error = %_err, "skipping job with unreadable logs");
                }
            }
        }
        logs
    }
}

fn readable_status(job: &mut Job) -> Option<JobStatus> {
    match job.status() {
        Ok(status) => Some(status),
        Err(_err) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(job = job.title(), error = %_err, "skipping job with unreadable status");
            None
        }
    }
}

/// 24 hex characters, the width of a Girder object id.
fn unique_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(24);
    id
}
