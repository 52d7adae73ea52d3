//! Swap job submission and status polling.
//!
//! `JobPoller` drives one job at a time through
//! `Idle -> Submitted -> Polling -> Done | Failed`. Polling runs in a
//! spawned task that is aborted when the job finishes, when a new job is
//! submitted, on `cancel`, or when the poller is dropped.
//!
//! Every submission and cancellation advances an epoch. A status response
//! is applied only if the epoch is unchanged since the request was sent,
//! so a slow answer for an old job can never overwrite the state of a
//! newer one.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError};
use crate::config::{DEFAULT_MAX_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL_MS};

use super::job::{JobStatus, JobStatusResponse, SwapLink};

/// Buffer size for the swap event channel.
/// Events beyond this are dropped while the consumer lags; `state()`
/// always has the latest state.
const CHANNEL_BUFFER_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    /// `None` never gives up on a job
    pub max_attempts: Option<u32>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_attempts: Some(DEFAULT_MAX_POLL_ATTEMPTS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapState {
    Idle,
    Submitted { job_id: String },
    Polling { job_id: String, attempts: u32 },
    Done { job_id: String, links: Vec<SwapLink> },
    Failed { job_id: String, reason: String },
}

impl SwapState {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            SwapState::Idle => None,
            SwapState::Submitted { job_id }
            | SwapState::Polling { job_id, .. }
            | SwapState::Done { job_id, .. }
            | SwapState::Failed { job_id, .. } => Some(job_id),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SwapState::Done { .. } | SwapState::Failed { .. })
    }

    /// True while a swap is running (used to disable a new submission in a UI)
    pub fn is_processing(&self) -> bool {
        matches!(self, SwapState::Submitted { .. } | SwapState::Polling { .. })
    }
}

/// Notifications for whoever is displaying the swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapEvent {
    Submitted { job_id: String },
    Progress { job_id: String, status: JobStatus },
    Done { job_id: String, links: Vec<SwapLink> },
    /// The job ended without a result; `message` is fit for display
    Failed { job_id: String, message: String },
    /// One status check failed; polling continues
    PollMiss { job_id: String, message: String },
}

/// Identifies a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: String,
    pub epoch: u64,
}

/// What a single status check did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing is being polled
    Inactive,
    /// The job is still running
    Pending(JobStatus),
    Done(Vec<SwapLink>),
    /// The answer belonged to a job that has since been replaced
    Stale,
}

/// New state (if it changes), tick outcome and event for one status check
type Transition = (Option<SwapState>, Result<TickOutcome, ApiError>, SwapEvent);

struct PollerInner {
    state: SwapState,
    epoch: u64,
}

#[derive(Clone)]
struct PollDriver {
    api: ApiClient,
    config: PollConfig,
    inner: Arc<Mutex<PollerInner>>,
    events: mpsc::Sender<SwapEvent>,
}

pub struct JobPoller {
    driver: PollDriver,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl JobPoller {
    /// Create a poller and the receiver for its events
    pub fn new(api: ApiClient, config: PollConfig) -> (Self, mpsc::Receiver<SwapEvent>) {
        let (events, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let driver = PollDriver {
            api,
            config,
            inner: Arc::new(Mutex::new(PollerInner {
                state: SwapState::Idle,
                epoch: 0,
            })),
            events,
        };
        let poller = Self {
            driver,
            task: Mutex::new(None),
        };
        (poller, rx)
    }

    pub async fn state(&self) -> SwapState {
        self.driver.inner.lock().await.state.clone()
    }

    /// Submit a swap of two uploaded images and start polling it.
    ///
    /// Any job already being polled is abandoned. If the submission fails
    /// the poller stays idle and the error is returned; nothing is retried.
    pub async fn submit(
        &self,
        face_name: &str,
        target_name: &str,
        seed: Option<u64>,
    ) -> Result<JobHandle, ApiError> {
        let epoch = self.reset().await;

        let job_id = match self.driver.api.swap_generate(face_name, target_name, seed).await {
            Ok(job_id) => job_id,
            Err(e) => {
                warn!(error = %e, "Swap submission failed");
                return Err(e);
            }
        };

        {
            let mut inner = self.driver.inner.lock().await;
            if inner.epoch != epoch {
                debug!(job_id = %job_id, "Submission superseded before polling started");
                return Err(ApiError::Superseded { job_id });
            }
            inner.state = SwapState::Submitted {
                job_id: job_id.clone(),
            };
        }
        self.driver.emit(SwapEvent::Submitted {
            job_id: job_id.clone(),
        });

        {
            let mut inner = self.driver.inner.lock().await;
            if inner.epoch != epoch {
                return Err(ApiError::Superseded { job_id });
            }
            inner.state = SwapState::Polling {
                job_id: job_id.clone(),
                attempts: 0,
            };
        }

        let driver = self.driver.clone();
        let handle = tokio::spawn(async move { driver.run(epoch).await });
        if let Some(previous) = self.task.lock().await.replace(handle) {
            previous.abort();
        }

        debug!(job_id = %job_id, epoch, "Polling started");
        Ok(JobHandle { job_id, epoch })
    }

    /// Check the current job once.
    ///
    /// Runs the same check as the scheduled task, so a caller can force
    /// an immediate status update.
    pub async fn tick(&self) -> Result<TickOutcome, ApiError> {
        let epoch = self.driver.inner.lock().await.epoch;
        self.driver.tick(epoch).await
    }

    /// Stop polling and forget the current job
    pub async fn cancel(&self) {
        self.reset().await;
        debug!("Swap polling cancelled");
    }

    /// Abort the scheduled task, advance the epoch and go back to idle.
    async fn reset(&self) -> u64 {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
        let mut inner = self.driver.inner.lock().await;
        inner.epoch += 1;
        inner.state = SwapState::Idle;
        inner.epoch
    }
}

impl Drop for JobPoller {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

impl PollDriver {
    async fn run(self, epoch: u64) {
        loop {
            tokio::time::sleep(self.config.interval).await;

            match self.tick(epoch).await {
                Ok(TickOutcome::Pending(status)) => debug!(status = status.as_str(), "Job still running"),
                Ok(outcome) => debug!(?outcome, "Poll tick"),
                Err(e) => debug!(error = %e, "Poll tick reported an error"),
            }

            let inner = self.inner.lock().await;
            if inner.epoch != epoch || !matches!(inner.state, SwapState::Polling { .. }) {
                debug!(epoch, "Polling stopped");
                break;
            }
        }
    }

    async fn tick(&self, epoch: u64) -> Result<TickOutcome, ApiError> {
        let job_id = {
            let inner = self.inner.lock().await;
            if inner.epoch != epoch {
                return Ok(TickOutcome::Stale);
            }
            match &inner.state {
                SwapState::Polling { job_id, .. } => job_id.clone(),
                _ => return Ok(TickOutcome::Inactive),
            }
        };

        let polled = self.api.job_status(&job_id).await;

        let (result, event) = {
            let mut inner = self.inner.lock().await;
            if inner.epoch != epoch {
                debug!(job_id = %job_id, "Discarding status of a superseded job");
                return Ok(TickOutcome::Stale);
            }
            let attempts = match &mut inner.state {
                SwapState::Polling { attempts, .. } => {
                    *attempts += 1;
                    *attempts
                }
                _ => return Ok(TickOutcome::Inactive),
            };
            let (next, result, event) = self.apply(&job_id, attempts, polled);
            if let Some(next) = next {
                inner.state = next;
            }
            (result, event)
        };

        self.emit(event);
        result
    }

    /// Decide the transition for one status check.
    fn apply(
        &self,
        job_id: &str,
        attempts: u32,
        polled: Result<JobStatusResponse, ApiError>,
    ) -> Transition {
        let job_id = job_id.to_string();

        match polled.map(|status| (status.status, status)) {
            Ok((JobStatus::Done, status)) => match status.swap_result() {
                Ok(result) => {
                    info!(job_id = %job_id, links = result.links.len(), "Swap job done");
                    (
                        Some(SwapState::Done {
                            job_id: job_id.clone(),
                            links: result.links.clone(),
                        }),
                        Ok(TickOutcome::Done(result.links.clone())),
                        SwapEvent::Done {
                            job_id,
                            links: result.links,
                        },
                    )
                }
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "Finished job has an unreadable result");
                    self.fail(job_id, e)
                }
            },
            Ok((JobStatus::Failed, _)) => {
                warn!(job_id = %job_id, "Swap job failed");
                let error = ApiError::JobFailed {
                    job_id: job_id.clone(),
                };
                self.fail(job_id, error)
            }
            Ok((status, _)) => {
                if let Some(error) = self.timed_out(&job_id, attempts) {
                    return self.fail(job_id, error);
                }
                (
                    None,
                    Ok(TickOutcome::Pending(status)),
                    SwapEvent::Progress { job_id, status },
                )
            }
            Err(e) => {
                if let Some(error) = self.timed_out(&job_id, attempts) {
                    return self.fail(job_id, error);
                }
                warn!(job_id = %job_id, error = %e, "Job status check failed, will retry");
                let error = ApiError::TransientPoll {
                    job_id: job_id.clone(),
                    message: e.to_string(),
                };
                let event = SwapEvent::PollMiss {
                    job_id,
                    message: error.notification(),
                };
                (None, Err(error), event)
            }
        }
    }

    fn timed_out(&self, job_id: &str, attempts: u32) -> Option<ApiError> {
        match self.config.max_attempts {
            Some(max) if attempts >= max => {
                warn!(job_id, attempts, "Giving up on swap job");
                Some(ApiError::PollTimeout {
                    job_id: job_id.to_string(),
                    attempts,
                })
            }
            _ => None,
        }
    }

    fn fail(
        &self,
        job_id: String,
        error: ApiError,
    ) -> Transition {
        let message = error.notification();
        (
            Some(SwapState::Failed {
                job_id: job_id.clone(),
                reason: error.to_string(),
            }),
            Err(error),
            SwapEvent::Failed { job_id, message },
        )
    }

    /// Queue an event without waiting. Polling never stalls on a slow
    /// or absent consumer.
    fn emit(&self, event: SwapEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                debug!(?event, "Swap event dropped - receiver is not keeping up");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Swap event dropped - receiver closed");
            }
        }
    }
}
