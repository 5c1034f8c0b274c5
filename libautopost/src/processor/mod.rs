//! Run processor: drives a run's items through the pipeline on a worker task
//!
//! [`RunProcessor::start`] claims a pending run, spawns one worker for it and
//! returns a [`RunHandle`]. The handle pauses, resumes, and stops the worker
//! and can wait for it with a bounded timeout. Each processor drives at most
//! one run at a time; hosts wanting concurrent runs create more processors.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use libautopost::collaborators::mock::{MockDetails, MockGenerator, MockPublisher};
//! use libautopost::collaborators::Collaborators;
//! use libautopost::{Config, RunProcessor, StateStore, WaitOutcome};
//!
//! # async fn example(run_id: &str) -> libautopost::Result<()> {
//! let config = Config::load()?;
//! let store = StateStore::from_config(&config).await?;
//! let collaborators = Collaborators::new(
//!     Arc::new(MockDetails::new()),
//!     Arc::new(MockGenerator::new()),
//!     Arc::new(MockPublisher::new()),
//! );
//!
//! let processor = RunProcessor::new(store, collaborators, config.processor.clone());
//! let handle = processor.start(run_id).await?;
//! if let WaitOutcome::Finished(status) = handle.wait(config.processor.stop_timeout).await? {
//!     println!("Run finished: {}", status);
//! }
//! # Ok(())
//! # }
//! ```

pub mod control;
mod pipeline;

use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::collaborators::Collaborators;
use crate::config::ProcessorConfig;
use crate::error::{AutopostError, Result, RunError, StoreError};
use crate::rotation::AuthorRotator;
use crate::scheduling::ScheduleEngine;
use crate::store::{ClaimError, StateStore};
use crate::types::{ItemError, PipelineStep, Run, RunStatus};

use self::control::{ControlState, RunControl};
use self::pipeline::{ItemOutcome, ItemPipeline};

/// What a processor is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Idle,
    Running,
    Paused,
    /// Stop requested, worker not yet exited
    Stopped,
}

/// Result of waiting on a worker with a timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Finished(RunStatus),
    /// The worker is still busy, typically inside a collaborator call
    TimedOut,
}

pub struct RunProcessor {
    store: StateStore,
    pipeline: Arc<ItemPipeline>,
    engine: Arc<ScheduleEngine>,
    settings: ProcessorConfig,
    active: Mutex<Option<RunHandle>>,
}

impl RunProcessor {
    pub fn new(store: StateStore, collaborators: Collaborators, settings: ProcessorConfig) -> Self {
        Self::with_engine(store, collaborators, settings, Arc::new(ScheduleEngine::new()))
    }

    /// Use a specific schedule engine, e.g. a seeded one
    pub fn with_engine(
        store: StateStore,
        collaborators: Collaborators,
        settings: ProcessorConfig,
        engine: Arc<ScheduleEngine>,
    ) -> Self {
        let rotator = AuthorRotator::new(store.clone());
        let pipeline = ItemPipeline::new(collaborators, engine.clone(), rotator, &settings);
        Self {
            store,
            pipeline: Arc::new(pipeline),
            engine,
            settings,
            active: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<ScheduleEngine> {
        &self.engine
    }

    pub fn state(&self) -> ProcessorState {
        match self.current().map(|handle| handle.state()) {
            Some(ControlState::Running) => ProcessorState::Running,
            Some(ControlState::Paused) => ProcessorState::Paused,
            Some(ControlState::Stopped) => ProcessorState::Stopped,
            Some(ControlState::Finished) | None => ProcessorState::Idle,
        }
    }

    /// Handle of the run this processor is (or was last) driving
    pub fn current(&self) -> Option<RunHandle> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Claim a pending run and start processing it in the background.
    ///
    /// # Errors
    ///
    /// - `RunError::ProcessorBusy` if this processor still drives another run
    /// - `RunError::AlreadyActive` if another worker owns the run
    /// - `RunError::AlreadyFinished` if the run reached a terminal status
    /// - `StoreError::RunNotFound` if the run does not exist
    pub async fn start(&self, run_id: &str) -> Result<RunHandle> {
        let handle = RunHandle::new(run_id, self.store.clone(), self.settings.stop_timeout);

        {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(current) = active.as_ref() {
                if current.state() != ControlState::Finished {
                    return Err(RunError::ProcessorBusy(current.run_id().to_string()).into());
                }
            }
            *active = Some(handle.clone());
        }

        let run = match self.store.claim_run(run_id).await {
            Ok(run) => run,
            Err(e) => {
                self.release(&handle);
                return Err(match e {
                    ClaimError::NotPending(status) if status.is_terminal() => {
                        RunError::AlreadyFinished(run_id.to_string()).into()
                    }
                    ClaimError::NotPending(_) => RunError::AlreadyActive(run_id.to_string()).into(),
                    ClaimError::Store(e) => e,
                });
            }
        };

        info!(
            run_id = %run.id,
            user_id = %run.user_id,
            items = run.items.len(),
            "Run started"
        );

        let worker = Worker {
            run,
            store: self.store.clone(),
            pipeline: self.pipeline.clone(),
            engine: self.engine.clone(),
            control: handle.inner.control.clone(),
            item_delay: self.settings.item_delay,
            pause_poll: self.settings.pause_poll,
        };
        let join = tokio::spawn(worker.run());
        *handle.inner.worker.lock().await = Some(join);

        Ok(handle)
    }

    /// Pause the current run; returns false when there was nothing to pause
    pub async fn pause(&self) -> Result<bool> {
        match self.current() {
            Some(handle) => handle.pause().await,
            None => Ok(false),
        }
    }

    pub async fn resume(&self) -> Result<bool> {
        match self.current() {
            Some(handle) => handle.resume().await,
            None => Ok(false),
        }
    }

    pub async fn stop(&self) -> Result<bool> {
        match self.current() {
            Some(handle) => handle.stop().await,
            None => Ok(false),
        }
    }

    fn release(&self, handle: &RunHandle) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(&current.inner, &handle.inner))
        {
            *active = None;
        }
    }
}

/// Control surface for one started run
#[derive(Clone)]
pub struct RunHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    run_id: String,
    control: Arc<RunControl>,
    store: StateStore,
    stop_timeout: Duration,
    worker: tokio::sync::Mutex<Option<JoinHandle<RunStatus>>>,
}

impl RunHandle {
    fn new(run_id: &str, store: StateStore, stop_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                run_id: run_id.to_string(),
                control: Arc::new(RunControl::new()),
                store,
                stop_timeout,
                worker: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn state(&self) -> ControlState {
        self.inner.control.state()
    }

    /// Pause at the next item boundary. No-op unless running.
    pub async fn pause(&self) -> Result<bool> {
        if !self.inner.control.request_pause() {
            debug!(run_id = %self.inner.run_id, "Pause ignored, run is not running");
            return Ok(false);
        }
        self.persist_status(RunStatus::Paused).await?;
        info!(run_id = %self.inner.run_id, "Run paused");
        Ok(true)
    }

    /// No-op unless paused
    pub async fn resume(&self) -> Result<bool> {
        if !self.inner.control.request_resume() {
            debug!(run_id = %self.inner.run_id, "Resume ignored, run is not paused");
            return Ok(false);
        }
        self.persist_status(RunStatus::Running).await?;
        info!(run_id = %self.inner.run_id, "Run resumed");
        Ok(true)
    }

    /// Request a stop; the worker finishes its current item first
    pub async fn stop(&self) -> Result<bool> {
        if !self.inner.control.request_stop() {
            debug!(run_id = %self.inner.run_id, "Stop ignored, run already stopping");
            return Ok(false);
        }
        self.persist_status(RunStatus::Cancelled).await?;
        info!(run_id = %self.inner.run_id, "Run stop requested");
        Ok(true)
    }

    /// Wait up to `timeout` for the worker to exit
    pub async fn wait(&self, timeout: Duration) -> Result<WaitOutcome> {
        let mut worker = self.inner.worker.lock().await;

        let Some(join) = worker.as_mut() else {
            let run = self.inner.store.require_run(&self.inner.run_id).await?;
            return Ok(WaitOutcome::Finished(run.status));
        };

        let joined = tokio::time::timeout(timeout, join).await;
        match joined {
            Err(_) => {
                debug!(run_id = %self.inner.run_id, ?timeout, "Worker still busy");
                Ok(WaitOutcome::TimedOut)
            }
            Ok(Ok(status)) => {
                *worker = None;
                Ok(WaitOutcome::Finished(status))
            }
            Ok(Err(join_error)) => {
                *worker = None;
                error!(run_id = %self.inner.run_id, error = %join_error, "Run worker failed");
                Err(RunError::WorkerFailed {
                    run_id: self.inner.run_id.clone(),
                    message: join_error.to_string(),
                }
                .into())
            }
        }
    }

    /// Stop and wait for the worker, bounded by the configured stop timeout
    pub async fn stop_and_wait(&self) -> Result<WaitOutcome> {
        self.stop().await?;
        let outcome = self.wait(self.inner.stop_timeout).await?;
        if outcome == WaitOutcome::TimedOut {
            warn!(
                run_id = %self.inner.run_id,
                timeout = ?self.inner.stop_timeout,
                "Stop requested but worker has not exited yet"
            );
        }
        Ok(outcome)
    }

    /// A run that already reached a terminal status keeps it
    async fn persist_status(&self, status: RunStatus) -> Result<()> {
        match self.inner.store.update_status(&self.inner.run_id, status).await {
            Ok(_) => Ok(()),
            Err(AutopostError::Store(StoreError::InvalidTransition { from, .. })) => {
                debug!(
                    run_id = %self.inner.run_id,
                    current = %from,
                    requested = %status,
                    "Status not updated, run already finished"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Owns one run for the lifetime of its background task
struct Worker {
    run: Run,
    store: StateStore,
    pipeline: Arc<ItemPipeline>,
    engine: Arc<ScheduleEngine>,
    control: Arc<RunControl>,
    item_delay: Duration,
    pause_poll: Duration,
}

impl Worker {
    async fn run(self) -> RunStatus {
        let status = match self.process_items().await {
            Ok(status) => status,
            Err(e) => {
                self.control.finish();
                self.abort(&e).await;
                RunStatus::Failed
            }
        };
        self.engine.clear_run(&self.run.id);
        status
    }

    async fn process_items(&self) -> Result<RunStatus> {
        let run_id = self.run.id.as_str();
        let total = self.run.items.len();
        let mut progress = self.run.progress.clone();
        progress.total = total;

        for (index, item) in self.run.items.iter().enumerate() {
            if !self.control.checkpoint(self.pause_poll).await {
                info!(run_id, processed = progress.processed(), "Run stopped before next item");
                break;
            }

            progress.current_item_label = item.title.clone();
            progress.message = format!("Processing item {} of {}", index + 1, total);
            self.store.update_progress(run_id, &progress).await?;

            match self.pipeline.process_item(&self.run, item).await? {
                ItemOutcome::Published(results) => {
                    let published = results.len();
                    for result in results {
                        self.store.append_result(run_id, result).await?;
                    }
                    progress.completed += 1;
                    progress.message = format!("Published '{}' to {} profile(s)", item.title, published);
                }
                ItemOutcome::Failed(item_error) => {
                    warn!(
                        run_id,
                        item_id = %item.id,
                        step = %item_error.step,
                        error = %item_error.message,
                        "Item failed"
                    );
                    progress.message = format!("Failed '{}': {}", item.title, item_error.message);
                    self.store.append_error(run_id, item_error).await?;
                    progress.failed += 1;
                }
            }
            self.store.update_progress(run_id, &progress).await?;

            if index + 1 < total && !self.item_delay.is_zero() {
                sleep(self.item_delay).await;
            }
        }

        let status = match self.control.finish() {
            ControlState::Stopped => RunStatus::Cancelled,
            _ if total > 0 && progress.failed == total => RunStatus::Failed,
            _ => RunStatus::Completed,
        };

        progress.current_item_label.clear();
        progress.message = format!(
            "{} of {} published, {} failed",
            progress.completed, total, progress.failed
        );
        self.store.update_progress(run_id, &progress).await?;
        self.store.update_status(run_id, status).await?;

        info!(
            run_id,
            status = %status,
            completed = progress.completed,
            failed = progress.failed,
            "Run finished"
        );
        Ok(status)
    }

    /// Record a run-fatal error; both writes are best effort
    async fn abort(&self, cause: &AutopostError) {
        error!(run_id = %self.run.id, error = %cause, "Run aborted");

        let synthetic = ItemError {
            item_id: String::new(),
            item_title: String::new(),
            message: cause.to_string(),
            step: PipelineStep::Run,
            occurred_at: Utc::now(),
        };
        if let Err(e) = self.store.append_error(&self.run.id, synthetic).await {
            warn!(run_id = %self.run.id, error = %e, "Failed to record run error");
        }
        if let Err(e) = self.store.update_status(&self.run.id, RunStatus::Failed).await {
            warn!(run_id = %self.run.id, error = %e, "Failed to mark run as failed");
        }
    }
}
