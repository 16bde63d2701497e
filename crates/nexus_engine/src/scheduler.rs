//! Watch-mode build loop.
//!
//! File-change callbacks feed an unbounded channel. A single task consumes
//! it, so at most one build is ever in flight; events arriving meanwhile are
//! merged into the next rebuild.

use std::collections::BTreeSet;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::emitter::{BuildResult, HotUpdate};
use crate::error::BuildError;
use crate::session::BuildSession;
use crate::store::{FileStore, WatchGuard};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Building,
    Watching,
    Stopped,
}

/// Delivers hot updates to live runtimes.
pub trait HotUpdateTransport: Send + Sync {
    fn push(&self, updates: &[HotUpdate]);
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildTrigger {
    Initial,
    Changes(Vec<PathBuf>),
}

pub trait BuildReporter: Send + Sync {
    fn on_build_started(&self, _trigger: &BuildTrigger) {}

    fn on_build_finished(&self, _result: &BuildResult) {}

    fn on_build_failed(&self, _error: &BuildError) {}

    /// A started rebuild was dropped because newer changes arrived.
    fn on_build_superseded(&self, _pending: usize) {}
}

/// Reports through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReporter;

impl BuildReporter for TracingReporter {
    fn on_build_started(&self, trigger: &BuildTrigger) {
        match trigger {
            BuildTrigger::Initial => tracing::info!("Initial build started"),
            BuildTrigger::Changes(paths) => tracing::info!("Rebuilding after {} changed paths", paths.len()),
        }
    }

    fn on_build_finished(&self, result: &BuildResult) {
        for warning in &result.diagnostics {
            tracing::warn!("{}", warning);
        }
        tracing::info!("Build ready: {} files", result.artifacts.len());
    }

    fn on_build_failed(&self, error: &BuildError) {
        tracing::error!("{}", error);
    }

    fn on_build_superseded(&self, pending: usize) {
        tracing::debug!("Discarding superseded rebuild, {} paths pending", pending);
    }
}

/// Transport that drops every update.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTransport;

impl HotUpdateTransport for NoopTransport {
    fn push(&self, _updates: &[HotUpdate]) {}
}

#[derive(Clone)]
pub struct SchedulerHandle {
    events: mpsc::UnboundedSender<Vec<PathBuf>>,
    stop: Arc<watch::Sender<bool>>,
    state: watch::Receiver<SchedulerState>,
}

impl SchedulerHandle {
    /// Queue a change event. Returns false once the scheduler has exited.
    pub fn notify(&self, paths: Vec<PathBuf>) -> bool {
        self.events.send(paths).is_ok()
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<Vec<PathBuf>> {
        self.events.clone()
    }

    /// Subscribe `store` change notifications for `paths` to this scheduler.
    pub fn watch(&self, store: &dyn FileStore, paths: &[PathBuf]) -> io::Result<WatchGuard> {
        let events = self.events.clone();
        store.watch(
            paths,
            Arc::new(move |changed| {
                let _ = events.send(changed);
            }),
        )
    }

    /// Finish the in-flight build, if any, and exit.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.clone()
    }

    /// Wait until the scheduler enters `target`. False if it exited first.
    pub async fn wait_for(&self, target: SchedulerState) -> bool {
        let mut state = self.state.clone();
        let reached = match state.wait_for(|s| *s == target || *s == SchedulerState::Stopped).await {
            Ok(current) => *current == target,
            Err(_) => false,
        };
        reached
    }
}

pub struct WatchScheduler {
    session: BuildSession,
    transport: Arc<dyn HotUpdateTransport>,
    reporter: Arc<dyn BuildReporter>,
}

impl WatchScheduler {
    pub fn new(
        session: BuildSession,
        transport: Arc<dyn HotUpdateTransport>,
        reporter: Arc<dyn BuildReporter>,
    ) -> Self {
        Self {
            session,
            transport,
            reporter,
        }
    }

    /// Start the loop. The join handle yields the session back once stopped.
    pub fn spawn(self) -> (SchedulerHandle, JoinHandle<BuildSession>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(SchedulerState::Idle);

        let handle = SchedulerHandle {
            events: events_tx,
            stop: Arc::new(stop_tx),
            state: state_rx,
        };
        let task = tokio::spawn(self.run(events_rx, stop_rx, state_tx));
        (handle, task)
    }

    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<Vec<PathBuf>>,
        mut stop: watch::Receiver<bool>,
        state: watch::Sender<SchedulerState>,
    ) -> BuildSession {
        state.send_replace(SchedulerState::Building);
        self.reporter.on_build_started(&BuildTrigger::Initial);
        match self.session.build().await {
            Ok(result) => self.reporter.on_build_finished(&result),
            Err(e) => self.reporter.on_build_failed(&e),
        }

        let mut pending: BTreeSet<PathBuf> = BTreeSet::new();
        while !*stop.borrow_and_update() {
            state.send_replace(SchedulerState::Watching);

            if pending.is_empty() {
                tokio::select! {
                    biased;
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow_and_update() {
                            break;
                        }
                        continue;
                    }
                    received = events.recv() => match received {
                        Some(paths) => pending.extend(paths),
                        None => break,
                    },
                }
            }
            drain(&mut events, &mut pending);
            if *stop.borrow() {
                break;
            }

            let changed: Vec<PathBuf> = std::mem::take(&mut pending).into_iter().collect();
            state.send_replace(SchedulerState::Building);
            self.reporter.on_build_started(&BuildTrigger::Changes(changed.clone()));
            let outcome = self.session.rebuild(&changed).await;

            // Last result wins at the emit boundary. Modules changed by a
            // discarded rebuild stay pending in the graph's change set.
            drain(&mut events, &mut pending);
            if !pending.is_empty() && !*stop.borrow() {
                self.reporter.on_build_superseded(pending.len());
                continue;
            }

            match outcome.and_then(|_| self.session.emit()) {
                Ok(result) => {
                    let updates = self.session.take_hot_updates();
                    if !updates.is_empty() {
                        self.transport.push(&updates);
                    }
                    self.reporter.on_build_finished(&result);
                }
                Err(e) => self.reporter.on_build_failed(&e),
            }
        }

        state.send_replace(SchedulerState::Stopped);
        tracing::info!("Watch scheduler stopped");
        self.session
    }
}

fn drain(events: &mut mpsc::UnboundedReceiver<Vec<PathBuf>>, pending: &mut BTreeSet<PathBuf>) {
    while let Ok(paths) = events.try_recv() {
        pending.extend(paths);
    }
}
