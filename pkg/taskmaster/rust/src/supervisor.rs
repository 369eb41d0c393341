// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Per-instance supervision: a launcher task that owns the child process and
//! runs retry cycles, cooperating with a [`Timer`] task that confirms starts
//! and escalates stops.
//!
//! Both tasks and the dispatcher share one [`InstanceStatus`] behind a mutex.
//! The guard is never held across an await point. Control flows through
//! channels:
//!
//! - dispatcher -> launcher: [`Wake`] (begin a run cycle, or terminate while idle)
//! - launcher/dispatcher -> timer: [`TimerCommand`]
//! - timer -> launcher: a oneshot reply once a stop escalation is over, and the
//!   `abandon` notification when a child survived the kill ceiling.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::process::Child;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

use crate::error::SpawnError;
use crate::process::{self, ExitKind};
use crate::program::ProgramShared;
use crate::spec::AutoRestart;
use crate::state::{PendingEvent, ProcessState};
use crate::status::InstanceSnapshot;
use crate::timer::{StopOutcome, Timer, TimerCommand};

const LOG_TARGET: &str = "launcher";

/// Backoff grows by one unit per attempt already made in the run cycle.
pub const BACKOFF_UNIT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    Run,
    Exit,
}

/// Mutable state of one instance.
pub(crate) struct InstanceStatus {
    pub(crate) state: ProcessState,
    pub(crate) pending: PendingEvent,
    /// 0 while no child is running.
    pub(crate) pid: u32,
    pub(crate) restart_budget: u32,
    pub(crate) start_timestamp: Option<Instant>,
    /// The launcher owns a run cycle, or has been woken to begin one.
    pub(crate) in_cycle: bool,
    /// Pid the timer gave up on after the kill ceiling.
    pub(crate) abandoned: Option<u32>,
    pub(crate) last_stop: Option<StopOutcome>,
    #[cfg(test)]
    pub(crate) history: Vec<ProcessState>,
}

impl InstanceStatus {
    fn new() -> Self {
        Self {
            state: ProcessState::Stopped,
            pending: PendingEvent::None,
            pid: 0,
            restart_budget: 0,
            start_timestamp: None,
            in_cycle: false,
            abandoned: None,
            last_stop: None,
            #[cfg(test)]
            history: vec![ProcessState::Stopped],
        }
    }

    pub(crate) fn set_state(&mut self, next: ProcessState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            warn!(target: LOG_TARGET, "unexpected transition {} -> {next}", self.state);
        }
        self.state = next;
        #[cfg(test)]
        self.history.push(next);
    }
}

/// State shared by the launcher, the timer and the owning [`ProcessSupervisor`].
pub(crate) struct InstanceShared {
    pub(crate) label: String,
    status: Mutex<InstanceStatus>,
    /// Cuts a backoff sleep short when a request arrives.
    pub(crate) interrupt: Notify,
    /// Tells the launcher to stop waiting on a child the timer gave up on.
    pub(crate) abandon: Notify,
}

impl InstanceShared {
    pub(crate) fn new(label: String) -> Self {
        Self {
            label,
            status: Mutex::new(InstanceStatus::new()),
            interrupt: Notify::new(),
            abandon: Notify::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, InstanceStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the launcher and timer tasks of one instance.
pub struct ProcessSupervisor {
    rank: usize,
    shared: Arc<InstanceShared>,
    wake_tx: mpsc::UnboundedSender<Wake>,
    timer_tx: mpsc::UnboundedSender<TimerCommand>,
    tasks: Mutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
}

impl ProcessSupervisor {
    /// Spawn the launcher and timer tasks. The instance starts idle in Stopped.
    pub(crate) fn spawn(program: Arc<ProgramShared>, rank: usize) -> Self {
        let label = format!("{}:{rank}", program.spec().name);
        let shared = Arc::new(InstanceShared::new(label));
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();

        let timer = Timer::new(Arc::clone(&shared), Arc::clone(&program), timer_rx);
        let timer = tokio::spawn(timer.run());
        let launcher = Launcher {
            shared: Arc::clone(&shared),
            program,
            wake_rx,
            timer_tx: timer_tx.clone(),
        };
        let launcher = tokio::spawn(launcher.run());

        Self {
            rank,
            shared,
            wake_tx,
            timer_tx,
            tasks: Mutex::new(Some((launcher, timer))),
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn state(&self) -> ProcessState {
        self.shared.lock().state
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        let st = self.shared.lock();
        InstanceSnapshot {
            rank: self.rank,
            state: st.state,
            pid: st.pid,
            restart_budget: st.restart_budget,
        }
    }

    /// Outcome of the most recent stop escalation.
    pub fn last_stop_outcome(&self) -> Option<StopOutcome> {
        self.shared.lock().last_stop
    }

    /// Wake an idle instance. Returns false if it is running, tearing down,
    /// or already inside a run cycle with no stop pending.
    pub(crate) fn start(&self) -> bool {
        let mut st = self.shared.lock();
        if st.state != ProcessState::Stopped || st.pending == PendingEvent::ExitRequested {
            return false;
        }
        if st.in_cycle {
            // A stop not yet seen by the launcher is cancelled by a later start.
            if st.pending == PendingEvent::StopRequested {
                st.pending = PendingEvent::None;
                return true;
            }
            return false;
        }
        st.in_cycle = true;
        if self.wake_tx.send(Wake::Run).is_err() {
            st.in_cycle = false;
            return false;
        }
        true
    }

    /// Leave `event` for the launcher and start the stop escalation if a
    /// child is alive. Returns false when there was nothing to act on.
    pub(crate) fn request(&self, event: PendingEvent) -> bool {
        let mut st = self.shared.lock();
        let current = st.state;
        let acted = match current {
            ProcessState::Starting | ProcessState::Started => {
                st.pending = st.pending.merge(event);
                st.set_state(ProcessState::Stopping);
                let _ = self.timer_tx.send(TimerCommand::Escalate);
                true
            }
            ProcessState::Stopping => {
                st.pending = st.pending.merge(event);
                true
            }
            ProcessState::Stopped if st.in_cycle => {
                // Between two attempts: the launcher checks before forking again.
                st.pending = st.pending.merge(event);
                true
            }
            ProcessState::Stopped => match event {
                PendingEvent::RestartRequested => {
                    st.in_cycle = true;
                    self.wake_tx.send(Wake::Run).is_ok()
                }
                PendingEvent::ExitRequested => {
                    st.pending = PendingEvent::ExitRequested;
                    self.wake_tx.send(Wake::Exit).is_ok()
                }
                PendingEvent::StopRequested | PendingEvent::None => false,
            },
        };
        drop(st);
        if acted {
            self.shared.interrupt.notify_one();
        }
        acted
    }

    /// Wait for both tasks to finish. Call after requesting exit.
    pub(crate) async fn join(&self) {
        let tasks = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some((launcher, timer)) = tasks else {
            return;
        };
        if let Err(e) = launcher.await {
            error!(target: LOG_TARGET, "[{}] launcher task failed: {e}", self.label());
        }
        // The launcher normally sends this itself; repeat it in case it panicked.
        let _ = self.timer_tx.send(TimerCommand::Shutdown);
        if let Err(e) = timer.await {
            error!(target: LOG_TARGET, "[{}] timer task failed: {e}", self.label());
        }
    }

    #[cfg(test)]
    pub(crate) fn history(&self) -> Vec<ProcessState> {
        self.shared.lock().history.clone()
    }

    #[cfg(test)]
    pub(crate) fn is_idle(&self) -> bool {
        let st = self.shared.lock();
        st.state == ProcessState::Stopped && !st.in_cycle
    }
}

enum Attempt {
    /// A request arrived before the fork.
    Interrupted,
    Running {
        child: Child,
        pid: u32,
        started_at: Instant,
    },
    Failed(SpawnError),
    Fatal(SpawnError),
}

enum CycleEnd {
    Restart,
    Idle,
    Exit,
}

struct Launcher {
    shared: Arc<InstanceShared>,
    program: Arc<ProgramShared>,
    wake_rx: mpsc::UnboundedReceiver<Wake>,
    timer_tx: mpsc::UnboundedSender<TimerCommand>,
}

impl Launcher {
    async fn run(mut self) {
        'idle: while let Some(wake) = self.wake_rx.recv().await {
            if wake == Wake::Exit {
                break;
            }
            {
                let mut st = self.shared.lock();
                match st.pending {
                    PendingEvent::ExitRequested => break 'idle,
                    PendingEvent::StopRequested => {
                        // Stopped before the first fork.
                        st.pending = PendingEvent::None;
                        st.in_cycle = false;
                        debug!(
                            target: LOG_TARGET,
                            "[{}] stop requested before launch",
                            self.shared.label
                        );
                        continue 'idle;
                    }
                    PendingEvent::RestartRequested | PendingEvent::None => {
                        st.pending = PendingEvent::None;
                    }
                }
            }

            loop {
                self.run_cycle().await;
                match self.end_cycle() {
                    CycleEnd::Restart => {
                        info!(target: LOG_TARGET, "[{}] restarting on request", self.shared.label);
                    }
                    CycleEnd::Idle => continue 'idle,
                    CycleEnd::Exit => break 'idle,
                }
            }
        }
        let _ = self.timer_tx.send(TimerCommand::Shutdown);
        debug!(target: LOG_TARGET, "[{}] launcher terminated", self.shared.label);
    }

    fn end_cycle(&self) -> CycleEnd {
        let mut st = self.shared.lock();
        match st.pending {
            PendingEvent::ExitRequested => CycleEnd::Exit,
            PendingEvent::RestartRequested => {
                st.pending = PendingEvent::None;
                CycleEnd::Restart
            }
            PendingEvent::StopRequested | PendingEvent::None => {
                st.pending = PendingEvent::None;
                st.in_cycle = false;
                CycleEnd::Idle
            }
        }
    }

    async fn run_cycle(&mut self) {
        let label = self.shared.label.clone();
        let initial = self.program.spec().start_retries.saturating_add(1);
        self.shared.lock().restart_budget = initial;

        loop {
            let used = initial - self.shared.lock().restart_budget;
            if !self.backoff(BACKOFF_UNIT * used).await {
                return;
            }

            let exit = match self.attempt() {
                Attempt::Interrupted => return,
                Attempt::Fatal(e) => {
                    error!(target: LOG_TARGET, "[{label}] {e}, giving up");
                    return;
                }
                Attempt::Failed(e) => {
                    warn!(target: LOG_TARGET, "[{label}] {e}");
                    warn!(target: LOG_TARGET, "[{label}] didn't start correctly");
                    ExitKind::Unknown
                }
                Attempt::Running {
                    child,
                    pid,
                    started_at,
                } => {
                    info!(
                        target: LOG_TARGET,
                        "[{label}] launched (pid={pid}, attempt {}/{initial}, cmd={})",
                        used + 1,
                        self.program.spec().command_line()
                    );
                    let _ = self
                        .timer_tx
                        .send(TimerCommand::ConfirmStart { pid, started_at });
                    let exit = self.wait_child(child, pid).await;
                    if !self.record_exit(exit).is_none() {
                        self.await_escalation().await;
                        return;
                    }
                    exit
                }
            };

            if !self.should_retry(exit) {
                debug!(target: LOG_TARGET, "[{label}] run cycle over");
                return;
            }
            info!(
                target: LOG_TARGET,
                "[{label}] auto restart ({} attempt(s) left)",
                self.shared.lock().restart_budget
            );
        }
    }

    /// Sleep for `delay` unless a request shows up. Returns false on request.
    async fn backoff(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            if !self.shared.lock().pending.is_none() {
                return false;
            }
            if Instant::now() >= deadline {
                return true;
            }
            tokio::select! {
                _ = sleep_until(deadline) => {}
                _ = self.shared.interrupt.notified() => {}
            }
        }
    }

    /// Fork under the instance lock so a concurrent stop request either sees
    /// the child or prevents it.
    fn attempt(&self) -> Attempt {
        let mut st = self.shared.lock();
        if !st.pending.is_none() {
            return Attempt::Interrupted;
        }
        st.set_state(ProcessState::Starting);
        st.restart_budget = st.restart_budget.saturating_sub(1);
        match process::spawn(self.program.spec()) {
            Ok(child) => {
                let pid = child.id().unwrap_or(0);
                let started_at = Instant::now();
                st.pid = pid;
                st.start_timestamp = Some(started_at);
                Attempt::Running {
                    child,
                    pid,
                    started_at,
                }
            }
            Err(e) => {
                st.set_state(ProcessState::Stopped);
                if e.is_fatal() {
                    Attempt::Fatal(e)
                } else {
                    Attempt::Failed(e)
                }
            }
        }
    }

    async fn wait_child(&self, mut child: Child, pid: u32) -> ExitKind {
        loop {
            tokio::select! {
                res = child.wait() => {
                    return match res {
                        Ok(status) => ExitKind::from(status),
                        Err(e) => {
                            warn!(
                                target: LOG_TARGET,
                                "[{}] cannot wait on pid {pid}: {e}",
                                self.shared.label
                            );
                            ExitKind::Unknown
                        }
                    };
                }
                _ = self.shared.abandon.notified() => {
                    if self.shared.lock().abandoned == Some(pid) {
                        return ExitKind::Unknown;
                    }
                }
            }
        }
    }

    /// Clear the pid and, for an exit nobody asked for, move to Stopped.
    /// Returns the pending request seen at exit time.
    fn record_exit(&self, exit: ExitKind) -> PendingEvent {
        let spec = self.program.spec();
        let label = &self.shared.label;
        let (pending, was_started) = {
            let mut st = self.shared.lock();
            st.pid = 0;
            let was_started = st.state == ProcessState::Started;
            if st.pending.is_none() {
                st.set_state(ProcessState::Stopped);
            }
            (st.pending, was_started)
        };

        if !pending.is_none() {
            info!(target: LOG_TARGET, "[{label}] exited ({exit}) after {pending} request");
            return pending;
        }
        let verdict = if exit.is_expected(spec) {
            "expected"
        } else {
            "unexpected"
        };
        if was_started {
            info!(target: LOG_TARGET, "[{label}] exited ({exit}, {verdict})");
        } else {
            info!(target: LOG_TARGET, "[{label}] exited during start ({exit}, {verdict})");
        }
        pending
    }

    fn should_retry(&self, exit: ExitKind) -> bool {
        let spec = self.program.spec();
        let mut st = self.shared.lock();
        if spec.autorestart == AutoRestart::Unexpected && exit.is_expected(spec) {
            st.restart_budget = 0;
        }
        spec.autorestart != AutoRestart::Never && st.restart_budget > 0
    }

    async fn await_escalation(&self) -> Option<StopOutcome> {
        let (reply, done) = oneshot::channel();
        if self
            .timer_tx
            .send(TimerCommand::AwaitEscalation(reply))
            .is_err()
        {
            return None;
        }
        done.await.ok().flatten()
    }
}
