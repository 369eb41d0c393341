// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use nix::sys::signal::Signal;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep};

use crate::process;
use crate::program::ProgramShared;
use crate::state::ProcessState;
use crate::supervisor::InstanceShared;

const LOG_TARGET: &str = "timer";

/// Polling period for start confirmation and stop escalation.
pub const POLL_INTERVAL: Duration = Duration::from_millis(4);

/// How long SIGKILL is retried before a stop is declared failed.
pub const KILL_CEILING: Duration = Duration::from_secs(5);

/// How a stop escalation ended. Exactly one is logged per escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The child exited within the grace period.
    Stopped,
    /// The child had to be killed.
    Killed,
    /// The child outlived the kill ceiling; it is no longer tracked.
    Failed,
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopOutcome::Stopped => write!(f, "stopped as expected"),
            StopOutcome::Killed => write!(f, "processus had been killed"),
            StopOutcome::Failed => write!(f, "didn't succeed to kill"),
        }
    }
}

pub(crate) enum TimerCommand {
    /// Promote the child to Started once it survived the start time.
    ConfirmStart { pid: u32, started_at: Instant },
    /// Deliver the stop signal and escalate to SIGKILL if needed.
    Escalate,
    /// Reply once every escalation queued before this command is over.
    AwaitEscalation(oneshot::Sender<Option<StopOutcome>>),
    Shutdown,
}

pub(crate) struct Timer {
    shared: Arc<InstanceShared>,
    program: Arc<ProgramShared>,
    commands: mpsc::UnboundedReceiver<TimerCommand>,
    last_outcome: Option<StopOutcome>,
}

impl Timer {
    pub(crate) fn new(
        shared: Arc<InstanceShared>,
        program: Arc<ProgramShared>,
        commands: mpsc::UnboundedReceiver<TimerCommand>,
    ) -> Self {
        Self {
            shared,
            program,
            commands,
            last_outcome: None,
        }
    }

    pub(crate) async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                TimerCommand::ConfirmStart { pid, started_at } => {
                    self.confirm_start(pid, started_at).await;
                }
                TimerCommand::Escalate => {
                    self.last_outcome = Some(self.escalate().await);
                }
                TimerCommand::AwaitEscalation(reply) => {
                    let _ = reply.send(self.last_outcome.take());
                }
                TimerCommand::Shutdown => break,
            }
        }
    }

    async fn confirm_start(&self, pid: u32, started_at: Instant) {
        let label = &self.shared.label;
        let start_time = self.program.spec().start_time;
        loop {
            let promoted = {
                let mut st = self.shared.lock();
                if !st.pending.is_none() {
                    // A stop request owns the instance now.
                    return;
                }
                if st.pid != pid || st.state != ProcessState::Starting {
                    Some(false)
                } else if started_at.elapsed() >= start_time {
                    st.set_state(ProcessState::Started);
                    Some(true)
                } else {
                    None
                }
            };
            match promoted {
                Some(true) => {
                    info!(target: LOG_TARGET, "[{label}] started correctly (pid={pid})");
                    return;
                }
                Some(false) => {
                    warn!(target: LOG_TARGET, "[{label}] didn't start correctly (pid={pid})");
                    return;
                }
                None => sleep(POLL_INTERVAL).await,
            }
        }
    }

    /// The child counts as alive until the launcher has reaped it.
    fn is_alive(&self, pid: u32) -> bool {
        pid != 0 && self.shared.lock().pid == pid
    }

    pub(crate) async fn escalate(&self) -> StopOutcome {
        let label = &self.shared.label;
        let spec = self.program.spec();
        let pid = self.shared.lock().pid;
        let stop_requested = self.program.stop_timestamp().unwrap_or_else(Instant::now);

        if pid != 0 {
            info!(
                target: LOG_TARGET,
                "[{label}] sending {} (pid={pid})",
                spec.stop_signal.as_str()
            );
            if let Err(e) = process::send_signal(pid, spec.stop_signal) {
                warn!(
                    target: LOG_TARGET,
                    "[{label}] failed to send {}: {e}",
                    spec.stop_signal.as_str()
                );
            }
        }

        while self.is_alive(pid) && stop_requested.elapsed() < spec.stop_time {
            sleep(POLL_INTERVAL).await;
        }

        let outcome = if !self.is_alive(pid) {
            StopOutcome::Stopped
        } else {
            warn!(
                target: LOG_TARGET,
                "[{label}] still alive after {}ms, sending SIGKILL",
                spec.stop_time.as_millis()
            );
            let kill_started = Instant::now();
            loop {
                let _ = process::send_signal(pid, Signal::SIGKILL);
                sleep(POLL_INTERVAL).await;
                if !self.is_alive(pid) {
                    break StopOutcome::Killed;
                }
                if kill_started.elapsed() >= KILL_CEILING {
                    break StopOutcome::Failed;
                }
            }
        };

        match outcome {
            StopOutcome::Failed => error!(target: LOG_TARGET, "[{label}] {outcome} (pid={pid})"),
            _ => info!(target: LOG_TARGET, "[{label}] {outcome}"),
        }

        {
            let mut st = self.shared.lock();
            if outcome == StopOutcome::Failed {
                st.abandoned = Some(pid);
            }
            st.last_stop = Some(outcome);
            st.set_state(ProcessState::Stopped);
        }
        if outcome == StopOutcome::Failed {
            self.shared.abandon.notify_one();
        }
        outcome
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::process::tests::sh;
    use crate::state::PendingEvent;
    use std::path::PathBuf;
    use std::sync::OnceLock;

    fn timer(script: &str, stop_time: Duration) -> Timer {
        labelled_timer("t:0", script, stop_time).0
    }

    fn labelled_timer(
        label: &str,
        script: &str,
        stop_time: Duration,
    ) -> (Timer, mpsc::UnboundedSender<TimerCommand>) {
        let mut spec = sh("t", script);
        spec.stop_time = stop_time;
        let program = Arc::new(ProgramShared::new(spec));
        let shared = Arc::new(InstanceShared::new(label.to_string()));
        let (tx, rx) = mpsc::unbounded_channel();
        (Timer::new(shared, program, rx), tx)
    }

    /// Log file shared by every test of this binary.
    fn test_log() -> &'static PathBuf {
        static LOG: OnceLock<PathBuf> = OnceLock::new();
        LOG.get_or_init(|| {
            let path = std::env::temp_dir()
                .join(format!("taskmaster-unit-{}.log", std::process::id()));
            taskmaster_log::init(&path, log::LevelFilter::Debug).unwrap();
            path
        })
    }

    fn count_log_lines(needle: &str) -> usize {
        std::fs::read_to_string(test_log())
            .unwrap_or_default()
            .lines()
            .filter(|line| line.contains(needle))
            .count()
    }

    fn sleeping_child() -> std::process::Child {
        std::process::Command::new("/bin/sleep").arg("30").spawn().unwrap()
    }

    #[test]
    fn test_outcome_messages() {
        assert_eq!(StopOutcome::Stopped.to_string(), "stopped as expected");
        assert_eq!(StopOutcome::Killed.to_string(), "processus had been killed");
        assert_eq!(StopOutcome::Failed.to_string(), "didn't succeed to kill");
    }

    #[tokio::test]
    async fn test_confirm_start_detects_early_exit() {
        let timer = timer("true", Duration::ZERO);
        {
            let mut st = timer.shared.lock();
            st.set_state(ProcessState::Starting);
            st.pid = 0;
        }
        timer.confirm_start(4242, Instant::now()).await;
        assert_eq!(timer.shared.lock().state, ProcessState::Starting);
    }

    #[tokio::test]
    async fn test_confirm_start_yields_to_stop_request() {
        let timer = timer("true", Duration::ZERO);
        {
            let mut st = timer.shared.lock();
            st.set_state(ProcessState::Starting);
            st.pid = 4242;
            st.pending = PendingEvent::StopRequested;
        }
        tokio::time::timeout(Duration::from_secs(1), timer.confirm_start(4242, Instant::now()))
            .await
            .unwrap();
        assert_eq!(timer.shared.lock().state, ProcessState::Starting);
    }

    /// The launcher never reaps this child, so it stays "alive" for the timer
    /// even after SIGKILL and the escalation must give up at the ceiling.
    #[tokio::test]
    async fn test_escalation_failure_after_kill_ceiling() {
        let mut child = sleeping_child();
        let pid = child.id();

        let timer = timer("true", Duration::from_millis(100));
        {
            let mut st = timer.shared.lock();
            st.set_state(ProcessState::Starting);
            st.pid = pid;
            st.set_state(ProcessState::Stopping);
            st.pending = PendingEvent::StopRequested;
        }
        timer.program.mark_stop_requested();

        let began = Instant::now();
        let outcome = timer.escalate().await;
        assert_eq!(outcome, StopOutcome::Failed);
        assert!(began.elapsed() >= KILL_CEILING);

        let st = timer.shared.lock();
        assert_eq!(st.state, ProcessState::Stopped);
        assert_eq!(st.abandoned, Some(pid));
        assert_eq!(st.last_stop, Some(StopOutcome::Failed));
        drop(st);

        child.wait().unwrap();
    }

    #[tokio::test]
    async fn test_escalation_failure_is_logged_once() {
        test_log();
        let mut child = sleeping_child();
        let pid = child.id();

        let (timer, commands) = labelled_timer("t-fail:0", "true", Duration::from_millis(50));
        let shared = Arc::clone(&timer.shared);
        {
            let mut st = shared.lock();
            st.set_state(ProcessState::Starting);
            st.pid = pid;
            st.set_state(ProcessState::Stopping);
            st.pending = PendingEvent::StopRequested;
        }
        timer.program.mark_stop_requested();
        let task = tokio::spawn(timer.run());

        commands.send(TimerCommand::Escalate).unwrap();
        let (reply, outcome) = oneshot::channel();
        commands.send(TimerCommand::AwaitEscalation(reply)).unwrap();
        assert_eq!(outcome.await.unwrap(), Some(StopOutcome::Failed));

        // The outcome is handed out once.
        let (reply, outcome) = oneshot::channel();
        commands.send(TimerCommand::AwaitEscalation(reply)).unwrap();
        assert_eq!(outcome.await.unwrap(), None);

        commands.send(TimerCommand::Shutdown).unwrap();
        task.await.unwrap();

        assert_eq!(count_log_lines("[t-fail:0] didn't succeed to kill"), 1);
        assert_eq!(count_log_lines("[t-fail:0] processus had been killed"), 0);
        assert_eq!(count_log_lines("[t-fail:0] stopped as expected"), 0);
        assert_eq!(shared.lock().state, ProcessState::Stopped);

        child.wait().unwrap();
    }

    #[tokio::test]
    async fn test_escalation_without_child_is_immediate() {
        let timer = timer("true", Duration::from_secs(10));
        timer.shared.lock().set_state(ProcessState::Starting);
        timer.shared.lock().set_state(ProcessState::Stopping);

        let outcome = tokio::time::timeout(Duration::from_secs(1), timer.escalate())
            .await
            .unwrap();
        assert_eq!(outcome, StopOutcome::Stopped);
        assert_eq!(timer.shared.lock().state, ProcessState::Stopped);
    }
}
