// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// No child, or between two attempts of a run cycle.
    Stopped,
    /// Child forked, start time not reached yet.
    Starting,
    /// Child stayed alive for the whole start time.
    Started,
    /// Stop escalation in progress.
    Stopping,
}

impl ProcessState {
    /// States in which a stop request has a child to act on.
    pub fn is_active(self) -> bool {
        matches!(self, ProcessState::Starting | ProcessState::Started)
    }

    pub(crate) fn can_transition_to(self, next: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Started)
                | (Starting, Stopped)
                | (Started, Stopped)
                | (Starting, Stopping)
                | (Started, Stopping)
                | (Stopping, Stopped)
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Stopped => write!(f, "stopped"),
            ProcessState::Starting => write!(f, "starting"),
            ProcessState::Started => write!(f, "started"),
            ProcessState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Request left for the launcher by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingEvent {
    #[default]
    None,
    StopRequested,
    RestartRequested,
    ExitRequested,
}

impl PendingEvent {
    pub fn is_none(self) -> bool {
        self == PendingEvent::None
    }

    /// Combine a new request with the one already pending. Exit is never downgraded.
    pub(crate) fn merge(self, next: PendingEvent) -> PendingEvent {
        match (self, next) {
            (PendingEvent::ExitRequested, _) => PendingEvent::ExitRequested,
            (current, PendingEvent::None) => current,
            (_, next) => next,
        }
    }
}

impl fmt::Display for PendingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingEvent::None => write!(f, "none"),
            PendingEvent::StopRequested => write!(f, "stop"),
            PendingEvent::RestartRequested => write!(f, "restart"),
            PendingEvent::ExitRequested => write!(f, "exit"),
        }
    }
}
