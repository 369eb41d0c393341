// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;

use tokio::sync::{mpsc, oneshot};

use crate::error::DispatchError;
use crate::spec::ProgramSpec;
use crate::status::StatusReport;

pub const EVENT_QUEUE_CAPACITY: usize = 64;

pub type StatusReply = oneshot::Sender<Result<StatusReport, DispatchError>>;

/// An operator request, processed by the dispatcher in submission order.
pub enum Event {
    /// One program's instances, or a summary when `target` is `None`.
    /// The report is also sent on `reply` if present.
    Status {
        target: Option<String>,
        reply: Option<StatusReply>,
    },
    Start(String),
    Restart(String),
    Stop(String),
    Add(ProgramSpec),
    Delete(String),
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Status,
    Start,
    Restart,
    Stop,
    Add,
    Delete,
    Exit,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Status { .. } => EventKind::Status,
            Event::Start(_) => EventKind::Start,
            Event::Restart(_) => EventKind::Restart,
            Event::Stop(_) => EventKind::Stop,
            Event::Add(_) => EventKind::Add,
            Event::Delete(_) => EventKind::Delete,
            Event::Exit => EventKind::Exit,
        }
    }

    /// Name of the program the event is about, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            Event::Status { target, .. } => target.as_deref(),
            Event::Start(name)
            | Event::Restart(name)
            | Event::Stop(name)
            | Event::Delete(name) => Some(name),
            Event::Add(spec) => Some(&spec.name),
            Event::Exit => None,
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target() {
            Some(target) => write!(f, "{}({target})", self.kind()),
            None => write!(f, "{}", self.kind()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Status => write!(f, "status"),
            EventKind::Start => write!(f, "start"),
            EventKind::Restart => write!(f, "restart"),
            EventKind::Stop => write!(f, "stop"),
            EventKind::Add => write!(f, "add"),
            EventKind::Delete => write!(f, "delete"),
            EventKind::Exit => write!(f, "exit"),
        }
    }
}

/// Create the bounded event queue: any number of producers, one consumer.
pub fn event_queue() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    (EventSender { tx }, EventReceiver { rx })
}

#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
}

impl EventSender {
    /// Append `event`, waiting while the queue is full.
    pub async fn enqueue(&self, event: Event) -> Result<(), DispatchError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| DispatchError::QueueClosed)
    }

    /// Events waiting to be dequeued.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct EventReceiver {
    rx: mpsc::Receiver<Event>,
}

impl EventReceiver {
    /// Next event in FIFO order; `None` once every sender is gone.
    pub async fn dequeue(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}
