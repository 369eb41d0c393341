// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! The single consumer of the event queue. Each event is handled to
//! completion before the next one is dequeued, so two operations on the same
//! program never interleave.

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::DispatchError;
use crate::program::ProgramRuntime;
use crate::queue::{Event, EventReceiver, EventSender, event_queue};
use crate::registry::Registry;
use crate::spec::ProgramSpec;
use crate::status::StatusReport;

const LOG_TARGET: &str = "dispatcher";

enum Flow {
    Continue,
    Exit,
}

pub struct Dispatcher {
    events: EventReceiver,
    registry: Registry,
}

impl Dispatcher {
    pub fn new(events: EventReceiver, registry: Registry) -> Self {
        Self { events, registry }
    }

    pub async fn run(mut self) {
        info!(target: LOG_TARGET, "dispatcher started");
        while let Some(event) = self.events.dequeue().await {
            let kind = event.kind();
            debug!(target: LOG_TARGET, "handling {event:?}");
            match self.handle(event).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => break,
                Err(e) => warn!(target: LOG_TARGET, "{kind} failed: {e}"),
            }
        }
        info!(target: LOG_TARGET, "dispatcher stopped");
    }

    async fn handle(&self, event: Event) -> Result<Flow, DispatchError> {
        match event {
            Event::Status { target, reply } => {
                let report = self.registry.status(target.as_deref());
                if let Ok(ref report) = report {
                    log_report(report);
                }
                match reply {
                    Some(reply) => {
                        let _ = reply.send(report);
                    }
                    None => {
                        report?;
                    }
                }
            }
            Event::Start(name) => {
                self.program(&name)?.start();
            }
            Event::Stop(name) => {
                self.program(&name)?.stop();
            }
            Event::Restart(name) => {
                self.program(&name)?.restart();
            }
            Event::Add(spec) => self.add(spec)?,
            Event::Delete(name) => self.delete(&name).await?,
            Event::Exit => {
                self.exit().await;
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Continue)
    }

    fn program(&self, name: &str) -> Result<Arc<ProgramRuntime>, DispatchError> {
        self.registry
            .get(name)
            .ok_or_else(|| DispatchError::UnknownProgram(name.to_string()))
    }

    fn add(&self, spec: ProgramSpec) -> Result<(), DispatchError> {
        if self.registry.contains(&spec.name) {
            return Err(DispatchError::DuplicateProgram(spec.name));
        }
        let autostart = spec.autostart;
        let program = self.registry.insert(ProgramRuntime::new(spec))?;
        info!(
            target: LOG_TARGET,
            "[{}] added ({} instance(s))",
            program.name(),
            program.instances().len()
        );
        if autostart {
            program.start();
        }
        Ok(())
    }

    /// Blocks until every instance of `name` has terminated.
    async fn delete(&self, name: &str) -> Result<(), DispatchError> {
        let program = self.program(name)?;
        program.shutdown().await;
        self.registry.remove(name);
        info!(target: LOG_TARGET, "[{name}] deleted");
        Ok(())
    }

    /// Tear every program down at once, then wait for all of them.
    async fn exit(&self) {
        let programs = self.registry.all();
        info!(target: LOG_TARGET, "exit requested, stopping {} program(s)", programs.len());
        for program in &programs {
            program.request_exit();
        }
        for program in &programs {
            program.join().await;
            self.registry.remove(program.name());
        }
    }
}

fn log_report(report: &StatusReport) {
    match report {
        StatusReport::Summary(programs) => {
            for p in programs {
                info!(target: LOG_TARGET, "[{}] {}/{} running", p.name, p.running(), p.total());
            }
        }
        StatusReport::Detail(p) => {
            for i in &p.instances {
                info!(target: LOG_TARGET, "[{}:{}] {} (pid={})", p.name, i.rank, i.state, i.pid);
            }
        }
    }
}

/// Runs the dispatcher task.
pub struct Supervisor {
    handle: SupervisorHandle,
    dispatcher: JoinHandle<()>,
}

impl Supervisor {
    pub fn start() -> Self {
        let (events, receiver) = event_queue();
        let registry = Registry::new();
        let dispatcher = tokio::spawn(Dispatcher::new(receiver, registry.clone()).run());
        Self {
            handle: SupervisorHandle { events, registry },
            dispatcher,
        }
    }

    pub fn handle(&self) -> SupervisorHandle {
        self.handle.clone()
    }

    /// Wait for the dispatcher to process `Exit`.
    pub async fn wait(self) {
        if let Err(e) = self.dispatcher.await {
            error!(target: LOG_TARGET, "dispatcher task failed: {e}");
        }
    }
}

/// What the command layer gets: event submission and status reads.
#[derive(Clone)]
pub struct SupervisorHandle {
    events: EventSender,
    registry: Registry,
}

impl SupervisorHandle {
    /// Enqueue `event`, waiting while the queue is full.
    pub async fn submit(&self, event: Event) -> Result<(), DispatchError> {
        self.events.enqueue(event).await
    }

    /// Status as seen after every previously submitted event.
    pub async fn status(&self, target: Option<String>) -> Result<StatusReport, DispatchError> {
        let (reply, report) = oneshot::channel();
        self.submit(Event::Status {
            target,
            reply: Some(reply),
        })
        .await?;
        report.await.map_err(|_| DispatchError::QueueClosed)?
    }

    /// Status read directly, without going through the queue.
    pub fn status_snapshot(&self, target: Option<&str>) -> Result<StatusReport, DispatchError> {
        self.registry.status(target)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    pub fn registered_specs(&self) -> Vec<ProgramSpec> {
        self.registry.specs()
    }
}
