// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::sync::{Arc, Mutex, PoisonError};

use log::info;
use tokio::time::Instant;

use crate::spec::ProgramSpec;
use crate::state::PendingEvent;
use crate::status::ProgramStatus;
use crate::supervisor::ProcessSupervisor;

const LOG_TARGET: &str = "program";

/// Read-only spec plus the one runtime field all instances share.
pub struct ProgramShared {
    spec: ProgramSpec,
    /// Time of the latest stop, restart or teardown request; the grace
    /// period of every instance is measured from it.
    stop_timestamp: Mutex<Option<Instant>>,
}

impl ProgramShared {
    pub fn new(spec: ProgramSpec) -> Self {
        Self {
            spec,
            stop_timestamp: Mutex::new(None),
        }
    }

    pub fn spec(&self) -> &ProgramSpec {
        &self.spec
    }

    pub(crate) fn mark_stop_requested(&self) {
        *self
            .stop_timestamp
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    pub(crate) fn stop_timestamp(&self) -> Option<Instant> {
        *self
            .stop_timestamp
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// The `numprocs` instances of one program.
pub struct ProgramRuntime {
    shared: Arc<ProgramShared>,
    instances: Vec<ProcessSupervisor>,
}

impl ProgramRuntime {
    /// Spawn the launcher/timer pairs of every instance, all idle.
    pub fn new(spec: ProgramSpec) -> Self {
        let shared = Arc::new(ProgramShared::new(spec));
        let instances = (0..shared.spec().numprocs)
            .map(|rank| ProcessSupervisor::spawn(Arc::clone(&shared), rank))
            .collect();
        Self { shared, instances }
    }

    pub fn name(&self) -> &str {
        &self.shared.spec().name
    }

    pub fn spec(&self) -> &ProgramSpec {
        self.shared.spec()
    }

    pub fn instances(&self) -> &[ProcessSupervisor] {
        &self.instances
    }

    /// Wake every idle instance. Returns how many were woken.
    pub fn start(&self) -> usize {
        let woken = self.instances.iter().filter(|i| i.start()).count();
        info!(
            target: LOG_TARGET,
            "[{}] start: {woken}/{} instance(s) woken",
            self.name(),
            self.instances.len()
        );
        woken
    }

    /// Ask every active instance to stop. Does not wait.
    pub fn stop(&self) -> usize {
        self.fan_out(PendingEvent::StopRequested)
    }

    /// Stop active instances and run them again; idle instances start directly.
    pub fn restart(&self) -> usize {
        self.fan_out(PendingEvent::RestartRequested)
    }

    /// Ask every instance to terminate for good. Pair with [`Self::join`].
    pub fn request_exit(&self) {
        self.fan_out(PendingEvent::ExitRequested);
    }

    /// Wait until every launcher and timer task has terminated.
    pub async fn join(&self) {
        for instance in &self.instances {
            instance.join().await;
        }
        info!(target: LOG_TARGET, "[{}] all instances terminated", self.name());
    }

    /// Terminate every instance and wait for them.
    pub async fn shutdown(&self) {
        self.request_exit();
        self.join().await;
    }

    pub fn status(&self) -> ProgramStatus {
        ProgramStatus {
            name: self.name().to_string(),
            instances: self.instances.iter().map(|i| i.snapshot()).collect(),
        }
    }

    fn fan_out(&self, event: PendingEvent) -> usize {
        self.shared.mark_stop_requested();
        let acted = self
            .instances
            .iter()
            .filter(|i| i.request(event))
            .count();
        info!(
            target: LOG_TARGET,
            "[{}] {event} requested: {acted}/{} instance(s) affected",
            self.name(),
            self.instances.len()
        );
        acted
    }
}
