// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::DispatchError;
use crate::program::ProgramRuntime;
use crate::spec::ProgramSpec;
use crate::status::StatusReport;

/// Program name -> runtime. Only the dispatcher mutates it; readers get
/// snapshots.
#[derive(Clone, Default)]
pub struct Registry {
    programs: Arc<RwLock<BTreeMap<String, Arc<ProgramRuntime>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(
        &self,
        runtime: ProgramRuntime,
    ) -> Result<Arc<ProgramRuntime>, DispatchError> {
        let mut programs = self.programs.write().unwrap_or_else(PoisonError::into_inner);
        let name = runtime.name().to_string();
        if programs.contains_key(&name) {
            return Err(DispatchError::DuplicateProgram(name));
        }
        let runtime = Arc::new(runtime);
        programs.insert(name, Arc::clone(&runtime));
        Ok(runtime)
    }

    pub(crate) fn remove(&self, name: &str) -> Option<Arc<ProgramRuntime>> {
        self.programs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<ProgramRuntime>> {
        self.programs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.programs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Every runtime, sorted by name.
    pub fn all(&self) -> Vec<Arc<ProgramRuntime>> {
        self.programs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn specs(&self) -> Vec<ProgramSpec> {
        self.all().iter().map(|p| p.spec().clone()).collect()
    }

    /// Per-instance detail for `target`, or a summary of every program.
    pub fn status(&self, target: Option<&str>) -> Result<StatusReport, DispatchError> {
        match target {
            Some(name) => self
                .get(name)
                .map(|p| StatusReport::Detail(p.status()))
                .ok_or_else(|| DispatchError::UnknownProgram(name.to_string())),
            None => Ok(StatusReport::Summary(
                self.all().iter().map(|p| p.status()).collect(),
            )),
        }
    }
}
