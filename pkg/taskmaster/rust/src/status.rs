// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;

use crate::state::ProcessState;

/// Point-in-time view of one instance, read under its lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSnapshot {
    pub rank: usize,
    pub state: ProcessState,
    pub pid: u32,
    pub restart_budget: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramStatus {
    pub name: String,
    pub instances: Vec<InstanceSnapshot>,
}

impl ProgramStatus {
    /// Instances that currently have a child process.
    pub fn running(&self) -> usize {
        self.instances.iter().filter(|i| i.pid != 0).count()
    }

    pub fn total(&self) -> usize {
        self.instances.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusReport {
    /// Running/total counts of every registered program.
    Summary(Vec<ProgramStatus>),
    /// Per-instance pid and state of one program.
    Detail(ProgramStatus),
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusReport::Summary(programs) if programs.is_empty() => {
                writeln!(f, "no program registered")
            }
            StatusReport::Summary(programs) => {
                for program in programs {
                    writeln!(
                        f,
                        "{:<24} {}/{} running",
                        program.name,
                        program.running(),
                        program.total()
                    )?;
                }
                Ok(())
            }
            StatusReport::Detail(program) => {
                for instance in &program.instances {
                    let label = format!("{}:{}", program.name, instance.rank);
                    if instance.pid == 0 {
                        writeln!(f, "{label:<24} {:<9}", instance.state)?;
                    } else {
                        writeln!(f, "{label:<24} {:<9} pid {}", instance.state, instance.pid)?;
                    }
                }
                Ok(())
            }
        }
    }
}
