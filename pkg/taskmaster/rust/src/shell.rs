// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::collections::BTreeMap;
use std::path::PathBuf;

use log::{info, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::command::{Command, HELP};
use crate::config::load_config;
use crate::dispatcher::SupervisorHandle;
use crate::error::{CommandError, DispatchError, ShellError};
use crate::queue::Event;
use crate::spec::ProgramSpec;

const LOG_TARGET: &str = "shell";

pub const PROMPT: &str = "taskmaster> ";

/// Result of one operator line.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Print(String),
    Exit,
}

/// Reads operator commands and turns them into events.
pub struct Shell {
    handle: SupervisorHandle,
    config_path: PathBuf,
}

impl Shell {
    pub fn new(handle: SupervisorHandle, config_path: PathBuf) -> Self {
        Self {
            handle,
            config_path,
        }
    }

    /// Prompt on `out`, read lines from `input` until `exit` or end of input.
    /// Both submit `Exit` before returning.
    pub async fn run<R, W, E>(&self, input: R, out: &mut W, err: &mut E) -> Result<(), ShellError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
        E: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        loop {
            out.write_all(PROMPT.as_bytes()).await?;
            out.flush().await?;

            let Some(line) = lines.next_line().await? else {
                info!(target: LOG_TARGET, "end of input");
                out.write_all(b"\n").await?;
                self.handle.submit(Event::Exit).await?;
                return Ok(());
            };

            match self.execute(&line).await {
                Ok(Outcome::Done) => {}
                Ok(Outcome::Print(text)) => out.write_all(text.as_bytes()).await?,
                Ok(Outcome::Exit) => return Ok(()),
                Err(ShellError::Command(CommandError::EmptyLine)) => {}
                Err(
                    e @ (ShellError::Command(_) | ShellError::Config(_) | ShellError::Dispatch(_)),
                ) => {
                    warn!(target: LOG_TARGET, "'{}': {e}", line.trim());
                    err.write_all(format!("taskmaster: {e}\n").as_bytes()).await?;
                    err.flush().await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run one operator line.
    pub async fn execute(&self, line: &str) -> Result<Outcome, ShellError> {
        let command = Command::parse(line)?;
        info!(target: LOG_TARGET, "operator command: {}", line.trim());

        match &command {
            Command::Add(name) => return self.add(name).await,
            Command::Reload => return self.reload().await,
            Command::Help => return Ok(Outcome::Print(HELP.to_string())),
            _ => command.validate(|name| self.handle.is_registered(name))?,
        }

        match command {
            Command::Status(names) if names.is_empty() => {
                let report = self.handle.status(None).await?;
                Ok(Outcome::Print(report.to_string()))
            }
            Command::Status(names) => {
                let mut text = String::new();
                for name in names {
                    text.push_str(&self.handle.status(Some(name)).await?.to_string());
                }
                Ok(Outcome::Print(text))
            }
            Command::Start(names) => self.submit_each(names, Event::Start).await,
            Command::Stop(names) => self.submit_each(names, Event::Stop).await,
            Command::Restart(names) => self.submit_each(names, Event::Restart).await,
            Command::Delete(name) => {
                self.handle.submit(Event::Delete(name)).await?;
                Ok(Outcome::Done)
            }
            Command::Exit => {
                self.handle.submit(Event::Exit).await?;
                Ok(Outcome::Exit)
            }
            Command::Add(_) | Command::Reload | Command::Help => Ok(Outcome::Done),
        }
    }

    async fn submit_each(
        &self,
        names: Vec<String>,
        event: fn(String) -> Event,
    ) -> Result<Outcome, ShellError> {
        for name in names {
            self.handle.submit(event(name)).await?;
        }
        Ok(Outcome::Done)
    }

    async fn add(&self, name: &str) -> Result<Outcome, ShellError> {
        let spec = load_config(&self.config_path)?
            .into_iter()
            .find(|spec| spec.name == name)
            .ok_or_else(|| CommandError::BadArgument(name.to_string()))?;
        if self.handle.is_registered(name) {
            return Err(DispatchError::DuplicateProgram(name.to_string()).into());
        }
        self.handle.submit(Event::Add(spec)).await?;
        Ok(Outcome::Done)
    }

    /// Apply the difference between the config file and the registry.
    async fn reload(&self) -> Result<Outcome, ShellError> {
        let declared = load_config(&self.config_path)?;
        let registered: BTreeMap<String, ProgramSpec> = self
            .handle
            .registered_specs()
            .into_iter()
            .map(|spec| (spec.name.clone(), spec))
            .collect();
        let plan = ReloadPlan::new(&registered, declared);

        for name in plan.removed.iter().chain(plan.changed.iter().map(|spec| &spec.name)) {
            self.handle.submit(Event::Delete(name.clone())).await?;
        }
        let summary = format!(
            "reload: {} added, {} removed, {} changed\n",
            plan.added.len(),
            plan.removed.len(),
            plan.changed.len()
        );
        for spec in plan.added.into_iter().chain(plan.changed) {
            self.handle.submit(Event::Add(spec)).await?;
        }
        info!(target: LOG_TARGET, "{}", summary.trim_end());
        Ok(Outcome::Print(summary))
    }
}

#[derive(Debug, Default)]
struct ReloadPlan {
    added: Vec<ProgramSpec>,
    removed: Vec<String>,
    changed: Vec<ProgramSpec>,
}

impl ReloadPlan {
    fn new(registered: &BTreeMap<String, ProgramSpec>, declared: Vec<ProgramSpec>) -> Self {
        let mut plan = ReloadPlan::default();
        for name in registered.keys() {
            if !declared.iter().any(|spec| &spec.name == name) {
                plan.removed.push(name.clone());
            }
        }
        for spec in declared {
            match registered.get(&spec.name) {
                None => plan.added.push(spec),
                Some(current) if *current != spec => plan.changed.push(spec),
                Some(_) => {}
            }
        }
        plan
    }
}
