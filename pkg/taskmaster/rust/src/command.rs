// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::error::CommandError;

/// Arguments accepted by a single command line.
pub const MAX_ARGS: usize = 5;

pub const HELP: &str = "\
commands:
  status [name...]     show every program, or the instances of the named ones
  start <name...>      start the named programs
  stop <name...>       stop the named programs
  restart <name...>    stop then start the named programs
  add <name>           register a program declared in the config file
  delete <name>        stop and unregister a program
  reload               re-read the config file and apply the differences
  exit                 stop every program and quit
  help                 show this message
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status(Vec<String>),
    Start(Vec<String>),
    Stop(Vec<String>),
    Restart(Vec<String>),
    Add(String),
    Delete(String),
    Reload,
    Exit,
    Help,
}

enum Arity {
    None,
    Optional,
    AtLeastOne,
    One,
}

impl Command {
    /// Parse one operator line. Program names are not checked here, see
    /// [`Command::validate`].
    pub fn parse(line: &str) -> Result<Command, CommandError> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or(CommandError::EmptyLine)?;
        let args: Vec<String> = words.map(str::to_string).collect();

        let arity = match name {
            "status" => Arity::Optional,
            "start" | "stop" | "restart" => Arity::AtLeastOne,
            "add" | "delete" => Arity::One,
            "reload" | "exit" | "help" => Arity::None,
            _ => return Err(CommandError::NotFound),
        };
        check_arity(&arity, args.len())?;

        let mut args = args;
        Ok(match name {
            "status" => Command::Status(args),
            "start" => Command::Start(args),
            "stop" => Command::Stop(args),
            "restart" => Command::Restart(args),
            "add" => Command::Add(args.remove(0)),
            "delete" => Command::Delete(args.remove(0)),
            "reload" => Command::Reload,
            "exit" => Command::Exit,
            _ => Command::Help,
        })
    }

    /// Program names the command refers to.
    pub fn targets(&self) -> &[String] {
        match self {
            Command::Status(names)
            | Command::Start(names)
            | Command::Stop(names)
            | Command::Restart(names) => names,
            Command::Add(name) | Command::Delete(name) => std::slice::from_ref(name),
            Command::Reload | Command::Exit | Command::Help => &[],
        }
    }

    /// Reject the first target `known` does not accept.
    pub fn validate(&self, known: impl Fn(&str) -> bool) -> Result<(), CommandError> {
        match self.targets().iter().find(|name| !known(name)) {
            Some(name) => Err(CommandError::BadArgument(name.clone())),
            None => Ok(()),
        }
    }
}

fn check_arity(arity: &Arity, count: usize) -> Result<(), CommandError> {
    if count > MAX_ARGS {
        return Err(CommandError::TooManyArguments);
    }
    match (arity, count) {
        (Arity::None, n) if n > 0 => Err(CommandError::TooManyArguments),
        (Arity::One, n) if n > 1 => Err(CommandError::TooManyArguments),
        (Arity::AtLeastOne | Arity::One, 0) => Err(CommandError::ArgumentMissing),
        _ => Ok(()),
    }
}
