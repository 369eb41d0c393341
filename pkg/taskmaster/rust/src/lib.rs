// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

// Correctness
#![deny(clippy::undocumented_unsafe_blocks)]
// Panicking code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unimplemented)]
#![deny(clippy::todo)]
// Debug code that shouldn't be in production
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]

pub mod command;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod process;
pub mod program;
pub mod queue;
pub mod registry;
pub mod shell;
pub mod spec;
pub mod state;
pub mod status;
pub mod supervisor;
pub mod timer;

pub use dispatcher::{Supervisor, SupervisorHandle};
pub use queue::Event;
pub use spec::{AutoRestart, ProgramSpec};
