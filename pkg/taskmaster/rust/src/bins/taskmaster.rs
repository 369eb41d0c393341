// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info, warn};
use tokio::io::BufReader;
use tokio::signal::unix::{SignalKind, signal};

use taskmaster::config::load_config;
use taskmaster::shell::Shell;
use taskmaster::{Event, Supervisor};

const LOG_TARGET: &str = "taskmaster";

/// Interactive process supervisor
#[derive(Parser, Debug)]
#[command(name = "taskmaster")]
#[command(about = "Launch, watch and restart the programs declared in a YAML file")]
struct Args {
    /// Program declarations
    #[arg(short = 'f', long = "config")]
    config: PathBuf,

    /// Supervisor log, appended to
    #[arg(long, default_value = "taskmaster.log")]
    log_file: PathBuf,

    /// Log debug records too
    #[arg(long, default_value = "false")]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let specs = load_config(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    // The local UTC offset can only be read while the process is single-threaded.
    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    taskmaster_log::init(&args.log_file, level)
        .with_context(|| format!("opening log file {}", args.log_file.display()))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    let result = runtime.block_on(run(args, specs));
    // Stdin reads may still be parked on a blocking thread.
    runtime.shutdown_background();
    result
}

async fn run(args: Args, specs: Vec<taskmaster::ProgramSpec>) -> Result<()> {
    info!(
        target: LOG_TARGET,
        "taskmaster starting (version {}, {} program(s))",
        env!("CARGO_PKG_VERSION"),
        specs.len()
    );

    let supervisor = Supervisor::start();
    let handle = supervisor.handle();
    for spec in specs {
        handle.submit(Event::Add(spec)).await?;
    }

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let shell = Shell::new(handle.clone(), args.config);
    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    let stdin = BufReader::new(tokio::io::stdin());

    let exit_submitted = tokio::select! {
        res = shell.run(stdin, &mut stdout, &mut stderr) => match res {
            Ok(()) => true,
            Err(e) => {
                warn!(target: LOG_TARGET, "shell stopped: {e}");
                false
            }
        },
        _ = sigterm.recv() => {
            info!(target: LOG_TARGET, "received SIGTERM");
            false
        }
        _ = sigint.recv() => {
            info!(target: LOG_TARGET, "received SIGINT");
            false
        }
    };
    if !exit_submitted
        && let Err(e) = handle.submit(Event::Exit).await
    {
        warn!(target: LOG_TARGET, "cannot submit exit: {e}");
    }

    supervisor.wait().await;
    info!(target: LOG_TARGET, "taskmaster shutting down");
    Ok(())
}
