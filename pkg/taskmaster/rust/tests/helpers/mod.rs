// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

#![allow(dead_code)]

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to a running taskmaster process driven through its stdin.
pub struct Taskmaster {
    child: Child,
    stdin: Option<ChildStdin>,
    log_file: PathBuf,
    stderr_lines: Arc<Mutex<Vec<String>>>,
    _stdout_thread: std::thread::JoinHandle<()>,
    _stderr_thread: std::thread::JoinHandle<()>,
}

impl Taskmaster {
    /// Start taskmaster on `config`, logging to `taskmaster.log` next to it.
    pub fn start(config: &Path) -> Self {
        let dir = config.parent().expect("config has a parent directory");
        let log_file = dir.join("taskmaster.log");
        let bin = env!("CARGO_BIN_EXE_taskmaster");
        let mut child = Command::new(bin)
            .arg("-f")
            .arg(config)
            .arg("--log-file")
            .arg(&log_file)
            .arg("--verbose")
            .current_dir(dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to start taskmaster");

        let stdin = child.stdin.take().expect("failed to capture stdin");
        let stdout = child.stdout.take().expect("failed to capture stdout");
        let stderr = child.stderr.take().expect("failed to capture stderr");

        // Prompts are not newline-terminated; only keep stdout drained.
        let stdout_thread = std::thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                match line {
                    Ok(l) => eprintln!("[taskmaster] {l}"),
                    Err(_) => break,
                }
            }
        });

        let stderr_lines = Arc::new(Mutex::new(Vec::<String>::new()));
        let lines_clone = Arc::clone(&stderr_lines);
        let stderr_thread = std::thread::spawn(move || {
            let reader = BufReader::new(stderr);
            for line in reader.lines() {
                match line {
                    Ok(l) => {
                        eprintln!("[taskmaster:err] {l}");
                        lines_clone.lock().unwrap().push(l);
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            child,
            stdin: Some(stdin),
            log_file,
            stderr_lines,
            _stdout_thread: stdout_thread,
            _stderr_thread: stderr_thread,
        }
    }

    /// Type one command line.
    pub fn send(&mut self, line: &str) {
        let stdin = self.stdin.as_mut().expect("stdin already closed");
        writeln!(stdin, "{line}").expect("failed to write to taskmaster");
        stdin.flush().expect("failed to flush taskmaster stdin");
    }

    /// Close stdin, the equivalent of Ctrl-D.
    pub fn close_stdin(&mut self) {
        self.stdin.take();
    }

    pub fn log_lines(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log_file)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Count how many log lines contain `pattern`.
    pub fn count_log_matches(&self, pattern: &str) -> usize {
        self.log_lines().iter().filter(|l| l.contains(pattern)).count()
    }

    /// Wait until the count of log lines matching `pattern` reaches at least `n`.
    pub fn wait_for_log_count(&self, pattern: &str, n: usize, timeout: Duration) -> bool {
        poll(timeout, || self.count_log_matches(pattern) >= n)
    }

    /// Wait until a log line containing `pattern` appears using the default timeout.
    pub fn wait_for_log(&self, pattern: &str) -> bool {
        self.wait_for_log_count(pattern, 1, DEFAULT_TIMEOUT)
    }

    /// Wait until an operator error containing `pattern` is printed.
    pub fn wait_for_stderr(&self, pattern: &str) -> bool {
        poll(DEFAULT_TIMEOUT, || {
            self.stderr_lines
                .lock()
                .unwrap()
                .iter()
                .any(|l| l.contains(pattern))
        })
    }

    /// Extract PIDs from "launched (pid=NNN" log lines.
    pub fn launched_pids(&self) -> Vec<u32> {
        self.log_lines()
            .iter()
            .filter_map(|l| {
                let marker = "launched (pid=";
                let start = l.find(marker)? + marker.len();
                let end = l[start..].find(|c: char| !c.is_ascii_digit())? + start;
                l[start..end].parse().ok()
            })
            .collect()
    }

    pub fn send_signal(&self, sig: Signal) {
        let pid = self.child.id() as i32;
        signal::kill(Pid::from_raw(pid), sig).expect("failed to send signal to taskmaster");
    }

    /// Wait for taskmaster to exit within the given timeout.
    pub fn wait_with_timeout(&mut self, timeout: Duration) -> ExitStatus {
        let deadline = Instant::now() + timeout;
        loop {
            match self
                .child
                .try_wait()
                .expect("failed to check taskmaster status")
            {
                Some(status) => return status,
                None => {
                    if Instant::now() >= deadline {
                        self.child.kill().ok();
                        return self.child.wait().expect("failed to wait on killed taskmaster");
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }
    }
}

impl Drop for Taskmaster {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn poll(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Write `yaml` as `taskmaster.yaml` in `dir`.
pub fn write_config(dir: &Path, yaml: &str) -> PathBuf {
    let path = dir.join("taskmaster.yaml");
    std::fs::write(&path, yaml)
        .unwrap_or_else(|e| panic!("failed to write {}: {e}", path.display()));
    path
}

/// Check if a PID is still alive.
pub fn pid_is_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Wait until a PID is no longer alive, or timeout.
pub fn wait_for_pid_gone(pid: u32, timeout: Duration) -> bool {
    poll(timeout, || !pid_is_alive(pid))
}
