// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! YAML program declarations.
//!
//! ```yaml
//! programs:
//!   web:
//!     cmd: "/usr/bin/python3 -m http.server 8000"
//!     numprocs: 2
//!     umask: 022
//!     autorestart: unexpected
//!     exitcodes: [0, 2]
//!     stopsignal: TERM
//!     stdout: /tmp/web.stdout
//!     env:
//!       PORT: 8000
//! ```
//!
//! Everything returned by [`load_config`] is validated; the supervision engine
//! does not check any of it again.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use log::debug;
use nix::sys::signal::Signal;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::spec::{AutoRestart, ProgramSpec};

pub const MAX_NUMPROCS: usize = 30;
pub const MAX_START_RETRIES: u32 = 128;
pub const MAX_START_TIME_SECS: u64 = 120;
pub const MAX_STOP_TIME_SECS: u64 = 60;
pub const MAX_UMASK: u32 = 0o777;
pub(crate) const OUTPUT_FILE_MODE: u32 = 0o755;

const DISCARD_PATH: &str = "/dev/null";

fn default_true() -> bool {
    true
}

fn default_numprocs() -> usize {
    1
}

fn default_start_retries() -> u32 {
    3
}

fn default_start_time() -> u64 {
    1
}

fn default_stop_time() -> u64 {
    10
}

fn default_stop_signal() -> String {
    "TERM".to_string()
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    programs: BTreeMap<String, RawProgram>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProgram {
    cmd: String,
    #[serde(default = "default_numprocs")]
    numprocs: usize,
    umask: Option<Umask>,
    workingdir: Option<PathBuf>,
    #[serde(default = "default_true")]
    autostart: bool,
    autorestart: Option<AutoRestartValue>,
    exitcodes: Option<ExitCodes>,
    #[serde(default = "default_start_retries")]
    startretries: u32,
    #[serde(default = "default_start_time")]
    starttime: u64,
    #[serde(default = "default_stop_signal")]
    stopsignal: String,
    #[serde(default = "default_stop_time")]
    stoptime: u64,
    stdout: Option<PathBuf>,
    stderr: Option<PathBuf>,
    #[serde(default)]
    env: serde_yaml::Mapping,
}

/// `umask: 022` reaches us as the string "022" (leading zeros are not YAML
/// integers), `umask: 22` as the integer 22. Both are read as octal digits;
/// YAML `0o` literals are not supported.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Umask {
    Number(u32),
    Octal(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AutoRestartValue {
    Flag(bool),
    Word(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExitCodes {
    One(i32),
    Many(Vec<i32>),
}

/// Read and validate every program declared in `path`, sorted by name.
pub fn load_config(path: &Path) -> Result<Vec<ProgramSpec>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&contents, path)
}

/// Validate the YAML `contents`; `origin` is only used in error messages.
pub fn parse_config(contents: &str, origin: &Path) -> Result<Vec<ProgramSpec>, ConfigError> {
    let file: ConfigFile = serde_yaml::from_str(contents).map_err(|source| ConfigError::Parse {
        path: origin.to_path_buf(),
        source,
    })?;

    let mut specs = Vec::with_capacity(file.programs.len());
    for (name, raw) in file.programs {
        let spec = sanitize(&name, raw)?;
        debug!(
            target: "config",
            "[{}] loaded (numprocs={}, autorestart={}, cmd={})",
            spec.name,
            spec.numprocs,
            spec.autorestart,
            spec.command_line()
        );
        specs.push(spec);
    }
    Ok(specs)
}

fn sanitize(name: &str, raw: RawProgram) -> Result<ProgramSpec, ConfigError> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(ConfigError::invalid(
            name,
            "name",
            "must be non-empty and contain no whitespace",
        ));
    }

    let mut command: Vec<String> = raw.cmd.split_whitespace().map(String::from).collect();
    let Some(program) = command.first_mut() else {
        return Err(ConfigError::invalid(name, "cmd", "empty command"));
    };
    if !program.contains('/') {
        let found = std::env::var_os("PATH").and_then(|paths| resolve_in_path(program, &paths));
        let Some(found) = found else {
            return Err(ConfigError::invalid(
                name,
                "cmd",
                format!("'{program}' not found in PATH"),
            ));
        };
        *program = found.to_string_lossy().into_owned();
    }

    if raw.numprocs == 0 || raw.numprocs > MAX_NUMPROCS {
        return Err(ConfigError::invalid(
            name,
            "numprocs",
            format!("{} not in 1..={MAX_NUMPROCS}", raw.numprocs),
        ));
    }

    let umask = match raw.umask {
        None => 0o022,
        Some(Umask::Number(n)) => parse_octal(name, &n.to_string())?,
        Some(Umask::Octal(s)) => parse_octal(name, s.trim())?,
    };
    if umask > MAX_UMASK {
        return Err(ConfigError::invalid(
            name,
            "umask",
            format!("{umask:o} exceeds {MAX_UMASK:o}"),
        ));
    }

    if let Some(ref dir) = raw.workingdir
        && !dir.is_dir()
    {
        return Err(ConfigError::invalid(
            name,
            "workingdir",
            format!("{} is not a directory", dir.display()),
        ));
    }

    let autorestart = match raw.autorestart {
        None => AutoRestart::Unexpected,
        Some(AutoRestartValue::Flag(true)) => AutoRestart::Always,
        Some(AutoRestartValue::Flag(false)) => AutoRestart::Never,
        Some(AutoRestartValue::Word(word)) => parse_autorestart(&word).ok_or_else(|| {
            ConfigError::invalid(
                name,
                "autorestart",
                format!("'{word}' is not one of true, false, unexpected"),
            )
        })?,
    };

    let exit_codes = match raw.exitcodes {
        None => vec![0],
        Some(ExitCodes::One(code)) => vec![code],
        Some(ExitCodes::Many(codes)) => codes,
    };
    if let Some(bad) = exit_codes.iter().find(|c| !(0..=255).contains(*c)) {
        return Err(ConfigError::invalid(
            name,
            "exitcodes",
            format!("{bad} is not a valid exit status"),
        ));
    }

    if raw.startretries > MAX_START_RETRIES {
        return Err(ConfigError::invalid(
            name,
            "startretries",
            format!("{} exceeds {MAX_START_RETRIES}", raw.startretries),
        ));
    }
    if raw.starttime > MAX_START_TIME_SECS {
        return Err(ConfigError::invalid(
            name,
            "starttime",
            format!("{}s exceeds {MAX_START_TIME_SECS}s", raw.starttime),
        ));
    }
    if raw.stoptime > MAX_STOP_TIME_SECS {
        return Err(ConfigError::invalid(
            name,
            "stoptime",
            format!("{}s exceeds {MAX_STOP_TIME_SECS}s", raw.stoptime),
        ));
    }

    let stop_signal = parse_signal(&raw.stopsignal).ok_or_else(|| {
        ConfigError::invalid(
            name,
            "stopsignal",
            format!("unknown signal '{}'", raw.stopsignal),
        )
    })?;

    let stdout_path = output_path(name, "stdout", raw.stdout)?;
    let stderr_path = output_path(name, "stderr", raw.stderr)?;
    let environment = environment(name, &raw.env)?;

    Ok(ProgramSpec {
        name: name.to_string(),
        command,
        environment,
        stdout_path,
        stderr_path,
        working_directory: raw.workingdir,
        expected_exit_codes: exit_codes.into_iter().collect::<BTreeSet<_>>(),
        numprocs: raw.numprocs,
        umask,
        autorestart,
        start_retries: raw.startretries,
        autostart: raw.autostart,
        stop_signal,
        start_time: Duration::from_secs(raw.starttime),
        stop_time: Duration::from_secs(raw.stoptime),
    })
}

fn parse_autorestart(word: &str) -> Option<AutoRestart> {
    match word.trim().to_ascii_lowercase().as_str() {
        "true" | "always" => Some(AutoRestart::Always),
        "false" | "never" => Some(AutoRestart::Never),
        "unexpected" => Some(AutoRestart::Unexpected),
        _ => None,
    }
}

/// Resolve `TERM`, `SIGTERM`, `term` or `15` to a signal.
pub fn parse_signal(name: &str) -> Option<Signal> {
    let name = name.trim();
    if let Ok(number) = name.parse::<i32>() {
        return Signal::try_from(number).ok();
    }
    let upper = name.to_ascii_uppercase();
    if upper.starts_with("SIG") {
        Signal::from_str(&upper).ok()
    } else {
        Signal::from_str(&format!("SIG{upper}")).ok()
    }
}

/// Check that a log destination can be opened the way children will use it.
fn output_path(
    program: &str,
    field: &'static str,
    path: Option<PathBuf>,
) -> Result<Option<PathBuf>, ConfigError> {
    let Some(path) = path else {
        return Ok(None);
    };
    if path == Path::new(DISCARD_PATH) {
        return Ok(None);
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .mode(OUTPUT_FILE_MODE)
        .open(&path)
        .map_err(|e| ConfigError::invalid(program, field, format!("{}: {e}", path.display())))?;
    Ok(Some(path))
}

fn environment(program: &str, env: &serde_yaml::Mapping) -> Result<Vec<String>, ConfigError> {
    env.iter()
        .map(|(key, value)| {
            let key = scalar(key)
                .filter(|k| !k.is_empty() && !k.contains('='))
                .ok_or_else(|| ConfigError::invalid(program, "env", format!("bad key {key:?}")))?;
            let value = scalar(value).ok_or_else(|| {
                ConfigError::invalid(program, "env", format!("bad value for {key}"))
            })?;
            Ok(format!("{key}={value}"))
        })
        .collect()
}

/// First regular file named `program` in the `PATH`-style list `paths`.
fn resolve_in_path(program: &str, paths: &std::ffi::OsStr) -> Option<PathBuf> {
    std::env::split_paths(paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

fn parse_octal(name: &str, digits: &str) -> Result<u32, ConfigError> {
    u32::from_str_radix(digits, 8)
        .map_err(|_| ConfigError::invalid(name, "umask", format!("'{digits}' is not octal")))
}

fn scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::fs;

    fn parse(yaml: &str) -> Result<Vec<ProgramSpec>, ConfigError> {
        parse_config(yaml, Path::new("test.yaml"))
    }

    fn invalid_field(result: Result<Vec<ProgramSpec>, ConfigError>) -> &'static str {
        match result {
            Err(ConfigError::Invalid { field, .. }) => field,
            other => panic!("expected an Invalid error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_full_program() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("web.out");
        let yaml = format!(
            r#"
programs:
  web:
    cmd: "/bin/sleep   60"
    numprocs: 3
    umask: 077
    workingdir: {dir}
    autostart: false
    autorestart: true
    exitcodes: [0, 2]
    startretries: 5
    starttime: 2
    stopsignal: USR1
    stoptime: 4
    stdout: {out}
    env:
      PORT: 8000
      MODE: prod
"#,
            dir = dir.path().display(),
            out = out.display()
        );

        let specs = parse(&yaml).unwrap();
        assert_eq!(specs.len(), 1);
        let spec = &specs[0];
        assert_eq!(spec.name, "web");
        assert_eq!(spec.command, vec!["/bin/sleep", "60"]);
        assert_eq!(spec.numprocs, 3);
        assert_eq!(spec.umask, 0o077);
        assert_eq!(spec.working_directory.as_deref(), Some(dir.path()));
        assert!(!spec.autostart);
        assert_eq!(spec.autorestart, AutoRestart::Always);
        assert_eq!(spec.expected_exit_codes, BTreeSet::from([0, 2]));
        assert_eq!(spec.start_retries, 5);
        assert_eq!(spec.start_time, Duration::from_millis(2000));
        assert_eq!(spec.stop_signal, Signal::SIGUSR1);
        assert_eq!(spec.stop_time, Duration::from_millis(4000));
        assert_eq!(spec.stdout_path.as_deref(), Some(out.as_path()));
        assert_eq!(spec.stderr_path, None);
        assert_eq!(spec.environment, vec!["PORT=8000", "MODE=prod"]);
        assert!(out.exists(), "stdout file should be created at load time");
    }

    #[test]
    fn test_parse_defaults() {
        let specs = parse("programs:\n  a:\n    cmd: /bin/true\n").unwrap();
        let spec = &specs[0];
        assert_eq!(spec, &ProgramSpec::new("a", vec!["/bin/true".to_string()]));
    }

    #[test]
    fn test_programs_sorted_by_name() {
        let yaml = "programs:\n  zeta:\n    cmd: /bin/true\n  alpha:\n    cmd: /bin/true\n";
        let names: Vec<_> = parse(yaml).unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_empty_file_has_no_programs() {
        assert!(parse("{}").unwrap().is_empty());
    }

    #[test]
    fn test_autorestart_and_exitcode_forms() {
        let yaml = r#"
programs:
  a:
    cmd: /bin/true
    autorestart: false
    exitcodes: 3
  b:
    cmd: /bin/true
    autorestart: unexpected
"#;
        let specs = parse(yaml).unwrap();
        assert_eq!(specs[0].autorestart, AutoRestart::Never);
        assert_eq!(specs[0].expected_exit_codes, BTreeSet::from([3]));
        assert_eq!(specs[1].autorestart, AutoRestart::Unexpected);
    }

    #[test]
    fn test_umask_digits_are_octal() {
        let cases = [("777", 0o777), ("22", 0o022), ("022", 0o022), ("\"0\"", 0)];
        for (value, expected) in cases {
            let yaml = format!("programs:\n  a:\n    cmd: /bin/true\n    umask: {value}\n");
            assert_eq!(parse(&yaml).unwrap()[0].umask, expected, "umask: {value}");
        }
    }

    #[test]
    fn test_bare_command_resolved_from_path() {
        let specs = parse("programs:\n  a:\n    cmd: sh -c true\n").unwrap();
        let program = Path::new(&specs[0].command[0]);
        assert!(program.is_absolute(), "{program:?}");
        assert!(program.ends_with("sh"));
        assert_eq!(&specs[0].command[1..], ["-c", "true"]);
    }

    #[test]
    fn test_unknown_bare_command_rejected() {
        let result = parse("programs:\n  a:\n    cmd: no-such-taskmaster-binary --flag\n");
        assert_eq!(invalid_field(result), "cmd");
    }

    #[test]
    fn test_resolve_in_path() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("tool");
        fs::write(&tool, "").unwrap();
        fs::create_dir(dir.path().join("subdir")).unwrap();
        let paths = std::env::join_paths(["/nonexistent", dir.path().to_str().unwrap()]).unwrap();

        assert_eq!(resolve_in_path("tool", &paths), Some(tool));
        assert_eq!(resolve_in_path("subdir", &paths), None);
        assert_eq!(resolve_in_path("missing", &paths), None);
    }

    #[test]
    fn test_limits_rejected() {
        let cases = [
            ("numprocs: 0", "numprocs"),
            ("numprocs: 31", "numprocs"),
            ("umask: 1777", "umask"),
            ("umask: \"8\"", "umask"),
            ("umask: 28", "umask"),
            ("umask: 90", "umask"),
            ("startretries: 129", "startretries"),
            ("starttime: 121", "starttime"),
            ("stoptime: 61", "stoptime"),
            ("stopsignal: NOPE", "stopsignal"),
            ("autorestart: sometimes", "autorestart"),
            ("exitcodes: [0, 256]", "exitcodes"),
            ("workingdir: /nonexistent/dir", "workingdir"),
            ("stdout: /nonexistent/dir/out.log", "stdout"),
        ];
        for (line, field) in cases {
            let yaml = format!("programs:\n  a:\n    cmd: /bin/true\n    {line}\n");
            assert_eq!(invalid_field(parse(&yaml)), field, "case: {line}");
        }
    }

    #[test]
    fn test_empty_command_rejected() {
        assert_eq!(
            invalid_field(parse("programs:\n  a:\n    cmd: \"   \"\n")),
            "cmd"
        );
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result = parse("programs:\n  a:\n    cmd: /bin/true\n    restarts: 2\n");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_missing_cmd_rejected() {
        let result = parse("programs:\n  a:\n    numprocs: 2\n");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_dev_null_output_is_discard() {
        let specs = parse("programs:\n  a:\n    cmd: /bin/true\n    stderr: /dev/null\n").unwrap();
        assert_eq!(specs[0].stderr_path, None);
    }

    #[test]
    fn test_parse_signal_names() {
        assert_eq!(parse_signal("TERM"), Some(Signal::SIGTERM));
        assert_eq!(parse_signal("SIGKILL"), Some(Signal::SIGKILL));
        assert_eq!(parse_signal("hup"), Some(Signal::SIGHUP));
        assert_eq!(parse_signal("2"), Some(Signal::SIGINT));
        assert_eq!(parse_signal("SIGNOPE"), None);
        assert_eq!(parse_signal("0"), None);
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskmaster.yaml");
        fs::write(&path, "programs:\n  a:\n    cmd: /bin/true\n").unwrap();
        assert_eq!(load_config(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_load_config_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(&dir.path().join("nope.yaml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
