use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

use crate::util::{find_in_path, is_executable};

pub(crate) const DEFAULT_LEAK_TOOL: &str = "leaks";
pub(crate) const DEFAULT_LEAK_FLAGS: &[&str] = &["-atExit"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum LeakCheckMode {
    /// Run leak cases when the wrapper is available, skip them otherwise.
    Auto,
    /// Require the wrapper; fail setup when it is missing.
    On,
    /// Never run leak cases.
    Off,
}

impl LeakCheckMode {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            LeakCheckMode::Auto => "auto",
            LeakCheckMode::On => "on",
            LeakCheckMode::Off => "off",
        }
    }
}

/// A resolved leak wrapper: the program to spawn and the flags inserted
/// before the `--` separator.
#[derive(Debug, Clone)]
pub(crate) struct LeakTool {
    pub program: PathBuf,
    pub flags: Vec<String>,
}

/// Decides whether leak cases run. The probe checks that the wrapper can
/// actually be spawned here, not what the platform calls itself: `auto`
/// resolves the tool and quietly skips when it is absent, `on` makes a
/// missing tool a setup error, `off` never resolves.
pub(crate) fn resolve_leak_tool(
    mode: LeakCheckMode,
    explicit: Option<&Path>,
    extra_flags: &[String],
) -> Result<Option<LeakTool>> {
    if mode == LeakCheckMode::Off {
        return Ok(None);
    }
    let program = match locate(explicit) {
        Some(p) => p,
        None => {
            if mode == LeakCheckMode::On {
                let wanted = match explicit {
                    Some(p) => p.display().to_string(),
                    None => DEFAULT_LEAK_TOOL.to_string(),
                };
                bail!("leak check is on but {wanted:?} is not an available executable");
            }
            return Ok(None);
        }
    };
    let flags = if extra_flags.is_empty() {
        DEFAULT_LEAK_FLAGS.iter().map(|s| s.to_string()).collect()
    } else {
        extra_flags.to_vec()
    };
    Ok(Some(LeakTool { program, flags }))
}

fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => {
            if path.components().count() > 1 {
                if is_executable(path) {
                    Some(path.to_path_buf())
                } else {
                    None
                }
            } else {
                find_in_path(&path.to_string_lossy())
            }
        }
        None => find_in_path(DEFAULT_LEAK_TOOL),
    }
}

/// Composes the wrapper invocation `<tool> <flags>... -- <subject> <fixture>`.
/// The `--` keeps subject arguments out of the wrapper's own option parsing.
pub(crate) fn wrapper_argv(
    tool: &LeakTool,
    subject: &Path,
    fixture: &Path,
) -> (PathBuf, Vec<OsString>) {
    let mut args: Vec<OsString> = tool.flags.iter().map(OsString::from).collect();
    args.push(OsString::from("--"));
    args.push(subject.as_os_str().to_os_string());
    args.push(fixture.as_os_str().to_os_string());
    (tool.program.clone(), args)
}
