//! `jsonvet doctor`: reports whether this environment can run the full
//! check matrix, as one JSON object on stdout.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};

use crate::fixtures::scan_fixture_dir;
use crate::leaks::{resolve_leak_tool, LeakCheckMode, DEFAULT_LEAK_TOOL};
use crate::util::{find_in_path, is_executable};

#[derive(Debug, clap::Args)]
pub(crate) struct DoctorArgs {
    /// Subject executable to probe (a path, or a name looked up on PATH).
    #[arg(long, value_name = "PATH")]
    pub subject: Option<PathBuf>,

    /// Fixture directory to census.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub fixtures: PathBuf,

    /// Leak wrapper to probe instead of the default `leaks`.
    #[arg(long, value_name = "PATH")]
    pub leak_tool: Option<PathBuf>,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    ok: bool,
    command: &'static str,
    platform: Platform,
    checks: Vec<Check>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    suggestions: Vec<String>,
}

#[derive(serde::Serialize)]
struct Platform {
    os: &'static str,
    arch: &'static str,
}

#[derive(serde::Serialize)]
struct Check {
    name: &'static str,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

pub(crate) fn cmd_doctor(args: &DoctorArgs) -> Result<ExitCode> {
    let mut checks: Vec<Check> = Vec::new();
    let mut suggestions: Vec<String> = Vec::new();

    if let Some(subject) = &args.subject {
        let (ok, detail) = probe_executable(subject);
        if !ok {
            suggestions.push(format!(
                "build the subject and pass its path via --subject (got {})",
                subject.display()
            ));
        }
        checks.push(Check {
            name: "subject_executable",
            ok,
            detail: Some(detail),
        });
    }

    // A missing leak wrapper only skips leak cases, so it is reported but
    // never fails doctor.
    match resolve_leak_tool(LeakCheckMode::Auto, args.leak_tool.as_deref(), &[])? {
        Some(tool) => {
            checks.push(Check {
                name: "leak_tool",
                ok: true,
                detail: Some(tool.program.display().to_string()),
            });
        }
        None => {
            if std::env::consts::OS == "macos" {
                suggestions.push(
                    "install the developer tools to get `leaks` (xcode-select --install)"
                        .to_string(),
                );
            } else {
                suggestions.push(
                    "point --leak-tool at a wrapper that exits non-zero on leaks".to_string(),
                );
            }
            let probed = match &args.leak_tool {
                Some(p) => p.display().to_string(),
                None => DEFAULT_LEAK_TOOL.to_string(),
            };
            checks.push(Check {
                name: "leak_tool",
                ok: true,
                detail: Some(format!("{probed} not found; leak cases will be skipped")),
            });
        }
    }

    match scan_fixture_dir(&args.fixtures) {
        Ok(set) => {
            checks.push(Check {
                name: "fixture_dir",
                ok: true,
                detail: Some(format!(
                    "good={} bad={} json={}",
                    set.good.len(),
                    set.bad.len(),
                    set.all.len()
                )),
            });
        }
        Err(err) => {
            checks.push(Check {
                name: "fixture_dir",
                ok: false,
                detail: Some(format!("{err:#}")),
            });
        }
    }

    let ok = checks.iter().all(|c| c.ok);
    let report = DoctorReport {
        ok,
        command: "doctor",
        platform: Platform {
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
        },
        checks,
        suggestions,
    };
    let mut out = serde_json::to_vec(&report).context("serialize doctor report")?;
    out.push(b'\n');
    std::io::stdout()
        .write_all(&out)
        .context("write doctor report")?;
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::from(1) })
}

fn probe_executable(path: &Path) -> (bool, String) {
    if path.components().count() > 1 {
        if is_executable(path) {
            (true, path.display().to_string())
        } else {
            (false, format!("{} is not an executable file", path.display()))
        }
    } else {
        match find_in_path(&path.to_string_lossy()) {
            Some(found) => (true, found.display().to_string()),
            None => (false, format!("{} not found on PATH", path.display())),
        }
    }
}
