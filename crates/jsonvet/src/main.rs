use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use anyhow::{Context, Result};
use base64::Engine;
use clap::{Args, Parser};
use serde_json::Value;

mod doctor;
mod fixtures;
mod invoke;
mod leaks;
mod util;

use fixtures::{plan_cases, scan_fixture_dir, CaseDecl, CheckKind};
use invoke::SubjectOutput;
use leaks::{resolve_leak_tool, LeakCheckMode, LeakTool};

const REPORT_SCHEMA_VERSION: &str = "jsonvet.report@0.1.0";

#[derive(Parser, Debug)]
#[command(name = "jsonvet")]
#[command(about = "Black-box conformance checks for JSON-parsing executables.", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run the fixture suite against a subject executable.
    Run(RunArgs),
    /// Probe the environment: subject, leak wrapper, fixture census.
    Doctor(doctor::DoctorArgs),
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    /// Subject executable: a path, or a bare name looked up on PATH.
    #[arg(long, value_name = "PATH")]
    subject: PathBuf,

    /// Directory scanned (non-recursively) for `*.good.json`, `*.bad.json`
    /// and other `*.json` fixtures.
    #[arg(long, value_name = "DIR", default_value = ".")]
    fixtures: PathBuf,

    #[arg(long, value_name = "SUBSTR")]
    filter: Option<String>,

    #[arg(long)]
    exact: bool,

    #[arg(long)]
    list: bool,

    #[arg(
        long,
        action = clap::ArgAction::Set,
        value_name = "BOOL",
        value_parser = clap::value_parser!(bool),
        default_value = "true"
    )]
    json: bool,

    #[arg(long, value_name = "PATH")]
    report_out: Option<PathBuf>,

    /// Run every case N times and flag observation drift.
    #[arg(long, value_name = "N", default_value_t = 1)]
    repeat: u32,

    #[arg(long, value_name = "N", default_value_t = 1)]
    jobs: usize,

    /// Kill the subject (or leak wrapper) after this many milliseconds.
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    #[arg(long, value_enum, value_name = "MODE", default_value = "auto")]
    leak_check: LeakCheckMode,

    /// Leak wrapper to use instead of the default `leaks`.
    #[arg(long, value_name = "PATH")]
    leak_tool: Option<PathBuf>,

    /// Flag passed to the leak wrapper before `--`. May be passed multiple
    /// times; replaces the default `-atExit`.
    #[arg(long, value_name = "FLAG", allow_hyphen_values = true)]
    leak_flag: Vec<String>,

    /// Cap on differing paths recorded per case.
    #[arg(long, value_name = "N", default_value_t = 32)]
    max_diffs: usize,

    #[arg(long)]
    verbose: bool,
}

fn main() -> std::process::ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            std::process::ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<std::process::ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => cmd_run(args),
        Command::Doctor(args) => doctor::cmd_doctor(&args),
    }
}

fn cmd_run(args: RunArgs) -> Result<std::process::ExitCode> {
    let started = Instant::now();

    let subject = resolve_subject(&args.subject)?;
    let leak_tool = resolve_leak_tool(args.leak_check, args.leak_tool.as_deref(), &args.leak_flag)?;

    let set = scan_fixture_dir(&args.fixtures)?;
    let mut cases = plan_cases(&set, leak_tool.is_some());
    if let Some(filter) = &args.filter {
        if args.exact {
            cases.retain(|c| c.id == *filter);
        } else {
            cases.retain(|c| c.id.contains(filter));
        }
    }

    if args.list {
        for c in &cases {
            println!("{}\t{}\t{}", c.id, c.kind.as_str(), c.fixture.display());
        }
        return Ok(std::process::ExitCode::SUCCESS);
    }

    if args.verbose {
        eprintln!(
            "jsonvet run: {} cases against {} (repeat={}, jobs={})",
            cases.len(),
            subject.display(),
            args.repeat,
            args.jobs
        );
    }

    let ctx = RunCtx {
        args: &args,
        subject: &subject,
        leak_tool: leak_tool.as_ref(),
    };
    let results = run_cases(&ctx, &cases);

    let report = finalize_report(&args, &subject, leak_tool.as_ref(), started.elapsed(), results);
    let exit_code = compute_exit_code(&report);
    write_report_and_exit(&args, report, exit_code)
}

/// Subject names without a path separator resolve via PATH, like a shell
/// would; anything else must point at an executable file.
fn resolve_subject(raw: &Path) -> Result<PathBuf> {
    if raw.components().count() > 1 {
        if !raw.is_file() {
            anyhow::bail!("subject not found: {}", raw.display());
        }
        if !util::is_executable(raw) {
            anyhow::bail!("subject is not executable: {}", raw.display());
        }
        return Ok(raw.to_path_buf());
    }
    let name = raw.to_string_lossy();
    util::find_in_path(&name).with_context(|| format!("subject {name:?} not found on PATH"))
}

struct RunCtx<'a> {
    args: &'a RunArgs,
    subject: &'a Path,
    leak_tool: Option<&'a LeakTool>,
}

fn run_cases(ctx: &RunCtx<'_>, cases: &[CaseDecl]) -> Vec<CaseResult> {
    if ctx.args.jobs <= 1 {
        let mut out: Vec<CaseResult> = Vec::with_capacity(cases.len());
        for case in cases {
            if ctx.args.verbose {
                eprintln!("case: {}", case.id);
            }
            out.push(run_one_case(ctx, case));
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        return out;
    }

    let next = AtomicUsize::new(0);
    let results: Mutex<Vec<CaseResult>> = Mutex::new(Vec::with_capacity(cases.len()));

    std::thread::scope(|scope| {
        let jobs = ctx.args.jobs.min(cases.len().max(1));
        for _ in 0..jobs {
            scope.spawn(|| loop {
                let idx = next.fetch_add(1, Ordering::Relaxed);
                if idx >= cases.len() {
                    return;
                }
                let case = &cases[idx];
                if ctx.args.verbose {
                    eprintln!("case: {}", case.id);
                }
                let result = run_one_case(ctx, case);
                if let Ok(mut guard) = results.lock() {
                    guard.push(result);
                }
            });
        }
    });

    let mut out = results.into_inner().unwrap_or_else(|e| e.into_inner());
    out.sort_by(|a, b| a.id.cmp(&b.id));
    out
}

fn run_one_case(ctx: &RunCtx<'_>, case: &CaseDecl) -> CaseResult {
    let started = Instant::now();
    let repeat = ctx.args.repeat.max(1);

    let mut result = check_case(ctx, case);
    for _ in 1..repeat {
        let again = check_case(ctx, case);
        if !same_observation(&result, &again) {
            let message = format!(
                "observations drift across repeats: first {}, then {}",
                describe_observation(&result),
                describe_observation(&again)
            );
            result.set_error(Diag::new("EDETERMINISM", message));
            break;
        }
    }

    result.duration_ms = started.elapsed().as_millis() as u64;
    result
}

fn check_case(ctx: &RunCtx<'_>, case: &CaseDecl) -> CaseResult {
    match case.kind {
        CheckKind::Good => check_good(ctx, case),
        CheckKind::Bad => check_bad(ctx, case),
        CheckKind::Leaks => check_leaks(ctx, case),
    }
}

fn invoke_subject(ctx: &RunCtx<'_>, fixture: &Path) -> Result<SubjectOutput> {
    let args = [fixture.as_os_str().to_os_string()];
    invoke::run_argv(ctx.subject, &args, ctx.args.timeout_ms)
}

/// Good fixtures must be accepted: exit 0, stdout parses as JSON, and the
/// parsed value is semantically equivalent to the fixture itself.
fn check_good(ctx: &RunCtx<'_>, case: &CaseDecl) -> CaseResult {
    let mut result = CaseResult::new(case);

    let fixture_bytes = match std::fs::read(&case.fixture) {
        Ok(b) => b,
        Err(err) => {
            result.set_error(Diag::new(
                "EFIXTURE_IO",
                format!("read fixture {}: {err}", case.fixture.display()),
            ));
            return result;
        }
    };
    result.fixture_sha256 = Some(util::sha256_hex(&fixture_bytes));

    let expected: Value = match serde_json::from_slice(&fixture_bytes) {
        Ok(v) => v,
        Err(err) => {
            result.set_error(Diag::new(
                "EFIXTURE_JSON",
                format!("fixture {} is not valid JSON: {err}", case.fixture.display()),
            ));
            return result;
        }
    };

    let output = match invoke_subject(ctx, &case.fixture) {
        Ok(o) => o,
        Err(err) => {
            result.set_error(Diag::new("ESPAWN", format!("{err:#}")));
            return result;
        }
    };
    judge_good_output(ctx, &mut result, &expected, output);
    result
}

/// Turns one observed run of the subject into the good-check verdict.
fn judge_good_output(
    ctx: &RunCtx<'_>,
    result: &mut CaseResult,
    expected: &Value,
    output: SubjectOutput,
) {
    result.exit_code = Some(output.exit_code);
    result.exit_signal = output.exit_signal;

    if output.timed_out {
        result.set_fail(timeout_diag(ctx));
        return;
    }

    if output.exit_code != 0 {
        result.set_fail(Diag::new(
            "EREJECTED",
            format!("subject rejected the fixture ({})", describe_exit(&output)),
        ));
        return;
    }

    if output.stdout_truncated {
        result.set_error(Diag::new(
            "ESTDOUT_CAP",
            format!(
                "subject stdout exceeded the {} byte capture cap",
                invoke::MAX_STDOUT_BYTES
            ),
        ));
        return;
    }

    let actual: Value = match serde_json::from_slice(&output.stdout) {
        Ok(v) => v,
        Err(err) => {
            let b64 = base64::engine::general_purpose::STANDARD;
            result.stdout_b64 = Some(b64.encode(&output.stdout));
            result.set_fail(Diag::new(
                "EBAD_OUTPUT",
                format!("subject exit 0 but stdout is not valid JSON: {err}"),
            ));
            return;
        }
    };

    let differences = jsonvet_diff::diff(expected, &actual);
    if !differences.is_empty() {
        let total = differences.len();
        let first_path = differences[0].path().to_string();
        result.differences = differences;
        result.differences.truncate(ctx.args.max_diffs);
        let recorded = result.differences.len();
        let message = if recorded < total {
            format!("subject output differs from the fixture: {total} differing paths ({recorded} recorded)")
        } else {
            format!("subject output differs from the fixture: {total} differing paths")
        };
        result.set_fail(Diag::with_path("EMISMATCH", message, first_path));
    }
}

/// Bad fixtures must be rejected: any non-zero exit (including signal
/// death) passes, exit 0 is an unexpected acceptance. Stdout is ignored.
fn check_bad(ctx: &RunCtx<'_>, case: &CaseDecl) -> CaseResult {
    let mut result = CaseResult::new(case);
    if let Ok(bytes) = std::fs::read(&case.fixture) {
        result.fixture_sha256 = Some(util::sha256_hex(&bytes));
    }

    let output = match invoke_subject(ctx, &case.fixture) {
        Ok(o) => o,
        Err(err) => {
            result.set_error(Diag::new("ESPAWN", format!("{err:#}")));
            return result;
        }
    };
    result.exit_code = Some(output.exit_code);
    result.exit_signal = output.exit_signal;

    if output.timed_out {
        result.set_fail(timeout_diag(ctx));
        return result;
    }

    if output.exit_code == 0 {
        result.set_fail(Diag::new(
            "EACCEPTED",
            "subject accepted a fixture it was expected to reject",
        ));
    }
    result
}

/// Leak cases wrap the subject in the leak tool; the wrapper's exit code is
/// the whole verdict. Subject stdout does not matter here.
fn check_leaks(ctx: &RunCtx<'_>, case: &CaseDecl) -> CaseResult {
    let mut result = CaseResult::new(case);
    if let Ok(bytes) = std::fs::read(&case.fixture) {
        result.fixture_sha256 = Some(util::sha256_hex(&bytes));
    }

    let Some(tool) = ctx.leak_tool else {
        result.set_error(Diag::new("ESPAWN", "no leak wrapper resolved"));
        return result;
    };

    let (program, wrapper_args) = leaks::wrapper_argv(tool, ctx.subject, &case.fixture);
    let output = match invoke::run_argv(&program, &wrapper_args, ctx.args.timeout_ms) {
        Ok(o) => o,
        Err(err) => {
            result.set_error(Diag::new("ESPAWN", format!("{err:#}")));
            return result;
        }
    };
    result.exit_code = Some(output.exit_code);
    result.exit_signal = output.exit_signal;

    if output.timed_out {
        result.set_fail(timeout_diag(ctx));
        return result;
    }

    if output.exit_code != 0 {
        result.set_fail(Diag::new(
            "ELEAKS",
            format!("leak wrapper reported failure ({})", describe_exit(&output)),
        ));
    }
    result
}

fn timeout_diag(ctx: &RunCtx<'_>) -> Diag {
    Diag::new(
        "ETIMEOUT",
        format!(
            "no exit within {} ms; child killed",
            ctx.args.timeout_ms.unwrap_or(0)
        ),
    )
}

fn describe_exit(output: &SubjectOutput) -> String {
    match output.exit_signal {
        Some(sig) => format!("signal {sig}, exit {}", output.exit_code),
        None => format!("exit {}", output.exit_code),
    }
}

fn describe_observation(result: &CaseResult) -> String {
    let codes: Vec<&str> = result.diags.iter().map(|d| d.code.as_str()).collect();
    match result.exit_code {
        Some(code) => format!("status={} exit={} codes={:?}", result.status, code, codes),
        None => format!("status={} codes={:?}", result.status, codes),
    }
}

fn same_observation(a: &CaseResult, b: &CaseResult) -> bool {
    a.status == b.status
        && a.exit_code == b.exit_code
        && a.exit_signal == b.exit_signal
        && a.diags.iter().map(|d| &d.code).eq(b.diags.iter().map(|d| &d.code))
}

#[derive(Debug, Clone, serde::Serialize)]
struct RunReport {
    schema_version: String,
    tool: ToolInfo,
    invocation: InvocationInfo,
    summary: Summary,
    cases: Vec<CaseResult>,
}

#[derive(Debug, Clone, serde::Serialize)]
struct ToolInfo {
    name: String,
    version: String,
}

#[derive(Debug, Clone, serde::Serialize)]
struct InvocationInfo {
    argv: Vec<String>,
    cwd: String,
    subject: String,
    fixture_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<String>,
    repeat: u32,
    jobs: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<u64>,
    leak_check: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    leak_tool: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
struct Summary {
    passed: u64,
    failed: u64,
    errors: u64,
    duration_ms: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
struct CaseResult {
    id: String,
    kind: String,
    fixture: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fixture_sha256: Option<String>,
    status: String,
    duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_signal: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    diags: Vec<Diag>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    differences: Vec<jsonvet_diff::Difference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stdout_b64: Option<String>,
}

impl CaseResult {
    fn new(case: &CaseDecl) -> Self {
        Self {
            id: case.id.clone(),
            kind: case.kind.as_str().to_string(),
            fixture: display_path(&case.fixture),
            fixture_sha256: None,
            status: "pass".to_string(),
            duration_ms: 0,
            exit_code: None,
            exit_signal: None,
            diags: Vec::new(),
            differences: Vec::new(),
            stdout_b64: None,
        }
    }

    fn set_fail(&mut self, diag: Diag) {
        self.status = "fail".to_string();
        self.diags.push(diag);
    }

    fn set_error(&mut self, diag: Diag) {
        self.status = "error".to_string();
        self.diags.push(diag);
    }
}

#[derive(Debug, Clone, serde::Serialize)]
struct Diag {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
}

impl Diag {
    fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            path: None,
        }
    }

    fn with_path(
        code: impl Into<String>,
        message: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            path: Some(path.into()),
        }
    }
}

fn finalize_report(
    args: &RunArgs,
    subject: &Path,
    leak_tool: Option<&LeakTool>,
    elapsed: std::time::Duration,
    cases: Vec<CaseResult>,
) -> RunReport {
    let mut summary = Summary::default();
    for c in &cases {
        match c.status.as_str() {
            "pass" => summary.passed += 1,
            "fail" => summary.failed += 1,
            _ => summary.errors += 1,
        }
    }
    summary.duration_ms = elapsed.as_millis() as u64;

    let invocation = InvocationInfo {
        argv: std::env::args_os()
            .map(|a| a.to_string_lossy().into_owned())
            .collect(),
        cwd: std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .display()
            .to_string(),
        subject: display_path(subject),
        fixture_dir: display_path(&args.fixtures),
        filter: args.filter.clone(),
        repeat: args.repeat,
        jobs: args.jobs,
        timeout_ms: args.timeout_ms,
        leak_check: args.leak_check.as_str().to_string(),
        leak_tool: leak_tool.map(|t| display_path(&t.program)),
    };

    RunReport {
        schema_version: REPORT_SCHEMA_VERSION.to_string(),
        tool: ToolInfo {
            name: "jsonvet".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        invocation,
        summary,
        cases,
    }
}

fn compute_exit_code(report: &RunReport) -> u8 {
    if report.summary.errors > 0 {
        return 12;
    }
    if report.summary.failed > 0 {
        return 10;
    }
    0
}

fn write_report_and_exit(
    args: &RunArgs,
    report: RunReport,
    exit_code: u8,
) -> Result<std::process::ExitCode> {
    let json = serde_json::to_string(&report)? + "\n";

    if let Some(out_path) = &args.report_out {
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create report dir: {}", parent.display()))?;
        }
        std::fs::write(out_path, json.as_bytes())
            .with_context(|| format!("write report: {}", out_path.display()))?;
        eprintln!(
            "jsonvet: passed={} failed={} errors={} (exit={})",
            report.summary.passed, report.summary.failed, report.summary.errors, exit_code
        );
    }

    if args.json {
        print!("{json}");
    } else {
        for c in &report.cases {
            println!("{}\t{}", c.status, c.id);
        }
        println!(
            "summary: passed={} failed={} errors={} (exit={})",
            report.summary.passed, report.summary.failed, report.summary.errors, exit_code
        );
    }

    Ok(std::process::ExitCode::from(exit_code))
}

fn display_path<P: AsRef<Path>>(p: P) -> String {
    p.as_ref().display().to_string()
}
