use std::ffi::OsString;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

/// Hard cap on captured stdout per invocation. A capture that hits the cap
/// is surfaced as an infrastructure failure for that case, never parsed.
pub(crate) const MAX_STDOUT_BYTES: usize = 16 * 1024 * 1024;

/// What one child process did. A non-zero exit code is ordinary data here;
/// only failing to spawn at all is an error.
#[derive(Debug, Clone)]
pub(crate) struct SubjectOutput {
    pub exit_code: i32,
    pub exit_signal: Option<i32>,
    pub timed_out: bool,
    pub stdout: Vec<u8>,
    pub stdout_truncated: bool,
}

/// Spawns `program` with `args` directly (no shell), drains stdout, waits,
/// and reports the outcome. stdin and stderr are attached to the null
/// device: the subject reads its fixture by path, and stderr is not part of
/// the subject contract. With `timeout_ms` set the child is killed and
/// reaped at the deadline and the output comes back flagged `timed_out`.
pub(crate) fn run_argv(
    program: &Path,
    args: &[OsString],
    timeout_ms: Option<u64>,
) -> Result<SubjectOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::null());

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawn {}", program.display()))?;

    let stdout = child.stdout.take().context("take stdout")?;
    let stdout_thread = std::thread::spawn(move || -> std::io::Result<(Vec<u8>, bool)> {
        read_to_end_capped(stdout, MAX_STDOUT_BYTES)
    });

    let (status, timed_out) = match timeout_ms {
        Some(wall_ms) => wait_child_with_wall_timeout_ms(&mut child, wall_ms)?,
        None => (child.wait().context("wait child")?, false),
    };

    let (stdout_bytes, stdout_truncated) = stdout_thread
        .join()
        .unwrap_or_else(|_| Ok((Vec::new(), false)))
        .context("read child stdout")?;

    #[cfg(unix)]
    let exit_signal = {
        use std::os::unix::process::ExitStatusExt as _;
        status.signal()
    };
    #[cfg(not(unix))]
    let exit_signal: Option<i32> = None;

    let exit_code = match status.code() {
        Some(code) => code,
        None => exit_signal.map(|s| 128 + s).unwrap_or(1),
    };

    Ok(SubjectOutput {
        exit_code,
        exit_signal,
        timed_out,
        stdout: stdout_bytes,
        stdout_truncated,
    })
}

fn wait_child_with_wall_timeout_ms(
    child: &mut std::process::Child,
    wall_ms: u64,
) -> Result<(std::process::ExitStatus, bool)> {
    let wall_limit = Duration::from_millis(wall_ms.max(1));
    let start = Instant::now();
    let deadline = start.checked_add(wall_limit);

    loop {
        if let Some(status) = child.try_wait().context("try_wait child")? {
            return Ok((status, false));
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            let _ = child.kill();
            let status = child.wait().context("wait child after kill")?;
            return Ok((status, true));
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn read_to_end_capped<R: Read>(mut reader: R, cap: usize) -> std::io::Result<(Vec<u8>, bool)> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 8192];
    let mut truncated = false;

    loop {
        let n = reader.read(&mut tmp)?;
        if n == 0 {
            break;
        }

        if truncated {
            continue;
        }

        let remaining = cap.saturating_sub(buf.len());
        if n <= remaining {
            buf.extend_from_slice(&tmp[..n]);
        } else {
            buf.extend_from_slice(&tmp[..remaining]);
            truncated = true;
        }
    }

    Ok((buf, truncated))
}
