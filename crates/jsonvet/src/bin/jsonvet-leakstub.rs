//! Stand-in leak wrapper for the integration tests. Accepts the real
//! wrapper's shape (`jsonvet-leakstub [flags]... -- <cmd> [args]...`),
//! runs the wrapped command with its output discarded, and reports through
//! its own exit code: `JSONVET_LEAKSTUB_EXIT` when set, otherwise 0 when
//! the command ran to completion (any exit code) and 1 when it died on a
//! signal.

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let args: Vec<std::ffi::OsString> = std::env::args_os().skip(1).collect();
    let sep = match args.iter().position(|a| a == "--") {
        Some(i) => i,
        None => {
            eprintln!("jsonvet-leakstub: usage: jsonvet-leakstub [flags]... -- <cmd> [args]...");
            return 2;
        }
    };
    let cmd = &args[sep + 1..];
    if cmd.is_empty() {
        eprintln!("jsonvet-leakstub: missing command after --");
        return 2;
    }

    let status = match std::process::Command::new(&cmd[0])
        .args(&cmd[1..])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
    {
        Ok(s) => s,
        Err(e) => {
            eprintln!("jsonvet-leakstub: spawn {:?}: {e}", cmd[0]);
            return 2;
        }
    };

    if let Ok(forced) = std::env::var("JSONVET_LEAKSTUB_EXIT") {
        if let Ok(code) = forced.parse::<i32>() {
            return code;
        }
    }

    if status.code().is_some() {
        0
    } else {
        1
    }
}
