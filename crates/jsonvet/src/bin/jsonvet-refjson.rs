//! Reference subject used by the integration tests: parses the fixture
//! given as its only argument and re-emits the value on stdout, exit 0 on
//! accept and exit 1 on reject.
//!
//! `JSONVET_REFJSON_MODE` selects a deliberate misbehavior so the harness
//! itself can be exercised: `accept-anything`, `reject-anything`,
//! `garbage`, `mutate`, `sleep-ms:<N>`, or `flaky:<statefile>` (accept on
//! the first run, reject once the state file exists).

use serde_json::Value;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let args: Vec<std::ffi::OsString> = std::env::args_os().skip(1).collect();
    if args.len() != 1 {
        eprintln!("jsonvet-refjson: usage: jsonvet-refjson <fixture.json>");
        return 2;
    }
    let path = std::path::Path::new(&args[0]);

    let mode = std::env::var("JSONVET_REFJSON_MODE").unwrap_or_default();
    let mode = mode.as_str();
    let known = matches!(
        mode,
        "" | "accept-anything" | "reject-anything" | "garbage" | "mutate"
    ) || mode.starts_with("sleep-ms:")
        || mode.starts_with("flaky:");
    if !known {
        eprintln!("jsonvet-refjson: unknown JSONVET_REFJSON_MODE: {mode}");
        return 2;
    }

    if let Some(ms) = mode.strip_prefix("sleep-ms:") {
        match ms.parse::<u64>() {
            Ok(ms) => std::thread::sleep(std::time::Duration::from_millis(ms)),
            Err(_) => {
                eprintln!("jsonvet-refjson: bad sleep-ms value: {ms}");
                return 2;
            }
        }
    }

    if let Some(state) = mode.strip_prefix("flaky:") {
        let state = std::path::Path::new(state);
        if state.exists() {
            eprintln!("jsonvet-refjson: flaky rejection of {}", path.display());
            return 1;
        }
        if let Err(e) = std::fs::write(state, b"seen") {
            eprintln!("jsonvet-refjson: write {}: {e}", state.display());
            return 2;
        }
    }

    match mode {
        "accept-anything" => {
            println!("{{}}");
            return 0;
        }
        "reject-anything" => {
            eprintln!("jsonvet-refjson: rejecting {}", path.display());
            return 1;
        }
        _ => {}
    }

    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("jsonvet-refjson: read {}: {e}", path.display());
            return 1;
        }
    };

    let mut value: Value = match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("jsonvet-refjson: parse {}: {e}", path.display());
            return 1;
        }
    };

    match mode {
        "garbage" => {
            println!("this is not json");
            return 0;
        }
        "mutate" => mutate(&mut value),
        _ => {}
    }

    match serde_json::to_string(&value) {
        Ok(json) => {
            println!("{json}");
            0
        }
        Err(e) => {
            eprintln!("jsonvet-refjson: serialize: {e}");
            1
        }
    }
}

/// Changes the value in a way that is visible for every possible input.
fn mutate(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.insert("__refjson_mutated".to_string(), Value::Bool(true));
        }
        Value::Array(items) => items.push(Value::Null),
        Value::Null => *value = Value::Bool(false),
        _ => *value = Value::Null,
    }
}
