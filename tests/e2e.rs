use std::process::Command;

fn run(fixture: &str) -> (String, String, bool) {
    let path = format!("tests/fixtures/{fixture}");
    let output = Command::new(env!("CARGO_BIN_EXE_resv-eng"))
        .arg(&path)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn valid_journal() {
    let (stdout, stderr, success) = run("valid.csv");

    assert!(success);
    assert!(stderr.is_empty());

    // User 1 booked once (the second call replays the idempotency key);
    // user 2's duplicate external top-up applied once, then their booking
    // was cancelled outside any window, so the charge came back in full.
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], "user,balance");
    assert_eq!(lines[1], "1,3500");
    assert_eq!(lines[2], "2,3000");
}

#[test]
fn errors_warn_but_do_not_block() {
    let (stdout, stderr, success) = run("with_errors.csv");

    assert!(success);
    assert!(stderr.contains("unrecognized op"));
    assert!(stderr.contains("missing instance"));

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], "user,balance");
    assert_eq!(lines[1], "1,500");
}
