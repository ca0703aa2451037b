use predicates::prelude::*;

mod common;

#[test]
fn test_ping_attached() {
    let ctx = common::context();
    let port = ctx.worker.port().to_string();

    ctx.attached_cmd()
        .arg("ping")
        .assert()
        .success()
        .stdout(predicate::str::diff(format!("{}\n", port)));
}

#[test]
fn test_ping_closed_port_times_out() {
    let port = pyserve_test_utils::closed_port().to_string();

    common::pyserve()
        .args(["--attach", &port, "--timeout-ms", "300", "ping"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("timed out after 300ms"));
}

#[test]
fn test_attach_conflicts_with_debug() {
    common::pyserve()
        .args(["--attach", "9000", "--debug", "ping"])
        .assert()
        .failure();
}

#[test]
fn test_debug_attach_uses_debug_port() {
    let ctx = common::context();
    let port = ctx.worker.port().to_string();

    common::pyserve()
        .args(["--debug", "--debug-port", &port, "ping"])
        .assert()
        .success()
        .stdout(predicate::str::contains(port.as_str()));
}

#[test]
fn test_attach_host_and_port() {
    let ctx = common::context();
    let port = ctx.worker.port().to_string();

    common::pyserve()
        .args(["--attach", &format!("127.0.0.1:{}", port), "ping"])
        .assert()
        .success()
        .stdout(predicate::str::diff(format!("{}\n", port)));
}

#[test]
fn test_attach_rejects_missing_port() {
    common::pyserve()
        .args(["--attach", "localhost", "ping"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected PORT or HOST:PORT"));
}
