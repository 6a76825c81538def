//! Tests for the SSH connection lifecycle and remote sessions.

use camino::Utf8Path;
use chrono::{TimeZone, Utc};
use rstest::rstest;

use super::{control_base, remote_config};
use crate::remote::{RemoteError, RemoteHost};
use crate::snapshot::{Lister, Name, NameError, Receiver, SnapshotError};
use crate::test_support::ScriptedRunner;

fn connected_host(base: &Utf8Path) -> (RemoteHost<ScriptedRunner>, ScriptedRunner) {
    let runner = ScriptedRunner::new();
    let host = RemoteHost::with_runner(remote_config(base), runner.clone()).expect("valid config");
    runner.push_success();
    (host, runner)
}

fn control_dirs(base: &Utf8Path) -> Vec<String> {
    base.read_dir_utf8()
        .expect("read control base")
        .map(|entry| entry.expect("dir entry").file_name().to_owned())
        .collect()
}

fn name(file_system: &str, minute: u32) -> Name {
    let timestamp = Utc
        .with_ymd_and_hms(2024, 3, 1, 12, minute, 0)
        .single()
        .expect("valid instant");
    Name::new(file_system, timestamp).expect("valid name")
}

#[rstest]
#[tokio::test]
async fn dial_starts_master_and_pins_host_key() {
    let (_guard, base) = control_base();
    let (host, runner) = connected_host(&base);

    host.dial().await.expect("dial succeeds");

    assert!(host.is_connected().await);
    let invocations = runner.invocations();
    let master = invocations.first().expect("master invocation");
    assert_eq!(master.program, "ssh");
    assert!(master.detached);
    let command = master.command_string();
    for expected in [
        "-p 22",
        "-M -N -f",
        "BatchMode=yes",
        "StrictHostKeyChecking=yes",
        "UserKnownHostsFile=",
        "control.sock",
    ] {
        assert!(command.contains(expected), "missing {expected}: {command}");
    }
    assert!(command.ends_with("root@backup.example"), "{command}");

    let dirs = control_dirs(&base);
    let [dir] = dirs.as_slice() else {
        panic!("expected one control directory, found {dirs:?}");
    };
    assert!(dir.starts_with("zsm-"));
    let known_hosts =
        std::fs::read_to_string(base.join(dir).join("known_hosts")).expect("known_hosts written");
    assert_eq!(
        known_hosts,
        "backup.example ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIGtest\n"
    );
}

#[rstest]
#[tokio::test]
async fn dial_creates_owner_only_control_directory() {
    use std::os::unix::fs::PermissionsExt;

    let (_guard, base) = control_base();
    let (host, _runner) = connected_host(&base);

    host.dial().await.expect("dial succeeds");

    let dirs = control_dirs(&base);
    let [dir] = dirs.as_slice() else {
        panic!("expected one control directory, found {dirs:?}");
    };
    let mode = std::fs::metadata(base.join(dir))
        .expect("control directory metadata")
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o700, "mode {mode:o}");
}

#[rstest]
#[tokio::test]
async fn dial_pins_bracketed_pattern_and_identity_on_custom_port() {
    let (_guard, base) = control_base();
    let runner = ScriptedRunner::new();
    let mut config = remote_config(&base);
    config.ssh_port = 2222;
    config.ssh_identity_file = Some(String::from("/keys/id_ed25519"));
    let host = RemoteHost::with_runner(config, runner.clone()).expect("valid config");
    runner.push_success();

    host.dial().await.expect("dial succeeds");

    let command = runner
        .invocations()
        .first()
        .map(|invocation| invocation.command_string())
        .expect("master invocation");
    assert!(command.contains("-p 2222"), "{command}");
    assert!(command.contains("-i /keys/id_ed25519"), "{command}");
    let dirs = control_dirs(&base);
    let dir = dirs.first().expect("control directory");
    let known_hosts =
        std::fs::read_to_string(base.join(dir).join("known_hosts")).expect("known_hosts written");
    assert!(known_hosts.starts_with("[backup.example]:2222 ssh-ed25519 "));
}

#[rstest]
#[tokio::test]
async fn dial_is_a_no_op_when_connected() {
    let (_guard, base) = control_base();
    let (host, runner) = connected_host(&base);

    host.dial().await.expect("first dial");
    host.dial().await.expect("second dial");

    assert_eq!(runner.invocations().len(), 1);
    assert_eq!(control_dirs(&base).len(), 1);
}

#[rstest]
#[case::ssh_failure(Some(255))]
#[case::killed(None)]
#[tokio::test]
async fn failed_dial_reports_transport_and_cleans_up(#[case] code: Option<i32>) {
    let (_guard, base) = control_base();
    let runner = ScriptedRunner::new();
    let host = RemoteHost::with_runner(remote_config(&base), runner.clone()).expect("valid config");
    runner.push_output(code, Vec::new(), "");

    let err = host.dial().await.expect_err("dial fails");

    assert!(
        matches!(err, RemoteError::Transport { operation: "dial", .. }),
        "unexpected: {err:?}"
    );
    assert!(!host.is_connected().await);
    assert!(control_dirs(&base).is_empty());
}

#[rstest]
#[tokio::test]
async fn spawn_failure_during_dial_is_transport() {
    let (_guard, base) = control_base();
    let host = RemoteHost::with_runner(remote_config(&base), ScriptedRunner::new())
        .expect("valid config");

    let err = host.dial().await.expect_err("no scripted response");

    assert!(matches!(err, RemoteError::Transport { .. }), "unexpected: {err:?}");
    assert!(control_dirs(&base).is_empty());
}

#[rstest]
#[tokio::test]
async fn missing_control_base_fails_dial() {
    let (_guard, base) = control_base();
    let missing = base.join("absent");
    let runner = ScriptedRunner::new();
    let host = RemoteHost::with_runner(remote_config(&missing), runner.clone())
        .expect("valid config");

    let err = host.dial().await.expect_err("base is missing");

    assert!(matches!(err, RemoteError::Transport { operation: "dial", .. }));
    assert!(runner.invocations().is_empty());
}

#[rstest]
fn incomplete_config_is_rejected() {
    let mut config = remote_config(Utf8Path::new("/tmp"));
    config.ssh_host_key = String::new();

    let err = RemoteHost::with_runner(config, ScriptedRunner::new()).expect_err("invalid config");

    assert!(matches!(err, RemoteError::Config(_)));
}

#[rstest]
#[tokio::test]
async fn operations_before_dial_are_not_connected() {
    let (_guard, base) = control_base();
    let runner = ScriptedRunner::new();
    let host = RemoteHost::with_runner(remote_config(&base), runner.clone()).expect("valid config");

    let listed = host.list().await.expect_err("not connected");
    let mut empty: &[u8] = &[];
    let received = host
        .receive("backup", &name("tank", 0), &mut empty)
        .await
        .expect_err("not connected");

    assert_eq!(listed, RemoteError::NotConnected);
    assert_eq!(received, RemoteError::NotConnected);
    assert_eq!(listed.to_string(), "remote: not connected");
    assert!(runner.invocations().is_empty());
}

#[rstest]
#[tokio::test]
async fn list_decodes_json_lines() {
    let (_guard, base) = control_base();
    let (host, runner) = connected_host(&base);
    host.dial().await.expect("dial succeeds");
    let expected = vec![name("tank", 0), name("tank/home", 5)];
    let stdout: String = expected
        .iter()
        .map(|entry| entry.to_json_line().expect("encode"))
        .collect();
    runner.push_output(Some(0), stdout, "");

    let listed = host.list_snapshots().await.expect("list succeeds");

    assert_eq!(listed, expected);
    let session = runner.invocations().get(1).cloned().expect("session");
    let command = session.command_string();
    assert!(command.contains("ControlMaster=no"), "{command}");
    assert!(command.ends_with("zsm list -o jsonl"), "{command}");
    assert!(!session.detached);
}

#[rstest]
#[tokio::test]
async fn list_with_empty_output_is_empty() {
    let (_guard, base) = control_base();
    let (host, runner) = connected_host(&base);
    host.dial().await.expect("dial succeeds");
    runner.push_success();

    assert!(host.list().await.expect("list succeeds").is_empty());
}

#[rstest]
#[tokio::test]
async fn malformed_record_aborts_listing() {
    let (_guard, base) = control_base();
    let (host, runner) = connected_host(&base);
    host.dial().await.expect("dial succeeds");
    let good = name("tank", 0).to_json_line().expect("encode");
    runner.push_output(Some(0), format!("{good}not json\n{good}"), "");

    let err = host.list().await.expect_err("decode fails");

    assert!(
        matches!(
            err,
            RemoteError::Decode { ref record, source: NameError::Json(_) } if record == "not json"
        ),
        "unexpected: {err:?}"
    );
}

#[rstest]
#[tokio::test]
async fn record_with_invalid_utf8_aborts_listing() {
    let (_guard, base) = control_base();
    let (host, runner) = connected_host(&base);
    host.dial().await.expect("dial succeeds");
    let good = name("tank", 0).to_json_line().expect("encode");
    let mut stdout = good.clone().into_bytes();
    stdout.extend_from_slice(b"{\"fileSystem\":\"ta\xffnk\",\"timestamp\":\"2024-03-01T12:00:00Z\"}\n");
    stdout.extend_from_slice(good.as_bytes());
    runner.push_output(Some(0), stdout, "");

    let err = host.list().await.expect_err("decode fails");

    assert!(
        matches!(
            err,
            RemoteError::Decode { ref record, source: NameError::Json(_) } if record.contains("ta\u{fffd}nk")
        ),
        "unexpected: {err:?}"
    );
}

#[rstest]
#[tokio::test]
async fn remote_exit_code_is_structured() {
    let (_guard, base) = control_base();
    let (host, runner) = connected_host(&base);
    host.dial().await.expect("dial succeeds");
    runner.push_output(Some(1), Vec::new(), "zfs list: exit code 1\n");

    let err = host.list().await.expect_err("remote failure");

    assert_eq!(
        err,
        RemoteError::Exit {
            subcommand: String::from("list"),
            exit_code: 1,
            stderr: String::from("zfs list: exit code 1"),
        }
    );
    assert_eq!(
        err.to_string(),
        "remote: zsm list: exit code: 1: zfs list: exit code 1"
    );
}

#[rstest]
#[case::ssh_failure(Some(255))]
#[case::killed(None)]
#[tokio::test]
async fn ssh_failure_during_session_is_transport(#[case] code: Option<i32>) {
    let (_guard, base) = control_base();
    let (host, runner) = connected_host(&base);
    host.dial().await.expect("dial succeeds");
    runner.push_output(code, Vec::new(), "Connection reset by peer");

    let err = host.list().await.expect_err("transport failure");

    assert_eq!(
        err,
        RemoteError::Transport {
            operation: "list",
            message: String::from("Connection reset by peer"),
        }
    );
}

#[rstest]
#[tokio::test]
async fn receive_streams_into_remote_zsm() {
    let (_guard, base) = control_base();
    let (host, runner) = connected_host(&base);
    host.dial().await.expect("dial succeeds");
    runner.push_success();
    let snapshot = name("tank", 0);
    let mut payload: &[u8] = b"stream bytes";

    host.receive_snapshot("backup", &snapshot, &mut payload)
        .await
        .expect("receive succeeds");

    let session = runner.invocations().get(1).cloned().expect("session");
    assert_eq!(session.stdin, b"stream bytes");
    let command = session.command_string();
    assert!(command.contains("zsm receive backup "), "{command}");
    assert!(command.contains("2024-03-01T12:00:00"), "{command}");
}

#[rstest]
#[tokio::test]
async fn receive_failure_maps_into_snapshot_error() {
    let (_guard, base) = control_base();
    let (host, runner) = connected_host(&base);
    host.dial().await.expect("dial succeeds");
    runner.push_output(Some(1), Vec::new(), "receive snapshot: exists");
    let mut payload: &[u8] = b"";

    let err = host
        .receive_snapshot("backup", &name("tank", 0), &mut payload)
        .await
        .expect_err("remote refuses");

    assert!(matches!(
        err,
        SnapshotError::Remote(RemoteError::Exit { exit_code: 1, .. })
    ));
}

#[rstest]
#[tokio::test]
async fn close_stops_master_and_is_idempotent() {
    let (_guard, base) = control_base();
    let (host, runner) = connected_host(&base);
    host.dial().await.expect("dial succeeds");
    runner.push_success();

    host.close().await.expect("close succeeds");
    host.close().await.expect("second close is a no-op");

    assert!(!host.is_connected().await);
    assert!(control_dirs(&base).is_empty());
    let invocations = runner.invocations();
    assert_eq!(invocations.len(), 2);
    let exit = invocations.get(1).expect("exit request").command_string();
    assert!(exit.contains("-O exit"), "{exit}");
}

#[rstest]
#[tokio::test]
async fn close_removes_directory_even_when_master_is_gone() {
    let (_guard, base) = control_base();
    let (host, runner) = connected_host(&base);
    host.dial().await.expect("dial succeeds");
    runner.push_failure(255);

    host.close().await.expect("close succeeds");

    assert!(control_dirs(&base).is_empty());
}
