//! Tests for transfer planning and streaming between two managers.

use super::end_of_sequence;
use crate::backend::BackendError;
use crate::snapshot::{
    Interval, Name, Replicator, SnapshotError, SnapshotManager, TransferError, TransferStep, plan,
};
use crate::test_support::{BackendCall, FakeOperation, FakeStorage, fake_names};
use rstest::rstest;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

fn tank(count: usize) -> Vec<Name> {
    fake_names("tank", end_of_sequence(), Interval::Hour, count)
}

fn texts(names: &[Name]) -> Vec<String> {
    names.iter().map(ToString::to_string).collect()
}

fn nth(names: &[Name], index: usize) -> Name {
    names.get(index).cloned().expect("name in range")
}

fn sends(storage: &FakeStorage) -> Vec<(String, Option<String>)> {
    storage
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            BackendCall::Send { name, reference } => Some((name, reference)),
            _ => None,
        })
        .collect()
}

fn receives(storage: &FakeStorage) -> Vec<(String, Vec<u8>)> {
    storage
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            BackendCall::Receive { name, data } => Some((name, data)),
            _ => None,
        })
        .collect()
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("log buffer")).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("log buffer").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn destination_with(snapshots: &[Name]) -> FakeStorage {
    FakeStorage::new()
        .with_file_systems(["backup"])
        .with_snapshots(texts(snapshots))
}

#[rstest]
fn plan_sends_newest_snapshot_in_full_when_destination_lacks_file_system() {
    let source = tank(3);

    let steps = plan(source.clone(), Vec::new()).expect("plan succeeds");

    assert_eq!(
        steps,
        [TransferStep {
            name: nth(&source, 2),
            reference: None,
        }]
    );
}

#[rstest]
fn plan_references_newest_snapshot_destination_has() {
    let source = tank(5);
    let destination = source.get(..2).expect("five names").to_vec();

    let steps = plan(source.clone(), destination).expect("plan succeeds");

    assert_eq!(
        steps,
        [TransferStep {
            name: nth(&source, 4),
            reference: Some(nth(&source, 1)),
        }]
    );
}

#[rstest]
fn plan_skips_file_systems_in_sync_and_ignores_destination_only_ones() {
    let source = tank(2);
    let mut destination = source.clone();
    destination.extend(fake_names("elsewhere", end_of_sequence(), Interval::Day, 4));

    let steps = plan(source, destination).expect("plan succeeds");

    assert!(steps.is_empty());
}

#[rstest]
fn plan_rejects_destination_ahead_of_source() {
    let source = tank(2);
    let mut destination = tank(3);
    destination.extend(fake_names("other", end_of_sequence(), Interval::Day, 1));

    let err = plan(source, destination).expect_err("destination ahead");

    assert!(matches!(
        err,
        TransferError::DestinationAhead { ref file_system, destination: 3, source_count: 2 }
            if file_system == "tank"
    ));
    assert_eq!(
        err.to_string(),
        "transfer: tank: dst has more snapshots: 3 > 2"
    );
}

#[rstest]
fn plan_after_full_baseline_references_the_baseline() {
    let source = tank(5);
    let baseline = vec![nth(&source, 2)];

    let steps = plan(source.clone(), baseline).expect("plan succeeds");

    assert_eq!(
        steps,
        [TransferStep {
            name: nth(&source, 4),
            reference: Some(nth(&source, 2)),
        }]
    );
}

#[rstest]
fn plan_skips_destination_holding_newest_snapshot() {
    let source = tank(3);
    let destination = vec![nth(&source, 2)];

    let steps = plan(source, destination).expect("plan succeeds");

    assert!(steps.is_empty());
}

#[rstest]
fn plan_rejects_destination_without_common_snapshot() {
    let source = tank(3);
    let destination = fake_names("tank", super::at("2019-01-01T00:00:00Z"), Interval::Day, 1);

    let err = plan(source, destination).expect_err("no common snapshot");

    assert!(matches!(err, TransferError::Diverged { ref file_system } if file_system == "tank"));
}

#[rstest]
#[tokio::test]
async fn transfer_streams_full_baseline() {
    let names = tank(3);
    let source = FakeStorage::new()
        .with_snapshots(texts(&names))
        .with_send_payload(b"full-stream".to_vec());
    let destination = destination_with(&[]);

    let transferred = Replicator::new("backup")
        .transfer(
            &SnapshotManager::new(destination.clone()),
            &SnapshotManager::new(source.clone()),
            &CancellationToken::new(),
        )
        .await
        .expect("transfer succeeds");

    assert_eq!(transferred, [nth(&names, 2)]);
    assert_eq!(sends(&source), [(nth(&names, 2).to_string(), None)]);
    assert_eq!(
        receives(&destination),
        [(nth(&names, 2).to_string(), b"full-stream".to_vec())]
    );
}

#[rstest]
#[tokio::test]
async fn transfer_streams_one_incremental_range() {
    let names = tank(5);
    let source = FakeStorage::new()
        .with_snapshots(texts(&names))
        .with_send_payload(b"increment".to_vec());
    let destination = destination_with(names.get(..2).expect("five names"));

    Replicator::new("backup")
        .transfer(
            &SnapshotManager::new(destination.clone()),
            &SnapshotManager::new(source.clone()),
            &CancellationToken::new(),
        )
        .await
        .expect("transfer succeeds");

    assert_eq!(
        sends(&source),
        [(
            nth(&names, 4).to_string(),
            Some(nth(&names, 1).to_string())
        )]
    );
    assert_eq!(receives(&destination).len(), 1);
}

#[rstest]
#[tokio::test]
async fn transfer_replicates_only_selected_source_file_system() {
    let home = fake_names("tank/home", end_of_sequence(), Interval::Hour, 2);
    let mut local = texts(&tank(2));
    local.extend(texts(&home));
    let source = FakeStorage::new()
        .with_snapshots(local)
        .with_send_payload(b"home".to_vec());
    let destination = destination_with(&[]);

    let transferred = Replicator::new("backup")
        .file_system("/tank/home")
        .transfer(
            &SnapshotManager::new(destination.clone()),
            &SnapshotManager::new(source.clone()),
            &CancellationToken::new(),
        )
        .await
        .expect("transfer succeeds");

    assert_eq!(transferred, [nth(&home, 1)]);
    assert_eq!(sends(&source), [(nth(&home, 1).to_string(), None)]);
    assert_eq!(receives(&destination).len(), 1);
}

#[rstest]
#[tokio::test]
async fn excluded_file_systems_are_neither_planned_nor_streamed() {
    let scratch = fake_names("tank/scratch", end_of_sequence(), Interval::Hour, 3);
    let names = tank(2);
    let mut local = texts(&names);
    local.extend(texts(scratch.get(..1).expect("three names")));
    let source = FakeStorage::new()
        .with_snapshots(local)
        .with_send_payload(b"tank".to_vec());
    let destination = destination_with(&scratch);

    let transferred = Replicator::new("backup")
        .exclude("tank/scratch")
        .transfer(
            &SnapshotManager::new(destination.clone()),
            &SnapshotManager::new(source.clone()),
            &CancellationToken::new(),
        )
        .await
        .expect("scratch lag is ignored");

    assert_eq!(transferred, [nth(&names, 1)]);
    assert_eq!(sends(&source), [(nth(&names, 1).to_string(), None)]);
}

#[rstest]
fn selection_ignores_leading_slash() {
    let replicator = Replicator::new("backup")
        .file_system("/tank")
        .exclude("/tank/tmp");

    assert!(replicator.selects_file_system("tank"));
    assert!(!replicator.selects_file_system("tank/tmp"));
    assert!(!replicator.selects_file_system("pool"));
}

#[rstest]
#[tokio::test]
async fn transfer_aborts_when_destination_is_ahead() {
    let names = tank(3);
    let lagging = fake_names("pool", end_of_sequence(), Interval::Hour, 2);
    let mut local = texts(names.get(..1).expect("three names"));
    local.extend(texts(&lagging));
    let source = FakeStorage::new()
        .with_snapshots(local)
        .with_send_payload(b"stream".to_vec());
    let destination = destination_with(&names);

    let err = Replicator::new("backup")
        .transfer(
            &SnapshotManager::new(destination.clone()),
            &SnapshotManager::new(source.clone()),
            &CancellationToken::new(),
        )
        .await
        .expect_err("destination ahead");

    assert!(matches!(err, TransferError::DestinationAhead { .. }));
    assert!(sends(&source).is_empty());
    assert!(receives(&destination).is_empty());
}

#[rstest]
#[tokio::test]
async fn transfer_with_empty_inventories_does_nothing() {
    let source = FakeStorage::new();
    let destination = destination_with(&[]);

    let transferred = Replicator::new("backup")
        .transfer(
            &SnapshotManager::new(destination),
            &SnapshotManager::new(source.clone()),
            &CancellationToken::new(),
        )
        .await
        .expect("nothing to do");

    assert!(transferred.is_empty());
    assert!(sends(&source).is_empty());
}

#[rstest]
#[tokio::test]
async fn transfer_wraps_listing_failures() {
    let failure = BackendError::NoOutput {
        subcommand: "list".to_owned(),
    };
    let source = FakeStorage::new().failing(FakeOperation::List, failure);

    let err = Replicator::new("backup")
        .transfer(
            &SnapshotManager::new(destination_with(&[])),
            &SnapshotManager::new(source),
            &CancellationToken::new(),
        )
        .await
        .expect_err("source listing fails");

    assert!(matches!(err, TransferError::ListSource(SnapshotError::Backend { .. })));
}

#[rstest]
#[tokio::test]
async fn transfer_reports_producer_failure() {
    let names = tank(2);
    let failure = BackendError::Exit {
        subcommand: "send".to_owned(),
        exit_code: 1,
        stderr: "no such snapshot".to_owned(),
    };
    let source = FakeStorage::new()
        .with_snapshots(texts(&names))
        .failing(FakeOperation::Send, failure);

    let err = Replicator::new("backup")
        .transfer(
            &SnapshotManager::new(destination_with(&[])),
            &SnapshotManager::new(source),
            &CancellationToken::new(),
        )
        .await
        .expect_err("send fails");

    assert!(matches!(err, TransferError::Send { ref name, .. } if *name == nth(&names, 1)));
}

#[rstest]
#[tokio::test]
async fn transfer_reports_consumer_failure() {
    let names = tank(2);
    let failure = BackendError::Exit {
        subcommand: "receive".to_owned(),
        exit_code: 1,
        stderr: "out of space".to_owned(),
    };
    let source = FakeStorage::new()
        .with_snapshots(texts(&names))
        .with_send_payload(vec![0_u8; 4096]);
    let destination = destination_with(&[]).failing(FakeOperation::Receive, failure);

    let err = Replicator::new("backup")
        .transfer(
            &SnapshotManager::new(destination),
            &SnapshotManager::new(source),
            &CancellationToken::new(),
        )
        .await
        .expect_err("receive fails");

    assert!(matches!(err, TransferError::Receive { .. }), "unexpected: {err}");
}

#[rstest]
#[tokio::test]
async fn consumer_that_stops_reading_releases_blocked_producer() {
    let names = tank(1);
    let source = FakeStorage::new()
        .with_snapshots(texts(&names))
        .with_send_payload(vec![1_u8; 1024 * 1024]);
    let destination = destination_with(&[]);

    let err = Replicator::new("missing_fs")
        .with_pipe_capacity(1024)
        .transfer(
            &SnapshotManager::new(destination.clone()),
            &SnapshotManager::new(source),
            &CancellationToken::new(),
        )
        .await
        .expect_err("target file system is missing");

    assert!(matches!(err, TransferError::Send { .. }), "unexpected: {err}");
    assert!(receives(&destination).is_empty());
}

#[rstest]
#[tokio::test]
async fn receive_failure_behind_broken_pipe_is_logged() {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer({
            let sink = logs.clone();
            move || sink.clone()
        })
        .with_ansi(false)
        .finish();
    let _default = tracing::subscriber::set_default(subscriber);
    let names = tank(1);
    let source = FakeStorage::new()
        .with_snapshots(texts(&names))
        .with_send_payload(vec![1_u8; 1024 * 1024]);

    let err = Replicator::new("missing_fs")
        .with_pipe_capacity(1024)
        .transfer(
            &SnapshotManager::new(destination_with(&[])),
            &SnapshotManager::new(source),
            &CancellationToken::new(),
        )
        .await
        .expect_err("target file system is missing");

    assert!(matches!(err, TransferError::Send { .. }), "unexpected: {err}");
    let output = logs.text();
    assert!(output.contains("WARN"), "{output}");
    assert!(
        output.contains("missing file system: missing_fs"),
        "{output}"
    );
}

#[rstest]
#[tokio::test]
async fn large_stream_passes_through_small_pipe() {
    let names = tank(1);
    let payload: Vec<u8> = (0..=255_u8).cycle().take(512 * 1024).collect();
    let source = FakeStorage::new()
        .with_snapshots(texts(&names))
        .with_send_payload(payload.clone());
    let destination = destination_with(&[]);

    Replicator::new("backup")
        .with_pipe_capacity(512)
        .transfer(
            &SnapshotManager::new(destination.clone()),
            &SnapshotManager::new(source),
            &CancellationToken::new(),
        )
        .await
        .expect("transfer succeeds");

    assert_eq!(
        receives(&destination),
        [(nth(&names, 0).to_string(), payload)]
    );
}

#[rstest]
#[tokio::test]
async fn cancelled_transfer_streams_nothing() {
    let names = tank(2);
    let source = FakeStorage::new().with_snapshots(texts(&names));
    let destination = destination_with(&[]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = Replicator::new("backup")
        .transfer(
            &SnapshotManager::new(destination.clone()),
            &SnapshotManager::new(source.clone()),
            &cancel,
        )
        .await
        .expect_err("cancelled");

    assert!(matches!(err, TransferError::Cancelled));
    assert!(sends(&source).is_empty());
    assert!(receives(&destination).is_empty());
}
