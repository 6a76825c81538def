//! Tests for `ProcessCommandRunner` capture and streaming.

use super::*;
use rstest::rstest;
use std::ffi::OsString;

fn shell(script: &str) -> Vec<OsString> {
    vec![OsString::from("-c"), OsString::from(script)]
}

#[rstest]
#[case("printf out && printf err 1>&2", Some(0), "out", "err")]
#[case("printf out && printf err 1>&2; exit 42", Some(42), "out", "err")]
#[case("exit 7", Some(7), "", "")]
#[tokio::test]
async fn runner_captures_output_and_exit_code(
    #[case] script: &str,
    #[case] code: Option<i32>,
    #[case] stdout: &str,
    #[case] stderr: &str,
) {
    let args = shell(script);
    let output = ProcessCommandRunner
        .run("sh", &args, CommandIo::captured())
        .await
        .expect("command should execute");

    assert_eq!(output.code, code);
    assert_eq!(output.stdout, stdout.as_bytes());
    assert_eq!(output.stderr, stderr);
}

#[tokio::test]
async fn runner_streams_stdin_to_stdout_sink() {
    let payload = vec![7_u8; 256 * 1024];
    let mut reader: &[u8] = &payload;
    let mut sink = Vec::new();
    let args = shell("cat");

    let output = ProcessCommandRunner
        .run(
            "sh",
            &args,
            CommandIo {
                stdin: Some(&mut reader),
                stdout: Some(&mut sink),
                detached: false,
            },
        )
        .await
        .expect("cat should run");

    assert!(output.is_success());
    assert!(output.stdout.is_empty(), "streamed stdout is not captured");
    assert_eq!(sink, payload);
}

#[tokio::test]
async fn runner_reports_exit_code_when_child_ignores_stdin() {
    let payload = vec![1_u8; 1024 * 1024];
    let mut reader: &[u8] = &payload;
    let args = shell("printf refused 1>&2; exit 3");

    let output = ProcessCommandRunner
        .run("sh", &args, CommandIo::reading_from(&mut reader))
        .await
        .expect("exit status wins over a broken stdin pipe");

    assert_eq!(output.code, Some(3));
    assert_eq!(output.stderr, "refused");
}

#[tokio::test]
async fn runner_reports_spawn_failure() {
    let err = ProcessCommandRunner
        .run("/nonexistent/zsm-test-binary", &[], CommandIo::captured())
        .await
        .expect_err("missing binary should fail to spawn");

    assert!(matches!(err, CommandError::Spawn { ref program, .. } if program == "/nonexistent/zsm-test-binary"));
}

#[tokio::test]
async fn detached_runner_discards_output() {
    let args = shell("printf out; printf err 1>&2");
    let output = ProcessCommandRunner
        .run("sh", &args, CommandIo::detached())
        .await
        .expect("command should execute");

    assert!(output.is_success());
    assert!(output.stdout.is_empty());
    assert!(output.stderr.is_empty());
}

async fn run_script(script: &str, io: CommandIo<'_>) -> Result<CommandOutput, CommandError> {
    let args = shell(script);
    ProcessCommandRunner.run("sh", &args, io).await
}

#[tokio::test]
async fn runner_accepts_arguments_shorter_lived_than_streams() {
    let mut reader: &[u8] = b"piped";
    let mut sink = Vec::new();

    let output = run_script(
        "cat",
        CommandIo {
            stdin: Some(&mut reader),
            stdout: Some(&mut sink),
            detached: false,
        },
    )
    .await
    .expect("cat should run");

    assert!(output.is_success());
    assert_eq!(sink, b"piped");
}
