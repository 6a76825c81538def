//! `tokio::process` implementation of [`CommandRunner`].

use std::ffi::OsString;
use std::io;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::debug;

use super::{CommandError, CommandFuture, CommandIo, CommandOutput, CommandRunner};

/// Command runner that spawns real processes.
///
/// Children are killed when the returned future is dropped, so cancelling a
/// transfer never leaves an orphaned `zfs send` behind.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run<'a, 'io: 'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
        io: CommandIo<'io>,
    ) -> CommandFuture<'a> {
        Box::pin(run_process(program, args, io))
    }
}

async fn run_process(
    program: &str,
    args: &[OsString],
    io: CommandIo<'_>,
) -> Result<CommandOutput, CommandError> {
    let CommandIo {
        stdin,
        stdout,
        detached,
    } = io;

    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);
    command.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    if detached {
        command.stdout(Stdio::null()).stderr(Stdio::null());
    } else {
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
    }

    debug!(program, args = ?args, "spawning command");
    let mut child = command.spawn().map_err(|err| CommandError::Spawn {
        program: program.to_owned(),
        message: err.to_string(),
    })?;

    let child_stdin = child.stdin.take();
    let child_stdout = child.stdout.take();
    let child_stderr = child.stderr.take();

    let (fed, drained, stderr) = tokio::join!(
        feed_stdin(stdin, child_stdin),
        drain_stdout(child_stdout, stdout),
        read_stderr(child_stderr),
    );

    let status = child
        .wait()
        .await
        .map_err(|err| stream_error(program, &err))?;

    // A sink that stopped accepting data kills the child with SIGPIPE; report
    // the broken stream rather than the resulting signal.
    let captured = drained.map_err(|err| stream_error(program, &err))?;
    if status.success() {
        fed.map_err(|err| stream_error(program, &err))?;
    }

    Ok(CommandOutput {
        code: status.code(),
        stdout: captured,
        stderr: String::from_utf8_lossy(&stderr.unwrap_or_default()).into_owned(),
    })
}

async fn feed_stdin(
    source: Option<&mut (dyn AsyncRead + Unpin + Send)>,
    sink: Option<ChildStdin>,
) -> io::Result<()> {
    let (Some(reader), Some(mut writer)) = (source, sink) else {
        return Ok(());
    };
    tokio::io::copy(reader, &mut writer).await?;
    writer.shutdown().await
}

async fn drain_stdout(
    source: Option<ChildStdout>,
    sink: Option<&mut (dyn AsyncWrite + Unpin + Send)>,
) -> io::Result<Vec<u8>> {
    let Some(mut reader) = source else {
        return Ok(Vec::new());
    };
    let mut captured = Vec::new();
    match sink {
        Some(writer) => {
            tokio::io::copy(&mut reader, &mut *writer).await?;
            writer.flush().await?;
        }
        None => {
            reader.read_to_end(&mut captured).await?;
        }
    }
    Ok(captured)
}

async fn read_stderr(source: Option<ChildStderr>) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    if let Some(mut reader) = source {
        reader.read_to_end(&mut buffer).await?;
    }
    Ok(buffer)
}

fn stream_error(program: &str, err: &io::Error) -> CommandError {
    CommandError::Stream {
        program: program.to_owned(),
        message: err.to_string(),
    }
}
