//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Months, TimeDelta, Utc};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::backend::{BackendError, BackendFuture, ListKind, StorageBackend};
use crate::process::{CommandError, CommandFuture, CommandIo, CommandOutput, CommandRunner};
use crate::snapshot::{Interval, Name};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
/// Data streamed into the runner is recorded with the invocation; scripted
/// stdout is written to the caller's sink when one is supplied.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    state: Arc<Mutex<ScriptState>>,
}

#[derive(Debug, Default)]
struct ScriptState {
    responses: VecDeque<CommandOutput>,
    invocations: Vec<CommandInvocation>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Bytes read from the supplied stdin stream.
    pub stdin: Vec<u8>,
    /// Whether the invocation was detached.
    pub detached: bool,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.lock().invocations.clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), Vec::new(), "");
    }

    /// Pushes a specific exit code.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code), Vec::new(), "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), Vec::new(), "simulated failure");
    }

    /// Pushes a response with no exit code to simulate abnormal termination.
    pub fn push_missing_exit_code(&self) {
        self.push_output(None, Vec::new(), "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<Vec<u8>>,
        stderr: impl Into<String>,
    ) {
        self.lock().responses.push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }

    fn record(&self, invocation: CommandInvocation) -> Option<CommandOutput> {
        let mut state = self.lock();
        state.invocations.push(invocation);
        state.responses.pop_front()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a, 'io: 'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
        io: CommandIo<'io>,
    ) -> CommandFuture<'a> {
        Box::pin(async move {
            let CommandIo {
                stdin,
                stdout,
                detached,
            } = io;
            let stream_error = |err: std::io::Error| CommandError::Stream {
                program: program.to_owned(),
                message: err.to_string(),
            };

            let mut consumed = Vec::new();
            if let Some(reader) = stdin {
                reader
                    .read_to_end(&mut consumed)
                    .await
                    .map_err(stream_error)?;
            }

            let response = self
                .record(CommandInvocation {
                    program: program.to_owned(),
                    args: args.to_vec(),
                    stdin: consumed,
                    detached,
                })
                .ok_or_else(|| CommandError::Spawn {
                    program: program.to_owned(),
                    message: String::from("no scripted response available"),
                })?;

            match stdout {
                Some(writer) => {
                    writer
                        .write_all(&response.stdout)
                        .await
                        .map_err(stream_error)?;
                    writer.flush().await.map_err(stream_error)?;
                    Ok(CommandOutput {
                        stdout: Vec::new(),
                        ..response
                    })
                }
                None => Ok(response),
            }
        })
    }
}

/// Operations of [`FakeStorage`] that can be made to fail.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FakeOperation {
    /// [`StorageBackend::create_snapshot`].
    CreateSnapshot,
    /// [`StorageBackend::list`].
    List,
    /// [`StorageBackend::destroy`].
    Destroy,
    /// [`StorageBackend::receive`].
    Receive,
    /// [`StorageBackend::send`].
    Send,
}

/// Call recorded by [`FakeStorage`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BackendCall {
    /// A snapshot was created.
    CreateSnapshot(String),
    /// Datasets of a kind were listed.
    List(ListKind),
    /// A snapshot was destroyed.
    Destroy(String),
    /// A stream was received.
    Receive {
        /// Snapshot name passed to the backend.
        name: String,
        /// Bytes read from the stream.
        data: Vec<u8>,
    },
    /// A stream was sent.
    Send {
        /// Snapshot name passed to the backend.
        name: String,
        /// Incremental reference, if any.
        reference: Option<String>,
    },
}

#[derive(Clone, Debug)]
struct Failure {
    operation: FakeOperation,
    target_prefix: Option<String>,
    error: BackendError,
}

#[derive(Debug, Default)]
struct FakeState {
    file_systems: Vec<String>,
    snapshots: Vec<String>,
    calls: Vec<BackendCall>,
    failures: Vec<Failure>,
    send_payload: Vec<u8>,
}

impl FakeState {
    fn failure(&self, operation: FakeOperation, target: &str) -> Option<BackendError> {
        self.failures
            .iter()
            .find(|failure| {
                failure.operation == operation
                    && failure
                        .target_prefix
                        .as_deref()
                        .is_none_or(|prefix| target.starts_with(prefix))
            })
            .map(|failure| failure.error.clone())
    }
}

/// In-memory [`StorageBackend`] that records calls.
///
/// Clones share state, so a test can hand one clone to a manager and keep
/// another for assertions. Received streams register the snapshot name so a
/// subsequent listing reflects the replication.
#[derive(Clone, Debug, Default)]
pub struct FakeStorage {
    state: Arc<Mutex<FakeState>>,
}

impl FakeStorage {
    /// Creates an empty fake.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds file systems to the fake.
    #[must_use]
    pub fn with_file_systems<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock()
            .file_systems
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Adds snapshot names to the fake.
    #[must_use]
    pub fn with_snapshots<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock()
            .snapshots
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Sets the bytes written by every send.
    #[must_use]
    pub fn with_send_payload(self, payload: impl Into<Vec<u8>>) -> Self {
        self.lock().send_payload = payload.into();
        self
    }

    /// Makes every call of `operation` fail with `error`.
    #[must_use]
    pub fn failing(self, operation: FakeOperation, error: BackendError) -> Self {
        self.lock().failures.push(Failure {
            operation,
            target_prefix: None,
            error,
        });
        self
    }

    /// Makes calls of `operation` whose target starts with `prefix` fail.
    #[must_use]
    pub fn failing_for(self, operation: FakeOperation, prefix: &str, error: BackendError) -> Self {
        self.lock().failures.push(Failure {
            operation,
            target_prefix: Some(prefix.to_owned()),
            error,
        });
        self
    }

    /// Recorded calls in order.
    #[must_use]
    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().calls.clone()
    }

    /// Current snapshot names.
    #[must_use]
    pub fn snapshots(&self) -> Vec<String> {
        self.lock().snapshots.clone()
    }

    fn begin(
        &self,
        call: BackendCall,
        operation: FakeOperation,
        target: &str,
    ) -> Result<(), BackendError> {
        let mut state = self.lock();
        state.calls.push(call);
        state.failure(operation, target).map_or(Ok(()), Err)
    }
}

impl StorageBackend for FakeStorage {
    fn create_snapshot<'a>(&'a self, name: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.begin(
                BackendCall::CreateSnapshot(name.to_owned()),
                FakeOperation::CreateSnapshot,
                name,
            )?;
            self.lock().snapshots.push(name.to_owned());
            Ok(())
        })
    }

    fn list(&self, kind: ListKind) -> BackendFuture<'_, Vec<String>> {
        Box::pin(async move {
            self.begin(BackendCall::List(kind), FakeOperation::List, kind.as_str())?;
            let state = self.lock();
            Ok(match kind {
                ListKind::FileSystem => state.file_systems.clone(),
                ListKind::Snapshot => state.snapshots.clone(),
            })
        })
    }

    fn destroy<'a>(&'a self, name: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.begin(
                BackendCall::Destroy(name.to_owned()),
                FakeOperation::Destroy,
                name,
            )?;
            self.lock().snapshots.retain(|existing| existing != name);
            Ok(())
        })
    }

    fn receive<'a>(
        &'a self,
        name: &'a str,
        stream: &'a mut (dyn AsyncRead + Unpin + Send),
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let mut data = Vec::new();
            stream
                .read_to_end(&mut data)
                .await
                .map_err(|err| stream_failure("receive", &err))?;
            self.begin(
                BackendCall::Receive {
                    name: name.to_owned(),
                    data,
                },
                FakeOperation::Receive,
                name,
            )?;
            self.lock().snapshots.push(name.to_owned());
            Ok(())
        })
    }

    fn send<'a>(
        &'a self,
        name: &'a str,
        reference: Option<&'a str>,
        stream: &'a mut (dyn AsyncWrite + Unpin + Send),
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.begin(
                BackendCall::Send {
                    name: name.to_owned(),
                    reference: reference.map(str::to_owned),
                },
                FakeOperation::Send,
                name,
            )?;
            let payload = self.lock().send_payload.clone();
            stream
                .write_all(&payload)
                .await
                .map_err(|err| stream_failure("send", &err))?;
            stream
                .flush()
                .await
                .map_err(|err| stream_failure("send", &err))
        })
    }
}

fn stream_failure(subcommand: &str, err: &std::io::Error) -> BackendError {
    BackendError::Command {
        subcommand: subcommand.to_owned(),
        source: CommandError::Stream {
            program: String::from("fake"),
            message: err.to_string(),
        },
    }
}

/// Builds `count` names for `file_system`, oldest first, spaced one
/// `interval` apart and ending at `end`.
///
/// # Panics
///
/// Panics when `file_system` is not a valid snapshot file system name or the
/// stepped timestamps fall outside the representable range.
#[must_use]
pub fn fake_names(
    file_system: &str,
    end: DateTime<Utc>,
    interval: Interval,
    count: usize,
) -> Vec<Name> {
    (0..count)
        .rev()
        .map(|steps| {
            let timestamp = step_back(end, interval, steps)
                .unwrap_or_else(|| panic!("timestamp {steps} {interval}s before {end}"));
            Name::new(file_system, timestamp)
                .unwrap_or_else(|err| panic!("fake name for {file_system}: {err}"))
        })
        .collect()
}

fn step_back(end: DateTime<Utc>, interval: Interval, steps: usize) -> Option<DateTime<Utc>> {
    let count = i64::try_from(steps).ok()?;
    let months = u32::try_from(steps).ok()?;
    match interval {
        Interval::Minute => end.checked_sub_signed(TimeDelta::try_minutes(count)?),
        Interval::Hour => end.checked_sub_signed(TimeDelta::try_hours(count)?),
        Interval::Day => end.checked_sub_signed(TimeDelta::try_days(count)?),
        Interval::Week => end.checked_sub_signed(TimeDelta::try_weeks(count)?),
        Interval::Month => end.checked_sub_months(Months::new(months)),
        Interval::Year => end.checked_sub_months(Months::new(months.checked_mul(12)?)),
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: tokio::sync::MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
