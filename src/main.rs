//! Binary entry point for the `zsm` CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use zsm::{
    BackendError, BucketConfig, ConfigError, CreateOptions, Interval, Lister, Name, NameError,
    Receiver, RemoteConfig, RemoteError, RemoteHost, Replicator, SnapshotError, SnapshotManager,
    TransferError, ZfsCommand, ZsmConfig,
};

mod cli;

use cli::{
    CleanCommand, Cli, Command, CreateCommand, ListCommand, OutputFormat, ReceiveCommand,
    SendCommand,
};

type LocalManager = SnapshotManager<ZfsCommand>;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Backend(#[from] BackendError),
    #[error("{0}")]
    Snapshot(#[from] SnapshotError),
    #[error("{0}")]
    Transfer(#[from] TransferError),
    #[error("{0}")]
    Remote(#[from] RemoteError),
    #[error("{0}")]
    Name(#[from] NameError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    if matches!(cli.command, Command::Version) {
        writeln!(io::stdout(), "zsm {}", env!("CARGO_PKG_VERSION"))?;
        return Ok(());
    }

    let config = load_config(cli.zfs_cmd)?;
    let manager = SnapshotManager::new(ZfsCommand::new(config.zfs_cmd.trim())?);
    match cli.command {
        Command::Create(args) => create(&config, &manager, args).await,
        Command::Clean(args) => clean(&config, &manager, &args).await,
        Command::List(args) => list(&manager, &args).await,
        Command::Receive(args) => receive(&manager, &args).await,
        Command::Send(args) => send(&config, &manager, &args).await,
        Command::Version => Ok(()),
    }
}

fn load_config(zfs_cmd: Option<String>) -> Result<ZsmConfig, CliError> {
    let mut config = ZsmConfig::load_without_cli_args()?;
    if let Some(path) = zfs_cmd {
        config.zfs_cmd = path;
    }
    config.validate()?;
    Ok(config)
}

async fn create(
    config: &ZsmConfig,
    manager: &LocalManager,
    args: CreateCommand,
) -> Result<(), CliError> {
    let mut options = CreateOptions::new();
    if let Some(file_system) = args.file_system {
        options = options.file_system(file_system);
    }
    for excluded in config.excluded_file_systems().iter().chain(&args.exclude) {
        options = options.exclude(excluded);
    }

    let created = manager.create_snapshots(&options).await?;
    write_names(&created)
}

async fn clean(
    config: &ZsmConfig,
    manager: &LocalManager,
    args: &CleanCommand,
) -> Result<(), CliError> {
    let destroyed = manager
        .clean_snapshots(&bucket_config(config, args))
        .await?;
    write_names(&destroyed)
}

fn bucket_config(config: &ZsmConfig, args: &CleanCommand) -> BucketConfig {
    [
        (Interval::Minute, args.minute),
        (Interval::Hour, args.hour),
        (Interval::Day, args.day),
        (Interval::Week, args.week),
        (Interval::Month, args.month),
        (Interval::Year, args.year),
    ]
    .into_iter()
    .fold(config.bucket_config(), |buckets, (interval, count)| {
        count.map_or(buckets, |capacity| buckets.with(interval, capacity))
    })
}

async fn list(manager: &LocalManager, args: &ListCommand) -> Result<(), CliError> {
    let mut names = manager.list_snapshots().await?;
    names.sort_by(|a, b| {
        a.file_system()
            .cmp(b.file_system())
            .then_with(|| a.timestamp().cmp(&b.timestamp()))
    });

    match args.output {
        OutputFormat::Text => write_names(&names),
        OutputFormat::Jsonl => {
            let mut stdout = io::stdout().lock();
            for name in &names {
                name.write_json_line(&mut stdout)?;
            }
            stdout.flush()?;
            Ok(())
        }
    }
}

async fn receive(manager: &LocalManager, args: &ReceiveCommand) -> Result<(), CliError> {
    let name: Name = args.snapshot.parse()?;
    let mut stdin = tokio::io::stdin();
    manager
        .receive_snapshot(&args.target, &name, &mut stdin)
        .await?;
    Ok(())
}

async fn send(
    config: &ZsmConfig,
    manager: &LocalManager,
    args: &SendCommand,
) -> Result<(), CliError> {
    let replicator = replicator(config, args);
    let remote = RemoteConfig::load_without_cli_args()?.with_destination(&args.destination)?;
    let host = RemoteHost::new(remote)?;
    host.dial().await?;

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let token = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        }
    });

    let outcome = replicator.transfer(&host, manager, &cancel).await;
    interrupt.abort();
    let closed = host.close().await;

    let transferred = outcome?;
    closed?;
    info!(count = transferred.len(), destination = %args.destination, "replication finished");
    write_names(&transferred)
}

fn replicator(config: &ZsmConfig, args: &SendCommand) -> Replicator {
    let selected = args.source.as_deref().map_or_else(
        || Replicator::new(args.target.as_str()),
        |source| Replicator::new(args.target.as_str()).file_system(source),
    );
    config
        .send_excluded_file_systems()
        .iter()
        .chain(&args.exclude)
        .fold(selected, |replicator, excluded| replicator.exclude(excluded))
}

fn write_names(names: &[Name]) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    for name in names {
        writeln!(stdout, "{name}")?;
    }
    stdout.flush()?;
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "zsm: {err}").ok();
}
