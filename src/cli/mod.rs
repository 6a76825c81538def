//! Command-line interface definitions for the `zsm` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Top-level CLI for the `zsm` binary.
#[derive(Debug, Parser)]
#[command(
    name = "zsm",
    about = "Create, prune, and replicate ZFS snapshots",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Path to the `zfs` executable. Overrides `ZSM_ZFS_CMD` and `zfs_cmd`
    /// in `zsm.toml`.
    #[arg(long = "zfs-cmd", value_name = "PATH", global = true)]
    pub(crate) zfs_cmd: Option<String>,
    /// Subcommand to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Subcommands of the `zsm` binary.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Snapshot every file system, or only the one given.
    #[command(name = "create")]
    Create(CreateCommand),
    /// Destroy snapshots the retention policy no longer keeps.
    #[command(name = "clean")]
    Clean(CleanCommand),
    /// Print managed snapshots.
    #[command(name = "list")]
    List(ListCommand),
    /// Receive a snapshot stream on stdin.
    #[command(name = "receive")]
    Receive(ReceiveCommand),
    /// Replicate local snapshots to a remote host.
    #[command(name = "send")]
    Send(SendCommand),
    /// Print the version.
    #[command(name = "version")]
    Version,
}

/// Arguments for `zsm create`.
#[derive(Debug, Args)]
pub(crate) struct CreateCommand {
    /// File system to snapshot. Defaults to every file system.
    #[arg(value_name = "FILE_SYSTEM")]
    pub(crate) file_system: Option<String>,
    /// File system to skip; may be repeated. Added to `create_exclude`.
    #[arg(short = 'e', long = "exclude", value_name = "FILE_SYSTEM")]
    pub(crate) exclude: Vec<String>,
}

/// Arguments for `zsm clean`. Each flag overrides the matching `keep_*`
/// setting; zero disables the bucket.
#[derive(Debug, Args)]
pub(crate) struct CleanCommand {
    /// Snapshots to keep at minute granularity.
    #[arg(short = 'm', long = "minute", value_name = "COUNT")]
    pub(crate) minute: Option<usize>,
    /// Snapshots to keep at hour granularity.
    #[arg(short = 'H', long = "hour", value_name = "COUNT")]
    pub(crate) hour: Option<usize>,
    /// Snapshots to keep at day granularity.
    #[arg(short = 'd', long = "day", value_name = "COUNT")]
    pub(crate) day: Option<usize>,
    /// Snapshots to keep at week granularity.
    #[arg(short = 'w', long = "week", value_name = "COUNT")]
    pub(crate) week: Option<usize>,
    /// Snapshots to keep at month granularity.
    #[arg(short = 'M', long = "month", value_name = "COUNT")]
    pub(crate) month: Option<usize>,
    /// Snapshots to keep at year granularity.
    #[arg(short = 'y', long = "year", value_name = "COUNT")]
    pub(crate) year: Option<usize>,
}

/// Arguments for `zsm list`.
#[derive(Debug, Args)]
pub(crate) struct ListCommand {
    /// Output format.
    #[arg(
        short = 'o',
        long = "output",
        value_enum,
        default_value_t = OutputFormat::Text
    )]
    pub(crate) output: OutputFormat,
}

/// Output formats accepted by `zsm list`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum OutputFormat {
    /// One snapshot name per line.
    Text,
    /// One JSON object per line.
    Jsonl,
}

/// Arguments for `zsm receive`.
#[derive(Debug, Args)]
pub(crate) struct ReceiveCommand {
    /// Existing file system that receives the snapshot.
    #[arg(value_name = "TARGET_FS")]
    pub(crate) target: String,
    /// Name of the snapshot carried by the stream.
    #[arg(value_name = "SNAPSHOT")]
    pub(crate) snapshot: String,
}

/// Arguments for `zsm send`.
#[derive(Debug, Args)]
pub(crate) struct SendCommand {
    /// Remote host as `USER@HOST[:PORT]`.
    #[arg(value_name = "DESTINATION")]
    pub(crate) destination: String,
    /// File system on the remote host that receives the snapshots.
    #[arg(value_name = "TARGET_FS")]
    pub(crate) target: String,
    /// Local file system to replicate. Defaults to every file system.
    #[arg(value_name = "SOURCE_FS")]
    pub(crate) source: Option<String>,
    /// File system to skip; may be repeated. Added to `send_exclude`.
    #[arg(short = 'e', long = "exclude", value_name = "FILE_SYSTEM")]
    pub(crate) exclude: Vec<String>,
}
