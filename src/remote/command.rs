//! `ssh` argument construction.
//!
//! Every invocation shares the connection options: port, identity, the
//! pinned `known_hosts` file and the control socket. The master is started
//! once per connection; sessions and the exit request reuse its socket.

use std::ffi::OsString;

use shell_escape::unix::escape;

use super::config::{RemoteConfig, expand_tilde};
use super::control::ControlChannel;

/// Arguments starting the background master connection.
pub(crate) fn master_args(config: &RemoteConfig, channel: &ControlChannel) -> Vec<OsString> {
    let mut args = connection_options(config, channel);
    push_all(
        &mut args,
        &["-M", "-N", "-f", "-E", channel.log().as_str()],
    );
    args.push(OsString::from(config.destination()));
    args
}

/// Arguments running `remote_command` over the master connection.
pub(crate) fn session_args(
    config: &RemoteConfig,
    channel: &ControlChannel,
    remote_command: &str,
) -> Vec<OsString> {
    let mut args = connection_options(config, channel);
    push_all(&mut args, &["-o", "ControlMaster=no"]);
    args.push(OsString::from(config.destination()));
    args.push(OsString::from(remote_command));
    args
}

/// Arguments asking the master connection to exit.
pub(crate) fn exit_args(config: &RemoteConfig, channel: &ControlChannel) -> Vec<OsString> {
    let mut args = connection_options(config, channel);
    push_all(&mut args, &["-O", "exit"]);
    args.push(OsString::from(config.destination()));
    args
}

/// Shell-escapes `program` and `words` into one remote command line.
pub(crate) fn remote_command(program: &str, words: &[&str]) -> String {
    std::iter::once(program)
        .chain(words.iter().copied())
        .map(|word| escape(word.into()).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn connection_options(config: &RemoteConfig, channel: &ControlChannel) -> Vec<OsString> {
    let mut args = Vec::new();
    let port = config.ssh_port.to_string();
    push_all(&mut args, &["-p", port.as_str()]);
    if let Some(identity) = config.ssh_identity_file.as_deref() {
        let expanded = expand_tilde(identity);
        push_all(&mut args, &["-i", expanded.as_str()]);
    }
    let known_hosts = format!("UserKnownHostsFile={}", channel.known_hosts());
    let socket = channel.socket();
    push_all(
        &mut args,
        &[
            "-o",
            "BatchMode=yes",
            "-o",
            "StrictHostKeyChecking=yes",
            "-o",
            known_hosts.as_str(),
            "-o",
            "GlobalKnownHostsFile=/dev/null",
            "-S",
            socket.as_str(),
        ],
    );
    args
}

fn push_all(args: &mut Vec<OsString>, values: &[&str]) {
    args.extend(values.iter().map(OsString::from));
}
