//! Per-connection control directory holding the master socket, the pinned
//! `known_hosts` file and the master's log.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::{Dir, DirBuilder, DirBuilderExt};
use uuid::Uuid;

const KNOWN_HOSTS: &str = "known_hosts";
const SOCKET: &str = "control.sock";
const LOG: &str = "ssh.log";
const DIRECTORY_MODE: u32 = 0o700;

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ControlChannel {
    base: Utf8PathBuf,
    name: String,
    directory: Utf8PathBuf,
}

impl ControlChannel {
    /// Creates a fresh owner-only directory under `base` and pins
    /// `known_hosts_line`.
    pub(crate) fn create(base: &Utf8Path, known_hosts_line: &str) -> io::Result<Self> {
        let parent = Dir::open_ambient_dir(base, ambient_authority())?;
        let name = format!("zsm-{}", Uuid::new_v4().simple());
        let mut builder = DirBuilder::new();
        builder.mode(DIRECTORY_MODE);
        parent.create_dir_with(&name, &builder)?;
        let channel = Self {
            base: base.to_owned(),
            directory: base.join(&name),
            name,
        };
        let written = parent
            .open_dir(&channel.name)
            .and_then(|dir| dir.write(KNOWN_HOSTS, format!("{known_hosts_line}\n")));
        if let Err(err) = written {
            channel.remove().ok();
            return Err(err);
        }
        Ok(channel)
    }

    pub(crate) fn directory(&self) -> &Utf8Path {
        &self.directory
    }

    pub(crate) fn socket(&self) -> Utf8PathBuf {
        self.directory.join(SOCKET)
    }

    pub(crate) fn known_hosts(&self) -> Utf8PathBuf {
        self.directory.join(KNOWN_HOSTS)
    }

    pub(crate) fn log(&self) -> Utf8PathBuf {
        self.directory.join(LOG)
    }

    /// Last lines `ssh` wrote to the master log, if any.
    pub(crate) fn read_log(&self) -> String {
        Dir::open_ambient_dir(&self.directory, ambient_authority())
            .and_then(|dir| dir.read_to_string(LOG))
            .map(|text| text.trim().to_owned())
            .unwrap_or_default()
    }

    /// Deletes the directory and everything in it.
    pub(crate) fn remove(&self) -> io::Result<()> {
        Dir::open_ambient_dir(&self.base, ambient_authority())?.remove_dir_all(&self.name)
    }
}
