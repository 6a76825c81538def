//! Unit tests for the SSH transport and its settings.

mod host;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

use super::RemoteConfig;

/// Temporary control directory base with a UTF-8 path.
pub(super) fn control_base() -> (TempDir, Utf8PathBuf) {
    let dir = TempDir::new().expect("create temp dir");
    let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp path");
    (dir, path)
}

/// Complete settings pointing at `backup.example`.
pub(super) fn remote_config(control_dir: &Utf8Path) -> RemoteConfig {
    RemoteConfig {
        ssh_bin: String::from("ssh"),
        ssh_user: String::from("root"),
        ssh_host: String::from("backup.example"),
        ssh_port: 22,
        ssh_identity_file: None,
        ssh_host_key: String::from("ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIGtest"),
        remote_zsm: String::from("zsm"),
        control_dir: Some(control_dir.to_string()),
    }
}
