// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Seeds a freshly formatted base filesystem with the minimal skeleton of
// mount points and placeholder files a container runtime expects to
// bind-mount over.

use std::fs::{self, DirBuilder, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::Path;

use crate::errors::VolsetResult;

const BASE_DIRECTORIES: &[&str] = &["dev/pts", "dev/shm", "proc", "sys"];
const BASE_FILES: &[&str] = &[".dockerinit", "etc/resolv.conf"];

fn ensure_dir(path: &Path) -> VolsetResult<()> {
    DirBuilder::new().recursive(true).mode(0o755).create(path)?;
    Ok(())
}

fn ensure_file(path: &Path) -> VolsetResult<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    OpenOptions::new()
        .write(true)
        .create(true)
        .mode(0o755)
        .open(path)?;
    Ok(())
}

fn needs_creation(path: &Path) -> VolsetResult<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(false),
        Err(ref err) if err.kind() == ErrorKind::NotFound => Ok(true),
        Err(err) => Err(err.into()),
    }
}

/// Populate the skeleton under `root`. Existing paths are left exactly
/// as found; only absent entries are created. A stat failure other than
/// not-found aborts.
pub fn populate_base_layer(root: &Path) -> VolsetResult<()> {
    for relative in BASE_DIRECTORIES {
        let path = root.join(relative);
        if needs_creation(&path)? {
            ensure_dir(&path)?;
        }
    }
    for relative in BASE_FILES {
        let path = root.join(relative);
        if needs_creation(&path)? {
            ensure_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_populates_skeleton() {
        let tmpdir = tempfile::tempdir().unwrap();
        populate_base_layer(tmpdir.path()).unwrap();

        for dir in BASE_DIRECTORIES {
            assert!(tmpdir.path().join(dir).is_dir(), "missing dir {dir}");
        }
        for file in BASE_FILES {
            assert!(tmpdir.path().join(file).is_file(), "missing file {file}");
        }
    }

    #[test]
    fn test_idempotent() {
        let tmpdir = tempfile::tempdir().unwrap();
        populate_base_layer(tmpdir.path()).unwrap();
        populate_base_layer(tmpdir.path()).unwrap();
    }

    #[test]
    fn test_existing_paths_left_alone() {
        let tmpdir = tempfile::tempdir().unwrap();
        let resolv = tmpdir.path().join("etc/resolv.conf");
        fs::create_dir_all(resolv.parent().unwrap()).unwrap();
        fs::write(&resolv, b"nameserver 127.0.0.1\n").unwrap();

        populate_base_layer(tmpdir.path()).unwrap();
        assert_eq!(
            fs::read(&resolv).unwrap(),
            b"nameserver 127.0.0.1\n".to_vec()
        );
    }
}
