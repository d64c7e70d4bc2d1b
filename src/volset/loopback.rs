// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Sparse backing files and their loop devices. The pool's data and
// metadata devices are plain files under <root>/loopback, bound to
// /dev/loopN on first bring-up.

use std::fs::{DirBuilder, File, OpenOptions};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use log::info;
use loopdev::{LoopControl, LoopDevice};
use nix::ioctl_read;

use super::types::Bytes;
use crate::errors::{ErrorEnum, VolsetError, VolsetResult};

ioctl_read!(blkgetsize64, 0x12, 114, u64);

/// Whether a backing image named `name` already exists in `dir`.
pub fn has_image(dir: &Path, name: &str) -> bool {
    dir.join(name).exists()
}

/// Ensure a sparse backing file of the requested size exists at
/// `dir/name` and return its path. An existing file is left alone,
/// whatever its size.
pub fn ensure_image(dir: &Path, name: &str, size: Bytes) -> VolsetResult<PathBuf> {
    DirBuilder::new().recursive(true).mode(0o700).create(dir)?;

    let filename = dir.join(name);
    if !filename.exists() {
        info!("Creating loopback file {filename:?} for device-mapper use");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o600)
            .open(&filename)?;
        file.set_len(size.0)?;
    }
    Ok(filename)
}

/// Bind `path` to the next free loop device. The returned handle pins
/// the association for its lifetime.
pub fn attach_loop(path: &Path) -> VolsetResult<LoopDevice> {
    let control = LoopControl::open()?;
    let device = control.next_free()?;
    device.attach_file(path)?;
    Ok(device)
}

/// Node under /dev for an attached loop device.
pub fn loop_devnode(device: &LoopDevice) -> VolsetResult<PathBuf> {
    device.path().ok_or_else(|| {
        VolsetError::Volset(ErrorEnum::Error, "loop device has no device node".into())
    })
}

/// Total size of the block device at `path`, via BLKGETSIZE64.
pub fn blkdev_size(path: &Path) -> VolsetResult<Bytes> {
    let file = File::open(path)?;
    let mut val: u64 = 0;
    unsafe { blkgetsize64(file.as_raw_fd(), &mut val) }?;
    Ok(Bytes(val))
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    use super::*;
    use crate::volset::types::IEC;

    #[test]
    fn test_ensure_image_creates_sparse_file() {
        let tmpdir = tempfile::tempdir().unwrap();
        let dir = tmpdir.path().join("loopback");

        let path = ensure_image(&dir, "data", Bytes(IEC::Gi)).unwrap();
        let metadata = path.metadata().unwrap();
        assert_eq!(metadata.len(), IEC::Gi);
        assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
        // Sparse: far fewer blocks allocated than the logical size.
        assert!(metadata.blocks() * 512 < IEC::Gi);
        assert!(has_image(&dir, "data"));
    }

    #[test]
    fn test_ensure_image_leaves_existing_file() {
        let tmpdir = tempfile::tempdir().unwrap();
        let dir = tmpdir.path().to_path_buf();

        let path = ensure_image(&dir, "data", Bytes(4096)).unwrap();
        let again = ensure_image(&dir, "data", Bytes(8192)).unwrap();
        assert_eq!(path, again);
        assert_eq!(path.metadata().unwrap().len(), 4096);
    }

    #[test]
    fn test_has_image_absent() {
        let tmpdir = tempfile::tempdir().unwrap();
        assert!(!has_image(tmpdir.path(), "metadata"));
    }
}
