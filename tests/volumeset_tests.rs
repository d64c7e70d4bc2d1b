// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// End-to-end tests for the volume set. These drive the real kernel:
// they need root, a running udev, and the dm_thin_pool module, and they
// create and tear down the host-global docker-pool device. Run them
// explicitly with `cargo test -- --ignored` on a disposable machine.

use nix::mount::umount;

use volset::{ErrorEnum, VolsetError, VolumeSet};

fn scratch_root() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("volset")
        .tempdir()
        .unwrap()
}

#[test]
#[ignore]
fn test_cold_then_warm_start() {
    let root = scratch_root();

    {
        let volumes = VolumeSet::new(root.path()).unwrap();
        assert!(volumes.has_volume(""));
        assert!(volumes.has_initialized_volume(""));

        // 100 GiB data pool in 256 KiB blocks.
        let status = volumes.status().unwrap();
        assert_eq!(status.data.total.0, 100 * 1024 * 1024 * 1024);
    }

    // Warm start: the pool is found, the catalog reloads, nothing is
    // re-initialized.
    let volumes = VolumeSet::new(root.path()).unwrap();
    assert!(volumes.has_initialized_volume(""));
}

#[test]
#[ignore]
fn test_snapshot_mount_remove() {
    let root = scratch_root();
    let mut volumes = VolumeSet::new(root.path()).unwrap();

    volumes.add_volume("abc", "").unwrap();
    assert!(volumes.has_volume("abc"));
    assert!(!volumes.has_initialized_volume("abc"));

    let mountpoint = scratch_root();
    volumes.mount_volume("abc", mountpoint.path()).unwrap();

    // The base layer skeleton came through the snapshot.
    assert!(mountpoint.path().join("proc").is_dir());
    assert!(mountpoint.path().join(".dockerinit").is_file());

    volumes.set_initialized("abc").unwrap();
    assert!(volumes.has_initialized_volume("abc"));

    umount(mountpoint.path()).unwrap();

    volumes.remove_volume("abc").unwrap();
    assert!(!volumes.has_volume("abc"));
}

#[test]
#[ignore]
fn test_mount_is_idempotent_on_activation() {
    let root = scratch_root();
    let mut volumes = VolumeSet::new(root.path()).unwrap();

    volumes.add_volume("abc", "").unwrap();

    let first = scratch_root();
    let second = scratch_root();
    volumes.mount_volume("abc", first.path()).unwrap();
    // Second mount finds the thin device already active and does not
    // recreate it.
    volumes.mount_volume("abc", second.path()).unwrap();

    umount(second.path()).unwrap();
    umount(first.path()).unwrap();
    volumes.remove_volume("abc").unwrap();
}

#[test]
#[ignore]
fn test_duplicate_and_unknown_hashes() {
    let root = scratch_root();
    let mut volumes = VolumeSet::new(root.path()).unwrap();

    volumes.add_volume("abc", "").unwrap();

    assert!(matches!(
        volumes.add_volume("abc", ""),
        Err(VolsetError::Volset(ErrorEnum::AlreadyExists, _))
    ));
    assert!(matches!(
        volumes.add_volume("def", "no-such-base"),
        Err(VolsetError::Volset(ErrorEnum::NotFound, _))
    ));
    assert!(matches!(
        volumes.remove_volume("no-such-volume"),
        Err(VolsetError::Volset(ErrorEnum::NotFound, _))
    ));

    volumes.remove_volume("abc").unwrap();
}
