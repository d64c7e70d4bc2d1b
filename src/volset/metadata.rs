// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// On-disk catalog of volumes. The in-memory types are kept apart from
// what is persisted; *Save structs hold the serde-friendly shape and a
// Recordable conversion bridges the two. Persistence is a temp-file
// write, fsync, and rename, so the file on disk is always either the old
// or the new catalog in full.

use std::collections::HashMap;
use std::fs::{rename, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::Path;

use log::warn;
use nix::unistd::fsync;
use serde::{Deserialize, Serialize};

use crate::errors::VolsetResult;

/// Implements saving to metadata.
pub trait Recordable<T: Serialize> {
    fn record(&self) -> T;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSave {
    #[serde(rename = "device-id")]
    pub device_id: u32,
    pub size: u64,
    #[serde(rename = "transaction-id")]
    pub transaction_id: u64,
    pub initialized: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaDataSave {
    #[serde(rename = "Devices")]
    pub devices: HashMap<String, VolumeSave>,
}

/// Write the catalog to `json_path` atomically: serialize, write a temp
/// file in the same directory, fsync, then rename over the target. A
/// reader never observes a truncated file.
pub fn save(json_path: &Path, metadata: &MetaDataSave) -> VolsetResult<()> {
    let data = serde_json::to_string(metadata)?;
    let temp_path = json_path.with_extension("temp");

    // Braces to ensure f is closed before renaming.
    {
        let mut f = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        f.write_all(data.as_bytes())?;

        // Try really hard to make sure it goes to disk.
        f.flush()?;
        fsync(f.as_raw_fd())?;
    }

    rename(temp_path, json_path)?;

    Ok(())
}

/// Read the catalog back. An absent file is an empty volume set, not an
/// error; anything else unreadable or unparsable propagates.
pub fn load(json_path: &Path) -> VolsetResult<Option<MetaDataSave>> {
    let mut f = match OpenOptions::new().read(true).open(json_path) {
        Ok(f) => f,
        Err(ref err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let mut data = Vec::new();
    f.read_to_end(&mut data)?;
    Ok(Some(serde_json::from_slice(&data)?))
}

/// Reconcile a loaded catalog against the pool's current transaction id.
/// An entry whose transaction id exceeds the pool's was never
/// acknowledged by the pool before a crash; it is dropped here, and its
/// device id is still skipped by the returned next-free id so later
/// allocations never collide with the orphaned thin device.
pub fn reconcile(metadata: MetaDataSave, pool_transaction_id: u64) -> (MetaDataSave, u32) {
    let mut next_free_device_id = 0;
    let devices = metadata
        .devices
        .into_iter()
        .inspect(|(_, saved)| {
            next_free_device_id = next_free_device_id.max(saved.device_id + 1);
        })
        .filter(|(hash, saved)| {
            if saved.transaction_id > pool_transaction_id {
                warn!(
                    "Removing lost volume {hash} with transaction id {}",
                    saved.transaction_id
                );
                false
            } else {
                true
            }
        })
        .collect();

    (MetaDataSave { devices }, next_free_device_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MetaDataSave {
        let mut devices = HashMap::new();
        devices.insert(
            "".to_owned(),
            VolumeSave {
                device_id: 0,
                size: 10_737_418_240,
                transaction_id: 1,
                initialized: true,
            },
        );
        devices.insert(
            "abc".to_owned(),
            VolumeSave {
                device_id: 1,
                size: 10_737_418_240,
                transaction_id: 2,
                initialized: false,
            },
        );
        MetaDataSave { devices }
    }

    #[test]
    fn test_schema_keys() {
        let json = serde_json::to_value(sample()).unwrap();
        let entry = &json["Devices"]["abc"];
        assert_eq!(entry["device-id"], 1);
        assert_eq!(entry["size"], 10_737_418_240u64);
        assert_eq!(entry["transaction-id"], 2);
        assert_eq!(entry["initialized"], false);
    }

    #[test]
    fn test_save_load_round_trip() {
        let tmpdir = tempfile::tempdir().unwrap();
        let json_path = tmpdir.path().join("json");

        let metadata = sample();
        save(&json_path, &metadata).unwrap();

        // No temp residue once the rename has happened.
        assert!(!json_path.with_extension("temp").exists());

        let loaded = load(&json_path).unwrap().unwrap();
        assert_eq!(loaded.devices, metadata.devices);
    }

    #[test]
    fn test_save_replaces_previous_file() {
        let tmpdir = tempfile::tempdir().unwrap();
        let json_path = tmpdir.path().join("json");

        save(&json_path, &sample()).unwrap();
        let mut smaller = sample();
        smaller.devices.remove("abc");
        save(&json_path, &smaller).unwrap();

        let loaded = load(&json_path).unwrap().unwrap();
        assert_eq!(loaded.devices.len(), 1);
        assert!(loaded.devices.contains_key(""));
    }

    #[test]
    fn test_load_absent_is_empty() {
        let tmpdir = tempfile::tempdir().unwrap();
        assert!(load(&tmpdir.path().join("json")).unwrap().is_none());
    }

    #[test]
    fn test_reconcile_drops_lost_volumes() {
        let mut metadata = sample();
        metadata.devices.insert(
            "lost".to_owned(),
            VolumeSave {
                device_id: 7,
                size: 10_737_418_240,
                transaction_id: 99,
                initialized: false,
            },
        );

        let (reconciled, next_free) = reconcile(metadata, 5);
        assert!(!reconciled.devices.contains_key("lost"));
        assert!(reconciled.devices.contains_key("abc"));
        // The orphaned id is still consumed.
        assert_eq!(next_free, 8);
    }

    #[test]
    fn test_reconcile_empty() {
        let (reconciled, next_free) = reconcile(MetaDataSave::default(), 3);
        assert!(reconciled.devices.is_empty());
        assert_eq!(next_free, 0);
    }
}
