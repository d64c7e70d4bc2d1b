// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// The volume set proper: a tree of copy-on-write volumes over the
// docker-pool, with a crash-consistent catalog. The set is single-writer
// by construction; every operation that touches the catalog or the
// kernel takes &mut self and operations are never reentrant.

use std::collections::HashMap;
use std::fs::{self, DirBuilder};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use log::{info, warn};
use loopdev::LoopDevice;
use nix::mount::{mount, umount, MsFlags};

use super::baselayer::populate_base_layer;
use super::cmd;
use super::loopback;
use super::metadata::{self, MetaDataSave, Recordable, VolumeSave};
use super::names::{devnode, volume_name, POOL_NAME};
use super::pool::{PoolDev, DATA_BLOCK_SIZE, META_BLOCK_SIZE};
use super::types::{Bytes, ThinDevId, IEC};
use crate::dm::{self, SuspendedDevice};
use crate::errors::{ErrorEnum, VolsetError, VolsetResult};

const DEFAULT_DATA_LOOPBACK_SIZE: Bytes = Bytes(100 * IEC::Gi);
const DEFAULT_METADATA_LOOPBACK_SIZE: Bytes = Bytes(2 * IEC::Gi);
const DEFAULT_BASE_FS_SIZE: Bytes = Bytes(10 * IEC::Gi);

const LOOPBACK_DIR: &str = "loopback";
const DATA_IMAGE: &str = "data";
const METADATA_IMAGE: &str = "metadata";
const JSON_FILE: &str = "json";
const BASE_FS_DIR: &str = "basefs";

/// The base volume is cataloged under the empty hash.
const BASE_HASH: &str = "";

/// One volume in the catalog.
#[derive(Debug, Clone)]
pub struct VolumeInfo {
    hash: String,
    device_id: ThinDevId,
    size: Bytes,
    transaction_id: u64,
    initialized: bool,
}

impl VolumeInfo {
    /// DM name of this volume's thin device.
    pub fn name(&self) -> String {
        volume_name(&self.hash)
    }

    /// Node under /dev/mapper once the volume is activated.
    pub fn devnode(&self) -> PathBuf {
        devnode(&self.name())
    }

    pub fn device_id(&self) -> ThinDevId {
        self.device_id
    }

    pub fn size(&self) -> Bytes {
        self.size
    }

    pub fn initialized(&self) -> bool {
        self.initialized
    }
}

impl Recordable<VolumeSave> for VolumeInfo {
    fn record(&self) -> VolumeSave {
        VolumeSave {
            device_id: self.device_id.value(),
            size: self.size.0,
            transaction_id: self.transaction_id,
            initialized: self.initialized,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Usage {
    pub used: Bytes,
    pub total: Bytes,
}

/// Operator-facing summary of the pool backing this volume set.
#[derive(Debug, Clone)]
pub struct Status {
    pub pool_name: String,
    pub data_loopback: PathBuf,
    pub metadata_loopback: PathBuf,
    pub data: Usage,
    pub metadata: Usage,
}

pub struct VolumeSet {
    root: PathBuf,
    devices: HashMap<String, VolumeInfo>,
    /// Transaction id the pool has acknowledged.
    transaction_id: u64,
    /// Next transaction id to publish to the pool.
    new_transaction_id: u64,
    next_free_device_id: u32,
    pool: PoolDev,
    /// Pins the loopback associations when this process created them.
    _loop_devices: Vec<LoopDevice>,
}

impl VolumeSet {
    /// Bring up the volume set rooted at `root`: find or create the
    /// docker-pool, recover the catalog against the pool's transaction
    /// id, and make sure an initialized base volume exists.
    pub fn new(root: &Path) -> VolsetResult<VolumeSet> {
        dm::init_dev_dir();
        cmd::verify_binaries()?;

        let mut volumes = match PoolDev::find()? {
            Some(pool) => {
                // Pool exists, assume everything is up.
                let mut volumes = VolumeSet::with_pool(root, pool, Vec::new());
                volumes.load_metadata()?;
                volumes
            }
            None => VolumeSet::bring_up_pool(root)?,
        };

        volumes.setup_base_image()?;
        Ok(volumes)
    }

    fn with_pool(root: &Path, pool: PoolDev, loop_devices: Vec<LoopDevice>) -> VolumeSet {
        VolumeSet {
            root: root.to_owned(),
            devices: HashMap::new(),
            transaction_id: 0,
            new_transaction_id: 0,
            next_free_device_id: 0,
            pool,
            _loop_devices: loop_devices,
        }
    }

    fn bring_up_pool(root: &Path) -> VolsetResult<VolumeSet> {
        let loopback_dir = root.join(LOOPBACK_DIR);

        // If the loopback images have to be created, the pool is empty
        // and the base filesystem must be seeded afterwards; a stale
        // catalog file is ignored in that case.
        let needs_initial_seed = !(loopback::has_image(&loopback_dir, DATA_IMAGE)
            && loopback::has_image(&loopback_dir, METADATA_IMAGE));

        let data_path =
            loopback::ensure_image(&loopback_dir, DATA_IMAGE, DEFAULT_DATA_LOOPBACK_SIZE)?;
        let metadata_path = loopback::ensure_image(
            &loopback_dir,
            METADATA_IMAGE,
            DEFAULT_METADATA_LOOPBACK_SIZE,
        )?;

        let data_loop = loopback::attach_loop(&data_path)?;
        let metadata_loop = loopback::attach_loop(&metadata_path)?;

        let pool = PoolDev::create(
            &loopback::loop_devnode(&metadata_loop)?,
            &loopback::loop_devnode(&data_loop)?,
        )?;

        let mut volumes = VolumeSet::with_pool(root, pool, vec![data_loop, metadata_loop]);
        if !needs_initial_seed {
            volumes.load_metadata()?;
        }
        Ok(volumes)
    }

    fn loopback_dir(&self) -> PathBuf {
        self.root.join(LOOPBACK_DIR)
    }

    fn json_file(&self) -> PathBuf {
        self.loopback_dir().join(JSON_FILE)
    }

    fn volume(&self, hash: &str) -> VolsetResult<&VolumeInfo> {
        self.devices.get(hash).ok_or_else(|| {
            VolsetError::Volset(ErrorEnum::NotFound, format!("unknown volume {hash:?}"))
        })
    }

    /// Snapshot `base_hash` as a new volume under `hash`.
    pub fn add_volume(&mut self, hash: &str, base_hash: &str) -> VolsetResult<()> {
        if hash.is_empty() {
            return Err(VolsetError::Volset(
                ErrorEnum::Invalid,
                "the empty hash is reserved for the base volume".into(),
            ));
        }
        if self.devices.contains_key(hash) {
            return Err(VolsetError::Volset(
                ErrorEnum::AlreadyExists,
                format!("hash {hash} already exists"),
            ));
        }

        let base = self.volume(base_hash)?.clone();
        let device_id = self.allocate_device_id()?;

        self.create_snap_device(device_id, &base)?;

        if let Err(err) = self.register_volume(device_id, hash, base.size) {
            // Try to remove the unused thin device; the original error
            // is what the caller needs to see.
            if let Err(delete_err) = self.pool.delete(device_id) {
                warn!("could not delete orphaned thin device {device_id}: {delete_err}");
            }
            return Err(err);
        }
        Ok(())
    }

    /// Delete a volume: its live DM device if any, its thin device in
    /// the pool, and its catalog entry.
    pub fn remove_volume(&mut self, hash: &str) -> VolsetResult<()> {
        let info = self.volume(hash)?.clone();

        let name = info.name();
        if dm::device_info(&name)?.exists {
            // The pool refuses to delete a thin device that is still
            // mapped; tear the DM device down first.
            dm::device_remove(&name)?;
        }

        if info.initialized {
            // Clear the flag before the pool delete so a crash in
            // between cannot leave an initialized record whose device
            // is gone.
            if let Some(entry) = self.devices.get_mut(hash) {
                entry.initialized = false;
            }
            self.save_metadata()?;
        }

        self.pool.delete(info.device_id)?;

        self.allocate_transaction_id();
        let removed = self.devices.remove(hash);

        if let Err(err) = self.save_metadata() {
            // The pool delete cannot be rolled back; restore the entry
            // so the caller can observe and retry, and surface the
            // persistence error.
            if let Some(removed) = removed {
                self.devices.insert(hash.to_owned(), removed);
            }
            return Err(err);
        }
        Ok(())
    }

    /// Activate `hash` if needed and mount its ext4 filesystem on
    /// `mount_point`. Freed blocks are discarded back into the pool.
    pub fn mount_volume(&mut self, hash: &str, mount_point: &Path) -> VolsetResult<()> {
        self.activate_volume(hash)?;

        let info = self.volume(hash)?;
        // MS_MGC_VAL was historically passed here; it is a no-op on any
        // kernel this code can run on and is omitted.
        mount(
            Some(&info.devnode()),
            mount_point,
            Some("ext4"),
            MsFlags::empty(),
            Some("discard"),
        )?;
        Ok(())
    }

    pub fn has_volume(&self, hash: &str) -> bool {
        self.devices.contains_key(hash)
    }

    pub fn has_initialized_volume(&self, hash: &str) -> bool {
        self.devices
            .get(hash)
            .map_or(false, |info| info.initialized)
    }

    /// Record that the volume's filesystem has been prepared by the
    /// caller.
    pub fn set_initialized(&mut self, hash: &str) -> VolsetResult<()> {
        self.volume(hash)?;

        if let Some(entry) = self.devices.get_mut(hash) {
            entry.initialized = true;
        }
        if let Err(err) = self.save_metadata() {
            if let Some(entry) = self.devices.get_mut(hash) {
                entry.initialized = false;
            }
            return Err(err);
        }
        Ok(())
    }

    /// Pool usage for operators, derived from the pool status line.
    pub fn status(&self) -> VolsetResult<Status> {
        let pool_status = self.pool.status()?;
        let data_block_bytes = DATA_BLOCK_SIZE.bytes().0;

        Ok(Status {
            pool_name: POOL_NAME.to_owned(),
            data_loopback: self.loopback_dir().join(DATA_IMAGE),
            metadata_loopback: self.loopback_dir().join(METADATA_IMAGE),
            data: Usage {
                used: Bytes(pool_status.used_data * data_block_bytes),
                total: Bytes(pool_status.total_data * data_block_bytes),
            },
            metadata: Usage {
                used: Bytes(pool_status.used_meta * META_BLOCK_SIZE.0),
                total: Bytes(pool_status.total_meta * META_BLOCK_SIZE.0),
            },
        })
    }

    fn allocate_device_id(&mut self) -> VolsetResult<ThinDevId> {
        // Ids of deleted devices are never reused; the 24-bit id space
        // makes monotonic allocation affordable.
        let id = ThinDevId::new(self.next_free_device_id)?;
        self.next_free_device_id += 1;
        Ok(id)
    }

    fn allocate_transaction_id(&mut self) -> u64 {
        self.new_transaction_id += 1;
        self.new_transaction_id
    }

    /// Activate the volume's thin device. A no-op when a DM device of
    /// the expected name is already live.
    fn activate_volume(&self, hash: &str) -> VolsetResult<()> {
        let info = self.volume(hash)?;
        let name = info.name();
        if dm::device_info(&name)?.exists {
            return Ok(());
        }

        let params = format!("{} {}", self.pool.devnode().display(), info.device_id);
        dm::device_create(&name, "thin", &params, info.size.sectors().0)?;
        Ok(())
    }

    /// Snapshot creation under the suspend/resume bracket. The pool only
    /// requires the origin to be quiesced while it is active; an
    /// inactive origin has no in-flight writes to lose.
    fn create_snap_device(&self, device_id: ThinDevId, base: &VolumeInfo) -> VolsetResult<()> {
        let base_name = base.name();
        let _suspended = if dm::device_info(&base_name)?.exists {
            Some(SuspendedDevice::suspend(&base_name)?)
        } else {
            None
        };

        // The guard resumes the base on drop whether or not the message
        // succeeded; a failed resume is logged, never surfaced.
        self.pool.create_snap(device_id, base.device_id)
    }

    fn register_volume(
        &mut self,
        device_id: ThinDevId,
        hash: &str,
        size: Bytes,
    ) -> VolsetResult<()> {
        let transaction_id = self.allocate_transaction_id();
        self.devices.insert(
            hash.to_owned(),
            VolumeInfo {
                hash: hash.to_owned(),
                device_id,
                size,
                transaction_id,
                initialized: false,
            },
        );

        if let Err(err) = self.save_metadata() {
            self.devices.remove(hash);
            return Err(err);
        }
        Ok(())
    }

    fn record(&self) -> MetaDataSave {
        MetaDataSave {
            devices: self
                .devices
                .iter()
                .map(|(hash, info)| (hash.clone(), info.record()))
                .collect(),
        }
    }

    /// Persist the catalog, then publish the pending transaction id to
    /// the pool. The pair (rename of the json file, set_transaction_id)
    /// is the commit point: a crash between the two makes the next load
    /// discard the pending entries as lost.
    fn save_metadata(&mut self) -> VolsetResult<()> {
        metadata::save(&self.json_file(), &self.record())?;

        if self.new_transaction_id != self.transaction_id {
            self.pool
                .set_transaction_id(self.transaction_id, self.new_transaction_id)?;
            self.transaction_id = self.new_transaction_id;
        }
        Ok(())
    }

    /// Load the catalog, taking the pool's transaction id as the
    /// authority on which entries survived the last shutdown.
    fn load_metadata(&mut self) -> VolsetResult<()> {
        let pool_transaction_id = self.pool.status()?.transaction_id;
        self.transaction_id = pool_transaction_id;
        self.new_transaction_id = pool_transaction_id;

        let saved = metadata::load(&self.json_file())?.unwrap_or_default();
        let (reconciled, next_free_device_id) = metadata::reconcile(saved, pool_transaction_id);
        self.next_free_device_id = next_free_device_id;

        self.devices = reconciled
            .devices
            .into_iter()
            .map(|(hash, saved)| -> VolsetResult<(String, VolumeInfo)> {
                let info = VolumeInfo {
                    hash: hash.clone(),
                    device_id: ThinDevId::new(saved.device_id)?,
                    size: Bytes(saved.size),
                    transaction_id: saved.transaction_id,
                    initialized: saved.initialized,
                };
                Ok((hash, info))
            })
            .collect::<VolsetResult<HashMap<_, _>>>()?;
        Ok(())
    }

    /// Make sure an initialized base volume exists: the root of the
    /// snapshot tree, formatted ext4 and seeded with the base layer.
    fn setup_base_image(&mut self) -> VolsetResult<()> {
        match self.devices.get(BASE_HASH) {
            Some(info) if info.initialized => return Ok(()),
            Some(_) => {
                // A half-built base from an interrupted first run.
                info!("Removing uninitialized base volume");
                self.remove_volume(BASE_HASH)?;
            }
            None => (),
        }

        info!("Initializing base volume");
        let device_id = self.allocate_device_id()?;
        self.pool.create_thin(device_id)?;

        if let Err(err) = self.register_volume(device_id, BASE_HASH, DEFAULT_BASE_FS_SIZE) {
            if let Err(delete_err) = self.pool.delete(device_id) {
                warn!("could not delete orphaned thin device {device_id}: {delete_err}");
            }
            return Err(err);
        }

        info!("Creating ext4 filesystem on base volume");
        self.activate_volume(BASE_HASH)?;
        cmd::create_ext4_fs(&self.volume(BASE_HASH)?.devnode())?;

        let scratch = self.loopback_dir().join(BASE_FS_DIR);
        DirBuilder::new().recursive(true).mode(0o700).create(&scratch)?;

        self.mount_volume(BASE_HASH, &scratch)?;
        let seeded = populate_base_layer(&scratch);
        let unmounted = umount(&scratch);
        seeded?;
        unmounted?;
        let _ = fs::remove_dir(&scratch);

        if let Some(entry) = self.devices.get_mut(BASE_HASH) {
            entry.initialized = true;
        }
        if let Err(err) = self.save_metadata() {
            if let Some(entry) = self.devices.get_mut(BASE_HASH) {
                entry.initialized = false;
            }
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume(hash: &str, device_id: u32, initialized: bool) -> VolumeInfo {
        VolumeInfo {
            hash: hash.to_owned(),
            device_id: ThinDevId::new(device_id).unwrap(),
            size: DEFAULT_BASE_FS_SIZE,
            transaction_id: 1,
            initialized,
        }
    }

    #[test]
    fn test_volume_names() {
        assert_eq!(volume("", 0, true).name(), "docker-base");
        assert_eq!(volume("abc", 1, false).name(), "docker-abc");
        assert_eq!(
            volume("abc", 1, false).devnode(),
            PathBuf::from("/dev/mapper/docker-abc")
        );
    }

    #[test]
    fn test_record_round_trip() {
        let info = volume("abc", 3, true);
        let saved = info.record();
        assert_eq!(
            saved,
            VolumeSave {
                device_id: 3,
                size: 10 * IEC::Gi,
                transaction_id: 1,
                initialized: true,
            }
        );
    }
}
