// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Management of the docker-pool thin-pool device. The pool's status
// line carries its transaction id, which is the authority the catalog
// reconciles against after a crash.
//
// See section "Setting up a fresh pool device":
// https://www.kernel.org/doc/Documentation/device-mapper/thin-provisioning.txt

use std::path::{Path, PathBuf};

use log::info;

use super::loopback;
use super::names::{pool_devnode, POOL_NAME};
use super::types::{Bytes, Sectors, ThinDevId};
use crate::dm;
use crate::errors::{ErrorEnum, VolsetError, VolsetResult};

/// Data block size handed to the thin-pool target: 512 sectors, 256 KiB.
pub const DATA_BLOCK_SIZE: Sectors = Sectors(512);

/// Low-water mark, in data blocks, below which the pool emits an event.
pub const LOW_WATER_MARK: u64 = 8192;

/// Thin-pool metadata is kept in fixed 4 KiB blocks.
pub const META_BLOCK_SIZE: Bytes = Bytes(4096);

/// Usage counters parsed from the pool's status line, in pool blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub transaction_id: u64,
    pub used_meta: u64,
    pub total_meta: u64,
    pub used_data: u64,
    pub total_data: u64,
}

fn parse_fraction(field: &str, what: &str) -> VolsetResult<(u64, u64)> {
    let mut parts = field.splitn(2, '/');
    let used = parts.next().and_then(|v| v.parse().ok());
    let total = parts.next().and_then(|v| v.parse().ok());
    match (used, total) {
        (Some(used), Some(total)) => Ok((used, total)),
        _ => Err(VolsetError::Volset(
            ErrorEnum::Invalid,
            format!("malformed {what} usage {field:?} in pool status"),
        )),
    }
}

/// Parse the params of a thin-pool status target:
/// `<transaction id> <used meta>/<total meta> <used data>/<total data> ...`
fn parse_status(params: &str) -> VolsetResult<PoolStatus> {
    let mut fields = params.split_whitespace();

    let transaction_id = fields
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| {
            VolsetError::Volset(
                ErrorEnum::Invalid,
                format!("no transaction id in pool status {params:?}"),
            )
        })?;

    let meta = fields.next().ok_or_else(|| {
        VolsetError::Volset(
            ErrorEnum::Invalid,
            format!("no metadata usage in pool status {params:?}"),
        )
    })?;
    let data = fields.next().ok_or_else(|| {
        VolsetError::Volset(
            ErrorEnum::Invalid,
            format!("no data usage in pool status {params:?}"),
        )
    })?;

    let (used_meta, total_meta) = parse_fraction(meta, "metadata")?;
    let (used_data, total_data) = parse_fraction(data, "data")?;

    Ok(PoolStatus {
        transaction_id,
        used_meta,
        total_meta,
        used_data,
        total_data,
    })
}

/// Handle on the docker-pool DM device.
#[derive(Debug)]
pub struct PoolDev {
    devnode: PathBuf,
}

impl PoolDev {
    /// Set up a handle on an already existing pool, or report that none
    /// exists.
    pub fn find() -> VolsetResult<Option<PoolDev>> {
        let info = dm::device_info(POOL_NAME)?;
        if info.exists {
            Ok(Some(PoolDev {
                devnode: pool_devnode(),
            }))
        } else {
            Ok(None)
        }
    }

    /// Create the pool over an attached data and metadata device pair.
    /// The pool spans the whole data device.
    pub fn create(meta_dev: &Path, data_dev: &Path) -> VolsetResult<PoolDev> {
        info!("Activating device-mapper pool {POOL_NAME}");

        let length = loopback::blkdev_size(data_dev)?.sectors();
        let params = format!(
            "{} {} {} {}",
            meta_dev.display(),
            data_dev.display(),
            DATA_BLOCK_SIZE.0,
            LOW_WATER_MARK
        );
        dm::device_create(POOL_NAME, "thin-pool", &params, length.0)?;

        Ok(PoolDev {
            devnode: pool_devnode(),
        })
    }

    /// Device node other targets reference the pool by.
    pub fn devnode(&self) -> &Path {
        &self.devnode
    }

    pub fn status(&self) -> VolsetResult<PoolStatus> {
        let target = dm::device_status(POOL_NAME)?;
        parse_status(&target.params)
    }

    fn message(&self, message: &str) -> VolsetResult<()> {
        dm::target_message(POOL_NAME, 0, message)?;
        Ok(())
    }

    pub fn create_thin(&self, id: ThinDevId) -> VolsetResult<()> {
        self.message(&format!("create_thin {id}"))
    }

    /// Ask the pool for an internal snapshot of `base`. The caller owns
    /// quiescing the base device around this message.
    pub fn create_snap(&self, id: ThinDevId, base: ThinDevId) -> VolsetResult<()> {
        self.message(&format!("create_snap {id} {base}"))
    }

    pub fn delete(&self, id: ThinDevId) -> VolsetResult<()> {
        self.message(&format!("delete {id}"))
    }

    /// Advance the pool's transaction id. The kernel compares `old` and
    /// rejects the message when it does not match, which keeps the
    /// catalog and the pool in lockstep.
    pub fn set_transaction_id(&self, old: u64, new: u64) -> VolsetResult<()> {
        self.message(&format!("set_transaction_id {old} {new}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        let status = parse_status("2 65/4096 1024/409600 - rw discard_passdown").unwrap();
        assert_eq!(
            status,
            PoolStatus {
                transaction_id: 2,
                used_meta: 65,
                total_meta: 4096,
                used_data: 1024,
                total_data: 409600,
            }
        );
    }

    #[test]
    fn test_parse_status_fresh_pool() {
        let status = parse_status("0 1/512 0/25600 -").unwrap();
        assert_eq!(status.transaction_id, 0);
        assert_eq!(status.used_data, 0);
    }

    #[test]
    fn test_parse_status_malformed() {
        assert!(parse_status("").is_err());
        assert!(parse_status("nonsense 1/2 3/4").is_err());
        assert!(parse_status("1").is_err());
        assert!(parse_status("1 12 3/4").is_err());
        assert!(parse_status("1 1/x 3/4").is_err());
    }
}
