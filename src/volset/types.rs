// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Newtypes for the unit-bearing quantities the volume set passes around.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorEnum, VolsetError, VolsetResult};

pub const SECTOR_SIZE: u64 = 512;

/// IEC binary size prefixes.
#[allow(non_snake_case)]
pub mod IEC {
    pub const Ki: u64 = 1024;
    pub const Mi: u64 = 1024 * Ki;
    pub const Gi: u64 = 1024 * Mi;
    pub const Ti: u64 = 1024 * Gi;
}

/// A size in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Bytes(pub u64);

impl Bytes {
    /// The number of whole sectors contained.
    pub fn sectors(self) -> Sectors {
        Sectors(self.0 / SECTOR_SIZE)
    }
}

impl fmt::Display for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes", self.0)
    }
}

/// A size in 512-byte sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Sectors(pub u64);

impl Sectors {
    pub fn bytes(self) -> Bytes {
        Bytes(self.0 * SECTOR_SIZE)
    }
}

impl fmt::Display for Sectors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sectors", self.0)
    }
}

/// A thin device id, unique within a pool. The kernel allocates 24 bits
/// for these, so the id space tops out at 16M; ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ThinDevId(u32);

impl ThinDevId {
    /// Maximum valid id, 2^24 - 1.
    pub const MAX: u32 = 0xff_ffff;

    pub fn new(id: u32) -> VolsetResult<ThinDevId> {
        if id > ThinDevId::MAX {
            return Err(VolsetError::Volset(
                ErrorEnum::Invalid,
                format!("thin device id {id} exceeds 24 bits"),
            ));
        }
        Ok(ThinDevId(id))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ThinDevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_sectors() {
        assert_eq!(Bytes(10 * IEC::Gi).sectors(), Sectors(20_971_520));
        assert_eq!(Sectors(20_971_520).bytes(), Bytes(10_737_418_240));
    }

    #[test]
    fn test_thin_dev_id_bound() {
        assert!(ThinDevId::new(0).is_ok());
        assert!(ThinDevId::new(ThinDevId::MAX).is_ok());
        assert!(ThinDevId::new(ThinDevId::MAX + 1).is_err());
    }
}
