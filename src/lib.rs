// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Thin-provisioned, copy-on-write volume sets on a device-mapper thin
//! pool. A [`volset::VolumeSet`] owns a root directory and the
//! `docker-pool` device; volumes are identified by opaque hashes,
//! created as snapshots of one another, activated as block devices and
//! mounted as ext4 filesystems.

pub mod dm;
pub mod errors;
pub mod volset;

pub use crate::errors::{ErrorEnum, VolsetError, VolsetResult};
pub use crate::volset::VolumeSet;
