// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

mod baselayer;
mod cmd;
mod loopback;
mod metadata;
mod names;
mod pool;
mod types;
mod volumeset;

pub use self::types::{Bytes, Sectors, ThinDevId, IEC, SECTOR_SIZE};
pub use self::volumeset::{Status, Usage, VolumeInfo, VolumeSet};
