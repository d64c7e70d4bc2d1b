// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Functions for dealing with volume set device-mapper names. Other
// subsystems address devices under /dev/mapper by these names, so the
// scheme is part of the stable interface.

use std::path::{Path, PathBuf};

/// The pool is a host-global singleton.
pub const POOL_NAME: &str = "docker-pool";

const DEVICE_PREFIX: &str = "docker";
const DEV_MAPPER_DIR: &str = "/dev/mapper";

/// DM name for the volume with the given hash. The base volume, keyed by
/// the empty hash, gets the fixed name "docker-base".
pub fn volume_name(hash: &str) -> String {
    if hash.is_empty() {
        format!("{DEVICE_PREFIX}-base")
    } else {
        format!("{DEVICE_PREFIX}-{hash}")
    }
}

/// Path of the device node for a DM device name.
pub fn devnode(name: &str) -> PathBuf {
    Path::new(DEV_MAPPER_DIR).join(name)
}

/// Path of the pool's device node.
pub fn pool_devnode() -> PathBuf {
    devnode(POOL_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_name() {
        assert_eq!(volume_name(""), "docker-base");
        assert_eq!(volume_name("abc123"), "docker-abc123");
    }

    #[test]
    fn test_devnode() {
        assert_eq!(
            devnode(&volume_name("abc")),
            PathBuf::from("/dev/mapper/docker-abc")
        );
        assert_eq!(pool_devnode(), PathBuf::from("/dev/mapper/docker-pool"));
    }
}
