// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Handles invoking external binaries. Binaries are located once, at
// first use, by probing the usual sbin/bin directories; the volume set
// calls verify_binaries() at construction so a missing tool fails the
// whole engine early instead of the first format operation.

use std::path::{Path, PathBuf};
use std::process::Command;

use lazy_static::lazy_static;

use crate::errors::{ErrorEnum, VolsetError, VolsetResult};

/// Find the binary with the given name by looking in likely locations.
/// Return None if no binary was found.
fn find_binary(name: &str) -> Option<PathBuf> {
    ["/usr/sbin", "/sbin", "/usr/bin", "/bin"]
        .iter()
        .map(|pre| [pre, name].iter().collect::<PathBuf>())
        .find(|path| path.exists())
}

lazy_static! {
    static ref MKFS_EXT4_BIN: Option<PathBuf> = find_binary("mkfs.ext4");
}

/// Verify that all binaries the volume set might invoke are available at
/// some path. Required to be called at volume set construction.
pub fn verify_binaries() -> VolsetResult<()> {
    match *MKFS_EXT4_BIN {
        None => Err(VolsetError::Volset(
            ErrorEnum::NotFound,
            "mkfs.ext4".into(),
        )),
        Some(_) => Ok(()),
    }
}

/// Common function to call a command line utility, returning a Result
/// with an error message which also includes stdout & stderr if it fails.
fn execute_cmd(cmd: &mut Command, error_msg: &str) -> VolsetResult<()> {
    let result = cmd.output()?;
    if result.status.success() {
        Ok(())
    } else {
        let std_out_txt = String::from_utf8_lossy(&result.stdout);
        let std_err_txt = String::from_utf8_lossy(&result.stderr);
        let err_msg = format!("{error_msg} stdout: {std_out_txt} stderr: {std_err_txt}");
        Err(VolsetError::Volset(ErrorEnum::Error, err_msg))
    }
}

/// Create an ext4 filesystem on devnode. Discard is enabled so unused
/// blocks flow back to the thin pool, and lazy init is disabled so the
/// filesystem is fully written before the first snapshot is taken.
pub fn create_ext4_fs(devnode: &Path) -> VolsetResult<()> {
    let executable = MKFS_EXT4_BIN
        .as_ref()
        .ok_or_else(|| VolsetError::Volset(ErrorEnum::NotFound, "mkfs.ext4".into()))?;
    execute_cmd(
        Command::new(executable.as_os_str())
            .arg("-E")
            .arg("discard,lazy_itable_init=0,lazy_journal_init=0")
            .arg(devnode),
        &format!("Failed to create new ext4 filesystem at {devnode:?}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_binary() {
        // sh is present on any system these tests can run on.
        assert!(find_binary("sh").is_some());
        assert!(find_binary("no-such-binary-for-sure").is_none());
    }
}
