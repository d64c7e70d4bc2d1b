// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Typed operations over the device-mapper control interface. Each
// operation builds one task, configures it, runs it, and reads back the
// result. Create and resume synchronize with udev through a cookie;
// suspend and message tasks must not.

mod bindings;
mod task;

use std::ffi::CString;
use std::sync::Once;

use log::{debug, warn};

pub use self::task::{udev_wait, AddNodePolicy, DmError, DmInfo, DmResult, DmTask, TargetLine, TaskType};

const DEV_DIR: &str = "/dev";

static INIT_DEV_DIR: Once = Once::new();

/// Point libdevmapper's device directory at /dev. The setting is a
/// library-wide global; call once at volume set construction.
pub fn init_dev_dir() {
    INIT_DEV_DIR.call_once(|| {
        let dir = CString::new(DEV_DIR).expect("DEV_DIR contains no NUL");
        if unsafe { bindings::dm_set_dev_dir(dir.as_ptr()) } == 0 {
            warn!("could not set device-mapper device directory to {DEV_DIR}");
        }
    });
}

/// Query existence and liveness of a device. An absent device is not an
/// error; the caller observes `exists == false`.
pub fn device_info(name: &str) -> DmResult<DmInfo> {
    let task = DmTask::new(TaskType::DeviceInfo, name)?;
    task.run()?;
    task.info()
}

/// Query the first target line of an existing device. Unlike
/// `device_info`, an absent device is an error here.
pub fn device_status(name: &str) -> DmResult<TargetLine> {
    let task = DmTask::new(TaskType::DeviceStatus, name)?;
    task.run()?;
    if !task.info()?.exists {
        return Err(DmError::Invalid(format!("non existing device {name}")));
    }
    task.first_target()
}

/// Create a DM device with a single target line. The node is added on
/// resume and the call blocks until udev has created it.
pub fn device_create(name: &str, target_type: &str, params: &str, length: u64) -> DmResult<()> {
    debug!("dm table for {name}: 0 {length} {target_type} {params}");
    let task = DmTask::new(TaskType::DeviceCreate, name)?;
    task.add_target(0, length, target_type, params)?;
    task.set_add_node(AddNodePolicy::OnResume)?;

    let mut cookie = 0u32;
    task.set_cookie(&mut cookie, 0)?;
    task.run()?;
    udev_wait(cookie)
}

pub fn device_remove(name: &str) -> DmResult<()> {
    let task = DmTask::new(TaskType::DeviceRemove, name)?;
    task.run()
}

/// Suspend a device, quiescing it at the block layer. No cookie: suspend
/// generates no node events.
pub fn device_suspend(name: &str) -> DmResult<()> {
    let task = DmTask::new(TaskType::DeviceSuspend, name)?;
    task.run()
}

/// Resume a suspended device and wait for the resulting uevent.
pub fn device_resume(name: &str) -> DmResult<()> {
    let task = DmTask::new(TaskType::DeviceResume, name)?;

    let mut cookie = 0u32;
    task.set_cookie(&mut cookie, 0)?;
    task.run()?;
    udev_wait(cookie)
}

/// Send a target message to the device at the given sector.
pub fn target_message(name: &str, sector: u64, message: &str) -> DmResult<()> {
    debug!("dm message for {name}: {message}");
    let task = DmTask::new(TaskType::DeviceTargetMsg, name)?;
    task.set_sector(sector)?;
    task.set_message(message)?;
    task.run()
}

/// Scoped suspend of a device: suspended on construction, resumed on all
/// exit paths. A resume failure is logged and never shadows the error
/// that unwound the scope. Nested suspends of one device are forbidden.
#[derive(Debug)]
pub struct SuspendedDevice {
    name: String,
}

impl SuspendedDevice {
    pub fn suspend(name: &str) -> DmResult<SuspendedDevice> {
        device_suspend(name)?;
        Ok(SuspendedDevice {
            name: name.to_owned(),
        })
    }
}

impl Drop for SuspendedDevice {
    fn drop(&mut self) {
        if let Err(err) = device_resume(&self.name) {
            warn!("could not resume device {}: {}", self.name, err);
        }
    }
}
