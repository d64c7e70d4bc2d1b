// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Safe, typed wrapper around a single libdevmapper task. A task is built
// for a (kind, device name) pair, configured, and run exactly once.

use std::error::Error;
use std::ffi::{CStr, CString};
use std::fmt;
use std::ptr;

use libc::c_int;

use super::bindings;

pub type DmResult<T> = Result<T, DmError>;

/// The task kinds the volume set drives. Maps onto the libdevmapper
/// task-type numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    DeviceInfo,
    DeviceStatus,
    DeviceCreate,
    DeviceRemove,
    DeviceSuspend,
    DeviceResume,
    DeviceTargetMsg,
}

impl TaskType {
    fn to_raw(self) -> c_int {
        match self {
            TaskType::DeviceInfo => bindings::DM_DEVICE_INFO,
            TaskType::DeviceStatus => bindings::DM_DEVICE_STATUS,
            TaskType::DeviceCreate => bindings::DM_DEVICE_CREATE,
            TaskType::DeviceRemove => bindings::DM_DEVICE_REMOVE,
            TaskType::DeviceSuspend => bindings::DM_DEVICE_SUSPEND,
            TaskType::DeviceResume => bindings::DM_DEVICE_RESUME,
            TaskType::DeviceTargetMsg => bindings::DM_DEVICE_TARGET_MSG,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            TaskType::DeviceInfo => write!(f, "DeviceInfo"),
            TaskType::DeviceStatus => write!(f, "DeviceStatus"),
            TaskType::DeviceCreate => write!(f, "DeviceCreate"),
            TaskType::DeviceRemove => write!(f, "DeviceRemove"),
            TaskType::DeviceSuspend => write!(f, "DeviceSuspend"),
            TaskType::DeviceResume => write!(f, "DeviceResume"),
            TaskType::DeviceTargetMsg => write!(f, "DeviceTargetMsg"),
        }
    }
}

/// Node creation policy for create and resume tasks.
#[derive(Debug, Clone, Copy)]
pub enum AddNodePolicy {
    OnResume,
    OnCreate,
}

impl AddNodePolicy {
    fn to_raw(self) -> c_int {
        match self {
            AddNodePolicy::OnResume => bindings::DM_ADD_NODE_ON_RESUME,
            AddNodePolicy::OnCreate => bindings::DM_ADD_NODE_ON_CREATE,
        }
    }
}

/// libdevmapper reports failure without an errno; errors carry the task
/// kind and device name so the caller's context is never lost.
#[derive(Debug)]
pub enum DmError {
    /// The library could not allocate a task of the given kind.
    TaskCreate(TaskType, String),
    /// A setter on the task was rejected.
    Parameter {
        task: TaskType,
        device: String,
        what: &'static str,
    },
    /// Running the task failed in the kernel or the library.
    TaskRun { task: TaskType, device: String },
    /// The udev wait for a cookie failed.
    UdevWait(u32),
    /// A name, message, or result string could not cross the FFI boundary,
    /// or a result was structurally invalid.
    Invalid(String),
}

impl fmt::Display for DmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DmError::TaskCreate(task, ref device) => {
                write!(f, "can't create {task} task for device {device}")
            }
            DmError::Parameter {
                task,
                ref device,
                what,
            } => write!(f, "can't set {what} on {task} task for device {device}"),
            DmError::TaskRun { task, ref device } => {
                write!(f, "error running {task} task for device {device}")
            }
            DmError::UdevWait(cookie) => write!(f, "error waiting on udev cookie {cookie:#x}"),
            DmError::Invalid(ref msg) => write!(f, "{msg}"),
        }
    }
}

impl Error for DmError {}

/// Existence and liveness of a DM device. An absent device is reported
/// with `exists == false`, not as an error.
#[derive(Debug, Clone, Copy)]
pub struct DmInfo {
    pub exists: bool,
    pub suspended: bool,
    pub live_table: bool,
    pub inactive_table: bool,
    pub open_count: i32,
    pub major: u32,
    pub minor: u32,
}

impl From<bindings::dm_info> for DmInfo {
    fn from(raw: bindings::dm_info) -> DmInfo {
        DmInfo {
            exists: raw.exists != 0,
            suspended: raw.suspended != 0,
            live_table: raw.live_table != 0,
            inactive_table: raw.inactive_table != 0,
            open_count: raw.open_count,
            major: raw.major,
            minor: raw.minor,
        }
    }
}

/// One line of a device's status table.
#[derive(Debug, Clone)]
pub struct TargetLine {
    pub start: u64,
    pub length: u64,
    pub target_type: String,
    pub params: String,
}

fn to_cstring(task: TaskType, device: &str, what: &'static str, s: &str) -> DmResult<CString> {
    CString::new(s).map_err(|_| DmError::Parameter { task, device: device.to_owned(), what })
}

/// An owned task handle. Configured with the setters below and run once;
/// the underlying handle is released on drop.
pub struct DmTask {
    dmt: *mut bindings::dm_task,
    task: TaskType,
    device: String,
}

impl DmTask {
    pub fn new(task: TaskType, device: &str) -> DmResult<DmTask> {
        let dmt = unsafe { bindings::dm_task_create(task.to_raw()) };
        if dmt.is_null() {
            return Err(DmError::TaskCreate(task, device.to_owned()));
        }

        let dm_task = DmTask {
            dmt,
            task,
            device: device.to_owned(),
        };

        let name = to_cstring(task, device, "name", device)?;
        if unsafe { bindings::dm_task_set_name(dm_task.dmt, name.as_ptr()) } == 0 {
            return Err(dm_task.parameter_err("name"));
        }
        Ok(dm_task)
    }

    fn parameter_err(&self, what: &'static str) -> DmError {
        DmError::Parameter {
            task: self.task,
            device: self.device.clone(),
            what,
        }
    }

    pub fn set_sector(&self, sector: u64) -> DmResult<()> {
        if unsafe { bindings::dm_task_set_sector(self.dmt, sector) } == 0 {
            return Err(self.parameter_err("sector"));
        }
        Ok(())
    }

    pub fn set_message(&self, message: &str) -> DmResult<()> {
        let message = to_cstring(self.task, &self.device, "message", message)?;
        if unsafe { bindings::dm_task_set_message(self.dmt, message.as_ptr()) } == 0 {
            return Err(self.parameter_err("message"));
        }
        Ok(())
    }

    /// Request a udev cookie for this task. The caller must pass the
    /// written cookie to `udev_wait` after a successful run.
    pub fn set_cookie(&self, cookie: &mut u32, flags: u16) -> DmResult<()> {
        if unsafe { bindings::dm_task_set_cookie(self.dmt, cookie, flags) } == 0 {
            return Err(self.parameter_err("cookie"));
        }
        Ok(())
    }

    pub fn set_add_node(&self, policy: AddNodePolicy) -> DmResult<()> {
        if unsafe { bindings::dm_task_set_add_node(self.dmt, policy.to_raw()) } == 0 {
            return Err(self.parameter_err("add node policy"));
        }
        Ok(())
    }

    pub fn add_target(
        &self,
        start: u64,
        size: u64,
        target_type: &str,
        params: &str,
    ) -> DmResult<()> {
        let target_type = to_cstring(self.task, &self.device, "target type", target_type)?;
        let params = to_cstring(self.task, &self.device, "target params", params)?;
        if unsafe {
            bindings::dm_task_add_target(
                self.dmt,
                start,
                size,
                target_type.as_ptr(),
                params.as_ptr(),
            )
        } == 0
        {
            return Err(self.parameter_err("target"));
        }
        Ok(())
    }

    pub fn run(&self) -> DmResult<()> {
        if unsafe { bindings::dm_task_run(self.dmt) } == 0 {
            return Err(DmError::TaskRun {
                task: self.task,
                device: self.device.clone(),
            });
        }
        Ok(())
    }

    /// Read back device info after a successful run.
    pub fn info(&self) -> DmResult<DmInfo> {
        let mut raw = bindings::dm_info::default();
        if unsafe { bindings::dm_task_get_info(self.dmt, &mut raw) } == 0 {
            return Err(DmError::Invalid(format!(
                "no info available from {} task for device {}",
                self.task, self.device
            )));
        }
        Ok(DmInfo::from(raw))
    }

    /// Read back the first target line after a successful status run.
    pub fn first_target(&self) -> DmResult<TargetLine> {
        let mut start = 0u64;
        let mut length = 0u64;
        let mut target_type = ptr::null_mut();
        let mut params = ptr::null_mut();

        unsafe {
            bindings::dm_get_next_target(
                self.dmt,
                ptr::null_mut(),
                &mut start,
                &mut length,
                &mut target_type,
                &mut params,
            );
        }

        if target_type.is_null() {
            return Err(DmError::Invalid(format!(
                "device {} has no targets",
                self.device
            )));
        }

        let copy_out = |field: *mut libc::c_char, what: &str| -> DmResult<String> {
            if field.is_null() {
                return Ok(String::new());
            }
            unsafe { CStr::from_ptr(field) }
                .to_str()
                .map(|s| s.to_owned())
                .map_err(|_| {
                    DmError::Invalid(format!(
                        "non-UTF-8 target {what} reported for device {}",
                        self.device
                    ))
                })
        };

        Ok(TargetLine {
            start,
            length,
            target_type: copy_out(target_type, "type")?,
            params: copy_out(params, "params")?,
        })
    }
}

impl Drop for DmTask {
    fn drop(&mut self) {
        unsafe { bindings::dm_task_destroy(self.dmt) }
    }
}

/// Block until user-space udev has processed the uevent for `cookie`.
/// Required after every create or resume task that set a cookie; without
/// it a following `open(2)` or `mount(2)` can race node creation.
pub fn udev_wait(cookie: u32) -> DmResult<()> {
    if unsafe { bindings::dm_udev_wait(cookie) } == 0 {
        return Err(DmError::UdevWait(cookie));
    }
    Ok(())
}
