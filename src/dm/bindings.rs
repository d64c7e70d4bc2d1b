// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Hand-written bindings for the small, stable slice of libdevmapper that
// the task layer consumes. Every function here follows the C convention
// of returning non-zero on success, zero on failure; failure details are
// reported through the library's own logging, not through errno.

#![allow(non_camel_case_types)]
#![allow(dead_code)]

use libc::{c_char, c_int, c_void};

/// Opaque task handle. Allocated by `dm_task_create`, released by
/// `dm_task_destroy`.
#[repr(C)]
pub struct dm_task {
    _unused: [u8; 0],
}

// Task types, numbered as in libdevmapper.h.
pub const DM_DEVICE_CREATE: c_int = 0;
pub const DM_DEVICE_RELOAD: c_int = 1;
pub const DM_DEVICE_REMOVE: c_int = 2;
pub const DM_DEVICE_REMOVE_ALL: c_int = 3;
pub const DM_DEVICE_SUSPEND: c_int = 4;
pub const DM_DEVICE_RESUME: c_int = 5;
pub const DM_DEVICE_INFO: c_int = 6;
pub const DM_DEVICE_DEPS: c_int = 7;
pub const DM_DEVICE_RENAME: c_int = 8;
pub const DM_DEVICE_VERSION: c_int = 9;
pub const DM_DEVICE_STATUS: c_int = 10;
pub const DM_DEVICE_TABLE: c_int = 11;
pub const DM_DEVICE_WAITEVENT: c_int = 12;
pub const DM_DEVICE_LIST: c_int = 13;
pub const DM_DEVICE_CLEAR: c_int = 14;
pub const DM_DEVICE_MKNODES: c_int = 15;
pub const DM_DEVICE_LIST_VERSIONS: c_int = 16;
pub const DM_DEVICE_TARGET_MSG: c_int = 17;
pub const DM_DEVICE_SET_GEOMETRY: c_int = 18;

// dm_add_node_t
pub const DM_ADD_NODE_ON_RESUME: c_int = 0;
pub const DM_ADD_NODE_ON_CREATE: c_int = 1;

/// Device state as reported by an info or status task. The layout matches
/// the legacy `struct dm_info`; the trailing fields are present in newer
/// library headers but are only written by the versioned
/// `dm_task_get_info_with_deferred_remove` symbol, which we do not link.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct dm_info {
    pub exists: c_int,
    pub suspended: c_int,
    pub live_table: c_int,
    pub inactive_table: c_int,
    pub open_count: i32,
    pub event_nr: u32,
    pub major: u32,
    pub minor: u32,
    pub read_only: c_int,
    pub target_count: i32,
    pub deferred_remove: c_int,
    pub internal_suspend: c_int,
}

#[link(name = "devmapper")]
extern "C" {
    pub fn dm_task_create(task_type: c_int) -> *mut dm_task;
    pub fn dm_task_destroy(dmt: *mut dm_task);

    pub fn dm_task_set_name(dmt: *mut dm_task, name: *const c_char) -> c_int;
    pub fn dm_task_set_message(dmt: *mut dm_task, message: *const c_char) -> c_int;
    pub fn dm_task_set_sector(dmt: *mut dm_task, sector: u64) -> c_int;
    pub fn dm_task_set_cookie(dmt: *mut dm_task, cookie: *mut u32, flags: u16) -> c_int;
    pub fn dm_task_set_add_node(dmt: *mut dm_task, add_node: c_int) -> c_int;
    pub fn dm_task_add_target(
        dmt: *mut dm_task,
        start: u64,
        size: u64,
        target_type: *const c_char,
        params: *const c_char,
    ) -> c_int;

    pub fn dm_task_run(dmt: *mut dm_task) -> c_int;
    pub fn dm_task_get_info(dmt: *mut dm_task, info: *mut dm_info) -> c_int;

    /// Walk the target list of a status or table task. `next` is null for
    /// the first target; the returned pointer continues the walk, null at
    /// the end. The returned strings are owned by the task.
    pub fn dm_get_next_target(
        dmt: *mut dm_task,
        next: *mut c_void,
        start: *mut u64,
        length: *mut u64,
        target_type: *mut *mut c_char,
        params: *mut *mut c_char,
    ) -> *mut c_void;

    /// Block until udev has processed the uevent tagged with `cookie`.
    pub fn dm_udev_wait(cookie: u32) -> c_int;

    pub fn dm_set_dev_dir(dir: *const c_char) -> c_int;
}
