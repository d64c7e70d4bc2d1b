// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{error::Error, fmt, io};

use crate::dm::DmError;

pub type VolsetResult<T> = Result<T, VolsetError>;

/// Distinguishes engine-level errors that callers may want to react to
/// programmatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorEnum {
    Error,

    AlreadyExists,
    Busy,
    Invalid,
    NotFound,
}

#[derive(Debug)]
pub enum VolsetError {
    Volset(ErrorEnum, String),
    Io(io::Error),
    Nix(nix::Error),
    Serde(serde_json::Error),
    Dm(DmError),
}

impl fmt::Display for VolsetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            VolsetError::Volset(_, ref msg) => write!(f, "Volume set error: {msg}"),
            VolsetError::Io(ref err) => write!(f, "IO error: {err}"),
            VolsetError::Nix(ref err) => write!(f, "Nix error: {err}"),
            VolsetError::Serde(ref err) => write!(f, "Serde error: {err}"),
            VolsetError::Dm(ref err) => write!(f, "DM error: {err}"),
        }
    }
}

impl Error for VolsetError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            VolsetError::Volset(_, _) => None,
            VolsetError::Io(ref err) => Some(err),
            VolsetError::Nix(ref err) => Some(err),
            VolsetError::Serde(ref err) => Some(err),
            VolsetError::Dm(ref err) => Some(err),
        }
    }
}

impl From<io::Error> for VolsetError {
    fn from(err: io::Error) -> VolsetError {
        VolsetError::Io(err)
    }
}

impl From<nix::Error> for VolsetError {
    fn from(err: nix::Error) -> VolsetError {
        VolsetError::Nix(err)
    }
}

impl From<serde_json::Error> for VolsetError {
    fn from(err: serde_json::Error) -> VolsetError {
        VolsetError::Serde(err)
    }
}

impl From<DmError> for VolsetError {
    fn from(err: DmError) -> VolsetError {
        VolsetError::Dm(err)
    }
}
