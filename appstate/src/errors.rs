use std::io;
use std::path::Path;

use thiserror::Error;

use crate::utils::path_str;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the package directories and the ambient setup.
///
/// Nothing here ever reaches a [crate::Listener]: the worker logs lookup
/// failures and carries on with whatever it already has.
#[derive(Error, Debug)]
pub enum Error {
    #[error("package {0} not found")]
    PackageNotFound(String),
    #[error("no icon available for {0}")]
    NoIcon(String),
    #[error("storage stats unavailable for {0}")]
    StatsUnavailable(String),

    #[error("invalid fixture {0}: {1}")]
    InvalidFixture(String, String),
    #[error("invalid config {0}: {1}")]
    InvalidConfig(String, String),
    #[error("file {0} doesn't exist")]
    MissingFile(String),

    #[error("no adb device connected")]
    NoAdbDevice,
    #[error("adb device {0} not found")]
    AdbDeviceNotFound(String),
    #[error("adb disabled by configuration file")]
    AdbDisabled,
    #[error("command failed with status {0}: {1}")]
    CommandError(i32, String),

    #[error("required binary `{0}` not available to context")]
    MissingBin(String),
    #[error("missing required env var: {0}")]
    MissingEnv(String),
    #[error("failed to get basedirs")]
    NoBaseDirs,

    #[error("{0}")]
    IO(io::Error),
    #[error("generic error: {0}")]
    Generic(String),
}

impl Error {
    pub fn new_cfg<S: ToString + ?Sized>(path: &Path, s: &S) -> Self {
        Self::InvalidConfig(path_str(path).into(), s.to_string())
    }

    pub fn new_fixture<S: ToString + ?Sized>(path: &Path, s: &S) -> Self {
        Self::InvalidFixture(path_str(path).into(), s.to_string())
    }

    /// True if the error only means the directory doesn't know the package
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::PackageNotFound(_))
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for Error {
    fn from(value: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Generic(value.to_string())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::IO(err)
    }
}
