use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Application flag bits as reported by the package manager
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AppFlags(u32);

impl AppFlags {
    pub const SYSTEM: AppFlags = AppFlags(1 << 0);
    pub const UPDATED_SYSTEM_APP: AppFlags = AppFlags(1 << 7);
    pub const EXTERNAL_STORAGE: AppFlags = AppFlags(1 << 18);
    pub const STOPPED: AppFlags = AppFlags(1 << 21);
    pub const INSTALLED: AppFlags = AppFlags(1 << 23);
    pub const FORWARD_LOCK: AppFlags = AppFlags(1 << 29);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[inline]
    pub fn contains(&self, other: AppFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: AppFlags) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: AppFlags) {
        self.0 &= !other.0;
    }

    /// Parse a flag name as used in fixture files
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "system" => Self::SYSTEM,
            "updated-system" => Self::UPDATED_SYSTEM_APP,
            "external-storage" => Self::EXTERNAL_STORAGE,
            "stopped" => Self::STOPPED,
            "installed" => Self::INSTALLED,
            "forward-lock" => Self::FORWARD_LOCK,
            _ => return None,
        })
    }
}

impl BitOr for AppFlags {
    type Output = AppFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        AppFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for AppFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AppFlags({:#x})", self.0)
    }
}

/// Who, if anyone, disabled the application
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnabledSetting {
    #[default]
    Default,
    Enabled,
    Disabled,
    DisabledUser,
    DisabledUntilUsed,
}

/// The install location requested in the application's manifest
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallLocation {
    #[default]
    Unspecified,
    Auto,
    InternalOnly,
    PreferExternal,
}

/// Raw installed-application descriptor from the [crate::directory::PackageDirectory].
///
/// Records are immutable snapshots; a fresh directory query replaces them
/// wholesale.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplicationRecord {
    pub package_name: String,
    pub uid: u32,
    pub flags: AppFlags,
    pub enabled: bool,
    pub enabled_setting: EnabledSetting,
    pub install_location: InstallLocation,
    pub source_dir: String,
    /// Label resource as known to the directory, may be empty
    pub label: String,
}

impl ApplicationRecord {
    pub fn new<S: Into<String>>(package_name: S) -> Self {
        Self {
            package_name: package_name.into(),
            uid: 0,
            flags: AppFlags::INSTALLED,
            enabled: true,
            enabled_setting: EnabledSetting::Default,
            install_location: InstallLocation::Unspecified,
            source_dir: String::new(),
            label: String::new(),
        }
    }

    pub fn with_label<S: Into<String>>(mut self, label: S) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_flags(mut self, flags: AppFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_enabled(mut self, enabled: bool, setting: EnabledSetting) -> Self {
        self.enabled = enabled;
        self.enabled_setting = setting;
        self
    }

    pub fn with_install_location(mut self, location: InstallLocation) -> Self {
        self.install_location = location;
        self
    }

    #[inline]
    pub fn is_system(&self) -> bool {
        self.flags.contains(AppFlags::SYSTEM)
    }

    /// Disabled records are only kept around when the user disabled them
    #[inline]
    pub fn is_visible(&self) -> bool {
        self.enabled || self.enabled_setting == EnabledSetting::DisabledUser
    }
}

/// Opaque icon payload
#[derive(Clone, PartialEq, Eq)]
pub struct Icon(Arc<[u8]>);

impl Icon {
    pub fn new(data: Vec<u8>) -> Self {
        Self(Arc::from(data))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Icon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Icon({} bytes)", self.0.len())
    }
}

/// Storage usage of a single package, in bytes
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageStats {
    pub package_name: String,
    pub code_size: i64,
    pub data_size: i64,
    pub cache_size: i64,
    pub external_code_size: i64,
    pub external_data_size: i64,
    /// The part of `external_data_size` living in the external cache dir
    pub external_cache_size: i64,
    pub external_media_size: i64,
    pub external_obb_size: i64,
}

impl PackageStats {
    pub fn new<S: Into<String>>(package_name: S) -> Self {
        Self {
            package_name: package_name.into(),
            ..Default::default()
        }
    }

    pub fn internal_size(&self) -> i64 {
        self.code_size + self.data_size + self.cache_size
    }

    pub fn external_size(&self) -> i64 {
        self.external_code_size
            + self.external_obb_size
            + self.external_data_size
            + self.external_media_size
    }

    pub fn total_size(&self) -> i64 {
        self.internal_size() + self.external_size()
    }
}

/// Flags for listing and lookup queries
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetrieveFlags {
    /// Include packages that were uninstalled with `-k` and kept their data
    pub uninstalled: bool,
}

impl Default for RetrieveFlags {
    fn default() -> Self {
        Self { uninstalled: true }
    }
}
