//! Record filters and entry orderings used by rebuilds.

use std::cmp::Ordering;

use crate::directory::{AppFlags, ApplicationRecord, InstallLocation};
use crate::entry::AppEntry;

/// Decides which records take part in a rebuild
pub trait AppFilter: Send {
    /// Called once on the worker before any record is checked
    fn init(&mut self) {}

    fn filter_app(&self, record: &ApplicationRecord) -> bool;
}

impl<T> AppFilter for Box<T>
where
    T: AppFilter + ?Sized,
{
    fn init(&mut self) {
        self.as_mut().init()
    }

    fn filter_app(&self, record: &ApplicationRecord) -> bool {
        self.as_ref().filter_app(record)
    }
}

/// Ordering applied to the entries a rebuild selected
pub type Comparator = Box<dyn Fn(&AppEntry, &AppEntry) -> Ordering + Send>;

/// Downloaded apps and updates to system apps
pub struct ThirdPartyFilter;

impl AppFilter for ThirdPartyFilter {
    fn filter_app(&self, record: &ApplicationRecord) -> bool {
        record.flags.contains(AppFlags::UPDATED_SYSTEM_APP) || !record.is_system()
    }
}

pub struct DisabledFilter;

impl AppFilter for DisabledFilter {
    fn filter_app(&self, record: &ApplicationRecord) -> bool {
        !record.enabled
    }
}

pub struct AllEnabledFilter;

impl AppFilter for AllEnabledFilter {
    fn filter_app(&self, record: &ApplicationRecord) -> bool {
        record.enabled
    }
}

/// Apps that live on, or could be moved to, external storage.
///
/// Apps that don't declare an install location follow the device default,
/// which is read once per rebuild from the provider given at construction.
pub struct OnSdCardFilter {
    default_location: Box<dyn Fn() -> InstallLocation + Send>,
    current: InstallLocation,
}

impl OnSdCardFilter {
    pub fn new<F>(default_location: F) -> Self
    where
        F: Fn() -> InstallLocation + Send + 'static,
    {
        Self {
            default_location: Box::new(default_location),
            current: InstallLocation::Auto,
        }
    }
}

impl Default for OnSdCardFilter {
    fn default() -> Self {
        Self::new(|| InstallLocation::Auto)
    }
}

impl AppFilter for OnSdCardFilter {
    fn init(&mut self) {
        self.current = (self.default_location)();
    }

    fn filter_app(&self, record: &ApplicationRecord) -> bool {
        if record.flags.contains(AppFlags::EXTERNAL_STORAGE) {
            return true;
        }
        if record.is_system() || record.flags.contains(AppFlags::FORWARD_LOCK) {
            return false;
        }
        match record.install_location {
            InstallLocation::Auto | InstallLocation::PreferExternal => true,
            InstallLocation::InternalOnly => false,
            InstallLocation::Unspecified => self.current == InstallLocation::PreferExternal,
        }
    }
}

/// Label collation with package name as the final tie-break so equal labels
/// still sort deterministically
pub fn collate(a: &AppEntry, b: &AppEntry) -> Ordering {
    a.normalized_label()
        .cmp(b.normalized_label())
        .then_with(|| a.label().cmp(b.label()))
        .then_with(|| a.package_name().cmp(b.package_name()))
}

fn is_normal(entry: &AppEntry) -> bool {
    let rec = entry.record();
    rec.enabled && rec.flags.contains(AppFlags::INSTALLED)
}

/// Enabled, installed apps first, then by label
pub fn alpha_comparator() -> Comparator {
    Box::new(|a, b| is_normal(b).cmp(&is_normal(a)).then_with(|| collate(a, b)))
}

/// Largest total size first
pub fn size_comparator() -> Comparator {
    Box::new(|a, b| b.size().cmp(&a.size()).then_with(|| collate(a, b)))
}

pub fn internal_size_comparator() -> Comparator {
    Box::new(|a, b| {
        b.internal_size()
            .cmp(&a.internal_size())
            .then_with(|| collate(a, b))
    })
}

pub fn external_size_comparator() -> Comparator {
    Box::new(|a, b| {
        b.external_size()
            .cmp(&a.external_size())
            .then_with(|| collate(a, b))
    })
}
