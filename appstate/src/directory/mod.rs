//! The Package Directory is the only source of installed-application data.
//!
//! The cache never talks to the OS itself; everything goes through the
//! [PackageDirectory] trait so the engine can run against a device, a fixture
//! file, or a scripted fake in tests.

pub mod record;
pub use record::*;

pub mod fixture;
pub use fixture::FixtureDirectory;

pub mod adb;
pub use adb::AdbDirectory;

/// Outcome of a storage stats query
pub type StatsResult = crate::Result<PackageStats>;

/// Completion callback for [PackageDirectory::query_storage_stats]. It may be
/// invoked from any thread, including synchronously from inside the query.
pub type StatsCallback = Box<dyn FnOnce(StatsResult) + Send + 'static>;

pub trait PackageDirectory: Send + Sync {
    /// Enumerate every installed application.
    ///
    /// An empty list is a valid answer and not an error.
    fn list_installed_applications(
        &self,
        flags: RetrieveFlags,
    ) -> crate::Result<Vec<ApplicationRecord>>;

    /// Look up a single application, returning [crate::Error::PackageNotFound]
    /// if the package isn't installed.
    fn get_application_record(
        &self,
        package_name: &str,
        flags: RetrieveFlags,
    ) -> crate::Result<ApplicationRecord>;

    /// Resolve the display label for the record.
    ///
    /// Called with the cache's table lock held, including from
    /// [crate::ApplicationsState::get_entry] on the caller's thread, so it
    /// must answer from memory and never block on I/O.
    fn load_label(&self, record: &ApplicationRecord) -> String {
        if record.label.is_empty() {
            record.package_name.clone()
        } else {
            record.label.clone()
        }
    }

    fn load_icon(&self, record: &ApplicationRecord) -> crate::Result<Icon>;

    /// Start an asynchronous storage stats query, `on_complete` is called
    /// exactly once with the result.
    fn query_storage_stats(&self, package_name: &str, on_complete: StatsCallback);

    /// Re-read the underlying source, if it is cached
    fn refresh(&self) -> crate::Result<()> {
        Ok(())
    }
}

impl<T> PackageDirectory for std::sync::Arc<T>
where
    T: PackageDirectory + ?Sized,
{
    fn list_installed_applications(
        &self,
        flags: RetrieveFlags,
    ) -> crate::Result<Vec<ApplicationRecord>> {
        self.as_ref().list_installed_applications(flags)
    }

    fn get_application_record(
        &self,
        package_name: &str,
        flags: RetrieveFlags,
    ) -> crate::Result<ApplicationRecord> {
        self.as_ref().get_application_record(package_name, flags)
    }

    fn load_label(&self, record: &ApplicationRecord) -> String {
        self.as_ref().load_label(record)
    }

    fn load_icon(&self, record: &ApplicationRecord) -> crate::Result<Icon> {
        self.as_ref().load_icon(record)
    }

    fn query_storage_stats(&self, package_name: &str, on_complete: StatsCallback) {
        self.as_ref().query_storage_stats(package_name, on_complete)
    }

    fn refresh(&self) -> crate::Result<()> {
        self.as_ref().refresh()
    }
}
