use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::CacheConfig;
use crate::directory::{PackageDirectory, RetrieveFlags};
use crate::dispatch::{MainDispatcher, Notice};
use crate::entry::AppEntry;
use crate::events::{EventMonitor, PackageEvent};
use crate::filter::{AppFilter, Comparator};
use crate::listener::Listener;
use crate::rebuild::{RebuildRequest, RebuildSlot};
use crate::table::EntryTable;
use crate::worker::{Shared, WorkerHandle, WorkerMsg};

/// Incrementally loaded cache of installed applications.
///
/// Construct one per process and hand it to consumers. Creating it spawns a
/// background worker, which does all directory work, and a dispatcher
/// thread, which delivers callbacks to the registered [Listener]. Both are
/// shut down when the cache is dropped.
pub struct ApplicationsState {
    shared: Arc<Shared>,
    worker: WorkerHandle,
    dispatcher: MainDispatcher,
}

impl ApplicationsState {
    pub fn new(directory: Arc<dyn PackageDirectory>, config: CacheConfig) -> crate::Result<Self> {
        let rebuild = Arc::new(RebuildSlot::new(config.rebuild_wait));
        let dispatcher = MainDispatcher::spawn(Arc::clone(&rebuild))?;
        let shared = Arc::new(Shared {
            directory,
            config,
            table: Mutex::new(EntryTable::new()),
            rebuild,
            poster: dispatcher.poster(),
            running: AtomicBool::new(false),
        });
        let worker = WorkerHandle::spawn(Arc::clone(&shared))?;
        Ok(Self {
            shared,
            worker,
            dispatcher,
        })
    }

    fn retrieve_flags(&self) -> RetrieveFlags {
        RetrieveFlags {
            uninstalled: self.shared.config.retrieve_uninstalled,
        }
    }

    /// Register `listener` and start loading.
    ///
    /// Replaces any previously registered listener. If the cache is already
    /// resumed, only the listener changes.
    pub fn resume(&self, listener: Arc<dyn Listener>) {
        self.shared.poster.set_listener(Some(listener));

        {
            let mut table = self.shared.table();
            if table.resumed {
                log::trace!("already resumed");
                return;
            }
            table.resumed = true;
        }

        // Listed without the table lock so readers and the worker carry on
        let listing = match self
            .shared
            .directory
            .list_installed_applications(self.retrieve_flags())
        {
            Ok(v) => v,
            Err(e) => {
                log::warn!("failed to list applications: {}", e);
                Vec::new()
            }
        };
        log::debug!("resuming with {} applications", listing.len());

        let mut table = self.shared.table();
        if table.locale != table.applied_locale {
            log::debug!("locale changed, dropping all entries");
            table.clear_entries();
            table.applied_locale = table.locale.clone();
        } else {
            table.mark_all_stale();
        }
        table.replace_records(listing);
        drop(table);

        self.worker.send(WorkerMsg::LoadEntries);
    }

    /// Unregister the listener and let the worker go idle. In-flight work
    /// completes silently.
    pub fn pause(&self) {
        self.shared.poster.set_listener(None);
        self.shared.rebuild.discard_pending();
        self.shared.table().resumed = false;
        self.worker.send(WorkerMsg::Wake);
    }

    pub fn is_resumed(&self) -> bool {
        self.shared.table().resumed
    }

    /// True while the worker still has loading work pending
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Look up an entry, materializing it from the current listing if needed.
    /// Never queries the directory for packages it hasn't listed.
    pub fn get_entry(&self, package_name: &str) -> Option<Arc<AppEntry>> {
        let mut table = self.shared.table();
        if let Some(entry) = table.get(package_name) {
            return Some(Arc::clone(entry));
        }
        let idx = table.index_of_record(package_name)?;
        let record = Arc::clone(&table.records()[idx]);
        Some(table.get_or_materialize(&record, self.shared.directory.as_ref()))
    }

    /// Load the entry's icon on the calling thread if it's missing. Returns
    /// whether the entry has an icon afterwards.
    pub fn ensure_icon(&self, entry: &AppEntry) -> bool {
        let mut state = entry.lock();
        if state.icon.is_some() {
            return true;
        }
        match self.shared.directory.load_icon(&state.record) {
            Ok(icon) => {
                state.icon = Some(icon);
                true
            }
            Err(e) => {
                log::debug!("failed to load icon for {}: {}", entry.package_name(), e);
                false
            }
        }
    }

    /// Ask the worker to refresh one package's storage stats
    pub fn request_size(&self, package_name: &str) {
        if self.shared.table().get(package_name).is_none() {
            log::trace!("size requested for unknown package {}", package_name);
            return;
        }
        self.worker
            .send(WorkerMsg::RequestSize(String::from(package_name)));
    }

    /// Pick up a newly installed package. Ignored while paused, the next
    /// resume lists everything anyway.
    pub fn add_package(&self, package_name: &str) {
        {
            let table = self.shared.table();
            if !table.resumed || table.index_of_record(package_name).is_some() {
                return;
            }
        }

        let record = match self
            .shared
            .directory
            .get_application_record(package_name, self.retrieve_flags())
        {
            Ok(r) => r,
            Err(e) if e.is_not_found() => {
                log::debug!("added package {} is already gone", package_name);
                return;
            }
            Err(e) => {
                log::warn!("failed to look up added package {}: {}", package_name, e);
                return;
            }
        };
        if !record.is_visible() {
            return;
        }

        let mut table = self.shared.table();
        if !table.resumed || !table.push_record(record) {
            return;
        }
        self.worker.send(WorkerMsg::LoadEntries);
        self.shared.poster.post(Notice::PackageListChanged);
    }

    /// Drop a package's entry and record
    pub fn remove_package(&self, package_name: &str) {
        let mut table = self.shared.table();
        if table.remove_package(package_name) {
            log::debug!("removed {}", package_name);
            self.shared.poster.post(Notice::PackageListChanged);
        }
    }

    /// Remove and re-add a package, the re-added entry gets a new id
    pub fn invalidate_package(&self, package_name: &str) {
        self.remove_package(package_name);
        self.add_package(package_name);
    }

    pub fn handle_package_event(&self, evt: PackageEvent) {
        match evt {
            PackageEvent::Added(name) => self.add_package(&name),
            PackageEvent::Removed(name) => self.remove_package(&name),
            PackageEvent::Changed(name) => self.invalidate_package(&name),
            PackageEvent::ExternalAvailable(names) => {
                for name in &names {
                    self.add_package(name);
                }
            }
            PackageEvent::ExternalUnavailable(names) => {
                for name in &names {
                    self.remove_package(name);
                }
            }
        }
    }

    /// Build a filtered, sorted list of entries.
    ///
    /// Blocks for at most the configured rebuild wait. If the worker doesn't
    /// finish in time this returns `None` and the list is delivered later
    /// through [Listener::on_rebuild_complete]. A request that hasn't started
    /// yet is replaced by a newer one.
    pub fn rebuild(
        &self,
        filter: Option<Box<dyn AppFilter>>,
        comparator: Comparator,
    ) -> Option<Vec<Arc<AppEntry>>> {
        let request = RebuildRequest { filter, comparator };
        self.shared
            .rebuild
            .request(request, || self.worker.send(WorkerMsg::Wake))
    }

    pub fn have_disabled_apps(&self) -> bool {
        self.shared.table().have_disabled_apps
    }

    /// Total cache size over every measured entry
    pub fn sum_cache_sizes(&self) -> i64 {
        self.shared
            .table()
            .entries()
            .iter()
            .map(|it| it.cache_size())
            .sum()
    }

    /// Snapshot of every materialized entry in creation order
    pub fn entries(&self) -> Vec<Arc<AppEntry>> {
        self.shared.table().entries().to_vec()
    }

    pub fn entry_count(&self) -> usize {
        self.shared.table().entries().len()
    }

    /// Record the host's current locale. If it differs from the one in effect
    /// at the last resume, the next resume rebuilds every entry so labels
    /// are resolved again.
    pub fn apply_locale(&self, locale: &str) {
        self.shared.table().locale = Some(String::from(locale));
    }
}

impl Drop for ApplicationsState {
    fn drop(&mut self) {
        self.shared.poster.set_listener(None);
        self.worker.shutdown();
        self.dispatcher.shutdown();
    }
}

impl EventMonitor<PackageEvent> for ApplicationsState {
    fn on_event(&self, evt: PackageEvent) {
        self.handle_package_event(evt);
    }
}
