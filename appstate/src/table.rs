use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::directory::{ApplicationRecord, PackageDirectory};
use crate::entry::AppEntry;

/// The authoritative package name to [AppEntry] mapping.
///
/// Always accessed through the single table-wide mutex owned by the cache.
/// Entry locks may be taken while this table is locked, never the other way
/// around.
pub(crate) struct EntryTable {
    map: HashMap<String, Arc<AppEntry>>,
    entries: Vec<Arc<AppEntry>>,
    records: Vec<Arc<ApplicationRecord>>,
    next_id: u64,
    pub(crate) resumed: bool,
    pub(crate) have_disabled_apps: bool,
    /// Package whose storage stats query is currently outstanding, and when
    /// the query was issued
    pub(crate) computing_size: Option<(String, Instant)>,
    /// Locale requested by the host
    pub(crate) locale: Option<String>,
    /// Locale the current entries' labels were resolved under
    pub(crate) applied_locale: Option<String>,
}

impl EntryTable {
    pub(crate) fn new() -> Self {
        Self {
            map: HashMap::new(),
            entries: Vec::new(),
            records: Vec::new(),
            next_id: 1,
            resumed: false,
            have_disabled_apps: false,
            computing_size: None,
            locale: None,
            applied_locale: None,
        }
    }

    pub(crate) fn get(&self, package_name: &str) -> Option<&Arc<AppEntry>> {
        self.map.get(package_name)
    }

    pub(crate) fn entries(&self) -> &[Arc<AppEntry>] {
        &self.entries
    }

    pub(crate) fn records(&self) -> &[Arc<ApplicationRecord>] {
        &self.records
    }

    pub(crate) fn index_of_record(&self, package_name: &str) -> Option<usize> {
        self.records
            .iter()
            .rposition(|it| it.package_name == package_name)
    }

    /// Return the entry for `record`, creating it if needed. An existing
    /// entry has its record swapped in place and keeps its id and label.
    pub(crate) fn get_or_materialize(
        &mut self,
        record: &Arc<ApplicationRecord>,
        directory: &dyn PackageDirectory,
    ) -> Arc<AppEntry> {
        if let Some(entry) = self.map.get(&record.package_name) {
            let mut state = entry.lock();
            if !Arc::ptr_eq(&state.record, record) {
                state.record = Arc::clone(record);
            }
            drop(state);
            return Arc::clone(entry);
        }

        let id = self.next_id;
        self.next_id += 1;
        let label = directory.load_label(record);
        log::trace!("creating entry {} for {}", id, record.package_name);
        let entry = Arc::new(AppEntry::new(id, Arc::clone(record), label));
        self.map
            .insert(record.package_name.clone(), Arc::clone(&entry));
        self.entries.push(Arc::clone(&entry));
        entry
    }

    /// Materialize up to `limit` records that don't have an entry yet,
    /// returning how many were created
    pub(crate) fn materialize_batch(
        &mut self,
        limit: usize,
        directory: &dyn PackageDirectory,
    ) -> usize {
        let pending = self
            .records
            .iter()
            .filter(|it| !self.map.contains_key(&it.package_name))
            .take(limit)
            .cloned()
            .collect::<Vec<_>>();
        for record in &pending {
            self.get_or_materialize(record, directory);
        }
        pending.len()
    }

    /// Replace the raw record list with a fresh directory listing.
    ///
    /// Records disabled by anyone but the user are dropped. Entries that
    /// survive get the new record swapped in, entries for packages that are
    /// gone are evicted.
    pub(crate) fn replace_records(&mut self, listing: Vec<ApplicationRecord>) {
        self.have_disabled_apps = false;
        let mut records = Vec::with_capacity(listing.len());
        for rec in listing {
            if !rec.is_visible() {
                continue;
            }
            if !rec.enabled {
                self.have_disabled_apps = true;
            }
            let rec = Arc::new(rec);
            if let Some(entry) = self.map.get(&rec.package_name) {
                entry.lock().record = Arc::clone(&rec);
            }
            records.push(rec);
        }
        self.records = records;

        let before = self.entries.len();
        let records = &self.records;
        self.map
            .retain(|name, _| records.iter().any(|it| &it.package_name == name));
        let map = &self.map;
        self.entries.retain(|it| map.contains_key(it.package_name()));
        if self.entries.len() != before {
            log::debug!("evicted {} stale entries", before - self.entries.len());
        }
    }

    /// Append a single record, returns false if the package is already known
    pub(crate) fn push_record(&mut self, record: ApplicationRecord) -> bool {
        if self.index_of_record(&record.package_name).is_some() {
            return false;
        }
        if !record.enabled {
            self.have_disabled_apps = true;
        }
        self.records.push(Arc::new(record));
        true
    }

    /// Drop the package's record and entry. Returns false if it wasn't known.
    pub(crate) fn remove_package(&mut self, package_name: &str) -> bool {
        let idx = match self.index_of_record(package_name) {
            Some(v) => v,
            None => return false,
        };
        if let Some(entry) = self.map.remove(package_name) {
            self.entries.retain(|it| !Arc::ptr_eq(it, &entry));
        }
        let removed = self.records.remove(idx);
        if !removed.enabled {
            self.have_disabled_apps = self.records.iter().any(|it| !it.enabled);
        }
        true
    }

    pub(crate) fn clear_entries(&mut self) {
        self.map.clear();
        self.entries.clear();
    }

    pub(crate) fn mark_all_stale(&self) {
        for entry in &self.entries {
            entry.lock().size_stale = true;
        }
    }

    /// True if some record still has no entry
    pub(crate) fn has_unmaterialized(&self) -> bool {
        self.records
            .iter()
            .any(|it| !self.map.contains_key(&it.package_name))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::directory::EnabledSetting;
    use crate::testing::FakeDirectory;

    fn listing(names: &[&str]) -> Vec<ApplicationRecord> {
        names.iter().map(|it| ApplicationRecord::new(*it)).collect()
    }

    #[test]
    fn test_materialize_in_batches() {
        let dir = FakeDirectory::with_packages(&["a", "b", "c", "d", "e"]);
        let mut table = EntryTable::new();
        table.replace_records(listing(&["a", "b", "c", "d", "e"]));

        assert_eq!(table.materialize_batch(2, &dir), 2);
        assert!(table.has_unmaterialized());
        assert_eq!(table.materialize_batch(2, &dir), 2);
        assert_eq!(table.materialize_batch(2, &dir), 1);
        assert_eq!(table.materialize_batch(2, &dir), 0);
        assert!(!table.has_unmaterialized());

        let ids = table.entries().iter().map(|it| it.id()).collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(table.get("c").map(|it| it.id()), Some(3));
    }

    #[test]
    fn test_unique_per_package() {
        let dir = FakeDirectory::with_packages(&["a"]);
        let mut table = EntryTable::new();
        table.replace_records(listing(&["a"]));
        let rec = Arc::clone(&table.records()[0]);
        let first = table.get_or_materialize(&rec, &dir);
        let second = table.get_or_materialize(&rec, &dir);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!table.push_record(ApplicationRecord::new("a")));
        assert_eq!(table.entries().len(), 1);
    }

    #[test]
    fn test_replace_records_keeps_entry() {
        let dir = FakeDirectory::with_packages(&["a"]);
        let mut table = EntryTable::new();
        table.replace_records(listing(&["a"]));
        table.materialize_batch(10, &dir);
        let entry = Arc::clone(table.get("a").unwrap());

        table.replace_records(vec![ApplicationRecord::new("a").with_label("Renamed")]);
        assert!(Arc::ptr_eq(&entry, table.get("a").unwrap()));
        assert_eq!(entry.record().label, "Renamed");
        // Label was resolved from the first record only
        assert_eq!(entry.label(), "a");
    }

    #[test]
    fn test_disabled_trimming() {
        let mut table = EntryTable::new();
        table.replace_records(vec![
            ApplicationRecord::new("user-off").with_enabled(false, EnabledSetting::DisabledUser),
            ApplicationRecord::new("sys-off").with_enabled(false, EnabledSetting::Disabled),
            ApplicationRecord::new("on"),
        ]);
        let names = table
            .records()
            .iter()
            .map(|it| it.package_name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["user-off", "on"]);
        assert!(table.have_disabled_apps);

        assert!(table.remove_package("user-off"));
        assert!(!table.have_disabled_apps);
        assert!(!table.remove_package("user-off"));
    }

    #[test]
    fn test_replace_records_evicts_gone() {
        let dir = FakeDirectory::with_packages(&["a", "b"]);
        let mut table = EntryTable::new();
        table.replace_records(listing(&["a", "b"]));
        table.materialize_batch(10, &dir);
        assert_eq!(table.entries().len(), 2);

        table.replace_records(listing(&["b"]));
        assert!(table.get("a").is_none());
        assert_eq!(table.entries().len(), 1);
        assert_eq!(table.entries()[0].package_name(), "b");
    }

    #[test]
    fn test_remove_recomputes_disabled() {
        let mut table = EntryTable::new();
        table.replace_records(vec![
            ApplicationRecord::new("off-1").with_enabled(false, EnabledSetting::DisabledUser),
            ApplicationRecord::new("off-2").with_enabled(false, EnabledSetting::DisabledUser),
        ]);
        assert!(table.remove_package("off-1"));
        assert!(table.have_disabled_apps);
        assert!(table.remove_package("off-2"));
        assert!(!table.have_disabled_apps);
    }
}
