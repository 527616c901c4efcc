use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use once_cell::sync::OnceCell;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::directory::{ApplicationRecord, Icon, PackageStats};

/// Size has not been measured yet
pub const SIZE_UNKNOWN: i64 = -1;
/// Size measurement failed
pub const SIZE_INVALID: i64 = -2;

/// Strip diacritics and case fold `s` for collation and searching
pub fn normalize(s: &str) -> String {
    s.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Storage usage of an [AppEntry]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizeInfo {
    pub size: i64,
    pub internal_size: i64,
    pub external_size: i64,
    pub code_size: i64,
    pub data_size: i64,
    pub cache_size: i64,
    pub external_code_size: i64,
    pub external_data_size: i64,
    pub external_cache_size: i64,
}

impl Default for SizeInfo {
    fn default() -> Self {
        Self {
            size: SIZE_UNKNOWN,
            internal_size: SIZE_UNKNOWN,
            external_size: SIZE_UNKNOWN,
            code_size: 0,
            data_size: 0,
            cache_size: 0,
            external_code_size: 0,
            external_data_size: 0,
            external_cache_size: 0,
        }
    }
}

impl From<&PackageStats> for SizeInfo {
    fn from(stats: &PackageStats) -> Self {
        Self {
            size: stats.total_size(),
            internal_size: stats.internal_size(),
            external_size: stats.external_size(),
            code_size: stats.code_size,
            data_size: stats.data_size,
            cache_size: stats.cache_size,
            external_code_size: stats.external_code_size + stats.external_obb_size,
            external_data_size: stats.external_data_size + stats.external_media_size,
            external_cache_size: stats.external_cache_size,
        }
    }
}

/// Fields of an [AppEntry] guarded by the entry's own lock
pub(crate) struct EntryState {
    pub(crate) record: Arc<ApplicationRecord>,
    pub(crate) icon: Option<Icon>,
    pub(crate) sizes: SizeInfo,
    pub(crate) size_stale: bool,
    pub(crate) size_load_start: Option<Instant>,
}

/// The cache's materialized view of one installed application.
///
/// `id`, `package_name` and `label` never change after construction. The
/// label is resolved from the first record seen and is not recomputed when
/// the record is later replaced in place; only a remove + add cycle picks up a
/// new label.
pub struct AppEntry {
    id: u64,
    package_name: String,
    label: String,
    normalized_label: OnceCell<String>,
    state: Mutex<EntryState>,
}

impl AppEntry {
    pub(crate) fn new(id: u64, record: Arc<ApplicationRecord>, label: String) -> Self {
        Self {
            id,
            package_name: record.package_name.clone(),
            label,
            normalized_label: OnceCell::new(),
            state: Mutex::new(EntryState {
                record,
                icon: None,
                sizes: SizeInfo::default(),
                size_stale: true,
                size_load_start: None,
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn normalized_label(&self) -> &str {
        self.normalized_label.get_or_init(|| normalize(&self.label))
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().expect("entry lock poisoned")
    }

    /// The current record backing this entry
    pub fn record(&self) -> Arc<ApplicationRecord> {
        Arc::clone(&self.lock().record)
    }

    pub fn icon(&self) -> Option<Icon> {
        self.lock().icon.clone()
    }

    pub fn has_icon(&self) -> bool {
        self.lock().icon.is_some()
    }

    /// Total size, [SIZE_UNKNOWN] until measured
    pub fn size(&self) -> i64 {
        self.lock().sizes.size
    }

    pub fn internal_size(&self) -> i64 {
        self.lock().sizes.internal_size
    }

    pub fn external_size(&self) -> i64 {
        self.lock().sizes.external_size
    }

    pub fn cache_size(&self) -> i64 {
        self.lock().sizes.cache_size
    }

    /// Consistent copy of every size field
    pub fn size_info(&self) -> SizeInfo {
        self.lock().sizes
    }

    pub fn is_size_stale(&self) -> bool {
        self.lock().size_stale
    }
}

impl EntryState {
    /// Apply freshly measured stats, returning true if anything changed
    pub(crate) fn apply_stats(&mut self, stats: &PackageStats) -> bool {
        self.size_stale = false;
        self.size_load_start = None;
        let new = SizeInfo::from(stats);
        if new == self.sizes {
            return false;
        }
        self.sizes = new;
        true
    }

    /// True if sizes must be (re)computed
    pub(crate) fn wants_size(&self) -> bool {
        self.sizes.size == SIZE_UNKNOWN || self.size_stale
    }
}

impl fmt::Debug for AppEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppEntry")
            .field("id", &self.id)
            .field("package_name", &self.package_name)
            .field("label", &self.label)
            .finish()
    }
}
