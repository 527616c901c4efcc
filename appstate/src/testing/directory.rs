use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::directory::{
    ApplicationRecord, Icon, PackageDirectory, PackageStats, RetrieveFlags, StatsCallback,
    StatsResult,
};

const WAIT: Duration = Duration::from_secs(5);

/// A scriptable in-memory [PackageDirectory].
///
/// Stats queries are held until completed with [FakeDirectory::complete_stats]
/// unless [FakeDirectory::complete_all_stats] switched on automatic
/// completion, which answers every query with the package's canned stats
/// (2048 code + 4096 data + 1024 cache unless replaced).
pub struct FakeDirectory {
    state: Mutex<FakeState>,
    cond: Condvar,
}

#[derive(Default)]
struct FakeState {
    records: Vec<ApplicationRecord>,
    stats: HashMap<String, PackageStats>,
    pending: Vec<(String, StatsCallback)>,
    auto_stats: bool,
    failing_icons: HashSet<String>,
    icons_blocked: bool,
    icon_waiters: usize,
    list_delay: Duration,
}

/// Keeps icon loads blocked until dropped
pub struct IconGate<'a> {
    dir: &'a FakeDirectory,
}

impl Drop for IconGate<'_> {
    fn drop(&mut self) {
        self.dir.lock().icons_blocked = false;
        self.dir.cond.notify_all();
    }
}

fn canned_stats(package_name: &str) -> PackageStats {
    PackageStats {
        code_size: 2048,
        data_size: 4096,
        cache_size: 1024,
        ..PackageStats::new(package_name)
    }
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            cond: Condvar::new(),
        }
    }

    pub fn with_packages(names: &[&str]) -> Self {
        let dir = Self::new();
        for name in names {
            dir.install(ApplicationRecord::new(*name));
        }
        dir
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("poisoned")
    }

    /// Install `record`, replacing any record with the same package name
    pub fn install(&self, record: ApplicationRecord) {
        let mut state = self.lock();
        state
            .stats
            .entry(record.package_name.clone())
            .or_insert_with(|| canned_stats(&record.package_name));
        match state
            .records
            .iter_mut()
            .find(|it| it.package_name == record.package_name)
        {
            Some(existing) => *existing = record,
            None => state.records.push(record),
        }
    }

    pub fn remove(&self, package_name: &str) {
        self.lock().records.retain(|it| it.package_name != package_name);
    }

    pub fn set_stats(&self, stats: PackageStats) {
        self.lock().stats.insert(stats.package_name.clone(), stats);
    }

    /// Answer queries immediately with canned stats, also flushing anything
    /// already pending
    pub fn complete_all_stats(&self, auto: bool) {
        let flushed = {
            let mut state = self.lock();
            state.auto_stats = auto;
            if !auto {
                return;
            }
            let pending = std::mem::take(&mut state.pending);
            pending
                .into_iter()
                .map(|(name, cb)| {
                    let res = state
                        .stats
                        .get(&name)
                        .cloned()
                        .ok_or_else(|| crate::Error::StatsUnavailable(name.clone()));
                    (cb, res)
                })
                .collect::<Vec<_>>()
        };
        for (cb, res) in flushed {
            cb(res);
        }
    }

    /// Wait until a stats query for `package_name` is pending
    pub fn wait_pending(&self, package_name: &str) -> bool {
        let deadline = Instant::now() + WAIT;
        let mut state = self.lock();
        while !state.pending.iter().any(|(name, _)| name == package_name) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .cond
                .wait_timeout(state, deadline - now)
                .expect("poisoned")
                .0;
        }
        true
    }

    /// Packages with a stats query waiting to be completed, oldest first
    pub fn pending_packages(&self) -> Vec<String> {
        self.lock().pending.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Complete the oldest pending query for `package_name`
    pub fn complete_stats(&self, package_name: &str, res: StatsResult) -> bool {
        let cb = {
            let mut state = self.lock();
            match state.pending.iter().position(|(name, _)| name == package_name) {
                Some(idx) => state.pending.remove(idx).1,
                None => return false,
            }
        };
        cb(res);
        true
    }

    /// Make every listing take at least `delay`
    pub fn set_list_delay(&self, delay: Duration) {
        self.lock().list_delay = delay;
    }

    pub fn fail_icon(&self, package_name: &str) {
        self.lock().failing_icons.insert(package_name.into());
    }

    pub fn fix_icon(&self, package_name: &str) {
        self.lock().failing_icons.remove(package_name);
    }

    /// Block every icon load until the returned gate is dropped
    pub fn block_icons(&self) -> IconGate<'_> {
        self.lock().icons_blocked = true;
        IconGate { dir: self }
    }

    /// Wait until some caller is stuck in a blocked icon load
    pub fn wait_icon_blocked(&self) -> bool {
        let deadline = Instant::now() + WAIT;
        let mut state = self.lock();
        while state.icon_waiters == 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .cond
                .wait_timeout(state, deadline - now)
                .expect("poisoned")
                .0;
        }
        true
    }
}

impl Default for FakeDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl PackageDirectory for FakeDirectory {
    fn list_installed_applications(
        &self,
        _flags: RetrieveFlags,
    ) -> crate::Result<Vec<ApplicationRecord>> {
        let delay = self.lock().list_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        Ok(self.lock().records.clone())
    }

    fn get_application_record(
        &self,
        package_name: &str,
        _flags: RetrieveFlags,
    ) -> crate::Result<ApplicationRecord> {
        self.lock()
            .records
            .iter()
            .find(|it| it.package_name == package_name)
            .cloned()
            .ok_or_else(|| crate::Error::PackageNotFound(package_name.into()))
    }

    fn load_icon(&self, record: &ApplicationRecord) -> crate::Result<Icon> {
        let mut state = self.lock();
        if state.icons_blocked {
            state.icon_waiters += 1;
            self.cond.notify_all();
            while state.icons_blocked {
                state = self.cond.wait(state).expect("poisoned");
            }
            state.icon_waiters -= 1;
        }
        if state.failing_icons.contains(&record.package_name) {
            return Err(crate::Error::NoIcon(record.package_name.clone()));
        }
        Ok(Icon::new(record.package_name.as_bytes().to_vec()))
    }

    fn query_storage_stats(&self, package_name: &str, on_complete: StatsCallback) {
        let mut state = self.lock();
        if state.auto_stats {
            let res = state
                .stats
                .get(package_name)
                .cloned()
                .ok_or_else(|| crate::Error::StatsUnavailable(package_name.into()));
            drop(state);
            on_complete(res);
            return;
        }
        state.pending.push((String::from(package_name), on_complete));
        self.cond.notify_all();
    }
}
