//! The background worker.
//!
//! All directory listing, entry materialization, icon loading and size
//! polling happens on one dedicated thread. The worker walks a small stage
//! machine (`Entries -> Icons -> Sizes -> Idle`), doing a bounded amount of
//! work per step and checking its channel between steps so pending rebuilds
//! and new requests are never starved.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::config::CacheConfig;
use crate::directory::{PackageDirectory, StatsResult};
use crate::dispatch::{Notice, Poster};
use crate::entry::AppEntry;
use crate::rebuild::{Delivery, RebuildRequest, RebuildSlot};
use crate::table::EntryTable;

/// State shared between the public facade and the worker thread
pub(crate) struct Shared {
    pub(crate) directory: Arc<dyn PackageDirectory>,
    pub(crate) config: CacheConfig,
    pub(crate) table: Mutex<EntryTable>,
    pub(crate) rebuild: Arc<RebuildSlot>,
    pub(crate) poster: Poster,
    pub(crate) running: AtomicBool,
}

impl Shared {
    pub(crate) fn table(&self) -> MutexGuard<'_, EntryTable> {
        self.table.lock().expect("table lock poisoned")
    }
}

pub(crate) enum WorkerMsg {
    /// Only check for a pending rebuild or a state change
    Wake,
    /// (Re)start the load pipeline from materialization
    LoadEntries,
    RequestSize(String),
    StatsCompleted(String, StatsResult),
    Shutdown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Idle,
    Entries,
    Icons,
    Sizes,
}

enum Step {
    /// Work remains, keep going
    More,
    /// Nothing to do until a message arrives or the deadline passes
    Blocked(Option<Instant>),
}

pub(crate) struct WorkerHandle {
    chan: Sender<WorkerMsg>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub(crate) fn spawn(shared: Arc<Shared>) -> crate::Result<Self> {
        let (tx, rx) = unbounded();
        let worker = Worker {
            shared,
            rx,
            tx: tx.clone(),
            stage: Stage::Idle,
            failed_icons: HashSet::new(),
            requested: VecDeque::new(),
            shutdown: false,
        };
        let handle = thread::Builder::new()
            .name(String::from("appstate-worker"))
            .spawn(move || worker.run())?;
        Ok(Self {
            chan: tx,
            handle: Some(handle),
        })
    }

    pub(crate) fn send(&self, msg: WorkerMsg) {
        let _ = self.chan.send(msg);
    }

    pub(crate) fn shutdown(&mut self) {
        self.send(WorkerMsg::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    shared: Arc<Shared>,
    rx: Receiver<WorkerMsg>,
    tx: Sender<WorkerMsg>,
    stage: Stage,
    /// Entries whose icon failed to load during the current icon pass
    failed_icons: HashSet<u64>,
    /// Explicit size requests, served before the regular scan
    requested: VecDeque<String>,
    shutdown: bool,
}

impl Worker {
    fn run(mut self) {
        log::debug!("worker started");
        loop {
            while let Ok(msg) = self.rx.try_recv() {
                self.handle(msg);
            }
            if self.shutdown {
                break;
            }
            if self.run_pending_rebuild() {
                continue;
            }

            let deadline = match self.step() {
                Step::More => continue,
                Step::Blocked(deadline) => deadline,
            };

            let msg = match deadline {
                Some(at) => match self.rx.recv_deadline(at) {
                    Ok(msg) => msg,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match self.rx.recv() {
                    Ok(msg) => msg,
                    Err(_) => break,
                },
            };
            self.handle(msg);
        }
        log::debug!("worker exiting");
    }

    fn handle(&mut self, msg: WorkerMsg) {
        match msg {
            WorkerMsg::Wake => {}
            WorkerMsg::LoadEntries => self.set_stage(Stage::Entries),
            WorkerMsg::RequestSize(pkg) => {
                if !self.requested.contains(&pkg) {
                    self.requested.push_back(pkg);
                }
                if self.stage == Stage::Idle {
                    self.set_stage(Stage::Sizes);
                }
            }
            WorkerMsg::StatsCompleted(pkg, res) => self.on_stats_completed(&pkg, res),
            WorkerMsg::Shutdown => self.shutdown = true,
        }
    }

    fn set_stage(&mut self, stage: Stage) {
        if stage == Stage::Entries || stage == Stage::Icons {
            self.failed_icons.clear();
        }
        let was_running = self.stage != Stage::Idle;
        let running = stage != Stage::Idle;
        self.stage = stage;
        if was_running != running {
            log::debug!("worker running: {}", running);
            self.shared.running.store(running, Ordering::Release);
            self.shared.poster.post(Notice::RunningStateChanged(running));
        }
    }

    fn step(&mut self) -> Step {
        let step = match self.stage {
            Stage::Idle => return Step::Blocked(None),
            Stage::Entries => self.load_entries(),
            Stage::Icons => self.load_icons(),
            Stage::Sizes => self.load_sizes(),
        };
        if self.stage == Stage::Idle {
            return Step::Blocked(None);
        }
        step
    }

    fn run_pending_rebuild(&mut self) -> bool {
        let RebuildRequest {
            mut filter,
            comparator,
        } = match self.shared.rebuild.take_request() {
            Some(req) => req,
            None => return false,
        };

        if let Some(f) = filter.as_mut() {
            f.init();
        }

        let mut list = {
            let mut table = self.shared.table();
            let records = table.records().to_vec();
            records
                .iter()
                .filter(|rec| filter.as_ref().map_or(true, |f| f.filter_app(rec)))
                .map(|rec| table.get_or_materialize(rec, self.shared.directory.as_ref()))
                .collect::<Vec<_>>()
        };
        list.sort_by(|a, b| comparator(a.as_ref(), b.as_ref()));
        log::debug!("rebuilt list with {} entries", list.len());

        match self.shared.rebuild.publish(list) {
            Delivery::Async => self.shared.poster.post(Notice::RebuildComplete),
            Delivery::Sync => {}
            Delivery::Superseded => log::trace!("rebuild superseded before publishing"),
        }
        true
    }

    fn load_entries(&mut self) -> Step {
        let quantum = self.shared.config.entries_per_tick;
        let (done, remaining) = {
            let mut table = self.shared.table();
            if !table.resumed {
                drop(table);
                self.set_stage(Stage::Idle);
                return Step::More;
            }
            let done = table.materialize_batch(quantum, self.shared.directory.as_ref());
            (done, table.has_unmaterialized())
        };
        log::trace!("materialized {} entries", done);
        if done < quantum || !remaining {
            self.set_stage(Stage::Icons);
        }
        Step::More
    }

    fn load_icons(&mut self) -> Step {
        let quantum = self.shared.config.icons_per_tick;
        let batch = {
            let table = self.shared.table();
            if !table.resumed {
                drop(table);
                self.set_stage(Stage::Idle);
                return Step::More;
            }
            table
                .entries()
                .iter()
                .filter(|it| !self.failed_icons.contains(&it.id()) && !it.has_icon())
                .take(quantum)
                .cloned()
                .collect::<Vec<Arc<AppEntry>>>()
        };

        let mut loaded = 0;
        for entry in &batch {
            let record = entry.record();
            match self.shared.directory.load_icon(&record) {
                Ok(icon) => {
                    let mut state = entry.lock();
                    if state.icon.is_none() {
                        state.icon = Some(icon);
                        loaded += 1;
                    }
                }
                Err(e) => {
                    log::debug!("no icon for {}: {}", entry.package_name(), e);
                    self.failed_icons.insert(entry.id());
                }
            }
        }

        if loaded > 0 {
            self.shared.poster.post(Notice::PackageIconChanged);
        }
        if batch.len() < quantum {
            self.set_stage(Stage::Sizes);
        }
        Step::More
    }

    fn load_sizes(&mut self) -> Step {
        let retry = self.shared.config.size_retry;
        let now = Instant::now();
        let mut table = self.shared.table();
        if !table.resumed {
            drop(table);
            self.set_stage(Stage::Idle);
            return Step::More;
        }

        // One query at a time, even if its entry was removed meanwhile
        if let Some((pkg, at)) = &table.computing_size {
            if now.duration_since(*at) < retry {
                return Step::Blocked(Some(*at + retry));
            }
            log::warn!("abandoning stats query for {}", pkg);
            table.computing_size = None;
        }

        let mut next = None;
        while let Some(pkg) = self.requested.pop_front() {
            if let Some(entry) = table.get(&pkg) {
                next = Some(Arc::clone(entry));
                break;
            }
        }

        let mut retry_at: Option<Instant> = None;
        if next.is_none() {
            for entry in table.entries() {
                let state = entry.lock();
                if !state.wants_size() {
                    continue;
                }
                match state.size_load_start {
                    Some(at) if now.duration_since(at) < retry => {
                        let at = at + retry;
                        retry_at = Some(retry_at.map_or(at, |it| it.min(at)));
                    }
                    _ => {
                        next = Some(Arc::clone(entry));
                        break;
                    }
                }
            }
        }

        let entry = match next {
            Some(e) => e,
            None => {
                drop(table);
                if retry_at.is_some() {
                    log::trace!("only cooling down entries left");
                    return Step::Blocked(retry_at);
                }
                self.shared.poster.post(Notice::AllSizesComputed);
                self.set_stage(Stage::Idle);
                return Step::More;
            }
        };

        let pkg = String::from(entry.package_name());
        entry.lock().size_load_start = Some(now);
        table.computing_size = Some((pkg.clone(), now));
        drop(table);

        log::trace!("querying storage stats for {}", pkg);
        let chan = self.tx.clone();
        let reply_pkg = pkg.clone();
        self.shared.directory.query_storage_stats(
            &pkg,
            Box::new(move |res| {
                let _ = chan.send(WorkerMsg::StatsCompleted(reply_pkg, res));
            }),
        );
        Step::More
    }

    fn on_stats_completed(&mut self, pkg: &str, res: StatsResult) {
        let mut table = self.shared.table();
        match res {
            Ok(stats) => {
                if let Some(entry) = table.get(pkg) {
                    let changed = entry.lock().apply_stats(&stats);
                    if changed {
                        log::trace!("size of {} changed", pkg);
                        self.shared
                            .poster
                            .post(Notice::PackageSizeChanged(String::from(pkg)));
                    }
                }
            }
            Err(e) => log::debug!("stats for {} failed: {}", pkg, e),
        }

        let matches = match &table.computing_size {
            None => true,
            Some((cur, _)) => cur == pkg,
        };
        if matches {
            table.computing_size = None;
            let resumed = table.resumed;
            drop(table);
            if resumed && self.stage == Stage::Idle {
                self.set_stage(Stage::Sizes);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use rstest::*;

    use crate::directory::PackageStats;
    use crate::filter::alpha_comparator;
    use crate::listener::CacheEvent;
    use crate::testing::{drain_until, Harness, harness};

    #[rstest]
    fn test_pipeline_drains(harness: Harness) {
        harness.dir.complete_all_stats(true);
        harness.resume();
        let events = drain_until(&harness.events, |e| matches!(e, CacheEvent::AllSizesComputed));

        assert!(matches!(events.first(), Some(CacheEvent::RunningStateChanged(true))));
        assert!(events
            .iter()
            .any(|e| matches!(e, CacheEvent::PackageIconChanged)));
        let size_changes = events
            .iter()
            .filter(|e| matches!(e, CacheEvent::PackageSizeChanged(_)))
            .count();
        assert_eq!(size_changes, 2);
        assert!(matches!(
            harness.events.recv_timeout(Duration::from_secs(5)),
            Ok(CacheEvent::RunningStateChanged(false))
        ));
        assert!(!harness.cache.is_running());

        let entry = harness.cache.get_entry("a.app").expect("entry");
        assert!(entry.has_icon());
        assert_eq!(entry.size(), 7168);
    }

    #[rstest]
    fn test_icon_failure_does_not_stall(harness: Harness) {
        harness.dir.fail_icon("a.app");
        harness.dir.complete_all_stats(true);
        harness.resume();
        drain_until(&harness.events, |e| matches!(e, CacheEvent::AllSizesComputed));

        assert!(!harness.cache.get_entry("a.app").unwrap().has_icon());
        assert!(harness.cache.get_entry("b.app").unwrap().has_icon());
    }

    #[rstest]
    fn test_stats_failure_keeps_values(harness: Harness) {
        harness.dir.complete_all_stats(true);
        harness.resume();
        drain_until(&harness.events, |e| matches!(e, CacheEvent::AllSizesComputed));

        harness.dir.complete_all_stats(false);
        harness.cache.request_size("a.app");
        assert!(harness.dir.wait_pending("a.app"));
        harness
            .dir
            .complete_stats("a.app", Err(crate::Error::StatsUnavailable("a.app".into())));

        let events = drain_until(&harness.events, |e| matches!(e, CacheEvent::AllSizesComputed));
        assert!(!events
            .iter()
            .any(|e| matches!(e, CacheEvent::PackageSizeChanged(_))));
        let entry = harness.cache.get_entry("a.app").unwrap();
        assert_eq!(entry.size(), 7168);
        assert!(!entry.is_size_stale());
    }

    #[rstest]
    fn test_cool_down_blocks_all_sizes_computed(harness: Harness) {
        harness.resume();
        assert!(harness.dir.wait_pending("a.app"));
        harness
            .dir
            .complete_stats("a.app", Err(crate::Error::StatsUnavailable("a.app".into())));
        assert!(harness.dir.wait_pending("b.app"));
        harness.dir.complete_stats(
            "b.app",
            Ok(PackageStats {
                data_size: 1,
                ..PackageStats::new("b.app")
            }),
        );
        drain_until(&harness.events, |e| {
            matches!(e, CacheEvent::PackageSizeChanged(p) if p == "b.app")
        });

        // a.app is cooling down after its failure
        let next = harness.events.recv_timeout(Duration::from_millis(100));
        assert!(!matches!(next, Ok(CacheEvent::AllSizesComputed)));
        assert!(harness.cache.is_running());

        // and is retried once the cool-down expires
        assert!(harness.dir.wait_pending("a.app"));
    }

    #[rstest]
    fn test_removed_package_keeps_query_slot(harness: Harness) {
        harness.resume();
        assert!(harness.dir.wait_pending("a.app"));

        harness.cache.remove_package("a.app");
        // Runs on the worker, which then goes back to the size stage
        let list = harness
            .cache
            .rebuild(None, alpha_comparator())
            .expect("rebuild");
        assert_eq!(list.len(), 1);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(harness.dir.pending_packages(), vec![String::from("a.app")]);

        assert!(harness.dir.complete_stats(
            "a.app",
            Ok(PackageStats::new("a.app"))
        ));
        assert!(harness.dir.wait_pending("b.app"));
        assert_eq!(harness.dir.pending_packages(), vec![String::from("b.app")]);
    }
}
