use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver, Sender};

use crate::directory::{ApplicationRecord, PackageDirectory, RetrieveFlags};

/// Package broadcasts the cache reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageEvent {
    Added(String),
    Removed(String),
    Changed(String),
    /// Packages on removable storage became available
    ExternalAvailable(Vec<String>),
    /// Packages on removable storage went away
    ExternalUnavailable(Vec<String>),
}

pub trait EventMonitor<T>: Send + Sync {
    fn on_event(&self, evt: T);
}

impl<T, U> EventMonitor<U> for Box<T>
where
    T: EventMonitor<U> + ?Sized,
{
    fn on_event(&self, evt: U) {
        self.as_ref().on_event(evt)
    }
}

impl<T, U> EventMonitor<U> for Arc<T>
where
    T: EventMonitor<U> + ?Sized,
{
    fn on_event(&self, evt: U) {
        self.as_ref().on_event(evt)
    }
}

/// An [EventMonitor] that is just a noop
pub struct NoopMonitor;

impl<T> EventMonitor<T> for NoopMonitor {
    fn on_event(&self, _evt: T) {}
}

/// An [EventMonitor] that just dumps the events onto a channel.
pub struct ChannelEventMonitor<T>
where
    T: Sync + Send,
{
    chan: Sender<T>,
}

impl<T> ChannelEventMonitor<T>
where
    T: Sync + Send,
{
    pub fn create() -> (Self, Receiver<T>) {
        Self::create_with_bound(16)
    }

    pub fn create_with_bound(bound: usize) -> (Self, Receiver<T>) {
        let (tx, rx) = bounded(bound);
        (Self { chan: tx }, rx)
    }
}

impl<T> EventMonitor<T> for ChannelEventMonitor<T>
where
    T: Sync + Send,
{
    fn on_event(&self, evt: T) {
        let _ = self.chan.send(evt);
    }
}

/// Allows cancelling a running poll loop
#[derive(Clone)]
pub struct TaskCanceller {
    cancel: Arc<AtomicBool>,
}

impl Drop for TaskCanceller {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed)
    }
}

impl TaskCanceller {
    pub fn new() -> (Self, TaskCancelCheck) {
        let cancelled = Arc::new(AtomicBool::new(false));
        (
            Self {
                cancel: Arc::clone(&cancelled),
            },
            TaskCancelCheck { cancelled },
        )
    }

    /// Can be invoked more than once, only the first invocation matters
    pub fn cancel(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

pub struct TaskCancelCheck {
    cancelled: Arc<AtomicBool>,
}

impl TaskCancelCheck {
    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Sleep for `dur`, waking early if cancelled. Returns false if cancelled.
    pub fn sleep(&self, dur: Duration) -> bool {
        let deadline = Instant::now() + dur;
        loop {
            if self.was_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(100)));
        }
    }
}

/// Turns successive directory listings into [PackageEvent]s.
///
/// Useful when the directory has no way to push notifications itself, like a
/// fixture file or a device behind adb.
pub struct PackagePoller {
    directory: Arc<dyn PackageDirectory>,
    flags: RetrieveFlags,
    known: HashMap<String, ApplicationRecord>,
}

impl PackagePoller {
    /// Create a poller, taking the current listing as the baseline
    pub fn new(directory: Arc<dyn PackageDirectory>, flags: RetrieveFlags) -> crate::Result<Self> {
        let known = directory
            .list_installed_applications(flags)?
            .into_iter()
            .map(|it| (it.package_name.clone(), it))
            .collect();
        Ok(Self {
            directory,
            flags,
            known,
        })
    }

    /// Refresh the directory and report every difference to `monitor`,
    /// returning the number of events sent
    pub fn poll(&mut self, monitor: &dyn EventMonitor<PackageEvent>) -> crate::Result<usize> {
        self.directory.refresh()?;
        let listing = self.directory.list_installed_applications(self.flags)?;

        let mut events = Vec::new();
        let mut current = HashMap::with_capacity(listing.len());
        for rec in listing {
            match self.known.get(&rec.package_name) {
                None => events.push(PackageEvent::Added(rec.package_name.clone())),
                Some(old) if old != &rec => {
                    events.push(PackageEvent::Changed(rec.package_name.clone()))
                }
                Some(_) => {}
            }
            current.insert(rec.package_name.clone(), rec);
        }

        let mut removed = self
            .known
            .keys()
            .filter(|it| !current.contains_key(*it))
            .cloned()
            .collect::<Vec<String>>();
        removed.sort();
        events.extend(removed.into_iter().map(PackageEvent::Removed));

        self.known = current;
        let count = events.len();
        for evt in events {
            log::debug!("package event: {:?}", evt);
            monitor.on_event(evt);
        }
        Ok(count)
    }

    /// Poll every `interval` until cancelled. Poll failures are logged and
    /// retried on the next round.
    pub fn run(
        &mut self,
        monitor: &dyn EventMonitor<PackageEvent>,
        interval: Duration,
        cancel: &TaskCancelCheck,
    ) {
        while cancel.sleep(interval) {
            if let Err(e) = self.poll(monitor) {
                log::warn!("failed to poll packages: {}", e);
            }
        }
        log::debug!("package poller cancelled");
    }
}
