use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::entry::AppEntry;

/// Callbacks the cache delivers to its single registered consumer.
///
/// Every callback runs on the dispatcher thread in the order the matching
/// state change was committed.
pub trait Listener: Send + Sync {
    fn on_running_state_changed(&self, _running: bool) {}

    fn on_package_list_changed(&self) {}

    fn on_rebuild_complete(&self, _entries: Vec<Arc<AppEntry>>) {}

    fn on_package_icon_changed(&self) {}

    fn on_package_size_changed(&self, _package_name: &str) {}

    fn on_all_sizes_computed(&self) {}
}

impl<T> Listener for Arc<T>
where
    T: Listener + ?Sized,
{
    fn on_running_state_changed(&self, running: bool) {
        self.as_ref().on_running_state_changed(running)
    }

    fn on_package_list_changed(&self) {
        self.as_ref().on_package_list_changed()
    }

    fn on_rebuild_complete(&self, entries: Vec<Arc<AppEntry>>) {
        self.as_ref().on_rebuild_complete(entries)
    }

    fn on_package_icon_changed(&self) {
        self.as_ref().on_package_icon_changed()
    }

    fn on_package_size_changed(&self, package_name: &str) {
        self.as_ref().on_package_size_changed(package_name)
    }

    fn on_all_sizes_computed(&self) {
        self.as_ref().on_all_sizes_computed()
    }
}

/// A [Listener] callback as a value
#[derive(Debug, Clone)]
pub enum CacheEvent {
    RunningStateChanged(bool),
    PackageListChanged,
    RebuildComplete(Vec<Arc<AppEntry>>),
    PackageIconChanged,
    PackageSizeChanged(String),
    AllSizesComputed,
}

impl CacheEvent {
    /// Deliver this event to `listener`
    pub fn deliver(self, listener: &dyn Listener) {
        match self {
            Self::RunningStateChanged(running) => listener.on_running_state_changed(running),
            Self::PackageListChanged => listener.on_package_list_changed(),
            Self::RebuildComplete(entries) => listener.on_rebuild_complete(entries),
            Self::PackageIconChanged => listener.on_package_icon_changed(),
            Self::PackageSizeChanged(name) => listener.on_package_size_changed(&name),
            Self::AllSizesComputed => listener.on_all_sizes_computed(),
        }
    }
}

/// A [Listener] that is just a noop
pub struct NoopListener;

impl Listener for NoopListener {}

/// A [Listener] that just dumps every callback onto a channel.
pub struct ChannelListener {
    chan: Sender<CacheEvent>,
}

impl ChannelListener {
    pub fn create() -> (Self, Receiver<CacheEvent>) {
        let (tx, rx) = unbounded();
        (Self::new(tx), rx)
    }

    pub fn new(chan: Sender<CacheEvent>) -> Self {
        Self { chan }
    }

    fn send(&self, evt: CacheEvent) {
        let _ = self.chan.send(evt);
    }
}

impl Listener for ChannelListener {
    fn on_running_state_changed(&self, running: bool) {
        self.send(CacheEvent::RunningStateChanged(running));
    }

    fn on_package_list_changed(&self) {
        self.send(CacheEvent::PackageListChanged);
    }

    fn on_rebuild_complete(&self, entries: Vec<Arc<AppEntry>>) {
        self.send(CacheEvent::RebuildComplete(entries));
    }

    fn on_package_icon_changed(&self) {
        self.send(CacheEvent::PackageIconChanged);
    }

    fn on_package_size_changed(&self, package_name: &str) {
        self.send(CacheEvent::PackageSizeChanged(package_name.into()));
    }

    fn on_all_sizes_computed(&self) {
        self.send(CacheEvent::AllSizesComputed);
    }
}
