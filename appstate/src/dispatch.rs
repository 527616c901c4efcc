use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::listener::{CacheEvent, Listener};
use crate::rebuild::RebuildSlot;

/// Something the listener needs to hear about
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Notice {
    RunningStateChanged(bool),
    PackageListChanged,
    /// Resolved to the last published rebuild list at delivery
    RebuildComplete,
    PackageIconChanged,
    PackageSizeChanged(String),
    AllSizesComputed,
}

impl Notice {
    /// Coalesced notices are queued at most once at a time
    fn coalesced(&self) -> bool {
        matches!(
            self,
            Self::PackageListChanged
                | Self::RebuildComplete
                | Self::PackageIconChanged
                | Self::AllSizesComputed
        )
    }
}

enum DispatchMsg {
    /// A notice and the session it was posted in
    Deliver(Notice, u64),
    Shutdown,
}

/// The registered listener. `generation` advances every time the listener
/// is cleared, so notices posted before a pause never reach the listener of
/// a later resume.
#[derive(Default)]
struct Session {
    generation: u64,
    listener: Option<Arc<dyn Listener>>,
}

struct DispatchShared {
    session: RwLock<Session>,
    queued: Mutex<HashSet<(Notice, u64)>>,
    rebuild: Arc<RebuildSlot>,
}

/// Cheap handle used to queue notices from any thread
#[derive(Clone)]
pub(crate) struct Poster {
    chan: Sender<DispatchMsg>,
    shared: Arc<DispatchShared>,
}

impl Poster {
    pub(crate) fn post(&self, notice: Notice) {
        let generation = self.shared.session.read().expect("poisoned").generation;
        if notice.coalesced() {
            let mut queued = self.shared.queued.lock().expect("poisoned");
            if !queued.insert((notice.clone(), generation)) {
                return;
            }
        }
        let _ = self.chan.send(DispatchMsg::Deliver(notice, generation));
    }

    /// Register or clear the listener. Replacing a listener keeps the
    /// session, so undelivered notices go to the replacement; clearing it
    /// ends the session.
    pub(crate) fn set_listener(&self, listener: Option<Arc<dyn Listener>>) {
        let mut session = self.shared.session.write().expect("poisoned");
        if listener.is_none() && session.listener.is_some() {
            session.generation += 1;
        }
        session.listener = listener;
    }

    #[cfg(test)]
    pub(crate) fn has_listener(&self) -> bool {
        self.shared.session.read().expect("poisoned").listener.is_some()
    }
}

/// Delivers notices to the registered [Listener] on its own thread, in the
/// order they were posted.
pub(crate) struct MainDispatcher {
    poster: Poster,
    handle: Option<JoinHandle<()>>,
}

impl MainDispatcher {
    pub(crate) fn spawn(rebuild: Arc<RebuildSlot>) -> crate::Result<Self> {
        let (tx, rx) = unbounded();
        let shared = Arc::new(DispatchShared {
            session: RwLock::new(Session::default()),
            queued: Mutex::new(HashSet::new()),
            rebuild,
        });
        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(String::from("appstate-main"))
            .spawn(move || dispatch_loop(thread_shared, rx))?;
        Ok(Self {
            poster: Poster { chan: tx, shared },
            handle: Some(handle),
        })
    }

    pub(crate) fn poster(&self) -> Poster {
        self.poster.clone()
    }

    pub(crate) fn shutdown(&mut self) {
        let _ = self.poster.chan.send(DispatchMsg::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("dispatcher thread panicked");
            }
        }
    }
}

impl Drop for MainDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch_loop(shared: Arc<DispatchShared>, rx: Receiver<DispatchMsg>) {
    while let Ok(msg) = rx.recv() {
        let (notice, generation) = match msg {
            DispatchMsg::Deliver(n, g) => (n, g),
            DispatchMsg::Shutdown => break,
        };
        if notice.coalesced() {
            shared
                .queued
                .lock()
                .expect("poisoned")
                .remove(&(notice.clone(), generation));
        }
        let listener = {
            let session = shared.session.read().expect("poisoned");
            if session.generation != generation {
                log::trace!("session over, dropping {:?}", notice);
                continue;
            }
            match &session.listener {
                Some(l) => Arc::clone(l),
                None => {
                    log::trace!("no listener, dropping {:?}", notice);
                    continue;
                }
            }
        };
        let evt = match notice {
            Notice::RunningStateChanged(running) => CacheEvent::RunningStateChanged(running),
            Notice::PackageListChanged => CacheEvent::PackageListChanged,
            Notice::RebuildComplete => CacheEvent::RebuildComplete(shared.rebuild.last()),
            Notice::PackageIconChanged => CacheEvent::PackageIconChanged,
            Notice::PackageSizeChanged(name) => CacheEvent::PackageSizeChanged(name),
            Notice::AllSizesComputed => CacheEvent::AllSizesComputed,
        };
        evt.deliver(listener.as_ref());
    }
    log::trace!("dispatcher exiting");
}
