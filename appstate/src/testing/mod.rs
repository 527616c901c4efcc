use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError};
use rstest::fixture;

use crate::config::CacheConfig;
use crate::events::PackageEvent;
use crate::listener::{CacheEvent, ChannelListener};
use crate::ApplicationsState;

mod adb;
pub use adb::*;

mod directory;
pub use directory::*;

/// Config with short timers so cool-down paths are testable
pub fn test_config() -> CacheConfig {
    CacheConfig {
        size_retry: Duration::from_millis(300),
        ..CacheConfig::default()
    }
}

/// An isolated cache over a [FakeDirectory] listing `a.app` and `b.app`
pub struct Harness {
    pub dir: Arc<FakeDirectory>,
    pub cache: ApplicationsState,
    pub listener: Arc<ChannelListener>,
    pub events: Receiver<CacheEvent>,
}

impl Harness {
    pub fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = Arc::new(FakeDirectory::with_packages(&["a.app", "b.app"]));
        let cache = ApplicationsState::new(Arc::clone(&dir) as _, test_config())
            .expect("failed to start cache");
        let (listener, events) = ChannelListener::create();
        Self {
            dir,
            cache,
            listener: Arc::new(listener),
            events,
        }
    }

    pub fn resume(&self) {
        self.cache.resume(Arc::clone(&self.listener) as _);
    }

    pub fn handle(&self, evt: PackageEvent) {
        self.cache.handle_package_event(evt);
    }
}

#[fixture]
pub fn harness() -> Harness {
    Harness::new()
}

/// Collect events up to and including the first one matching `pred`
pub fn drain_until<F>(rx: &Receiver<CacheEvent>, pred: F) -> Vec<CacheEvent>
where
    F: Fn(&CacheEvent) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut seen = Vec::new();
    loop {
        match rx.recv_deadline(deadline) {
            Ok(evt) => {
                let done = pred(&evt);
                seen.push(evt);
                if done {
                    return seen;
                }
            }
            Err(RecvTimeoutError::Timeout) => panic!("timed out waiting, got {:?}", seen),
            Err(RecvTimeoutError::Disconnected) => panic!("listener gone, got {:?}", seen),
        }
    }
}

/// Collect events until none arrived for `window`
pub fn quiet(rx: &Receiver<CacheEvent>, window: Duration) -> Vec<CacheEvent> {
    let mut seen = Vec::new();
    while let Ok(evt) = rx.recv_timeout(window) {
        seen.push(evt);
    }
    seen
}
