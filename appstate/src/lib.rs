pub mod context;
pub use context::{Context, DefaultContext};

pub mod config;
pub use config::{AppStateConfig, CacheConfig};

pub mod errors;
pub use errors::{Error, Result};

pub mod adb;

pub mod command;
pub use command::run_cmd;

pub mod directory;
pub use directory::{ApplicationRecord, PackageDirectory};

pub mod entry;
pub use entry::{AppEntry, SizeInfo, SIZE_INVALID, SIZE_UNKNOWN};

pub mod filter;

pub mod listener;
pub use listener::{CacheEvent, ChannelListener, Listener, NoopListener};

pub mod events;
pub use events::{EventMonitor, PackageEvent, PackagePoller};

mod dispatch;
mod rebuild;
mod table;
mod worker;

pub mod state;
pub use state::ApplicationsState;

pub mod utils;

#[cfg(test)]
pub mod testing;
