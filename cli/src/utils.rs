use std::thread::JoinHandle;

use signal_hook::consts::TERM_SIGNALS;
use signal_hook::iterator::Handle;
use signal_hook::iterator::Signals;

use appstate::events::{TaskCancelCheck, TaskCanceller};
use appstate::{SIZE_INVALID, SIZE_UNKNOWN};

/// Keeps the signal thread alive, closing the signal handle when dropped
pub struct HookedSignals {
    sig_handle: Handle,
    _join_handle: JoinHandle<()>,
}

impl Drop for HookedSignals {
    fn drop(&mut self) {
        if !self.sig_handle.is_closed() {
            self.sig_handle.close();
        }
    }
}

/// Cancel `cancel` on the first termination signal. A second signal gets the
/// default handling so a stuck command can still be killed.
pub fn hook_to_signals(mut cancel: TaskCanceller) -> anyhow::Result<HookedSignals> {
    let mut sigs = Signals::new(TERM_SIGNALS)?;
    let sig_handle = sigs.handle();
    let _join_handle = std::thread::spawn(move || {
        let mut seen_exit = false;
        for sig in sigs.forever() {
            if seen_exit {
                _ = signal_hook::low_level::emulate_default_handler(sig);
            } else {
                log::debug!("got signal {}, cancelling", sig);
                cancel.cancel();
                seen_exit = true;
            }
        }
    });

    Ok(HookedSignals {
        sig_handle,
        _join_handle,
    })
}

pub fn task_canceller() -> anyhow::Result<(HookedSignals, TaskCancelCheck)> {
    let (cancel, check) = TaskCanceller::new();
    Ok((hook_to_signals(cancel)?, check))
}

/// Sizes the cache hasn't measured are reported as missing
pub fn known_size(size: i64) -> Option<i64> {
    if size < 0 {
        None
    } else {
        Some(size)
    }
}

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Human readable byte count using 1024 based units
pub fn format_size(size: i64) -> String {
    match size {
        SIZE_UNKNOWN => return String::from("?"),
        SIZE_INVALID => return String::from("-"),
        v if v < 0 => return String::from("-"),
        _ => {}
    }

    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", size, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
