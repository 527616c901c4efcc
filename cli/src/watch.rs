use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context as AnyhowContext;
use clap::Args;
use crossbeam::channel::Receiver;

use appstate::filter::alpha_comparator;
use appstate::{AppEntry, ApplicationsState, CacheEvent, ChannelListener, Context, PackagePoller};

use crate::source::{retrieve_flags, SourceArgs};
use crate::utils::{format_size, task_canceller};

#[derive(Args)]
pub struct Watch {
    #[command(flatten)]
    source: SourceArgs,

    /// Seconds between package listing polls
    #[arg(short, long, default_value_t = 2)]
    interval: u64,
}

impl Watch {
    pub fn run(&self, ctx: &dyn Context) -> anyhow::Result<()> {
        let cfg = ctx.get_config().with_context(|| "reading config")?;
        let directory = self.source.open(ctx)?;
        let mut poller = PackagePoller::new(Arc::clone(&directory), retrieve_flags(ctx)?)
            .with_context(|| "taking the initial package listing")?;
        let cache = Arc::new(
            ApplicationsState::new(directory, cfg.cache.clone())
                .with_context(|| "starting the cache")?,
        );

        let (listener, events) = ChannelListener::create();
        let printer = start_print_thread(Arc::clone(&cache), events);
        cache.resume(Arc::new(listener));

        let (signals, check) = task_canceller()?;
        poller.run(&*cache, Duration::from_secs(self.interval), &check);
        drop(signals);

        // Dropping the listener ends the print thread
        cache.pause();
        if printer.join().is_err() {
            log::error!("print thread panicked");
        }
        Ok(())
    }
}

fn start_print_thread(cache: Arc<ApplicationsState>, events: Receiver<CacheEvent>) -> JoinHandle<()> {
    thread::spawn(move || {
        for evt in events.iter() {
            match evt {
                CacheEvent::RunningStateChanged(running) => {
                    println!("running: {}", running);
                }
                CacheEvent::PackageListChanged => {
                    println!("package list changed");
                    if let Some(entries) = cache.rebuild(None, alpha_comparator()) {
                        print_entries(&entries);
                    }
                }
                CacheEvent::RebuildComplete(entries) => print_entries(&entries),
                CacheEvent::PackageIconChanged => println!("icons changed"),
                CacheEvent::PackageSizeChanged(name) => match cache.get_entry(&name) {
                    Some(entry) => println!("size {}: {}", name, format_size(entry.size())),
                    None => println!("size {}", name),
                },
                CacheEvent::AllSizesComputed => {
                    println!(
                        "all sizes computed, {} in caches",
                        format_size(cache.sum_cache_sizes())
                    );
                }
            }
        }
    })
}

fn print_entries(entries: &[Arc<AppEntry>]) {
    println!("{} applications", entries.len());
    for entry in entries {
        println!("  {}\t{}", entry.package_name(), entry.label());
    }
}
