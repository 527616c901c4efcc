use std::io::{stdout, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context as AnyhowContext};
use clap::{Args, ValueEnum};
use crossbeam::channel::{Receiver, RecvTimeoutError};
use serde::Serialize;

use appstate::filter::{
    alpha_comparator, external_size_comparator, internal_size_comparator, size_comparator,
    AllEnabledFilter, AppFilter, Comparator, DisabledFilter, OnSdCardFilter, ThirdPartyFilter,
};
use appstate::{AppEntry, ApplicationsState, CacheEvent, ChannelListener, Context};

use crate::source::SourceArgs;
use crate::utils::{format_size, known_size};

#[derive(Clone, Copy, ValueEnum)]
enum FilterArg {
    All,
    ThirdParty,
    Disabled,
    Enabled,
    SdCard,
}

impl FilterArg {
    fn build(self) -> Option<Box<dyn AppFilter>> {
        match self {
            Self::All => None,
            Self::ThirdParty => Some(Box::new(ThirdPartyFilter)),
            Self::Disabled => Some(Box::new(DisabledFilter)),
            Self::Enabled => Some(Box::new(AllEnabledFilter)),
            Self::SdCard => Some(Box::new(OnSdCardFilter::default())),
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SortArg {
    Alpha,
    Size,
    Internal,
    External,
}

impl SortArg {
    fn build(self) -> Comparator {
        match self {
            Self::Alpha => alpha_comparator(),
            Self::Size => size_comparator(),
            Self::Internal => internal_size_comparator(),
            Self::External => external_size_comparator(),
        }
    }
}

#[derive(Args)]
pub struct List {
    #[command(flatten)]
    source: SourceArgs,

    /// Which applications to show
    #[arg(long, value_enum, default_value_t = FilterArg::All)]
    filter: FilterArg,

    /// Sort order, size orders put the largest first
    #[arg(long, value_enum, default_value_t = SortArg::Alpha)]
    sort: SortArg,

    /// Print JSON instead of a table
    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    json: bool,

    /// Seconds to wait for every size to be computed, 0 to skip waiting
    #[arg(short, long, default_value_t = 30)]
    wait_sizes: u64,
}

#[derive(Serialize)]
struct Row<'a> {
    id: u64,
    package: &'a str,
    label: &'a str,
    enabled: bool,
    system: bool,
    size: Option<i64>,
    internal_size: Option<i64>,
    external_size: Option<i64>,
    cache_size: Option<i64>,
}

impl List {
    pub fn run(&self, ctx: &dyn Context) -> anyhow::Result<()> {
        let cfg = ctx.get_config().with_context(|| "reading config")?;
        let directory = self.source.open(ctx)?;
        let cache = ApplicationsState::new(directory, cfg.cache.clone())
            .with_context(|| "starting the cache")?;

        let (listener, events) = ChannelListener::create();
        cache.resume(Arc::new(listener));

        if self.wait_sizes > 0 {
            let deadline = Instant::now() + Duration::from_secs(self.wait_sizes);
            if wait_for(&events, deadline, |it| {
                matches!(it, CacheEvent::AllSizesComputed)
            })
            .is_none()
            {
                log::warn!("not every size was computed within {}s", self.wait_sizes);
            }
        }

        let entries = match cache.rebuild(self.filter.build(), self.sort.build()) {
            Some(v) => v,
            None => {
                log::debug!("rebuild went async");
                let deadline = Instant::now() + Duration::from_secs(30);
                match wait_for(&events, deadline, |it| {
                    matches!(it, CacheEvent::RebuildComplete(_))
                }) {
                    Some(CacheEvent::RebuildComplete(v)) => v,
                    _ => bail!("timed out waiting for the application list"),
                }
            }
        };

        cache.pause();

        if self.json {
            self.print_json(&entries)
        } else {
            self.print_table(&entries)
        }
    }

    fn print_json(&self, entries: &[Arc<AppEntry>]) -> anyhow::Result<()> {
        let rows = entries
            .iter()
            .map(|entry| {
                let record = entry.record();
                let sizes = entry.size_info();
                Row {
                    id: entry.id(),
                    package: entry.package_name(),
                    label: entry.label(),
                    enabled: record.enabled,
                    system: record.is_system(),
                    size: known_size(sizes.size),
                    internal_size: known_size(sizes.internal_size),
                    external_size: known_size(sizes.external_size),
                    cache_size: known_size(sizes.cache_size),
                }
            })
            .collect::<Vec<_>>();
        let mut out = stdout().lock();
        serde_json::to_writer_pretty(&mut out, &rows)?;
        writeln!(out)?;
        Ok(())
    }

    fn print_table(&self, entries: &[Arc<AppEntry>]) -> anyhow::Result<()> {
        let name_width = entries
            .iter()
            .map(|it| it.package_name().len())
            .max()
            .unwrap_or(0);
        let label_width = entries
            .iter()
            .map(|it| it.label().chars().count())
            .max()
            .unwrap_or(0);

        let mut out = stdout().lock();
        for entry in entries {
            let record = entry.record();
            let state = if record.enabled { "" } else { "\tdisabled" };
            writeln!(
                out,
                "{:<name_width$}\t{:<label_width$}\t{:>10}{}",
                entry.package_name(),
                entry.label(),
                format_size(entry.size()),
                state,
            )?;
        }
        Ok(())
    }
}

/// Wait for the first event matching `pred`, dropping everything before it
fn wait_for<F>(events: &Receiver<CacheEvent>, deadline: Instant, pred: F) -> Option<CacheEvent>
where
    F: Fn(&CacheEvent) -> bool,
{
    loop {
        match events.recv_deadline(deadline) {
            Ok(evt) if pred(&evt) => return Some(evt),
            Ok(evt) => log::trace!("skipping {:?}", evt),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return None,
        }
    }
}
