use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context as AnyhowContext};
use clap::Args;

use appstate::adb::{Adb, ExecAdb};
use appstate::directory::{AdbDirectory, FixtureDirectory, RetrieveFlags};
use appstate::{Context, PackageDirectory};

/// Where the package listing comes from, shared by every command
#[derive(Args)]
pub struct SourceArgs {
    /// Read packages from a TOML fixture file
    #[arg(long, conflicts_with = "adb")]
    fixture: Option<PathBuf>,

    /// Ask the connected device's package manager over adb
    #[arg(long, action = clap::ArgAction::SetTrue)]
    adb: bool,
}

impl SourceArgs {
    pub fn open(&self, ctx: &dyn Context) -> anyhow::Result<Arc<dyn PackageDirectory>> {
        if let Some(path) = &self.fixture {
            let dir = FixtureDirectory::load(path)
                .with_context(|| format!("loading fixture {}", path.display()))?;
            return Ok(Arc::new(dir));
        }
        if !self.adb {
            bail!("one of --fixture or --adb is required");
        }
        let adb = ExecAdb::new(ctx).with_context(|| "setting up adb")?;
        let devices = adb
            .get_connected_devices()
            .with_context(|| "listing adb devices")?;
        log::debug!("connected devices: {:?}", devices);
        Ok(Arc::new(AdbDirectory::new(Arc::new(adb))))
    }
}

pub fn retrieve_flags(ctx: &dyn Context) -> anyhow::Result<RetrieveFlags> {
    let cfg = ctx.get_config()?;
    Ok(RetrieveFlags {
        uninstalled: cfg.cache.retrieve_uninstalled,
    })
}
