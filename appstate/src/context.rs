use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Mutex;

use blanket::blanket;
use directories::BaseDirs;
use once_cell::sync::OnceCell;
use which::{which, which_in};

use crate::config::AppStateConfig;
use crate::Error;

/// Search `$APPSTATE_PATH` instead of `$PATH` when it is set
fn lookup_bin(bin: &str) -> Option<String> {
    let found = match env::var("APPSTATE_PATH") {
        Ok(search) => {
            let cwd = env::current_dir().ok()?;
            which_in(bin, Some(search), cwd).ok()
        }
        Err(_) => which(bin).ok(),
    };
    found.map(|it| it.to_string_lossy().into_owned())
}

/// Where the cache and its tools find external programs, environment
/// variables and the configuration file.
///
/// Only [Context::get_config] has to be provided, the rest defaults to the
/// process environment.
#[blanket(derive(Ref, Box))]
pub trait Context: Send + Sync {
    fn maybe_get_env(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    fn maybe_get_bin(&self, bin: &str) -> Option<String> {
        lookup_bin(bin)
    }

    fn get_bin(&self, bin: &str) -> crate::Result<String> {
        self.maybe_get_bin(bin)
            .ok_or_else(|| Error::MissingBin(bin.into()))
    }

    fn get_env(&self, key: &str) -> crate::Result<String> {
        self.maybe_get_env(key)
            .ok_or_else(|| Error::MissingEnv(key.into()))
    }

    /// `$APPSTATE_CONFIG` if set, otherwise `appstate/appstate.toml` under
    /// the user's config directory
    fn get_config_file(&self) -> crate::Result<PathBuf> {
        if let Some(path) = self.maybe_get_env("APPSTATE_CONFIG") {
            return Ok(PathBuf::from(path));
        }
        let dirs = BaseDirs::new().ok_or(Error::NoBaseDirs)?;
        Ok(dirs.config_dir().join("appstate").join("appstate.toml"))
    }

    fn get_config(&self) -> crate::Result<&AppStateConfig>;
}

/// A [Context] over the real process environment. Binary lookups and the
/// configuration are resolved once and then cached.
#[derive(Default)]
pub struct DefaultContext {
    bins: Mutex<HashMap<String, String>>,
    config_file: Option<PathBuf>,
    config: OnceCell<AppStateConfig>,
}

impl DefaultContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the configuration from `path` instead of the default location
    pub fn with_config_file(self, path: PathBuf) -> Self {
        Self {
            config_file: Some(path),
            config: OnceCell::new(),
            ..self
        }
    }
}

impl Context for DefaultContext {
    fn get_config(&self) -> crate::Result<&AppStateConfig> {
        self.config.get_or_try_init(|| -> crate::Result<AppStateConfig> {
            let path = match &self.config_file {
                Some(p) => p.clone(),
                None => self.get_config_file()?,
            };
            AppStateConfig::load(&path)
        })
    }

    fn maybe_get_bin(&self, bin: &str) -> Option<String> {
        let mut bins = self.bins.lock().expect("poisoned");
        if let Some(path) = bins.get(bin) {
            return Some(path.clone());
        }
        let found = lookup_bin(bin)?;
        bins.insert(String::from(bin), found.clone());
        Some(found)
    }
}
