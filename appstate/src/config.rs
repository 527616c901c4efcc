use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::time::Duration;

use toml::{Table, Value};

use crate::utils::{path_str, read_file};
use crate::Context;

/// A parsed TOML configuration file
pub struct Config {
    path: PathBuf,
    base: Table,
}

impl Config {
    pub fn parse(source: &Path) -> crate::Result<Self> {
        let content = read_file(source)?;
        let base: Table =
            toml::from_str(&content).map_err(|e| crate::Error::new_cfg(source, &e))?;
        Ok(Self {
            base,
            path: PathBuf::from(source),
        })
    }

    pub fn root(&self) -> ConfigMap<'_> {
        ConfigMap {
            path: &self.path,
            prefix: None,
            table: &self.base,
        }
    }
}

/// Parse `file` and hand its root table to `f`
pub fn parse_config<R, F>(file: &Path, f: F) -> crate::Result<R>
where
    F: FnOnce(&ConfigMap) -> crate::Result<R>,
{
    let cfg = Config::parse(file)?;
    f(&cfg.root())
}

/// One table of a [Config]. Every getter returns `Ok(None)` for an absent
/// key and [crate::Error::InvalidConfig] naming the dotted key path when the
/// value has the wrong type.
pub struct ConfigMap<'c> {
    path: &'c Path,
    prefix: Option<String>,
    table: &'c Table,
}

impl<'c> ConfigMap<'c> {
    fn key_path<'k>(&self, key: &'k str) -> Cow<'k, str> {
        match &self.prefix {
            Some(prefix) => Cow::Owned(format!("{}.{}", prefix, key)),
            None => Cow::Borrowed(key),
        }
    }

    pub fn invalid_key(&self, key: &str, expected: &str) -> crate::Error {
        crate::Error::InvalidConfig(
            path_str(self.path).into(),
            format!(
                "invalid value for key: {} (expected type: {})",
                self.key_path(key),
                expected
            ),
        )
    }

    fn typed<T, F>(&self, key: &str, expected: &str, get: F) -> crate::Result<Option<T>>
    where
        F: FnOnce(&'c Value) -> Option<T>,
    {
        match self.table.get(key) {
            None => Ok(None),
            Some(v) => get(v)
                .map(Some)
                .ok_or_else(|| self.invalid_key(key, expected)),
        }
    }

    pub fn get_int(&self, key: &str) -> crate::Result<Option<i64>> {
        self.typed(key, "int", Value::as_integer)
    }

    /// Same as [ConfigMap::get_int] but zero and negative values are invalid
    pub fn get_positive(&self, key: &str) -> crate::Result<Option<u64>> {
        match self.get_int(key)? {
            Some(v) if v > 0 => Ok(Some(v as u64)),
            Some(_) => Err(self.invalid_key(key, "positive int")),
            None => Ok(None),
        }
    }

    pub fn get_str(&self, key: &str) -> crate::Result<Option<&'c str>> {
        self.typed(key, "string", Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> crate::Result<Option<bool>> {
        self.typed(key, "bool", Value::as_bool)
    }

    pub fn get_map(&self, key: &str) -> crate::Result<Option<ConfigMap<'c>>> {
        let table = match self.typed(key, "table", Value::as_table)? {
            Some(t) => t,
            None => return Ok(None),
        };
        Ok(Some(ConfigMap {
            path: self.path,
            prefix: Some(self.key_path(key).into_owned()),
            table,
        }))
    }
}

/// Tunables for the cache engine.
///
/// ```toml
/// [cache]
/// entries-per-tick = 6
/// icons-per-tick = 2
/// size-retry-secs = 20
/// rebuild-wait-ms = 250
/// retrieve-uninstalled = true
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct CacheConfig {
    /// How many entries the worker materializes before yielding
    pub entries_per_tick: usize,
    /// How many icons the worker loads before yielding
    pub icons_per_tick: usize,
    /// Cool-down before a size query for the same entry is issued again
    pub size_retry: Duration,
    /// How long `rebuild` blocks before falling back to async delivery
    pub rebuild_wait: Duration,
    /// Also list packages that were uninstalled but kept their data
    pub retrieve_uninstalled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entries_per_tick: Self::DEFAULT_ENTRIES_PER_TICK,
            icons_per_tick: Self::DEFAULT_ICONS_PER_TICK,
            size_retry: Duration::from_secs(Self::DEFAULT_SIZE_RETRY_SECS),
            rebuild_wait: Duration::from_millis(Self::DEFAULT_REBUILD_WAIT_MS),
            retrieve_uninstalled: true,
        }
    }
}

impl CacheConfig {
    pub const DEFAULT_ENTRIES_PER_TICK: usize = 6;
    pub const DEFAULT_ICONS_PER_TICK: usize = 2;
    pub const DEFAULT_SIZE_RETRY_SECS: u64 = 20;
    pub const DEFAULT_REBUILD_WAIT_MS: u64 = 250;

    pub fn from_map(map: &ConfigMap) -> crate::Result<Self> {
        let mut cfg = Self::default();
        if let Some(v) = map.get_positive("entries-per-tick")? {
            cfg.entries_per_tick = v as usize;
        }
        if let Some(v) = map.get_positive("icons-per-tick")? {
            cfg.icons_per_tick = v as usize;
        }
        if let Some(v) = map.get_positive("size-retry-secs")? {
            cfg.size_retry = Duration::from_secs(v);
        }
        if let Some(v) = map.get_positive("rebuild-wait-ms")? {
            cfg.rebuild_wait = Duration::from_millis(v);
        }
        if let Some(v) = map.get_bool("retrieve-uninstalled")? {
            cfg.retrieve_uninstalled = v;
        }
        Ok(cfg)
    }
}

/// `[adb]` table, both keys are optional
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AdbConfig {
    pub executable: Option<String>,
    pub serial: Option<String>,
}

impl AdbConfig {
    pub fn from_map(map: &ConfigMap) -> crate::Result<Self> {
        let executable = map.get_str("executable")?.map(String::from);
        let serial = map.get_str("serial")?.map(String::from);
        Ok(Self { executable, serial })
    }

    pub fn get_executable<'a>(&'a self, ctx: &dyn Context) -> crate::Result<Cow<'a, str>> {
        match &self.executable {
            Some(v) => Ok(Cow::Borrowed(v.as_str())),
            None => ctx.get_bin("adb").map(Cow::Owned),
        }
    }

    pub fn get_serial<'a>(&'a self, ctx: &dyn Context) -> crate::Result<Cow<'a, str>> {
        match &self.serial {
            Some(v) => Ok(Cow::Borrowed(v.as_str())),
            None => ctx.get_env("ANDROID_SERIAL").map(Cow::Owned),
        }
    }
}

/// Everything read from `appstate.toml`
#[derive(Clone, Debug, PartialEq)]
pub struct AppStateConfig {
    pub can_adb: bool,
    pub cache: CacheConfig,
    pub adb: AdbConfig,
}

impl Default for AppStateConfig {
    fn default() -> Self {
        Self {
            can_adb: true,
            cache: CacheConfig::default(),
            adb: AdbConfig::default(),
        }
    }
}

impl AppStateConfig {
    pub fn from_config(cfg: &Config) -> crate::Result<Self> {
        let base = cfg.root();
        let can_adb = base.get_bool("can-adb")?.unwrap_or(true);
        let cache = match base.get_map("cache")? {
            Some(m) => CacheConfig::from_map(&m)?,
            None => CacheConfig::default(),
        };
        let adb = match base.get_map("adb")? {
            Some(m) => AdbConfig::from_map(&m)?,
            None => AdbConfig::default(),
        };
        Ok(Self {
            can_adb,
            cache,
            adb,
        })
    }

    /// Load the configuration at `path`, a missing file yields the defaults
    pub fn load(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            log::debug!("no config at {}, using defaults", path_str(path));
            return Ok(Self::default());
        }
        Self::from_config(&Config::parse(path)?)
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::*;
    use rstest::*;
    use tempfile::TempDir;

    #[fixture]
    #[once]
    fn cfg_dir() -> TempDir {
        tempfile::tempdir().expect("create tmp dir")
    }

    fn write_cfg(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let file = dir.path().join(name);
        fs::write(&file, content).expect("failed to write test config");
        file
    }

    #[rstest]
    fn test_config(cfg_dir: &TempDir) {
        let content = r#"
base = 12

[foo]
bar = "baz"
quux = { neato = true }
"#;
        let cfg_file = write_cfg(cfg_dir, "generic.toml", content);
        let f = |cfg: &ConfigMap| -> crate::Result<()> {
            assert_eq!(cfg.get_int("base")?, Some(12));
            let foo = cfg.get_map("foo")?.expect("foo table");
            assert_eq!(foo.get_str("bar")?, Some("baz"));
            assert_eq!(foo.get_str("ohno")?, None);
            let quux = foo.get_map("quux")?.expect("foo.quux table");
            assert_eq!(quux.get_bool("neato")?, Some(true));
            match quux.get_int("neato") {
                Err(crate::Error::InvalidConfig(_, msg)) => {
                    assert!(msg.contains("foo.quux.neato"), "{}", msg)
                }
                other => panic!("expected invalid key, got {:?}", other),
            }
            Ok(())
        };

        parse_config(&cfg_file, f).unwrap();
    }

    #[rstest]
    fn test_cache_config(cfg_dir: &TempDir) {
        let content = r#"
can-adb = false

[cache]
entries-per-tick = 10
rebuild-wait-ms = 500

[adb]
serial = "emulator-5554"
"#;
        let cfg_file = write_cfg(cfg_dir, "appstate.toml", content);
        let cfg = AppStateConfig::load(&cfg_file).expect("load");
        assert!(!cfg.can_adb);
        assert_eq!(cfg.cache.entries_per_tick, 10);
        assert_eq!(cfg.cache.icons_per_tick, CacheConfig::DEFAULT_ICONS_PER_TICK);
        assert_eq!(cfg.cache.rebuild_wait, Duration::from_millis(500));
        assert_eq!(cfg.cache.size_retry, Duration::from_secs(20));
        assert_eq!(cfg.adb.serial.as_deref(), Some("emulator-5554"));
        assert!(cfg.adb.executable.is_none());
    }

    #[rstest]
    fn test_cache_config_rejects_zero(cfg_dir: &TempDir) {
        let cfg_file = write_cfg(cfg_dir, "zero.toml", "[cache]\nicons-per-tick = 0\n");
        match AppStateConfig::load(&cfg_file) {
            Err(crate::Error::InvalidConfig(_, msg)) => {
                assert!(msg.contains("cache.icons-per-tick"), "{}", msg)
            }
            other => panic!("expected invalid config, got {:?}", other),
        }
    }

    #[rstest]
    fn test_cache_config_wrong_type(cfg_dir: &TempDir) {
        let cfg_file = write_cfg(cfg_dir, "type.toml", "[cache]\nsize-retry-secs = \"soon\"\n");
        assert!(matches!(
            AppStateConfig::load(&cfg_file),
            Err(crate::Error::InvalidConfig(_, _))
        ));
    }

    #[rstest]
    fn test_missing_config_is_default(cfg_dir: &TempDir) {
        let cfg = AppStateConfig::load(&cfg_dir.path().join("absent.toml")).expect("load");
        assert_eq!(cfg, AppStateConfig::default());
    }
}
