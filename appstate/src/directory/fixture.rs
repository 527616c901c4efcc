use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::Deserialize;

use super::{
    AppFlags, ApplicationRecord, EnabledSetting, Icon, InstallLocation, PackageDirectory,
    PackageStats, RetrieveFlags, StatsCallback,
};
use crate::utils::read_file;

/// A [PackageDirectory] serving packages described in a TOML file:
///
/// ```toml
/// [[package]]
/// name = "com.example.notes"
/// label = "Notes"
/// uid = 10123
/// flags = ["updated-system"]
/// install-location = "auto"
/// icon = "notes.png"
/// code-size = 2048
/// data-size = 4096
/// cache-size = 1024
/// ```
pub struct FixtureDirectory {
    path: Option<PathBuf>,
    contents: RwLock<Contents>,
}

#[derive(Default)]
struct Contents {
    records: Vec<ApplicationRecord>,
    icons: HashMap<String, Icon>,
    stats: HashMap<String, PackageStats>,
}

#[derive(Deserialize)]
struct FixtureFile {
    #[serde(default)]
    package: Vec<FixturePackage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct FixturePackage {
    name: String,
    #[serde(default)]
    label: String,
    #[serde(default)]
    uid: u32,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    enabled_setting: EnabledSetting,
    #[serde(default)]
    install_location: InstallLocation,
    #[serde(default)]
    source_dir: String,
    #[serde(default = "default_true")]
    installed: bool,
    icon: Option<String>,
    #[serde(default)]
    stats_unavailable: bool,
    #[serde(default)]
    code_size: i64,
    #[serde(default)]
    data_size: i64,
    #[serde(default)]
    cache_size: i64,
    #[serde(default)]
    external_code_size: i64,
    #[serde(default)]
    external_data_size: i64,
    #[serde(default)]
    external_cache_size: i64,
    #[serde(default)]
    external_media_size: i64,
    #[serde(default)]
    external_obb_size: i64,
}

fn default_true() -> bool {
    true
}

impl FixtureDirectory {
    /// Load the fixture at `path`
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = read_file(path)?;
        let contents = parse_contents(path, &content)?;
        Ok(Self {
            path: Some(PathBuf::from(path)),
            contents: RwLock::new(contents),
        })
    }

    /// Parse fixture content that didn't come from a file
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let contents = parse_contents(Path::new("<inline>"), content)?;
        Ok(Self {
            path: None,
            contents: RwLock::new(contents),
        })
    }

    /// Re-read the fixture file, picking up installs and removals
    pub fn reload(&self) -> crate::Result<()> {
        let path = match &self.path {
            Some(p) => p,
            None => return Ok(()),
        };
        let content = read_file(path)?;
        let contents = parse_contents(path, &content)?;
        *self.contents.write().expect("poisoned") = contents;
        Ok(())
    }
}

fn parse_contents(path: &Path, content: &str) -> crate::Result<Contents> {
    let file: FixtureFile =
        toml::from_str(content).map_err(|e| crate::Error::new_fixture(path, &e))?;

    let mut contents = Contents::default();
    for pkg in file.package {
        let mut flags = AppFlags::empty();
        for name in &pkg.flags {
            let flag = AppFlags::from_name(name).ok_or_else(|| {
                crate::Error::new_fixture(path, &format!("unknown flag {} for {}", name, pkg.name))
            })?;
            flags.insert(flag);
        }
        if pkg.installed {
            flags.insert(AppFlags::INSTALLED);
        }

        if let Some(icon) = &pkg.icon {
            contents
                .icons
                .insert(pkg.name.clone(), Icon::new(icon.as_bytes().to_vec()));
        }

        if !pkg.stats_unavailable {
            contents.stats.insert(
                pkg.name.clone(),
                PackageStats {
                    package_name: pkg.name.clone(),
                    code_size: pkg.code_size,
                    data_size: pkg.data_size,
                    cache_size: pkg.cache_size,
                    external_code_size: pkg.external_code_size,
                    external_data_size: pkg.external_data_size,
                    external_cache_size: pkg.external_cache_size,
                    external_media_size: pkg.external_media_size,
                    external_obb_size: pkg.external_obb_size,
                },
            );
        }

        contents.records.push(ApplicationRecord {
            package_name: pkg.name,
            uid: pkg.uid,
            flags,
            enabled: pkg.enabled,
            enabled_setting: pkg.enabled_setting,
            install_location: pkg.install_location,
            source_dir: pkg.source_dir,
            label: pkg.label,
        });
    }
    Ok(contents)
}

impl PackageDirectory for FixtureDirectory {
    fn list_installed_applications(
        &self,
        flags: RetrieveFlags,
    ) -> crate::Result<Vec<ApplicationRecord>> {
        let guard = self.contents.read().expect("poisoned");
        Ok(guard
            .records
            .iter()
            .filter(|it| flags.uninstalled || it.flags.contains(AppFlags::INSTALLED))
            .cloned()
            .collect())
    }

    fn get_application_record(
        &self,
        package_name: &str,
        flags: RetrieveFlags,
    ) -> crate::Result<ApplicationRecord> {
        let guard = self.contents.read().expect("poisoned");
        guard
            .records
            .iter()
            .find(|it| {
                it.package_name == package_name
                    && (flags.uninstalled || it.flags.contains(AppFlags::INSTALLED))
            })
            .cloned()
            .ok_or_else(|| crate::Error::PackageNotFound(package_name.into()))
    }

    fn load_icon(&self, record: &ApplicationRecord) -> crate::Result<Icon> {
        let guard = self.contents.read().expect("poisoned");
        guard
            .icons
            .get(&record.package_name)
            .cloned()
            .ok_or_else(|| crate::Error::NoIcon(record.package_name.clone()))
    }

    fn query_storage_stats(&self, package_name: &str, on_complete: StatsCallback) {
        let res = {
            let guard = self.contents.read().expect("poisoned");
            guard
                .stats
                .get(package_name)
                .cloned()
                .ok_or_else(|| crate::Error::StatsUnavailable(package_name.into()))
        };
        on_complete(res);
    }

    fn refresh(&self) -> crate::Result<()> {
        self.reload()
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::sync::mpsc;

    use super::*;

    const FIXTURE: &str = r#"
[[package]]
name = "com.example.notes"
label = "Notes"
uid = 10123
flags = ["updated-system", "system"]
install-location = "auto"
icon = "notes.png"
code-size = 2048
data-size = 4096
cache-size = 1024

[[package]]
name = "com.example.gone"
installed = false
enabled = false
enabled-setting = "disabled-user"
stats-unavailable = true
"#;

    #[test]
    fn test_parse_fixture() {
        let dir = FixtureDirectory::from_str(FIXTURE).expect("parse");
        let all = dir
            .list_installed_applications(RetrieveFlags { uninstalled: true })
            .expect("list");
        assert_eq!(all.len(), 2);
        let notes = &all[0];
        assert_eq!(notes.label, "Notes");
        assert!(notes.flags.contains(AppFlags::SYSTEM | AppFlags::UPDATED_SYSTEM_APP));
        assert_eq!(notes.install_location, InstallLocation::Auto);
        assert_eq!(all[1].enabled_setting, EnabledSetting::DisabledUser);

        let installed = dir
            .list_installed_applications(RetrieveFlags { uninstalled: false })
            .expect("list");
        assert_eq!(installed.len(), 1);

        assert!(matches!(
            dir.get_application_record("com.example.gone", RetrieveFlags { uninstalled: false }),
            Err(crate::Error::PackageNotFound(_))
        ));
        assert_eq!(dir.load_label(&all[1]), "com.example.gone");
        assert!(dir.load_icon(notes).is_ok());
        assert!(matches!(dir.load_icon(&all[1]), Err(crate::Error::NoIcon(_))));
    }

    #[test]
    fn test_stats() {
        let dir = FixtureDirectory::from_str(FIXTURE).expect("parse");
        let (tx, rx) = mpsc::channel();
        let t = tx.clone();
        dir.query_storage_stats("com.example.notes", Box::new(move |r| t.send(r).unwrap()));
        dir.query_storage_stats("com.example.gone", Box::new(move |r| tx.send(r).unwrap()));

        let ok = rx.recv().unwrap().expect("stats");
        assert_eq!(ok.total_size(), 7168);
        assert!(matches!(
            rx.recv().unwrap(),
            Err(crate::Error::StatsUnavailable(_))
        ));
    }

    #[test]
    fn test_bad_flag() {
        let res = FixtureDirectory::from_str("[[package]]\nname = \"a\"\nflags = [\"bogus\"]\n");
        assert!(matches!(res, Err(crate::Error::InvalidFixture(_, _))));
    }

    #[test]
    fn test_reload() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("fixture.toml");
        fs::write(&path, "[[package]]\nname = \"a.app\"\n").unwrap();
        let dir = FixtureDirectory::load(&path).expect("load");
        assert_eq!(dir.list_installed_applications(RetrieveFlags::default()).unwrap().len(), 1);

        fs::write(&path, "[[package]]\nname = \"a.app\"\n[[package]]\nname = \"b.app\"\n").unwrap();
        dir.reload().expect("reload");
        assert_eq!(dir.list_installed_applications(RetrieveFlags::default()).unwrap().len(), 2);
    }
}
