use std::collections::HashSet;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;

use super::{
    AppFlags, ApplicationRecord, EnabledSetting, Icon, PackageDirectory, PackageStats,
    RetrieveFlags, StatsCallback,
};
use crate::adb::Adb;
use crate::command::quote;

lazy_static! {
    // package:/data/app/~~x==/com.foo-y==/base.apk=com.foo uid:10123
    static ref PATH_LINE: Regex =
        Regex::new(r"^package:(.+)=([^=\s]+)(?:\s+uid:(\d+))?\s*$").unwrap();
}

/// A [PackageDirectory] that asks a device's package manager over adb.
///
/// `pm` doesn't expose labels or icons to the shell user, so labels fall back
/// to the package name and icons are never available. Storage stats only
/// cover the installed APKs.
pub struct AdbDirectory {
    adb: Arc<dyn Adb>,
}

impl AdbDirectory {
    pub fn new(adb: Arc<dyn Adb>) -> Self {
        Self { adb }
    }

    fn list_names(&self, args: &str) -> crate::Result<HashSet<String>> {
        let out = self.adb.shell_stdout(&format!("pm list packages {}", args))?;
        Ok(parse_names(&out))
    }

    fn list_records(&self, flags: RetrieveFlags) -> crate::Result<Vec<ApplicationRecord>> {
        let listing = if flags.uninstalled {
            self.adb.shell_stdout("pm list packages -f -U -u")?
        } else {
            self.adb.shell_stdout("pm list packages -f -U")?
        };
        let system = self.list_names("-s")?;
        let disabled = self.list_names("-d")?;
        let installed = if flags.uninstalled {
            Some(self.list_names("")?)
        } else {
            None
        };

        let mut records = Vec::new();
        for line in listing.lines() {
            let (source_dir, name, uid) = match parse_path_line(line) {
                Some(v) => v,
                None => {
                    if !line.trim().is_empty() {
                        log::debug!("ignoring unexpected pm line: {}", line);
                    }
                    continue;
                }
            };
            let mut rec = ApplicationRecord::new(name);
            rec.source_dir = source_dir;
            rec.uid = uid;
            if system.contains(&rec.package_name) {
                rec.flags.insert(AppFlags::SYSTEM);
            }
            if let Some(installed) = &installed {
                if !installed.contains(&rec.package_name) {
                    rec.flags.remove(AppFlags::INSTALLED);
                }
            }
            if disabled.contains(&rec.package_name) {
                rec.enabled = false;
                rec.enabled_setting = EnabledSetting::Disabled;
            }
            records.push(rec);
        }
        Ok(records)
    }
}

fn parse_path_line(line: &str) -> Option<(String, String, u32)> {
    let caps = PATH_LINE.captures(line.trim())?;
    let source_dir = caps.get(1)?.as_str().to_string();
    let name = caps.get(2)?.as_str().to_string();
    let uid = caps
        .get(3)
        .and_then(|it| it.as_str().parse::<u32>().ok())
        .unwrap_or(0);
    Some((source_dir, name, uid))
}

fn parse_names(out: &str) -> HashSet<String> {
    out.lines()
        .filter_map(|l| l.trim().strip_prefix("package:"))
        .map(String::from)
        .collect()
}

fn apk_sizes(adb: &dyn Adb, package_name: &str) -> crate::Result<PackageStats> {
    let paths = adb.shell_stdout(&format!("pm path {}", quote(package_name)))?;
    let apks = paths
        .lines()
        .filter_map(|l| l.trim().strip_prefix("package:"))
        .map(quote)
        .collect::<Vec<String>>();
    if apks.is_empty() {
        return Err(crate::Error::PackageNotFound(package_name.into()));
    }

    let out = adb.shell_stdout(&format!("stat -c %s {}", apks.join(" ")))?;
    let mut code_size = 0i64;
    for line in out.lines() {
        code_size += line
            .trim()
            .parse::<i64>()
            .map_err(|_| crate::Error::StatsUnavailable(package_name.into()))?;
    }

    Ok(PackageStats {
        code_size,
        ..PackageStats::new(package_name)
    })
}

impl PackageDirectory for AdbDirectory {
    fn list_installed_applications(
        &self,
        flags: RetrieveFlags,
    ) -> crate::Result<Vec<ApplicationRecord>> {
        self.list_records(flags)
    }

    fn get_application_record(
        &self,
        package_name: &str,
        flags: RetrieveFlags,
    ) -> crate::Result<ApplicationRecord> {
        self.list_records(flags)?
            .into_iter()
            .find(|it| it.package_name == package_name)
            .ok_or_else(|| crate::Error::PackageNotFound(package_name.into()))
    }

    fn load_icon(&self, record: &ApplicationRecord) -> crate::Result<Icon> {
        Err(crate::Error::NoIcon(record.package_name.clone()))
    }

    fn query_storage_stats(&self, package_name: &str, on_complete: StatsCallback) {
        let adb = Arc::clone(&self.adb);
        let package_name = String::from(package_name);
        std::thread::spawn(move || {
            let res = apk_sizes(adb.as_ref(), &package_name);
            if let Err(e) = &res {
                log::debug!("stats query for {} failed: {}", package_name, e);
            }
            on_complete(res);
        });
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crossbeam::channel::bounded;
    use mockall::predicate::eq;
    use rstest::*;

    use super::*;
    use crate::testing::{cmd_output, mock_adb, MockAdb};

    #[test]
    fn test_parse_path_line() {
        let line = "package:/data/app/~~Ab==/com.foo-Xy==/base.apk=com.foo uid:10123";
        assert_eq!(
            parse_path_line(line),
            Some((
                String::from("/data/app/~~Ab==/com.foo-Xy==/base.apk"),
                String::from("com.foo"),
                10123
            ))
        );
        assert_eq!(
            parse_path_line("package:/system/app/Bar/Bar.apk=com.bar"),
            Some((
                String::from("/system/app/Bar/Bar.apk"),
                String::from("com.bar"),
                0
            ))
        );
        assert_eq!(parse_path_line("garbage"), None);
    }

    fn expect_listing(adb: &mut MockAdb) {
        adb.expect_shell()
            .with(eq("pm list packages -f -U -u"))
            .returning(|_| {
                Ok(cmd_output(
                    0,
                    "package:/system/app/Clock/Clock.apk=com.android.clock uid:10050\n\
                     package:/data/app/~~q==/org.notes-1==/base.apk=org.notes uid:10200\n\
                     package:/data/app/~~r==/org.old-1==/base.apk=org.old uid:10201\n",
                ))
            });
        adb.expect_shell()
            .with(eq("pm list packages -s"))
            .returning(|_| Ok(cmd_output(0, "package:com.android.clock\n")));
        adb.expect_shell()
            .with(eq("pm list packages -d"))
            .returning(|_| Ok(cmd_output(0, "package:org.notes\n")));
        adb.expect_shell()
            .with(eq("pm list packages "))
            .returning(|_| {
                Ok(cmd_output(
                    0,
                    "package:com.android.clock\npackage:org.notes\n",
                ))
            });
    }

    #[rstest]
    fn test_list(mut mock_adb: MockAdb) {
        expect_listing(&mut mock_adb);
        let dir = AdbDirectory::new(Arc::new(mock_adb));
        let records = dir
            .list_installed_applications(RetrieveFlags { uninstalled: true })
            .expect("list");
        assert_eq!(records.len(), 3);

        assert_eq!(records[0].package_name, "com.android.clock");
        assert!(records[0].is_system());
        assert_eq!(records[0].uid, 10050);

        assert!(!records[1].enabled);
        assert!(!records[1].is_visible());

        assert!(!records[2].flags.contains(AppFlags::INSTALLED));
        assert!(records[1].flags.contains(AppFlags::INSTALLED));
    }

    #[rstest]
    fn test_lookup_missing(mut mock_adb: MockAdb) {
        expect_listing(&mut mock_adb);
        let dir = AdbDirectory::new(Arc::new(mock_adb));
        assert!(matches!(
            dir.get_application_record("com.nope", RetrieveFlags::default()),
            Err(crate::Error::PackageNotFound(_))
        ));
    }

    #[rstest]
    fn test_stats(mut mock_adb: MockAdb) {
        mock_adb
            .expect_shell()
            .with(eq("pm path 'org.notes'"))
            .returning(|_| {
                Ok(cmd_output(
                    0,
                    "package:/data/app/n/base.apk\npackage:/data/app/n/split_en.apk\n",
                ))
            });
        mock_adb
            .expect_shell()
            .with(eq("stat -c %s '/data/app/n/base.apk' '/data/app/n/split_en.apk'"))
            .returning(|_| Ok(cmd_output(0, "4096\n1024\n")));

        let dir = AdbDirectory::new(Arc::new(mock_adb));
        let (tx, rx) = bounded(1);
        dir.query_storage_stats(
            "org.notes",
            Box::new(move |res| {
                let _ = tx.send(res);
            }),
        );
        let stats = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("callback")
            .expect("stats");
        assert_eq!(stats.code_size, 5120);
        assert_eq!(stats.total_size(), 5120);
    }

    #[rstest]
    fn test_stats_failure(mut mock_adb: MockAdb) {
        mock_adb
            .expect_shell()
            .returning(|_| Ok(cmd_output(1, "")));
        let dir = AdbDirectory::new(Arc::new(mock_adb));
        let (tx, rx) = bounded(1);
        dir.query_storage_stats(
            "org.gone",
            Box::new(move |res| {
                let _ = tx.send(res);
            }),
        );
        assert!(rx
            .recv_timeout(Duration::from_secs(5))
            .expect("callback")
            .is_err());
    }
}
