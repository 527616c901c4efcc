use std::io;

use crate::command::{run_cmd, CmdOutput};
use crate::config::AdbConfig;
use crate::Context;

/// The few `adb` operations [crate::directory::AdbDirectory] needs to read a
/// device's package manager
pub trait Adb: Send + Sync {
    fn get_connected_devices(&self) -> crate::Result<Vec<String>>;

    /// Same as running `adb shell '...'`
    fn shell(&self, shell_cmd: &str) -> io::Result<CmdOutput>;

    /// Run a shell command and return its stdout if it exited successfully
    fn shell_stdout(&self, shell_cmd: &str) -> crate::Result<String> {
        let out = self.shell(shell_cmd)?.err_on_status()?;
        Ok(out.stdout_utf8_lossy().into_owned())
    }
}

/// An [Adb] that invokes the external `adb` binary
#[derive(Clone, Debug)]
pub struct ExecAdb {
    bin: String,
    serial: Option<String>,
}

impl ExecAdb {
    /// Set up `adb` from the context's configuration.
    ///
    /// ```toml
    /// can-adb = true
    ///
    /// [adb]
    /// executable = "/opt/android/platform-tools/adb"
    /// serial = "emulator-5554"
    /// ```
    ///
    /// Missing keys fall back to `adb` on the path and `ANDROID_SERIAL`.
    /// Fails with [crate::Error::AdbDisabled] if `can-adb` is false.
    pub fn new(ctx: &dyn Context) -> crate::Result<Self> {
        let cfg = ctx.get_config()?;
        if !cfg.can_adb {
            return Err(crate::Error::AdbDisabled);
        }
        Self::from_config(ctx, &cfg.adb)
    }

    pub fn from_config(ctx: &dyn Context, cfg: &AdbConfig) -> crate::Result<Self> {
        let bin = cfg.get_executable(ctx)?.into_owned();
        let serial = cfg.get_serial(ctx).map(|it| it.into_owned()).ok();
        log::debug!("using adb {} (serial {:?})", bin, serial);
        Ok(Self { bin, serial })
    }

    fn run(&self, args: &[&str]) -> io::Result<CmdOutput> {
        match &self.serial {
            Some(serial) => {
                let mut full = vec!["-s", serial.as_str()];
                full.extend_from_slice(args);
                run_cmd(&self.bin, full.as_slice())
            }
            None => run_cmd(&self.bin, args),
        }
    }
}

impl Adb for ExecAdb {
    /// Serials of every device in the `device` state. If a serial is
    /// configured it must be among them.
    fn get_connected_devices(&self) -> crate::Result<Vec<String>> {
        let output = run_cmd(&self.bin, &["devices", "-l"])?.err_on_status()?;
        let devices = parse_devices(&output.stdout_utf8_lossy());

        if devices.is_empty() {
            return Err(crate::Error::NoAdbDevice);
        }
        if let Some(serial) = &self.serial {
            if !devices.iter().any(|it| it == serial) {
                return Err(crate::Error::AdbDeviceNotFound(serial.clone()));
            }
        }
        Ok(devices)
    }

    fn shell(&self, shell_cmd: &str) -> io::Result<CmdOutput> {
        self.run(&["shell", shell_cmd])
    }
}

fn parse_devices(out: &str) -> Vec<String> {
    // First line is the "List of devices attached" header
    out.lines()
        .skip(1)
        .filter_map(|l| {
            let mut parts = l.split_ascii_whitespace();
            let serial = parts.next()?;
            (parts.next()? == "device").then(|| String::from(serial))
        })
        .collect()
}
