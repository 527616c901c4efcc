use std::borrow::Cow;
use std::ffi::OsStr;
use std::io;
use std::process::{Command, ExitStatus, Output};

/// Captured result of an external command such as `adb`
pub struct CmdOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CmdOutput {
    /// `Ok` only if the command exited successfully, otherwise a
    /// [crate::Error::CommandError] carrying stderr, or stdout if stderr was
    /// empty since `adb shell` folds both together on older devices
    pub fn err_on_status(self) -> crate::Result<Self> {
        if self.status.success() {
            return Ok(self);
        }

        // Killed by a signal
        let code = self.status.code().unwrap_or(-1);
        let msg = if self.stderr.is_empty() {
            self.stdout_utf8_lossy()
        } else {
            self.stderr_utf8_lossy()
        };
        Err(crate::Error::CommandError(code, msg.trim().to_string()))
    }

    #[inline]
    pub fn stdout_utf8_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    #[inline]
    pub fn stderr_utf8_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

impl From<Output> for CmdOutput {
    fn from(output: Output) -> Self {
        Self {
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

/// Single quote `s` for the device shell. Package names and APK paths are
/// passed through `adb shell` as one string, so anything interpolated into a
/// command goes through here.
pub fn quote(s: &str) -> String {
    let mut new = String::with_capacity(s.len() + 2);
    new.push('\'');
    for c in s.chars() {
        if c == '\'' {
            new.push_str("'\"'\"'");
        } else {
            new.push(c);
        }
    }
    new.push('\'');
    new
}

pub fn run_cmd<C, S>(cmd: C, args: &[S]) -> io::Result<CmdOutput>
where
    C: AsRef<OsStr>,
    S: AsRef<OsStr>,
{
    if log::log_enabled!(log::Level::Debug) {
        log::debug!("Running command: `{}`", display_cmd(&cmd, args));
    }
    Command::new(cmd)
        .args(args)
        .output()
        .map(CmdOutput::from)
}

fn display_cmd<C, S>(cmd: &C, args: &[S]) -> String
where
    C: AsRef<OsStr>,
    S: AsRef<OsStr>,
{
    let mut line = cmd.as_ref().to_string_lossy().into_owned();
    for arg in args {
        line.push(' ');
        line.push_str(&arg.as_ref().to_string_lossy());
    }
    line
}
