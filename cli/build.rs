use std::{
    env,
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
    process::Command,
};

fn main() {
    println!("cargo:rerun-if-env-changed=APPSTATE_GIT_REVISION");
    if let Err(e) = write_version_files() {
        panic!("Failed to create the version files: {:?}", e);
    }
}

fn out_file(name: &str) -> io::Result<File> {
    let dir = PathBuf::from(env::var("OUT_DIR").map_err(io::Error::other)?);
    File::create(dir.join(name))
}

fn write_version_files() -> io::Result<()> {
    let version = env::var("CARGO_PKG_VERSION").map_err(io::Error::other)?;
    let target = env::var("TARGET").unwrap_or_else(|_| String::from("unknown"));
    let profile = env::var("PROFILE").unwrap_or_else(|_| String::from("unknown"));

    write!(out_file("simple_version_string")?, "\"{}\"", version)?;

    let rev = git_rev().unwrap_or_else(|_| String::from("unknown"));
    write!(
        out_file("version_string")?,
        "r#\"appstate {} ({}, {})\nrev {}\"#",
        version,
        target,
        profile,
        rev.trim(),
    )
}

fn git_rev() -> io::Result<String> {
    if let Ok(rev) = env::var("APPSTATE_GIT_REVISION") {
        return Ok(rev);
    }
    let out = Command::new("git").args(["rev-parse", "HEAD"]).output()?;
    if out.status.success() {
        if let Ok(rev) = String::from_utf8(out.stdout) {
            return Ok(rev);
        }
    }
    rev_from_head_file()
}

/// Resolve `.git/HEAD` by hand for checkouts without a `git` binary around
fn rev_from_head_file() -> io::Result<String> {
    let manifest = env::var("CARGO_MANIFEST_DIR").map_err(io::Error::other)?;
    let git_dir = Path::new(&manifest)
        .parent()
        .unwrap_or(Path::new(&manifest))
        .join(".git");
    let head = fs::read_to_string(git_dir.join("HEAD"))?;
    match head.trim().strip_prefix("ref: ") {
        Some(reference) => fs::read_to_string(git_dir.join(reference)),
        None => Ok(head),
    }
}
