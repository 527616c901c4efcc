use std::borrow::Cow;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// The path as a string for error messages, non UTF-8 parts replaced
pub fn path_str(path: &Path) -> Cow<'_, str> {
    path.to_string_lossy()
}

pub fn read_file(path: &Path) -> crate::Result<String> {
    match fs::read_to_string(path) {
        Ok(v) => Ok(v),
        Err(e) => match e.kind() {
            ErrorKind::NotFound => Err(crate::Error::MissingFile(path_str(path).into())),
            _ => Err(e.into()),
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_read_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope.toml");
        match read_file(&missing) {
            Err(crate::Error::MissingFile(p)) => assert!(p.ends_with("nope.toml")),
            other => panic!("unexpected result {:?}", other),
        }
    }
}
