//! Small filesystem helpers built on `cap-std` ambient authority.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};

/// Reads a UTF-8 file, opening its parent directory with ambient authority.
///
/// # Errors
///
/// Returns a human-readable message when the directory or file cannot be
/// opened or read.
pub fn read_to_string_ambient(path: &Utf8Path) -> Result<String, String> {
    let (dir_path, file_path) = split(path)?;
    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    dir.read_to_string(file_path).map_err(|err| err.to_string())
}

/// Writes `contents` to a UTF-8 path, replacing any existing file.
///
/// # Errors
///
/// Returns a human-readable message when the parent directory cannot be
/// opened or the file cannot be written.
pub fn write_ambient(path: &Utf8Path, contents: &str) -> Result<(), String> {
    let (dir_path, file_path) = split(path)?;
    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    dir.write(file_path, contents).map_err(|err| err.to_string())
}

/// Removes a file. A file (or directory) that is already gone is not an
/// error.
///
/// # Errors
///
/// Returns a human-readable message for any other failure.
pub fn remove_file_ambient(path: &Utf8Path) -> Result<(), String> {
    let (dir_path, file_path) = split(path)?;
    let removed = Dir::open_ambient_dir(dir_path, ambient_authority())
        .and_then(|dir| dir.remove_file(file_path));
    match removed {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err.to_string()),
        _ => Ok(()),
    }
}

fn split(path: &Utf8Path) -> Result<(&Utf8Path, &Utf8Path), String> {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_str().is_empty() => {
            Ok((parent, Utf8Path::new(name)))
        }
        (_, Some(_)) => Ok((Utf8Path::new("."), path)),
        (_, None) => Err(format!("path has no file name: {path}")),
    }
}

/// Resolves `path` against the working directory without touching the
/// filesystem. Bind mounts need absolute sources; a relative one would be
/// read as a named volume.
///
/// # Errors
///
/// Returns a message when the working directory is unavailable or the
/// result is not valid UTF-8.
pub fn absolute(path: &Utf8Path) -> Result<Utf8PathBuf, String> {
    let resolved = std::path::absolute(path).map_err(|err| err.to_string())?;
    Utf8PathBuf::from_path_buf(resolved)
        .map_err(|raw| format!("path is not valid UTF-8: {}", raw.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    fn reads_files_by_absolute_path() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let dir = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("non-utf8 tempdir: {}", path.display()));
        let file = dir.join("profiles.json");
        std::fs::write(&file, "{}").unwrap_or_else(|err| panic!("write: {err}"));

        assert_eq!(read_to_string_ambient(&file).as_deref(), Ok("{}"));
    }

    #[rstest]
    fn written_files_can_be_removed_twice() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let dir = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("non-utf8 tempdir: {}", path.display()));
        let file = dir.join("profile.conf");

        write_ambient(&file, "client\n").unwrap_or_else(|err| panic!("write: {err}"));
        assert_eq!(read_to_string_ambient(&file).as_deref(), Ok("client\n"));

        assert_eq!(remove_file_ambient(&file), Ok(()));
        assert!(!file.exists());
        assert_eq!(remove_file_ambient(&file), Ok(()));
    }

    #[rstest]
    fn reports_missing_files() {
        let err = read_to_string_ambient(Utf8Path::new("/definitely/not/here.json"))
            .expect_err("missing file should fail");
        assert!(!err.is_empty());
    }

    #[rstest]
    fn absolute_keeps_absolute_paths() {
        assert_eq!(
            absolute(Utf8Path::new("/srv/gluetun")).as_deref(),
            Ok(Utf8Path::new("/srv/gluetun"))
        );
    }

    #[rstest]
    fn absolute_anchors_relative_paths() {
        let resolved = absolute(Utf8Path::new("docker/gluetun"))
            .unwrap_or_else(|err| panic!("absolute: {err}"));
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("docker/gluetun"));
    }
}
