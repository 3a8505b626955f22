use percent_encoding::percent_decode_str;
use std::path::{Component, Path, PathBuf};

use crate::error::ServerError;

/// Maps a percent-encoded request path onto the filesystem below `root`.
pub fn resolve(root: &Path, url_path: &str) -> Result<PathBuf, ServerError> {
    let decoded = percent_decode_str(url_path).decode_utf8_lossy();
    join_within(root, &decoded)
}

/// Joins `rel` onto `base` lexically. Leading separators and `.` are dropped,
/// `..` pops one component and may not climb above `base`.
pub fn join_within(base: &Path, rel: &str) -> Result<PathBuf, ServerError> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();

    for component in Path::new(rel).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(ServerError::OutsideRoot(rel.to_string()));
                }
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    let mut full = base.to_path_buf();
    full.extend(parts);
    Ok(full)
}

/// Last path component, as shown to clients.
pub fn basename(path: &Path) -> String {
    match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => "/".to_string(),
    }
}
