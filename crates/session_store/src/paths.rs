use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SessionStoreError;

/// Directory under the user's home that holds all persistent state.
pub const STATE_DIR: &str = ".nebula";

pub const DATABASE_FILE: &str = "memory.db";

#[must_use]
pub fn state_root(home: &Path) -> PathBuf {
    home.join(STATE_DIR)
}

/// Default database location, `~/.nebula/memory.db`.
#[must_use]
pub fn default_database_path(home: &Path) -> PathBuf {
    state_root(home).join(DATABASE_FILE)
}

pub(crate) fn ensure_parent_dir(path: &Path) -> Result<(), SessionStoreError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    fs::create_dir_all(parent)
        .map_err(|source| SessionStoreError::io("creating database directory", parent, source))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_database_lives_under_state_dir() {
        let path = default_database_path(Path::new("/home/dev"));
        assert_eq!(path, PathBuf::from("/home/dev/.nebula/memory.db"));
    }

    #[test]
    fn bare_file_name_needs_no_directory() {
        ensure_parent_dir(Path::new("memory.db")).expect("relative file name is fine");
    }
}
