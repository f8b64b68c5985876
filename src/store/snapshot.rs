//! JSON snapshot persistence for [`MemoryStore`](super::MemoryStore).

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use tracing::debug;

use super::{StoreError, Tables};

/// A snapshot file on disk.
///
/// Saves render the tables as pretty JSON into a sibling temporary file and
/// rename it over the target, so readers never observe a half-written file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SnapshotFile {
    path: Utf8PathBuf,
}

impl SnapshotFile {
    /// Points at `path`; nothing is read until [`Self::load`].
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the snapshot path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Reads the snapshot, returning empty tables when the file is absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the file cannot be read and
    /// [`StoreError::Parse`] when it is not a valid snapshot.
    pub fn load(&self) -> Result<Tables, StoreError> {
        let (parent, file_name) = self.split()?;
        let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Tables::default()),
            Err(err) => return Err(self.io(&err)),
        };

        let contents = match dir.read_to_string(file_name) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Tables::default()),
            Err(err) => return Err(self.io(&err)),
        };

        if contents.trim().is_empty() {
            return Ok(Tables::default());
        }

        let tables: Tables =
            serde_json::from_str(&contents).map_err(|err| StoreError::Parse {
                path: self.path.to_string(),
                message: err.to_string(),
            })?;
        debug!(
            path = %self.path,
            resources = tables.resources.len(),
            managers = tables.managers.len(),
            "loaded store snapshot"
        );
        Ok(tables)
    }

    /// Writes `tables` to the snapshot file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the directory or file cannot be
    /// written.
    pub fn save(&self, tables: &Tables) -> Result<(), StoreError> {
        let (parent, file_name) = self.split()?;
        Dir::create_ambient_dir_all(parent, ambient_authority()).map_err(|err| self.io(&err))?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| self.io(&err))?;

        let rendered = serde_json::to_string_pretty(tables).map_err(|err| StoreError::Parse {
            path: self.path.to_string(),
            message: err.to_string(),
        })?;

        let staging = format!(".{file_name}.tmp");
        dir.write(&staging, rendered).map_err(|err| self.io(&err))?;
        dir.rename(&staging, &dir, file_name)
            .map_err(|err| self.io(&err))?;
        debug!(path = %self.path, "saved store snapshot");
        Ok(())
    }

    fn split(&self) -> Result<(&Utf8Path, &str), StoreError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };
        let file_name = self.path.file_name().ok_or_else(|| StoreError::Io {
            path: self.path.to_string(),
            message: String::from("snapshot path is missing a filename"),
        })?;
        Ok((parent, file_name))
    }

    fn io(&self, err: &io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.to_string(),
            message: err.to_string(),
        }
    }
}
