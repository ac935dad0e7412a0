//! On-disk snapshot store, so a restart within the TTL window skips the
//! slow utilities.
//!
//! One JSON file per probe: `{ "schema": 1, "computed_at": ..., "value": ... }`.
//! Records with another schema tag are ignored.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::errors::PersistError;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<T> {
    pub schema: u32,
    pub computed_at: DateTime<Utc>,
    pub value: T,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, probe: &str) -> PathBuf {
        self.dir.join(format!("{probe}.json"))
    }

    /// Read the record for `probe`. A missing file is `Ok(None)`.
    pub fn load<T: DeserializeOwned>(&self, probe: &str) -> Result<Option<Record<T>>, PersistError> {
        let path = self.path(probe);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(PersistError::Io { path, source }),
        };

        // Check the tag before decoding the payload, whose shape may differ.
        #[derive(Deserialize)]
        struct Tag {
            schema: u32,
        }
        let tag: Tag = serde_json::from_str(&content).map_err(|source| PersistError::Decode {
            path: path.clone(),
            source,
        })?;
        if tag.schema != SCHEMA_VERSION {
            return Err(PersistError::Schema {
                path,
                found: tag.schema,
                expected: SCHEMA_VERSION,
            });
        }

        let record = serde_json::from_str(&content)
            .map_err(|source| PersistError::Decode { path, source })?;
        Ok(Some(record))
    }

    /// Write the record for `probe`, replacing any previous one.
    pub fn save<T: Serialize>(
        &self,
        probe: &str,
        computed_at: DateTime<Utc>,
        value: &T,
    ) -> Result<(), PersistError> {
        let path = self.path(probe);
        let io_err = |source| PersistError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(io_err)?;

        let record = Record {
            schema: SCHEMA_VERSION,
            computed_at,
            value,
        };
        let content = serde_json::to_string_pretty(&record).map_err(|source| PersistError::Encode {
            path: path.clone(),
            source,
        })?;

        // Write then rename so a crash never leaves a torn record.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(io_err)?;
        fs::rename(&tmp, &path).map_err(io_err)?;
        debug!(path = %path.display(), "saved snapshot");
        Ok(())
    }
}
