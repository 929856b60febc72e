use std::fs;
use std::io::Write;
use std::path::PathBuf;

use tracing::warn;

use crate::{check_segment, StoreError};

/// Per-id append-only text logs under `<state>/logs/<id>.log`.
///
/// Appends are best effort: a failed write is reported via `tracing` and
/// swallowed, since invocation logging must never fail the invocation.
#[derive(Clone)]
pub struct LogStore {
    dir: PathBuf,
}

impl LogStore {
    pub fn open(state_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = state_dir.into().join("logs");
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, StoreError> {
        // Log ids are single path segments, never nested.
        if id.contains('/') {
            return Err(StoreError::InvalidKey {
                key: id.to_string(),
                reason: "log id must be a single segment",
            });
        }
        check_segment(id, id)?;
        Ok(self.dir.join(format!("{id}.log")))
    }

    /// Append one line, prefixed with an RFC3339 timestamp. Returns the
    /// formatted line (also when the write itself failed).
    pub fn append(&self, id: &str, message: &str) -> String {
        let line = format!("{} - {message}\n", chrono::Utc::now().to_rfc3339());
        let result = self.path_for(id).and_then(|path| {
            let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
            file.write_all(line.as_bytes())?;
            Ok(())
        });
        if let Err(err) = result {
            warn!(id, error = %err, "log append failed");
        }
        line
    }

    /// All non-empty lines for `id`; absent or unreadable logs read as empty.
    pub fn read(&self, id: &str) -> Vec<String> {
        let path = match self.path_for(id) {
            Ok(p) => p,
            Err(err) => {
                warn!(id, error = %err, "rejected log id");
                return Vec::new();
            }
        };
        match fs::read_to_string(&path) {
            Ok(data) => data
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(String::from)
                .collect(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                warn!(id, error = %err, "log read failed");
                Vec::new()
            }
        }
    }
}
