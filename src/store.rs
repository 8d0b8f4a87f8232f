//! Append-only cursor store.
//!
//! One file per service under a shared directory. Every cursor advance
//! appends a JSON line; recovery after a restart reads only the last line of
//! the file, found by seeking backwards from the end.

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Last processed position of a service: the latest finalized epoch it has
/// handled and the execution block at that epoch's first slot. Mutated only
/// by the owning service and never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub epoch: u64,
    pub block: u64,
}

#[derive(Debug)]
pub struct LocalStore {
    base_dir: PathBuf,
}

impl LocalStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(format!("{}.cursor", name))
    }

    /// The last persisted cursor for `name`, or `None` for a fresh service.
    pub fn read_cursor(&self, name: &str) -> Result<Option<Cursor>> {
        let line = read_last_line(self.file_path(name))?;
        if line.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&line)?))
    }

    pub fn write_cursor(&self, name: &str, cursor: Cursor) -> Result<()> {
        let line = format!("{}\n", serde_json::to_string(&cursor)?);
        append_to_file(self.file_path(name), &line)
    }
}

pub fn append_to_file(path: impl AsRef<Path>, content: &str) -> Result<()> {
    if let Some(dir) = path.as_ref().parent() {
        fs::create_dir_all(dir)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path.as_ref())?;
    file.write_all(content.as_bytes())?;
    file.flush()?;
    Ok(())
}

/// Reads the last textual line of `path`, creating the file when absent.
///
/// Seeks backwards from EOF one byte at a time until the first `\n` or `\r`
/// that terminates a previous line, so a missing trailing newline still
/// yields the final line. An empty file yields an empty string.
pub fn read_last_line(path: impl AsRef<Path>) -> Result<String> {
    if let Some(dir) = path.as_ref().parent() {
        fs::create_dir_all(dir)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .read(true)
        .open(path.as_ref())?;
    let size = file.metadata()?.len() as i64;
    if size == 0 {
        return Ok(String::new());
    }

    let mut line_bytes = Vec::new();
    let mut cursor: i64 = 0;
    loop {
        cursor -= 1;
        file.seek(SeekFrom::End(cursor))?;
        let mut byte = [0u8; 1];
        file.read_exact(&mut byte)?;
        if byte[0] == b'\n' || byte[0] == b'\r' {
            // the terminator of the line we want, or of the one before it.
            if cursor != -1 {
                break;
            }
        } else {
            line_bytes.push(byte[0]);
        }
        if cursor == -size {
            break;
        }
    }
    line_bytes.reverse();
    Ok(String::from_utf8_lossy(&line_bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_line_of_newline_terminated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "alpha\nbeta\n").unwrap();
        assert_eq!(read_last_line(&path).unwrap(), "beta");
    }

    #[test]
    fn last_line_of_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.log");
        fs::write(&path, "").unwrap();
        assert_eq!(read_last_line(&path).unwrap(), "");
    }

    #[test]
    fn last_line_without_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.log");
        fs::write(&path, "alpha\nbeta").unwrap();
        assert_eq!(read_last_line(&path).unwrap(), "beta");
    }

    #[test]
    fn last_line_of_single_line_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.log");
        fs::write(&path, "only").unwrap();
        assert_eq!(read_last_line(&path).unwrap(), "only");
    }

    #[test]
    fn missing_file_is_created_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.log");
        assert_eq!(read_last_line(&path).unwrap(), "");
        assert!(path.exists());
    }

    #[test]
    fn cursor_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = LocalStore::new(dir.path()).unwrap();
            assert_eq!(store.read_cursor("svc").unwrap(), None);
            store
                .write_cursor("svc", Cursor { epoch: 1, block: 100 })
                .unwrap();
            store
                .write_cursor("svc", Cursor { epoch: 2, block: 164 })
                .unwrap();
        }
        let store = LocalStore::new(dir.path()).unwrap();
        assert_eq!(
            store.read_cursor("svc").unwrap(),
            Some(Cursor { epoch: 2, block: 164 })
        );
    }

    #[test]
    fn services_use_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        store
            .write_cursor("one", Cursor { epoch: 1, block: 1 })
            .unwrap();
        store
            .write_cursor("two", Cursor { epoch: 9, block: 9 })
            .unwrap();
        assert_eq!(
            store.read_cursor("one").unwrap(),
            Some(Cursor { epoch: 1, block: 1 })
        );
        assert_eq!(
            store.read_cursor("two").unwrap(),
            Some(Cursor { epoch: 9, block: 9 })
        );
    }
}
