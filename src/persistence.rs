use crate::error::Result;
use crate::ping_log::PingLog;
use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const STATE_FILE_NAME: &str = "state.json";

/// Whole-file snapshot of a [`PingLog`] on disk.
#[derive(Clone, Debug)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(STATE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hydrate `log` from the file. `Ok(false)` when there is no file yet.
    pub fn load(&self, log: &PingLog) -> Result<bool> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        log.deserialize(BufReader::new(file))?;
        Ok(true)
    }

    /// Replace the file with the current contents of `log`.
    ///
    /// The document goes to a temporary file in the same directory first and
    /// is renamed into place, so a crash mid-write keeps the previous state.
    pub fn store(&self, log: &PingLog) -> Result<()> {
        let mut json = Vec::new();
        log.serialize(&mut json)?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let tmp_path = dir.join(format!(".{}.{}.tmp", STATE_FILE_NAME, Uuid::new_v4()));

        let written = File::create(&tmp_path).and_then(|mut f| {
            f.write_all(&json)?;
            f.sync_all()
        });
        if let Err(e) = written.and_then(|()| fs::rename(&tmp_path, &self.path)) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use chrono::{TimeZone, Utc};

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pingwatch-state-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = scratch_dir();
        let log = PingLog::new(10);
        assert!(!StateFile::in_dir(&dir).load(&log).unwrap());
        assert!(log.is_empty());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn store_then_load() {
        let dir = scratch_dir();
        let state = StateFile::in_dir(&dir);

        let log = PingLog::new(10);
        log.record(
            "10.0.0.1".parse().unwrap(),
            Utc.timestamp_opt(1_700_000_000, 42).unwrap(),
        );
        state.store(&log).unwrap();
        // second store overwrites in place
        state.store(&log).unwrap();

        let restored = PingLog::new(10);
        assert!(state.load(&restored).unwrap());
        assert_eq!(restored.snapshot(), log.snapshot());

        let leftovers: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from(STATE_FILE_NAME)]);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn corrupt_file_fails_and_keeps_log() {
        let dir = scratch_dir();
        let state = StateFile::in_dir(&dir);
        fs::write(state.path(), b"{\"pings\": [").unwrap();

        let log = PingLog::new(10);
        log.record(
            "10.0.0.7".parse().unwrap(),
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        );
        let before = log.snapshot();

        assert!(matches!(state.load(&log), Err(Error::Json(_))));
        assert_eq!(log.snapshot(), before);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn unwritable_location_reports_error() {
        let dir = scratch_dir();
        let state = StateFile::in_dir(dir.join("missing"));
        assert!(matches!(state.store(&PingLog::new(1)), Err(Error::Io(_))));
        fs::remove_dir_all(dir).unwrap();
    }
}
