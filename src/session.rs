//! Append-only CSV logging of one ingestion run.

use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    error::Error,
    telemetry::{Record, Schema},
};

/// How many name collisions within one second are tolerated before giving up.
const MAX_NAME_SUFFIX: usize = 100;

/// The file name a session started at `at` gets.
pub fn session_file_name(at: DateTime<Utc>) -> String {
    at.format("telemetry_%Y%m%d_%H%M%S.csv").to_string()
}

/// One session's log file.
///
/// Every row is flushed and synced as soon as it is written.
#[derive(Debug)]
pub struct SessionLog {
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
    last_header: Option<Schema>,
}

impl SessionLog {
    /// Create a new session file in `dir`, named after the current UTC time.
    /// The directory is created if missing.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, Error> {
        Self::open_at(dir, Utc::now())
    }

    /// Like [`SessionLog::open`], but named after the given time.
    ///
    /// An existing file is never overwritten:
    /// if the name is taken, a numeric suffix is added.
    pub fn open_at<P: AsRef<Path>>(dir: P, at: DateTime<Utc>) -> Result<Self, Error> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let name = session_file_name(at);
        let stem = name.trim_end_matches(".csv");

        for attempt in 0..MAX_NAME_SUFFIX {
            let path = if attempt == 0 {
                dir.join(&name)
            } else {
                dir.join(format!("{stem}_{attempt}.csv"))
            };

            match OpenOptions::new().append(true).create_new(true).open(&path) {
                Ok(file) => {
                    info!("Recording session to {}", path.display());

                    let writer = csv::WriterBuilder::new()
                        .flexible(true)
                        .from_writer(file);

                    return Ok(Self {
                        path,
                        writer: Some(writer),
                        last_header: None,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!(?path, "Session file name taken");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("Too many sessions named {name} in {dir:?}"),
        )
        .into())
    }

    /// Where this session is recorded.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether rows can still be written.
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Append one row and push it to stable storage.
    pub fn write_row<I, S>(&mut self, fields: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let writer = self.writer.as_mut().ok_or_else(|| {
            Error::SessionLog(io::Error::new(
                io::ErrorKind::NotConnected,
                "Session log is closed",
            ))
        })?;

        writer.write_record(fields)?;
        writer.flush()?;
        writer.get_ref().sync_data()?;

        Ok(())
    }

    /// Write `schema` as a header row, unless it is the header written last.
    ///
    /// Returns whether a row was written.
    pub fn write_header(&mut self, schema: &Schema) -> Result<bool, Error> {
        if self.last_header.as_ref() == Some(schema) {
            return Ok(false);
        }

        self.write_row(schema.columns())?;
        self.last_header = Some(schema.clone());

        Ok(true)
    }

    /// Write the values of a record as a row.
    pub fn write_record(&mut self, record: &Record) -> Result<(), Error> {
        self.write_row(record.values())
    }

    /// Flush and close the file.
    /// Safe to call any number of times.
    pub fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            match writer.flush() {
                Ok(()) => debug!(path = ?self.path, "Session closed"),
                Err(e) => warn!(path = ?self.path, "Flush on close failed: {e}"),
            }
        }
    }
}

impl Drop for SessionLog {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    fn read_rows(path: &Path) -> Vec<Vec<String>> {
        csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .unwrap()
            .records()
            .map(|row| row.unwrap().iter().map(str::to_owned).collect())
            .collect()
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    #[test]
    fn file_name_format() {
        assert_eq!(session_file_name(at()), "telemetry_20240309_140507.csv");
    }

    #[test]
    fn directory_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("sessions");

        let log = SessionLog::open_at(&dir, at()).unwrap();

        assert!(dir.is_dir());
        assert_eq!(log.path(), dir.join("telemetry_20240309_140507.csv"));
    }

    #[test]
    fn existing_session_is_not_overwritten() {
        let tmp = tempfile::tempdir().unwrap();

        let mut first = SessionLog::open_at(tmp.path(), at()).unwrap();
        first.write_row(["kept"]).unwrap();

        let second = SessionLog::open_at(tmp.path(), at()).unwrap();

        assert_ne!(first.path(), second.path());
        assert!(second
            .path()
            .ends_with("telemetry_20240309_140507_1.csv"));
        assert_eq!(read_rows(first.path()), vec![vec!["kept".to_owned()]]);
    }

    #[test]
    fn rows_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = SessionLog::open_at(tmp.path(), at()).unwrap();

        let schema = Schema::new(["ts_ms", "rpm", "status"]).unwrap();
        let lines = ["100,8000,OK", "200,9000", "300,9500,OK,extra"];

        let records = lines
            .iter()
            .map(|line| schema.reconcile(line.split(',').map(str::to_owned).collect()))
            .collect::<Vec<_>>();

        for record in &records {
            log.write_record(record).unwrap();
        }

        let rows = read_rows(log.path());

        assert_eq!(rows.len(), records.len());
        for (row, record) in rows.iter().zip(&records) {
            assert_eq!(row, record.values());
        }
    }

    #[test]
    fn header_written_once_per_change() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = SessionLog::open_at(tmp.path(), at()).unwrap();

        let default = Schema::default();
        let short = Schema::new(["ts_ms", "rpm"]).unwrap();

        assert!(log.write_header(&default).unwrap());
        assert!(!log.write_header(&Schema::default()).unwrap());
        assert!(log.write_header(&short).unwrap());
        assert!(log.write_header(&default).unwrap());

        let rows = read_rows(log.path());
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], vec!["ts_ms".to_owned(), "rpm".to_owned()]);
        assert_eq!(rows[2].len(), 16);
    }

    #[test]
    fn values_with_commas_are_quoted() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = SessionLog::open_at(tmp.path(), at()).unwrap();

        log.write_row(["a,b", "c"]).unwrap();

        assert_eq!(
            read_rows(log.path()),
            vec![vec!["a,b".to_owned(), "c".to_owned()]]
        );
    }

    #[test]
    fn close_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = SessionLog::open_at(tmp.path(), at()).unwrap();

        log.close();
        log.close();

        assert!(!log.is_open());
        assert!(matches!(
            log.write_row(["late"]),
            Err(Error::SessionLog(_))
        ));
    }
}
