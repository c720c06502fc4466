//! Per-run sinks for the diagnostic output of a chain simulator.
//!
//! A run owns exactly one logger. It is written by a single task while the
//! simulator runs and closed once the simulator has been torn down.

use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

/// Capability to record simulator diagnostics for a single run.
pub trait RunLogger: Send + 'static {
    /// Appends one message as a line. Buffered, never waits on the sink.
    fn log(&mut self, message: &str) -> io::Result<()>;

    /// Flushes and releases the sink. Returns once every line is written.
    fn close(self) -> io::Result<()>;
}

/// Name of the log file for a run that skips `skip_count` blocks.
pub fn log_file_name(skip_count: u64) -> String {
    format!("manual_skips_{skip_count}.log")
}

/// File-backed run log, truncated on open.
#[derive(Debug)]
pub struct FileLogger {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl FileLogger {
    pub fn open(dir: impl AsRef<Path>, skip_count: u64) -> io::Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(log_file_name(skip_count));
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RunLogger for FileLogger {
    fn log(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.writer, "{message}")
    }

    fn close(self) -> io::Result<()> {
        let file = self.writer.into_inner().map_err(|err| err.into_error())?;
        file.sync_all()
    }
}

/// In-memory run log. Clones share the same buffer, so a test can keep one
/// handle and inspect what the simulator wrote after the run is over.
#[derive(Debug, Default, Clone)]
pub struct MemoryLogger(Arc<Mutex<MemoryLog>>);

#[derive(Debug, Default)]
struct MemoryLog {
    lines: Vec<String>,
    closed: bool,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.inner().lines.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner().closed
    }

    fn inner(&self) -> MutexGuard<'_, MemoryLog> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RunLogger for MemoryLogger {
    fn log(&mut self, message: &str) -> io::Result<()> {
        let mut log = self.inner();
        if log.closed {
            return Err(io::Error::other("run log is already closed"));
        }
        log.lines.push(message.to_string());
        Ok(())
    }

    fn close(self) -> io::Result<()> {
        self.inner().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_is_named_after_skip_count() {
        let dir = tempfile::tempdir().unwrap();
        let logger = FileLogger::open(dir.path(), 12).unwrap();

        assert_eq!(logger.path(), dir.path().join("manual_skips_12.log"));
        assert!(logger.path().exists());
        logger.close().unwrap();
    }

    #[test]
    fn close_flushes_every_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = FileLogger::open(dir.path(), 0).unwrap();
        let path = logger.path().to_path_buf();

        logger.log("Listening on 127.0.0.1:8545").unwrap();
        logger.log("evm_mine").unwrap();
        logger.close().unwrap();

        let contents = fs::read_to_string(path).unwrap();
        assert_eq!(contents, "Listening on 127.0.0.1:8545\nevm_mine\n");
    }

    #[test]
    fn reopening_truncates_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = FileLogger::open(dir.path(), 1).unwrap();
        first.log("first run").unwrap();
        first.close().unwrap();

        let mut second = FileLogger::open(dir.path(), 1).unwrap();
        let path = second.path().to_path_buf();
        second.log("second run").unwrap();
        second.close().unwrap();

        assert_eq!(fs::read_to_string(path).unwrap(), "second run\n");
    }

    #[test]
    fn creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("logs").join("nested");

        let logger = FileLogger::open(&nested, 19).unwrap();

        assert!(nested.join("manual_skips_19.log").exists());
        logger.close().unwrap();
    }

    #[test]
    fn open_fails_when_directory_is_not_usable() {
        let dir = tempfile::tempdir().unwrap();
        let not_a_dir = dir.path().join("file");
        fs::write(&not_a_dir, b"").unwrap();

        assert!(FileLogger::open(not_a_dir.join("logs"), 0).is_err());
    }

    #[test]
    fn memory_logger_is_shared_between_clones() {
        let observer = MemoryLogger::new();
        let mut logger = observer.clone();

        logger.log("a").unwrap();
        logger.log("b").unwrap();
        assert!(!observer.is_closed());

        logger.close().unwrap();
        assert_eq!(observer.lines(), vec!["a".to_string(), "b".to_string()]);
        assert!(observer.is_closed());
    }

    #[test]
    fn memory_logger_rejects_writes_after_close() {
        let observer = MemoryLogger::new();
        observer.clone().close().unwrap();

        let mut late = observer.clone();
        assert!(late.log("too late").is_err());
        assert!(observer.lines().is_empty());
    }
}
