//! Subscriber setup and the daily-rotated log file

use chrono::NaiveDate;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::core::config::AppConfig;
use crate::core::{Error, Result};

const CURRENT: &str = "engine.log";
const PREFIX: &str = "engine-";
const SUFFIX: &str = ".log";

/// `log_dir/engine.log`, renamed to `engine-YYYY-MM-DD.log` at rollover.
pub struct RollingLog {
    dir: PathBuf,
    retention_days: u32,
    file: Mutex<File>,
}

impl RollingLog {
    pub fn open(dir: &Path, retention_days: u32) -> Result<Arc<Self>> {
        fs::create_dir_all(dir)?;
        let file = open_append(&dir.join(CURRENT))?;
        Ok(Arc::new(Self {
            dir: dir.to_path_buf(),
            retention_days,
            file: Mutex::new(file),
        }))
    }

    pub fn current_path(&self) -> PathBuf {
        self.dir.join(CURRENT)
    }

    pub fn dated_path(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}{}{}", PREFIX, day.format("%Y-%m-%d"), SUFFIX))
    }

    /// Close the current file under `day`'s name and start a fresh one.
    pub fn rotate(&self, day: NaiveDate) -> Result<PathBuf> {
        let target = self.dated_path(day);
        let mut file = self.file.lock();
        file.flush()?;
        fs::rename(self.current_path(), &target)?;
        *file = open_append(&self.current_path())?;
        Ok(target)
    }

    /// Delete dated files older than the retention window. Returns how many went.
    pub fn purge(&self, today: NaiveDate) -> Result<usize> {
        let oldest = today - chrono::Duration::days(self.retention_days as i64);
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(day) = name.to_str().and_then(day_of) else {
                continue;
            };
            if day < oldest {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn make_writer_handle(self: &Arc<Self>) -> RollingWriter {
        RollingWriter(self.clone())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn day_of(file_name: &str) -> Option<NaiveDate> {
    let stem = file_name.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?;
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}

/// `MakeWriter` over the shared file; survives rotation.
#[derive(Clone)]
pub struct RollingWriter(Arc<RollingLog>);

impl Write for RollingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.file.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.file.lock().flush()
    }
}

impl<'a> MakeWriter<'a> for RollingWriter {
    type Writer = RollingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Install stdout and file layers. `RUST_LOG` wins over the configured level.
pub fn init(app: &AppConfig) -> Result<Arc<RollingLog>> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&app.log_level));
    let log = RollingLog::open(&app.log_dir, app.log_retention_days)?;

    let stdout = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true)
        .with_filter(filter());
    let file = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(log.make_writer_handle())
        .with_filter(filter());

    tracing_subscriber::registry()
        .with(stdout)
        .with(file)
        .try_init()
        .map_err(|e| Error::Config(format!("logging init: {}", e)))?;
    info!(dir = %app.log_dir.display(), "logging to file");
    Ok(log)
}

/// Daily rollover: rotate under yesterday's date, then purge old files.
pub fn roll(log: &RollingLog, yesterday: NaiveDate, today: NaiveDate) {
    match log.rotate(yesterday) {
        Ok(path) => info!(path = %path.display(), "log rotated"),
        Err(e) => warn!("log rotation failed: {}", e),
    }
    match log.purge(today) {
        Ok(0) => {}
        Ok(n) => info!(removed = n, "old logs purged"),
        Err(e) => warn!("log purge failed: {}", e),
    }
}
