//! Console (stderr) plus daily-rotated file logging. Rotated files are
//! gzip-compressed and only the newest `max_log_files` archives are kept.

use anyhow::Result;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;

use crate::config::LogConfig;

pub const LOG_FILE_NAME: &str = "lake_lineage.log";

/// Keeps the file writer flushing until dropped.
pub struct LoggingHandle {
    _guard: WorkerGuard,
    state: Arc<Mutex<WriterState>>,
}

impl LoggingHandle {
    /// Checks for a date change once a minute so long batches still rotate
    /// at midnight when nothing is being logged.
    pub fn start_maintenance(&self) {
        let state = Arc::clone(&self.state);
        std::thread::spawn(move || loop {
            std::thread::sleep(Duration::from_secs(60));
            let mut state = match state.lock() {
                Ok(guard) => guard,
                Err(_) => {
                    tracing::warn!("Log writer state poisoned");
                    continue;
                }
            };
            if let Err(e) = state.ensure_current() {
                tracing::warn!("Failed to rotate active log file: {}", e);
            }
        });
    }
}

pub fn init_logging(config: &LogConfig) -> Result<LoggingHandle> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    fs::create_dir_all(&config.log_dir)?;

    let (file_writer, state) = SharedLogWriter::new(&config.log_dir, config.max_log_files)?;
    cleanup_old_logs(&config.log_dir, config.max_log_files)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_writer);

    let log_level = config
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(LoggingHandle {
        _guard: guard,
        state,
    })
}

/// Console-only logging for the short interactive commands.
pub fn init_stderr_logging(config: &LogConfig) {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

struct SharedLogWriter {
    state: Arc<Mutex<WriterState>>,
}

impl SharedLogWriter {
    fn new(log_dir: &str, max_files: usize) -> Result<(Self, Arc<Mutex<WriterState>>)> {
        let state = WriterState::new(log_dir, max_files)?;
        let arc = Arc::new(Mutex::new(state));
        Ok((Self { state: arc.clone() }, arc))
    }
}

impl Write for SharedLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::other("log writer poisoned"))?;
        state.ensure_current().map_err(io::Error::other)?;
        state.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::other("log writer poisoned"))?;
        state.file.flush()
    }
}

struct WriterState {
    log_dir: PathBuf,
    active_path: PathBuf,
    file: File,
    current_date: chrono::NaiveDate,
    max_files: usize,
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn archive_name(date: chrono::NaiveDate) -> String {
    format!("{LOG_FILE_NAME}.{}", date.format("%Y-%m-%d"))
}

impl WriterState {
    fn new(log_dir: &str, max_files: usize) -> Result<Self> {
        fs::create_dir_all(log_dir)?;
        let log_dir = PathBuf::from(log_dir);
        let active_path = log_dir.join(LOG_FILE_NAME);
        let file = open_append(&active_path)?;
        let mut state = Self {
            log_dir,
            active_path,
            file,
            current_date: chrono::Local::now().date_naive(),
            max_files,
        };
        state.initialize_existing_file()?;
        Ok(state)
    }

    /// A non-empty active file left by an earlier day is archived first.
    fn initialize_existing_file(&mut self) -> Result<()> {
        let metadata = fs::metadata(&self.active_path)?;
        if metadata.len() == 0 {
            return Ok(());
        }
        if let Ok(modified) = metadata.modified() {
            self.current_date = chrono::DateTime::<chrono::Local>::from(modified).date_naive();
        }
        let today = chrono::Local::now().date_naive();
        if self.current_date < today {
            self.rotate_to(today)?;
        }
        Ok(())
    }

    fn ensure_current(&mut self) -> Result<()> {
        let today = chrono::Local::now().date_naive();
        if today != self.current_date {
            self.rotate_to(today)?;
        }
        Ok(())
    }

    fn rotate_to(&mut self, new_date: chrono::NaiveDate) -> Result<()> {
        if !self.active_path.exists() {
            self.file = open_append(&self.active_path)?;
            self.current_date = new_date;
            return Ok(());
        }

        self.file.flush()?;
        let archive_path = self.log_dir.join(archive_name(self.current_date));
        fs::rename(&self.active_path, &archive_path)?;
        let new_file = open_append(&self.active_path)?;
        drop(std::mem::replace(&mut self.file, new_file));

        compress_log_file(&archive_path)?;
        cleanup_old_logs(&self.log_dir, self.max_files)?;

        self.current_date = new_date;
        Ok(())
    }
}

/// Compresses stray dated archives, then removes all but the newest
/// `max_files` of them.
pub fn cleanup_old_logs(log_dir: impl AsRef<Path>, max_files: usize) -> Result<()> {
    let log_path = log_dir.as_ref();
    if !log_path.exists() {
        return Ok(());
    }

    let archive_prefix = format!("{LOG_FILE_NAME}.");
    let current_log_name = archive_name(chrono::Local::now().date_naive());

    for entry in fs::read_dir(log_path)? {
        let path = entry?.path();
        let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if filename.starts_with(&archive_prefix)
            && filename != current_log_name
            && !filename.ends_with(".gz")
        {
            if let Err(e) = compress_log_file(&path) {
                eprintln!("Failed to compress log file {:?}: {}", path, e);
            }
        }
    }

    let mut log_files: Vec<_> = fs::read_dir(log_path)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(&archive_prefix))
        })
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((entry.path(), modified))
        })
        .collect();

    // newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(max_files) {
        if let Err(e) = fs::remove_file(path) {
            eprintln!("Failed to remove old log file {:?}: {}", path, e);
        }
    }

    Ok(())
}

/// Writes `<path>.gz` and removes the original.
pub fn compress_log_file(path: &Path) -> Result<()> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let mut buffer = Vec::new();
    File::open(path)?.read_to_end(&mut buffer)?;

    let mut gz_path = path.as_os_str().to_owned();
    gz_path.push(".gz");
    let mut encoder = GzEncoder::new(File::create(&gz_path)?, Compression::default());
    encoder.write_all(&buffer)?;
    encoder.finish()?;

    fs::remove_file(path)?;
    Ok(())
}
