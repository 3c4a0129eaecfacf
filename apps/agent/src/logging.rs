//! Logging setup: `env_logger` writing to stderr and to one log file per day.
//!
//! Lines look like `[2026-03-14 12:05:09] INFO: Backup of /media/KINGSTON completed`. Files are
//! named `backup_log_{yyyy-MM-dd}.txt` and only ever appended to.

use chrono::{Local, NaiveDate};
use log::{Level, LevelFilter, debug, warn};
use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub fn log_file_name(date: NaiveDate) -> String {
    format!("backup_log_{}.txt", date.format("%Y-%m-%d"))
}

pub fn format_line(timestamp: chrono::DateTime<Local>, level: Level, message: &str) -> String {
    format!("[{}] {}: {}", timestamp.format("%Y-%m-%d %H:%M:%S"), level, message)
}

/// Appends to today's log file, switching files when the date changes. Optionally tees everything
/// to stderr.
pub struct DailyLogFile {
    dir: PathBuf,
    current: Option<(NaiveDate, File)>,
    tee_stderr: bool,
}

impl DailyLogFile {
    pub fn new(dir: impl Into<PathBuf>, tee_stderr: bool) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            current: None,
            tee_stderr,
        })
    }

    fn file_for(&mut self, today: NaiveDate) -> io::Result<&mut File> {
        let stale = !matches!(&self.current, Some((date, _)) if *date == today);
        if stale {
            let path = self.dir.join(log_file_name(today));
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            self.current = Some((today, file));
        }
        match &mut self.current {
            Some((_, file)) => Ok(file),
            None => Err(io::Error::other("log file not open")),
        }
    }
}

impl Write for DailyLogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.tee_stderr {
            // stderr is best effort, the file is what counts
            let _ = io::stderr().write_all(buf);
        }
        let today = Local::now().date_naive();
        self.file_for(today)?.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some((_, file)) = &mut self.current {
            file.flush()?;
        }
        Ok(())
    }
}

fn logger_builder(rust_log: Option<&str>) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder.format(|buf, record| {
        writeln!(buf, "{}", format_line(Local::now(), record.level(), &record.args().to_string()))
    });
    match rust_log {
        Some(filters) => builder.parse_filters(filters),
        // Let everything through so `log::set_max_level` is the only gate
        None => builder.filter_level(LevelFilter::Trace),
    };
    builder
}

/// Initializes the global logger at `level`. `RUST_LOG`, when set, takes over instead. Falls back
/// to stderr only if the log directory can't be created.
pub fn init_logging(log_dir: &Path, level: &str) {
    let rust_log = env::var("RUST_LOG").ok();
    let mut builder = logger_builder(rust_log.as_deref());

    let file_error = match DailyLogFile::new(log_dir, true) {
        Ok(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
            None
        }
        Err(e) => Some(e),
    };
    builder.init();
    if rust_log.is_none() {
        set_log_level(level);
    }

    if let Some(e) = file_error {
        warn!("Logging to stderr only, can't use {}: {}", log_dir.display(), e);
    }
}

pub fn parse_level(level: &str) -> LevelFilter {
    match level.trim().to_ascii_lowercase().as_str() {
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" | "warning" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "trace" => LevelFilter::Trace,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

/// Changes the global log level. Unknown names fall back to `info`.
pub fn set_log_level(level: &str) -> LevelFilter {
    let filter = parse_level(level);
    log::set_max_level(filter);
    debug!("Log level set to {filter}");
    filter
}
