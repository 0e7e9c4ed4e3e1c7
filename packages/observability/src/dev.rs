//! Dev-mode logging configuration.
//!
//! Writes structured JSONL logs to a central file that can be tailed
//! by external tools. Multi-process safe via append-only semantics.

use crate::json_layer::JsonLayer;
use crate::LogConfig;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Central log file location, `~/.encore/logs/encore.jsonl` by default.
fn default_log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".encore").join("logs").join("encore.jsonl"))
}

/// File writer that appends to the central log file.
/// Flushes per write for multi-process visibility.
#[derive(Clone)]
pub struct CentralLogWriter {
    inner: Arc<Mutex<BufWriter<File>>>,
}

impl CentralLogWriter {
    pub fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::with_capacity(8192, file))),
        })
    }
}

impl io::Write for CentralLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock();
        let result = guard.write(buf);
        guard.flush()?;
        result
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

/// MakeWriter implementation for tracing-subscriber
#[derive(Clone)]
pub struct WriterFactory {
    writer: CentralLogWriter,
}

impl<'a> MakeWriter<'a> for WriterFactory {
    type Writer = CentralLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.writer.clone()
    }
}

/// Initialize the dev subscriber with central JSONL file output.
///
/// If the log file cannot be opened the subscriber falls back to stderr only,
/// so a read-only home directory never prevents the process from starting.
pub fn init_dev_subscriber(config: &LogConfig) {
    let log_path = config.log_path.clone().or_else(default_log_path);

    let json_layer = match log_path.as_deref().map(CentralLogWriter::new) {
        Some(Ok(writer)) => Some(JsonLayer::new(
            config.service_name.clone(),
            WriterFactory { writer },
        )),
        Some(Err(e)) => {
            eprintln!("observability: cannot open log file: {e}");
            None
        }
        None => None,
    };
    let file_enabled = json_layer.is_some();

    let stderr_layer = if config.also_stderr || !file_enabled {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_writer(io::stderr)
                .with_ansi(true),
        )
    } else {
        None
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    let installed = tracing_subscriber::registry()
        .with(json_layer.map(|l| l.with_filter(env_filter.clone())))
        .with(stderr_layer.map(|l| l.with_filter(env_filter)))
        .try_init()
        .is_ok();

    if installed && file_enabled {
        if let Some(path) = &log_path {
            tracing::debug!(log_path = %path.display(), "observability initialized");
        }
    }
}
