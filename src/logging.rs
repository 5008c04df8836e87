//! Logging setup with an in-process line buffer.
//!
//! Log output goes to stdout (cron captures it) and to a rolling file in
//! the local data directory. Every formatted line is also retained in a
//! [`LogBuffer`] so the tail can be attached to the failure email at the
//! end of a run.

use anyhow::Result;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Retain at most this many lines; older lines are dropped.
const BUFFER_CAP: usize = 2000;

/// Shared buffer of formatted log lines for the current run.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    inner: Arc<Mutex<Vec<String>>>,
}

impl LogBuffer {
    /// Last `n` captured lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<String> {
        match self.inner.lock() {
            Ok(lines) => {
                let start = lines.len().saturating_sub(n);
                lines[start..].to_vec()
            }
            Err(_) => Vec::new(),
        }
    }

    fn push(&self, text: &str) {
        if let Ok(mut lines) = self.inner.lock() {
            for line in text.lines().filter(|l| !l.is_empty()) {
                lines.push(line.to_string());
            }
            let len = lines.len();
            if len > BUFFER_CAP {
                lines.drain(..len - BUFFER_CAP);
            }
        }
    }
}

/// Writer that tees formatted output to stdout and the line buffer.
pub struct TeeWriter {
    buffer: LogBuffer,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stdout().write_all(buf)?;
        if let Ok(text) = std::str::from_utf8(buf) {
            self.buffer.push(text);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = TeeWriter;

    fn make_writer(&'a self) -> Self::Writer {
        TeeWriter {
            buffer: self.clone(),
        }
    }
}

/// Initialize the logging system.
///
/// Log level can be controlled via the `SENTRYSCAN_LOG` environment
/// variable; the `--debug` flag sets the default filter to `debug`.
pub fn init(debug: bool, buffer: LogBuffer, log_dir: Option<PathBuf>) -> Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_env("SENTRYSCAN_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let log_dir = log_dir.unwrap_or_else(|| {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sentryscan")
            .join("logs")
    });

    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "sentryscan.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Store the guard in a static to prevent it from being dropped
    // This is safe because we only call init() once at startup
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(_guard);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(buffer).with_ansi(false))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_returns_most_recent() {
        let buffer = LogBuffer::default();
        buffer.push("one\ntwo\n");
        buffer.push("three\n");
        assert_eq!(buffer.tail(2), vec!["two".to_string(), "three".to_string()]);
        assert_eq!(buffer.tail(10).len(), 3);
    }

    #[test]
    fn test_buffer_is_capped() {
        let buffer = LogBuffer::default();
        for i in 0..(BUFFER_CAP + 50) {
            buffer.push(&format!("line {i}\n"));
        }
        let tail = buffer.tail(usize::MAX);
        assert_eq!(tail.len(), BUFFER_CAP);
        assert_eq!(tail.last().unwrap(), &format!("line {}", BUFFER_CAP + 49));
    }
}
