//! Subscriber setup shared by the client and hub binaries.

use std::{
    env,
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

pub const DEFAULT_LOG_DIR: &str = ".gba/logs";
pub const LOG_LEVEL_ENV: &str = "GBA_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdoutLogging {
    Always,
    /// Only when no log file could be opened; for binaries that own stdout.
    WithoutFile,
}

/// Keeps the log file open for the life of the process.
pub struct LogGuard {
    file: Option<Arc<Mutex<File>>>,
    path: Option<PathBuf>,
}

impl LogGuard {
    fn stdout_only() -> Self {
        Self {
            file: None,
            path: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

struct MultiWriter {
    stdout: bool,
    file: Option<Arc<Mutex<File>>>,
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.stdout {
            let _ = io::stdout().write_all(buf);
        }
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(|err| err.into_inner());
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.stdout {
            let _ = io::stdout().flush();
        }
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(|err| err.into_inner());
            let _ = file.flush();
        }
        Ok(())
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over `GBA_LOG_LEVEL`;
/// `debug` forces the debug level when `RUST_LOG` is unset.
pub fn init_logging(
    binary: &str,
    log_dir: &str,
    stdout: StdoutLogging,
    debug: bool,
) -> Option<LogGuard> {
    let level = if debug {
        "debug".to_string()
    } else {
        env::var(LOG_LEVEL_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "info".to_string())
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let guard = match open_log_file(log_dir, binary) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard::stdout_only()
        }
    };
    let file = guard.file.clone();
    let stdout = stdout == StdoutLogging::Always || file.is_none();
    let make_writer = BoxMakeWriter::new(move || MultiWriter {
        stdout,
        file: file.clone(),
    });
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .with_ansi(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(guard)
}

/// Opens `<log_dir>/<binary>-<pid>.log` for appending. An empty `log_dir`
/// disables the file.
pub fn open_log_file(log_dir: &str, binary: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard::stdout_only());
    }
    let dir = PathBuf::from(log_dir);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!(
        "{}-{}.log",
        sanitize_component(binary),
        std::process::id()
    ));
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
        path: Some(path),
    })
}

pub fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// True only for an explicit truthy value.
pub fn env_switch(name: &str) -> bool {
    env::var(name)
        .ok()
        .and_then(|value| parse_switch(&value))
        .unwrap_or(false)
}

fn sanitize_component(input: &str) -> String {
    input
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_lands_in_nested_dir() {
        let root = tempfile::tempdir().expect("tempdir");
        let dir = root.path().join("nested/logs");
        let guard = open_log_file(dir.to_str().expect("utf-8 path"), "gba client").expect("open");
        let path = guard.path().expect("file path");
        assert!(path.starts_with(&dir));
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        assert!(name.starts_with("gba_client-"), "{name}");

        let mut writer = MultiWriter {
            stdout: false,
            file: guard.file.clone(),
        };
        writer.write_all(b"event=hub_start\n").expect("write");
        writer.flush().expect("flush");
        let written = std::fs::read_to_string(path).expect("read back");
        assert_eq!(written, "event=hub_start\n");

        let disabled = open_log_file("  ", "gba-client").expect("disabled");
        assert!(disabled.path().is_none());
    }

    #[test]
    fn switch_values() {
        assert_eq!(parse_switch(" yes "), Some(true));
        assert_eq!(parse_switch("ON"), Some(true));
        assert_eq!(parse_switch("0"), Some(false));
        assert_eq!(parse_switch("maybe"), None);
        assert_eq!(sanitize_component("gba client/1"), "gba_client_1");
    }
}
