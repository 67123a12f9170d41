//! Logging setup and the per-run log file
//!
//! Process-wide diagnostics go through `tracing`; [`init`] wires the
//! subscriber with an env-filter so `RUST_LOG` keeps working. Each run
//! additionally writes its own plain text log into the archive through
//! [`RunLog`], which mirrors every line to the subscriber so the console
//! shows progress while the archive keeps the durable copy.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::error::{Error, Result};

/// Initialize the global tracing subscriber.
///
/// An explicit `RUST_LOG` wins over the defaults. With `verbose` the crate
/// directives drop to debug level. The optional file receives an ansi-free
/// copy of everything, appended so repeated invocations accumulate.
pub fn init(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let directives = format!("labbook_engine={level},labbook_core={level}");

    let filter = |directives: &str| {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(directives))
            .map_err(|error| Error::Logging(error.to_string()))
    };

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![
        fmt::layer()
            .compact()
            .with_target(false)
            .with_filter(filter(&directives)?)
            .boxed(),
    ];
    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| Error::FileWrite {
                path: path.to_path_buf(),
                source,
            })?;
        layers.push(
            fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_filter(filter(&directives)?)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|error| Error::Logging(error.to_string()))?;
    Ok(())
}

/// Timestamped plain text log of one run, stored inside its archive.
pub struct RunLog {
    file: File,
    path: PathBuf,
}

impl RunLog {
    /// Create the log file, truncating a leftover from a reused debug
    /// archive.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|source| Error::FileWrite {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Append one timestamped line and flush it, so a crashing run loses at
    /// most the line being written.
    pub fn line(&mut self, message: &str) -> Result<()> {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(self.file, "{stamp} - {message}")?;
        self.file.flush()?;
        tracing::info!("{message}");
        Ok(())
    }

    /// Append several lines sharing one timestamp.
    pub fn lines<I, S>(&mut self, messages: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for message in messages {
            self.line(message.as_ref())?;
        }
        Ok(())
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
