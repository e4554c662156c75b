use std::path::Path;
use std::time::Duration;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::entry::AuditEntry;

const CHANNEL_BUFFER: usize = 1024;

/// Idle time after which buffered lines are flushed to disk.
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("failed to create parent directories: {0}")]
    CreateDir(std::io::Error),

    #[error("failed to open audit log file: {0}")]
    OpenFile(std::io::Error),

    #[error("failed to serialize audit entry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write to audit log: {0}")]
    Write(std::io::Error),
}

/// Cloneable handle for submitting [`AuditEntry`] values to the background
/// JSON-lines writer.
///
/// A sink built with [`AuditSink::disabled`] accepts entries and discards
/// them, so callers never branch on whether auditing is configured.
#[derive(Clone, Debug)]
pub struct AuditSink {
    tx: Option<mpsc::Sender<AuditEntry>>,
}

impl AuditSink {
    /// Open (or create) the log at `path` in append mode and spawn the
    /// writer task. Parent directories are created as needed.
    ///
    /// The task exits after a final flush once every clone of the sink has
    /// been dropped. I/O errors inside the task are logged and the entry is
    /// skipped.
    pub async fn start(path: impl AsRef<Path>) -> Result<(Self, JoinHandle<()>), AuditError> {
        let file = open_append(path.as_ref()).await?;
        let (tx, rx) = mpsc::channel::<AuditEntry>(CHANNEL_BUFFER);
        let handle = tokio::spawn(run_writer(BufWriter::new(file), rx));
        Ok((Self { tx: Some(tx) }, handle))
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue an entry, waiting for channel capacity if necessary. Entries
    /// sent after the writer task has exited are dropped with a warning.
    pub async fn log(&self, entry: AuditEntry) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(err) = tx.send(entry).await {
            tracing::warn!(
                event_type = ?err.0.event_type,
                "audit sink channel closed; entry dropped"
            );
        }
    }
}

async fn open_append(path: &Path) -> Result<File, AuditError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(AuditError::CreateDir)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(AuditError::OpenFile)
}

async fn write_line(out: &mut BufWriter<File>, entry: &AuditEntry) -> Result<(), AuditError> {
    let mut line = serde_json::to_vec(entry)?;
    line.push(b'\n');
    out.write_all(&line).await.map_err(AuditError::Write)
}

async fn run_writer(mut out: BufWriter<File>, mut rx: mpsc::Receiver<AuditEntry>) {
    let mut dirty = false;

    loop {
        match tokio::time::timeout(FLUSH_INTERVAL, rx.recv()).await {
            Ok(Some(entry)) => match write_line(&mut out, &entry).await {
                Ok(()) => dirty = true,
                Err(err) => tracing::error!(%err, "failed to write audit entry"),
            },
            Ok(None) => {
                if dirty {
                    if let Err(err) = out.flush().await {
                        tracing::error!(%err, "failed to flush audit log on shutdown");
                    }
                }
                tracing::debug!("audit writer task shutting down");
                return;
            }
            Err(_) if dirty => match out.flush().await {
                Ok(()) => dirty = false,
                Err(err) => tracing::error!(%err, "periodic audit log flush failed"),
            },
            Err(_) => {}
        }
    }
}
