//! Response directory watcher.
//!
//! Watches a directory the external system drops response files into and
//! turns file creations with the configured extension into
//! [`ResponseFile`]s. Only names are looked at: file contents are never
//! read and files are never moved or deleted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use notify::event::CreateKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors that can occur with the watcher
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Watch directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Delivery sink failed for {modality}: {message}")]
    Sink { modality: String, message: String },
}

/// One watched response directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseWatchConfig {
    /// Modality label recorded with watcher errors ("CT", "DX", ...)
    pub modality: String,

    /// Directory the external system writes response files into
    pub directory: PathBuf,

    /// Response file extension, without the dot
    pub extension: String,
}

impl ResponseWatchConfig {
    pub fn new(modality: impl Into<String>, directory: PathBuf, extension: &str) -> Self {
        Self {
            modality: modality.into(),
            directory,
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    /// Check that the watch directory exists
    pub fn validate(&self) -> Result<(), WatcherError> {
        if !self.directory.is_dir() {
            return Err(WatcherError::DirectoryNotFound(self.directory.clone()));
        }
        Ok(())
    }
}

/// A recognized response file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFile {
    pub path: PathBuf,

    /// Base file name, e.g. `ORD...a1b2.json`
    pub file_name: String,

    /// File name with the extension stripped
    pub order_id: String,

    pub modality: String,
}

impl ResponseFile {
    /// Classify a path by name. Returns None for foreign extensions, hidden
    /// files and names with nothing left after stripping the extension.
    pub fn from_path(path: &Path, config: &ResponseWatchConfig) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?;
        if file_name.starts_with('.') {
            return None;
        }

        let extension = path.extension()?.to_str()?;
        if !extension.eq_ignore_ascii_case(config.extension.trim_start_matches('.')) {
            return None;
        }

        let order_id = path.file_stem()?.to_str()?;
        if order_id.is_empty() {
            return None;
        }

        Some(Self {
            path: path.to_path_buf(),
            file_name: file_name.to_string(),
            order_id: order_id.to_string(),
            modality: config.modality.clone(),
        })
    }
}

/// Classify a raw filesystem notification.
///
/// Only creations of non-directory entries count; modify, remove and rename
/// notifications yield nothing.
pub fn classify_event(event: &Event, config: &ResponseWatchConfig) -> Vec<ResponseFile> {
    match event.kind {
        EventKind::Create(CreateKind::File) | EventKind::Create(CreateKind::Any) => {}
        _ => return Vec::new(),
    }

    event
        .paths
        .iter()
        .filter(|path| !path.is_dir())
        .filter_map(|path| ResponseFile::from_path(path, config))
        .collect()
}

/// Items produced by a running watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A response file was created
    Response(ResponseFile),

    /// The notification backend reported an error
    Error(String),
}

/// Receiver of watcher output
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// A response file appeared
    async fn on_response_file(&self, response: &ResponseFile) -> AnyResult<()>;

    /// Something went wrong in the background watcher
    async fn on_watcher_error(&self, modality: &str, message: &str) -> AnyResult<()>;
}

/// Watches one response directory
pub struct ResponseWatcher {
    config: ResponseWatchConfig,
}

impl ResponseWatcher {
    pub fn with_config(config: ResponseWatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResponseWatchConfig {
        &self.config
    }

    /// Attach to the directory.
    ///
    /// Fails immediately if the directory is missing. The watch lives as long
    /// as the returned handle and cannot be restarted; the receiver yields
    /// events until the handle is dropped.
    pub fn watch(
        &self,
    ) -> Result<(mpsc::UnboundedReceiver<WatchEvent>, WatchHandle), WatcherError> {
        self.config.validate()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let config = self.config.clone();

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            // Send errors only mean the receiver is gone
            match result {
                Ok(event) => {
                    for response in classify_event(&event, &config) {
                        tracing::debug!(file = %response.file_name, "Response file created");
                        let _ = tx.send(WatchEvent::Response(response));
                    }
                }
                Err(e) => {
                    tracing::warn!("Watcher error: {:?}", e);
                    let _ = tx.send(WatchEvent::Error(e.to_string()));
                }
            }
        })?;

        watcher.watch(&self.config.directory, RecursiveMode::NonRecursive)?;

        tracing::info!(
            modality = %self.config.modality,
            "Watching {} for .{} files",
            self.config.directory.display(),
            self.config.extension
        );

        Ok((
            rx,
            WatchHandle {
                config: self.config.clone(),
                _watcher: watcher,
            },
        ))
    }

    /// List response files already present in the directory.
    ///
    /// Informational only: pre-existing files are never recorded as
    /// deliveries, since only creation events count.
    pub async fn scan_existing(&self) -> Result<Vec<ResponseFile>, WatcherError> {
        self.config.validate()?;

        let mut found = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.config.directory).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(response) = ResponseFile::from_path(&entry.path(), &self.config) {
                found.push(response);
            }
        }

        found.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(found)
    }
}

/// Keeps a directory watch alive
pub struct WatchHandle {
    config: ResponseWatchConfig,
    _watcher: RecommendedWatcher,
}

impl WatchHandle {
    pub fn modality(&self) -> &str {
        &self.config.modality
    }

    pub fn directory(&self) -> &Path {
        &self.config.directory
    }
}

/// Drive watcher output into a sink until the channel closes.
///
/// A failed delivery is reported to the sink as a watcher error; if that
/// report fails too the pump stops with an error and the modality is no
/// longer tracked. Returns the number of recorded deliveries.
pub async fn pump<S>(
    mut events: mpsc::UnboundedReceiver<WatchEvent>,
    sink: Arc<S>,
    modality: String,
) -> Result<u64, WatcherError>
where
    S: DeliverySink + ?Sized,
{
    let mut delivered = 0u64;

    while let Some(event) = events.recv().await {
        let failure = match event {
            WatchEvent::Response(response) => match sink.on_response_file(&response).await {
                Ok(()) => {
                    delivered += 1;
                    continue;
                }
                Err(e) => {
                    tracing::error!(
                        file = %response.file_name,
                        "Failed to record delivery: {:#}",
                        e
                    );
                    format!("{}: {:#}", response.file_name, e)
                }
            },
            WatchEvent::Error(message) => message,
        };

        if let Err(e) = sink.on_watcher_error(&modality, &failure).await {
            tracing::error!(%modality, "Failed to record watcher error, stopping: {:#}", e);
            return Err(WatcherError::Sink {
                modality,
                message: format!("{:#}", e),
            });
        }
    }

    tracing::info!(%modality, delivered, "Watcher channel closed");
    Ok(delivered)
}
