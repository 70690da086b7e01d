//! Response-file ingestion.
//!
//! The external system signals completion by dropping `<orderId>.<ext>`
//! files into per-modality directories. The pipeline:
//!
//! 1. **Watcher**: attaches to each directory and classifies creations by name
//! 2. **Pump**: drives recognized files into a [`DeliverySink`] (the
//!    orchestrator), one at a time
//!
//! # Architecture
//!
//! ```text
//! interface engine → <dir>/<orderId>.json → Watcher → Pump → Orchestrator
//!                                                              ↓
//!                                                       audit journal
//! ```

pub mod watcher;

// Re-export key types
pub use watcher::{
    classify_event, pump, DeliverySink, ResponseFile, ResponseWatchConfig, ResponseWatcher,
    WatchEvent, WatchHandle, WatcherError,
};
