//! Append-only audit journal.
//!
//! The repository's `audit_events` table is the source of truth. Optionally
//! every committed event is mirrored as one JSON line to a journal file for
//! easy inspection with standard tools.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::clock::Clock;
use crate::domain::{AuditEvent, EventType, NewAuditEvent};
use crate::store::{Repository, StoreError};

/// Audit log over the repository, with an optional JSONL mirror.
///
/// All appends pass through one async lock, so ids, timestamps and mirror
/// lines are produced in the same order.
pub struct AuditLog {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,

    /// Path to the JSONL mirror, if enabled
    journal_path: Option<PathBuf>,

    append_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(repo: Arc<dyn Repository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repo,
            clock,
            journal_path: None,
            append_lock: Mutex::new(()),
        }
    }

    /// Mirror committed events to a JSONL file
    pub fn with_journal(mut self, path: PathBuf) -> Self {
        self.journal_path = Some(path);
        self
    }

    pub fn journal_path(&self) -> Option<&Path> {
        self.journal_path.as_deref()
    }

    /// Append an event of `event_type` about `ref_id`; returns its event id
    pub async fn append(
        &self,
        event_type: EventType,
        ref_id: impl Into<String>,
    ) -> Result<i64, StoreError> {
        let event = self.record(NewAuditEvent::new(event_type, ref_id)).await?;
        Ok(event.event_id)
    }

    /// Append a fully described event
    pub async fn record(&self, event: NewAuditEvent) -> Result<AuditEvent, StoreError> {
        let _guard = self.append_lock.lock().await;

        let committed = self.repo.append_audit(self.clock.now(), &event)?;
        debug!(
            event_id = committed.event_id,
            event_type = %committed.event_type,
            "Audit event appended"
        );

        self.mirror(std::slice::from_ref(&committed)).await;
        Ok(committed)
    }

    /// Append several events that commit together, in order
    pub async fn record_all(
        &self,
        events: Vec<NewAuditEvent>,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        let _guard = self.append_lock.lock().await;

        let committed = self.repo.append_audit_batch(self.clock.now(), &events)?;
        debug!(count = committed.len(), "Audit events appended");

        self.mirror(&committed).await;
        Ok(committed)
    }

    /// The most recent `limit` events, oldest first
    pub fn tail(&self, limit: usize) -> Result<Vec<AuditEvent>, StoreError> {
        self.repo.query_audit_tail(limit)
    }

    /// Every event correlated with `order_id`, oldest first
    pub fn for_order(&self, order_id: &str) -> Result<Vec<AuditEvent>, StoreError> {
        self.repo.query_audit_for_order(order_id)
    }

    /// Write committed events to the JSONL mirror.
    ///
    /// Failures are logged only: the database already holds the events.
    async fn mirror(&self, events: &[AuditEvent]) {
        let Some(path) = &self.journal_path else {
            return;
        };

        if let Err(e) = append_jsonl(path, events).await {
            warn!(path = %path.display(), "Failed to mirror audit events: {}", e);
        }
    }
}

async fn append_jsonl(path: &Path, events: &[AuditEvent]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;

    let mut buffer = String::new();
    for event in events {
        let json = serde_json::to_string(event)?;
        buffer.push_str(&json);
        buffer.push('\n');
    }

    file.write_all(buffer.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// Read a JSONL mirror back (oldest first)
pub async fn read_journal(path: &Path) -> anyhow::Result<Vec<AuditEvent>> {
    use anyhow::Context;

    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read audit journal: {}", path.display()))?;

    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line)
                .with_context(|| format!("Failed to parse audit line: {}", line))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::FixedClock;
    use crate::store::SqliteRepository;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn create_test_log() -> AuditLog {
        let repo: Arc<dyn Repository> = Arc::new(SqliteRepository::open_in_memory().unwrap());
        let clock = Arc::new(FixedClock::new(
            NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
        ));
        AuditLog::new(repo, clock)
    }

    #[tokio::test]
    async fn test_append_returns_increasing_ids() {
        let log = create_test_log();

        let first = log.append(EventType::OrderCreated, "ORD1").await.unwrap();
        let second = log.append(EventType::Hl7Created, "MSH|...").await.unwrap();
        let third = log.append(EventType::WaitingForJson, "ORD1").await.unwrap();

        assert!(first < second && second < third);
    }

    #[tokio::test]
    async fn test_tail_returns_oldest_first() {
        let log = create_test_log();
        for i in 0..10 {
            log.append(EventType::OrderCreated, format!("ORD{}", i))
                .await
                .unwrap();
        }

        let tail = log.tail(4).unwrap();
        let refs: Vec<_> = tail.iter().map(|e| e.ref_id.as_str()).collect();
        assert_eq!(refs, vec!["ORD6", "ORD7", "ORD8", "ORD9"]);

        // Asking for more than exists returns everything
        assert_eq!(log.tail(100).unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_journal_mirror_matches_database() {
        let temp = TempDir::new().unwrap();
        let journal = temp.path().join("logs").join("audit.jsonl");
        let log = create_test_log().with_journal(journal.clone());

        log.record(NewAuditEvent::new(EventType::OrderCreated, "ORD1").for_order("ORD1"))
            .await
            .unwrap();
        log.record_all(vec![
            NewAuditEvent::new(EventType::JsonCreated, "ORD1.json").for_order("ORD1"),
            NewAuditEvent::new(EventType::OrderDelivered, "ORD1").for_order("ORD1"),
        ])
        .await
        .unwrap();

        let mirrored = read_journal(&journal).await.unwrap();
        assert_eq!(mirrored, log.tail(10).unwrap());
    }

    #[tokio::test]
    async fn test_missing_journal_reads_empty() {
        let temp = TempDir::new().unwrap();
        let events = read_journal(&temp.path().join("none.jsonl")).await.unwrap();
        assert!(events.is_empty());
    }
}
