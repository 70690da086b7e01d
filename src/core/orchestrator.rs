//! Order lifecycle orchestrator.
//!
//! Owns every state-changing command: order creation, outbound message
//! delivery, image capture and response-file recording. Commands from the
//! CLI/dashboard and from directory watchers all pass through one write
//! gate, so audit ids reflect the real order of operations. Queries bypass
//! the gate and read committed state only.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use super::audit_log::AuditLog;
use super::clock::Clock;
use super::gate::{WriteGate, WriteGuard};
use super::ids::{new_image_id, new_order_id};
use super::message::MessageFormatter;
use crate::domain::{
    AuditEvent, EventType, Image, NewAuditEvent, Order, OrderStatus, Patient, PendingOrder,
};
use crate::ingest::{DeliverySink, ResponseFile};
use crate::store::{Repository, StoreError};

/// Errors surfaced to the caller of an orchestrator command
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Unknown order: {0}")]
    UnknownOrder(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to write outbound message for {order_id} to {}: {source}", path.display())]
    OutboundWrite {
        order_id: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Audit append failed: {0}")]
    Audit(#[source] StoreError),

    #[error("Failed to take write lock {}: {source}", path.display())]
    WriteLock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Fixed locations and policies handed to the orchestrator at construction
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Where `<orderId>.hl7` files are written for the interface engine
    pub outbound_dir: PathBuf,

    /// Root of the captured image path convention
    pub images_dir: PathBuf,

    pub outbound_extension: String,
    pub image_extension: String,

    /// Record `RESPONSE_UNMATCHED` instead of delivery for unknown order ids
    pub validate_response_ids: bool,

    /// JSONL mirror of the audit journal
    pub audit_journal: Option<PathBuf>,

    /// Lock file shared by every process writing to the same database
    pub write_lock: Option<PathBuf>,
}

impl OrchestratorConfig {
    pub fn new(outbound_dir: PathBuf, images_dir: PathBuf) -> Self {
        Self {
            outbound_dir,
            images_dir,
            outbound_extension: "hl7".to_string(),
            image_extension: "dcm".to_string(),
            validate_response_ids: false,
            audit_journal: None,
            write_lock: None,
        }
    }

    pub fn outbound_path(&self, order_id: &str) -> PathBuf {
        self.outbound_dir
            .join(format!("{}.{}", order_id, self.outbound_extension))
    }

    pub fn image_path(&self, modality: &str, image_id: &str) -> PathBuf {
        self.images_dir
            .join(modality)
            .join(format!("{}.{}", image_id, self.image_extension))
    }
}

/// Main order orchestrator
pub struct Orchestrator {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    audit: AuditLog,
    formatter: MessageFormatter,
    config: OrchestratorConfig,

    /// Serializes every state-changing command
    write_gate: WriteGate,
}

impl Orchestrator {
    pub fn new(
        repo: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
        formatter: MessageFormatter,
        config: OrchestratorConfig,
    ) -> Self {
        let mut audit = AuditLog::new(repo.clone(), clock.clone());
        if let Some(journal) = &config.audit_journal {
            audit = audit.with_journal(journal.clone());
        }

        let write_gate = WriteGate::new(config.write_lock.clone());

        Self {
            repo,
            clock,
            audit,
            formatter,
            config,
            write_gate,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Create an order, write its outbound message and start waiting for
    /// the response file. Returns the new order id.
    ///
    /// If the outbound write fails the order row stays (orders are never
    /// deleted), `HL7_WRITE_FAILED` is recorded and the order can be sent
    /// again with [`Orchestrator::resend_order`].
    #[instrument(skip(self), fields(order_id))]
    pub async fn create_order(
        &self,
        patient_id: &str,
        procedure: &str,
        priority: &str,
    ) -> Result<String, OrderError> {
        let _gate = self.enter().await?;
        let now = self.clock.now();

        let patient = self
            .repo
            .get_patient(patient_id)?
            .ok_or_else(|| StoreError::UnknownPatient(patient_id.to_string()))?;

        let order = Order {
            order_id: new_order_id(now),
            patient_id: patient.patient_id.clone(),
            procedure_code: procedure.to_string(),
            priority: priority.to_string(),
            created_at: now,
        };
        tracing::Span::current().record("order_id", order.order_id.as_str());

        self.repo.insert_order(&order)?;
        info!(order_id = %order.order_id, "Order created");

        self.append_audit(
            NewAuditEvent::new(EventType::OrderCreated, &order.order_id).for_order(&order.order_id),
        )
        .await?;

        self.send_order(&patient, &order, now).await?;

        Ok(order.order_id)
    }

    /// Format and write the outbound message again for an existing order
    #[instrument(skip(self))]
    pub async fn resend_order(&self, order_id: &str) -> Result<PathBuf, OrderError> {
        let _gate = self.enter().await?;

        let order = self
            .repo
            .get_order(order_id)?
            .ok_or_else(|| OrderError::UnknownOrder(order_id.to_string()))?;
        let patient = self
            .repo
            .get_patient(&order.patient_id)?
            .ok_or_else(|| StoreError::UnknownPatient(order.patient_id.clone()))?;

        info!("Resending order");
        self.send_order(&patient, &order, self.clock.now()).await
    }

    /// Record a captured image for an order. Returns the new image id.
    #[instrument(skip(self))]
    pub async fn capture_image(
        &self,
        order_id: &str,
        modality: &str,
    ) -> Result<String, OrderError> {
        let _gate = self.enter().await?;
        let now = self.clock.now();

        let order = self
            .repo
            .get_order(order_id)?
            .ok_or_else(|| OrderError::UnknownOrder(order_id.to_string()))?;

        let image_id = new_image_id(now);
        let image = Image {
            image_id: image_id.clone(),
            order_id: order.order_id.clone(),
            patient_id: order.patient_id.clone(),
            file_path: self.config.image_path(modality, &image_id),
            study_date: now,
            modality: modality.to_string(),
        };

        self.repo.insert_image(&image)?;
        info!(%image_id, "Image captured");

        self.append_audit(
            NewAuditEvent::new(EventType::ImageCaptured, order_id)
                .for_order(order_id)
                .with_detail(&image_id),
        )
        .await?;

        Ok(image_id)
    }

    /// Record that a response file appeared for an order.
    ///
    /// Both journal entries commit in one transaction, so no reader sees the
    /// file recorded without the matching delivery.
    #[instrument(
        skip(self, response),
        fields(file = %response.file_name, order_id = %response.order_id)
    )]
    pub async fn record_delivery(
        &self,
        response: &ResponseFile,
    ) -> Result<Vec<AuditEvent>, OrderError> {
        let _gate = self.enter().await?;
        let order_id = response.order_id.as_str();

        let matched =
            !self.config.validate_response_ids || self.repo.get_order(order_id)?.is_some();

        let events = if matched {
            vec![
                NewAuditEvent::new(EventType::JsonCreated, &response.file_name).for_order(order_id),
                NewAuditEvent::new(EventType::OrderDelivered, order_id).for_order(order_id),
            ]
        } else {
            warn!("Response file does not match any order");
            vec![
                NewAuditEvent::new(EventType::JsonCreated, &response.file_name),
                NewAuditEvent::new(EventType::ResponseUnmatched, order_id)
                    .with_detail(&response.modality),
            ]
        };

        let committed = self.audit.record_all(events).await.map_err(OrderError::Audit)?;
        if matched {
            info!("Order delivered");
        }
        Ok(committed)
    }

    /// Record a background watcher failure for `modality`
    pub async fn record_watcher_error(
        &self,
        modality: &str,
        message: &str,
    ) -> Result<AuditEvent, OrderError> {
        let _gate = self.enter().await?;
        self.append_audit(
            NewAuditEvent::new(EventType::WatcherError, modality).with_detail(message),
        )
        .await
    }

    /// Orders without a captured image, newest first
    pub fn list_pending_orders(&self) -> Result<Vec<PendingOrder>, OrderError> {
        Ok(self.repo.query_pending_orders()?)
    }

    /// A patient's images by ascending study date
    pub fn list_images_for_patient(&self, patient_id: &str) -> Result<Vec<Image>, OrderError> {
        Ok(self.repo.query_images_by_patient(patient_id)?)
    }

    pub fn list_patients(&self) -> Result<Vec<Patient>, OrderError> {
        Ok(self.repo.query_all_patients()?)
    }

    /// The most recent `limit` audit events, oldest first
    pub fn audit_tail(&self, limit: usize) -> Result<Vec<AuditEvent>, OrderError> {
        Ok(self.audit.tail(limit)?)
    }

    /// Reconstruct an order's status from its journal and image rows
    pub fn order_status(&self, order_id: &str) -> Result<OrderStatus, OrderError> {
        if self.repo.get_order(order_id)?.is_none() {
            return Err(OrderError::UnknownOrder(order_id.to_string()));
        }

        let events = self.audit.for_order(order_id)?;
        let has_images = self.repo.has_images(order_id)?;
        Ok(OrderStatus::from_events(order_id, &events, has_images))
    }

    /// Write the message, then record `HL7_CREATED` and `WAITING_FOR_JSON`
    async fn send_order(
        &self,
        patient: &Patient,
        order: &Order,
        now: NaiveDateTime,
    ) -> Result<PathBuf, OrderError> {
        let order_id = order.order_id.as_str();
        let message = self.formatter.format(
            patient,
            order_id,
            &order.procedure_code,
            &order.priority,
            now,
        );

        let path = match self.write_outbound(order_id, &message) {
            Ok(path) => path,
            Err(source) => {
                error!(order_id, "Failed to write outbound message: {}", source);
                self.append_audit(
                    NewAuditEvent::new(EventType::Hl7WriteFailed, order_id)
                        .for_order(order_id)
                        .with_detail(source.to_string()),
                )
                .await?;
                return Err(OrderError::OutboundWrite {
                    order_id: order_id.to_string(),
                    path: self.config.outbound_path(order_id),
                    source,
                });
            }
        };
        info!(order_id, path = %path.display(), "Outbound message written");

        self.append_audit(NewAuditEvent::new(EventType::Hl7Created, message).for_order(order_id))
            .await?;
        self.append_audit(
            NewAuditEvent::new(EventType::WaitingForJson, order_id).for_order(order_id),
        )
        .await?;

        Ok(path)
    }

    /// Write to a hidden temp file in the outbound directory, then rename it
    /// into place so the interface engine never picks up a partial message.
    fn write_outbound(&self, order_id: &str, message: &str) -> std::io::Result<PathBuf> {
        let path = self.config.outbound_path(order_id);

        let mut temp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".tmp")
            .tempfile_in(&self.config.outbound_dir)?;
        temp.write_all(message.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|e| e.error)?;

        Ok(path)
    }

    async fn enter(&self) -> Result<WriteGuard<'_>, OrderError> {
        self.write_gate
            .acquire()
            .await
            .map_err(|source| OrderError::WriteLock {
                path: self.write_gate.lock_path().map(PathBuf::from).unwrap_or_default(),
                source,
            })
    }

    async fn append_audit(&self, event: NewAuditEvent) -> Result<AuditEvent, OrderError> {
        self.audit.record(event).await.map_err(OrderError::Audit)
    }
}

#[async_trait]
impl DeliverySink for Orchestrator {
    async fn on_response_file(&self, response: &ResponseFile) -> AnyResult<()> {
        self.record_delivery(response).await?;
        Ok(())
    }

    async fn on_watcher_error(&self, modality: &str, message: &str) -> AnyResult<()> {
        self.record_watcher_error(modality, message).await?;
        Ok(())
    }
}
