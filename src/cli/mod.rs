//! Command-line interface for orderflow.
//!
//! A thin consumer of the orchestrator: every command resolves the
//! configuration, opens the database and issues one orchestrator call.
//! `serve` additionally attaches the response-directory watchers.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fs2::FileExt;
use serde::Deserialize;
use tracing::{error, info};

use crate::config::{self, paths, ResolvedConfig};
use crate::core::{is_order_id, MessageFormatter, Orchestrator, SystemClock};
use crate::domain::{AuditEvent, Patient};
use crate::ingest::{pump, ResponseWatcher};
use crate::store::{Repository, SqliteRepository, StoreError};

/// orderflow - Imaging order orchestrator for file-drop HL7 interfaces
#[derive(Parser, Debug)]
#[command(name = "orderflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch response directories and record deliveries until Ctrl-C
    Serve,

    /// Load patients from a YAML seed file
    Seed {
        /// Seed file with a top-level `patients:` list
        file: PathBuf,
    },

    /// List patients
    Patients,

    /// Create an imaging order and send it to the interface engine
    Order {
        /// Patient ID
        #[arg(short, long)]
        patient: String,

        /// Procedure (e.g. "CT Abdomen")
        #[arg(long)]
        procedure: String,

        /// Priority (STAT, ASAP, ROUTINE)
        #[arg(long, default_value = "ROUTINE")]
        priority: String,
    },

    /// Record a captured image for an order
    Capture {
        /// Order ID
        #[arg(short, long)]
        order: String,

        /// Modality (CT, DX, MR, ...)
        #[arg(short, long)]
        modality: String,
    },

    /// List orders without a captured image
    Pending,

    /// List a patient's images by study date
    Images {
        /// Patient ID
        patient_id: String,
    },

    /// Show the derived status of an order
    Status {
        /// Order ID
        order_id: String,
    },

    /// Write the outbound message for an order again
    Resend {
        /// Order ID
        order_id: String,
    },

    /// Show recent audit events
    Audit {
        /// Maximum number of events to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Show the newest event first
        #[arg(long)]
        newest_first: bool,
    },

    /// List response files already sitting in the watched directories
    Responses,

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = config::load()?;

        match self.command {
            Commands::Serve => serve(&config).await,
            Commands::Seed { file } => seed_patients(&config, &file),
            Commands::Patients => list_patients(&config),
            Commands::Order {
                patient,
                procedure,
                priority,
            } => create_order(&config, &patient, &procedure, &priority).await,
            Commands::Capture { order, modality } => {
                capture_image(&config, &order, &modality).await
            }
            Commands::Pending => list_pending(&config),
            Commands::Images { patient_id } => list_images(&config, &patient_id),
            Commands::Status { order_id } => show_status(&config, &order_id),
            Commands::Resend { order_id } => resend_order(&config, &order_id).await,
            Commands::Audit {
                limit,
                newest_first,
            } => show_audit(&config, limit, newest_first),
            Commands::Responses => list_responses(&config).await,
            Commands::Config => show_config(&config),
        }
    }
}

fn open_repository(config: &ResolvedConfig) -> Result<Arc<SqliteRepository>> {
    paths::provision_directories(config)?;
    let repo = SqliteRepository::open(&config.database)
        .with_context(|| format!("Failed to open database: {}", config.database.display()))?;
    Ok(Arc::new(repo))
}

fn open_orchestrator(config: &ResolvedConfig) -> Result<Arc<Orchestrator>> {
    let repo = open_repository(config)?;
    Ok(Arc::new(Orchestrator::new(
        repo,
        Arc::new(SystemClock),
        MessageFormatter::new(config.header.clone()),
        config.orchestrator_config(),
    )))
}

/// Take the single-instance lock for `serve`; released when the file drops
fn acquire_serve_lock(home: &Path) -> Result<std::fs::File> {
    let lock_path = paths::lock_file(home);
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;

    file.try_lock_exclusive().with_context(|| {
        format!(
            "Another orderflow serve instance holds {}",
            lock_path.display()
        )
    })?;

    Ok(file)
}

/// Attach all watchers and record deliveries until interrupted
async fn serve(config: &ResolvedConfig) -> Result<()> {
    let orchestrator = open_orchestrator(config)?;
    let _lock = acquire_serve_lock(&config.home)?;

    // Handles keep the watches alive for the life of the process
    let mut handles = Vec::new();

    for watch in &config.watches {
        let watcher = ResponseWatcher::with_config(watch.clone());
        let (events, handle) = watcher.watch().with_context(|| {
            format!(
                "Failed to watch {} responses in {}",
                watch.modality,
                watch.directory.display()
            )
        })?;

        let sink = orchestrator.clone();
        let modality = watch.modality.clone();
        tokio::spawn(async move {
            match pump(events, sink, modality.clone()).await {
                Ok(delivered) => info!(%modality, delivered, "Delivery tracking ended"),
                Err(e) => error!(%modality, "Delivery tracking stopped until restart: {}", e),
            }
        });

        handles.push(handle);
    }

    let plural = if handles.len() == 1 { "y" } else { "ies" };
    eprintln!("Watching {} response director{}:", handles.len(), plural);
    for handle in &handles {
        eprintln!("  {:<6} {}", handle.modality(), handle.directory().display());
    }
    eprintln!("Press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");

    Ok(())
}

#[derive(Debug, Deserialize)]
struct SeedFile {
    patients: Vec<Patient>,
}

/// Insert seed patients, skipping ones already present
fn seed_patients(config: &ResolvedConfig, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read seed file: {}", file.display()))?;
    let seed: SeedFile = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse seed file: {}", file.display()))?;

    let repo = open_repository(config)?;
    let mut added = 0;
    let mut skipped = 0;

    for patient in &seed.patients {
        match repo.insert_patient(patient) {
            Ok(()) => added += 1,
            Err(StoreError::DuplicateId(_)) => skipped += 1,
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to insert patient {}", patient.patient_id)
                });
            }
        }
    }

    println!("Seeded {} patient(s), {} already present", added, skipped);
    Ok(())
}

fn list_patients(config: &ResolvedConfig) -> Result<()> {
    let patients = open_orchestrator(config)?.list_patients()?;

    if patients.is_empty() {
        println!("No patients found");
        return Ok(());
    }

    println!(
        "{:<10} {:<12} {:<28} {:<12} {:<6} {}",
        "ID", "MRN", "NAME", "DOB", "SEX", "ALLERGIES"
    );
    println!("{}", "-".repeat(90));
    for p in patients {
        println!(
            "{:<10} {:<12} {:<28} {:<12} {:<6} {}",
            p.patient_id,
            p.mrn,
            p.display_name(),
            p.date_of_birth,
            p.gender,
            p.allergies.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}

async fn create_order(
    config: &ResolvedConfig,
    patient: &str,
    procedure: &str,
    priority: &str,
) -> Result<()> {
    let orchestrator = open_orchestrator(config)?;
    let order_id = orchestrator
        .create_order(patient, procedure, priority)
        .await
        .context("Order was not sent")?;

    println!("{}", order_id);
    eprintln!(
        "[Order written to {}]",
        orchestrator.config().outbound_path(&order_id).display()
    );
    Ok(())
}

async fn capture_image(config: &ResolvedConfig, order_id: &str, modality: &str) -> Result<()> {
    let image_id = open_orchestrator(config)?
        .capture_image(order_id, modality)
        .await?;
    println!("{}", image_id);
    Ok(())
}

async fn resend_order(config: &ResolvedConfig, order_id: &str) -> Result<()> {
    let path = open_orchestrator(config)?.resend_order(order_id).await?;
    eprintln!("[Order written to {}]", path.display());
    Ok(())
}

fn list_pending(config: &ResolvedConfig) -> Result<()> {
    let pending = open_orchestrator(config)?.list_pending_orders()?;

    if pending.is_empty() {
        println!("No pending orders");
        return Ok(());
    }

    println!(
        "{:<30} {:<24} {:<20} {:<8} {}",
        "ORDER ID", "PATIENT", "PROCEDURE", "PRIORITY", "CREATED"
    );
    println!("{}", "-".repeat(105));
    for p in pending {
        println!(
            "{:<30} {:<24} {:<20} {:<8} {}",
            p.order.order_id,
            p.patient_name,
            p.order.procedure_code,
            p.order.priority,
            p.order.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}

fn list_images(config: &ResolvedConfig, patient_id: &str) -> Result<()> {
    let images = open_orchestrator(config)?.list_images_for_patient(patient_id)?;

    if images.is_empty() {
        println!("No images for patient {}", patient_id);
        return Ok(());
    }

    println!("{:<20} {:<8} {:<30} {}", "STUDY DATE", "MODALITY", "ORDER ID", "PATH");
    println!("{}", "-".repeat(100));
    for image in images {
        println!(
            "{:<20} {:<8} {:<30} {}",
            image.study_date.format("%Y-%m-%d %H:%M:%S"),
            image.modality,
            image.order_id,
            image.file_path.display()
        );
    }

    Ok(())
}

fn show_status(config: &ResolvedConfig, order_id: &str) -> Result<()> {
    let status = open_orchestrator(config)?.order_status(order_id)?;

    println!("Order ID: {}", status.order_id);
    println!("State: {:?}", status.state);
    println!("Image captured: {}", if status.image_captured { "yes" } else { "no" });
    if let Some(created) = status.created_at {
        println!("Created: {}", created);
    }
    if let Some(delivered) = status.delivered_at {
        println!("Delivered: {}", delivered);
    }
    if let Some(last) = status.last_event_id {
        println!("Last event: #{}", last);
    }

    Ok(())
}

fn show_audit(config: &ResolvedConfig, limit: usize, newest_first: bool) -> Result<()> {
    let mut events = open_orchestrator(config)?.audit_tail(limit)?;

    if events.is_empty() {
        println!("No audit events");
        return Ok(());
    }

    if newest_first {
        events.reverse();
    }

    println!("{:>6} {:<20} {:<20} {}", "ID", "TIME", "EVENT", "REF");
    println!("{}", "-".repeat(90));
    for event in &events {
        print_audit_event(event);
    }

    Ok(())
}

fn print_audit_event(event: &AuditEvent) {
    // Outbound messages span several lines
    let reference = event.ref_id.trim_end().replace('\n', " ↵ ");
    println!(
        "{:>6} {:<20} {:<20} {}",
        event.event_id,
        event.timestamp.format("%Y-%m-%d %H:%M:%S"),
        event.event_type,
        reference
    );
    if let Some(detail) = &event.detail {
        println!("{:>6} {:<20} {:<20} ({})", "", "", "", detail);
    }
}

async fn list_responses(config: &ResolvedConfig) -> Result<()> {
    for watch in &config.watches {
        let watcher = ResponseWatcher::with_config(watch.clone());
        let found = watcher.scan_existing().await?;

        println!("{} ({}): {} file(s)", watch.modality, watch.directory.display(), found.len());
        for response in found {
            let note = if is_order_id(&response.order_id) { "" } else { "  (not an orderflow id)" };
            println!("  {:<40} order {}{}", response.file_name, response.order_id, note);
        }
    }

    Ok(())
}

fn show_config(config: &ResolvedConfig) -> Result<()> {
    let config_file = config
        .config_file
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(none)".to_string());
    println!("Config file: {}", config_file);
    println!("Home:        {}", config.home.display());
    println!("Database:    {}", config.database.display());
    println!("Outbound:    {}", config.outbound_dir.display());
    println!("Images:      {}", config.images_dir.display());
    if let Some(journal) = &config.audit_journal {
        println!("Journal:     {}", journal.display());
    }
    println!("Validate response ids: {}", config.validate_response_ids);
    println!("Watches:");
    for watch in &config.watches {
        println!("  {:<6} *.{:<6} {}", watch.modality, watch.extension, watch.directory.display());
    }
    let h = &config.header;
    println!(
        "HL7 header:  {}@{} -> {}@{}",
        h.sending_application, h.sending_facility, h.receiving_application, h.receiving_facility
    );
    Ok(())
}
