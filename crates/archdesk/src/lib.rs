//! archdesk: an upload desk for archive files
//!
//! This crate wires the component crates together:
//!
//! - `archdesk-resilience` retries filesystem calls and runs bulk deletes in
//!   bounded batches
//! - `archdesk-lock` serializes writes to the activity log across processes
//! - `archdesk-archive` inspects and searches uploaded archives
//! - `archdesk-activity` records what happened and notifies webhooks
//!
//! [`Services`] holds one instance of each and exposes the workflows. It is
//! built from a TOML [`Config`](config::Config):
//!
//! ```no_run
//! use archdesk::{config, logging, Services};
//! use archdesk_activity::Actor;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! logging::init_tracing(false);
//! let config = config::load_config(&config::default_config_path()?)?;
//! let services = Services::start(config).await?;
//!
//! let upload = services.store_upload("logs.zip", &std::fs::read("logs.zip")?, &Actor::default()).await?;
//! let analysis = services.analyze_upload(&upload.filename, &Actor::default()).await?;
//! println!("wallet indicators: {}", analysis.has_wallet_indicators());
//!
//! services.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod services;

pub use error::{ServiceError, ServiceResult};
pub use services::{
    validate_filename, BulkDeleteReport, DeleteOutcome, SearchScope, Services, StoredUpload,
};
