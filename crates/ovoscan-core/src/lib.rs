//! ovoscan core - asynchronous image detection sessions
//!
//! This crate provides the pipeline behind the ovoscan server:
//! - Session model, store, and eviction
//! - Detector seam and adapters
//! - Job runner with a bounded worker pool
//! - Upload validation and the upload/status/result handlers
//! - A polling client for the HTTP surface

pub mod client;
pub mod config;
pub mod detector;
pub mod error;
pub mod runner;
pub mod service;
pub mod session;
pub mod upload;

pub use client::{DetectionClient, PollPolicy};
pub use config::{Config, ConfigManager};
pub use detector::{BlockingDetector, CommandDetector, Detector};
pub use error::{DetectionError, Error, Result};
pub use runner::{DetectionJob, JobRunner};
pub use service::{DetectionService, ResultReport, StatusReport};
pub use session::{Phase, Session, SessionId, SessionStore, SessionWriter};
pub use upload::{ImageUpload, UploadValidator};
