//! Arkive Core Library
//!
//! Domain models, error taxonomy, configuration and content hashing shared by every
//! Arkive component.

pub mod config;
pub mod constants;
pub mod error;
pub mod hash;
pub mod models;

pub use config::{
    ArchiveConfig, Config, MailConfig, ScanConfig, ScanMode, TransferMode, UploadConfig,
    VerifyPrevUpload,
};
pub use error::{ErrorClassExt, ErrorKind, LogLevel, PipelineError};
