//! Configuration module
//!
//! Settings are read from `ARKIVE_*` environment variables (optionally seeded from a
//! `.env` file) and grouped by the component that consumes them.

use std::env;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::str::FromStr;

use uuid::Uuid;

use crate::constants::{DEFAULT_DOC, DEFAULT_QUEUE_NAME, MAX_PART_SIZE, MIN_PART_SIZE};

const MAX_CONNECTIONS: u32 = 20;
const MULTIPART_THRESHOLD_BYTES: u64 = 100 * 1024 * 1024;
const PART_SIZE_BYTES: u64 = 64 * 1024 * 1024;
const UPLOAD_THREADS: usize = 4;
const WORKERS: usize = 4;
const POLL_INTERVAL_MS: u64 = 1000;
const VISIBILITY_TIMEOUT_SECS: u64 = 3600;
const RUN_CHECK_INTERVAL_SECS: u64 = 60;
const MAX_RETRIES: i32 = 5;
const SMTP_PORT: u16 = 587;

/// What the candidate scanner enumerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Regular files inside the selected directories.
    Files,
    /// The selected directories themselves (packed into tars).
    Directories,
    /// Members listed in previously archived tars (unpacking).
    TarMembers,
}

impl Display for ScanMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ScanMode::Files => write!(f, "files"),
            ScanMode::Directories => write!(f, "directories"),
            ScanMode::TarMembers => write!(f, "tar_members"),
        }
    }
}

impl FromStr for ScanMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "files" => Ok(ScanMode::Files),
            "directories" => Ok(ScanMode::Directories),
            "tar_members" => Ok(ScanMode::TarMembers),
            _ => Err(anyhow::anyhow!("Invalid scan mode: {}", s)),
        }
    }
}

/// How the remote service receives object content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// The worker streams bytes to presigned URLs.
    Push,
    /// The remote service pulls from a linked filesystem location asynchronously.
    Pull,
}

impl Display for TransferMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TransferMode::Push => write!(f, "push"),
            TransferMode::Pull => write!(f, "pull"),
        }
    }
}

impl FromStr for TransferMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "push" => Ok(TransferMode::Push),
            "pull" => Ok(TransferMode::Pull),
            _ => Err(anyhow::anyhow!("Invalid transfer mode: {}", s)),
        }
    }
}

/// How tar parts are reconciled against earlier runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyPrevUpload {
    /// Compare index ranges of completed parts and flag mismatches.
    Full,
    /// Only check whether a completed part with the same name exists.
    None,
}

impl FromStr for VerifyPrevUpload {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(VerifyPrevUpload::Full),
            "none" => Ok(VerifyPrevUpload::None),
            _ => Err(anyhow::anyhow!("Invalid verify-previous-upload mode: {}", s)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ScanConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// `-1` leaf directories, `0` the root itself, `N` exactly N components below root.
    pub depth: i32,
    pub mode: ScanMode,
    pub skip_modified_within_days: Option<u32>,
    pub required_file: Option<String>,
    pub required_extension: Option<String>,
    /// Check the gate at this depth under the root instead of the candidate's own directory.
    pub required_at_depth: Option<usize>,
    pub replace_modified_files: bool,
    pub doc: String,
}

#[derive(Clone, Debug)]
pub struct ArchiveConfig {
    pub tar: bool,
    pub untar: bool,
    pub compress: bool,
    pub exclude_folders_from_tar: Vec<String>,
    /// Split directories into parts of this many files. `None` archives them whole.
    pub files_per_tar: Option<usize>,
    pub verify_prev_upload: VerifyPrevUpload,
}

#[derive(Clone, Debug)]
pub struct UploadConfig {
    pub multipart_threshold_bytes: u64,
    pub part_size_bytes: u64,
    pub threads: usize,
    pub transfer_mode: TransferMode,
}

#[derive(Clone, Debug)]
pub struct MailConfig {
    pub email_alerts_enabled: bool,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: Option<String>,
    pub smtp_tls: bool,
    pub notify_to: Vec<String>,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub source_root: PathBuf,
    pub work_root: PathBuf,
    pub destination_root: String,
    pub summary_dir: PathBuf,
    pub scan: ScanConfig,
    pub archive: ArchiveConfig,
    pub upload: UploadConfig,
    pub checksum: bool,
    pub cleanup: bool,
    pub cleanup_dry_run: bool,
    pub max_retries: i32,
    pub queue_name: String,
    pub workers: usize,
    pub poll_interval_ms: u64,
    pub visibility_timeout_secs: u64,
    pub run_id: Option<Uuid>,
    pub shutdown_after_run: bool,
    pub run_check_interval_secs: u64,
    pub remote_url: String,
    pub remote_token: Option<String>,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub mail: MailConfig,
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| non_empty(lookup(key));

        fn parsed<T: FromStr>(value: Option<String>, key: &str, default: T) -> anyhow::Result<T> {
            match value {
                Some(v) => v
                    .trim()
                    .parse()
                    .map_err(|_| anyhow::anyhow!("{} has an invalid value: {}", key, v)),
                None => Ok(default),
            }
        }

        let flag = |key: &str, default: bool| -> anyhow::Result<bool> {
            parsed(get(key).map(|s| s.to_lowercase()), key, default)
        };

        let source_root = get("ARKIVE_SOURCE_ROOT")
            .map(PathBuf::from)
            .ok_or_else(|| anyhow::anyhow!("ARKIVE_SOURCE_ROOT must be set"))?;
        let work_root = get("ARKIVE_WORK_ROOT")
            .map(PathBuf::from)
            .ok_or_else(|| anyhow::anyhow!("ARKIVE_WORK_ROOT must be set"))?;

        let scan = ScanConfig {
            include: split_list(get("ARKIVE_INCLUDE")),
            exclude: split_list(get("ARKIVE_EXCLUDE")),
            depth: parsed(get("ARKIVE_SCAN_DEPTH"), "ARKIVE_SCAN_DEPTH", -1)?,
            mode: parsed(get("ARKIVE_SCAN_MODE"), "ARKIVE_SCAN_MODE", ScanMode::Files)?,
            skip_modified_within_days: get("ARKIVE_SKIP_MODIFIED_WITHIN_DAYS")
                .map(|v| {
                    v.parse::<u32>().map_err(|_| {
                        anyhow::anyhow!("ARKIVE_SKIP_MODIFIED_WITHIN_DAYS must be a valid number")
                    })
                })
                .transpose()?
                .filter(|days| *days > 0),
            required_file: get("ARKIVE_REQUIRED_FILE"),
            required_extension: get("ARKIVE_REQUIRED_EXTENSION")
                .map(|e| e.trim_start_matches('.').to_lowercase()),
            required_at_depth: get("ARKIVE_REQUIRED_AT_DEPTH")
                .map(|v| {
                    v.parse::<usize>().map_err(|_| {
                        anyhow::anyhow!("ARKIVE_REQUIRED_AT_DEPTH must be a valid number")
                    })
                })
                .transpose()?,
            replace_modified_files: flag("ARKIVE_REPLACE_MODIFIED_FILES", false)?,
            doc: get("ARKIVE_DOC").unwrap_or_else(|| DEFAULT_DOC.to_string()),
        };

        let archive = ArchiveConfig {
            tar: flag("ARKIVE_TAR", false)?,
            untar: flag("ARKIVE_UNTAR", false)?,
            compress: flag("ARKIVE_COMPRESS", false)?,
            exclude_folders_from_tar: split_list(get("ARKIVE_EXCLUDE_FOLDERS_FROM_TAR")),
            files_per_tar: parsed::<usize>(get("ARKIVE_FILES_PER_TAR"), "ARKIVE_FILES_PER_TAR", 0)
                .map(|n| Some(n).filter(|n| *n > 0))?,
            verify_prev_upload: parsed(
                get("ARKIVE_VERIFY_PREV_UPLOAD"),
                "ARKIVE_VERIFY_PREV_UPLOAD",
                VerifyPrevUpload::Full,
            )?,
        };

        let upload = UploadConfig {
            multipart_threshold_bytes: parsed(
                get("ARKIVE_MULTIPART_THRESHOLD_BYTES"),
                "ARKIVE_MULTIPART_THRESHOLD_BYTES",
                MULTIPART_THRESHOLD_BYTES,
            )?,
            part_size_bytes: parsed(
                get("ARKIVE_PART_SIZE_BYTES"),
                "ARKIVE_PART_SIZE_BYTES",
                PART_SIZE_BYTES,
            )?,
            threads: parsed(get("ARKIVE_UPLOAD_THREADS"), "ARKIVE_UPLOAD_THREADS", UPLOAD_THREADS)?,
            transfer_mode: parsed(
                get("ARKIVE_TRANSFER_MODE"),
                "ARKIVE_TRANSFER_MODE",
                TransferMode::Push,
            )?,
        };

        let mail = MailConfig {
            email_alerts_enabled: flag("EMAIL_ALERTS_ENABLED", false)?,
            smtp_host: get("SMTP_HOST"),
            smtp_port: parsed(get("SMTP_PORT"), "SMTP_PORT", SMTP_PORT)?,
            smtp_user: get("SMTP_USER"),
            smtp_password: get("SMTP_PASSWORD"),
            smtp_from: get("SMTP_FROM"),
            smtp_tls: flag("SMTP_TLS", true)?,
            notify_to: split_list(get("ARKIVE_NOTIFY_TO")),
        };

        let config = Config {
            summary_dir: get("ARKIVE_SUMMARY_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| work_root.join("summaries")),
            source_root,
            work_root,
            destination_root: get("ARKIVE_DESTINATION_ROOT").unwrap_or_else(|| "/".to_string()),
            scan,
            archive,
            upload,
            checksum: flag("ARKIVE_CHECKSUM", true)?,
            cleanup: flag("ARKIVE_CLEANUP", false)?,
            cleanup_dry_run: flag("ARKIVE_CLEANUP_DRY_RUN", false)?,
            max_retries: parsed(get("ARKIVE_MAX_RETRIES"), "ARKIVE_MAX_RETRIES", MAX_RETRIES)?,
            queue_name: get("ARKIVE_QUEUE_NAME").unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_string()),
            workers: parsed(get("ARKIVE_WORKERS"), "ARKIVE_WORKERS", WORKERS)?,
            poll_interval_ms: parsed(
                get("ARKIVE_POLL_INTERVAL_MS"),
                "ARKIVE_POLL_INTERVAL_MS",
                POLL_INTERVAL_MS,
            )?,
            visibility_timeout_secs: parsed(
                get("ARKIVE_VISIBILITY_TIMEOUT_SECS"),
                "ARKIVE_VISIBILITY_TIMEOUT_SECS",
                VISIBILITY_TIMEOUT_SECS,
            )?,
            run_id: get("ARKIVE_RUN_ID")
                .map(|v| {
                    Uuid::parse_str(&v)
                        .map_err(|_| anyhow::anyhow!("ARKIVE_RUN_ID must be a UUID: {}", v))
                })
                .transpose()?,
            shutdown_after_run: flag("ARKIVE_SHUTDOWN_AFTER_RUN", false)?,
            run_check_interval_secs: parsed(
                get("ARKIVE_RUN_CHECK_INTERVAL_SECS"),
                "ARKIVE_RUN_CHECK_INTERVAL_SECS",
                RUN_CHECK_INTERVAL_SECS,
            )?,
            remote_url: get("ARKIVE_REMOTE_URL").unwrap_or_default(),
            remote_token: get("ARKIVE_REMOTE_TOKEN"),
            database_url: get("DATABASE_URL"),
            db_max_connections: parsed(
                get("DB_MAX_CONNECTIONS"),
                "DB_MAX_CONNECTIONS",
                MAX_CONNECTIONS,
            )?,
            mail,
        };

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.source_root == self.work_root {
            return Err(anyhow::anyhow!(
                "ARKIVE_WORK_ROOT must differ from ARKIVE_SOURCE_ROOT"
            ));
        }

        if self.archive.tar && self.archive.untar {
            return Err(anyhow::anyhow!(
                "ARKIVE_TAR and ARKIVE_UNTAR cannot both be enabled"
            ));
        }

        if self.archive.files_per_tar.is_some() && !self.archive.tar {
            return Err(anyhow::anyhow!("ARKIVE_FILES_PER_TAR requires ARKIVE_TAR=true"));
        }

        if self.scan.mode == ScanMode::Directories && !self.archive.tar {
            return Err(anyhow::anyhow!(
                "ARKIVE_SCAN_MODE=directories requires ARKIVE_TAR=true"
            ));
        }

        if self.archive.untar && self.scan.mode != ScanMode::TarMembers {
            return Err(anyhow::anyhow!(
                "ARKIVE_UNTAR=true requires ARKIVE_SCAN_MODE=tar_members"
            ));
        }

        if self.upload.multipart_threshold_bytes < MIN_PART_SIZE {
            return Err(anyhow::anyhow!(
                "ARKIVE_MULTIPART_THRESHOLD_BYTES must be at least {} bytes",
                MIN_PART_SIZE
            ));
        }

        if self.upload.part_size_bytes < MIN_PART_SIZE || self.upload.part_size_bytes > MAX_PART_SIZE
        {
            return Err(anyhow::anyhow!(
                "ARKIVE_PART_SIZE_BYTES must be between {} and {} bytes",
                MIN_PART_SIZE,
                MAX_PART_SIZE
            ));
        }

        if self.upload.threads == 0 || self.workers == 0 {
            return Err(anyhow::anyhow!(
                "ARKIVE_UPLOAD_THREADS and ARKIVE_WORKERS must be greater than zero"
            ));
        }

        if self.scan.depth < -1 {
            return Err(anyhow::anyhow!("ARKIVE_SCAN_DEPTH must be -1 or greater"));
        }

        if self.mail.email_alerts_enabled
            && (self.mail.smtp_host.is_none()
                || self.mail.smtp_from.is_none()
                || self.mail.notify_to.is_empty())
        {
            return Err(anyhow::anyhow!(
                "EMAIL_ALERTS_ENABLED=true requires SMTP_HOST, SMTP_FROM and ARKIVE_NOTIFY_TO to be set"
            ));
        }

        Ok(())
    }

    /// Whether uploads go through the remote service rather than a dry-run sink.
    pub fn has_remote(&self) -> bool {
        !self.remote_url.is_empty()
    }
}
