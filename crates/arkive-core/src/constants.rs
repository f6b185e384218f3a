//! Application-wide constants.

/// Terminal success status of a work item.
pub const STATUS_COMPLETED: &str = "COMPLETED";

/// Terminal failure status of a work item (mapping/storage/verification or retries exhausted).
pub const STATUS_FAILED: &str = "FAILED";

/// Status of a freshly created or resumed work item.
pub const STATUS_PENDING: &str = "";

/// Transfer status reported by the remote service once an object is durably archived.
pub const REMOTE_STATE_ARCHIVED: &str = "archived";

/// Smallest part size the multi-part protocol accepts (except for the last part).
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Largest part size the multi-part protocol accepts.
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Maximum number of parts in one multi-part upload.
pub const MAX_PART_COUNT: u64 = 10_000;

/// Part sizes are rounded to a multiple of this many bytes.
pub const PART_SIZE_ALIGNMENT: u64 = 1024;

/// Attempts per part before a multi-part upload is abandoned.
pub const PART_UPLOAD_ATTEMPTS: u32 = 3;

/// Fixed delay between attempts of a single part, in milliseconds.
pub const PART_RETRY_BACKOFF_MS: u64 = 2_000;

/// Default queue carrying work item ids.
pub const DEFAULT_QUEUE_NAME: &str = "arkive.work";

/// Default processor name for source collections without a dedicated mapping.
pub const DEFAULT_DOC: &str = "mirror";
