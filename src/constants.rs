pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8001";
pub const USER_AGENT: &str = "npi-profiler/0.1";

pub const ENRICH_PATH: &str = "/profile/agents";
pub const EMAIL_DISPATCH_PATH: &str = "/email/dispatch";

pub const DEFAULT_ENRICH_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Uploads larger than this are rejected before extraction.
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
