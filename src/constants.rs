// === Field limits ===
pub const MAX_DESCRIPTOR_LEN: usize = 200;
pub const MAX_NOTES_LEN: usize = 4_000;
pub const MAX_MESSAGE_BODY_BYTES: usize = 16_384; // 16 KB
pub const MAX_SKILL_TAGS: usize = 20;

// === SQLite Tuning ===
/// Upper bound on how long a store operation waits for a write lock.
pub const SQLITE_BUSY_TIMEOUT_MS: u32 = 5_000;
pub const SESSION_WAL_AUTOCHECKPOINT: u32 = 1_000;
pub const CLI_WAL_AUTOCHECKPOINT: u32 = 0;

// === Identity ===
pub const HANDLE_PREFIX: &str = "member_";
pub const HANDLE_SUFFIX_LEN: usize = 5;
pub const MAX_HANDLE_ATTEMPTS: usize = 8;
pub const VERIFICATION_CODE_LEN: usize = 6;

// === Relay ===
pub const DEFAULT_RELAY_QUEUE_CAPACITY: usize = 64;
pub const MAX_RELAY_QUEUE_CAPACITY: usize = 4_096;

// === Notifications ===
pub const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_FROM_ADDRESS: &str = "no-reply@resource-exchange.local";
pub const DEFAULT_API_KEY_ENV: &str = "RESOURCE_EXCHANGE_MAIL_KEY";

/// Truncate a string to at most `max_bytes` without splitting a UTF-8 char.
pub fn truncate_safe(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
