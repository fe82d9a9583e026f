/// Default page size for message history
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Maximum page size allowed
pub const MAX_PAGE_SIZE: i64 = 100;

// =============================================================================
// MESSAGING LIMITS
// =============================================================================

/// Largest conversation, creator included
pub const MAX_PARTICIPANTS: usize = 10;

/// Maximum number of files attached to one message
pub const MAX_ATTACHMENTS_PER_MESSAGE: usize = 10;

/// Maximum message body length, in characters
pub const MAX_BODY_CHARS: usize = 5000;

/// Maximum group title length, in characters
pub const MAX_TITLE_CHARS: usize = 100;

/// Maximum reaction token length, in bytes
pub const MAX_EMOJI_BYTES: usize = 32;

/// Body characters kept in a reply preview
pub const REPLY_PREVIEW_CHARS: usize = 200;

// =============================================================================
// CONCURRENCY BOUNDS
// =============================================================================

/// Concurrent signed-URL requests while formatting one page
pub const SIGNING_CONCURRENCY: usize = 8;

/// Conversations enriched concurrently when listing an inbox
pub const SUMMARY_CONCURRENCY: usize = 4;
