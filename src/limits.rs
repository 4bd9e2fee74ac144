// Input bounds enforced before any slot lock is taken.

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_ADDRESS_LEN: usize = 500;
pub const MAX_OPERATING_HOURS_LEN: usize = 100;

pub const MAX_SLOT_CAPACITY: u32 = 10_000;
pub const MAX_BRANCHES: usize = 10_000;
pub const MAX_SLOTS: usize = 1_000_000;

/// Widest `list_slots` date range, in days.
pub const MAX_RANGE_DAYS: i64 = 366;

/// Draws of the reference generator before giving up on a unique reference.
pub const MAX_REFERENCE_ATTEMPTS: usize = 8;

/// Longest accepted protocol line, in bytes.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// How long an append may wait for room in the WAL writer's queue.
pub const WAL_APPEND_TIMEOUT_MS: u64 = 5_000;

/// Slots a single connection may `listen` to.
pub const MAX_LISTENS_PER_CONNECTION: usize = 256;
