/// Upper bound accepted for a reported answer duration, in seconds.
pub const MAX_TIME_SPENT_SECONDS: u32 = 3_600;

/// Concurrent invalidation streams served by one process.
pub const MAX_SSE_CONNECTIONS: usize = 1_000;

/// Maximum request body size: 2 MiB (bulk imports included).
pub const MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

/// Learners listed on the leaderboard.
pub const LEADERBOARD_SIZE: usize = 10;
