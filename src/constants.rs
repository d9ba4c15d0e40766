pub const DEFAULT_FIRESTORE_BASE_URL: &str = "https://firestore.googleapis.com/v1";
pub const DEFAULT_FIRESTORE_DATABASE: &str = "(default)";
pub const DEFAULT_SERVICE_NAME: &str = "talent-recalc";
pub const DEFAULT_LOG_FILTER: &str = "talent_recalc=debug,reqwest=info,info";

/// America/Los_Angeles standard time (PST). The offset is fixed, so while Pacific daylight time
/// is in effect (second Sunday of March to first Sunday of November) operators should set
/// `CUTOFF_UTC_OFFSET_MINUTES=-420`, otherwise the cutoff lands an hour late.
pub const DEFAULT_CUTOFF_UTC_OFFSET_MINUTES: i32 = -8 * 60;
pub const DEFAULT_CUTOFF_HOUR: u32 = 8;
pub const DEFAULT_REPLY_QUERY_CONCURRENCY: usize = 8;

/// Firestore rejects any commit carrying more writes than this.
pub const FIRESTORE_MAX_BATCH_WRITES: usize = 500;
pub const FIRESTORE_LIST_PAGE_SIZE: usize = 300;

// COLLECTIONS
pub const TALENTS_COLLECTION: &str = "talents";
pub const TRANSACTIONS_COLLECTION: &str = "talentTransactions";
pub const QUESTIONS_COLLECTION: &str = "questions";
pub const REPLIES_COLLECTION: &str = "replies";

// FIELDS
pub const FIELD_TOTAL_POINTS: &str = "totalPoints";
pub const FIELD_TIMESTAMP: &str = "timestamp";
pub const FIELD_POST_AUTHOR: &str = "name";
pub const FIELD_REPLY_AUTHOR: &str = "authorFullName";
pub const FIELD_LEDGER_STUDENT: &str = "studentName";
pub const FIELD_LEDGER_POINTS: &str = "points";
pub const FIELD_LEDGER_KIND: &str = "type";

/// How many leaderboard rows are echoed to the log once a run finishes.
pub const LEADERBOARD_LOG_ROWS: usize = 10;
