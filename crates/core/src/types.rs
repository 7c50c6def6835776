/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Random seed fed to the downstream sampler.
pub type Seed = u64;
