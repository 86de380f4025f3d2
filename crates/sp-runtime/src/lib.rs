//! Process bootstrap helpers shared by `wrapper`, `tracker`, `feeder`, and
//! `acct-etl` (spec §5, §6.2, §6.3's "ambient" additions): logging,
//! panic reporting, and the file-descriptor limit bump the two
//! connection-heavy services need.

pub mod logging;
pub mod panic;
pub mod rlimit;

pub use logging::LoggingConfig;
pub use panic::register_panic_hook;
pub use rlimit::raise_nofile_limit;
