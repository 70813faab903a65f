pub mod fetcher;
pub mod parser;
pub mod poll_job;

pub use fetcher::{FetchError, FetchOutcome};
pub use parser::ParsedFeed;
pub use poll_job::PollFeedJob;
