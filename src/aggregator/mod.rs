/// Per-day grouping and summary statistics
pub mod daily;

/// Bounded recent-readings window
pub mod window;

pub use daily::{daily_summaries, group_by_day, reading_date, summarize, DailySummary, FieldStats};
pub use window::{RecentWindow, DEFAULT_WINDOW_SIZE};
