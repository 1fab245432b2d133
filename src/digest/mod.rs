pub mod aggregate;
pub mod report;

pub use aggregate::{group_by_category, rank_by_importance, summarize_categories};
pub use report::{render, ReportMeta};
