pub mod categorize;
pub mod duplicates;

pub use categorize::{categorize, Categorization};
pub use duplicates::{group_duplicates, GroupingOptions, GroupingResult, UnreadableFile};
