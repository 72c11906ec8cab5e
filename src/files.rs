//! File names inside one real-estate directory.

/// Raw simulator output, tab-separated, no header.
pub const WIDE_TABLE_FILE: &str = "data.xda";
pub const TREE_LOG_FILE: &str = "trees.txt";

pub const ALTERNATIVES_FILE: &str = "alternatives.csv";
pub const ALTERNATIVES_KEY_FILE: &str = "alternatives_key.csv";
pub const ALTERNATIVES_PARQUET_FILE: &str = "alternatives.parquet";
pub const TREES_JSON_FILE: &str = "trees.json";
pub const CARBON_JSON_FILE: &str = "carbon.json";

/// Written by `batch` into its output directory.
pub const BATCH_REPORT_FILE: &str = "batch_report.json";
/// Copy of the combined key table that the optimizer reads as its schedule filter.
pub const FILTER_FILE: &str = "filter.csv";
