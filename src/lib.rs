pub mod batch;
pub mod carbon;
pub mod error;
pub mod files;
pub mod keyed;
pub mod process;
pub mod schema;
pub mod trees;

pub use error::{PipelineError, Result};
