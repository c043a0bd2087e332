pub mod grouping;
pub mod raw_result;
pub mod result_set;

pub use grouping::RawResultGrouping;
pub use raw_result::RawResult;
pub use result_set::{ResultRow, ResultSet};
