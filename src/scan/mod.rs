pub mod filter;
pub mod range;
pub mod scanner;
pub mod spec;

pub use filter::{CompositeKeyRangeFilter, FilterDecision, FilterStats};
pub use range::Range;
pub use scanner::FilteringScanner;
pub use spec::{ScanSpec, ScanSpecBuilder};
