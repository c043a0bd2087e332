pub mod aggregate;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod query;
pub mod scan;
pub mod storage;
pub mod stream;

pub use aggregate::{AggregateFunction, AggregateFunctionRegistry, Aggregation, SliceOperation};
pub use config::EngineConfig;
pub use engine::CubeEngine;
pub use error::{CubeError, CubeResult};
pub use model::{CodeDimension, Cuboid, DateDimension, Dimension, IntDimension, Member};
pub use query::{RawResult, ResultRow, ResultSet};
pub use scan::{CompositeKeyRangeFilter, FilterDecision, Range, ScanSpec, ScanSpecBuilder};
pub use storage::{CubeStore, CuboidWriter, Fact};
pub use stream::{InputIterator, OutputIterator};
