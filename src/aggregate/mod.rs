pub mod functions;
pub mod registry;
pub mod state;

pub use functions::{AggregateFunction, Avg, Count, Extremum, StdDev, Sum, SumSq, Variance};
pub use registry::AggregateFunctionRegistry;
pub use state::{AggregateState, Aggregation, SliceOperation};
