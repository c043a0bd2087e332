pub mod cuboid;
pub mod dimension;
pub mod dimensions;

pub use cuboid::Cuboid;
pub use dimension::{encode_member, level_by_name, Dimension, Hierarchy, HierarchyLevel, Member};
pub use dimensions::{CodeDimension, DateDimension, IntDimension, LEVEL_ALL, LEVEL_DAY, LEVEL_MONTH};
