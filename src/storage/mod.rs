pub mod keys;
pub mod row;
pub mod store;
pub mod varint;
pub mod writer;

pub use keys::{KeyLayout, Segment};
pub use row::{decode_row, decode_row_into, encode_row};
pub use store::{column_family, CubeStore, StoreScan, CUBOID_CF_PREFIX};
pub use writer::{CuboidWriter, Fact};
