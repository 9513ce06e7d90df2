//! Identifier remapping for task trees and result logs.

mod fields;
mod offsets;
mod remap;

pub use fields::{FieldTableMap, FieldTarget, PolymorphicRule};
pub use offsets::{normalize_table_name, OffsetRecord, OffsetTable};
pub use remap::{RemapStats, Remapper};
