//! Table specifications, SQL generation, and schema setup.

mod generator;
mod setup;
mod spec;

pub use generator::{generate, TableScript};
pub use setup::setup;
pub use spec::{ColumnSpec, ColumnType, IndexSpec, Selector, TableSpec};
