//! protoview - queryable SQLite views over protobuf-encoded rows.
//!
//! Rows live in a two-column raw table (`id INTEGER PRIMARY KEY`, `proto
//! BLOB`); a generated view exposes paths inside each row's message as typed,
//! indexable columns, kept efficient with content-addressed functional
//! indexes. A reflection-driven `protobuf_extract` scalar function powers the
//! view columns, and a transaction/batch wrapper plus an ownership-taking
//! row collection layer carry bulk writes.

pub mod db;
pub mod error;
pub mod functions;
pub mod path;
pub mod registry;
pub mod rows;
pub mod schema;
pub mod value;

pub use db::{paginate, ProtoDb, DEFAULT_BATCH_SIZE};
pub use error::{Error, Result};
pub use functions::register_functions;
pub use path::{extract, parse_path, PathSegment};
pub use registry::{PrototypeCache, Registry};
pub use rows::{populate, populate_with, upsert_row, upsert_rows, ResultList, ResultRow};
pub use schema::{generate, setup, ColumnSpec, ColumnType, IndexSpec, Selector, TableScript, TableSpec};
pub use value::SqlValue;
