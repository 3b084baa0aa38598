pub mod sink;
pub mod sql_sink;
pub mod statement;

pub use sink::{IdentityLookup, RejectionKind, RelationalSink, SinkError};
pub use sql_sink::SqlSink;
pub use statement::TableStatements;
