//! Loading a plan into a relational sink

pub mod id_map;
pub mod report;
pub mod resolver;
pub mod row_loader;
pub mod session;
pub mod warning;

pub use id_map::IdIndexMap;
pub use report::{LoadReport, TableReport, TableStatus};
pub use resolver::{Lookup, ReferenceResolver};
pub use session::LoadSession;
pub use warning::{LoadWarning, WarningKind};
