use thiserror::Error;

/// Configuration errors detected while building a [`super::LoadPlan`]
///
/// Every variant is fatal: a plan that fails validation never reaches the sink.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("table spec '{0}' is declared more than once")]
    DuplicateSpec(String),

    #[error("table spec '{spec}' has an empty primary key column")]
    MissingPrimaryKey { spec: String },

    #[error("table spec '{spec}' maps source field '{field}' onto the generated primary key '{column}'")]
    PrimaryKeyMapped {
        spec: String,
        field: String,
        column: String,
    },

    #[error("table spec '{spec}' maps more than one source field onto column '{column}'")]
    DuplicateColumn { spec: String, column: String },

    #[error("table spec '{spec}' declares natural key column '{column}' that is not a mapped destination column")]
    NaturalKeyNotMapped { spec: String, column: String },

    #[error("table spec '{spec}' declares foreign key on '{column}' which is not a mapped source field")]
    ForeignKeyNotMapped { spec: String, column: String },

    #[error("table spec '{spec}' declares more than one foreign key on '{column}'")]
    DuplicateForeignKey { spec: String, column: String },

    #[error("table spec '{spec}' references undeclared parent '{parent}'")]
    UndeclaredParent { spec: String, parent: String },

    #[error("table spec '{spec}' resolves '{column}' by natural key, but parent '{parent}' declares none")]
    ParentWithoutNaturalKey {
        spec: String,
        column: String,
        parent: String,
    },

    #[error("dependency cycle between table specs: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("table spec '{spec}' is declared before its parent '{parent}'; declare parents first")]
    ParentDeclaredAfterChild { spec: String, parent: String },
}
