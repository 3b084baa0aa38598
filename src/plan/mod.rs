//! Load plan - the validated, dependency-ordered set of table load specs

pub mod error;
pub mod file;
pub mod spec;

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::Result;

pub use error::PlanError;
pub use file::PlanFile;
pub use spec::{ForeignKeyRef, LoadPlan, ResolutionMode, TableLoadSpec, TableName};

impl LoadPlan {
    /// Read and validate a JSON plan file
    pub async fn read(path: impl AsRef<Path>) -> Result<Self> {
        let file = PlanFile::read(path).await?;
        Ok(validate(file)?)
    }

    /// Parse and validate a JSON plan document
    #[cfg(test)]
    pub fn from_json(json: &str) -> Result<Self> {
        let file = PlanFile::from_json(json)?;
        Ok(validate(file)?)
    }
}

/// Turn a parsed plan file into a [`LoadPlan`]
///
/// Checks every per-table invariant, resolves parent names to spec indices,
/// rejects dependency cycles, and finally requires that every parent is
/// declared before the tables that reference it.
pub fn validate(file: PlanFile) -> Result<LoadPlan, PlanError> {
    let mut seen = HashSet::new();
    for entry in &file.tables {
        if !seen.insert(entry.name.as_str()) {
            return Err(PlanError::DuplicateSpec(entry.name.clone()));
        }
    }

    let index_by_name: HashMap<&str, usize> = file
        .tables
        .iter()
        .enumerate()
        .map(|(i, e)| (e.name.as_str(), i))
        .collect();

    let mut specs = Vec::with_capacity(file.tables.len());
    for entry in &file.tables {
        let spec_name = entry.name.clone();
        let primary_key = entry.primary_key.trim().to_string();
        if primary_key.is_empty() {
            return Err(PlanError::MissingPrimaryKey { spec: spec_name });
        }

        let mut destinations = HashSet::new();
        for mapping in &entry.columns.0 {
            if mapping.column == primary_key {
                return Err(PlanError::PrimaryKeyMapped {
                    spec: spec_name,
                    field: mapping.source.clone(),
                    column: mapping.column.clone(),
                });
            }
            if !destinations.insert(mapping.column.as_str()) {
                return Err(PlanError::DuplicateColumn {
                    spec: spec_name,
                    column: mapping.column.clone(),
                });
            }
        }

        for column in &entry.natural_key {
            if !destinations.contains(column.as_str()) {
                return Err(PlanError::NaturalKeyNotMapped {
                    spec: spec_name,
                    column: column.clone(),
                });
            }
        }

        let mut foreign_keys = Vec::with_capacity(entry.foreign_keys.len());
        let mut fk_columns = HashSet::new();
        for fk in &entry.foreign_keys {
            if !entry.columns.0.iter().any(|m| m.source == fk.column) {
                return Err(PlanError::ForeignKeyNotMapped {
                    spec: spec_name,
                    column: fk.column.clone(),
                });
            }
            if !fk_columns.insert(fk.column.as_str()) {
                return Err(PlanError::DuplicateForeignKey {
                    spec: spec_name,
                    column: fk.column.clone(),
                });
            }
            let parent = *index_by_name.get(fk.parent.as_str()).ok_or_else(|| {
                PlanError::UndeclaredParent {
                    spec: spec_name.clone(),
                    parent: fk.parent.clone(),
                }
            })?;
            if fk.mode == ResolutionMode::NaturalKey && file.tables[parent].natural_key.is_empty() {
                return Err(PlanError::ParentWithoutNaturalKey {
                    spec: spec_name,
                    column: fk.column.clone(),
                    parent: fk.parent.clone(),
                });
            }
            foreign_keys.push(ForeignKeyRef {
                source_column: fk.column.clone(),
                parent,
                mode: fk.mode,
            });
        }

        specs.push(TableLoadSpec {
            source_id: entry.source.clone().unwrap_or_else(|| entry.name.clone()),
            name: spec_name,
            target: TableName {
                schema: entry.schema.clone(),
                name: entry.table.clone(),
            },
            column_map: entry.columns.0.clone(),
            primary_key_column: primary_key,
            natural_key_columns: entry.natural_key.clone(),
            foreign_keys,
        });
    }

    if let Some(cycle) = find_cycle(&specs) {
        return Err(PlanError::Cycle(cycle));
    }

    for (index, spec) in specs.iter().enumerate() {
        if let Some(fk) = spec.foreign_keys.iter().find(|fk| fk.parent > index) {
            return Err(PlanError::ParentDeclaredAfterChild {
                spec: spec.name.clone(),
                parent: specs[fk.parent].name.clone(),
            });
        }
    }

    Ok(LoadPlan::from_validated(specs))
}

/// Depth-first search over child -> parent edges
///
/// Returns the names along the first cycle found, closed with its first name
/// repeated (`a -> b -> a`). A table referencing itself is a cycle of one.
fn find_cycle(specs: &[TableLoadSpec]) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        OnStack,
        Done,
    }

    fn visit(
        node: usize,
        specs: &[TableLoadSpec],
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<String>> {
        marks[node] = Mark::OnStack;
        stack.push(node);

        for fk in &specs[node].foreign_keys {
            match marks[fk.parent] {
                Mark::OnStack => {
                    let start = stack.iter().position(|&n| n == fk.parent).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[start..].iter().map(|&n| specs[n].name.clone()).collect();
                    cycle.push(specs[fk.parent].name.clone());
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = visit(fk.parent, specs, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }

        stack.pop();
        marks[node] = Mark::Done;
        None
    }

    let mut marks = vec![Mark::Unvisited; specs.len()];
    let mut stack = Vec::new();
    for node in 0..specs.len() {
        if marks[node] == Mark::Unvisited
            && let Some(cycle) = visit(node, specs, &mut marks, &mut stack)
        {
            return Some(cycle);
        }
    }
    None
}
