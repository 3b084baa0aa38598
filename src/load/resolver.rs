//! Placeholder foreign-key values to real identifiers
//!
//! Resolution only reads the identifier maps of tables that were loaded
//! earlier in the session; it never touches the sink.

use super::id_map::{IdIndexMap, NaturalKey};
use super::warning::{LoadWarning, WarningKind};
use crate::config::NATURAL_KEY_SEPARATOR;
use crate::plan::{ForeignKeyRef, LoadPlan, ResolutionMode, TableLoadSpec};
use crate::source::{RowView, Value, normalize};

/// Result of looking up one non-blank placeholder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Found(i64),
    /// Ordinal placeholder that is not a positive integer
    Unparsable,
    /// The parent has no identifier for this placeholder
    Unresolved,
}

/// A row ready for insertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// One value per column mapping, in insertion order
    pub values: Vec<Value>,
    pub warnings: Vec<LoadWarning>,
}

impl Resolution {
    /// The row's natural key, taken from the resolved values
    pub fn natural_key(&self, spec: &TableLoadSpec) -> Option<NaturalKey> {
        if !spec.has_natural_key() {
            return None;
        }
        Some(
            spec.natural_key_positions()
                .into_iter()
                .map(|position| self.values[position].clone())
                .collect(),
        )
    }
}

pub struct ReferenceResolver<'a> {
    plan: &'a LoadPlan,
    /// Indexed like the plan's specs
    maps: &'a [IdIndexMap],
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(plan: &'a LoadPlan, maps: &'a [IdIndexMap]) -> Self {
        Self { plan, maps }
    }

    /// Map a raw row onto the spec's columns, rewriting foreign-key placeholders
    ///
    /// Blank placeholders become no value silently. Unparsable and unresolved
    /// placeholders also become no value, with a warning.
    pub fn resolve(&self, spec: &TableLoadSpec, row: RowView<'_>, ordinal: usize) -> Resolution {
        let mut warnings = Vec::new();
        let values = spec
            .column_map
            .iter()
            .map(|mapping| {
                let raw = row.get(&mapping.source);
                let fk = spec
                    .foreign_keys
                    .iter()
                    .find(|fk| fk.source_column == mapping.source);

                match (fk, raw) {
                    (None, raw) => raw.map(str::to_string),
                    (Some(_), None) => None,
                    (Some(fk), Some(placeholder)) => match self.lookup(fk, placeholder) {
                        Lookup::Found(id) => Some(id.to_string()),
                        miss => {
                            warnings.push(self.miss_warning(spec, fk, ordinal, placeholder, miss));
                            None
                        }
                    },
                }
            })
            .collect();

        Resolution { values, warnings }
    }

    /// Look up a non-blank placeholder in the parent's identifier map
    pub fn lookup(&self, fk: &ForeignKeyRef, placeholder: &str) -> Lookup {
        let map = &self.maps[fk.parent];
        let found = match fk.mode {
            ResolutionMode::Ordinal => match parse_ordinal(placeholder) {
                Some(position) => map.by_ordinal(position - 1),
                None => return Lookup::Unparsable,
            },
            ResolutionMode::NaturalKey => {
                let parent = self.plan.parent_of(fk);
                map.by_natural_key(&split_natural_key(
                    placeholder,
                    parent.natural_key_columns.len(),
                ))
            }
        };

        match found {
            Some(id) => Lookup::Found(id),
            None => Lookup::Unresolved,
        }
    }

    /// Warning for a placeholder that did not resolve
    pub fn miss_warning(
        &self,
        spec: &TableLoadSpec,
        fk: &ForeignKeyRef,
        ordinal: usize,
        placeholder: &str,
        miss: Lookup,
    ) -> LoadWarning {
        let parent = &self.plan.parent_of(fk).name;
        match miss {
            Lookup::Unparsable => LoadWarning::row(
                &spec.name,
                ordinal,
                WarningKind::UnparsablePlaceholder,
                format!(
                    "{} placeholder '{}' is not a row number of {}",
                    fk.source_column, placeholder, parent
                ),
            ),
            _ => LoadWarning::row(
                &spec.name,
                ordinal,
                WarningKind::UnresolvedReference,
                format!(
                    "{} placeholder '{}' has no loaded row in {}",
                    fk.source_column, placeholder, parent
                ),
            ),
        }
    }
}

/// 1-based row number, or `None` if not a positive integer
fn parse_ordinal(placeholder: &str) -> Option<usize> {
    placeholder
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|n| *n >= 1)
        .and_then(|n| usize::try_from(n).ok())
}

/// Split a natural-key placeholder into its components
fn split_natural_key(placeholder: &str, arity: usize) -> NaturalKey {
    if arity <= 1 {
        return vec![normalize(placeholder)];
    }
    placeholder.split(NATURAL_KEY_SEPARATOR).map(normalize).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Dataset;

    fn plan() -> LoadPlan {
        LoadPlan::from_json(
            r#"{"tables": [
                {"name": "Color", "table": "color", "columns": {"name": "color_name"},
                 "primary_key": "color_id", "natural_key": ["color_name"]},
                {"name": "Store", "table": "store", "columns": {"city": "city", "ward": "ward"},
                 "primary_key": "store_id", "natural_key": ["city", "ward"]},
                {"name": "Car", "table": "car", "columns": {"vin": "vin", "color": "color_id", "store": "store_id"},
                 "primary_key": "car_id", "natural_key": ["vin", "color_id"],
                 "foreign_keys": [
                    {"column": "color", "parent": "Color"},
                    {"column": "store", "parent": "Store", "mode": "natural_key"}
                 ]}
            ]}"#,
        )
        .unwrap()
    }

    fn maps() -> Vec<IdIndexMap> {
        let mut color = IdIndexMap::new();
        color.record(0, Some(vec![Some("Red".to_string())]), 101);
        color.record(1, Some(vec![Some("Blue".to_string())]), 102);
        // Row 2 was skipped during load
        color.record(3, Some(vec![Some("Green".to_string())]), 104);

        let mut store = IdIndexMap::new();
        store.record(
            0,
            Some(vec![Some("Tokyo".to_string()), Some("Minato".to_string())]),
            7,
        );
        vec![color, store, IdIndexMap::new()]
    }

    fn car_rows(rows: &[[&str; 3]]) -> Dataset {
        let mut dataset = Dataset::new(vec![
            "vin".to_string(),
            "color".to_string(),
            "store".to_string(),
        ]);
        for row in rows {
            dataset.push_raw(row);
        }
        dataset
    }

    #[test]
    fn test_ordinal_placeholder_uses_parent_position() {
        let plan = plan();
        let maps = maps();
        let resolver = ReferenceResolver::new(&plan, &maps);
        let cars = car_rows(&[["VIN1", "2", "Tokyo|Minato"]]);

        let resolution = resolver.resolve(plan.spec(2), cars.row(0).unwrap(), 0);
        assert_eq!(
            resolution.values,
            vec![
                Some("VIN1".to_string()),
                Some("102".to_string()),
                Some("7".to_string())
            ]
        );
        assert!(resolution.warnings.is_empty());
        assert_eq!(
            resolution.natural_key(plan.spec(2)),
            Some(vec![Some("VIN1".to_string()), Some("102".to_string())])
        );
    }

    #[test]
    fn test_blank_placeholder_is_silent() {
        let plan = plan();
        let maps = maps();
        let resolver = ReferenceResolver::new(&plan, &maps);
        let cars = car_rows(&[["VIN1", "  ", ""]]);

        let resolution = resolver.resolve(plan.spec(2), cars.row(0).unwrap(), 0);
        assert_eq!(resolution.values[1], None);
        assert_eq!(resolution.values[2], None);
        assert!(resolution.warnings.is_empty());
    }

    #[test]
    fn test_unparsable_and_non_positive_ordinals_warn() {
        let plan = plan();
        let maps = maps();
        let resolver = ReferenceResolver::new(&plan, &maps);
        let cars = car_rows(&[["VIN1", "abc", ""], ["VIN2", "0", ""], ["VIN3", "-4", ""]]);

        for ordinal in 0..3 {
            let resolution = resolver.resolve(plan.spec(2), cars.row(ordinal).unwrap(), ordinal);
            assert_eq!(resolution.values[1], None);
            assert_eq!(resolution.warnings.len(), 1);
            assert_eq!(
                resolution.warnings[0].kind,
                WarningKind::UnparsablePlaceholder
            );
            assert_eq!(resolution.warnings[0].ordinal, Some(ordinal));
        }
    }

    #[test]
    fn test_reference_to_skipped_parent_row_warns() {
        let plan = plan();
        let maps = maps();
        let resolver = ReferenceResolver::new(&plan, &maps);
        let cars = car_rows(&[["VIN1", "3", "Osaka|Kita"]]);

        let resolution = resolver.resolve(plan.spec(2), cars.row(0).unwrap(), 0);
        assert_eq!(resolution.values[1], None);
        assert_eq!(resolution.values[2], None);
        let kinds: Vec<WarningKind> = resolution.warnings.iter().map(|w| w.kind).collect();
        assert_eq!(
            kinds,
            vec![
                WarningKind::UnresolvedReference,
                WarningKind::UnresolvedReference
            ]
        );
    }

    #[test]
    fn test_lookup_after_skipped_parent_row_keeps_positions() {
        let plan = plan();
        let maps = maps();
        let resolver = ReferenceResolver::new(&plan, &maps);
        let fk = &plan.spec(2).foreign_keys[0];

        assert_eq!(resolver.lookup(fk, "4"), Lookup::Found(104));
        assert_eq!(resolver.lookup(fk, " 1 "), Lookup::Found(101));
        assert_eq!(resolver.lookup(fk, "3"), Lookup::Unresolved);
        assert_eq!(resolver.lookup(fk, "2.0"), Lookup::Unparsable);
    }

    #[test]
    fn test_split_natural_key() {
        assert_eq!(
            split_natural_key("a|b", 1),
            vec![Some("a|b".to_string())]
        );
        assert_eq!(
            split_natural_key("a||c", 3),
            vec![Some("a".to_string()), None, Some("c".to_string())]
        );
    }
}
