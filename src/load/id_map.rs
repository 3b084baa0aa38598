use std::collections::{BTreeMap, HashMap};

use crate::source::Value;

/// Natural-key values in `natural_key_columns` order
pub type NaturalKey = Vec<Value>;

/// Identifiers assigned to one table's rows during a session
///
/// Only rows that were inserted or matched an existing row have entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdIndexMap {
    by_ordinal: BTreeMap<usize, i64>,
    by_natural_key: HashMap<NaturalKey, i64>,
}

impl IdIndexMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the identifier of the row at 0-based `ordinal`
    pub fn record(&mut self, ordinal: usize, natural_key: Option<NaturalKey>, id: i64) {
        self.by_ordinal.insert(ordinal, id);
        if let Some(key) = natural_key {
            self.by_natural_key.insert(key, id);
        }
    }

    pub fn by_ordinal(&self, ordinal: usize) -> Option<i64> {
        self.by_ordinal.get(&ordinal).copied()
    }

    pub fn by_natural_key(&self, key: &[Value]) -> Option<i64> {
        self.by_natural_key.get(key).copied()
    }

    /// Ordinals with an identifier, ascending
    #[cfg(test)]
    pub fn ordinals(&self) -> impl Iterator<Item = usize> + '_ {
        self.by_ordinal.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.by_ordinal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ordinal.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_both_indexes() {
        let mut map = IdIndexMap::new();
        map.record(0, Some(vec![Some("Red".to_string())]), 11);
        map.record(2, None, 13);

        assert_eq!(map.by_ordinal(0), Some(11));
        assert_eq!(map.by_ordinal(1), None);
        assert_eq!(map.by_ordinal(2), Some(13));
        assert_eq!(map.by_natural_key(&[Some("Red".to_string())]), Some(11));
        assert_eq!(map.ordinals().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_composite_key_with_absent_component() {
        let mut map = IdIndexMap::new();
        let key = vec![Some("Tokyo".to_string()), None];
        map.record(4, Some(key.clone()), 5);

        assert_eq!(map.by_natural_key(&key), Some(5));
        assert_eq!(
            map.by_natural_key(&[Some("Tokyo".to_string()), Some("".to_string())]),
            None
        );
    }
}
