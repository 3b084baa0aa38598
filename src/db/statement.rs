//! SQL text for row inserts and natural-key lookups

use std::collections::HashMap;

use super::sink::{ColumnInfo, Dialect};
use crate::plan::TableLoadSpec;
use crate::source::Value;

/// Quote an identifier, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Statements for one table, built once per load
#[derive(Debug, Clone)]
pub struct TableStatements {
    dialect: Dialect,
    table: String,
    primary_key: String,
    column_types: HashMap<String, String>,
    pub insert: String,
}

impl TableStatements {
    /// Build the insert for a spec against the described destination columns
    ///
    /// Postgres receives every value as text, so each placeholder is cast to
    /// the column's type. SQLite converts through column affinity instead.
    pub fn build(spec: &TableLoadSpec, dialect: Dialect, columns: &[ColumnInfo]) -> Self {
        let column_types: HashMap<String, String> = columns
            .iter()
            .map(|c| (c.name.clone(), c.type_name.clone()))
            .collect();

        let mut statements = Self {
            dialect,
            table: spec.target.qualified(),
            primary_key: quote_ident(&spec.primary_key_column),
            column_types,
            insert: String::new(),
        };

        let destination = spec.destination_columns();
        let returning = format!("RETURNING CAST({} AS BIGINT)", statements.primary_key);
        statements.insert = if destination.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES {}", statements.table, returning)
        } else {
            let column_list: Vec<String> = destination.iter().map(|c| quote_ident(c)).collect();
            let values: Vec<String> = destination
                .iter()
                .enumerate()
                .map(|(i, column)| statements.parameter(i + 1, column))
                .collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({}) {}",
                statements.table,
                column_list.join(", "),
                values.join(", "),
                returning
            )
        };

        statements
    }

    /// Placeholder for a value bound into `column`
    fn parameter(&self, index: usize, column: &str) -> String {
        let placeholder = self.dialect.placeholder(index);
        match (self.dialect, self.column_types.get(column)) {
            (Dialect::Postgres, Some(type_name)) => {
                format!("CAST({} AS {})", placeholder, quote_ident(type_name))
            }
            _ => placeholder,
        }
    }

    /// Lookup of the primary key by natural key
    ///
    /// Columns whose value is absent use `IS NULL`; only present values are
    /// returned as bind parameters, in placeholder order.
    pub fn natural_key_lookup(&self, key: &[(&str, &Value)]) -> (String, Vec<Value>) {
        let mut predicates = Vec::with_capacity(key.len());
        let mut binds = Vec::new();

        for (column, value) in key {
            match value {
                Some(v) => {
                    binds.push(Some(v.clone()));
                    predicates.push(format!(
                        "{} = {}",
                        quote_ident(column),
                        self.parameter(binds.len(), column)
                    ));
                }
                None => predicates.push(format!("{} IS NULL", quote_ident(column))),
            }
        }

        let sql = format!(
            "SELECT CAST({} AS BIGINT) FROM {} WHERE {} LIMIT 1",
            self.primary_key,
            self.table,
            predicates.join(" AND ")
        );
        (sql, binds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::LoadPlan;

    fn order_spec() -> TableLoadSpec {
        let plan = LoadPlan::from_json(
            r#"{"tables": [{"name": "Order", "table": "order",
                "columns": {"customer": "customer_id", "status": "order_status"},
                "primary_key": "order_id", "natural_key": ["customer_id", "order_status"]}]}"#,
        )
        .unwrap();
        plan.spec(0).clone()
    }

    fn described() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo {
                name: "customer_id".to_string(),
                type_name: "int4".to_string(),
                nullable: true,
            },
            ColumnInfo {
                name: "order_status".to_string(),
                type_name: "order_status_enum".to_string(),
                nullable: false,
            },
        ]
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident("order"), "\"order\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_postgres_insert_casts_every_value() {
        let statements = TableStatements::build(&order_spec(), Dialect::Postgres, &described());
        assert_eq!(
            statements.insert,
            "INSERT INTO \"order\" (\"customer_id\", \"order_status\") \
             VALUES (CAST($1 AS \"int4\"), CAST($2 AS \"order_status_enum\")) \
             RETURNING CAST(\"order_id\" AS BIGINT)"
        );
    }

    #[test]
    fn test_sqlite_insert_uses_question_marks() {
        let statements = TableStatements::build(&order_spec(), Dialect::Sqlite, &described());
        assert_eq!(
            statements.insert,
            "INSERT INTO \"order\" (\"customer_id\", \"order_status\") VALUES (?, ?) \
             RETURNING CAST(\"order_id\" AS BIGINT)"
        );
    }

    #[test]
    fn test_lookup_uses_is_null_for_absent_values() {
        let statements = TableStatements::build(&order_spec(), Dialect::Postgres, &described());
        let customer: Value = None;
        let status: Value = Some("paid".to_string());

        let (sql, binds) = statements
            .natural_key_lookup(&[("customer_id", &customer), ("order_status", &status)]);

        assert_eq!(
            sql,
            "SELECT CAST(\"order_id\" AS BIGINT) FROM \"order\" \
             WHERE \"customer_id\" IS NULL AND \"order_status\" = CAST($1 AS \"order_status_enum\") LIMIT 1"
        );
        assert_eq!(binds, vec![Some("paid".to_string())]);
    }

    #[test]
    fn test_empty_column_map_uses_default_values() {
        let plan = LoadPlan::from_json(
            r#"{"tables": [{"name": "Cart", "table": "shopping_cart", "columns": {}, "primary_key": "cart_id"}]}"#,
        )
        .unwrap();
        let statements = TableStatements::build(plan.spec(0), Dialect::Sqlite, &[]);
        assert_eq!(
            statements.insert,
            "INSERT INTO \"shopping_cart\" DEFAULT VALUES RETURNING CAST(\"cart_id\" AS BIGINT)"
        );
    }
}
