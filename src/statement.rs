//! SQL text generation from field descriptors.

use crate::error::{Error, Result};
use crate::model::{FieldDescriptor, Model};
use crate::value::{Params, Value};

/// Placeholder used for caller-supplied equality predicates.
pub const KEY_PARAM: &str = "key";

/// CRUD operation types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    SelectAll,
    SelectWhere,
    Update,
    Delete,
}

/// Where a bound parameter takes its value from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamSource {
    Field(&'static str),
    /// The predicate value handed in by the caller.
    Key,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub source: ParamSource,
}

/// SQL text with named placeholders and the parameters that fill them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementTemplate {
    sql: String,
    params: Vec<Parameter>,
}

impl StatementTemplate {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    /// Binds every field-sourced parameter from `model`.
    ///
    /// Fields without a value bind as NULL rather than being left out.
    pub fn bind<M: Model>(&self, model: &M) -> Params {
        let mut params = Params::new();
        for param in &self.params {
            if let ParamSource::Field(field) = param.source {
                params.push(&param.name, model.value_of(field).unwrap_or(Value::Null));
            }
        }
        params
    }

    /// Binds the caller-supplied predicate value.
    pub fn bind_key(&self, key: impl Into<Value>) -> Params {
        let key = key.into();
        let mut params = Params::new();
        for param in &self.params {
            if param.source == ParamSource::Key {
                params.push(&param.name, key.clone());
            }
        }
        params
    }
}

/// Builds a statement for `operation` against `table`.
///
/// `predicate` names the equality column for `SelectWhere` and `Delete`, and
/// the identifier column for `Update`; it is ignored otherwise.
pub fn build(
    operation: Operation,
    table: &str,
    fields: &[FieldDescriptor],
    predicate: Option<&str>,
) -> Result<StatementTemplate> {
    let require_predicate = || {
        predicate.ok_or_else(|| {
            Error::validation(format!("{operation:?} requires a predicate column"))
        })
    };

    let template = match operation {
        Operation::Insert => insert(table, fields)?,
        Operation::SelectAll => select_all(table)?,
        Operation::SelectWhere => select_where(table, require_predicate()?)?,
        Operation::Update => update(table, fields, require_predicate()?)?,
        Operation::Delete => delete(table, require_predicate()?)?,
    };

    tracing::debug!(
        table,
        operation = ?operation,
        sql = %template.sql,
        param_count = template.params.len(),
        "built statement"
    );
    Ok(template)
}

pub fn insert(table: &str, fields: &[FieldDescriptor]) -> Result<StatementTemplate> {
    check_identifier("table", table)?;

    let columns: Vec<&'static str> = fields
        .iter()
        .filter(|f| f.is_writable())
        .map(|f| f.name)
        .collect();
    if columns.is_empty() {
        return Err(Error::validation(format!(
            "no insertable columns for table `{table}`"
        )));
    }

    let placeholders: Vec<String> = columns.iter().map(|c| format!(":{c}")).collect();
    Ok(StatementTemplate {
        sql: format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        ),
        params: columns.into_iter().map(field_param).collect(),
    })
}

pub fn select_all(table: &str) -> Result<StatementTemplate> {
    check_identifier("table", table)?;
    Ok(StatementTemplate {
        sql: format!("SELECT * FROM {table}"),
        params: Vec::new(),
    })
}

pub fn select_where(table: &str, column: &str) -> Result<StatementTemplate> {
    check_identifier("table", table)?;
    check_identifier("column", column)?;
    Ok(StatementTemplate {
        sql: format!("SELECT * FROM {table} WHERE {column} = :{KEY_PARAM}"),
        params: vec![key_param()],
    })
}

pub fn update(
    table: &str,
    fields: &[FieldDescriptor],
    id_column: &str,
) -> Result<StatementTemplate> {
    check_identifier("table", table)?;
    check_identifier("identifier column", id_column)?;

    let id_field = fields
        .iter()
        .find(|f| f.is_mapped() && f.name == id_column)
        .ok_or_else(|| {
            Error::validation(format!(
                "identifier column `{id_column}` not found on model for table `{table}`"
            ))
        })?;

    let set: Vec<&'static str> = fields
        .iter()
        .filter(|f| f.is_writable() && f.name != id_column)
        .map(|f| f.name)
        .collect();
    if set.is_empty() {
        return Err(Error::validation(format!(
            "no updatable columns for table `{table}`"
        )));
    }

    let assignments: Vec<String> = set.iter().map(|c| format!("{c} = :{c}")).collect();
    let mut params: Vec<Parameter> = set.into_iter().map(field_param).collect();
    params.push(field_param(id_field.name));

    Ok(StatementTemplate {
        sql: format!(
            "UPDATE {table} SET {} WHERE {id_column} = :{id_column}",
            assignments.join(", ")
        ),
        params,
    })
}

pub fn delete(table: &str, column: &str) -> Result<StatementTemplate> {
    check_identifier("table", table)?;
    check_identifier("column", column)?;
    Ok(StatementTemplate {
        sql: format!("DELETE FROM {table} WHERE {column} = :{KEY_PARAM}"),
        params: vec![key_param()],
    })
}

fn field_param(field: &'static str) -> Parameter {
    Parameter {
        name: field.to_string(),
        source: ParamSource::Field(field),
    }
}

fn key_param() -> Parameter {
    Parameter {
        name: KEY_PARAM.to_string(),
        source: ParamSource::Key,
    }
}

fn check_identifier(what: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::validation(format!("{what} name must not be empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::{describe, FieldKind};
    use std::collections::HashSet;

    crate::model! {
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct Person {
            #[identity]
            pub id: i64,
            pub p_id: i32,
            pub name: Option<String>,
            #[excluded]
            pub f_name: String,
        }
    }

    crate::model! {
        #[derive(Debug, Default)]
        pub struct OnlyIdentity {
            #[identity]
            pub id: i64,
            #[excluded]
            pub scratch: String,
        }
    }

    #[test]
    fn insert_skips_identity_and_excluded() {
        let stmt = build(Operation::Insert, "people", &describe::<Person>(), None).unwrap();
        assert_eq!(
            stmt.sql(),
            "INSERT INTO people (p_id, name) VALUES (:p_id, :name)"
        );
        assert!(!stmt.sql().contains("f_name"));
        assert!(!stmt.sql().contains(":id"));
    }

    #[test]
    fn insert_without_writable_fields_is_rejected() {
        let err = insert("t", &describe::<OnlyIdentity>()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn bind_uses_explicit_nulls() {
        let stmt = insert("people", &describe::<Person>()).unwrap();
        let params = stmt.bind(&Person {
            p_id: 1,
            ..Person::default()
        });
        assert_eq!(params.get("p_id"), Some(&Value::Integer(1)));
        assert_eq!(params.get("name"), Some(&Value::Null));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn select_statements() {
        assert_eq!(select_all("people").unwrap().sql(), "SELECT * FROM people");

        let stmt = build(Operation::SelectWhere, "people", &[], Some("p_id")).unwrap();
        assert_eq!(stmt.sql(), "SELECT * FROM people WHERE p_id = :key");
        assert_eq!(stmt.bind_key(3).get(KEY_PARAM), Some(&Value::Integer(3)));
    }

    #[test]
    fn update_sets_normal_fields_and_filters_on_identifier() {
        let stmt = update("people", &describe::<Person>(), "p_id").unwrap();
        assert_eq!(stmt.sql(), "UPDATE people SET name = :name WHERE p_id = :p_id");

        let stmt = update("people", &describe::<Person>(), "id").unwrap();
        assert_eq!(
            stmt.sql(),
            "UPDATE people SET p_id = :p_id, name = :name WHERE id = :id"
        );
        let params = stmt.bind(&Person {
            id: 9,
            p_id: 2,
            name: Some("B".into()),
            f_name: "ignored".into(),
        });
        assert_eq!(params.get("id"), Some(&Value::Integer(9)));
        assert!(!stmt.sql().contains("f_name"));
    }

    #[test]
    fn update_rejects_unknown_or_excluded_identifier() {
        let fields = describe::<Person>();
        for column in ["missing", "f_name", ""] {
            let err = update("people", &fields, column).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{column}");
        }
    }

    #[test]
    fn placeholders_are_unique() {
        let fields = describe::<Person>();
        for stmt in [
            insert("people", &fields).unwrap(),
            update("people", &fields, "id").unwrap(),
            delete("people", "id").unwrap(),
        ] {
            let names: HashSet<_> = stmt.params().iter().map(|p| p.name.as_str()).collect();
            assert_eq!(names.len(), stmt.params().len());
            for name in names {
                assert!(stmt.sql().contains(&format!(":{name}")));
            }
        }
    }

    #[test]
    fn delete_and_predicates_require_columns() {
        assert_eq!(
            delete("people", "id").unwrap().sql(),
            "DELETE FROM people WHERE id = :key"
        );
        let err = build(Operation::Delete, "people", &[], None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = select_all(" ").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn excluded_fields_never_reach_sql() {
        let fields = describe::<Person>();
        let excluded: Vec<_> = fields
            .iter()
            .filter(|f| f.kind == FieldKind::Excluded)
            .map(|f| f.name)
            .collect();
        let statements = [
            insert("people", &fields).unwrap(),
            update("people", &fields, "id").unwrap(),
            update("people", &fields, "p_id").unwrap(),
        ];
        for stmt in &statements {
            for name in &excluded {
                assert!(!stmt.sql().contains(name));
            }
        }
    }
}
