//! Connection handling and statement execution.
//!
//! Every call opens its own connection and drops it before returning, on
//! success and failure alike. Batches run inside one transaction that is
//! committed only after every statement succeeded.

use std::sync::Arc;
use std::time::Duration;

use rusqlite::types::ToSql;
use rusqlite::{Batch, Connection, OpenFlags, Statement, Transaction};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::statement::StatementTemplate;
use crate::value::{Params, Row, Table, Value};

/// Source of fresh database connections.
pub trait ConnectionProvider {
    fn connect(&self) -> Result<Connection>;
}

impl<P: ConnectionProvider + ?Sized> ConnectionProvider for Arc<P> {
    fn connect(&self) -> Result<Connection> {
        (**self).connect()
    }
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_foreign_keys() -> bool {
    true
}

/// SQLite connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file
    pub db_path: String,
    /// How long a connection waits on a locked database.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_foreign_keys")]
    pub foreign_keys: bool,
    #[serde(default)]
    pub read_only: bool,
}

impl SqliteConfig {
    /// Create a new SQLite config for the database at `db_path`
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            busy_timeout_ms: default_busy_timeout_ms(),
            foreign_keys: default_foreign_keys(),
            read_only: false,
        }
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

impl ConnectionProvider for SqliteConfig {
    fn connect(&self) -> Result<Connection> {
        let flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI
        } else {
            OpenFlags::default()
        };

        let conn = Connection::open_with_flags(&self.db_path, flags).map_err(|e| {
            Error::connectivity(format!("cannot open database at `{}`", self.db_path), e)
        })?;

        conn.busy_timeout(Duration::from_millis(self.busy_timeout_ms))
            .map_err(|e| Error::connectivity("cannot set busy timeout", e))?;
        if self.foreign_keys {
            conn.execute_batch("PRAGMA foreign_keys = ON")
                .map_err(|e| Error::connectivity("cannot enable foreign keys", e))?;
        }
        Ok(conn)
    }
}

/// Runs statements against connections taken from a [`ConnectionProvider`].
#[derive(Debug, Clone)]
pub struct Executor<P> {
    provider: P,
}

impl<P: ConnectionProvider> Executor<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Executes `sql` and returns the affected-row count.
    ///
    /// Without parameters every statement in the text runs, in order, and the
    /// count is summed. With parameters the text must hold exactly one
    /// statement, and every placeholder must have a binding.
    pub fn execute_non_query(&self, sql: &str, params: Option<&Params>) -> Result<usize> {
        let conn = self.provider.connect()?;
        let affected = match params {
            Some(params) => execute_bound(&conn, sql, params)?,
            None => execute_all(&conn, sql)?,
        };
        tracing::trace!(sql, affected, "executed statement");
        Ok(affected)
    }

    /// Executes `queries` in order inside a single transaction.
    ///
    /// Either every statement takes effect or none does. The returned count is
    /// the sum over all statements.
    pub fn execute_non_query_batch<S: AsRef<str>>(&self, queries: &[S]) -> Result<usize> {
        if queries.is_empty() {
            return Err(Error::validation("queries must not be empty"));
        }

        let mut conn = self.provider.connect()?;
        in_transaction(&mut conn, |tx| {
            let mut total = 0;
            for query in queries {
                total += execute_all(tx, query.as_ref())?;
            }
            Ok(total)
        })
    }

    /// Executes `template` once per parameter set, all in one transaction and
    /// on one prepared statement.
    pub fn execute_template_batch(
        &self,
        template: &StatementTemplate,
        rows: &[Params],
    ) -> Result<usize> {
        if rows.is_empty() {
            return Err(Error::validation("batch must not be empty"));
        }

        let sql = template.sql();
        let mut conn = self.provider.connect()?;
        in_transaction(&mut conn, |tx| {
            let mut stmt = prepare_single(tx, sql)?;
            let mut total = 0;
            for params in rows {
                let names = params.placeholder_names();
                check_bindings(&stmt, sql, &names)?;
                total += stmt
                    .execute(bind_named(&names, params).as_slice())
                    .map_err(|e| Error::statement(sql, e))?;
            }
            Ok(total)
        })
    }

    /// Runs a single query and materializes its full result.
    pub fn query(&self, sql: &str, params: Option<&Params>) -> Result<Table> {
        let conn = self.provider.connect()?;
        let table = query_on(&conn, sql, params)?;
        tracing::trace!(sql, rows = table.len(), "executed query");
        Ok(table)
    }
}

fn bind_named<'a>(names: &'a [String], params: &'a Params) -> Vec<(&'a str, &'a dyn ToSql)> {
    names
        .iter()
        .map(String::as_str)
        .zip(params.values.iter().map(|(_, value)| value as &dyn ToSql))
        .collect()
}

/// Fails unless every placeholder of `stmt` appears in `names`.
///
/// SQLite would otherwise leave it unbound and read it as NULL.
fn check_bindings(stmt: &Statement<'_>, sql: &str, names: &[String]) -> Result<()> {
    for idx in 1..=stmt.parameter_count() {
        match stmt.parameter_name(idx) {
            Some(name) if names.iter().any(|bound| bound == name) => {}
            Some(name) => {
                return Err(Error::validation(format!(
                    "placeholder `{name}` has no bound value (sql: {sql})"
                )));
            }
            None => {
                return Err(Error::validation(format!(
                    "positional placeholder {idx} cannot be bound by name (sql: {sql})"
                )));
            }
        }
    }
    Ok(())
}

/// Prepares `sql`, which must contain exactly one statement.
fn prepare_single<'conn>(conn: &'conn Connection, sql: &str) -> Result<Statement<'conn>> {
    let mut batch = Batch::new(conn, sql);
    let stmt = batch
        .next()
        .map_err(|e| Error::statement(sql, e))?
        .ok_or_else(|| Error::validation("SQL text holds no statement"))?;
    if batch.next().map_err(|e| Error::statement(sql, e))?.is_some() {
        return Err(Error::validation(format!(
            "expected a single statement (sql: {sql})"
        )));
    }
    Ok(stmt)
}

/// Whether SQLite's change counter reflects this statement.
///
/// `changes()` only moves for INSERT, UPDATE and DELETE; after DDL it still
/// holds the previous statement's count.
fn counts_changes(stmt: &Statement<'_>) -> bool {
    const KEYWORDS: [&str; 5] = ["INSERT", "UPDATE", "DELETE", "REPLACE", "WITH"];

    if stmt.readonly() {
        return false;
    }
    stmt.expanded_sql().is_some_and(|text| {
        let keyword = text
            .trim_start()
            .split(|c: char| !c.is_ascii_alphabetic())
            .next()
            .unwrap_or_default();
        KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(keyword))
    })
}

/// Executes every statement in `sql` in order, summing affected rows.
fn execute_all(conn: &Connection, sql: &str) -> Result<usize> {
    let mut batch = Batch::new(conn, sql);
    let mut total = 0;
    let mut executed = 0;
    while let Some(mut stmt) = batch.next().map_err(|e| Error::statement(sql, e))? {
        check_bindings(&stmt, sql, &[])?;
        let affected = stmt.execute([]).map_err(|e| Error::statement(sql, e))?;
        if counts_changes(&stmt) {
            total += affected;
        }
        executed += 1;
    }
    if executed == 0 {
        return Err(Error::validation("SQL text holds no statement"));
    }
    Ok(total)
}

fn execute_bound(conn: &Connection, sql: &str, params: &Params) -> Result<usize> {
    let mut stmt = prepare_single(conn, sql)?;
    let names = params.placeholder_names();
    check_bindings(&stmt, sql, &names)?;
    stmt.execute(bind_named(&names, params).as_slice())
        .map_err(|e| Error::statement(sql, e))
}

fn query_on(conn: &Connection, sql: &str, params: Option<&Params>) -> Result<Table> {
    let mut stmt = prepare_single(conn, sql)?;
    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    let shared: Arc<[String]> = columns.clone().into();

    let names = params.map(Params::placeholder_names).unwrap_or_default();
    check_bindings(&stmt, sql, &names)?;
    let mut rows = match params {
        Some(params) => stmt.query(bind_named(&names, params).as_slice()),
        None => stmt.query([]),
    }
    .map_err(|e| Error::statement(sql, e))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(|e| Error::statement(sql, e))? {
        let mut values = Vec::with_capacity(columns.len());
        for idx in 0..columns.len() {
            let value = row.get_ref(idx).map_err(|e| Error::statement(sql, e))?;
            values.push(Value::from_sql_ref(value));
        }
        out.push(Row::new(Arc::clone(&shared), values));
    }
    Ok(Table::new(columns, out))
}

/// Runs `work` in a transaction, committing on success and rolling back
/// explicitly on the first error.
fn in_transaction<F>(conn: &mut Connection, work: F) -> Result<usize>
where
    F: FnOnce(&Transaction<'_>) -> Result<usize>,
{
    let tx = conn
        .transaction()
        .map_err(|e| Error::statement("BEGIN", e))?;

    match work(&tx) {
        Ok(total) => {
            tx.commit().map_err(|e| Error::statement("COMMIT", e))?;
            tracing::trace!(affected = total, "committed batch");
            Ok(total)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback() {
                tracing::warn!(error = %rollback, "rollback failed");
            }
            tracing::debug!(error = %err, "batch rolled back");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::NamedTempFile;

    fn temp_executor() -> (Executor<SqliteConfig>, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let config = SqliteConfig::new(file.path().to_str().unwrap());
        let executor = Executor::new(config);
        executor
            .execute_non_query(
                "CREATE TABLE items (
                    id INTEGER PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    qty INTEGER
                )",
                None,
            )
            .unwrap();
        (executor, file)
    }

    fn count(executor: &Executor<SqliteConfig>) -> i64 {
        let table = executor.query("SELECT COUNT(*) AS n FROM items", None).unwrap();
        match table.rows()[0].get("n") {
            Some(Value::Integer(n)) => *n,
            other => panic!("unexpected count: {other:?}"),
        }
    }

    #[test]
    fn named_parameters_bind_nulls() {
        let (executor, _file) = temp_executor();
        let params = Params::new()
            .with_value("name", "bolt")
            .with_value("qty", None::<i64>);
        let affected = executor
            .execute_non_query("INSERT INTO items (name, qty) VALUES (:name, :qty)", Some(&params))
            .unwrap();
        assert_eq!(affected, 1);

        let table = executor
            .query(
                "SELECT name, qty FROM items WHERE name = @name",
                Some(&Params::new().with_value("@name", "bolt")),
            )
            .unwrap();
        assert_eq!(table.columns(), ["name", "qty"]);
        assert_eq!(table.rows()[0].get("qty"), Some(&Value::Null));
    }

    #[test]
    fn batch_accumulates_counts() {
        let (executor, _file) = temp_executor();
        let total = executor
            .execute_non_query_batch(&[
                "INSERT INTO items (name, qty) VALUES ('a', 1)",
                "INSERT INTO items (name, qty) VALUES ('b', 2)",
                "UPDATE items SET qty = qty + 1",
            ])
            .unwrap();
        assert_eq!(total, 4);
        assert_eq!(count(&executor), 2);
    }

    #[test]
    fn batch_failure_leaves_no_effects() {
        let (executor, _file) = temp_executor();
        for failing in 0..3 {
            let mut queries = vec![
                "INSERT INTO items (name) VALUES ('a')".to_string(),
                "INSERT INTO items (name) VALUES ('b')".to_string(),
                "INSERT INTO items (name) VALUES ('c')".to_string(),
            ];
            queries[failing] = "INSERT INTO missing_table (name) VALUES ('x')".to_string();
            let err = executor.execute_non_query_batch(&queries).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Statement);
            assert_eq!(count(&executor), 0, "failing statement {failing}");
        }
    }

    #[test]
    fn every_statement_in_the_text_runs() {
        let (executor, _file) = temp_executor();
        executor
            .execute_non_query("CREATE TABLE p (name TEXT); CREATE TABLE q (x INTEGER);", None)
            .unwrap();
        let tables = executor
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name IN ('p', 'q')",
                None,
            )
            .unwrap();
        assert_eq!(tables.len(), 2);

        let total = executor
            .execute_non_query_batch(&[
                "INSERT INTO items (name) VALUES ('c'); INSERT INTO items (name) VALUES ('d')",
                "INSERT INTO items (name) VALUES ('e'); CREATE TABLE r (x INTEGER)",
            ])
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(count(&executor), 3);
    }

    #[test]
    fn failure_later_in_a_text_rolls_back_the_batch() {
        let (executor, _file) = temp_executor();
        let err = executor
            .execute_non_query_batch(&[
                "INSERT INTO items (name) VALUES ('a')",
                "INSERT INTO items (name) VALUES ('b'); INSERT INTO items (name) VALUES ('a')",
            ])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Statement);
        assert_eq!(count(&executor), 0);
    }

    #[test]
    fn parameterized_text_must_hold_one_statement() {
        let (executor, _file) = temp_executor();
        let params = Params::new().with_value("name", "a");
        let err = executor
            .execute_non_query(
                "INSERT INTO items (name) VALUES (:name); DELETE FROM items",
                Some(&params),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = executor
            .query("SELECT * FROM items; SELECT 1", None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = executor.execute_non_query("  -- nothing\n", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(count(&executor), 0);
    }

    #[test]
    fn unbound_placeholders_are_rejected() {
        let (executor, _file) = temp_executor();
        let err = executor
            .execute_non_query(
                "INSERT INTO items (name, qty) VALUES (:name, :qty)",
                Some(&Params::new().with_value("name", "a")),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains(":qty"));

        let err = executor
            .execute_non_query("INSERT INTO items (name) VALUES (:name)", None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = executor
            .query("SELECT * FROM items WHERE name = :name", Some(&Params::new()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(count(&executor), 0);
    }

    #[test]
    fn empty_batch_is_rejected_before_connecting() {
        let executor = Executor::new(SqliteConfig::new("/nonexistent/dir/db.sqlite"));
        let err = executor.execute_non_query_batch::<&str>(&[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let template = crate::statement::select_all("items").unwrap();
        let err = executor.execute_template_batch(&template, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn unreachable_database_is_a_connectivity_error() {
        let executor = Executor::new(SqliteConfig::new("/nonexistent/dir/db.sqlite"));
        let err = executor.query("SELECT 1", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connectivity);
    }

    #[test]
    fn rejected_sql_is_a_statement_error() {
        let (executor, _file) = temp_executor();
        let err = executor.execute_non_query("SELEC nothing", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Statement);
        assert!(err.to_string().contains("SELEC nothing"));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: SqliteConfig =
            serde_json::from_str(r#"{ "db_path": "app.db", "read_only": true }"#).unwrap();
        assert_eq!(config.db_path, "app.db");
        assert_eq!(config.busy_timeout_ms, 5_000);
        assert!(config.foreign_keys);
        assert!(config.read_only);
    }
}
