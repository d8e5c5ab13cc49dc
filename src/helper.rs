//! The public CRUD surface.

use crate::error::{Error, Result};
use crate::executor::{ConnectionProvider, Executor};
use crate::mapper::{map_first, map_rows};
use crate::model::{describe, Model};
use crate::statement::{self, Operation};
use crate::value::{Params, Table, Value};

/// Typed CRUD helper over a [`ConnectionProvider`].
///
/// Holds no state besides the provider; every call opens and releases its
/// own connection.
#[derive(Debug, Clone)]
pub struct SqlHelper<P> {
    executor: Executor<P>,
}

impl<P: ConnectionProvider> SqlHelper<P> {
    pub fn new(provider: P) -> Self {
        Self {
            executor: Executor::new(provider),
        }
    }

    pub fn executor(&self) -> &Executor<P> {
        &self.executor
    }

    pub fn execute_non_query(&self, sql: &str, params: Option<&Params>) -> Result<usize> {
        self.executor.execute_non_query(sql, params)
    }

    /// Runs all `queries` in one transaction; see
    /// [`Executor::execute_non_query_batch`].
    pub fn execute_non_query_batch<S: AsRef<str>>(&self, queries: &[S]) -> Result<usize> {
        self.executor.execute_non_query_batch(queries)
    }

    pub fn select(&self, sql: &str, params: Option<&Params>) -> Result<Table> {
        self.executor.query(sql, params)
    }

    pub fn select_as<T: Model>(&self, sql: &str, params: Option<&Params>) -> Result<Vec<T>> {
        let table = self.select(sql, params)?;
        map_rows(&table, sql)
    }

    pub fn insert_model<T: Model>(&self, model: &T, table: &str) -> Result<usize> {
        let template = statement::build(Operation::Insert, table, &describe::<T>(), None)?;
        let params = template.bind(model);
        self.executor.execute_non_query(template.sql(), Some(&params))
    }

    /// Inserts all `models` atomically; one failing row rolls back the rest.
    pub fn insert_models<T: Model>(&self, models: &[T], table: &str) -> Result<usize> {
        if models.is_empty() {
            return Err(Error::validation("models must not be empty"));
        }

        let template = statement::build(Operation::Insert, table, &describe::<T>(), None)?;
        let rows: Vec<Params> = models.iter().map(|model| template.bind(model)).collect();
        self.executor.execute_template_batch(&template, &rows)
    }

    pub fn get_all_models<T: Model>(&self, table: &str) -> Result<Vec<T>> {
        let template = statement::build(Operation::SelectAll, table, &describe::<T>(), None)?;
        let result = self.executor.query(template.sql(), None)?;
        map_rows(&result, table)
    }

    /// First row whose `id_column` equals `id`, if any.
    pub fn find_model_by_id<T: Model>(
        &self,
        table: &str,
        id_column: &str,
        id: impl Into<Value>,
    ) -> Result<Option<T>> {
        let template =
            statement::build(Operation::SelectWhere, table, &describe::<T>(), Some(id_column))?;
        let params = template.bind_key(id);
        let result = self.executor.query(template.sql(), Some(&params))?;
        map_first(&result, table)
    }

    /// Like [`find_model_by_id`](Self::find_model_by_id), but an unmatched id
    /// yields `T::default()`.
    pub fn get_model_by_id<T: Model>(
        &self,
        table: &str,
        id_column: &str,
        id: impl Into<Value>,
    ) -> Result<T> {
        Ok(self
            .find_model_by_id(table, id_column, id)?
            .unwrap_or_default())
    }

    pub fn update_model<T: Model>(&self, model: &T, table: &str, id_column: &str) -> Result<usize> {
        let template =
            statement::build(Operation::Update, table, &describe::<T>(), Some(id_column))?;
        let params = template.bind(model);
        self.executor.execute_non_query(template.sql(), Some(&params))
    }

    pub fn delete_model(
        &self,
        table: &str,
        id_column: &str,
        id: impl Into<Value>,
    ) -> Result<usize> {
        let template = statement::build(Operation::Delete, table, &[], Some(id_column))?;
        let params = template.bind_key(id);
        self.executor.execute_non_query(template.sql(), Some(&params))
    }
}
