use crate::error::{Error, Result};
use crate::model::{describe, Model};
use crate::value::{Row, Table};

/// Converts every row of `table` into a `T`.
///
/// Only non-excluded fields are populated, and only from columns that exist
/// and hold a non-null value; everything else keeps its default. `source` names
/// the table (or query) in coercion errors.
pub fn map_rows<T: Model>(table: &Table, source: &str) -> Result<Vec<T>> {
    let columns = mapped_columns::<T>(table);

    let mut models = Vec::with_capacity(table.len());
    for row in table {
        models.push(populate(&columns, row, source)?);
    }

    tracing::trace!(
        model = std::any::type_name::<T>(),
        source,
        rows = models.len(),
        "mapped rows"
    );
    Ok(models)
}

/// Converts only the first row of `table`; later rows are never inspected.
pub fn map_first<T: Model>(table: &Table, source: &str) -> Result<Option<T>> {
    table
        .rows()
        .first()
        .map(|row| populate(&mapped_columns::<T>(table), row, source))
        .transpose()
}

/// Pairs each mapped field of `T` with its column position in `table`.
fn mapped_columns<T: Model>(table: &Table) -> Vec<(&'static str, usize)> {
    describe::<T>()
        .iter()
        .filter(|f| f.is_mapped())
        .filter_map(|f| table.column_index(f.name).map(|idx| (f.name, idx)))
        .collect()
}

fn populate<T: Model>(columns: &[(&'static str, usize)], row: &Row, source: &str) -> Result<T> {
    let mut model = T::default();
    for &(field, idx) in columns {
        let Some(value) = row.get_index(idx) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        model
            .assign(field, value)
            .map_err(|reason| Error::TypeCoercion {
                table: source.to_string(),
                field: field.to_string(),
                reason,
            })?;
    }
    Ok(model)
}
