//! SQL statement construction.
//!
//! Table and column names come from validated schemas and are always quoted.
//! Caller-supplied filter and order fragments are appended verbatim as the
//! body of their `WHERE` / `ORDER BY` clause and are *not* parameterized;
//! keeping untrusted input out of them is the caller's job.
//!
//! Pagination without an order clause returns rows in whatever order the
//! database produces, which may differ between pages.

use crate::error::InvalidQueryError;
use crate::schema::{FieldDescriptor, OBJECT_ID_COLUMN};
use crate::sqlite::{quote_ident, ColumnDefinition, Params, SqlQuery};
use std::fmt::Write;

/// One page of results: `size` rows starting at row `index * size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub index: i64,
    pub size: i64,
}

impl Page {
    pub fn new(index: i64, size: i64) -> Self {
        Self { index, size }
    }

    /// Row offset of this page, after validating both inputs.
    pub fn offset(&self) -> Result<i64, InvalidQueryError> {
        if self.index < 0 {
            return Err(InvalidQueryError::NegativePageIndex(self.index));
        }
        if self.size <= 0 {
            return Err(InvalidQueryError::NonPositivePageSize(self.size));
        }
        self.index
            .checked_mul(self.size)
            .ok_or(InvalidQueryError::OffsetOverflow {
                index: self.index,
                size: self.size,
            })
    }
}

/// Filter, order and pagination for a fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuerySpec {
    filter: Option<String>,
    order: Option<String>,
    page: Option<Page>,
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict rows with a `WHERE` body. Blank filters are ignored.
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = clause(filter.into());
        self
    }

    /// Order rows with an `ORDER BY` body. Blank orders are ignored.
    pub fn order_by(mut self, order: impl Into<String>) -> Self {
        self.order = clause(order.into());
        self
    }

    /// Return only page `index` (from 0) of `size` rows.
    pub fn paginate(mut self, index: i64, size: i64) -> Self {
        self.page = Some(Page::new(index, size));
        self
    }

    pub fn filter_clause(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    pub fn order_clause(&self) -> Option<&str> {
        self.order.as_deref()
    }

    pub fn page(&self) -> Option<Page> {
        self.page
    }
}

fn clause(fragment: String) -> Option<String> {
    let trimmed = fragment.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn where_clause(sql: &mut String, spec: &QuerySpec) {
    if let Some(filter) = &spec.filter {
        let _ = write!(sql, " WHERE {filter}");
    }
}

fn order_clause(sql: &mut String, spec: &QuerySpec) {
    if let Some(order) = &spec.order {
        let _ = write!(sql, " ORDER BY {order}");
    }
}

fn id_predicate() -> String {
    format!("{} = ?1", quote_ident(OBJECT_ID_COLUMN))
}

/// `SELECT * FROM <table> [WHERE ..] [ORDER BY ..] [LIMIT .. OFFSET ..]`
pub fn select_all(table: &str, spec: &QuerySpec) -> Result<SqlQuery, InvalidQueryError> {
    let mut sql = format!("SELECT * FROM {}", quote_ident(table));
    where_clause(&mut sql, spec);
    order_clause(&mut sql, spec);
    if let Some(page) = spec.page {
        let offset = page.offset()?;
        let _ = write!(sql, " LIMIT {} OFFSET {offset}", page.size);
    }
    Ok(SqlQuery::new(sql))
}

/// Like [`select_all`] limited to one row; any pagination is dropped.
pub fn select_one(table: &str, spec: &QuerySpec) -> SqlQuery {
    let mut sql = format!("SELECT * FROM {}", quote_ident(table));
    where_clause(&mut sql, spec);
    order_clause(&mut sql, spec);
    sql.push_str(" LIMIT 1");
    SqlQuery::new(sql)
}

/// Select the row with the given identifier.
pub fn select_by_id(table: &str, object_id: &str) -> SqlQuery {
    SqlQuery::new(format!(
        "SELECT * FROM {} WHERE {}",
        quote_ident(table),
        id_predicate()
    ))
    .with_params(Params::new().with_value(object_id))
}

/// `SELECT COUNT(*) FROM <table> [WHERE ..]`; order and pagination are ignored.
pub fn count(table: &str, spec: &QuerySpec) -> SqlQuery {
    let mut sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
    where_clause(&mut sql, spec);
    SqlQuery::new(sql)
}

/// Count of rows carrying the given identifier, 0 or 1.
pub fn exists(table: &str, object_id: &str) -> SqlQuery {
    SqlQuery::new(format!(
        "SELECT COUNT(*) FROM {} WHERE {}",
        quote_ident(table),
        id_predicate()
    ))
    .with_params(Params::new().with_value(object_id))
}

/// Insert one row. `params` holds the identifier followed by one value per field.
pub fn insert(table: &str, fields: &[FieldDescriptor], params: Params) -> SqlQuery {
    let mut columns = vec![quote_ident(OBJECT_ID_COLUMN)];
    columns.extend(fields.iter().map(|f| quote_ident(f.name)));
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    SqlQuery::new(format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        columns.join(", "),
        placeholders.join(", ")
    ))
    .with_params(params)
}

/// Update every field of one row. `params` holds the identifier followed by
/// one value per field.
pub fn update(table: &str, fields: &[FieldDescriptor], params: Params) -> SqlQuery {
    let assignments: Vec<String> = fields
        .iter()
        .enumerate()
        .map(|(i, f)| format!("{} = ?{}", quote_ident(f.name), i + 2))
        .collect();
    SqlQuery::new(format!(
        "UPDATE {} SET {} WHERE {}",
        quote_ident(table),
        assignments.join(", "),
        id_predicate()
    ))
    .with_params(params)
}

pub fn delete(table: &str, object_id: &str) -> SqlQuery {
    SqlQuery::new(format!(
        "DELETE FROM {} WHERE {}",
        quote_ident(table),
        id_predicate()
    ))
    .with_params(Params::new().with_value(object_id))
}

/// Remove every row of the table.
pub fn truncate(table: &str) -> SqlQuery {
    SqlQuery::new(format!("DELETE FROM {}", quote_ident(table)))
}

pub fn drop_table(table: &str) -> SqlQuery {
    SqlQuery::new(format!("DROP TABLE IF EXISTS {}", quote_ident(table)))
}

pub fn add_column(table: &str, column: &ColumnDefinition) -> SqlQuery {
    SqlQuery::new(format!(
        "ALTER TABLE {} ADD COLUMN {}",
        quote_ident(table),
        column.to_sql()
    ))
}

/// One row per existing column; the column name is in `name`.
pub fn table_info(table: &str) -> SqlQuery {
    SqlQuery::new(format!("PRAGMA table_info({})", quote_ident(table)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ValueKind;
    use crate::sqlite::{DataType, Value};

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor { name: "title", kind: ValueKind::Text },
            FieldDescriptor { name: "done", kind: ValueKind::Boolean },
        ]
    }

    #[test]
    fn select_all_without_clauses() {
        let query = select_all("Task", &QuerySpec::new()).unwrap();
        assert_eq!(query.statement, "SELECT * FROM \"Task\"");
        assert!(query.params.is_empty());
    }

    #[test]
    fn select_all_with_every_clause() {
        let spec = QuerySpec::new()
            .filter("done = 0")
            .order_by("title DESC")
            .paginate(2, 25);
        let query = select_all("Task", &spec).unwrap();
        assert_eq!(
            query.statement,
            "SELECT * FROM \"Task\" WHERE done = 0 ORDER BY title DESC LIMIT 25 OFFSET 50"
        );
    }

    #[test]
    fn blank_clauses_are_omitted() {
        let spec = QuerySpec::new().filter("   ").order_by("");
        assert_eq!(spec.filter_clause(), None);
        assert_eq!(spec.order_clause(), None);
        let query = select_all("Task", &spec).unwrap();
        assert_eq!(query.statement, "SELECT * FROM \"Task\"");
    }

    #[test]
    fn first_page_has_zero_offset() {
        let query = select_all("Task", &QuerySpec::new().paginate(0, 10)).unwrap();
        assert_eq!(query.statement, "SELECT * FROM \"Task\" LIMIT 10 OFFSET 0");
    }

    #[test]
    fn negative_page_index_is_rejected() {
        let err = select_all("Task", &QuerySpec::new().paginate(-1, 10)).unwrap_err();
        assert_eq!(err, InvalidQueryError::NegativePageIndex(-1));
    }

    #[test]
    fn non_positive_page_size_is_rejected() {
        let err = select_all("Task", &QuerySpec::new().paginate(0, 0)).unwrap_err();
        assert_eq!(err, InvalidQueryError::NonPositivePageSize(0));
        let err = select_all("Task", &QuerySpec::new().paginate(3, -5)).unwrap_err();
        assert_eq!(err, InvalidQueryError::NonPositivePageSize(-5));
    }

    #[test]
    fn overflowing_offset_is_rejected() {
        let err = select_all("Task", &QuerySpec::new().paginate(i64::MAX, 2)).unwrap_err();
        assert!(matches!(err, InvalidQueryError::OffsetOverflow { .. }));
    }

    #[test]
    fn select_one_replaces_pagination_with_limit_one() {
        let spec = QuerySpec::new().filter("done = 1").paginate(4, 10);
        let query = select_one("Task", &spec);
        assert_eq!(query.statement, "SELECT * FROM \"Task\" WHERE done = 1 LIMIT 1");
    }

    #[test]
    fn select_by_id_binds_identifier() {
        let query = select_by_id("Task", "abc");
        assert_eq!(query.statement, "SELECT * FROM \"Task\" WHERE \"objectID\" = ?1");
        assert_eq!(query.params.values, vec![Value::Text("abc".to_string())]);
    }

    #[test]
    fn count_ignores_order_and_pagination() {
        let spec = QuerySpec::new().filter("done = 1").order_by("title").paginate(1, 5);
        assert_eq!(
            count("Task", &spec).statement,
            "SELECT COUNT(*) FROM \"Task\" WHERE done = 1"
        );
        assert_eq!(count("Task", &QuerySpec::new()).statement, "SELECT COUNT(*) FROM \"Task\"");
    }

    #[test]
    fn insert_lists_identifier_first() {
        let params = Params::new().with_value("id-1").with_value("write").with_value(false);
        let query = insert("Task", &fields(), params.clone());
        assert_eq!(
            query.statement,
            "INSERT INTO \"Task\" (\"objectID\", \"title\", \"done\") VALUES (?1, ?2, ?3)"
        );
        assert_eq!(query.params, params);
    }

    #[test]
    fn update_keys_on_first_parameter() {
        let params = Params::new().with_value("id-1").with_value("write").with_value(true);
        let query = update("Task", &fields(), params);
        assert_eq!(
            query.statement,
            "UPDATE \"Task\" SET \"title\" = ?2, \"done\" = ?3 WHERE \"objectID\" = ?1"
        );
    }

    #[test]
    fn delete_and_truncate_shapes() {
        assert_eq!(
            delete("Task", "id-1").statement,
            "DELETE FROM \"Task\" WHERE \"objectID\" = ?1"
        );
        assert_eq!(truncate("Task").statement, "DELETE FROM \"Task\"");
        assert_eq!(drop_table("Task").statement, "DROP TABLE IF EXISTS \"Task\"");
    }

    #[test]
    fn add_column_renders_definition() {
        let column = ColumnDefinition::new("due", DataType::Integer);
        assert_eq!(
            add_column("Task", &column).statement,
            "ALTER TABLE \"Task\" ADD COLUMN \"due\" INTEGER"
        );
    }
}
