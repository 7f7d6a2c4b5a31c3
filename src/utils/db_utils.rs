use crate::error::AppError;
use crate::utils::response::{Page, Paginated};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::mysql::MySqlRow;
use sqlx::{FromRow, MySql, MySqlPool, QueryBuilder};

/// ===============================
/// SQL bindable value enum
/// ===============================
#[derive(Debug, PartialEq)]
pub enum SqlValue {
    String(String),
    U64(u64),
    I64(i64),
    F64(f64),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Timestamp(DateTime<Utc>),
    Null,
}

macro_rules! sql_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {$(
        impl From<$ty> for SqlValue {
            fn from(v: $ty) -> Self {
                SqlValue::$variant(v)
            }
        }
    )*};
}

sql_value_from!(
    String => String,
    u64 => U64,
    i64 => I64,
    f64 => F64,
    bool => Bool,
    NaiveDate => Date,
    DateTime<Utc> => Timestamp,
);

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::String(v.to_string())
    }
}

/// ===============================
/// SQL update container
/// ===============================
#[derive(Debug)]
pub struct SqlUpdate {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

/// ===============================
/// Build a partial UPDATE from a JSON object
/// ===============================
///
/// Only keys listed in `allowed` may appear; anything else is a 400 so column
/// names never come from the client unchecked.
pub fn build_update_sql(
    table: &str,
    payload: &Value,
    allowed: &[&str],
    id_column: &str,
    id_value: u64,
) -> Result<SqlUpdate, AppError> {
    let obj = payload
        .as_object()
        .ok_or_else(|| AppError::validation("Payload must be a JSON object"))?;

    if obj.is_empty() {
        return Err(AppError::validation("No fields provided for update"));
    }

    if let Some(bad) = obj.keys().find(|k| !allowed.contains(&k.as_str())) {
        return Err(AppError::validation(format!("Field `{bad}` cannot be updated")));
    }

    let set_clause = obj
        .keys()
        .map(|k| format!("{} = ?", k))
        .collect::<Vec<_>>()
        .join(", ");

    let sql = format!("UPDATE {} SET {} WHERE {} = ?", table, set_clause, id_column);

    let mut values = Vec::with_capacity(obj.len() + 1);

    for value in obj.values() {
        match value {
            Value::String(s) => {
                if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                    values.push(SqlValue::Date(d));
                } else if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
                    values.push(SqlValue::DateTime(dt));
                } else {
                    values.push(SqlValue::String(s.clone()));
                }
            }
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    values.push(SqlValue::U64(u));
                } else if let Some(i) = n.as_i64() {
                    values.push(SqlValue::I64(i));
                } else if let Some(f) = n.as_f64() {
                    values.push(SqlValue::F64(f));
                }
            }
            Value::Bool(b) => values.push(SqlValue::Bool(*b)),
            Value::Null => values.push(SqlValue::Null),
            _ => return Err(AppError::validation("Unsupported JSON value type")),
        }
    }

    values.push(SqlValue::U64(id_value));

    Ok(SqlUpdate { sql, values })
}

/// ===============================
/// Execute the update
/// ===============================
pub async fn execute_update(pool: &MySqlPool, update: SqlUpdate) -> Result<u64, sqlx::Error> {
    let mut query = sqlx::query(&update.sql);

    for value in update.values {
        query = match value {
            SqlValue::String(v) => query.bind(v),
            SqlValue::U64(v) => query.bind(v),
            SqlValue::I64(v) => query.bind(v),
            SqlValue::F64(v) => query.bind(v),
            SqlValue::Bool(v) => query.bind(v),
            SqlValue::Date(v) => query.bind(v),
            SqlValue::DateTime(v) => query.bind(v),
            SqlValue::Timestamp(v) => query.bind(v),
            SqlValue::Null => query.bind(None::<String>),
        };
    }

    let result = query.execute(pool).await?;
    Ok(result.rows_affected())
}

fn push_value(qb: &mut QueryBuilder<'_, MySql>, value: &SqlValue) {
    match value {
        SqlValue::String(v) => qb.push_bind(v.clone()),
        SqlValue::U64(v) => qb.push_bind(*v),
        SqlValue::I64(v) => qb.push_bind(*v),
        SqlValue::F64(v) => qb.push_bind(*v),
        SqlValue::Bool(v) => qb.push_bind(*v),
        SqlValue::Date(v) => qb.push_bind(*v),
        SqlValue::DateTime(v) => qb.push_bind(*v),
        SqlValue::Timestamp(v) => qb.push_bind(*v),
        SqlValue::Null => qb.push_bind(None::<String>),
    };
}

/// ===============================
/// WHERE clause for list endpoints
/// ===============================
///
/// Each condition is a SQL fragment with `?` placeholders and the values for
/// them, in order. Column names are always written by the caller, never taken
/// from the request.
#[derive(Debug, Default)]
pub struct Filter {
    conditions: Vec<(String, Vec<SqlValue>)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn and(&mut self, sql: impl Into<String>, values: Vec<SqlValue>) -> &mut Self {
        self.conditions.push((sql.into(), values));
        self
    }

    pub fn eq(&mut self, column: &str, value: impl Into<SqlValue>) -> &mut Self {
        self.and(format!("{column} = ?"), vec![value.into()])
    }

    pub fn eq_opt<V: Into<SqlValue>>(&mut self, column: &str, value: Option<V>) -> &mut Self {
        if let Some(value) = value {
            self.eq(column, value);
        }
        self
    }

    /// Case-insensitive substring match against any of `columns`.
    pub fn search(&mut self, columns: &[&str], term: Option<&str>) -> &mut Self {
        let Some(term) = term.map(str::trim).filter(|t| !t.is_empty()) else {
            return self;
        };
        let like = format!("%{}%", term.to_lowercase());
        let sql = columns
            .iter()
            .map(|c| format!("LOWER({c}) LIKE ?"))
            .collect::<Vec<_>>()
            .join(" OR ");
        let values = columns.iter().map(|_| SqlValue::from(like.as_str())).collect();
        self.and(format!("({sql})"), values)
    }

    pub fn push_where(&self, qb: &mut QueryBuilder<'_, MySql>) {
        for (i, (sql, values)) in self.conditions.iter().enumerate() {
            qb.push(if i == 0 { " WHERE " } else { " AND " });

            let mut parts = sql.split('?');
            if let Some(head) = parts.next() {
                qb.push(head);
            }
            for (part, value) in parts.zip(values) {
                push_value(qb, value);
                qb.push(part);
            }
        }
    }
}

/// Runs the count and page queries for `select` (a `SELECT ... FROM ...` without WHERE).
pub async fn fetch_page<T>(
    pool: &MySqlPool,
    select: &str,
    from: &str,
    filter: &Filter,
    order_by: &str,
    page: Page,
) -> Result<Paginated<T>, sqlx::Error>
where
    T: for<'r> FromRow<'r, MySqlRow> + Serialize + Send + Unpin,
{
    let mut count = QueryBuilder::<MySql>::new(format!("SELECT COUNT(*) FROM {from}"));
    filter.push_where(&mut count);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut data = QueryBuilder::<MySql>::new(format!("SELECT {select} FROM {from}"));
    filter.push_where(&mut data);
    data.push(format!(" ORDER BY {order_by} LIMIT "))
        .push_bind(page.limit())
        .push(" OFFSET ")
        .push_bind(page.offset());

    let items = data.build_query_as::<T>().fetch_all(pool).await?;
    Ok(Paginated::new(items, page, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BATCH_FIELDS: &[&str] = &["name", "fee", "end_date", "is_active"];

    #[test]
    fn builds_set_clause_with_id_bound_last() {
        let update = build_update_sql(
            "batches",
            &json!({"name": "FS-EVE", "fee": 42000.5, "end_date": "2026-07-01", "is_active": false}),
            BATCH_FIELDS,
            "id",
            3,
        )
        .unwrap();

        assert!(update.sql.starts_with("UPDATE batches SET "));
        assert!(update.sql.ends_with(" WHERE id = ?"));
        assert_eq!(update.values.len(), 5);
        assert!(update.values.contains(&SqlValue::F64(42000.5)));
        assert!(update.values.contains(&SqlValue::Date(
            NaiveDate::from_ymd_opt(2026, 7, 1).unwrap()
        )));
        assert_eq!(update.values.last(), Some(&SqlValue::U64(3)));
    }

    #[test]
    fn unknown_column_is_rejected() {
        let err = build_update_sql(
            "batches",
            &json!({"name": "x", "id = 1; DROP TABLE batches; --": 1}),
            BATCH_FIELDS,
            "id",
            3,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn filter_binds_in_placeholder_order() {
        let mut filter = Filter::new();
        filter
            .eq("batch_id", 4u64)
            .eq_opt::<u64>("faculty_id", None)
            .search(&["full_name", "username"], Some(" Asha "))
            .and("scheduled_start >= ?", vec![SqlValue::from("2026-03-02")]);

        let mut qb = QueryBuilder::<MySql>::new("SELECT id FROM sessions");
        filter.push_where(&mut qb);
        assert_eq!(
            qb.sql(),
            "SELECT id FROM sessions WHERE batch_id = ? AND \
             (LOWER(full_name) LIKE ? OR LOWER(username) LIKE ?) AND scheduled_start >= ?"
        );
    }

    #[test]
    fn empty_filter_adds_nothing() {
        let mut filter = Filter::new();
        filter.search(&["name"], Some("   "));
        let mut qb = QueryBuilder::<MySql>::new("SELECT id FROM batches");
        filter.push_where(&mut qb);
        assert_eq!(qb.sql(), "SELECT id FROM batches");
    }

    #[test]
    fn empty_or_non_object_payload_is_rejected() {
        assert!(build_update_sql("batches", &json!({}), BATCH_FIELDS, "id", 1).is_err());
        assert!(build_update_sql("batches", &json!([1, 2]), BATCH_FIELDS, "id", 1).is_err());
        assert!(
            build_update_sql("batches", &json!({"name": {"nested": true}}), BATCH_FIELDS, "id", 1)
                .is_err()
        );
    }
}
