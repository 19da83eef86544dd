use chrono::NaiveDate;
use serde_json::Value;
use sqlx::postgres::PgArguments;
use sqlx::query::{QueryAs, QueryScalar};
use sqlx::{Executor, Postgres};

use crate::error::ApiError;

/// How a JSON payload value is coerced before binding.
#[derive(Debug, Clone, Copy)]
pub enum ColumnKind {
    Text,
    /// Text restricted to a fixed set of values.
    OneOf(&'static [&'static str]),
    /// Non-negative amount.
    Money,
    Id,
    Bool,
    Date,
}

/// A column a partial update is allowed to touch.
#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub nullable: bool,
}

impl Column {
    pub const fn required(name: &'static str, kind: ColumnKind) -> Self {
        Self {
            name,
            kind,
            nullable: false,
        }
    }

    pub const fn optional(name: &'static str, kind: ColumnKind) -> Self {
        Self {
            name,
            kind,
            nullable: true,
        }
    }
}

/// SQL bindable value
#[derive(Debug, PartialEq)]
pub enum SqlValue {
    Text(Option<String>),
    F64(Option<f64>),
    I64(Option<i64>),
    Bool(Option<bool>),
    Date(Option<NaiveDate>),
}

#[derive(Debug)]
pub struct SqlUpdate {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

/// Builds `UPDATE <table> SET a = $1, b = $2, updated_at = NOW() WHERE <id> = $n`
/// from a JSON object, accepting only the columns listed in `allowed`.
pub fn build_update_sql(
    table: &str,
    payload: &Value,
    allowed: &[Column],
    id_column: &str,
    id_value: i64,
) -> Result<SqlUpdate, ApiError> {
    let obj = payload
        .as_object()
        .ok_or_else(|| ApiError::bad_request("يجب أن تكون البيانات كائن JSON"))?;

    if obj.is_empty() {
        return Err(ApiError::bad_request("لم يتم تقديم أي حقول للتحديث"));
    }

    let mut assignments = Vec::with_capacity(obj.len() + 1);
    let mut values = Vec::with_capacity(obj.len() + 1);

    for (key, value) in obj {
        let column = allowed
            .iter()
            .find(|c| c.name == key.as_str())
            .ok_or_else(|| ApiError::bad_request(format!("الحقل غير قابل للتعديل: {}", key)))?;

        values.push(coerce(column, value)?);
        assignments.push(format!("{} = ${}", column.name, values.len()));
    }

    assignments.push("updated_at = NOW()".to_string());
    values.push(SqlValue::I64(Some(id_value)));

    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ${}",
        table,
        assignments.join(", "),
        id_column,
        values.len()
    );

    Ok(SqlUpdate { sql, values })
}

fn coerce(column: &Column, value: &Value) -> Result<SqlValue, ApiError> {
    let invalid = || ApiError::bad_request(format!("قيمة غير صالحة للحقل: {}", column.name));

    if value.is_null() {
        if !column.nullable {
            return Err(ApiError::bad_request(format!("الحقل مطلوب: {}", column.name)));
        }
        return Ok(match column.kind {
            ColumnKind::Text | ColumnKind::OneOf(_) => SqlValue::Text(None),
            ColumnKind::Money => SqlValue::F64(None),
            ColumnKind::Id => SqlValue::I64(None),
            ColumnKind::Bool => SqlValue::Bool(None),
            ColumnKind::Date => SqlValue::Date(None),
        });
    }

    match column.kind {
        ColumnKind::Text => {
            let s = value.as_str().ok_or_else(invalid)?.trim();
            if s.is_empty() && !column.nullable {
                return Err(invalid());
            }
            Ok(SqlValue::Text(if s.is_empty() { None } else { Some(s.to_string()) }))
        }
        ColumnKind::OneOf(options) => {
            let s = value.as_str().ok_or_else(invalid)?;
            if !options.contains(&s) {
                return Err(invalid());
            }
            Ok(SqlValue::Text(Some(s.to_string())))
        }
        ColumnKind::Money => {
            let n = value.as_f64().filter(|n| n.is_finite() && *n >= 0.0).ok_or_else(invalid)?;
            Ok(SqlValue::F64(Some(n)))
        }
        ColumnKind::Id => Ok(SqlValue::I64(Some(value.as_i64().ok_or_else(invalid)?))),
        ColumnKind::Bool => Ok(SqlValue::Bool(Some(value.as_bool().ok_or_else(invalid)?))),
        ColumnKind::Date => {
            let s = value.as_str().ok_or_else(invalid)?;
            let d = NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| invalid())?;
            Ok(SqlValue::Date(Some(d)))
        }
    }
}

/// Executes the update on a pool or an open transaction, returning the number of rows touched.
pub async fn execute_update<'e, E>(executor: E, update: SqlUpdate) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let mut query = sqlx::query(&update.sql);

    for value in update.values {
        query = match value {
            SqlValue::Text(v) => query.bind(v),
            SqlValue::F64(v) => query.bind(v),
            SqlValue::I64(v) => query.bind(v),
            SqlValue::Bool(v) => query.bind(v),
            SqlValue::Date(v) => query.bind(v),
        };
    }

    let result = query.execute(executor).await?;
    Ok(result.rows_affected())
}

/// Value bound to a list filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    I64(i64),
    Bool(bool),
    Date(NaiveDate),
}

/// Accumulates `WHERE` conditions with numbered Postgres placeholders.
#[derive(Debug, Default)]
pub struct Filters {
    conditions: Vec<String>,
    values: Vec<FilterValue>,
}

impl Filters {
    /// `template` uses `{}` where the placeholder goes, e.g. `"status = {}"`.
    pub fn push(&mut self, template: &str, value: FilterValue) -> &mut Self {
        self.values.push(value);
        let placeholder = format!("${}", self.values.len());
        self.conditions.push(template.replace("{}", &placeholder));
        self
    }

    /// Condition without a bound value.
    pub fn raw(&mut self, condition: &str) -> &mut Self {
        self.conditions.push(condition.to_string());
        self
    }

    /// Case-insensitive substring match over several columns, sharing one placeholder.
    pub fn search(&mut self, columns: &[&str], term: &str) -> &mut Self {
        let term = term.trim();
        if term.is_empty() || columns.is_empty() {
            return self;
        }
        self.values.push(FilterValue::Text(format!("%{}%", term)));
        let placeholder = format!("${}", self.values.len());
        let any = columns
            .iter()
            .map(|c| format!("{} ILIKE {}", c, placeholder))
            .collect::<Vec<_>>()
            .join(" OR ");
        self.conditions.push(format!("({})", any));
        self
    }

    pub fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.conditions.join(" AND "))
        }
    }

    /// Index of the next free placeholder, for trailing `LIMIT`/`OFFSET`.
    pub fn next_placeholder(&self) -> usize {
        self.values.len() + 1
    }

    pub fn bind_as<'q, O>(
        &self,
        mut query: QueryAs<'q, Postgres, O, PgArguments>,
    ) -> QueryAs<'q, Postgres, O, PgArguments> {
        for value in &self.values {
            query = match value.clone() {
                FilterValue::Text(v) => query.bind(v),
                FilterValue::I64(v) => query.bind(v),
                FilterValue::Bool(v) => query.bind(v),
                FilterValue::Date(v) => query.bind(v),
            };
        }
        query
    }

    pub fn bind_scalar<'q, O>(
        &self,
        mut query: QueryScalar<'q, Postgres, O, PgArguments>,
    ) -> QueryScalar<'q, Postgres, O, PgArguments> {
        for value in &self.values {
            query = match value.clone() {
                FilterValue::Text(v) => query.bind(v),
                FilterValue::I64(v) => query.bind(v),
                FilterValue::Bool(v) => query.bind(v),
                FilterValue::Date(v) => query.bind(v),
            };
        }
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const COLUMNS: &[Column] = &[
        Column::required("name", ColumnKind::Text),
        Column::optional("location", ColumnKind::Text),
        Column::required("budget_estimate", ColumnKind::Money),
        Column::required("status", ColumnKind::OneOf(&["planning", "active"])),
        Column::optional("end_date", ColumnKind::Date),
    ];

    #[test]
    fn builds_numbered_placeholders_and_touches_updated_at() {
        let update = build_update_sql(
            "projects",
            &json!({ "budget_estimate": 1500 }),
            COLUMNS,
            "id",
            9,
        )
        .unwrap();

        assert_eq!(
            update.sql,
            "UPDATE projects SET budget_estimate = $1, updated_at = NOW() WHERE id = $2"
        );
        assert_eq!(
            update.values,
            vec![SqlValue::F64(Some(1500.0)), SqlValue::I64(Some(9))]
        );
    }

    #[test]
    fn every_field_gets_its_own_placeholder() {
        let update = build_update_sql(
            "projects",
            &json!({ "name": "برج", "location": "الدمام" }),
            COLUMNS,
            "id",
            3,
        )
        .unwrap();

        assert!(update.sql.contains("name = $"));
        assert!(update.sql.contains("location = $"));
        assert!(update.sql.ends_with("WHERE id = $3"));
        assert_eq!(update.values.len(), 3);
    }

    #[test]
    fn unknown_columns_are_rejected() {
        let err = build_update_sql("projects", &json!({ "code": "X" }), COLUMNS, "id", 1)
            .unwrap_err();
        assert!(err.to_string().contains("code"));

        let injection = json!({ "name = 'x'; DROP TABLE users; --": "y" });
        assert!(build_update_sql("projects", &injection, COLUMNS, "id", 1).is_err());
    }

    #[test]
    fn empty_and_non_object_payloads_are_rejected() {
        assert!(build_update_sql("projects", &json!({}), COLUMNS, "id", 1).is_err());
        assert!(build_update_sql("projects", &json!([1, 2]), COLUMNS, "id", 1).is_err());
    }

    #[test]
    fn values_are_validated_against_their_kind() {
        let bad = [
            json!({ "budget_estimate": -5 }),
            json!({ "budget_estimate": "lots" }),
            json!({ "status": "archived" }),
            json!({ "end_date": "31/12/2024" }),
            json!({ "name": null }),
            json!({ "name": "   " }),
        ];
        for payload in bad {
            assert!(
                build_update_sql("projects", &payload, COLUMNS, "id", 1).is_err(),
                "{payload} should be rejected"
            );
        }
    }

    #[test]
    fn nullable_columns_bind_typed_nulls() {
        let date = build_update_sql("projects", &json!({ "end_date": null }), COLUMNS, "id", 1)
            .unwrap();
        assert_eq!(date.values[0], SqlValue::Date(None));

        let text = build_update_sql("projects", &json!({ "location": "" }), COLUMNS, "id", 1)
            .unwrap();
        assert_eq!(text.values[0], SqlValue::Text(None));
    }

    #[test]
    fn filters_number_placeholders_in_order() {
        let mut filters = Filters::default();
        filters
            .push("status = {}", FilterValue::Text("active".into()))
            .raw("is_voided = FALSE")
            .search(&["name", "code"], "برج")
            .push("project_id = {}", FilterValue::I64(4));

        assert_eq!(
            filters.where_clause(),
            "WHERE status = $1 AND is_voided = FALSE AND (name ILIKE $2 OR code ILIKE $2) AND project_id = $3"
        );
        assert_eq!(filters.next_placeholder(), 4);
    }

    #[test]
    fn blank_search_adds_nothing() {
        let mut filters = Filters::default();
        filters.search(&["name"], "   ");
        assert_eq!(filters.where_clause(), "");
        assert_eq!(filters.next_placeholder(), 1);
    }
}
