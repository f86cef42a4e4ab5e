//! Conversion between [`FieldValue`] and SQLite values.

use rusqlite::types::{Value, ValueRef};
use rusqlite::Row;

use versiondb_core::FieldValue;

pub fn to_sql(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Integer(v) => Value::Integer(*v),
        FieldValue::Float(v) => Value::Real(*v),
        FieldValue::Text(v) => Value::Text(v.clone()),
        FieldValue::Bytes(v) => Value::Blob(v.clone()),
    }
}

pub fn from_sql(value: ValueRef<'_>) -> FieldValue {
    match value {
        ValueRef::Null => FieldValue::Null,
        ValueRef::Integer(v) => FieldValue::Integer(v),
        ValueRef::Real(v) => FieldValue::Float(v),
        ValueRef::Text(v) => FieldValue::Text(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => FieldValue::Bytes(v.to_vec()),
    }
}

/// Reads `count` consecutive columns starting at `start`.
pub fn read_values(row: &Row<'_>, start: usize, count: usize) -> rusqlite::Result<Vec<FieldValue>> {
    (start..start + count)
        .map(|idx| row.get_ref(idx).map(from_sql))
        .collect()
}

pub fn to_sql_all(values: &[FieldValue]) -> Vec<Value> {
    values.iter().map(to_sql).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn values_survive_a_sqlite_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let conn = Connection::open_in_memory()?;
        let values = vec![
            FieldValue::Null,
            FieldValue::Integer(42),
            FieldValue::Float(1.5),
            FieldValue::Text("lot".into()),
            FieldValue::Bytes(vec![0, 1, 2]),
        ];
        let read = conn.query_row(
            "SELECT ?1, ?2, ?3, ?4, ?5",
            rusqlite::params_from_iter(to_sql_all(&values)),
            |row| read_values(row, 0, 5),
        )?;
        assert_eq!(read, values);
        Ok(())
    }
}
