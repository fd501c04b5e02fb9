//! Conversion between result rows and entities.
//!
//! Columns are matched by name, ignoring ASCII case, so column order in the
//! table does not matter. Extra columns are ignored and missing or NULL
//! columns leave the field at its zero value, which keeps older tables
//! readable after fields are added.

use crate::error::StorageError;
use crate::schema::{Model, Schema, ValueKind, OBJECT_ID_COLUMN};
use crate::sqlite::{Params, Row, Value};
use crate::store::Entity;
use tracing::warn;

fn column<'r>(row: &'r Row, name: &str) -> Option<&'r Value> {
    row.get(name).or_else(|| {
        row.iter()
            .find(|(column, _)| column.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

/// Convert a stored value to `kind`.
///
/// Returns `None` when the value has no sensible reading as that kind.
/// NULL converts to the kind's zero value.
pub fn convert(value: Value, kind: ValueKind) -> Option<Value> {
    if value.is_null() {
        return Some(kind.zero_value());
    }
    match kind {
        ValueKind::Text => match value {
            Value::Text(s) | Value::Reference(s) => Some(Value::Text(s)),
            Value::Integer(i) => Some(Value::Text(i.to_string())),
            Value::Real(f) => Some(Value::Text(f.to_string())),
            Value::Blob(b) => String::from_utf8(b).ok().map(Value::Text),
            _ => None,
        },
        ValueKind::Integer => match value {
            Value::Integer(i) => Some(Value::Integer(i)),
            Value::Boolean(b) => Some(Value::Integer(i64::from(b))),
            Value::Real(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                Some(Value::Integer(f as i64))
            }
            Value::Text(s) => s.trim().parse().ok().map(Value::Integer),
            _ => None,
        },
        ValueKind::Real => match value {
            Value::Real(f) => Some(Value::Real(f)),
            Value::Integer(i) => Some(Value::Real(i as f64)),
            Value::Text(s) => s.trim().parse().ok().map(Value::Real),
            _ => None,
        },
        ValueKind::Boolean => match value {
            Value::Boolean(b) => Some(Value::Boolean(b)),
            Value::Integer(i) => Some(Value::Boolean(i != 0)),
            Value::Real(f) => Some(Value::Boolean(f != 0.0)),
            Value::Text(s) => parse_bool(&s).map(Value::Boolean),
            _ => None,
        },
        ValueKind::Blob => match value {
            Value::Blob(b) => Some(Value::Blob(b)),
            Value::Text(s) => Some(Value::Blob(s.into_bytes())),
            _ => None,
        },
        ValueKind::Reference => match value {
            Value::Text(s) | Value::Reference(s) => Some(Value::Reference(s)),
            Value::Integer(i) => Some(Value::Reference(i.to_string())),
            _ => None,
        },
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("true") {
        Some(true)
    } else if text.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        text.parse::<i64>().ok().map(|i| i != 0)
    }
}

/// Build an entity from one result row.
pub fn materialize<M: Model>(schema: &Schema<M>, row: &Row) -> Result<Entity<M>, StorageError> {
    let object_id = match column(row, OBJECT_ID_COLUMN) {
        Some(Value::Text(id)) if !id.is_empty() => id.clone(),
        Some(Value::Integer(id)) => id.to_string(),
        _ => {
            return Err(StorageError::new(
                "materialize",
                format!("row from `{}` has no {OBJECT_ID_COLUMN}", schema.table_name()),
            ))
        }
    };

    let mut model = M::default();
    for field in schema.fields() {
        let kind = field.kind();
        let value = match column(row, field.name()) {
            Some(raw) => convert(raw.clone(), kind).unwrap_or_else(|| {
                warn!(
                    table = schema.table_name(),
                    column = field.name(),
                    ?kind,
                    "stored value does not convert, using zero value"
                );
                kind.zero_value()
            }),
            None => kind.zero_value(),
        };
        field.write(&mut model, value);
    }
    Ok(Entity::from_parts(object_id, model))
}

/// Bind values for an insert or update: the identifier, then every field in
/// declared order.
pub fn bind_values<M: Model>(schema: &Schema<M>, entity: &Entity<M>) -> Params {
    let mut params = Params::new().with_value(entity.object_id());
    for field in schema.fields() {
        params.push(field.read(entity.model()));
    }
    params
}
