//! Schema derivation for model types.
//!
//! A model declares its persisted shape once, as an ordered list of
//! [`Field`]s pairing a column name with an accessor and a mutator into the
//! struct. The derived [`Schema`] is cached per type for the life of the
//! process.

use crate::error::SchemaError;
use crate::sqlite::{ColumnConstraint, ColumnDefinition, DataType, TableDefinition, Value};
use once_cell::sync::Lazy;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Reserved primary-key column holding each entity's identifier.
pub const OBJECT_ID_COLUMN: &str = "objectID";

/// The kind of value a field stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Text,
    Integer,
    Real,
    Boolean,
    Blob,
    /// Identifier of another entity
    Reference,
}

impl ValueKind {
    /// Value a field of this kind holds before anything is assigned.
    pub fn zero_value(self) -> Value {
        match self {
            ValueKind::Text => Value::Text(String::new()),
            ValueKind::Integer => Value::Integer(0),
            ValueKind::Real => Value::Real(0.0),
            ValueKind::Boolean => Value::Boolean(false),
            ValueKind::Blob => Value::Blob(Vec::new()),
            ValueKind::Reference => Value::Null,
        }
    }

    pub fn data_type(self) -> DataType {
        match self {
            ValueKind::Text | ValueKind::Reference => DataType::Text,
            ValueKind::Integer | ValueKind::Boolean => DataType::Integer,
            ValueKind::Real => DataType::Real,
            ValueKind::Blob => DataType::Blob,
        }
    }
}

/// Name and kind of one persisted attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub kind: ValueKind,
}

enum Accessor<M> {
    Text(fn(&M) -> &String, fn(&mut M) -> &mut String),
    Integer(fn(&M) -> &i64, fn(&mut M) -> &mut i64),
    Real(fn(&M) -> &f64, fn(&mut M) -> &mut f64),
    Boolean(fn(&M) -> &bool, fn(&mut M) -> &mut bool),
    Blob(fn(&M) -> &Vec<u8>, fn(&mut M) -> &mut Vec<u8>),
    Reference(fn(&M) -> &Option<String>, fn(&mut M) -> &mut Option<String>),
}

/// A declared field: column name plus accessor/mutator into the model.
///
/// ```ignore
/// Field::text("name", |p: &Person| &p.name, |p: &mut Person| &mut p.name)
/// ```
pub struct Field<M> {
    name: &'static str,
    accessor: Accessor<M>,
}

impl<M> Field<M> {
    pub fn text(
        name: &'static str,
        get: fn(&M) -> &String,
        get_mut: fn(&mut M) -> &mut String,
    ) -> Self {
        Self {
            name,
            accessor: Accessor::Text(get, get_mut),
        }
    }

    pub fn integer(name: &'static str, get: fn(&M) -> &i64, get_mut: fn(&mut M) -> &mut i64) -> Self {
        Self {
            name,
            accessor: Accessor::Integer(get, get_mut),
        }
    }

    /// NaN cannot be stored; saving an entity holding one fails with a
    /// storage error.
    pub fn real(name: &'static str, get: fn(&M) -> &f64, get_mut: fn(&mut M) -> &mut f64) -> Self {
        Self {
            name,
            accessor: Accessor::Real(get, get_mut),
        }
    }

    pub fn boolean(
        name: &'static str,
        get: fn(&M) -> &bool,
        get_mut: fn(&mut M) -> &mut bool,
    ) -> Self {
        Self {
            name,
            accessor: Accessor::Boolean(get, get_mut),
        }
    }

    pub fn blob(
        name: &'static str,
        get: fn(&M) -> &Vec<u8>,
        get_mut: fn(&mut M) -> &mut Vec<u8>,
    ) -> Self {
        Self {
            name,
            accessor: Accessor::Blob(get, get_mut),
        }
    }

    /// A field holding the identifier of another entity, `None` when unset.
    pub fn reference(
        name: &'static str,
        get: fn(&M) -> &Option<String>,
        get_mut: fn(&mut M) -> &mut Option<String>,
    ) -> Self {
        Self {
            name,
            accessor: Accessor::Reference(get, get_mut),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> ValueKind {
        match self.accessor {
            Accessor::Text(..) => ValueKind::Text,
            Accessor::Integer(..) => ValueKind::Integer,
            Accessor::Real(..) => ValueKind::Real,
            Accessor::Boolean(..) => ValueKind::Boolean,
            Accessor::Blob(..) => ValueKind::Blob,
            Accessor::Reference(..) => ValueKind::Reference,
        }
    }

    pub fn descriptor(&self) -> FieldDescriptor {
        FieldDescriptor {
            name: self.name,
            kind: self.kind(),
        }
    }

    /// Current value of this field on `model`.
    pub fn read(&self, model: &M) -> Value {
        match &self.accessor {
            Accessor::Text(get, _) => Value::Text(get(model).clone()),
            Accessor::Integer(get, _) => Value::Integer(*get(model)),
            Accessor::Real(get, _) => Value::Real(*get(model)),
            Accessor::Boolean(get, _) => Value::Boolean(*get(model)),
            Accessor::Blob(get, _) => Value::Blob(get(model).clone()),
            Accessor::Reference(get, _) => get(model).clone().map_or(Value::Null, Value::Reference),
        }
    }

    /// Assign `value` to this field on `model`.
    ///
    /// The value must already be of the field's kind; returns false and
    /// leaves the model untouched otherwise.
    pub fn write(&self, model: &mut M, value: Value) -> bool {
        match (&self.accessor, value) {
            (Accessor::Text(_, set), Value::Text(v)) => *set(model) = v,
            (Accessor::Integer(_, set), Value::Integer(v)) => *set(model) = v,
            (Accessor::Real(_, set), Value::Real(v)) => *set(model) = v,
            (Accessor::Boolean(_, set), Value::Boolean(v)) => *set(model) = v,
            (Accessor::Blob(_, set), Value::Blob(v)) => *set(model) = v,
            (Accessor::Reference(_, set), Value::Reference(v)) => *set(model) = Some(v),
            (Accessor::Reference(_, set), Value::Null) => *set(model) = None,
            _ => return false,
        }
        true
    }

    /// Reset this field on `model` to its kind's zero value.
    pub fn reset(&self, model: &mut M) {
        self.write(model, self.kind().zero_value());
    }
}

impl<M> fmt::Debug for Field<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .finish()
    }
}

/// A type persisted as one table, one row per entity.
///
/// ```ignore
/// #[derive(Default)]
/// struct Person {
///     name: String,
///     age: i64,
/// }
///
/// impl Model for Person {
///     fn fields() -> Vec<Field<Self>> {
///         vec![
///             Field::text("name", |p: &Person| &p.name, |p: &mut Person| &mut p.name),
///             Field::integer("age", |p: &Person| &p.age, |p: &mut Person| &mut p.age),
///         ]
///     }
/// }
/// ```
pub trait Model: Default + 'static {
    /// Persisted fields in column order. Called once per type.
    fn fields() -> Vec<Field<Self>>;

    /// Defaults to the unqualified Rust type name.
    ///
    /// That name comes from `std::any::type_name`, whose output may change
    /// between compiler versions. Since the class name is also the default
    /// table name, models kept in a file database should override
    /// [`Model::table_name`] with a fixed name.
    fn class_name() -> &'static str {
        short_type_name(std::any::type_name::<Self>())
    }

    /// Defaults to the class name.
    fn table_name() -> &'static str {
        Self::class_name()
    }
}

fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Derived table layout of a model type.
pub struct Schema<M> {
    class_name: &'static str,
    table_name: &'static str,
    fields: Vec<Field<M>>,
}

impl<M: Model> Schema<M> {
    fn derive() -> Result<Self, SchemaError> {
        let class_name = M::class_name();
        let table_name = M::table_name();
        let fields = M::fields();

        let invalid = |name: &str| SchemaError::InvalidIdentifier {
            entity: class_name.to_string(),
            name: name.to_string(),
        };
        if !is_identifier(table_name) {
            return Err(invalid(table_name));
        }
        if fields.is_empty() {
            return Err(SchemaError::NoFields {
                entity: class_name.to_string(),
            });
        }

        let reserved = OBJECT_ID_COLUMN.to_ascii_lowercase();
        let mut seen: HashMap<String, &'static str> = HashMap::with_capacity(fields.len());
        for field in &fields {
            if !is_identifier(field.name) {
                return Err(invalid(field.name));
            }
            let column = field.name.to_ascii_lowercase();
            if column == reserved {
                return Err(SchemaError::ReservedColumn {
                    entity: class_name.to_string(),
                    field: field.name.to_string(),
                });
            }
            if let Some(first) = seen.insert(column, field.name) {
                return Err(SchemaError::DuplicateColumn {
                    entity: class_name.to_string(),
                    first: first.to_string(),
                    second: field.name.to_string(),
                });
            }
        }

        Ok(Self {
            class_name,
            table_name,
            fields,
        })
    }
}

impl<M> Schema<M> {
    pub fn class_name(&self) -> &'static str {
        self.class_name
    }

    pub fn table_name(&self) -> &'static str {
        self.table_name
    }

    pub fn fields(&self) -> &[Field<M>] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field<M>> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn descriptors(&self) -> Vec<FieldDescriptor> {
        self.fields.iter().map(Field::descriptor).collect()
    }

    /// `objectID` primary key followed by one column per field.
    pub fn table_definition(&self) -> TableDefinition {
        let mut columns = Vec::with_capacity(self.fields.len() + 1);
        columns.push(
            ColumnDefinition::new(OBJECT_ID_COLUMN, DataType::Text)
                .with_constraint(ColumnConstraint::PrimaryKey)
                .with_constraint(ColumnConstraint::NotNull),
        );
        columns.extend(
            self.fields
                .iter()
                .map(|f| ColumnDefinition::new(f.name, f.kind().data_type())),
        );
        TableDefinition {
            name: self.table_name.to_string(),
            columns,
        }
    }
}

impl<M> fmt::Debug for Schema<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("class_name", &self.class_name)
            .field("table_name", &self.table_name)
            .field("fields", &self.fields)
            .finish()
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

type SchemaCache = RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>;

static SCHEMAS: Lazy<SchemaCache> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Schema of `M`, derived on first use and cached for the process lifetime.
///
/// Failed derivations are not cached; every call reports the error again.
pub fn schema_of<M: Model>() -> Result<Arc<Schema<M>>, SchemaError> {
    let key = TypeId::of::<M>();
    let cached = SCHEMAS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&key)
        .cloned();
    if let Some(schema) = cached.and_then(|s| s.downcast::<Schema<M>>().ok()) {
        return Ok(schema);
    }

    let derived = Arc::new(Schema::<M>::derive()?);
    let mut cache = SCHEMAS.write().unwrap_or_else(PoisonError::into_inner);
    let entry = cache
        .entry(key)
        .or_insert_with(|| derived.clone() as Arc<dyn Any + Send + Sync>);
    Ok(Arc::clone(entry).downcast::<Schema<M>>().unwrap_or(derived))
}
