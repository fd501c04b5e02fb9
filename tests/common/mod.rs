#![allow(dead_code)]

use rust_sqlite_entities::{EntityStore, Field, Model, SqliteDatabase};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Person {
    pub name: String,
    pub age: i64,
    pub height: f64,
    pub active: bool,
    pub avatar: Vec<u8>,
    pub manager: Option<String>,
}

impl Model for Person {
    fn fields() -> Vec<Field<Self>> {
        vec![
            Field::text("name", |p: &Person| &p.name, |p: &mut Person| &mut p.name),
            Field::integer("age", |p: &Person| &p.age, |p: &mut Person| &mut p.age),
            Field::real("height", |p: &Person| &p.height, |p: &mut Person| &mut p.height),
            Field::boolean("active", |p: &Person| &p.active, |p: &mut Person| &mut p.active),
            Field::blob("avatar", |p: &Person| &p.avatar, |p: &mut Person| &mut p.avatar),
            Field::reference("manager", |p: &Person| &p.manager, |p: &mut Person| &mut p.manager),
        ]
    }

    fn table_name() -> &'static str {
        "people"
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn memory_store() -> EntityStore<SqliteDatabase> {
    init_tracing();
    EntityStore::open_in_memory().unwrap()
}

/// Save a person with the given name and age, returning its identifier.
pub fn add_person(store: &EntityStore<SqliteDatabase>, name: &str, age: i64) -> String {
    let mut person = store.create_entity::<Person>().unwrap();
    person.name = name.to_string();
    person.age = age;
    assert!(store.save_entity(&person).unwrap());
    person.object_id().to_string()
}
