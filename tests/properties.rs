//! Property tests for pagination and counting against a real database.

mod common;

use common::{memory_store, Person};
use proptest::prelude::*;
use rust_sqlite_entities::{EntityStore, SqliteDatabase};

fn seeded_store(people: &[(String, i64)]) -> EntityStore<SqliteDatabase> {
    let store = memory_store();
    for (name, age) in people {
        let mut person = store.create_entity::<Person>().unwrap();
        person.name = name.clone();
        person.age = *age;
        assert!(store.save_entity(&person).unwrap());
    }
    store
}

fn people() -> impl Strategy<Value = Vec<(String, i64)>> {
    prop::collection::vec(("[a-z]{0,6}", 0i64..50), 0..25)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: pages over a deterministic order concatenate to the full result.
    #[test]
    fn prop_pages_partition_result(people in people(), page_size in 1i64..8) {
        let store = seeded_store(&people);
        let order = "age, name, objectID";
        let full: Vec<String> = store
            .fetch_all_where_ordered::<Person>("", order)
            .unwrap()
            .iter()
            .map(|p| p.object_id().to_string())
            .collect();

        let pages = (people.len() as i64 + page_size - 1) / page_size;
        let mut paged = Vec::new();
        for index in 0..pages {
            let page = store
                .fetch_all_where_paged::<Person>("", order, index, page_size)
                .unwrap();
            prop_assert!(!page.is_empty());
            prop_assert!(page.len() as i64 <= page_size);
            paged.extend(page.iter().map(|p| p.object_id().to_string()));
        }
        prop_assert_eq!(paged, full);
    }

    /// Property: counting agrees with fetching for any threshold filter.
    #[test]
    fn prop_count_matches_fetch(people in people(), threshold in 0i64..60) {
        let store = seeded_store(&people);
        let filter = format!("age >= {threshold}");
        let count = store.count_all_where::<Person>(&filter).unwrap();
        let fetched = store.fetch_all_where::<Person>(&filter).unwrap();
        prop_assert_eq!(count as usize, fetched.len());
        let expected = people.iter().filter(|(_, age)| *age >= threshold).count();
        prop_assert_eq!(fetched.len(), expected);
    }

    /// Property: saving then fetching by identifier returns what was saved.
    #[test]
    fn prop_round_trip(name in "\\PC{0,20}", age in any::<i64>(), height in -1.0e6f64..1.0e6, active in any::<bool>()) {
        let store = memory_store();
        let mut person = store.create_entity::<Person>().unwrap();
        person.name = name;
        person.age = age;
        person.height = height;
        person.active = active;
        prop_assert!(store.save_entity(&person).unwrap());
        let fetched = store.fetch_one_by_id::<Person>(person.object_id()).unwrap();
        prop_assert_eq!(fetched, Some(person));
    }
}
