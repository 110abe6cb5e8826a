//! Property tests: interned rows behave like their map models.

use proptest::prelude::*;
use std::collections::BTreeMap;
use tabula_core::{Row, Scheme, Value};

fn entries() -> impl Strategy<Value = BTreeMap<String, i64>> {
    prop::collection::btree_map("[a-e]{1,2}", -8i64..8, 0..6)
}

fn row_of(map: &BTreeMap<String, i64>) -> Row {
    Row::from_pairs(map.iter().map(|(a, v)| (a.as_str(), Value::Integer(*v))))
}

proptest! {
    #[test]
    fn structurally_equal_rows_share_an_instance(map in entries()) {
        // Built in opposite entry orders, the two rows must resolve to
        // one interned allocation.
        let forward = row_of(&map);
        let backward = Row::from_pairs(
            map.iter().rev().map(|(a, v)| (a.as_str(), Value::Integer(*v))),
        );
        prop_assert!(Row::same_instance(&forward, &backward));
        prop_assert_eq!(forward, backward);
    }

    #[test]
    fn lookups_agree_with_the_map(map in entries(), probe in "[a-e]{1,2}") {
        let row = row_of(&map);
        prop_assert_eq!(row.len(), map.len());
        for (attribute, value) in &map {
            prop_assert_eq!(row.value(&attribute.as_str().into()), Value::Integer(*value));
        }
        let expected = match map.get(&probe) {
            Some(v) => Value::Integer(*v),
            None => Value::NotFound,
        };
        prop_assert_eq!(row.value(&probe.as_str().into()), expected);
        prop_assert_eq!(row.scheme(), Scheme::from_attributes(map.keys().map(String::as_str)));
    }

    #[test]
    fn updated_agrees_with_map_overlay(base in entries(), overlay in entries()) {
        let mut merged = base.clone();
        merged.extend(overlay.clone());
        let updated = row_of(&base).updated(&row_of(&overlay));
        prop_assert!(Row::same_instance(&updated, &row_of(&merged)));
    }

    #[test]
    fn project_keeps_exactly_the_named_attributes(map in entries(), keep in entries()) {
        let scheme = Scheme::from_attributes(keep.keys().map(String::as_str));
        let projected = row_of(&map).project(&scheme);
        let expected: BTreeMap<String, i64> = map
            .iter()
            .filter(|(a, _)| keep.contains_key(*a))
            .map(|(a, v)| (a.clone(), *v))
            .collect();
        prop_assert_eq!(projected, row_of(&expected));
    }
}
