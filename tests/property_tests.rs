use std::collections::BTreeSet;

use lux_odm::model::relation::junction_names;
use lux_odm::{Field, Model, ModelDef, ModelRegistry, OdmConfig, Value};
use proptest::prelude::*;

fn counter_meta(registry: &mut ModelRegistry) -> std::sync::Arc<lux_odm::ModelMeta> {
    ModelDef::new("Counter")
        .field("count", Field::integer())
        .build(registry)
        .unwrap()
}

proptest! {
    #[test]
    fn write_is_dirty_iff_value_changes(initial in any::<i64>(), next in any::<i64>()) {
        let mut registry = ModelRegistry::new();
        let mut counter = Model::new(counter_meta(&mut registry), [("count", initial)]).unwrap();
        prop_assert!(counter.modified().is_empty());

        counter.set("count", next, true).unwrap();
        prop_assert_eq!(counter.is_modified("count"), initial != next);
        prop_assert_eq!(counter.get_raw("count"), Some(&Value::Integer(next)));
    }

    #[test]
    fn first_write_of_absent_key_is_dirty(value in any::<i64>()) {
        let mut registry = ModelRegistry::new();
        let mut counter =
            Model::new(counter_meta(&mut registry), Vec::<(&str, Value)>::new()).unwrap();
        counter.set("count", value, true).unwrap();
        prop_assert!(counter.is_modified("count"));
    }

    #[test]
    fn repeated_reads_return_the_same_value(value in any::<i64>()) {
        let mut registry = ModelRegistry::new();
        let meta = counter_meta(&mut registry);
        let mut row = Model::from_store(meta, [("count", Value::Text(value.to_string()))]).unwrap();

        let first = row.get("count").unwrap().cloned();
        let second = row.get("count").unwrap().cloned();
        prop_assert_eq!(&first, &Some(Value::Integer(value)));
        prop_assert_eq!(first, second);
        prop_assert!(row.modified().is_empty());
    }

    #[test]
    fn inherited_fields_precede_own_fields(
        base in prop::collection::btree_set("[a-z]{1,6}", 1..5),
        own in prop::collection::btree_set("[a-z]{1,6}", 1..5),
    ) {
        let base: Vec<String> = base.into_iter().map(|name| format!("b_{}", name)).collect();
        let own: Vec<String> = own.into_iter().map(|name| format!("s_{}", name)).collect();

        let mut registry = ModelRegistry::new();
        let parent = base
            .iter()
            .fold(ModelDef::new("Parent").abstract_model(), |def, name| {
                def.field(name, Field::char())
            })
            .build(&mut registry)
            .unwrap();
        let child = own
            .iter()
            .fold(ModelDef::new("Child").base(&parent), |def, name| {
                def.field(name, Field::char())
            })
            .build(&mut registry)
            .unwrap();

        let expected: Vec<&str> = std::iter::once("id")
            .chain(base.iter().map(String::as_str))
            .chain(own.iter().map(String::as_str))
            .collect();
        prop_assert_eq!(child.field_names(), expected);
    }

    #[test]
    fn junction_name_joins_both_sides(
        a in "[a-z]{1,8}",
        b in "[a-z]{1,8}",
    ) {
        let config = OdmConfig::default();
        let (left, right, through) = junction_names(&a, &b, &config);
        if a == b {
            prop_assert_eq!(&right, &format!("{}2", b));
        } else {
            prop_assert_eq!(&right, &b);
        }
        prop_assert_eq!(&left, &a);
        prop_assert_eq!(through, format!("{}_{}", left, right));

        let (_, right, through) = junction_names(&a, &a, &config);
        prop_assert_eq!(&right, &format!("{}2", a));
        prop_assert_eq!(through, format!("{}_{}2", a, a));
    }

    #[test]
    fn at_most_one_primary_key(count in 1usize..5) {
        let names: BTreeSet<String> = (0..count).map(|i| format!("key{}", i)).collect();

        let mut registry = ModelRegistry::new();
        let result = names
            .iter()
            .fold(ModelDef::new("Keyed"), |def, name| {
                def.field(name, Field::char().primary_key())
            })
            .build(&mut registry);

        if count == 1 {
            let meta = result.unwrap();
            prop_assert_eq!(meta.pkname(), "key0");
            prop_assert_eq!(meta.fields().iter().filter(|f| f.is_primary_key()).count(), 1);
        } else {
            prop_assert!(result.unwrap_err().is_field_error());
        }
    }
}

fn gauge_meta(registry: &mut ModelRegistry) -> std::sync::Arc<lux_odm::ModelMeta> {
    ModelDef::new("Gauge")
        .field("level", Field::float())
        .build(registry)
        .unwrap()
}

proptest! {
    #[test]
    fn float_write_is_dirty_iff_value_changes(initial in any::<f64>(), next in any::<f64>()) {
        let mut registry = ModelRegistry::new();
        let mut gauge = Model::new(gauge_meta(&mut registry), [("level", initial)]).unwrap();

        gauge.set("level", next, true).unwrap();
        let same = initial == next || (initial.is_nan() && next.is_nan());
        prop_assert_eq!(gauge.is_modified("level"), !same);
    }

    #[test]
    fn tiny_float_changes_are_tracked(a in 1e-300f64..1e-10, b in 1e-300f64..1e-10) {
        prop_assume!(a != b);
        let mut registry = ModelRegistry::new();
        let mut gauge = Model::new(gauge_meta(&mut registry), [("level", a)]).unwrap();
        gauge.set("level", b, true).unwrap();
        prop_assert!(gauge.is_modified("level"));
    }

    #[test]
    fn private_writes_never_dirty(rev in any::<i64>(), key in "_[a-z]{1,6}") {
        let mut registry = ModelRegistry::new();
        let mut counter =
            Model::new(counter_meta(&mut registry), Vec::<(&str, Value)>::new()).unwrap();

        counter.set(&key, rev, true).unwrap();
        counter.set("_rev", rev.to_string(), true).unwrap();
        prop_assert!(counter.modified().is_empty());
        prop_assert_eq!(counter.get("_rev").unwrap(), Some(&Value::Integer(rev)));
    }
}
