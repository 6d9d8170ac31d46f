use std::sync::Arc;

use chrono::NaiveDate;
use lux_odm::model::ModelMeta;
use lux_odm::{Field, MemoryStore, Model, ModelDef, ModelRegistry, StoreAction, Value};

fn person_meta(registry: &mut ModelRegistry) -> Arc<ModelMeta> {
    ModelDef::new("Person")
        .field("name", Field::char().required())
        .field("age", Field::integer())
        .field("born", Field::date())
        .field("profile", Field::json())
        .build(registry)
        .unwrap()
}

fn pairs(meta: &ModelMeta, model: &Model, store: &MemoryStore, action: StoreAction) -> Vec<(String, Value)> {
    meta.store_data(model, store, action)
        .collect::<lux_odm::Result<Vec<_>>>()
        .unwrap()
}

#[test]
fn declared_fields_come_first_then_extra_keys() {
    let mut registry = ModelRegistry::new();
    let meta = person_meta(&mut registry);
    let store = MemoryStore::new("memory");

    let mut ann = Model::new(Arc::clone(&meta), [("name", "Ann")]).unwrap();
    ann.set("nickname", "annie", true).unwrap();
    ann.set("_secret", "s3cr3t", true).unwrap();
    ann.set("_rev", "7", true).unwrap();

    let data = pairs(&meta, &ann, &store, StoreAction::Insert);
    let keys: Vec<&str> = data.iter().map(|(k, _)| k.as_str()).collect();

    assert_eq!(keys, vec!["id", "name", "nickname", "_rev"]);
    assert_eq!(data[1].1, Value::Text("Ann".into()));
    assert_eq!(data[3].1, Value::Integer(7));

    // same state, same output
    assert_eq!(pairs(&meta, &ann, &store, StoreAction::Insert), data);
}

#[test]
fn missing_required_field_fails() {
    let mut registry = ModelRegistry::new();
    let meta = person_meta(&mut registry);
    let store = MemoryStore::new("memory");

    let nobody = Model::new(Arc::clone(&meta), [("age", 3)]).unwrap();
    let err = meta
        .store_data(&nobody, &store, StoreAction::Insert)
        .collect::<lux_odm::Result<Vec<_>>>()
        .unwrap_err();

    assert!(err.is_field_error());
    assert!(err.to_string().contains("'name' is required for 'person'"));

    let mut data = meta.store_data(&nobody, &store, StoreAction::Insert);
    assert!(matches!(data.next(), Some(Ok((key, _))) if key == "id"));
    assert!(matches!(data.next(), Some(Err(_))));
    assert!(data.next().is_none());
}

#[test]
fn text_only_store_flattens_structured_values() {
    let mut registry = ModelRegistry::new();
    let meta = person_meta(&mut registry);

    let mut ann = Model::new(Arc::clone(&meta), [("name", "Ann")]).unwrap();
    ann.set("born", NaiveDate::from_ymd_opt(1990, 4, 2).unwrap(), true)
        .unwrap();
    ann.set("profile", serde_json::json!({"tags": ["a"]}), true)
        .unwrap();

    let structured = pairs(&meta, &ann, &MemoryStore::new("memory"), StoreAction::Insert);
    assert!(matches!(structured[2].1, Value::Date(_)));
    assert!(matches!(structured[3].1, Value::Json(_)));

    let text = pairs(&meta, &ann, &MemoryStore::text_only("kv"), StoreAction::Insert);
    assert_eq!(text[2], ("born".to_string(), Value::Text("1990-04-02".into())));
    assert_eq!(
        text[3],
        ("profile".to_string(), Value::Text(r#"{"tags":["a"]}"#.into()))
    );
}

#[test]
fn delete_only_carries_the_primary_key() {
    let mut registry = ModelRegistry::new();
    let meta = person_meta(&mut registry);
    let ann = Model::new(Arc::clone(&meta), [("name", "Ann")]).unwrap();

    let data = pairs(&meta, &ann, &MemoryStore::new("memory"), StoreAction::Delete);
    assert_eq!(data, vec![("id".to_string(), ann.pk().unwrap())]);
}

#[test]
fn junction_rows_carry_the_composite_key() {
    let mut registry = ModelRegistry::new();
    let person = ModelDef::new("Person")
        .field("friends", Field::many_to_many("self"))
        .build(&mut registry)
        .unwrap();
    let junction = registry.through_model("person", "friends").unwrap();

    let ann = Model::new(Arc::clone(&person), Vec::<(&str, Value)>::new()).unwrap();
    let bob = Model::new(person, Vec::<(&str, Value)>::new()).unwrap();
    let row = Model::new(
        Arc::clone(&junction),
        [("person", ann.pk().unwrap()), ("person2", bob.pk().unwrap())],
    )
    .unwrap();

    let data = pairs(&junction, &row, &MemoryStore::new("memory"), StoreAction::Insert);
    let keys: Vec<&str> = data.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, vec!["person_id", "person2_id", "id"]);
    assert_eq!(
        data[2].1,
        Value::List(vec![ann.pk().unwrap(), bob.pk().unwrap()])
    );
}
