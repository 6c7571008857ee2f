#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::FakeDb;
use entity_storage::{
    AttributeType, AttributeValue, EntityKind, EntityRepository, Identity, MemoryKeyStore, StorageDatetime,
};
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, EntityKind)]
#[entity(table = "widgets")]
struct Widget {
    #[id]
    id: Option<i64>,
    name: String,
    #[attribute(kind = "epoch")]
    created: StorageDatetime,
    #[attribute(default = "1")]
    enabled: bool,
    #[attribute(name = "meta")]
    metadata: Option<JsonValue>,
    tags: Vec<JsonValue>,
    #[attribute(skip)]
    scratch: u8,
}

#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq, EntityKind)]
#[entity(table = "memberships")]
struct Membership {
    #[id]
    group_id: i64,
    #[id]
    user_id: i64,
    #[attribute(kind = "enum-bool")]
    admin: bool,
}

#[derive(Debug, Clone, PartialEq, EntityKind)]
#[entity(table = "counters")]
struct Counter {
    #[id]
    id: i64,
    small: i32,
    hits: u32,
    ratio: f64,
}

fn widget_repository() -> EntityRepository<FakeDb, MemoryKeyStore> {
    let db = FakeDb::new()
        .with_auto_increment("widgets", "id")
        .with_default("widgets", "enabled", "1");
    EntityRepository::for_kind::<Widget>(db, Arc::new(MemoryKeyStore::new())).unwrap()
}

#[test]
fn definition_follows_fields() {
    let definition = Widget::definition().unwrap();
    assert_eq!(definition.table_name(), "widgets");
    assert_eq!(definition.id_columns(), ["id".to_string()]);

    let schema = definition.schema();
    let names: Vec<_> = schema.names().collect();
    assert_eq!(names, vec!["id", "name", "created", "enabled", "meta", "tags"]);
    assert_eq!(schema.type_of("id"), Some(AttributeType::Int));
    assert_eq!(schema.type_of("created"), Some(AttributeType::Epoch));
    assert_eq!(schema.type_of("meta"), Some(AttributeType::Json));
    assert_eq!(schema.type_of("tags"), Some(AttributeType::Array));
    assert_eq!(schema.default_of("enabled"), Some("1"));
    assert!(!schema.contains("scratch"));
}

#[test]
fn composite_key_keeps_declaration_order() {
    let definition = Membership::definition().unwrap();
    assert_eq!(
        definition.id_columns(),
        ["group_id".to_string(), "user_id".to_string()]
    );
    assert_eq!(
        definition.schema().type_of("admin"),
        Some(AttributeType::EnumBool)
    );
}

#[tokio::test]
async fn typed_values_round_trip_through_repository() {
    let mut repo = widget_repository();
    let created = StorageDatetime::from_epoch("1239319493").unwrap();

    let widget = Widget {
        id: None,
        name: "x".into(),
        created,
        enabled: false,
        metadata: Some(json!({"colour": "red"})),
        tags: vec![json!("a"), json!("b")],
        scratch: 9,
    };

    let entity = repo.create_from(&widget).unwrap();
    assert!(entity.is_new());
    assert!(!entity.is_set("id"));

    let saved = repo.save(&entity).await.unwrap();
    let loaded = Widget::from_entity(&saved).unwrap();

    assert_eq!(
        loaded,
        Widget {
            id: Some(1),
            scratch: 0,
            ..widget
        }
    );
    assert_eq!(saved.get_raw("meta").unwrap().as_deref(), Some(r#"{"colour":"red"}"#));
}

#[tokio::test]
async fn unset_optional_field_reads_as_none() {
    let mut repo = widget_repository();
    repo.db_mut().seed(
        "widgets",
        &[
            ("id", Some("4")),
            ("name", Some("bare")),
            ("created", Some("0")),
            ("enabled", Some("0")),
            ("meta", None),
            ("tags", Some("")),
        ],
    );

    let entity = repo
        .get_by_id(&Identity::single("id", 4))
        .await
        .unwrap()
        .unwrap();
    let widget = Widget::from_entity(&entity).unwrap();

    assert_eq!(widget.id, Some(4));
    assert_eq!(widget.metadata, None);
    assert!(widget.tags.is_empty());
    assert!(widget.created.is_zero());
    assert!(!widget.enabled);
}

#[test]
fn apply_to_marks_changes() {
    let repo = widget_repository();
    let mut entity = repo
        .create_entity([
            ("name", AttributeValue::from("x")),
            ("created", AttributeValue::from(StorageDatetime::Zero)),
            ("enabled", AttributeValue::from(true)),
            ("tags", AttributeValue::Array(Vec::new())),
        ])
        .unwrap();
    let mut widget = Widget::from_entity(&entity).unwrap();

    widget.name = "y".into();
    widget.apply_to(&mut entity).unwrap();

    let changed: Vec<_> = entity.changed_attributes().collect();
    assert_eq!(changed, vec!["name"]);
}

#[test]
fn every_inferred_int_width_round_trips() {
    let repo: EntityRepository<FakeDb, MemoryKeyStore> =
        EntityRepository::for_kind::<Counter>(FakeDb::new(), Arc::new(MemoryKeyStore::new()))
            .unwrap();
    let counter = Counter {
        id: 3,
        small: -7,
        hits: u32::MAX,
        ratio: 0.5,
    };

    let entity = repo.create_from(&counter).unwrap();
    assert_eq!(entity.get_raw("hits").unwrap().as_deref(), Some("4294967295"));
    assert_eq!(Counter::from_entity(&entity).unwrap(), counter);

    let definition = Counter::definition().unwrap();
    for column in ["id", "small", "hits"] {
        assert_eq!(definition.schema().type_of(column), Some(AttributeType::Int));
    }
}
