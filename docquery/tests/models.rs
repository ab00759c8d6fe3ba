use std::sync::Arc;

use docquery::{
    bson::{Bson, DateTime, doc},
    cast::BinaryUuidCast,
    memory::InMemoryStore,
    prelude::*,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
enum Status {
    Active,
    Banned,
}

impl BackedEnum for Status {
    fn cases() -> &'static [Self] {
        &[Status::Active, Status::Banned]
    }

    fn name(&self) -> &'static str {
        match self {
            Status::Active => "Active",
            Status::Banned => "Banned",
        }
    }

    fn backing(&self) -> Bson {
        match self {
            Status::Active => Bson::Int32(1),
            Status::Banned => Bson::Int32(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    birthday: DateTime,
    status: Status,
}

impl Model for User {
    fn collection_name() -> &'static str {
        "users"
    }

    fn casts(registry: CastRegistry) -> CastRegistry {
        registry
            .with_cast("birthday", CastKind::Date)
            .with_cast("status", CastKind::Enum(EnumCast::of::<Status>()))
    }
}

fn user(name: &str, birthday: &str, status: Status) -> User {
    User {
        id: None,
        name: name.to_string(),
        birthday: DateTime::parse_rfc3339_str(birthday).unwrap(),
        status,
    }
}

async fn seeded() -> DocumentStore<InMemoryStore> {
    let store = DocumentStore::new(InMemoryStore::new());
    store
        .model::<User>()
        .insert(&[
            user("Ada", "1985-12-10T00:00:00Z", Status::Active),
            user("Grace", "1996-12-09T00:00:00Z", Status::Banned),
            user("Alan", "2001-06-23T00:00:00Z", Status::Active),
        ])
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn models_round_trip_through_casts() {
    let store = seeded().await;
    let users = store.model::<User>();

    let raw = store
        .collection("users")
        .first(&Query::builder().where_eq("name", "Grace").build())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(raw.get("status"), Some(&Bson::Int32(2)));
    assert!(matches!(raw.get("_id"), Some(Bson::ObjectId(_))));

    let grace = users
        .first(&users.query().where_eq("status", "Banned").build())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(grace.name, "Grace");
    assert_eq!(grace.status, Status::Banned);

    let id = grace.id.clone().unwrap();
    assert_eq!(id.len(), 24);
    assert_eq!(users.find_or_fail(id.as_str()).await.unwrap(), grace);
}

#[tokio::test]
async fn date_operands_are_cast() {
    let store = seeded().await;
    let users = store.model::<User>();

    let query = users
        .query()
        .where_op("birthday", ">=", "1990-01-01")
        .order_by("birthday", SortDirection::Asc)
        .build();
    let names: Vec<String> = users.get(&query).await.unwrap().into_iter().map(|u| u.name).collect();

    assert_eq!(names, vec!["Grace".to_string(), "Alan".to_string()]);
}

#[tokio::test]
async fn save_inserts_then_updates() {
    let store = DocumentStore::new(InMemoryStore::new());
    let users = store.model::<User>();

    let mut ada = user("Ada", "1985-12-10T00:00:00Z", Status::Active);
    let id = users.save(&ada).await.unwrap();
    ada.id = Some(id.as_str().unwrap().to_string());

    ada.status = Status::Banned;
    users.save(&ada).await.unwrap();

    assert_eq!(users.count(&Query::new()).await.unwrap(), 1);
    assert_eq!(users.find_or_fail(id).await.unwrap().status, Status::Banned);
}

#[tokio::test]
async fn missing_models_fail_lookup() {
    let store = seeded().await;
    let users = store.model::<User>();

    let result = users.find_or_fail("000000000000000000000000").await;
    assert!(matches!(
        result,
        Err(DocumentStoreError::DocumentNotFound { ref collection, .. }) if collection == "users"
    ));
}

#[tokio::test]
async fn binary_uuids_only_match_binary_operands() {
    let store = DocumentStore::new(InMemoryStore::new());
    let casts = CastRegistry::new("Token").with_cast("token", CastKind::BinaryUuid);
    let tokens = store.collection("tokens").with_casts(Arc::new(casts));

    let raw = "6f1c8e2a-3b4d-4c5e-8f90-123456789abc";
    tokens.insert(vec![doc! { "token": raw }]).await.unwrap();

    let by_string = tokens.query().where_eq("token", raw).build();
    assert!(tokens.get(&by_string).await.unwrap().is_empty());

    let uuid = uuid::Uuid::parse_str(raw).unwrap();
    let by_binary = tokens.query().where_eq("token", BinaryUuidCast::binary(&uuid)).build();
    let rows = tokens.get(&by_binary).await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_str("token").unwrap(), raw);
}

#[tokio::test]
async fn invalid_enum_members_are_rejected() {
    let store = DocumentStore::new(InMemoryStore::new());
    let users = store.model::<User>();

    let query = users.query().where_eq("status", "Retired").build();
    assert!(matches!(
        users.get(&query).await,
        Err(DocumentStoreError::InvalidCast { .. })
    ));
}
