use docquery::{
    bson::{Bson, Document, doc},
    memory::InMemoryStore,
    prelude::*,
};

async fn store_with(collection: &str, documents: Vec<Document>) -> DocumentStore<InMemoryStore> {
    let store = DocumentStore::connect(InMemoryStore::builder()).await.unwrap();
    store.collection(collection).insert(documents).await.unwrap();
    store
}

fn items() -> Vec<Document> {
    vec![
        doc! { "name": "knife", "type": "sharp", "amount": 34 },
        doc! { "name": "fork", "type": "sharp", "amount": 20 },
        doc! { "name": "spoon", "type": "round", "amount": 3 },
        doc! { "name": "spoon", "type": "round", "amount": 14 },
    ]
}

#[tokio::test]
async fn scalar_aggregates() {
    let store = store_with("items", items()).await;
    let items = store.collection("items");
    let all = Query::new();
    let spoons = Query::builder().where_eq("name", "spoon").build();

    assert_eq!(items.count(&all).await.unwrap(), 4);
    assert_eq!(items.sum(&all, "amount").await.unwrap(), Bson::Int32(71));
    assert_eq!(items.avg(&all, "amount").await.unwrap(), Bson::Double(17.75));
    assert_eq!(items.max(&spoons, "amount").await.unwrap(), Bson::Int32(14));
    assert_eq!(items.min(&spoons, "amount").await.unwrap(), Bson::Int32(3));
}

#[tokio::test]
async fn aggregates_over_nothing_are_null() {
    let store = store_with("items", items()).await;
    let items = store.collection("items");
    let none = Query::builder().where_eq("name", "plate").build();

    assert_eq!(items.sum(&none, "amount").await.unwrap(), Bson::Null);
    assert_eq!(items.count(&none).await.unwrap(), 0);
    assert!(!items.exists(&none).await.unwrap());
}

#[tokio::test]
async fn aggregates_over_embedded_fields() {
    let store = store_with(
        "stock",
        vec![
            doc! { "name": "knife", "amount": { "hidden": 34 } },
            doc! { "name": "fork", "amount": { "hidden": 20 } },
            doc! { "name": "spoon", "amount": { "hidden": 3 } },
            doc! { "name": "spoon", "amount": { "hidden": 8 } },
        ],
    )
    .await;
    let stock = store.collection("stock");

    assert_eq!(stock.sum(&Query::new(), "amount.hidden").await.unwrap(), Bson::Int32(65));
    assert_eq!(stock.avg(&Query::new(), "amount.hidden").await.unwrap(), Bson::Double(16.25));
}

#[tokio::test]
async fn aggregates_over_wildcard_paths() {
    let store = store_with(
        "batches",
        vec![
            doc! { "name": "knife", "amount": [{ "hidden": 35 }, { "hidden": 20 }] },
            doc! { "name": "fork", "amount": [{ "hidden": 3 }, { "hidden": 1 }] },
            doc! { "name": "spoon", "amount": [{ "hidden": 5 }, { "hidden": 8 }] },
        ],
    )
    .await;
    let batches = store.collection("batches");
    let all = Query::new();

    assert_eq!(batches.sum(&all, "amount.*.hidden").await.unwrap(), Bson::Int32(72));
    assert_eq!(
        batches
            .aggregate(&all, AggregateFunction::Count, Some("amount.*.hidden"))
            .await
            .unwrap(),
        Bson::Int64(6)
    );
    assert_eq!(batches.min(&all, "amount.*.hidden").await.unwrap(), Bson::Int32(1));
    assert_eq!(batches.max(&all, "amount.*.hidden").await.unwrap(), Bson::Int32(35));
    assert_eq!(batches.avg(&all, "amount.*.hidden").await.unwrap(), Bson::Double(12.0));
}

#[tokio::test]
async fn or_where_groups_and_nesting() {
    let store = store_with("items", items()).await;
    let items = store.collection("items");

    let query = Query::builder()
        .where_eq("type", "sharp")
        .or_where_nested(|q| q.where_eq("name", "spoon").where_op("amount", ">", 10))
        .order_by("amount", SortDirection::Asc)
        .build();
    let names = items.pluck(&query, "amount").await.unwrap();

    assert_eq!(names, vec![Bson::Int32(14), Bson::Int32(20), Bson::Int32(34)]);
}

#[tokio::test]
async fn like_between_and_membership() {
    let store = store_with("items", items()).await;
    let items = store.collection("items");

    let like = Query::builder().where_op("name", "like", "%oo%").build();
    assert_eq!(items.count(&like).await.unwrap(), 2);

    let between = Query::builder().where_between("amount", [3, 20]).build();
    assert_eq!(items.count(&between).await.unwrap(), 3);

    let outside = Query::builder().where_not_between("amount", [3, 20]).build();
    assert_eq!(items.pluck(&outside, "name").await.unwrap(), vec![Bson::from("knife")]);

    let membership = Query::builder().where_not_in("name", ["spoon", "fork"]).build();
    assert_eq!(items.pluck(&membership, "name").await.unwrap(), vec![Bson::from("knife")]);
}

#[tokio::test]
async fn natural_hint_reads_newest_first() {
    let store = store_with("items", items()).await;
    let items = store.collection("items");

    let query = Query::builder().hint(doc! { "$natural": -1 }).build();
    let first = items.first(&query).await.unwrap().unwrap();

    assert_eq!(first.get_i32("amount").unwrap(), 14);
}

#[tokio::test]
async fn plucking_and_values() {
    let store = store_with(
        "books",
        vec![
            doc! { "title": "Emma", "author": { "first_name": "Jane" }, "year": 1815 },
            doc! { "title": "Dracula", "author": { "first_name": "Bram" }, "year": 1897 },
        ],
    )
    .await;
    let books = store.collection("books");
    let all = Query::new();

    assert_eq!(
        books.pluck_keyed(&all, "year", "title").await.unwrap(),
        doc! { "Emma": 1815, "Dracula": 1897 }
    );
    assert_eq!(
        books.value(&all, "author.first_name").await.unwrap(),
        Some(Bson::from("Jane"))
    );
    assert_eq!(books.value(&all, "author.last_name").await.unwrap(), None);
}

#[tokio::test]
async fn distinct_and_grouping() {
    let store = store_with("items", items()).await;
    let items = store.collection("items");

    let mut types = items.distinct(&Query::new(), "type").await.unwrap();
    types.sort_by_key(|value| value.to_string());
    assert_eq!(types, vec![Bson::from("round"), Bson::from("sharp")]);

    let grouped = Query::builder()
        .select(["name"])
        .group_by(["name"])
        .order_by("name", SortDirection::Asc)
        .build();
    assert_eq!(
        items.pluck(&grouped, "name").await.unwrap(),
        vec![Bson::from("fork"), Bson::from("knife"), Bson::from("spoon")]
    );
}

#[tokio::test]
async fn grouping_on_the_key_keeps_it() {
    let store = store_with(
        "users",
        vec![doc! { "_id": 1, "email": "a" }, doc! { "_id": 2, "email": "b" }],
    )
    .await;
    let users = store.collection("users");

    let grouped = Query::builder()
        .group_by(["_id", "email"])
        .order_by("email", SortDirection::Asc)
        .build();
    assert_eq!(
        users.get(&grouped).await.unwrap(),
        vec![doc! { "_id": 1, "email": "a" }, doc! { "_id": 2, "email": "b" }]
    );

    let mut ids = users.distinct(&Query::new(), "_id").await.unwrap();
    ids.sort_by_key(|value| value.to_string());
    assert_eq!(ids, vec![Bson::Int32(1), Bson::Int32(2)]);
}

#[tokio::test]
async fn paging() {
    let store = store_with("items", items()).await;
    let items = store.collection("items");
    let query = Query::builder().order_by("amount", SortDirection::Desc).build();

    let page = items.paginate(&query, &PaginationParams::new(2, 3)).await.unwrap();

    assert_eq!(page.count, 4);
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].get_i32("amount").unwrap(), 3);
    assert_eq!(page.previous_page, Some(1));
    assert_eq!(page.next_page, None);

    let page = items.paginate(&query, &PaginationParams::new(1, 0)).await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.per_page, 1);
    assert_eq!(page.next_page, Some(2));
}

#[tokio::test]
async fn untranslatable_queries_fail_before_execution() {
    let store = store_with("items", items()).await;
    let items = store.collection("items");

    let column = Query::builder().where_column("amount", ">", "sold").build();
    assert!(matches!(
        items.get(&column).await,
        Err(DocumentStoreError::UnsupportedOperation(_))
    ));

    let having = Query::builder().group_by(["type"]).having("amount", ">", 3).build();
    assert!(matches!(
        items.get(&having).await,
        Err(DocumentStoreError::UnsupportedOperation(_))
    ));

    let sort = Query::builder().order_by_str("amount", "sideways").build();
    assert!(matches!(
        items.get(&sort).await,
        Err(DocumentStoreError::InvalidOperand { .. })
    ));
}
