#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use datagate::{
    Column, DataApi, DataApiOutcome, DataApiSettings, EntityMetadata, Filter, InMemoryDataProvider,
    Operation, RawRow, Repository, UrlParams,
};
use serde_json::{Value as JsonValue, json};

fn categories() -> Arc<EntityMetadata> {
    Arc::new(
        EntityMetadata::builder("categories")
            .column(Column::integer("id"))
            .column(Column::string("categoryName"))
            .column(Column::string("description").allow_null())
            .build()
            .unwrap(),
    )
}

fn rows(values: Vec<JsonValue>) -> Vec<RawRow> {
    values
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect()
}

fn api(settings: DataApiSettings) -> DataApi {
    let meta = categories();
    let provider = InMemoryDataProvider::new().with_rows(
        &meta,
        rows(vec![
            json!({"id": 1, "categoryName": "noam", "description": "x"}),
            json!({"id": 4, "categoryName": "yael", "description": "x"}),
            json!({"id": 2, "categoryName": "yoni", "description": "y"}),
            json!({"id": 3, "categoryName": "maayan", "description": "y"}),
        ]),
    );
    Repository::new(meta, &provider).data_api(settings)
}

async fn list(api: &DataApi, query: &str, filter: Option<Filter>) -> DataApiOutcome {
    let (sink, slot) = DataApiOutcome::channel();
    api.get_array(sink, &UrlParams::from_query(query), filter)
        .await;
    slot.take().unwrap()
}

async fn get(api: &DataApi, id: &str) -> DataApiOutcome {
    let (sink, slot) = DataApiOutcome::channel();
    api.get(sink, id).await;
    slot.take().unwrap()
}

async fn post(api: &DataApi, body: JsonValue) -> DataApiOutcome {
    let (sink, slot) = DataApiOutcome::channel();
    api.post(sink, &body).await;
    slot.take().unwrap()
}

async fn put(api: &DataApi, id: &str, body: JsonValue) -> DataApiOutcome {
    let (sink, slot) = DataApiOutcome::channel();
    api.put(sink, id, &body).await;
    slot.take().unwrap()
}

async fn delete(api: &DataApi, id: &str) -> DataApiOutcome {
    let (sink, slot) = DataApiOutcome::channel();
    api.delete(sink, id).await;
    slot.take().unwrap()
}

fn ids(outcome: &DataApiOutcome) -> Vec<i64> {
    match outcome {
        DataApiOutcome::Success(JsonValue::Array(rows)) => {
            rows.iter().map(|r| r["id"].as_i64().unwrap()).collect()
        }
        other => panic!("expected rows, got {other:?}"),
    }
}

#[tokio::test]
async fn list_filters_and_sorts_from_parameters() {
    let api = api(DataApiSettings::default());
    assert_eq!(ids(&list(&api, "description=x", None).await), vec![1, 4]);
    assert_eq!(ids(&list(&api, "_sort=id", None).await), vec![1, 2, 3, 4]);
    assert_eq!(
        ids(&list(&api, "_sort=categoryName&_order=desc", None).await),
        vec![2, 4, 1, 3]
    );
    assert_eq!(
        ids(&list(&api, "categoryName_contains=A&_sort=id", None).await),
        vec![1, 3, 4]
    );
    assert_eq!(ids(&list(&api, "id_in=3,1&colour=red", None).await), vec![1, 3]);
}

#[tokio::test]
async fn list_pages_after_filtering() {
    let meta = Arc::new(
        EntityMetadata::builder("items")
            .column(Column::integer("id"))
            .column(Column::string("kind"))
            .build()
            .unwrap(),
    );
    let seed = (1..=8)
        .map(|id| {
            let kind = if id % 2 == 0 { "b" } else { "a" };
            json!({"id": id, "kind": kind})
        })
        .collect();
    let provider = InMemoryDataProvider::new().with_rows(&meta, rows(seed));
    let api = Repository::new(meta, &provider).data_api(DataApiSettings::default());

    assert_eq!(ids(&list(&api, "kind=b&_limit=2&_page=1", None).await), vec![2, 4]);
    assert_eq!(ids(&list(&api, "kind=b&_limit=2&_page=2", None).await), vec![6, 8]);
    assert!(ids(&list(&api, "kind=b&_limit=2&_page=3", None).await).is_empty());
    assert_eq!(ids(&list(&api, "kind=a&_page=2", None).await), vec![1, 3, 5, 7]);
}

#[tokio::test]
async fn list_combines_caller_default_and_parsed_filters() {
    let api = api(DataApiSettings::default().with_default_filter(Filter::eq("description", "y")));
    assert_eq!(ids(&list(&api, "", None).await), vec![2, 3]);
    assert_eq!(ids(&list(&api, "", Some(Filter::gt("id", 2))).await), vec![3]);
    assert!(ids(&list(&api, "id=1", None).await).is_empty());
}

#[tokio::test]
async fn list_caps_the_limit() {
    let api = api(DataApiSettings::default().with_limits(Some(3), Some(2)));
    assert_eq!(ids(&list(&api, "_limit=10", None).await).len(), 2);
    assert_eq!(ids(&list(&api, "", None).await).len(), 2);
}

#[tokio::test]
async fn list_reports_invalid_parameters() {
    let api = api(DataApiSettings::default());
    match list(&api, "id_contains=1", None).await {
        DataApiOutcome::Error(error) => assert!(error.model_state.contains_key("id")),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        list(&api, "_limit=many", None).await,
        DataApiOutcome::Error(_)
    ));
    assert!(matches!(
        list(&api, "_sort=colour", None).await,
        DataApiOutcome::Error(_)
    ));
}

#[tokio::test]
async fn rest_parameters_select_the_same_rows_as_the_filter() {
    let api = api(DataApiSettings::default());
    let filter = Filter::eq("description", "x").or(Filter::starts_with("categoryName", "ma"));
    let query = filter
        .to_rest_url_params(api.metadata(), &UrlParams::new().with("_sort", "id"))
        .unwrap();
    let parsed = list(&api, &query, None).await;
    let direct = list(&api, "_sort=id", Some(filter)).await;
    assert_eq!(ids(&parsed), vec![1, 3, 4]);
    assert_eq!(parsed, direct);
}

#[tokio::test]
async fn get_by_id() {
    let api = api(DataApiSettings::default());
    assert_eq!(
        get(&api, "4").await,
        DataApiOutcome::Success(json!({"id": 4, "categoryName": "yael", "description": "x"}))
    );
    assert_eq!(get(&api, "9").await, DataApiOutcome::NotFound);
    assert_eq!(get(&api, "abc").await, DataApiOutcome::NotFound);
}

#[tokio::test]
async fn post_validates_and_inserts() {
    let api = api(DataApiSettings::default());
    assert_eq!(
        post(&api, json!({"id": 5, "categoryName": "new", "colour": "red"})).await,
        DataApiOutcome::Created(json!({"id": 5, "categoryName": "new", "description": null}))
    );
    assert_eq!(ids(&list(&api, "", None).await).len(), 5);

    match post(&api, json!({"id": "six", "categoryName": null})).await {
        DataApiOutcome::Error(error) => {
            let columns: Vec<&str> = error.model_state.keys().map(String::as_str).collect();
            assert_eq!(columns, vec!["categoryName", "id"]);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        post(&api, json!({"id": 1, "categoryName": "again"})).await,
        DataApiOutcome::Error(_)
    ));
    assert!(matches!(
        post(&api, json!(["not", "an", "object"])).await,
        DataApiOutcome::Error(_)
    ));
    assert_eq!(ids(&list(&api, "", None).await).len(), 5);
}

#[tokio::test]
async fn put_updates_known_columns() {
    let api = api(DataApiSettings::default());
    assert_eq!(
        put(&api, "4", json!({"categoryName": "changed", "unknown": 1})).await,
        DataApiOutcome::Success(json!({"id": 4, "categoryName": "changed", "description": "x"}))
    );
    assert_eq!(
        get(&api, "4").await,
        DataApiOutcome::Success(json!({"id": 4, "categoryName": "changed", "description": "x"}))
    );
    assert_eq!(put(&api, "9", json!({})).await, DataApiOutcome::NotFound);
    assert!(matches!(
        put(&api, "4", json!({"description": 3.5, "id": []})).await,
        DataApiOutcome::Error(_)
    ));
    assert!(matches!(
        put(&api, "4", json!({"id": 1})).await,
        DataApiOutcome::Error(_)
    ));
}

#[tokio::test]
async fn delete_removes_the_row() {
    let api = api(DataApiSettings::default());
    assert_eq!(delete(&api, "4").await, DataApiOutcome::Deleted);
    assert_eq!(get(&api, "4").await, DataApiOutcome::NotFound);
    assert_eq!(delete(&api, "4").await, DataApiOutcome::NotFound);
    assert_eq!(ids(&list(&api, "_sort=id", None).await), vec![1, 2, 3]);
}

#[tokio::test]
async fn read_only_settings_forbid_writes() {
    let api = api(DataApiSettings::default().read_only());
    assert_eq!(post(&api, json!({"id": 9})).await, DataApiOutcome::Forbidden);
    assert_eq!(put(&api, "1", json!({})).await, DataApiOutcome::Forbidden);
    assert_eq!(delete(&api, "1").await, DataApiOutcome::Forbidden);
    assert_eq!(ids(&list(&api, "", None).await).len(), 4);
}

#[tokio::test]
async fn policy_sees_the_stored_row() {
    let api = api(DataApiSettings::default().with_policy(
        |operation: Operation, row: Option<&RawRow>| {
            operation != Operation::Update
                || row.is_some_and(|r| r.get("description") != Some(&json!("x")))
        },
    ));
    assert_eq!(
        put(&api, "1", json!({"categoryName": "nope"})).await,
        DataApiOutcome::Forbidden
    );
    assert!(matches!(
        put(&api, "2", json!({"categoryName": "fine"})).await,
        DataApiOutcome::Success(_)
    ));
    assert_eq!(
        get(&api, "1").await,
        DataApiOutcome::Success(json!({"id": 1, "categoryName": "noam", "description": "x"}))
    );
}
