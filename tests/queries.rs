//! End-to-end queries through `ActiveQuery` against the in-memory store,
//! and agreement between the primary-key fast path and the scan program.

use pretty_assertions::assert_eq;
use serde_json::json;

use redlua::planner;
use redlua::prelude::*;
use redlua::reply::{Output, decode_output};

fn customer_table() -> Table {
    Table::new("customer")
}

/// ids 1..=5; id 4 is left as a stale list entry without a hash, id 5 has
/// no age.
fn customers() -> MemoryStore {
    let table = customer_table();
    let mut store = MemoryStore::new();
    let rows: [(&str, Option<i64>, i64); 5] = [
        ("ann", Some(30), 2),
        ("bob", Some(25), 2),
        ("cid", Some(40), 1),
        ("dan", Some(51), 1),
        ("eve", None, 2),
    ];
    for (name, age, status) in rows {
        store
            .insert(
                &table,
                [("name", Literal::from(name)), ("age", age.into()), ("status", status.into())],
            )
            .unwrap();
    }
    assert!(store.remove_row(&table, "4"));
    store
}

fn ids(rows: &[Row]) -> Vec<&str> {
    rows.iter().map(|r| r["id"].as_str()).collect()
}

#[tokio::test]
async fn test_status_ordered_by_age() {
    let table = customer_table();
    let mut store = MemoryStore::new();
    for (status, age) in [(2, 30), (2, 25), (1, 40)] {
        store
            .insert(&table, [("status", status), ("age", age)])
            .unwrap();
    }

    let rows = ActiveQuery::new(table)
        .filter_json(&json!({"status": 2}))
        .unwrap()
        .order_by("age", Direction::Asc)
        .all(&mut store)
        .await
        .unwrap();
    assert_eq!(ids(&rows), vec!["2", "1"]);
    assert_eq!(rows[0]["age"], "25");
}

#[tokio::test]
async fn test_pagination_with_order() {
    let mut store = customers();
    let q = ActiveQuery::new(customer_table())
        .filter(Filter::gte("age", 0))
        .order_by("age", Direction::Desc);

    let page = q.clone().offset(1).limit(2).all(&mut store).await;
    // eve has no age; comparing it fails inside the script.
    assert!(matches!(page, Err(RedluaError::Server(_))));

    let q = ActiveQuery::new(customer_table())
        .filter(Filter::not_in("name", ["eve"]))
        .order_by("age", Direction::Desc);
    let page = q.clone().offset(1).limit(2).all(&mut store).await.unwrap();
    assert_eq!(ids(&page), vec!["1", "2"]);
    assert_eq!(q.offset(4).all(&mut store).await.unwrap(), Vec::<Row>::new());
}

#[tokio::test]
async fn test_empty_in_and_not_in() {
    let table = customer_table();
    let mut store = MemoryStore::new();
    for name in ["a", "b", "c"] {
        store.insert(&table, [("name", name)]).unwrap();
    }

    let none = ActiveQuery::new(table.clone()).filter(Filter::is_in("name", Vec::<&str>::new()));
    assert_eq!(none.count(&mut store).await.unwrap(), 0);
    let every = ActiveQuery::new(table).filter(Filter::not_in("name", Vec::<&str>::new()));
    assert_eq!(every.count(&mut store).await.unwrap(), 3);
}

#[tokio::test]
async fn test_average_of_nothing_fails_on_both_paths() {
    let mut store = customers();
    let by_pk = ActiveQuery::new(customer_table()).filter(Filter::eq("id", 42));
    assert!(matches!(by_pk.average(&mut store, "age").await, Err(RedluaError::EmptyAggregate)));

    let by_scan = ActiveQuery::new(customer_table()).filter(Filter::eq("status", 9));
    assert!(matches!(by_scan.average(&mut store, "age").await, Err(RedluaError::EmptyAggregate)));
    assert_eq!(store.issued(), ["HGETALL", "EVAL"]);
}

#[tokio::test]
async fn test_composite_key_in_never_reaches_the_store() {
    let table = Table::new("line").with_primary_key(["id", "tenant", "region"]);
    let mut store = MemoryStore::new();
    let err = ActiveQuery::new(table)
        .filter_json(&json!(["in", "id", [1, 2, 3]]))
        .unwrap()
        .all(&mut store)
        .await
        .unwrap_err();
    assert!(matches!(err, RedluaError::NotSupported(_)));
    assert!(store.issued().is_empty());
}

#[tokio::test]
async fn test_composite_key_lookup() {
    let table = Table::new("order_item").with_primary_key(["order_id", "item_id"]);
    let mut store = MemoryStore::new();
    let pk = store
        .insert(&table, [("order_id", Literal::from(7)), ("item_id", 2.into()), ("qty", 5.into())])
        .unwrap();
    assert_eq!(pk, build_key(&PkValue::composite([("item_id", 2), ("order_id", 7)])));

    let q = ActiveQuery::new(table).filter(Filter::hash([("order_id", 7.into()), ("item_id", 2.into())]));
    assert_eq!(q.scalar(&mut store, "qty").await.unwrap().as_deref(), Some("5"));
    assert_eq!(store.issued(), ["HGETALL"]);
}

#[tokio::test]
async fn test_cluster_store_roundtrip() {
    let table = customer_table();
    let mut store = MemoryStore::new().with_cluster(true);
    store.insert(&table, [("status", 1)]).unwrap();
    store.insert(&table, [("status", 2)]).unwrap();

    let q = ActiveQuery::new(table.clone());
    assert_eq!(q.count(&mut store).await.unwrap(), 2);
    let q = q.filter(Filter::eq("status", 2));
    assert_eq!(q.column(&mut store, "id").await.unwrap(), vec![Some("2".to_string())]);
    assert!(ActiveQuery::new(table).filter(Filter::eq("id", 1)).exists(&mut store).await.unwrap());
}

#[tokio::test]
async fn test_alpha_ordering_when_values_are_not_numeric() {
    let table = Table::new("tag");
    let mut store = MemoryStore::new();
    for label in ["b", "10", "a", "9"] {
        store.insert(&table, [("label", label)]).unwrap();
    }
    let labels = ActiveQuery::new(table)
        .order_by("label", Direction::Asc)
        .column(&mut store, "label")
        .await
        .unwrap();
    let labels: Vec<&str> = labels.iter().flatten().map(String::as_str).collect();
    assert_eq!(labels, vec!["10", "9", "a", "b"]);
}

/// Results whose order is not defined by the query are compared as sets.
fn normalize(output: Output, ordered: bool) -> Output {
    match output {
        Output::Rows(mut rows) if !ordered => {
            rows.sort_by(|a, b| a.get("id").cmp(&b.get("id")));
            Output::Rows(rows)
        }
        Output::Column(mut values) if !ordered => {
            values.sort();
            Output::Column(values)
        }
        other => other,
    }
}

async fn run_both(store: &mut MemoryStore, query: &Query, kind: QueryKind) -> (Result<Output, String>, Result<Output, String>) {
    let table = customer_table();
    let prefix = table.key_prefix(false);
    let filter = query.filter.as_ref().unwrap();
    let keys = planner::candidates(filter, &table)
        .unwrap()
        .unwrap_or_else(|| panic!("not fast-path eligible: {:?}", filter));

    let ordered = !query.order_by.is_empty();
    let fast = planner::run(store, &prefix, query, &kind, &keys)
        .await
        .map(|o| normalize(o, ordered))
        .map_err(|e| e.to_string());

    let program = ScriptBuilder::new(prefix).build(query, kind.clone()).unwrap();
    let scan = match store.execute(Command::Eval { program }).await {
        Ok(reply) => decode_output(&kind, reply),
        Err(e) => Err(e),
    }
    .map(|o| normalize(o, ordered))
    .map_err(|e| e.to_string());

    (fast, scan)
}

/// `customers()` plus id 10 (age 30 like ann, no name) and id 11 (age 25
/// like bob), so age ties need the key tie-break.
fn customers_with_ties(resp3: bool) -> MemoryStore {
    let table = customer_table();
    let mut store = customers().with_resp3(resp3);
    store
        .insert(&table, [("id", Literal::from(10)), ("age", 30.into()), ("status", 1.into())])
        .unwrap();
    store
        .insert(&table, [("id", Literal::from(11)), ("name", "gus".into()), ("age", 25.into())])
        .unwrap();
    store
}

#[tokio::test]
async fn test_fast_path_agrees_with_scan() {
    for resp3 in [false, true] {
        let mut store = customers_with_ties(resp3);
        check_paths_agree(&mut store).await;
    }
}

async fn check_paths_agree(store: &mut MemoryStore) {
    let filters = vec![
        Filter::eq("id", 1),
        Filter::eq("id", "2"),
        Filter::eq("id", 4),
        Filter::eq("id", 99),
        Filter::hash([("id", HashValue::list([3, 1]))]),
        Filter::hash([("id", HashValue::list([2, 2, 9, 5]))]),
        Filter::hash([("id", HashValue::list(Vec::<i64>::new()))]),
        Filter::is_in("id", [5, 3, 2, 1]),
        Filter::in_tuples(["id"], [InItem::tuple([("id", 1)]), InItem::tuple([("id", 3)])]),
        Filter::is_in("id", [10, 2, 11, 1]),
        Filter::hash([("id", HashValue::list([11, 10, 3, 1]))]),
    ];
    let kinds = vec![
        QueryKind::All,
        QueryKind::One,
        QueryKind::Count,
        QueryKind::Column("name".into()),
        QueryKind::Sum("age".into()),
        QueryKind::Average("age".into()),
        QueryKind::Min("age".into()),
        QueryKind::Max("age".into()),
    ];

    for filter in &filters {
        let unordered = Query::new().filter(filter.clone());
        let by_age = unordered.clone().order_by("age", Direction::Asc);
        let by_age_desc = unordered.clone().order_by("age", Direction::Desc);
        let paged = unordered.clone().order_by("name", Direction::Desc).offset(1).limit(2);

        for kind in &kinds {
            for query in [&unordered, &by_age, &by_age_desc, &paged] {
                // Without an order the first row is whichever comes first.
                if *kind == QueryKind::One && query.order_by.is_empty() {
                    continue;
                }
                // Counting by primary key ignores pagination.
                if *kind == QueryKind::Count && query.limit.is_some() {
                    continue;
                }
                let (fast, scan) = run_both(store, query, kind.clone()).await;
                assert_eq!(fast, scan, "{:?} / {:?} / {:?}", filter, kind, query.order_by);
            }
        }
    }
}

#[tokio::test]
async fn test_tied_sort_values_order_by_key_on_both_paths() {
    let mut store = customers_with_ties(false);
    let by_pk = ActiveQuery::new(customer_table())
        .filter(Filter::is_in("id", [2, 10, 1, 11]))
        .order_by("age", Direction::Asc);
    let fast = by_pk.all(&mut store).await.unwrap();
    assert_eq!(ids(&fast), vec!["11", "2", "1", "10"]);

    let by_scan = ActiveQuery::new(customer_table())
        .filter(Filter::is_in("age", [25, 30]))
        .order_by("age", Direction::Desc);
    let scan = by_scan.all(&mut store).await.unwrap();
    assert_eq!(ids(&scan), vec!["10", "1", "2", "11"]);
    assert_eq!(store.issued().last(), Some(&"EVAL"));
}

#[tokio::test]
async fn test_resp3_missing_values_and_empty_aggregates() {
    let mut store = customers_with_ties(true);
    let scan = ActiveQuery::new(customer_table()).filter(Filter::eq("status", 1));
    let names = scan.clone().order_by("age", Direction::Asc).column(&mut store, "name").await.unwrap();
    assert_eq!(names, vec![None, Some("cid".to_string())]);

    let nothing = ActiveQuery::new(customer_table()).filter(Filter::eq("status", 9));
    assert!(matches!(nothing.average(&mut store, "age").await, Err(RedluaError::EmptyAggregate)));
    assert_eq!(nothing.min(&mut store, "age").await.unwrap(), None);
    assert_eq!(nothing.max(&mut store, "age").await.unwrap(), None);
}

#[tokio::test]
async fn test_large_sums_keep_every_digit() {
    let table = Table::new("ledger");
    let mut store = MemoryStore::new();
    for amount in [123456789012345_i64, 1] {
        store.insert(&table, [("amount", amount)]).unwrap();
    }
    let by_scan = ActiveQuery::new(table.clone()).filter(Filter::gte("amount", 0));
    assert_eq!(by_scan.sum(&mut store, "amount").await.unwrap(), 123456789012346.0);
    let by_pk = ActiveQuery::new(table).filter(Filter::is_in("id", [1, 2]));
    assert_eq!(by_pk.sum(&mut store, "amount").await.unwrap(), 123456789012346.0);
    assert_eq!(store.issued(), ["EVAL", "HGETALL", "HGETALL"]);
}

#[tokio::test]
async fn test_unbounded_limit_on_both_paths() {
    let mut store = customers();
    let by_pk = ActiveQuery::new(customer_table())
        .filter(Filter::is_in("id", [1, 2]))
        .offset(1)
        .limit(usize::MAX);
    assert_eq!(ids(&by_pk.all(&mut store).await.unwrap()), vec!["2"]);

    let by_scan = ActiveQuery::new(customer_table())
        .filter(Filter::eq("status", 2))
        .offset(1)
        .limit(usize::MAX);
    assert_eq!(ids(&by_scan.all(&mut store).await.unwrap()), vec!["2", "5"]);
}

#[tokio::test]
async fn test_fast_path_one_unordered_is_a_match() {
    let mut store = customers();
    let q = ActiveQuery::new(customer_table()).filter(Filter::is_in("id", [3, 1]));
    let one = q.one(&mut store).await.unwrap().unwrap();
    let all = q.all(&mut store).await.unwrap();
    assert!(all.contains(&one));
}
