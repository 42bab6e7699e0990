//! End-to-end round trip: a miniature field-resolving server answers each
//! field identically whether queries arrive standalone or batched, so
//! batching must be observationally equivalent to dispatching each query
//! on its own.

use std::collections::HashMap;

use apollo_compiler::ast;
use graphql_batcher::graphql::Query;
use graphql_batcher::graphql::Response;
use graphql_batcher::Batch;
use serde_json_bytes::json;
use serde_json_bytes::Value;
use tower::BoxError;

/// Resolve a query against a nested JSON fixture: fields look up their
/// name in the current object, response keys honor aliases, arrays map
/// transparently, and fragment spreads flatten into their parent.
fn resolve(query: &Query, fixture: &Value) -> Response {
    let fragments: HashMap<String, Vec<ast::Selection>> = query
        .document
        .definitions
        .iter()
        .filter_map(|definition| match definition {
            ast::Definition::FragmentDefinition(fragment) => Some((
                fragment.name.to_string(),
                fragment.selection_set.clone(),
            )),
            _ => None,
        })
        .collect();
    let operation = query
        .document
        .definitions
        .iter()
        .find_map(|definition| match definition {
            ast::Definition::OperationDefinition(operation) => Some(operation),
            _ => None,
        })
        .expect("a query document has an operation");

    Response::builder()
        .data(resolve_selections(
            &operation.selection_set,
            &fragments,
            fixture,
        ))
        .build()
}

fn resolve_selections(
    selections: &[ast::Selection],
    fragments: &HashMap<String, Vec<ast::Selection>>,
    value: &Value,
) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_selections(selections, fragments, item))
                .collect(),
        ),
        Value::Object(object) => {
            let mut out = serde_json_bytes::Map::new();
            resolve_into(selections, fragments, object, &mut out);
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn resolve_into(
    selections: &[ast::Selection],
    fragments: &HashMap<String, Vec<ast::Selection>>,
    object: &serde_json_bytes::Map<serde_json_bytes::ByteString, Value>,
    out: &mut serde_json_bytes::Map<serde_json_bytes::ByteString, Value>,
) {
    for selection in selections {
        match selection {
            ast::Selection::Field(field) => {
                let key = field.alias.as_ref().unwrap_or(&field.name);
                let resolved = match object.get(field.name.as_str()) {
                    None => Value::Null,
                    Some(value) if field.selection_set.is_empty() => value.clone(),
                    Some(value) => resolve_selections(&field.selection_set, fragments, value),
                };
                out.insert(key.as_str(), resolved);
            }
            ast::Selection::FragmentSpread(spread) => {
                if let Some(selections) = fragments.get(spread.fragment_name.as_str()) {
                    resolve_into(selections, fragments, object, out);
                }
            }
            ast::Selection::InlineFragment(inline) => {
                resolve_into(&inline.selection_set, fragments, object, out);
            }
        }
    }
}

fn fixture() -> Value {
    json!({
        "user": {
            "id": 3,
            "name": "User A",
            "teams": [
                { "name": "Team A", "size": 4 },
                { "name": "Team B", "size": 9 },
            ],
        },
        "viewer": { "id": 1, "login": "ada" },
        "version": "9.1.2",
    })
}

fn queries() -> Vec<Query> {
    let mut user_teams =
        Query::parse("query($id: Int!) { user(id: $id) { id teams { name } } }").unwrap();
    user_teams.variables = json!({ "id": 3 }).as_object().cloned().unwrap();

    let mut user_name = Query::parse("query($id: Int!) { user(id: $id) { id name } }").unwrap();
    user_name.variables = json!({ "id": 3 }).as_object().cloned().unwrap();

    vec![
        user_teams,
        user_name,
        Query::parse("query { viewer { login } version }").unwrap(),
        Query::parse(
            "query { user { ...teamDetails } } \
             fragment teamDetails on User { teams { name size } }",
        )
        .unwrap(),
        Query::parse("query { release: version }").unwrap(),
    ]
}

#[tokio::test]
async fn batched_dispatch_matches_standalone_dispatch() {
    let queries = queries();
    let standalone: Vec<Response> = queries
        .iter()
        .map(|query| resolve(query, &fixture()))
        .collect();

    let server =
        |query: Query| futures::future::ready(Ok::<_, BoxError>(resolve(&query, &fixture())));
    let batch = Batch::new(server);
    let handles: Vec<_> = queries
        .iter()
        .map(|query| batch.queue(query).unwrap())
        .collect();
    batch.run().await.unwrap();

    for (handle, expected) in handles.into_iter().zip(standalone) {
        let response = handle.response().await.unwrap();
        assert_eq!(response.data, expected.data);
        assert!(response.errors.is_empty());
    }
}

#[tokio::test]
async fn engine_round_trip_in_dispatch_order() {
    let queries = queries();
    let merged = graphql_batcher::merge(&queries).unwrap();

    // All five queries are plain read queries, so one physical request
    // covers everything.
    assert_eq!(merged.merged_queries().len(), queries.len());
    assert!(merged.unmerged_queries().is_empty());
    let dispatch_list = merged.all_queries();
    assert_eq!(dispatch_list.len(), 1);

    let responses: Vec<Response> = dispatch_list
        .iter()
        .map(|query| resolve(query, &fixture()))
        .collect();
    let unmerged = merged.unmerge_all_queries(&responses).unwrap();

    for (query, response) in queries.iter().zip(unmerged) {
        assert_eq!(response.data, resolve(query, &fixture()).data);
    }
}
