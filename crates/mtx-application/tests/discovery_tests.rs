#![allow(clippy::expect_used, clippy::unwrap_used, missing_docs)]

use std::sync::Arc;

use serde_json::{json, Value};

use mtx_application::discovery::{GraphFormat, ListToolsFilter, ToolDiscovery};
use mtx_application::registry::ToolRegistry;
use mtx_domain::tool::{HandlerOutcome, ToolDescriptor, ToolHandler};

fn noop_handler() -> ToolHandler {
    Arc::new(|_params, _state| Box::pin(async { Ok(HandlerOutcome::ok(Value::Null)) }))
}

fn seeded_registry() -> Arc<ToolRegistry> {
    let registry = Arc::new(ToolRegistry::new());
    registry
        .register(
            ToolDescriptor::new("repo_map", "Maps repository structure")
                .with_category("analysis")
                .with_tags(["git", "structure"]),
            noop_handler(),
        )
        .expect("register repo_map");
    registry
        .register(
            ToolDescriptor::new("churn", "Computes file churn")
                .with_category("analysis")
                .with_tags(["git", "metrics"]),
            noop_handler(),
        )
        .expect("register churn");
    registry
        .register(
            ToolDescriptor::new("greet", "Greets by name").with_category("demo"),
            noop_handler(),
        )
        .expect("register greet");
    registry
}

#[test]
fn listing_without_filters_returns_everything() {
    let discovery = ToolDiscovery::new(seeded_registry());
    let envelope = discovery.list_available_tools(&ListToolsFilter::default());

    assert!(envelope.status.success);
    let data = envelope.data.expect("data");
    assert_eq!(data["total"], json!(3));
    // Sorted by id for deterministic output.
    let ids: Vec<&str> = data["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["churn", "greet", "repo_map"]);
}

#[test]
fn category_and_tag_filters_compose() {
    let discovery = ToolDiscovery::new(seeded_registry());

    let by_category = discovery.list_available_tools(&ListToolsFilter {
        category: Some("analysis".to_owned()),
        ..ListToolsFilter::default()
    });
    assert_eq!(by_category.data.unwrap()["total"], json!(2));

    let by_tag = discovery.list_available_tools(&ListToolsFilter {
        tag: Some("metrics".to_owned()),
        ..ListToolsFilter::default()
    });
    let data = by_tag.data.unwrap();
    assert_eq!(data["total"], json!(1));
    assert_eq!(data["tools"][0]["id"], json!("churn"));
}

#[test]
fn schemas_are_included_only_on_request() {
    let discovery = ToolDiscovery::new(seeded_registry());

    let without = discovery.list_available_tools(&ListToolsFilter::default());
    assert!(without.data.unwrap()["tools"][0].get("parameters").is_none());

    let with = discovery.list_available_tools(&ListToolsFilter {
        include_schemas: true,
        ..ListToolsFilter::default()
    });
    assert!(with.data.unwrap()["tools"][0].get("parameters").is_some());
}

#[test]
fn details_for_unknown_tool_is_404() {
    let discovery = ToolDiscovery::new(seeded_registry());
    let envelope = discovery.get_tool_details("missing");
    assert!(!envelope.status.success);
    assert_eq!(envelope.status.code, 404);
}

#[test]
fn details_include_the_session_id_extension() {
    let discovery = ToolDiscovery::new(seeded_registry());
    let envelope = discovery.get_tool_details("greet");
    let data = envelope.data.expect("data");
    let names: Vec<&str> = data["parameters"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"sessionId"));
}

#[test]
fn json_graph_deduplicates_edges_by_unordered_pair() {
    let discovery = ToolDiscovery::new(seeded_registry());
    let envelope = discovery.visualize_tool_relationships(GraphFormat::Json);
    let data = envelope.data.expect("data");

    let edges = data["edges"].as_array().unwrap();
    // repo_map ↔ churn share one category and one tag: exactly two edges,
    // not four (the pair is undirected).
    assert_eq!(edges.len(), 2);
    let labels: Vec<&str> = edges
        .iter()
        .map(|e| e["label"].as_str().unwrap())
        .collect();
    assert!(labels.contains(&"category: analysis"));
    assert!(labels.contains(&"tag: git"));

    let nodes = data["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 3);
}

#[test]
fn mermaid_output_groups_nodes_by_category() {
    let discovery = ToolDiscovery::new(seeded_registry());
    let envelope = discovery.visualize_tool_relationships(GraphFormat::Mermaid);
    let diagram = envelope.data.expect("data")["diagram"]
        .as_str()
        .unwrap()
        .to_owned();

    assert!(diagram.starts_with("graph TD"));
    assert!(diagram.contains("subgraph analysis"));
    assert!(diagram.contains("subgraph demo"));
    assert!(diagram.contains("churn ---|category: analysis| repo_map"));
}

#[test]
fn dot_output_is_an_undirected_graph() {
    let discovery = ToolDiscovery::new(seeded_registry());
    let envelope = discovery.visualize_tool_relationships(GraphFormat::Dot);
    let diagram = envelope.data.expect("data")["diagram"]
        .as_str()
        .unwrap()
        .to_owned();

    assert!(diagram.starts_with("graph tools {"));
    assert!(diagram.contains("\"churn\" -- \"repo_map\""));
    assert!(diagram.contains("cluster_0"));
}
