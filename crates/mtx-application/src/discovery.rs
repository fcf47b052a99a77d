//! Tool discovery.
//!
//! Introspects the registry: catalog listing with category/tag filters,
//! per-tool details, and a relationship graph inferred from shared
//! categories and tags. The graph is undirected; edges are deduplicated by
//! unordered node pair and kind, and nodes are grouped by category in the
//! rendered formats.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use petgraph::graph::{NodeIndex, UnGraph};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use mtx_domain::envelope::{ErrorOptions, SuccessOptions, ToolResponse};
use mtx_domain::tool::ToolDescriptor;

use crate::registry::ToolRegistry;

/// Filters for [`ToolDiscovery::list_available_tools`].
#[derive(Debug, Clone, Default)]
pub struct ListToolsFilter {
    /// Keep only tools in this category.
    pub category: Option<String>,
    /// Keep only tools carrying this tag.
    pub tag: Option<String>,
    /// Include full parameter schemas in the listing.
    pub include_schemas: bool,
}

/// Output format for [`ToolDiscovery::visualize_tool_relationships`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphFormat {
    /// Node/edge lists as JSON.
    Json,
    /// Mermaid flowchart text.
    Mermaid,
    /// GraphViz dot text.
    Dot,
}

#[derive(Debug, Clone)]
struct GraphNode {
    id: String,
    category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum EdgeKind {
    Category(String),
    Tag(String),
}

impl EdgeKind {
    fn label(&self) -> String {
        match self {
            Self::Category(c) => format!("category: {c}"),
            Self::Tag(t) => format!("tag: {t}"),
        }
    }
}

/// Read-only discovery surface over the tool registry.
#[derive(Debug)]
pub struct ToolDiscovery {
    registry: Arc<ToolRegistry>,
}

impl ToolDiscovery {
    /// Wrap the registry.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Catalog listing with optional category/tag filters.
    pub fn list_available_tools(&self, filter: &ListToolsFilter) -> ToolResponse {
        let started = Instant::now();
        let tools: Vec<Value> = self
            .registry
            .descriptors()
            .into_iter()
            .filter(|tool| {
                filter
                    .category
                    .as_deref()
                    .is_none_or(|category| tool.category == category)
            })
            .filter(|tool| {
                filter
                    .tag
                    .as_deref()
                    .is_none_or(|tag| tool.tags.iter().any(|t| t == tag))
            })
            .map(|tool| describe(&tool, filter.include_schemas))
            .collect();

        ToolResponse::success(
            json!({"total": tools.len(), "tools": tools}),
            "list_available_tools",
            SuccessOptions {
                execution_time_ms: elapsed_ms(started),
                ..SuccessOptions::default()
            },
        )
    }

    /// Full details for one tool; 404 envelope when unknown.
    pub fn get_tool_details(&self, tool_name: &str) -> ToolResponse {
        let started = Instant::now();
        match self.registry.get(tool_name) {
            Some(tool) => ToolResponse::success(
                describe(&tool.descriptor, true),
                "get_tool_details",
                SuccessOptions {
                    execution_time_ms: elapsed_ms(started),
                    ..SuccessOptions::default()
                },
            ),
            None => ToolResponse::error(
                &format!("NotFound: tool {tool_name}"),
                "get_tool_details",
                ErrorOptions {
                    code: Some(404),
                    execution_time_ms: elapsed_ms(started),
                    ..ErrorOptions::default()
                },
            ),
        }
    }

    /// Relationship graph over the catalog in the requested format.
    pub fn visualize_tool_relationships(&self, format: GraphFormat) -> ToolResponse {
        let started = Instant::now();
        let (graph, edges) = self.build_graph();
        let rendered = match format {
            GraphFormat::Json => render_json(&graph, &edges),
            GraphFormat::Mermaid => json!({
                "format": "mermaid",
                "diagram": render_mermaid(&graph, &edges),
            }),
            GraphFormat::Dot => json!({
                "format": "dot",
                "diagram": render_dot(&graph, &edges),
            }),
        };
        ToolResponse::success(
            rendered,
            "visualize_tool_relationships",
            SuccessOptions {
                execution_time_ms: elapsed_ms(started),
                ..SuccessOptions::default()
            },
        )
    }

    /// Build the undirected graph with edges deduplicated by unordered
    /// pair and kind.
    fn build_graph(
        &self,
    ) -> (
        UnGraph<GraphNode, EdgeKind>,
        Vec<(NodeIndex, NodeIndex, EdgeKind)>,
    ) {
        let descriptors = self.registry.descriptors();
        let mut graph = UnGraph::<GraphNode, EdgeKind>::new_undirected();
        let indices: Vec<NodeIndex> = descriptors
            .iter()
            .map(|tool| {
                graph.add_node(GraphNode {
                    id: tool.id.clone(),
                    category: tool.category.clone(),
                })
            })
            .collect();

        let mut seen: HashSet<(usize, usize, EdgeKind)> = HashSet::new();
        let mut edges = Vec::new();
        for (a, tool_a) in descriptors.iter().enumerate() {
            for (b, tool_b) in descriptors.iter().enumerate().skip(a + 1) {
                let mut kinds = Vec::new();
                if tool_a.category == tool_b.category {
                    kinds.push(EdgeKind::Category(tool_a.category.clone()));
                }
                for tag in &tool_a.tags {
                    if tool_b.tags.contains(tag) {
                        kinds.push(EdgeKind::Tag(tag.clone()));
                    }
                }
                for kind in kinds {
                    if seen.insert((a, b, kind.clone())) {
                        graph.add_edge(indices[a], indices[b], kind.clone());
                        edges.push((indices[a], indices[b], kind));
                    }
                }
            }
        }
        (graph, edges)
    }
}

fn describe(tool: &ToolDescriptor, include_schema: bool) -> Value {
    let mut entry = json!({
        "id": tool.id,
        "name": tool.name,
        "version": tool.version,
        "category": tool.category,
        "tags": tool.tags,
        "description": tool.description,
    });
    if include_schema {
        if let (Value::Object(entry), Ok(parameters)) =
            (&mut entry, serde_json::to_value(&tool.parameters))
        {
            entry.insert("parameters".to_owned(), parameters);
        }
    }
    entry
}

fn render_json(
    graph: &UnGraph<GraphNode, EdgeKind>,
    edges: &[(NodeIndex, NodeIndex, EdgeKind)],
) -> Value {
    let nodes: Vec<Value> = graph
        .node_indices()
        .map(|index| {
            let node = &graph[index];
            json!({"id": node.id, "category": node.category})
        })
        .collect();
    let edges: Vec<Value> = edges
        .iter()
        .map(|(a, b, kind)| {
            json!({
                "from": graph[*a].id,
                "to": graph[*b].id,
                "label": kind.label(),
            })
        })
        .collect();
    json!({"format": "json", "nodes": nodes, "edges": edges})
}

fn render_mermaid(
    graph: &UnGraph<GraphNode, EdgeKind>,
    edges: &[(NodeIndex, NodeIndex, EdgeKind)],
) -> String {
    let mut out = String::from("graph TD\n");
    for category in categories(graph) {
        let _ = writeln!(out, "  subgraph {}", sanitize(&category));
        for index in graph.node_indices() {
            let node = &graph[index];
            if node.category == category {
                let _ = writeln!(out, "    {}[\"{}\"]", sanitize(&node.id), node.id);
            }
        }
        out.push_str("  end\n");
    }
    for (a, b, kind) in edges {
        let _ = writeln!(
            out,
            "  {} ---|{}| {}",
            sanitize(&graph[*a].id),
            kind.label(),
            sanitize(&graph[*b].id)
        );
    }
    out
}

fn render_dot(
    graph: &UnGraph<GraphNode, EdgeKind>,
    edges: &[(NodeIndex, NodeIndex, EdgeKind)],
) -> String {
    let mut out = String::from("graph tools {\n");
    for (i, category) in categories(graph).iter().enumerate() {
        let _ = writeln!(out, "  subgraph cluster_{i} {{\n    label=\"{category}\";");
        for index in graph.node_indices() {
            let node = &graph[index];
            if &node.category == category {
                let _ = writeln!(out, "    \"{}\";", node.id);
            }
        }
        out.push_str("  }\n");
    }
    for (a, b, kind) in edges {
        let _ = writeln!(
            out,
            "  \"{}\" -- \"{}\" [label=\"{}\"];",
            graph[*a].id,
            graph[*b].id,
            kind.label()
        );
    }
    out.push_str("}\n");
    out
}

fn categories(graph: &UnGraph<GraphNode, EdgeKind>) -> Vec<String> {
    let mut all: Vec<String> = graph
        .node_indices()
        .map(|index| graph[index].category.clone())
        .collect();
    all.sort();
    all.dedup();
    all
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
