//! Graph templates in the engine's API ("prompt") format.
//!
//! A template is read from storage once per request, normalized into a
//! [`GraphTemplate`], has its placeholder tokens substituted, and is then
//! submitted and dropped. Nothing here is cached across requests.

use indexmap::IndexMap;
use serde::Serialize;

pub mod loader;
pub mod normalize;
pub mod placeholders;
pub mod substitute;

pub use loader::{TemplateLocator, TemplateSource, WorkflowRoots};
pub use normalize::{normalize, parse_template, TemplateShape};
pub use placeholders::{GenerationParams, PlaceholderMap};
pub use substitute::{map_leaves, substitute};

/// A single operation node of a graph template.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    /// Engine operation kind (e.g. `"KSampler"`, `"LoadImage"`). Never empty.
    pub class_type: String,
    /// Parameter values, literal or `[node_id, slot]` links.
    pub inputs: serde_json::Map<String, serde_json::Value>,
    /// Editor metadata (titles etc.), passed through untouched.
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// Canonical graph: ordered mapping node-id -> [`GraphNode`].
///
/// Serializes directly into the body expected under `"prompt"` by the
/// engine's `/prompt` endpoint. Instances are only built by the
/// normalizer and the substitution engine, so every node satisfies the
/// non-empty `class_type` invariant.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct GraphTemplate {
    nodes: IndexMap<String, GraphNode>,
}

impl GraphTemplate {
    /// Number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    /// Iterate nodes in template order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &GraphNode)> {
        self.nodes.iter().map(|(id, node)| (id.as_str(), node))
    }

    /// Convert into a plain JSON value (the engine's API format).
    pub fn to_value(&self) -> serde_json::Value {
        let mut out = serde_json::Map::with_capacity(self.nodes.len());
        for (id, node) in &self.nodes {
            let mut body = serde_json::Map::new();
            body.insert(
                "class_type".to_string(),
                serde_json::Value::String(node.class_type.clone()),
            );
            body.insert(
                "inputs".to_string(),
                serde_json::Value::Object(node.inputs.clone()),
            );
            if let Some(meta) = &node.meta {
                body.insert("_meta".to_string(), meta.clone());
            }
            out.insert(id.clone(), serde_json::Value::Object(body));
        }
        serde_json::Value::Object(out)
    }

    /// Insert a node, returning `false` if the id was already present.
    pub(crate) fn insert(&mut self, id: String, node: GraphNode) -> bool {
        if self.nodes.contains_key(&id) {
            return false;
        }
        self.nodes.insert(id, node);
        true
    }
}
