//! Template normalization.
//!
//! Two input shapes are accepted and converted into one canonical
//! [`GraphTemplate`]:
//!
//! 1. An API graph: `{"<id>": {"class_type" | "type": ..., "inputs": {...}}}`.
//! 2. A node list: `[{"id": ..., "class_type": ...}, ["<id>", {...}], ...]`,
//!    where missing ids default to the 1-based position.
//!
//! Editor exports (`{"nodes": [...], "links": [...]}`) are recognized and
//! rejected; they have to be exported in API format by the offline patch
//! tool first. Conversion is all-or-nothing.

use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::template::{GraphNode, GraphTemplate};

/// Field names accepted for the operation kind, in lookup order.
const CLASS_TYPE_FIELDS: [&str; 2] = ["class_type", "type"];

/// Envelope keys that wrap the actual graph (`{"prompt": {...}}`).
const ENVELOPE_KEYS: [&str; 2] = ["prompt", "workflow"];

/// The raw shape of a template document, decided once at load time.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateShape {
    /// Mapping node-id -> node body.
    ApiGraph(Map<String, Value>),
    /// Sequence of node entries (objects or `[id, body]` pairs).
    NodeList(Vec<Value>),
    /// UI export with separate `nodes` and `links` arrays.
    EditorExport,
}

impl TemplateShape {
    /// Classify a parsed document, unwrapping `prompt`/`workflow` envelopes.
    pub fn classify(value: Value) -> Result<Self, CoreError> {
        match value {
            Value::Object(mut map) => {
                if is_editor_export(&map) {
                    return Ok(TemplateShape::EditorExport);
                }
                for key in ENVELOPE_KEYS {
                    let wraps_graph = map
                        .get(key)
                        .is_some_and(|inner| is_container(inner) && !is_node_body(inner));
                    if wraps_graph {
                        if let Some(inner) = map.remove(key) {
                            return Self::classify(inner);
                        }
                    }
                }
                Ok(TemplateShape::ApiGraph(map))
            }
            Value::Array(entries) => Ok(TemplateShape::NodeList(entries)),
            other => Err(CoreError::InvalidFormat(format!(
                "template must be a JSON object or array, got {}",
                json_kind(&other)
            ))),
        }
    }
}

/// Parse raw template bytes into a canonical graph.
pub fn parse_template(bytes: &[u8]) -> Result<GraphTemplate, CoreError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| CoreError::InvalidFormat(format!("template is not valid JSON: {e}")))?;
    normalize(value)
}

/// Normalize an already-parsed template document.
pub fn normalize(value: Value) -> Result<GraphTemplate, CoreError> {
    let template = match TemplateShape::classify(value)? {
        TemplateShape::ApiGraph(map) => from_api_graph(map)?,
        TemplateShape::NodeList(entries) => from_node_list(entries)?,
        TemplateShape::EditorExport => {
            return Err(CoreError::UnsupportedFormat(
                "editor exports with 'nodes'/'links' cannot be submitted; \
                 export the workflow in API format first"
                    .to_string(),
            ))
        }
    };

    if template.is_empty() {
        return Err(CoreError::InvalidFormat(
            "template must contain at least one node".to_string(),
        ));
    }
    Ok(template)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn from_api_graph(map: Map<String, Value>) -> Result<GraphTemplate, CoreError> {
    let mut template = GraphTemplate::default();
    for (id, body) in map {
        let node = node_from_body(&id, body)?;
        template.insert(id, node);
    }
    Ok(template)
}

fn from_node_list(entries: Vec<Value>) -> Result<GraphTemplate, CoreError> {
    let mut template = GraphTemplate::default();

    for (index, entry) in entries.into_iter().enumerate() {
        let position = index + 1;
        let (id, body) = match entry {
            Value::Array(mut pair) if pair.len() == 2 => {
                let body = pair.pop().unwrap_or(Value::Null);
                let raw_id = pair.pop().unwrap_or(Value::Null);
                (node_id(&raw_id, position)?, body)
            }
            Value::Object(map) => {
                let id = match map.get("id") {
                    Some(raw_id) if !raw_id.is_null() => node_id(raw_id, position)?,
                    _ => position.to_string(),
                };
                (id, Value::Object(map))
            }
            other => {
                return Err(CoreError::InvalidFormat(format!(
                    "node entry {position} must be an object or an [id, node] pair, got {}",
                    json_kind(&other)
                )))
            }
        };

        let node = node_from_body(&id, body)?;
        if !template.insert(id.clone(), node) {
            return Err(CoreError::InvalidFormat(format!("duplicate node id '{id}'")));
        }
    }

    Ok(template)
}

fn node_from_body(id: &str, body: Value) -> Result<GraphNode, CoreError> {
    let Value::Object(mut body) = body else {
        return Err(CoreError::InvalidFormat(format!(
            "node '{id}' must be an object"
        )));
    };

    let class_type = CLASS_TYPE_FIELDS
        .iter()
        .find_map(|field| body.get(*field).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            CoreError::InvalidFormat(format!(
                "node '{id}' is missing required 'class_type' (or 'type') field"
            ))
        })?;

    let inputs = match body.remove("inputs") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(inputs)) => inputs,
        Some(other) => {
            return Err(CoreError::InvalidFormat(format!(
                "node '{id}' has non-object 'inputs' ({})",
                json_kind(&other)
            )))
        }
    };

    Ok(GraphNode {
        class_type,
        inputs,
        meta: body.remove("_meta"),
    })
}

fn node_id(raw: &Value, position: usize) -> Result<String, CoreError> {
    match raw {
        Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(CoreError::InvalidFormat(format!(
            "node entry {position} has an invalid id ({})",
            json_kind(other)
        ))),
    }
}

fn is_editor_export(map: &Map<String, Value>) -> bool {
    map.get("nodes").is_some_and(Value::is_array) && map.get("links").is_some_and(Value::is_array)
}

fn is_container(value: &Value) -> bool {
    value.is_object() || value.is_array()
}

fn is_node_body(value: &Value) -> bool {
    value.as_object().is_some_and(|body| {
        CLASS_TYPE_FIELDS
            .iter()
            .any(|field| body.get(*field).is_some_and(Value::is_string))
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn two_node_graph() -> Value {
        json!({
            "1": {"class_type": "A", "inputs": {"p": "__X__"}},
            "2": {"class_type": "B", "inputs": {}}
        })
    }

    #[test]
    fn api_graph_is_accepted_as_is() {
        let template = normalize(two_node_graph()).unwrap();

        assert_eq!(template.len(), 2);
        assert_eq!(template.node("1").unwrap().class_type, "A");
        assert_eq!(template.node("1").unwrap().inputs["p"], "__X__");
        assert_eq!(template.to_value(), two_node_graph());
    }

    #[test]
    fn type_alias_is_accepted() {
        let template = normalize(json!({
            "7": {"type": "SaveImage", "inputs": {"images": ["8", 0]}}
        }))
        .unwrap();

        assert_eq!(template.node("7").unwrap().class_type, "SaveImage");
    }

    #[test]
    fn missing_inputs_default_to_empty() {
        let template = normalize(json!({"1": {"class_type": "A"}})).unwrap();
        assert!(template.node("1").unwrap().inputs.is_empty());
    }

    #[test]
    fn meta_is_preserved() {
        let template = normalize(json!({
            "6": {"class_type": "CLIPTextEncode", "inputs": {}, "_meta": {"title": "Positive"}}
        }))
        .unwrap();

        assert_eq!(
            template.node("6").unwrap().meta,
            Some(json!({"title": "Positive"}))
        );
    }

    #[test]
    fn node_order_is_preserved() {
        let template = normalize(json!({
            "10": {"class_type": "A"},
            "2": {"class_type": "B"},
            "7": {"class_type": "C"}
        }))
        .unwrap();

        let ids: Vec<&str> = template.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["10", "2", "7"]);
    }

    #[test]
    fn node_list_with_ids() {
        let template = normalize(json!([
            {"id": 3, "class_type": "KSampler", "inputs": {"seed": 1}},
            {"id": "9", "class_type": "SaveImage"}
        ]))
        .unwrap();

        assert_eq!(template.len(), 2);
        assert_eq!(template.node("3").unwrap().class_type, "KSampler");
        assert_eq!(template.node("9").unwrap().class_type, "SaveImage");
    }

    #[test]
    fn node_list_ids_default_to_position() {
        let template = normalize(json!([
            {"class_type": "A"},
            {"class_type": "B"}
        ]))
        .unwrap();

        assert_eq!(template.node("1").unwrap().class_type, "A");
        assert_eq!(template.node("2").unwrap().class_type, "B");
    }

    #[test]
    fn node_list_accepts_pairs() {
        let template = normalize(json!([
            ["4", {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "x"}}],
            [5, {"type": "EmptyLatentImage"}]
        ]))
        .unwrap();

        assert_eq!(template.node("4").unwrap().inputs["ckpt_name"], "x");
        assert_eq!(template.node("5").unwrap().class_type, "EmptyLatentImage");
    }

    #[test]
    fn duplicate_ids_in_list_are_rejected() {
        let err = normalize(json!([
            {"id": 1, "class_type": "A"},
            ["1", {"class_type": "B"}]
        ]))
        .unwrap_err();

        assert_matches!(err, CoreError::InvalidFormat(msg) if msg.contains("duplicate"));
    }

    #[test]
    fn editor_export_is_unsupported() {
        let err = normalize(json!({
            "nodes": [{"id": 1, "type": "KSampler", "widgets_values": [1]}],
            "links": []
        }))
        .unwrap_err();

        assert_matches!(err, CoreError::UnsupportedFormat(_));
    }

    #[test]
    fn wrapped_editor_export_is_unsupported() {
        let err = normalize(json!({
            "workflow": {"nodes": [], "links": []}
        }))
        .unwrap_err();

        assert_matches!(err, CoreError::UnsupportedFormat(_));
    }

    #[test]
    fn prompt_envelope_is_unwrapped() {
        let template = normalize(json!({"prompt": two_node_graph()})).unwrap();
        assert_eq!(template.len(), 2);
    }

    #[test]
    fn node_named_prompt_is_not_an_envelope() {
        let template = normalize(json!({
            "prompt": {"class_type": "CLIPTextEncode", "inputs": {"text": "hi"}}
        }))
        .unwrap();

        assert_eq!(template.node("prompt").unwrap().class_type, "CLIPTextEncode");
    }

    #[test]
    fn one_bad_node_aborts_everything() {
        let err = normalize(json!({
            "1": {"class_type": "A"},
            "2": {"inputs": {"x": 1}},
            "3": {"class_type": "C"}
        }))
        .unwrap_err();

        assert_matches!(err, CoreError::InvalidFormat(msg) if msg.contains("'2'"));
    }

    #[test]
    fn empty_class_type_is_rejected() {
        let err = normalize(json!({"1": {"class_type": "  "}})).unwrap_err();
        assert_matches!(err, CoreError::InvalidFormat(_));
    }

    #[test]
    fn non_object_inputs_are_rejected() {
        let err = normalize(json!({"1": {"class_type": "A", "inputs": [1, 2]}})).unwrap_err();
        assert_matches!(err, CoreError::InvalidFormat(msg) if msg.contains("inputs"));
    }

    #[test]
    fn scalar_documents_are_rejected() {
        assert_matches!(normalize(json!(42)), Err(CoreError::InvalidFormat(_)));
        assert_matches!(normalize(json!("x")), Err(CoreError::InvalidFormat(_)));
    }

    #[test]
    fn empty_template_is_rejected() {
        assert_matches!(normalize(json!({})), Err(CoreError::InvalidFormat(_)));
        assert_matches!(normalize(json!([])), Err(CoreError::InvalidFormat(_)));
    }

    #[test]
    fn invalid_json_bytes_are_rejected() {
        let err = parse_template(b"{not json").unwrap_err();
        assert_matches!(err, CoreError::InvalidFormat(msg) if msg.contains("not valid JSON"));
    }

    #[test]
    fn node_count_is_preserved() {
        for size in [1usize, 2, 5, 40] {
            let mut graph = Map::new();
            let mut list = Vec::new();
            for i in 0..size {
                let field = if i % 2 == 0 { "class_type" } else { "type" };
                let mut body = Map::new();
                body.insert(field.to_string(), json!(format!("Node{i}")));
                graph.insert(i.to_string(), Value::Object(body.clone()));
                list.push(Value::Object(body));
            }

            assert_eq!(normalize(Value::Object(graph)).unwrap().len(), size);
            assert_eq!(normalize(Value::Array(list)).unwrap().len(), size);
        }
    }
}
