//! Placeholder substitution.
//!
//! A pure tree transform: the template is copied, and every parameter leaf
//! whose value equals a token exactly is replaced by the bound value.
//! Object keys are never rewritten and substrings never match. Tokens
//! without a binding are left as they are.

use serde_json::{Map, Value};

use crate::template::{GraphNode, GraphTemplate, PlaceholderMap};

/// Copy `value`, passing every leaf (anything that is not an object or an
/// array) through `replace`. A `None` result keeps the leaf unchanged.
pub fn map_leaves<F>(value: &Value, replace: &mut F) -> Value
where
    F: FnMut(&Value) -> Option<Value>,
{
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, child) in map {
                out.insert(key.clone(), map_leaves(child, replace));
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for child in items {
                out.push(map_leaves(child, replace));
            }
            Value::Array(out)
        }
        leaf => replace(leaf).unwrap_or_else(|| leaf.clone()),
    }
}

/// Replace placeholder tokens in every node's parameters.
///
/// Returns a new template; `template` itself is never modified.
pub fn substitute(template: &GraphTemplate, tokens: &PlaceholderMap) -> GraphTemplate {
    if tokens.is_empty() {
        return template.clone();
    }

    let mut replace = |leaf: &Value| match leaf {
        Value::String(s) => tokens.get(s).cloned(),
        _ => None,
    };

    let mut out = GraphTemplate::default();
    for (id, node) in template.iter() {
        let mut inputs = Map::with_capacity(node.inputs.len());
        for (name, value) in &node.inputs {
            inputs.insert(name.clone(), map_leaves(value, &mut replace));
        }
        out.insert(
            id.to_string(),
            GraphNode {
                class_type: node.class_type.clone(),
                inputs,
                meta: node.meta.clone(),
            },
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::normalize;
    use serde_json::json;

    fn template(value: Value) -> GraphTemplate {
        normalize(value).unwrap()
    }

    #[test]
    fn replaces_two_node_example() {
        let input = template(json!({
            "1": {"class_type": "A", "inputs": {"p": "__X__"}},
            "2": {"class_type": "B", "inputs": {}}
        }));
        let tokens = PlaceholderMap::new().with("__X__", 42);

        let out = substitute(&input, &tokens);

        assert_eq!(
            out.to_value(),
            json!({
                "1": {"class_type": "A", "inputs": {"p": 42}},
                "2": {"class_type": "B", "inputs": {}}
            })
        );
    }

    #[test]
    fn input_is_not_mutated() {
        let input = template(json!({
            "1": {"class_type": "A", "inputs": {"p": "__X__", "q": ["__X__", 0]}}
        }));
        let before = input.clone();

        let out = substitute(&input, &PlaceholderMap::new().with("__X__", "v"));

        assert_eq!(input, before);
        assert_ne!(out, input);
    }

    #[test]
    fn descends_into_nested_values() {
        let input = template(json!({
            "16": {"class_type": "VHS_VideoCombine", "inputs": {
                "opts": {"frame_rate": "__FPS__", "list": [{"deep": "__FPS__"}]}
            }}
        }));

        let out = substitute(&input, &PlaceholderMap::new().with("__FPS__", 16));

        assert_eq!(
            out.node("16").unwrap().inputs["opts"],
            json!({"frame_rate": 16, "list": [{"deep": 16}]})
        );
    }

    #[test]
    fn keys_and_substrings_are_not_matched() {
        let input = template(json!({
            "1": {"class_type": "A", "inputs": {
                "__X__": "keep key",
                "text": "prefix __X__ suffix"
            }}
        }));

        let out = substitute(&input, &PlaceholderMap::new().with("__X__", 1));

        assert_eq!(out, input);
    }

    #[test]
    fn class_type_is_not_substituted() {
        let input = template(json!({"1": {"class_type": "__X__"}}));
        let out = substitute(&input, &PlaceholderMap::new().with("__X__", "B"));
        assert_eq!(out.node("1").unwrap().class_type, "__X__");
    }

    #[test]
    fn unresolved_tokens_pass_through() {
        let input = template(json!({
            "1": {"class_type": "A", "inputs": {"a": "__A__", "b": "__B__"}}
        }));

        let out = substitute(&input, &PlaceholderMap::new().with("__A__", true));

        assert_eq!(out.node("1").unwrap().inputs["a"], json!(true));
        assert_eq!(out.node("1").unwrap().inputs["b"], json!("__B__"));
    }

    #[test]
    fn replacement_keeps_caller_type() {
        let input = template(json!({
            "1": {"class_type": "A", "inputs": {"n": "__N__", "s": "__S__", "b": "__B__"}}
        }));
        let tokens = PlaceholderMap::new()
            .with("__N__", 1.5)
            .with("__S__", "12")
            .with("__B__", false);

        let inputs = substitute(&input, &tokens).node("1").unwrap().inputs.clone();

        assert_eq!(inputs["n"], json!(1.5));
        assert_eq!(inputs["s"], json!("12"));
        assert_eq!(inputs["b"], json!(false));
    }

    #[test]
    fn same_tokens_twice_is_a_no_op() {
        let input = template(json!({
            "1": {"class_type": "A", "inputs": {"p": "__X__", "q": "__Y__"}}
        }));
        let tokens = PlaceholderMap::new().with("__X__", "x").with("__Y__", 2);

        let once = substitute(&input, &tokens);
        let twice = substitute(&once, &tokens);

        assert_eq!(once, twice);
    }

    #[test]
    fn disjoint_token_sets_compose() {
        let input = template(json!({
            "1": {"class_type": "A", "inputs": {"p": "__X__", "q": "__Y__"}}
        }));
        let x = PlaceholderMap::new().with("__X__", 1);
        let y = PlaceholderMap::new().with("__Y__", 2);
        let both = PlaceholderMap::new().with("__X__", 1).with("__Y__", 2);

        let stepwise = substitute(&substitute(&input, &x), &y);

        assert_eq!(stepwise, substitute(&input, &both));
    }

    #[test]
    fn map_leaves_can_rewrite_non_string_leaves() {
        let value = json!({"a": [1, 2, {"b": 3}], "c": "x"});

        let doubled = map_leaves(&value, &mut |leaf| leaf.as_i64().map(|n| json!(n * 2)));

        assert_eq!(doubled, json!({"a": [2, 4, {"b": 6}], "c": "x"}));
    }
}
