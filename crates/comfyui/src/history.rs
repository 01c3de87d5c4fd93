//! History entries returned by `GET /history/{prompt_id}`.
//!
//! Only the parts the tracker needs are typed. Both fields stay loosely
//! typed JSON because the engine's status shape has varied between
//! releases and custom nodes write arbitrary output keys.

use serde::Deserialize;
use serde_json::{Map, Value};
use shim_core::job::{JobStatus, MediaKind, OutputDescriptor};

use crate::api::ComfyUIApi;

/// Default storage area for outputs that omit `type`.
const DEFAULT_FOLDER_TYPE: &str = "output";

/// One prompt's record in the engine's history.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub status: Option<Value>,
    #[serde(default)]
    pub outputs: Map<String, Value>,
}

impl HistoryEntry {
    /// Status the engine states explicitly, if any.
    ///
    /// Recognizes the structured form (`{"status_str": "success",
    /// "completed": true}` / `{"status_str": "error"}`) and plain strings.
    pub fn explicit_status(&self) -> Option<JobStatus> {
        match self.status.as_ref()? {
            Value::Object(status) => {
                let status_str = status.get("status_str").and_then(Value::as_str);
                let completed = status
                    .get("completed")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                match status_str {
                    Some("error") => Some(JobStatus::Errored),
                    Some("success") | None if completed => Some(JobStatus::Completed),
                    _ => None,
                }
            }
            Value::String(s) => parse_plain_status(s),
            _ => None,
        }
    }

    /// Whether any node reported outputs.
    pub fn has_outputs(&self) -> bool {
        self.outputs.values().any(|node| match node {
            Value::Object(map) => !map.is_empty(),
            Value::Null => false,
            _ => true,
        })
    }

    /// Human-readable failure detail from the execution messages.
    pub fn error_message(&self) -> Option<String> {
        let status = self.status.as_ref()?.as_object()?;
        let messages = status.get("messages").and_then(Value::as_array);

        for message in messages.into_iter().flatten() {
            let Some([kind, data]) = message.as_array().map(Vec::as_slice) else {
                continue;
            };
            if kind.as_str() != Some("execution_error") {
                continue;
            }
            let detail = data.get("exception_message").and_then(Value::as_str);
            let node = data.get("node_type").and_then(Value::as_str);
            return Some(match (node, detail) {
                (Some(node), Some(detail)) => format!("{node}: {}", detail.trim()),
                (None, Some(detail)) => detail.trim().to_string(),
                _ => "execution error".to_string(),
            });
        }

        (status.get("status_str").and_then(Value::as_str) == Some("error"))
            .then(|| "workflow failed".to_string())
    }

    /// Output artifacts in node order.
    ///
    /// One descriptor per list item carrying a `filename`; items whose
    /// media kind cannot be determined from the extension or the output
    /// key are skipped.
    pub fn output_descriptors(&self, api: &ComfyUIApi) -> Vec<OutputDescriptor> {
        let mut out = Vec::new();
        for node in self.outputs.values() {
            let Some(node) = node.as_object() else {
                continue;
            };
            for (key, items) in node {
                let Some(items) = items.as_array() else {
                    continue;
                };
                for item in items {
                    if let Some(descriptor) = describe(item, key, api) {
                        out.push(descriptor);
                    }
                }
            }
        }
        out
    }
}

fn parse_plain_status(status: &str) -> Option<JobStatus> {
    match status.to_ascii_lowercase().as_str() {
        "completed" | "success" => Some(JobStatus::Completed),
        "error" | "errored" | "failed" => Some(JobStatus::Errored),
        "running" | "executing" => Some(JobStatus::Running),
        "queued" | "pending" => Some(JobStatus::Queued),
        _ => None,
    }
}

fn describe(item: &Value, key: &str, api: &ComfyUIApi) -> Option<OutputDescriptor> {
    let filename = item.get("filename")?.as_str()?;
    let kind = MediaKind::from_filename(filename).or_else(|| MediaKind::from_output_key(key))?;
    let subfolder = item.get("subfolder").and_then(Value::as_str).unwrap_or("");
    let folder_type = item
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_FOLDER_TYPE);

    Some(OutputDescriptor {
        filename: filename.to_string(),
        subfolder: subfolder.to_string(),
        folder_type: folder_type.to_string(),
        kind,
        url: api.view_url(filename, subfolder, folder_type),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(value: Value) -> HistoryEntry {
        serde_json::from_value(value).unwrap()
    }

    fn api() -> ComfyUIApi {
        ComfyUIApi::new("http://127.0.0.1:8188").unwrap()
    }

    #[test]
    fn structured_success_is_completed() {
        let e = entry(json!({"status": {"status_str": "success", "completed": true}}));
        assert_eq!(e.explicit_status(), Some(JobStatus::Completed));
    }

    #[test]
    fn success_not_yet_completed_is_not_explicit() {
        let e = entry(json!({"status": {"status_str": "success", "completed": false}}));
        assert_eq!(e.explicit_status(), None);
    }

    #[test]
    fn structured_error_is_errored() {
        let e = entry(json!({"status": {"status_str": "error", "completed": false, "messages": [
            ["execution_start", {"prompt_id": "p"}],
            ["execution_error", {"node_type": "KSampler", "exception_message": "CUDA out of memory\n"}]
        ]}}));
        assert_eq!(e.explicit_status(), Some(JobStatus::Errored));
        assert_eq!(e.error_message().as_deref(), Some("KSampler: CUDA out of memory"));
    }

    #[test]
    fn plain_string_status() {
        assert_eq!(
            entry(json!({"status": "completed"})).explicit_status(),
            Some(JobStatus::Completed)
        );
        assert_eq!(
            entry(json!({"status": "error"})).explicit_status(),
            Some(JobStatus::Errored)
        );
        assert_eq!(entry(json!({"status": "weird"})).explicit_status(), None);
    }

    #[test]
    fn missing_status_and_outputs() {
        let e = entry(json!({}));
        assert_eq!(e.explicit_status(), None);
        assert!(!e.has_outputs());
        assert!(e.output_descriptors(&api()).is_empty());
    }

    #[test]
    fn outputs_extracted_in_node_order() {
        let e = entry(json!({"outputs": {
            "16": {"gifs": [
                {"filename": "wan_00001.mp4", "subfolder": "", "type": "output", "format": "video/h264-mp4"}
            ]},
            "9": {"images": [
                {"filename": "frame.png", "subfolder": "previews", "type": "temp"},
                {"filename": "latent.bin", "subfolder": "", "type": "output"}
            ]},
            "3": {"text": ["not a file"]}
        }}));

        let outputs = e.output_descriptors(&api());

        assert!(e.has_outputs());
        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs[0].filename, "wan_00001.mp4");
        assert_eq!(outputs[0].kind, MediaKind::Video);
        assert_eq!(outputs[1].filename, "frame.png");
        assert_eq!(outputs[1].kind, MediaKind::Image);
        assert_eq!(outputs[1].subfolder, "previews");
        assert_eq!(outputs[1].folder_type, "temp");
        assert!(outputs[1].url.ends_with("/view?filename=frame.png&subfolder=previews&type=temp"));
        // Unknown extension under `images` falls back to the key.
        assert_eq!(outputs[2].filename, "latent.bin");
        assert_eq!(outputs[2].kind, MediaKind::Image);
    }

    #[test]
    fn unknown_key_and_extension_are_skipped() {
        let e = entry(json!({"outputs": {
            "5": {"latents": [{"filename": "x.latent"}]}
        }}));
        assert!(e.has_outputs());
        assert!(e.output_descriptors(&api()).is_empty());
    }
}
