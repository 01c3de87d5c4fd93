//! Placeholder tokens and the request parameters that fill them.
//!
//! Templates are prepared offline so that the parameter positions a caller
//! may control hold a sentinel string such as `"__PROMPT__"`. At request
//! time those sentinels are replaced by exact value match (see
//! [`substitute`](super::substitute)).

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

use crate::error::CoreError;

/// Positive prompt text.
pub const PROMPT: &str = "__PROMPT__";

/// Negative prompt text.
pub const NEGATIVE_PROMPT: &str = "__NEGATIVE__";

/// Storage name of the uploaded source image.
pub const INPUT_IMAGE_FILENAME: &str = "__INPUT_IMAGE_FILENAME__";

/// Video length in frames.
pub const NUM_FRAMES: &str = "__NUM_FRAMES__";

/// Output frame rate.
pub const FPS: &str = "__FPS__";

/// Sampling steps.
pub const STEPS: &str = "__STEPS__";

/// Sampler seed.
pub const SEED: &str = "__SEED__";

/// Long-side resolution in pixels.
pub const WIDTH: &str = "__WIDTH__";

/// Maximum prompt length in characters.
pub const MAX_PROMPT_LENGTH: usize = 10_000;

/// Upper bound for `steps`.
pub const MAX_STEPS: u32 = 1_000;

/// Upper bound for `num_frames`.
pub const MAX_NUM_FRAMES: u32 = 10_000;

/// Upper bound for `fps`.
pub const MAX_FPS: u32 = 240;

/// Upper bound for `width`.
pub const MAX_WIDTH: u32 = 8_192;

/// Ordered token -> replacement value mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaceholderMap {
    values: IndexMap<String, Value>,
}

impl PlaceholderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bindings for every set field of `params`.
    pub fn from_params(params: &GenerationParams) -> Self {
        params.to_placeholders()
    }

    /// Bind `token` to `value`, returning the previous binding.
    pub fn insert(&mut self, token: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(token.into(), value.into())
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, token: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(token, value);
        self
    }

    pub fn get(&self, token: &str) -> Option<&Value> {
        self.values.get(token)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.values.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Merge `other` into `self`; bindings in `other` win.
    pub fn extend(&mut self, other: PlaceholderMap) {
        self.values.extend(other.values);
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for PlaceholderMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = PlaceholderMap::new();
        for (token, value) in iter {
            map.insert(token, value);
        }
        map
    }
}

/// Named generation parameters a request may carry.
///
/// Each set field is bound to its well-known token by
/// [`to_placeholders`](Self::to_placeholders); unset fields leave the
/// token in the template untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GenerationParams {
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub seed: Option<u64>,
    pub steps: Option<u32>,
    pub num_frames: Option<u32>,
    pub fps: Option<u32>,
    pub width: Option<u32>,
}

impl GenerationParams {
    /// Check value ranges. Performs no I/O.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (name, text) in [
            ("prompt", &self.prompt),
            ("negative_prompt", &self.negative_prompt),
        ] {
            if let Some(text) = text {
                let chars = text.chars().count();
                if chars > MAX_PROMPT_LENGTH {
                    return Err(CoreError::Validation(format!(
                        "{name} must be at most {MAX_PROMPT_LENGTH} characters, got {chars}"
                    )));
                }
            }
        }

        check_range("steps", self.steps, MAX_STEPS)?;
        check_range("num_frames", self.num_frames, MAX_NUM_FRAMES)?;
        check_range("fps", self.fps, MAX_FPS)?;
        check_range("width", self.width, MAX_WIDTH)?;
        Ok(())
    }

    /// Bind every set parameter to its token.
    pub fn to_placeholders(&self) -> PlaceholderMap {
        let mut map = PlaceholderMap::new();
        if let Some(prompt) = &self.prompt {
            map.insert(PROMPT, prompt.as_str());
        }
        if let Some(negative) = &self.negative_prompt {
            map.insert(NEGATIVE_PROMPT, negative.as_str());
        }
        if let Some(seed) = self.seed {
            map.insert(SEED, seed);
        }
        if let Some(steps) = self.steps {
            map.insert(STEPS, steps);
        }
        if let Some(frames) = self.num_frames {
            map.insert(NUM_FRAMES, frames);
        }
        if let Some(fps) = self.fps {
            map.insert(FPS, fps);
        }
        if let Some(width) = self.width {
            map.insert(WIDTH, width);
        }
        map
    }
}

fn check_range(name: &str, value: Option<u32>, max: u32) -> Result<(), CoreError> {
    match value {
        Some(0) => Err(CoreError::Validation(format!("{name} must be positive"))),
        Some(v) if v > max => Err(CoreError::Validation(format!(
            "{name} must be at most {max}, got {v}"
        ))),
        _ => Ok(()),
    }
}
