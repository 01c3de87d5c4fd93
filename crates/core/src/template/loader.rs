//! Template location and loading.
//!
//! Every path is confined to the [`WorkflowRoots`] established at startup.
//! The template to load is picked from, in order:
//!
//! 1. an explicit per-request path,
//! 2. the pointer file (re-read on every call so operators can repoint the
//!    active template without a restart),
//! 3. the configured default path,
//! 4. [`FALLBACK_TEMPLATE_PATH`].

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::error::CoreError;
use crate::template::{parse_template, GraphTemplate};

/// Template used when nothing else is configured.
pub const FALLBACK_TEMPLATE_PATH: &str =
    "/workspace/ComfyUI/user/default/workflows/_auto_default.json";

/// Ordered, de-duplicated set of directories templates may be loaded from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowRoots {
    roots: Vec<PathBuf>,
}

impl WorkflowRoots {
    /// Build the root set. Relative roots are taken against the current
    /// directory; existing roots are canonicalized so that symlinked
    /// directories compare correctly.
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut unique: Vec<PathBuf> = Vec::new();
        for root in roots {
            let root = root.as_ref();
            if root.as_os_str().is_empty() {
                continue;
            }
            let absolute = if root.is_absolute() {
                root.to_path_buf()
            } else {
                std::env::current_dir()
                    .map(|cwd| cwd.join(root))
                    .unwrap_or_else(|_| root.to_path_buf())
            };
            let normalized = normalize_lexically(&absolute);
            let resolved = std::fs::canonicalize(&normalized).unwrap_or(normalized);
            if !unique.contains(&resolved) {
                unique.push(resolved);
            }
        }
        Self { roots: unique }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.roots.iter().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Whether `path` (already normalized) lies under at least one root.
    pub fn contains(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| path.starts_with(root))
    }
}

/// Which step of the precedence chain picked the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateSource {
    Explicit,
    Pointer,
    Default,
    Fallback,
}

impl TemplateSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TemplateSource::Explicit => "explicit",
            TemplateSource::Pointer => "pointer",
            TemplateSource::Default => "default",
            TemplateSource::Fallback => "fallback",
        }
    }
}

/// Resolves and loads graph templates.
#[derive(Debug, Clone)]
pub struct TemplateLocator {
    roots: WorkflowRoots,
    pointer_file: Option<PathBuf>,
    default_path: Option<PathBuf>,
    fallback_path: PathBuf,
}

impl TemplateLocator {
    pub fn new(roots: WorkflowRoots) -> Self {
        Self {
            roots,
            pointer_file: None,
            default_path: None,
            fallback_path: PathBuf::from(FALLBACK_TEMPLATE_PATH),
        }
    }

    /// File whose content names the active template.
    pub fn with_pointer_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pointer_file = Some(path.into());
        self
    }

    /// Environment-level default template.
    pub fn with_default_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.default_path = Some(path.into());
        self
    }

    /// Replace the hardcoded fallback.
    pub fn with_fallback_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.fallback_path = path.into();
        self
    }

    pub fn roots(&self) -> &WorkflowRoots {
        &self.roots
    }

    /// Pick the raw template path from the precedence chain.
    pub async fn select(&self, explicit: Option<&str>) -> Result<(PathBuf, TemplateSource), CoreError> {
        if let Some(raw) = explicit {
            let raw = raw.trim();
            if raw.is_empty() {
                return Err(CoreError::Validation("workflow path is empty".to_string()));
            }
            return Ok((PathBuf::from(raw), TemplateSource::Explicit));
        }

        if let Some(pointed) = self.read_pointer().await {
            return Ok((pointed, TemplateSource::Pointer));
        }

        if let Some(default) = &self.default_path {
            return Ok((default.clone(), TemplateSource::Default));
        }

        Ok((self.fallback_path.clone(), TemplateSource::Fallback))
    }

    /// Resolve a raw path to an existing file inside the roots.
    ///
    /// Absolute paths are checked as-is; relative paths are joined against
    /// each root in order and the first existing allowed candidate wins.
    /// Fails with `Forbidden` when every candidate escapes the roots and
    /// with `NotFound` when allowed candidates exist but none is a file.
    pub async fn resolve(&self, raw: &Path) -> Result<PathBuf, CoreError> {
        let candidates: Vec<PathBuf> = if raw.is_absolute() {
            vec![raw.to_path_buf()]
        } else {
            self.roots.iter().map(|root| root.join(raw)).collect()
        };

        let mut any_allowed = false;
        for candidate in candidates {
            let resolved = resolve_path(&candidate).await;
            if !self.roots.contains(&resolved) {
                tracing::debug!(
                    path = %resolved.display(),
                    "Template candidate is outside the workflow roots",
                );
                continue;
            }
            any_allowed = true;

            let is_file = tokio::fs::metadata(&resolved)
                .await
                .map(|meta| meta.is_file())
                .unwrap_or(false);
            if is_file {
                return Ok(resolved);
            }
        }

        if !any_allowed {
            return Err(CoreError::Forbidden(format!(
                "workflow path is outside the allowed roots: {}",
                raw.display()
            )));
        }
        Err(CoreError::NotFound {
            entity: "Workflow template",
            id: raw.display().to_string(),
        })
    }

    /// Resolve the template location and load a fresh copy of it.
    pub async fn resolve_and_load(&self, explicit: Option<&str>) -> Result<GraphTemplate, CoreError> {
        let (raw, source) = self.select(explicit).await?;
        let path = self.resolve(&raw).await?;

        let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => CoreError::NotFound {
                entity: "Workflow template",
                id: raw.display().to_string(),
            },
            _ => CoreError::Internal(format!(
                "failed to read workflow template {}: {e}",
                path.display()
            )),
        })?;

        let template = parse_template(&bytes)?;
        tracing::info!(
            path = %path.display(),
            source = source.as_str(),
            nodes = template.len(),
            "Loaded workflow template",
        );
        Ok(template)
    }

    // ---- private helpers ----

    /// Read the pointer file fresh; missing, unreadable or blank files are
    /// skipped.
    async fn read_pointer(&self) -> Option<PathBuf> {
        let pointer = self.pointer_file.as_ref()?;
        match tokio::fs::read_to_string(pointer).await {
            Ok(content) => content
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(PathBuf::from),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(
                    pointer = %pointer.display(),
                    error = %e,
                    "Failed to read workflow pointer file, ignoring it",
                );
                None
            }
        }
    }
}

/// Normalize `path` and resolve symlinks when it exists.
async fn resolve_path(path: &Path) -> PathBuf {
    let normalized = normalize_lexically(path);
    tokio::fs::canonicalize(&normalized)
        .await
        .unwrap_or(normalized)
}

/// Remove `.` and `..` components without touching the filesystem.
/// `..` never climbs above the root.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}
