//! kwatch transform pipeline: turns a raw object into the canonical text that
//! gets diffed. Steps run in a fixed order: normalize, strip managed fields,
//! narrow to the selector, prune excluded subtrees, serialize as YAML.

#![forbid(unsafe_code)]

use kwatch_core::{Document, PathError, PathExpr};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct TransformOptions {
    /// Narrow comparison to the first match of this expression.
    pub selector: Option<PathExpr>,
    /// Subtrees removed before comparison, applied in order.
    pub exclude: Vec<PathExpr>,
    /// Drop `metadata.managedFields`.
    pub strip_managed_fields: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self { selector: None, exclude: Vec::new(), strip_managed_fields: true }
    }
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("failed to encode object as JSON: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to re-encode result of selector {expr}: {source}")]
    Selector { expr: String, #[source] source: serde_json::Error },
    #[error("failed to apply exclude expression {expr}: {source}")]
    Exclude { expr: String, #[source] source: PathError },
    #[error("failed to encode object as YAML: {0}")]
    Yaml(#[source] serde_yaml::Error),
}

#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    opts: TransformOptions,
}

impl Pipeline {
    pub fn new(opts: TransformOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &TransformOptions {
        &self.opts
    }

    /// Canonical text for `obj`; empty for an absent object.
    pub fn canonical<T: Serialize + ?Sized>(&self, obj: Option<&T>) -> Result<String, TransformError> {
        let Some(obj) = obj else {
            return Ok(String::new());
        };
        let mut doc = normalize(obj).map_err(TransformError::Encode)?;
        if self.opts.strip_managed_fields {
            strip_managed_fields(&mut doc);
        }

        if let Some(selector) = &self.opts.selector {
            let narrowed = match selector.find(&doc) {
                Ok(found) => match found.first() {
                    Some(first) => Some(
                        normalize(*first)
                            .map_err(|source| TransformError::Selector { expr: selector.to_string(), source })?,
                    ),
                    None => {
                        debug!(selector = %selector, "selector matched nothing; comparing the whole object");
                        None
                    }
                },
                Err(e) => {
                    warn!(selector = %selector, error = %e, "failed to apply selector; comparing the whole object");
                    None
                }
            };
            if let Some(narrowed) = narrowed {
                doc = narrowed;
            }
        }

        for expr in &self.opts.exclude {
            expr.remove(&mut doc)
                .map_err(|source| TransformError::Exclude { expr: expr.to_string(), source })?;
        }

        serde_yaml::to_string(&doc).map_err(TransformError::Yaml)
    }
}

/// Round-trip through JSON so every input ends up in the same generic shape.
fn normalize<T: Serialize + ?Sized>(obj: &T) -> Result<Document, serde_json::Error> {
    let encoded = serde_json::to_vec(obj)?;
    serde_json::from_slice(&encoded)
}

pub fn strip_managed_fields(v: &mut Document) {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
        }
    }
}
