//! Configuration assembled from flags and validated before any watch starts.

use kwatch_core::{PathError, PathExpr};
use kwatch_render::{Differ, RenderOptions, Renderer, ThemeId, UnknownTheme};
use kwatch_transform::{Pipeline, TransformOptions};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Serialize)]
pub struct WatchConfig {
    pub kinds: Vec<String>,
    pub names: Vec<String>,
    /// `None` watches all namespaces.
    pub namespace: Option<String>,
    pub labels: Option<String>,
    pub context_lines: usize,
    pub create_theme: String,
    pub update_theme: String,
    pub delete_theme: String,
    pub no_color: bool,
    pub jsonpath: Option<String>,
    pub exclude: Vec<String>,
    pub strip_managed_fields: bool,
    pub show_deleted: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            kinds: Vec::new(),
            names: Vec::new(),
            namespace: Some("default".to_string()),
            labels: None,
            context_lines: 3,
            create_theme: ThemeId::Green.to_string(),
            update_theme: ThemeId::Default.to_string(),
            delete_theme: ThemeId::Red.to_string(),
            no_color: false,
            jsonpath: None,
            exclude: Vec::new(),
            strip_managed_fields: true,
            show_deleted: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no resource kind given")]
    NoKinds,
    #[error("cannot specify both resource names and a label selector at the same time")]
    NamesWithSelector,
    #[error("invalid jsonpath: {0}")]
    Selector(#[source] PathError),
    #[error("invalid exclude expression: {0}")]
    Exclude(#[source] PathError),
    #[error("invalid {which} theme: {source}")]
    Theme { which: &'static str, #[source] source: UnknownTheme },
}

/// Validated configuration, ready to drive the engine.
#[derive(Debug)]
pub struct Compiled {
    pub kinds: Vec<String>,
    pub names: Vec<String>,
    pub namespace: Option<String>,
    pub labels: Option<String>,
    pub differ: Differ,
}

impl WatchConfig {
    pub fn compile(&self) -> Result<Compiled, ConfigError> {
        let kinds: Vec<String> = self
            .kinds
            .iter()
            .flat_map(|k| k.split(','))
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect();
        if kinds.is_empty() {
            return Err(ConfigError::NoKinds);
        }
        let labels = self.labels.clone().filter(|l| !l.trim().is_empty());
        if !self.names.is_empty() && labels.is_some() {
            return Err(ConfigError::NamesWithSelector);
        }

        let selector = self.jsonpath.as_deref().map(PathExpr::parse).transpose().map_err(ConfigError::Selector)?;
        let exclude = self
            .exclude
            .iter()
            .map(|e| PathExpr::parse(e))
            .collect::<Result<Vec<_>, _>>()
            .map_err(ConfigError::Exclude)?;

        let pipeline = Pipeline::new(TransformOptions { selector, exclude, strip_managed_fields: self.strip_managed_fields });
        let renderer = Renderer::new(RenderOptions {
            context_lines: self.context_lines,
            create_theme: self.theme("create", &self.create_theme)?,
            update_theme: self.theme("update", &self.update_theme)?,
            delete_theme: self.theme("delete", &self.delete_theme)?,
            show_deleted: self.show_deleted,
        });

        Ok(Compiled {
            kinds,
            names: self.names.clone(),
            namespace: self.namespace.clone(),
            labels,
            differ: Differ::new(pipeline, renderer),
        })
    }

    fn theme(&self, which: &'static str, id: &str) -> Result<ThemeId, ConfigError> {
        let theme = id.parse::<ThemeId>().map_err(|source| ConfigError::Theme { which, source })?;
        Ok(if self.no_color { ThemeId::Plain } else { theme })
    }
}
