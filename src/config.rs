//! Locator configuration.
//!
//! Every field has a default matching the conventional project layout
//! (`src/pages`, `src/components`, `src/layouts`, `src/content`), so an empty
//! JSON object is a valid configuration once `projectRoot` is set.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{LocatorError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocatorConfig {
    pub project_root: PathBuf,
    pub src_dir: String,
    pub pages_dir: String,
    pub components_dir: String,
    pub layouts_dir: String,
    pub content_dir: String,
    /// Template file extension, without the dot.
    pub template_extension: String,
    /// Expression that holds the props passed to a component.
    pub props_object: String,
    /// Hard cap on cross-file recursion.
    pub max_resolution_depth: u32,
    pub marker: MarkerOptions,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            src_dir: "src".to_string(),
            pages_dir: "pages".to_string(),
            components_dir: "components".to_string(),
            layouts_dir: "layouts".to_string(),
            content_dir: "content".to_string(),
            template_extension: "astro".to_string(),
            props_object: "Astro.props".to_string(),
            max_resolution_depth: 5,
            marker: MarkerOptions::default(),
        }
    }
}

impl LocatorConfig {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            ..Default::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: LocatorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|e| LocatorError::io(path, e))?;
        let mut config = Self::from_json_str(&data)?;
        // A relative project root is taken relative to the config file.
        if config.project_root.is_relative() {
            if let Some(parent) = path.parent() {
                config.project_root = parent.join(&config.project_root);
            }
        }
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.template_extension.is_empty() || self.template_extension.starts_with('.') {
            return Err(LocatorError::Config(format!(
                "templateExtension must be a bare extension, got {:?}",
                self.template_extension
            )));
        }
        if self.max_resolution_depth == 0 {
            return Err(LocatorError::Config(
                "maxResolutionDepth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn src_root(&self) -> PathBuf {
        self.project_root.join(&self.src_dir)
    }

    pub fn pages_path(&self) -> PathBuf {
        self.src_root().join(&self.pages_dir)
    }

    pub fn components_path(&self) -> PathBuf {
        self.src_root().join(&self.components_dir)
    }

    pub fn layouts_path(&self) -> PathBuf {
        self.src_root().join(&self.layouts_dir)
    }

    pub fn content_path(&self) -> PathBuf {
        self.src_root().join(&self.content_dir)
    }

    /// Directories searched for usage sites, in search order.
    pub fn search_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.pages_path(),
            self.components_path(),
            self.layouts_path(),
        ]
    }

    pub fn is_template(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e == self.template_extension)
            .unwrap_or(false)
    }

    /// Path relative to the project root with forward slashes, used in every
    /// reported location.
    pub fn relative_path(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.project_root).unwrap_or(path);
        rel.to_string_lossy().replace('\\', "/")
    }
}

/// Options for the content marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MarkerOptions {
    pub attribute: String,
    pub component_attribute: String,
    pub styled_attribute: String,
    pub background_image_attribute: String,
    pub source_file_attribute: String,
    pub source_loc_attribute: String,
    /// When set, only these tags are marked.
    pub include_tags: Option<Vec<String>>,
    pub exclude_tags: Vec<String>,
    pub allow_empty_text: bool,
    pub mark_components: bool,
    pub mark_styled_spans: bool,
    pub component_dirs: Vec<String>,
    pub exclude_component_dirs: Vec<String>,
    pub id_prefix: String,
}

impl Default for MarkerOptions {
    fn default() -> Self {
        Self {
            attribute: "data-cms-id".to_string(),
            component_attribute: "data-cms-component-id".to_string(),
            styled_attribute: "data-cms-styled".to_string(),
            background_image_attribute: "data-cms-bg-img".to_string(),
            source_file_attribute: "data-astro-source-file".to_string(),
            source_loc_attribute: "data-astro-source-loc".to_string(),
            include_tags: Some(
                [
                    "h1", "h2", "h3", "h4", "h5", "h6", "p", "a", "span", "li", "button",
                    "label", "blockquote", "figcaption", "strong", "em", "b", "i", "small",
                    "td", "th", "dt", "dd", "img", "title",
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ),
            exclude_tags: vec![
                "script".to_string(),
                "style".to_string(),
                "noscript".to_string(),
                "template".to_string(),
            ],
            allow_empty_text: false,
            mark_components: true,
            mark_styled_spans: true,
            component_dirs: vec!["src/components".to_string()],
            exclude_component_dirs: vec!["src/pages".to_string(), "src/layouts".to_string()],
            id_prefix: "cms-".to_string(),
        }
    }
}

impl MarkerOptions {
    pub fn is_markable_tag(&self, tag: &str) -> bool {
        let tag = tag.to_ascii_lowercase();
        if self.exclude_tags.iter().any(|t| t.eq_ignore_ascii_case(&tag)) {
            return false;
        }
        match &self.include_tags {
            Some(include) => include.iter().any(|t| t.eq_ignore_ascii_case(&tag)),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = LocatorConfig::from_json_str("{}").unwrap();
        assert_eq!(config.pages_dir, "pages");
        assert_eq!(config.max_resolution_depth, 5);
        assert_eq!(config.marker.attribute, "data-cms-id");
    }

    #[test]
    fn test_partial_override() {
        let config = LocatorConfig::from_json_str(
            r#"{"projectRoot": "/site", "componentsDir": "ui", "marker": {"attribute": "data-edit"}}"#,
        )
        .unwrap();
        assert_eq!(config.components_path(), PathBuf::from("/site/src/ui"));
        assert_eq!(config.marker.attribute, "data-edit");
        assert_eq!(config.marker.component_attribute, "data-cms-component-id");
    }

    #[test]
    fn test_rejects_dotted_extension() {
        let err = LocatorConfig::from_json_str(r#"{"templateExtension": ".astro"}"#);
        assert!(matches!(err, Err(LocatorError::Config(_))));
    }

    #[test]
    fn test_markable_tag_filters() {
        let mut options = MarkerOptions::default();
        assert!(options.is_markable_tag("H1"));
        assert!(!options.is_markable_tag("div"));
        options.include_tags = None;
        assert!(options.is_markable_tag("div"));
        assert!(!options.is_markable_tag("script"));
    }

    #[test]
    fn test_relative_path_uses_forward_slashes() {
        let config = LocatorConfig::new("/site");
        let rel = config.relative_path(Path::new("/site/src/pages/index.astro"));
        assert_eq!(rel, "src/pages/index.astro");
    }
}
