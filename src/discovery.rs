//! Template discovery.
//!
//! Recursively scans directories for template files and describes each
//! component template for the global manifest: the props it reads (with
//! their default values) and the slots it renders.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::ast::ElementNode;
use crate::cache::{BuildContext, ParsedFile};
use crate::symbols::PropName;
use crate::visitor::{walk_element, TemplateVisitor};

// ═══════════════════════════════════════════════════════════════════════════════
// METADATA TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotDefinition {
    /// None for the default slot.
    pub name: Option<String>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDefinition {
    pub name: String,
    /// Project-relative path.
    pub file: String,
    pub props: Vec<PropDefinition>,
    pub slots: Vec<SlotDefinition>,
    /// Whether the template spreads the rest of its props somewhere.
    pub accepts_rest_props: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// FILE DISCOVERY
// ═══════════════════════════════════════════════════════════════════════════════

/// Recursively find template files with `extension` under `dir`, sorted.
pub fn find_template_files(dir: &Path, extension: &str) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .is_some_and(|ext| ext == extension)
        })
        .map(|entry| entry.path().to_path_buf())
        .collect();
    files.sort();
    files
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPONENT DISCOVERY
// ═══════════════════════════════════════════════════════════════════════════════

/// Describe every template under the components and layouts directories.
/// Files that fail to parse are skipped.
pub fn discover_components(ctx: &mut BuildContext) -> Vec<ComponentDefinition> {
    let dirs = [ctx.config().components_path(), ctx.config().layouts_path()];
    let mut definitions = Vec::new();

    for dir in dirs {
        let files = ctx.list_templates(&dir);
        for path in files.iter() {
            match ctx.parse(path) {
                Some(parsed) => definitions.push(component_definition(&parsed)),
                None => debug!(file = %path.display(), "skipping component definition"),
            }
        }
    }

    definitions
}

/// Props, defaults and slots of one parsed template.
pub fn component_definition(file: &ParsedFile) -> ComponentDefinition {
    let name = file
        .path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut props: Vec<PropDefinition> = file
        .symbols
        .prop_aliases
        .iter()
        .filter_map(|(local, prop)| match prop {
            PropName::Named(prop) => Some(PropDefinition {
                name: prop.clone(),
                default_value: file.symbols.lookup_value(local),
            }),
            PropName::Rest => None,
        })
        .collect();
    props.sort_by(|a, b| a.name.cmp(&b.name));
    props.dedup_by(|a, b| a.name == b.name);

    let accepts_rest_props = file
        .symbols
        .prop_aliases
        .values()
        .any(|p| *p == PropName::Rest);

    let mut collector = SlotCollector::default();
    collector.visit_ast(&file.ast);

    ComponentDefinition {
        name,
        file: file.relative_path.clone(),
        props,
        slots: collector.slots,
        accepts_rest_props,
    }
}

#[derive(Default)]
struct SlotCollector {
    slots: Vec<SlotDefinition>,
}

impl<'a> TemplateVisitor<'a> for SlotCollector {
    fn visit_element(&mut self, element: &'a ElementNode) {
        if element.tag == "slot" {
            self.slots.push(SlotDefinition {
                name: element
                    .attribute("name")
                    .and_then(|a| a.static_value())
                    .map(str::to_string),
                line: element.position.line,
            });
        }
        walk_element(self, element);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocatorConfig;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_find_template_files_recurses_and_filters() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("ui/nested")).unwrap();
        fs::write(dir.path().join("ui/nested/Button.astro"), "<button/>").unwrap();
        fs::write(dir.path().join("Card.astro"), "<div/>").unwrap();
        fs::write(dir.path().join("styles.css"), "").unwrap();

        let files = find_template_files(dir.path(), "astro");
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("Card.astro"));
        assert!(find_template_files(&dir.path().join("missing"), "astro").is_empty());
    }

    #[test]
    fn test_component_definition_props_and_slots() {
        let dir = TempDir::new().unwrap();
        let components = dir.path().join("src/components");
        fs::create_dir_all(&components).unwrap();
        fs::write(
            components.join("Card.astro"),
            "---\nconst { title, subtitle = 'More', items: list, ...rest } = Astro.props;\n---\n\
             <article {...rest}>\n  <h2>{title}</h2>\n  <slot name=\"footer\" />\n  <slot />\n</article>\n",
        )
        .unwrap();

        let mut ctx = BuildContext::new(LocatorConfig::new(dir.path()));
        let defs = discover_components(&mut ctx);
        assert_eq!(defs.len(), 1);
        let card = &defs[0];
        assert_eq!(card.name, "Card");
        assert_eq!(card.file, "src/components/Card.astro");
        let names: Vec<_> = card.props.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["items", "subtitle", "title"]);
        assert_eq!(card.props[1].default_value.as_deref(), Some("More"));
        assert!(card.accepts_rest_props);
        assert_eq!(card.slots.len(), 2);
        assert_eq!(card.slots[0].name.as_deref(), Some("footer"));
        assert_eq!(card.slots[1].name, None);
        assert_eq!(card.slots[0].line, 6);
    }
}
