//! Build-lifetime search index.
//!
//! A flat list of `(normalized text, tag) → location` entries built by one
//! scan over every template: literal text, rendered local variables (loop
//! renders expand to every array item), literal component props, and image
//! sources. Lookup is first-match in insertion order (pages, components,
//! layouts; files sorted), exact tag before any tag.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ast::{
    first_text_node, text_content, AttributeValue, ComponentNode, ElementNode, ExpressionNode,
    LoopContext, TemplateNode,
};
use crate::cache::{BuildContext, ParsedFile};
use crate::expr::expression_path;
use crate::matcher::{prop_reference, resolve_local_path};
use crate::model::{SourceLocation, SourceType};
use crate::normalize::{char_len, normalize_text};
use crate::resolver::resolve_module_path;
use crate::visitor::{walk_component, walk_element, walk_expression, TemplateVisitor};

const MIN_TEXT_LENGTH: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchIndexEntry {
    pub file: String,
    pub line: u32,
    pub snippet: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub normalized_text: String,
    /// Lowercase tag that renders the text, empty when unknown.
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition_line: Option<u32>,
}

impl SearchIndexEntry {
    pub fn to_location(&self) -> SourceLocation {
        SourceLocation {
            file: self.file.clone(),
            line: self.line,
            snippet: self.snippet.clone(),
            source_type: self.source_type,
            variable_name: self.variable_name.clone(),
            definition_line: self.definition_line,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchIndex {
    entries: Vec<SearchIndexEntry>,
    images: Vec<SearchIndexEntry>,
}

/// A literal prop at a call site, waiting for the tag its component renders
/// the prop with.
struct PendingProp {
    entry: SearchIndexEntry,
    component: Option<PathBuf>,
    prop: String,
}

struct FileIndexer<'a> {
    file: &'a ParsedFile,
    props_object: &'a str,
    template_extension: &'a str,
    loops: Vec<&'a LoopContext>,
    entries: Vec<SearchIndexEntry>,
    images: Vec<SearchIndexEntry>,
    pending: Vec<PendingProp>,
    /// prop name → tag rendering it in this file
    prop_tags: Vec<(String, String)>,
}

impl<'a> FileIndexer<'a> {
    fn entry(
        &self,
        line: u32,
        source_type: SourceType,
        text: String,
        tag: &str,
    ) -> SearchIndexEntry {
        SearchIndexEntry {
            file: self.file.relative_path.clone(),
            line,
            snippet: self.file.snippet(line),
            source_type,
            normalized_text: text,
            tag: tag.to_ascii_lowercase(),
            variable_name: None,
            definition_line: None,
        }
    }

    /// Entries for every local definition the path reads.
    fn variable_entries(&self, path: &str, tag: &str) -> Vec<SearchIndexEntry> {
        let resolved = resolve_local_path(self.file, &self.loops, path);
        self.file
            .symbols
            .definitions_matching(&resolved)
            .map(|def| {
                let mut entry =
                    self.entry(def.line, SourceType::Variable, normalize_text(&def.value), tag);
                entry.variable_name = Some(def.path());
                entry.definition_line = Some(def.line);
                entry
            })
            .collect()
    }

    fn index_element(&mut self, element: &'a ElementNode) {
        if element.tag.is_empty() {
            return;
        }
        let tag = element.tag.as_str();

        if element.tag.eq_ignore_ascii_case("img") {
            self.index_image(element);
            return;
        }

        let mut significant = element.children.iter().filter(|n| !n.is_blank_text());
        if let (Some(TemplateNode::Expression(e)), None) =
            (significant.next(), significant.next())
        {
            if e.children.is_empty() {
                if let Some(path) = expression_path(&e.code) {
                    let entries = self.variable_entries(&path, tag);
                    self.entries.extend(entries);
                    let resolved = resolve_local_path(self.file, &self.loops, &path);
                    if let Some((prop, _)) =
                        prop_reference(self.file, self.props_object, &resolved)
                    {
                        self.prop_tags.push((prop, tag.to_ascii_lowercase()));
                    }
                }
                return;
            }
        }

        let text = normalize_text(&text_content(&element.children));
        if char_len(&text) < MIN_TEXT_LENGTH {
            return;
        }
        let line = first_text_node(&element.children)
            .map(|t| t.content_position.line)
            .unwrap_or(element.position.line);
        let entry = self.entry(line, SourceType::Static, text, tag);
        self.entries.push(entry);
    }

    fn index_image(&mut self, element: &'a ElementNode) {
        let Some(src) = element.attribute("src") else {
            return;
        };
        match &src.value {
            AttributeValue::Static(value) if !value.is_empty() => {
                let entry = self.entry(src.position.line, SourceType::Static, value.clone(), "img");
                self.images.push(entry);
            }
            AttributeValue::Expression(code) => {
                if let Some(path) = expression_path(code) {
                    let mut entries = self.variable_entries(&path, "img");
                    for entry in &mut entries {
                        entry.normalized_text = entry.normalized_text.trim().to_string();
                    }
                    self.images.extend(entries);
                }
            }
            _ => {}
        }
    }

    fn index_component(&mut self, component: &'a ComponentNode) {
        let component_file = self
            .file
            .symbols
            .import_for(&component.name)
            .and_then(|import| {
                resolve_module_path(&self.file.path, &import.source, self.template_extension)
            });
        for attribute in &component.attributes {
            let AttributeValue::Static(value) = &attribute.value else {
                continue;
            };
            let text = normalize_text(value);
            if char_len(&text) < MIN_TEXT_LENGTH {
                continue;
            }
            let entry = self.entry(attribute.position.line, SourceType::Prop, text, "");
            self.pending.push(PendingProp {
                entry,
                component: component_file.clone(),
                prop: attribute.name.clone(),
            });
        }
    }
}

impl<'a> TemplateVisitor<'a> for FileIndexer<'a> {
    fn visit_element(&mut self, element: &'a ElementNode) {
        if element.is_raw_text() {
            return;
        }
        self.index_element(element);
        walk_element(self, element);
    }

    fn visit_component(&mut self, component: &'a ComponentNode) {
        self.index_component(component);
        walk_component(self, component);
    }

    fn visit_expression(&mut self, expression: &'a ExpressionNode) {
        if let Some(ctx) = &expression.loop_context {
            self.loops.push(ctx);
            walk_expression(self, expression);
            self.loops.pop();
        } else {
            walk_expression(self, expression);
        }
    }
}

impl SearchIndex {
    /// Scan every template in the search directories.
    pub fn build(ctx: &mut BuildContext) -> Self {
        let props_object = ctx.config().props_object.clone();
        let template_extension = ctx.config().template_extension.clone();
        let mut index = SearchIndex::default();
        let mut pending = Vec::new();
        let mut prop_tags: HashMap<(PathBuf, String), String> = HashMap::new();

        let files: Vec<Arc<ParsedFile>> = ctx
            .all_templates()
            .iter()
            .filter_map(|path| ctx.parse(path))
            .collect();

        for file in &files {
            let mut indexer = FileIndexer {
                file,
                props_object: &props_object,
                template_extension: &template_extension,
                loops: Vec::new(),
                entries: Vec::new(),
                images: Vec::new(),
                pending: Vec::new(),
                prop_tags: Vec::new(),
            };
            indexer.visit_ast(&file.ast);
            index.entries.extend(indexer.entries);
            index.images.extend(indexer.images);
            pending.extend(indexer.pending);
            for (prop, tag) in indexer.prop_tags {
                prop_tags.entry((file.path.clone(), prop)).or_insert(tag);
            }
        }

        for PendingProp {
            mut entry,
            component,
            prop,
        } in pending
        {
            if let Some(tag) = component.and_then(|c| prop_tags.get(&(c, prop))) {
                entry.tag = tag.clone();
            }
            index.entries.push(entry);
        }

        debug!(
            entries = index.entries.len(),
            images = index.images.len(),
            files = files.len(),
            "search index built"
        );
        index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[SearchIndexEntry] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.images.clear();
    }

    /// Exact `(text, tag)` first, then the first entry with the text under
    /// any tag.
    pub fn find_by_text(&self, text: &str, tag: Option<&str>) -> Option<&SearchIndexEntry> {
        let normalized = normalize_text(text);
        if normalized.is_empty() {
            return None;
        }
        if let Some(tag) = tag {
            let exact = self
                .entries
                .iter()
                .find(|e| e.normalized_text == normalized && e.tag.eq_ignore_ascii_case(tag));
            if exact.is_some() {
                return exact;
            }
        }
        self.entries.iter().find(|e| e.normalized_text == normalized)
    }

    pub fn find_image_by_src(&self, src: &str) -> Option<&SearchIndexEntry> {
        let src = src.trim();
        self.images.iter().find(|e| e.normalized_text == src)
    }
}
