//! Content marker.
//!
//! Parses one page's rendered markup with html5ever into an rcdom tree and
//! runs four ordered passes over it:
//!
//! 1. component roots (provenance from an allowed component directory,
//!    outermost element per instance only)
//! 2. decorative spans
//! 3. identifier assignment, with provenance captured into a side table and
//!    stripped from every element that is not a component root
//! 4. manifest construction, with nested marked elements encoded as
//!    `{{cms:<id>}}` placeholders in their nearest marked ancestor's text
//!
//! Every pass is best-effort: an element missing expected metadata is left
//! unmarked, nothing here returns an error.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use html5ever::serialize::{serialize, SerializeOpts, TraversalScope};
use html5ever::tendril::TendrilSink;
use html5ever::{parse_document, Attribute, LocalName, Namespace, QualName};
use lazy_static::lazy_static;
use markup5ever_rcdom::{Handle, NodeData, RcDom, SerializableHandle};
use regex::Regex;
use tendril::StrTendril;
use tracing::{debug, warn};

use crate::config::MarkerOptions;
use crate::manifest::{stable_id, ComponentInstance, ImageMetadata, ManifestEntry};
use crate::normalize::normalize_text;
use crate::styling::{background_image_url, extract_colors, is_decorative_class_list};

lazy_static! {
    static ref PLACEHOLDER_RE: Regex = Regex::new(r"\{\{cms:([^}]+)\}\}").unwrap();
}

/// Placeholder token standing for a nested editable region.
pub fn placeholder(id: &str) -> String {
    format!("{{{{cms:{id}}}}}")
}

/// Ids referenced by placeholders in `text`, in order.
pub fn placeholder_ids(text: &str) -> Vec<String> {
    PLACEHOLDER_RE
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// `text` with every placeholder removed.
pub fn strip_placeholders(text: &str) -> String {
    PLACEHOLDER_RE.replace_all(text, "").into_owned()
}

/// Monotonically increasing marker ids. Reuse one generator across the pages
/// of a build to keep ids unique site-wide.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    prefix: String,
    next: u64,
}

impl IdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 0,
        }
    }

    pub fn next_id(&mut self) -> String {
        let id = format!("{}{}", self.prefix, self.next);
        self.next += 1;
        id
    }
}

/// Output of [`mark_page`].
#[derive(Debug, Clone, Default)]
pub struct MarkedPage {
    pub html: String,
    pub entries: Vec<ManifestEntry>,
    pub components: Vec<ComponentInstance>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Provenance {
    file: String,
    line: Option<u32>,
}

/// Mark one page.
pub fn mark_page(html: &str, options: &MarkerOptions, ids: &mut IdGenerator) -> MarkedPage {
    let dom = parse_document(RcDom::default(), Default::default()).one(html);

    // Fragments come back wrapped in html/head/body; only the original
    // nodes are walked and serialized. An explicit `<body>` keeps its
    // attributes, so its input is handled as a document.
    let lowered = html.to_ascii_lowercase();
    let is_document = lowered.contains("<html") || lowered.contains("<body");
    let roots = if is_document {
        vec![dom.document.clone()]
    } else {
        fragment_nodes(&dom.document)
    };

    let mut marker = Marker {
        options,
        ids,
        components: Vec::new(),
        component_ids: HashSet::new(),
        invocations: HashMap::new(),
        provenance: HashMap::new(),
        assigned: HashSet::new(),
    };

    if options.mark_components {
        let mut ancestors = Vec::new();
        for root in &roots {
            marker.detect_components(root, &mut ancestors);
        }
    }
    if options.mark_styled_spans {
        for root in &roots {
            marker.detect_styled_spans(root);
        }
    }
    for root in &roots {
        marker.assign_ids(root, None);
    }
    for root in &roots {
        marker.drop_pure_containers(root);
    }
    let mut entries = Vec::new();
    for root in &roots {
        marker.build_entries(root, None, &mut entries);
    }

    debug!(
        entries = entries.len(),
        components = marker.components.len(),
        "marked page"
    );

    let html = match serialize_nodes(&roots, is_document) {
        Some(out) => out,
        None => {
            warn!("failed to serialize marked page, returning input unchanged");
            html.to_string()
        }
    };

    MarkedPage {
        html,
        entries,
        components: marker.components,
    }
}

struct Marker<'a> {
    options: &'a MarkerOptions,
    ids: &'a mut IdGenerator,
    components: Vec<ComponentInstance>,
    component_ids: HashSet<String>,
    /// (parent file, component file) → invocations seen so far.
    invocations: HashMap<(String, String), usize>,
    provenance: HashMap<String, Provenance>,
    /// Marker ids assigned on this page that still carry an entry.
    assigned: HashSet<String>,
}

impl<'a> Marker<'a> {
    // ═══════════════════════════════════════════════════════════════════════════
    // PASS 1: COMPONENT ROOTS
    // ═══════════════════════════════════════════════════════════════════════════

    fn detect_components(&mut self, handle: &Handle, ancestors: &mut Vec<String>) {
        let mut pushed = false;
        if element_name(handle).is_some() {
            if let Some(file) = get_attr(handle, &self.options.source_file_attribute) {
                let already = get_attr(handle, &self.options.component_attribute).is_some();
                if !already && !ancestors.contains(&file) && self.is_component_file(&file) {
                    self.mark_component_root(handle, &file, ancestors);
                }
                ancestors.push(file);
                pushed = true;
            }
        }
        for child in handle.children.borrow().iter() {
            self.detect_components(child, ancestors);
        }
        if pushed {
            ancestors.pop();
        }
    }

    fn is_component_file(&self, file: &str) -> bool {
        self.options.component_dirs.iter().any(|d| in_dir(file, d))
            && !self.options.exclude_component_dirs.iter().any(|d| in_dir(file, d))
    }

    fn mark_component_root(&mut self, handle: &Handle, file: &str, ancestors: &[String]) {
        let id = self.ids.next_id();
        set_attr(handle, &self.options.component_attribute, &id);

        let mut enclosing: Vec<String> = Vec::new();
        for file in ancestors.iter().rev() {
            if !enclosing.contains(file) {
                enclosing.push(file.clone());
            }
        }
        let parent = enclosing.first().cloned();
        let count = self
            .invocations
            .entry((parent.clone().unwrap_or_default(), file.to_string()))
            .or_insert(0);
        let invocation_index = *count;
        *count += 1;

        let line = get_attr(handle, &self.options.source_loc_attribute)
            .and_then(|loc| parse_loc_line(&loc));

        self.component_ids.insert(id.clone());
        self.components.push(ComponentInstance {
            id,
            component_name: component_name(file),
            file: file.to_string(),
            source_path: parent,
            source_line: line,
            invocation_index,
            props: BTreeMap::new(),
            enclosing_files: enclosing,
        });
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PASS 2: DECORATIVE SPANS
    // ═══════════════════════════════════════════════════════════════════════════

    fn detect_styled_spans(&self, handle: &Handle) {
        if element_name(handle).as_deref() == Some("span") {
            let decorative = get_attr(handle, "class")
                .map(|class| is_decorative_class_list(&class))
                .unwrap_or(false);
            if decorative {
                set_attr(handle, &self.options.styled_attribute, "true");
            }
        }
        for child in handle.children.borrow().iter() {
            self.detect_styled_spans(child);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PASS 3: IDENTIFIERS
    // ═══════════════════════════════════════════════════════════════════════════

    fn assign_ids(&mut self, handle: &Handle, inherited: Option<&Provenance>) {
        let mut own = None;
        if let Some(tag) = element_name(handle) {
            own = self.capture_provenance(handle);

            if get_attr(handle, "style").and_then(|s| background_image_url(&s)).is_some() {
                set_attr(handle, &self.options.background_image_attribute, "true");
            }

            if self.qualifies(handle, &tag) {
                let id = self.ids.next_id();
                set_attr(handle, &self.options.attribute, &id);
                if let Some(provenance) = own.as_ref().or(inherited) {
                    self.provenance.insert(id.clone(), provenance.clone());
                }
                self.assigned.insert(id);
            }
        }

        let next = own.as_ref().or(inherited);
        for child in handle.children.borrow().iter() {
            self.assign_ids(child, next);
        }
    }

    /// Read the provenance attributes, stripping them unless the element is a
    /// component root.
    fn capture_provenance(&self, handle: &Handle) -> Option<Provenance> {
        let file = get_attr(handle, &self.options.source_file_attribute);
        let line = get_attr(handle, &self.options.source_loc_attribute)
            .and_then(|loc| parse_loc_line(&loc));
        let is_root = get_attr(handle, &self.options.component_attribute)
            .is_some_and(|id| self.component_ids.contains(&id));
        if !is_root {
            remove_attr(handle, &self.options.source_file_attribute);
            remove_attr(handle, &self.options.source_loc_attribute);
        }
        file.map(|file| Provenance { file, line })
    }

    fn qualifies(&self, handle: &Handle, tag: &str) -> bool {
        if STRUCTURAL_TAGS.contains(&tag) || !self.options.is_markable_tag(tag) {
            return false;
        }
        if get_attr(handle, &self.options.attribute).is_some() {
            return false;
        }
        if tag == "img" {
            return get_attr(handle, "src").is_some_and(|src| !src.trim().is_empty());
        }
        if get_attr(handle, &self.options.background_image_attribute).is_some() {
            return true;
        }
        self.options.allow_empty_text || !normalize_text(&element_text(handle)).is_empty()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PASS 4: MANIFEST
    // ═══════════════════════════════════════════════════════════════════════════

    fn marked_id(&self, handle: &Handle) -> Option<String> {
        get_attr(handle, &self.options.attribute).filter(|id| self.assigned.contains(id))
    }

    /// Unmark elements whose content is nothing but placeholders. Post-order,
    /// so a container's own check already sees its inner containers
    /// flattened.
    fn drop_pure_containers(&mut self, handle: &Handle) {
        for child in handle.children.borrow().iter() {
            self.drop_pure_containers(child);
        }
        let Some(id) = self.marked_id(handle) else {
            return;
        };
        let rendered = self.render_text(handle);
        if !rendered.child_ids.is_empty() && !rendered.has_literal {
            remove_attr(handle, &self.options.attribute);
            self.assigned.remove(&id);
            self.provenance.remove(&id);
        }
    }

    fn render_text(&self, handle: &Handle) -> RenderedText {
        let mut rendered = RenderedText::default();
        self.collect_text(handle, &mut rendered);
        rendered
    }

    fn collect_text(&self, handle: &Handle, out: &mut RenderedText) {
        for child in handle.children.borrow().iter() {
            match &child.data {
                NodeData::Text { contents } => {
                    let text = contents.borrow();
                    if !text.trim().is_empty() {
                        out.has_literal = true;
                    }
                    out.text.push_str(&text);
                }
                NodeData::Element { name, .. } => {
                    let tag = (*name.local).to_ascii_lowercase();
                    if is_skipped_tag(&tag) {
                        continue;
                    }
                    if let Some(id) = self.marked_id(child) {
                        out.text.push_str(&placeholder(&id));
                        out.child_ids.push(id);
                    } else if tag == "br" {
                        out.text.push_str("<br>");
                    } else {
                        self.collect_text(child, out);
                    }
                }
                _ => {}
            }
        }
    }

    fn build_entries(
        &self,
        handle: &Handle,
        component: Option<&str>,
        entries: &mut Vec<ManifestEntry>,
    ) {
        let mut current = component.map(str::to_string);
        if let Some(tag) = element_name(handle) {
            if let Some(cid) = get_attr(handle, &self.options.component_attribute)
                .filter(|cid| self.component_ids.contains(cid))
            {
                current = Some(cid);
            }
            if let Some(id) = self.marked_id(handle) {
                entries.push(self.build_entry(handle, &tag, id, current.clone()));
            }
        }
        for child in handle.children.borrow().iter() {
            self.build_entries(child, current.as_deref(), entries);
        }
    }

    fn build_entry(
        &self,
        handle: &Handle,
        tag: &str,
        id: String,
        parent_component_id: Option<String>,
    ) -> ManifestEntry {
        let rendered = self.render_text(handle);
        let text = rendered.text.trim().to_string();
        let provenance = self.provenance.get(&id);
        let source_path = provenance.map(|p| p.file.clone());

        let image = (tag == "img").then(|| ImageMetadata {
            src: get_attr(handle, "src").unwrap_or_default(),
            alt: get_attr(handle, "alt"),
        });

        ManifestEntry {
            stable_id: Some(stable_id(tag, &text, source_path.as_deref().unwrap_or(""))),
            tag: tag.to_string(),
            text,
            source_line: provenance.and_then(|p| p.line),
            source_path,
            child_cms_ids: rendered.child_ids,
            parent_component_id,
            image,
            background_image: get_attr(handle, "style").and_then(|s| background_image_url(&s)),
            colors: get_attr(handle, "class").and_then(|c| extract_colors(&c)),
            styled: get_attr(handle, &self.options.styled_attribute).is_some(),
            id,
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
struct RenderedText {
    text: String,
    child_ids: Vec<String>,
    /// Whether any non-whitespace text node contributed.
    has_literal: bool,
}

const STRUCTURAL_TAGS: &[&str] = &["html", "head", "body"];

fn is_skipped_tag(tag: &str) -> bool {
    matches!(tag, "script" | "style" | "noscript" | "template")
}

// ═══════════════════════════════════════════════════════════════════════════
// DOM HELPERS
// ═══════════════════════════════════════════════════════════════════════════

fn element_name(handle: &Handle) -> Option<String> {
    match &handle.data {
        NodeData::Element { name, .. } => Some((*name.local).to_ascii_lowercase()),
        _ => None,
    }
}

fn get_attr(handle: &Handle, attr: &str) -> Option<String> {
    match &handle.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|a| &*a.name.local == attr)
            .map(|a| a.value.to_string()),
        _ => None,
    }
}

fn set_attr(handle: &Handle, attr: &str, value: &str) {
    if let NodeData::Element { attrs, .. } = &handle.data {
        let mut attrs = attrs.borrow_mut();
        if let Some(existing) = attrs.iter_mut().find(|a| &*a.name.local == attr) {
            existing.value = StrTendril::from_slice(value);
        } else {
            attrs.push(Attribute {
                name: QualName::new(None, Namespace::from(""), LocalName::from(attr)),
                value: StrTendril::from_slice(value),
            });
        }
    }
}

fn remove_attr(handle: &Handle, attr: &str) {
    if let NodeData::Element { attrs, .. } = &handle.data {
        attrs.borrow_mut().retain(|a| &*a.name.local != attr);
    }
}

/// Visible text of an element: descendant text nodes, `<br>` as a space.
fn element_text(handle: &Handle) -> String {
    fn collect(handle: &Handle, out: &mut String) {
        for child in handle.children.borrow().iter() {
            match &child.data {
                NodeData::Text { contents } => out.push_str(&contents.borrow()),
                NodeData::Element { name, .. } => {
                    let tag = (*name.local).to_ascii_lowercase();
                    if tag == "br" {
                        out.push(' ');
                    } else if !is_skipped_tag(&tag) {
                        collect(child, out);
                    }
                }
                _ => {}
            }
        }
    }
    let mut out = String::new();
    collect(handle, &mut out);
    out
}

fn fragment_nodes(document: &Handle) -> Vec<Handle> {
    let mut nodes = Vec::new();
    for child in document.children.borrow().iter() {
        if element_name(child).as_deref() != Some("html") {
            continue;
        }
        for section in child.children.borrow().iter() {
            if matches!(element_name(section).as_deref(), Some("head") | Some("body")) {
                nodes.extend(section.children.borrow().iter().cloned());
            }
        }
    }
    nodes
}

fn serialize_nodes(roots: &[Handle], is_document: bool) -> Option<String> {
    let mut out = Vec::new();
    let scope = if is_document {
        TraversalScope::ChildrenOnly(None)
    } else {
        TraversalScope::IncludeNode
    };
    for root in roots {
        let handle: SerializableHandle = root.clone().into();
        let opts = SerializeOpts {
            traversal_scope: scope.clone(),
            ..Default::default()
        };
        if let Err(err) = serialize(&mut out, &handle, opts) {
            debug!(error = %err, "serialization failed");
            return None;
        }
    }
    String::from_utf8(out).ok()
}

/// `"12:5"` → 12.
fn parse_loc_line(loc: &str) -> Option<u32> {
    loc.split(':').next()?.trim().parse().ok()
}

fn in_dir(file: &str, dir: &str) -> bool {
    let file = file.replace('\\', "/");
    let dir = dir.trim_matches('/');
    if dir.is_empty() {
        return false;
    }
    file.starts_with(&format!("{dir}/")) || file.contains(&format!("/{dir}/"))
}

fn component_name(file: &str) -> String {
    Path::new(file)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.to_string())
}
