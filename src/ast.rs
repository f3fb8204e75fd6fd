use serde::{Deserialize, Serialize};

use crate::expr::{join_segments, parse_path_segments, PathSegment};

// ═══════════════════════════════════════════════════════════════════════════════
// POSITIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// 1-based line and column, plus the byte offset into the file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourcePosition {
    pub line: u32,
    pub column: u32,
    pub offset: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TEMPLATE AST
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TemplateNode {
    Root(RootNode),
    Element(ElementNode),
    Component(ComponentNode),
    Text(TextNode),
    Expression(ExpressionNode),
}

impl TemplateNode {
    pub fn position(&self) -> SourcePosition {
        match self {
            TemplateNode::Root(r) => r.position,
            TemplateNode::Element(e) => e.position,
            TemplateNode::Component(c) => c.position,
            TemplateNode::Text(t) => t.position,
            TemplateNode::Expression(e) => e.position,
        }
    }

    pub fn children(&self) -> &[TemplateNode] {
        match self {
            TemplateNode::Root(r) => &r.children,
            TemplateNode::Element(e) => &e.children,
            TemplateNode::Component(c) => &c.children,
            TemplateNode::Expression(e) => &e.children,
            TemplateNode::Text(_) => &[],
        }
    }

    /// Whitespace-only text is insignificant for matching.
    pub fn is_blank_text(&self) -> bool {
        matches!(self, TemplateNode::Text(t) if t.value.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RootNode {
    pub children: Vec<TemplateNode>,
    pub position: SourcePosition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementNode {
    pub tag: String,
    pub attributes: Vec<AttributeNode>,
    pub children: Vec<TemplateNode>,
    pub position: SourcePosition,
    /// Position immediately after the tag name in the opening tag.
    pub tag_name_end: SourcePosition,
    pub self_closing: bool,
}

impl ElementNode {
    pub fn attribute(&self, name: &str) -> Option<&AttributeNode> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    pub fn is_raw_text(&self) -> bool {
        is_raw_text_tag(&self.tag)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentNode {
    pub name: String,
    pub attributes: Vec<AttributeNode>,
    pub children: Vec<TemplateNode>,
    pub position: SourcePosition,
    pub tag_name_end: SourcePosition,
    pub self_closing: bool,
}

impl ComponentNode {
    pub fn attribute(&self, name: &str) -> Option<&AttributeNode> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn spreads(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().filter_map(|a| match &a.value {
            AttributeValue::Spread(code) => Some(code.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextNode {
    pub value: String,
    pub position: SourcePosition,
    /// Position of the first non-whitespace character.
    pub content_position: SourcePosition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressionNode {
    pub code: String,
    pub position: SourcePosition,
    /// Markup found inside the expression (ternaries, `&&`, `.map` bodies).
    pub children: Vec<TemplateNode>,
    pub loop_context: Option<LoopContext>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "code", rename_all = "camelCase")]
pub enum AttributeValue {
    Static(String),
    Expression(String),
    /// `{...expr}`
    Spread(String),
    /// Bare attribute with no value.
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeNode {
    /// Empty for spreads.
    pub name: String,
    pub value: AttributeValue,
    pub position: SourcePosition,
}

impl AttributeNode {
    pub fn static_value(&self) -> Option<&str> {
        match &self.value {
            AttributeValue::Static(v) => Some(v),
            _ => None,
        }
    }

    pub fn expression(&self) -> Option<&str> {
        match &self.value {
            AttributeValue::Expression(code) => Some(code),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOOP CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

/// A local bound by a `.map` callback parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoopBinding {
    pub local: String,
    /// Path below one array item, empty for the item itself (`({ label })`
    /// gives `.label`).
    pub suffix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoopContext {
    /// The array expression as written.
    pub source: String,
    /// `source` with enclosing loop variables already substituted.
    pub resolved_source: String,
    pub bindings: Vec<LoopBinding>,
    pub index_var: Option<String>,
}

impl LoopContext {
    /// Rewrites a path rooted at a loop variable into a wildcard path over the
    /// loop source: `item.label` becomes `items[*].label`.
    pub fn substitute(&self, path: &str) -> Option<String> {
        let segments = parse_path_segments(path)?;
        let base = match segments.first() {
            Some(PathSegment::Key(k)) => k.as_str(),
            _ => return None,
        };
        let binding = self.bindings.iter().find(|b| b.local == base)?;
        let rest = join_segments(&segments[1..]);
        Some(format!("{}[*]{}{}", self.resolved_source, binding.suffix, rest))
    }

    pub fn binds(&self, name: &str) -> bool {
        self.bindings.iter().any(|b| b.local == name)
            || self.index_var.as_deref() == Some(name)
    }
}

/// Applies the innermost matching loop context first, then the next ones out.
pub fn substitute_loop_path(contexts: &[&LoopContext], path: &str) -> String {
    for ctx in contexts.iter().rev() {
        if let Some(substituted) = ctx.substitute(path) {
            return substituted;
        }
    }
    path.to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// FILE-LEVEL AST
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frontmatter {
    pub content: String,
    /// Line of the first content line (the one after the opening fence).
    pub start_line: u32,
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateAst {
    pub frontmatter: Option<Frontmatter>,
    pub root: RootNode,
}

pub const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

pub fn is_void_tag(tag: &str) -> bool {
    VOID_TAGS.iter().any(|t| t.eq_ignore_ascii_case(tag))
}

pub fn is_raw_text_tag(tag: &str) -> bool {
    tag.eq_ignore_ascii_case("script") || tag.eq_ignore_ascii_case("style")
}

/// Check if a tag name represents a component (starts with uppercase or is
/// namespaced like `Card.Header`)
pub fn is_component_tag(tag_name: &str) -> bool {
    tag_name
        .chars()
        .next()
        .map(|c| c.is_uppercase())
        .unwrap_or(false)
        || (tag_name.contains('.') && !tag_name.starts_with('.'))
}

/// Concatenated text of every descendant text node, skipping raw-text
/// elements and expressions.
pub fn text_content(nodes: &[TemplateNode]) -> String {
    let mut out = String::new();
    collect_text(nodes, &mut out);
    out
}

fn collect_text(nodes: &[TemplateNode], out: &mut String) {
    for node in nodes {
        match node {
            TemplateNode::Text(t) => out.push_str(&t.value),
            TemplateNode::Element(e) if e.is_raw_text() => {}
            TemplateNode::Element(e) => {
                if e.tag.eq_ignore_ascii_case("br") {
                    out.push(' ');
                }
                collect_text(&e.children, out);
            }
            TemplateNode::Component(c) => collect_text(&c.children, out),
            TemplateNode::Root(r) => collect_text(&r.children, out),
            TemplateNode::Expression(_) => {}
        }
    }
}

/// First descendant text node with visible content.
pub fn first_text_node(nodes: &[TemplateNode]) -> Option<&TextNode> {
    for node in nodes {
        match node {
            TemplateNode::Text(t) if !t.value.trim().is_empty() => return Some(t),
            TemplateNode::Text(_) | TemplateNode::Expression(_) => {}
            TemplateNode::Element(e) if e.is_raw_text() => {}
            other => {
                if let Some(t) = first_text_node(other.children()) {
                    return Some(t);
                }
            }
        }
    }
    None
}
