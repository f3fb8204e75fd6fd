//! Element/text matcher.
//!
//! Walks one file's markup looking for the element that rendered a
//! `(tag, text)` pair. Scores are a fixed contract:
//!
//! | case | score |
//! |---|---|
//! | single-expression child whose path resolves to a local definition with the same value | 100 (returns immediately) |
//! | normalized search text of at most 10 characters found as a substring | 80 |
//! | 30-character prefix of a longer search text found | `50 + 40 × overlap / total` |
//! | search text over 20 characters whose first three words are found | 40 |
//!
//! The best score across the file wins; on equal scores the first element in
//! document order is kept. Expressions whose value flows in through a prop or
//! an import are reported as candidates for cross-file verification instead.

use crate::ast::{
    first_text_node, substitute_loop_path, text_content, ElementNode, ExpressionNode,
    LoopContext, TemplateNode, TextNode,
};
use crate::cache::ParsedFile;
use crate::expr::{base_identifier, expression_path, path_rest, replace_base};
use crate::model::{SourceLocation, SourceType};
use crate::normalize::{char_len, char_prefix, normalize_text};
use crate::symbols::PropName;
use crate::visitor::{walk_element, walk_expression, walk_node, TemplateVisitor};

pub const SCORE_EXACT_VARIABLE: f64 = 100.0;
pub const SCORE_SHORT_EXACT: f64 = 80.0;
pub const SCORE_PREFIX_BASE: f64 = 50.0;
pub const SCORE_PREFIX_RANGE: f64 = 40.0;
pub const SCORE_FIRST_WORDS: f64 = 40.0;

const SHORT_TEXT_LIMIT: usize = 10;
const PREFIX_LENGTH: usize = 30;
const FIRST_WORDS_MIN_LENGTH: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMatch {
    pub location: SourceLocation,
    pub score: f64,
}

/// An element whose expression reads a prop. `member_path` is what follows
/// the prop in the expression, e.g. `[*].label` for `item.label` inside
/// `items.map(item => ...)`.
#[derive(Debug, Clone, PartialEq)]
pub struct PropCandidate {
    pub prop_name: String,
    pub member_path: String,
    pub line: u32,
}

/// An element whose expression reads an imported binding.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportCandidate {
    pub local_name: String,
    pub imported_name: String,
    pub source: String,
    pub member_path: String,
    pub line: u32,
}

#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub best_match: Option<ScoredMatch>,
    pub prop_candidates: Vec<PropCandidate>,
    pub import_candidates: Vec<ImportCandidate>,
}

impl MatchOutcome {
    pub fn is_exact(&self) -> bool {
        self.best_match
            .as_ref()
            .is_some_and(|m| m.score >= SCORE_EXACT_VARIABLE)
    }
}

/// Score literal content against normalized search text. Both sides must
/// already be normalized.
pub fn score_text(content: &str, search: &str) -> Option<f64> {
    if content.is_empty() || search.is_empty() {
        return None;
    }

    let search_len = char_len(search);
    if search_len <= SHORT_TEXT_LIMIT {
        return content.contains(search).then_some(SCORE_SHORT_EXACT);
    }

    let prefix = char_prefix(search, PREFIX_LENGTH);
    if let Some(idx) = content.find(prefix) {
        let overlap = content[idx..]
            .chars()
            .zip(search.chars())
            .take_while(|(a, b)| a == b)
            .count();
        let total = char_len(content).max(search_len);
        return Some(SCORE_PREFIX_BASE + SCORE_PREFIX_RANGE * overlap as f64 / total as f64);
    }

    if search_len > FIRST_WORDS_MIN_LENGTH {
        let words: Vec<&str> = search.split(' ').take(3).collect();
        if words.len() == 3 && content.contains(&words.join(" ")) {
            return Some(SCORE_FIRST_WORDS);
        }
    }

    None
}

/// A path as seen from the file's symbol table: loop variables substituted
/// by wildcard paths and member-path references followed one hop.
pub fn resolve_local_path(file: &ParsedFile, loops: &[&LoopContext], path: &str) -> String {
    let substituted = substitute_loop_path(loops, path);
    match file.symbols.references.get(base_identifier(&substituted)) {
        Some(reference) => replace_base(&substituted, reference),
        None => substituted,
    }
}

struct ElementMatcher<'a> {
    file: &'a ParsedFile,
    tag: &'a str,
    search: &'a str,
    props_object: &'a str,
    loops: Vec<&'a LoopContext>,
    outcome: MatchOutcome,
    done: bool,
}

impl<'a> ElementMatcher<'a> {
    fn offer(&mut self, candidate: ScoredMatch) {
        let better = self
            .outcome
            .best_match
            .as_ref()
            .map_or(true, |best| candidate.score > best.score);
        if better {
            self.outcome.best_match = Some(candidate);
        }
    }

    fn single_expression(element: &'a ElementNode) -> Option<&'a ExpressionNode> {
        let mut significant = element.children.iter().filter(|n| !n.is_blank_text());
        match (significant.next(), significant.next()) {
            (Some(TemplateNode::Expression(e)), None) if e.children.is_empty() => Some(e),
            _ => None,
        }
    }

    fn match_expression(&mut self, expression: &'a ExpressionNode) {
        let Some(path) = expression_path(&expression.code) else {
            return;
        };
        let file = self.file;
        let resolved = resolve_local_path(file, &self.loops, &path);

        let symbols = &file.symbols;
        let exact = symbols
            .definitions_matching(&resolved)
            .find(|d| normalize_text(&d.value) == self.search);
        if let Some(def) = exact {
            let location = SourceLocation::new(
                &file.relative_path,
                def.line,
                file.snippet(def.line),
                SourceType::Variable,
            )
            .with_variable(def.path())
            .with_definition_line(def.line);
            self.outcome.best_match = Some(ScoredMatch {
                location,
                score: SCORE_EXACT_VARIABLE,
            });
            self.done = true;
            return;
        }

        let line = expression.position.line;
        if let Some(candidate) = self.prop_candidate(&resolved, line) {
            self.outcome.prop_candidates.push(candidate);
            return;
        }

        let base = base_identifier(&resolved);
        if let Some(import) = symbols.import_for(base) {
            self.outcome.import_candidates.push(ImportCandidate {
                local_name: import.local_name.clone(),
                imported_name: import.imported_name.clone(),
                source: import.source.clone(),
                member_path: path_rest(&resolved).to_string(),
                line,
            });
        }
    }

    fn prop_candidate(&self, path: &str, line: u32) -> Option<PropCandidate> {
        prop_reference(self.file, self.props_object, path).map(|(prop_name, member_path)| {
            PropCandidate {
                prop_name,
                member_path,
                line,
            }
        })
    }

    fn match_literal(&mut self, element: &'a ElementNode) {
        let content = normalize_text(&text_content(&element.children));
        let Some(score) = score_text(&content, self.search) else {
            return;
        };
        let line = text_line(&element.children, self.search).unwrap_or(element.position.line);
        self.offer(ScoredMatch {
            location: SourceLocation::new(
                &self.file.relative_path,
                line,
                self.file.snippet(line),
                SourceType::Static,
            ),
            score,
        });
    }
}

impl<'a> TemplateVisitor<'a> for ElementMatcher<'a> {
    fn visit_node(&mut self, node: &'a TemplateNode) {
        if !self.done {
            walk_node(self, node);
        }
    }

    fn visit_element(&mut self, element: &'a ElementNode) {
        if element.is_raw_text() {
            return;
        }
        if element.tag.eq_ignore_ascii_case(self.tag) {
            match Self::single_expression(element) {
                Some(expression) => self.match_expression(expression),
                None => self.match_literal(element),
            }
            if self.done {
                return;
            }
        }
        walk_element(self, element);
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

/// Splits a path that reads a prop into `(prop name, member path below it)`.
/// Handles destructured aliases, rest/whole-props locals and direct
/// `Astro.props.x` access.
pub fn prop_reference(
    file: &ParsedFile,
    props_object: &str,
    path: &str,
) -> Option<(String, String)> {
    if let Some(after) = path
        .strip_prefix(props_object)
        .and_then(|rest| rest.strip_prefix('.'))
    {
        let prop = base_identifier(after);
        return (!prop.is_empty()).then(|| (prop.to_string(), path_rest(after).to_string()));
    }

    let base = base_identifier(path);
    match file.symbols.prop_for(base)? {
        PropName::Named(name) => Some((name.clone(), path_rest(path).to_string())),
        PropName::Rest => {
            let after = path_rest(path).strip_prefix('.')?;
            let prop = base_identifier(after);
            (!prop.is_empty()).then(|| (prop.to_string(), path_rest(after).to_string()))
        }
    }
}

/// Line of the text node holding the match: the first descendant text node
/// whose normalized content starts the search text or contains its first
/// word, else the first visible text node.
fn text_line(children: &[TemplateNode], search: &str) -> Option<u32> {
    let first_word = search.split(' ').next().unwrap_or(search);
    let mut texts = Vec::new();
    collect_text_nodes(children, &mut texts);
    texts
        .iter()
        .find(|t| {
            let value = normalize_text(&t.value);
            !value.is_empty() && (search.starts_with(&value) || value.contains(first_word))
        })
        .map(|t| t.content_position.line)
        .or_else(|| first_text_node(children).map(|t| t.content_position.line))
}

fn collect_text_nodes<'n>(nodes: &'n [TemplateNode], out: &mut Vec<&'n TextNode>) {
    for node in nodes {
        match node {
            TemplateNode::Text(t) => out.push(t),
            TemplateNode::Element(e) if e.is_raw_text() => {}
            TemplateNode::Expression(_) => {}
            other => collect_text_nodes(other.children(), out),
        }
    }
}

/// Match `(tag, text)` against one parsed file.
pub fn match_element(
    file: &ParsedFile,
    tag: &str,
    text: &str,
    props_object: &str,
) -> MatchOutcome {
    let search = normalize_text(text);
    if search.is_empty() {
        return MatchOutcome::default();
    }

    let mut matcher = ElementMatcher {
        file,
        tag,
        search: &search,
        props_object,
        loops: Vec::new(),
        outcome: MatchOutcome::default(),
        done: false,
    };
    matcher.visit_ast(&file.ast);
    matcher.outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BuildContext;
    use crate::config::LocatorConfig;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn parsed(source: &str) -> (TempDir, Arc<ParsedFile>) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("src/pages/index.astro");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, source).unwrap();
        let mut ctx = BuildContext::new(LocatorConfig::new(dir.path()));
        let file = ctx.parse(&path).unwrap();
        (dir, file)
    }

    #[test]
    fn test_score_tiers() {
        assert_eq!(score_text("Click Me now", "Click Me"), Some(80.0));
        assert_eq!(score_text("Click", "Click Me"), None);

        let long = "The quick brown fox jumps over the lazy dog";
        assert_eq!(score_text(long, long), Some(90.0));
        let partial = score_text("The quick brown fox jumps over the lazy cat", long).unwrap();
        assert!(partial > 50.0 && partial < 90.0);

        assert_eq!(
            score_text("Intro: The quick brown bear", "The quick brown fox jumps over everything"),
            Some(40.0)
        );
    }

    #[test]
    fn test_short_text_requires_exact_substring() {
        assert_eq!(score_text("Hello World", "Hello"), Some(80.0));
        assert_eq!(score_text("Hello World", "Helo"), None);
        assert_eq!(score_text("hello", "Hello"), None);
    }

    #[test]
    fn test_static_text_reports_text_line() {
        let (_dir, file) = parsed("---\n---\n<h1\n  class=\"title\"\n>\n  Hello World\n</h1>\n");
        let outcome = match_element(&file, "h1", "Hello World", "Astro.props");
        let best = outcome.best_match.unwrap();
        assert_eq!(best.location.source_type, SourceType::Static);
        assert_eq!(best.location.line, 6);
        assert_eq!(best.location.snippet, "Hello World");
    }

    #[test]
    fn test_variable_resolves_to_declaration_line() {
        let (_dir, file) = parsed(
            "---\nconst other = 1;\nconst label = 'Click Me';\n---\n<div>\n  <button>{label}</button>\n</div>\n",
        );
        let outcome = match_element(&file, "button", "Click Me", "Astro.props");
        let best = outcome.best_match.unwrap();
        assert_eq!(best.score, SCORE_EXACT_VARIABLE);
        assert_eq!(best.location.source_type, SourceType::Variable);
        assert_eq!(best.location.variable_name.as_deref(), Some("label"));
        assert_eq!(best.location.line, 3);
        assert_eq!(best.location.snippet, "const label = 'Click Me';");
    }

    #[test]
    fn test_loop_item_matches_wildcard_definition() {
        let (_dir, file) = parsed(
            "---\nconst items = [\n  { label: 'One' },\n  { label: 'Two' },\n];\n---\n<ul>{items.map((item) => <li>{item.label}</li>)}</ul>\n",
        );
        let outcome = match_element(&file, "li", "Two", "Astro.props");
        let best = outcome.best_match.unwrap();
        assert_eq!(best.location.variable_name.as_deref(), Some("items[1].label"));
        assert_eq!(best.location.line, 4);
    }

    #[test]
    fn test_prop_expression_becomes_candidate() {
        let (_dir, file) = parsed(
            "---\nconst { title, items: navItems } = Astro.props;\n---\n<title>{title}</title>\n<ul>{navItems.map((n) => <li>{n.label}</li>)}</ul>\n",
        );
        let outcome = match_element(&file, "title", "My Page Title", "Astro.props");
        assert!(outcome.best_match.is_none());
        assert_eq!(
            outcome.prop_candidates,
            vec![PropCandidate {
                prop_name: "title".to_string(),
                member_path: String::new(),
                line: 4,
            }]
        );

        let outcome = match_element(&file, "li", "Docs", "Astro.props");
        assert_eq!(outcome.prop_candidates[0].prop_name, "items");
        assert_eq!(outcome.prop_candidates[0].member_path, "[*].label");
    }

    #[test]
    fn test_import_expression_becomes_candidate() {
        let (_dir, file) = parsed(
            "---\nimport { hero } from '../data/site';\n---\n<h2>{hero.heading}</h2>\n",
        );
        let outcome = match_element(&file, "h2", "Big News", "Astro.props");
        let candidate = &outcome.import_candidates[0];
        assert_eq!(candidate.imported_name, "hero");
        assert_eq!(candidate.member_path, ".heading");
    }

    #[test]
    fn test_ties_keep_first() {
        let (_dir, file) = parsed("<p>Same</p>\n<p>Same</p>\n");
        let best = match_element(&file, "p", "Same", "Astro.props").best_match.unwrap();
        assert_eq!(best.location.line, 1);
    }

    #[test]
    fn test_skips_script_content() {
        let (_dir, file) = parsed("<script>const p = 'Hidden';</script>\n<p>Shown</p>\n");
        assert!(match_element(&file, "script", "Hidden", "Astro.props").best_match.is_none());
    }
}
