//! Expression analysis.
//!
//! Turns template expressions into dotted/indexed paths (`nav.links[0].label`),
//! detects `.map` loop callbacks, and statically evaluates literal-ish
//! expressions against a symbol lookup.

use oxc_allocator::Allocator;
use oxc_ast::ast::{
    BindingPattern, CallExpression, ChainElement, ComputedMemberExpression, Expression,
    StaticMemberExpression,
};
use oxc_ast_visit::Visit;
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType};

use crate::ast::LoopBinding;

// ═══════════════════════════════════════════════════════════════════════════════
// PATHS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
    /// `[*]`, any index
    Wildcard,
}

/// Parse `a.b[0][*].c` into segments. Returns None for anything that is not
/// a plain member path.
pub fn parse_path_segments(path: &str) -> Option<Vec<PathSegment>> {
    let mut segments = Vec::new();
    let bytes = path.as_bytes();
    let mut i = 0;
    let mut key = String::new();

    let flush = |key: &mut String, segments: &mut Vec<PathSegment>| {
        if !key.is_empty() {
            segments.push(PathSegment::Key(std::mem::take(key)));
        }
    };

    while i < bytes.len() {
        match bytes[i] {
            b'.' => {
                let after_index = matches!(
                    segments.last(),
                    Some(PathSegment::Index(_)) | Some(PathSegment::Wildcard)
                );
                if key.is_empty() && !after_index {
                    return None;
                }
                flush(&mut key, &mut segments);
                i += 1;
            }
            b'[' => {
                flush(&mut key, &mut segments);
                let close = path[i..].find(']')? + i;
                let inner = path[i + 1..close].trim();
                if inner == "*" {
                    segments.push(PathSegment::Wildcard);
                } else if let Ok(n) = inner.parse::<usize>() {
                    segments.push(PathSegment::Index(n));
                } else if let Some(k) = strip_quotes(inner) {
                    segments.push(PathSegment::Key(k.to_string()));
                } else {
                    return None;
                }
                i = close + 1;
            }
            c if c.is_ascii_alphanumeric() || c == b'_' || c == b'$' => {
                key.push(c as char);
                i += 1;
            }
            _ => return None,
        }
    }
    flush(&mut key, &mut segments);

    if segments.is_empty() {
        None
    } else {
        Some(segments)
    }
}

fn strip_quotes(s: &str) -> Option<&str> {
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        Some(&s[1..s.len() - 1])
    } else {
        None
    }
}

/// Render segments as a path suffix: every key gets a leading dot.
pub fn join_segments(segments: &[PathSegment]) -> String {
    let mut out = String::new();
    for seg in segments {
        match seg {
            PathSegment::Key(k) => {
                out.push('.');
                out.push_str(k);
            }
            PathSegment::Index(n) => out.push_str(&format!("[{}]", n)),
            PathSegment::Wildcard => out.push_str("[*]"),
        }
    }
    out
}

/// Render segments as a full path (no leading dot).
pub fn format_path(segments: &[PathSegment]) -> String {
    let joined = join_segments(segments);
    joined.strip_prefix('.').unwrap_or(&joined).to_string()
}

/// The leading identifier of a path: `items` for `items[0].label`.
pub fn base_identifier(path: &str) -> &str {
    let end = path
        .find(|c: char| c == '.' || c == '[')
        .unwrap_or(path.len());
    &path[..end]
}

/// Everything after the leading identifier, e.g. `[0].label`.
pub fn path_rest(path: &str) -> &str {
    &path[base_identifier(path).len()..]
}

/// Substitute the leading identifier of `path` with `replacement`, keeping
/// the trailing member/index path.
pub fn replace_base(path: &str, replacement: &str) -> String {
    format!("{}{}", replacement.trim(), path_rest(path))
}

/// True when `concrete` is matched by `pattern`, where `[*]` in the pattern
/// matches any index.
pub fn path_matches(pattern: &str, concrete: &str) -> bool {
    if pattern == concrete {
        return true;
    }
    if !pattern.contains("[*]") {
        return false;
    }
    match (parse_path_segments(pattern), parse_path_segments(concrete)) {
        (Some(p), Some(c)) => {
            p.len() == c.len()
                && p.iter().zip(c.iter()).all(|(ps, cs)| match (ps, cs) {
                    (PathSegment::Wildcard, PathSegment::Index(_)) => true,
                    (a, b) => a == b,
                })
        }
        _ => false,
    }
}

/// True when `concrete` lies at or below `prefix` (wildcards allowed).
pub fn path_starts_with(concrete: &str, prefix: &str) -> bool {
    match (parse_path_segments(prefix), parse_path_segments(concrete)) {
        (Some(p), Some(c)) => {
            p.len() <= c.len()
                && p.iter().zip(c.iter()).all(|(ps, cs)| match (ps, cs) {
                    (PathSegment::Wildcard, PathSegment::Index(_)) => true,
                    (a, b) => a == b,
                })
        }
        _ => false,
    }
}

/// Last key segment of a path: `href` for `item.href`.
pub fn last_key(path: &str) -> Option<String> {
    parse_path_segments(path)?
        .into_iter()
        .rev()
        .find_map(|s| match s {
            PathSegment::Key(k) => Some(k),
            _ => None,
        })
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXPRESSION → PATH
// ═══════════════════════════════════════════════════════════════════════════════

fn source_type() -> SourceType {
    SourceType::default()
        .with_typescript(true)
        .with_module(true)
        .with_jsx(true)
}

/// Resolve an expression like `nav.links[0]?.label` to a dotted/indexed path.
/// Returns None for anything that is not a pure member chain.
pub fn expression_path(code: &str) -> Option<String> {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        return None;
    }
    // Fast path for the common case.
    if !trimmed.contains("[*]")
        && is_valid_identifier(base_identifier(trimmed))
        && !matches!(trimmed, "true" | "false" | "null" | "undefined")
    {
        if let Some(segments) = parse_path_segments(trimmed) {
            return Some(format_path(&segments));
        }
    }

    let allocator = Allocator::default();
    let expr = Parser::new(&allocator, trimmed, source_type())
        .parse_expression()
        .ok()?;
    member_path(&expr)
}

pub(crate) fn member_path(expr: &Expression) -> Option<String> {
    match expr {
        Expression::Identifier(id) => Some(id.name.to_string()),
        Expression::StaticMemberExpression(m) => static_member_path(m),
        Expression::ComputedMemberExpression(m) => computed_member_path(m),
        Expression::ChainExpression(chain) => match &chain.expression {
            ChainElement::StaticMemberExpression(m) => static_member_path(m),
            ChainElement::ComputedMemberExpression(m) => computed_member_path(m),
            _ => None,
        },
        Expression::ParenthesizedExpression(p) => member_path(&p.expression),
        Expression::TSNonNullExpression(e) => member_path(&e.expression),
        Expression::TSAsExpression(e) => member_path(&e.expression),
        _ => None,
    }
}

fn static_member_path(m: &StaticMemberExpression) -> Option<String> {
    Some(format!("{}.{}", member_path(&m.object)?, m.property.name))
}

fn computed_member_path(m: &ComputedMemberExpression) -> Option<String> {
    let base = member_path(&m.object)?;
    match &m.expression {
        Expression::NumericLiteral(n) if n.value >= 0.0 && n.value.fract() == 0.0 => {
            Some(format!("{}[{}]", base, n.value as usize))
        }
        Expression::StringLiteral(s) => Some(format!("{}.{}", base, s.value)),
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOOP CALLBACK DETECTION
// ═══════════════════════════════════════════════════════════════════════════════

/// A `source.map((item, index) => ...)` callback found in an expression.
#[derive(Debug, Clone, PartialEq)]
pub struct MapCallback {
    pub source: String,
    pub bindings: Vec<LoopBinding>,
    pub index_var: Option<String>,
}

struct MapCallbackFinder<'s> {
    code: &'s str,
    found: Option<MapCallback>,
}

impl<'a, 's> Visit<'a> for MapCallbackFinder<'s> {
    fn visit_call_expression(&mut self, call: &CallExpression<'a>) {
        if self.found.is_none() {
            if let Some(callback) = map_callback(call, self.code) {
                self.found = Some(callback);
                return;
            }
        }
        oxc_ast_visit::walk::walk_call_expression(self, call);
    }
}

fn map_callback(call: &CallExpression, code: &str) -> Option<MapCallback> {
    let Expression::StaticMemberExpression(callee) = &call.callee else {
        return None;
    };
    if callee.property.name != "map" {
        return None;
    }
    let source = member_path(&callee.object).unwrap_or_else(|| {
        let span = callee.object.span();
        code.get(span.start as usize..span.end as usize)
            .unwrap_or_default()
            .to_string()
    });
    if source.is_empty() {
        return None;
    }

    let params = match call.arguments.first()?.as_expression()? {
        Expression::ArrowFunctionExpression(f) => &f.params.items,
        Expression::FunctionExpression(f) => &f.params.items,
        _ => return None,
    };

    let mut bindings = Vec::new();
    if let Some(item) = params.first() {
        collect_loop_bindings(&item.pattern, "", &mut bindings);
    }
    let index_var = params.get(1).and_then(|p| match &p.pattern {
        BindingPattern::BindingIdentifier(id) => Some(id.name.to_string()),
        _ => None,
    });

    Some(MapCallback {
        source,
        bindings,
        index_var,
    })
}

fn collect_loop_bindings(pattern: &BindingPattern, suffix: &str, out: &mut Vec<LoopBinding>) {
    match pattern {
        BindingPattern::BindingIdentifier(id) => out.push(LoopBinding {
            local: id.name.to_string(),
            suffix: suffix.to_string(),
        }),
        BindingPattern::ObjectPattern(obj) => {
            for prop in &obj.properties {
                if let Some(key) = prop.key.static_name() {
                    collect_loop_bindings(&prop.value, &format!("{}.{}", suffix, key), out);
                }
            }
        }
        BindingPattern::ArrayPattern(arr) => {
            for (i, elem) in arr.elements.iter().enumerate() {
                if let Some(p) = elem {
                    collect_loop_bindings(p, &format!("{}[{}]", suffix, i), out);
                }
            }
        }
        BindingPattern::AssignmentPattern(assign) => {
            collect_loop_bindings(&assign.left, suffix, out)
        }
    }
}

/// Detect the first `.map` callback in an expression. Falls back to a textual
/// scan when the expression does not parse (template markup inside an
/// expression is not always valid JSX).
pub fn detect_map_callback(code: &str) -> Option<MapCallback> {
    if !code.contains(".map(") {
        return None;
    }
    let allocator = Allocator::default();
    if let Ok(expr) = Parser::new(&allocator, code, source_type()).parse_expression() {
        let mut finder = MapCallbackFinder { code, found: None };
        finder.visit_expression(&expr);
        if finder.found.is_some() {
            return finder.found;
        }
    }
    parse_map_expression(code)
}

fn parse_map_expression(code: &str) -> Option<MapCallback> {
    let map_index = code.find(".map(")?;
    let source = code[..map_index].trim().to_string();
    if source.is_empty() || parse_path_segments(&source).is_none() {
        return None;
    }

    let after_map = code[map_index + 5..].trim_start();
    let (item_var, index_var) = if let Some(rest) = after_map.strip_prefix('(') {
        let close = rest.find(')')?;
        let params: Vec<&str> = rest[..close].split(',').map(|p| p.trim()).collect();
        let item = params.first().copied().unwrap_or("").to_string();
        let index = params.get(1).map(|s| s.to_string());
        (item, index)
    } else {
        let arrow_index = after_map.find("=>")?;
        (after_map[..arrow_index].trim().to_string(), None)
    };

    if item_var.is_empty() || !is_valid_identifier(&item_var) {
        return None;
    }
    Some(MapCallback {
        source,
        bindings: vec![LoopBinding {
            local: item_var,
            suffix: String::new(),
        }],
        index_var: index_var.filter(|v| is_valid_identifier(v)),
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATIC EVALUATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Try to evaluate an expression to a static string value. Paths are looked
/// up through `lookup`. Returns None when the expression cannot be statically
/// resolved.
pub fn static_eval(expr: &str, lookup: &dyn Fn(&str) -> Option<String>) -> Option<String> {
    let mut trimmed = expr.trim();
    while let Some(stripped) = trimmed.strip_suffix(';') {
        trimmed = stripped.trim_end();
    }

    if trimmed.is_empty() {
        return Some(String::new());
    }

    if let Some(literal) = try_parse_string_literal(trimmed) {
        return Some(literal);
    }

    if let Ok(num) = trimmed.parse::<f64>() {
        return Some(format_number(num));
    }

    match trimmed {
        "true" | "false" => return Some(trimmed.to_string()),
        "null" | "undefined" => return None,
        _ => {}
    }

    if parse_path_segments(trimmed).is_some() {
        return lookup(trimmed);
    }

    if let Some(resolved) = try_resolve_concatenation(trimmed, lookup) {
        return Some(resolved);
    }

    try_resolve_template_literal(trimmed, lookup)
}

pub fn format_number(num: f64) -> String {
    if num.fract() == 0.0 && num.abs() < 1e15 {
        format!("{}", num as i64)
    } else {
        num.to_string()
    }
}

fn try_parse_string_literal(s: &str) -> Option<String> {
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        let inner = &s[1..s.len() - 1];
        return Some(unescape_string(inner));
    }

    // Template literal without interpolations
    if s.len() >= 2 && s.starts_with('`') && s.ends_with('`') {
        let inner = &s[1..s.len() - 1];
        if !inner.contains("${") {
            return Some(unescape_string(inner));
        }
    }

    None
}

fn unescape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some('\\') => result.push('\\'),
                Some('"') => result.push('"'),
                Some('\'') => result.push('\''),
                Some('`') => result.push('`'),
                Some(other) => {
                    result.push('\\');
                    result.push(other);
                }
                None => result.push('\\'),
            }
        } else {
            result.push(c);
        }
    }

    result
}

fn try_resolve_concatenation(
    expr: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Option<String> {
    if !expr.contains(" + ") {
        return None;
    }

    let mut result = String::new();
    for part in expr.split(" + ") {
        result.push_str(&static_eval(part, lookup)?);
    }
    Some(result)
}

fn try_resolve_template_literal(
    expr: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Option<String> {
    if expr.len() < 2 || !expr.starts_with('`') || !expr.ends_with('`') {
        return None;
    }

    let inner = &expr[1..expr.len() - 1];
    let mut result = String::new();
    let chars: Vec<char> = inner.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        if i + 1 < chars.len() && chars[i] == '$' && chars[i + 1] == '{' {
            let start = i + 2;
            let mut depth = 1;
            let mut end = start;

            while end < chars.len() && depth > 0 {
                match chars[end] {
                    '{' => depth += 1,
                    '}' => depth -= 1,
                    _ => {}
                }
                end += 1;
            }

            if depth != 0 {
                return None;
            }
            let interpolation: String = chars[start..end - 1].iter().collect();
            result.push_str(&static_eval(&interpolation, lookup)?);
            i = end;
        } else {
            result.push(chars[i]);
            i += 1;
        }
    }

    Some(result)
}

/// Check if a string is a valid JavaScript identifier
pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();

    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_path_segments() {
        assert_eq!(
            parse_path_segments("nav.links[0].text"),
            Some(vec![
                PathSegment::Key("nav".into()),
                PathSegment::Key("links".into()),
                PathSegment::Index(0),
                PathSegment::Key("text".into()),
            ])
        );
        assert_eq!(
            parse_path_segments("items[*]"),
            Some(vec![PathSegment::Key("items".into()), PathSegment::Wildcard])
        );
        assert_eq!(parse_path_segments("a + b"), None);
        assert_eq!(parse_path_segments(".a"), None);
    }

    #[test]
    fn test_expression_path() {
        assert_eq!(expression_path("label"), Some("label".to_string()));
        assert_eq!(
            expression_path("nav.links[2]['text']"),
            Some("nav.links[2].text".to_string())
        );
        assert_eq!(
            expression_path("item?.label"),
            Some("item.label".to_string())
        );
        assert_eq!(expression_path("title.toUpperCase()"), None);
        assert_eq!(expression_path("a + b"), None);
    }

    #[test]
    fn test_path_matching() {
        assert!(path_matches("items[*].label", "items[3].label"));
        assert!(!path_matches("items[*].label", "items[3].href"));
        assert!(!path_matches("items[*].label", "items.label"));
        assert!(path_matches("title", "title"));
        assert!(path_starts_with("nav.links[1].href", "nav.links"));
        assert!(path_starts_with("nav.links[1].href", "nav.links[*]"));
        assert!(!path_starts_with("navigation", "nav"));
    }

    #[test]
    fn test_replace_base_preserves_trailing_path() {
        assert_eq!(replace_base("items[0].label", "navItems"), "navItems[0].label");
        assert_eq!(replace_base("title", "site.title"), "site.title");
        assert_eq!(replace_base("items[*]", "data.nav"), "data.nav[*]");
    }

    #[test]
    fn test_detect_map_callback() {
        let cb = detect_map_callback("items.map((item, i) => <li>{item.label}</li>)").unwrap();
        assert_eq!(cb.source, "items");
        assert_eq!(cb.bindings[0].local, "item");
        assert_eq!(cb.index_var.as_deref(), Some("i"));
    }

    #[test]
    fn test_detect_destructured_map_callback() {
        let cb =
            detect_map_callback("nav.links.map(({ label, href }) => <a href={href}>{label}</a>)")
                .unwrap();
        assert_eq!(cb.source, "nav.links");
        assert_eq!(cb.bindings.len(), 2);
        assert_eq!(cb.bindings[0].suffix, ".label");
        assert_eq!(cb.bindings[1].local, "href");
    }

    #[test]
    fn test_detect_map_callback_textual_fallback() {
        // HTML comments are not valid JSX; the textual scan still finds the loop.
        let cb = detect_map_callback("posts.map((post) => <!-- c --> <p>{post}</p>)").unwrap();
        assert_eq!(cb.source, "posts");
        assert_eq!(cb.bindings[0].local, "post");
    }

    #[test]
    fn test_static_eval() {
        let mut vars = HashMap::new();
        vars.insert("title".to_string(), "Home".to_string());
        let lookup = |p: &str| vars.get(p).cloned();

        assert_eq!(static_eval("\"Hello\"", &lookup), Some("Hello".to_string()));
        assert_eq!(static_eval("42", &lookup), Some("42".to_string()));
        assert_eq!(static_eval("title", &lookup), Some("Home".to_string()));
        assert_eq!(
            static_eval("\"Site | \" + title", &lookup),
            Some("Site | Home".to_string())
        );
        assert_eq!(
            static_eval("`Site | ${title}`", &lookup),
            Some("Site | Home".to_string())
        );
        assert_eq!(static_eval("missing", &lookup), None);
    }
}
