//! Template parser.
//!
//! Splits the `---` fenced frontmatter from the markup and tokenizes the markup
//! into a [`TemplateAst`] with 1-based line/column positions on every node.
//! Expressions are kept as code; markup found inside an expression (ternaries,
//! `&&`, `.map` callbacks) is parsed recursively at its absolute offset so
//! nested positions stay exact.

use tracing::debug;

use crate::ast::{
    is_component_tag, is_raw_text_tag, is_void_tag, substitute_loop_path, AttributeNode,
    AttributeValue, ComponentNode, ElementNode, ExpressionNode, Frontmatter, LoopContext,
    RootNode, SourcePosition, TemplateAst, TemplateNode, TextNode,
};
use crate::error::{LocatorError, Result};
use crate::expr::detect_map_callback;

// ═══════════════════════════════════════════════════════════════════════════════
// LINE INDEX
// ═══════════════════════════════════════════════════════════════════════════════

/// Byte offset → 1-based line/column lookup.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            source
                .bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self { line_starts }
    }

    pub fn line_of(&self, offset: usize) -> u32 {
        self.line_starts.partition_point(|&start| start <= offset) as u32
    }

    pub fn position(&self, source: &str, offset: usize) -> SourcePosition {
        let line = self.line_of(offset);
        let line_start = self.line_starts[(line - 1) as usize];
        let column = source
            .get(line_start..offset)
            .map(|s| s.chars().count())
            .unwrap_or(0) as u32
            + 1;
        SourcePosition {
            line,
            column,
            offset,
        }
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FRONTMATTER
// ═══════════════════════════════════════════════════════════════════════════════

/// Returns the frontmatter (if any) and the byte offset where markup begins.
pub fn split_frontmatter(source: &str, file: &str) -> Result<(Option<Frontmatter>, usize)> {
    let leading = source.len() - source.trim_start().len();
    if !source[leading..].starts_with("---") {
        return Ok((None, 0));
    }

    let lines = LineIndex::new(source);
    let open_line_end = source[leading..]
        .find('\n')
        .map(|i| leading + i + 1)
        .unwrap_or(source.len());

    let mut cursor = open_line_end;
    while cursor < source.len() {
        let line_end = source[cursor..]
            .find('\n')
            .map(|i| cursor + i + 1)
            .unwrap_or(source.len());
        if source[cursor..line_end].trim() == "---" {
            let content = source[open_line_end..cursor].to_string();
            let frontmatter = Frontmatter {
                content,
                start_line: lines.line_of(open_line_end),
                offset: open_line_end,
            };
            return Ok((Some(frontmatter), line_end));
        }
        cursor = line_end;
    }

    let pos = lines.position(source, leading);
    Err(LocatorError::parse(
        file,
        pos.line,
        pos.column,
        "unterminated frontmatter fence",
    ))
}

// ═══════════════════════════════════════════════════════════════════════════════
// BRACES
// ═══════════════════════════════════════════════════════════════════════════════

/// Find the end of a balanced brace expression, handling strings and template literals.
/// Returns the byte index after the closing brace, or None if unbalanced.
pub fn find_balanced_brace_end(source: &str, start_index: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut depth = 0;
    let mut i = start_index;
    let mut in_string: Option<u8> = None;
    let mut in_template_literal = false;
    let mut template_brace_depth = 0;

    while i < bytes.len() {
        let c = bytes[i];

        // Handle escape sequences
        if c == b'\\' && i + 1 < bytes.len() {
            i += 2;
            continue;
        }

        if in_string.is_some() {
            if Some(c) == in_string {
                in_string = None;
            }
            i += 1;
            continue;
        }

        if in_template_literal {
            if c == b'`' && template_brace_depth == 0 {
                in_template_literal = false;
            } else if c == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
                template_brace_depth += 1;
                i += 2;
                continue;
            } else if c == b'}' && template_brace_depth > 0 {
                template_brace_depth -= 1;
            }
            i += 1;
            continue;
        }

        if c == b'"' || c == b'\'' {
            // A quote only opens a string if it closes on the same line, so
            // apostrophes in embedded markup text (`<p>Don't</p>`) are skipped.
            let closes = source[i + 1..]
                .find(|ch: char| ch == c as char || ch == '\n')
                .map(|j| bytes[i + 1 + j] == c)
                .unwrap_or(false);
            if closes {
                in_string = Some(c);
            }
            i += 1;
            continue;
        }

        if c == b'`' {
            in_template_literal = true;
            i += 1;
            continue;
        }

        if c == b'{' {
            depth += 1;
        } else if c == b'}' {
            depth -= 1;
            if depth == 0 {
                return Some(i + 1);
            }
        }

        i += 1;
    }

    None
}

/// Byte span of the markup embedded in an expression: from the first tag
/// opener outside a string to the last `>`.
fn embedded_markup_span(code: &str) -> Option<(usize, usize)> {
    let bytes = code.as_bytes();
    let mut in_string: Option<u8> = None;
    let mut start = None;
    for i in 0..bytes.len() {
        let c = bytes[i];
        if let Some(q) = in_string {
            if c == q && (i == 0 || bytes[i - 1] != b'\\') {
                in_string = None;
            }
            continue;
        }
        match c {
            b'"' | b'\'' | b'`' => in_string = Some(c),
            b'<' => {
                let next = bytes.get(i + 1).copied();
                if matches!(next, Some(n) if n.is_ascii_alphabetic() || n == b'>') {
                    start = Some(i);
                    break;
                }
            }
            _ => {}
        }
    }
    let start = start?;
    let end = code.rfind('>')? + 1;
    (end > start).then_some((start, end))
}

// ═══════════════════════════════════════════════════════════════════════════════
// MARKUP
// ═══════════════════════════════════════════════════════════════════════════════

struct MarkupParser<'s> {
    src: &'s str,
    bytes: &'s [u8],
    pos: usize,
    lines: &'s LineIndex,
    file: &'s str,
    /// Enclosing `.map` loops, outermost first.
    loops: Vec<LoopContext>,
}

impl<'s> MarkupParser<'s> {
    fn position(&self, offset: usize) -> SourcePosition {
        self.lines.position(self.src, offset)
    }

    fn error(&self, offset: usize, message: &str) -> LocatorError {
        let pos = self.position(offset);
        LocatorError::parse(self.file, pos.line, pos.column, message)
    }

    fn at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(offset).copied()
    }

    fn starts_with(&self, s: &str) -> bool {
        self.src[self.pos..].starts_with(s)
    }

    fn skip_whitespace(&mut self, end: usize) {
        while self.pos < end && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn is_tag_start(&self, offset: usize) -> bool {
        self.at(offset) == Some(b'<')
            && matches!(
                self.at(offset + 1),
                Some(c) if c.is_ascii_alphabetic() || c == b'/' || c == b'!' || c == b'>'
            )
    }

    fn read_name(&mut self, end: usize) -> &'s str {
        let start = self.pos;
        while self.pos < end {
            let c = self.bytes[self.pos];
            if c.is_ascii_alphanumeric() || matches!(c, b'-' | b'.' | b':' | b'_' | b'@') {
                self.pos += 1;
            } else {
                break;
            }
        }
        &self.src[start..self.pos]
    }

    /// Parse nodes until `end`, or until a closing tag for one of `open`.
    fn parse_nodes(&mut self, end: usize, open: &mut Vec<String>) -> Result<Vec<TemplateNode>> {
        let mut nodes = Vec::new();

        while self.pos < end {
            if self.starts_with("<!--") {
                self.pos = self.src[self.pos + 4..end]
                    .find("-->")
                    .map(|i| self.pos + 4 + i + 3)
                    .unwrap_or(end);
            } else if self.starts_with("<!") {
                self.pos = self.src[self.pos..end]
                    .find('>')
                    .map(|i| self.pos + i + 1)
                    .unwrap_or(end);
            } else if self.starts_with("</") {
                let close_start = self.pos;
                self.pos += 2;
                let name = self.read_name(end).to_string();
                let gt = self.src[self.pos..end]
                    .find('>')
                    .ok_or_else(|| self.error(close_start, "unterminated closing tag"))?;
                if open.iter().rev().skip(1).any(|t| t.eq_ignore_ascii_case(&name))
                    && !open.last().is_some_and(|t| t.eq_ignore_ascii_case(&name))
                {
                    // Closes an ancestor: leave it for the ancestor to consume.
                    self.pos = close_start;
                    return Ok(nodes);
                }
                self.pos += gt + 1;
                if open.last().is_some_and(|t| t.eq_ignore_ascii_case(&name)) {
                    return Ok(nodes);
                }
                debug!(file = self.file, tag = %name, "ignoring stray closing tag");
            } else if self.is_tag_start(self.pos) {
                nodes.push(self.parse_tag(end, open)?);
            } else if self.at(self.pos) == Some(b'{') {
                match find_balanced_brace_end(&self.src[..end], self.pos) {
                    Some(close) => nodes.push(self.parse_expression(close)?),
                    None => nodes.push(self.parse_text(end, true)),
                }
            } else {
                nodes.push(self.parse_text(end, false));
            }
        }

        Ok(nodes)
    }

    fn parse_text(&mut self, end: usize, consume_brace: bool) -> TemplateNode {
        let start = self.pos;
        if consume_brace {
            self.pos += 1;
        }
        while self.pos < end {
            if self.at(self.pos) == Some(b'{') || self.is_tag_start(self.pos) {
                break;
            }
            self.pos += 1;
        }
        let value = &self.src[start..self.pos];
        let leading = value.len() - value.trim_start().len();
        TemplateNode::Text(TextNode {
            value: value.to_string(),
            position: self.position(start),
            content_position: self.position(start + leading.min(value.len())),
        })
    }

    fn parse_expression(&mut self, close: usize) -> Result<TemplateNode> {
        let start = self.pos;
        let code_start = start + 1;
        let code = &self.src[code_start..close - 1];
        self.pos = close;

        let loop_context = detect_map_callback(code).map(|callback| {
            let outer: Vec<&LoopContext> = self.loops.iter().collect();
            LoopContext {
                resolved_source: substitute_loop_path(&outer, &callback.source),
                source: callback.source,
                bindings: callback.bindings,
                index_var: callback.index_var,
            }
        });

        let mut children = Vec::new();
        if let Some((rel_start, rel_end)) = embedded_markup_span(code) {
            let saved = self.pos;
            self.pos = code_start + rel_start;
            if let Some(ctx) = &loop_context {
                self.loops.push(ctx.clone());
            }
            let parsed = self.parse_nodes(code_start + rel_end, &mut Vec::new());
            if loop_context.is_some() {
                self.loops.pop();
            }
            self.pos = saved;
            match parsed {
                Ok(nodes) => children = nodes,
                Err(e) => {
                    debug!(file = self.file, error = %e, "markup inside expression not parsed")
                }
            }
        }

        Ok(TemplateNode::Expression(ExpressionNode {
            code: code.to_string(),
            position: self.position(start),
            children,
            loop_context,
        }))
    }

    fn parse_tag(&mut self, end: usize, open: &mut Vec<String>) -> Result<TemplateNode> {
        let start = self.pos;
        self.pos += 1;
        let name = self.read_name(end).to_string();
        let tag_name_end = self.position(self.pos);
        let (attributes, self_closing) = self.parse_attributes(end, start)?;

        let mut children = Vec::new();
        if is_raw_text_tag(&name) && !self_closing {
            let close_needle = format!("</{}", name.to_ascii_lowercase());
            let rest = &self.src[self.pos..end];
            let rel = rest.to_ascii_lowercase().find(&close_needle);
            let body_end = rel.map(|r| self.pos + r).unwrap_or(end);
            if body_end > self.pos {
                let value = &self.src[self.pos..body_end];
                children.push(TemplateNode::Text(TextNode {
                    value: value.to_string(),
                    position: self.position(self.pos),
                    content_position: self.position(self.pos),
                }));
            }
            self.pos = body_end;
            if rel.is_some() {
                self.pos = self.src[self.pos..end]
                    .find('>')
                    .map(|i| self.pos + i + 1)
                    .unwrap_or(end);
            }
        } else if !self_closing && !is_void_tag(&name) {
            open.push(name.clone());
            children = self.parse_nodes(end, open)?;
            open.pop();
        }

        let position = self.position(start);
        if is_component_tag(&name) {
            Ok(TemplateNode::Component(ComponentNode {
                name,
                attributes,
                children,
                position,
                tag_name_end,
                self_closing,
            }))
        } else {
            Ok(TemplateNode::Element(ElementNode {
                tag: name,
                attributes,
                children,
                position,
                tag_name_end,
                self_closing,
            }))
        }
    }

    fn parse_attributes(
        &mut self,
        end: usize,
        tag_start: usize,
    ) -> Result<(Vec<AttributeNode>, bool)> {
        let mut attributes = Vec::new();
        loop {
            self.skip_whitespace(end);
            if self.pos >= end {
                return Err(self.error(tag_start, "unterminated tag"));
            }
            if self.starts_with("/>") {
                self.pos += 2;
                return Ok((attributes, true));
            }
            if self.at(self.pos) == Some(b'>') {
                self.pos += 1;
                return Ok((attributes, false));
            }

            let attr_start = self.pos;
            if self.at(self.pos) == Some(b'{') {
                let close = find_balanced_brace_end(&self.src[..end], self.pos)
                    .ok_or_else(|| self.error(attr_start, "unbalanced attribute expression"))?;
                let inner = self.src[self.pos + 1..close - 1].trim();
                self.pos = close;
                let attribute = match inner.strip_prefix("...") {
                    Some(spread) => AttributeNode {
                        name: String::new(),
                        value: AttributeValue::Spread(spread.trim().to_string()),
                        position: self.position(attr_start),
                    },
                    None => AttributeNode {
                        name: inner.to_string(),
                        value: AttributeValue::Expression(inner.to_string()),
                        position: self.position(attr_start),
                    },
                };
                attributes.push(attribute);
                continue;
            }

            let name_start = self.pos;
            while self.pos < end {
                let c = self.bytes[self.pos];
                let self_closing = c == b'/' && self.at(self.pos + 1) == Some(b'>');
                if c.is_ascii_whitespace() || c == b'=' || c == b'>' || self_closing {
                    break;
                }
                self.pos += 1;
            }
            if self.pos == name_start {
                // Unexpected character; skip it rather than loop forever.
                self.pos += 1;
                continue;
            }
            let name = self.src[name_start..self.pos].to_string();

            self.skip_whitespace(end);
            let value = if self.at(self.pos) == Some(b'=') {
                self.pos += 1;
                self.skip_whitespace(end);
                self.parse_attribute_value(end, attr_start)?
            } else {
                AttributeValue::Empty
            };
            attributes.push(AttributeNode {
                name,
                value,
                position: self.position(attr_start),
            });
        }
    }

    fn parse_attribute_value(&mut self, end: usize, attr_start: usize) -> Result<AttributeValue> {
        match self.at(self.pos) {
            Some(q @ (b'"' | b'\'')) => {
                let close = self.src[self.pos + 1..end]
                    .find(q as char)
                    .ok_or_else(|| self.error(attr_start, "unterminated attribute value"))?;
                let value = self.src[self.pos + 1..self.pos + 1 + close].to_string();
                self.pos += close + 2;
                Ok(AttributeValue::Static(value))
            }
            Some(b'{') => {
                let close = find_balanced_brace_end(&self.src[..end], self.pos)
                    .ok_or_else(|| self.error(attr_start, "unbalanced attribute expression"))?;
                let code = self.src[self.pos + 1..close - 1].trim().to_string();
                self.pos = close;
                Ok(AttributeValue::Expression(code))
            }
            Some(b'`') => {
                let close = self.src[self.pos + 1..end]
                    .find('`')
                    .ok_or_else(|| self.error(attr_start, "unterminated template attribute"))?;
                let code = self.src[self.pos..self.pos + close + 2].to_string();
                self.pos += close + 2;
                Ok(AttributeValue::Expression(code))
            }
            _ => {
                let start = self.pos;
                while self.pos < end {
                    let c = self.bytes[self.pos];
                    if c.is_ascii_whitespace() || c == b'>' {
                        break;
                    }
                    self.pos += 1;
                }
                Ok(AttributeValue::Static(self.src[start..self.pos].to_string()))
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENTRY POINT
// ═══════════════════════════════════════════════════════════════════════════════

/// Parse a template source into an AST. `file` is only used in error messages.
pub fn parse_template(source: &str, file: &str) -> Result<TemplateAst> {
    let (frontmatter, markup_start) = split_frontmatter(source, file)?;
    let lines = LineIndex::new(source);
    let mut parser = MarkupParser {
        src: source,
        bytes: source.as_bytes(),
        pos: markup_start,
        lines: &lines,
        file,
        loops: Vec::new(),
    };
    let children = parser.parse_nodes(source.len(), &mut Vec::new())?;

    Ok(TemplateAst {
        frontmatter,
        root: RootNode {
            children,
            position: lines.position(source, markup_start.min(source.len())),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn only_element(nodes: &[TemplateNode]) -> &ElementNode {
        nodes
            .iter()
            .find_map(|n| match n {
                TemplateNode::Element(e) => Some(e),
                _ => None,
            })
            .expect("element")
    }

    #[test]
    fn test_find_balanced_brace() {
        assert_eq!(find_balanced_brace_end("{hello}", 0), Some(7));
        assert_eq!(find_balanced_brace_end("{a + b}", 0), Some(7));
        assert_eq!(find_balanced_brace_end("{obj.map(x => x)}", 0), Some(17));
        assert_eq!(
            find_balanced_brace_end("{'string with { brace'}", 0),
            Some(23)
        );
        assert_eq!(find_balanced_brace_end("{unclosed", 0), None);
    }

    #[test]
    fn test_frontmatter_split() {
        let source = "---\nconst a = 'x';\n---\n<h1>Hi</h1>\n";
        let (fm, start) = split_frontmatter(source, "a.astro").unwrap();
        let fm = fm.unwrap();
        assert_eq!(fm.content, "const a = 'x';\n");
        assert_eq!(fm.start_line, 2);
        assert_eq!(&source[start..], "<h1>Hi</h1>\n");
    }

    #[test]
    fn test_unterminated_frontmatter_is_error() {
        let result = parse_template("---\nconst a = 1;\n<h1>x</h1>", "bad.astro");
        assert!(matches!(result, Err(LocatorError::Parse { .. })));
    }

    #[test]
    fn test_positions() {
        let source = "---\n---\n<div>\n  <h1 class=\"t\">\n    Hello World\n  </h1>\n</div>";
        let ast = parse_template(source, "p.astro").unwrap();
        let div = only_element(&ast.root.children);
        assert_eq!(div.position.line, 3);
        let h1 = only_element(&div.children);
        assert_eq!(h1.position.line, 4);
        assert_eq!(h1.position.column, 3);
        assert_eq!(h1.attribute("class").unwrap().static_value(), Some("t"));
        match &h1.children[0] {
            TemplateNode::Text(t) => {
                assert_eq!(t.content_position.line, 5);
                assert_eq!(t.content_position.column, 5);
            }
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn test_attribute_forms() {
        let ast = parse_template(
            r#"<Card title="A" count={3} {...rest} {href} disabled data-x=plain />"#,
            "c.astro",
        )
        .unwrap();
        let TemplateNode::Component(card) = &ast.root.children[0] else {
            panic!("expected component");
        };
        assert!(card.self_closing);
        assert_eq!(card.attribute("title").unwrap().static_value(), Some("A"));
        assert_eq!(card.attribute("count").unwrap().expression(), Some("3"));
        assert_eq!(card.spreads().collect::<Vec<_>>(), vec!["rest"]);
        assert_eq!(card.attribute("href").unwrap().expression(), Some("href"));
        assert_eq!(card.attribute("disabled").unwrap().value, AttributeValue::Empty);
        assert_eq!(card.attribute("data-x").unwrap().static_value(), Some("plain"));
    }

    #[test]
    fn test_void_and_raw_text() {
        let ast = parse_template(
            "<p>a<br>b</p><script>if (a < b) { x(); }</script><img src=\"/x.png\">",
            "v.astro",
        )
        .unwrap();
        assert_eq!(ast.root.children.len(), 3);
        let TemplateNode::Element(script) = &ast.root.children[1] else {
            panic!("expected script");
        };
        assert_eq!(script.children.len(), 1);
    }

    #[test]
    fn test_map_expression_children_carry_loop_context() {
        let source = "<ul>\n{items.map((item) => (\n  <li>{item.label}</li>\n))}\n</ul>";
        let ast = parse_template(source, "l.astro").unwrap();
        let ul = only_element(&ast.root.children);
        let expr = ul
            .children
            .iter()
            .find_map(|n| match n {
                TemplateNode::Expression(e) => Some(e),
                _ => None,
            })
            .unwrap();
        let ctx = expr.loop_context.as_ref().unwrap();
        assert_eq!(ctx.source, "items");
        let li = only_element(&expr.children);
        assert_eq!(li.tag, "li");
        assert_eq!(li.position.line, 3);
    }

    #[test]
    fn test_nested_loop_resolves_through_outer() {
        let source =
            "{groups.map((g) => <div>{g.links.map((l) => <a>{l.text}</a>)}</div>)}";
        let ast = parse_template(source, "n.astro").unwrap();
        let TemplateNode::Expression(outer) = &ast.root.children[0] else {
            panic!("expected expression");
        };
        let div = only_element(&outer.children);
        let TemplateNode::Expression(inner) = &div.children[0] else {
            panic!("expected inner expression");
        };
        assert_eq!(
            inner.loop_context.as_ref().unwrap().resolved_source,
            "groups[*].links"
        );
    }

    #[test]
    fn test_lenient_close_tags() {
        let ast = parse_template("<div><p>one<p>two</div><span>x</span>", "x.astro").unwrap();
        assert_eq!(ast.root.children.len(), 2);
    }

    #[test]
    fn test_unterminated_tag_is_error() {
        assert!(parse_template("<div class=\"x\"", "t.astro").is_err());
    }
}
