//! Provenance stamping.
//!
//! Inserts the source-file and source-location attributes into the opening
//! tag of every element of a template, right after the tag name, so the
//! rendered output can be traced back to its template. The content marker
//! reads these attributes to find component roots.

use tracing::warn;

use crate::ast::{ElementNode, SourcePosition, TemplateAst};
use crate::cache::ParsedFile;
use crate::config::MarkerOptions;
use crate::visitor::{walk_element, TemplateVisitor};

/// Elements that never reach the rendered output as-is.
const UNSTAMPED_TAGS: &[&str] = &["slot", "script", "style", "fragment"];

struct Insertion {
    at: SourcePosition,
    element: SourcePosition,
}

#[derive(Default)]
struct InsertionCollector {
    insertions: Vec<Insertion>,
}

impl<'a> TemplateVisitor<'a> for InsertionCollector {
    fn visit_element(&mut self, element: &'a ElementNode) {
        let tag = element.tag.to_ascii_lowercase();
        if !UNSTAMPED_TAGS.contains(&tag.as_str()) {
            self.insertions.push(Insertion {
                at: element.tag_name_end,
                element: element.position,
            });
        }
        walk_element(self, element);
    }
}

/// Byte offset of a 1-based (line, column) position, or None when the
/// column lies outside the line.
fn byte_offset(line_starts: &[usize], source: &str, line: u32, column: u32) -> Option<usize> {
    let start = *line_starts.get(line.checked_sub(1)? as usize)?;
    let end = line_starts
        .get(line as usize)
        .copied()
        .unwrap_or(source.len());
    let text = source[start..end].trim_end_matches(|c: char| c == '\n' || c == '\r');
    let index = column.checked_sub(1)? as usize;

    if index == text.chars().count() {
        return Some(start + text.len());
    }
    text.char_indices().nth(index).map(|(i, _)| start + i)
}

fn escape_attribute(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

/// Stamp every element of `ast` (parsed from `source`) with `file` and its
/// `line:column`. Insertion points that fall outside their line are
/// skipped.
pub fn stamp_provenance(
    source: &str,
    ast: &TemplateAst,
    file: &str,
    options: &MarkerOptions,
) -> String {
    let mut collector = InsertionCollector::default();
    collector.visit_ast(ast);

    let mut line_starts = vec![0];
    line_starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));

    let file_value = escape_attribute(file);
    let mut edits: Vec<(usize, String)> = Vec::new();
    for insertion in collector.insertions {
        let Some(offset) = byte_offset(&line_starts, source, insertion.at.line, insertion.at.column)
        else {
            warn!(
                file,
                line = insertion.at.line,
                column = insertion.at.column,
                "provenance insertion point out of range, skipping"
            );
            continue;
        };
        edits.push((
            offset,
            format!(
                " {}=\"{}\" {}=\"{}:{}\"",
                options.source_file_attribute,
                file_value,
                options.source_loc_attribute,
                insertion.element.line,
                insertion.element.column
            ),
        ));
    }

    // Apply back to front so earlier offsets stay valid.
    edits.sort_by(|a, b| b.0.cmp(&a.0));
    let mut out = source.to_string();
    for (offset, text) in edits {
        out.insert_str(offset, &text);
    }
    out
}

/// Stamp a parsed template with its project-relative path.
pub fn stamp_parsed(file: &ParsedFile, options: &MarkerOptions) -> String {
    stamp_provenance(&file.source, &file.ast, &file.relative_path, options)
}
