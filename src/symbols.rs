//! Symbol extraction from a template's frontmatter.
//!
//! Produces the file-local symbol table the matcher and resolver work from:
//! literal variable definitions (flattened through object and array literals),
//! prop aliases from destructuring the props object, member-path references
//! (`const items = data.nav`), and imports. Exported definitions of imported
//! script and JSON modules are extracted here as well.

use std::collections::HashMap;

use lazy_static::lazy_static;
use oxc_allocator::Allocator;
use oxc_ast::ast::{
    BindingPattern, Declaration, Expression, ImportDeclarationSpecifier, ObjectPropertyKind,
    Statement, VariableDeclaration,
};
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::expr::{format_number, member_path, path_matches, static_eval};

// ═══════════════════════════════════════════════════════════════════════════════
// SYMBOL TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDefinition {
    /// Last path segment: `title`, or `[0]` for array elements.
    pub name: String,
    pub value: String,
    pub line: u32,
    /// Dotted/indexed prefix for values nested in object or array literals.
    pub parent_path: Option<String>,
}

impl VariableDefinition {
    /// Full path, e.g. `nav.links[0].text`.
    pub fn path(&self) -> String {
        join_path(self.parent_path.as_deref(), &self.name)
    }
}

fn join_path(parent: Option<&str>, name: &str) -> String {
    match parent {
        None => name.to_string(),
        Some(p) if name.starts_with('[') => format!("{}{}", p, name),
        Some(p) => format!("{}.{}", p, name),
    }
}

/// The prop a local name was destructured from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "name")]
pub enum PropName {
    Named(String),
    /// `...rest`, or the whole props object bound to a local.
    Rest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportInfo {
    pub local_name: String,
    /// `default`, `*`, or the exported name.
    pub imported_name: String,
    pub source: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSymbols {
    pub definitions: Vec<VariableDefinition>,
    /// local name → prop name
    pub prop_aliases: HashMap<String, PropName>,
    /// local name → member path it was bound to (`const items = data.nav`).
    pub references: HashMap<String, String>,
    pub imports: Vec<ImportInfo>,
}

impl FileSymbols {
    pub fn definition(&self, path: &str) -> Option<&VariableDefinition> {
        self.definitions.iter().find(|d| d.path() == path)
    }

    /// Definitions whose path matches a (possibly wildcard) pattern.
    pub fn definitions_matching<'s>(
        &'s self,
        pattern: &'s str,
    ) -> impl Iterator<Item = &'s VariableDefinition> + 's {
        self.definitions
            .iter()
            .filter(move |d| path_matches(pattern, &d.path()))
    }

    pub fn lookup_value(&self, path: &str) -> Option<String> {
        self.definition(path).map(|d| d.value.clone())
    }

    pub fn import_for(&self, local: &str) -> Option<&ImportInfo> {
        self.imports.iter().find(|i| i.local_name == local)
    }

    pub fn prop_for(&self, local: &str) -> Option<&PropName> {
        self.prop_aliases.get(local)
    }

    /// Local names bound to a given prop, in no particular order.
    pub fn locals_for_prop<'s>(&'s self, prop: &'s str) -> impl Iterator<Item = &'s str> + 's {
        self.prop_aliases.iter().filter_map(move |(local, name)| match name {
            PropName::Named(n) if n == prop => Some(local.as_str()),
            _ => None,
        })
    }
}

fn source_type() -> SourceType {
    SourceType::default()
        .with_module(true)
        .with_typescript(true)
        .with_jsx(true)
}

/// 1-based line of a byte offset into `content`, where the content's first
/// line is `start_line`.
fn line_at(content: &str, start_line: u32, offset: u32) -> u32 {
    let end = (offset as usize).min(content.len());
    start_line + content.as_bytes()[..end].iter().filter(|b| **b == b'\n').count() as u32
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXTRACTION
// ═══════════════════════════════════════════════════════════════════════════════

struct SymbolCollector<'c> {
    content: &'c str,
    start_line: u32,
    props_object: &'c str,
    symbols: FileSymbols,
}

impl<'c> SymbolCollector<'c> {
    fn line(&self, offset: u32) -> u32 {
        line_at(self.content, self.start_line, offset)
    }

    fn push(&mut self, name: &str, parent: Option<&str>, value: String, line: u32) {
        self.symbols.definitions.push(VariableDefinition {
            name: name.to_string(),
            value,
            line,
            parent_path: parent.map(str::to_string),
        });
    }

    fn is_props_object(&self, expr: &Expression) -> bool {
        member_path(expr).as_deref() == Some(self.props_object)
    }

    fn collect_statement(&mut self, stmt: &Statement) {
        match stmt {
            Statement::VariableDeclaration(var_decl) => self.collect_declaration(var_decl),
            Statement::ExportNamedDeclaration(export) => {
                if let Some(Declaration::VariableDeclaration(var_decl)) = &export.declaration {
                    self.collect_declaration(var_decl);
                }
            }
            Statement::ExportDefaultDeclaration(export) => {
                if let Some(expr) = export.declaration.as_expression() {
                    let line = self.line(export.span.start);
                    self.record_value("default", None, expr, line);
                }
            }
            Statement::ImportDeclaration(import) => {
                let source = import.source.value.to_string();
                let Some(specifiers) = &import.specifiers else {
                    return;
                };
                for specifier in specifiers {
                    let (local_name, imported_name) = match specifier {
                        ImportDeclarationSpecifier::ImportSpecifier(s) => {
                            (s.local.name.to_string(), s.imported.name().to_string())
                        }
                        ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => {
                            (s.local.name.to_string(), "default".to_string())
                        }
                        ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
                            (s.local.name.to_string(), "*".to_string())
                        }
                    };
                    self.symbols.imports.push(ImportInfo {
                        local_name,
                        imported_name,
                        source: source.clone(),
                    });
                }
            }
            _ => {}
        }
    }

    fn collect_declaration(&mut self, var_decl: &VariableDeclaration) {
        for decl in &var_decl.declarations {
            let Some(init) = &decl.init else {
                continue;
            };
            let line = self.line(decl.span.start);
            match &decl.id {
                BindingPattern::BindingIdentifier(id) => {
                    let name = id.name.to_string();
                    if self.is_props_object(init) {
                        self.symbols.prop_aliases.insert(name, PropName::Rest);
                    } else if let Some(path) = member_path(init).filter(|p| p != &name) {
                        self.symbols.references.insert(name, path);
                    } else {
                        self.record_value(&name, None, init, line);
                    }
                }
                BindingPattern::ObjectPattern(obj) if self.is_props_object(init) => {
                    for prop in &obj.properties {
                        let Some(key) = prop.key.static_name() else {
                            continue;
                        };
                        match &prop.value {
                            BindingPattern::BindingIdentifier(local) => {
                                self.symbols.prop_aliases.insert(
                                    local.name.to_string(),
                                    PropName::Named(key.to_string()),
                                );
                            }
                            BindingPattern::AssignmentPattern(assign) => {
                                if let BindingPattern::BindingIdentifier(local) = &assign.left {
                                    let local = local.name.to_string();
                                    self.symbols
                                        .prop_aliases
                                        .insert(local.clone(), PropName::Named(key.to_string()));
                                    let default_line = self.line(assign.right.span().start);
                                    self.record_value(&local, None, &assign.right, default_line);
                                }
                            }
                            _ => {}
                        }
                    }
                    if let Some(rest) = &obj.rest {
                        if let BindingPattern::BindingIdentifier(local) = &rest.argument {
                            self.symbols
                                .prop_aliases
                                .insert(local.name.to_string(), PropName::Rest);
                        }
                    }
                }
                BindingPattern::ObjectPattern(obj) => {
                    // `const { a, b: c } = data.section` binds references into `data.section`.
                    let Some(base) = member_path(init) else {
                        continue;
                    };
                    for prop in &obj.properties {
                        let (Some(key), BindingPattern::BindingIdentifier(local)) =
                            (prop.key.static_name(), &prop.value)
                        else {
                            continue;
                        };
                        self.symbols
                            .references
                            .insert(local.name.to_string(), format!("{}.{}", base, key));
                    }
                }
                _ => {}
            }
        }
    }

    fn record_value(&mut self, name: &str, parent: Option<&str>, expr: &Expression, line: u32) {
        match expr {
            Expression::StringLiteral(s) => self.push(name, parent, s.value.to_string(), line),
            Expression::NumericLiteral(n) => self.push(name, parent, format_number(n.value), line),
            Expression::BooleanLiteral(b) => self.push(name, parent, b.value.to_string(), line),
            Expression::TemplateLiteral(t) if t.expressions.is_empty() => {
                if let Some(quasi) = t.quasis.first() {
                    let value = quasi
                        .value
                        .cooked
                        .as_ref()
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| quasi.value.raw.to_string());
                    self.push(name, parent, value, line);
                }
            }
            Expression::TemplateLiteral(_) | Expression::BinaryExpression(_) => {
                let span = expr.span();
                let content = self.content;
                let text = &content[span.start as usize..span.end as usize];
                let symbols = &self.symbols;
                let value = static_eval(text, &|p: &str| symbols.lookup_value(p));
                if let Some(value) = value {
                    self.push(name, parent, value, line);
                }
            }
            Expression::ObjectExpression(obj) => {
                let path = join_path(parent, name);
                for property in &obj.properties {
                    if let ObjectPropertyKind::ObjectProperty(p) = property {
                        if let Some(key) = p.key.static_name() {
                            let prop_line = self.line(p.span.start);
                            self.record_value(&key, Some(&path), &p.value, prop_line);
                        }
                    }
                }
            }
            Expression::ArrayExpression(arr) => {
                let path = join_path(parent, name);
                for (i, element) in arr.elements.iter().enumerate() {
                    if let Some(e) = element.as_expression() {
                        let elem_line = self.line(e.span().start);
                        self.record_value(&format!("[{}]", i), Some(&path), e, elem_line);
                    }
                }
            }
            Expression::TSAsExpression(e) => self.record_value(name, parent, &e.expression, line),
            Expression::TSSatisfiesExpression(e) => {
                self.record_value(name, parent, &e.expression, line)
            }
            Expression::ParenthesizedExpression(e) => {
                self.record_value(name, parent, &e.expression, line)
            }
            _ => {}
        }
    }
}

/// Extract the symbol table of a frontmatter block. A block that fails to
/// parse yields no symbols.
pub fn extract_symbols(content: &str, start_line: u32, props_object: &str) -> FileSymbols {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, content, source_type()).parse();

    if !ret.errors.is_empty() {
        debug!(errors = ret.errors.len(), "frontmatter did not parse, no symbols extracted");
        return FileSymbols::default();
    }

    let mut collector = SymbolCollector {
        content,
        start_line,
        props_object,
        symbols: FileSymbols::default(),
    };
    for stmt in &ret.program.body {
        collector.collect_statement(stmt);
    }
    collector.symbols
}

// ═══════════════════════════════════════════════════════════════════════════════
// MODULE EXPORTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Definitions visible to importers of a script module: exported `const`s and
/// a default-exported literal (under the name `default`).
pub fn extract_module_exports(source: &str) -> Vec<VariableDefinition> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, source_type()).parse();
    if !ret.errors.is_empty() {
        debug!("module did not parse, no exports extracted");
        return Vec::new();
    }

    let mut collector = SymbolCollector {
        content: source,
        start_line: 1,
        props_object: "",
        symbols: FileSymbols::default(),
    };
    for stmt in &ret.program.body {
        match stmt {
            Statement::ExportNamedDeclaration(_) | Statement::ExportDefaultDeclaration(_) => {
                collector.collect_statement(stmt)
            }
            _ => {}
        }
    }
    collector.symbols.definitions
}

lazy_static! {
    static ref JSON_KEY_RE: Regex = Regex::new(r#""((?:[^"\\]|\\.)*)"\s*:"#).unwrap();
}

/// Flatten a JSON document into definitions rooted at `default`. Lines come
/// from a text scan for `"key": value`, falling back to the value alone.
pub fn extract_json_definitions(source: &str) -> Result<Vec<VariableDefinition>> {
    let value: serde_json::Value = serde_json::from_str(source)?;
    let mut out = Vec::new();
    flatten_json(source, "default", None, &value, &mut out);
    Ok(out)
}

fn flatten_json(
    source: &str,
    name: &str,
    parent: Option<&str>,
    value: &serde_json::Value,
    out: &mut Vec<VariableDefinition>,
) {
    let scalar = match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        serde_json::Value::Null => None,
        serde_json::Value::Object(map) => {
            let path = join_path(parent, name);
            for (key, child) in map {
                flatten_json(source, key, Some(&path), child, out);
            }
            None
        }
        serde_json::Value::Array(items) => {
            let path = join_path(parent, name);
            for (i, child) in items.iter().enumerate() {
                flatten_json(source, &format!("[{}]", i), Some(&path), child, out);
            }
            None
        }
    };

    if let Some(text) = scalar {
        let encoded = serde_json::to_string(value).unwrap_or_default();
        out.push(VariableDefinition {
            name: name.to_string(),
            line: json_line(source, name, &encoded),
            value: text,
            parent_path: parent.map(str::to_string),
        });
    }
}

fn json_line(source: &str, key: &str, encoded: &str) -> u32 {
    let keyed = JSON_KEY_RE.captures_iter(source).find_map(|caps| {
        let whole = caps.get(0)?;
        (&caps[1] == key && source[whole.end()..].trim_start().starts_with(encoded))
            .then_some(whole.start())
    });
    let offset = keyed.or_else(|| source.find(encoded)).unwrap_or(0);
    line_at(source, 1, offset as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols(code: &str) -> FileSymbols {
        extract_symbols(code, 2, "Astro.props")
    }

    #[test]
    fn test_string_literal_definition() {
        let s = symbols("const label = 'Click Me';\nlet other = `tpl`;");
        let label = s.definition("label").unwrap();
        assert_eq!(label.value, "Click Me");
        assert_eq!(label.line, 2);
        assert_eq!(s.definition("other").unwrap().line, 3);
    }

    #[test]
    fn test_nested_object_and_array() {
        let s = symbols(
            "const nav = {\n  title: 'Menu',\n  links: [\n    { text: 'Home', href: '/' },\n    { text: 'About' },\n  ],\n};",
        );
        assert_eq!(s.definition("nav.title").unwrap().value, "Menu");
        assert_eq!(s.definition("nav.title").unwrap().line, 3);
        let about = s.definition("nav.links[1].text").unwrap();
        assert_eq!(about.value, "About");
        assert_eq!(about.line, 6);
        assert_eq!(about.parent_path.as_deref(), Some("nav.links[1]"));
        assert_eq!(s.definitions_matching("nav.links[*].text").count(), 2);
    }

    #[test]
    fn test_prop_destructuring() {
        let s = symbols(
            "const { title, items: navItems, subtitle = 'Welcome', ...rest } = Astro.props;",
        );
        assert_eq!(s.prop_for("title"), Some(&PropName::Named("title".into())));
        assert_eq!(s.prop_for("navItems"), Some(&PropName::Named("items".into())));
        assert_eq!(s.prop_for("subtitle"), Some(&PropName::Named("subtitle".into())));
        assert_eq!(s.definition("subtitle").unwrap().value, "Welcome");
        assert_eq!(s.prop_for("rest"), Some(&PropName::Rest));
    }

    #[test]
    fn test_props_object_with_type_assertion() {
        let s = symbols("const { title } = Astro.props as Props;\nconst props = Astro.props;");
        assert_eq!(s.prop_for("title"), Some(&PropName::Named("title".into())));
        assert_eq!(s.prop_for("props"), Some(&PropName::Rest));
    }

    #[test]
    fn test_imports() {
        let s = symbols(
            "import Layout from '../layouts/Layout.astro';\nimport { nav as menu, site } from './data';\nimport * as all from './all.json';",
        );
        assert_eq!(s.imports.len(), 4);
        let menu = s.import_for("menu").unwrap();
        assert_eq!(menu.imported_name, "nav");
        assert_eq!(menu.source, "./data");
        assert_eq!(s.import_for("Layout").unwrap().imported_name, "default");
        assert_eq!(s.import_for("all").unwrap().imported_name, "*");
    }

    #[test]
    fn test_references_and_template_values() {
        let s = symbols("const site = 'Acme';\nconst title = `${site} | Home`;\nconst items = data.nav;");
        assert_eq!(s.definition("title").unwrap().value, "Acme | Home");
        assert_eq!(s.references.get("items").map(String::as_str), Some("data.nav"));
    }

    #[test]
    fn test_parse_failure_yields_no_symbols() {
        let s = symbols("const = ;");
        assert!(s.definitions.is_empty());
        assert!(s.imports.is_empty());
    }

    #[test]
    fn test_module_exports() {
        let defs = extract_module_exports(
            "const hidden = 'x';\nexport const hero = { heading: 'Big News' };\nexport default { tagline: 'Fast' };",
        );
        assert!(defs.iter().all(|d| d.path() != "hidden"));
        let heading = defs.iter().find(|d| d.path() == "hero.heading").unwrap();
        assert_eq!(heading.line, 2);
        assert!(defs.iter().any(|d| d.path() == "default.tagline"));
    }

    #[test]
    fn test_json_definitions() {
        let defs = extract_json_definitions(
            "{\n  \"title\": \"Docs\",\n  \"links\": [\n    \"Intro\",\n    \"Guide\"\n  ]\n}",
        )
        .unwrap();
        let title = defs.iter().find(|d| d.path() == "default.title").unwrap();
        assert_eq!(title.line, 2);
        let guide = defs.iter().find(|d| d.path() == "default.links[1]").unwrap();
        assert_eq!(guide.value, "Guide");
        assert_eq!(guide.line, 5);
    }
}
