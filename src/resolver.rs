//! Cross-file resolver.
//!
//! When a value reaches an element through a prop or an import, the matcher
//! can only name the prop/import. This module finds where the value really
//! comes from: component call sites in pages, components and layouts (plain,
//! expression and spread attributes), recursing through prop drilling up to
//! the configured depth, and exported definitions of relatively imported
//! modules.
//!
//! Two flavors exist. The symbolic one follows a path and compares the final
//! definition with the search text. The value-keyed one starts from a value
//! already known at render time (a loop-bound attribute) and looks for
//! `(property, value)` pairs below the call-site expression, falling back to
//! the value alone.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::ast::{AttributeValue, ComponentNode, ExpressionNode, LoopContext, TemplateAst};
use crate::cache::{BuildContext, ModuleExports, ParsedFile};
use crate::expr::{
    base_identifier, expression_path, last_key, path_matches, path_rest, path_starts_with,
    static_eval,
};
use crate::matcher::{prop_reference, resolve_local_path};
use crate::model::{SourceLocation, SourceType};
use crate::normalize::normalize_text;
use crate::symbols::VariableDefinition;
use crate::visitor::{walk_component, walk_expression, TemplateVisitor};

const MODULE_EXTENSIONS: &[&str] = &["ts", "js", "mjs", "json"];

// ═══════════════════════════════════════════════════════════════════════════════
// PATH HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Lexically normalize `a/b/../c` to `a/c`.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolve a relative import specifier against the importing file, probing
/// extensions and `index` files. Bare specifiers are never followed.
pub fn resolve_module_path(
    importer: &Path,
    source: &str,
    template_extension: &str,
) -> Option<PathBuf> {
    if !source.starts_with("./") && !source.starts_with("../") {
        return None;
    }
    let base = clean_path(&importer.parent()?.join(source));
    if base.is_file() {
        return Some(base);
    }

    let extensions = MODULE_EXTENSIONS
        .iter()
        .copied()
        .chain(std::iter::once(template_extension));
    for ext in extensions.clone() {
        let mut candidate = base.clone().into_os_string();
        candidate.push(".");
        candidate.push(ext);
        let candidate = PathBuf::from(candidate);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    extensions
        .map(|ext| base.join(format!("index.{}", ext)))
        .find(|candidate| candidate.is_file())
}

/// Path inside a module's definitions for an imported binding.
fn module_path(module: &ModuleExports, imported_name: &str, member_path: &str) -> String {
    let is_json = module
        .path
        .extension()
        .is_some_and(|e| e == "json");
    match imported_name {
        "default" => format!("default{}", member_path),
        "*" => {
            let inner = member_path.strip_prefix('.').unwrap_or(member_path);
            if is_json && !inner.starts_with("default") {
                format!("default.{}", inner)
            } else {
                inner.to_string()
            }
        }
        name if is_json => format!("default.{}{}", name, member_path),
        name => format!("{}{}", name, member_path),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CALL SITES
// ═══════════════════════════════════════════════════════════════════════════════

/// How a call site feeds a prop.
#[derive(Debug, Clone, PartialEq)]
pub enum PropBinding {
    /// `prop="literal"`
    Static(String),
    /// `prop={expr}` where expr is not a path but evaluates statically.
    Evaluated(String),
    /// `prop={path}` or `{...spread}`: the caller-side path of the prop's value.
    Path(String),
}

#[derive(Debug, Clone)]
pub struct CallSite {
    pub caller: Arc<ParsedFile>,
    pub line: u32,
    pub binding: PropBinding,
}

/// Component invocations with the loop contexts enclosing each.
#[derive(Default)]
struct InvocationCollector<'a> {
    loops: Vec<&'a LoopContext>,
    found: Vec<(&'a ComponentNode, Vec<&'a LoopContext>)>,
}

impl<'a> TemplateVisitor<'a> for InvocationCollector<'a> {
    fn visit_component(&mut self, component: &'a ComponentNode) {
        self.found.push((component, self.loops.clone()));
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

/// Every component invocation in document order, with its enclosing loops.
pub fn component_invocations(ast: &TemplateAst) -> Vec<(&ComponentNode, Vec<&LoopContext>)> {
    let mut collector = InvocationCollector::default();
    collector.visit_ast(ast);
    collector.found
}

/// Local names under which `caller` refers to the component in
/// `component_file`: imports resolving to it, else the file stem.
pub fn component_local_names(
    caller: &ParsedFile,
    component_file: &Path,
    template_extension: &str,
) -> Vec<String> {
    let target = clean_path(component_file);
    let mut names: Vec<String> = caller
        .symbols
        .imports
        .iter()
        .filter(|import| {
            resolve_module_path(&caller.path, &import.source, template_extension)
                .is_some_and(|resolved| resolved == target)
        })
        .map(|import| import.local_name.clone())
        .collect();
    if names.is_empty() {
        if let Some(stem) = component_file.file_stem().and_then(|s| s.to_str()) {
            names.push(stem.to_string());
        }
    }
    names
}

/// Call-site bindings of one prop in one caller file, in document order.
pub fn prop_bindings(
    caller: &Arc<ParsedFile>,
    component_names: &[String],
    prop: &str,
) -> Vec<CallSite> {
    let mut sites = Vec::new();
    for (component, loops) in component_invocations(&caller.ast) {
        if !component_names.iter().any(|n| n == &component.name) {
            continue;
        }
        for attribute in &component.attributes {
            let line = attribute.position.line;
            let binding = match &attribute.value {
                AttributeValue::Static(value) if attribute.name == prop => {
                    PropBinding::Static(value.clone())
                }
                AttributeValue::Expression(code) if attribute.name == prop => {
                    match expression_path(code) {
                        Some(path) => PropBinding::Path(resolve_local_path(caller, &loops, &path)),
                        None => {
                            let symbols = &caller.symbols;
                            match static_eval(code, &|p: &str| symbols.lookup_value(p)) {
                                Some(value) => PropBinding::Evaluated(value),
                                None => continue,
                            }
                        }
                    }
                }
                AttributeValue::Spread(code) => match expression_path(code) {
                    Some(path) => {
                        let spread = resolve_local_path(caller, &loops, &path);
                        PropBinding::Path(format!("{}.{}", spread, prop))
                    }
                    None => continue,
                },
                _ => continue,
            };
            sites.push(CallSite {
                caller: caller.clone(),
                line,
                binding,
            });
        }
    }
    sites
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESOLVER
// ═══════════════════════════════════════════════════════════════════════════════

/// One resolution query. Holds the visited set that stops cycles the depth
/// cap alone would walk repeatedly.
pub struct CrossFileResolver<'c> {
    ctx: &'c mut BuildContext,
    visited: HashSet<(PathBuf, String, String)>,
}

impl<'c> CrossFileResolver<'c> {
    pub fn new(ctx: &'c mut BuildContext) -> Self {
        Self {
            ctx,
            visited: HashSet::new(),
        }
    }

    fn over_limit(&self, depth: u32, prop: &str) -> bool {
        let max = self.ctx.config().max_resolution_depth;
        if depth > max {
            debug!(prop, depth, max, "prop resolution depth limit reached");
            return true;
        }
        false
    }

    fn first_visit(&mut self, file: &Path, prop: &str, key: String) -> bool {
        self.visited
            .insert((file.to_path_buf(), prop.to_string(), key))
    }

    fn call_sites(&mut self, component_file: &Path, prop: &str) -> Vec<CallSite> {
        let extension = self.ctx.config().template_extension.clone();
        let mut sites = Vec::new();
        for file in self.ctx.all_templates() {
            let Some(caller) = self.ctx.parse(&file) else {
                continue;
            };
            let names = component_local_names(&caller, component_file, &extension);
            sites.extend(prop_bindings(&caller, &names, prop));
        }
        sites
    }

    fn prop_location(site: &CallSite) -> SourceLocation {
        SourceLocation::new(
            &site.caller.relative_path,
            site.line,
            site.caller.snippet(site.line),
            SourceType::Prop,
        )
    }

    fn variable_location(file: &str, snippet: String, def: &VariableDefinition) -> SourceLocation {
        SourceLocation::new(file, def.line, snippet, SourceType::Variable)
            .with_variable(def.path())
            .with_definition_line(def.line)
    }

    // ── symbolic ──────────────────────────────────────────────────────────────

    /// Find where `prop` (and the member path below it) of the component in
    /// `component_file` gets the normalized text `search`.
    pub fn resolve_prop(
        &mut self,
        component_file: &Path,
        prop: &str,
        member_path: &str,
        search: &str,
        depth: u32,
    ) -> Option<SourceLocation> {
        if self.over_limit(depth, prop) {
            return None;
        }
        if !self.first_visit(component_file, prop, member_path.to_string()) {
            return None;
        }

        for site in self.call_sites(component_file, prop) {
            let found = match &site.binding {
                PropBinding::Static(value) | PropBinding::Evaluated(value) => (member_path
                    .is_empty()
                    && normalize_text(value) == search)
                    .then(|| Self::prop_location(&site)),
                PropBinding::Path(target) => {
                    let path = format!("{}{}", target, member_path);
                    self.resolve_path_in(&site.caller, &path, search, depth)
                }
            };
            if found.is_some() {
                return found;
            }
        }
        None
    }

    /// Resolve a caller-side path: local definition, then prop, then import.
    pub fn resolve_path_in(
        &mut self,
        caller: &Arc<ParsedFile>,
        path: &str,
        search: &str,
        depth: u32,
    ) -> Option<SourceLocation> {
        if let Some(def) = caller
            .symbols
            .definitions_matching(path)
            .find(|d| normalize_text(&d.value) == search)
        {
            return Some(Self::variable_location(
                &caller.relative_path,
                caller.snippet(def.line),
                def,
            ));
        }

        let props_object = self.ctx.config().props_object.clone();
        if let Some((prop, member)) = prop_reference(caller, &props_object, path) {
            return self.resolve_prop(&caller.path, &prop, &member, search, depth + 1);
        }

        let import = caller.symbols.import_for(base_identifier(path))?.clone();
        self.resolve_import(caller, &import.imported_name, &import.source, path_rest(path), search)
    }

    /// Look the value up in a relatively imported module's exports.
    pub fn resolve_import(
        &mut self,
        importer: &ParsedFile,
        imported_name: &str,
        source: &str,
        member_path: &str,
        search: &str,
    ) -> Option<SourceLocation> {
        let module = self.load_module(importer, source)?;
        let path = module_path(&module, imported_name, member_path);
        let def = module
            .definitions
            .iter()
            .find(|d| path_matches(&path, &d.path()) && normalize_text(&d.value) == search)?;
        Some(Self::variable_location(
            &module.relative_path,
            module.snippet(def.line),
            def,
        ))
    }

    fn load_module(&mut self, importer: &ParsedFile, source: &str) -> Option<Arc<ModuleExports>> {
        let extension = self.ctx.config().template_extension.clone();
        let Some(path) = resolve_module_path(&importer.path, source, &extension) else {
            debug!(source, "import not followed");
            return None;
        };
        self.ctx.module_exports(&path)
    }

    // ── value-keyed ──────────────────────────────────────────────────────────

    /// Find where the component's `prop` receives data containing `value`,
    /// preferring a definition whose last key is `property`.
    pub fn resolve_prop_value(
        &mut self,
        component_file: &Path,
        prop: &str,
        property: Option<&str>,
        value: &str,
        depth: u32,
    ) -> Option<SourceLocation> {
        if self.over_limit(depth, prop) {
            return None;
        }
        if !self.first_visit(component_file, prop, format!("={}", value)) {
            return None;
        }

        for site in self.call_sites(component_file, prop) {
            let found = match &site.binding {
                PropBinding::Static(v) | PropBinding::Evaluated(v) => {
                    (normalize_text(v) == value).then(|| Self::prop_location(&site))
                }
                PropBinding::Path(target) => {
                    self.resolve_value_in(&site.caller, target, property, value, depth)
                }
            };
            if found.is_some() {
                return found;
            }
        }
        None
    }

    /// Value-keyed lookup below a caller-side path prefix.
    pub fn resolve_value_in(
        &mut self,
        caller: &Arc<ParsedFile>,
        prefix: &str,
        property: Option<&str>,
        value: &str,
        depth: u32,
    ) -> Option<SourceLocation> {
        if let Some(def) = pick_by_value(&caller.symbols.definitions, prefix, property, value) {
            return Some(Self::variable_location(
                &caller.relative_path,
                caller.snippet(def.line),
                def,
            ));
        }

        let props_object = self.ctx.config().props_object.clone();
        if let Some((prop, _)) = prop_reference(caller, &props_object, prefix) {
            return self.resolve_prop_value(&caller.path, &prop, property, value, depth + 1);
        }

        let import = caller.symbols.import_for(base_identifier(prefix))?.clone();
        let module = self.load_module(caller, &import.source)?;
        let module_prefix = module_path(&module, &import.imported_name, path_rest(prefix));
        let def = pick_by_value(&module.definitions, &module_prefix, property, value)?;
        Some(Self::variable_location(
            &module.relative_path,
            module.snippet(def.line),
            def,
        ))
    }
}

/// Definitions at or below `prefix` with the given value: a `(property,
/// value)` match first, then the value alone.
pub fn pick_by_value<'d>(
    definitions: &'d [VariableDefinition],
    prefix: &str,
    property: Option<&str>,
    value: &str,
) -> Option<&'d VariableDefinition> {
    let candidates: Vec<&VariableDefinition> = definitions
        .iter()
        .filter(|d| {
            (prefix.is_empty() || path_starts_with(&d.path(), prefix))
                && normalize_text(&d.value) == value
        })
        .collect();
    if let Some(property) = property {
        if let Some(def) = candidates
            .iter()
            .find(|d| last_key(&d.path()).as_deref() == Some(property))
        {
            return Some(def);
        }
    }
    candidates.first().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocatorConfig;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, body: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(
            clean_path(Path::new("/a/src/pages/../components/./Card.astro")),
            PathBuf::from("/a/src/components/Card.astro")
        );
    }

    #[test]
    fn test_resolve_module_path_probes_extensions() {
        let dir = TempDir::new().unwrap();
        let page = write(dir.path(), "src/pages/index.astro", "");
        let data = write(dir.path(), "src/data/site.ts", "");
        let index = write(dir.path(), "src/data/nav/index.json", "{}");
        assert_eq!(resolve_module_path(&page, "../data/site", "astro"), Some(data));
        assert_eq!(resolve_module_path(&page, "../data/nav", "astro"), Some(index));
        assert_eq!(resolve_module_path(&page, "astro:content", "astro"), None);
    }

    #[test]
    fn test_static_call_site() {
        let dir = TempDir::new().unwrap();
        let layout = write(
            dir.path(),
            "src/layouts/Layout.astro",
            "---\nconst { title } = Astro.props;\n---\n<title>{title}</title>\n",
        );
        write(
            dir.path(),
            "src/pages/index.astro",
            "---\nimport Layout from '../layouts/Layout.astro';\n---\n<Layout\n  title=\"My Page Title\"\n>\n</Layout>\n",
        );
        let mut ctx = BuildContext::new(LocatorConfig::new(dir.path()));
        let mut resolver = CrossFileResolver::new(&mut ctx);
        let loc = resolver
            .resolve_prop(&layout, "title", "", "My Page Title", 0)
            .unwrap();
        assert_eq!(loc.file, "src/pages/index.astro");
        assert_eq!(loc.line, 5);
        assert_eq!(loc.source_type, SourceType::Prop);
        assert_eq!(loc.snippet, "title=\"My Page Title\"");
    }

    #[test]
    fn test_expression_call_site_preserves_trailing_path() {
        let dir = TempDir::new().unwrap();
        let nav = write(
            dir.path(),
            "src/components/Nav.astro",
            "---\nconst { items } = Astro.props;\n---\n<ul>{items.map((i) => <li>{i.label}</li>)}</ul>\n",
        );
        write(
            dir.path(),
            "src/pages/index.astro",
            "---\nimport Nav from '../components/Nav.astro';\nconst links = [\n  { label: 'Home' },\n  { label: 'Blog' },\n];\n---\n<Nav items={links} />\n",
        );
        let mut ctx = BuildContext::new(LocatorConfig::new(dir.path()));
        let mut resolver = CrossFileResolver::new(&mut ctx);
        let loc = resolver
            .resolve_prop(&nav, "items", "[*].label", "Blog", 0)
            .unwrap();
        assert_eq!(loc.source_type, SourceType::Variable);
        assert_eq!(loc.variable_name.as_deref(), Some("links[1].label"));
        assert_eq!(loc.line, 5);
    }

    #[test]
    fn test_spread_and_drilled_props() {
        let dir = TempDir::new().unwrap();
        let button = write(
            dir.path(),
            "src/components/Button.astro",
            "---\nconst { text } = Astro.props;\n---\n<button>{text}</button>\n",
        );
        write(
            dir.path(),
            "src/components/Hero.astro",
            "---\nimport Button from './Button.astro';\nconst { cta } = Astro.props;\n---\n<Button {...cta} />\n",
        );
        write(
            dir.path(),
            "src/pages/index.astro",
            "---\nimport Hero from '../components/Hero.astro';\nconst action = { text: 'Sign up' };\n---\n<Hero cta={action} />\n",
        );
        let mut ctx = BuildContext::new(LocatorConfig::new(dir.path()));
        let mut resolver = CrossFileResolver::new(&mut ctx);
        let loc = resolver.resolve_prop(&button, "text", "", "Sign up", 0).unwrap();
        assert_eq!(loc.file, "src/pages/index.astro");
        assert_eq!(loc.variable_name.as_deref(), Some("action.text"));
        assert_eq!(loc.line, 3);
    }

    #[test]
    fn test_cyclic_drilling_terminates() {
        let dir = TempDir::new().unwrap();
        let a = write(
            dir.path(),
            "src/components/A.astro",
            "---\nimport B from './B.astro';\nconst { v } = Astro.props;\n---\n<B v={v} /><p>{v}</p>\n",
        );
        write(
            dir.path(),
            "src/components/B.astro",
            "---\nimport A from './A.astro';\nconst { v } = Astro.props;\n---\n<A v={v} />\n",
        );
        let mut ctx = BuildContext::new(LocatorConfig::new(dir.path()));
        let mut resolver = CrossFileResolver::new(&mut ctx);
        assert!(resolver.resolve_prop(&a, "v", "", "never", 0).is_none());
    }

    #[test]
    fn test_depth_limit() {
        let dir = TempDir::new().unwrap();
        let leaf = write(
            dir.path(),
            "src/components/Leaf.astro",
            "---\nconst { t } = Astro.props;\n---\n<p>{t}</p>\n",
        );
        write(
            dir.path(),
            "src/pages/index.astro",
            "---\nimport Leaf from '../components/Leaf.astro';\n---\n<Leaf t=\"Deep\" />\n",
        );
        let mut ctx = BuildContext::new(LocatorConfig::new(dir.path()));
        assert!(CrossFileResolver::new(&mut ctx)
            .resolve_prop(&leaf, "t", "", "Deep", 6)
            .is_none());
        assert!(CrossFileResolver::new(&mut ctx)
            .resolve_prop(&leaf, "t", "", "Deep", 5)
            .is_some());
    }

    #[test]
    fn test_import_json_and_named_exports() {
        let dir = TempDir::new().unwrap();
        let page = write(
            dir.path(),
            "src/pages/index.astro",
            "---\nimport site from '../data/site.json';\nimport { hero } from '../data/hero';\n---\n<h1>{site.title}</h1><h2>{hero.heading}</h2>\n",
        );
        write(dir.path(), "src/data/site.json", "{\n  \"title\": \"Acme\"\n}\n");
        write(dir.path(), "src/data/hero.ts", "export const hero = {\n  heading: 'Big News',\n};\n");
        let mut ctx = BuildContext::new(LocatorConfig::new(dir.path()));
        let parsed = ctx.parse(&page).unwrap();
        let mut resolver = CrossFileResolver::new(&mut ctx);

        let loc = resolver
            .resolve_import(&parsed, "default", "../data/site.json", ".title", "Acme")
            .unwrap();
        assert_eq!(loc.file, "src/data/site.json");
        assert_eq!(loc.line, 2);

        let loc = resolver
            .resolve_import(&parsed, "hero", "../data/hero", ".heading", "Big News")
            .unwrap();
        assert_eq!(loc.file, "src/data/hero.ts");
        assert_eq!(loc.line, 2);
        assert_eq!(loc.snippet, "heading: 'Big News',");
    }

    #[test]
    fn test_value_keyed_prefers_property_name() {
        let dir = TempDir::new().unwrap();
        let nav = write(
            dir.path(),
            "src/components/Nav.astro",
            "---\nconst { links } = Astro.props;\n---\n{links.map((l) => <a href={l.href}>{l.text}</a>)}\n",
        );
        write(
            dir.path(),
            "src/pages/index.astro",
            "---\nimport Nav from '../components/Nav.astro';\nconst menu = [\n  { text: '/docs', href: '/docs' },\n];\n---\n<Nav links={menu} />\n",
        );
        let mut ctx = BuildContext::new(LocatorConfig::new(dir.path()));
        let mut resolver = CrossFileResolver::new(&mut ctx);
        let loc = resolver
            .resolve_prop_value(&nav, "links", Some("href"), "/docs", 0)
            .unwrap();
        assert_eq!(loc.variable_name.as_deref(), Some("menu[0].href"));
    }
}
