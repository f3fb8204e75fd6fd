//! Query surface.
//!
//! `SourceLocator` owns one build's [`BuildContext`] and lazily built
//! [`SearchIndex`]. Every query tries the index first and falls back to the
//! AST matcher plus the cross-file resolver. Failures never escape: a query
//! either finds a location or returns `None`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::ast::{
    AttributeNode, AttributeValue, ComponentNode, ElementNode, ExpressionNode, LoopContext,
};
use crate::cache::{BuildContext, ParsedFile};
use crate::collections::Collection;
use crate::config::LocatorConfig;
use crate::expr::{base_identifier, expression_path, last_key, path_rest, static_eval};
use crate::index::SearchIndex;
use crate::matcher::{match_element, prop_reference, resolve_local_path, ScoredMatch};
use crate::model::{SourceLocation, SourceType};
use crate::normalize::normalize_text;
use crate::resolver::{
    component_invocations, component_local_names, pick_by_value, CrossFileResolver,
};
use crate::visitor::{walk_component, walk_element, walk_expression, TemplateVisitor};

pub struct SourceLocator {
    ctx: BuildContext,
    index: Option<SearchIndex>,
}

impl SourceLocator {
    pub fn new(config: LocatorConfig) -> Self {
        Self {
            ctx: BuildContext::new(config),
            index: None,
        }
    }

    pub fn config(&self) -> &LocatorConfig {
        self.ctx.config()
    }

    pub fn context_mut(&mut self) -> &mut BuildContext {
        &mut self.ctx
    }

    /// Start a new build: drop every cache and the index.
    pub fn reset(&mut self) {
        self.ctx.reset();
        self.index = None;
    }

    /// This build's content collections.
    pub fn collections(&mut self) -> Arc<Vec<Collection>> {
        self.ctx.collections()
    }

    pub fn index(&mut self) -> &SearchIndex {
        let ctx = &mut self.ctx;
        self.index.get_or_insert_with(|| SearchIndex::build(ctx))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TEXT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Where the text rendered inside a `tag` element is defined.
    pub fn resolve_source_location(&mut self, text: &str, tag: &str) -> Option<SourceLocation> {
        let search = normalize_text(text);
        if search.is_empty() {
            return None;
        }

        if let Some(entry) = self.index().find_by_text(&search, Some(tag)) {
            trace!(text = %search, tag, file = %entry.file, "search index hit");
            return Some(entry.to_location());
        }

        let files = self.ctx.all_templates();
        self.resolve_in_files(&files, &search, tag)
    }

    /// Same as [`resolve_source_location`](Self::resolve_source_location) but
    /// matching only inside one template (props it reads are still followed
    /// to their call sites).
    pub fn resolve_source_location_in(
        &mut self,
        file: &Path,
        text: &str,
        tag: &str,
    ) -> Option<SourceLocation> {
        let search = normalize_text(text);
        if search.is_empty() {
            return None;
        }
        self.resolve_in_files(&[file.to_path_buf()], &search, tag)
    }

    fn resolve_in_files(
        &mut self,
        files: &[PathBuf],
        search: &str,
        tag: &str,
    ) -> Option<SourceLocation> {
        let props_object = self.ctx.config().props_object.clone();
        let mut best: Option<ScoredMatch> = None;
        let mut prop_candidates = Vec::new();
        let mut import_candidates = Vec::new();

        for path in files {
            let Some(file) = self.ctx.parse(path) else {
                continue;
            };
            let outcome = match_element(&file, tag, search, &props_object);
            if outcome.is_exact() {
                return outcome.best_match.map(|m| m.location);
            }
            if let Some(candidate) = outcome.best_match {
                if best.as_ref().map_or(true, |b| candidate.score > b.score) {
                    best = Some(candidate);
                }
            }
            prop_candidates.extend(outcome.prop_candidates.into_iter().map(|c| (file.clone(), c)));
            import_candidates.extend(
                outcome
                    .import_candidates
                    .into_iter()
                    .map(|c| (file.clone(), c)),
            );
        }

        let mut resolver = CrossFileResolver::new(&mut self.ctx);
        for (file, candidate) in &prop_candidates {
            if let Some(location) = resolver.resolve_prop(
                &file.path,
                &candidate.prop_name,
                &candidate.member_path,
                search,
                0,
            ) {
                return Some(location);
            }
        }
        for (file, candidate) in &import_candidates {
            if let Some(location) = resolver.resolve_import(
                file,
                &candidate.imported_name,
                &candidate.source,
                &candidate.member_path,
                search,
            ) {
                return Some(location);
            }
        }

        if best.is_none() {
            debug!(text = %search, tag, "no source location found");
        }
        best.map(|m| m.location)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ATTRIBUTES & IMAGES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Where the value of a dynamic attribute (`href={item.href}`) rendered as
    /// `resolved_value` is defined, starting from the template that contains
    /// the expression.
    pub fn resolve_attribute_source_location(
        &mut self,
        expression: &str,
        resolved_value: &str,
        source_file: &Path,
    ) -> Option<SourceLocation> {
        let file = self.ctx.parse(source_file)?;
        let value = normalize_text(resolved_value);
        let (attribute, loops) = find_attribute_expression(&file, expression);

        let Some(path) = expression_path(expression) else {
            // A literal expression is its own source.
            let attribute = attribute?;
            let symbols = &file.symbols;
            let evaluated = static_eval(expression, &|p: &str| symbols.lookup_value(p))?;
            return (normalize_text(&evaluated) == value).then(|| {
                SourceLocation::new(
                    &file.relative_path,
                    attribute.position.line,
                    file.snippet(attribute.position.line),
                    SourceType::Static,
                )
            });
        };

        let loop_refs: Vec<&LoopContext> = loops.iter().collect();
        let resolved = resolve_local_path(&file, &loop_refs, &path);
        let property = last_key(&path);
        self.resolve_path_value(&file, &resolved, property.as_deref(), &value)
    }

    fn resolve_path_value(
        &mut self,
        file: &Arc<ParsedFile>,
        resolved: &str,
        property: Option<&str>,
        value: &str,
    ) -> Option<SourceLocation> {
        if let Some(def) = file
            .symbols
            .definitions_matching(resolved)
            .find(|d| normalize_text(&d.value) == value)
            .or_else(|| pick_by_value(&file.symbols.definitions, resolved, property, value))
        {
            return Some(
                SourceLocation::new(
                    &file.relative_path,
                    def.line,
                    file.snippet(def.line),
                    SourceType::Variable,
                )
                .with_variable(def.path())
                .with_definition_line(def.line),
            );
        }

        let props_object = self.ctx.config().props_object.clone();
        let mut resolver = CrossFileResolver::new(&mut self.ctx);
        if let Some((prop, member)) = prop_reference(file, &props_object, resolved) {
            return resolver
                .resolve_prop(&file.path, &prop, &member, value, 0)
                .or_else(|| resolver.resolve_prop_value(&file.path, &prop, property, value, 0));
        }

        let import = file.symbols.import_for(base_identifier(resolved))?.clone();
        resolver
            .resolve_import(file, &import.imported_name, &import.source, path_rest(resolved), value)
            .or_else(|| resolver.resolve_value_in(file, resolved, property, value, 0))
    }

    /// Where an image `src` is defined.
    pub fn resolve_image_source_location(&mut self, src: &str) -> Option<SourceLocation> {
        let src = src.trim();
        if src.is_empty() {
            return None;
        }
        if let Some(entry) = self.index().find_image_by_src(src) {
            return Some(entry.to_location());
        }

        for path in self.ctx.all_templates() {
            let Some(file) = self.ctx.parse(&path) else {
                continue;
            };
            let expressions: Vec<String> = image_src_expressions(&file);
            for code in expressions {
                if let Some(location) = self.resolve_attribute_source_location(&code, src, &path) {
                    return Some(location);
                }
            }
        }
        None
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // COMPONENT PROPS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Props passed by the `nth` (0-based) invocation of the component in
    /// `component_file` inside `parent_file`. Static attributes are kept
    /// verbatim, expressions are statically evaluated against the parent's
    /// definitions, bare attributes become `true`; anything else is omitted.
    pub fn component_props(
        &mut self,
        parent_file: &Path,
        component_file: &Path,
        nth: usize,
    ) -> BTreeMap<String, serde_json::Value> {
        let mut props = BTreeMap::new();
        let Some(parent) = self.ctx.parse(parent_file) else {
            return props;
        };
        let extension = self.ctx.config().template_extension.clone();
        let component_file = self.absolute(component_file);
        let names = component_local_names(&parent, &component_file, &extension);

        let invocations = component_invocations(&parent.ast);
        let Some((component, _)) = invocations
            .into_iter()
            .filter(|(c, _)| names.iter().any(|n| n == &c.name))
            .nth(nth)
        else {
            return props;
        };

        let symbols = &parent.symbols;
        for attribute in &component.attributes {
            let value = match &attribute.value {
                AttributeValue::Static(v) => serde_json::Value::String(v.clone()),
                AttributeValue::Expression(code) => {
                    match static_eval(code, &|p: &str| symbols.lookup_value(p)) {
                        Some(v) => serde_json::Value::String(v),
                        None => continue,
                    }
                }
                AttributeValue::Empty => serde_json::Value::Bool(true),
                AttributeValue::Spread(_) => continue,
            };
            props.insert(attribute.name.clone(), value);
        }
        props
    }

    /// How many times `parent_file` invokes the component in `component_file`.
    pub fn invocation_count(&mut self, parent_file: &Path, component_file: &Path) -> usize {
        let Some(parent) = self.ctx.parse(parent_file) else {
            return 0;
        };
        let extension = self.ctx.config().template_extension.clone();
        let names = component_local_names(&parent, &self.absolute(component_file), &extension);
        component_invocations(&parent.ast)
            .iter()
            .filter(|(c, _)| names.iter().any(|n| n == &c.name))
            .count()
    }

    /// A template that invokes the component in `component_file`: the first
    /// of `preferred` that does, else the first in search order (pages,
    /// components, layouts).
    pub fn find_invoker(
        &mut self,
        component_file: &Path,
        preferred: &[PathBuf],
    ) -> Option<PathBuf> {
        let component_file = self.absolute(component_file);
        let mut candidates: Vec<PathBuf> = preferred
            .iter()
            .filter(|p| self.ctx.config().is_template(p))
            .map(|p| self.absolute(p))
            .collect();
        candidates.extend(self.ctx.all_templates());

        let found = candidates
            .into_iter()
            .find(|t| *t != component_file && self.invocation_count(t, &component_file) > 0);
        trace!(component = %component_file.display(), found = ?found, "invoker search");
        found
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.ctx.config().project_root.join(path)
        }
    }
}

/// Finds the attribute whose expression is `expression`, with the loops
/// enclosing it.
struct AttributeFinder<'a, 'e> {
    expression: &'e str,
    loops: Vec<&'a LoopContext>,
    found: Option<(&'a AttributeNode, Vec<LoopContext>)>,
}

impl<'a, 'e> AttributeFinder<'a, 'e> {
    fn check(&mut self, attributes: &'a [AttributeNode]) {
        if self.found.is_some() {
            return;
        }
        let hit = attributes
            .iter()
            .find(|a| a.expression().is_some_and(|code| code.trim() == self.expression));
        if let Some(attribute) = hit {
            self.found = Some((attribute, self.loops.iter().map(|c| (*c).clone()).collect()));
        }
    }
}

impl<'a, 'e> TemplateVisitor<'a> for AttributeFinder<'a, 'e> {
    fn visit_element(&mut self, element: &'a ElementNode) {
        self.check(&element.attributes);
        walk_element(self, element);
    }

    fn visit_component(&mut self, component: &'a ComponentNode) {
        self.check(&component.attributes);
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

fn find_attribute_expression<'f>(
    file: &'f ParsedFile,
    expression: &str,
) -> (Option<&'f AttributeNode>, Vec<LoopContext>) {
    let trimmed = expression.trim();
    let mut finder = AttributeFinder {
        expression: trimmed,
        loops: Vec::new(),
        found: None,
    };
    finder.visit_ast(&file.ast);
    match finder.found {
        Some((attribute, loops)) => (Some(attribute), loops),
        None => (None, Vec::new()),
    }
}

/// `src={...}` expressions of every `img` in a file.
fn image_src_expressions(file: &ParsedFile) -> Vec<String> {
    struct ImageCollector(Vec<String>);
    impl<'a> TemplateVisitor<'a> for ImageCollector {
        fn visit_element(&mut self, element: &'a ElementNode) {
            if element.tag.eq_ignore_ascii_case("img") {
                if let Some(code) = element.attribute("src").and_then(|a| a.expression()) {
                    self.0.push(code.to_string());
                }
            }
            walk_element(self, element);
        }
    }
    let mut collector = ImageCollector(Vec::new());
    collector.visit_ast(&file.ast);
    collector.0
}
