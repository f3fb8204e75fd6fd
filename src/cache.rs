//! Per-build caches.
//!
//! `BuildContext` owns the parsed-file cache, the directory-listing cache,
//! the imported-module cache and the content-collection scan. It lives for one build and is passed explicitly
//! to everything that reads templates; `reset()` clears it at the start of the
//! next build so no line numbers survive an edit.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::ast::TemplateAst;
use crate::collections::{scan_collections, Collection};
use crate::config::LocatorConfig;
use crate::discovery::find_template_files;
use crate::error::{LocatorError, Result};
use crate::parse::parse_template;
use crate::symbols::{
    extract_json_definitions, extract_module_exports, extract_symbols, FileSymbols,
    VariableDefinition,
};

pub fn compute_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// One parsed template with its symbol table.
#[derive(Debug)]
pub struct ParsedFile {
    pub path: PathBuf,
    pub relative_path: String,
    pub source: String,
    pub lines: Vec<String>,
    pub ast: TemplateAst,
    /// First line of frontmatter content, 1 when there is none.
    pub frontmatter_start_line: u32,
    pub symbols: FileSymbols,
    pub content_hash: String,
}

impl ParsedFile {
    pub fn line_text(&self, line: u32) -> &str {
        line.checked_sub(1)
            .and_then(|i| self.lines.get(i as usize))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn snippet(&self, line: u32) -> String {
        self.line_text(line).trim().to_string()
    }
}

/// Exported definitions of an imported script or JSON module.
#[derive(Debug)]
pub struct ModuleExports {
    pub path: PathBuf,
    pub relative_path: String,
    pub lines: Vec<String>,
    pub definitions: Vec<VariableDefinition>,
}

impl ModuleExports {
    pub fn snippet(&self, line: u32) -> String {
        line.checked_sub(1)
            .and_then(|i| self.lines.get(i as usize))
            .map(|l| l.trim().to_string())
            .unwrap_or_default()
    }
}

pub struct BuildContext {
    config: LocatorConfig,
    parsed: HashMap<PathBuf, Option<Arc<ParsedFile>>>,
    modules: HashMap<PathBuf, Option<Arc<ModuleExports>>>,
    listings: HashMap<PathBuf, Arc<Vec<PathBuf>>>,
    collections: Option<Arc<Vec<Collection>>>,
}

impl BuildContext {
    pub fn new(config: LocatorConfig) -> Self {
        Self {
            config,
            parsed: HashMap::new(),
            modules: HashMap::new(),
            listings: HashMap::new(),
            collections: None,
        }
    }

    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    /// Drop every cached parse, listing, module and collection scan.
    pub fn reset(&mut self) {
        debug!(
            parsed = self.parsed.len(),
            listings = self.listings.len(),
            "resetting build caches"
        );
        self.parsed.clear();
        self.modules.clear();
        self.listings.clear();
        self.collections = None;
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config.project_root.join(path)
        }
    }

    /// Parse a template, memoized. A file that cannot be read or parsed
    /// yields None and is remembered as such for the rest of the build.
    pub fn parse(&mut self, path: &Path) -> Option<Arc<ParsedFile>> {
        let path = self.absolute(path);
        if let Some(cached) = self.parsed.get(&path) {
            return cached.clone();
        }

        let parsed = match self.load(&path) {
            Ok(file) => Some(Arc::new(file)),
            Err(e) => {
                debug!(file = %path.display(), error = %e, "skipping file");
                None
            }
        };
        self.parsed.insert(path, parsed.clone());
        parsed
    }

    fn load(&self, path: &Path) -> Result<ParsedFile> {
        let source = fs::read_to_string(path).map_err(|e| LocatorError::io(path, e))?;
        let relative_path = self.config.relative_path(path);
        trace!(file = %relative_path, "parsing template");

        let ast = parse_template(&source, &relative_path)?;
        let (symbols, frontmatter_start_line) = match &ast.frontmatter {
            Some(fm) => (
                extract_symbols(&fm.content, fm.start_line, &self.config.props_object),
                fm.start_line,
            ),
            None => (FileSymbols::default(), 1),
        };

        Ok(ParsedFile {
            path: path.to_path_buf(),
            relative_path,
            lines: source.lines().map(str::to_string).collect(),
            content_hash: compute_hash(&source),
            source,
            ast,
            frontmatter_start_line,
            symbols,
        })
    }

    /// Template files under `dir`, sorted by path. Missing directories list
    /// as empty.
    pub fn list_templates(&mut self, dir: &Path) -> Arc<Vec<PathBuf>> {
        let dir = self.absolute(dir);
        if let Some(listing) = self.listings.get(&dir) {
            return listing.clone();
        }

        let listing = Arc::new(find_template_files(&dir, &self.config.template_extension));
        self.listings.insert(dir, listing.clone());
        listing
    }

    /// Content collections, scanned once per build.
    pub fn collections(&mut self) -> Arc<Vec<Collection>> {
        let config = &self.config;
        self.collections
            .get_or_insert_with(|| Arc::new(scan_collections(config)))
            .clone()
    }

    /// Every template in the search directories: pages, components, layouts.
    pub fn all_templates(&mut self) -> Vec<PathBuf> {
        let mut all = Vec::new();
        for dir in self.config.search_dirs() {
            for file in self.list_templates(&dir).iter() {
                if !all.contains(file) {
                    all.push(file.clone());
                }
            }
        }
        all
    }

    /// Exported definitions of a JSON or script module, memoized.
    pub fn module_exports(&mut self, path: &Path) -> Option<Arc<ModuleExports>> {
        let path = self.absolute(path);
        if let Some(cached) = self.modules.get(&path) {
            return cached.clone();
        }

        let module = match self.load_module(&path) {
            Ok(module) => Some(Arc::new(module)),
            Err(e) => {
                debug!(file = %path.display(), error = %e, "skipping module");
                None
            }
        };
        self.modules.insert(path, module.clone());
        module
    }

    fn load_module(&mut self, path: &Path) -> Result<ModuleExports> {
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let definitions = if extension == "json" {
            let source = fs::read_to_string(path).map_err(|e| LocatorError::io(path, e))?;
            extract_json_definitions(&source)?
        } else if self.config.is_template(path) {
            // Templates export from their frontmatter.
            let parsed = self.parse(path).ok_or_else(|| {
                LocatorError::parse(
                    &self.config.relative_path(path),
                    1,
                    1,
                    "template did not parse",
                )
            })?;
            match &parsed.ast.frontmatter {
                Some(fm) => {
                    let mut defs = extract_module_exports(&fm.content);
                    for def in &mut defs {
                        def.line += fm.start_line - 1;
                    }
                    defs
                }
                None => Vec::new(),
            }
        } else {
            let source = fs::read_to_string(path).map_err(|e| LocatorError::io(path, e))?;
            extract_module_exports(&source)
        };

        let source = fs::read_to_string(path).map_err(|e| LocatorError::io(path, e))?;
        Ok(ModuleExports {
            path: path.to_path_buf(),
            relative_path: self.config.relative_path(path),
            lines: source.lines().map(str::to_string).collect(),
            definitions,
        })
    }
}
