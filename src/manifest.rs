//! Page and global manifests.
//!
//! A page manifest is what the marker produced for one page, enriched with
//! source locations from the [`SourceLocator`]. The global manifest
//! aggregates every page plus component definitions, collections and the
//! colors in use, and carries a metadata block (content hash and per-file
//! hashes) used to detect drift between builds.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use crate::cache::{compute_hash, BuildContext};
use crate::collections::{collection_for, Collection};
use crate::discovery::ComponentDefinition;
use crate::error::{LocatorError, Result};
use crate::locate::SourceLocator;
use crate::lock::PathLocks;
use crate::marker::{strip_placeholders, MarkedPage};
use crate::model::SourceType;
use crate::normalize::{char_prefix, normalize_text};
use crate::styling::ColorClasses;

pub const MANIFEST_VERSION: &str = "1";
pub const GLOBAL_MANIFEST_FILE: &str = "cms-manifest.json";

/// Characters of normalized text that feed a stable id.
const STABLE_ID_TEXT_CHARS: usize = 48;

// ═══════════════════════════════════════════════════════════════════════════════
// ENTRIES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub src: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// One editable region of a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub id: String,
    pub tag: String,
    /// Rendered text; nested regions appear as `{{cms:<id>}}`.
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_cms_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_component_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_type: Option<SourceType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stable_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colors: Option<ColorClasses>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub styled: bool,
}

/// One rendered component instance, identified by its root element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentInstance {
    pub id: String,
    pub component_name: String,
    /// The component's template.
    pub file: String,
    /// Template that invoked the component.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    /// Line of the root element in `file`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_line: Option<u32>,
    /// Which invocation of `file` inside `source_path` this is, 0-based.
    pub invocation_index: usize,
    #[serde(default)]
    pub props: BTreeMap<String, serde_json::Value>,
    /// Provenance files enclosing the root on the rendered page, nearest
    /// first. Candidates for the invoking template.
    #[serde(skip)]
    pub enclosing_files: Vec<String>,
}

/// Content-derived id that survives rebuilds: the first 16 hex characters
/// of sha256 over the tag, the first 48 normalized characters of the text
/// (placeholders removed), and the source path.
pub fn stable_id(tag: &str, text: &str, source_path: &str) -> String {
    let normalized = normalize_text(&strip_placeholders(text));
    let prefix = char_prefix(&normalized, STABLE_ID_TEXT_CHARS);

    let mut hasher = Sha256::new();
    hasher.update(tag.to_ascii_lowercase().as_bytes());
    hasher.update([0u8]);
    hasher.update(prefix.as_bytes());
    hasher.update([0u8]);
    hasher.update(source_path.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// PAGE MANIFEST
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageManifest {
    /// Page route or output path, e.g. `/about/`.
    pub page: String,
    pub entries: Vec<ManifestEntry>,
    pub components: Vec<ComponentInstance>,
}

impl PageManifest {
    pub fn from_marked(page: impl Into<String>, marked: MarkedPage) -> Self {
        Self {
            page: page.into(),
            entries: marked.entries,
            components: marked.components,
        }
    }

    pub fn entry(&self, id: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// `childCmsIds` that name no entry of this page. Empty for a well-formed
    /// manifest.
    pub fn dangling_child_ids(&self) -> Vec<&str> {
        let ids: BTreeSet<&str> = self.entries.iter().map(|e| e.id.as_str()).collect();
        self.entries
            .iter()
            .flat_map(|e| e.child_cms_ids.iter())
            .map(String::as_str)
            .filter(|id| !ids.contains(id))
            .collect()
    }

    /// Fill in source locations, collection membership and component props.
    pub fn enrich(&mut self, locator: &mut SourceLocator, collections: &[Collection]) {
        // Templates the page's own provenance points at, before resolution
        // replaces entry paths with definition sites.
        let mut rendered_templates: Vec<PathBuf> = Vec::new();
        for path in self.entries.iter().filter_map(|e| e.source_path.as_deref()) {
            let path = PathBuf::from(path);
            if !rendered_templates.contains(&path) {
                rendered_templates.push(path);
            }
        }

        for entry in &mut self.entries {
            enrich_entry(entry, locator, collections);
        }
        let mut invocations = HashMap::new();
        for component in &mut self.components {
            enrich_component(component, locator, &rendered_templates, &mut invocations);
        }
    }
}

fn relativize(locator: &SourceLocator, path: &str) -> String {
    locator.config().relative_path(Path::new(path))
}

fn enrich_entry(
    entry: &mut ManifestEntry,
    locator: &mut SourceLocator,
    collections: &[Collection],
) {
    if let Some(path) = entry.source_path.take() {
        entry.source_path = Some(relativize(locator, &path));
    }

    let location = match &entry.image {
        Some(image) => locator.resolve_image_source_location(&image.src),
        None => {
            let search = strip_placeholders(&entry.text);
            let in_file = entry
                .source_path
                .clone()
                .filter(|p| locator.config().is_template(Path::new(p)))
                .and_then(|p| {
                    locator.resolve_source_location_in(Path::new(&p), &search, &entry.tag)
                });
            in_file.or_else(|| locator.resolve_source_location(&search, &entry.tag))
        }
    };

    match location {
        Some(location) => {
            trace!(id = %entry.id, file = %location.file, line = location.line, "entry located");
            entry.source_type = Some(location.source_type);
            entry.variable_name = location.variable_name;
            entry.source_path = Some(location.file);
            entry.source_line = Some(location.line);
        }
        None => debug!(id = %entry.id, tag = %entry.tag, "entry has no known source"),
    }

    if let Some(path) = &entry.source_path {
        if let Some((name, slug)) = collection_for(collections, path) {
            entry.collection_name = Some(name.to_string());
            entry.collection_slug = Some(slug.to_string());
        }
    }

    entry.stable_id = Some(stable_id(
        &entry.tag,
        &entry.text,
        entry.source_path.as_deref().unwrap_or(""),
    ));
}

fn enrich_component(
    component: &mut ComponentInstance,
    locator: &mut SourceLocator,
    rendered_templates: &[PathBuf],
    invocations: &mut HashMap<(String, String), usize>,
) {
    component.file = relativize(locator, &component.file);
    let file = PathBuf::from(&component.file);

    // A layout wrapping a page's slot content encloses the component without
    // invoking it, so every enclosing file is checked for an actual call.
    let mut invoker = None;
    for candidate in &component.enclosing_files {
        if locator.invocation_count(Path::new(candidate), &file) > 0 {
            invoker = Some(relativize(locator, candidate));
            break;
        }
    }
    if invoker.is_none() {
        invoker = locator
            .find_invoker(&file, rendered_templates)
            .map(|p| locator.config().relative_path(&p));
    }

    match invoker {
        Some(parent) => {
            let count = invocations
                .entry((parent.clone(), component.file.clone()))
                .or_insert(0);
            component.invocation_index = *count;
            *count += 1;
            component.props =
                locator.component_props(Path::new(&parent), &file, component.invocation_index);
            component.source_path = Some(parent);
        }
        None => {
            debug!(id = %component.id, file = %component.file, "no invoking template found");
            component.source_path = component
                .source_path
                .take()
                .map(|p| relativize(locator, &p));
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// GLOBAL MANIFEST
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestMetadata {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    /// sha256 of the serialized entries.
    pub content_hash: String,
    /// Project-relative template path → sha256 of its source.
    pub source_file_hashes: BTreeMap<String, String>,
}

impl ManifestMetadata {
    /// Files whose hash differs from `previous`, or that exist in only one of
    /// the two, sorted.
    pub fn changed_files(&self, previous: &ManifestMetadata) -> Vec<String> {
        let files: BTreeSet<&String> = self
            .source_file_hashes
            .keys()
            .chain(previous.source_file_hashes.keys())
            .collect();
        files
            .into_iter()
            .filter(|f| self.source_file_hashes.get(*f) != previous.source_file_hashes.get(*f))
            .cloned()
            .collect()
    }
}

/// Hash of every template the locator searches.
pub fn source_file_hashes(ctx: &mut BuildContext) -> BTreeMap<String, String> {
    let mut hashes = BTreeMap::new();
    for path in ctx.all_templates() {
        if let Some(parsed) = ctx.parse(&path) {
            hashes.insert(parsed.relative_path.clone(), parsed.content_hash.clone());
        }
    }
    hashes
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageIndex {
    pub entries: Vec<String>,
    pub components: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalManifest {
    pub entries: BTreeMap<String, ManifestEntry>,
    pub components: BTreeMap<String, ComponentInstance>,
    pub component_definitions: BTreeMap<String, ComponentDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collections: Option<Vec<Collection>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_colors: Option<Vec<String>>,
    /// Which ids each page contributed, so a rebuilt page replaces its own.
    #[serde(default)]
    pub pages: BTreeMap<String, PageIndex>,
    #[serde(default)]
    pub metadata: ManifestMetadata,
}

/// Site-wide data refreshed alongside every merge.
#[derive(Debug, Clone, Default)]
pub struct GlobalExtras {
    pub component_definitions: Vec<ComponentDefinition>,
    pub collections: Option<Vec<Collection>>,
    pub source_file_hashes: BTreeMap<String, String>,
}

impl GlobalManifest {
    /// Replace everything `page.page` contributed previously with `page`.
    pub fn merge_page(&mut self, page: &PageManifest) {
        if let Some(previous) = self.pages.remove(&page.page) {
            for id in &previous.entries {
                self.entries.remove(id);
            }
            for id in &previous.components {
                self.components.remove(id);
            }
        }

        let mut index = PageIndex::default();
        for entry in &page.entries {
            index.entries.push(entry.id.clone());
            self.entries.insert(entry.id.clone(), entry.clone());
        }
        for component in &page.components {
            index.components.push(component.id.clone());
            self.components.insert(component.id.clone(), component.clone());
        }
        self.pages.insert(page.page.clone(), index);
    }

    pub fn apply_extras(&mut self, extras: &GlobalExtras) {
        if !extras.component_definitions.is_empty() {
            self.component_definitions = extras
                .component_definitions
                .iter()
                .map(|d| (d.name.clone(), d.clone()))
                .collect();
        }
        if extras.collections.is_some() {
            self.collections = extras.collections.clone();
        }
        if !extras.source_file_hashes.is_empty() {
            self.metadata.source_file_hashes = extras.source_file_hashes.clone();
        }
    }

    /// Recompute colors in use, the content hash and the timestamp.
    pub fn refresh_metadata(&mut self) -> Result<()> {
        let colors: BTreeSet<String> = self
            .entries
            .values()
            .filter_map(|e| e.colors.as_ref())
            .flat_map(|c| c.text.iter().chain(c.background.iter()))
            .cloned()
            .collect();
        self.available_colors = (!colors.is_empty()).then(|| colors.into_iter().collect());

        let serialized = serde_json::to_string(&self.entries)?;
        self.metadata.version = MANIFEST_VERSION.to_string();
        self.metadata.content_hash = compute_hash(&serialized);
        self.metadata.generated_at = Utc::now();
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WRITER
// ═══════════════════════════════════════════════════════════════════════════════

/// Writes page manifests and merges them into the shared global manifest.
#[derive(Debug, Clone)]
pub struct ManifestWriter {
    out_dir: PathBuf,
    locks: PathLocks,
}

impl ManifestWriter {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self::with_locks(out_dir, PathLocks::new())
    }

    /// Share locks with other writers targeting the same files.
    pub fn with_locks(out_dir: impl Into<PathBuf>, locks: PathLocks) -> Self {
        Self {
            out_dir: out_dir.into(),
            locks,
        }
    }

    pub fn global_path(&self) -> PathBuf {
        self.out_dir.join(GLOBAL_MANIFEST_FILE)
    }

    /// `/blog/post/` → `<out>/pages/blog/post.json`, `/` → `<out>/pages/index.json`.
    pub fn page_path(&self, page: &str) -> PathBuf {
        let mut path = self.out_dir.join("pages");
        let parts: Vec<&str> = Path::new(page.trim_matches('/'))
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect();
        match parts.split_last() {
            Some((last, dirs)) => {
                for dir in dirs {
                    path.push(dir);
                }
                path.push(format!("{last}.json"));
            }
            None => path.push("index.json"),
        }
        path
    }

    pub async fn write_page(&self, manifest: &PageManifest) -> Result<PathBuf> {
        let path = self.page_path(&manifest.page);
        write_json(&path, manifest).await?;
        debug!(page = %manifest.page, entries = manifest.entries.len(), "wrote page manifest");
        Ok(path)
    }

    /// Read-modify-write of the global manifest under its path lock.
    pub async fn merge_into_global(
        &self,
        page: &PageManifest,
        extras: &GlobalExtras,
    ) -> Result<GlobalManifest> {
        let path = self.global_path();
        let guard = self.locks.acquire(&path).await;

        let result = merge_global_file(&path, page, extras).await;
        self.locks.release(guard);
        result
    }

    pub async fn read_global(&self) -> Result<GlobalManifest> {
        read_global(&self.global_path()).await
    }
}

async fn merge_global_file(
    path: &Path,
    page: &PageManifest,
    extras: &GlobalExtras,
) -> Result<GlobalManifest> {
    let mut global = read_global(path).await?;
    global.merge_page(page);
    global.apply_extras(extras);
    global.refresh_metadata()?;
    write_json(path, &global).await?;
    Ok(global)
}

async fn read_global(path: &Path) -> Result<GlobalManifest> {
    match tokio::fs::read_to_string(path).await {
        Ok(data) => Ok(serde_json::from_str(&data)?),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(GlobalManifest::default()),
        Err(e) => Err(LocatorError::io(path, e)),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| LocatorError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, json)
        .await
        .map_err(|e| LocatorError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(id: &str, text: &str) -> ManifestEntry {
        ManifestEntry {
            id: id.to_string(),
            tag: "p".to_string(),
            text: text.to_string(),
            ..Default::default()
        }
    }

    fn page(name: &str, ids: &[&str]) -> PageManifest {
        PageManifest {
            page: name.to_string(),
            entries: ids.iter().map(|id| entry(id, "text")).collect(),
            components: Vec::new(),
        }
    }

    #[test]
    fn test_stable_id_is_deterministic() {
        let a = stable_id("h1", "Hello   World", "src/pages/index.astro");
        let b = stable_id("H1", "Hello World", "src/pages/index.astro");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, stable_id("h2", "Hello World", "src/pages/index.astro"));
        assert_ne!(a, stable_id("h1", "Hello World!", "src/pages/index.astro"));
        assert_ne!(a, stable_id("h1", "Hello World", "src/pages/about.astro"));
    }

    #[test]
    fn test_stable_id_ignores_tail_and_placeholders() {
        let long = "x".repeat(48);
        assert_eq!(
            stable_id("p", &format!("{long}tail one"), ""),
            stable_id("p", &format!("{long}tail two"), "")
        );
        assert_eq!(
            stable_id("p", "a {{cms:cms-1}} b", ""),
            stable_id("p", "a {{cms:cms-9}} b", "")
        );
    }

    #[test]
    fn test_entry_serialization_is_camel_case_and_sparse() {
        let mut e = entry("cms-1", "Hi");
        e.child_cms_ids = vec!["cms-2".to_string()];
        e.source_type = Some(SourceType::Prop);
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["childCmsIds"][0], "cms-2");
        assert_eq!(json["sourceType"], "prop");
        assert!(json.get("styled").is_none());
        assert!(json.get("sourcePath").is_none());
    }

    #[test]
    fn test_dangling_child_ids() {
        let mut p = page("/", &["cms-0", "cms-1"]);
        p.entries[0].child_cms_ids = vec!["cms-1".to_string()];
        assert!(p.dangling_child_ids().is_empty());
        p.entries[0].child_cms_ids.push("cms-7".to_string());
        assert_eq!(p.dangling_child_ids(), vec!["cms-7"]);
    }

    #[test]
    fn test_merge_page_replaces_previous_contribution() {
        let mut global = GlobalManifest::default();
        global.merge_page(&page("/a/", &["cms-0", "cms-1"]));
        global.merge_page(&page("/b/", &["cms-2"]));
        global.merge_page(&page("/a/", &["cms-3"]));
        let ids: Vec<_> = global.entries.keys().cloned().collect();
        assert_eq!(ids, vec!["cms-2", "cms-3"]);
        assert_eq!(global.pages["/a/"].entries, vec!["cms-3"]);
    }

    #[test]
    fn test_changed_files() {
        let mut previous = ManifestMetadata::default();
        previous.source_file_hashes.insert("a.astro".into(), "1".into());
        previous.source_file_hashes.insert("b.astro".into(), "2".into());
        previous.source_file_hashes.insert("gone.astro".into(), "3".into());
        let mut current = ManifestMetadata::default();
        current.source_file_hashes.insert("a.astro".into(), "1".into());
        current.source_file_hashes.insert("b.astro".into(), "changed".into());
        current.source_file_hashes.insert("new.astro".into(), "4".into());
        assert_eq!(
            current.changed_files(&previous),
            vec!["b.astro", "gone.astro", "new.astro"]
        );
    }

    #[test]
    fn test_refresh_metadata_collects_colors() {
        let mut global = GlobalManifest::default();
        let mut p = page("/", &["cms-0"]);
        p.entries[0].colors = Some(ColorClasses {
            text: Some("text-red-500".into()),
            background: Some("bg-white".into()),
        });
        global.merge_page(&p);
        global.refresh_metadata().unwrap();
        assert_eq!(
            global.available_colors,
            Some(vec!["bg-white".to_string(), "text-red-500".to_string()])
        );
        assert_eq!(global.metadata.version, MANIFEST_VERSION);
        assert_eq!(global.metadata.content_hash.len(), 64);
    }

    #[test]
    fn test_page_path() {
        let writer = ManifestWriter::new("/out");
        assert_eq!(writer.page_path("/"), PathBuf::from("/out/pages/index.json"));
        assert_eq!(
            writer.page_path("/blog/post/"),
            PathBuf::from("/out/pages/blog/post.json")
        );
        assert_eq!(
            writer.page_path("/../etc/"),
            PathBuf::from("/out/pages/etc.json")
        );
    }

    #[tokio::test]
    async fn test_write_page_and_merge() {
        let dir = TempDir::new().unwrap();
        let writer = ManifestWriter::new(dir.path());
        let path = writer.write_page(&page("/about/", &["cms-0"])).await.unwrap();
        let written: PageManifest =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.entries.len(), 1);

        let extras = GlobalExtras::default();
        writer.merge_into_global(&page("/about/", &["cms-0"]), &extras).await.unwrap();
        let global = writer
            .merge_into_global(&page("/", &["cms-1"]), &extras)
            .await
            .unwrap();
        assert_eq!(global.entries.len(), 2);
        let reread = writer.read_global().await.unwrap();
        assert_eq!(reread.entries.len(), 2);
        assert_eq!(reread.metadata.content_hash, global.metadata.content_hash);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_merges_do_not_lose_pages() {
        let dir = TempDir::new().unwrap();
        let writer = ManifestWriter::new(dir.path());
        let mut tasks = Vec::new();
        for i in 0..8 {
            let writer = writer.clone();
            tasks.push(tokio::spawn(async move {
                let id = format!("cms-{i}");
                let p = page(&format!("/p{i}/"), &[id.as_str()]);
                writer.merge_into_global(&p, &GlobalExtras::default()).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        let global = writer.read_global().await.unwrap();
        assert_eq!(global.entries.len(), 8);
        assert_eq!(global.pages.len(), 8);
    }
}
