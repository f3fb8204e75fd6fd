//! Content collections.
//!
//! Every directory directly under the content directory is a collection;
//! every Markdown, MDX, JSON or YAML file below it is an entry. Markdown
//! entries contribute their YAML frontmatter as fields, data files their
//! top-level object.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::config::LocatorConfig;
use crate::error::{LocatorError, Result};

const ENTRY_EXTENSIONS: &[&str] = &["md", "mdx", "json", "yaml", "yml"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionEntry {
    pub slug: String,
    /// Project-relative path.
    pub file: String,
    pub fields: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub name: String,
    pub entries: Vec<CollectionEntry>,
}

/// Scan the content directory. A missing directory means no collections;
/// entries that fail to parse are skipped.
pub fn scan_collections(config: &LocatorConfig) -> Vec<Collection> {
    let root = config.content_path();
    let Ok(dirs) = fs::read_dir(&root) else {
        return Vec::new();
    };

    let mut collection_dirs: Vec<_> = dirs
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    collection_dirs.sort();

    collection_dirs
        .into_iter()
        .filter_map(|dir| {
            let name = dir.file_name()?.to_string_lossy().into_owned();
            let entries = scan_collection(config, &dir);
            Some(Collection { name, entries })
        })
        .collect()
}

fn scan_collection(config: &LocatorConfig, dir: &Path) -> Vec<CollectionEntry> {
    let mut files: Vec<_> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| ENTRY_EXTENSIONS.contains(&e))
        })
        .collect();
    files.sort();

    let mut entries = Vec::new();
    for path in files {
        match read_fields(&path) {
            Ok(fields) => entries.push(CollectionEntry {
                slug: entry_slug(dir, &path),
                file: config.relative_path(&path),
                fields,
            }),
            Err(e) => debug!(file = %path.display(), error = %e, "skipping collection entry"),
        }
    }
    entries
}

/// Path below the collection directory without its extension.
fn entry_slug(collection_dir: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(collection_dir).unwrap_or(file);
    relative
        .with_extension("")
        .to_string_lossy()
        .replace('\\', "/")
}

fn read_fields(path: &Path) -> Result<BTreeMap<String, serde_json::Value>> {
    let source = fs::read_to_string(path).map_err(|e| LocatorError::io(path, e))?;
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    let value: serde_json::Value = match extension {
        "json" => serde_json::from_str(&source)?,
        "yaml" | "yml" => yaml_to_json(&source)?,
        _ => match markdown_frontmatter(&source) {
            Some(yaml) => yaml_to_json(yaml)?,
            None => serde_json::Value::Null,
        },
    };

    Ok(match value {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        _ => BTreeMap::new(),
    })
}

fn yaml_to_json(source: &str) -> Result<serde_json::Value> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(source)?;
    Ok(serde_json::to_value(yaml)?)
}

/// YAML between the leading `---` fences of a Markdown file.
fn markdown_frontmatter(source: &str) -> Option<&str> {
    let rest = source.strip_prefix("---")?;
    let rest = rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n'))?;
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return Some(&rest[..offset]);
        }
        offset += line.len();
    }
    None
}

/// `(collection, slug)` of the entry stored in `file` (project-relative).
pub fn collection_for<'c>(collections: &'c [Collection], file: &str) -> Option<(&'c str, &'c str)> {
    collections.iter().find_map(|collection| {
        collection
            .entries
            .iter()
            .find(|entry| entry.file == file)
            .map(|entry| (collection.name.as_str(), entry.slug.as_str()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project() -> (TempDir, LocatorConfig) {
        let dir = TempDir::new().unwrap();
        let blog = dir.path().join("src/content/blog");
        let authors = dir.path().join("src/content/authors");
        fs::create_dir_all(blog.join("2024")).unwrap();
        fs::create_dir_all(&authors).unwrap();
        fs::write(
            blog.join("first-post.md"),
            "---\ntitle: First Post\ntags:\n  - intro\ndraft: false\n---\n# Hello\n",
        )
        .unwrap();
        fs::write(blog.join("2024/recap.mdx"), "---\ntitle: Recap\n---\nBody\n").unwrap();
        fs::write(blog.join("broken.md"), "---\ntitle: [unclosed\n---\n").unwrap();
        fs::write(authors.join("ada.json"), r#"{"name": "Ada", "role": "Editor"}"#).unwrap();
        fs::write(authors.join("bob.yaml"), "name: Bob\n").unwrap();
        fs::write(authors.join("notes.txt"), "ignored").unwrap();
        let config = LocatorConfig::new(dir.path());
        (dir, config)
    }

    #[test]
    fn test_scan_collections() {
        let (_dir, config) = project();
        let collections = scan_collections(&config);
        let names: Vec<_> = collections.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["authors", "blog"]);

        let authors = &collections[0];
        assert_eq!(authors.entries.len(), 2);
        assert_eq!(authors.entries[0].slug, "ada");
        assert_eq!(authors.entries[0].fields["role"], "Editor");
        assert_eq!(authors.entries[1].fields["name"], "Bob");

        let blog = &collections[1];
        let slugs: Vec<_> = blog.entries.iter().map(|e| e.slug.as_str()).collect();
        assert_eq!(slugs, vec!["2024/recap", "first-post"]);
        assert_eq!(blog.entries[1].fields["title"], "First Post");
        assert_eq!(blog.entries[1].fields["tags"][0], "intro");
        assert_eq!(blog.entries[1].file, "src/content/blog/first-post.md");
    }

    #[test]
    fn test_collection_for_file() {
        let (_dir, config) = project();
        let collections = scan_collections(&config);
        assert_eq!(
            collection_for(&collections, "src/content/blog/first-post.md"),
            Some(("blog", "first-post"))
        );
        assert_eq!(collection_for(&collections, "src/pages/index.astro"), None);
    }

    #[test]
    fn test_missing_content_dir() {
        let dir = TempDir::new().unwrap();
        assert!(scan_collections(&LocatorConfig::new(dir.path())).is_empty());
    }

    #[test]
    fn test_markdown_without_frontmatter_has_no_fields() {
        assert_eq!(markdown_frontmatter("# Title\n"), None);
        assert_eq!(markdown_frontmatter("---\na: 1\n---\nx"), Some("a: 1\n"));
    }
}
