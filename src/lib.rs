//! # cms-locator
//!
//! Source-location resolution and content marking for a visual CMS over
//! component templates (frontmatter script + markup).
//!
//! ## Locating
//!
//! [`SourceLocator`] answers "where in the source was this rendered value
//! defined?":
//!
//! - `resolve_source_location(text, tag)`: text rendered inside a `tag`
//!   element. Literal markup text reports `static`, a local variable reports
//!   `variable` with the declaration line, a value passed in through a prop
//!   reports `prop` at the call site.
//! - `resolve_attribute_source_location(expression, value, file)`: the value
//!   of a dynamic attribute such as `href={item.href}`.
//! - `resolve_image_source_location(src)`.
//!
//! Resolution follows props through component call sites (plain, expression
//! and spread attributes), imports of script/JSON modules, and `.map` loops,
//! bounded by `maxResolutionDepth`. Every query degrades to `None`; nothing
//! in a build is fatal.
//!
//! ## Marking
//!
//! [`mark_page`] stamps rendered markup with marker ids, component-root ids
//! and decorative-span flags, and returns manifest entries whose text encodes
//! nested editable regions as `{{cms:<id>}}` placeholders. [`PageManifest`]
//! and [`GlobalManifest`] carry them to disk.
//!
//! ## Build lifecycle
//!
//! All caches live in a per-build [`BuildContext`] owned by the locator.
//! Call `reset()` at the start of each build.

#[cfg(feature = "napi")]
use napi_derive::napi;

pub mod ast;
pub mod cache;
pub mod collections;
pub mod config;
pub mod discovery;
pub mod error;
pub mod expr;
pub mod index;
pub mod locate;
pub mod lock;
pub mod manifest;
pub mod marker;
pub mod matcher;
pub mod model;
pub mod normalize;
pub mod parse;
pub mod provenance;
pub mod resolver;
pub mod styling;
pub mod symbols;
pub mod visitor;

#[cfg(test)]
mod locate_tests;

pub use cache::BuildContext;
pub use config::{LocatorConfig, MarkerOptions};
pub use error::{LocatorError, Result};
pub use locate::SourceLocator;
pub use manifest::{
    stable_id, ComponentInstance, GlobalExtras, GlobalManifest, ManifestEntry, ManifestWriter,
    PageManifest,
};
pub use marker::{mark_page, IdGenerator, MarkedPage};
pub use model::{SourceLocation, SourceType};
pub use normalize::normalize_text;
pub use parse::parse_template;

// ═══════════════════════════════════════════════════════════════════════════════
// NODE BRIDGE
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(feature = "napi")]
fn to_napi_error(e: impl std::fmt::Display) -> napi::Error {
    napi::Error::from_reason(e.to_string())
}

/// Build-scoped locator handle for the Node build pipeline.
#[cfg(feature = "napi")]
#[napi(js_name = "SourceLocator")]
pub struct NativeSourceLocator {
    inner: SourceLocator,
    ids: IdGenerator,
}

#[cfg(feature = "napi")]
#[napi]
impl NativeSourceLocator {
    #[napi(constructor)]
    pub fn new(config: serde_json::Value) -> napi::Result<Self> {
        let config: LocatorConfig = serde_json::from_value(config).map_err(to_napi_error)?;
        let ids = IdGenerator::new(config.marker.id_prefix.clone());
        Ok(Self {
            inner: SourceLocator::new(config),
            ids,
        })
    }

    /// Drop every cache; call at the start of each build.
    #[napi]
    pub fn reset(&mut self) {
        self.inner.reset();
        self.ids = IdGenerator::new(self.inner.config().marker.id_prefix.clone());
    }

    #[napi]
    pub fn resolve_source_location(
        &mut self,
        text: String,
        tag: String,
    ) -> napi::Result<Option<serde_json::Value>> {
        self.inner
            .resolve_source_location(&text, &tag)
            .map(serde_json::to_value)
            .transpose()
            .map_err(to_napi_error)
    }

    #[napi]
    pub fn resolve_attribute_source_location(
        &mut self,
        expression: String,
        resolved_value: String,
        source_file: String,
    ) -> napi::Result<Option<serde_json::Value>> {
        self.inner
            .resolve_attribute_source_location(
                &expression,
                &resolved_value,
                std::path::Path::new(&source_file),
            )
            .map(serde_json::to_value)
            .transpose()
            .map_err(to_napi_error)
    }

    #[napi]
    pub fn resolve_image_source_location(
        &mut self,
        src: String,
    ) -> napi::Result<Option<serde_json::Value>> {
        self.inner
            .resolve_image_source_location(&src)
            .map(serde_json::to_value)
            .transpose()
            .map_err(to_napi_error)
    }

    /// Mark one rendered page and return `{ html, manifest }`.
    #[napi]
    pub fn mark_page(&mut self, html: String, page: String) -> napi::Result<serde_json::Value> {
        let options = self.inner.config().marker.clone();
        let marked = mark_page(&html, &options, &mut self.ids);
        let html = marked.html.clone();
        let mut manifest = PageManifest::from_marked(page, marked);
        let collections = self.inner.collections();
        manifest.enrich(&mut self.inner, &collections);
        Ok(serde_json::json!({
            "html": html,
            "manifest": serde_json::to_value(&manifest).map_err(to_napi_error)?,
        }))
    }
}
