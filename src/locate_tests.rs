#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};

    use tempfile::TempDir;

    use crate::config::LocatorConfig;
    use crate::locate::SourceLocator;
    use crate::model::SourceType;

    const LAYOUT: &str = "---
const { title } = Astro.props;
---
<html>
  <head>
    <title>{title}</title>
  </head>
  <body><slot /></body>
</html>
";

    const INDEX: &str = "---
import Layout from '../layouts/Layout.astro';
import Card from '../components/Card.astro';
const label = 'Click Me';
const features = [
  { name: 'Fast builds', href: '/fast' },
  { name: 'Typed content', href: '/typed' },
];
---
<Layout title=\"My Page Title\">
  <h1>
    Hello World
  </h1>
  <button>{label}</button>
  <ul>
    {features.map((f) => <li><a href={f.href}>{f.name}</a></li>)}
  </ul>
  <Card heading=\"Card heading text\" />
  <img src=\"/images/hero.png\" alt=\"Hero\" />
</Layout>
";

    const CARD: &str = "---
const { heading } = Astro.props;
---
<article>
  <h2>{heading}</h2>
</article>
";

    fn write(root: &Path, rel: &str, body: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, body).unwrap();
        path
    }

    fn project() -> (TempDir, SourceLocator) {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/layouts/Layout.astro", LAYOUT);
        write(dir.path(), "src/pages/index.astro", INDEX);
        write(dir.path(), "src/components/Card.astro", CARD);
        let locator = SourceLocator::new(LocatorConfig::new(dir.path()));
        (dir, locator)
    }

    #[test]
    fn test_static_text_reports_text_node_line() {
        let (_dir, mut locator) = project();
        let loc = locator.resolve_source_location("Hello World", "h1").unwrap();
        assert_eq!(loc.file, "src/pages/index.astro");
        assert_eq!(loc.line, 12);
        assert_eq!(loc.source_type, SourceType::Static);
        assert_eq!(loc.snippet, "Hello World");
    }

    #[test]
    fn test_whitespace_in_query_is_normalized() {
        let (_dir, mut locator) = project();
        let loc = locator
            .resolve_source_location("\n   Hello\n     World  ", "H1")
            .unwrap();
        assert_eq!(loc.line, 12);
    }

    #[test]
    fn test_variable_reports_declaration_line() {
        let (_dir, mut locator) = project();
        let loc = locator.resolve_source_location("Click Me", "button").unwrap();
        assert_eq!(loc.source_type, SourceType::Variable);
        assert_eq!(loc.variable_name.as_deref(), Some("label"));
        assert_eq!(loc.line, 4);
        assert_eq!(loc.snippet, "const label = 'Click Me';");
    }

    #[test]
    fn test_prop_resolves_to_call_site_from_inside_component() {
        let (dir, mut locator) = project();
        let layout = dir.path().join("src/layouts/Layout.astro");
        let loc = locator
            .resolve_source_location_in(&layout, "My Page Title", "title")
            .unwrap();
        assert_eq!(loc.file, "src/pages/index.astro");
        assert_eq!(loc.line, 10);
        assert_eq!(loc.source_type, SourceType::Prop);
    }

    #[test]
    fn test_prop_resolves_through_index() {
        let (_dir, mut locator) = project();
        let loc = locator
            .resolve_source_location("My Page Title", "title")
            .unwrap();
        assert_eq!(loc.file, "src/pages/index.astro");
        assert_eq!(loc.line, 10);
        assert_eq!(loc.source_type, SourceType::Prop);

        let loc = locator
            .resolve_source_location("Card heading text", "h2")
            .unwrap();
        assert_eq!(loc.line, 18);
        assert_eq!(loc.source_type, SourceType::Prop);
    }

    #[test]
    fn test_loop_item_resolves_to_array_element() {
        let (_dir, mut locator) = project();
        let loc = locator.resolve_source_location("Typed content", "a").unwrap();
        assert_eq!(loc.source_type, SourceType::Variable);
        assert_eq!(loc.variable_name.as_deref(), Some("features[1].name"));
        assert_eq!(loc.line, 7);
    }

    #[test]
    fn test_attribute_value_inside_loop() {
        let (dir, mut locator) = project();
        let page = dir.path().join("src/pages/index.astro");
        let loc = locator
            .resolve_attribute_source_location("f.href", "/typed", &page)
            .unwrap();
        assert_eq!(loc.source_type, SourceType::Variable);
        assert_eq!(loc.variable_name.as_deref(), Some("features[1].href"));
        assert_eq!(loc.line, 7);

        assert!(locator
            .resolve_attribute_source_location("f.href", "/missing", &page)
            .is_none());
    }

    #[test]
    fn test_image_src() {
        let (_dir, mut locator) = project();
        let loc = locator
            .resolve_image_source_location("/images/hero.png")
            .unwrap();
        assert_eq!(loc.file, "src/pages/index.astro");
        assert_eq!(loc.line, 19);
        assert!(locator.resolve_image_source_location("/nope.png").is_none());
    }

    #[test]
    fn test_unknown_text_is_not_found() {
        let (_dir, mut locator) = project();
        assert!(locator
            .resolve_source_location("Nothing renders this sentence anywhere", "p")
            .is_none());
        assert!(locator.resolve_source_location("   ", "p").is_none());
    }

    #[test]
    fn test_component_call_site_props() {
        let (dir, mut locator) = project();
        let props = locator.component_props(
            &dir.path().join("src/pages/index.astro"),
            Path::new("src/components/Card.astro"),
            0,
        );
        assert_eq!(props.len(), 1);
        assert_eq!(props["heading"], "Card heading text");
        assert!(locator
            .component_props(
                &dir.path().join("src/pages/index.astro"),
                Path::new("src/components/Card.astro"),
                1,
            )
            .is_empty());
    }

    #[test]
    fn test_reset_picks_up_edits() {
        let (dir, mut locator) = project();
        assert_eq!(
            locator.resolve_source_location("Hello World", "h1").unwrap().line,
            12
        );
        let edited = INDEX.replace("<h1>", "<p>Intro paragraph</p>\n  <h1>");
        write(dir.path(), "src/pages/index.astro", &edited);

        locator.reset();
        assert_eq!(
            locator.resolve_source_location("Hello World", "h1").unwrap().line,
            13
        );
    }

    #[test]
    fn test_bracket_member_access_resolves() {
        let (dir, mut locator) = project();
        write(
            dir.path(),
            "src/pages/menu.astro",
            "---\nconst nav = {\n  title: 'Menu Title Text',\n};\n---\n<p>{nav['title']}</p>\n",
        );
        let loc = locator
            .resolve_source_location("Menu Title Text", "p")
            .unwrap();
        assert_eq!(loc.file, "src/pages/menu.astro");
        assert_eq!(loc.source_type, SourceType::Variable);
        assert_eq!(loc.variable_name.as_deref(), Some("nav.title"));
        assert_eq!(loc.line, 3);
    }

    #[test]
    fn test_five_levels_of_prop_drilling_resolve() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "src/components/Leaf.astro",
            "---\nconst { t } = Astro.props;\n---\n<p>{t}</p>\n",
        );
        let mut child = "Leaf".to_string();
        for level in 1..=5 {
            let name = format!("C{level}");
            write(
                dir.path(),
                &format!("src/components/{name}.astro"),
                &format!(
                    "---\nimport {child} from './{child}.astro';\nconst {{ t }} = Astro.props;\n---\n<{child} t={{t}} />\n"
                ),
            );
            child = name;
        }
        write(
            dir.path(),
            "src/pages/index.astro",
            "---\nimport C5 from '../components/C5.astro';\n---\n<C5 t=\"Deep value here\" />\n",
        );

        let mut locator = SourceLocator::new(LocatorConfig::new(dir.path()));
        let leaf = dir.path().join("src/components/Leaf.astro");
        let loc = locator
            .resolve_source_location_in(&leaf, "Deep value here", "p")
            .unwrap();
        assert_eq!(loc.file, "src/pages/index.astro");
        assert_eq!(loc.line, 4);
        assert_eq!(loc.source_type, SourceType::Prop);
    }

    #[test]
    fn test_malformed_template_is_skipped() {
        let (dir, mut locator) = project();
        write(dir.path(), "src/pages/broken.astro", "---\nconst a = 'x';\n<h1>Hello World</h1>\n");
        let loc = locator.resolve_source_location("Hello World", "h1").unwrap();
        assert_eq!(loc.file, "src/pages/index.astro");
    }
}
