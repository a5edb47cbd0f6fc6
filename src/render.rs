//! Page rendering.
//!
//! Each page is rendered by its own [`Tera`] instance holding:
//!
//! - every shared template: files directly in the template root named
//!   `_*.html` (layouts and partials), registered under their file name;
//! - the page template, registered under its configured relative path.
//!
//! When a layout applies (the page's own `layout`, else the global one) the
//! page is rendered as a child of it: the page fills the layout's
//! `{% block content %}`. Without a layout the page renders on its own.
//!
//! Values are HTML-escaped in every template, whatever its file name: only
//! `& < > " '` are replaced, so paths and URLs keep their slashes. The `raw`,
//! `raw_css`, `raw_js` and `raw_url` filters mark a trusted value as safe, and
//! `markdown` renders CommonMark to (trusted) HTML. Referencing an undefined
//! variable fails the page.
//!
//! ## Template data
//!
//! ```text
//! global.*   literal [global.data] merged with fetched [global.fetch]
//! page.*     literal [pages.data] merged with fetched [pages.fetch]
//! static.*   "css/style.css" -> { path, size } for every static file
//! ```

use crate::cancel::Interrupted;
use crate::config::{DataMap, PageConfig};
use crate::fetch::FetchError;
use crate::paths::{contained_join, to_slash};
use crate::pattern;
use pulldown_cmark::{Options, Parser, html};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tera::{Context, Filter, Tera, Value};
use thiserror::Error;

const SHARED_TEMPLATES: &str = "_*.html";

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("{output}: output path escapes the output directory")]
    OutsideOutput { output: String },
    #[error("{output}: template {template} is outside the template directory")]
    OutsideTemplates { output: String, template: String },
    #[error("{output}: read template {}: {source}", path.display())]
    ReadTemplate {
        output: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{output}: {}", error_chain(source))]
    Template {
        output: String,
        #[source]
        source: tera::Error,
    },
    #[error("{output}: write {}: {source}", path.display())]
    Write {
        output: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{output}: {source}")]
    Fetch {
        output: String,
        #[source]
        source: FetchError,
    },
    #[error("{0}")]
    Interrupted(#[from] Interrupted),
}

/// Static files by forward-slash relative path.
pub type StaticInventory = BTreeMap<String, StaticFileInfo>;

/// Everything a page template can see. Scopes are borrowed so the global
/// scope and the static inventory are shared by every page of a build.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TemplateData<'a> {
    pub global: &'a DataMap,
    pub page: &'a DataMap,
    #[serde(rename = "static")]
    pub assets: &'a StaticInventory,
}

/// One static file as exposed to templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaticFileInfo {
    /// Forward-slash path relative to the static root, e.g. `css/style.css`.
    pub path: String,
    pub size: u64,
}

/// The layout a page renders into, if any.
pub fn select_layout<'a>(page: &'a PageConfig, global_layout: &'a str) -> Option<&'a str> {
    [page.layout.as_str(), global_layout]
        .into_iter()
        .find(|layout| !layout.is_empty())
}

/// Render `page` and write it below `output_root`. Returns the written path.
pub fn render_page(
    template_root: &Path,
    page: &PageConfig,
    global_layout: &str,
    data: &TemplateData<'_>,
    output_root: &Path,
) -> Result<PathBuf, RenderError> {
    let output = page.output.clone();
    let dest = contained_join(output_root, &page.output).ok_or_else(|| {
        RenderError::OutsideOutput {
            output: output.clone(),
        }
    })?;

    let html = render_to_string(template_root, page, global_layout, data)?;

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|source| RenderError::Write {
            output: output.clone(),
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(&dest, html).map_err(|source| RenderError::Write {
        output,
        path: dest.clone(),
        source,
    })?;
    Ok(dest)
}

/// Render `page` without touching the output tree.
pub fn render_to_string(
    template_root: &Path,
    page: &PageConfig,
    global_layout: &str,
    data: &TemplateData<'_>,
) -> Result<String, RenderError> {
    let output = &page.output;
    let template_error = |source| RenderError::Template {
        output: output.clone(),
        source,
    };

    let page_path = contained_join(template_root, &page.template).ok_or_else(|| {
        RenderError::OutsideTemplates {
            output: output.clone(),
            template: page.template.clone(),
        }
    })?;
    let page_name = page_path
        .strip_prefix(template_root)
        .map(to_slash)
        .unwrap_or_else(|_| page.template.clone());
    let page_source = fs::read_to_string(&page_path).map_err(|source| RenderError::ReadTemplate {
        output: output.clone(),
        path: page_path.clone(),
        source,
    })?;

    let mut templates = shared_templates(template_root).map_err(|(path, source)| {
        RenderError::ReadTemplate {
            output: output.clone(),
            path,
            source,
        }
    })?;
    templates.retain(|(name, _)| *name != page_name);

    let page_source = match select_layout(page, global_layout) {
        Some(layout) if !extends_parent(&page_source) => {
            format!("{{% extends \"{layout}\" %}}\n{page_source}")
        }
        _ => page_source,
    };
    templates.push((page_name.clone(), page_source));

    let mut tera = new_engine();
    tera.add_raw_templates(templates).map_err(template_error)?;
    let context = Context::from_serialize(data).map_err(template_error)?;
    tera.render(&page_name, &context).map_err(template_error)
}

/// Shared templates directly in `template_root`, sorted by name.
fn shared_templates(template_root: &Path) -> Result<Vec<(String, String)>, (PathBuf, std::io::Error)> {
    let entries = fs::read_dir(template_root).map_err(|e| (template_root.to_path_buf(), e))?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| (template_root.to_path_buf(), e))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if pattern::matches(SHARED_TEMPLATES, &name) && path.is_file() {
            paths.push((name, path));
        }
    }
    paths.sort();

    paths
        .into_iter()
        .map(|(name, path)| {
            fs::read_to_string(&path)
                .map(|source| (name, source))
                .map_err(|e| (path, e))
        })
        .collect()
}

fn extends_parent(source: &str) -> bool {
    let trimmed = source.trim_start();
    ["{% extends", "{%- extends"]
        .iter()
        .any(|prefix| trimmed.starts_with(prefix))
}

fn new_engine() -> Tera {
    let mut tera = Tera::default();
    // An empty suffix matches every template name.
    tera.autoescape_on(vec![""]);
    tera.set_escape_fn(escape_html);
    for name in ["raw", "raw_css", "raw_js", "raw_url"] {
        tera.register_filter(name, Raw);
    }
    tera.register_filter("markdown", Markdown);
    tera
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Marks a value as trusted so autoescaping leaves it alone.
struct Raw;

impl Filter for Raw {
    fn filter(&self, value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
        Ok(value.clone())
    }

    fn is_safe(&self) -> bool {
        true
    }
}

/// CommonMark to HTML.
struct Markdown;

impl Filter for Markdown {
    fn filter(&self, value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
        let source = value
            .as_str()
            .ok_or_else(|| tera::Error::msg("markdown filter expects a string"))?;
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        let mut out = String::new();
        html::push_html(&mut out, Parser::new_ext(source, options));
        Ok(Value::String(out))
    }

    fn is_safe(&self) -> bool {
        true
    }
}

/// Tera reports the useful detail in nested sources; flatten them.
fn error_chain(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::write_file;
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        tmp: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                tmp: TempDir::new().unwrap(),
            }
        }

        fn templates(&self) -> PathBuf {
            self.tmp.path().join("templates")
        }

        fn out(&self) -> PathBuf {
            self.tmp.path().join("public")
        }

        fn template(&self, name: &str, body: &str) -> &Self {
            write_file(&self.templates().join(name), body);
            self
        }

        fn render(&self, page: &PageConfig, layout: &str, scopes: &Scopes) -> Result<String, RenderError> {
            let path = render_page(&self.templates(), page, layout, &scopes.view(), &self.out())?;
            Ok(fs::read_to_string(path).unwrap())
        }
    }

    fn page(template: &str, output: &str) -> PageConfig {
        PageConfig {
            template: template.into(),
            output: output.into(),
            ..PageConfig::default()
        }
    }

    #[derive(Default)]
    struct Scopes {
        global: DataMap,
        page: DataMap,
        assets: StaticInventory,
    }

    impl Scopes {
        fn view(&self) -> TemplateData<'_> {
            TemplateData {
                global: &self.global,
                page: &self.page,
                assets: &self.assets,
            }
        }
    }

    fn data(global: Value, page: Value) -> Scopes {
        Scopes {
            global: serde_json::from_value(global).unwrap(),
            page: serde_json::from_value(page).unwrap(),
            assets: StaticInventory::new(),
        }
    }

    #[test]
    fn renders_page_without_layout() {
        let fx = Fixture::new();
        fx.template("index.html", "<h1>{{ page.greeting }}</h1><p>{{ global.site_name }}</p>");
        let html = fx
            .render(
                &page("index.html", "index.html"),
                "",
                &data(json!({"site_name": "Test"}), json!({"greeting": "Hello World"})),
            )
            .unwrap();
        assert_eq!(html, "<h1>Hello World</h1><p>Test</p>");
    }

    #[test]
    fn global_layout_wraps_content_block() {
        let fx = Fixture::new();
        fx.template(
            "_layout.html",
            "<html><title>{{ page.title }}</title>{% block content %}{% endblock content %}</html>",
        )
        .template("index.html", "{% block content %}<main>body</main>{% endblock content %}");
        let html = fx
            .render(
                &page("index.html", "index.html"),
                "_layout.html",
                &data(json!({}), json!({"title": "Home"})),
            )
            .unwrap();
        assert_eq!(html, "<html><title>Home</title><main>body</main></html>");
    }

    #[test]
    fn page_layout_overrides_global() {
        let fx = Fixture::new();
        fx.template("_a.html", "A[{% block content %}{% endblock content %}]")
            .template("_b.html", "B[{% block content %}{% endblock content %}]")
            .template("p.html", "{% block content %}x{% endblock content %}");
        let mut p = page("p.html", "p.html");
        p.layout = "_b.html".into();
        let html = fx.render(&p, "_a.html", &Scopes::default()).unwrap();
        assert_eq!(html, "B[x]");
    }

    #[test]
    fn layout_selection_order() {
        let mut p = page("p.html", "p.html");
        assert_eq!(select_layout(&p, ""), None);
        assert_eq!(select_layout(&p, "_g.html"), Some("_g.html"));
        p.layout = "_own.html".into();
        assert_eq!(select_layout(&p, "_g.html"), Some("_own.html"));
    }

    #[test]
    fn partials_are_available() {
        let fx = Fixture::new();
        fx.template("_nav.html", "<nav>{{ global.site_name }}</nav>")
            .template("index.html", "{% include \"_nav.html\" %}<p>hi</p>");
        let html = fx
            .render(
                &page("index.html", "index.html"),
                "",
                &data(json!({"site_name": "S"}), json!({})),
            )
            .unwrap();
        assert_eq!(html, "<nav>S</nav><p>hi</p>");
    }

    #[test]
    fn values_are_escaped_by_default() {
        let fx = Fixture::new();
        fx.template("index.html", "{{ page.snippet }}|{{ page.snippet | raw }}");
        let html = fx
            .render(
                &page("index.html", "index.html"),
                "",
                &data(json!({}), json!({"snippet": "<b>&</b>"})),
            )
            .unwrap();
        assert_eq!(html, "&lt;b&gt;&amp;&lt;/b&gt;|<b>&</b>");
    }

    #[test]
    fn quotes_are_escaped_and_slashes_kept() {
        let fx = Fixture::new();
        fx.template("index.html", "<a title=\"{{ page.title }}\" href=\"{{ page.href }}\">");
        let html = fx
            .render(
                &page("index.html", "index.html"),
                "",
                &data(json!({}), json!({"title": "Tom's \"pick\"", "href": "/a/b"})),
            )
            .unwrap();
        assert_eq!(html, "<a title=\"Tom&#39;s &#34;pick&#34;\" href=\"/a/b\">");
    }

    #[test]
    fn non_html_template_names_are_escaped() {
        let fx = Fixture::new();
        fx.template("_layout.html", "<html>{% block content %}{% endblock content %}</html>")
            .template("home.tmpl", "{% block content %}{{ page.x }}{% endblock content %}")
            .template("feed.rss", "<title>{{ page.x }}</title>");
        let scopes = data(json!({}), json!({"x": "<script>alert(1)</script>"}));

        let html = fx
            .render(&page("home.tmpl", "index.html"), "_layout.html", &scopes)
            .unwrap();
        assert_eq!(html, "<html>&lt;script&gt;alert(1)&lt;/script&gt;</html>");

        let rss = fx.render(&page("feed.rss", "feed.xml"), "", &scopes).unwrap();
        assert_eq!(rss, "<title>&lt;script&gt;alert(1)&lt;/script&gt;</title>");
    }

    #[test]
    fn raw_variants_skip_escaping() {
        let fx = Fixture::new();
        fx.template(
            "index.html",
            "<style>{{ page.css | raw_css }}</style><script>{{ page.js | raw_js }}</script><a href=\"{{ page.url | raw_url }}\">",
        );
        let html = fx
            .render(
                &page("index.html", "index.html"),
                "",
                &data(
                    json!({}),
                    json!({"css": "a > b {}", "js": "if (a < b) {}", "url": "/a?b=1&c=2"}),
                ),
            )
            .unwrap();
        assert_eq!(
            html,
            "<style>a > b {}</style><script>if (a < b) {}</script><a href=\"/a?b=1&c=2\">"
        );
    }

    #[test]
    fn markdown_filter_renders_html() {
        let fx = Fixture::new();
        fx.template("index.html", "{{ page.body | markdown }}");
        let html = fx
            .render(
                &page("index.html", "index.html"),
                "",
                &data(json!({}), json!({"body": "# Title\n\nSome *text*."})),
            )
            .unwrap();
        assert!(html.contains("<h1>Title</h1>"), "{html}");
        assert!(html.contains("<em>text</em>"), "{html}");
    }

    #[test]
    fn static_scope_is_exposed() {
        let fx = Fixture::new();
        fx.template("index.html", "{{ static[\"css/site.css\"].path }} {{ static[\"css/site.css\"].size }}");
        let mut d = Scopes::default();
        d.assets.insert(
            "css/site.css".into(),
            StaticFileInfo {
                path: "css/site.css".into(),
                size: 12,
            },
        );
        let html = fx.render(&page("index.html", "index.html"), "", &d).unwrap();
        assert_eq!(html, "css/site.css 12");
    }

    #[test]
    fn nested_output_creates_directories() {
        let fx = Fixture::new();
        fx.template("about.html", "about");
        let path = render_page(
            &fx.templates(),
            &page("about.html", "about/team/index.html"),
            "",
            &Scopes::default().view(),
            &fx.out(),
        )
        .unwrap();
        assert_eq!(path, fx.out().join("about/team/index.html"));
        assert_eq!(fs::read_to_string(path).unwrap(), "about");
    }

    #[test]
    fn nested_page_template_is_found() {
        let fx = Fixture::new();
        fx.template("blog/post.html", "post");
        let html = fx
            .render(&page("blog/post.html", "blog/index.html"), "", &Scopes::default())
            .unwrap();
        assert_eq!(html, "post");
    }

    #[test]
    fn undefined_variable_fails_with_output_path() {
        let fx = Fixture::new();
        fx.template("index.html", "{{ page.missing }}");
        let err = fx
            .render(&page("index.html", "blog/index.html"), "", &Scopes::default())
            .unwrap_err();
        assert!(matches!(err, RenderError::Template { .. }));
        assert!(err.to_string().starts_with("blog/index.html: "), "{err}");
        assert!(!fx.out().join("blog/index.html").exists());
    }

    #[test]
    fn syntax_error_fails() {
        let fx = Fixture::new();
        fx.template("index.html", "{% if %}");
        let err = fx
            .render(&page("index.html", "index.html"), "", &Scopes::default())
            .unwrap_err();
        assert!(matches!(err, RenderError::Template { .. }));
    }

    #[test]
    fn missing_layout_fails() {
        let fx = Fixture::new();
        fx.template("index.html", "{% block content %}x{% endblock content %}");
        let err = fx
            .render(&page("index.html", "index.html"), "_nope.html", &Scopes::default())
            .unwrap_err();
        assert!(err.to_string().contains("_nope.html"), "{err}");
    }

    #[test]
    fn missing_page_template_fails() {
        let fx = Fixture::new();
        fx.template("_layout.html", "");
        let err = fx
            .render(&page("ghost.html", "index.html"), "", &Scopes::default())
            .unwrap_err();
        assert!(matches!(err, RenderError::ReadTemplate { .. }));
    }

    #[test]
    fn escaping_output_is_rejected() {
        let fx = Fixture::new();
        fx.template("index.html", "x");
        let err = fx
            .render(&page("index.html", "../escape.html"), "", &Scopes::default())
            .unwrap_err();
        assert!(matches!(err, RenderError::OutsideOutput { .. }));
        assert!(!fx.tmp.path().join("escape.html").exists());
    }

    #[test]
    fn non_shared_root_files_are_not_loaded() {
        let fx = Fixture::new();
        // Broken syntax in a non-shared template must not affect other pages.
        fx.template("broken.html", "{% if %}")
            .template("index.html", "ok");
        let html = fx
            .render(&page("index.html", "index.html"), "", &Scopes::default())
            .unwrap();
        assert_eq!(html, "ok");
    }
}
