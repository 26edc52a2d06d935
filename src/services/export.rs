//! Printable wiki export
//!
//! Writes one standalone HTML document per published wiki page, plus an
//! `index.html` linking them, into an output directory. The documents carry
//! a print stylesheet so they can be saved as PDF from a browser.

use crate::models::WikiPageView;
use crate::services::content::ContentServiceError;
use crate::services::wiki::WikiService;
use anyhow::Context;
use std::path::{Path, PathBuf};

const PRINT_CSS: &str = r#"
body { font-family: Georgia, serif; max-width: 46rem; margin: 2rem auto; line-height: 1.5; color: #111; }
h1, h2, h3 { font-family: Helvetica, Arial, sans-serif; }
pre, code { font-family: Menlo, Consolas, monospace; font-size: 0.9em; }
pre { background: #f4f4f4; padding: 0.75rem; overflow-x: auto; }
table { border-collapse: collapse; }
td, th { border: 1px solid #999; padding: 0.25rem 0.5rem; }
footer { margin-top: 3rem; font-size: 0.8em; color: #555; }
@media print { a { color: inherit; text-decoration: none; } pre { white-space: pre-wrap; } }
"#;

/// Result of an export run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub pages: usize,
    /// Pages served in another language because the requested one is missing
    pub fallbacks: usize,
    pub index: PathBuf,
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn document(language: &str, title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"{lang}\">\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n<style>{PRINT_CSS}</style>\n</head>\n<body>\n{body}\n</body>\n</html>\n",
        lang = escape_html(language),
        title = escape_html(title),
    )
}

/// Standalone document for one page
pub fn render_page(view: &WikiPageView) -> String {
    let t = &view.translation;
    let body = format!(
        "<article>\n<h1>{}</h1>\n{}\n</article>\n<footer>Last updated {}</footer>",
        escape_html(&t.title),
        t.content_html,
        t.updated_at.format("%Y-%m-%d"),
    );
    document(&t.language, &t.title, &body)
}

/// Table of contents linking every exported page
pub fn render_index(language: &str, views: &[WikiPageView]) -> String {
    let items: String = views
        .iter()
        .map(|v| {
            format!(
                "<li><a href=\"{}.html\">{}</a></li>\n",
                escape_html(&v.page.slug),
                escape_html(&v.translation.title)
            )
        })
        .collect();
    document(language, "Wiki", &format!("<h1>Wiki</h1>\n<ul>\n{items}</ul>"))
}

/// Export every published page in `language` into `output`
pub async fn export_wiki(wiki: &WikiService, language: &str, output: &Path) -> Result<ExportSummary, ContentServiceError> {
    let views = wiki.published_pages(language).await?;
    tokio::fs::create_dir_all(output)
        .await
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let mut fallbacks = 0;
    for view in &views {
        let path = output.join(format!("{}.html", view.page.slug));
        tokio::fs::write(&path, render_page(view))
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        if view.is_fallback {
            fallbacks += 1;
        }
    }

    let index = output.join("index.html");
    tokio::fs::write(&index, render_index(language, &views))
        .await
        .with_context(|| format!("Failed to write {}", index.display()))?;

    tracing::info!(pages = views.len(), fallbacks, output = %output.display(), "Wiki exported");
    Ok(ExportSummary {
        pages: views.len(),
        fallbacks,
        index,
    })
}
