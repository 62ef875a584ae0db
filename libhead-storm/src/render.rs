use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Turns a probe URL into the fragment sent to clients.
pub type Renderer = Arc<dyn Fn(&str) -> String + Send + Sync>;

pub const LINK_PLACEHOLDER: &str = "{link}";

const DEFAULT_TEMPLATE: &str = r#"<a href="{link}" target="_blank" rel="noopener">{link}</a>"#;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Failed to read template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Template {0} has no {{link}} placeholder")]
    MissingPlaceholder(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTemplate {
    template: String,
}

impl LinkTemplate {
    pub fn builtin() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }

    pub fn parse(name: &str, template: &str) -> Result<Self, TemplateError> {
        if !template.contains(LINK_PLACEHOLDER) {
            return Err(TemplateError::MissingPlaceholder(name.to_string()));
        }
        Ok(Self {
            template: template.trim_end().to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        let content = std::fs::read_to_string(path).map_err(|source| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&path.display().to_string(), &content)
    }

    pub fn render(&self, url: &str) -> String {
        self.template.replace(LINK_PLACEHOLDER, &escape_html(url))
    }

    pub fn into_renderer(self) -> Renderer {
        Arc::new(move |url: &str| self.render(url))
    }
}

impl Default for LinkTemplate {
    fn default() -> Self {
        Self::builtin()
    }
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c if c.is_control() => {
                let _ = write!(escaped, "&#{};", c as u32);
            }
            c => escaped.push(c),
        }
    }
    escaped
}
