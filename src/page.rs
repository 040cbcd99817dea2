//! HTML page shown for `GET /{image-name}`.

use anyhow::Result;

const DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>{{image_name}}</title>
    <style>
        body { background: #222; color: #ddd; font-family: sans-serif; text-align: center; }
        img { max-width: 95vw; max-height: 85vh; margin-top: 1em; }
        .info { margin-top: 0.5em; font-size: 0.9em; color: #999; }
    </style>
</head>
<body>
    <a href="{{image_addr}}"><img src="{{image_addr}}" alt="{{image_name}}"></a>
    <div class="info">
        #{{index}} uploaded by {{uploader}} on {{date}} using {{client}}
    </div>
</body>
</html>
"#;

/// Values substituted into the page template. All of them are escaped.
#[derive(Debug)]
pub struct ImagePage<'a> {
    pub image_name: &'a str,
    pub image_addr: &'a str,
    pub uploader: &'a str,
    pub date: &'a str,
    pub client: &'a str,
    pub index: i64,
}

/// Template with `{{image_name}}`, `{{image_addr}}`, `{{uploader}}`,
/// `{{date}}`, `{{client}}` and `{{index}}` placeholders.
#[derive(Debug, Clone)]
pub struct PageTemplate {
    source: String,
}

impl Default for PageTemplate {
    fn default() -> Self {
        PageTemplate {
            source: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl PageTemplate {
    pub fn new(source: impl Into<String>) -> Self {
        PageTemplate {
            source: source.into(),
        }
    }

    /// Load a template file, or the built-in template when no path is set.
    pub fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) => {
                let source = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("Failed to read image template {}: {}", path, e))?;
                tracing::info!("Loaded image page template from {}", path);
                Ok(PageTemplate::new(source))
            }
            None => Ok(PageTemplate::default()),
        }
    }

    pub fn render(&self, page: &ImagePage<'_>) -> String {
        self.source
            .replace("{{image_name}}", &escape_html(page.image_name))
            .replace("{{image_addr}}", &escape_html(page.image_addr))
            .replace("{{uploader}}", &escape_html(page.uploader))
            .replace("{{date}}", &escape_html(page.date))
            .replace("{{client}}", &escape_html(page.client))
            .replace("{{index}}", &page.index.to_string())
    }
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Format a unix timestamp with a chrono format string.
pub fn format_date(timestamp: i64, format: &str) -> String {
    match chrono::DateTime::from_timestamp(timestamp, 0) {
        Some(date) => date.format(format).to_string(),
        None => timestamp.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn page() -> ImagePage<'static> {
        ImagePage {
            image_name: "abcde",
            image_addr: "http://localhost/abcde.png",
            uploader: "alice",
            date: "2016-01-01",
            client: "<script>",
            index: 7,
        }
    }

    #[test]
    fn renders_and_escapes() {
        let html = PageTemplate::default().render(&page());
        assert!(html.contains(r#"<img src="http://localhost/abcde.png""#));
        assert!(html.contains("#7 uploaded by alice on 2016-01-01 using &lt;script&gt;"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn loads_custom_template() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{{{image_name}}}} by {{{{uploader}}}}").unwrap();

        let template = PageTemplate::load(file.path().to_str()).unwrap();
        assert_eq!(template.render(&page()), "abcde by alice");

        assert!(PageTemplate::load(Some("/definitely/not/here.html")).is_err());
    }

    #[test]
    fn formats_dates() {
        assert_eq!(format_date(0, "%Y-%m-%d %H:%M:%S"), "1970-01-01 00:00:00");
        assert_eq!(format_date(1_451_606_400, "%d.%m.%Y"), "01.01.2016");
    }
}
