//! Filter assembly for `/search`.

use crate::models::SearchForm;
use sqlx::{QueryBuilder, Sqlite};

/// Normalized search criteria. Every `Some` field becomes one condition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    pub format: Option<String>,
    pub adder: Option<String>,
    pub client: Option<String>,
    /// Inclusive upload time range in unix seconds.
    pub uploaded: Option<(i64, i64)>,
    /// Authenticated user whose hidden images may be listed too.
    pub viewer: Option<String>,
}

impl SearchFilter {
    /// Build a filter from a request form. Returns `None` when the form has no
    /// usable criteria. A one-sided time range is closed with `1` or `now`.
    pub fn from_form(form: &SearchForm, now: i64) -> Option<Self> {
        let uploaded = match (form.uploaded_after > 0, form.uploaded_before > 0) {
            (true, true) => Some((form.uploaded_after, form.uploaded_before)),
            (false, true) => Some((1, form.uploaded_before)),
            (true, false) => Some((form.uploaded_after, now)),
            (false, false) => None,
        };

        let filter = SearchFilter {
            format: non_empty(&form.image_format),
            adder: non_empty(&form.adder),
            client: non_empty(&form.client_name),
            uploaded,
            viewer: None,
        };

        if filter.format.is_none()
            && filter.adder.is_none()
            && filter.client.is_none()
            && filter.uploaded.is_none()
        {
            return None;
        }
        Some(filter)
    }

    pub fn with_viewer(mut self, viewer: impl Into<String>) -> Self {
        self.viewer = Some(viewer.into());
        self
    }

    /// Assemble the `SELECT` for this filter over the given column list.
    pub fn query(&self, columns: &str) -> QueryBuilder<'static, Sqlite> {
        let mut query = QueryBuilder::new(format!("SELECT {} FROM images WHERE ", columns));

        match &self.viewer {
            Some(viewer) => {
                query
                    .push("(hidden = 0 OR adder = ")
                    .push_bind(viewer.clone())
                    .push(")");
            }
            None => {
                query.push("hidden = 0");
            }
        }

        if let Some(format) = &self.format {
            query.push(" AND format = ").push_bind(format.clone());
        }
        if let Some(adder) = &self.adder {
            query
                .push(" AND adder LIKE ")
                .push_bind(like_pattern(adder))
                .push(" ESCAPE '\\'");
        }
        if let Some(client) = &self.client {
            query
                .push(" AND client LIKE ")
                .push_bind(like_pattern(client))
                .push(" ESCAPE '\\'");
        }
        if let Some((after, before)) = self.uploaded {
            query
                .push(" AND timestamp BETWEEN ")
                .push_bind(after)
                .push(" AND ")
                .push_bind(before);
        }

        query.push(" ORDER BY id");
        query
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Wrap `value` for a substring `LIKE` match, escaping wildcards.
fn like_pattern(value: &str) -> String {
    let mut pattern = String::with_capacity(value.len() + 2);
    pattern.push('%');
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
