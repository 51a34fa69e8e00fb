use serde::Deserialize;

use crate::config::Config;
use crate::data_models::SearchQuery;
use crate::error::FrontendError;

/// Query-string parameters accepted by `/search`. Kept as raw strings so bad numbers can be clamped instead of
/// rejected.
#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub page: Option<String>,
    pub max: Option<String>,
    pub qbs: Option<String>,
}

impl SearchParams {
    /// `Ok(None)` means there is nothing to search for and the landing page should be shown.
    pub fn into_query(self, config: &Config) -> Result<Option<SearchQuery>, FrontendError> {
        let text = match normalize_query_text(self.q.as_deref().unwrap_or(""), config.max_query_length)? {
            Some(text) => text,
            None => return Ok(None),
        };

        let page = parse_page(self.page.as_deref());
        let page_size = parse_page_size(
            self.max.as_deref(),
            config.default_page_size,
            config.max_page_size,
        );
        let use_quotient_based_scoring = parse_flag(self.qbs.as_deref());

        Ok(Some(SearchQuery::new(
            text,
            page,
            page_size,
            use_quotient_based_scoring,
        )))
    }
}

/// Trim, reject control characters, and truncate to `max_chars` characters.
pub fn normalize_query_text(raw: &str, max_chars: usize) -> Result<Option<String>, FrontendError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    if trimmed
        .chars()
        .any(|c| c.is_control() && !c.is_whitespace())
    {
        return Err(FrontendError::InvalidInput(
            "query contains control characters".to_string(),
        ));
    }

    let truncated = match trimmed.char_indices().nth(max_chars) {
        Some((cut, _)) => trimmed[..cut].trim_end(),
        None => trimmed,
    };

    Ok(Some(truncated.to_string()))
}

/// Missing, negative or unparsable page numbers all mean the first page.
pub fn parse_page(raw: Option<&str>) -> usize {
    raw.and_then(|s| s.trim().parse::<usize>().ok()).unwrap_or(0)
}

/// Missing, unparsable or zero sizes fall back to the default; oversized ones are clamped.
pub fn parse_page_size(raw: Option<&str>, default: usize, max: usize) -> usize {
    match raw.and_then(|s| s.trim().parse::<usize>().ok()) {
        Some(0) | None => default,
        Some(n) => n.min(max),
    }
}

/// Checkbox-style flag. Browsers leave unchecked boxes out of the form, so absent means false, as does an explicit
/// "off" value. Anything else is true.
pub fn parse_flag(raw: Option<&str>) -> bool {
    match raw.map(|s| s.trim().to_ascii_lowercase()) {
        None => false,
        Some(v) => !matches!(v.as_str(), "" | "0" | "false" | "off" | "no"),
    }
}
