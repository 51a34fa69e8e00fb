use std::time::Duration;

/// A normalized search request. Built once per incoming request by the handler and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    text: String,
    terms: Vec<String>,
    page: usize,
    page_size: usize,
    use_quotient_based_scoring: bool,
}

impl SearchQuery {
    pub fn new(
        text: impl Into<String>,
        page: usize,
        page_size: usize,
        use_quotient_based_scoring: bool,
    ) -> SearchQuery {
        let text = text.into();
        let terms = text
            .split_whitespace()
            .map(|s| s.to_string())
            .collect::<Vec<String>>();

        SearchQuery {
            text,
            terms,
            page,
            page_size,
            use_quotient_based_scoring,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// Zero-based page index.
    pub fn page(&self) -> usize {
        self.page
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn offset(&self) -> usize {
        self.page.saturating_mul(self.page_size)
    }

    pub fn use_quotient_based_scoring(&self) -> bool {
        self.use_quotient_based_scoring
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResultItem {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub score: Option<f64>,
}

/// One page of ranked results exactly as the search server ordered them.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResultPage {
    items: Vec<SearchResultItem>,
    total_estimate: u64,
    offset: usize,
    page_size: usize,
    elapsed: Option<Duration>,
}

impl SearchResultPage {
    /// Items past `page_size` are dropped and the total is raised to at least the number of results seen so far.
    pub fn new(
        mut items: Vec<SearchResultItem>,
        total_estimate: u64,
        offset: usize,
        page_size: usize,
        elapsed: Option<Duration>,
    ) -> SearchResultPage {
        items.truncate(page_size);
        let seen = offset.saturating_add(items.len()) as u64;

        SearchResultPage {
            items,
            total_estimate: total_estimate.max(seen),
            offset,
            page_size,
            elapsed,
        }
    }

    pub fn items(&self) -> &[SearchResultItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_estimate(&self) -> u64 {
        self.total_estimate
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    /// One-based rank of the first item on this page.
    pub fn first_rank(&self) -> usize {
        self.offset.saturating_add(1)
    }

    pub fn last_rank(&self) -> usize {
        self.offset.saturating_add(self.items.len())
    }

    pub fn has_previous(&self) -> bool {
        self.offset > 0
    }

    pub fn has_next(&self) -> bool {
        (self.offset.saturating_add(self.page_size) as u64) < self.total_estimate
    }
}
