use std::borrow::Cow;
use std::fmt::Write;
use std::ops::Range;

use url::Url;
use url::form_urlencoded;

use crate::config::Config;
use crate::data_models::{SearchQuery, SearchResultItem, SearchResultPage};
use crate::error::{ErrorKind, FrontendError};

const SITE_NAME: &str = "Spideriment Web Search";

/// Served when rendering itself fails. Kept free of any dynamic content.
pub const INTERNAL_ERROR_PAGE: &str = "<!DOCTYPE html>\n<html lang=\"en\"><head><meta charset=\"utf-8\">\
<title>Internal error</title></head><body><h1>Internal error</h1>\
<p>Something went wrong while preparing this page.</p><p><a href=\"/\">Back to search</a></p></body></html>\n";

/// Escape text for use in HTML element content and double- or single-quoted attribute values.
pub fn escape_html(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Cut `text` to at most `max_chars` characters, marking the cut with an ellipsis.
pub fn truncate_for_display(text: &str, max_chars: usize) -> Cow<'_, str> {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => Cow::Owned(format!("{}…", &text[..cut])),
        None => Cow::Borrowed(text),
    }
}

/// Byte ranges of `text` that match any of `terms`, ASCII case-insensitively, sorted and merged.
fn match_ranges(text: &str, terms: &[String]) -> Vec<Range<usize>> {
    let haystack = text.to_ascii_lowercase();
    let mut ranges = Vec::new();

    for term in terms {
        let needle = term.to_ascii_lowercase();
        if needle.is_empty() {
            continue;
        }
        let mut start = 0;
        while let Some(pos) = haystack[start..].find(&needle) {
            let begin = start + pos;
            ranges.push(begin..begin + needle.len());
            start = begin + needle.len();
        }
    }

    ranges.sort_by_key(|r| r.start);
    let mut merged: Vec<Range<usize>> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
            _ => merged.push(range),
        }
    }
    merged
}

/// Escape `text` and wrap every occurrence of a query term in `<mark>`.
pub fn highlight_terms(text: &str, terms: &[String]) -> String {
    let mut out = String::with_capacity(text.len() + 32);
    let mut cursor = 0;
    for range in match_ranges(text, terms) {
        out.push_str(&escape_html(&text[cursor..range.start]));
        out.push_str("<mark>");
        out.push_str(&escape_html(&text[range.clone()]));
        out.push_str("</mark>");
        cursor = range.end;
    }
    out.push_str(&escape_html(&text[cursor..]));
    out
}

/// `href` for a result, or `None` if the URL is not a plain web link.
fn safe_href(url: &str) -> Option<Url> {
    Url::parse(url)
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https"))
}

/// Turns queries, result pages and errors into complete HTML documents.
///
/// Rendering is a pure function of its inputs: the same query and page always produce the same bytes, apart from
/// the elapsed-time line.
#[derive(Debug, Clone)]
pub struct Renderer {
    max_title_length: usize,
    max_snippet_length: usize,
    default_page_size: usize,
    default_quotient_scoring: bool,
}

impl Renderer {
    pub fn new(
        max_title_length: usize,
        max_snippet_length: usize,
        default_page_size: usize,
        default_quotient_scoring: bool,
    ) -> Self {
        Self {
            max_title_length,
            max_snippet_length,
            default_page_size,
            default_quotient_scoring,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.max_title_length,
            config.max_snippet_length,
            config.default_page_size,
            config.quotient_scoring,
        )
    }

    /// Landing page for `(None, None, None)`, results for `(Some, Some, None)`, an error page whenever an error
    /// is given without results. Anything else is a caller bug and reported as [`FrontendError::Render`].
    pub fn render(
        &self,
        query: Option<&SearchQuery>,
        page: Option<&SearchResultPage>,
        error: Option<ErrorKind>,
    ) -> Result<String, FrontendError> {
        match (query, page, error) {
            (None, None, None) => self.render_landing(),
            (Some(query), Some(page), None) => self.render_results(query, page),
            (query, None, Some(kind)) => self.render_error(query, kind),
            (None, Some(_), None) => Err(FrontendError::Render(
                "result page without a query".to_string(),
            )),
            (Some(_), None, None) => Err(FrontendError::Render(
                "query without results or error".to_string(),
            )),
            (_, Some(_), Some(_)) => Err(FrontendError::Render(
                "both results and an error given".to_string(),
            )),
        }
    }

    fn render_landing(&self) -> Result<String, FrontendError> {
        let mut out = String::with_capacity(2048);
        write_head(&mut out, SITE_NAME)?;
        out.push_str("<main class=\"landing\">\n");
        writeln!(out, "<h1 class=\"site-name\">{SITE_NAME}</h1>")?;
        self.write_search_form(
            &mut out,
            "",
            self.default_page_size,
            self.default_quotient_scoring,
        )?;
        out.push_str("</main>\n");
        write_foot(&mut out);
        Ok(out)
    }

    fn render_results(
        &self,
        query: &SearchQuery,
        page: &SearchResultPage,
    ) -> Result<String, FrontendError> {
        let mut out = String::with_capacity(4096 + page.items().len() * 512);
        write_head(
            &mut out,
            &format!("{} - {SITE_NAME}", escape_html(query.text())),
        )?;
        self.write_header(&mut out, query)?;
        out.push_str("<main class=\"results-page\">\n");

        if page.is_empty() {
            writeln!(
                out,
                "<p class=\"no-results\">No results found for <strong class=\"query\">{}</strong>.</p>",
                escape_html(query.text())
            )?;
        } else {
            write!(
                out,
                "<p class=\"summary\">Results {}&ndash;{} of about {} for <strong class=\"query\">{}</strong>",
                page.first_rank(),
                page.last_rank(),
                page.total_estimate(),
                escape_html(query.text())
            )?;
            if let Some(elapsed) = page.elapsed() {
                write!(
                    out,
                    " <span class=\"elapsed\">({:.3} seconds)</span>",
                    elapsed.as_secs_f64()
                )?;
            }
            out.push_str("</p>\n");

            writeln!(out, "<ol class=\"results\" start=\"{}\">", page.first_rank())?;
            for item in page.items() {
                self.write_item(&mut out, item, query.terms())?;
            }
            out.push_str("</ol>\n");
        }

        write_pagination(&mut out, query, page)?;
        out.push_str("</main>\n");
        write_foot(&mut out);
        Ok(out)
    }

    fn render_error(
        &self,
        query: Option<&SearchQuery>,
        kind: ErrorKind,
    ) -> Result<String, FrontendError> {
        let mut out = String::with_capacity(2048);
        write_head(&mut out, &format!("{} - {SITE_NAME}", kind.title()))?;
        match query {
            Some(query) => self.write_header(&mut out, query)?,
            None => self.write_header_blank(&mut out)?,
        }
        writeln!(
            out,
            "<main class=\"error-page\">\n<h1 class=\"error-title\">{}</h1>\n<p class=\"error-message\">{}</p>\n</main>",
            kind.title(),
            kind.message()
        )?;
        write_foot(&mut out);
        Ok(out)
    }

    fn write_header(&self, out: &mut String, query: &SearchQuery) -> Result<(), FrontendError> {
        out.push_str("<header>\n");
        writeln!(out, "<a class=\"site-name\" href=\"/\">{SITE_NAME}</a>")?;
        self.write_search_form(
            out,
            query.text(),
            query.page_size(),
            query.use_quotient_based_scoring(),
        )?;
        out.push_str("</header>\n");
        Ok(())
    }

    fn write_header_blank(&self, out: &mut String) -> Result<(), FrontendError> {
        out.push_str("<header>\n");
        writeln!(out, "<a class=\"site-name\" href=\"/\">{SITE_NAME}</a>")?;
        self.write_search_form(
            out,
            "",
            self.default_page_size,
            self.default_quotient_scoring,
        )?;
        out.push_str("</header>\n");
        Ok(())
    }

    fn write_search_form(
        &self,
        out: &mut String,
        text: &str,
        page_size: usize,
        quotient_scoring: bool,
    ) -> Result<(), FrontendError> {
        out.push_str("<form class=\"search-form\" action=\"/search\" method=\"get\">\n");
        writeln!(
            out,
            "<input type=\"search\" name=\"q\" value=\"{}\" autofocus>",
            escape_html(text)
        )?;
        writeln!(
            out,
            "<label>Results per page <input type=\"number\" name=\"max\" min=\"1\" value=\"{page_size}\"></label>"
        )?;
        writeln!(
            out,
            "<label><input type=\"checkbox\" name=\"qbs\" value=\"1\"{}> Quotient-based scoring</label>",
            if quotient_scoring { " checked" } else { "" }
        )?;
        out.push_str("<button type=\"submit\">Search</button>\n</form>\n");
        Ok(())
    }

    fn write_item(
        &self,
        out: &mut String,
        item: &SearchResultItem,
        terms: &[String],
    ) -> Result<(), FrontendError> {
        let title = truncate_for_display(&item.title, self.max_title_length);
        let snippet = truncate_for_display(&item.snippet, self.max_snippet_length);

        out.push_str("<li class=\"result\">\n");
        match safe_href(&item.url) {
            Some(href) => writeln!(
                out,
                "<a class=\"result-title\" href=\"{}\">{}</a>",
                escape_html(href.as_str()),
                escape_html(&title)
            )?,
            None => writeln!(
                out,
                "<span class=\"result-title\">{}</span>",
                escape_html(&title)
            )?,
        }
        writeln!(
            out,
            "<cite class=\"result-url\">{}</cite>",
            escape_html(&item.url)
        )?;
        writeln!(
            out,
            "<p class=\"result-snippet\">{}</p>",
            highlight_terms(&snippet, terms)
        )?;
        if let Some(score) = item.score {
            writeln!(out, "<span class=\"result-score\">score {score:.4}</span>")?;
        }
        out.push_str("</li>\n");
        Ok(())
    }
}

/// Relative link to another page of the same search.
pub fn page_link(query: &SearchQuery, page: usize) -> String {
    let mut params = form_urlencoded::Serializer::new(String::new());
    params
        .append_pair("q", query.text())
        .append_pair("page", &page.to_string())
        .append_pair("max", &query.page_size().to_string())
        .append_pair(
            "qbs",
            if query.use_quotient_based_scoring() { "1" } else { "0" },
        );
    format!("/search?{}", params.finish())
}

fn write_pagination(
    out: &mut String,
    query: &SearchQuery,
    page: &SearchResultPage,
) -> Result<(), FrontendError> {
    if !page.has_previous() && !page.has_next() {
        return Ok(());
    }

    out.push_str("<nav class=\"pagination\">\n");
    if page.has_previous() {
        let previous = query.page().saturating_sub(1);
        writeln!(
            out,
            "<a class=\"previous\" rel=\"prev\" href=\"{}\">Previous</a>",
            escape_html(&page_link(query, previous))
        )?;
    }
    writeln!(out, "<span class=\"current-page\">Page {}</span>", query.page().saturating_add(1))?;
    if page.has_next() {
        writeln!(
            out,
            "<a class=\"next\" rel=\"next\" href=\"{}\">Next</a>",
            escape_html(&page_link(query, query.page().saturating_add(1)))
        )?;
    }
    out.push_str("</nav>\n");
    Ok(())
}

fn write_head(out: &mut String, title: &str) -> Result<(), FrontendError> {
    out.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
    out.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    writeln!(out, "<title>{title}</title>")?;
    out.push_str("<link rel=\"stylesheet\" href=\"/static/style.css\">\n</head>\n<body>\n");
    Ok(())
}

fn write_foot(out: &mut String) {
    out.push_str("<footer><p>Results are provided by the Spideriment search server.</p></footer>\n");
    out.push_str("</body>\n</html>\n");
}
