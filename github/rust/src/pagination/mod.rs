//! Pagination handling for GitHub API.

use crate::resilience::RateLimitState;
use reqwest::header::HeaderMap;
use serde::Serialize;

/// Largest page size the API accepts.
pub const MAX_PER_PAGE: u32 = 100;

/// Pagination links parsed from Link header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaginationLinks {
    /// URL for the next page.
    pub next: Option<String>,
    /// URL for the previous page.
    pub prev: Option<String>,
    /// URL for the first page.
    pub first: Option<String>,
    /// URL for the last page.
    pub last: Option<String>,
}

impl PaginationLinks {
    /// Parses pagination links from the Link header (RFC 8288).
    ///
    /// The relation name may be double-quoted, single-quoted or bare.
    pub fn from_header(header_value: &str) -> Self {
        let mut links = Self::default();

        for part in header_value.split(',') {
            let mut url = None;
            let mut rel = None;

            for segment in part.split(';') {
                let segment = segment.trim();
                if segment.starts_with('<') && segment.ends_with('>') {
                    url = Some(segment[1..segment.len() - 1].to_string());
                } else if let Some(value) = segment.strip_prefix("rel=") {
                    let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
                    rel = Some(value.to_ascii_lowercase());
                }
            }

            if let (Some(url), Some(rel)) = (url, rel) {
                // A rel may list several space-separated relation types.
                for name in rel.split_whitespace() {
                    match name {
                        "next" => links.next = Some(url.clone()),
                        "prev" => links.prev = Some(url.clone()),
                        "first" => links.first = Some(url.clone()),
                        "last" => links.last = Some(url.clone()),
                        _ => {}
                    }
                }
            }
        }

        links
    }

    /// Parses pagination links from response headers.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get("link")
            .and_then(|v| v.to_str().ok())
            .map(Self::from_header)
            .unwrap_or_default()
    }

    /// Returns true if there is a next page.
    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }

    /// Page number of the next link, if it carries one.
    pub fn next_page(&self) -> Option<u32> {
        self.next.as_deref().and_then(extract_page_number)
    }

    /// Gets the total page count from the last link.
    pub fn total_pages(&self) -> Option<u32> {
        self.last.as_deref().and_then(extract_page_number)
    }
}

/// A single page of results.
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// The items in this page.
    pub items: Vec<T>,
    /// Pagination links.
    pub links: PaginationLinks,
    /// Page number that was requested.
    pub page: u32,
    /// Items per page that were requested.
    pub per_page: u32,
    /// Rate-limit state after this response.
    pub rate_limit: RateLimitState,
}

impl<T> Page<T> {
    /// Returns true if the server advertised a next page.
    pub fn has_next(&self) -> bool {
        self.links.has_next()
    }

    /// Returns the URL for the next page.
    pub fn next_url(&self) -> Option<&str> {
        self.links.next.as_deref()
    }

    /// Returns true if the page holds as many items as were requested.
    pub fn is_full(&self) -> bool {
        self.items.len() as u32 >= self.per_page
    }

    /// Returns the number of items in this page.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the page is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Consumes the page and returns the items.
    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

impl<T> IntoIterator for Page<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// Pagination parameters for list requests.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PaginationParams {
    /// Page number (1-indexed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// Items per page (max 100).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u32>,
}

impl PaginationParams {
    /// Creates new pagination parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the page number.
    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    /// Sets items per page.
    pub fn per_page(mut self, per_page: u32) -> Self {
        self.per_page = Some(per_page.min(MAX_PER_PAGE));
        self
    }
}

/// Extracts page number from a URL.
pub fn extract_page_number(url: &str) -> Option<u32> {
    url::Url::parse(url).ok().and_then(|u| {
        u.query_pairs()
            .find(|(k, _)| k == "page")
            .and_then(|(_, v)| v.parse().ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_link_header() {
        let header = r#"<https://api.github.com/repos?page=2>; rel="next", <https://api.github.com/repos?page=5>; rel="last""#;
        let links = PaginationLinks::from_header(header);

        assert_eq!(links.next, Some("https://api.github.com/repos?page=2".to_string()));
        assert_eq!(links.last, Some("https://api.github.com/repos?page=5".to_string()));
        assert!(links.prev.is_none());
        assert!(links.first.is_none());
    }

    #[test]
    fn test_single_quoted_rel() {
        let header = "<https://api.github.com/repos/o/r/contributors?page=3>; rel='next'";
        let links = PaginationLinks::from_header(header);

        assert!(links.has_next());
        assert_eq!(links.next_page(), Some(3));
    }

    #[test]
    fn test_bare_and_multi_valued_rel() {
        let header = "<https://x.test/a?page=2>; rel=next, <https://x.test/a?page=9>; rel=\"last end\"";
        let links = PaginationLinks::from_header(header);

        assert_eq!(links.next_page(), Some(2));
        assert_eq!(links.total_pages(), Some(9));
    }

    #[test]
    fn test_missing_header_has_no_next() {
        let links = PaginationLinks::from_headers(&HeaderMap::new());
        assert_eq!(links, PaginationLinks::default());
        assert!(!links.has_next());
    }

    #[test]
    fn test_per_page_limit() {
        let params = PaginationParams::new().per_page(200);
        assert_eq!(params.per_page, Some(100));
    }

    #[test]
    fn test_page_fullness() {
        let page = Page {
            items: vec![1, 2, 3],
            links: PaginationLinks::default(),
            page: 1,
            per_page: 3,
            rate_limit: RateLimitState::default(),
        };

        assert!(page.is_full());
        assert!(!page.has_next());
        assert_eq!(page.len(), 3);
    }
}
