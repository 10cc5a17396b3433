//! Query string and `Cookie` header parsing with flexible collection support.

use memchr::memchr;
use std::collections::HashMap;

/// URL query string parser.
///
/// Splits on `&`, then at the first `=` of each segment. Segments without a
/// `=` are dropped, an optional leading `?` is skipped, and values are kept
/// raw: **there is no percent-decoding** (`%20`, `%40`, etc.).
///
/// # Examples
/// ```rust
/// use ember_web::query::Query;
/// use std::collections::HashMap;
///
/// // Parse into Vec (preserves order and duplicates)
/// let params: Vec<(&str, &str)> = Query::parse("name=john&age=25&flag&age=26", 10);
/// assert_eq!(params, [("name", "john"), ("age", "25"), ("age", "26")]);
///
/// // Parse into HashMap (last value wins)
/// let params: HashMap<&str, &str> = Query::parse("?key=1&key=2", 10);
/// assert_eq!(params["key"], "2");
///
/// // Extra pairs beyond the limit are ignored
/// let params: Vec<(&str, &str)> = Query::parse("a=1&b=2&c=3", 2);
/// assert_eq!(params.len(), 2);
/// ```
pub struct Query;

impl Query {
    /// Parses a query string into a new collection, keeping at most `limit` pairs.
    #[inline(always)]
    pub fn parse<'a, C: QueryCollector<'a>>(query: &'a str, limit: usize) -> C {
        let mut result = C::with_capacity(limit.min(16));
        Self::parse_into(&mut result, query, limit);
        result
    }

    /// Parses a query string, appending to an existing collection until it
    /// holds `limit` pairs.
    ///
    /// # Examples
    /// ```
    /// use ember_web::query::Query;
    ///
    /// let mut collector: Vec<(&str, &str)> = Vec::new();
    ///
    /// Query::parse_into(&mut collector, "a=1&b=2", 10);
    /// Query::parse_into(&mut collector, "c=3&d=4", 10);
    /// assert_eq!(collector.len(), 4); // parameters are appended
    ///
    /// let mut collector: Vec<(&str, &str)> = Vec::new();
    /// Query::parse_into(&mut collector, "email=user%40example.com", 10);
    /// assert_eq!(collector[0].1, "user%40example.com"); // raw value
    /// ```
    #[inline]
    pub fn parse_into<'a, C: QueryCollector<'a>>(result: &mut C, query: &'a str, limit: usize) {
        let data = query.strip_prefix('?').unwrap_or(query);
        split_pairs(data, b'&', false, limit, result);
    }
}

/// `Cookie` header parser.
///
/// Splits on `;`, trims leading spaces from every entry, then splits at the
/// first `=`. Entries without a `=` are dropped.
///
/// # Examples
/// ```rust
/// use ember_web::query::Cookies;
///
/// let cookies: Vec<(&str, &str)> = Cookies::parse("session=abc; theme=dark;broken", 10);
/// assert_eq!(cookies, [("session", "abc"), ("theme", "dark")]);
/// ```
pub struct Cookies;

impl Cookies {
    /// Parses a `Cookie` header value into a new collection, keeping at most
    /// `limit` cookies.
    #[inline(always)]
    pub fn parse<'a, C: QueryCollector<'a>>(header: &'a str, limit: usize) -> C {
        let mut result = C::with_capacity(limit.min(16));
        Self::parse_into(&mut result, header, limit);
        result
    }

    /// Parses a `Cookie` header value, appending to an existing collection.
    #[inline]
    pub fn parse_into<'a, C: QueryCollector<'a>>(result: &mut C, header: &'a str, limit: usize) {
        split_pairs(header, b';', true, limit, result);
    }
}

#[inline]
fn split_pairs<'a, C: QueryCollector<'a>>(
    data: &'a str,
    separator: u8,
    trim_start: bool,
    limit: usize,
    result: &mut C,
) {
    let bytes = data.as_bytes();

    let mut start = 0;
    while start < bytes.len() && result.length() < limit {
        let end = memchr(separator, &bytes[start..])
            .map(|pos| start + pos)
            .unwrap_or(bytes.len());

        let mut segment = &data[start..end];
        if trim_start {
            segment = segment.trim_start_matches(' ');
        }

        if let Some(index) = memchr(b'=', segment.as_bytes()) {
            result.add_param(&segment[..index], &segment[index + 1..]);
        }

        start = end + 1;
    }
}

/// A trait for types that can collect parsed name/value pairs.
///
/// # Examples
/// ```rust
/// use ember_web::query::{Query, QueryCollector};
///
/// struct Upper(Vec<String>);
///
/// impl<'a> QueryCollector<'a> for Upper {
///     fn add_param(&mut self, key: &'a str, value: &'a str) {
///         self.0.push(format!("{}={}", key.to_uppercase(), value));
///     }
///
///     fn length(&self) -> usize {
///         self.0.len()
///     }
///
///     fn with_capacity(capacity: usize) -> Self {
///         Upper(Vec::with_capacity(capacity))
///     }
/// }
///
/// let collected: Upper = Query::parse("a=1&b=2", 8);
/// assert_eq!(collected.0, ["A=1", "B=2"]);
/// ```
pub trait QueryCollector<'a>
where
    Self: Sized,
{
    /// Adds a parsed pair to the collection.
    fn add_param(&mut self, key: &'a str, value: &'a str);

    /// Returns the current number of pairs in the collection.
    fn length(&self) -> usize;

    /// Creates a new collection with the specified capacity.
    fn with_capacity(capacity: usize) -> Self;
}

// Preserves order, borrows from the input
impl<'a> QueryCollector<'a> for Vec<(&'a str, &'a str)> {
    #[inline(always)]
    fn add_param(&mut self, key: &'a str, value: &'a str) {
        self.push((key, value));
    }

    #[inline(always)]
    fn length(&self) -> usize {
        self.len()
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        Vec::with_capacity(capacity)
    }
}

// Preserves order, owns the data (used by `Request`)
impl<'a> QueryCollector<'a> for Vec<(String, String)> {
    #[inline(always)]
    fn add_param(&mut self, key: &'a str, value: &'a str) {
        self.push((key.to_owned(), value.to_owned()));
    }

    #[inline(always)]
    fn length(&self) -> usize {
        self.len()
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        Vec::with_capacity(capacity)
    }
}

// Deduplicates (last wins)
impl<'a> QueryCollector<'a> for HashMap<&'a str, &'a str> {
    #[inline(always)]
    fn add_param(&mut self, key: &'a str, value: &'a str) {
        self.insert(key, value);
    }

    #[inline(always)]
    fn length(&self) -> usize {
        self.len()
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        HashMap::with_capacity(capacity)
    }
}
