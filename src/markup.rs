//! Page markup surface: the `{{#googleanalyticsmetrics:...}}` parser function
//!
//! Turns fetcher results into inline HTML. Values are escaped; recoverable
//! failures become an error-styled span; cache write failures are returned
//! as errors so the embedding render can abort.

use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;
use tracing::debug;

use crate::cache::CacheError;
use crate::data::{AnalyticsApi, MetricValue};
use crate::fetcher::{MetricError, MetricFetcher};

/// Name the parser function is registered under
pub const FUNCTION_NAME: &str = "googleanalyticsmetrics";

/// Shown when the metric is not on the allow-list
const FORBIDDEN_MESSAGE: &str = "The requested metric is forbidden.";

/// Shown when no value could be obtained
const UNAVAILABLE_MESSAGE: &str = "Error!";

/// Opening of an invocation; the function name matches case-insensitively
fn invocation_start() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(&format!(r"(?i)\{{\{{#{}:", FUNCTION_NAME)).expect("Invalid invocation regex")
    })
}

/// One parser function call found in a page body
#[derive(Debug, PartialEq, Eq)]
struct Invocation<'t> {
    /// Byte range of the whole `{{#...}}` call
    span: Range<usize>,
    /// Raw argument text between the `:` and the closing `}}`
    args: &'t str,
}

/// Byte offset of the `}}` closing a call whose arguments start at `start`
///
/// Nested `{{`/`}}` pairs are counted so inner templates stay inside the
/// arguments.
fn closing_braces(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut i = start;
    while i + 1 < bytes.len() {
        match &bytes[i..i + 2] {
            b"{{" => {
                depth += 1;
                i += 2;
            }
            b"}}" if depth == 0 => return Some(i),
            b"}}" => {
                depth -= 1;
                i += 2;
            }
            _ => i += 1,
        }
    }
    None
}

/// Finds every invocation in order; an unterminated call ends the scan
fn find_invocations(text: &str) -> Vec<Invocation<'_>> {
    let mut found = Vec::new();
    let mut from = 0;
    while let Some(open) = invocation_start().find_at(text, from) {
        let Some(close) = closing_braces(text, open.end()) else {
            break;
        };
        found.push(Invocation {
            span: open.start()..close + 2,
            args: &text[open.end()..close],
        });
        from = close + 2;
    }
    found
}

/// Escapes text for inclusion in HTML element content or attributes
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}

/// Wraps text in the span the wiki styles as an error
pub fn wrap_error(text: &str) -> String {
    format!("<span class=\"error\">{}</span>", escape_html(text))
}

/// Flattens a fetch result into page HTML
///
/// # Returns
/// * `Ok(String)` - The escaped value, or an error span for recoverable failures
/// * `Err(CacheError)` - A fatal cache write failure
pub fn render(result: Result<MetricValue, MetricError>) -> Result<String, CacheError> {
    match result {
        Ok(value) => Ok(escape_html(value.as_str())),
        Err(MetricError::Forbidden { .. }) => Ok(wrap_error(FORBIDDEN_MESSAGE)),
        Err(MetricError::Unavailable(_)) => Ok(wrap_error(UNAVAILABLE_MESSAGE)),
        Err(MetricError::CacheWrite(e)) => Err(e),
    }
}

/// The parser function bound to a fetcher
#[derive(Debug)]
pub struct ParserFunction<A> {
    fetcher: MetricFetcher<A>,
}

impl<A: AnalyticsApi> ParserFunction<A> {
    pub fn new(fetcher: MetricFetcher<A>) -> Self {
        Self { fetcher }
    }

    #[cfg(test)]
    pub(crate) fn fetcher(&self) -> &MetricFetcher<A> {
        &self.fetcher
    }

    /// Runs the function with positional arguments `(metric, start?, end?)`
    ///
    /// Arguments are trimmed; anything past the third is ignored.
    pub async fn invoke(&self, args: &[&str]) -> Result<String, CacheError> {
        let mut args = args.iter().map(|a| a.trim());
        let metric = args.next().unwrap_or("");
        let start = args.next();
        let end = args.next();

        render(self.fetcher.fetch_metric(metric, start, end).await)
    }

    /// Replaces every invocation in a page body with its rendered result
    ///
    /// Invocations are evaluated in order of appearance. Calls whose
    /// arguments contain another template are left as written, since the
    /// inner template cannot be expanded here. A fatal error stops the
    /// expansion.
    pub async fn expand(&self, text: &str) -> Result<String, CacheError> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for invocation in find_invocations(text) {
            out.push_str(&text[last..invocation.span.start]);
            if invocation.args.contains("{{") {
                debug!(args = invocation.args, "Leaving invocation with nested template unexpanded");
                out.push_str(&text[invocation.span.clone()]);
            } else {
                let args: Vec<&str> = invocation.args.split('|').collect();
                out.push_str(&self.invoke(&args).await?);
            }
            last = invocation.span.end;
        }
        out.push_str(&text[last..]);
        Ok(out)
    }
}
