//! LinkSummary - the outcome of summarizing one submitted link.

use std::fmt;

/// The summary of a link, or the reason there is none.
///
/// Transient: produced by a batch job and handed straight to the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSummary {
    /// The submitted URL
    pub url: String,
    /// Summary text on success, error message on failure
    pub outcome: Result<String, String>,
}

impl LinkSummary {
    pub fn ok(url: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            outcome: Ok(summary.into()),
        }
    }

    pub fn failed(url: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self {
            url: url.into(),
            outcome: Err(cause.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Entry form consumed by the renderer: `"<url>\n<text>"`
    pub fn to_entry(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for LinkSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Ok(summary) => write!(f, "{}\nSummary: {}", self.url, summary),
            Err(cause) => write!(f, "{}\nError summarizing: {}", self.url, cause),
        }
    }
}
