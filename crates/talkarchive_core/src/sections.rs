use std::sync::LazyLock;

use regex::{Captures, Regex};
use uuid::Uuid;

/// A line consisting of exactly one level-2 heading, `== Title ==`.
static LEVEL_TWO_HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^==[^=\n]+==$").expect("level-2 heading pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    raw: String,
}

impl Section {
    /// Raw wikitext, starting at the heading line.
    pub fn text(&self) -> &str {
        &self.raw
    }

    pub fn title(&self) -> &str {
        self.raw.lines().next().unwrap_or_default().trim()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPage {
    pub preamble: String,
    pub sections: Vec<Section>,
}

/// Splits talk page wikitext at level-2 headings.
///
/// Every heading is prefixed with a run-scoped separator token and the text is
/// cut on that token, so the preamble and sections concatenate back to the
/// original text verbatim.
#[derive(Debug, Clone)]
pub struct SectionSplitter {
    separator: String,
}

impl Default for SectionSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl SectionSplitter {
    pub fn new() -> Self {
        Self::with_separator(Uuid::new_v4().to_string())
    }

    /// `separator` must be non-empty and must not occur in the page text.
    pub fn with_separator(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn split(&self, text: &str) -> SplitPage {
        let marked = LEVEL_TWO_HEADING_RE.replace_all(text, |captures: &Captures<'_>| {
            format!("{}{}", self.separator, &captures[0])
        });

        let mut parts = marked.split(self.separator.as_str());
        let preamble = parts.next().unwrap_or_default().to_string();
        let sections = parts
            .map(|raw| Section {
                raw: raw.to_string(),
            })
            .collect();

        SplitPage { preamble, sections }
    }
}
