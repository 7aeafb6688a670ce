use std::sync::LazyLock;

use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;

use crate::timestamp::{TimestampError, last_timestamp};

/// Sections idle longer than this are archived unconditionally.
pub const STALE_AFTER_SECS: i64 = 183 * 86_400;
/// Sections carrying a done marker are archived once idle longer than this.
pub const RESOLVED_AFTER_SECS: i64 = 14 * 86_400;

static DO_NOT_ARCHIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\{\{[\s_]*(?:不存檔|不存档|请勿存档|請勿存檔|Do[ _]+not[ _]+archive|DNA)[\s_]*(?:\||\}\})",
    )
    .expect("do-not-archive pattern")
});

static RESOLVED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\{\{[\s_]*(?:完成|Done|Finish)[\s_]*(?:\||\}\})").expect("done pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    NoTimestamp,
    DoNotArchive,
    Stale,
    Resolved,
    Active,
}

impl Decision {
    pub fn should_archive(self) -> bool {
        matches!(self, Self::Stale | Self::Resolved)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoTimestamp => "no-timestamp",
            Self::DoNotArchive => "do-not-archive",
            Self::Stale => "stale",
            Self::Resolved => "resolved",
            Self::Active => "active",
        }
    }
}

/// Classify one section against the run-start time `now`.
pub fn decide(text: &str, now: DateTime<Utc>) -> Result<Decision, TimestampError> {
    let Some(last) = last_timestamp(text)? else {
        return Ok(Decision::NoTimestamp);
    };
    if DO_NOT_ARCHIVE_RE.is_match(text) {
        return Ok(Decision::DoNotArchive);
    }

    let idle = now.signed_duration_since(last.and_utc());
    if idle > TimeDelta::seconds(STALE_AFTER_SECS) {
        return Ok(Decision::Stale);
    }
    if idle > TimeDelta::seconds(RESOLVED_AFTER_SECS) && RESOLVED_RE.is_match(text) {
        return Ok(Decision::Resolved);
    }
    Ok(Decision::Active)
}
