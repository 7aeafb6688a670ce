use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::{Captures, Regex};
use thiserror::Error;

/// Signature stamp left by `~~~~` on zh-language wikis, e.g. `2024年3月5日 (二) 08:15 (UTC)`.
///
/// MediaWiki always signs with ASCII digits; stamps spelled with full-width or
/// other script digits are quoted text, not signatures, and are not matched.
static SIGNATURE_TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9]{1,4})年([0-9]{1,2})月([0-9]{1,2})日 \(.\) ([0-9]{2}):([0-9]{2}) \(UTC\)")
        .expect("signature timestamp pattern")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimestampError {
    #[error("signature timestamp `{matched}` is not a valid date")]
    InvalidDate { matched: String },
}

/// Latest signature timestamp in `text`, or `None` when the text carries no signature.
///
/// A stamp whose numbers do not form a real date (month 13, February 30, hour 24,
/// year 0) is an error rather than noise.
pub fn last_timestamp(text: &str) -> Result<Option<NaiveDateTime>, TimestampError> {
    let mut latest: Option<NaiveDateTime> = None;
    for captures in SIGNATURE_TIMESTAMP_RE.captures_iter(text) {
        let parsed = parse_signature(&captures)?;
        latest = Some(match latest {
            Some(current) => current.max(parsed),
            None => parsed,
        });
    }
    Ok(latest)
}

fn parse_signature(captures: &Captures<'_>) -> Result<NaiveDateTime, TimestampError> {
    let matched = &captures[0];
    let number = |index: usize| -> Result<u32, TimestampError> {
        captures[index]
            .parse::<u32>()
            .map_err(|_| invalid_date(matched))
    };

    let year = i32::try_from(number(1)?).map_err(|_| invalid_date(matched))?;
    if year < 1 {
        return Err(invalid_date(matched));
    }
    let date = NaiveDate::from_ymd_opt(year, number(2)?, number(3)?)
        .ok_or_else(|| invalid_date(matched))?;
    date.and_hms_opt(number(4)?, number(5)?, 0)
        .ok_or_else(|| invalid_date(matched))
}

fn invalid_date(matched: &str) -> TimestampError {
    TimestampError::InvalidDate {
        matched: matched.to_string(),
    }
}
