//! Textual limit grammar.
//!
//! A limit is written `<count>/<duration>` or `<count>/<duration>/g`, where
//! `count` is the maximum number of requests, `duration` is the window and a
//! trailing `/g` makes the limit global instead of per caller:
//!
//! ```text
//! 1/1m      one request per minute per caller
//! 10/24h/g  ten requests per day across all callers
//! ```

use std::str::FromStr;

use crate::{
    error::{ParseLimitError, ParseLimitsError},
    limit::{Limit, Scope, MIN_WINDOW},
};

/// Marker segment for global limits
const GLOBAL_MARKER: &str = "g";

/// Parse a single limit string
pub fn parse_limit(input: &str) -> Result<Limit, ParseLimitError> {
    let segments: Vec<&str> = input.split('/').collect();
    let (count, duration, scope) = match segments.as_slice() {
        [count, duration] => (*count, *duration, Scope::PerKey),
        [count, duration, marker] if *marker == GLOBAL_MARKER => (*count, *duration, Scope::Global),
        _ => return Err(ParseLimitError::Malformed(input.to_string())),
    };

    if count.is_empty() || duration.is_empty() {
        return Err(ParseLimitError::Malformed(input.to_string()));
    }

    let max_count: i64 = count.parse().map_err(|source| ParseLimitError::InvalidCount {
        input: count.to_string(),
        source,
    })?;
    if max_count < 1 {
        return Err(ParseLimitError::NonPositiveCount(max_count));
    }

    let window = humantime::parse_duration(duration).map_err(|source| {
        ParseLimitError::InvalidDuration {
            input: duration.to_string(),
            source,
        }
    })?;
    if window < MIN_WINDOW {
        return Err(ParseLimitError::SubSecondDuration(window));
    }

    Limit::new(max_count as u64, window, scope)
}

/// Parse every string in order, stopping at the first failure
pub fn parse_limits<I, S>(inputs: I) -> Result<Vec<Limit>, ParseLimitsError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    inputs
        .into_iter()
        .enumerate()
        .map(|(index, raw)| {
            let raw = raw.as_ref();
            parse_limit(raw).map_err(|source| ParseLimitsError {
                index,
                input: raw.to_string(),
                source,
            })
        })
        .collect()
}

/// Parse a limit known at build time, panicking if it is invalid.
///
/// Only meant for static configuration where a bad string is a startup bug.
pub fn must_parse_limit(input: &str) -> Limit {
    match parse_limit(input) {
        Ok(limit) => limit,
        Err(e) => panic!("invalid rate limit {input:?}: {e}"),
    }
}

/// List variant of [`must_parse_limit`]
pub fn must_parse_limits<I, S>(inputs: I) -> Vec<Limit>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    match parse_limits(inputs) {
        Ok(limits) => limits,
        Err(e) => panic!("invalid rate limits: {e}"),
    }
}

impl FromStr for Limit {
    type Err = ParseLimitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_limit(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_parse_limit() {
        let cases = [
            ("1/1s", Limit::per_key(1, Duration::from_secs(1))),
            ("10/1m", Limit::per_key(10, MINUTE)),
            ("10/24h/g", Limit::global(10, Duration::from_secs(24 * 3600))),
            ("1/1s/g", Limit::global(1, Duration::from_secs(1))),
            ("3/1h30m", Limit::per_key(3, Duration::from_secs(5400))),
        ];

        for (raw, expected) in cases {
            assert_eq!(parse_limit(raw), Ok(expected.unwrap()), "{raw}");
        }
    }

    #[test]
    fn test_parse_limit_global_fields() {
        let limit = parse_limit("10/24h/g").unwrap();
        assert_eq!(limit.max_count(), 10);
        assert_eq!(limit.window(), Duration::from_secs(86400));
        assert_eq!(limit.scope(), Scope::Global);
    }

    #[test]
    fn test_parse_limit_malformed() {
        for raw in ["asdf", "1/", "/jj//", "", "1/1m/x", "1/1m/g/g", "/1m"] {
            assert!(
                matches!(parse_limit(raw), Err(ParseLimitError::Malformed(_))),
                "{raw}"
            );
        }
    }

    #[test]
    fn test_parse_limit_bad_count() {
        assert!(matches!(
            parse_limit("abc/1m"),
            Err(ParseLimitError::InvalidCount { .. })
        ));
        assert_eq!(parse_limit("-1/1m"), Err(ParseLimitError::NonPositiveCount(-1)));
        assert_eq!(parse_limit("0/1m"), Err(ParseLimitError::NonPositiveCount(0)));
    }

    #[test]
    fn test_parse_limit_bad_duration() {
        assert!(matches!(
            parse_limit("1/soon"),
            Err(ParseLimitError::InvalidDuration { .. })
        ));
        assert_eq!(
            parse_limit("1/200ms"),
            Err(ParseLimitError::SubSecondDuration(Duration::from_millis(200)))
        );
        assert_eq!(
            parse_limit("1/0s/g"),
            Err(ParseLimitError::SubSecondDuration(Duration::ZERO))
        );
    }

    #[test]
    fn test_display_parses_back() {
        for raw in ["1/1s", "10/1m", "10/24h/g", "5/1h30m/g"] {
            let limit = parse_limit(raw).unwrap();
            assert_eq!(limit.to_string().parse::<Limit>(), Ok(limit));
        }
    }

    #[test]
    fn test_parse_limits() {
        let limits = parse_limits(["1/1s", "10/1m", "10/24h/g"]).unwrap();
        assert_eq!(limits.len(), 3);
        assert_eq!(limits[1], Limit::per_key(10, MINUTE).unwrap());
        assert!(limits[2].is_global());
    }

    #[test]
    fn test_parse_limits_reports_position() {
        let err = parse_limits(vec!["1/1s", "10/1m", "-3/1m", "asdf"]).unwrap_err();
        assert_eq!(err.index, 2);
        assert_eq!(err.input, "-3/1m");
        assert_eq!(err.source, ParseLimitError::NonPositiveCount(-3));
    }

    #[test]
    fn test_must_parse_limits_parses() {
        let limits = must_parse_limits(["1/1s", "10/1m"]);
        assert_eq!(limits[0], must_parse_limit("1/1s"));
    }

    #[test]
    #[should_panic(expected = "invalid rate limit")]
    fn test_must_parse_limit_panics() {
        must_parse_limit("asdfasdf");
    }

    #[test]
    #[should_panic(expected = "invalid rate limits")]
    fn test_must_parse_limits_panics() {
        must_parse_limits(["asdfasdf", "jfjf"]);
    }
}
