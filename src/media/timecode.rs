//! Timecode parsing for transcripts.
//!
//! Recognizes `[MM:SS]` and `[HH:MM:SS]` tokens.

use regex::Regex;
use std::sync::OnceLock;

/// A parsed timecode token.
#[derive(Debug, Clone, PartialEq)]
pub struct Timecode {
    pub seconds: f64,
    /// The token as written, e.g. `[01:15]`.
    pub original: String,
}

fn timecode_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[(\d{1,2}):(\d{2})(?::(\d{2}))?\]").expect("timecode pattern is valid")
    })
}

/// Parser for transcript timecodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimecodeParser;

impl TimecodeParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse the first timecode token in `text`.
    pub fn parse(&self, text: &str) -> Option<Timecode> {
        let captures = timecode_regex().captures(text)?;
        Some(Self::from_captures(&captures))
    }

    /// Parse every timecode token in `text`, in order.
    pub fn parse_all(&self, text: &str) -> Vec<Timecode> {
        timecode_regex()
            .captures_iter(text)
            .map(|captures| Self::from_captures(&captures))
            .collect()
    }

    fn from_captures(captures: &regex::Captures<'_>) -> Timecode {
        let first: f64 = captures
            .get(1)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0.0);
        let second: f64 = captures
            .get(2)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0.0);
        let third: Option<f64> = captures.get(3).and_then(|m| m.as_str().parse().ok());

        let seconds = match third {
            // [HH:MM:SS]
            Some(s) => first * 3600.0 + second * 60.0 + s,
            // [MM:SS]
            None => first * 60.0 + second,
        };

        Timecode {
            seconds,
            original: captures
                .get(0)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
        }
    }
}

/// Format seconds as `MM:SS`, or `H:MM:SS` from one hour up.
pub fn format_seconds(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}
