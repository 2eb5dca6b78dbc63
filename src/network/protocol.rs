//! Feed Protocol
//!
//! Text frames pushed over the round feed. Frames are split on whitespace and
//! matched against two production rules:
//!
//! ```text
//! announcement := PERIOD VARIANT STAMP
//! result       := PERIOD VARIANT DIGIT [STAMP]
//! STAMP        := DATE TIME | DATE 'T' TIME
//! ```
//!
//! e.g. `20250701194956 30S 2025-07-01 19:49:56` and
//! `20250701194956 30S 7 2025-07-01 19:50:01.123456`.
//!
//! Anything else is [`Frame::Unrecognized`]; callers drop it without touching
//! round state.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::core::{parse_stamp, parse_stamp_parts, Outcome, PeriodId};
use crate::game::state::{RoundAnnouncement, RoundResult};
use crate::game::variant::VariantCatalogue;

/// A classified frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A round boundary for a variant.
    Announcement(RoundAnnouncement),
    /// A settled round.
    Result(RoundResult),
    /// Not a frame of either shape.
    Unrecognized(Rejection),
}

/// Why a frame was not recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Blank frame.
    Empty,
    /// Token count or token shapes match neither rule.
    Shape,
    /// Variant code is not in the catalogue.
    UnknownVariant(String),
    /// Period id is not a valid 14-digit UTC instant.
    MalformedPeriodId,
    /// Trailing stamp could not be parsed.
    MalformedStamp,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Empty => f.write_str("empty frame"),
            Rejection::Shape => f.write_str("unrecognized shape"),
            Rejection::UnknownVariant(code) => write!(f, "unknown variant {code}"),
            Rejection::MalformedPeriodId => f.write_str("malformed period id"),
            Rejection::MalformedStamp => f.write_str("malformed stamp"),
        }
    }
}

/// Which production a token list matched.
enum Rule<'a> {
    Announcement { stamp: &'a [&'a str] },
    Result { digit: u8, stamp: &'a [&'a str] },
}

/// Classify one raw frame.
///
/// `received_at` stands in for the result instant when a result frame carries
/// no stamp of its own.
pub fn classify(raw: &str, catalogue: &VariantCatalogue, received_at: DateTime<Utc>) -> Frame {
    match parse(raw, catalogue, received_at) {
        Ok(frame) => frame,
        Err(rejection) => Frame::Unrecognized(rejection),
    }
}

fn parse(raw: &str, catalogue: &VariantCatalogue, received_at: DateTime<Utc>) -> Result<Frame, Rejection> {
    let tokens: Vec<&str> = raw.split_ascii_whitespace().collect();
    if tokens.is_empty() {
        return Err(Rejection::Empty);
    }
    if tokens.len() < 3 {
        return Err(Rejection::Shape);
    }

    let rule = match_rule(&tokens).ok_or(Rejection::Shape)?;

    let variant = catalogue
        .get(tokens[1])
        .ok_or_else(|| Rejection::UnknownVariant(tokens[1].to_string()))?;
    let period_id = PeriodId::parse(tokens[0]).map_err(|_| Rejection::MalformedPeriodId)?;

    match rule {
        Rule::Announcement { stamp } => {
            let boundary_stamp = parse_stamp_tokens(stamp)?.ok_or(Rejection::Shape)?;
            Ok(Frame::Announcement(RoundAnnouncement {
                anchor: period_id.instant(),
                period_id,
                variant: variant.code.clone(),
                boundary_stamp,
            }))
        }
        Rule::Result { digit, stamp } => {
            let result_at = parse_stamp_tokens(stamp)?.unwrap_or(received_at);
            let outcome = Outcome::new(digit).ok_or(Rejection::Shape)?;
            Ok(Frame::Result(RoundResult::new(
                period_id,
                variant.code.clone(),
                outcome,
                result_at,
            )))
        }
    }
}

fn match_rule<'a>(tokens: &'a [&'a str]) -> Option<Rule<'a>> {
    let third = tokens[2];
    let rest = &tokens[2..];

    if third.len() == 1 && third.as_bytes()[0].is_ascii_digit() {
        let stamp = &tokens[3..];
        return (stamp.len() <= 2).then_some(Rule::Result {
            digit: third.as_bytes()[0] - b'0',
            stamp,
        });
    }

    if looks_like_date(third) && (1..=2).contains(&rest.len()) {
        return Some(Rule::Announcement { stamp: rest });
    }

    None
}

/// `YYYY-` prefix; full validation happens in the stamp parser.
fn looks_like_date(token: &str) -> bool {
    let bytes = token.as_bytes();
    bytes.len() >= 10 && bytes[..4].iter().all(u8::is_ascii_digit) && bytes[4] == b'-'
}

fn parse_stamp_tokens(tokens: &[&str]) -> Result<Option<DateTime<Utc>>, Rejection> {
    let parsed = match tokens {
        [] => return Ok(None),
        [single] => parse_stamp(single),
        [date, time] => parse_stamp_parts(date, time),
        _ => return Err(Rejection::Shape),
    };
    parsed.map(Some).map_err(|_| Rejection::MalformedStamp)
}
