//! Outcome Derivation
//!
//! Colour and size badges are never sent on the wire; they are always derived
//! from the outcome digit so every view (live feed, history replay) agrees.
//!
//! | Digit | Colour | Size  |
//! |-------|--------|-------|
//! | 0     | Violet | Small |
//! | 1,3   | Green  | Small |
//! | 2,4   | Red    | Small |
//! | 5     | Violet | Big   |
//! | 6,8   | Red    | Big   |
//! | 7,9   | Green  | Big   |

use std::fmt;

use serde::{Deserialize, Serialize};

/// A settled round outcome, always in `0..=9`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Outcome(u8);

impl Outcome {
    /// Create an outcome, returning `None` outside `0..=9`.
    pub const fn new(digit: u8) -> Option<Self> {
        if digit <= 9 {
            Some(Self(digit))
        } else {
            None
        }
    }

    /// The outcome digit.
    pub const fn digit(self) -> u8 {
        self.0
    }

    /// Derived colour badge.
    pub const fn color(self) -> Color {
        derive_color_and_size(self).0
    }

    /// Derived size badge.
    pub const fn size(self) -> Size {
        derive_color_and_size(self).1
    }
}

impl TryFrom<u8> for Outcome {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("outcome out of range: {value}"))
    }
}

impl From<Outcome> for u8 {
    fn from(outcome: Outcome) -> Self {
        outcome.0
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Colour badge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    /// 0 and 5.
    Violet,
    /// Odd digits other than 5.
    Green,
    /// Even digits other than 0.
    Red,
}

/// Size badge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Size {
    /// 0 to 4.
    Small,
    /// 5 to 9.
    Big,
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Color::Violet => "violet",
            Color::Green => "green",
            Color::Red => "red",
        })
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Size::Small => "Small",
            Size::Big => "Big",
        })
    }
}

/// Derive the colour and size badges for an outcome.
pub const fn derive_color_and_size(outcome: Outcome) -> (Color, Size) {
    let digit = outcome.0;
    let size = if digit < 5 { Size::Small } else { Size::Big };
    let color = if digit == 0 || digit == 5 {
        Color::Violet
    } else if digit % 2 == 1 {
        Color::Green
    } else {
        Color::Red
    };
    (color, size)
}
