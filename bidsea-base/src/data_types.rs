// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Currency amounts and auction durations.

use std::{
    fmt::{self, Display},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A non-negative amount of the chain's native currency, stored in wei.
///
/// This is a fixed-point fraction with [`Amount::DECIMAL_PLACES`] digits after
/// the point. [`Amount::ONE`] is one whole token, divisible into
/// `10.pow(Amount::DECIMAL_PLACES)` wei.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct Amount(u128);

impl Amount {
    /// The base-10 exponent representing how finely a token can be divided.
    pub const DECIMAL_PLACES: u8 = 18;

    /// Zero wei.
    pub const ZERO: Amount = Amount(0);

    /// One whole token.
    pub const ONE: Amount = Amount(10u128.pow(Amount::DECIMAL_PLACES as u32));

    /// The maximum representable amount.
    pub const MAX: Amount = Amount(u128::MAX);

    /// Returns an `Amount` holding exactly `wei`.
    pub const fn from_wei(wei: u128) -> Amount {
        Amount(wei)
    }

    /// Returns an `Amount` corresponding to that many whole tokens, or
    /// `Amount::MAX` if saturated.
    pub const fn from_tokens(tokens: u128) -> Amount {
        Amount(Amount::ONE.0.saturating_mul(tokens))
    }

    /// The raw wei value. Only the gateway layer should need this.
    pub const fn as_wei(self) -> u128 {
        self.0
    }

    /// Whether the amount is zero.
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Checked addition.
    pub const fn checked_add(self, other: Amount) -> Option<Amount> {
        match self.0.checked_add(other.0) {
            Some(wei) => Some(Amount(wei)),
            None => None,
        }
    }

    /// Checked subtraction.
    pub const fn checked_sub(self, other: Amount) -> Option<Amount> {
        match self.0.checked_sub(other.0) {
            Some(wei) => Some(Amount(wei)),
            None => None,
        }
    }

    /// Saturating addition.
    pub const fn saturating_add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }
}

/// Why a decimal string could not be parsed into an [`Amount`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ParseAmountError {
    #[error("cannot parse amount")]
    Parse,
    #[error("cannot represent amount: number too high")]
    TooHigh,
    #[error("cannot represent amount: too many decimal places after the point")]
    TooManyDigits,
}

impl FromStr for Amount {
    type Err = ParseAmountError;

    fn from_str(src: &str) -> Result<Self, Self::Err> {
        let mut result: u128 = 0;
        let mut decimals: Option<u8> = None;
        let mut seen_digit = false;
        let mut chars = src.trim().chars().peekable();
        if chars.peek() == Some(&'+') {
            chars.next();
        }
        for char in chars {
            match char {
                '_' => {}
                '.' if decimals.is_some() => return Err(ParseAmountError::Parse),
                '.' => decimals = Some(Amount::DECIMAL_PLACES),
                char => {
                    let digit = u128::from(char.to_digit(10).ok_or(ParseAmountError::Parse)?);
                    if let Some(d) = &mut decimals {
                        *d = d.checked_sub(1).ok_or(ParseAmountError::TooManyDigits)?;
                    }
                    result = result
                        .checked_mul(10)
                        .and_then(|r| r.checked_add(digit))
                        .ok_or(ParseAmountError::TooHigh)?;
                    seen_digit = true;
                }
            }
        }
        if !seen_digit {
            return Err(ParseAmountError::Parse);
        }
        result = result
            .checked_mul(10u128.pow(decimals.unwrap_or(Amount::DECIMAL_PLACES) as u32))
            .ok_or(ParseAmountError::TooHigh)?;
        Ok(Amount(result))
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Print the wei value padded with zeros to cover a digit before the
        // decimal point, then split off the fractional part and trim it.
        let places = Amount::DECIMAL_PLACES as usize;
        let min_digits = places + 1;
        let digits = format!("{:0min_digits$}", self.0);
        let integer_part = &digits[..(digits.len() - places)];
        let fractional_part = digits[(digits.len() - places)..].trim_end_matches('0');
        write!(f, "{integer_part}.{fractional_part}")
    }
}

/// A length of time, in seconds. Auction durations are expressed this way on
/// chain, while users enter them in days.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct TimeDelta(u64);

impl TimeDelta {
    /// The number of seconds in a day.
    pub const SECS_PER_DAY: u64 = 86_400;

    /// Returns the given number of seconds as a `TimeDelta`.
    pub const fn from_secs(secs: u64) -> TimeDelta {
        TimeDelta(secs)
    }

    /// Returns the given number of days as a `TimeDelta`, saturating at the
    /// maximum.
    pub const fn from_days(days: u64) -> TimeDelta {
        TimeDelta(days.saturating_mul(TimeDelta::SECS_PER_DAY))
    }

    /// The duration in seconds.
    pub const fn as_secs(self) -> u64 {
        self.0
    }

    /// Whether the duration is zero.
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl Display for TimeDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use test_case::test_case;

    use super::{Amount, ParseAmountError, TimeDelta};

    #[test]
    fn display_amount() {
        assert_eq!("1.", Amount::ONE.to_string());
        assert_eq!("1.", Amount::from_str("1.").unwrap().to_string());
        assert_eq!(
            Amount(10_000_000_000_000_000_000),
            Amount::from_str("10").unwrap()
        );
        assert_eq!("10.", Amount(10_000_000_000_000_000_000).to_string());
        assert_eq!("1.5", Amount::from_str("1.5").unwrap().to_string());
        assert_eq!("0.05", Amount::from_str("0.05").unwrap().to_string());
        assert_eq!(
            "1001.3",
            (Amount::from_str("1.1")
                .unwrap()
                .saturating_add(Amount::from_str("1_000.2").unwrap()))
            .to_string()
        );
    }

    #[test_case("1.5"; "plain decimal")]
    #[test_case("0.000000000000000001"; "one wei")]
    #[test_case("123456789.987654321"; "long fraction")]
    #[test_case("+7.25"; "explicit sign")]
    fn parse_display_round_trip(input: &str) {
        let amount = Amount::from_str(input).unwrap();
        assert_eq!(amount, Amount::from_str(&amount.to_string()).unwrap());
    }

    #[test_case("", ParseAmountError::Parse; "empty")]
    #[test_case(".", ParseAmountError::Parse; "lone point")]
    #[test_case("-1", ParseAmountError::Parse; "negative")]
    #[test_case("1.2.3", ParseAmountError::Parse; "two points")]
    #[test_case("a lot", ParseAmountError::Parse; "not a number")]
    #[test_case("0.0000000000000000001", ParseAmountError::TooManyDigits; "nineteen decimals")]
    #[test_case(
        "999999999999999999999999999999999999999",
        ParseAmountError::TooHigh;
        "overflow"
    )]
    fn parse_rejects(input: &str, expected: ParseAmountError) {
        assert_eq!(Amount::from_str(input).unwrap_err(), expected);
    }

    #[test]
    fn wei_round_trip() {
        let amount = Amount::from_str("1.5").unwrap();
        assert_eq!(amount.as_wei(), 1_500_000_000_000_000_000);
        assert_eq!(Amount::from_wei(amount.as_wei()), amount);
    }

    #[test]
    fn duration_from_days() {
        assert_eq!(TimeDelta::from_days(1).as_secs(), 86_400);
        assert_eq!(TimeDelta::from_days(3), TimeDelta::from_secs(259_200));
        assert!(TimeDelta::from_days(0).is_zero());
    }
}
