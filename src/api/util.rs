// Copyright (c) 2018-2022, The ratectl contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.
#![deny(missing_docs)]

use std::fmt;

/// A rational number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rational {
  /// Numerator.
  pub num: u64,
  /// Denominator.
  pub den: u64,
}

impl Rational {
  /// Creates a rational number from the given numerator and denominator.
  pub const fn new(num: u64, den: u64) -> Self {
    Rational { num, den }
  }

  /// Returns the rational number as a floating-point number.
  pub fn as_f64(self) -> f64 {
    self.num as f64 / self.den as f64
  }

  /// Integer part of `value / self`, i.e. `value * den / num`.
  ///
  /// Used to spread a per-second quantity over frames.
  /// A zero numerator gives 0.
  pub const fn divide(self, value: u64) -> u64 {
    if self.num == 0 {
      return 0;
    }
    ((value as u128 * self.den as u128) / self.num as u128) as u64
  }
}

#[cfg(feature = "serialize")]
impl serde::Serialize for Rational {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    serde::Serialize::serialize(&(self.num, self.den), serializer)
  }
}

#[cfg(feature = "serialize")]
impl<'a> serde::Deserialize<'a> for Rational {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: serde::Deserializer<'a>,
  {
    let (num, den) = serde::Deserialize::deserialize(deserializer)?;

    Ok(Rational::new(num, den))
  }
}

/// Prediction structure of a picture.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
#[cfg_attr(
  feature = "serialize",
  derive(serde::Serialize, serde::Deserialize)
)]
pub enum SliceType {
  /// No inter prediction.
  Intra,
  /// Single reference direction.
  Predicted,
  /// Multiple reference directions.
  Bidirectional,
}

impl SliceType {
  /// Returns whether the picture is coded without inter prediction.
  #[inline]
  pub fn is_intra(self) -> bool {
    self == SliceType::Intra
  }
}

impl fmt::Display for SliceType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    use self::SliceType::*;
    match self {
      Intra => write!(f, "I"),
      Predicted => write!(f, "P"),
      Bidirectional => write!(f, "B"),
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn rational_divide_spreads_over_frames() {
    let fps = Rational::new(30, 1);
    assert_eq!(fps.divide(3_000_000), 100_000);
    let ntsc = Rational::new(30000, 1001);
    assert_eq!(ntsc.divide(30000), 1001);
  }

  #[test]
  fn slice_type_display() {
    assert_eq!(SliceType::Intra.to_string(), "I");
    assert_eq!(SliceType::Bidirectional.to_string(), "B");
    assert!(!SliceType::Predicted.is_intra());
  }
}
