// Copyright (c) 2020-2022, The ratectl contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::api::Rational;
use crate::stats::BLOCK_SIZE_LOG2;

use std::fmt;

/// How the QP of every picture is chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
  feature = "serialize",
  derive(serde::Serialize, serde::Deserialize)
)]
pub enum RateControlMode {
  /// Deterministic QP per temporal layer and slice type.
  Off,
  /// Lookahead allocation corrected by the coded size of every picture.
  #[default]
  Feedback,
}

impl fmt::Display for RateControlMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      RateControlMode::Off => "off",
      RateControlMode::Feedback => "feedback",
    })
  }
}

/// Stream settings the rate control reads for its whole lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(
  feature = "serialize",
  derive(serde::Serialize, serde::Deserialize)
)]
pub struct StreamParameters {
  /// Width of the pictures in pixels.
  pub width: usize,
  /// Height of the pictures in pixels.
  pub height: usize,
  /// Pictures per second.
  pub frame_rate: Rational,
  /// Target bitrate in bits per second.
  pub target_bitrate: u64,
  /// Nominal QP.
  pub qp: u8,
  /// The minimum allowed QP.
  pub min_qp: u8,
  /// The maximum allowed QP.
  pub max_qp: u8,
  /// Distance between two intra pictures starting a GOP, minus one.
  pub intra_period_length: u64,
  /// Number of pictures the lookahead reads ahead.
  pub lookahead_depth: usize,
  /// Depth of the temporal hierarchy; pictures use layers
  /// `0..=hierarchy_depth`.
  pub hierarchy_depth: usize,
  pub rate_control_mode: RateControlMode,
  /// Scale the fixed QP by temporal layer and slice type.
  pub enable_qp_scaling: bool,
  /// Derive the fixed intra QP from the picture activity.
  pub content_based_qps: bool,
  /// Bits above which a finished GOP is reported as an overshoot.
  pub max_buffer_size: Option<u64>,
}

impl Default for StreamParameters {
  fn default() -> Self {
    StreamParameters {
      width: 1920,
      height: 1080,
      frame_rate: Rational::new(30, 1),
      target_bitrate: 5_000_000,
      qp: 32,
      min_qp: 1,
      max_qp: 63,
      intra_period_length: 63,
      lookahead_depth: 16,
      hierarchy_depth: 3,
      rate_control_mode: RateControlMode::Feedback,
      enable_qp_scaling: true,
      content_based_qps: false,
      max_buffer_size: None,
    }
  }
}

impl StreamParameters {
  /// Area of a picture in pixels.
  pub const fn picture_area(&self) -> u64 {
    (self.width * self.height) as u64
  }

  /// Number of 64x64 blocks covering a picture.
  pub const fn block_count(&self) -> usize {
    let size = 1 << BLOCK_SIZE_LOG2;
    ((self.width + size - 1) >> BLOCK_SIZE_LOG2)
      * ((self.height + size - 1) >> BLOCK_SIZE_LOG2)
  }

  /// Number of 64x64 blocks lying entirely inside a picture.
  pub const fn full_block_count(&self) -> usize {
    (self.width >> BLOCK_SIZE_LOG2) * (self.height >> BLOCK_SIZE_LOG2)
  }

  /// Bits the channel drains per picture.
  pub const fn channel_bits_per_frame(&self) -> u64 {
    self.frame_rate.divide(self.target_bitrate)
  }

  /// Pictures in one GOP.
  pub const fn gop_length(&self) -> u64 {
    self.intra_period_length + 1
  }

  /// Length of a complete lookahead window.
  pub fn window_len(&self) -> usize {
    (self.lookahead_depth + 1).min(self.gop_length() as usize)
  }

  pub const fn uses_feedback(&self) -> bool {
    matches!(self.rate_control_mode, RateControlMode::Feedback)
  }
}

impl fmt::Display for StreamParameters {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let pairs = [
      ("size", format!("{}x{}", self.width, self.height)),
      (
        "frame_rate",
        format!("{}/{}", self.frame_rate.num, self.frame_rate.den),
      ),
      ("target_bitrate", self.target_bitrate.to_string()),
      ("qp", format!("{} [{}, {}]", self.qp, self.min_qp, self.max_qp)),
      ("intra_period_length", self.intra_period_length.to_string()),
      ("lookahead_depth", self.lookahead_depth.to_string()),
      ("hierarchy_depth", self.hierarchy_depth.to_string()),
      ("rate_control_mode", self.rate_control_mode.to_string()),
    ];
    write!(
      f,
      "{}",
      pairs
        .iter()
        .map(|(key, value)| format!("{}: {}", key, value))
        .collect::<Vec<_>>()
        .join(", ")
    )
  }
}
