// Copyright (c) 2019-2022, The ratectl contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::api::{Rational, SliceType};
use crate::quantize::qp_step;
use crate::rate::tables::*;
use crate::rate::RateControlError;
use crate::util::clamp;

use arrayvec::ArrayVec;

use std::collections::TryReserveError;

const RC_PRECISION: u32 = 16;
const CCOEFF_INIT_FACT: f64 = 2.0;

/// Counts the pictures of every temporal layer in one intra period.
pub fn frames_per_layer(
  intra_period_length: u64, hierarchy_depth: usize,
) -> [u64; MAX_TEMPORAL_LAYERS] {
  let depth = hierarchy_depth.min(MAX_TEMPORAL_LAYERS - 1);
  let mini_gop = 1u64 << depth;
  let mut counts = [0; MAX_TEMPORAL_LAYERS];
  for t in 0..=intra_period_length {
    let layer =
      (0..=depth).find(|&k| t % (mini_gop >> k) == 0).unwrap_or(depth);
    counts[layer] += 1;
  }
  counts
}

/// Stream wide inputs for resetting the layer contexts of an interval.
#[derive(Debug, Clone, Copy)]
pub struct LayerSetup {
  pub target_bitrate: u64,
  pub frame_rate: Rational,
  pub hierarchy_depth: usize,
  pub frames_in_interval: [u64; MAX_TEMPORAL_LAYERS],
  /// Predicted bits of the GOP per layer, when the lookahead covers it.
  pub bits_per_layer: Option<[u64; MAX_TEMPORAL_LAYERS]>,
  pub picture_area: u64,
}

/// Rate model state of one temporal layer within an interval.
///
/// The layer follows `bits = c * distortion * q^-k`, where `q` is the
/// quantizer step of the picture QP.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerContext {
  pub temporal_index: usize,
  pub target_bit_rate: u64,
  /// Frames per second of this layer, in Q16.
  pub frame_rate: u64,
  /// Bits available per picture of this layer.
  pub channel_bit_rate: u64,
  /// Weight of a new sample, out of 16.
  pub coeff_averaging_weight1: u32,
  pub coeff_averaging_weight2: u32,
  pub k_coeff: f64,
  pub c_coeff: f64,
  pub previous_k_coeff: f64,
  pub previous_c_coeff: f64,
  pub previous_frame_qp: u8,
  pub previous_frame_bits: u64,
  pub previous_frame_distortion: u64,
  pub max_qp: u8,
}

impl LayerContext {
  fn new(temporal_index: usize) -> Self {
    LayerContext {
      temporal_index,
      target_bit_rate: 0,
      frame_rate: 1 << RC_PRECISION,
      channel_bit_rate: 1,
      coeff_averaging_weight1: 5,
      coeff_averaging_weight2: 11,
      k_coeff: 1.0,
      c_coeff: 0.0,
      previous_k_coeff: 1.0,
      previous_c_coeff: 0.0,
      previous_frame_qp: 0,
      previous_frame_bits: 0,
      previous_frame_distortion: 0,
      max_qp: 0,
    }
  }

  /// Prepares the layer for a new interval whose first picture is coded at
  /// `picture_qp`. Model coefficients are only initialized on the first use
  /// of the slot.
  pub fn reset(&mut self, setup: &LayerSetup, picture_qp: u8, was_used: bool) {
    let layer = self.temporal_index;
    let depth = setup.hierarchy_depth.min(MAX_TEMPORAL_LAYERS - 1);

    self.target_bit_rate = match setup.bits_per_layer {
      Some(bits) if bits.iter().sum::<u64>() > 0 => {
        let sum: u64 = bits.iter().sum();
        (u128::from(setup.target_bitrate) * u128::from(bits[layer])
          / u128::from(sum)) as u64
      }
      _ => setup.target_bitrate * RATE_PERCENTAGE_LAYER[depth][layer] / 100,
    };

    let stream_rate = (setup.frame_rate.num << RC_PRECISION)
      / setup.frame_rate.den.max(1);
    let total: u64 = setup.frames_in_interval.iter().sum();
    self.frame_rate = if total == 0 {
      0
    } else {
      stream_rate * setup.frames_in_interval[layer] / total
    };
    if self.frame_rate == 0 {
      // No picture of this layer in the interval.
      self.frame_rate = 1 << RC_PRECISION;
    }

    self.channel_bit_rate = ((((u128::from(self.target_bit_rate)
      << (2 * RC_PRECISION))
      / u128::from(self.frame_rate))
      + (1 << (RC_PRECISION - 1)))
      >> RC_PRECISION)
      .max(1) as u64;

    self.coeff_averaging_weight1 = if layer == 5 { 3 } else { 5 };
    self.coeff_averaging_weight2 = 16 - self.coeff_averaging_weight1;
    self.max_qp = picture_qp;

    if !was_used {
      let area = setup.picture_area.max(1) as f64;
      self.k_coeff = 1.0;
      self.previous_k_coeff = 1.0;
      self.c_coeff = self.channel_bit_rate as f64 * qp_step(picture_qp)
        / area
        / CCOEFF_INIT_FACT;
      self.previous_c_coeff = self.c_coeff;
      self.previous_frame_qp = picture_qp;
      self.previous_frame_bits = 0;
      self.previous_frame_distortion = 0;
    }
  }

  /// Bits the model expects for a picture of this layer.
  pub fn predicted_bits(&self, distortion: u64, qp: u8) -> u64 {
    (self.c_coeff * distortion as f64 * qp_step(qp).powf(-self.k_coeff))
      .max(0.0) as u64
  }

  /// Folds the coded size of a picture into the smoothed coefficients.
  pub fn update(&mut self, bits: u64, distortion: u64, qp: u8) {
    if bits == 0 || distortion == 0 {
      return;
    }
    let w1 = f64::from(self.coeff_averaging_weight1);
    let w2 = f64::from(self.coeff_averaging_weight2);
    let q = qp_step(qp);

    self.previous_k_coeff = self.k_coeff;
    self.previous_c_coeff = self.c_coeff;

    if self.previous_frame_bits > 0
      && self.previous_frame_distortion > 0
      && self.previous_frame_qp != qp
    {
      let rate = bits as f64 / distortion as f64;
      let previous_rate = self.previous_frame_bits as f64
        / self.previous_frame_distortion as f64;
      let q_ratio = (q / qp_step(self.previous_frame_qp)).ln();
      if q_ratio.abs() > f64::EPSILON {
        let k = ((previous_rate / rate).ln() / q_ratio).clamp(0.2, 4.0);
        self.k_coeff = (w1 * k + w2 * self.k_coeff) / 16.0;
      }
    }
    let c = bits as f64 * q.powf(self.k_coeff) / distortion as f64;
    self.c_coeff = (w1 * c + w2 * self.c_coeff) / 16.0;

    self.previous_frame_qp = qp;
    self.previous_frame_bits = bits;
    self.previous_frame_distortion = distortion;
  }
}

/// Bookkeeping of one GOP sized interval.
#[derive(Debug, Clone)]
pub struct IntervalContext {
  pub first_poc: u64,
  pub last_poc: u64,
  pub in_use: bool,
  pub was_used: bool,
  pub processed_frames: u64,
  /// Pictures expected in the interval, shorter at the end of the stream.
  pub expected_frames: u64,
  pub first_picture_predicted_qp: u8,
  pub first_picture_actual_qp: u8,
  pub first_picture_actual_qp_assigned: bool,
  pub first_picture_predicted_bits: u64,
  pub first_picture_actual_bits: u64,
  pub scene_change_in_gop: bool,
  pub intra_frames_qp: u8,
  pub total_actual_bits: u64,
  pub layers: ArrayVec<LayerContext, MAX_TEMPORAL_LAYERS>,
}

impl IntervalContext {
  fn new(first_poc: u64, length: u64, layer_count: usize) -> Self {
    IntervalContext {
      first_poc,
      last_poc: first_poc + length - 1,
      in_use: false,
      was_used: false,
      processed_frames: 0,
      expected_frames: length,
      first_picture_predicted_qp: 0,
      first_picture_actual_qp: 0,
      first_picture_actual_qp_assigned: false,
      first_picture_predicted_bits: 0,
      first_picture_actual_bits: 0,
      scene_change_in_gop: false,
      intra_frames_qp: 0,
      total_actual_bits: 0,
      layers: (0..layer_count).map(LayerContext::new).collect(),
    }
  }

  pub const fn contains(&self, picture_number: u64) -> bool {
    self.first_poc <= picture_number && picture_number <= self.last_poc
  }

  pub fn layer_mut(&mut self, layer: usize) -> &mut LayerContext {
    let last = self.layers.len() - 1;
    &mut self.layers[layer.min(last)]
  }

  /// Resets the layer contexts for the interval's first picture.
  pub fn start(&mut self, setup: &LayerSetup, picture_qp: u8) {
    let was_used = self.was_used;
    for layer in self.layers.iter_mut() {
      layer.reset(setup, picture_qp, was_used);
    }
    self.in_use = true;
  }
}

/// Interval whose pictures have all been fed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedInterval {
  pub first_poc: u64,
  pub last_poc: u64,
  pub total_actual_bits: u64,
}

/// Fixed ring of the intervals in flight.
#[derive(Debug)]
pub struct IntervalRing {
  intervals: Vec<IntervalContext>,
  length: u64,
}

impl IntervalRing {
  /// Lays out `capacity` consecutive intervals of `length` pictures from
  /// picture 0 on.
  ///
  /// # Errors
  ///
  /// Returns `TryReserveError` if the ring cannot be allocated.
  pub fn new(
    capacity: usize, length: u64, layer_count: usize,
  ) -> Result<Self, TryReserveError> {
    let mut intervals = Vec::new();
    intervals.try_reserve_exact(capacity)?;
    intervals.extend(
      (0..capacity as u64)
        .map(|i| IntervalContext::new(i * length, length, layer_count)),
    );
    Ok(IntervalRing { intervals, length })
  }

  pub fn capacity(&self) -> usize {
    self.intervals.len()
  }

  /// Pictures per interval.
  pub const fn length(&self) -> u64 {
    self.length
  }

  /// Index of the interval containing `picture_number`.
  ///
  /// # Errors
  ///
  /// Returns `IntervalNotFound` if no interval of the ring covers it.
  pub fn find_interval(
    &self, picture_number: u64,
  ) -> Result<usize, RateControlError> {
    self
      .intervals
      .iter()
      .position(|i| i.contains(picture_number))
      .ok_or(RateControlError::IntervalNotFound { picture_number })
  }

  pub fn prev_index(&self, idx: usize) -> usize {
    (idx + self.intervals.len() - 1) % self.intervals.len()
  }

  pub fn next_index(&self, idx: usize) -> usize {
    (idx + 1) % self.intervals.len()
  }

  pub fn get(&self, idx: usize) -> &IntervalContext {
    &self.intervals[idx]
  }

  pub fn get_mut(&mut self, idx: usize) -> &mut IntervalContext {
    &mut self.intervals[idx]
  }

  pub fn iter(&self) -> impl Iterator<Item = &IntervalContext> {
    self.intervals.iter()
  }

  /// Marks `picture_number` as the last picture of the stream.
  pub fn set_end_of_stream(&mut self, idx: usize, picture_number: u64) {
    let interval = &mut self.intervals[idx];
    interval.expected_frames = picture_number - interval.first_poc + 1;
  }

  /// Accounts for a fed back picture and recycles the interval once all of
  /// its pictures are done.
  pub fn record_feedback(
    &mut self, idx: usize, picture_number: u64, bits: u64,
  ) -> Option<CompletedInterval> {
    let capacity = self.intervals.len() as u64;
    let length = self.length;
    let interval = &mut self.intervals[idx];
    interval.processed_frames += 1;
    interval.total_actual_bits =
      interval.total_actual_bits.saturating_add(bits);
    if picture_number == interval.first_poc {
      interval.first_picture_actual_bits = bits;
    }
    if interval.processed_frames < interval.expected_frames {
      return None;
    }

    let done = CompletedInterval {
      first_poc: interval.first_poc,
      last_poc: interval.last_poc,
      total_actual_bits: interval.total_actual_bits,
    };
    // The first picture figures stay for the bounding of the next interval.
    interval.first_poc += capacity * length;
    interval.last_poc += capacity * length;
    interval.in_use = false;
    interval.was_used = true;
    interval.processed_frames = 0;
    interval.expected_frames = length;
    interval.total_actual_bits = 0;
    interval.first_picture_actual_qp_assigned = false;
    log::debug!(
      "interval {}-{} done, moved to {}-{}",
      done.first_poc,
      done.last_poc,
      interval.first_poc,
      interval.last_poc
    );
    Some(done)
  }
}

/// Allowed QP range of the first picture of an interval, relative to the
/// first picture of the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GopBoundary {
  pub anchor_qp: u8,
  /// Raise applied when the previous first picture overshot its
  /// prediction.
  pub nudge: u8,
  pub allowed_increase: u8,
  pub allowed_decrease: u8,
}

impl GopBoundary {
  pub fn new(
    prev: &IntervalContext, org_qp: u8, end_of_stream_region: bool,
  ) -> Self {
    let anchor = prev.first_picture_actual_qp;

    let mut nudge = 0;
    if !prev.scene_change_in_gop {
      let delta_qp = i64::from(prev.first_picture_actual_qp)
        - i64::from(prev.first_picture_predicted_qp);
      let predicted = prev.first_picture_predicted_bits as i64;
      let mut ratio = if predicted != 0 {
        (prev.first_picture_actual_bits as i64 - predicted) * 100 / predicted
      } else {
        0
      };
      ratio += delta_qp * 15;
      nudge = if ratio > 200 {
        3
      } else if ratio > 100 {
        2
      } else if ratio > 50 {
        1
      } else {
        0
      };
    }

    let mut increase: u8 = 3;
    let mut decrease: u8 = 4;
    if u16::from(org_qp) + 10 <= u16::from(anchor) {
      decrease = (anchor - org_qp) >> 1;
    }
    if u16::from(org_qp) >= u16::from(anchor) + 10 {
      increase = ((u16::from(org_qp - anchor) * 2) / 3) as u8;
      increase += match anchor {
        0..=15 => 5,
        16..=20 => 4,
        21..=25 => 3,
        _ => 0,
      };
    } else if prev.scene_change_in_gop {
      increase = 5;
    }
    if end_of_stream_region {
      increase += 2;
      decrease += 4;
    }

    GopBoundary {
      anchor_qp: anchor,
      nudge,
      allowed_increase: increase + nudge,
      allowed_decrease: decrease,
    }
  }

  pub fn apply(&self, qp: u8) -> u8 {
    clamp(
      qp.saturating_add(self.nudge),
      self.anchor_qp.saturating_sub(self.allowed_decrease),
      self.anchor_qp.saturating_add(self.allowed_increase),
    )
  }
}

/// What the QP decision of one picture depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureQpInput {
  pub picture_number: u64,
  pub slice_type: SliceType,
  pub best_pred_qp: u8,
  pub intra_selected_org_qp: u8,
  pub end_of_stream_region: bool,
}

impl IntervalRing {
  /// Final QP of a picture of interval `idx` under rate control.
  #[profiling::function]
  pub fn assign_qp(
    &self, idx: usize, input: &PictureQpInput, min_qp: u8, max_qp: u8,
  ) -> u8 {
    let current = &self.intervals[idx];
    let prev = &self.intervals[self.prev_index(idx)];
    let next = &self.intervals[self.next_index(idx)];
    let p = input.picture_number;

    let mut qp = input.best_pred_qp;
    if p == current.first_poc && p != 0 {
      let boundary = GopBoundary::new(
        prev,
        input.intra_selected_org_qp,
        input.end_of_stream_region,
      );
      qp = boundary.apply(qp);
    }

    // Intra pictures inside an interval come from scene changes.
    if input.slice_type.is_intra() && p != current.first_poc {
      // Once the ring wraps, the next slot may still hold an older GOP.
      let next_known = next.first_poc == current.last_poc + 1
        && next.first_picture_actual_qp_assigned;
      let (anchor, decrease, increase) = if next_known {
        (next.first_picture_actual_qp, 1, 8)
      } else if current.first_picture_actual_qp < 20 {
        (current.first_picture_actual_qp, 4, 10)
      } else {
        (current.first_picture_actual_qp, 4, 8)
      };
      qp = clamp(
        qp,
        anchor.saturating_sub(decrease),
        anchor.saturating_add(increase),
      );
    }

    clamp(qp, min_qp, max_qp)
  }
}
