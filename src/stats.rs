// Copyright (c) 2019, The ratectl contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Per-picture statistics shared between the analysis stages, the rate
//! control kernel and the downstream encoder.

use crate::api::SliceType;
use crate::quantize::QP_RANGE;
use crate::util::lock;

use std::ops::{Add, AddAssign};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Number of distortion bins in every histogram.
pub const N_BINS: usize = 128;

/// Log2 of the coding block edge that distortion is reported for.
pub const BLOCK_SIZE_LOG2: u32 = 6;

const SAD_PRECISION_INTERVAL: u32 = 4;

/// Maps the distortion of one 64x64 block onto its histogram bin.
///
/// The lower half of the range is linear; above it bins are eight times
/// wider, and everything past the last bin lands in it.
pub fn sad_interval_index(sad: u64) -> usize {
  const LINEAR_BINS: u64 = (N_BINS / 2) as u64 - 1;

  let idx = (sad >> (2 * BLOCK_SIZE_LOG2 - SAD_PRECISION_INTERVAL)) >> 2;
  let idx = if idx > LINEAR_BINS {
    LINEAR_BINS + ((idx - LINEAR_BINS) >> 3)
  } else {
    idx
  };
  idx.min(N_BINS as u64 - 1) as usize
}

/// Distortion measured by motion and intra search for one coding block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockDistortion {
  /// Best inter prediction SAD.
  pub inter_sad: u64,
  /// Best open-loop intra prediction SAD.
  pub intra_sad: u64,
  /// Whether the block lies completely inside the picture.
  pub fully_covered: bool,
}

/// Aggregated distortion of one picture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistortionStats {
  /// Fully covered blocks per inter distortion bin.
  pub inter_histogram: [u32; N_BINS],
  /// Fully covered blocks per intra distortion bin.
  pub intra_histogram: [u32; N_BINS],
  /// Blocks that contributed to the histograms.
  pub full_block_count: u32,
  /// Average non-moving activity, from 0 (static) to `NON_MOVING_SCORE_MAX`.
  pub non_moving_score: u32,
  /// Share of zero-motion blocks, in percent.
  pub zero_motion_percentage: u32,
  /// Sum of the distortion of every binned block.
  pub total_distortion: u64,
}

/// Upper bound of `DistortionStats::non_moving_score`.
pub const NON_MOVING_SCORE_MAX: u32 = 30;

impl Default for DistortionStats {
  fn default() -> Self {
    DistortionStats {
      inter_histogram: [0; N_BINS],
      intra_histogram: [0; N_BINS],
      full_block_count: 0,
      non_moving_score: 0,
      zero_motion_percentage: 0,
      total_distortion: 0,
    }
  }
}

impl DistortionStats {
  fn bin(&mut self, slice_type: SliceType, block: &BlockDistortion) {
    if !block.fully_covered {
      return;
    }
    if slice_type.is_intra() {
      self.intra_histogram[sad_interval_index(block.intra_sad)] += 1;
      self.total_distortion += block.intra_sad;
    } else {
      self.inter_histogram[sad_interval_index(block.inter_sad)] += 1;
      self.intra_histogram[sad_interval_index(block.intra_sad)] += 1;
      self.total_distortion += block.inter_sad.min(block.intra_sad);
    }
    self.full_block_count += 1;
  }
}

impl Add<&Self> for DistortionStats {
  type Output = Self;

  fn add(self, rhs: &DistortionStats) -> Self::Output {
    let mut lhs = self;
    lhs += rhs;
    lhs
  }
}

impl AddAssign<&Self> for DistortionStats {
  fn add_assign(&mut self, rhs: &DistortionStats) {
    for (a, b) in self.inter_histogram.iter_mut().zip(&rhs.inter_histogram) {
      *a += b;
    }
    for (a, b) in self.intra_histogram.iter_mut().zip(&rhs.intra_histogram) {
      *a += b;
    }
    self.full_block_count += rhs.full_block_count;
    self.total_distortion += rhs.total_distortion;
  }
}

/// Thread-safe accumulator the analysis workers report into.
///
/// Workers bin their blocks locally and only take the lock to merge.
#[derive(Debug, Default)]
pub struct DistortionCollector {
  stats: Mutex<DistortionStats>,
}

impl DistortionCollector {
  /// Bins a segment of blocks into the picture histograms.
  pub fn accumulate(&self, slice_type: SliceType, blocks: &[BlockDistortion]) {
    let mut partial = DistortionStats::default();
    for block in blocks {
      partial.bin(slice_type, block);
    }
    *lock(&self.stats) += &partial;
  }

  /// Records the picture level activity measures.
  pub fn set_activity(
    &self, non_moving_score: u32, zero_motion_percentage: u32,
  ) {
    let mut stats = lock(&self.stats);
    stats.non_moving_score = non_moving_score.min(NON_MOVING_SCORE_MAX);
    stats.zero_motion_percentage = zero_motion_percentage.min(100);
  }

  /// Copies the current totals out.
  pub fn snapshot(&self) -> DistortionStats {
    lock(&self.stats).clone()
  }
}

/// QP decision written by the rate control kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QpDecision {
  /// Final picture QP, `None` until the kernel processed the picture.
  pub assigned_qp: Option<u8>,
  /// Quantizer index matching `assigned_qp`.
  pub base_qindex: u8,
  /// QP predicted from the reference QP and the layer offsets.
  pub best_pred_qp: u8,
  /// Reference QP chosen before any GOP level adjustment.
  pub intra_selected_org_qp: u8,
  /// Predicted bits of the picture for every QP visited by the search.
  pub predicted_bits_by_qp: [u64; QP_RANGE],
  /// QP of every coding block.
  pub block_qps: Vec<u8>,
}

impl Default for QpDecision {
  fn default() -> Self {
    QpDecision {
      assigned_qp: None,
      base_qindex: 0,
      best_pred_qp: 0,
      intra_selected_org_qp: 0,
      predicted_bits_by_qp: [0; QP_RANGE],
      block_qps: Vec::new(),
    }
  }
}

/// Statistics of one picture, shared across the pipeline as
/// `Arc<PictureStats>`.
#[derive(Debug)]
pub struct PictureStats {
  /// Monotonic picture number in display order.
  pub picture_number: u64,
  pub slice_type: SliceType,
  pub temporal_layer: usize,
  /// Set on the last picture of the stream.
  pub end_of_stream: bool,
  /// Set on the pictures whose lookahead reaches the end of the stream.
  pub end_of_stream_region: bool,
  /// Scene change detected inside the GOP this picture starts.
  pub scene_change_in_gop: bool,
  /// Externally forced QP.
  pub qp_override: Option<u8>,
  block_count: usize,
  distortion: DistortionCollector,
  decision: Mutex<QpDecision>,
  actual_bits: AtomicU64,
}

impl PictureStats {
  pub fn new(
    picture_number: u64, slice_type: SliceType, temporal_layer: usize,
    block_count: usize,
  ) -> Self {
    PictureStats {
      picture_number,
      slice_type,
      temporal_layer,
      end_of_stream: false,
      end_of_stream_region: false,
      scene_change_in_gop: false,
      qp_override: None,
      block_count,
      distortion: DistortionCollector::default(),
      decision: Mutex::new(QpDecision::default()),
      actual_bits: AtomicU64::new(0),
    }
  }

  pub fn with_end_of_stream(mut self, end_of_stream: bool) -> Self {
    self.end_of_stream = end_of_stream;
    self
  }

  pub fn with_end_of_stream_region(mut self, region: bool) -> Self {
    self.end_of_stream_region = region;
    self
  }

  pub fn with_scene_change_in_gop(mut self, scene_change: bool) -> Self {
    self.scene_change_in_gop = scene_change;
    self
  }

  pub fn with_qp_override(mut self, qp: Option<u8>) -> Self {
    self.qp_override = qp;
    self
  }

  /// Number of coding blocks in the picture.
  pub const fn block_count(&self) -> usize {
    self.block_count
  }

  pub const fn distortion(&self) -> &DistortionCollector {
    &self.distortion
  }

  pub fn assigned_qp(&self) -> Option<u8> {
    lock(&self.decision).assigned_qp
  }

  pub fn decision(&self) -> QpDecision {
    lock(&self.decision).clone()
  }

  pub(crate) fn update_decision<R>(
    &self, f: impl FnOnce(&mut QpDecision) -> R,
  ) -> R {
    f(&mut lock(&self.decision))
  }

  /// Stores the size of the coded picture, in bits.
  pub fn set_actual_bits(&self, bits: u64) {
    self.actual_bits.store(bits, Ordering::Release);
  }

  pub fn actual_bits(&self) -> u64 {
    self.actual_bits.load(Ordering::Acquire)
  }
}
