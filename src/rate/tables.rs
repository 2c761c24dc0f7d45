// Copyright (c) 2019-2022, The ratectl contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::quantize::QP_RANGE;
use crate::stats::N_BINS;

/// Deepest supported prediction hierarchy has this many temporal layers.
pub const MAX_TEMPORAL_LAYERS: usize = 6;

/// QP offset of every temporal layer relative to the reference QP.
pub const QP_OFFSET_LAYER: [u8; MAX_TEMPORAL_LAYERS] = [1, 2, 4, 5, 6, 7];

/// Extra offset for intra pictures, on top of the layer offset.
pub const INTRA_QP_OFFSET: i32 = -1;

/// Share of the GOP bitrate per temporal layer, in percent, indexed by
/// hierarchy depth.
pub const RATE_PERCENTAGE_LAYER: [[u64; MAX_TEMPORAL_LAYERS];
  MAX_TEMPORAL_LAYERS] = [
  [100, 0, 0, 0, 0, 0],
  [70, 30, 0, 0, 0, 0],
  [70, 15, 15, 0, 0, 0],
  [55, 15, 15, 15, 0, 0],
  [40, 15, 15, 15, 15, 0],
  [30, 10, 15, 15, 15, 15],
];

/// Target quantizer ratio per temporal layer when rate control is off.
/// The second row applies to 5-level hierarchies.
pub const FIXED_QP_LAYER_RATIO: [[f64; MAX_TEMPORAL_LAYERS]; 2] = [
  [0.40, 0.70, 0.85, 1.0, 1.0, 1.0],
  [0.35, 0.60, 0.80, 0.90, 1.0, 1.0],
];

/// Target quantizer ratio of intra pictures when rate control is off.
pub const FIXED_QP_INTRA_RATIO: f64 = 0.25;

/// Which histogram a bits table applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinKind {
  Inter,
  Intra,
}

/// Predicted bits per fully covered 64x64 block, for every QP, temporal
/// layer and distortion bin.
#[derive(Clone)]
pub struct RateTables {
  inter: Box<[u32]>,
  intra: Box<[u32]>,
}

impl std::fmt::Debug for RateTables {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RateTables").field("entries", &self.inter.len()).finish()
  }
}

const fn offset(qp: u8, layer: usize) -> usize {
  (qp as usize * MAX_TEMPORAL_LAYERS + layer) * N_BINS
}

impl RateTables {
  /// Builds the tables from a generator called once per entry.
  pub fn from_fn(f: impl Fn(BinKind, u8, usize, usize) -> u32) -> Self {
    let len = QP_RANGE * MAX_TEMPORAL_LAYERS * N_BINS;
    let mut inter = Vec::with_capacity(len);
    let mut intra = Vec::with_capacity(len);
    for qp in 0..QP_RANGE as u8 {
      for layer in 0..MAX_TEMPORAL_LAYERS {
        for bin in 0..N_BINS {
          inter.push(f(BinKind::Inter, qp, layer, bin));
          intra.push(f(BinKind::Intra, qp, layer, bin));
        }
      }
    }
    RateTables {
      inter: inter.into_boxed_slice(),
      intra: intra.into_boxed_slice(),
    }
  }

  /// Bits per block of every inter distortion bin.
  pub fn inter_bits(&self, qp: u8, layer: usize) -> &[u32] {
    let o = offset(qp, layer.min(MAX_TEMPORAL_LAYERS - 1));
    &self.inter[o..o + N_BINS]
  }

  /// Bits per block of every intra distortion bin.
  pub fn intra_bits(&self, qp: u8, layer: usize) -> &[u32] {
    let o = offset(qp, layer.min(MAX_TEMPORAL_LAYERS - 1));
    &self.intra[o..o + N_BINS]
  }
}

// Calibrated on 1080p content: bits of a 64x64 block at QP 0 for the first
// bin, halving every 6 QP.
const INTER_BITS_QP0: f64 = 6000.0;
const INTRA_BITS_QP0: f64 = 24000.0;
const LAYER_SCALE: [f64; MAX_TEMPORAL_LAYERS] =
  [1.0, 0.85, 0.72, 0.61, 0.52, 0.44];

impl Default for RateTables {
  fn default() -> Self {
    RateTables::from_fn(|kind, qp, layer, bin| {
      let base = match kind {
        BinKind::Inter => INTER_BITS_QP0 * LAYER_SCALE[layer],
        BinKind::Intra => INTRA_BITS_QP0,
      };
      let bits = base
        * ((bin + 1) as f64).powf(0.8)
        * (-(f64::from(qp)) / 6.0).exp2();
      bits.round().max(1.0) as u32
    })
  }
}
