// Copyright (c) 2019-2022, The ratectl contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! QP selection without rate feedback.

use crate::api::StreamParameters;
use crate::quantize::*;
use crate::rate::tables::*;
use crate::stats::{DistortionStats, PictureStats, NON_MOVING_SCORE_MAX};
use crate::util::clamp;

const KF_LOW: i32 = 400;
const KF_HIGH: i32 = 5000;
const STATIC_KF_GROUP_THRESH: u32 = 99;

fn minq_index(maxq: f64, x3: f64, x2: f64, x1: f64) -> u8 {
  let target = (((x3 * maxq + x2) * maxq + x1) * maxq).min(maxq);
  if target <= 2.0 {
    return 0;
  }
  select_qindex(target)
}

/// Lowest qindex an intra picture may use, per worst qindex, for low and
/// high motion content.
#[derive(Clone)]
pub struct MinqTables {
  kf_low_motion: [u8; QINDEX_RANGE],
  kf_high_motion: [u8; QINDEX_RANGE],
}

impl std::fmt::Debug for MinqTables {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str("MinqTables")
  }
}

impl MinqTables {
  pub fn new() -> Self {
    let mut t = MinqTables {
      kf_low_motion: [0; QINDEX_RANGE],
      kf_high_motion: [0; QINDEX_RANGE],
    };
    for i in 0..QINDEX_RANGE {
      let maxq = qindex_to_q(i as u8);
      t.kf_low_motion[i] = minq_index(maxq, 0.000001, -0.0004, 0.150);
      t.kf_high_motion[i] = minq_index(maxq, 0.0000021, -0.00125, 0.45);
    }
    t
  }

  /// Interpolates between the low and high motion tables by key frame
  /// boost.
  fn kf_active_quality(&self, qindex: u8, kf_boost: i32) -> i32 {
    let low = i32::from(self.kf_low_motion[qindex as usize]);
    let high = i32::from(self.kf_high_motion[qindex as usize]);
    if kf_boost > KF_HIGH {
      low
    } else if kf_boost < KF_LOW {
      high
    } else {
      let gap = KF_HIGH - KF_LOW;
      let offset = KF_HIGH - kf_boost;
      low + ((offset * (high - low)) + (gap >> 1)) / gap
    }
  }

  /// Content adaptive qindex of an intra picture.
  pub fn intra_qindex(
    &self, qindex: u8, activity: &DistortionStats, picture_area: u64,
  ) -> i32 {
    let non_moving =
      activity.non_moving_score.min(NON_MOVING_SCORE_MAX) as i32;
    let nms = NON_MOVING_SCORE_MAX as i32;
    let kf_boost = ((nms - non_moving) * (KF_HIGH - KF_LOW)) / nms + KF_LOW;

    let mut active_best = self.kf_active_quality(qindex, kf_boost);
    if activity.zero_motion_percentage >= STATIC_KF_GROUP_THRESH {
      active_best /= 3;
    }

    let mut q_adj_factor = 1.0;
    if picture_area <= 352 * 288 {
      q_adj_factor -= 0.25;
    }
    q_adj_factor += 0.05 - 0.001 * f64::from(activity.zero_motion_percentage);

    let q_val = qindex_to_q(active_best as u8);
    active_best + compute_qdelta(q_val, q_val * q_adj_factor)
  }
}

impl Default for MinqTables {
  fn default() -> Self {
    Self::new()
  }
}

/// QP of a picture when rate control is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedQp {
  pub qp: u8,
  pub base_qindex: u8,
}

/// Derives the QP of a picture from the nominal QP, its temporal layer and
/// its slice type only.
pub fn fixed_picture_qp(
  params: &StreamParameters, minq: &MinqTables, picture: &PictureStats,
) -> FixedQp {
  if let Some(qp) = picture.qp_override {
    let qp = clamp(qp, params.min_qp, params.max_qp);
    return FixedQp { qp, base_qindex: qp_to_qindex(qp) };
  }
  if !params.enable_qp_scaling {
    return FixedQp { qp: params.qp, base_qindex: qp_to_qindex(params.qp) };
  }

  let qindex = qp_to_qindex(params.qp);
  let q_val = qindex_to_q(qindex);
  let new_qindex = if picture.slice_type.is_intra() {
    if params.content_based_qps {
      minq.intra_qindex(
        qindex,
        &picture.distortion().snapshot(),
        params.picture_area(),
      )
    } else {
      i32::from(qindex) + compute_qdelta(q_val, q_val * FIXED_QP_INTRA_RATIO)
    }
  } else {
    let row = usize::from(params.hierarchy_depth == 4);
    let layer = picture.temporal_layer.min(MAX_TEMPORAL_LAYERS - 1);
    let ratio = FIXED_QP_LAYER_RATIO[row][layer];
    i32::from(qindex) + compute_qdelta(q_val, q_val * ratio)
  };

  let base_qindex = clamp(
    new_qindex,
    i32::from(qp_to_qindex(params.min_qp)),
    i32::from(qp_to_qindex(params.max_qp)),
  ) as u8;
  let qp = clamp(base_qindex >> 2, params.min_qp, params.max_qp);
  FixedQp { qp, base_qindex }
}
