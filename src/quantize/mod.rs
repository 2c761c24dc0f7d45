// Copyright (c) 2017-2022, The ratectl contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

#![allow(non_upper_case_globals)]

mod tables;

pub use tables::*;

/// Largest QP accepted by the engine.
pub const MAX_QP: u8 = 63;
/// Number of QP values, `0..=MAX_QP`.
pub const QP_RANGE: usize = MAX_QP as usize + 1;

pub fn ac_q(qindex: u8) -> u16 {
  ac_qlookup_Q3[qindex as usize]
}

/// Converts a QP into a qindex. Values above `MAX_QP` saturate.
pub fn qp_to_qindex(qp: u8) -> u8 {
  quantizer_to_qindex[qp.min(MAX_QP) as usize]
}

/// Real quantizer value of a qindex, scaled down to the legacy Q range.
pub fn qindex_to_q(qindex: u8) -> f64 {
  f64::from(ac_q(qindex)) / 4.0
}

/// First qindex whose quantizer reaches `q`.
///
/// The last index is returned when `q` is beyond the table.
pub fn select_qindex(q: f64) -> u8 {
  (MINQ..MAXQ).find(|&i| qindex_to_q(i as u8) >= q).unwrap_or(MAXQ) as u8
}

/// Number of qindex steps between the indices reaching `q_start` and
/// `q_target`.
pub fn compute_qdelta(q_start: f64, q_target: f64) -> i32 {
  let start_index = select_qindex(q_start);
  let target_index = select_qindex(q_target);

  i32::from(target_index) - i32::from(start_index)
}

/// Quantizer step applied to the coefficients of a picture coded at `qp`.
pub fn qp_step(qp: u8) -> f64 {
  qindex_to_q(qp_to_qindex(qp))
}
