// Copyright (c) 2019-2022, The ratectl contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::api::SliceType;
use crate::quantize::QP_RANGE;
use crate::rate::tables::*;
use crate::rate::RateControlError;
use crate::stats::{PictureStats, BLOCK_SIZE_LOG2, N_BINS};
use crate::util::clamp;

use itertools::izip;

use std::collections::TryReserveError;
use std::sync::Arc;

/// Lookahead statistics of one picture.
#[derive(Debug, Clone)]
pub struct HistogramEntry {
  pub picture_number: u64,
  registered: bool,
  /// The window starting at this picture has been searched.
  searched: bool,
  /// Number of window walks that still have to visit this entry.
  pub life_count: u32,
  pub is_coded: bool,
  pub total_bits_coded: u64,
  pub end_of_stream: bool,
  pub slice_type: SliceType,
  pub temporal_layer: usize,
  pub inter_histogram: [u32; N_BINS],
  pub intra_histogram: [u32; N_BINS],
  pub full_block_count: u32,
  /// Bits predicted for this picture at every QP visited so far.
  pub pred_bits_by_qp: [u64; QP_RANGE],
}

impl HistogramEntry {
  fn vacant(picture_number: u64) -> Self {
    HistogramEntry {
      picture_number,
      registered: false,
      searched: false,
      life_count: 0,
      is_coded: false,
      total_bits_coded: 0,
      end_of_stream: false,
      slice_type: SliceType::Bidirectional,
      temporal_layer: 0,
      inter_histogram: [0; N_BINS],
      intra_histogram: [0; N_BINS],
      full_block_count: 0,
      pred_bits_by_qp: [0; QP_RANGE],
    }
  }

  pub const fn is_registered(&self) -> bool {
    self.registered
  }
}

/// Circular queue of lookahead statistics indexed by picture number.
///
/// Slot `p % capacity` holds picture `p`. A slot is handed to the next
/// picture that maps onto it only once its current occupant has been coded
/// and no pending window references it anymore.
#[derive(Debug)]
pub struct HistogramQueue {
  entries: Vec<HistogramEntry>,
  head: usize,
  window_len: usize,
}

impl HistogramQueue {
  /// # Errors
  ///
  /// Returns `TryReserveError` if the slots cannot be allocated.
  pub fn new(
    capacity: usize, window_len: usize,
  ) -> Result<Self, TryReserveError> {
    let mut entries = Vec::new();
    entries.try_reserve_exact(capacity)?;
    entries.extend((0..capacity as u64).map(HistogramEntry::vacant));
    Ok(HistogramQueue { entries, head: 0, window_len })
  }

  pub fn capacity(&self) -> usize {
    self.entries.len()
  }

  /// Length of a complete lookahead window.
  pub const fn window_len(&self) -> usize {
    self.window_len
  }

  fn slot(&self, picture_number: u64) -> usize {
    (picture_number % self.entries.len() as u64) as usize
  }

  /// Whether the window starting at `picture_number` was already walked.
  fn window_searched(&self, picture_number: u64) -> bool {
    let entry = &self.entries[self.slot(picture_number)];
    entry.picture_number > picture_number
      || (entry.picture_number == picture_number && entry.searched)
  }

  /// Copies the distortion statistics of a picture into its slot.
  ///
  /// # Errors
  ///
  /// Returns `HistogramSlotOccupied` if the slot still belongs to an older
  /// picture, which means the queue is too small for the pipeline depth.
  pub fn register(
    &mut self, picture: &PictureStats,
  ) -> Result<(), RateControlError> {
    let p = picture.picture_number;
    let window_len = self.window_len as u64;
    // Windows walked before the picture arrived never visit it.
    let pending = (p.saturating_sub(window_len - 1)..=p)
      .filter(|&q| !self.window_searched(q))
      .count();
    let slot = self.slot(p);
    let entry = &mut self.entries[slot];
    if entry.picture_number != p || entry.registered {
      return Err(RateControlError::HistogramSlotOccupied {
        picture_number: p,
        occupant: entry.picture_number,
      });
    }

    let distortion = picture.distortion().snapshot();
    entry.registered = true;
    entry.life_count = pending as u32;
    entry.end_of_stream = picture.end_of_stream;
    entry.slice_type = picture.slice_type;
    entry.temporal_layer = picture.temporal_layer.min(MAX_TEMPORAL_LAYERS - 1);
    entry.inter_histogram = distortion.inter_histogram;
    entry.intra_histogram = distortion.intra_histogram;
    entry.full_block_count = distortion.full_block_count;

    Ok(())
  }

  pub fn get(&self, picture_number: u64) -> Option<&HistogramEntry> {
    let entry = &self.entries[self.slot(picture_number)];
    (entry.registered && entry.picture_number == picture_number)
      .then_some(entry)
  }

  /// Whether the slot of `picture_number` already moved past it.
  pub fn is_retired(&self, picture_number: u64) -> bool {
    self.entries[self.slot(picture_number)].picture_number > picture_number
  }

  /// Records the coded size of a picture. Returns `false` if the picture is
  /// not in the queue or was already coded.
  pub fn mark_coded(&mut self, picture_number: u64, bits: u64) -> bool {
    let slot = self.slot(picture_number);
    let entry = &mut self.entries[slot];
    if !entry.registered
      || entry.picture_number != picture_number
      || entry.is_coded
    {
      return false;
    }
    entry.is_coded = true;
    entry.total_bits_coded = bits;
    true
  }

  /// Frees the slots at the head whose pictures are coded and no longer
  /// referenced. Returns the number of slots freed.
  pub fn recycle(&mut self) -> usize {
    let capacity = self.entries.len() as u64;
    let mut freed = 0;
    loop {
      let entry = &mut self.entries[self.head];
      if !(entry.registered && entry.is_coded && entry.life_count == 0) {
        break;
      }
      *entry = HistogramEntry::vacant(entry.picture_number + capacity);
      self.head = (self.head + 1) % self.entries.len();
      freed += 1;
    }
    freed
  }

  /// Number of consecutive registered pictures starting at
  /// `picture_number`, stopping after the end of the stream and at a full
  /// window.
  pub fn available(&self, picture_number: u64) -> usize {
    let mut n = 0;
    while n < self.window_len {
      match self.get(picture_number + n as u64) {
        Some(entry) => {
          n += 1;
          if entry.end_of_stream {
            break;
          }
        }
        None => break,
      }
    }
    n
  }

  /// Window of the pictures available from `picture_number` on.
  pub fn window(&mut self, picture_number: u64) -> Window<'_> {
    let len = self.available(picture_number);
    let start = self.slot(picture_number);
    Window {
      entries: &mut self.entries,
      start,
      len,
      span: self.window_len,
      first: picture_number,
    }
  }
}

/// Consecutive entries of the queue seen by one QP decision.
#[derive(Debug)]
pub struct Window<'a> {
  entries: &'a mut [HistogramEntry],
  start: usize,
  len: usize,
  /// Length of a complete window.
  span: usize,
  first: u64,
}

impl<'a> Window<'a> {
  pub const fn len(&self) -> usize {
    self.len
  }

  pub const fn is_empty(&self) -> bool {
    self.len == 0
  }

  /// Picture number of the first entry.
  pub const fn first_picture(&self) -> u64 {
    self.first
  }

  pub fn iter(&self) -> impl Iterator<Item = &HistogramEntry> {
    let (front, back) = self.entries.split_at(self.start);
    back.iter().chain(front.iter()).take(self.len)
  }

  pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut HistogramEntry> {
    let (front, back) = self.entries.split_at_mut(self.start);
    back.iter_mut().chain(front.iter_mut()).take(self.len)
  }

  pub fn first(&self) -> Option<&HistogramEntry> {
    self.iter().next()
  }

  /// Drops the reference of this window on every registered entry it
  /// spans, including the ones past a gap that cut the window short.
  fn release(&mut self) {
    let capacity = self.entries.len() as u64;
    for k in 0..self.span as u64 {
      let p = self.first + k;
      let entry = &mut self.entries[(p % capacity) as usize];
      if !entry.registered || entry.picture_number != p {
        continue;
      }
      if k == 0 {
        entry.searched = true;
      }
      entry.life_count = entry.life_count.saturating_sub(1);
    }
  }
}

/// Stream constants the allocator works with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorParams {
  pub min_qp: u8,
  pub max_qp: u8,
  /// Nominal QP; the search never leaves `nominal_qp ± 20`.
  pub nominal_qp: u8,
  pub intra_period_length: u64,
  /// Length of a complete window.
  pub window_len: usize,
  pub channel_bits_per_frame: u64,
  pub buffer_size: i64,
  /// Picture area in pixels.
  pub picture_area: u64,
}

const SEARCH_RANGE: u8 = 20;

/// Predicted bits of a GOP window, split per temporal layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GopBits {
  /// Bits of the intra picture starting the GOP.
  pub first: u64,
  pub total: u64,
  pub per_layer: [u64; MAX_TEMPORAL_LAYERS],
}

impl GopBits {
  /// Whether the leading intra picture takes more than 85% of the GOP.
  pub const fn expensive_intra(&self) -> bool {
    self.first * 100 > 85 * self.total
  }
}

/// Chooses the reference QP that makes a lookahead window fit its bit
/// budget.
#[derive(Debug, Clone)]
pub struct LookaheadAllocator {
  params: AllocatorParams,
  tables: Arc<RateTables>,
}

impl LookaheadAllocator {
  pub fn new(params: AllocatorParams, tables: Arc<RateTables>) -> Self {
    LookaheadAllocator { params, tables }
  }

  pub const fn params(&self) -> &AllocatorParams {
    &self.params
  }

  fn search_bounds(&self) -> (u8, u8) {
    let p = &self.params;
    let lo =
      clamp(p.nominal_qp.saturating_sub(SEARCH_RANGE), p.min_qp, p.max_qp);
    let hi =
      clamp(p.nominal_qp.saturating_add(SEARCH_RANGE), p.min_qp, p.max_qp);
    (lo, hi)
  }

  /// QP a picture of the window is coded at for a given reference QP.
  pub fn entry_qp(
    &self, reference_qp: u8, slice_type: SliceType, layer: usize,
  ) -> u8 {
    let offset = QP_OFFSET_LAYER[layer.min(MAX_TEMPORAL_LAYERS - 1)];
    let qp = clamp(
      reference_qp.saturating_add(offset),
      self.params.min_qp,
      self.params.max_qp,
    );
    if slice_type.is_intra() {
      (i32::from(qp) + INTRA_QP_OFFSET).max(0) as u8
    } else {
      qp
    }
  }

  /// Bits a not yet coded picture is expected to take at `qp`.
  pub fn predict_bits(&self, entry: &HistogramEntry, qp: u8) -> u64 {
    let layer = entry.temporal_layer;
    let intra_bits = self.tables.intra_bits(qp, layer);
    let bits = if entry.slice_type.is_intra() {
      entry
        .intra_histogram
        .iter()
        .zip(intra_bits)
        .map(|(&n, &b)| u64::from(n) * u64::from(b))
        .sum()
    } else {
      let inter_bits = self.tables.inter_bits(qp, layer);
      let (mut accum, mut accum_intra) = (0u64, 0u64);
      for (&n, &b, &n_intra, &b_intra) in izip!(
        &entry.inter_histogram,
        inter_bits,
        &entry.intra_histogram,
        intra_bits
      ) {
        accum += u64::from(n) * u64::from(b);
        accum_intra += u64::from(n_intra) * u64::from(b_intra);
      }
      if accum > 3 * accum_intra {
        accum_intra
      } else {
        accum
      }
    };

    // Border blocks are not binned; scale to the whole picture.
    if entry.full_block_count == 0 {
      bits
    } else {
      let binned_area =
        u64::from(entry.full_block_count) << (2 * BLOCK_SIZE_LOG2);
      (u128::from(bits) * u128::from(self.params.picture_area)
        / u128::from(binned_area)) as u64
    }
  }

  /// Bits of the whole window at `reference_qp`. Every visited entry keeps
  /// its prediction in `pred_bits_by_qp`.
  pub fn window_bits(&self, window: &mut Window, reference_qp: u8) -> u64 {
    let mut total = 0u64;
    for entry in window.iter_mut() {
      let qp =
        self.entry_qp(reference_qp, entry.slice_type, entry.temporal_layer);
      let bits = if entry.is_coded {
        entry.total_bits_coded
      } else {
        self.predict_bits(entry, qp)
      };
      entry.pred_bits_by_qp[qp as usize] = bits;
      total = total.saturating_add(bits);
    }
    total
  }

  /// Bit budget of a window of `frames` pictures, corrected by the buffer
  /// drift.
  pub fn target_bits(&self, frames: usize, buffer_drift: i64) -> u64 {
    let size = self.params.buffer_size;
    let percent = if buffer_drift > 10 * size {
      130
    } else if buffer_drift > 8 * size {
      120
    } else if buffer_drift > 4 * size {
      110
    } else if buffer_drift < -8 * size {
      80
    } else if buffer_drift < -4 * size {
      90
    } else {
      100
    };
    self.params.channel_bits_per_frame * frames as u64 * percent / 100
  }

  /// Selects the reference QP of the window starting at its first picture.
  ///
  /// A complete window is searched greedily: starting at
  /// `previous_reference_qp`, the first step decides the direction and the
  /// search stops at the first QP that does not get closer to the budget.
  /// A truncated window at the end of the stream only nudges
  /// `previous_reference_qp`.
  ///
  /// Each visited entry gives up one reference.
  #[profiling::function]
  pub fn select_reference_qp(
    &self, window: &mut Window, previous_reference_qp: u8, buffer_drift: i64,
  ) -> u8 {
    let (search_min, search_max) = self.search_bounds();
    let selected = if window.len() < self.params.window_len {
      self.nudge_reference_qp(window, previous_reference_qp, buffer_drift)
    } else {
      let target = self.target_bits(window.len(), buffer_drift);
      let start = clamp(previous_reference_qp, search_min, search_max);
      let mut qp = start;
      let mut selected = start;
      let mut min_distance = u64::MAX;
      let mut step: i8 = 1;
      loop {
        let bits = self.window_bits(window, qp);
        let distance = bits.abs_diff(target);
        if min_distance >= distance {
          min_distance = distance;
          selected = qp;
        } else {
          break;
        }
        if qp == start {
          step = if bits > target { 1 } else { -1 };
        }
        match qp.checked_add_signed(step) {
          Some(next) if (search_min..=search_max).contains(&next) => qp = next,
          _ => break,
        }
      }
      log::debug!(
        "picture {}: window of {} targets {} bits, reference qp {}",
        window.first_picture(),
        window.len(),
        target,
        selected
      );
      selected
    };
    window.release();
    clamp(selected, search_min, search_max)
  }

  fn nudge_reference_qp(
    &self, window: &mut Window, previous_reference_qp: u8, buffer_drift: i64,
  ) -> u8 {
    let size = self.params.buffer_size;
    let mut qp = previous_reference_qp;
    if buffer_drift > 8 * size {
      qp = qp.saturating_sub(2);
    } else if buffer_drift > 4 * size {
      qp = qp.saturating_sub(1);
    } else if buffer_drift < -4 * size {
      qp = qp.saturating_add(2);
    } else if buffer_drift < -2 * size {
      qp = qp.saturating_add(1);
    }

    let period = self.params.intra_period_length + 1;
    if (window.len() as u64) < period && window.first_picture() % period == 0
    {
      qp = qp.saturating_add(1);
    }
    qp = clamp(qp, self.params.min_qp, self.params.max_qp);

    if let Some(entry) = window.iter_mut().next() {
      let entry_qp =
        self.entry_qp(qp, entry.slice_type, entry.temporal_layer);
      let bits = if entry.is_coded {
        entry.total_bits_coded
      } else {
        self.predict_bits(entry, entry_qp)
      };
      entry.pred_bits_by_qp[entry_qp as usize] = bits;
    }
    log::debug!(
      "picture {}: truncated window of {}, reference qp {} -> {}",
      window.first_picture(),
      window.len(),
      previous_reference_qp,
      qp
    );
    qp
  }

  /// Splits the predicted bits of a GOP long window per temporal layer.
  pub fn gop_bits(&self, window: &mut Window, reference_qp: u8) -> GopBits {
    let mut gop = GopBits::default();
    let len = (self.params.intra_period_length + 1) as usize;
    for (i, entry) in window.iter_mut().take(len).enumerate() {
      let qp =
        self.entry_qp(reference_qp, entry.slice_type, entry.temporal_layer);
      let bits = if entry.is_coded {
        entry.total_bits_coded
      } else {
        self.predict_bits(entry, qp)
      };
      entry.pred_bits_by_qp[qp as usize] = bits;
      if i == 0 {
        gop.first = bits;
      }
      gop.total += bits;
      gop.per_layer[entry.temporal_layer] += bits;
    }
    gop
  }
}
