// Copyright (c) 2019-2022, The ratectl contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! The rate control kernel and the state it owns for one stream.

pub mod buffer;
pub mod fixed;
pub mod interval;
pub mod lookahead;
pub mod tables;

use crate::api::{Config, InvalidConfig, StreamParameters};
use crate::quantize::{qp_to_qindex, QP_RANGE};
use crate::stats::PictureStats;
use crate::util::{blend_3_1, clamp};

use self::buffer::VirtualBuffer;
use self::fixed::{fixed_picture_qp, MinqTables};
use self::interval::*;
use self::lookahead::*;
use self::tables::MAX_TEMPORAL_LAYERS;

use thiserror::Error;

use std::sync::Arc;

/// Structural violations the kernel cannot recover from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RateControlError {
  /// The interval ring is too small for the pictures in flight.
  #[error("no interval contains picture {picture_number}")]
  IntervalNotFound {
    /// The picture being processed.
    picture_number: u64,
  },
  /// The histogram queue is too small for the lookahead in flight.
  #[error(
    "histogram slot of picture {picture_number} still holds picture {occupant}"
  )]
  HistogramSlotOccupied {
    /// The picture being registered.
    picture_number: u64,
    /// The picture holding the slot.
    occupant: u64,
  },
}

/// Work items the kernel consumes.
#[derive(Debug, Clone)]
pub enum RateControlTask {
  /// A picture waits for its QP.
  PictureManagerResult {
    picture: Arc<PictureStats>,
    /// Segment of the lookahead window the task was posted for.
    segment_index: u32,
  },
  /// A picture was coded; its actual size is set on the picture.
  PacketizationFeedbackResult { picture: Arc<PictureStats> },
  /// Coded size of one row of blocks. Accepted and ignored.
  EntropyCodingRowFeedbackResult { picture_number: u64, row: u32, bits: u64 },
}

/// A picture whose QP has been assigned.
#[derive(Debug, Clone)]
pub struct RateControlResult {
  pub picture: Arc<PictureStats>,
}

/// Counters describing a rate control session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineSummary {
  pub pictures_assigned: u64,
  pub feedback_count: u64,
  pub buffer_level: i64,
  pub buffer_drift: i64,
  /// Moving average of the QP of the base layer pictures.
  pub base_layer_qp_average: u32,
  /// Moving average of the QP of the intra pictures starting a GOP.
  pub base_layer_intra_qp_average: u32,
  /// Size in bits of the largest finished GOP.
  pub largest_gop_bits: u64,
  /// Finished GOPs larger than the configured maximum buffer size.
  pub overshoot_count: u64,
}

/// Outcome of the lookahead allocation for one picture.
#[derive(Debug, Clone, Copy)]
struct Allocation {
  best_pred_qp: u8,
  intra_selected_org_qp: u8,
  predicted_bits: u64,
  gop: Option<GopBits>,
}

/// Rate control state of one stream.
#[derive(Debug)]
pub struct RateControlEngine {
  params: StreamParameters,
  buffer: VirtualBuffer,
  queue: HistogramQueue,
  allocator: LookaheadAllocator,
  intervals: IntervalRing,
  minq: MinqTables,
  frames_in_interval: [u64; MAX_TEMPORAL_LAYERS],
  previous_selected_ref_qp: u8,
  /// Newest picture whose reference QP was carried forward.
  max_coded_poc: Option<u64>,
  base_layer_qp_average: u32,
  base_layer_intra_qp_average: u32,
  pictures_assigned: u64,
  feedback_count: u64,
  largest_gop_bits: u64,
  overshoot_count: u64,
}

impl RateControlEngine {
  /// Allocates every fixed size structure of the engine.
  ///
  /// # Errors
  ///
  /// Returns `InvalidConfig::ResourceExhausted` if the histogram queue or
  /// the interval ring cannot be allocated.
  pub fn new(config: &Config) -> Result<Self, InvalidConfig> {
    let params = *config.stream_parameters();
    let gop_length = params.gop_length();
    let window_len = params.window_len();
    let parallel_gops = config.parallel_gops();

    let queue_capacity = usize::try_from(gop_length)
      .ok()
      .and_then(|len| len.checked_mul(parallel_gops))
      .map(|len| len.max(4 * (params.lookahead_depth + 1)))
      .ok_or(InvalidConfig::ResourceExhausted)?;
    let queue = HistogramQueue::new(queue_capacity, window_len)
      .map_err(|_| InvalidConfig::ResourceExhausted)?;
    let intervals =
      IntervalRing::new(parallel_gops, gop_length, params.hierarchy_depth + 1)
        .map_err(|_| InvalidConfig::ResourceExhausted)?;

    let buffer = VirtualBuffer::new(params.channel_bits_per_frame());
    let allocator = LookaheadAllocator::new(
      AllocatorParams {
        min_qp: params.min_qp,
        max_qp: params.max_qp,
        nominal_qp: params.qp,
        intra_period_length: params.intra_period_length,
        window_len,
        channel_bits_per_frame: buffer.channel_bits_per_frame(),
        buffer_size: buffer.size(),
        picture_area: params.picture_area(),
      },
      config.rate_tables(),
    );

    log::debug!(
      "rate control for {}: {} histogram slots, {} intervals",
      params,
      queue_capacity,
      parallel_gops
    );

    Ok(RateControlEngine {
      params,
      buffer,
      queue,
      allocator,
      intervals,
      minq: MinqTables::new(),
      frames_in_interval: frames_per_layer(
        params.intra_period_length,
        params.hierarchy_depth,
      ),
      previous_selected_ref_qp: params.qp,
      max_coded_poc: None,
      base_layer_qp_average: u32::from(params.qp),
      base_layer_intra_qp_average: u32::from(params.qp),
      pictures_assigned: 0,
      feedback_count: 0,
      largest_gop_bits: 0,
      overshoot_count: 0,
    })
  }

  pub const fn stream_parameters(&self) -> &StreamParameters {
    &self.params
  }

  pub const fn buffer(&self) -> &VirtualBuffer {
    &self.buffer
  }

  /// Reference QP the next lookahead search starts from.
  pub const fn reference_qp(&self) -> u8 {
    self.previous_selected_ref_qp
  }

  pub const fn frames_in_interval(&self) -> &[u64; MAX_TEMPORAL_LAYERS] {
    &self.frames_in_interval
  }

  pub const fn intervals(&self) -> &IntervalRing {
    &self.intervals
  }

  pub fn summary(&self) -> EngineSummary {
    EngineSummary {
      pictures_assigned: self.pictures_assigned,
      feedback_count: self.feedback_count,
      buffer_level: self.buffer.level(),
      buffer_drift: self.buffer.drift(),
      base_layer_qp_average: self.base_layer_qp_average,
      base_layer_intra_qp_average: self.base_layer_intra_qp_average,
      largest_gop_bits: self.largest_gop_bits,
      overshoot_count: self.overshoot_count,
    }
  }

  /// Adds the lookahead statistics of a picture to the histogram queue.
  ///
  /// Registering a picture twice, or after it left the queue, is a no-op.
  /// Nothing is kept when rate control is off.
  ///
  /// # Errors
  ///
  /// Returns `HistogramSlotOccupied` if the queue has no room for the
  /// picture.
  pub fn register_lookahead(
    &mut self, picture: &PictureStats,
  ) -> Result<(), RateControlError> {
    if !self.params.uses_feedback() {
      return Ok(());
    }
    let p = picture.picture_number;
    self.queue.recycle();
    if self.queue.get(p).is_some() || self.queue.is_retired(p) {
      log::debug!("picture {} already went through the lookahead", p);
      return Ok(());
    }
    self.queue.register(picture)
  }

  /// Dispatches one task.
  ///
  /// # Errors
  ///
  /// Returns a `RateControlError` when the engine state can no longer be
  /// trusted; the stream has to be stopped.
  pub fn process(
    &mut self, task: RateControlTask,
  ) -> Result<Option<RateControlResult>, RateControlError> {
    match task {
      RateControlTask::PictureManagerResult { picture, segment_index } => {
        log::trace!(
          "picture {}: qp request for segment {}",
          picture.picture_number,
          segment_index
        );
        self.assign(picture).map(Some)
      }
      RateControlTask::PacketizationFeedbackResult { picture } => {
        self.feedback(&picture)?;
        Ok(None)
      }
      RateControlTask::EntropyCodingRowFeedbackResult {
        picture_number,
        row,
        bits,
      } => {
        log::trace!(
          "picture {}: row {} took {} bits",
          picture_number,
          row,
          bits
        );
        Ok(None)
      }
    }
  }

  fn assign(
    &mut self, picture: Arc<PictureStats>,
  ) -> Result<RateControlResult, RateControlError> {
    if let Some(qp) = picture.assigned_qp() {
      log::warn!(
        "picture {} already has qp {}, request dropped",
        picture.picture_number,
        qp
      );
      return Ok(RateControlResult { picture });
    }

    let (qp, base_qindex) = if self.params.uses_feedback() {
      let qp = self.feedback_qp(&picture)?;
      (qp, qp_to_qindex(qp))
    } else {
      let fixed = fixed_picture_qp(&self.params, &self.minq, &picture);
      (fixed.qp, fixed.base_qindex)
    };

    let block_count = picture.block_count();
    picture.update_decision(|d| {
      d.assigned_qp = Some(qp);
      d.base_qindex = base_qindex;
      d.block_qps = vec![qp; block_count];
    });
    self.pictures_assigned += 1;

    Ok(RateControlResult { picture })
  }

  /// Picks the reference QP for the window starting at `picture` and
  /// derives the picture's predicted QP from it.
  fn allocate(
    &mut self, picture: &PictureStats,
  ) -> Result<Allocation, RateControlError> {
    let p = picture.picture_number;
    let (min_qp, max_qp) = (self.params.min_qp, self.params.max_qp);

    self.queue.recycle();
    if self.queue.get(p).is_none() {
      log::warn!("picture {} has no lookahead statistics yet", p);
      self.queue.register(picture)?;
    }

    let allocator = &self.allocator;
    let window_len = self.queue.window_len();
    let mut window = self.queue.window(p);
    let reaches_end = window.iter().any(|e| e.end_of_stream);
    if window.len() < window_len && !reaches_end {
      log::warn!(
        "picture {}: lookahead window of {} pictures, expected {}",
        p,
        window.len(),
        window_len
      );
    }

    let searched = allocator.select_reference_qp(
      &mut window,
      self.previous_selected_ref_qp,
      self.buffer.drift(),
    );
    let mut selected = searched;
    let mut intra_selected_org_qp = 0;
    let mut gop = None;

    let gop_first = p % self.params.gop_length() == 0;
    if gop_first && window.len() as u64 > self.params.intra_period_length {
      if p > 0 {
        intra_selected_org_qp = selected;
      } else {
        selected = clamp(selected.saturating_add(1), min_qp, max_qp);
      }
      let bits = allocator.gop_bits(&mut window, selected);
      if bits.expensive_intra() {
        selected = clamp(selected.saturating_sub(3), min_qp, max_qp);
      }
      gop = Some(bits);
    }
    if selected != searched {
      allocator.window_bits(&mut window, selected);
    }

    let predictions =
      window.first().map_or([0; QP_RANGE], |e| e.pred_bits_by_qp);

    if self.max_coded_poc.map_or(true, |m| p > m)
      && picture.temporal_layer < 2
      && !picture.end_of_stream_region
    {
      self.previous_selected_ref_qp = selected;
      self.max_coded_poc = Some(p);
    }

    let best_pred_qp =
      allocator.entry_qp(selected, picture.slice_type, picture.temporal_layer);
    let predicted_bits = predictions[usize::from(best_pred_qp)];
    picture.update_decision(|d| {
      d.best_pred_qp = best_pred_qp;
      d.intra_selected_org_qp = intra_selected_org_qp;
      d.predicted_bits_by_qp = predictions;
    });

    Ok(Allocation { best_pred_qp, intra_selected_org_qp, predicted_bits, gop })
  }

  #[profiling::function]
  fn feedback_qp(
    &mut self, picture: &PictureStats,
  ) -> Result<u8, RateControlError> {
    let p = picture.picture_number;
    let allocation = self.allocate(picture)?;
    let idx = self.intervals.find_interval(p)?;

    let setup = LayerSetup {
      target_bitrate: self.params.target_bitrate,
      frame_rate: self.params.frame_rate,
      hierarchy_depth: self.params.hierarchy_depth,
      frames_in_interval: self.frames_in_interval,
      bits_per_layer: allocation.gop.map(|g| g.per_layer),
      picture_area: self.params.picture_area(),
    };
    let interval = self.intervals.get_mut(idx);
    let first_in_interval = p == interval.first_poc;
    if first_in_interval {
      interval.start(&setup, allocation.best_pred_qp);
    }
    if picture.end_of_stream {
      self.intervals.set_end_of_stream(idx, p);
    }

    let input = PictureQpInput {
      picture_number: p,
      slice_type: picture.slice_type,
      best_pred_qp: allocation.best_pred_qp,
      intra_selected_org_qp: allocation.intra_selected_org_qp,
      end_of_stream_region: picture.end_of_stream_region,
    };
    let (min_qp, max_qp) = (self.params.min_qp, self.params.max_qp);
    let qp = self.intervals.assign_qp(idx, &input, min_qp, max_qp);

    if picture.temporal_layer == 0 {
      self.base_layer_qp_average =
        blend_3_1(self.base_layer_qp_average, u32::from(qp));
    }
    if picture.slice_type.is_intra() && first_in_interval {
      let interval = self.intervals.get_mut(idx);
      interval.first_picture_predicted_qp = allocation.best_pred_qp;
      interval.first_picture_actual_qp = qp;
      interval.first_picture_actual_qp_assigned = true;
      interval.first_picture_predicted_bits = allocation.predicted_bits;
      interval.scene_change_in_gop = picture.scene_change_in_gop;
      interval.intra_frames_qp = qp;
      self.base_layer_intra_qp_average =
        blend_3_1(self.base_layer_intra_qp_average, u32::from(qp));
    }

    log::debug!(
      "picture {} ({}, layer {}): predicted qp {}, assigned {}",
      p,
      picture.slice_type,
      picture.temporal_layer,
      allocation.best_pred_qp,
      qp
    );
    Ok(qp)
  }

  fn feedback(
    &mut self, picture: &PictureStats,
  ) -> Result<(), RateControlError> {
    let p = picture.picture_number;
    let Some(qp) = picture.assigned_qp() else {
      log::warn!("feedback for picture {} without a qp, dropped", p);
      return Ok(());
    };
    if !self.params.uses_feedback() {
      self.feedback_count += 1;
      return Ok(());
    }

    // Assigned pictures stay queued until their first feedback.
    let bits = picture.actual_bits();
    if !self.queue.mark_coded(p, bits) {
      log::warn!("repeated feedback for picture {}, dropped", p);
      return Ok(());
    }
    self.feedback_count += 1;
    self.buffer.update(bits);
    self.queue.recycle();

    let idx = self.intervals.find_interval(p)?;
    let distortion = picture.distortion().snapshot().total_distortion;
    let layer = self.intervals.get_mut(idx).layer_mut(picture.temporal_layer);
    let modelled = layer.predicted_bits(distortion, qp);
    layer.update(bits, distortion, qp);
    log::trace!(
      "picture {}: {} bits at qp {} (model {}), buffer level {}, drift {}",
      p,
      bits,
      qp,
      modelled,
      self.buffer.level(),
      self.buffer.drift()
    );

    if let Some(done) = self.intervals.record_feedback(idx, p, bits) {
      self.largest_gop_bits =
        self.largest_gop_bits.max(done.total_actual_bits);
      if let Some(max) = self.params.max_buffer_size {
        if done.total_actual_bits > max {
          self.overshoot_count += 1;
          log::warn!(
            "gop {}-{} took {} bits, {}% over the maximum buffer size",
            done.first_poc,
            done.last_poc,
            done.total_actual_bits,
            (done.total_actual_bits - max) * 100 / max.max(1)
          );
        }
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::api::{RateControlMode, SliceType};
  use crate::stats::BlockDistortion;
  use pretty_assertions::assert_eq;

  fn config(params: StreamParameters) -> Config {
    Config::new().with_stream_parameters(params).with_parallel_gops(4)
  }

  fn short_gops() -> StreamParameters {
    StreamParameters {
      width: 640,
      height: 384,
      intra_period_length: 7,
      lookahead_depth: 7,
      hierarchy_depth: 2,
      target_bitrate: 1_000_000,
      ..Default::default()
    }
  }

  fn picture(p: u64, params: &StreamParameters) -> Arc<PictureStats> {
    let gop = params.gop_length();
    let (slice_type, layer) = if p % gop == 0 {
      (SliceType::Intra, 0)
    } else if p % 4 == 0 {
      (SliceType::Predicted, 0)
    } else if p % 2 == 0 {
      (SliceType::Bidirectional, 1)
    } else {
      (SliceType::Bidirectional, 2)
    };
    let stats = PictureStats::new(p, slice_type, layer, params.block_count());
    let blocks = vec![
      BlockDistortion {
        inter_sad: 2500,
        intra_sad: 6000,
        fully_covered: true
      };
      params.full_block_count()
    ];
    stats.distortion().accumulate(slice_type, &blocks);
    Arc::new(stats)
  }

  fn assign(
    engine: &mut RateControlEngine, picture: &Arc<PictureStats>,
  ) -> u8 {
    let task = RateControlTask::PictureManagerResult {
      picture: picture.clone(),
      segment_index: 0,
    };
    let result = engine.process(task).unwrap().unwrap();
    result.picture.assigned_qp().unwrap()
  }

  fn code(
    engine: &mut RateControlEngine, picture: &Arc<PictureStats>, bits: u64,
  ) {
    picture.set_actual_bits(bits);
    let task = RateControlTask::PacketizationFeedbackResult {
      picture: picture.clone(),
    };
    assert!(engine.process(task).unwrap().is_none());
  }

  #[test]
  fn queue_covers_lookahead_and_gops() {
    let engine = config(short_gops()).new_engine().unwrap();
    assert_eq!(engine.queue.capacity(), 32);
    assert_eq!(engine.intervals().capacity(), 4);
    assert_eq!(engine.frames_in_interval(), &[2, 2, 4, 0, 0, 0]);
  }

  #[test]
  fn every_block_gets_the_picture_qp() {
    let params = short_gops();
    let mut engine = config(params).new_engine().unwrap();
    let pictures: Vec<_> = (0..8).map(|p| picture(p, &params)).collect();
    for pic in &pictures {
      engine.register_lookahead(pic).unwrap();
    }
    let qp = assign(&mut engine, &pictures[0]);
    let decision = pictures[0].decision();
    assert_eq!(decision.block_qps.len(), params.block_count());
    assert!(decision.block_qps.iter().all(|&b| b == qp));
    assert_eq!(decision.base_qindex, qp_to_qindex(qp));
    let best = usize::from(decision.best_pred_qp);
    assert!(decision.predicted_bits_by_qp[best] > 0);
  }

  #[test]
  fn first_intra_is_recorded_in_its_interval() {
    let params = short_gops();
    let mut engine = config(params).new_engine().unwrap();
    let pictures: Vec<_> = (0..8).map(|p| picture(p, &params)).collect();
    for pic in &pictures {
      engine.register_lookahead(pic).unwrap();
    }
    let qp = assign(&mut engine, &pictures[0]);
    let interval = engine.intervals().get(0);
    assert!(interval.in_use);
    assert!(interval.first_picture_actual_qp_assigned);
    assert_eq!(interval.first_picture_actual_qp, qp);
    assert_eq!(interval.intra_frames_qp, qp);
  }

  #[test]
  fn finished_gops_move_the_ring_forward() {
    let params =
      StreamParameters { max_buffer_size: Some(1), ..short_gops() };
    let mut engine = config(params).new_engine().unwrap();
    let pictures: Vec<_> = (0..24).map(|p| picture(p, &params)).collect();
    for pic in &pictures {
      engine.register_lookahead(pic).unwrap();
    }
    for pic in &pictures[..16] {
      assign(&mut engine, pic);
    }
    for pic in pictures[..16].iter().rev() {
      code(&mut engine, pic, 20_000);
    }
    let summary = engine.summary();
    assert_eq!(summary.pictures_assigned, 16);
    assert_eq!(summary.feedback_count, 16);
    assert_eq!(summary.largest_gop_bits, 8 * 20_000);
    assert_eq!(summary.overshoot_count, 2);
    assert_eq!(engine.intervals().find_interval(32), Ok(0));
    assert_eq!(engine.intervals().find_interval(40), Ok(1));
  }

  #[test]
  fn missing_interval_is_fatal() {
    let params = short_gops();
    let mut engine =
      config(params).with_parallel_gops(2).new_engine().unwrap();
    let late = picture(20, &params);
    let task = RateControlTask::PictureManagerResult {
      picture: late,
      segment_index: 0,
    };
    assert_eq!(
      engine.process(task).unwrap_err(),
      RateControlError::IntervalNotFound { picture_number: 20 }
    );
  }

  #[test]
  fn unassigned_feedback_is_dropped() {
    let params = short_gops();
    let mut engine = config(params).new_engine().unwrap();
    let pic = picture(0, &params);
    code(&mut engine, &pic, 50_000);
    assert_eq!(engine.summary().feedback_count, 0);
    assert_eq!(engine.buffer().level(), engine.buffer().initial_level());
  }

  #[test]
  fn repeated_feedback_is_dropped() {
    let params = short_gops();
    let mut engine = config(params).new_engine().unwrap();
    let pictures: Vec<_> = (0..8).map(|p| picture(p, &params)).collect();
    for pic in &pictures {
      engine.register_lookahead(pic).unwrap();
    }
    for pic in &pictures {
      assign(&mut engine, pic);
    }
    code(&mut engine, &pictures[3], 40_000);
    let level = engine.buffer().level();
    code(&mut engine, &pictures[3], 40_000);
    assert_eq!(engine.buffer().level(), level);
    assert_eq!(engine.summary().feedback_count, 1);

    // Seven distinct pictures are still needed to finish the interval.
    for pic in &pictures[..7] {
      code(&mut engine, pic, 40_000);
    }
    assert_eq!(engine.intervals().find_interval(0), Ok(0));
    code(&mut engine, &pictures[7], 40_000);
    assert_eq!(engine.intervals().find_interval(32), Ok(0));
    assert_eq!(engine.summary().feedback_count, 8);
  }

  #[test]
  fn lagging_lookahead_keeps_the_queue_moving() {
    let params = StreamParameters { lookahead_depth: 3, ..short_gops() };
    let mut engine =
      config(params).with_parallel_gops(2).new_engine().unwrap();
    assert_eq!(engine.queue.capacity(), 16);

    let pictures: Vec<_> = (0..48).map(|p| picture(p, &params)).collect();
    for p in 0..48 {
      // Picture 4 shows up one window late.
      let ahead = if p == 1 { 2 } else { 3 };
      for pic in &pictures[p..(p + ahead + 1).min(48)] {
        engine.register_lookahead(pic).unwrap();
      }
      assign(&mut engine, &pictures[p]);
      code(&mut engine, &pictures[p], 30_000);
    }
    assert_eq!(engine.summary().feedback_count, 48);
    assert!(engine.queue.is_retired(40));
  }

  #[test]
  fn row_feedback_is_ignored() {
    let mut engine = config(short_gops()).new_engine().unwrap();
    let task = RateControlTask::EntropyCodingRowFeedbackResult {
      picture_number: 3,
      row: 1,
      bits: 999,
    };
    assert!(engine.process(task).unwrap().is_none());
    assert_eq!(engine.summary(), EngineSummary {
      buffer_level: engine.buffer().level(),
      base_layer_qp_average: 32,
      base_layer_intra_qp_average: 32,
      ..Default::default()
    });
  }

  #[test]
  fn fixed_mode_keeps_no_lookahead() {
    let params = StreamParameters {
      rate_control_mode: RateControlMode::Off,
      ..short_gops()
    };
    let mut engine = config(params).new_engine().unwrap();
    let pic = picture(9, &params);
    engine.register_lookahead(&pic).unwrap();
    assert!(engine.queue.get(9).is_none());
    let qp = assign(&mut engine, &pic);
    code(&mut engine, &pic, 1_000_000);
    assert_eq!(engine.buffer().level(), engine.buffer().initial_level());
    assert_eq!(pic.decision().block_qps, vec![qp; params.block_count()]);
  }
}
