// Copyright (c) 2018-2022, The ratectl contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::prelude::*;
use crate::rate::interval::{GopBoundary, IntervalRing, PictureQpInput};

use std::sync::Arc;

use interpolate_name::interpolate_test;
use pretty_assertions::assert_eq;

fn setup_engine(params: StreamParameters) -> RateControlEngine {
  Config::new().with_stream_parameters(params).new_engine().unwrap()
}

fn new_picture(
  params: &StreamParameters, picture_number: u64, slice_type: SliceType,
  layer: usize, sad: u64,
) -> Arc<PictureStats> {
  let picture = PictureStats::new(
    picture_number,
    slice_type,
    layer,
    params.block_count(),
  );
  let block = BlockDistortion {
    inter_sad: sad,
    intra_sad: 2 * sad,
    fully_covered: true,
  };
  let blocks = vec![block; params.full_block_count()];
  picture.distortion().accumulate(slice_type, &blocks);
  Arc::new(picture)
}

fn request_qp(
  engine: &mut RateControlEngine, picture: &Arc<PictureStats>,
) -> u8 {
  let task = RateControlTask::PictureManagerResult {
    picture: picture.clone(),
    segment_index: 0,
  };
  let result = engine.process(task).unwrap().unwrap();
  assert_eq!(result.picture.picture_number, picture.picture_number);
  result.picture.assigned_qp().unwrap()
}

fn send_feedback(
  engine: &mut RateControlEngine, picture: &Arc<PictureStats>, bits: u64,
) {
  picture.set_actual_bits(bits);
  let task =
    RateControlTask::PacketizationFeedbackResult { picture: picture.clone() };
  assert!(engine.process(task).unwrap().is_none());
}

#[interpolate_test(four_layers, 3, false)]
#[interpolate_test(four_layers_content_based, 3, true)]
#[interpolate_test(five_layers, 4, false)]
fn fixed_qp_boosts_intra(hierarchy_depth: usize, content_based_qps: bool) {
  let params = StreamParameters {
    rate_control_mode: RateControlMode::Off,
    hierarchy_depth,
    intra_period_length: 63,
    qp: 32,
    content_based_qps,
    ..Default::default()
  };
  let mut engine = setup_engine(params);

  let intra = new_picture(&params, 0, SliceType::Intra, 0, 1000);
  let top = new_picture(
    &params,
    1,
    SliceType::Bidirectional,
    hierarchy_depth,
    1000,
  );
  let intra_qp = request_qp(&mut engine, &intra);
  let top_qp = request_qp(&mut engine, &top);

  assert!(intra_qp < top_qp, "intra {} top {}", intra_qp, top_qp);
  assert_eq!(top_qp, 32);
}

#[interpolate_test(in_order, false)]
#[interpolate_test(out_of_order, true)]
fn exact_spending_keeps_the_buffer_level(reverse: bool) {
  let params = StreamParameters::default();
  let mut engine = setup_engine(params);
  let cbpf = engine.buffer().channel_bits_per_frame();

  let pictures: Vec<_> = (0..32)
    .map(|p| {
      let (slice_type, layer) = match p % 8 {
        0 if p == 0 => (SliceType::Intra, 0),
        0 => (SliceType::Predicted, 0),
        4 => (SliceType::Bidirectional, 1),
        2 | 6 => (SliceType::Bidirectional, 2),
        _ => (SliceType::Bidirectional, 3),
      };
      new_picture(&params, p, slice_type, layer, 3000)
    })
    .collect();
  for picture in &pictures {
    engine.register_lookahead(picture).unwrap();
  }
  for picture in &pictures[..16] {
    request_qp(&mut engine, picture);
  }

  let mut coded: Vec<_> = pictures[..16].iter().collect();
  if reverse {
    coded.reverse();
  }
  for picture in coded {
    send_feedback(&mut engine, picture, cbpf);
  }

  assert_eq!(engine.buffer().level(), engine.buffer().initial_level());
  assert_eq!(engine.buffer().drift(), 0);
  assert_eq!(engine.summary().feedback_count, 16);
}

#[interpolate_test(overshoot_20x, 20, 1)]
#[interpolate_test(overshoot_40x, 40, 2)]
fn overshoot_raises_the_reference_qp(factor: u64, step: u8) {
  let params = StreamParameters {
    lookahead_depth: 7,
    intra_period_length: 31,
    hierarchy_depth: 0,
    ..Default::default()
  };
  let mut engine = setup_engine(params);
  let pictures: Vec<_> = (0..16)
    .map(|p| new_picture(&params, p, SliceType::Predicted, 0, 3000))
    .collect();
  for picture in &pictures {
    engine.register_lookahead(picture).unwrap();
  }

  request_qp(&mut engine, &pictures[0]);
  let settled = engine.reference_qp();
  assert_eq!(settled, 32);
  let cbpf = engine.buffer().channel_bits_per_frame();
  send_feedback(&mut engine, &pictures[0], cbpf * factor);
  assert!(engine.buffer().drift() < 0);

  // 20x leaves the budget at 90%, 40x at 80%.
  request_qp(&mut engine, &pictures[1]);
  assert_eq!(engine.reference_qp(), settled + step);
}

#[interpolate_test(mid_stream, false)]
#[interpolate_test(end_of_stream, true)]
fn hard_scene_widens_the_next_gop_bound(end_of_stream_region: bool) {
  let mut ring = IntervalRing::new(4, 32, 4).unwrap();
  {
    let first = ring.get_mut(0);
    first.first_picture_actual_qp = 40;
    first.first_picture_predicted_qp = 20;
    first.first_picture_actual_qp_assigned = true;
    first.first_picture_predicted_bits = 400_000;
    first.first_picture_actual_bits = 400_000;
  }

  let boundary = GopBoundary::new(ring.get(0), 40, end_of_stream_region);
  assert!(boundary.allowed_increase > 3);

  let input = PictureQpInput {
    picture_number: 32,
    slice_type: SliceType::Intra,
    best_pred_qp: 40,
    intra_selected_org_qp: 40,
    end_of_stream_region,
  };
  // The overshoot nudge survives the bound.
  assert_eq!(ring.assign_qp(1, &input, 1, 63), 40 + boundary.nudge);
  assert_eq!(boundary.nudge, 3);
}

#[test]
fn stale_tasks_are_dropped() {
  let params = StreamParameters::default();
  let mut engine = setup_engine(params);
  let picture = new_picture(&params, 0, SliceType::Intra, 0, 3000);
  let qp = request_qp(&mut engine, &picture);
  // A second request leaves the first decision untouched.
  assert_eq!(request_qp(&mut engine, &picture), qp);
  assert_eq!(engine.summary().pictures_assigned, 1);
}

#[test]
fn custom_tables_drive_the_search() {
  let cheap = Arc::new(RateTables::from_fn(|_, _, _, _| 1));
  let params = StreamParameters { lookahead_depth: 7, ..Default::default() };
  let mut engine = Config::new()
    .with_stream_parameters(params)
    .with_rate_tables(cheap)
    .new_engine()
    .unwrap();
  let pictures: Vec<_> = (0..8)
    .map(|p| new_picture(&params, p, SliceType::Predicted, 0, 3000))
    .collect();
  for picture in &pictures {
    engine.register_lookahead(picture).unwrap();
  }
  request_qp(&mut engine, &pictures[0]);
  // Every QP undershoots the budget; the search walks down to its bound.
  assert_eq!(engine.reference_qp(), 12);
}
