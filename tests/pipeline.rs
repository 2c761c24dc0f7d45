// Copyright (c) 2019-2022, The ratectl contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaChaRng;

use ratectl::prelude::*;
use std::sync::Arc;
use std::thread;

fn params() -> StreamParameters {
  StreamParameters {
    width: 640,
    height: 384,
    target_bitrate: 1_000_000,
    intra_period_length: 15,
    lookahead_depth: 8,
    hierarchy_depth: 2,
    ..Default::default()
  }
}

fn layer_of(p: u64) -> (SliceType, usize) {
  if p % 16 == 0 {
    (SliceType::Intra, 0)
  } else if p % 4 == 0 {
    (SliceType::Predicted, 0)
  } else if p % 2 == 0 {
    (SliceType::Bidirectional, 1)
  } else {
    (SliceType::Bidirectional, 2)
  }
}

fn analysed_pictures(
  params: &StreamParameters, count: u64, ra: &mut ChaChaRng,
) -> Vec<Arc<PictureStats>> {
  (0..count)
    .map(|p| {
      let (slice_type, layer) = layer_of(p);
      let picture =
        PictureStats::new(p, slice_type, layer, params.block_count())
          .with_end_of_stream(p + 1 == count);
      let blocks: Vec<_> = (0..params.full_block_count())
        .map(|_| {
          let inter_sad = ra.gen_range(500..20_000);
          BlockDistortion {
            inter_sad,
            intra_sad: inter_sad * 2,
            fully_covered: true,
          }
        })
        .collect();
      // Motion search workers report in segments.
      for segment in blocks.chunks(16) {
        picture.distortion().accumulate(slice_type, segment);
      }
      Arc::new(picture)
    })
    .collect()
}

#[test]
fn out_of_order_feedback_reaches_every_gop() {
  const COUNT: u64 = 64;
  let params = params();
  let cfg = Config::new()
    .with_stream_parameters(params)
    .with_parallel_gops(4)
    .with_queue_depth(2 * COUNT as usize)
    .with_threads(2);
  let initial_level = cfg.new_engine().unwrap().buffer().initial_level();
  let cbpf = params.channel_bits_per_frame();

  let mut ra = ChaChaRng::from_seed([42; 32]);
  let pictures = analysed_pictures(&params, COUNT, &mut ra);
  let sizes: Vec<u64> =
    (0..COUNT).map(|_| ra.gen_range(cbpf / 2..cbpf * 2)).collect();

  let channel = cfg.new_rate_control_channel().unwrap();
  for picture in &pictures {
    channel.lookahead.send(picture.clone()).unwrap();
  }

  let feedback = channel.tasks.clone();
  let results = channel.results;
  let sizes_for_coder = sizes.clone();
  let coder = thread::spawn(move || {
    let mut ra = ChaChaRng::from_seed([7; 32]);
    let mut in_flight = Vec::new();
    let mut qps = Vec::new();
    for result in results.iter() {
      let picture = result.picture;
      let qp = picture.assigned_qp().unwrap();
      qps.push(qp);
      assert_eq!(picture.decision().block_qps.len(), picture.block_count());
      in_flight.push(picture);
      if in_flight.len() == 8 || qps.len() == COUNT as usize {
        in_flight.shuffle(&mut ra);
        for picture in in_flight.drain(..) {
          picture.set_actual_bits(
            sizes_for_coder[picture.picture_number as usize],
          );
          feedback.feedback(picture).unwrap();
        }
      }
      if qps.len() == COUNT as usize {
        break;
      }
    }
    qps
  });

  for picture in &pictures {
    channel.tasks.request_qp(picture.clone(), 0).unwrap();
  }
  let qps = coder.join().unwrap();
  drop(channel.tasks);
  let summary = channel.kernel.join().unwrap();

  let qp_range = params.min_qp..=params.max_qp;
  assert!(qps.iter().all(|qp| qp_range.contains(qp)));
  assert_eq!(summary.pictures_assigned, COUNT);
  assert_eq!(summary.feedback_count, COUNT);
  let spent: i64 = sizes.iter().map(|&s| s as i64).sum();
  assert_eq!(
    summary.buffer_level,
    initial_level + spent - (COUNT * cbpf) as i64
  );
  assert!(summary.largest_gop_bits >= 16 * cbpf / 2);
}

#[test]
fn fixed_qp_channel_is_deterministic() {
  let params =
    StreamParameters { rate_control_mode: RateControlMode::Off, ..params() };
  let cfg = Config::new().with_stream_parameters(params);

  let run = || {
    let mut ra = ChaChaRng::from_seed([1; 32]);
    let pictures = analysed_pictures(&params, 16, &mut ra);
    let channel = cfg.new_rate_control_channel().unwrap();
    let mut qps = Vec::new();
    for picture in pictures {
      channel.tasks.request_qp(picture, 0).unwrap();
      qps.push(channel.results.recv().unwrap().picture.assigned_qp());
    }
    drop(channel.tasks);
    channel.kernel.join().unwrap();
    qps
  };

  assert_eq!(run(), run());
}

#[test]
fn fatal_errors_stop_the_kernel() {
  let params = StreamParameters { intra_period_length: 7, ..params() };
  let cfg = Config::new().with_stream_parameters(params).with_parallel_gops(2);
  let channel = cfg.new_rate_control_channel().unwrap();

  let mut ra = ChaChaRng::from_seed([3; 32]);
  let late = analysed_pictures(&params, 41, &mut ra).pop().unwrap();
  channel.tasks.request_qp(late, 0).unwrap();

  assert!(matches!(channel.kernel.join(), Err(KernelError::Fatal(_))));
  assert!(channel.results.recv().is_err());
}
