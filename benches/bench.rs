// Copyright (c) 2019-2022, The ratectl contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use criterion::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaChaRng;

use ratectl::prelude::*;
use std::sync::Arc;

fn random_blocks(ra: &mut ChaChaRng, count: usize) -> Vec<BlockDistortion> {
  (0..count)
    .map(|_| {
      let inter_sad = ra.gen_range(0..200_000);
      BlockDistortion {
        inter_sad,
        intra_sad: inter_sad + ra.gen_range(0..100_000),
        fully_covered: true,
      }
    })
    .collect()
}

fn slice_of(p: u64, params: &StreamParameters) -> (SliceType, usize) {
  if p % params.gop_length() == 0 {
    (SliceType::Intra, 0)
  } else if p % 8 == 0 {
    (SliceType::Predicted, 0)
  } else {
    (SliceType::Bidirectional, 1 + (p % 2) as usize * 2)
  }
}

fn pictures(
  params: &StreamParameters, count: u64, seed: u8,
) -> Vec<Arc<PictureStats>> {
  let mut ra = ChaChaRng::from_seed([seed; 32]);
  (0..count)
    .map(|p| {
      let (slice_type, layer) = slice_of(p, params);
      let picture =
        PictureStats::new(p, slice_type, layer, params.block_count());
      let blocks = random_blocks(&mut ra, params.full_block_count());
      picture.distortion().accumulate(slice_type, &blocks);
      Arc::new(picture)
    })
    .collect()
}

pub fn accumulate_1080p(c: &mut Criterion) {
  let params = StreamParameters::default();
  let mut ra = ChaChaRng::from_seed([7; 32]);
  let blocks = random_blocks(&mut ra, params.full_block_count());

  c.bench_function("accumulate_1080p", move |b| {
    b.iter(|| {
      let picture =
        PictureStats::new(1, SliceType::Bidirectional, 2, blocks.len());
      picture.distortion().accumulate(SliceType::Bidirectional, &blocks);
      black_box(picture.distortion().snapshot())
    })
  });
}

pub fn feedback_gop_1080p(c: &mut Criterion) {
  let params = StreamParameters::default();
  let config = Config::new().with_stream_parameters(params);
  let count = params.gop_length() * 2;

  c.bench_function("feedback_gop_1080p", move |b| {
    b.iter_batched(
      || (config.new_engine().unwrap(), pictures(&params, count, 3)),
      |(mut engine, pictures)| {
        let cbpf = engine.buffer().channel_bits_per_frame();
        for picture in &pictures {
          engine.register_lookahead(picture).unwrap();
        }
        for picture in &pictures[..params.gop_length() as usize] {
          let task = RateControlTask::PictureManagerResult {
            picture: picture.clone(),
            segment_index: 0,
          };
          engine.process(task).unwrap();
          picture.set_actual_bits(cbpf);
          let task = RateControlTask::PacketizationFeedbackResult {
            picture: picture.clone(),
          };
          engine.process(task).unwrap();
        }
        black_box(engine.summary())
      },
      BatchSize::SmallInput,
    )
  });
}

pub fn fixed_qp_1080p(c: &mut Criterion) {
  let params = StreamParameters {
    rate_control_mode: RateControlMode::Off,
    content_based_qps: true,
    ..Default::default()
  };
  let config = Config::new().with_stream_parameters(params);

  c.bench_function("fixed_qp_1080p", move |b| {
    b.iter_batched(
      || (config.new_engine().unwrap(), pictures(&params, 64, 5)),
      |(mut engine, pictures)| {
        for picture in pictures {
          let task = RateControlTask::PictureManagerResult {
            picture,
            segment_index: 0,
          };
          black_box(engine.process(task).unwrap());
        }
      },
      BatchSize::SmallInput,
    )
  });
}

criterion_group!(qp, accumulate_1080p, feedback_gop_1080p, fixed_qp_1080p);
criterion_main!(qp);
