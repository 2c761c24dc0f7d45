// Copyright (c) 2019-2022, The ratectl contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

/// Leaky bucket tracking how far the coded stream drifted from the channel
/// rate.
///
/// Updates are applied in feedback arrival order, which is the order
/// pictures finish encoding and not their display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualBuffer {
  /// Size of the bucket, three frames worth of channel bits.
  size: i64,
  level: i64,
  initial_level: i64,
  previous_level: i64,
  /// Accumulated `channel_bits_per_frame - actual_bits`; positive means the
  /// encoder spent less than the channel allows.
  extra_bits_generated: i64,
  channel_bits_per_frame: i64,
}

impl VirtualBuffer {
  pub fn new(channel_bits_per_frame: u64) -> Self {
    let channel_bits_per_frame = channel_bits_per_frame.max(1) as i64;
    let size = 3 * channel_bits_per_frame;
    let level = size >> 1;
    VirtualBuffer {
      size,
      level,
      initial_level: level,
      previous_level: level,
      extra_bits_generated: 0,
      channel_bits_per_frame,
    }
  }

  /// Accounts for one coded picture.
  pub fn update(&mut self, actual_bits: u64) {
    let actual_bits = actual_bits.min(i64::MAX as u64) as i64;
    self.previous_level = self.level;
    self.level = self
      .previous_level
      .saturating_add(actual_bits)
      .saturating_sub(self.channel_bits_per_frame);
    self.extra_bits_generated = self
      .extra_bits_generated
      .saturating_add(self.channel_bits_per_frame)
      .saturating_sub(actual_bits);
  }

  pub const fn size(&self) -> i64 {
    self.size
  }

  pub const fn level(&self) -> i64 {
    self.level
  }

  pub const fn initial_level(&self) -> i64 {
    self.initial_level
  }

  pub const fn previous_level(&self) -> i64 {
    self.previous_level
  }

  /// Drift signal consumed by the lookahead allocator.
  pub const fn drift(&self) -> i64 {
    self.extra_bits_generated
  }

  pub const fn channel_bits_per_frame(&self) -> u64 {
    self.channel_bits_per_frame as u64
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use quickcheck::quickcheck;

  #[test]
  fn steady_state_keeps_level() {
    let mut vb = VirtualBuffer::new(100_000);
    for _ in 0..16 {
      vb.update(100_000);
    }
    assert_eq!(vb.level(), vb.initial_level());
    assert_eq!(vb.drift(), 0);
  }

  #[test]
  fn overshoot_fills_buffer_and_drifts_negative() {
    let mut vb = VirtualBuffer::new(1000);
    assert_eq!(vb.size(), 3000);
    vb.update(21_000);
    assert_eq!(vb.previous_level(), 1500);
    assert_eq!(vb.level(), 21_500);
    assert_eq!(vb.drift(), -20_000);
  }

  quickcheck! {
    fn replay_is_deterministic(cbpf: u32, bits: Vec<u32>) -> bool {
      let run = || {
        let mut vb = VirtualBuffer::new(u64::from(cbpf));
        for &b in &bits {
          vb.update(u64::from(b));
        }
        vb
      };
      run() == run()
    }

    fn level_and_drift_mirror(cbpf: u32, bits: Vec<u32>) -> bool {
      let mut vb = VirtualBuffer::new(u64::from(cbpf));
      for &b in &bits {
        vb.update(u64::from(b));
      }
      vb.level() - vb.initial_level() == -vb.drift()
    }
  }
}
