// Copyright (c) 2017-2018, The ratectl contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub fn clamp<T: PartialOrd>(input: T, min: T, max: T) -> T {
  if input < min {
    min
  } else if input > max {
    max
  } else {
    input
  }
}

/// Rounded 3:1 moving average, old value weighted three times.
pub const fn blend_3_1(avg: u32, sample: u32) -> u32 {
  (3 * avg + sample + 2) >> 2
}

/// Locks `m`, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
  m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn clamp_bounds() {
    assert_eq!(clamp(5, 1, 3), 3);
    assert_eq!(clamp(-1, 0, 3), 0);
    assert_eq!(clamp(2, 0, 3), 2);
  }

  #[test]
  fn blend_rounds_towards_sample() {
    assert_eq!(blend_3_1(32, 32), 32);
    assert_eq!(blend_3_1(32, 40), 34);
    assert_eq!(blend_3_1(40, 32), 38);
  }
}
