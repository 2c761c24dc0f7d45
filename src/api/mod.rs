// Copyright (c) 2018-2022, The ratectl contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

/// Threaded kernel endpoints
pub mod channel;
/// Rate control configuration
pub mod config;
mod util;

#[cfg(test)]
mod test;

pub use channel::*;
pub use config::*;
pub use util::*;
