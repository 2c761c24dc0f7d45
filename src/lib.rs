// Copyright (c) 2017-2022, The ratectl contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! ratectl is the rate control engine of a multi-threaded AV1 encoder
//! pipeline.
//!
//! It picks the QP of every picture so that the coded stream tracks a
//! target bitrate, while pictures are analysed, coded and fed back out of
//! order by concurrent stages. A lookahead window of distortion histograms
//! gives a reference QP, GOP sized intervals bound the per picture QP
//! around scene changes and a virtual buffer turns the coded sizes into a
//! drift signal for the next decisions.
//!
//! The engine can be driven directly through [`RateControlEngine`] or run
//! as a kernel in a threadpool through [`Config::new_rate_control_channel`].
//!
//! # Basic usage
//!
//! ```
//! use ratectl::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = Config::new();
//! let params = *cfg.stream_parameters();
//! let mut engine = cfg.new_engine()?;
//!
//! let picture = Arc::new(PictureStats::new(
//!   0,
//!   SliceType::Intra,
//!   0,
//!   params.block_count(),
//! ));
//! engine.register_lookahead(&picture)?;
//!
//! let task = RateControlTask::PictureManagerResult {
//!   picture: picture.clone(),
//!   segment_index: 0,
//! };
//! engine.process(task)?;
//! assert!(picture.assigned_qp().is_some());
//!
//! picture.set_actual_bits(150_000);
//! engine.process(RateControlTask::PacketizationFeedbackResult { picture })?;
//! # Ok(())
//! # }
//! ```
//!
//! [`RateControlEngine`]: rate::RateControlEngine

#![deny(bare_trait_objects)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::module_name_repetitions)]
#![warn(clippy::inline_always)]
#![warn(clippy::doc_markdown)]
#![warn(clippy::missing_errors_doc)]

mod api;
pub mod quantize;
pub mod rate;
pub mod stats;
pub(crate) mod util;

pub use crate::api::*;
pub use crate::rate::{
  EngineSummary, RateControlEngine, RateControlError, RateControlResult,
  RateControlTask,
};
pub use crate::stats::{BlockDistortion, DistortionStats, PictureStats};

/// Commonly used types and traits.
pub mod prelude {
  pub use crate::api::*;
  pub use crate::rate::tables::{BinKind, RateTables};
  pub use crate::rate::{
    EngineSummary, RateControlEngine, RateControlError, RateControlResult,
    RateControlTask,
  };
  pub use crate::stats::{
    BlockDistortion, DistortionStats, PictureStats, QpDecision,
  };
}
