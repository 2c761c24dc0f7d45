// Copyright (c) 2020-2022, The ratectl contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use thiserror::Error;

use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;

use crate::quantize::MAX_QP;
use crate::rate::tables::{RateTables, MAX_TEMPORAL_LAYERS};
use crate::rate::RateControlEngine;

mod stream;
pub use stream::*;

pub(crate) const MIN_PICTURE_SIZE: usize = 16;
pub(crate) const DEFAULT_PARALLEL_GOPS: usize = 8;
pub(crate) const DEFAULT_QUEUE_DEPTH: usize = 16;
pub(crate) const MAX_INTRA_PERIOD_LENGTH: u64 = i32::MAX as u64 / 3;
pub(crate) const MAX_LOOKAHEAD_DEPTH: usize = 1024;

/// Enumeration of possible invalid configuration errors.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
#[non_exhaustive]
pub enum InvalidConfig {
  /// The width is invalid.
  #[error("invalid width {0} (expected >= 16, <= 65535)")]
  InvalidWidth(usize),
  /// The height is invalid.
  #[error("invalid height {0} (expected >= 16, <= 65535)")]
  InvalidHeight(usize),
  /// Framerate numerator is invalid.
  #[error("invalid framerate numerator {actual} (expected > 0, <= {max})")]
  InvalidFrameRateNum {
    /// The actual value.
    actual: u64,
    /// The maximal supported value.
    max: u64,
  },
  /// Framerate denominator is invalid.
  #[error("invalid framerate denominator {actual} (expected > 0, <= {max})")]
  InvalidFrameRateDen {
    /// The actual value.
    actual: u64,
    /// The maximal supported value.
    max: u64,
  },
  /// The QP range is empty or the nominal QP lies outside of it.
  #[error("invalid qp {qp} with range [{min}, {max}] (expected <= 63)")]
  InvalidQpRange {
    /// The nominal QP.
    qp: u8,
    /// The minimum QP.
    min: u8,
    /// The maximum QP.
    max: u8,
  },
  /// The hierarchy is deeper than the supported temporal layers.
  #[error("invalid hierarchy depth {0} (expected <= 5)")]
  InvalidHierarchyDepth(usize),
  /// The intra period is out of range.
  #[error("invalid intra period length {actual} (expected >= 1, <= {max})")]
  InvalidIntraPeriodLength {
    /// The actual value.
    actual: u64,
    /// The maximal supported value.
    max: u64,
  },
  /// The lookahead depth is out of range.
  #[error("invalid lookahead depth {actual} (expected >= 1, <= {max})")]
  InvalidLookaheadDepth {
    /// The actual value.
    actual: usize,
    /// The maximal supported value.
    max: usize,
  },
  /// Too few intervals in flight.
  #[error("invalid parallel gop count {0} (expected >= 2)")]
  InvalidParallelGops(usize),
  /// The task queues need room for at least one task.
  #[error("invalid queue depth {0} (expected >= 1)")]
  InvalidQueueDepth(usize),
  /// The rate control needs a target bitrate in order to produce results
  #[error("The rate control requires a target bitrate")]
  TargetBitrateNeeded,
  /// The fixed size state could not be allocated.
  #[error("Not enough memory for the rate control state")]
  ResourceExhausted,
}

/// Contains the rate control configuration.
#[derive(Clone, Debug)]
pub struct Config {
  /// Settings of the controlled stream.
  pub(crate) params: StreamParameters,
  /// The number of threads in the threadpool.
  pub(crate) threads: usize,
  /// Shared thread pool
  pub(crate) pool: Option<Arc<ThreadPool>>,
  /// Number of GOPs in flight at once
  pub(crate) parallel_gops: usize,
  /// Capacity of the bounded task queues
  pub(crate) queue_depth: usize,
  pub(crate) tables: Option<Arc<RateTables>>,
}

impl Default for Config {
  fn default() -> Self {
    Config {
      params: StreamParameters::default(),
      threads: 0,
      pool: None,
      parallel_gops: DEFAULT_PARALLEL_GOPS,
      queue_depth: DEFAULT_QUEUE_DEPTH,
      tables: None,
    }
  }
}

impl Config {
  /// Create a default configuration
  ///
  /// same as `Default::default()`
  pub fn new() -> Self {
    Config::default()
  }

  /// Set the stream parameters
  pub const fn with_stream_parameters(
    mut self, params: StreamParameters,
  ) -> Self {
    self.params = params;
    self
  }

  /// Set the number of workers in the threadpool
  ///
  /// If it is left unset, the kernel runs on the default global
  /// threadpool provided by Rayon instead.
  pub const fn with_threads(mut self, threads: usize) -> Self {
    self.threads = threads;
    self
  }

  /// Use the provided threadpool
  ///
  /// It takes priority over `with_threads()`
  pub fn with_thread_pool(mut self, pool: Arc<ThreadPool>) -> Self {
    self.pool = Some(pool);
    self
  }

  /// Set the maximum number of GOPs in flight
  pub const fn with_parallel_gops(mut self, parallel_gops: usize) -> Self {
    self.parallel_gops = parallel_gops;
    self
  }

  /// Set the capacity of the task and result queues
  pub const fn with_queue_depth(mut self, queue_depth: usize) -> Self {
    self.queue_depth = queue_depth;
    self
  }

  /// Replace the bits per distortion bin tables of the lookahead
  pub fn with_rate_tables(mut self, tables: Arc<RateTables>) -> Self {
    self.tables = Some(tables);
    self
  }

  pub const fn stream_parameters(&self) -> &StreamParameters {
    &self.params
  }

  pub const fn parallel_gops(&self) -> usize {
    self.parallel_gops
  }

  pub(crate) fn rate_tables(&self) -> Arc<RateTables> {
    self.tables.clone().unwrap_or_default()
  }
}

impl Config {
  /// Create a new threadpool with this configuration if set,
  /// or return `None` if global threadpool should be used instead.
  pub(crate) fn new_thread_pool(&self) -> Option<Arc<ThreadPool>> {
    if let Some(ref p) = self.pool {
      Some(p.clone())
    } else if self.threads != 0 {
      match ThreadPoolBuilder::new().num_threads(self.threads).build() {
        Ok(pool) => Some(Arc::new(pool)),
        Err(e) => {
          log::warn!("falling back to the global threadpool: {}", e);
          None
        }
      }
    } else {
      None
    }
  }

  /// Creates a [`RateControlEngine`] with this configuration.
  ///
  /// # Errors
  ///
  /// Returns `InvalidConfig` if the config is invalid or the engine state
  /// cannot be allocated.
  ///
  /// # Examples
  ///
  /// ```
  /// use ratectl::prelude::*;
  ///
  /// # fn main() -> Result<(), InvalidConfig> {
  /// let cfg = Config::default();
  /// let engine = cfg.new_engine()?;
  /// assert_eq!(engine.buffer().level(), engine.buffer().initial_level());
  /// # Ok(())
  /// # }
  /// ```
  pub fn new_engine(&self) -> Result<RateControlEngine, InvalidConfig> {
    self.validate()?;
    RateControlEngine::new(self)
  }

  /// Validates the configuration.
  ///
  /// # Errors
  ///
  /// - Returns `InvalidConfig` describing the first invalid setting.
  pub fn validate(&self) -> Result<(), InvalidConfig> {
    use InvalidConfig::*;

    let params = &self.params;

    if params.width < MIN_PICTURE_SIZE || params.width > u16::MAX as usize {
      return Err(InvalidWidth(params.width));
    }
    if params.height < MIN_PICTURE_SIZE || params.height > u16::MAX as usize
    {
      return Err(InvalidHeight(params.height));
    }

    let frame_rate = params.frame_rate;
    if frame_rate.num == 0 || frame_rate.num > u32::MAX as u64 {
      return Err(InvalidFrameRateNum {
        actual: frame_rate.num,
        max: u32::MAX as u64,
      });
    }
    if frame_rate.den == 0 || frame_rate.den > u32::MAX as u64 {
      return Err(InvalidFrameRateDen {
        actual: frame_rate.den,
        max: u32::MAX as u64,
      });
    }

    if params.min_qp > params.qp
      || params.qp > params.max_qp
      || params.max_qp > MAX_QP
    {
      return Err(InvalidQpRange {
        qp: params.qp,
        min: params.min_qp,
        max: params.max_qp,
      });
    }
    if params.hierarchy_depth >= MAX_TEMPORAL_LAYERS {
      return Err(InvalidHierarchyDepth(params.hierarchy_depth));
    }
    if params.intra_period_length < 1
      || params.intra_period_length > MAX_INTRA_PERIOD_LENGTH
    {
      return Err(InvalidIntraPeriodLength {
        actual: params.intra_period_length,
        max: MAX_INTRA_PERIOD_LENGTH,
      });
    }
    if params.lookahead_depth > MAX_LOOKAHEAD_DEPTH {
      return Err(InvalidLookaheadDepth {
        actual: params.lookahead_depth,
        max: MAX_LOOKAHEAD_DEPTH,
      });
    }

    if params.uses_feedback() {
      if params.target_bitrate == 0 {
        return Err(TargetBitrateNeeded);
      }
      if params.lookahead_depth < 1 {
        return Err(InvalidLookaheadDepth {
          actual: params.lookahead_depth,
          max: MAX_LOOKAHEAD_DEPTH,
        });
      }
    }

    if self.parallel_gops < 2 {
      return Err(InvalidParallelGops(self.parallel_gops));
    }
    if self.queue_depth < 1 {
      return Err(InvalidQueueDepth(self.queue_depth));
    }

    Ok(())
  }
}
