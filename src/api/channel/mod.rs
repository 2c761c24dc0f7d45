// Copyright (c) 2018-2022, The ratectl contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.
#![allow(missing_docs)]

use crate::api::config::*;
use crate::rate::{
  RateControlEngine, RateControlError, RateControlResult, RateControlTask,
};
use crate::stats::PictureStats;

use crossbeam::channel::*;

use std::sync::Arc;

mod data;
pub use data::{
  KernelError, KernelHandle, LookaheadSender, RateControlChannel,
  RecvError, ResultReceiver, SendError, TaskSender, TryRecvError,
  TrySendError,
};

impl Config {
  /// Create a rate control kernel running in the threadpool
  ///
  /// Drop every `TaskSender` to let the kernel finish, then collect its
  /// summary through the `KernelHandle`.
  ///
  /// # Errors
  ///
  /// - Returns `InvalidConfig` if the configuration is invalid.
  pub fn new_rate_control_channel(
    &self,
  ) -> Result<RateControlChannel, InvalidConfig> {
    let mut engine = self.new_engine()?;
    let pool = self.new_thread_pool();

    let (send_task, receive_task) = bounded(self.queue_depth);
    let (send_result, receive_result) = bounded(self.queue_depth);
    let (send_lookahead, receive_lookahead) = unbounded();
    let (send_done, receive_done) = bounded(1);

    let run = move || {
      let outcome = run_kernel(
        &mut engine,
        &receive_task,
        &receive_lookahead,
        &send_result,
      );
      if let Err(e) = outcome {
        log::error!("rate control kernel stopped: {}", e);
      }
      let _ = send_done.send(outcome.map(|()| engine.summary()));
    };

    if let Some(pool) = pool {
      pool.spawn(run);
    } else {
      rayon::spawn(run);
    }

    Ok(RateControlChannel {
      tasks: TaskSender(send_task),
      lookahead: LookaheadSender(send_lookahead),
      results: ResultReceiver(receive_result),
      kernel: KernelHandle(receive_done),
    })
  }
}

fn run_kernel(
  engine: &mut RateControlEngine, tasks: &Receiver<RateControlTask>,
  lookahead: &Receiver<Arc<PictureStats>>,
  results: &Sender<RateControlResult>,
) -> Result<(), RateControlError> {
  for task in tasks.iter() {
    for picture in lookahead.try_iter() {
      engine.register_lookahead(&picture)?;
    }
    if let Some(result) = engine.process(task)? {
      if results.send(result).is_err() {
        log::debug!("nobody is listening for rate control results");
      }
    }
  }
  Ok(())
}
