// Copyright (c) 2018-2023, The ratectl contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::rate::{
  EngineSummary, RateControlError, RateControlResult, RateControlTask,
};
use crate::stats::PictureStats;

use crossbeam::channel::{Receiver, Sender};
use thiserror::Error;

use std::fmt;
use std::sync::Arc;

/// An error returned from the `send` methods.
///
/// The message could not be sent because the channel is disconnected.
///
/// The error contains the message so it can be recovered.
#[derive(PartialEq, Eq, Clone, Copy, Error)]
#[error("sending on a disconnected channel")]
pub struct SendError<T>(pub T);

impl<T> fmt::Debug for SendError<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("SendError(..)")
  }
}

/// An error returned from the `try_send` methods.
///
/// The error contains the message being sent so it can be recovered.
#[derive(PartialEq, Eq, Clone, Copy, Error)]
pub enum TrySendError<T> {
  /// The message could not be sent because the channel is full.
  #[error("sending on a full channel")]
  Full(T),

  /// The message could not be sent because the channel is disconnected.
  #[error("sending on a disconnected channel")]
  Disconnected(T),
}

impl<T> fmt::Debug for TrySendError<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TrySendError::Full(_) => f.write_str("Full(..)"),
      TrySendError::Disconnected(_) => f.write_str("Disconnected(..)"),
    }
  }
}

/// An error returned from the `recv` methods.
///
/// A message could not be received because the channel is empty and
/// disconnected.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Error)]
#[error("receiving on an empty and disconnected channel")]
pub struct RecvError;

/// An error returned from the `try_recv` methods.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Error)]
pub enum TryRecvError {
  /// A message could not be received because the channel is empty.
  #[error("receiving on an empty channel")]
  Empty,

  /// The message could not be received because the channel is empty and
  /// disconnected.
  #[error("receiving on an empty and disconnected channel")]
  Disconnected,
}

/// Why the kernel did not finish the stream.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Error)]
pub enum KernelError {
  /// The engine hit a structural violation and stopped.
  #[error("rate control stopped: {0}")]
  Fatal(#[from] RateControlError),
  /// The kernel went away without reporting.
  #[error("the rate control kernel terminated without reporting")]
  Lost,
}

impl<T> SendError<T> {
  fn from(value: crossbeam::channel::SendError<T>) -> Self {
    Self(value.0)
  }
}

impl<T> TrySendError<T> {
  fn from(value: crossbeam::channel::TrySendError<T>) -> Self {
    use crossbeam::channel::TrySendError::*;
    match value {
      Full(v) => TrySendError::Full(v),
      Disconnected(v) => TrySendError::Disconnected(v),
    }
  }
}

impl RecvError {
  fn from(_: crossbeam::channel::RecvError) -> Self {
    RecvError
  }
}

impl TryRecvError {
  fn from(value: crossbeam::channel::TryRecvError) -> Self {
    use crossbeam::channel::TryRecvError::*;
    match value {
      Empty => TryRecvError::Empty,
      Disconnected => TryRecvError::Disconnected,
    }
  }
}

/// Endpoint to post tasks to the kernel.
///
/// Drop every clone to let the kernel finish.
#[derive(Clone)]
pub struct TaskSender(pub(crate) Sender<RateControlTask>);

impl TaskSender {
  /// # Errors
  ///
  /// - `TrySendError::Full` if the message could not be sent because the
  ///   channel is full.
  /// - `TrySendError::Disconnected` if the message could not be sent
  ///   because the channel is disconnected.
  pub fn try_send(
    &self, task: RateControlTask,
  ) -> Result<(), TrySendError<RateControlTask>> {
    self.0.try_send(task).map_err(TrySendError::from)
  }

  /// Blocks while the task queue is full.
  ///
  /// # Errors
  ///
  /// - `SendError` if the message could not be sent because the channel is
  ///   disconnected.
  pub fn send(
    &self, task: RateControlTask,
  ) -> Result<(), SendError<RateControlTask>> {
    self.0.send(task).map_err(SendError::from)
  }

  /// Posts the QP request of a picture.
  ///
  /// # Errors
  ///
  /// - `SendError` if the kernel is gone.
  pub fn request_qp(
    &self, picture: Arc<PictureStats>, segment_index: u32,
  ) -> Result<(), SendError<RateControlTask>> {
    self.send(RateControlTask::PictureManagerResult { picture, segment_index })
  }

  /// Posts the coded size of a picture, already stored with
  /// `PictureStats::set_actual_bits`.
  ///
  /// # Errors
  ///
  /// - `SendError` if the kernel is gone.
  pub fn feedback(
    &self, picture: Arc<PictureStats>,
  ) -> Result<(), SendError<RateControlTask>> {
    self.send(RateControlTask::PacketizationFeedbackResult { picture })
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

/// Endpoint to hand lookahead statistics to the kernel.
///
/// Pictures sent here are registered before the next task is processed.
#[derive(Clone)]
pub struct LookaheadSender(pub(crate) Sender<Arc<PictureStats>>);

impl LookaheadSender {
  /// # Errors
  ///
  /// - `SendError` if the kernel is gone.
  pub fn send(
    &self, picture: Arc<PictureStats>,
  ) -> Result<(), SendError<Arc<PictureStats>>> {
    self.0.send(picture).map_err(SendError::from)
  }
  pub fn len(&self) -> usize {
    self.0.len()
  }
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

/// Endpoint to receive the pictures whose QP has been assigned
pub struct ResultReceiver(pub(crate) Receiver<RateControlResult>);

impl ResultReceiver {
  /// Attempts to receive a message from the channel without blocking.
  ///
  /// # Errors
  ///
  /// - `TryRecvError::Empty` if the channel is currently empty.
  /// - `TryRecvError::Disconnected` if the channel is empty and has been
  ///   disconnected.
  pub fn try_recv(&self) -> Result<RateControlResult, TryRecvError> {
    self.0.try_recv().map_err(TryRecvError::from)
  }

  /// Blocks the current thread until a message is received or the channel
  /// is empty and disconnected.
  ///
  /// # Errors
  ///
  /// - `RecvError` if the channel is empty and has been disconnected.
  pub fn recv(&self) -> Result<RateControlResult, RecvError> {
    self.0.recv().map_err(RecvError::from)
  }
  pub fn len(&self) -> usize {
    self.0.len()
  }
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
  pub fn iter(&self) -> impl Iterator<Item = RateControlResult> + '_ {
    self.0.iter()
  }
}

/// Handle on the kernel running in the threadpool.
pub struct KernelHandle(
  pub(crate) Receiver<Result<EngineSummary, RateControlError>>,
);

impl KernelHandle {
  /// Waits for the kernel to finish, which happens once every
  /// `TaskSender` has been dropped or after a fatal error.
  ///
  /// # Errors
  ///
  /// - `KernelError::Fatal` with the violation that stopped the kernel.
  /// - `KernelError::Lost` if the kernel terminated without reporting.
  pub fn join(self) -> Result<EngineSummary, KernelError> {
    match self.0.recv() {
      Ok(outcome) => outcome.map_err(KernelError::from),
      Err(_) => Err(KernelError::Lost),
    }
  }
}

/// The endpoints of a threaded rate control kernel
pub struct RateControlChannel {
  pub tasks: TaskSender,
  pub lookahead: LookaheadSender,
  pub results: ResultReceiver,
  pub kernel: KernelHandle,
}
