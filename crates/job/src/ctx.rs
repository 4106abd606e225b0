use tokio_util::sync::CancellationToken;

use crate::error::JobFailure;

/// Execution context handed to every job body.
///
/// Carries the worker's cancellation token and the job's ignore-state flag.
/// Bodies are expected to observe cancellation at their own checkpoints and
/// return [`JobFailure::Cancelled`] promptly.
#[derive(Clone, Debug)]
pub struct JobCtx {
  cancel: CancellationToken,
  ignore_state: bool,
}

impl JobCtx {
  pub fn new(cancel: CancellationToken) -> Self {
    Self {
      cancel,
      ignore_state: false,
    }
  }

  pub fn with_ignore_state(mut self, ignore_state: bool) -> Self {
    self.ignore_state = ignore_state;
    self
  }

  /// Whether the job should bypass "already in this processing state"
  /// short-circuits in the stores it touches.
  pub fn ignore_state(&self) -> bool {
    self.ignore_state
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  /// Resolves once the worker is cancelled.
  pub async fn cancelled(&self) {
    self.cancel.cancelled().await;
  }

  /// Cancellation checkpoint for job bodies: `ctx.checkpoint()?;`
  pub fn checkpoint(&self) -> Result<(), JobFailure> {
    if self.cancel.is_cancelled() {
      Err(JobFailure::Cancelled)
    } else {
      Ok(())
    }
  }
}
