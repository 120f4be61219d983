//! Investigation deadlines.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A child cancellation token that fires when `timeout` elapses.
///
/// Cancelling the parent cancels the child too. Dropping the deadline stops
/// the timer but leaves the token as it is.
#[derive(Debug)]
pub struct Deadline {
    token: CancellationToken,
    timer: JoinHandle<()>,
}

impl Deadline {
    pub fn new(parent: &CancellationToken, timeout: Duration) -> Self {
        let token = parent.child_token();
        let timer = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if !token.is_cancelled() {
                    tracing::warn!(timeout_secs = timeout.as_secs(), "Investigation deadline reached");
                    token.cancel();
                }
            })
        };
        Self { token, timer }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_expired(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.timer.abort();
    }
}
