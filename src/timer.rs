use std::future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{sleep, Sleep};

/// Single-shot timer with arm/cancel semantics. At most one deadline is
/// pending; arming again replaces it.
#[derive(Debug, Default)]
pub struct DebounceTimer {
    deadline: Option<Pin<Box<Sleep>>>,
}

impl DebounceTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, after: Duration) {
        self.deadline = Some(Box::pin(sleep(after)));
    }

    /// Returns whether a pending deadline was dropped.
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves once the armed deadline passes, then disarms. Never resolves
    /// while disarmed. Cancel-safe.
    pub async fn fired(&mut self) {
        match self.deadline.as_mut() {
            Some(deadline) => {
                deadline.as_mut().await;
                self.deadline = None;
            }
            None => future::pending().await,
        }
    }
}
