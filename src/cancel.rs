//! Run-wide cancellation signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::warn;

/// Cloneable flag shared by the HTTP client, the scrape workers and the
/// pipeline. Once cancelled it stays cancelled.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cancel `token` on the first Ctrl-C. A second one exits immediately.
pub fn cancel_on_ctrl_c(token: &CancelToken) -> Result<()> {
    let token = token.clone();
    ctrlc::set_handler(move || {
        if interrupt(&token) {
            std::process::exit(130);
        }
    })
    .context("Failed to install Ctrl-C handler")
}

/// Returns true when the run was already cancelled and the caller should quit.
fn interrupt(token: &CancelToken) -> bool {
    if token.is_cancelled() {
        return true;
    }
    warn!("interrupt received, stopping after in-flight requests (Ctrl-C again to quit)");
    token.cancel();
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_first_interrupt_cancels_second_quits() {
        let token = CancelToken::new();
        let seen_by_workers = token.clone();

        assert!(!interrupt(&token));
        assert!(seen_by_workers.is_cancelled());
        assert!(interrupt(&token));
    }
}
