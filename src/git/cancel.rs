//! Deadlines expressed as cancellation.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Return a child of `parent` that is also cancelled once `after` elapses.
///
/// Cancel the returned token when the guarded work finishes early so the
/// timer task exits.
pub fn deadline(parent: &CancellationToken, after: Duration) -> CancellationToken {
    let token = parent.child_token();
    let timer = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = timer.cancelled() => {}
            () = tokio::time::sleep(after) => {
                debug!(timeout_ms = after.as_millis() as u64, "deadline reached");
                timer.cancel();
            }
        }
    });
    token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_duration() {
        let parent = CancellationToken::new();
        let token = deadline(&parent, Duration::from_secs(5));
        assert!(!token.is_cancelled());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(token.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn follows_parent() {
        let parent = CancellationToken::new();
        let token = deadline(&parent, Duration::from_secs(3600));
        parent.cancel();
        assert!(token.is_cancelled());
    }
}
