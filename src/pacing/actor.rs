use anyhow::{Result, anyhow};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::{PacingSession, SessionStats};
use crate::download::DownloadItem;

enum PacingCommand {
    NextDelay(oneshot::Sender<Duration>),
    RecordAttempt(bool),
    ShouldRotate(oneshot::Sender<bool>),
    Rotate(oneshot::Sender<SessionStats>),
    Randomize(Vec<DownloadItem>, oneshot::Sender<Vec<DownloadItem>>),
    Stats(oneshot::Sender<SessionStats>),
}

/// Cloneable handle to the task that owns the run's [`PacingSession`].
///
/// Every read-modify-write of pacing state happens inside that one task, so
/// concurrent workers never interleave a pattern switch with a delay draw.
#[derive(Debug, Clone)]
pub struct PacingHandle {
    sender: mpsc::UnboundedSender<PacingCommand>,
}

impl PacingHandle {
    /// Move the session into a background task. The task ends when the last handle drops.
    pub fn spawn(session: PacingSession) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_pacing(session, receiver));
        Self { sender }
    }

    pub async fn next_delay(&self) -> Result<Duration> {
        self.ask(PacingCommand::NextDelay).await
    }

    pub fn record_attempt(&self, success: bool) -> Result<()> {
        self.sender
            .send(PacingCommand::RecordAttempt(success))
            .map_err(|_| anyhow!("Pacing task has stopped"))
    }

    pub async fn should_rotate_session(&self) -> Result<bool> {
        self.ask(PacingCommand::ShouldRotate).await
    }

    pub async fn rotate_session(&self) -> Result<SessionStats> {
        self.ask(PacingCommand::Rotate).await
    }

    pub async fn randomize_order(&self, items: Vec<DownloadItem>) -> Result<Vec<DownloadItem>> {
        self.ask(|reply| PacingCommand::Randomize(items, reply))
            .await
    }

    pub async fn stats(&self) -> Result<SessionStats> {
        self.ask(PacingCommand::Stats).await
    }

    async fn ask<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> PacingCommand) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(command(reply))
            .map_err(|_| anyhow!("Pacing task has stopped"))?;
        response
            .await
            .map_err(|_| anyhow!("Pacing task dropped the request"))
    }
}

async fn run_pacing(
    mut session: PacingSession,
    mut receiver: mpsc::UnboundedReceiver<PacingCommand>,
) {
    while let Some(command) = receiver.recv().await {
        match command {
            PacingCommand::NextDelay(reply) => {
                let delay = session.next_delay();
                debug!("Next delay {:.1}s ({})", delay.as_secs_f64(), session.pattern());
                let _ = reply.send(delay);
            }
            PacingCommand::RecordAttempt(success) => session.record_attempt(success),
            PacingCommand::ShouldRotate(reply) => {
                let _ = reply.send(session.should_rotate_session());
            }
            PacingCommand::Rotate(reply) => {
                let _ = reply.send(session.rotate_session());
            }
            PacingCommand::Randomize(items, reply) => {
                let _ = reply.send(session.randomize_order(items));
            }
            PacingCommand::Stats(reply) => {
                let _ = reply.send(session.stats());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(count: usize) -> Vec<DownloadItem> {
        (0..count)
            .map(|i| {
                DownloadItem::new(
                    &format!("Game {}.zip", i),
                    &format!("http://roms.test/{}.zip", i),
                    "NES",
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_handle_serializes_session_updates() {
        let handle = PacingHandle::spawn(PacingSession::with_seed(2));
        let threshold = handle.stats().await.unwrap().rotation_threshold;

        let workers: Vec<_> = (0..threshold)
            .map(|_| {
                let handle = handle.clone();
                tokio::spawn(async move { handle.record_attempt(true) })
            })
            .collect();
        for worker in workers {
            worker.await.unwrap().unwrap();
        }

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.downloads_this_session, threshold);
        assert!(handle.should_rotate_session().await.unwrap());

        let rotated = handle.rotate_session().await.unwrap();
        assert_eq!(rotated.downloads_this_session, 0);
        assert!(!handle.should_rotate_session().await.unwrap());
    }

    #[tokio::test]
    async fn test_randomize_through_handle_keeps_every_item() {
        let handle = PacingHandle::spawn(PacingSession::with_seed(12));
        let original = items(15);

        let reordered = handle.randomize_order(original.clone()).await.unwrap();
        assert_eq!(reordered.len(), original.len());
        for item in &original {
            assert!(reordered.contains(item));
        }
    }

    #[tokio::test]
    async fn test_fixed_delays_through_handle() {
        let handle = PacingHandle::spawn(PacingSession::fixed(0.0, 0.0));
        assert_eq!(handle.next_delay().await.unwrap(), Duration::ZERO);
        assert!(!handle.should_rotate_session().await.unwrap());
    }
}
