//! Pause/resume/cancel signalling between a run and its consumers
//!
//! Control state lives in a watch channel. Waiting runs wake as soon as the
//! value changes; `pause_poll` only bounds how long a paused run sleeps
//! between re-checks.

use super::state::LoadingState;
use crate::{metrics, FollowGraphError, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Requested run behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Running,
    Paused,
    Cancelled,
}

/// Cloneable remote control for a pipeline
#[derive(Clone)]
pub struct PipelineHandle {
    control: Arc<watch::Sender<Control>>,
    status: watch::Receiver<LoadingState>,
}

impl PipelineHandle {
    pub(crate) fn new(
        control: Arc<watch::Sender<Control>>,
        status: watch::Receiver<LoadingState>,
    ) -> Self {
        Self { control, status }
    }

    /// Hold the run at its next checkpoint
    pub fn pause(&self) {
        self.control.send_if_modified(|c| {
            if *c == Control::Running {
                *c = Control::Paused;
                true
            } else {
                false
            }
        });
    }

    /// Continue a paused run from where it stopped
    pub fn resume(&self) {
        self.control.send_if_modified(|c| {
            if *c == Control::Paused {
                *c = Control::Running;
                true
            } else {
                false
            }
        });
    }

    /// Toggle between paused and running
    pub fn toggle_pause(&self) -> bool {
        if self.is_paused() {
            self.resume();
            false
        } else {
            self.pause();
            self.is_paused()
        }
    }

    /// Stop the run silently at its next suspension point
    pub fn cancel(&self) {
        self.control.send_replace(Control::Cancelled);
    }

    pub fn is_paused(&self) -> bool {
        *self.control.borrow() == Control::Paused
    }

    /// Latest published progress
    pub fn state(&self) -> LoadingState {
        self.status.borrow().clone()
    }

    /// Receiver that observes every status change
    pub fn subscribe(&self) -> watch::Receiver<LoadingState> {
        self.status.clone()
    }

    /// Wait until no run is active and return the final state
    pub async fn wait_finished(&self) -> LoadingState {
        let mut rx = self.status.clone();
        let finished = match rx.wait_for(|s| !s.status.is_active()).await {
            Ok(state) => Some(state.clone()),
            Err(_) => None,
        };
        finished.unwrap_or_else(|| rx.borrow().clone())
    }
}

/// Return once the run may proceed
///
/// Blocks while paused; fails with [`FollowGraphError::Cancelled`] once
/// cancelled.
pub(crate) async fn checkpoint(
    rx: &mut watch::Receiver<Control>,
    pause_poll: Duration,
) -> Result<()> {
    let mut paused = false;
    let outcome = loop {
        let control = *rx.borrow_and_update();
        match control {
            Control::Running => break Ok(()),
            Control::Cancelled => break Err(FollowGraphError::Cancelled),
            Control::Paused => {
                if !paused {
                    paused = true;
                    metrics::set_paused(true);
                    tracing::info!("Run paused");
                }
                if let Ok(Err(_)) = tokio::time::timeout(pause_poll, rx.changed()).await {
                    break Err(FollowGraphError::Cancelled);
                }
            }
        }
    };
    if paused {
        metrics::set_paused(false);
        if outcome.is_ok() {
            tracing::info!("Run resumed");
        }
    }
    outcome
}

/// Sleep for `duration`, returning early with an error on cancellation
pub(crate) async fn sleep_cancellable(
    mut rx: watch::Receiver<Control>,
    duration: Duration,
) -> Result<()> {
    until_cancelled(&mut rx, async {
        tokio::time::sleep(duration).await;
        Ok(())
    })
    .await
}

/// Drive `fut` to completion unless the run is cancelled first
pub(crate) async fn until_cancelled<T, F>(rx: &mut watch::Receiver<Control>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::pin!(fut);
    loop {
        if *rx.borrow_and_update() == Control::Cancelled {
            return Err(FollowGraphError::Cancelled);
        }
        tokio::select! {
            result = &mut fut => return result,
            changed = rx.changed() => {
                if changed.is_err() {
                    return Err(FollowGraphError::Cancelled);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::LoadingStatus;

    fn channel() -> (PipelineHandle, watch::Receiver<Control>) {
        let (control, rx) = watch::channel(Control::Running);
        let (_status_tx, status_rx) = watch::channel(LoadingState::default());
        (PipelineHandle::new(Arc::new(control), status_rx), rx)
    }

    #[test]
    fn test_pause_resume_cancel() {
        let (handle, rx) = channel();

        handle.pause();
        assert!(handle.is_paused());
        handle.resume();
        assert_eq!(*rx.borrow(), Control::Running);

        assert!(handle.toggle_pause());
        assert!(!handle.toggle_pause());

        handle.cancel();
        handle.pause();
        handle.resume();
        assert_eq!(*rx.borrow(), Control::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkpoint_waits_for_resume() {
        let (handle, mut rx) = channel();
        handle.pause();

        let resumer = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            resumer.resume();
        });

        let start = tokio::time::Instant::now();
        checkpoint(&mut rx, Duration::from_millis(100)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkpoint_cancelled_while_paused() {
        let (handle, mut rx) = channel();
        handle.pause();

        let canceller = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            canceller.cancel();
        });

        let err = checkpoint(&mut rx, Duration::from_millis(100)).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_by_cancel() {
        let (handle, rx) = channel();

        let canceller = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let start = tokio::time::Instant::now();
        let result = sleep_cancellable(rx, Duration::from_secs(60)).await;
        assert!(result.unwrap_err().is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_finished_returns_final_state() {
        let (control, _rx) = watch::channel(Control::Running);
        let (status_tx, status_rx) = watch::channel(LoadingState {
            status: LoadingStatus::LoadingRelations,
            ..LoadingState::default()
        });
        let handle = PipelineHandle::new(Arc::new(control), status_rx);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            status_tx.send_modify(|s| {
                s.status = LoadingStatus::Done;
                s.current = 3;
                s.total = 3;
            });
        });

        let state = handle.wait_finished().await;
        assert_eq!(state.status, LoadingStatus::Done);
        assert_eq!(state.current, 3);
    }

    #[tokio::test]
    async fn test_wait_finished_after_publisher_dropped() {
        let (control, _rx) = watch::channel(Control::Running);
        let (status_tx, status_rx) = watch::channel(LoadingState {
            status: LoadingStatus::LoadingFollowings,
            current: 2,
            ..LoadingState::default()
        });
        let handle = PipelineHandle::new(Arc::new(control), status_rx);
        drop(status_tx);

        let state = handle.wait_finished().await;
        assert_eq!(state.status, LoadingStatus::LoadingFollowings);
        assert_eq!(state.current, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_ignores_pause() {
        let (handle, rx) = channel();
        handle.pause();
        sleep_cancellable(rx, Duration::from_millis(300)).await.unwrap();
    }
}
