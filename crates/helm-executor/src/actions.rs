//! Goal/feedback/result contract for the motion backends.
//!
//! Each backend is a client/server pair joined by channels. The client side
//! lives with the state machine, which polls a [`GoalHandle`] every tick
//! instead of blocking in callbacks; the server side is bridged to whatever
//! controller actually moves the vehicle.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

/// Terminal status of a goal. The executor treats both variants as
/// completion; recovery from a failed goal happens one level up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalStatus {
    Succeeded,
    Aborted,
}

struct GoalMessage<G, F> {
    goal: G,
    cancel: watch::Receiver<bool>,
    feedback: mpsc::Sender<F>,
    done: oneshot::Sender<GoalStatus>,
}

/// Client half of a backend action.
pub struct ActionClient<G, F> {
    name: &'static str,
    goal_tx: mpsc::Sender<GoalMessage<G, F>>,
    ready: watch::Receiver<bool>,
    /// Cancel flag of the most recently sent goal, for `cancel_goal`.
    last_cancel: Mutex<Option<Arc<watch::Sender<bool>>>>,
}

/// Server half of a backend action.
pub struct ActionServer<G, F> {
    goal_rx: mpsc::Receiver<GoalMessage<G, F>>,
    ready_tx: watch::Sender<bool>,
}

/// A goal in flight, owned by the state that sent it.
pub struct GoalHandle<F> {
    cancel: Arc<watch::Sender<bool>>,
    done: oneshot::Receiver<GoalStatus>,
    feedback: mpsc::Receiver<F>,
    result: Option<GoalStatus>,
}

/// A goal as seen by the server side.
pub struct ServerGoal<G, F> {
    pub goal: G,
    cancel: watch::Receiver<bool>,
    feedback: mpsc::Sender<F>,
    done: Option<oneshot::Sender<GoalStatus>>,
}

/// Create a connected client/server pair. The client reports the server as
/// absent until [`ActionServer::advertise`] is called.
pub fn pair<G, F>(name: &'static str) -> (ActionClient<G, F>, ActionServer<G, F>) {
    let (goal_tx, goal_rx) = mpsc::channel(4);
    let (ready_tx, ready) = watch::channel(false);
    (
        ActionClient {
            name,
            goal_tx,
            ready,
            last_cancel: Mutex::new(None),
        },
        ActionServer { goal_rx, ready_tx },
    )
}

impl<G, F> ActionClient<G, F> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wait until the server has advertised, bounded by `timeout`.
    pub async fn wait_for_server(&self, timeout: Duration) -> bool {
        let mut ready = self.ready.clone();
        if *ready.borrow() {
            return true;
        }
        tokio::time::timeout(timeout, async {
            loop {
                if ready.changed().await.is_err() {
                    return false;
                }
                if *ready.borrow() {
                    return true;
                }
            }
        })
        .await
        .unwrap_or(false)
    }

    /// Send a goal and get a handle to poll. The previous goal of this
    /// client stays cancellable through [`Self::cancel_goal`].
    pub fn send_goal(&self, goal: G) -> GoalHandle<F> {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel_tx = Arc::new(cancel_tx);
        let (done_tx, done_rx) = oneshot::channel();
        let (feedback_tx, feedback_rx) = mpsc::channel(16);
        let message = GoalMessage {
            goal,
            cancel: cancel_rx,
            feedback: feedback_tx,
            done: done_tx,
        };
        if self.goal_tx.try_send(message).is_err() {
            tracing::warn!("{}: action server is not accepting goals", self.name);
        }
        if let Ok(mut guard) = self.last_cancel.lock() {
            *guard = Some(cancel_tx.clone());
        }
        GoalHandle {
            cancel: cancel_tx,
            done: done_rx,
            feedback: feedback_rx,
            result: None,
        }
    }

    /// Cancel the most recently sent goal, if any.
    pub fn cancel_goal(&self) {
        if let Ok(guard) = self.last_cancel.lock() {
            if let Some(cancel) = guard.as_ref() {
                let _ = cancel.send(true);
            }
        }
    }
}

impl<F> GoalHandle<F> {
    /// Ask the server to stop working on this goal.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Poll for the terminal status. A server that dropped the goal counts
    /// as an aborted result, which the executor treats as completion anyway.
    pub fn try_result(&mut self) -> Option<GoalStatus> {
        if self.result.is_none() {
            self.result = match self.done.try_recv() {
                Ok(status) => Some(status),
                Err(oneshot::error::TryRecvError::Empty) => None,
                Err(oneshot::error::TryRecvError::Closed) => Some(GoalStatus::Aborted),
            };
        }
        self.result
    }

    /// Drain one feedback message, if the server has sent any.
    pub fn try_feedback(&mut self) -> Option<F> {
        self.feedback.try_recv().ok()
    }
}

impl<G, F> ActionServer<G, F> {
    /// Announce readiness; clients block in `wait_for_server` until this.
    pub fn advertise(&self) {
        let _ = self.ready_tx.send(true);
    }

    pub fn unadvertise(&self) {
        let _ = self.ready_tx.send(false);
    }

    /// Receive the next goal; `None` when every client handle is gone.
    pub async fn recv(&mut self) -> Option<ServerGoal<G, F>> {
        let message = self.goal_rx.recv().await?;
        Some(ServerGoal {
            goal: message.goal,
            cancel: message.cancel,
            feedback: message.feedback,
            done: Some(message.done),
        })
    }
}

impl<G, F> ServerGoal<G, F> {
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Wait until the client cancels this goal (or drops its handle).
    pub async fn cancelled(&mut self) {
        loop {
            if *self.cancel.borrow() {
                return;
            }
            if self.cancel.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn feedback(&self, feedback: F) {
        let _ = self.feedback.try_send(feedback);
    }

    pub fn succeed(mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(GoalStatus::Succeeded);
        }
    }

    pub fn abort(mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(GoalStatus::Aborted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_server_times_out_without_advertise() {
        let (client, _server) = pair::<(), ()>("test_action");
        assert!(!client.wait_for_server(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_wait_for_server_sees_late_advertise() {
        let (client, server) = pair::<(), ()>("test_action");
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            server.advertise();
            // Keep the server alive past the wait.
            tokio::time::sleep(Duration::from_millis(50)).await;
        });
        assert!(client.wait_for_server(Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn test_goal_completes_with_status() {
        let (client, mut server) = pair::<u32, ()>("test_action");
        server.advertise();
        let mut handle = client.send_goal(7);
        let goal = server.recv().await.unwrap();
        assert_eq!(goal.goal, 7);
        assert_eq!(handle.try_result(), None);
        goal.succeed();
        tokio::task::yield_now().await;
        assert_eq!(handle.try_result(), Some(GoalStatus::Succeeded));
    }

    #[tokio::test]
    async fn test_cancel_reaches_server() {
        let (client, mut server) = pair::<u32, ()>("test_action");
        server.advertise();
        let handle = client.send_goal(1);
        let mut goal = server.recv().await.unwrap();
        assert!(!goal.is_cancelled());
        handle.cancel();
        goal.cancelled().await;
        assert!(goal.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_goal_reaches_last_goal() {
        let (client, mut server) = pair::<u32, ()>("test_action");
        server.advertise();
        let _handle = client.send_goal(1);
        let mut goal = server.recv().await.unwrap();
        client.cancel_goal();
        goal.cancelled().await;
        assert!(goal.is_cancelled());
    }

    #[tokio::test]
    async fn test_dropped_server_counts_as_aborted() {
        let (client, server) = pair::<u32, ()>("test_action");
        let mut handle = client.send_goal(1);
        drop(server);
        tokio::task::yield_now().await;
        assert_eq!(handle.try_result(), Some(GoalStatus::Aborted));
    }
}
