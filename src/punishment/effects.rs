//! Subject-facing side effects
//!
//! Disconnects, direct messages and broadcasts may only touch the game server
//! from its main loop. Engine calls arrive from any task, so they queue their
//! effects here and wait for the loop to acknowledge them.

use crate::punishment::{EffectError, ProtectionFlags};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A subject currently connected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnlineSubject {
    /// Name as the server spells it
    pub name: String,
    pub stable_id: Option<String>,
    pub address: Option<String>,
    pub protections: ProtectionFlags,
}

/// Who is online right now. Safe to call from any task.
#[cfg_attr(test, mockall::automock)]
pub trait Presence: Send + Sync {
    fn find_online(&self, name: &str) -> Option<OnlineSubject>;
}

/// Main-loop-only game server operations
#[cfg_attr(test, mockall::automock)]
pub trait GameServer: Send + Sync {
    /// Disconnect an online subject with a screen. Returns false if they were gone.
    fn disconnect(&self, subject: &str, screen: &str) -> bool;

    /// Message one online subject. Returns false if they were gone.
    fn send_message(&self, subject: &str, text: &str) -> bool;

    fn broadcast(&self, text: &str);
}

/// One side effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Disconnect { subject: String, screen: String },
    Message { subject: String, text: String },
    Broadcast { text: String },
}

#[derive(Debug)]
enum LoopRequest {
    Apply {
        effects: Vec<Effect>,
        done: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Create a connected dispatcher/loop pair
pub fn channel(
    server: Arc<dyn GameServer>,
    capacity: usize,
    ack_timeout: Duration,
) -> (EffectDispatcher, MainLoop) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        EffectDispatcher { tx, ack_timeout },
        MainLoop {
            server,
            rx,
            stopped: false,
        },
    )
}

/// Sending half, cloned into every engine handle
#[derive(Clone)]
pub struct EffectDispatcher {
    tx: Sender<LoopRequest>,
    ack_timeout: Duration,
}

impl EffectDispatcher {
    /// Queue effects and wait until the main loop has applied them.
    ///
    /// # Errors
    ///
    /// Returns `EffectError::LoopClosed` if the loop is gone, or
    /// `EffectError::AckTimeout` if it did not get to the batch in time.
    pub async fn dispatch(&self, effects: Vec<Effect>) -> Result<(), EffectError> {
        if effects.is_empty() {
            return Ok(());
        }

        let (done, ack) = oneshot::channel();
        let submit = async {
            self.tx
                .send(LoopRequest::Apply { effects, done })
                .await
                .map_err(|_| EffectError::LoopClosed)?;
            ack.await.map_err(|_| EffectError::LoopClosed)
        };

        tokio::time::timeout(self.ack_timeout, submit)
            .await
            .unwrap_or(Err(EffectError::AckTimeout(self.ack_timeout)))
    }

    /// Ask the loop to stop after the requests already queued
    pub async fn shutdown(&self) {
        if self.tx.send(LoopRequest::Shutdown).await.is_err() {
            debug!("Main loop already stopped");
        }
    }
}

/// Receiving half, owned by whatever drives the game server
pub struct MainLoop {
    server: Arc<dyn GameServer>,
    rx: Receiver<LoopRequest>,
    stopped: bool,
}

impl MainLoop {
    /// Consume requests until shutdown or until every dispatcher is dropped
    pub async fn run(mut self) {
        info!("Main loop started");
        while let Some(request) = self.rx.recv().await {
            if !self.handle(request) {
                break;
            }
        }
        self.stopped = true;
        info!("Main loop shut down");
    }

    /// Run the loop as a task on the current runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Apply whatever is queued without waiting, for hosts that tick the loop
    /// from their own thread. Returns the number of requests handled.
    pub fn drain(&mut self) -> usize {
        let mut handled = 0;
        while !self.stopped {
            match self.rx.try_recv() {
                Ok(request) => {
                    handled += 1;
                    if !self.handle(request) {
                        self.stopped = true;
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.stopped = true;
                }
            }
        }
        handled
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn handle(&self, request: LoopRequest) -> bool {
        match request {
            LoopRequest::Apply { effects, done } => {
                for effect in effects {
                    self.apply(effect);
                }
                if done.send(()).is_err() {
                    debug!("Effect batch applied after its issuer stopped waiting");
                }
                true
            }
            LoopRequest::Shutdown => {
                info!("Received shutdown request for main loop");
                false
            }
        }
    }

    fn apply(&self, effect: Effect) {
        match effect {
            Effect::Disconnect { subject, screen } => {
                if !self.server.disconnect(&subject, &screen) {
                    warn!(subject = %subject, "Subject left before the disconnect was applied");
                }
            }
            Effect::Message { subject, text } => {
                if !self.server.send_message(&subject, &text) {
                    debug!(subject = %subject, "Subject left before the message was delivered");
                }
            }
            Effect::Broadcast { text } => self.server.broadcast(&text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::Sequence;

    #[tokio::test]
    async fn test_dispatch_applies_in_order() {
        let mut server = MockGameServer::new();
        let mut seq = Sequence::new();
        server
            .expect_disconnect()
            .withf(|subject, screen| subject == "Bob" && screen == "bye")
            .times(1)
            .in_sequence(&mut seq)
            .return_const(true);
        server
            .expect_broadcast()
            .withf(|text| text == "Bob was banned")
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());

        let (dispatcher, main_loop) = channel(Arc::new(server), 8, Duration::from_secs(1));
        let handle = main_loop.spawn();

        dispatcher
            .dispatch(vec![
                Effect::Disconnect {
                    subject: "Bob".to_string(),
                    screen: "bye".to_string(),
                },
                Effect::Broadcast {
                    text: "Bob was banned".to_string(),
                },
            ])
            .await
            .unwrap();

        dispatcher.shutdown().await;
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_after_shutdown_fails() {
        let server = MockGameServer::new();
        let (dispatcher, main_loop) = channel(Arc::new(server), 8, Duration::from_secs(1));
        let handle = main_loop.spawn();
        dispatcher.shutdown().await;
        handle.await.unwrap();

        let result = dispatcher
            .dispatch(vec![Effect::Broadcast {
                text: "late".to_string(),
            }])
            .await;
        assert_eq!(result, Err(EffectError::LoopClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_times_out_without_a_loop() {
        let server = MockGameServer::new();
        let (dispatcher, _main_loop) = channel(Arc::new(server), 8, Duration::from_millis(50));

        let result = dispatcher
            .dispatch(vec![Effect::Broadcast {
                text: "nobody home".to_string(),
            }])
            .await;
        assert_eq!(result, Err(EffectError::AckTimeout(Duration::from_millis(50))));
    }

    #[tokio::test]
    async fn test_drain_from_host_thread() {
        let mut server = MockGameServer::new();
        server
            .expect_send_message()
            .withf(|subject, text| subject == "Carl" && text == "muted")
            .times(1)
            .return_const(true);

        let (dispatcher, mut main_loop) = channel(Arc::new(server), 8, Duration::from_secs(5));
        let pending = tokio::spawn(async move {
            dispatcher
                .dispatch(vec![Effect::Message {
                    subject: "Carl".to_string(),
                    text: "muted".to_string(),
                }])
                .await
        });

        let mut handled = 0;
        while handled == 0 {
            tokio::task::yield_now().await;
            handled = main_loop.drain();
        }
        assert_eq!(handled, 1);
        assert!(pending.await.unwrap().is_ok());
        assert!(!main_loop.is_stopped());
    }
}
