//! External notification sinks
//!
//! Sinks hear about every issued and lifted punishment after the fact. They run
//! detached from the caller: a slow or failing sink never delays or undoes an
//! engine operation.

use crate::punishment::{NotifyError, Operator, Punishment, PunishmentKind};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::warn;

/// What happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PunishmentEvent {
    Issued {
        punishment: Punishment,
        operator: Operator,
    },
    Reversed {
        subject: String,
        /// Audit label of the reversal, e.g. `UNBAN`
        action: String,
        kinds: Vec<PunishmentKind>,
        operator: Operator,
        lifted: u64,
    },
}

impl PunishmentEvent {
    #[must_use]
    pub fn subject(&self) -> &str {
        match self {
            Self::Issued { punishment, .. } => &punishment.subject,
            Self::Reversed { subject, .. } => subject,
        }
    }
}

/// A place to report punishments to
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify(&self, event: &PunishmentEvent) -> Result<(), NotifyError>;
}

/// Registry of notification sinks
#[derive(Default)]
pub struct NotifierRegistry {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl NotifierRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sink: Arc<dyn Notifier>) {
        self.sinks.push(sink);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Hand the event to every sink on its own task.
    ///
    /// Failures are logged. The handles are returned for callers that want to
    /// wait, the engine never does.
    pub fn publish(&self, event: &PunishmentEvent) -> Vec<JoinHandle<()>> {
        self.sinks
            .iter()
            .map(|sink| {
                let sink = Arc::clone(sink);
                let event = event.clone();
                tokio::spawn(async move {
                    if let Err(e) = sink.notify(&event).await {
                        warn!(
                            notifier = sink.name(),
                            subject = %event.subject(),
                            error = %e,
                            "Notification failed"
                        );
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::punishment::Source;

    fn reversed() -> PunishmentEvent {
        PunishmentEvent::Reversed {
            subject: "Bob".to_string(),
            action: "UNBAN".to_string(),
            kinds: vec![PunishmentKind::Ban],
            operator: Operator::new("Alice", Source::Ingame),
            lifted: 1,
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_every_sink() {
        let mut registry = NotifierRegistry::new();
        for _ in 0..2 {
            let mut sink = MockNotifier::new();
            sink.expect_name().return_const("mock");
            sink.expect_notify()
                .withf(|event| event.subject() == "Bob")
                .times(1)
                .returning(|_| Ok(()));
            registry.register(Arc::new(sink));
        }

        for handle in registry.publish(&reversed()) {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_stop_others() {
        let mut registry = NotifierRegistry::new();

        let mut broken = MockNotifier::new();
        broken.expect_name().return_const("broken");
        broken
            .expect_notify()
            .times(1)
            .returning(|_| Err(NotifyError::Other("channel gone".to_string())));
        registry.register(Arc::new(broken));

        let mut healthy = MockNotifier::new();
        healthy.expect_name().return_const("healthy");
        healthy.expect_notify().times(1).returning(|_| Ok(()));
        registry.register(Arc::new(healthy));

        let handles = registry.publish(&reversed());
        assert_eq!(handles.len(), 2);
        for handle in handles {
            assert!(handle.await.is_ok());
        }
    }
}
