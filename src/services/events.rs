//! Where domain events go once their change is committed.

use async_trait::async_trait;

use crate::domain::events::DomainEvent;

/// Publishing is best effort: the state change is already durable, so a sink logs its own failures.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &DomainEvent);

    async fn publish_all(&self, events: Vec<DomainEvent>) {
        for event in &events {
            self.publish(event).await;
        }
    }
}

/// Default sink: structured log lines only.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn publish(&self, event: &DomainEvent) {
        tracing::info!(subject = event.subject(), ?event, "domain event");
    }
}

/// Forwards events to NATS as JSON under `<prefix>.<aggregate>.<event>`.
#[derive(Clone)]
pub struct NatsSink {
    client: async_nats::Client,
    prefix: String,
}

impl NatsSink {
    pub fn new(client: async_nats::Client, prefix: impl Into<String>) -> Self {
        Self { client, prefix: prefix.into() }
    }

    pub fn subject_for(&self, event: &DomainEvent) -> String { format!("{}.{}", self.prefix, event.subject()) }
}

#[async_trait]
impl EventSink for NatsSink {
    async fn publish(&self, event: &DomainEvent) {
        let subject = self.subject_for(event);
        let payload = match serde_json::to_vec(event) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(%subject, error = %e, "cannot encode domain event");
                return;
            }
        };
        if let Err(e) = self.client.publish(subject.clone(), payload.into()).await {
            tracing::warn!(%subject, error = %e, "failed to publish domain event");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Keeps every published event for assertions.
    #[derive(Default)]
    pub struct RecordingSink {
        events: Mutex<Vec<DomainEvent>>,
    }

    impl RecordingSink {
        pub fn subjects(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().iter().map(DomainEvent::subject).collect()
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn publish(&self, event: &DomainEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }
}
