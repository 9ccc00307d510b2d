//! MQTT transport for the agent.
//!
//! `client` owns the rumqttc event loop and the background worker; `topics`
//! names the channels the agent publishes and listens on.

mod client;
pub mod topics;

pub use client::{MessageHandler, MqttClient, MqttSession, Subscriptions};

use crate::error::{AgentError, Result};
use log::debug;
use rumqttc::{AsyncClient, ClientError, QoS};
use std::sync::Arc;

/// The broker operations the agent needs.
///
/// Both calls only queue a request for the event loop and never wait for
/// channel space, so a broker outage cannot stall the caller. Implemented by
/// rumqttc's [`AsyncClient`]; tests substitute a recorder.
pub trait BrokerLink: Send + Sync {
    /// Queue a text payload for publishing. Fails with
    /// [`AgentError::RequestQueueFull`] instead of waiting.
    fn publish(&self, topic: &str, payload: &str) -> Result<()>;

    /// Queue a subscription request. Fails with
    /// [`AgentError::RequestQueueFull`] instead of waiting.
    fn subscribe(&self, topic: &str) -> Result<()>;
}

fn request_error(e: ClientError) -> AgentError {
    match e {
        ClientError::TryRequest(_) => AgentError::RequestQueueFull,
        e => AgentError::ClientError(e),
    }
}

impl BrokerLink for AsyncClient {
    fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        debug!("Publishing to {}: {}", topic, payload);
        self.try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes())
            .map_err(request_error)
    }

    fn subscribe(&self, topic: &str) -> Result<()> {
        self.try_subscribe(topic, QoS::AtMostOnce)
            .map_err(request_error)
    }
}

impl<T: BrokerLink + ?Sized> BrokerLink for Arc<T> {
    fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        (**self).publish(topic, payload)
    }

    fn subscribe(&self, topic: &str) -> Result<()> {
        (**self).subscribe(topic)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use rumqttc::{EventLoop, MqttOptions};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio_test::assert_ok;

    /// Records every request instead of talking to a broker.
    ///
    /// While rejecting, every request fails as if the queue were full.
    #[derive(Default)]
    pub struct RecordingBroker {
        published: Mutex<Vec<(String, String)>>,
        subscribed: Mutex<Vec<String>>,
        rejecting: AtomicBool,
    }

    impl RecordingBroker {
        pub fn published(&self) -> Vec<(String, String)> {
            self.published.lock().clone()
        }

        pub fn published_to(&self, topic: &str) -> Vec<String> {
            self.published
                .lock()
                .iter()
                .filter(|(t, _)| t == topic)
                .map(|(_, p)| p.clone())
                .collect()
        }

        pub fn subscribed(&self) -> Vec<String> {
            self.subscribed.lock().clone()
        }

        pub fn set_rejecting(&self, rejecting: bool) {
            self.rejecting.store(rejecting, Ordering::SeqCst);
        }

        fn accept(&self) -> Result<()> {
            if self.rejecting.load(Ordering::SeqCst) {
                Err(AgentError::RequestQueueFull)
            } else {
                Ok(())
            }
        }
    }

    impl BrokerLink for RecordingBroker {
        fn publish(&self, topic: &str, payload: &str) -> Result<()> {
            self.accept()?;
            self.published
                .lock()
                .push((topic.to_string(), payload.to_string()));
            Ok(())
        }

        fn subscribe(&self, topic: &str) -> Result<()> {
            self.accept()?;
            self.subscribed.lock().push(topic.to_string());
            Ok(())
        }
    }

    /// A real client whose event loop is never polled, as during an outage.
    ///
    /// The event loop must be kept alive, otherwise requests fail because the
    /// channel is closed rather than full.
    pub fn stalled_client(capacity: usize) -> (AsyncClient, EventLoop) {
        AsyncClient::new(MqttOptions::new("stalled", "127.0.0.1", 1), capacity)
    }

    /// Queue publishes until the client refuses one; returns how many fit.
    pub fn fill_queue(client: &AsyncClient) -> usize {
        let mut queued = 0;
        while BrokerLink::publish(client, topics::SWITCH, topics::ON).is_ok() {
            queued += 1;
        }
        queued
    }

    #[test]
    fn test_stalled_client_rejects_once_full() {
        let (client, _event_loop) = stalled_client(4);

        assert_ok!(BrokerLink::subscribe(&client, topics::LED_COMMAND));
        assert_eq!(fill_queue(&client), 3);
        assert!(matches!(
            BrokerLink::subscribe(&client, topics::LED_COMMAND),
            Err(AgentError::RequestQueueFull)
        ));
    }
}
