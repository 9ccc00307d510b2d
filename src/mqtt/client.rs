//! MQTT client wrapper and the background delivery worker.

use super::BrokerLink;
use crate::config::MqttConfig;
use crate::error::{AgentError, Result};
use log::{debug, error, info, warn};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet,
};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Pause before polling again after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Upper bound on flushing the DISCONNECT packet at shutdown.
const DISCONNECT_FLUSH: Duration = Duration::from_secs(1);

/// Capacity of the request channel between `AsyncClient` and the event loop.
const REQUEST_CAPACITY: usize = 64;

/// Receives inbound publishes on the worker task.
///
/// Handlers run concurrently with the control loop. They must not share
/// mutable state with it without synchronisation.
pub trait MessageHandler: Send + 'static {
    fn handle(&mut self, topic: &str, payload: &[u8]);
}

/// Subscriptions the worker keeps issued across reconnects.
///
/// Every ConnAck starts a new round that issues each topic again. A request
/// the client refuses because its queue is full stays pending and is retried
/// from the worker until all topics have been queued.
pub struct Subscriptions {
    topics: Vec<String>,
    issued: usize,
}

impl Subscriptions {
    pub fn new(topics: Vec<String>) -> Self {
        let issued = topics.len();
        Self { topics, issued }
    }

    /// Connection-established handler: log the result and (re)issue every
    /// subscription.
    ///
    /// Repeating a SUBSCRIBE for a topic the broker already has is harmless,
    /// so this is safe after reconnects.
    pub fn on_connected<B: BrokerLink + ?Sized>(&mut self, link: &B, code: ConnectReturnCode) {
        info!("Connected with result code {:?}", code);
        self.issued = 0;
        if let Err(e) = self.issue(link) {
            warn!("Failed to subscribe after connecting, will retry: {}", e);
        }
    }

    /// Issue the topics still pending. Returns `true` once none are left.
    pub fn retry<B: BrokerLink + ?Sized>(&mut self, link: &B) -> bool {
        match self.issue(link) {
            Ok(()) => true,
            Err(e) => {
                debug!("Subscription still pending: {}", e);
                false
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        self.issued < self.topics.len()
    }

    fn issue<B: BrokerLink + ?Sized>(&mut self, link: &B) -> Result<()> {
        while let Some(topic) = self.topics.get(self.issued) {
            link.subscribe(topic)?;
            info!("Subscribing to MQTT topic: {}", topic);
            self.issued += 1;
        }
        Ok(())
    }
}

/// MQTT client before the connection is established.
pub struct MqttClient {
    client: AsyncClient,
    event_loop: EventLoop,
}

impl MqttClient {
    /// Create a new MQTT client from configuration.
    pub fn new(config: &MqttConfig) -> Self {
        let mut options =
            MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(config.keep_alive());

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);

        Self { client, event_loop }
    }

    /// Get a clone of the async client for publishing from other tasks.
    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }

    /// Start the event loop worker and wait for the first connection.
    ///
    /// The worker is spawned before waiting so it can drive the handshake.
    /// An error before the first ConnAck, or no ConnAck within `timeout`,
    /// stops the worker and is returned; later connection errors are only
    /// logged while the worker keeps reconnecting.
    pub async fn connect<H: MessageHandler>(
        self,
        subscriptions: Vec<String>,
        handler: H,
        timeout: Duration,
        shutdown: CancellationToken,
    ) -> Result<MqttSession> {
        let client = self.client();
        let (connected_tx, connected_rx) = oneshot::channel();

        let worker_shutdown = shutdown.clone();
        let worker = tokio::spawn(async move {
            self.run(subscriptions, handler, worker_shutdown, connected_tx)
                .await;
        });

        match tokio::time::timeout(timeout, connected_rx).await {
            Ok(Ok(Ok(()))) => {
                info!("MQTT connection established");
                Ok(MqttSession {
                    client,
                    worker,
                    shutdown,
                })
            }
            Ok(Ok(Err(reason))) => {
                let _ = worker.await;
                Err(AgentError::ConnectFailed(reason))
            }
            Ok(Err(_)) => {
                let _ = worker.await;
                Err(AgentError::WorkerStopped)
            }
            Err(_) => {
                worker.abort();
                Err(AgentError::ConnectTimeout(timeout))
            }
        }
    }

    /// Run the event loop until `shutdown` is cancelled.
    ///
    /// Inbound publishes are handed to `handler` one at a time. Cancellation
    /// is only observed between events, so a delivery in progress completes.
    async fn run<H: MessageHandler>(
        mut self,
        subscriptions: Vec<String>,
        mut handler: H,
        shutdown: CancellationToken,
        connected: oneshot::Sender<std::result::Result<(), String>>,
    ) {
        info!("Starting MQTT event loop");
        let mut connected = Some(connected);
        let mut subscriptions = Subscriptions::new(subscriptions);

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = self.event_loop.poll() => event,
            };

            // Each poll drains the request queue, so there may be room now
            if event.is_ok() && subscriptions.is_pending() && subscriptions.retry(&self.client) {
                info!("Pending subscriptions queued");
            }

            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    subscriptions.on_connected(&self.client, ack.code);
                    if let Some(tx) = connected.take() {
                        let _ = tx.send(Ok(()));
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!(
                        "Received MQTT message on {}: {}",
                        publish.topic,
                        String::from_utf8_lossy(&publish.payload)
                    );
                    handler.handle(&publish.topic, &publish.payload);
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    debug!("Subscription acknowledged: {:?}", ack.return_codes);
                }
                Ok(_) => {}
                Err(e) => {
                    if let Some(tx) = connected.take() {
                        let _ = tx.send(Err(e.to_string()));
                        return;
                    }
                    error!("MQTT connection error: {:?}", e);
                    // Wait before reconnecting
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                }
            }
        }

        self.disconnect().await;
        info!("MQTT event loop stopped");
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("Could not queue MQTT disconnect: {}", e);
            return;
        }

        let event_loop = &mut self.event_loop;
        let flush = async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(DISCONNECT_FLUSH, flush).await.is_err() {
            warn!("Timed out flushing MQTT disconnect");
        }
    }
}

/// A live broker connection with its worker task.
pub struct MqttSession {
    client: AsyncClient,
    worker: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl MqttSession {
    /// Client handle for publishing.
    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }

    /// Stop the worker and wait for it to finish its current delivery and
    /// disconnect.
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.worker.await {
            error!("MQTT worker ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::testing::{RecordingBroker, fill_queue, stalled_client};
    use crate::mqtt::topics;

    struct IgnoreMessages;

    impl MessageHandler for IgnoreMessages {
        fn handle(&mut self, _topic: &str, _payload: &[u8]) {}
    }

    fn unreachable_broker() -> MqttConfig {
        MqttConfig {
            broker_host: "127.0.0.1".to_string(),
            broker_port: 1,
            ..MqttConfig::default()
        }
    }

    fn led_subscriptions() -> Subscriptions {
        Subscriptions::new(vec![topics::LED_COMMAND.to_string()])
    }

    #[test]
    fn test_on_connected_subscribes_to_command_topic() {
        let broker = RecordingBroker::default();
        let mut subscriptions = led_subscriptions();
        assert!(!subscriptions.is_pending());

        subscriptions.on_connected(&broker, ConnectReturnCode::Success);

        assert!(!subscriptions.is_pending());
        assert_eq!(broker.subscribed(), vec![topics::LED_COMMAND.to_string()]);
        assert!(broker.published().is_empty());
    }

    #[test]
    fn test_on_connected_twice_only_resubscribes() {
        let broker = RecordingBroker::default();
        let mut subscriptions = led_subscriptions();

        subscriptions.on_connected(&broker, ConnectReturnCode::Success);
        subscriptions.on_connected(&broker, ConnectReturnCode::Success);

        assert_eq!(
            broker.subscribed(),
            vec![
                topics::LED_COMMAND.to_string(),
                topics::LED_COMMAND.to_string()
            ]
        );
        assert!(broker.published().is_empty());
    }

    #[test]
    fn test_subscription_refused_by_full_queue_stays_pending() {
        let (client, _event_loop) = stalled_client(4);
        fill_queue(&client);
        let mut subscriptions = led_subscriptions();

        subscriptions.on_connected(&client, ConnectReturnCode::Success);

        assert!(subscriptions.is_pending());
        assert!(!subscriptions.retry(&client));
        assert!(subscriptions.is_pending());
    }

    #[test]
    fn test_pending_subscription_is_retried_until_queued() {
        let broker = RecordingBroker::default();
        let mut subscriptions = Subscriptions::new(vec![
            topics::LED_COMMAND.to_string(),
            "cmd/other".to_string(),
        ]);

        broker.set_rejecting(true);
        subscriptions.on_connected(&broker, ConnectReturnCode::Success);
        assert!(subscriptions.is_pending());
        assert!(!subscriptions.retry(&broker));
        assert!(broker.subscribed().is_empty());

        broker.set_rejecting(false);
        assert!(subscriptions.retry(&broker));
        assert!(!subscriptions.is_pending());
        assert_eq!(
            broker.subscribed(),
            vec![topics::LED_COMMAND.to_string(), "cmd/other".to_string()]
        );

        // Nothing left to issue
        assert!(subscriptions.retry(&broker));
        assert_eq!(broker.subscribed().len(), 2);
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_broker_fails() {
        let client = MqttClient::new(&unreachable_broker());

        let result = client
            .connect(
                vec![topics::LED_COMMAND.to_string()],
                IgnoreMessages,
                Duration::from_secs(5),
                CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            result,
            Err(AgentError::ConnectFailed(_)) | Err(AgentError::ConnectTimeout(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_after_shutdown_reports_stopped_worker() {
        let client = MqttClient::new(&unreachable_broker());
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let result = client
            .connect(Vec::new(), IgnoreMessages, Duration::from_secs(5), shutdown)
            .await;

        assert!(matches!(result, Err(AgentError::WorkerStopped)));
    }
}
