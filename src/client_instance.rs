//! Client-side service instance: discovers a [`Service`] via SD, calls its
//! methods, and subscribes to its eventgroups.
//!
//! One instance tracks exactly one (service_id, instance_id) target. It
//! attaches itself to a [`ServiceDiscovery`] engine as an observer and reacts
//! to `on_offer` and `on_subscribe_ack`; subscribe requests are deferred
//! until an offer for the target is actually seen.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::codec_async::{read_message_async, write_message_async};
use crate::discovery::{ServiceDiscovery, ServiceDiscoveryObserver};
use crate::error::{Result, SomeIpError};
use crate::header::{ClientId, MethodId, SessionId};
use crate::message::SomeIpMessage;
use crate::reassembler::Reassembler;
use crate::sd::{Endpoint, EventgroupEntry, EventgroupId, InstanceId, OfferedService, SdMessage, TransportProtocol};
use crate::service::Service;
use crate::session::SessionHandler;
use crate::ttl_store::{TtlItem, TtlStore};
use crate::types::{MessageType, ReturnCode};

const MAX_DATAGRAM: usize = 1400;

/// Settings for one [`ClientServiceInstance`].
#[derive(Debug, Clone)]
pub struct ClientInstanceConfig {
    /// Instance id of the target service, matched against observed offers.
    pub instance_id: InstanceId,
    /// Local endpoint advertised in outgoing Subscribe entries, and bound
    /// for receiving traffic when `protocol` is UDP.
    pub local_endpoint: SocketAddr,
    /// Transport this instance calls methods and receives events on.
    pub protocol: TransportProtocol,
    /// ttl (seconds) carried in outgoing SubscribeEventgroup entries.
    pub subscribe_ttl_secs: u32,
    /// Client id stamped on outgoing method calls.
    pub client_id: ClientId,
}

impl Default for ClientInstanceConfig {
    fn default() -> Self {
        Self {
            instance_id: InstanceId(0x0001),
            local_endpoint: "127.0.0.1:0".parse().unwrap(),
            protocol: TransportProtocol::Udp,
            subscribe_ttl_secs: 5,
            client_id: ClientId(0x0100),
        }
    }
}

/// Per-call settings for [`ClientServiceInstance::call_method`].
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Deadline after which an unanswered call resolves with `E_TIMEOUT`.
    pub timeout: Duration,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
        }
    }
}

/// The outcome of a [`ClientServiceInstance::call_method`].
#[derive(Debug, Clone)]
pub struct MethodResult {
    pub message_type: MessageType,
    pub return_code: ReturnCode,
    pub payload: Bytes,
}

/// Synchronous callback invoked for each notification matching an active
/// subscription. Must not block; see the crate's concurrency model.
type EventCallback = Arc<dyn Fn(MethodId, Bytes) + Send + Sync>;

#[derive(Debug, Clone)]
struct OfferedServiceItem(OfferedService);

impl TtlItem for OfferedServiceItem {
    type Key = (crate::header::ServiceId, InstanceId);

    fn key(&self) -> Self::Key {
        (self.0.service_id, self.0.instance_id)
    }
}

struct SubscriptionState {
    ttl_secs: u32,
    expect_ack: bool,
    active: bool,
}

enum ClientTransport {
    Udp(Arc<UdpSocket>),
    Tcp {
        writer: Mutex<Option<BufWriter<OwnedWriteHalf>>>,
        peer: Mutex<Option<SocketAddr>>,
    },
}

/// Calls methods on, and subscribes to events from, one remote service
/// instance discovered over SOME/IP-SD.
pub struct ClientServiceInstance {
    service: Service,
    config: ClientInstanceConfig,
    discovery: Arc<ServiceDiscovery>,
    transport: ClientTransport,
    offered: TtlStore<OfferedServiceItem>,
    subscriptions: Mutex<HashMap<EventgroupId, SubscriptionState>>,
    last_endpoint: Mutex<Option<Endpoint>>,
    call_session: Mutex<SessionHandler>,
    pending_calls: Mutex<HashMap<(ClientId, SessionId), oneshot::Sender<SomeIpMessage>>>,
    event_callback: Mutex<Option<EventCallback>>,
}

impl ClientServiceInstance {
    /// Bind the configured transport (UDP only; TCP connects lazily on first
    /// call), attach to `discovery` as an observer, and start the receive
    /// loop for UDP.
    pub async fn new(
        service: Service,
        config: ClientInstanceConfig,
        discovery: Arc<ServiceDiscovery>,
    ) -> Result<Arc<Self>> {
        let mut config = config;
        let transport = match config.protocol {
            TransportProtocol::Udp => {
                let socket = UdpSocket::bind(config.local_endpoint).await.map_err(SomeIpError::io)?;
                // `local_endpoint` may have asked for an ephemeral port (":0");
                // advertise the port the OS actually assigned, not the literal
                // config, since outgoing Subscribe entries carry this endpoint.
                config.local_endpoint = socket.local_addr().map_err(SomeIpError::io)?;
                ClientTransport::Udp(Arc::new(socket))
            }
            TransportProtocol::Tcp => ClientTransport::Tcp {
                writer: Mutex::new(None),
                peer: Mutex::new(None),
            },
        };

        let instance = Arc::new(Self {
            service,
            config,
            discovery,
            transport,
            offered: TtlStore::new(),
            subscriptions: Mutex::new(HashMap::new()),
            last_endpoint: Mutex::new(None),
            call_session: Mutex::new(SessionHandler::new()),
            pending_calls: Mutex::new(HashMap::new()),
            event_callback: Mutex::new(None),
        });

        instance
            .discovery
            .attach(Arc::downgrade(&instance) as std::sync::Weak<dyn ServiceDiscoveryObserver>)
            .await;

        if let ClientTransport::Udp(socket) = &instance.transport {
            let inst = instance.clone();
            let socket = socket.clone();
            tokio::spawn(async move { inst.run_udp(socket).await });
        }

        Ok(instance)
    }

    /// The service definition this instance targets.
    pub fn service(&self) -> &Service {
        &self.service
    }

    /// Register the callback invoked for each notification matching an
    /// active subscription. Replaces any previously registered callback.
    pub async fn set_event_callback<F>(&self, callback: F)
    where
        F: Fn(MethodId, Bytes) + Send + Sync + 'static,
    {
        *self.event_callback.lock().await = Some(Arc::new(callback));
    }

    /// True once an offer for the target service/instance has been observed
    /// and has not yet expired.
    pub async fn is_available(&self) -> bool {
        self.offered
            .contains(&(self.service.service_id, self.config.instance_id))
            .await
    }

    /// Record a desired eventgroup subscription. The Subscribe packet itself
    /// is sent the next time a matching OfferService is observed; if none
    /// ever arrives, the client stays unsubscribed.
    pub async fn subscribe_eventgroup(&self, eventgroup_id: EventgroupId, ttl_secs: u32) {
        self.subscriptions.lock().await.insert(
            eventgroup_id,
            SubscriptionState {
                ttl_secs,
                expect_ack: true,
                active: false,
            },
        );
    }

    /// Withdraw a subscription (active or still pending an ack), sending a
    /// StopSubscribeEventgroup to the last known offering endpoint.
    pub async fn stop_subscribe_eventgroup(&self, eventgroup_id: EventgroupId) -> Result<()> {
        let existed = self.subscriptions.lock().await.remove(&eventgroup_id).is_some();
        if !existed {
            return Ok(());
        }

        let Some(endpoint) = self.last_endpoint.lock().await.clone() else {
            return Ok(());
        };
        let SocketAddr::V4(dest) = endpoint.address else {
            return Ok(());
        };

        let (session_id, reboot) = self.discovery.next_unicast_session().await;
        let local = Endpoint::new(self.config.local_endpoint, self.config.protocol);
        let mut sd = SdMessage::stop_subscribe_eventgroup(
            self.service.service_id,
            self.config.instance_id,
            self.service.major_version,
            eventgroup_id,
            local,
        );
        sd.flags.reboot = reboot;
        let mut msg = sd.to_someip_message();
        msg.header.session_id = session_id;
        self.discovery.send_unicast(&msg, *dest.ip()).await
    }

    /// Call a method on the most recently observed offer, waiting for a
    /// correlated response up to `config.timeout`.
    pub async fn call_method(
        self: &Arc<Self>,
        method_id: MethodId,
        payload: impl Into<Bytes>,
        config: &CallConfig,
    ) -> Result<MethodResult> {
        let key = (self.service.service_id, self.config.instance_id);
        let offered = self
            .offered
            .items()
            .await
            .into_iter()
            .find(|item| item.key() == key)
            .ok_or(SomeIpError::NotAvailable {
                service_id: self.service.service_id.0,
                instance_id: self.config.instance_id.0,
            })?
            .0;

        let session_id = self.call_session.lock().await.update().0;
        let request = SomeIpMessage::request(self.service.service_id, method_id)
            .client_id(self.config.client_id)
            .session_id(session_id)
            .payload(payload.into())
            .build();

        let (tx, rx) = oneshot::channel();
        let pending_key = (self.config.client_id, session_id);
        self.pending_calls.lock().await.insert(pending_key, tx);

        if let Err(e) = self.send_request(offered.endpoint, &request).await {
            self.pending_calls.lock().await.remove(&pending_key);
            return Err(e);
        }

        match tokio::time::timeout(config.timeout, rx).await {
            Ok(Ok(response)) => Ok(MethodResult {
                message_type: response.header.message_type,
                return_code: response.header.return_code,
                payload: response.payload,
            }),
            _ => {
                self.pending_calls.lock().await.remove(&pending_key);
                Ok(MethodResult {
                    message_type: MessageType::Response,
                    return_code: ReturnCode::Timeout,
                    payload: Bytes::new(),
                })
            }
        }
    }

    async fn send_request(self: &Arc<Self>, endpoint: Endpoint, msg: &SomeIpMessage) -> Result<()> {
        match &self.transport {
            ClientTransport::Udp(socket) => {
                socket.send_to(&msg.to_bytes(), endpoint.address).await.map_err(SomeIpError::io)?;
                Ok(())
            }
            ClientTransport::Tcp { writer, .. } => {
                self.ensure_tcp_connection(endpoint.address).await?;
                let mut guard = writer.lock().await;
                let w = guard.as_mut().ok_or(SomeIpError::ConnectionClosed)?;
                write_message_async(w, msg).await?;
                w.flush().await.map_err(SomeIpError::io)?;
                Ok(())
            }
        }
    }

    async fn ensure_tcp_connection(self: &Arc<Self>, addr: SocketAddr) -> Result<()> {
        let ClientTransport::Tcp { writer, peer } = &self.transport else {
            return Ok(());
        };

        if *peer.lock().await == Some(addr) {
            return Ok(());
        }

        let stream = TcpStream::connect(addr).await.map_err(SomeIpError::io)?;
        let (read_half, write_half): (OwnedReadHalf, OwnedWriteHalf) = stream.into_split();
        *writer.lock().await = Some(BufWriter::new(write_half));
        *peer.lock().await = Some(addr);

        let inst = self.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            loop {
                match read_message_async(&mut reader).await {
                    Ok(message) => inst.handle_incoming(message).await,
                    Err(_) => break,
                }
            }
            if let ClientTransport::Tcp { writer, peer } = &inst.transport {
                *writer.lock().await = None;
                *peer.lock().await = None;
            }
        });

        Ok(())
    }

    async fn run_udp(self: Arc<Self>, socket: Arc<UdpSocket>) {
        let mut reassembler = Reassembler::datagram();
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, src)) => match reassembler.feed(&buf[..len]) {
                    Ok(messages) => {
                        for message in messages {
                            let inst = self.clone();
                            tokio::spawn(async move { inst.handle_incoming(message).await });
                        }
                    }
                    Err(e) => warn!(error = %e, %src, "dropping malformed datagram"),
                },
                Err(e) => {
                    warn!(error = %e, "client UDP socket failed, stopping receive loop");
                    break;
                }
            }
        }
    }

    async fn handle_incoming(&self, msg: SomeIpMessage) {
        match msg.header.message_type {
            MessageType::Response | MessageType::Error => {
                let key = (msg.header.client_id, msg.header.session_id);
                if let Some(tx) = self.pending_calls.lock().await.remove(&key) {
                    let _ = tx.send(msg);
                }
            }
            MessageType::Notification => self.dispatch_event(msg).await,
            other => debug!(message_type = ?other, "client instance ignoring unexpected message type"),
        }
    }

    async fn dispatch_event(&self, msg: SomeIpMessage) {
        if msg.header.service_id != self.service.service_id {
            return;
        }
        let method_id = msg.header.method_id;

        let subscribed = {
            let subs = self.subscriptions.lock().await;
            self.service
                .eventgroups()
                .any(|eg| eg.event_ids.contains(&method_id) && subs.get(&eg.id).is_some_and(|s| s.active))
        };
        if !subscribed {
            return;
        }

        let callback = self.event_callback.lock().await.clone();
        if let Some(callback) = callback {
            callback(method_id, msg.payload);
        }
    }

    async fn handle_offer(&self, offered: &OfferedService) {
        if offered.service_id != self.service.service_id || offered.instance_id != self.config.instance_id {
            return;
        }

        self.offered
            .add(OfferedServiceItem(offered.clone()), Duration::from_secs(offered.ttl as u64), |_| {})
            .await;
        *self.last_endpoint.lock().await = Some(offered.endpoint.clone());

        let SocketAddr::V4(dest) = offered.endpoint.address else {
            return;
        };

        let pending: Vec<(EventgroupId, u32)> = {
            let subs = self.subscriptions.lock().await;
            subs.iter()
                .filter(|(_, s)| s.expect_ack)
                .map(|(id, s)| (*id, s.ttl_secs))
                .collect()
        };

        for (eventgroup_id, ttl_secs) in pending {
            let (session_id, reboot) = self.discovery.next_unicast_session().await;
            let endpoint = Endpoint::new(self.config.local_endpoint, self.config.protocol);
            let mut sd = SdMessage::subscribe_eventgroup(
                self.service.service_id,
                self.config.instance_id,
                self.service.major_version,
                eventgroup_id,
                ttl_secs,
                endpoint,
            );
            sd.flags.reboot = reboot;
            let mut msg = sd.to_someip_message();
            msg.header.session_id = session_id;
            if let Err(e) = self.discovery.send_unicast(&msg, *dest.ip()).await {
                warn!(error = %e, "failed to send SubscribeEventgroup");
            }
        }
    }

    async fn handle_subscribe_ack(&self, entry: &EventgroupEntry) {
        if entry.service_id != self.service.service_id || entry.instance_id != self.config.instance_id {
            return;
        }
        let mut subs = self.subscriptions.lock().await;
        if let Some(state) = subs.get_mut(&entry.eventgroup_id) {
            if !state.expect_ack {
                return;
            }
            state.expect_ack = false;
            state.active = entry.ttl != 0;
        }
    }
}

impl ServiceDiscoveryObserver for ClientServiceInstance {
    fn on_offer<'a>(&'a self, offered: &'a OfferedService) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move { self.handle_offer(offered).await })
    }

    fn on_subscribe_ack<'a>(&'a self, entry: &'a EventgroupEntry) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move { self.handle_subscribe_ack(entry).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DiscoveryConfig;
    use crate::header::ServiceId;
    use crate::service::MethodOutcome;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    async fn test_discovery() -> Arc<ServiceDiscovery> {
        ServiceDiscovery::new(DiscoveryConfig {
            interface: Ipv4Addr::LOCALHOST,
            multicast_addr: crate::sd::SD_MULTICAST_ADDR,
            port: 0,
        })
        .await
        .unwrap()
    }

    fn test_service() -> Service {
        Service::builder(ServiceId(0x1234))
            .method(MethodId(0x0001), |payload| MethodOutcome::ok(payload))
            .eventgroup(EventgroupId(0x0010), [MethodId(0x8001)])
            .build()
    }

    async fn test_instance() -> Arc<ClientServiceInstance> {
        let config = ClientInstanceConfig {
            local_endpoint: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        ClientServiceInstance::new(test_service(), config, test_discovery().await)
            .await
            .unwrap()
    }

    fn offer_for(instance: &ClientServiceInstance, endpoint: SocketAddr) -> OfferedService {
        OfferedService {
            service_id: instance.service.service_id,
            instance_id: instance.config.instance_id,
            major_version: instance.service.major_version,
            minor_version: instance.service.minor_version,
            endpoint: Endpoint::udp(endpoint),
            ttl: 5,
        }
    }

    #[tokio::test]
    async fn call_method_without_offer_is_not_available() {
        let instance = test_instance().await;
        let err = instance
            .call_method(MethodId(0x0001), b"ping".as_slice(), &CallConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SomeIpError::NotAvailable { .. }));
    }

    #[tokio::test]
    async fn call_method_times_out_against_an_unresponsive_peer() {
        let instance = test_instance().await;
        let dead_end = UdpSocket::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let offered = offer_for(&instance, dead_end);
        instance
            .offered
            .add(OfferedServiceItem(offered), Duration::from_secs(5), |_| {})
            .await;

        let result = instance
            .call_method(
                MethodId(0x0001),
                b"ping".as_slice(),
                &CallConfig {
                    timeout: Duration::from_millis(30),
                },
            )
            .await
            .unwrap();

        assert_eq!(result.return_code, ReturnCode::Timeout);
    }

    #[tokio::test]
    async fn subscribe_ack_activates_and_event_reaches_callback() {
        let instance = test_instance().await;
        let server_addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();

        let received: Arc<StdMutex<Option<Bytes>>> = Arc::new(StdMutex::new(None));
        let received_clone = received.clone();
        instance
            .set_event_callback(move |_event_id, payload| {
                *received_clone.lock().unwrap() = Some(payload);
            })
            .await;

        instance.subscribe_eventgroup(EventgroupId(0x0010), 5).await;
        instance.handle_offer(&offer_for(&instance, server_addr)).await;

        let ack = EventgroupEntry::subscribe_ack(
            instance.service.service_id,
            instance.config.instance_id,
            instance.service.major_version,
            EventgroupId(0x0010),
            5,
            0,
        );
        instance.handle_subscribe_ack(&ack).await;

        let notification = SomeIpMessage::notification(instance.service.service_id, MethodId(0x8001))
            .payload(b"tick".as_slice())
            .build();
        instance.handle_incoming(notification).await;

        assert_eq!(received.lock().unwrap().as_deref(), Some(b"tick".as_slice()));
    }

    #[tokio::test]
    async fn unsubscribed_event_is_dropped() {
        let instance = test_instance().await;
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        instance
            .set_event_callback(move |_, _| fired_clone.store(true, Ordering::SeqCst))
            .await;

        let notification = SomeIpMessage::notification(instance.service.service_id, MethodId(0x8001))
            .payload(b"tick".as_slice())
            .build();
        instance.handle_incoming(notification).await;

        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn subscribe_nack_is_recorded_without_activating() {
        let instance = test_instance().await;
        instance.subscribe_eventgroup(EventgroupId(0x0010), 5).await;

        let nack = EventgroupEntry::subscribe_nack(
            instance.service.service_id,
            instance.config.instance_id,
            instance.service.major_version,
            EventgroupId(0x0010),
            0,
        );
        instance.handle_subscribe_ack(&nack).await;

        let subs = instance.subscriptions.lock().await;
        let state = subs.get(&EventgroupId(0x0010)).unwrap();
        assert!(!state.active);
        assert!(!state.expect_ack);
    }

    #[tokio::test]
    async fn is_available_reflects_current_offer() {
        let instance = test_instance().await;
        assert!(!instance.is_available().await);
        instance.handle_offer(&offer_for(&instance, "127.0.0.1:40001".parse().unwrap())).await;
        assert!(instance.is_available().await);
    }
}
