//! Server-side service instance: offers a [`Service`] over the network,
//! accepts subscriptions, dispatches method calls, and publishes events.
//!
//! One instance owns exactly one transport (UDP socket or TCP listener) and
//! one cyclic offer timer. It attaches itself to a [`ServiceDiscovery`]
//! engine as an observer and reacts only to `on_subscribe`; offers and
//! stop-offers are driven by this instance, not received.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::discovery::{ServiceDiscovery, ServiceDiscoveryObserver};
use crate::error::{Result, SomeIpError};
use crate::header::{ClientId, MethodId, SessionId};
use crate::message::SomeIpMessage;
use crate::reassembler::Reassembler;
use crate::sd::{Endpoint, EventgroupEntry, InstanceId, SdMessage, TransportProtocol};
use crate::service::Service;
use crate::session::SessionHandler;
use crate::subscribers::SubscriberRegistry;
use crate::transport_async::AsyncTcpServer;
use crate::types::{MessageType, ReturnCode};

const MAX_DATAGRAM: usize = 1400;

/// Settings for one [`ServerServiceInstance`].
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    /// Instance id advertised in SD offers and matched against subscriptions.
    pub instance_id: InstanceId,
    /// Local address the instance's transport binds to and advertises.
    pub endpoint: SocketAddr,
    /// Transport this instance serves requests and events on.
    pub protocol: TransportProtocol,
    /// ttl (seconds) carried in OfferService entries.
    pub ttl_secs: u32,
    /// Delay between cyclic OfferService announcements.
    pub cyclic_offer_delay: Duration,
    /// Session id used for outgoing events. `None` advances a dedicated
    /// counter instead of holding it fixed.
    pub static_event_session_id: Option<SessionId>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            instance_id: InstanceId(0x0001),
            endpoint: "127.0.0.1:0".parse().unwrap(),
            protocol: TransportProtocol::Udp,
            ttl_secs: 3,
            cyclic_offer_delay: Duration::from_secs(2),
            static_event_session_id: Some(SessionId(1)),
        }
    }
}

enum ServerTransport {
    Udp(Arc<UdpSocket>),
    Tcp(Arc<AsyncTcpServer>),
}

/// Hosts one [`Service`] on the network: answers method calls, manages
/// eventgroup subscriptions, and offers the service over SOME/IP-SD.
pub struct ServerServiceInstance {
    service: Service,
    config: InstanceConfig,
    discovery: Arc<ServiceDiscovery>,
    transport: ServerTransport,
    subscribers: Mutex<SubscriberRegistry>,
    offer_task: Mutex<Option<(oneshot::Sender<()>, JoinHandle<()>)>>,
    event_session: Mutex<SessionHandler>,
}

impl ServerServiceInstance {
    /// Bind the configured transport, attach to `discovery` as an observer,
    /// and start the receive loop. The offer timer is not started; call
    /// [`ServerServiceInstance::start_offer`] once the instance is ready to
    /// be discovered.
    pub async fn new(
        service: Service,
        config: InstanceConfig,
        discovery: Arc<ServiceDiscovery>,
    ) -> Result<Arc<Self>> {
        let transport = match config.protocol {
            TransportProtocol::Udp => {
                let socket = UdpSocket::bind(config.endpoint).await.map_err(SomeIpError::io)?;
                ServerTransport::Udp(Arc::new(socket))
            }
            TransportProtocol::Tcp => {
                let server = AsyncTcpServer::bind(config.endpoint).await?;
                ServerTransport::Tcp(Arc::new(server))
            }
        };

        let instance = Arc::new(Self {
            service,
            config,
            discovery,
            transport,
            subscribers: Mutex::new(SubscriberRegistry::new()),
            offer_task: Mutex::new(None),
            event_session: Mutex::new(SessionHandler::new()),
        });

        instance
            .discovery
            .attach(Arc::downgrade(&instance) as std::sync::Weak<dyn ServiceDiscoveryObserver>)
            .await;

        match &instance.transport {
            ServerTransport::Udp(socket) => {
                let inst = instance.clone();
                let socket = socket.clone();
                tokio::spawn(async move { inst.run_udp(socket).await });
            }
            ServerTransport::Tcp(server) => {
                let inst = instance.clone();
                let server = server.clone();
                tokio::spawn(async move { inst.run_tcp(server).await });
            }
        }

        Ok(instance)
    }

    /// The service this instance hosts.
    pub fn service(&self) -> &Service {
        &self.service
    }

    /// The configured instance id.
    pub fn instance_id(&self) -> InstanceId {
        self.config.instance_id
    }

    /// Start the cyclic OfferService timer. A no-op if already started.
    pub async fn start_offer(self: &Arc<Self>) {
        let mut guard = self.offer_task.lock().await;
        if guard.is_some() {
            return;
        }
        let (tx, rx) = oneshot::channel();
        let inst = self.clone();
        let handle = tokio::spawn(async move { inst.offer_loop(rx).await });
        *guard = Some((tx, handle));
    }

    /// Stop the cyclic timer, letting any in-flight tick finish, then send
    /// one StopOffer so peers drop this instance promptly instead of waiting
    /// out the last offer's ttl.
    pub async fn stop_offer(&self) -> Result<()> {
        let task = self.offer_task.lock().await.take();
        if let Some((tx, handle)) = task {
            let _ = tx.send(());
            let _ = handle.await;
        }
        self.send_stop_offer().await
    }

    async fn offer_loop(self: Arc<Self>, mut stop: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.cyclic_offer_delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.send_offer().await {
                        warn!(error = %e, "failed to send periodic OfferService");
                    }
                }
                _ = &mut stop => break,
            }
        }
    }

    async fn send_offer(&self) -> Result<()> {
        let (session_id, reboot) = self.discovery.next_multicast_session().await;
        let mut sd = SdMessage::offer_service(
            self.service.service_id,
            self.config.instance_id,
            self.service.major_version,
            self.service.minor_version,
            self.config.ttl_secs,
            Endpoint::new(self.config.endpoint, self.config.protocol),
        );
        sd.flags.reboot = reboot;
        sd.flags.unicast = true;
        let mut msg = sd.to_someip_message();
        msg.header.session_id = session_id;
        self.discovery.send_multicast(&msg).await
    }

    async fn send_stop_offer(&self) -> Result<()> {
        let (session_id, reboot) = self.discovery.next_multicast_session().await;
        let mut sd = SdMessage::stop_offer_service(
            self.service.service_id,
            self.config.instance_id,
            self.service.major_version,
            self.service.minor_version,
        );
        sd.flags.reboot = reboot;
        let mut msg = sd.to_someip_message();
        msg.header.session_id = session_id;
        self.discovery.send_multicast(&msg).await
    }

    /// Publish an event to every endpoint currently subscribed to
    /// `eventgroup_id`. A no-op (not an error) if nobody is subscribed.
    pub async fn send_event(
        &self,
        eventgroup_id: crate::sd::EventgroupId,
        event_id: MethodId,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        let payload = payload.into();
        let endpoints = {
            let mut subs = self.subscribers.lock().await;
            subs.endpoints_for(eventgroup_id)
        };
        if endpoints.is_empty() {
            return Ok(());
        }

        let session_id = match self.config.static_event_session_id {
            Some(id) => id,
            None => self.event_session.lock().await.update().0,
        };

        let msg = crate::message::SomeIpMessage::notification(self.service.service_id, event_id)
            .client_id(ClientId(0))
            .session_id(session_id)
            .payload(payload)
            .build();

        for addr in endpoints {
            if let Err(e) = self.send_to(addr, &msg).await {
                warn!(error = %e, %addr, "failed to deliver event to subscriber");
            }
        }
        Ok(())
    }

    async fn send_to(&self, addr: SocketAddr, msg: &SomeIpMessage) -> Result<()> {
        match &self.transport {
            ServerTransport::Udp(socket) => {
                socket.send_to(&msg.to_bytes(), addr).await.map_err(SomeIpError::io)?;
                Ok(())
            }
            ServerTransport::Tcp(server) => server.client_manager().send(&addr, msg).await,
        }
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
                            tokio::spawn(async move { inst.handle_incoming(message, src).await });
                        }
                    }
                    Err(e) => warn!(error = %e, %src, "dropping malformed datagram"),
                },
                Err(e) => {
                    warn!(error = %e, "server UDP socket failed, stopping receive loop");
                    break;
                }
            }
        }
    }

    async fn run_tcp(self: Arc<Self>, server: Arc<AsyncTcpServer>) {
        loop {
            let inst = self.clone();
            let accepted = server
                .accept_into_manager(move |message, addr| {
                    let inst = inst.clone();
                    tokio::spawn(async move { inst.handle_incoming(message, addr).await });
                })
                .await;
            if let Err(e) = accepted {
                warn!(error = %e, "TCP accept failed, stopping receive loop");
                break;
            }
        }
    }

    async fn handle_incoming(&self, msg: SomeIpMessage, src: SocketAddr) {
        match msg.header.message_type {
            MessageType::Request => {
                let reply = self.dispatch_method(&msg);
                if let Err(e) = self.send_to(src, &reply).await {
                    warn!(error = %e, %src, "failed to send method reply");
                }
            }
            MessageType::RequestNoReturn => {
                let _ = self.dispatch_method(&msg);
            }
            other => {
                debug!(message_type = ?other, %src, "server instance ignoring non-request message");
            }
        }
    }

    fn dispatch_method(&self, msg: &SomeIpMessage) -> SomeIpMessage {
        if msg.header.service_id != self.service.service_id {
            return msg.create_response().return_code(ReturnCode::UnknownService).build();
        }
        match self.service.method_handler(msg.header.method_id) {
            Some(handler) => match handler(msg.payload.clone()) {
                crate::service::MethodOutcome::Success(payload) => {
                    msg.create_response().payload(payload).build()
                }
                crate::service::MethodOutcome::Error(payload, code) => {
                    msg.create_error_response(code).payload(payload).build()
                }
            },
            None => msg.create_response().return_code(ReturnCode::UnknownMethod).build(),
        }
    }

    async fn handle_subscribe(&self, entry: &EventgroupEntry, endpoint: &Endpoint) {
        if entry.service_id != self.service.service_id || entry.instance_id != self.config.instance_id {
            return;
        }

        if !self.service.has_eventgroup(entry.eventgroup_id) {
            return;
        }

        if endpoint.protocol != self.config.protocol {
            warn!(
                requested = ?endpoint.protocol,
                configured = ?self.config.protocol,
                "subscribe requested a transport this instance does not serve"
            );
            return;
        }

        let (session_id, reboot) = self.discovery.next_unicast_session().await;
        let dest_ip = match endpoint.address {
            SocketAddr::V4(addr) => *addr.ip(),
            SocketAddr::V6(_) => {
                warn!("ignoring subscribe with an IPv6 endpoint, unsupported");
                return;
            }
        };

        let mut sd = SdMessage::subscribe_eventgroup_ack(
            self.service.service_id,
            self.config.instance_id,
            self.service.major_version,
            entry.eventgroup_id,
            entry.ttl,
            entry.counter,
            None,
        );
        sd.flags.reboot = reboot;
        let mut ack = sd.to_someip_message();
        ack.header.session_id = session_id;

        if let Err(e) = self.discovery.send_unicast(&ack, dest_ip).await {
            warn!(error = %e, "failed to send SubscribeEventgroupAck");
            return;
        }

        // Only register the subscriber once the ack is on the wire, so no
        // event can reach it ahead of the ack.
        self.subscribers
            .lock()
            .await
            .add(entry.eventgroup_id, endpoint.address, entry.ttl);
    }

    async fn handle_unsubscribe(&self, entry: &EventgroupEntry, endpoint: &Endpoint) {
        if entry.service_id != self.service.service_id || entry.instance_id != self.config.instance_id {
            return;
        }
        self.subscribers
            .lock()
            .await
            .remove(entry.eventgroup_id, endpoint.address);
    }
}

impl ServiceDiscoveryObserver for ServerServiceInstance {
    fn on_subscribe<'a>(
        &'a self,
        entry: &'a EventgroupEntry,
        endpoint: &'a Endpoint,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move { self.handle_subscribe(entry, endpoint).await })
    }

    fn on_unsubscribe<'a>(
        &'a self,
        entry: &'a EventgroupEntry,
        endpoint: &'a Endpoint,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move { self.handle_unsubscribe(entry, endpoint).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DiscoveryConfig;
    use crate::header::ServiceId;
    use crate::sd::EventgroupId;
    use crate::service::MethodOutcome;
    use std::net::Ipv4Addr;

    async fn test_discovery() -> Arc<ServiceDiscovery> {
        ServiceDiscovery::new(DiscoveryConfig {
            interface: Ipv4Addr::LOCALHOST,
            multicast_addr: crate::sd::SD_MULTICAST_ADDR,
            port: 0,
        })
        .await
        .unwrap()
    }

    async fn test_instance() -> Arc<ServerServiceInstance> {
        let service = Service::builder(ServiceId(0x1234))
            .method(MethodId(0x0001), |payload| MethodOutcome::ok(payload))
            .eventgroup(EventgroupId(0x0010), [MethodId(0x8001)])
            .build();
        let config = InstanceConfig {
            endpoint: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        ServerServiceInstance::new(service, config, test_discovery().await)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn dispatch_method_echoes_payload() {
        let instance = test_instance().await;
        let request = SomeIpMessage::request(ServiceId(0x1234), MethodId(0x0001))
            .payload(b"ping".as_slice())
            .build();
        let response = instance.dispatch_method(&request);
        assert_eq!(response.header.message_type, MessageType::Response);
        assert_eq!(response.payload.as_ref(), b"ping");
    }

    #[tokio::test]
    async fn dispatch_method_unknown_service() {
        let instance = test_instance().await;
        let request = SomeIpMessage::request(ServiceId(0x9999), MethodId(0x0001)).build();
        let response = instance.dispatch_method(&request);
        assert_eq!(response.header.message_type, MessageType::Response);
        assert_eq!(response.header.return_code, ReturnCode::UnknownService);
    }

    #[tokio::test]
    async fn dispatch_method_unknown_method() {
        let instance = test_instance().await;
        let request = SomeIpMessage::request(ServiceId(0x1234), MethodId(0x0002)).build();
        let response = instance.dispatch_method(&request);
        assert_eq!(response.header.message_type, MessageType::Response);
        assert_eq!(response.header.return_code, ReturnCode::UnknownMethod);
    }

    #[tokio::test]
    async fn send_event_without_subscribers_is_a_noop() {
        let instance = test_instance().await;
        instance
            .send_event(EventgroupId(0x0010), MethodId(0x8001), b"tick".as_slice())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn start_then_stop_offer_completes_cleanly() {
        let instance = test_instance().await;
        instance.start_offer().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        instance.stop_offer().await.unwrap();
    }

    #[tokio::test]
    async fn unsubscribe_removes_subscriber_immediately() {
        let instance = test_instance().await;
        let endpoint = Endpoint::new("127.0.0.1:40000".parse().unwrap(), TransportProtocol::Udp);
        instance
            .subscribers
            .lock()
            .await
            .add(EventgroupId(0x0010), endpoint.address, 0xFFFFFF);
        assert_eq!(
            instance.subscribers.lock().await.endpoints_for(EventgroupId(0x0010)).len(),
            1
        );

        let entry = EventgroupEntry::unsubscribe(
            ServiceId(0x1234),
            instance.config.instance_id,
            instance.service.major_version,
            EventgroupId(0x0010),
        );
        instance.handle_unsubscribe(&entry, &endpoint).await;

        assert!(instance
            .subscribers
            .lock()
            .await
            .endpoints_for(EventgroupId(0x0010))
            .is_empty());
    }
}
