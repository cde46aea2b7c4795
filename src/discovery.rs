//! Service Discovery (SD) engine: the multicast/unicast socket pair that
//! sends and receives SOME/IP-SD traffic and fans decoded entries out to
//! attached observers.
//!
//! Server and client service instances are the observers; the engine itself
//! knows nothing about services, methods, or subscriptions beyond the SD
//! wire format.

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::sync::{Arc, Weak};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{trace, warn};

use crate::error::{Result, SomeIpError};
use crate::header::{MethodId, SessionId, ServiceId};
use crate::message::SomeIpMessage;
use crate::sd::{
    EntryType, EventgroupEntry, Endpoint, OfferedService, SdEntry, SdMessage, SD_DEFAULT_PORT,
    SD_METHOD_ID, SD_MULTICAST_ADDR, SD_SERVICE_ID,
};
use crate::session::SessionHandler;
use crate::types::MessageType;

const MAX_SD_DATAGRAM: usize = 1400;

/// Settings for a [`ServiceDiscovery`] engine.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Local interface address the unicast SD socket binds to, and the
    /// address used for self-echo suppression (see [`ServiceDiscovery`]).
    pub interface: Ipv4Addr,
    /// SD multicast group to join and send to.
    pub multicast_addr: Ipv4Addr,
    /// SD port, both sockets bind here (default 30490).
    pub port: u16,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interface: Ipv4Addr::LOCALHOST,
            multicast_addr: SD_MULTICAST_ADDR,
            port: SD_DEFAULT_PORT,
        }
    }
}

type ObserverFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// The narrow capability set the engine invokes on every attached observer.
///
/// Default bodies are no-ops: a server instance only cares about
/// `on_subscribe`, a client instance only about `on_offer` and
/// `on_subscribe_ack`. Handlers are async (returning a boxed future rather
/// than a bare `fn`) because reacting to discovery traffic involves further
/// I/O on the SD engine itself (e.g. sending a Subscribe or an Ack); the
/// dispatcher awaits each handler in turn so subscribe-ack ordering
/// guarantees hold.
pub trait ServiceDiscoveryObserver: Send + Sync {
    /// An OfferService entry (ttl != 0) was received, joined with its
    /// endpoint option.
    fn on_offer<'a>(&'a self, _offered: &'a OfferedService) -> ObserverFuture<'a> {
        Box::pin(async {})
    }

    /// A SubscribeEventgroup entry (ttl != 0, at least one option) was
    /// received.
    fn on_subscribe<'a>(
        &'a self,
        _entry: &'a EventgroupEntry,
        _endpoint: &'a Endpoint,
    ) -> ObserverFuture<'a> {
        Box::pin(async {})
    }

    /// A SubscribeEventgroupAck entry (ttl != 0) was received. A ttl of 0 on
    /// the wire is a Nack and is not dispatched here; see §4.9.
    fn on_subscribe_ack<'a>(&'a self, _entry: &'a EventgroupEntry) -> ObserverFuture<'a> {
        Box::pin(async {})
    }

    /// A StopSubscribeEventgroup entry (ttl == 0, at least one option) was
    /// received: an explicit unsubscribe, as opposed to a ttl expiring
    /// naturally. Supplemental beyond the distilled dispatch policy, which
    /// only routes ttl != 0 Subscribe entries to `on_subscribe`.
    fn on_unsubscribe<'a>(
        &'a self,
        _entry: &'a EventgroupEntry,
        _endpoint: &'a Endpoint,
    ) -> ObserverFuture<'a> {
        Box::pin(async {})
    }
}

/// Owns the two SD sockets (receive-multicast, unicast) and the observer
/// list. Construct with [`ServiceDiscovery::new`], attach observers, then
/// spawn [`ServiceDiscovery::run`] on a fresh task.
pub struct ServiceDiscovery {
    config: DiscoveryConfig,
    multicast_socket: UdpSocket,
    unicast_socket: UdpSocket,
    observers: Mutex<Vec<Weak<dyn ServiceDiscoveryObserver>>>,
    multicast_session: Mutex<SessionHandler>,
    unicast_session: Mutex<SessionHandler>,
}

impl ServiceDiscovery {
    /// Bind both sockets and join the multicast group. Returned as an `Arc`
    /// since observers hold a weak back-reference and the dispatch loop
    /// needs a stable handle to clone into its task.
    pub async fn new(config: DiscoveryConfig) -> Result<Arc<Self>> {
        let multicast_socket = bind_reuseaddr(SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), config.port))?;
        multicast_socket
            .join_multicast_v4(config.multicast_addr, config.interface)
            .map_err(SomeIpError::io)?;

        let unicast_socket = bind_reuseaddr(SocketAddr::new(config.interface.into(), config.port))?;

        Ok(Arc::new(Self {
            config,
            multicast_socket,
            unicast_socket,
            observers: Mutex::new(Vec::new()),
            multicast_session: Mutex::new(SessionHandler::new()),
            unicast_session: Mutex::new(SessionHandler::new()),
        }))
    }

    /// The interface this engine binds to, for building endpoint options.
    pub fn interface(&self) -> Ipv4Addr {
        self.config.interface
    }

    /// The SD port this engine listens and sends on.
    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// Attach an observer, held weakly.
    pub async fn attach(&self, observer: Weak<dyn ServiceDiscoveryObserver>) {
        self.observers.lock().await.push(observer);
    }

    /// Detach a previously attached observer. Also opportunistically prunes
    /// any other entry whose target has since been dropped.
    pub async fn detach(&self, observer: &Weak<dyn ServiceDiscoveryObserver>) {
        let target = observer.upgrade();
        let mut observers = self.observers.lock().await;
        observers.retain(|o| match (o.upgrade(), &target) {
            (Some(a), Some(b)) => !Arc::ptr_eq(&a, b),
            (alive, _) => alive.is_some(),
        });
    }

    /// Mint the next (session_id, reboot_flag) for outgoing multicast SD
    /// traffic.
    pub async fn next_multicast_session(&self) -> (SessionId, bool) {
        self.multicast_session.lock().await.update()
    }

    /// Mint the next (session_id, reboot_flag) for outgoing unicast SD
    /// traffic.
    pub async fn next_unicast_session(&self) -> (SessionId, bool) {
        self.unicast_session.lock().await.update()
    }

    /// Send a pre-built SD message to the multicast group, from the unicast
    /// socket (so the reply source IP is the configured interface, not the
    /// wildcard-bound receive socket).
    pub async fn send_multicast(&self, message: &SomeIpMessage) -> Result<()> {
        let data = message.to_bytes();
        self.unicast_socket
            .send_to(&data, (self.config.multicast_addr, self.config.port))
            .await?;
        Ok(())
    }

    /// Send a pre-built SD message unicast to `dest_ip` on the SD port.
    pub async fn send_unicast(&self, message: &SomeIpMessage, dest_ip: Ipv4Addr) -> Result<()> {
        let data = message.to_bytes();
        self.unicast_socket
            .send_to(&data, (dest_ip, self.config.port))
            .await?;
        Ok(())
    }

    /// Run the receive/dispatch loop. Exits only if a socket errors
    /// unrecoverably; intended to be driven from its own `tokio::spawn`.
    pub async fn run(self: Arc<Self>) {
        let mut mcast_buf = vec![0u8; MAX_SD_DATAGRAM];
        let mut ucast_buf = vec![0u8; MAX_SD_DATAGRAM];
        loop {
            tokio::select! {
                res = self.multicast_socket.recv_from(&mut mcast_buf) => {
                    match res {
                        Ok((len, src)) => self.handle_datagram(&mcast_buf[..len], src).await,
                        Err(e) => {
                            warn!(error = %e, "SD multicast socket failed, stopping discovery engine");
                            break;
                        }
                    }
                }
                res = self.unicast_socket.recv_from(&mut ucast_buf) => {
                    match res {
                        Ok((len, src)) => self.handle_datagram(&ucast_buf[..len], src).await,
                        Err(e) => {
                            warn!(error = %e, "SD unicast socket failed, stopping discovery engine");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn handle_datagram(&self, data: &[u8], src: SocketAddr) {
        // Self-echo suppression by source IP. Weak on hosts with multiple
        // addresses on the same interface, where a reflected packet can
        // carry an IP other than `self.config.interface`; a session-id
        // remembering filter would be more robust but is not required here.
        if src.ip() == std::net::IpAddr::V4(self.config.interface) {
            trace!(%src, "dropping self-echoed SD datagram");
            return;
        }
        if src.port() != self.config.port {
            trace!(%src, "dropping SD datagram from unexpected source port");
            return;
        }

        let message = match SomeIpMessage::from_bytes(data) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, %src, "dropping malformed SD datagram");
                return;
            }
        };

        if message.header.service_id != ServiceId(SD_SERVICE_ID)
            || message.header.method_id != MethodId(SD_METHOD_ID)
            || message.header.message_type != MessageType::Notification
        {
            trace!(%src, "ignoring non-SD packet on SD port");
            return;
        }

        let sd = match SdMessage::from_bytes(&message.payload) {
            Ok(sd) => sd,
            Err(e) => {
                warn!(error = %e, %src, "dropping malformed SD payload");
                return;
            }
        };

        self.dispatch(&sd).await;
    }

    async fn dispatch(&self, sd: &SdMessage) {
        let observers: Vec<Arc<dyn ServiceDiscoveryObserver>> = {
            let guard = self.observers.lock().await;
            guard.iter().filter_map(Weak::upgrade).collect()
        };
        if observers.is_empty() {
            return;
        }

        for entry in &sd.entries {
            match entry {
                SdEntry::Service(service_entry)
                    if service_entry.entry_type == EntryType::OfferService && service_entry.ttl != 0 =>
                {
                    let Some(endpoint) = sd.get_endpoints_for_entry(entry).into_iter().next() else {
                        continue;
                    };
                    let offered = OfferedService {
                        service_id: service_entry.service_id,
                        instance_id: service_entry.instance_id,
                        major_version: service_entry.major_version,
                        minor_version: service_entry.minor_version,
                        endpoint,
                        ttl: service_entry.ttl,
                    };
                    for observer in &observers {
                        observer.on_offer(&offered).await;
                    }
                }
                SdEntry::Eventgroup(eg)
                    if eg.entry_type == EntryType::SubscribeEventgroup && eg.ttl != 0 =>
                {
                    let Some(endpoint) = sd.get_endpoints_for_entry(entry).into_iter().next() else {
                        continue;
                    };
                    for observer in &observers {
                        observer.on_subscribe(eg, &endpoint).await;
                    }
                }
                SdEntry::Eventgroup(eg)
                    if eg.entry_type == EntryType::SubscribeEventgroupAck && eg.ttl != 0 =>
                {
                    for observer in &observers {
                        observer.on_subscribe_ack(eg).await;
                    }
                }
                SdEntry::Eventgroup(eg)
                    if eg.entry_type == EntryType::SubscribeEventgroup && eg.ttl == 0 =>
                {
                    let Some(endpoint) = sd.get_endpoints_for_entry(entry).into_iter().next() else {
                        continue;
                    };
                    for observer in &observers {
                        observer.on_unsubscribe(eg, &endpoint).await;
                    }
                }
                _ => {}
            }
        }
    }
}

fn bind_reuseaddr(addr: SocketAddr) -> Result<UdpSocket> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).map_err(SomeIpError::io)?;
    socket.set_reuse_address(true).map_err(SomeIpError::io)?;
    socket.bind(&addr.into()).map_err(SomeIpError::io)?;
    socket.set_nonblocking(true).map_err(SomeIpError::io)?;
    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(SomeIpError::io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sd::{EventgroupId, InstanceId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingObserver {
        offers: AtomicUsize,
        subscribes: AtomicUsize,
        acks: AtomicUsize,
    }

    impl RecordingObserver {
        fn new() -> Self {
            Self {
                offers: AtomicUsize::new(0),
                subscribes: AtomicUsize::new(0),
                acks: AtomicUsize::new(0),
            }
        }
    }

    impl ServiceDiscoveryObserver for RecordingObserver {
        fn on_offer<'a>(&'a self, _offered: &'a OfferedService) -> ObserverFuture<'a> {
            self.offers.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        }
        fn on_subscribe<'a>(
            &'a self,
            _entry: &'a EventgroupEntry,
            _endpoint: &'a Endpoint,
        ) -> ObserverFuture<'a> {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        }
        fn on_subscribe_ack<'a>(&'a self, _entry: &'a EventgroupEntry) -> ObserverFuture<'a> {
            self.acks.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        }
    }

    fn loopback_config(port: u16) -> DiscoveryConfig {
        DiscoveryConfig {
            interface: Ipv4Addr::LOCALHOST,
            multicast_addr: SD_MULTICAST_ADDR,
            port,
        }
    }

    #[tokio::test]
    async fn dispatch_routes_each_entry_kind_to_observer() {
        let engine = ServiceDiscovery::new(loopback_config(0)).await.unwrap();
        let observer: Arc<RecordingObserver> = Arc::new(RecordingObserver::new());
        engine
            .attach(Arc::downgrade(&observer) as Weak<dyn ServiceDiscoveryObserver>)
            .await;

        let offer = SdMessage::offer_service(
            ServiceId(0x1234),
            InstanceId(0x0001),
            1,
            0,
            5,
            Endpoint::udp("127.0.0.1:3000".parse().unwrap()),
        );
        engine.dispatch(&offer).await;

        let subscribe = SdMessage::subscribe_eventgroup(
            ServiceId(0x1234),
            InstanceId(0x0001),
            1,
            EventgroupId(0x0010),
            5,
            Endpoint::udp("127.0.0.1:3002".parse().unwrap()),
        );
        engine.dispatch(&subscribe).await;

        let ack = SdMessage::subscribe_eventgroup_ack(
            ServiceId(0x1234),
            InstanceId(0x0001),
            1,
            EventgroupId(0x0010),
            5,
            0,
            None,
        );
        engine.dispatch(&ack).await;

        assert_eq!(observer.offers.load(Ordering::SeqCst), 1);
        assert_eq!(observer.subscribes.load(Ordering::SeqCst), 1);
        assert_eq!(observer.acks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_offer_is_not_dispatched_as_offer() {
        let engine = ServiceDiscovery::new(loopback_config(0)).await.unwrap();
        let observer: Arc<RecordingObserver> = Arc::new(RecordingObserver::new());
        engine
            .attach(Arc::downgrade(&observer) as Weak<dyn ServiceDiscoveryObserver>)
            .await;

        let stop_offer =
            SdMessage::stop_offer_service(ServiceId(0x1234), InstanceId(0x0001), 1, 0);
        engine.dispatch(&stop_offer).await;

        assert_eq!(observer.offers.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn detach_removes_observer() {
        let engine = ServiceDiscovery::new(loopback_config(0)).await.unwrap();
        let observer: Arc<RecordingObserver> = Arc::new(RecordingObserver::new());
        let weak = Arc::downgrade(&observer) as Weak<dyn ServiceDiscoveryObserver>;
        engine.attach(weak.clone()).await;
        engine.detach(&weak).await;

        let offer = SdMessage::offer_service(
            ServiceId(0x1234),
            InstanceId(0x0001),
            1,
            0,
            5,
            Endpoint::udp("127.0.0.1:3000".parse().unwrap()),
        );
        engine.dispatch(&offer).await;
        assert_eq!(observer.offers.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn session_handlers_are_independent_per_direction() {
        let engine = ServiceDiscovery::new(loopback_config(0)).await.unwrap();
        let (m1, _) = engine.next_multicast_session().await;
        let (u1, _) = engine.next_unicast_session().await;
        let (m2, _) = engine.next_multicast_session().await;
        assert_eq!(m1, SessionId(1));
        assert_eq!(u1, SessionId(1));
        assert_eq!(m2, SessionId(2));
    }
}
