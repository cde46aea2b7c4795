//! UDP client example.
//!
//! This example demonstrates a SOME/IP client instance calling a method
//! over UDP against a server whose address is already known (no discovery
//! round trip): the offer is injected directly instead of being observed
//! off the wire.
//!
//! Run the server first: cargo run --example udp_server
//! Then run: cargo run --example udp_client

use std::net::Ipv4Addr;

use someip_rs::sd::{Endpoint, InstanceId, OfferedService, TransportProtocol};
use someip_rs::{
    CallConfig, ClientId, ClientInstanceConfig, ClientServiceInstance, DiscoveryConfig, MethodId,
    ServiceBuilder, ServiceDiscovery, ServiceDiscoveryObserver, ServiceId,
};

const SERVICE_ID: u16 = 0x4321;
const METHOD_REVERSE: u16 = 0x0001;
const SERVER_ADDR: &str = "127.0.0.1:30491";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    println!("Creating SOME/IP UDP client...");

    let discovery = ServiceDiscovery::new(DiscoveryConfig {
        interface: Ipv4Addr::LOCALHOST,
        ..Default::default()
    })
    .await?;
    tokio::spawn(discovery.clone().run());

    let service = ServiceBuilder::new(ServiceId(SERVICE_ID)).build();
    let config = ClientInstanceConfig {
        local_endpoint: "127.0.0.1:0".parse()?,
        protocol: TransportProtocol::Udp,
        client_id: ClientId(0x0200),
        ..Default::default()
    };
    let client = ClientServiceInstance::new(service, config, discovery).await?;

    // This demo skips the SD offer/wait step: the server's address is
    // already known, so hand the client a synthetic offer directly.
    let offered = OfferedService {
        service_id: ServiceId(SERVICE_ID),
        instance_id: InstanceId(0x0001),
        major_version: 1,
        minor_version: 0,
        endpoint: Endpoint::udp(SERVER_ADDR.parse()?),
        ttl: 3600,
    };
    client.on_offer(&offered).await;

    println!("\n--- Request/Response ---");
    for word in ["Rust", "SOME/IP", "Automotive"] {
        let result = client
            .call_method(MethodId(METHOD_REVERSE), word.as_bytes().to_vec(), &CallConfig::default())
            .await?;
        println!("{} -> {:?}", word, String::from_utf8_lossy(&result.payload));
    }

    Ok(())
}
