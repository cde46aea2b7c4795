//! TCP echo client example.
//!
//! This example demonstrates a SOME/IP client instance calling a method
//! over a TCP transport; the connection is established lazily on the first
//! call.
//!
//! Run the server first: cargo run --example tcp_server
//! Then run: cargo run --example tcp_client

use std::net::Ipv4Addr;

use someip_rs::sd::{Endpoint, InstanceId, OfferedService, TransportProtocol};
use someip_rs::{
    CallConfig, ClientId, ClientInstanceConfig, ClientServiceInstance, DiscoveryConfig, MethodId,
    ServiceBuilder, ServiceDiscovery, ServiceDiscoveryObserver, ServiceId,
};

const SERVICE_ID: u16 = 0x1234;
const METHOD_ECHO: u16 = 0x0001;
const SERVER_ADDR: &str = "127.0.0.1:30490";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    println!("Connecting SOME/IP TCP client...");

    let discovery = ServiceDiscovery::new(DiscoveryConfig {
        interface: Ipv4Addr::LOCALHOST,
        ..Default::default()
    })
    .await?;
    tokio::spawn(discovery.clone().run());

    let service = ServiceBuilder::new(ServiceId(SERVICE_ID)).build();
    let config = ClientInstanceConfig {
        local_endpoint: "127.0.0.1:0".parse()?,
        protocol: TransportProtocol::Tcp,
        client_id: ClientId(0x0300),
        ..Default::default()
    };
    let client = ClientServiceInstance::new(service, config, discovery).await?;

    let offered = OfferedService {
        service_id: ServiceId(SERVICE_ID),
        instance_id: InstanceId(0x0001),
        major_version: 1,
        minor_version: 0,
        endpoint: Endpoint::tcp(SERVER_ADDR.parse()?),
        ttl: 3600,
    };
    client.on_offer(&offered).await;

    println!("\n--- Request/Response over TCP ---");
    for word in ["Rust", "SOME/IP", "Automotive"] {
        let result = client
            .call_method(MethodId(METHOD_ECHO), word.as_bytes().to_vec(), &CallConfig::default())
            .await?;
        println!("{} -> {:?}", word, String::from_utf8_lossy(&result.payload));
    }

    Ok(())
}
