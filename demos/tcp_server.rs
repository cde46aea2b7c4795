//! TCP echo server example.
//!
//! This example demonstrates a SOME/IP server instance that echoes back
//! any payload it receives, over a TCP transport (exercising the stream
//! reassembler instead of the datagram one).
//!
//! Run with: cargo run --example tcp_server
//! Then connect with: cargo run --example tcp_client

use std::net::Ipv4Addr;
use std::sync::Arc;

use someip_rs::sd::TransportProtocol;
use someip_rs::{
    DiscoveryConfig, InstanceConfig, MethodId, MethodOutcome, ServerServiceInstance, ServiceBuilder,
    ServiceDiscovery, ServiceId,
};

const SERVICE_ID: u16 = 0x1234;
const METHOD_ECHO: u16 = 0x0001;
const BIND_ADDR: &str = "127.0.0.1:30490";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    println!("Starting SOME/IP TCP server on {BIND_ADDR}...");

    let discovery = ServiceDiscovery::new(DiscoveryConfig {
        interface: Ipv4Addr::LOCALHOST,
        ..Default::default()
    })
    .await?;
    tokio::spawn(discovery.clone().run());

    let service = ServiceBuilder::new(ServiceId(SERVICE_ID))
        .method(MethodId(METHOD_ECHO), |payload| MethodOutcome::ok(payload))
        .build();

    let config = InstanceConfig {
        endpoint: BIND_ADDR.parse()?,
        protocol: TransportProtocol::Tcp,
        ..Default::default()
    };
    let _instance: Arc<ServerServiceInstance> = ServerServiceInstance::new(service, config, discovery).await?;

    println!("Server listening on {BIND_ADDR}, waiting for connections...");
    tokio::signal::ctrl_c().await?;
    Ok(())
}
