//! UDP server example.
//!
//! This example demonstrates a SOME/IP server instance handling requests
//! over UDP, without service discovery: peers must already know its address.
//!
//! Run with: cargo run --example udp_server
//! Then connect with: cargo run --example udp_client

use std::net::Ipv4Addr;
use std::sync::Arc;

use someip_rs::sd::{EventgroupId, TransportProtocol};
use someip_rs::{
    DiscoveryConfig, InstanceConfig, MethodId, MethodOutcome, ServerServiceInstance, ServiceBuilder,
    ServiceDiscovery, ServiceId,
};

const SERVICE_ID: u16 = 0x4321;
const METHOD_REVERSE: u16 = 0x0001;
const BIND_ADDR: &str = "127.0.0.1:30491";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    println!("Starting SOME/IP UDP server on {BIND_ADDR}...");

    let discovery = ServiceDiscovery::new(DiscoveryConfig {
        interface: Ipv4Addr::LOCALHOST,
        ..Default::default()
    })
    .await?;
    tokio::spawn(discovery.clone().run());

    let service = ServiceBuilder::new(ServiceId(SERVICE_ID))
        .method(MethodId(METHOD_REVERSE), |payload| {
            let mut reversed = payload.to_vec();
            reversed.reverse();
            MethodOutcome::ok(reversed)
        })
        .eventgroup(EventgroupId(0x0010), [MethodId(0x8001)])
        .build();

    let config = InstanceConfig {
        endpoint: BIND_ADDR.parse()?,
        protocol: TransportProtocol::Udp,
        ..Default::default()
    };
    let _instance: Arc<ServerServiceInstance> = ServerServiceInstance::new(service, config, discovery).await?;

    println!("Server listening on {BIND_ADDR}, waiting for requests...");
    tokio::signal::ctrl_c().await?;
    Ok(())
}
