//! Request/response example over a discovered offer.
//!
//! Runs a server and client in the same process: the client waits for the
//! server's offer to be discovered via SOME/IP-SD, then calls a known
//! method (echo) and an unknown one to show the `E_UNKNOWN_METHOD` reply.
//!
//! As in `offer_subscribe_event`, the two sides use separate
//! [`ServiceDiscovery`] engines on distinct loopback addresses so that
//! self-echo suppression doesn't drop the server's own offers.
//!
//! Run with: cargo run --example request_response

use std::net::Ipv4Addr;
use std::time::Duration;

use someip_rs::sd::TransportProtocol;
use someip_rs::{
    CallConfig, ClientId, ClientInstanceConfig, ClientServiceInstance, DiscoveryConfig, InstanceConfig, MethodId,
    MethodOutcome, ServerServiceInstance, ServiceBuilder, ServiceDiscovery, ServiceId,
};

const SERVICE_ID: u16 = 0x1234;
const METHOD_ECHO: u16 = 0x0123;
const METHOD_UNKNOWN: u16 = 0x0999;
const SERVER_ADDR: &str = "127.0.0.1:30493";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    println!("SOME/IP request/response example");
    println!("=================================\n");

    let server_discovery = ServiceDiscovery::new(DiscoveryConfig {
        interface: Ipv4Addr::new(127, 0, 0, 1),
        ..Default::default()
    })
    .await?;
    tokio::spawn(server_discovery.clone().run());

    let client_discovery = ServiceDiscovery::new(DiscoveryConfig {
        interface: Ipv4Addr::new(127, 0, 0, 3),
        ..Default::default()
    })
    .await?;
    tokio::spawn(client_discovery.clone().run());

    let server_service = ServiceBuilder::new(ServiceId(SERVICE_ID))
        .method(MethodId(METHOD_ECHO), |payload| MethodOutcome::ok(payload))
        .build();
    let server_config = InstanceConfig {
        endpoint: SERVER_ADDR.parse()?,
        protocol: TransportProtocol::Udp,
        cyclic_offer_delay: Duration::from_millis(500),
        ..Default::default()
    };
    let server = ServerServiceInstance::new(server_service, server_config, server_discovery).await?;
    server.start_offer().await;
    println!("Offering service 0x{SERVICE_ID:04X} on {SERVER_ADDR}");

    let client_service = ServiceBuilder::new(ServiceId(SERVICE_ID)).build();
    let client_config = ClientInstanceConfig {
        local_endpoint: "127.0.0.3:0".parse()?,
        protocol: TransportProtocol::Udp,
        client_id: ClientId(0x0300),
        ..Default::default()
    };
    let client = ClientServiceInstance::new(client_service, client_config, client_discovery).await?;

    println!("Waiting to discover the offer...");
    while !client.is_available().await {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    println!("Offer discovered.\n");

    println!("--- Known method ---");
    let payload = vec![0x00, 0x01, 0x00, 0x02];
    let result = client
        .call_method(MethodId(METHOD_ECHO), payload.clone(), &CallConfig::default())
        .await?;
    println!(
        "call 0x{METHOD_ECHO:04X}({payload:02X?}) -> return_code={:?} payload={:02X?}",
        result.return_code, result.payload
    );

    println!("\n--- Unknown method ---");
    let result = client
        .call_method(MethodId(METHOD_UNKNOWN), Vec::new(), &CallConfig::default())
        .await?;
    println!(
        "call 0x{METHOD_UNKNOWN:04X}([]) -> return_code={:?} payload={:02X?}",
        result.return_code, result.payload
    );

    server.stop_offer().await?;
    println!("\nDone!");
    Ok(())
}
