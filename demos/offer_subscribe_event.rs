//! SOME/IP-SD offer/subscribe/event example.
//!
//! Runs a server and client in the same process: the server offers a
//! service with an eventgroup, the client discovers the offer, subscribes,
//! and receives the events the server publishes on a timer.
//!
//! The two sides use separate [`ServiceDiscovery`] engines bound to distinct
//! loopback addresses (127.0.0.1 and 127.0.0.2) rather than sharing one:
//! self-echo suppression drops any SD datagram whose source matches the
//! engine's own configured interface, so a single shared engine would never
//! see its own offers reflected back to itself.
//!
//! Run with: cargo run --example offer_subscribe_event

use std::net::Ipv4Addr;
use std::time::Duration;

use someip_rs::sd::{EventgroupId, TransportProtocol};
use someip_rs::{
    ClientId, ClientInstanceConfig, ClientServiceInstance, DiscoveryConfig, InstanceConfig, MethodId,
    ServerServiceInstance, ServiceBuilder, ServiceDiscovery, ServiceId,
};

const SERVICE_ID: u16 = 0x5678;
const EVENTGROUP_ID: u16 = 0x0010;
const EVENT_ID: u16 = 0x8001;
const SERVER_ADDR: &str = "127.0.0.1:30492";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    println!("SOME/IP-SD offer/subscribe/event example");
    println!("=========================================\n");

    let server_discovery = ServiceDiscovery::new(DiscoveryConfig {
        interface: Ipv4Addr::new(127, 0, 0, 1),
        ..Default::default()
    })
    .await?;
    tokio::spawn(server_discovery.clone().run());

    let client_discovery = ServiceDiscovery::new(DiscoveryConfig {
        interface: Ipv4Addr::new(127, 0, 0, 2),
        ..Default::default()
    })
    .await?;
    tokio::spawn(client_discovery.clone().run());

    let server_service = ServiceBuilder::new(ServiceId(SERVICE_ID))
        .eventgroup(EventgroupId(EVENTGROUP_ID), [MethodId(EVENT_ID)])
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

    let client_service = ServiceBuilder::new(ServiceId(SERVICE_ID))
        .eventgroup(EventgroupId(EVENTGROUP_ID), [MethodId(EVENT_ID)])
        .build();
    let client_config = ClientInstanceConfig {
        local_endpoint: "127.0.0.2:0".parse()?,
        protocol: TransportProtocol::Udp,
        client_id: ClientId(0x0400),
        ..Default::default()
    };
    let client = ClientServiceInstance::new(client_service, client_config, client_discovery).await?;
    client
        .set_event_callback(|event_id, payload| {
            println!(
                "Received event 0x{:04X}: {:?}",
                event_id.0,
                String::from_utf8_lossy(&payload)
            );
        })
        .await;
    client.subscribe_eventgroup(EventgroupId(EVENTGROUP_ID), 10).await;

    println!("Waiting to discover the offer and subscribe...");
    while !client.is_available().await {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    println!("Offer discovered, subscription sent.\n");

    let mut tick: u32 = 0;
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        tick += 1;
        server
            .send_event(EventgroupId(EVENTGROUP_ID), MethodId(EVENT_ID), format!("tick {tick}").into_bytes())
            .await?;
        if tick >= 5 {
            break;
        }
    }

    client.stop_subscribe_eventgroup(EventgroupId(EVENTGROUP_ID)).await?;
    server.stop_offer().await?;
    println!("\nDone!");
    Ok(())
}
