//! Asynchronous SOME/IP protocol implementation built on tokio.
//!
//! This crate provides a tokio-based implementation of the SOME/IP
//! (Scalable service-Oriented MiddlewarE over IP) protocol, commonly
//! used in automotive applications, together with SOME/IP-SD (Service
//! Discovery).
//!
//! # Features
//!
//! - Complete SOME/IP message header support
//! - TCP (stream) and UDP (datagram) transports with stateful reassembly
//! - Type-safe service, method, client, and session IDs
//! - Request/response pattern support with per-call timeouts
//! - Fire-and-forget (notification) messages and eventgroup pub/sub
//! - SOME/IP-SD for dynamic service discovery, offer/subscribe lifecycles
//!
//! # Example
//!
//! ```no_run
//! use someip_rs::{SomeIpMessage, ServiceId, MethodId, ClientId, SessionId};
//!
//! // Create a request message
//! let request = SomeIpMessage::request(ServiceId(0x1234), MethodId(0x0001))
//!     .client_id(ClientId(0x0100))
//!     .payload(b"hello".as_slice())
//!     .build();
//! ```
//!
//! # Protocol Overview
//!
//! SOME/IP messages consist of a 16-byte header followed by an optional payload:
//!
//! ```text
//! +--------+--------+--------+--------+
//! |    Service ID   |   Method ID     |  (4 bytes)
//! +--------+--------+--------+--------+
//! |           Length                  |  (4 bytes)
//! +--------+--------+--------+--------+
//! |    Client ID    |   Session ID    |  (4 bytes)
//! +--------+--------+--------+--------+
//! |Proto|Iface|MsgType|RetCode|        (4 bytes)
//! +--------+--------+--------+--------+
//! |           Payload ...             |  (variable)
//! +--------+--------+--------+--------+
//! ```

pub mod client_instance;
pub mod codec_async;
pub mod discovery;
pub mod error;
pub mod header;
pub mod message;
pub mod reassembler;
pub mod sd;
pub mod server_instance;
pub mod service;
pub mod session;
pub mod subscribers;
pub mod transport_async;
pub mod ttl_store;
pub mod types;

// Re-export commonly used types at the crate root
pub use client_instance::{CallConfig, ClientInstanceConfig, ClientServiceInstance, MethodResult};
pub use discovery::{DiscoveryConfig, ServiceDiscovery, ServiceDiscoveryObserver};
pub use error::{Result, SomeIpError};
pub use header::{ClientId, MethodId, ServiceId, SessionId, SomeIpHeader, HEADER_SIZE};
pub use message::{MessageBuilder, SomeIpMessage};
pub use server_instance::{InstanceConfig, ServerServiceInstance};
pub use service::{EventGroup, MethodHandler, MethodOutcome, Service, ServiceBuilder};
pub use types::{MessageType, ReturnCode, PROTOCOL_VERSION};
