//! SOME/IP Service Discovery (SD) implementation.
//!
//! This module provides types and utilities for SOME/IP-SD, which enables
//! dynamic service discovery and event subscription in automotive networks.
//!
//! # Overview
//!
//! SOME/IP-SD uses special SOME/IP messages (Service ID 0xFFFF, Method ID 0x8100)
//! to discover services and manage event subscriptions. It typically runs over
//! UDP multicast (224.224.224.245:30490).
//!
//! The SD wire types here are pure codec; the stateful engine that owns the
//! sockets and dispatches to observers lives in [`crate::discovery`].

mod entry;
mod message;
mod option;
mod server;
mod types;

pub use entry::{EventgroupEntry, SdEntry, ServiceEntry};
pub use message::{SdFlags, SdMessage};
pub use option::{ConfigurationOption, Endpoint, IPv4EndpointOption, IPv6EndpointOption, SdOption};
pub use server::OfferedService;
pub use types::{
    EntryType, EventgroupId, InstanceId, OptionType, TransportProtocol, SD_DEFAULT_PORT,
    SD_ENTRY_SIZE, SD_METHOD_ID, SD_MULTICAST_ADDR, SD_SERVICE_ID,
};
