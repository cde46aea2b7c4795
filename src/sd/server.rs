//! The aggregated view of a discovered service instance.

use crate::header::ServiceId;

use super::option::Endpoint;
use super::types::InstanceId;

/// An offered service, joining an OfferService entry with its endpoint
/// option: what a [`crate::discovery::ServiceDiscoveryObserver::on_offer`]
/// callback receives.
#[derive(Debug, Clone)]
pub struct OfferedService {
    /// Service ID.
    pub service_id: ServiceId,
    /// Instance ID.
    pub instance_id: InstanceId,
    /// Major version.
    pub major_version: u8,
    /// Minor version.
    pub minor_version: u32,
    /// Endpoint where the service is available.
    pub endpoint: Endpoint,
    /// TTL in seconds for offer announcements.
    pub ttl: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offered_service() {
        let service = OfferedService {
            service_id: ServiceId(0x1234),
            instance_id: InstanceId(0x0001),
            major_version: 1,
            minor_version: 0,
            endpoint: Endpoint::tcp("192.168.1.100:30490".parse().unwrap()),
            ttl: 3600,
        };

        assert_eq!(service.service_id, ServiceId(0x1234));
        assert_eq!(service.ttl, 3600);
    }
}
