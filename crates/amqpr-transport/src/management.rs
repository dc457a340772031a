//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Topology-management request/response shapes consumed (not implemented) by the broker."
//! ems_version: "v0.1.0-prealpha"
//! ems_owner: "tbd"
//! ---
use async_trait::async_trait;

use amqpr_common::RoutingType;

use crate::error::TransportError;

/// Fields recognized when creating a queue.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateQueueRequest {
    pub name: String,
    pub address: String,
    pub routing_type: RoutingType,
    pub durable: bool,
    pub exclusive: bool,
    pub group_rebalance: bool,
    pub group_buckets: Option<u32>,
    pub max_consumers: Option<u32>,
    pub auto_create_address: bool,
    pub purge_on_no_consumers: bool,
}

impl CreateQueueRequest {
    /// A minimal, broker-default request for `name` on `address`.
    pub fn new(name: impl Into<String>, address: impl Into<String>, routing_type: RoutingType) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            routing_type,
            durable: true,
            exclusive: false,
            group_rebalance: false,
            group_buckets: None,
            max_consumers: None,
            auto_create_address: true,
            purge_on_no_consumers: false,
        }
    }
}

/// Request to create a broker address with a routing type.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateAddressRequest {
    pub address: String,
    pub routing_type: RoutingType,
}

/// Boundary for broker-side topology management RPCs. The broker-side
/// plumbing itself is out of scope; this trait models only the
/// request/response shapes the core depends on, so `amqpr-core` can be
/// written and tested against a fake without depending on a concrete
/// management-link implementation.
#[async_trait]
pub trait ManagementClient: Send + Sync {
    /// Create an address. Fails with [`TransportError::TopologyConflict`]
    /// when the address already exists with a different routing type.
    async fn create_address(&self, request: CreateAddressRequest) -> Result<(), TransportError>;

    /// Create a queue. Fails with [`TransportError::TopologyConflict`] when
    /// the queue already exists, or when the target address does not exist
    /// and `auto_create_address` is false.
    async fn create_queue(&self, request: CreateQueueRequest) -> Result<(), TransportError>;

    /// List the broker's known address names.
    async fn get_address_names(&self) -> Result<Vec<String>, TransportError>;

    /// List the broker's known queue names.
    async fn get_queue_names(&self) -> Result<Vec<String>, TransportError>;
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;

    /// An in-memory `ManagementClient` used only to exercise topology
    /// conflict scenarios without a real broker.
    #[derive(Default)]
    pub struct FakeManagementClient {
        addresses: Mutex<BTreeMap<String, RoutingType>>,
        queues: Mutex<BTreeMap<String, CreateQueueRequest>>,
    }

    #[async_trait]
    impl ManagementClient for FakeManagementClient {
        async fn create_address(&self, request: CreateAddressRequest) -> Result<(), TransportError> {
            let mut addresses = self.addresses.lock().expect("lock poisoned");
            if let Some(existing) = addresses.get(&request.address) {
                if *existing != request.routing_type {
                    return Err(TransportError::TopologyConflict {
                        message: format!("Address already exists: {}", request.address),
                    });
                }
                return Ok(());
            }
            addresses.insert(request.address, request.routing_type);
            Ok(())
        }

        async fn create_queue(&self, request: CreateQueueRequest) -> Result<(), TransportError> {
            let addresses = self.addresses.lock().expect("lock poisoned");
            if !request.auto_create_address && !addresses.contains_key(&request.address) {
                return Err(TransportError::TopologyConflict {
                    message: format!("AddressDoesNotExist: {}", request.address),
                });
            }
            drop(addresses);
            let mut queues = self.queues.lock().expect("lock poisoned");
            if queues.contains_key(&request.name) {
                return Err(TransportError::TopologyConflict {
                    message: format!("Queue already exists: {}", request.name),
                });
            }
            queues.insert(request.name.clone(), request);
            Ok(())
        }

        async fn get_address_names(&self) -> Result<Vec<String>, TransportError> {
            Ok(self.addresses.lock().expect("lock poisoned").keys().cloned().collect())
        }

        async fn get_queue_names(&self) -> Result<Vec<String>, TransportError> {
            Ok(self.queues.lock().expect("lock poisoned").keys().cloned().collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeManagementClient;
    use super::*;

    #[tokio::test]
    async fn creating_an_existing_address_with_different_routing_type_conflicts() {
        let client = FakeManagementClient::default();
        client
            .create_address(CreateAddressRequest {
                address: "A".into(),
                routing_type: RoutingType::Queue,
            })
            .await
            .expect("first create succeeds");

        let err = client
            .create_address(CreateAddressRequest {
                address: "A".into(),
                routing_type: RoutingType::Topic,
            })
            .await
            .expect_err("second create conflicts");
        assert!(err.topology_conflict_contains("Address already exists"));
    }

    #[tokio::test]
    async fn creating_a_queue_against_a_missing_address_without_autocreate_conflicts() {
        let client = FakeManagementClient::default();
        let mut request = CreateQueueRequest::new("q1", "missing", RoutingType::Queue);
        request.auto_create_address = false;

        let err = client
            .create_queue(request)
            .await
            .expect_err("missing address conflicts");
        assert!(err.topology_conflict_contains("AddressDoesNotExist"));
    }
}
