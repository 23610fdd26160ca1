//! Host port allocation.
//!
//! Allocation runs inside the caller's store transaction: the set of bound
//! ports is read, a free candidate is drawn, and the mapping is inserted
//! before the transaction commits. The `UNIQUE(protocol, exposed_port)`
//! index backs this up; a collision on insert retries with a fresh port.

use std::collections::{BTreeSet, HashSet};
use std::sync::Mutex;

use dodoco_common::config::PortRange;
use dodoco_common::constants::{PORT_INSERT_RETRIES, PORT_RANDOM_ATTEMPTS};
use dodoco_common::error::{DodocoError, Result};
use dodoco_common::types::{PortSpec, Protocol, RecordId};
use dodoco_store::Session;
use dodoco_store::models::{NewPortMapping, PortInsert, PortMapping};
use rand::Rng;

/// One concrete mapping to bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortRequest {
    /// Port inside the sandbox.
    pub container_port: u16,
    /// Concrete protocol.
    pub protocol: Protocol,
    /// Fixed host port, or `None` to allocate one.
    pub exposed_port: Option<u16>,
}

impl PortRequest {
    /// Expands a spec into one request per protocol it names.
    #[must_use]
    pub fn expand(spec: PortSpec, exposed_port: Option<u16>) -> Vec<Self> {
        spec.protocol
            .expand()
            .into_iter()
            .map(|protocol| Self {
                container_port: spec.container_port,
                protocol,
                exposed_port,
            })
            .collect()
    }

    /// Expands a list of specs with allocated host ports, dropping duplicates.
    #[must_use]
    pub fn from_specs(specs: &[PortSpec]) -> Vec<Self> {
        let unique: BTreeSet<Self> = specs.iter().flat_map(|s| Self::expand(*s, None)).collect();
        unique.into_iter().collect()
    }
}

/// Chooses free host ports from a configured range.
#[derive(Debug)]
pub struct PortAllocator {
    range: PortRange,
    serial: Mutex<()>,
}

impl PortAllocator {
    /// Creates an allocator over `range`.
    #[must_use]
    pub const fn new(range: PortRange) -> Self {
        Self {
            range,
            serial: Mutex::new(()),
        }
    }

    /// The range ports are drawn from.
    #[must_use]
    pub const fn range(&self) -> PortRange {
        self.range
    }

    /// Picks a port for `protocol` that is neither persisted nor in `taken`.
    ///
    /// Random candidates come first, then a linear sweep of the range.
    ///
    /// # Errors
    ///
    /// Returns `Infra` if the range is exhausted or the store query fails.
    pub fn allocate(
        &self,
        session: &Session<'_>,
        protocol: Protocol,
        taken: &HashSet<u16>,
    ) -> Result<u16> {
        let used = session.used_ports(protocol)?;
        let free = |port: u16| !used.contains(&port) && !taken.contains(&port);

        let mut rng = rand::rng();
        for _ in 0..PORT_RANDOM_ATTEMPTS {
            let candidate = rng.random_range(self.range.start..=self.range.end);
            if free(candidate) {
                return Ok(candidate);
            }
        }
        (self.range.start..=self.range.end)
            .find(|p| free(*p))
            .ok_or_else(|| {
                DodocoError::infra(
                    "ports.allocate",
                    format!(
                        "no free {protocol} port in {}-{}",
                        self.range.start, self.range.end
                    ),
                )
            })
    }

    /// Persists mappings for `container_id`, allocating host ports as needed.
    ///
    /// Ports chosen earlier in the same call are never handed to later
    /// requests, so a `22/all` expansion gets two distinct host ports.
    ///
    /// # Errors
    ///
    /// `Conflict` if a fixed host port is already bound or the container
    /// already maps the port; `Infra` if allocation keeps colliding.
    pub fn bind(
        &self,
        session: &Session<'_>,
        container_id: RecordId,
        requests: &[PortRequest],
    ) -> Result<Vec<PortMapping>> {
        let _serial = self
            .serial
            .lock()
            .map_err(|_| DodocoError::infra("ports.bind", "allocator mutex poisoned"))?;

        let mut taken = HashSet::new();
        let mut mappings = Vec::with_capacity(requests.len());
        for request in requests {
            let mapping = match request.exposed_port {
                Some(port) => Self::bind_fixed(session, container_id, *request, port)?,
                None => self.bind_allocated(session, container_id, *request, &taken)?,
            };
            let _ = taken.insert(mapping.exposed_port);
            tracing::debug!(
                record = %container_id,
                binding = %mapping.binding_key(),
                exposed = mapping.exposed_port,
                "port bound"
            );
            mappings.push(mapping);
        }
        Ok(mappings)
    }

    fn bind_fixed(
        session: &Session<'_>,
        container_id: RecordId,
        request: PortRequest,
        port: u16,
    ) -> Result<PortMapping> {
        if port == 0 {
            return Err(DodocoError::Validation {
                message: "exposed port must be non-zero".into(),
            });
        }
        match session.insert_port(new_mapping(container_id, request, port))? {
            PortInsert::Inserted(mapping) => Ok(mapping),
            PortInsert::HostPortTaken => Err(DodocoError::conflict(format!(
                "host port {port}/{} is already bound",
                request.protocol
            ))),
        }
    }

    fn bind_allocated(
        &self,
        session: &Session<'_>,
        container_id: RecordId,
        request: PortRequest,
        taken: &HashSet<u16>,
    ) -> Result<PortMapping> {
        let mut excluded = taken.clone();
        for attempt in 0..PORT_INSERT_RETRIES {
            let port = self.allocate(session, request.protocol, &excluded)?;
            match session.insert_port(new_mapping(container_id, request, port))? {
                PortInsert::Inserted(mapping) => return Ok(mapping),
                PortInsert::HostPortTaken => {
                    tracing::debug!(port, attempt, "allocated port collided, retrying");
                    let _ = excluded.insert(port);
                }
            }
        }
        Err(DodocoError::infra(
            "ports.bind",
            format!(
                "gave up allocating a {} port after {PORT_INSERT_RETRIES} collisions",
                request.protocol
            ),
        ))
    }
}

const fn new_mapping(container_id: RecordId, request: PortRequest, port: u16) -> NewPortMapping {
    NewPortMapping {
        container_id,
        container_port: request.container_port,
        protocol: request.protocol,
        exposed_port: port,
    }
}

#[cfg(test)]
mod tests {
    use dodoco_common::error::ErrorKind;
    use dodoco_common::types::ProtocolSpec;
    use dodoco_store::Store;
    use dodoco_store::models::{NewContainer, NewProject};

    use super::*;

    fn seed(store: &Store, engine_name: &str) -> RecordId {
        store
            .write(|s| {
                let project = s.insert_project(&NewProject {
                    name: "p".into(),
                    description: None,
                    approved: true,
                    max_container_limit: 10,
                    created_by: None,
                })?;
                s.insert_container(&NewContainer {
                    name: "box".into(),
                    description: None,
                    start_image_name: "ubuntu:latest".into(),
                    engine_container_name: engine_name.into(),
                    project_id: project.id,
                    created_by: 1,
                })
            })
            .expect("seed")
            .id
    }

    fn small_range(start: u16, end: u16) -> PortAllocator {
        PortAllocator::new(PortRange { start, end })
    }

    #[test]
    fn all_fans_out_with_distinct_ports() {
        let store = Store::in_memory().expect("store");
        let id = seed(&store, "ubuntu_a");
        let allocator = PortAllocator::new(PortRange::default());
        let requests = PortRequest::from_specs(&[PortSpec::new(22, ProtocolSpec::All)]);
        assert_eq!(requests.len(), 2);

        let mappings = store
            .write(|s| allocator.bind(s, id, &requests))
            .expect("bind");
        assert_eq!(mappings.len(), 2);
        assert_ne!(mappings[0].exposed_port, mappings[1].exposed_port);
        assert!(mappings.iter().all(|m| allocator.range().contains(m.exposed_port)));
    }

    #[test]
    fn allocation_skips_bound_ports() {
        let store = Store::in_memory().expect("store");
        let a = seed(&store, "ubuntu_a");
        let b = seed(&store, "ubuntu_b");
        let allocator = small_range(50000, 50001);
        let tcp = |port| PortRequest {
            container_port: port,
            protocol: Protocol::Tcp,
            exposed_port: None,
        };

        let first = store.write(|s| allocator.bind(s, a, &[tcp(22)])).expect("first");
        let second = store.write(|s| allocator.bind(s, b, &[tcp(22)])).expect("second");
        assert_ne!(first[0].exposed_port, second[0].exposed_port);

        let err = store
            .write(|s| allocator.bind(s, b, &[tcp(80)]))
            .expect_err("exhausted");
        assert_eq!(err.kind(), ErrorKind::Infra);
    }

    #[test]
    fn fixed_port_collision_is_conflict() {
        let store = Store::in_memory().expect("store");
        let a = seed(&store, "ubuntu_a");
        let b = seed(&store, "ubuntu_b");
        let allocator = PortAllocator::new(PortRange::default());
        let fixed = PortRequest {
            container_port: 80,
            protocol: Protocol::Tcp,
            exposed_port: Some(8080),
        };

        let _ = store.write(|s| allocator.bind(s, a, &[fixed])).expect("first");
        let err = store
            .write(|s| allocator.bind(s, b, &[fixed]))
            .expect_err("collision");
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn failed_bind_rolls_back_whole_request() {
        let store = Store::in_memory().expect("store");
        let a = seed(&store, "ubuntu_a");
        let allocator = small_range(50000, 50000);
        let requests = [
            PortRequest {
                container_port: 22,
                protocol: Protocol::Tcp,
                exposed_port: None,
            },
            PortRequest {
                container_port: 80,
                protocol: Protocol::Tcp,
                exposed_port: None,
            },
        ];
        assert!(store.write(|s| allocator.bind(s, a, &requests)).is_err());
        assert!(store.read(|s| s.ports_of(a)).expect("ports").is_empty());
    }

    #[test]
    fn duplicate_specs_collapse() {
        let requests = PortRequest::from_specs(&[
            PortSpec::new(22, ProtocolSpec::All),
            PortSpec::new(22, ProtocolSpec::One(Protocol::Tcp)),
        ]);
        assert_eq!(requests.len(), 2);
    }
}
