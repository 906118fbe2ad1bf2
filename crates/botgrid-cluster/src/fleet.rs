//! In-process fleet: several logical nodes sharing one broadcast bus.
//!
//! Used by embedders that run multiple grid instances in one process and
//! by tests that exercise fleet-wide behavior without a network.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use botgrid_state::{GridError, ServerId};
use futures::FutureExt;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::dispatcher::{ClusterDispatcher, FleetCall, FleetFn};

type Handlers = BTreeMap<ServerId, HashMap<String, FleetFn>>;

/// Registry of nodes and the operations each one exposes.
#[derive(Clone, Default)]
pub struct InProcessFleet {
    nodes: Arc<RwLock<Handlers>>,
}

impl InProcessFleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher for one node of the fleet.
    pub fn member(&self, server_id: impl Into<ServerId>) -> FleetMember {
        let server_id = server_id.into();
        self.write().entry(server_id.clone()).or_default();
        FleetMember {
            fleet: self.clone(),
            server_id,
        }
    }

    /// Remove a node; later broadcasts no longer reach it.
    pub fn leave(&self, server_id: &str) -> bool {
        self.write().remove(server_id).is_some()
    }

    pub fn nodes(&self) -> Vec<ServerId> {
        self.read().keys().cloned().collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Handlers> {
        self.nodes.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Handlers> {
        self.nodes.write().unwrap_or_else(|e| e.into_inner())
    }

    fn handlers_for(&self, name: &str) -> Vec<(ServerId, FleetFn)> {
        self.read()
            .iter()
            .filter_map(|(id, ops)| ops.get(name).map(|f| (id.clone(), f.clone())))
            .collect()
    }
}

/// One node's view of an [`InProcessFleet`].
#[derive(Clone)]
pub struct FleetMember {
    fleet: InProcessFleet,
    server_id: ServerId,
}

impl FleetMember {
    pub fn server_id(&self) -> &str {
        &self.server_id
    }
}

impl ClusterDispatcher for FleetMember {
    fn broadcast(&self, name: &str, local: FleetFn) -> FleetFn {
        self.fleet
            .write()
            .entry(self.server_id.clone())
            .or_default()
            .insert(name.to_string(), local);

        let fleet = self.fleet.clone();
        let name = name.to_string();
        Arc::new(move |call: FleetCall| {
            let handlers = fleet.handlers_for(&name);
            let name = name.clone();
            async move {
                debug!(
                    operation = %name,
                    workload_id = %call.workload_id,
                    nodes = handlers.len(),
                    "broadcasting"
                );
                let results = join_all(
                    handlers
                        .iter()
                        .map(|(_, handler)| handler(call.clone())),
                )
                .await;

                let mut all_ok = true;
                let mut first_err: Option<GridError> = None;
                for ((node, _), result) in handlers.iter().zip(results) {
                    match result {
                        Ok(ok) => all_ok &= ok,
                        Err(e) => {
                            warn!(operation = %name, %node, error = %e, "broadcast failed on node");
                            if first_err.is_none() {
                                first_err = Some(e);
                            }
                        }
                    }
                }
                match first_err {
                    Some(e) => Err(e),
                    None => Ok(all_ok),
                }
            }
            .boxed()
        })
    }
}
