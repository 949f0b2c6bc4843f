//! Tenant directory payloads and the flattened device view.

use serde::{Deserialize, Serialize};

/// Response body of the tenant directory endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantDirectory {
    #[serde(default)]
    pub available_tenants: Vec<Tenant>,
}

/// A tenant the operator belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: String,
    #[serde(default)]
    pub client_description: String,
    #[serde(default)]
    pub registered_machines: Vec<Machine>,
}

/// A machine registered under a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    pub id: String,
    #[serde(default)]
    pub oaibox_type: String,
}

/// A device the operator may observe, with its owning tenant attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub tenant_id: String,
    pub oaibox_type: String,
    pub client_description: String,
}

impl TenantDirectory {
    /// Flattens every tenant's machines into one list, tenant order first.
    pub fn into_devices(self) -> Vec<Device> {
        self.available_tenants
            .into_iter()
            .flat_map(|tenant| {
                let Tenant {
                    id: tenant_id,
                    client_description,
                    registered_machines,
                } = tenant;
                registered_machines.into_iter().map(move |m| Device {
                    id: m.id,
                    tenant_id: tenant_id.clone(),
                    oaibox_type: m.oaibox_type,
                    client_description: client_description.clone(),
                })
            })
            .collect()
    }
}

impl Device {
    /// Destination carrying this device's telemetry.
    pub fn telemetry_topic(&self) -> String {
        crate::constants::telemetry_topic(&self.tenant_id, &self.id)
    }
}
