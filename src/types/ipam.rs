use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::net::Ipv4Addr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolType {
    Public,
    Private,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpPool {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub pool_type: PoolType,
    pub active: bool,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpSubnet {
    #[serde(rename = "_id")]
    pub id: String,
    pub pool_id: String,
    pub network: String,
    pub prefix_length: u8,
    pub gateway: Option<String>,
    pub active: bool,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl IpSubnet {
    /// First and last assignable host address, as u32s. None when the prefix
    /// leaves no room for hosts (/31, /32) or the network field does not parse.
    fn host_span(&self) -> Option<(u32, u32)> {
        if self.prefix_length > 30 {
            return None;
        }
        let network: Ipv4Addr = self.network.parse().ok()?;
        let size = 1u64 << (32 - self.prefix_length);
        let base = u64::from(u32::from(network));
        let start = base + 1;
        let end = base + size - 2;
        if end > u64::from(u32::MAX) {
            return None;
        }
        Some((start as u32, end as u32))
    }

    fn gateway_as_u32(&self) -> Option<u32> {
        self.gateway
            .as_deref()
            .and_then(|g| g.parse::<Ipv4Addr>().ok())
            .map(u32::from)
    }

    /// Number of assignable addresses: hosts in the prefix minus network,
    /// broadcast and the gateway (when it falls inside the subnet).
    pub fn capacity(&self) -> u64 {
        let Some((start, end)) = self.host_span() else {
            return 0;
        };
        let mut capacity = u64::from(end - start) + 1;
        if let Some(gw) = self.gateway_as_u32() {
            if gw >= start && gw <= end {
                capacity -= 1;
            }
        }
        capacity
    }

    /// Assignable addresses in ascending order. The scan order is what makes
    /// first-fit allocation deterministic within a run.
    pub fn iter_hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let (start, end) = self.host_span().unwrap_or((1, 0));
        let gateway = self.gateway_as_u32();
        (start..=end)
            .filter(move |offset| Some(*offset) != gateway)
            .map(Ipv4Addr::from)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationStatus {
    Active,
    Released,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpAllocation {
    #[serde(rename = "_id")]
    pub id: String,
    pub subnet_id: String,
    pub address: String,
    pub user_id: String,
    pub status: AllocationStatus,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub allocated_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

impl IpAllocation {
    pub fn new(subnet_id: &str, address: &str, user_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            subnet_id: subnet_id.to_string(),
            address: address.to_string(),
            user_id: user_id.to_string(),
            status: AllocationStatus::Active,
            allocated_at: Utc::now(),
            released_at: None,
        }
    }
}
