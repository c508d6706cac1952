use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::{bson::doc, Collection, Database};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use crate::types::{IpAllocation, IpPool, IpSubnet};

/// Durable source of truth for address ownership. Claim and release are the
/// only writes; a claim must be atomic against concurrent claimers of the
/// same (subnet, address).
#[async_trait]
pub trait AllocationStore: Send + Sync {
    async fn get_pool(&self, pool_id: &str) -> Result<Option<IpPool>>;

    /// Active subnets of a pool, ordered ascending by network address so
    /// first-fit scans are deterministic.
    async fn list_subnets(&self, pool_id: &str) -> Result<Vec<IpSubnet>>;

    async fn get_subnet(&self, subnet_id: &str) -> Result<Option<IpSubnet>>;

    async fn count_active(&self, subnet_id: &str) -> Result<u64>;

    /// Addresses currently held by an active allocation in the subnet.
    async fn active_addresses(&self, subnet_id: &str) -> Result<HashSet<String>>;

    async fn find_active_for_user(&self, user_id: &str) -> Result<Option<IpAllocation>>;

    /// Atomically claim one address for a user. Returns None when another
    /// writer holds an active allocation for the same (subnet, address).
    async fn claim(
        &self,
        subnet_id: &str,
        address: &str,
        user_id: &str,
    ) -> Result<Option<IpAllocation>>;

    /// Mark an active allocation released, making its address available.
    async fn release(&self, allocation_id: &str) -> Result<()>;
}

pub struct MongoAllocationStore {
    db: Database,
}

impl MongoAllocationStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn pools(&self) -> Collection<IpPool> {
        self.db.collection("ip_pools")
    }

    fn subnets(&self) -> Collection<IpSubnet> {
        self.db.collection("ip_subnets")
    }

    fn allocations(&self) -> Collection<IpAllocation> {
        self.db.collection("ip_allocations")
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == 11000
    )
}

#[async_trait]
impl AllocationStore for MongoAllocationStore {
    async fn get_pool(&self, pool_id: &str) -> Result<Option<IpPool>> {
        Ok(self.pools().find_one(doc! { "_id": pool_id }).await?)
    }

    async fn list_subnets(&self, pool_id: &str) -> Result<Vec<IpSubnet>> {
        let cursor = self
            .subnets()
            .find(doc! { "pool_id": pool_id, "active": true })
            .await?;
        let mut subnets: Vec<IpSubnet> = cursor.try_collect().await?;
        // Sort numerically; the string form of the network field does not
        // order 10.0.2.0 before 10.0.10.0.
        subnets.sort_by_key(|s| {
            (
                s.network.parse::<Ipv4Addr>().map(u32::from).unwrap_or(u32::MAX),
                s.id.clone(),
            )
        });
        Ok(subnets)
    }

    async fn get_subnet(&self, subnet_id: &str) -> Result<Option<IpSubnet>> {
        Ok(self.subnets().find_one(doc! { "_id": subnet_id }).await?)
    }

    async fn count_active(&self, subnet_id: &str) -> Result<u64> {
        let count = self
            .allocations()
            .count_documents(doc! { "subnet_id": subnet_id, "status": "active" })
            .await?;
        Ok(count)
    }

    async fn active_addresses(&self, subnet_id: &str) -> Result<HashSet<String>> {
        let cursor = self
            .allocations()
            .find(doc! { "subnet_id": subnet_id, "status": "active" })
            .await?;
        let allocations: Vec<IpAllocation> = cursor.try_collect().await?;
        Ok(allocations.into_iter().map(|a| a.address).collect())
    }

    async fn find_active_for_user(&self, user_id: &str) -> Result<Option<IpAllocation>> {
        Ok(self
            .allocations()
            .find_one(doc! { "user_id": user_id, "status": "active" })
            .await?)
    }

    async fn claim(
        &self,
        subnet_id: &str,
        address: &str,
        user_id: &str,
    ) -> Result<Option<IpAllocation>> {
        let allocation = IpAllocation::new(subnet_id, address, user_id);
        // The unique partial index on (subnet_id, address, status=active)
        // turns the insert into a compare-and-set: losing a race surfaces as
        // a duplicate-key error, never as a double allocation.
        match self.allocations().insert_one(&allocation).await {
            Ok(_) => Ok(Some(allocation)),
            Err(e) if is_duplicate_key(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn release(&self, allocation_id: &str) -> Result<()> {
        self.allocations()
            .update_one(
                doc! { "_id": allocation_id, "status": "active" },
                doc! {
                    "$set": {
                        "status": "released",
                        "released_at": Utc::now().to_rfc3339(),
                    }
                },
            )
            .await?;
        Ok(())
    }
}
