use anyhow::Result;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{bson::doc, Collection, Database};
use std::collections::HashSet;
use crate::types::{IpAllocation, IpSubnet, NetworkUser, ServiceProfile};

/// Read path into the customer subsystem. The order of the returned ids is
/// part of the contract: re-running the same enumeration must yield the same
/// sequence.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn list_users_in_pool_with_profile(
        &self,
        pool_id: &str,
        profile_id: &str,
    ) -> Result<Vec<String>>;
}

#[async_trait]
pub trait ProfileLookup: Send + Sync {
    async fn profile_exists(&self, profile_id: &str) -> Result<bool>;
}

pub struct MongoUserDirectory {
    db: Database,
}

impl MongoUserDirectory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserDirectory for MongoUserDirectory {
    async fn list_users_in_pool_with_profile(
        &self,
        pool_id: &str,
        profile_id: &str,
    ) -> Result<Vec<String>> {
        let subnets: Collection<IpSubnet> = self.db.collection("ip_subnets");
        let allocations: Collection<IpAllocation> = self.db.collection("ip_allocations");
        let users: Collection<NetworkUser> = self.db.collection("network_users");

        let pool_subnets: Vec<IpSubnet> = subnets
            .find(doc! { "pool_id": pool_id })
            .await?
            .try_collect()
            .await?;
        let subnet_ids: Vec<&str> = pool_subnets.iter().map(|s| s.id.as_str()).collect();
        if subnet_ids.is_empty() {
            return Ok(Vec::new());
        }

        let pool_allocations: Vec<IpAllocation> = allocations
            .find(doc! { "subnet_id": { "$in": subnet_ids }, "status": "active" })
            .await?
            .try_collect()
            .await?;
        let allocated_users: HashSet<String> =
            pool_allocations.into_iter().map(|a| a.user_id).collect();
        if allocated_users.is_empty() {
            return Ok(Vec::new());
        }

        let user_ids: Vec<&str> = allocated_users.iter().map(String::as_str).collect();
        let matching: Vec<NetworkUser> = users
            .find(doc! {
                "_id": { "$in": user_ids },
                "profile_id": profile_id,
                "active": true,
            })
            .sort(doc! { "_id": 1 })
            .await?
            .try_collect()
            .await?;

        Ok(matching.into_iter().map(|u| u.id).collect())
    }
}

pub struct MongoProfileLookup {
    db: Database,
}

impl MongoProfileLookup {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProfileLookup for MongoProfileLookup {
    async fn profile_exists(&self, profile_id: &str) -> Result<bool> {
        let profiles: Collection<ServiceProfile> = self.db.collection("service_profiles");
        Ok(profiles.find_one(doc! { "_id": profile_id }).await?.is_some())
    }
}
