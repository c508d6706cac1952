use mongodb::{bson::doc, options::IndexOptions, Client, Database, IndexModel};
use std::sync::Arc;
use crate::config::Config;
use crate::services::allocation_store::{AllocationStore, MongoAllocationStore};
use crate::services::capacity::CapacityPlanner;
use crate::services::device_config::{DeviceConfigPusher, HttpDeviceConfigPusher};
use crate::services::directory::{
    MongoProfileLookup, MongoUserDirectory, ProfileLookup, UserDirectory,
};
use crate::services::job_store::{JobStore, MongoJobStore};
use crate::services::migration::MigrationService;
use crate::services::rollback::RollbackService;
use crate::types::{IpAllocation, MigrationJob};

#[derive(Clone)]
pub struct AppState {
    pub migrations: Arc<MigrationService>,
    pub rollback: Arc<RollbackService>,
    pub jobs: Arc<dyn JobStore>,
}

pub async fn init(config: &Config) -> anyhow::Result<AppState> {
    let client = Client::with_uri_str(&config.mongodb_uri).await?;
    let db = client.database("ipam");

    tracing::info!("Connected to MongoDB");

    ensure_indexes(&db).await?;

    let allocations: Arc<dyn AllocationStore> = Arc::new(MongoAllocationStore::new(db.clone()));
    let jobs: Arc<dyn JobStore> = Arc::new(MongoJobStore::new(db.clone()));
    let users: Arc<dyn UserDirectory> = Arc::new(MongoUserDirectory::new(db.clone()));
    let profiles: Arc<dyn ProfileLookup> = Arc::new(MongoProfileLookup::new(db));
    let pusher: Arc<dyn DeviceConfigPusher> = Arc::new(HttpDeviceConfigPusher::new(
        config.device_agent_uri.clone(),
        config.device_push_timeout_secs,
    ));

    let planner = Arc::new(CapacityPlanner::new(
        allocations.clone(),
        users.clone(),
        profiles,
    ));
    let migrations = Arc::new(MigrationService::new(
        planner,
        allocations.clone(),
        jobs.clone(),
        users,
        pusher.clone(),
    ));
    let rollback = Arc::new(RollbackService::new(allocations, jobs.clone(), pusher));

    Ok(AppState {
        migrations,
        rollback,
        jobs,
    })
}

/// Indexes the engine relies on. The unique partial index is what turns an
/// allocation insert into an atomic claim; creation is idempotent.
async fn ensure_indexes(db: &Database) -> anyhow::Result<()> {
    let allocations = db.collection::<IpAllocation>("ip_allocations");
    allocations
        .create_index(
            IndexModel::builder()
                .keys(doc! { "subnet_id": 1, "address": 1 })
                .options(
                    IndexOptions::builder()
                        .unique(true)
                        .partial_filter_expression(doc! { "status": "active" })
                        .build(),
                )
                .build(),
        )
        .await?;
    allocations
        .create_index(
            IndexModel::builder()
                .keys(doc! { "user_id": 1, "status": 1 })
                .build(),
        )
        .await?;

    let jobs = db.collection::<MigrationJob>("migration_jobs");
    jobs.create_index(
        IndexModel::builder()
            .keys(doc! { "source_pool_id": 1, "status": 1 })
            .build(),
    )
    .await?;

    Ok(())
}
