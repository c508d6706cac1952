use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// Subscriber record. Owned by the customer subsystem; the migration engine
/// only reads it to scope a run to a (pool, profile) population.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkUser {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    pub profile_id: String,
    pub active: bool,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceProfile {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub active: bool,
}
