use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Pushes a new address/profile binding down to the subscriber's access
/// device. Implementations must be safely retryable: a failed push leaves no
/// partial device state the next attempt cannot overwrite.
#[async_trait]
pub trait DeviceConfigPusher: Send + Sync {
    async fn apply_address(&self, user_id: &str, address: &str, profile_id: &str) -> Result<()>;
}

/// HTTP pusher talking to the router/OLT provisioning agent. The client
/// timeout doubles as the per-user operation timeout: a timed-out push is a
/// failed push.
pub struct HttpDeviceConfigPusher {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpDeviceConfigPusher {
    pub fn new(endpoint: String, timeout_secs: u64) -> Self {
        Self {
            endpoint,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

#[async_trait]
impl DeviceConfigPusher for HttpDeviceConfigPusher {
    async fn apply_address(&self, user_id: &str, address: &str, profile_id: &str) -> Result<()> {
        let url = format!("{}/api/v1/provision/address", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "userId": user_id,
                "address": address,
                "profileId": profile_id,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "provisioning agent returned status {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            ));
        }

        tracing::debug!("Pushed address {} for user {} to device agent", address, user_id);
        Ok(())
    }
}
