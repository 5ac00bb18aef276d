use std::collections::HashMap;
use std::env;

use anyhow::{Context, Result};
use vaultrs::auth::approle;
use vaultrs::client::{Client, VaultClient, VaultClientSettingsBuilder};
use vaultrs::kv2;

use crate::config::Config;

/// Processor and admin credentials stored in Vault KV v2.
pub struct SecretsManager {
    client: VaultClient,
    kv_mount: String,
}

impl SecretsManager {
    pub fn is_configured() -> bool {
        env::var("VAULT_ADDR").map(|v| !v.is_empty()).unwrap_or(false)
    }

    pub async fn new() -> Result<Self> {
        let vault_addr =
            env::var("VAULT_ADDR").unwrap_or_else(|_| "http://127.0.0.1:8200".to_string());
        let role_id = env::var("VAULT_ROLE_ID").context("VAULT_ROLE_ID is required")?;
        let secret_id = env::var("VAULT_SECRET_ID").context("VAULT_SECRET_ID is required")?;
        let auth_mount = env::var("VAULT_AUTH_MOUNT").unwrap_or_else(|_| "auth/approle".to_string());
        let kv_mount = env::var("VAULT_KV_MOUNT").unwrap_or_else(|_| "secret".to_string());

        let mut client = VaultClient::new(
            VaultClientSettingsBuilder::default()
                .address(&vault_addr)
                .build()
                .context("failed to build Vault client settings")?,
        )
        .context("failed to create Vault client")?;

        let auth = approle::login(&mut client, &auth_mount, &role_id, &secret_id)
            .await
            .context("failed to authenticate to Vault with AppRole")?;
        client.set_token(&auth.client_token);

        Ok(Self { client, kv_mount })
    }

    async fn read(&self, path: &str) -> Result<HashMap<String, String>> {
        kv2::read(&self.client, &self.kv_mount, path)
            .await
            .with_context(|| format!("failed to read {}/{} from Vault", self.kv_mount, path))
    }

    /// Overrides credentials in `config` with the ones found in Vault.
    /// Missing keys leave the environment values in place.
    pub async fn apply_to(&self, config: &mut Config) -> Result<()> {
        let processor = self.read("processor").await?;
        if let Some(key) = processor.get("api_key") {
            config.processor_api_key = Some(key.clone());
        }
        if let Some(secret) = processor.get("webhook_secret") {
            config.processor_webhook_secret = secret.clone();
        }

        let admin = self.read("admin").await?;
        if let Some(key) = admin.get("api_key") {
            config.admin_api_key = key.clone();
        }

        tracing::info!(mount = %self.kv_mount, "credentials loaded from Vault");
        Ok(())
    }
}
