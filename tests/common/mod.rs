use std::path::Path;
use std::sync::Arc;
use token_authority::config::Config;
use token_authority::repositories::memory::InMemoryRefreshTokenStore;
use token_authority::services::key_rotation::KeyRotationManager;
use token_authority::services::refresh_ledger::RefreshTokenLedger;
use token_authority::services::token_service::TokenIssuer;

pub fn test_config(dir: &Path) -> Config {
    Config {
        key_store_path: dir.join("keys.json"),
        master_key: vec![42u8; 32],
        database_url: None,
        signing_key_size: 2048,
        signing_key_validity_days: 60,
        key_retention_count: 3,
        access_token_lifetime_minutes: 60,
        refresh_token_lifetime_days: 7,
        refresh_retention_per_user: 5,
        jwt_issuer: "token-authority".to_string(),
        jwt_audience: "api".to_string(),
    }
}

pub struct TestStack {
    pub keys: Arc<KeyRotationManager>,
    pub issuer: Arc<TokenIssuer>,
    pub ledger: Arc<RefreshTokenLedger>,
}

pub async fn build_stack(config: &Config) -> anyhow::Result<TestStack> {
    let keys = Arc::new(KeyRotationManager::load(config).await?);
    let issuer = Arc::new(TokenIssuer::new(Arc::clone(&keys), config));
    let store = Arc::new(InMemoryRefreshTokenStore::new());
    let ledger = Arc::new(RefreshTokenLedger::new(store, config));
    Ok(TestStack {
        keys,
        issuer,
        ledger,
    })
}
