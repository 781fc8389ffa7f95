use std::collections::HashMap;

use crate::settings::Provider;

/// Source of per-provider API credentials. Values never pass through
/// `settings.json`.
pub trait KeyStore: Send + Sync {
    fn get(&self, provider: Provider) -> Option<String>;
}

/// Reads `DAYFLOW_<PROVIDER>_API_KEY` from the environment.
#[derive(Debug, Default, Clone)]
pub struct EnvKeyStore;

impl EnvKeyStore {
    pub fn variable_name(provider: Provider) -> String {
        format!("DAYFLOW_{}_API_KEY", provider.as_str().to_uppercase())
    }
}

impl KeyStore for EnvKeyStore {
    fn get(&self, provider: Provider) -> Option<String> {
        std::env::var(Self::variable_name(provider))
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

/// Fixed keys, for embedding callers and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticKeyStore {
    keys: HashMap<&'static str, String>,
}

impl StaticKeyStore {
    pub fn with_key(mut self, provider: Provider, key: impl Into<String>) -> Self {
        self.keys.insert(provider.as_str(), key.into());
        self
    }
}

impl KeyStore for StaticKeyStore {
    fn get(&self, provider: Provider) -> Option<String> {
        self.keys.get(provider.as_str()).cloned()
    }
}
