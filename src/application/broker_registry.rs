//! Lazily creates and caches one [`BrokerClient`] per account id. Each
//! client owns an isolated session cache; two accounts pointed at the
//! same `base_url` still get distinct client instances.
//!
//! The construction strategy is injected as a factory closure: production
//! passes a [`ProjectXClient`] factory, tests pass a stub.

use crate::domain::account::Account;
use crate::domain::ports::BrokerClient;
use crate::infrastructure::projectx::ProjectXClient;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

type Factory = Box<dyn Fn(&Account) -> Arc<dyn BrokerClient> + Send + Sync>;

pub struct BrokerClientRegistry {
    clients: RwLock<HashMap<String, Arc<dyn BrokerClient>>>,
    factory: Factory,
}

impl BrokerClientRegistry {
    pub fn new(request_timeout: Duration, max_attempts: u32) -> Self {
        Self::with_factory(move |account| {
            Arc::new(ProjectXClient::new(account.clone(), request_timeout, max_attempts))
        })
    }

    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn(&Account) -> Arc<dyn BrokerClient> + Send + Sync + 'static,
    {
        Self {
            clients: RwLock::new(HashMap::new()),
            factory: Box::new(factory),
        }
    }

    pub async fn get_or_create(&self, account: &Account) -> Arc<dyn BrokerClient> {
        if let Some(client) = self.clients.read().await.get(&account.id) {
            return client.clone();
        }
        let mut clients = self.clients.write().await;
        clients
            .entry(account.id.clone())
            .or_insert_with(|| (self.factory)(account))
            .clone()
    }
}
