//! Loads and resolves brokerage accounts from the process environment.
//!
//! Two shapes are recognized: a legacy single-account form and a
//! multi-account form keyed by `ACCOUNT_<ID>_*`. Both can be present at
//! once; the legacy account is registered under the id `default`.

use crate::domain::account::{Account, AccountCredentials, AccountSummary, BrokerKind};
use crate::domain::errors::GatewayError;
use anyhow::Context;
use std::collections::HashMap;
use std::env;
use tracing::{info, warn};

pub struct AccountRegistry {
    accounts: HashMap<String, Account>,
    /// webhook_secret -> account id, for the common case of no explicit
    /// `account` field in the payload.
    secret_index: HashMap<String, String>,
    legacy_default: Option<String>,
}

impl AccountRegistry {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut accounts = HashMap::new();

        if let Some(legacy) = Self::load_legacy()? {
            accounts.insert(legacy.id.clone(), legacy);
        }
        let legacy_default = accounts.keys().next().cloned();

        for account in Self::load_multi()? {
            if accounts.contains_key(&account.id) {
                warn!(account_id = %account.id, "duplicate account id, multi-account entry wins");
            }
            accounts.insert(account.id.clone(), account);
        }

        let mut secret_index = HashMap::new();
        for account in accounts.values() {
            if let Some(secret) = &account.webhook_secret {
                if let Some(existing) = secret_index.insert(secret.clone(), account.id.clone()) {
                    anyhow::bail!(
                        "webhook secret shared between accounts {existing} and {}",
                        account.id
                    );
                }
            }
        }

        info!(count = accounts.len(), "account registry loaded");
        Ok(Self {
            accounts,
            secret_index,
            legacy_default,
        })
    }

    fn load_legacy() -> anyhow::Result<Option<Account>> {
        let username = env::var("PROJECTX_USERNAME").ok();
        let api_key = env::var("PROJECTX_API_KEY").ok();
        let (username, api_key) = match (username, api_key) {
            (Some(u), Some(k)) => (u, k),
            _ => return Ok(None),
        };

        let broker_kind: BrokerKind = env::var("PROJECTX_BROKER")
            .unwrap_or_else(|_| "topstepx".to_string())
            .parse()
            .context("invalid PROJECTX_BROKER")?;
        let upstream_account_id = env::var("PROJECTX_ACCOUNT_ID")
            .ok()
            .and_then(|v| v.parse::<i64>().ok());
        let base_url = env::var("PROJECTX_BASE_URL")
            .unwrap_or_else(|_| broker_kind.default_base_url().to_string());

        Ok(Some(Account {
            id: "default".to_string(),
            display_name: "Default Account".to_string(),
            broker_kind,
            enabled: true,
            credentials: AccountCredentials {
                username,
                api_key,
                upstream_account_id,
                base_url,
            },
            webhook_secret: env::var("WEBHOOK_SECRET").ok(),
        }))
    }

    fn load_multi() -> anyhow::Result<Vec<Account>> {
        let mut ids = std::collections::BTreeSet::new();
        let prefix_re_len = "ACCOUNT_".len();
        for (key, _) in env::vars() {
            if let Some(rest) = key.strip_prefix("ACCOUNT_") {
                if let Some((id, _field)) = rest.split_once('_') {
                    if !id.is_empty() {
                        ids.insert(id.to_string());
                    }
                }
            }
            let _ = prefix_re_len;
        }

        let mut accounts = Vec::new();
        for id in ids {
            let get = |field: &str| env::var(format!("ACCOUNT_{id}_{field}")).ok();

            let (username, api_key) = match (get("USERNAME"), get("API_KEY")) {
                (Some(u), Some(k)) => (u, k),
                _ => {
                    warn!(account_id = %id, "skipping account missing username/api key");
                    continue;
                }
            };

            let broker_kind: BrokerKind = get("BROKER")
                .unwrap_or_else(|| "topstepx".to_string())
                .parse()
                .with_context(|| format!("invalid ACCOUNT_{id}_BROKER"))?;
            let base_url = get("BASE_URL").unwrap_or_else(|| broker_kind.default_base_url().to_string());
            let enabled = get("ENABLED")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(true);
            let upstream_account_id = get("ACCOUNT_ID").and_then(|v| v.parse::<i64>().ok());
            let display_name = get("NAME").unwrap_or_else(|| id.clone());

            accounts.push(Account {
                id: id.to_lowercase(),
                display_name,
                broker_kind,
                enabled,
                credentials: AccountCredentials {
                    username,
                    api_key,
                    upstream_account_id,
                    base_url,
                },
                webhook_secret: get("WEBHOOK_SECRET"),
            });
        }
        Ok(accounts)
    }

    /// Resolves a request's `secret` (and optional explicit `account`
    /// id) to the account that should handle it.
    pub fn resolve(
        &self,
        secret: &str,
        explicit_id: Option<&str>,
    ) -> Result<&Account, GatewayError> {
        let account = if let Some(id) = explicit_id {
            let id = id.to_lowercase();
            let account = self
                .accounts
                .get(&id)
                .ok_or_else(|| GatewayError::AccountNotFound {
                    account_id: id.clone(),
                })?;
            match &account.webhook_secret {
                Some(expected) if expected == secret => account,
                Some(_) => return Err(GatewayError::Unauthorized),
                None => account,
            }
        } else if let Some(id) = self.secret_index.get(secret) {
            self.accounts.get(id).expect("secret index is consistent")
        } else if let Some(id) = &self.legacy_default {
            let account = self.accounts.get(id).expect("legacy default exists");
            if account.webhook_secret.as_deref() == Some(secret) {
                account
            } else {
                return Err(GatewayError::Unauthorized);
            }
        } else {
            return Err(GatewayError::Unauthorized);
        };

        if !account.enabled {
            return Err(GatewayError::AccountDisabled {
                account_id: account.id.clone(),
            });
        }
        Ok(account)
    }

    pub fn get(&self, id: &str) -> Option<&Account> {
        self.accounts.get(id)
    }

    pub fn list(&self) -> Vec<AccountSummary> {
        self.accounts.values().map(Account::summary).collect()
    }

    pub fn list_enabled(&self) -> Vec<&Account> {
        self.accounts.values().filter(|a| a.enabled).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::AccountCredentials;

    fn test_account(id: &str, secret: Option<&str>, enabled: bool) -> Account {
        Account {
            id: id.to_string(),
            display_name: id.to_string(),
            broker_kind: BrokerKind::TopstepX,
            enabled,
            credentials: AccountCredentials {
                username: "u".into(),
                api_key: "k".into(),
                upstream_account_id: None,
                base_url: "https://example.invalid".into(),
            },
            webhook_secret: secret.map(str::to_string),
        }
    }

    fn registry_with(accounts: Vec<Account>) -> AccountRegistry {
        let mut secret_index = HashMap::new();
        let mut map = HashMap::new();
        for a in accounts {
            if let Some(s) = &a.webhook_secret {
                secret_index.insert(s.clone(), a.id.clone());
            }
            map.insert(a.id.clone(), a);
        }
        AccountRegistry {
            accounts: map,
            secret_index,
            legacy_default: None,
        }
    }

    #[test]
    fn resolves_by_secret_alone() {
        let reg = registry_with(vec![test_account("acct-a", Some("s3cret"), true)]);
        let acc = reg.resolve("s3cret", None).unwrap();
        assert_eq!(acc.id, "acct-a");
    }

    #[test]
    fn explicit_account_and_secret_must_match() {
        let reg = registry_with(vec![test_account("acct-a", Some("s3cret"), true)]);
        assert!(reg.resolve("wrong", Some("acct-a")).is_err());
        assert!(reg.resolve("s3cret", Some("acct-a")).is_ok());
    }

    #[test]
    fn unknown_secret_is_unauthorized() {
        let reg = registry_with(vec![test_account("acct-a", Some("s3cret"), true)]);
        match reg.resolve("nope", None) {
            Err(GatewayError::Unauthorized) => {}
            other => panic!("expected unauthorized, got {other:?}"),
        }
    }

    #[test]
    fn disabled_account_rejected_even_with_right_secret() {
        let reg = registry_with(vec![test_account("acct-a", Some("s3cret"), false)]);
        match reg.resolve("s3cret", None) {
            Err(GatewayError::AccountDisabled { account_id }) => assert_eq!(account_id, "acct-a"),
            other => panic!("expected disabled, got {other:?}"),
        }
    }
}
