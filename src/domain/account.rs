//! Account descriptors: the immutable routing table between an inbound
//! webhook secret and a brokerage account's credentials.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    TopstepX,
    FuturesDesk,
}

impl std::str::FromStr for BrokerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "topstepx" => Ok(BrokerKind::TopstepX),
            "futuresdesk" => Ok(BrokerKind::FuturesDesk),
            _ => anyhow::bail!("unknown broker kind: {s}"),
        }
    }
}

impl BrokerKind {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            BrokerKind::TopstepX => "https://api.topstepx.com/api",
            BrokerKind::FuturesDesk => "https://api.futuresdesk.projectx.com/api",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccountCredentials {
    pub username: String,
    pub api_key: String,
    /// Upstream numeric account id, if already known. Resolved lazily via
    /// `Account/search` otherwise.
    pub upstream_account_id: Option<i64>,
    pub base_url: String,
}

/// An immutable routing/credential record for one brokerage account.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: String,
    pub display_name: String,
    pub broker_kind: BrokerKind,
    pub enabled: bool,
    pub credentials: AccountCredentials,
    pub webhook_secret: Option<String>,
}

/// Non-sensitive view of an account, safe to return over HTTP.
#[derive(Debug, Clone, Serialize)]
pub struct AccountSummary {
    pub id: String,
    pub display_name: String,
    pub broker_kind: BrokerKind,
    pub enabled: bool,
    pub has_webhook_secret: bool,
}

impl Account {
    pub fn summary(&self) -> AccountSummary {
        AccountSummary {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            broker_kind: self.broker_kind,
            enabled: self.enabled,
            has_webhook_secret: self.webhook_secret.is_some(),
        }
    }
}
