use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::types::{Account, Category, NewTransaction, Transaction};

/// Ledger operations the conversation flows depend on.
#[async_trait]
pub trait LedgerApi: Send + Sync {
    async fn accounts(&self) -> Result<Vec<Account>>;
    async fn categories(&self) -> Result<Vec<Category>>;
    async fn create_transaction(&self, new: &NewTransaction) -> Result<Transaction>;
    /// Transactions still without a category, oldest first.
    async fn uncategorized(&self, limit: usize) -> Result<Vec<Transaction>>;
    async fn set_category(&self, transaction_id: &str, category_id: &str) -> Result<()>;
}

/// REST client for the ledger's JSON API. Bearer-authenticated; every
/// path lives under the configured budget.
pub struct LedgerClient {
    client: Client,
    base_url: String,
    api_key: String,
    budget: String,
}

impl LedgerClient {
    pub fn new(base_url: String, api_key: String, budget: String) -> Self {
        info!(budget = %budget, "creating ledger client");
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            budget,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/budgets/{}/{path}", self.base_url, self.budget)
    }

    async fn read_json<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request.bearer_auth(&self.api_key).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api { status, body });
        }
        let payload = response.text().await?;
        Ok(serde_json::from_str(&payload)?)
    }
}

#[async_trait]
impl LedgerApi for LedgerClient {
    async fn accounts(&self) -> Result<Vec<Account>> {
        debug!("fetching accounts");
        self.read_json(self.client.get(self.url("accounts"))).await
    }

    async fn categories(&self) -> Result<Vec<Category>> {
        debug!("fetching categories");
        self.read_json(self.client.get(self.url("categories"))).await
    }

    async fn create_transaction(&self, new: &NewTransaction) -> Result<Transaction> {
        info!(payee = %new.payee, amount_minor = new.amount_minor, "posting transaction");
        self.read_json(self.client.post(self.url("transactions")).json(new))
            .await
    }

    async fn uncategorized(&self, limit: usize) -> Result<Vec<Transaction>> {
        debug!(limit, "fetching uncategorized transactions");
        self.read_json(
            self.client
                .get(self.url("transactions"))
                .query(&[("uncategorized", "true"), ("limit", &limit.to_string())]),
        )
        .await
    }

    async fn set_category(&self, transaction_id: &str, category_id: &str) -> Result<()> {
        info!(transaction_id, category_id, "setting category");
        let _: Transaction = self
            .read_json(
                self.client
                    .patch(self.url(&format!("transactions/{transaction_id}")))
                    .json(&json!({ "category_id": category_id })),
            )
            .await?;
        Ok(())
    }
}
