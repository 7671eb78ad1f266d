//! Static partner directory
//!
//! A fixed table of partner-bank accounts, loaded from config. Backs the
//! sandbox binary where no real network endpoint is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{BankNetwork, ExternalIdentity, NetworkError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub institution_code: String,
    pub institution_name: String,
    pub account_number: String,
    pub account_name: String,
}

#[derive(Debug, Default)]
pub struct StaticBankNetwork {
    entries: HashMap<(String, String), ExternalIdentity>,
}

impl StaticBankNetwork {
    pub fn new(entries: Vec<DirectoryEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|e| {
                (
                    (e.institution_code, e.account_number),
                    ExternalIdentity {
                        account_name: e.account_name,
                        institution_name: e.institution_name,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl BankNetwork for StaticBankNetwork {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn lookup(
        &self,
        institution_code: &str,
        account_number: &str,
    ) -> Result<Option<ExternalIdentity>, NetworkError> {
        Ok(self
            .entries
            .get(&(institution_code.to_string(), account_number.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_lookup() {
        let network = StaticBankNetwork::new(vec![DirectoryEntry {
            institution_code: "058".into(),
            institution_name: "Partner Bank".into(),
            account_number: "2000000001".into(),
            account_name: "Ada Obi".into(),
        }]);

        let found = network.lookup("058", "2000000001").await.unwrap();
        assert_eq!(found.unwrap().account_name, "Ada Obi");

        assert_eq!(network.lookup("058", "2000000009").await, Ok(None));
        assert_eq!(network.lookup("011", "2000000001").await, Ok(None));
    }
}
