use super::{Record, RecordBody, RecordLocation};
use crate::config::MetadataConfig;
use crate::kvs::{IndexOid, KvsClient, ACCOUNT_USER_INDEX};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// Account registration row. Owns the account's bucket list index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountUserIndex {
    pub account_id: String,
    #[serde(default)]
    pub bucket_list_index: Option<String>,
    #[serde(default)]
    pub bucket_list_index_oid: Option<IndexOid>,
}

impl AccountUserIndex {
    pub fn new(account_id: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            bucket_list_index: None,
            bucket_list_index_oid: None,
        }
    }

    pub fn key(account_id: &str) -> String {
        format!("ACCOUNTUSER/{}", account_id)
    }

    pub fn record(
        kvs: Rc<dyn KvsClient>,
        account_id: &str,
        config: &MetadataConfig,
        request_id: &str,
    ) -> Record<Self> {
        Record::new(
            kvs,
            RecordLocation {
                index: ACCOUNT_USER_INDEX.to_string(),
                replica: None,
                key: Self::key(account_id),
            },
            config,
            request_id,
        )
    }

    pub fn has_index(&self) -> bool {
        self.bucket_list_index.is_some()
    }
}

impl RecordBody for AccountUserIndex {
    const ENTITY: &'static str = "account_user_index";

    fn index_base_name(&self) -> Option<String> {
        match self.bucket_list_index {
            Some(_) => None,
            None => Some(Self::key(&self.account_id)),
        }
    }

    fn set_index(&mut self, name: String, oid: IndexOid) {
        self.bucket_list_index = Some(name);
        self.bucket_list_index_oid = Some(oid);
    }
}
