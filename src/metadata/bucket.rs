use super::{Record, RecordBody, RecordLocation};
use crate::config::MetadataConfig;
use crate::kvs::{
    IndexOid, KvsClient, BUCKET_METADATA_LIST_INDEX, GLOBAL_BUCKET_LIST_INDEX,
    REPLICA_BUCKET_METADATA_LIST_INDEX, REPLICA_GLOBAL_BUCKET_LIST_INDEX,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// Row of the global bucket list: which account owns a bucket name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalBucketEntry {
    pub account_name: String,
    pub account_id: String,
    pub location_constraint: String,
    pub create_timestamp: String,
}

impl GlobalBucketEntry {
    pub fn new(account_id: &str, account_name: &str, location_constraint: &str) -> Self {
        Self {
            account_name: account_name.to_string(),
            account_id: account_id.to_string(),
            location_constraint: location_constraint.to_string(),
            create_timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn record(
        kvs: Rc<dyn KvsClient>,
        bucket: &str,
        config: &MetadataConfig,
        request_id: &str,
    ) -> Record<Self> {
        Record::new(
            kvs,
            RecordLocation {
                index: GLOBAL_BUCKET_LIST_INDEX.to_string(),
                replica: Some(REPLICA_GLOBAL_BUCKET_LIST_INDEX.to_string()),
                key: bucket.to_string(),
            },
            config,
            request_id,
        )
    }
}

impl RecordBody for GlobalBucketEntry {
    const ENTITY: &'static str = "global_bucket";
}

/// Per-account bucket metadata. Owns the bucket's object list index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketMetadata {
    pub bucket_name: String,
    pub account_id: String,
    pub account_name: String,
    pub create_timestamp: String,
    pub location_constraint: String,
    #[serde(default)]
    pub object_list_index: Option<String>,
    #[serde(default)]
    pub object_list_index_oid: Option<IndexOid>,
}

impl BucketMetadata {
    pub fn new(bucket: &str, account_id: &str, account_name: &str, location_constraint: &str) -> Self {
        Self {
            bucket_name: bucket.to_string(),
            account_id: account_id.to_string(),
            account_name: account_name.to_string(),
            create_timestamp: Utc::now().to_rfc3339(),
            location_constraint: location_constraint.to_string(),
            object_list_index: None,
            object_list_index_oid: None,
        }
    }

    pub fn key(account_id: &str, bucket: &str) -> String {
        format!("{}/{}", account_id, bucket)
    }

    pub fn record(
        kvs: Rc<dyn KvsClient>,
        account_id: &str,
        bucket: &str,
        config: &MetadataConfig,
        request_id: &str,
    ) -> Record<Self> {
        Record::new(
            kvs,
            RecordLocation {
                index: BUCKET_METADATA_LIST_INDEX.to_string(),
                replica: Some(REPLICA_BUCKET_METADATA_LIST_INDEX.to_string()),
                key: Self::key(account_id, bucket),
            },
            config,
            request_id,
        )
    }
}

impl RecordBody for BucketMetadata {
    const ENTITY: &'static str = "bucket";

    fn index_base_name(&self) -> Option<String> {
        match self.object_list_index {
            Some(_) => None,
            None => Some(format!("BUCKET/{}", self.bucket_name)),
        }
    }

    fn set_index(&mut self, name: String, oid: IndexOid) {
        self.object_list_index = Some(name);
        self.object_list_index_oid = Some(oid);
    }
}
