use super::{Record, RecordBody, RecordLocation};
use crate::config::MetadataConfig;
use crate::kvs::KvsClient;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// Object row in a bucket's object list index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub content_type: String,
    pub etag: String,
    pub last_modified: String,
}

impl ObjectMetadata {
    pub fn new(bucket: &str, key: &str, data: &[u8], content_type: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: data.len() as u64,
            content_type: content_type.to_string(),
            etag: compute_etag(data),
            last_modified: Utc::now().to_rfc3339(),
        }
    }

    /// Object rows are not mirrored.
    pub fn record(
        kvs: Rc<dyn KvsClient>,
        object_list_index: &str,
        key: &str,
        config: &MetadataConfig,
        request_id: &str,
    ) -> Record<Self> {
        Record::new(
            kvs,
            RecordLocation {
                index: object_list_index.to_string(),
                replica: None,
                key: key.to_string(),
            },
            config,
            request_id,
        )
    }
}

impl RecordBody for ObjectMetadata {
    const ENTITY: &'static str = "object";
}

/// Quoted hex MD5, the way S3 reports ETags of single-part objects.
pub fn compute_etag(data: &[u8]) -> String {
    format!("\"{:x}\"", md5::compute(data))
}
