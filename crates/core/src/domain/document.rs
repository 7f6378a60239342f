use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Text view of one CSV row, ready to be embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredDocument {
    pub id: Uuid,
    pub text: String,
    pub metadata: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredDocument {
    #[serde(flatten)]
    pub document: StoredDocument,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub dimension: usize,
    pub documents: u64,
    pub created_at: DateTime<Utc>,
}
