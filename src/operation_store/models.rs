use serde::Serialize;
use serde_json::Value as JsonValue;

/// Business-level status of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Completed,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OperationStatus::Pending),
            "completed" => Some(OperationStatus::Completed),
            "failed" => Some(OperationStatus::Failed),
            _ => None,
        }
    }
}

/// Operation as requested by a user, before any job ran.
#[derive(Debug, Clone)]
pub struct NewOperation {
    pub id: String,
    pub user_id: String,
    pub operation_type: String,
}

/// Externally visible record of an operation and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    pub id: String,
    pub user_id: String,
    pub operation_type: String,
    pub status: OperationStatus,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
    pub retry_count: u32,
}
