//! Request item types: the unit of admitted work and its classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a request item.
pub type RequestId = Uuid;

/// Scheduling class derived from admission priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueClass {
    Hot,
    Warm,
    Cold,
}

impl QueueClass {
    /// Default dequeue order: strict class priority.
    pub const ALL: [QueueClass; 3] = [QueueClass::Hot, QueueClass::Warm, QueueClass::Cold];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueClass::Hot => "hot",
            QueueClass::Warm => "warm",
            QueueClass::Cold => "cold",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            QueueClass::Hot => 0,
            QueueClass::Warm => 1,
            QueueClass::Cold => 2,
        }
    }
}

impl std::fmt::Display for QueueClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hot" => Ok(QueueClass::Hot),
            "warm" => Ok(QueueClass::Warm),
            "cold" => Ok(QueueClass::Cold),
            other => Err(format!("unknown queue class: {other}")),
        }
    }
}

/// Kind of work a request performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Search,
    Embedding,
    Inference,
    Ingestion,
}

/// Lifecycle state of a request item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Processing,
    Throttled,
    Completed,
    Failed,
}

impl RequestStatus {
    /// Waiting to run: Pending, or paused by the throttle gate.
    pub fn is_queued(&self) -> bool {
        matches!(self, RequestStatus::Pending | RequestStatus::Throttled)
    }

    /// Counts against `max_concurrent_requests`.
    pub fn is_active(&self) -> bool {
        self.is_queued() || *self == RequestStatus::Processing
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStatus::Pending => write!(f, "pending"),
            RequestStatus::Processing => write!(f, "processing"),
            RequestStatus::Throttled => write!(f, "throttled"),
            RequestStatus::Completed => write!(f, "completed"),
            RequestStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Arguments to an enqueue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub tenant_id: String,
    pub user_id: String,
    pub operation_type: OperationType,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Estimated cost in demand cost units.
    #[serde(default)]
    pub estimated_cost: f64,
    #[serde(default)]
    pub interactive: bool,
    /// Input size used for the size bonus. Defaults to the encoded payload length.
    #[serde(default)]
    pub input_size: Option<u64>,
    #[serde(default)]
    pub estimated_duration_ms: Option<u64>,
}

impl EnqueueRequest {
    pub fn new(
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
        operation_type: OperationType,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            operation_type,
            payload: serde_json::Value::Null,
            estimated_cost: 0.0,
            interactive: false,
            input_size: None,
            estimated_duration_ms: None,
        }
    }

    pub fn with_input_size(mut self, size: u64) -> Self {
        self.input_size = Some(size);
        self
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn effective_input_size(&self) -> u64 {
        self.input_size.unwrap_or_else(|| match &self.payload {
            serde_json::Value::Null => 0,
            other => other.to_string().len() as u64,
        })
    }
}

/// A unit of admitted work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestItem {
    pub id: RequestId,
    pub tenant_id: String,
    pub user_id: String,
    pub operation_type: OperationType,
    pub queue_class: QueueClass,

    /// Current priority in `[0, 100]`. Never decreases while queued.
    pub priority: u8,

    /// Priority computed at admission; boosting is measured from here.
    pub base_priority: u8,

    pub estimated_cost: f64,
    pub estimated_duration_ms: u64,
    pub payload: serde_json::Value,
    pub status: RequestStatus,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Last sign of life from the claiming worker.
    pub heartbeat_at: Option<DateTime<Utc>>,

    pub worker_id: Option<String>,
    pub retry_count: u32,
    pub actual_cost: Option<f64>,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_predicates() {
        assert!(RequestStatus::Throttled.is_queued());
        assert!(RequestStatus::Processing.is_active());
        assert!(!RequestStatus::Processing.is_queued());
        assert!(RequestStatus::Failed.is_terminal());
        assert!(!RequestStatus::Completed.is_active());
    }

    #[test]
    fn test_queue_class_parse() {
        assert_eq!("Cold".parse::<QueueClass>(), Ok(QueueClass::Cold));
        assert!("lukewarm".parse::<QueueClass>().is_err());
    }

    #[test]
    fn test_input_size_falls_back_to_payload() {
        let req = EnqueueRequest::new("t", "u", OperationType::Search)
            .with_payload(serde_json::json!({"q": "abc"}));
        assert_eq!(req.effective_input_size(), r#"{"q":"abc"}"#.len() as u64);
        assert_eq!(req.with_input_size(7).effective_input_size(), 7);
    }
}
