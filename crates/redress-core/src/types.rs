use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed role variant. Sub-admin affiliation travels with the role so a
/// scoped check can never be separated from the domain it applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Role {
    Student,
    SubAdmin { domain_id: i64 },
    SuperAdmin,
}

/// Authenticated principal for the duration of one request.
///
/// Actors are only ever constructed by the credential verifier, and only for
/// valid, active accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: i64,
    #[serde(flatten)]
    pub role: Role,
}

impl Actor {
    pub fn student(id: i64) -> Self {
        Self {
            id,
            role: Role::Student,
        }
    }

    pub fn sub_admin(id: i64, domain_id: i64) -> Self {
        Self {
            id,
            role: Role::SubAdmin { domain_id },
        }
    }

    pub fn super_admin(id: i64) -> Self {
        Self {
            id,
            role: Role::SuperAdmin,
        }
    }
}

/// Organizational department owning a subset of complaints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub id: i64,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDomain {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplaintStatus {
    Pending,
    InProgress,
    Resolved,
    Rejected,
}

impl ComplaintStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "resolved" => Some(Self::Resolved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// Full complaint record.
///
/// `domain_id` only changes through a transfer, `student_id` never changes.
/// `resolved_at` is set exactly when a transition to `Resolved` supplies
/// non-empty resolution details, and is never cleared afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Complaint {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub domain_id: i64,
    pub student_id: i64,
    pub status: ComplaintStatus,
    pub priority: Priority,
    pub resolution_details: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub admin_seen: bool,
    pub admin_read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Redacted projection served on the unauthenticated resolved listing.
/// Carries no student identity and no status history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicComplaint {
    pub id: i64,
    pub title: String,
    pub resolution_details: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub domain_name: String,
}

/// Validated creation input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewComplaint {
    pub title: String,
    pub description: String,
    pub domain_id: i64,
    pub priority: Priority,
}

impl NewComplaint {
    pub fn new(title: impl Into<String>, description: impl Into<String>, domain_id: i64) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            domain_id,
            priority: Priority::default(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Status transition applied by `update_status`.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub status: ComplaintStatus,
    /// Non-empty details accompanying a `Resolved` transition. Already
    /// normalized by the lifecycle: never `Some` with a blank string.
    pub resolution_details: Option<String>,
}

/// Listing filters, intersected with the actor's visibility scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComplaintFilter {
    pub status: Option<ComplaintStatus>,
    pub priority: Option<Priority>,
    pub domain_id: Option<i64>,
}

impl ComplaintFilter {
    pub fn matches(&self, complaint: &Complaint) -> bool {
        self.status.map_or(true, |s| complaint.status == s)
            && self.priority.map_or(true, |p| complaint.priority == p)
            && self.domain_id.map_or(true, |d| complaint.domain_id == d)
    }
}

/// Immutable record of a domain reassignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: i64,
    pub complaint_id: i64,
    pub from_domain_id: i64,
    pub to_domain_id: i64,
    pub transferred_by: i64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Per-status counts over the actor's visible slice.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub in_progress: u64,
    pub resolved: u64,
    pub rejected: u64,
    pub total: u64,
    pub unseen: u64,
}
