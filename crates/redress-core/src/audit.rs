//! Append-only audit log model.
//!
//! Every state-changing operation produces exactly one entry, committed in the
//! same transaction as the primary mutation. Entries are never mutated or
//! deleted.

use crate::types::{Complaint, ComplaintStatus, Domain};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    MarkSeen,
    Transfer,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::MarkSeen => "mark_seen",
            Self::Transfer => "transfer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "mark_seen" => Some(Self::MarkSeen),
            "transfer" => Some(Self::Transfer),
            _ => None,
        }
    }
}

/// Persisted audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub actor_id: i64,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: i64,
    pub old_values: Value,
    pub new_values: Value,
    pub timestamp: DateTime<Utc>,
}

/// Audit entry prepared by a store operation, persisted atomically with the
/// mutation it describes. The store assigns the id.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub actor_id: i64,
    pub action: AuditAction,
    pub resource_type: &'static str,
    pub resource_id: i64,
    pub old_values: Value,
    pub new_values: Value,
}

impl NewAuditEntry {
    pub fn complaint_created(actor_id: i64, complaint: &Complaint) -> Self {
        Self {
            actor_id,
            action: AuditAction::Create,
            resource_type: "complaint",
            resource_id: complaint.id,
            old_values: json!({}),
            new_values: json!({
                "title": complaint.title,
                "domain_id": complaint.domain_id,
                "status": complaint.status.as_str(),
                "priority": complaint.priority.as_str(),
            }),
        }
    }

    pub fn status_updated(actor_id: i64, old_status: ComplaintStatus, complaint: &Complaint) -> Self {
        Self {
            actor_id,
            action: AuditAction::Update,
            resource_type: "complaint",
            resource_id: complaint.id,
            old_values: json!({ "status": old_status.as_str() }),
            new_values: json!({
                "status": complaint.status.as_str(),
                "resolution_details": complaint.resolution_details,
            }),
        }
    }

    pub fn seen_acknowledged(actor_id: i64, previously_seen: bool, complaint: &Complaint) -> Self {
        Self {
            actor_id,
            action: AuditAction::MarkSeen,
            resource_type: "complaint",
            resource_id: complaint.id,
            old_values: json!({ "admin_seen": previously_seen }),
            new_values: json!({
                "admin_seen": true,
                "admin_read_at": complaint.admin_read_at,
            }),
        }
    }

    pub fn transferred(
        actor_id: i64,
        complaint_id: i64,
        from_domain_id: i64,
        to_domain_id: i64,
        reason: &str,
    ) -> Self {
        Self {
            actor_id,
            action: AuditAction::Transfer,
            resource_type: "complaint",
            resource_id: complaint_id,
            old_values: json!({ "domain_id": from_domain_id }),
            new_values: json!({ "domain_id": to_domain_id, "reason": reason }),
        }
    }

    pub fn domain_created(actor_id: i64, domain: &Domain) -> Self {
        Self {
            actor_id,
            action: AuditAction::Create,
            resource_type: "domain",
            resource_id: domain.id,
            old_values: json!({}),
            new_values: json!({ "name": domain.name, "description": domain.description }),
        }
    }

    pub fn into_entry(self, id: i64, timestamp: DateTime<Utc>) -> AuditEntry {
        AuditEntry {
            id,
            actor_id: self.actor_id,
            action: self.action,
            resource_type: self.resource_type.to_string(),
            resource_id: self.resource_id,
            old_values: self.old_values,
            new_values: self.new_values,
            timestamp,
        }
    }
}

/// Paged audit trail query.
#[derive(Debug, Clone, Copy)]
pub struct AuditQuery {
    pub action: Option<AuditAction>,
    pub actor_id: Option<i64>,
    pub limit: usize,
    pub offset: usize,
    pub ascending: bool,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            action: None,
            actor_id: None,
            limit: 100,
            offset: 0,
            ascending: false,
        }
    }
}

impl AuditQuery {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.action.map_or(true, |a| entry.action == a)
            && self.actor_id.map_or(true, |id| entry.actor_id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_string_roundtrip() {
        let actions = [
            AuditAction::Create,
            AuditAction::Update,
            AuditAction::MarkSeen,
            AuditAction::Transfer,
        ];

        for action in actions {
            assert_eq!(AuditAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(AuditAction::parse("delete"), None);
    }

    #[test]
    fn transfer_entry_captures_both_domains() {
        let entry = NewAuditEntry::transferred(4, 11, 1, 2, "wrong department");
        assert_eq!(entry.old_values["domain_id"], 1);
        assert_eq!(entry.new_values["domain_id"], 2);
        assert_eq!(entry.new_values["reason"], "wrong department");
    }
}
