//! Complaint lifecycle manager.
//!
//! `ComplaintDesk` validates input, consults the authorization policy, and
//! drives scoped store operations. Status transitions are deliberately
//! unconstrained across the four enumerated values; the invariant that is
//! enforced is around resolution: `resolved_at` and the resolution details are
//! only written by a `Resolved` transition carrying non-empty details, and are
//! never cleared by later transitions.

use crate::audit::{AuditEntry, AuditQuery};
use crate::error::RedressError;
use crate::policy;
use crate::store::ComplaintStore;
use crate::types::{
    Actor, Complaint, ComplaintFilter, ComplaintStatus, Domain, NewComplaint, NewDomain,
    PublicComplaint, StatusChange, StatusCounts, TransferRecord,
};
use std::sync::Arc;

const TITLE_MIN: usize = 5;
const TITLE_MAX: usize = 255;
const DESCRIPTION_MIN: usize = 10;
const REASON_MIN: usize = 5;

pub struct ComplaintDesk {
    store: Arc<dyn ComplaintStore>,
}

impl ComplaintDesk {
    pub fn new(store: Arc<dyn ComplaintStore>) -> Self {
        Self { store }
    }

    /// File a new complaint. Students only; lands in `Pending`.
    pub async fn create(
        &self,
        actor: &Actor,
        new: NewComplaint,
    ) -> Result<Complaint, RedressError> {
        policy::require_student(actor)?;
        validate_length("title", &new.title, TITLE_MIN, Some(TITLE_MAX))?;
        validate_length("description", &new.description, DESCRIPTION_MIN, None)?;

        if self.store.find_domain(new.domain_id).await?.is_none() {
            return Err(RedressError::InvalidDomain(new.domain_id));
        }

        self.store.insert_complaint(actor.id, new).await
    }

    /// Scoped listing, most recent first.
    pub async fn list(
        &self,
        actor: &Actor,
        filter: ComplaintFilter,
    ) -> Result<Vec<Complaint>, RedressError> {
        let scope = policy::visibility(actor);
        self.store.list_complaints(scope, filter).await
    }

    /// Scoped lookup. A miss is `NotFound` for every role; out-of-scope rows
    /// are never distinguished from absent ones.
    pub async fn get(&self, actor: &Actor, id: i64) -> Result<Complaint, RedressError> {
        let scope = policy::visibility(actor);
        self.store
            .find_complaint(scope, id)
            .await?
            .ok_or(RedressError::NotFound)
    }

    /// Unauthenticated listing of resolved complaints, redacted.
    pub async fn list_public(&self) -> Result<Vec<PublicComplaint>, RedressError> {
        self.store.list_public_resolved().await
    }

    /// Apply a status change. Admin roles only; sub-admins act within their
    /// domain scope.
    pub async fn update_status(
        &self,
        actor: &Actor,
        id: i64,
        status: ComplaintStatus,
        resolution_details: Option<String>,
    ) -> Result<Complaint, RedressError> {
        let scope = policy::require_admin(actor)?;
        let change = StatusChange {
            status,
            resolution_details: normalize_details(resolution_details),
        };

        self.store
            .update_status(actor.id, scope, id, change)
            .await?
            .ok_or(RedressError::NotFound)
    }

    /// Acknowledge a complaint. Idempotent on `admin_seen`; `admin_read_at`
    /// always reflects the latest acknowledgement.
    pub async fn mark_seen(&self, actor: &Actor, id: i64) -> Result<Complaint, RedressError> {
        let scope = policy::require_admin(actor)?;
        self.store
            .mark_seen(actor.id, scope, id)
            .await?
            .ok_or(RedressError::NotFound)
    }

    /// Reassign a complaint to another domain, recording the transfer.
    pub async fn transfer(
        &self,
        actor: &Actor,
        id: i64,
        to_domain_id: i64,
        reason: String,
    ) -> Result<Complaint, RedressError> {
        let scope = policy::require_admin(actor)?;
        validate_length("reason", &reason, REASON_MIN, None)?;

        if self.store.find_domain(to_domain_id).await?.is_none() {
            return Err(RedressError::InvalidDomain(to_domain_id));
        }

        self.store
            .transfer(actor.id, scope, id, to_domain_id, reason)
            .await?
            .ok_or(RedressError::NotFound)
    }

    /// Transfer history for a visible complaint, oldest first.
    pub async fn transfer_history(
        &self,
        actor: &Actor,
        id: i64,
    ) -> Result<Vec<TransferRecord>, RedressError> {
        let scope = policy::require_admin(actor)?;
        self.store
            .list_transfers(scope, id)
            .await?
            .ok_or(RedressError::NotFound)
    }

    /// Paged audit trail. Super-admin only.
    pub async fn audit_trail(
        &self,
        actor: &Actor,
        query: AuditQuery,
    ) -> Result<(u64, Vec<AuditEntry>), RedressError> {
        policy::require_super_admin(actor)?;
        self.store.list_audit(query).await
    }

    /// Status counts over the actor's visible slice.
    pub async fn dashboard(&self, actor: &Actor) -> Result<StatusCounts, RedressError> {
        let scope = policy::require_admin(actor)?;
        self.store.status_counts(scope).await
    }

    pub async fn create_domain(
        &self,
        actor: &Actor,
        new: NewDomain,
    ) -> Result<Domain, RedressError> {
        policy::require_super_admin(actor)?;
        if new.name.trim().is_empty() {
            return Err(RedressError::validation("domain name must not be empty"));
        }

        self.store.insert_domain(actor.id, new).await
    }

    pub async fn list_domains(&self, _actor: &Actor) -> Result<Vec<Domain>, RedressError> {
        self.store.list_domains().await
    }
}

fn validate_length(
    field: &str,
    value: &str,
    min: usize,
    max: Option<usize>,
) -> Result<(), RedressError> {
    let len = value.chars().count();
    if len < min {
        return Err(RedressError::Validation(format!(
            "{field} must be at least {min} characters"
        )));
    }
    if let Some(max) = max {
        if len > max {
            return Err(RedressError::Validation(format!(
                "{field} must be at most {max} characters"
            )));
        }
    }
    Ok(())
}

/// Blank details are treated as not supplied.
fn normalize_details(details: Option<String>) -> Option<String> {
    details.filter(|d| !d.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditAction;
    use crate::store::MemoryStore;
    use crate::types::Priority;

    struct Fixture {
        desk: ComplaintDesk,
        student: Actor,
        other_student: Actor,
        facilities_admin: Actor,
        it_admin: Actor,
        root: Actor,
    }

    /// Two domains: Facilities (1) and IT Services (2).
    async fn fixture() -> Fixture {
        let desk = ComplaintDesk::new(Arc::new(MemoryStore::new()));
        let root = Actor::super_admin(100);
        desk.create_domain(
            &root,
            NewDomain {
                name: "Facilities".to_string(),
                description: "Buildings and grounds".to_string(),
            },
        )
        .await
        .unwrap();
        desk.create_domain(
            &root,
            NewDomain {
                name: "IT Services".to_string(),
                description: "Campus network and labs".to_string(),
            },
        )
        .await
        .unwrap();

        Fixture {
            desk,
            student: Actor::student(10),
            other_student: Actor::student(11),
            facilities_admin: Actor::sub_admin(20, 1),
            it_admin: Actor::sub_admin(21, 2),
            root,
        }
    }

    #[tokio::test]
    async fn only_students_can_create() {
        let f = fixture().await;
        let new = NewComplaint::new("Leaking tap in block A", "Tap has been leaking for a week", 1);

        let err = f.desk.create(&f.facilities_admin, new.clone()).await.unwrap_err();
        assert!(matches!(err, RedressError::PermissionDenied));

        let complaint = f.desk.create(&f.student, new).await.unwrap();
        assert_eq!(complaint.status, ComplaintStatus::Pending);
        assert_eq!(complaint.student_id, f.student.id);
        assert_eq!(complaint.priority, Priority::Medium);
    }

    #[tokio::test]
    async fn create_rejects_short_fields() {
        let f = fixture().await;

        let err = f
            .desk
            .create(&f.student, NewComplaint::new("Tap", "Tap has been leaking for a week", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, RedressError::Validation(_)));

        let err = f
            .desk
            .create(&f.student, NewComplaint::new("Leaking tap", "too short", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, RedressError::Validation(_)));
    }

    #[tokio::test]
    async fn create_with_unknown_domain_leaves_no_trace() {
        let f = fixture().await;

        let err = f
            .desk
            .create(
                &f.student,
                NewComplaint::new("Leaking tap in block A", "Tap has been leaking for a week", 99),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RedressError::InvalidDomain(99)));

        let complaints = f
            .desk
            .list(&f.root, ComplaintFilter::default())
            .await
            .unwrap();
        assert!(complaints.is_empty());

        let (_, entries) = f
            .desk
            .audit_trail(&f.root, AuditQuery::default())
            .await
            .unwrap();
        assert!(entries
            .iter()
            .all(|e| e.resource_type != "complaint"));
    }

    #[tokio::test]
    async fn students_list_exactly_their_own_complaints() {
        let f = fixture().await;
        let mine = f
            .desk
            .create(&f.student, NewComplaint::new("Leaking tap in block A", "Tap has been leaking for a week", 1))
            .await
            .unwrap();
        f.desk
            .create(&f.other_student, NewComplaint::new("Slow wifi in dorms", "Dorm wifi drops every evening", 1))
            .await
            .unwrap();

        let listed = f
            .desk
            .list(&f.student, ComplaintFilter::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, mine.id);
        assert!(listed.iter().all(|c| c.student_id == f.student.id));
    }

    #[tokio::test]
    async fn sub_admins_see_only_their_domain() {
        let f = fixture().await;
        let facilities = f
            .desk
            .create(&f.student, NewComplaint::new("Leaking tap in block A", "Tap has been leaking for a week", 1))
            .await
            .unwrap();
        f.desk
            .create(&f.student, NewComplaint::new("Slow wifi in dorms", "Dorm wifi drops every evening", 2))
            .await
            .unwrap();

        let listed = f
            .desk
            .list(&f.facilities_admin, ComplaintFilter::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].domain_id, 1);

        // Cross-domain access is a plain miss, never a permission failure.
        let err = f.desk.get(&f.it_admin, facilities.id).await.unwrap_err();
        assert!(matches!(err, RedressError::NotFound));
        let err = f
            .desk
            .update_status(&f.it_admin, facilities.id, ComplaintStatus::InProgress, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RedressError::NotFound));
    }

    #[tokio::test]
    async fn listing_is_most_recent_first() {
        let f = fixture().await;
        let first = f
            .desk
            .create(&f.student, NewComplaint::new("Leaking tap in block A", "Tap has been leaking for a week", 1))
            .await
            .unwrap();
        let second = f
            .desk
            .create(&f.student, NewComplaint::new("Broken chair in library", "Chair on the second floor collapsed", 1))
            .await
            .unwrap();

        let listed = f
            .desk
            .list(&f.student, ComplaintFilter::default())
            .await
            .unwrap();
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
    }

    #[tokio::test]
    async fn students_cannot_mutate() {
        let f = fixture().await;
        let complaint = f
            .desk
            .create(&f.student, NewComplaint::new("Leaking tap in block A", "Tap has been leaking for a week", 1))
            .await
            .unwrap();

        for result in [
            f.desk
                .update_status(&f.student, complaint.id, ComplaintStatus::Resolved, None)
                .await
                .err(),
            f.desk.mark_seen(&f.student, complaint.id).await.err(),
            f.desk
                .transfer(&f.student, complaint.id, 2, "wrong department".to_string())
                .await
                .err(),
        ] {
            assert!(matches!(result, Some(RedressError::PermissionDenied)));
        }
    }

    #[tokio::test]
    async fn resolution_stamps_timestamp_and_details() {
        let f = fixture().await;
        let complaint = f
            .desk
            .create(&f.student, NewComplaint::new("Leaking tap in block A", "Tap has been leaking for a week", 1))
            .await
            .unwrap();

        let resolved = f
            .desk
            .update_status(
                &f.facilities_admin,
                complaint.id,
                ComplaintStatus::Resolved,
                Some("Plumber fixed it".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(resolved.status, ComplaintStatus::Resolved);
        assert_eq!(resolved.resolution_details.as_deref(), Some("Plumber fixed it"));
        assert!(resolved.resolved_at.unwrap() >= resolved.created_at);

        // Reverting does not clear the resolution stamp.
        let reverted = f
            .desk
            .update_status(&f.facilities_admin, complaint.id, ComplaintStatus::Pending, None)
            .await
            .unwrap();
        assert_eq!(reverted.resolved_at, resolved.resolved_at);
    }

    #[tokio::test]
    async fn blank_resolution_details_are_ignored() {
        let f = fixture().await;
        let complaint = f
            .desk
            .create(&f.student, NewComplaint::new("Leaking tap in block A", "Tap has been leaking for a week", 1))
            .await
            .unwrap();

        let resolved = f
            .desk
            .update_status(
                &f.facilities_admin,
                complaint.id,
                ComplaintStatus::Resolved,
                Some("   ".to_string()),
            )
            .await
            .unwrap();
        assert!(resolved.resolved_at.is_none());
        assert!(resolved.resolution_details.is_none());
    }

    #[tokio::test]
    async fn update_writes_audit_entry_with_old_and_new_status() {
        let f = fixture().await;
        let complaint = f
            .desk
            .create(&f.student, NewComplaint::new("Leaking tap in block A", "Tap has been leaking for a week", 1))
            .await
            .unwrap();
        f.desk
            .update_status(&f.facilities_admin, complaint.id, ComplaintStatus::InProgress, None)
            .await
            .unwrap();

        let (_, entries) = f
            .desk
            .audit_trail(&f.root, AuditQuery::default())
            .await
            .unwrap();
        let update = entries
            .iter()
            .find(|e| e.action == AuditAction::Update)
            .unwrap();
        assert_eq!(update.actor_id, f.facilities_admin.id);
        assert_eq!(update.old_values["status"], "pending");
        assert_eq!(update.new_values["status"], "in_progress");
    }

    #[tokio::test]
    async fn mark_seen_is_idempotent_with_refreshed_read_time() {
        let f = fixture().await;
        let complaint = f
            .desk
            .create(&f.student, NewComplaint::new("Leaking tap in block A", "Tap has been leaking for a week", 1))
            .await
            .unwrap();

        let first = f.desk.mark_seen(&f.facilities_admin, complaint.id).await.unwrap();
        let second = f.desk.mark_seen(&f.facilities_admin, complaint.id).await.unwrap();
        assert!(second.admin_seen);
        assert!(second.admin_read_at.unwrap() >= first.admin_read_at.unwrap());
    }

    #[tokio::test]
    async fn transfer_validates_target_domain() {
        let f = fixture().await;
        let complaint = f
            .desk
            .create(&f.student, NewComplaint::new("Slow wifi in dorms", "Dorm wifi drops every evening", 1))
            .await
            .unwrap();

        let err = f
            .desk
            .transfer(&f.facilities_admin, complaint.id, 99, "belongs to IT".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, RedressError::InvalidDomain(99)));

        let err = f
            .desk
            .transfer(&f.facilities_admin, complaint.id, 1, "already there".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, RedressError::SameDomainTransfer(1)));

        let err = f
            .desk
            .transfer(&f.facilities_admin, complaint.id, 2, "why".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, RedressError::Validation(_)));
    }

    #[tokio::test]
    async fn sub_admin_transfers_only_from_own_domain() {
        let f = fixture().await;
        let complaint = f
            .desk
            .create(&f.student, NewComplaint::new("Slow wifi in dorms", "Dorm wifi drops every evening", 1))
            .await
            .unwrap();

        // The IT admin cannot reach into Facilities, even to pull a complaint
        // toward their own domain.
        let err = f
            .desk
            .transfer(&f.it_admin, complaint.id, 2, "belongs to IT".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, RedressError::NotFound));

        let moved = f
            .desk
            .transfer(&f.facilities_admin, complaint.id, 2, "belongs to IT".to_string())
            .await
            .unwrap();
        assert_eq!(moved.domain_id, 2);

        let history = f.desk.transfer_history(&f.it_admin, complaint.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].transferred_by, f.facilities_admin.id);

        // After the move the complaint left the facilities admin's scope.
        let err = f
            .desk
            .get(&f.facilities_admin, complaint.id)
            .await
            .unwrap_err();
        assert!(matches!(err, RedressError::NotFound));
    }

    #[tokio::test]
    async fn audit_trail_is_super_admin_only() {
        let f = fixture().await;
        let err = f
            .desk
            .audit_trail(&f.facilities_admin, AuditQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RedressError::PermissionDenied));
    }

    #[tokio::test]
    async fn dashboard_counts_visible_slice() {
        let f = fixture().await;
        let facilities = f
            .desk
            .create(&f.student, NewComplaint::new("Leaking tap in block A", "Tap has been leaking for a week", 1))
            .await
            .unwrap();
        f.desk
            .create(&f.other_student, NewComplaint::new("Slow wifi in dorms", "Dorm wifi drops every evening", 2))
            .await
            .unwrap();
        f.desk
            .update_status(
                &f.facilities_admin,
                facilities.id,
                ComplaintStatus::Resolved,
                Some("Plumber fixed it".to_string()),
            )
            .await
            .unwrap();

        let facilities_view = f.desk.dashboard(&f.facilities_admin).await.unwrap();
        assert_eq!(facilities_view.total, 1);
        assert_eq!(facilities_view.resolved, 1);

        let global_view = f.desk.dashboard(&f.root).await.unwrap();
        assert_eq!(global_view.total, 2);
        assert_eq!(global_view.pending, 1);
        assert_eq!(global_view.resolved, 1);
    }

    #[tokio::test]
    async fn public_listing_contains_resolved_complaints_only() {
        let f = fixture().await;
        let complaint = f
            .desk
            .create(&f.student, NewComplaint::new("Leaking tap in block A", "Tap has been leaking for a week", 1))
            .await
            .unwrap();
        f.desk
            .create(&f.student, NewComplaint::new("Broken chair in library", "Chair on the second floor collapsed", 1))
            .await
            .unwrap();

        assert!(f.desk.list_public().await.unwrap().is_empty());

        f.desk
            .update_status(
                &f.facilities_admin,
                complaint.id,
                ComplaintStatus::Resolved,
                Some("Plumber fixed it".to_string()),
            )
            .await
            .unwrap();

        let public = f.desk.list_public().await.unwrap();
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].domain_name, "Facilities");
        assert!(public[0].resolved_at.is_some());
    }

    #[tokio::test]
    async fn domain_creation_is_super_admin_only() {
        let f = fixture().await;
        let err = f
            .desk
            .create_domain(
                &f.facilities_admin,
                NewDomain {
                    name: "Library".to_string(),
                    description: String::new(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RedressError::PermissionDenied));

        let domains = f.desk.list_domains(&f.student).await.unwrap();
        assert_eq!(domains.len(), 2);
    }

    #[tokio::test]
    async fn filters_intersect_with_scope() {
        let f = fixture().await;
        let first = f
            .desk
            .create(
                &f.student,
                NewComplaint::new("Leaking tap in block A", "Tap has been leaking for a week", 1)
                    .with_priority(Priority::High),
            )
            .await
            .unwrap();
        f.desk
            .create(&f.student, NewComplaint::new("Broken chair in library", "Chair on the second floor collapsed", 1))
            .await
            .unwrap();

        let filter = ComplaintFilter {
            priority: Some(Priority::High),
            ..Default::default()
        };
        let listed = f.desk.list(&f.facilities_admin, filter).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, first.id);
    }
}
