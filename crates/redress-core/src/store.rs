//! Storage seam: scoped complaint persistence plus the in-memory backend.
//!
//! Every method that reads or mutates a specific complaint takes the caller's
//! `ComplaintScope` and applies it inside the lookup itself, so an out-of-scope
//! id is indistinguishable from a missing one. Mutating methods persist the
//! primary change and its audit entry atomically: the in-memory backend does
//! both inside one mutex critical section, the PostgreSQL backend inside one
//! transaction.

use crate::audit::{AuditEntry, AuditQuery, NewAuditEntry};
use crate::error::RedressError;
use crate::policy::ComplaintScope;
use crate::postgres::PgStore;
use crate::types::{
    Complaint, ComplaintFilter, ComplaintStatus, Domain, NewComplaint, NewDomain, PublicComplaint,
    StatusChange, StatusCounts, TransferRecord,
};
use async_trait::async_trait;
use chrono::Utc;
use std::cmp::Reverse;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Persistence backend configuration.
#[derive(Debug, Clone)]
pub enum StoreConfig {
    /// Keep all records in process memory only.
    Memory,
    /// Persist all records in PostgreSQL.
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Memory
    }
}

/// Construct the configured backend as an owned handle. No ambient singleton:
/// the handle is created once at process start and passed into every consumer.
pub async fn bootstrap_store(config: StoreConfig) -> Result<Arc<dyn ComplaintStore>, RedressError> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreConfig::Postgres {
            database_url,
            max_connections,
        } => {
            let store = PgStore::connect(&database_url, max_connections).await?;
            store.ensure_schema().await?;
            Ok(Arc::new(store))
        }
    }
}

#[async_trait]
pub trait ComplaintStore: Send + Sync {
    async fn insert_domain(&self, actor_id: i64, new: NewDomain) -> Result<Domain, RedressError>;

    async fn list_domains(&self) -> Result<Vec<Domain>, RedressError>;

    async fn find_domain(&self, id: i64) -> Result<Option<Domain>, RedressError>;

    /// Insert a pending complaint and its `create` audit entry.
    async fn insert_complaint(
        &self,
        actor_id: i64,
        new: NewComplaint,
    ) -> Result<Complaint, RedressError>;

    /// Scoped listing, most recently created first.
    async fn list_complaints(
        &self,
        scope: ComplaintScope,
        filter: ComplaintFilter,
    ) -> Result<Vec<Complaint>, RedressError>;

    async fn find_complaint(
        &self,
        scope: ComplaintScope,
        id: i64,
    ) -> Result<Option<Complaint>, RedressError>;

    /// Redacted resolved complaints for the public listing.
    async fn list_public_resolved(&self) -> Result<Vec<PublicComplaint>, RedressError>;

    /// Apply a status change to a scoped complaint. `Ok(None)` when the scoped
    /// lookup misses.
    async fn update_status(
        &self,
        actor_id: i64,
        scope: ComplaintScope,
        id: i64,
        change: StatusChange,
    ) -> Result<Option<Complaint>, RedressError>;

    /// Acknowledge a scoped complaint. Refreshes `admin_read_at` on every call.
    async fn mark_seen(
        &self,
        actor_id: i64,
        scope: ComplaintScope,
        id: i64,
    ) -> Result<Option<Complaint>, RedressError>;

    /// Move a scoped complaint to another domain, appending the transfer
    /// record and audit entry in the same unit of work.
    async fn transfer(
        &self,
        actor_id: i64,
        scope: ComplaintScope,
        id: i64,
        to_domain_id: i64,
        reason: String,
    ) -> Result<Option<Complaint>, RedressError>;

    /// Transfer history for a scoped complaint, oldest first. `Ok(None)` when
    /// the complaint is not visible.
    async fn list_transfers(
        &self,
        scope: ComplaintScope,
        complaint_id: i64,
    ) -> Result<Option<Vec<TransferRecord>>, RedressError>;

    /// Filtered audit page plus the filtered total.
    async fn list_audit(&self, query: AuditQuery) -> Result<(u64, Vec<AuditEntry>), RedressError>;

    async fn status_counts(&self, scope: ComplaintScope) -> Result<StatusCounts, RedressError>;
}

#[derive(Debug, Default)]
struct MemoryInner {
    domains: Vec<Domain>,
    complaints: Vec<Complaint>,
    transfers: Vec<TransferRecord>,
    audit: Vec<AuditEntry>,
    next_domain_id: i64,
    next_complaint_id: i64,
    next_transfer_id: i64,
    next_audit_id: i64,
}

impl MemoryInner {
    fn record_audit(&mut self, entry: NewAuditEntry) {
        self.next_audit_id += 1;
        self.audit.push(entry.into_entry(self.next_audit_id, Utc::now()));
    }
}

/// In-process backend. Authoritative for tests and usable for demos; one
/// mutex critical section per operation stands in for a storage transaction.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ComplaintStore for MemoryStore {
    async fn insert_domain(&self, actor_id: i64, new: NewDomain) -> Result<Domain, RedressError> {
        let mut inner = self.inner.lock().await;
        if inner.domains.iter().any(|d| d.name == new.name) {
            return Err(RedressError::Validation(format!(
                "domain '{}' already exists",
                new.name
            )));
        }

        inner.next_domain_id += 1;
        let domain = Domain {
            id: inner.next_domain_id,
            name: new.name,
            description: new.description,
        };
        inner.domains.push(domain.clone());
        inner.record_audit(NewAuditEntry::domain_created(actor_id, &domain));
        Ok(domain)
    }

    async fn list_domains(&self) -> Result<Vec<Domain>, RedressError> {
        Ok(self.inner.lock().await.domains.clone())
    }

    async fn find_domain(&self, id: i64) -> Result<Option<Domain>, RedressError> {
        Ok(self
            .inner
            .lock()
            .await
            .domains
            .iter()
            .find(|d| d.id == id)
            .cloned())
    }

    async fn insert_complaint(
        &self,
        actor_id: i64,
        new: NewComplaint,
    ) -> Result<Complaint, RedressError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        inner.next_complaint_id += 1;
        let complaint = Complaint {
            id: inner.next_complaint_id,
            title: new.title,
            description: new.description,
            domain_id: new.domain_id,
            student_id: actor_id,
            status: ComplaintStatus::Pending,
            priority: new.priority,
            resolution_details: None,
            resolved_at: None,
            admin_seen: false,
            admin_read_at: None,
            created_at: now,
            updated_at: now,
        };
        inner.complaints.push(complaint.clone());
        inner.record_audit(NewAuditEntry::complaint_created(actor_id, &complaint));
        Ok(complaint)
    }

    async fn list_complaints(
        &self,
        scope: ComplaintScope,
        filter: ComplaintFilter,
    ) -> Result<Vec<Complaint>, RedressError> {
        let inner = self.inner.lock().await;
        let mut items: Vec<Complaint> = inner
            .complaints
            .iter()
            .filter(|c| scope.permits(c) && filter.matches(c))
            .cloned()
            .collect();
        items.sort_by_key(|c| Reverse((c.created_at, c.id)));
        Ok(items)
    }

    async fn find_complaint(
        &self,
        scope: ComplaintScope,
        id: i64,
    ) -> Result<Option<Complaint>, RedressError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .complaints
            .iter()
            .find(|c| c.id == id && scope.permits(c))
            .cloned())
    }

    async fn list_public_resolved(&self) -> Result<Vec<PublicComplaint>, RedressError> {
        let inner = self.inner.lock().await;
        let mut items: Vec<PublicComplaint> = inner
            .complaints
            .iter()
            .filter(|c| c.status == ComplaintStatus::Resolved)
            .map(|c| PublicComplaint {
                id: c.id,
                title: c.title.clone(),
                resolution_details: c.resolution_details.clone(),
                resolved_at: c.resolved_at,
                domain_name: inner
                    .domains
                    .iter()
                    .find(|d| d.id == c.domain_id)
                    .map(|d| d.name.clone())
                    .unwrap_or_default(),
            })
            .collect();
        items.sort_by_key(|c| Reverse((c.resolved_at, c.id)));
        Ok(items)
    }

    async fn update_status(
        &self,
        actor_id: i64,
        scope: ComplaintScope,
        id: i64,
        change: StatusChange,
    ) -> Result<Option<Complaint>, RedressError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let Some(index) = inner
            .complaints
            .iter()
            .position(|c| c.id == id && scope.permits(c))
        else {
            return Ok(None);
        };

        let old_status = inner.complaints[index].status;
        {
            let complaint = &mut inner.complaints[index];
            complaint.status = change.status;
            if change.status == ComplaintStatus::Resolved {
                if let Some(details) = change.resolution_details {
                    complaint.resolution_details = Some(details);
                    complaint.resolved_at = Some(now);
                }
            }
            complaint.updated_at = now;
        }

        let complaint = inner.complaints[index].clone();
        inner.record_audit(NewAuditEntry::status_updated(actor_id, old_status, &complaint));
        Ok(Some(complaint))
    }

    async fn mark_seen(
        &self,
        actor_id: i64,
        scope: ComplaintScope,
        id: i64,
    ) -> Result<Option<Complaint>, RedressError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let Some(index) = inner
            .complaints
            .iter()
            .position(|c| c.id == id && scope.permits(c))
        else {
            return Ok(None);
        };

        let previously_seen = inner.complaints[index].admin_seen;
        {
            let complaint = &mut inner.complaints[index];
            complaint.admin_seen = true;
            complaint.admin_read_at = Some(now);
            complaint.updated_at = now;
        }

        let complaint = inner.complaints[index].clone();
        inner.record_audit(NewAuditEntry::seen_acknowledged(
            actor_id,
            previously_seen,
            &complaint,
        ));
        Ok(Some(complaint))
    }

    async fn transfer(
        &self,
        actor_id: i64,
        scope: ComplaintScope,
        id: i64,
        to_domain_id: i64,
        reason: String,
    ) -> Result<Option<Complaint>, RedressError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let Some(index) = inner
            .complaints
            .iter()
            .position(|c| c.id == id && scope.permits(c))
        else {
            return Ok(None);
        };

        let from_domain_id = inner.complaints[index].domain_id;
        if from_domain_id == to_domain_id {
            return Err(RedressError::SameDomainTransfer(to_domain_id));
        }

        {
            let complaint = &mut inner.complaints[index];
            complaint.domain_id = to_domain_id;
            complaint.updated_at = now;
        }

        inner.next_transfer_id += 1;
        let record = TransferRecord {
            id: inner.next_transfer_id,
            complaint_id: id,
            from_domain_id,
            to_domain_id,
            transferred_by: actor_id,
            reason: reason.clone(),
            created_at: now,
        };
        inner.transfers.push(record);
        inner.record_audit(NewAuditEntry::transferred(
            actor_id,
            id,
            from_domain_id,
            to_domain_id,
            &reason,
        ));
        Ok(Some(inner.complaints[index].clone()))
    }

    async fn list_transfers(
        &self,
        scope: ComplaintScope,
        complaint_id: i64,
    ) -> Result<Option<Vec<TransferRecord>>, RedressError> {
        let inner = self.inner.lock().await;
        if !inner
            .complaints
            .iter()
            .any(|c| c.id == complaint_id && scope.permits(c))
        {
            return Ok(None);
        }

        Ok(Some(
            inner
                .transfers
                .iter()
                .filter(|t| t.complaint_id == complaint_id)
                .cloned()
                .collect(),
        ))
    }

    async fn list_audit(&self, query: AuditQuery) -> Result<(u64, Vec<AuditEntry>), RedressError> {
        let inner = self.inner.lock().await;
        let mut matched: Vec<AuditEntry> = inner
            .audit
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        if !query.ascending {
            matched.reverse();
        }

        let total = matched.len() as u64;
        let items = matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect();
        Ok((total, items))
    }

    async fn status_counts(&self, scope: ComplaintScope) -> Result<StatusCounts, RedressError> {
        let inner = self.inner.lock().await;
        let mut counts = StatusCounts::default();
        for complaint in inner.complaints.iter().filter(|c| scope.permits(c)) {
            counts.total += 1;
            if !complaint.admin_seen {
                counts.unseen += 1;
            }
            match complaint.status {
                ComplaintStatus::Pending => counts.pending += 1,
                ComplaintStatus::InProgress => counts.in_progress += 1,
                ComplaintStatus::Resolved => counts.resolved += 1,
                ComplaintStatus::Rejected => counts.rejected += 1,
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditAction;

    async fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_domain(
                1,
                NewDomain {
                    name: "Facilities".to_string(),
                    description: "Buildings and grounds".to_string(),
                },
            )
            .await
            .unwrap();
        store
            .insert_domain(
                1,
                NewDomain {
                    name: "IT Services".to_string(),
                    description: "Campus network and labs".to_string(),
                },
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn duplicate_domain_name_is_rejected() {
        let store = seeded_store().await;
        let err = store
            .insert_domain(
                1,
                NewDomain {
                    name: "Facilities".to_string(),
                    description: String::new(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RedressError::Validation(_)));
    }

    #[tokio::test]
    async fn scoped_lookup_misses_out_of_scope_rows() {
        let store = seeded_store().await;
        let complaint = store
            .insert_complaint(5, NewComplaint::new("Broken window", "Window in lab 3 is cracked", 1))
            .await
            .unwrap();

        let other_domain = store
            .find_complaint(ComplaintScope::Domain(2), complaint.id)
            .await
            .unwrap();
        assert!(other_domain.is_none());

        let other_student = store
            .find_complaint(ComplaintScope::Student(6), complaint.id)
            .await
            .unwrap();
        assert!(other_student.is_none());

        let owner = store
            .find_complaint(ComplaintScope::Student(5), complaint.id)
            .await
            .unwrap();
        assert!(owner.is_some());
    }

    #[tokio::test]
    async fn same_domain_transfer_leaves_no_trace() {
        let store = seeded_store().await;
        let complaint = store
            .insert_complaint(5, NewComplaint::new("Broken window", "Window in lab 3 is cracked", 1))
            .await
            .unwrap();

        let err = store
            .transfer(
                2,
                ComplaintScope::All,
                complaint.id,
                1,
                "already there".to_string(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RedressError::SameDomainTransfer(1)));

        let history = store
            .list_transfers(ComplaintScope::All, complaint.id)
            .await
            .unwrap()
            .unwrap();
        assert!(history.is_empty());

        let (_, entries) = store.list_audit(AuditQuery::default()).await.unwrap();
        assert!(entries.iter().all(|e| e.action != AuditAction::Transfer));
    }

    #[tokio::test]
    async fn transfer_appends_record_and_audit_atomically() {
        let store = seeded_store().await;
        let complaint = store
            .insert_complaint(5, NewComplaint::new("Slow wifi in dorms", "Dorm wifi drops every evening", 1))
            .await
            .unwrap();

        let moved = store
            .transfer(
                2,
                ComplaintScope::Domain(1),
                complaint.id,
                2,
                "network issue, belongs to IT".to_string(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(moved.domain_id, 2);

        let history = store
            .list_transfers(ComplaintScope::All, complaint.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from_domain_id, 1);
        assert_eq!(history[0].to_domain_id, 2);
        assert_eq!(history[0].transferred_by, 2);

        let (_, entries) = store.list_audit(AuditQuery::default()).await.unwrap();
        let transfer_entry = entries
            .iter()
            .find(|e| e.action == AuditAction::Transfer)
            .unwrap();
        assert_eq!(transfer_entry.old_values["domain_id"], 1);
        assert_eq!(transfer_entry.new_values["domain_id"], 2);
    }

    #[tokio::test]
    async fn mark_seen_refreshes_read_timestamp() {
        let store = seeded_store().await;
        let complaint = store
            .insert_complaint(5, NewComplaint::new("Broken window", "Window in lab 3 is cracked", 1))
            .await
            .unwrap();

        let first = store
            .mark_seen(2, ComplaintScope::Domain(1), complaint.id)
            .await
            .unwrap()
            .unwrap();
        assert!(first.admin_seen);
        let first_read = first.admin_read_at.unwrap();

        let second = store
            .mark_seen(2, ComplaintScope::Domain(1), complaint.id)
            .await
            .unwrap()
            .unwrap();
        assert!(second.admin_seen);
        assert!(second.admin_read_at.unwrap() >= first_read);
    }

    #[tokio::test]
    async fn resolved_without_details_does_not_stamp_resolution() {
        let store = seeded_store().await;
        let complaint = store
            .insert_complaint(5, NewComplaint::new("Broken window", "Window in lab 3 is cracked", 1))
            .await
            .unwrap();

        let updated = store
            .update_status(
                2,
                ComplaintScope::All,
                complaint.id,
                StatusChange {
                    status: ComplaintStatus::Resolved,
                    resolution_details: None,
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, ComplaintStatus::Resolved);
        assert!(updated.resolved_at.is_none());
        assert!(updated.resolution_details.is_none());
    }

    #[tokio::test]
    async fn reverting_status_keeps_resolution_timestamp() {
        let store = seeded_store().await;
        let complaint = store
            .insert_complaint(5, NewComplaint::new("Broken window", "Window in lab 3 is cracked", 1))
            .await
            .unwrap();

        let resolved = store
            .update_status(
                2,
                ComplaintScope::All,
                complaint.id,
                StatusChange {
                    status: ComplaintStatus::Resolved,
                    resolution_details: Some("Glazier replaced the pane".to_string()),
                },
            )
            .await
            .unwrap()
            .unwrap();
        let resolved_at = resolved.resolved_at.unwrap();
        assert!(resolved_at >= resolved.created_at);

        let reverted = store
            .update_status(
                2,
                ComplaintScope::All,
                complaint.id,
                StatusChange {
                    status: ComplaintStatus::Pending,
                    resolution_details: None,
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reverted.status, ComplaintStatus::Pending);
        assert_eq!(reverted.resolved_at, Some(resolved_at));
    }

    #[tokio::test]
    async fn public_listing_redacts_and_joins_domain_name() {
        let store = seeded_store().await;
        let complaint = store
            .insert_complaint(5, NewComplaint::new("Leaking tap in block A", "Tap has been leaking for a week", 1))
            .await
            .unwrap();
        store
            .insert_complaint(5, NewComplaint::new("Slow wifi in dorms", "Dorm wifi drops every evening", 2))
            .await
            .unwrap();

        store
            .update_status(
                2,
                ComplaintScope::All,
                complaint.id,
                StatusChange {
                    status: ComplaintStatus::Resolved,
                    resolution_details: Some("Plumber fixed it".to_string()),
                },
            )
            .await
            .unwrap()
            .unwrap();

        let public = store.list_public_resolved().await.unwrap();
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].title, "Leaking tap in block A");
        assert_eq!(public[0].domain_name, "Facilities");
        assert_eq!(
            public[0].resolution_details.as_deref(),
            Some("Plumber fixed it")
        );
    }

    #[tokio::test]
    async fn audit_paging_filters_and_counts() {
        let store = seeded_store().await;
        for i in 0..3 {
            store
                .insert_complaint(
                    5,
                    NewComplaint::new(
                        format!("Complaint {i}"),
                        "Something is broken around here",
                        1,
                    ),
                )
                .await
                .unwrap();
        }

        let query = AuditQuery {
            action: Some(AuditAction::Create),
            actor_id: Some(5),
            limit: 2,
            offset: 0,
            ascending: true,
        };
        let (total, page) = store.list_audit(query).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|e| e.actor_id == 5));
    }

    #[tokio::test]
    async fn status_counts_respect_scope() {
        let store = seeded_store().await;
        let first = store
            .insert_complaint(5, NewComplaint::new("Broken window", "Window in lab 3 is cracked", 1))
            .await
            .unwrap();
        store
            .insert_complaint(6, NewComplaint::new("Slow wifi in dorms", "Dorm wifi drops every evening", 2))
            .await
            .unwrap();
        store
            .mark_seen(2, ComplaintScope::Domain(1), first.id)
            .await
            .unwrap();

        let domain_counts = store.status_counts(ComplaintScope::Domain(1)).await.unwrap();
        assert_eq!(domain_counts.total, 1);
        assert_eq!(domain_counts.pending, 1);
        assert_eq!(domain_counts.unseen, 0);

        let all_counts = store.status_counts(ComplaintScope::All).await.unwrap();
        assert_eq!(all_counts.total, 2);
        assert_eq!(all_counts.unseen, 1);
    }
}
