//! PostgreSQL backend for the complaint store.
//!
//! Schema is bootstrapped with `CREATE TABLE IF NOT EXISTS` on startup. Every
//! mutating operation runs inside a single transaction that also writes the
//! audit entry (and the transfer record, for transfers), so a partial failure
//! rolls back both. Concurrent writers to the same complaint row serialize on
//! PostgreSQL row-level locks; last write wins.

use crate::audit::{AuditAction, AuditEntry, AuditQuery, NewAuditEntry};
use crate::error::RedressError;
use crate::policy::ComplaintScope;
use crate::store::ComplaintStore;
use crate::types::{
    Complaint, ComplaintFilter, ComplaintStatus, Domain, NewComplaint, NewDomain, Priority,
    PublicComplaint, StatusChange, StatusCounts, TransferRecord,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};

const COMPLAINT_COLUMNS: &str = "id, title, description, domain_id, student_id, status, priority, \
     resolution_details, resolved_at, admin_seen, admin_read_at, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, RedressError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| RedressError::Storage(format!("postgres connect failed: {e}")))?;

        Ok(Self { pool })
    }

    pub async fn ensure_schema(&self) -> Result<(), RedressError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS domains (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT ''
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS complaints (
                id BIGSERIAL PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                domain_id BIGINT NOT NULL REFERENCES domains (id),
                student_id BIGINT NOT NULL,
                status TEXT NOT NULL,
                priority TEXT NOT NULL,
                resolution_details TEXT NULL,
                resolved_at TIMESTAMPTZ NULL,
                admin_seen BOOLEAN NOT NULL DEFAULT FALSE,
                admin_read_at TIMESTAMPTZ NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_complaints_domain_id ON complaints (domain_id)",
            "CREATE INDEX IF NOT EXISTS idx_complaints_student_id ON complaints (student_id)",
            "CREATE INDEX IF NOT EXISTS idx_complaints_status ON complaints (status)",
            r#"
            CREATE TABLE IF NOT EXISTS complaint_transfers (
                id BIGSERIAL PRIMARY KEY,
                complaint_id BIGINT NOT NULL REFERENCES complaints (id),
                from_domain_id BIGINT NOT NULL,
                to_domain_id BIGINT NOT NULL,
                transferred_by BIGINT NOT NULL,
                reason TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_transfers_complaint_id ON complaint_transfers (complaint_id)",
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id BIGSERIAL PRIMARY KEY,
                actor_id BIGINT NOT NULL,
                action TEXT NOT NULL,
                resource_type TEXT NOT NULL,
                resource_id BIGINT NOT NULL,
                old_values JSONB NOT NULL,
                new_values JSONB NOT NULL,
                entry_timestamp TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_audit_actor_id ON audit_log (actor_id)",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| RedressError::Storage(format!("postgres schema create failed: {e}")))?;
        }

        Ok(())
    }
}

fn parse_status(value: &str) -> Result<ComplaintStatus, RedressError> {
    ComplaintStatus::parse(value)
        .ok_or_else(|| RedressError::Storage(format!("unknown status '{value}' in storage")))
}

fn parse_priority(value: &str) -> Result<Priority, RedressError> {
    Priority::parse(value)
        .ok_or_else(|| RedressError::Storage(format!("unknown priority '{value}' in storage")))
}

fn parse_action(value: &str) -> Result<AuditAction, RedressError> {
    AuditAction::parse(value)
        .ok_or_else(|| RedressError::Storage(format!("unknown audit action '{value}' in storage")))
}

fn decode<'r, T>(row: &'r PgRow, column: &str) -> Result<T, RedressError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| RedressError::Storage(format!("postgres decode {column} failed: {e}")))
}

fn row_to_complaint(row: &PgRow) -> Result<Complaint, RedressError> {
    let status: String = decode(row, "status")?;
    let priority: String = decode(row, "priority")?;

    Ok(Complaint {
        id: decode(row, "id")?,
        title: decode(row, "title")?,
        description: decode(row, "description")?,
        domain_id: decode(row, "domain_id")?,
        student_id: decode(row, "student_id")?,
        status: parse_status(&status)?,
        priority: parse_priority(&priority)?,
        resolution_details: decode(row, "resolution_details")?,
        resolved_at: decode(row, "resolved_at")?,
        admin_seen: decode(row, "admin_seen")?,
        admin_read_at: decode(row, "admin_read_at")?,
        created_at: decode(row, "created_at")?,
        updated_at: decode(row, "updated_at")?,
    })
}

fn row_to_domain(row: &PgRow) -> Result<Domain, RedressError> {
    Ok(Domain {
        id: decode(row, "id")?,
        name: decode(row, "name")?,
        description: decode(row, "description")?,
    })
}

fn row_to_transfer(row: &PgRow) -> Result<TransferRecord, RedressError> {
    Ok(TransferRecord {
        id: decode(row, "id")?,
        complaint_id: decode(row, "complaint_id")?,
        from_domain_id: decode(row, "from_domain_id")?,
        to_domain_id: decode(row, "to_domain_id")?,
        transferred_by: decode(row, "transferred_by")?,
        reason: decode(row, "reason")?,
        created_at: decode(row, "created_at")?,
    })
}

fn row_to_audit(row: &PgRow) -> Result<AuditEntry, RedressError> {
    let action: String = decode(row, "action")?;

    Ok(AuditEntry {
        id: decode(row, "id")?,
        actor_id: decode(row, "actor_id")?,
        action: parse_action(&action)?,
        resource_type: decode(row, "resource_type")?,
        resource_id: decode(row, "resource_id")?,
        old_values: decode(row, "old_values")?,
        new_values: decode(row, "new_values")?,
        timestamp: decode(row, "entry_timestamp")?,
    })
}

/// Push the scope predicate onto a dynamically built query.
fn push_scope(builder: &mut QueryBuilder<'_, Postgres>, scope: ComplaintScope) {
    match scope {
        ComplaintScope::Student(student_id) => {
            builder.push(" AND student_id = ");
            builder.push_bind(student_id);
        }
        ComplaintScope::Domain(domain_id) => {
            builder.push(" AND domain_id = ");
            builder.push_bind(domain_id);
        }
        ComplaintScope::All => {}
    }
}

/// Scoped single-row SELECT, locked for update when used inside a mutation.
fn select_scoped(scope: ComplaintScope, id: i64, for_update: bool) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!(
        "SELECT {COMPLAINT_COLUMNS} FROM complaints WHERE id = "
    ));
    builder.push_bind(id);
    push_scope(&mut builder, scope);
    if for_update {
        builder.push(" FOR UPDATE");
    }
    builder
}

async fn insert_audit_tx(
    tx: &mut Transaction<'_, Postgres>,
    entry: &NewAuditEntry,
) -> Result<(), RedressError> {
    sqlx::query(
        r#"
        INSERT INTO audit_log (
            actor_id, action, resource_type, resource_id,
            old_values, new_values, entry_timestamp
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(entry.actor_id)
    .bind(entry.action.as_str())
    .bind(entry.resource_type)
    .bind(entry.resource_id)
    .bind(&entry.old_values)
    .bind(&entry.new_values)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await
    .map_err(|e| RedressError::Storage(format!("postgres audit insert failed: {e}")))?;

    Ok(())
}

fn storage_err(context: &str, e: sqlx::Error) -> RedressError {
    RedressError::Storage(format!("postgres {context} failed: {e}"))
}

#[async_trait]
impl ComplaintStore for PgStore {
    async fn insert_domain(&self, actor_id: i64, new: NewDomain) -> Result<Domain, RedressError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_err("begin", e))?;

        let row = sqlx::query(
            "INSERT INTO domains (name, description) VALUES ($1, $2) \
             ON CONFLICT (name) DO NOTHING RETURNING id, name, description",
        )
        .bind(&new.name)
        .bind(&new.description)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| storage_err("domain insert", e))?;

        let Some(row) = row else {
            return Err(RedressError::Validation(format!(
                "domain '{}' already exists",
                new.name
            )));
        };
        let domain = row_to_domain(&row)?;

        insert_audit_tx(&mut tx, &NewAuditEntry::domain_created(actor_id, &domain)).await?;
        tx.commit().await.map_err(|e| storage_err("commit", e))?;
        Ok(domain)
    }

    async fn list_domains(&self) -> Result<Vec<Domain>, RedressError> {
        let rows = sqlx::query("SELECT id, name, description FROM domains ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_err("domain list", e))?;

        rows.iter().map(row_to_domain).collect()
    }

    async fn find_domain(&self, id: i64) -> Result<Option<Domain>, RedressError> {
        let row = sqlx::query("SELECT id, name, description FROM domains WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_err("domain lookup", e))?;

        row.as_ref().map(row_to_domain).transpose()
    }

    async fn insert_complaint(
        &self,
        actor_id: i64,
        new: NewComplaint,
    ) -> Result<Complaint, RedressError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_err("begin", e))?;
        let now = Utc::now();

        let row = sqlx::query(&format!(
            "INSERT INTO complaints (
                title, description, domain_id, student_id, status, priority,
                admin_seen, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, FALSE, $7, $7)
            RETURNING {COMPLAINT_COLUMNS}"
        ))
        .bind(&new.title)
        .bind(&new.description)
        .bind(new.domain_id)
        .bind(actor_id)
        .bind(ComplaintStatus::Pending.as_str())
        .bind(new.priority.as_str())
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| storage_err("complaint insert", e))?;
        let complaint = row_to_complaint(&row)?;

        insert_audit_tx(
            &mut tx,
            &NewAuditEntry::complaint_created(actor_id, &complaint),
        )
        .await?;
        tx.commit().await.map_err(|e| storage_err("commit", e))?;
        Ok(complaint)
    }

    async fn list_complaints(
        &self,
        scope: ComplaintScope,
        filter: ComplaintFilter,
    ) -> Result<Vec<Complaint>, RedressError> {
        let mut builder = QueryBuilder::new(format!(
            "SELECT {COMPLAINT_COLUMNS} FROM complaints WHERE TRUE"
        ));
        push_scope(&mut builder, scope);
        if let Some(status) = filter.status {
            builder.push(" AND status = ");
            builder.push_bind(status.as_str());
        }
        if let Some(priority) = filter.priority {
            builder.push(" AND priority = ");
            builder.push_bind(priority.as_str());
        }
        if let Some(domain_id) = filter.domain_id {
            builder.push(" AND domain_id = ");
            builder.push_bind(domain_id);
        }
        builder.push(" ORDER BY created_at DESC, id DESC");

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_err("complaint list", e))?;

        rows.iter().map(row_to_complaint).collect()
    }

    async fn find_complaint(
        &self,
        scope: ComplaintScope,
        id: i64,
    ) -> Result<Option<Complaint>, RedressError> {
        let row = select_scoped(scope, id, false)
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_err("complaint lookup", e))?;

        row.as_ref().map(row_to_complaint).transpose()
    }

    async fn list_public_resolved(&self) -> Result<Vec<PublicComplaint>, RedressError> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.title, c.resolution_details, c.resolved_at, d.name AS domain_name
            FROM complaints c
            JOIN domains d ON d.id = c.domain_id
            WHERE c.status = $1
            ORDER BY c.resolved_at DESC NULLS LAST, c.id DESC
            "#,
        )
        .bind(ComplaintStatus::Resolved.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_err("public list", e))?;

        rows.iter()
            .map(|row| {
                Ok(PublicComplaint {
                    id: decode(row, "id")?,
                    title: decode(row, "title")?,
                    resolution_details: decode(row, "resolution_details")?,
                    resolved_at: decode(row, "resolved_at")?,
                    domain_name: decode(row, "domain_name")?,
                })
            })
            .collect()
    }

    async fn update_status(
        &self,
        actor_id: i64,
        scope: ComplaintScope,
        id: i64,
        change: StatusChange,
    ) -> Result<Option<Complaint>, RedressError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_err("begin", e))?;

        let row = select_scoped(scope, id, true)
            .build()
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| storage_err("complaint lookup", e))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut complaint = row_to_complaint(&row)?;
        let old_status = complaint.status;
        let now = Utc::now();

        complaint.status = change.status;
        complaint.updated_at = now;
        if change.status == ComplaintStatus::Resolved {
            if let Some(details) = change.resolution_details {
                complaint.resolution_details = Some(details);
                complaint.resolved_at = Some(now);
            }
        }

        sqlx::query(
            "UPDATE complaints SET status = $1, resolution_details = $2, resolved_at = $3, \
             updated_at = $4 WHERE id = $5",
        )
        .bind(complaint.status.as_str())
        .bind(&complaint.resolution_details)
        .bind(complaint.resolved_at)
        .bind(complaint.updated_at)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| storage_err("status update", e))?;

        insert_audit_tx(
            &mut tx,
            &NewAuditEntry::status_updated(actor_id, old_status, &complaint),
        )
        .await?;
        tx.commit().await.map_err(|e| storage_err("commit", e))?;
        Ok(Some(complaint))
    }

    async fn mark_seen(
        &self,
        actor_id: i64,
        scope: ComplaintScope,
        id: i64,
    ) -> Result<Option<Complaint>, RedressError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_err("begin", e))?;

        let row = select_scoped(scope, id, true)
            .build()
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| storage_err("complaint lookup", e))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut complaint = row_to_complaint(&row)?;
        let previously_seen = complaint.admin_seen;
        let now = Utc::now();

        complaint.admin_seen = true;
        complaint.admin_read_at = Some(now);
        complaint.updated_at = now;

        sqlx::query(
            "UPDATE complaints SET admin_seen = TRUE, admin_read_at = $1, updated_at = $1 \
             WHERE id = $2",
        )
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| storage_err("mark seen", e))?;

        insert_audit_tx(
            &mut tx,
            &NewAuditEntry::seen_acknowledged(actor_id, previously_seen, &complaint),
        )
        .await?;
        tx.commit().await.map_err(|e| storage_err("commit", e))?;
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
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_err("begin", e))?;

        let row = select_scoped(scope, id, true)
            .build()
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| storage_err("complaint lookup", e))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut complaint = row_to_complaint(&row)?;
        let from_domain_id = complaint.domain_id;
        if from_domain_id == to_domain_id {
            return Err(RedressError::SameDomainTransfer(to_domain_id));
        }
        let now = Utc::now();

        complaint.domain_id = to_domain_id;
        complaint.updated_at = now;

        sqlx::query("UPDATE complaints SET domain_id = $1, updated_at = $2 WHERE id = $3")
            .bind(to_domain_id)
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| storage_err("transfer update", e))?;

        sqlx::query(
            r#"
            INSERT INTO complaint_transfers (
                complaint_id, from_domain_id, to_domain_id, transferred_by, reason, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(from_domain_id)
        .bind(to_domain_id)
        .bind(actor_id)
        .bind(&reason)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| storage_err("transfer record insert", e))?;

        insert_audit_tx(
            &mut tx,
            &NewAuditEntry::transferred(actor_id, id, from_domain_id, to_domain_id, &reason),
        )
        .await?;
        tx.commit().await.map_err(|e| storage_err("commit", e))?;
        Ok(Some(complaint))
    }

    async fn list_transfers(
        &self,
        scope: ComplaintScope,
        complaint_id: i64,
    ) -> Result<Option<Vec<TransferRecord>>, RedressError> {
        if self.find_complaint(scope, complaint_id).await?.is_none() {
            return Ok(None);
        }

        let rows = sqlx::query(
            "SELECT id, complaint_id, from_domain_id, to_domain_id, transferred_by, reason, \
             created_at FROM complaint_transfers WHERE complaint_id = $1 ORDER BY id",
        )
        .bind(complaint_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_err("transfer list", e))?;

        let transfers = rows
            .iter()
            .map(row_to_transfer)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(transfers))
    }

    async fn list_audit(&self, query: AuditQuery) -> Result<(u64, Vec<AuditEntry>), RedressError> {
        let mut count_builder = QueryBuilder::new("SELECT COUNT(*) AS total FROM audit_log WHERE TRUE");
        let mut page_builder = QueryBuilder::new(
            "SELECT id, actor_id, action, resource_type, resource_id, old_values, new_values, \
             entry_timestamp FROM audit_log WHERE TRUE",
        );

        for builder in [&mut count_builder, &mut page_builder] {
            if let Some(action) = query.action {
                builder.push(" AND action = ");
                builder.push_bind(action.as_str());
            }
            if let Some(actor_id) = query.actor_id {
                builder.push(" AND actor_id = ");
                builder.push_bind(actor_id);
            }
        }

        let total_row = count_builder
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| storage_err("audit count", e))?;
        let total: i64 = decode(&total_row, "total")?;

        page_builder.push(if query.ascending {
            " ORDER BY id ASC"
        } else {
            " ORDER BY id DESC"
        });
        page_builder.push(" LIMIT ");
        page_builder.push_bind(query.limit as i64);
        page_builder.push(" OFFSET ");
        page_builder.push_bind(query.offset as i64);

        let rows = page_builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_err("audit list", e))?;
        let entries = rows
            .iter()
            .map(row_to_audit)
            .collect::<Result<Vec<_>, _>>()?;

        Ok((total.max(0) as u64, entries))
    }

    async fn status_counts(&self, scope: ComplaintScope) -> Result<StatusCounts, RedressError> {
        let mut builder = QueryBuilder::new(
            "SELECT status, admin_seen, COUNT(*) AS total FROM complaints WHERE TRUE",
        );
        push_scope(&mut builder, scope);
        builder.push(" GROUP BY status, admin_seen");

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_err("status counts", e))?;

        let mut counts = StatusCounts::default();
        for row in &rows {
            let status: String = decode(row, "status")?;
            let seen: bool = decode(row, "admin_seen")?;
            let total: i64 = decode(row, "total")?;
            let total = total.max(0) as u64;

            counts.total += total;
            if !seen {
                counts.unseen += total;
            }
            match parse_status(&status)? {
                ComplaintStatus::Pending => counts.pending += total,
                ComplaintStatus::InProgress => counts.in_progress += total,
                ComplaintStatus::Resolved => counts.resolved += total,
                ComplaintStatus::Rejected => counts.rejected += total,
            }
        }

        Ok(counts)
    }
}
