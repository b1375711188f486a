//! Redress core: complaint lifecycle, authorization policy, and storage.
//!
//! Students file complaints against organizational domains, domain sub-admins
//! triage and resolve them, and a super-admin oversees the audit trail. Every
//! read and mutation is constrained by the acting role's visibility scope, and
//! every mutation commits together with its audit entry.

#![deny(unsafe_code)]

pub mod audit;
pub mod error;
pub mod lifecycle;
pub mod policy;
pub mod postgres;
pub mod store;
pub mod types;

pub use audit::{AuditAction, AuditEntry, AuditQuery, NewAuditEntry};
pub use error::RedressError;
pub use lifecycle::ComplaintDesk;
pub use policy::ComplaintScope;
pub use postgres::PgStore;
pub use store::{bootstrap_store, ComplaintStore, MemoryStore, StoreConfig};
pub use types::{
    Actor, Complaint, ComplaintFilter, ComplaintStatus, Domain, NewComplaint, NewDomain, Priority,
    PublicComplaint, Role, StatusChange, StatusCounts, TransferRecord,
};
