//! Authorization policy: maps an actor to the complaint rows it may see and
//! the mutations it may perform.
//!
//! Scoping happens in the lookup predicate itself, never as an after-the-fact
//! permission check. A sub-admin probing a complaint outside their domain gets
//! the same answer as for a complaint that does not exist, so cross-domain
//! existence never leaks. Only a role mismatch is reported as a distinct
//! permission failure.

use crate::error::RedressError;
use crate::types::{Actor, Complaint, Role};

/// Row-visibility scope derived from a role. Every store read and mutation is
/// constrained by one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplaintScope {
    /// Complaints owned by this student.
    Student(i64),
    /// Complaints currently assigned to this domain.
    Domain(i64),
    /// All complaints, unrestricted.
    All,
}

impl ComplaintScope {
    pub fn permits(&self, complaint: &Complaint) -> bool {
        match *self {
            Self::Student(student_id) => complaint.student_id == student_id,
            Self::Domain(domain_id) => complaint.domain_id == domain_id,
            Self::All => true,
        }
    }
}

/// Read-path visibility for any authenticated actor.
pub fn visibility(actor: &Actor) -> ComplaintScope {
    match actor.role {
        Role::Student => ComplaintScope::Student(actor.id),
        Role::SubAdmin { domain_id } => ComplaintScope::Domain(domain_id),
        Role::SuperAdmin => ComplaintScope::All,
    }
}

/// Complaint creation is reserved for students.
pub fn require_student(actor: &Actor) -> Result<(), RedressError> {
    match actor.role {
        Role::Student => Ok(()),
        Role::SubAdmin { .. } | Role::SuperAdmin => Err(RedressError::PermissionDenied),
    }
}

/// Mutations (status update, mark-seen, transfer) require an admin role and
/// return the scope the mutation's lookup must be constrained by.
pub fn require_admin(actor: &Actor) -> Result<ComplaintScope, RedressError> {
    match actor.role {
        Role::SubAdmin { domain_id } => Ok(ComplaintScope::Domain(domain_id)),
        Role::SuperAdmin => Ok(ComplaintScope::All),
        Role::Student => Err(RedressError::PermissionDenied),
    }
}

/// Audit trail and domain administration are super-admin only.
pub fn require_super_admin(actor: &Actor) -> Result<(), RedressError> {
    match actor.role {
        Role::SuperAdmin => Ok(()),
        Role::Student | Role::SubAdmin { .. } => Err(RedressError::PermissionDenied),
    }
}
