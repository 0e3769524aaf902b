//! Distribution Module - Proceeds Allocation, Sign-off & Payment Reconciliation
//!
//! This module handles:
//! 1. Pro-rata allocation of a proceeds pool over a shareholding snapshot
//! 2. The asset manager → compliance → admin approval chain
//! 3. Per-investor payment confirmation and completion of the aggregate
//!
//! Architecture:
//! - `allocation`, `approval` and `payment` are pure: they read an aggregate and return a
//!   decision or an error
//! - `ledger` applies decisions as conditional SQLite writes (one aggregate = one unit)
//! - `service` wires both together, owns role gating and fires notifications

pub mod allocation;
pub mod approval;
pub mod error;
pub mod ledger;
pub mod notify;
pub mod payment;
pub mod service;

pub use allocation::{allocate, Allocation, AllocationInput};
pub use approval::{awaiting_review_by, ApprovalDecision, ApprovalRole, ApprovalStage};
pub use error::{AllocationError, ConflictKind, DistributionError, DistributionResult};
pub use ledger::{DistributionLedger, DistributionQuery, PaymentCommit, PaymentRecord};
pub use notify::{
    DistributionEvent, LogNotifier, NotificationDispatcher, Notifier, WebhookNotifier,
};
pub use payment::{PaymentConfirmation, PaymentFailure, PaymentInitiation, PaymentPlan};
pub use service::{DistributionService, NewDistribution, PaymentReceipt};

/// Trim free text; blank becomes `None`, oversized or control characters are rejected.
pub(crate) fn normalize_text(
    value: Option<String>,
    field: &str,
    max_len: usize,
) -> DistributionResult<Option<String>> {
    let Some(raw) = value else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > max_len {
        return Err(DistributionError::Validation(format!(
            "{} must be at most {} characters",
            field, max_len
        )));
    }
    if trimmed
        .chars()
        .any(|c| c.is_control() && c != '\n' && c != '\t')
    {
        return Err(DistributionError::Validation(format!(
            "{} contains control characters",
            field
        )));
    }
    Ok(Some(trimmed.to_string()))
}
