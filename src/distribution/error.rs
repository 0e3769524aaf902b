//! Distribution Errors
//! Mission: Name every way a distribution operation can be refused

use crate::distribution::approval::ApprovalRole;
use crate::models::{ApprovalRecord, DistributionStatus, Money, PaymentStatus};
use std::fmt;

pub type DistributionResult<T> = std::result::Result<T, DistributionError>;

/// Fatal allocation failures. Nothing is persisted when one of these is raised.
#[derive(Debug, Clone, PartialEq)]
pub enum AllocationError {
    ZeroTotalShares,
    SnapshotMismatch {
        holdings_total: u64,
        total_shares: u64,
    },
    DuplicateInvestor(String),
    NoEligibleHolders,
    NegativeAmount(&'static str),
    InvalidTdsRate(u32),
    InsufficientProceeds {
        gross: Money,
        required: Money,
    },
    Overflow,
    ReconciliationMismatch(String),
}

impl fmt::Display for AllocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationError::ZeroTotalShares => write!(f, "snapshot total shares is zero"),
            AllocationError::SnapshotMismatch {
                holdings_total,
                total_shares,
            } => write!(
                f,
                "snapshot holdings sum to {} shares but total shares is {}",
                holdings_total, total_shares
            ),
            AllocationError::DuplicateInvestor(id) => {
                write!(f, "investor {} appears more than once in snapshot", id)
            }
            AllocationError::NoEligibleHolders => {
                write!(f, "snapshot has no holder with a nonzero share count")
            }
            AllocationError::NegativeAmount(field) => write!(f, "{} must not be negative", field),
            AllocationError::InvalidTdsRate(bps) => {
                write!(f, "TDS rate {} bps is outside 0..=10000", bps)
            }
            AllocationError::InsufficientProceeds { gross, required } => write!(
                f,
                "gross proceeds {} do not cover deductions and fees of {}",
                gross, required
            ),
            AllocationError::Overflow => write!(f, "amount overflow during allocation"),
            AllocationError::ReconciliationMismatch(detail) => {
                write!(f, "allocation does not reconcile: {}", detail)
            }
        }
    }
}

impl std::error::Error for AllocationError {}

/// Why a write was refused against the current aggregate state.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictKind {
    MissingPrerequisite {
        missing: ApprovalRole,
    },
    AlreadyApproved {
        role: ApprovalRole,
        record: ApprovalRecord,
    },
    InvalidStatus {
        status: DistributionStatus,
        operation: &'static str,
    },
    AlreadyPaid {
        investor_id: String,
        reference: Option<String>,
    },
    InvalidPaymentStatus {
        investor_id: String,
        status: PaymentStatus,
        operation: &'static str,
    },
    StaleWrite,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::MissingPrerequisite { missing } => {
                write!(f, "{} approval is required first", missing.as_str())
            }
            ConflictKind::AlreadyApproved { role, .. } => {
                write!(f, "{} approval already recorded", role.as_str())
            }
            ConflictKind::InvalidStatus { status, operation } => {
                write!(f, "cannot {} while distribution is {}", operation, status)
            }
            ConflictKind::AlreadyPaid {
                investor_id,
                reference,
            } => write!(
                f,
                "investor {} already paid (reference {})",
                investor_id,
                reference.as_deref().unwrap_or("-")
            ),
            ConflictKind::InvalidPaymentStatus {
                investor_id,
                status,
                operation,
            } => write!(
                f,
                "cannot {} for investor {} while payment is {}",
                operation, investor_id, status
            ),
            ConflictKind::StaleWrite => {
                write!(f, "distribution was modified concurrently, reload and retry")
            }
        }
    }
}

#[derive(Debug)]
pub enum DistributionError {
    Validation(String),
    NotFound(String),
    Forbidden(String),
    Conflict(ConflictKind),
    Allocation(AllocationError),
    Storage(anyhow::Error),
}

impl DistributionError {
    pub fn conflict(kind: ConflictKind) -> Self {
        DistributionError::Conflict(kind)
    }

    pub fn invalid_status(status: DistributionStatus, operation: &'static str) -> Self {
        DistributionError::Conflict(ConflictKind::InvalidStatus { status, operation })
    }

    pub fn distribution_not_found(id: &str) -> Self {
        DistributionError::NotFound(format!("distribution {} not found", id))
    }

    pub fn investor_not_found(distribution_id: &str, investor_id: &str) -> Self {
        DistributionError::NotFound(format!(
            "investor {} not found in distribution {}",
            investor_id, distribution_id
        ))
    }
}

impl fmt::Display for DistributionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistributionError::Validation(msg) => write!(f, "validation failed: {}", msg),
            DistributionError::NotFound(msg) => write!(f, "{}", msg),
            DistributionError::Forbidden(msg) => write!(f, "forbidden: {}", msg),
            DistributionError::Conflict(kind) => write!(f, "conflict: {}", kind),
            DistributionError::Allocation(err) => write!(f, "allocation rejected: {}", err),
            DistributionError::Storage(err) => write!(f, "storage error: {:#}", err),
        }
    }
}

impl std::error::Error for DistributionError {}

impl From<AllocationError> for DistributionError {
    fn from(err: AllocationError) -> Self {
        DistributionError::Allocation(err)
    }
}

impl From<anyhow::Error> for DistributionError {
    fn from(err: anyhow::Error) -> Self {
        DistributionError::Storage(err)
    }
}

impl From<rusqlite::Error> for DistributionError {
    fn from(err: rusqlite::Error) -> Self {
        DistributionError::Storage(err.into())
    }
}
