//! Payment Reconciliation Tracker
//! Mission: Decide what a payment confirmation, failure or initiation does to one investor line
//!
//! Planning is pure. The ledger applies a [`PaymentWrite`] only if the investor row still has
//! the payment status the plan was computed against, so two racing confirmations can never
//! both land.

use crate::auth::models::{Principal, Role};
use crate::distribution::error::{ConflictKind, DistributionError, DistributionResult};
use crate::distribution::normalize_text;
use crate::models::{Distribution, InvestorDistribution, Money, PaymentStatus};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

const MAX_REFERENCE_LEN: usize = 128;
const MAX_REASON_LEN: usize = 1000;
const MAX_DOCUMENT_LEN: usize = 512;

/// Bank confirmation for one investor payout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmation {
    #[serde(default)]
    pub transaction_id: Option<String>,
    /// Unique transaction reference from the banking rail
    #[serde(default)]
    pub utr: Option<String>,
    pub payment_date: NaiveDate,
    #[serde(default)]
    pub payment_method: Option<String>,
}

/// A transfer attempt that bounced or was rejected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFailure {
    pub reason: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub utr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInitiation {
    pub payment_method: String,
}

/// Kind of audit row a payment write leaves behind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Initiated,
    Confirmed,
    Failed,
}

impl PaymentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentOutcome::Initiated => "initiated",
            PaymentOutcome::Confirmed => "confirmed",
            PaymentOutcome::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "initiated" => Some(PaymentOutcome::Initiated),
            "confirmed" => Some(PaymentOutcome::Confirmed),
            "failed" => Some(PaymentOutcome::Failed),
            _ => None,
        }
    }
}

/// Conditional update of a single investor line
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentWrite {
    pub investor_id: String,
    pub outcome: PaymentOutcome,
    pub expected_status: PaymentStatus,
    pub new_status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub utr: Option<String>,
    pub payment_date: Option<NaiveDate>,
    pub payment_method: Option<String>,
    pub failure_reason: Option<String>,
    pub net_amount: Money,
}

impl PaymentWrite {
    pub fn reference(&self) -> Option<&str> {
        self.transaction_id.as_deref().or(self.utr.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PaymentPlan {
    /// Identical confirmation already stored; nothing to write
    Replay,
    Apply(PaymentWrite),
}

fn require_admin(principal: &Principal, operation: &str) -> DistributionResult<()> {
    if principal.role != Role::Admin {
        return Err(DistributionError::Forbidden(format!(
            "only an admin may {}",
            operation
        )));
    }
    Ok(())
}

fn find_investor<'a>(
    dist: &'a Distribution,
    investor_id: &str,
) -> DistributionResult<&'a InvestorDistribution> {
    dist.investor(investor_id)
        .ok_or_else(|| DistributionError::investor_not_found(&dist.id, investor_id))
}

fn normalize_reference(value: Option<String>, field: &str) -> DistributionResult<Option<String>> {
    let value = normalize_text(value, field, MAX_REFERENCE_LEN)?;
    if let Some(v) = &value {
        if v.chars().any(char::is_whitespace) {
            return Err(DistributionError::Validation(format!(
                "{} must not contain whitespace",
                field
            )));
        }
    }
    Ok(value)
}

fn already_paid(investor: &InvestorDistribution) -> DistributionError {
    DistributionError::conflict(ConflictKind::AlreadyPaid {
        investor_id: investor.investor_id.clone(),
        reference: investor.payment_reference().map(str::to_string),
    })
}

/// Same confirmation when a supplied identifier matches the stored one of its kind and no
/// supplied identifier contradicts a stored one.
fn is_replay(
    investor: &InvestorDistribution,
    transaction_id: Option<&str>,
    utr: Option<&str>,
) -> bool {
    let pairs = [
        (transaction_id, investor.transaction_id.as_deref()),
        (utr, investor.utr.as_deref()),
    ];
    let matched = pairs
        .iter()
        .any(|(given, stored)| given.is_some() && given == stored);
    let contradicted = pairs
        .iter()
        .any(|(given, stored)| matches!((given, stored), (Some(g), Some(s)) if g != s));
    matched && !contradicted
}

/// Plan `markInvestorPaid`. A replay of the stored reference is a no-op, any other
/// reference against a completed line is a conflict.
pub fn plan_payment(
    dist: &Distribution,
    investor_id: &str,
    principal: &Principal,
    confirmation: PaymentConfirmation,
) -> DistributionResult<PaymentPlan> {
    require_admin(principal, "confirm payments")?;

    let transaction_id = normalize_reference(confirmation.transaction_id, "transactionId")?;
    let utr = normalize_reference(confirmation.utr, "utr")?;
    if transaction_id.is_none() && utr.is_none() {
        return Err(DistributionError::Validation(
            "a transactionId or utr is required".to_string(),
        ));
    }
    let payment_method = normalize_text(confirmation.payment_method, "paymentMethod", 64)?;

    let investor = find_investor(dist, investor_id)?;
    if investor.payment_status == PaymentStatus::Completed {
        if is_replay(investor, transaction_id.as_deref(), utr.as_deref()) {
            return Ok(PaymentPlan::Replay);
        }
        return Err(already_paid(investor));
    }

    if !dist.status.accepts_payments() {
        return Err(DistributionError::invalid_status(
            dist.status,
            "confirm payment",
        ));
    }

    Ok(PaymentPlan::Apply(PaymentWrite {
        investor_id: investor.investor_id.clone(),
        outcome: PaymentOutcome::Confirmed,
        expected_status: investor.payment_status,
        new_status: PaymentStatus::Completed,
        transaction_id,
        utr,
        payment_date: Some(confirmation.payment_date),
        payment_method: payment_method.or_else(|| investor.payment_method.clone()),
        failure_reason: None,
        net_amount: investor.net_amount,
    }))
}

/// Plan `markInvestorFailed`. Completed lines cannot be failed after the fact.
pub fn plan_failure(
    dist: &Distribution,
    investor_id: &str,
    principal: &Principal,
    failure: PaymentFailure,
) -> DistributionResult<PaymentWrite> {
    require_admin(principal, "record payment failures")?;

    let reason = normalize_text(Some(failure.reason), "reason", MAX_REASON_LEN)?
        .ok_or_else(|| DistributionError::Validation("a failure reason is required".to_string()))?;
    let transaction_id = normalize_reference(failure.transaction_id, "transactionId")?;
    let utr = normalize_reference(failure.utr, "utr")?;

    let investor = find_investor(dist, investor_id)?;
    if investor.payment_status == PaymentStatus::Completed {
        return Err(already_paid(investor));
    }
    if !dist.status.accepts_payments() {
        return Err(DistributionError::invalid_status(
            dist.status,
            "record payment failure",
        ));
    }

    Ok(PaymentWrite {
        investor_id: investor.investor_id.clone(),
        outcome: PaymentOutcome::Failed,
        expected_status: investor.payment_status,
        new_status: PaymentStatus::Failed,
        transaction_id,
        utr,
        payment_date: None,
        payment_method: investor.payment_method.clone(),
        failure_reason: Some(reason),
        net_amount: investor.net_amount,
    })
}

/// Plan a transfer initiation: pending, failed or initiated lines move to `initiated`.
pub fn plan_initiation(
    dist: &Distribution,
    investor_id: &str,
    principal: &Principal,
    initiation: PaymentInitiation,
) -> DistributionResult<PaymentWrite> {
    require_admin(principal, "initiate payments")?;

    let payment_method = normalize_text(Some(initiation.payment_method), "paymentMethod", 64)?
        .ok_or_else(|| DistributionError::Validation("a payment method is required".to_string()))?;

    let investor = find_investor(dist, investor_id)?;
    match investor.payment_status {
        PaymentStatus::Pending | PaymentStatus::Failed | PaymentStatus::Initiated => {}
        PaymentStatus::Completed => return Err(already_paid(investor)),
        status => {
            return Err(DistributionError::conflict(
                ConflictKind::InvalidPaymentStatus {
                    investor_id: investor.investor_id.clone(),
                    status,
                    operation: "initiate payment",
                },
            ))
        }
    }
    if !dist.status.accepts_payments() {
        return Err(DistributionError::invalid_status(
            dist.status,
            "initiate payment",
        ));
    }

    Ok(PaymentWrite {
        investor_id: investor.investor_id.clone(),
        outcome: PaymentOutcome::Initiated,
        expected_status: investor.payment_status,
        new_status: PaymentStatus::Initiated,
        transaction_id: None,
        utr: None,
        payment_date: None,
        payment_method: Some(payment_method),
        failure_reason: None,
        net_amount: investor.net_amount,
    })
}

/// Form 16 certificates are attached once the payout (and its TDS) has settled.
pub fn plan_form16(
    dist: &Distribution,
    investor_id: &str,
    principal: &Principal,
    document: String,
) -> DistributionResult<String> {
    require_admin(principal, "attach Form 16 documents")?;

    let document = normalize_text(Some(document), "document", MAX_DOCUMENT_LEN)?
        .ok_or_else(|| DistributionError::Validation("a document reference is required".to_string()))?;

    let investor = find_investor(dist, investor_id)?;
    if investor.payment_status != PaymentStatus::Completed {
        return Err(DistributionError::conflict(
            ConflictKind::InvalidPaymentStatus {
                investor_id: investor.investor_id.clone(),
                status: investor.payment_status,
                operation: "attach Form 16",
            },
        ));
    }
    Ok(document)
}
