//! Distribution Models
//! Mission: One typed aggregate for a distribution event and its investor breakdown

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Sub};

/// Amount in minor currency units (paise for INR).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(pub i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn minor(self) -> i64 {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        Money(iter.map(|m| m.0).sum())
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        Money(iter.map(|m| m.0).sum())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

/// Kind of proceeds being distributed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DistributionType {
    SaleProceeds,
    RentalIncome,
    Other,
}

impl DistributionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistributionType::SaleProceeds => "sale_proceeds",
            DistributionType::RentalIncome => "rental_income",
            DistributionType::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sale_proceeds" => Some(DistributionType::SaleProceeds),
            "rental_income" => Some(DistributionType::RentalIncome),
            "other" => Some(DistributionType::Other),
            _ => None,
        }
    }
}

/// Top-level lifecycle status of a distribution
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DistributionStatus {
    Draft,
    Calculated,
    UnderReview,
    Approved,
    Processing,
    Completed,
    Cancelled,
}

impl DistributionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistributionStatus::Draft => "draft",
            DistributionStatus::Calculated => "calculated",
            DistributionStatus::UnderReview => "under_review",
            DistributionStatus::Approved => "approved",
            DistributionStatus::Processing => "processing",
            DistributionStatus::Completed => "completed",
            DistributionStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "draft" => Some(DistributionStatus::Draft),
            "calculated" => Some(DistributionStatus::Calculated),
            "under_review" => Some(DistributionStatus::UnderReview),
            "approved" => Some(DistributionStatus::Approved),
            "processing" => Some(DistributionStatus::Processing),
            "completed" => Some(DistributionStatus::Completed),
            "cancelled" => Some(DistributionStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DistributionStatus::Completed | DistributionStatus::Cancelled
        )
    }

    /// Approvals may only be written while the breakdown is under review.
    pub fn accepts_approvals(&self) -> bool {
        matches!(
            self,
            DistributionStatus::Calculated | DistributionStatus::UnderReview
        )
    }

    /// Payment confirmations may only land once funds are released.
    pub fn accepts_payments(&self) -> bool {
        matches!(
            self,
            DistributionStatus::Approved | DistributionStatus::Processing
        )
    }

    /// Forward-only lifecycle; cancellation is reachable from any non-terminal state.
    pub fn can_transition_to(&self, next: DistributionStatus) -> bool {
        use DistributionStatus::*;

        if next == Cancelled {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Draft, Calculated)
                | (Calculated, UnderReview)
                | (Calculated, Approved)
                | (UnderReview, Approved)
                | (Approved, Processing)
                | (Processing, Completed)
        )
    }
}

impl fmt::Display for DistributionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-investor payment state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Initiated,
    Processing,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Initiated => "initiated",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(PaymentStatus::Pending),
            "initiated" => Some(PaymentStatus::Initiated),
            "processing" => Some(PaymentStatus::Processing),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single sign-off in the approval chain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRecord {
    pub approved: bool,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub comments: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approvals {
    pub asset_manager_approval: ApprovalRecord,
    pub compliance_approval: ApprovalRecord,
    pub admin_approval: ApprovalRecord,
}

/// Itemised deduction or fee line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeItem {
    pub description: String,
    pub amount: Money,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deductions {
    pub items: Vec<FeeItem>,
    pub total_deductions: Money,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformFees {
    pub items: Vec<FeeItem>,
    pub total_platform_fees: Money,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxWithholding {
    /// Withholding rate in basis points (2000 = 20%)
    pub tds_rate_bps: u32,
    pub tds_amount: Money,
}

/// One investor's holding at the record date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    pub investor_id: String,
    pub shares: u64,
}

/// Shareholding register captured by the SPV workflow at the record date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareholdingSnapshot {
    pub record_date: Option<NaiveDate>,
    pub total_shares: u64,
    pub holdings: Vec<Holding>,
}

/// Per-investor payout line of a distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestorDistribution {
    pub investor_id: String,
    pub number_of_shares: u64,
    /// Display only; allocation works on integer shares
    pub ownership_percentage: f64,
    pub gross_amount: Money,
    pub tds_amount: Money,
    pub net_amount: Money,
    pub payment_status: PaymentStatus,
    pub utr: Option<String>,
    pub transaction_id: Option<String>,
    pub payment_date: Option<NaiveDate>,
    pub payment_method: Option<String>,
    pub failure_reason: Option<String>,
    pub form16_document: Option<String>,
}

impl InvestorDistribution {
    /// Reference that identifies a payment confirmation: transaction id first, UTR otherwise.
    pub fn payment_reference(&self) -> Option<&str> {
        self.transaction_id.as_deref().or(self.utr.as_deref())
    }
}

/// The distribution aggregate: header, approvals and ordered investor breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Distribution {
    pub id: String,
    pub distribution_number: String,
    pub project_id: String,
    pub spv_id: String,
    pub asset_manager_id: String,
    pub distribution_type: DistributionType,
    pub gross_proceeds: Money,
    pub deductions: Deductions,
    pub platform_fees: PlatformFees,
    pub tax_withholding: TaxWithholding,
    pub net_distributable_amount: Money,
    pub status: DistributionStatus,
    pub approvals: Approvals,
    pub investor_distributions: Vec<InvestorDistribution>,
    pub record_date: Option<NaiveDate>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Bumped by every successful write. Informational; writes are guarded by their own
    /// expected-state conditions, not by this counter.
    pub version: i64,
}

impl Distribution {
    pub fn investor(&self, investor_id: &str) -> Option<&InvestorDistribution> {
        self.investor_distributions
            .iter()
            .find(|i| i.investor_id == investor_id)
    }

    pub fn holds(&self, investor_id: &str) -> bool {
        self.investor(investor_id).is_some()
    }

    pub fn total_tds(&self) -> Money {
        self.investor_distributions.iter().map(|i| i.tds_amount).sum()
    }

    pub fn total_net(&self) -> Money {
        self.investor_distributions.iter().map(|i| i.net_amount).sum()
    }

    pub fn all_investors_paid(&self) -> bool {
        !self.investor_distributions.is_empty()
            && self
                .investor_distributions
                .iter()
                .all(|i| i.payment_status == PaymentStatus::Completed)
    }

    /// Copy of the aggregate whose breakdown only carries one investor's row.
    pub fn restricted_to(&self, investor_id: &str) -> Distribution {
        let mut view = self.clone();
        view.investor_distributions
            .retain(|i| i.investor_id == investor_id);
        view
    }
}

/// Filter for the all-distributions view
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionFilter {
    pub status: Option<DistributionStatus>,
    pub project_id: Option<String>,
    pub spv_id: Option<String>,
    pub asset_manager: Option<String>,
    pub distribution_type: Option<DistributionType>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Page window for the caller-scoped views (`limit` defaults to 100, capped at 500)
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}
