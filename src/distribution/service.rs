//! Distribution Service
//! Mission: Role-gated entry point for every distribution operation
//!
//! Each write follows the same shape: load the aggregate, plan against it, apply the plan
//! as a conditional ledger write, then notify. A write that loses a race is reported as a
//! conflict derived from the fresh state, never silently overwritten.

use crate::auth::models::{Principal, Role};
use crate::distribution::allocation::{allocate, AllocationInput};
use crate::distribution::approval::{
    awaiting_review_by, plan_approval, plan_cancel, plan_submit_for_review, ApprovalRole,
};
use crate::distribution::error::{ConflictKind, DistributionError, DistributionResult};
use crate::distribution::ledger::{
    clamp_limit, DistributionLedger, DistributionQuery, PaymentCommit, PaymentRecord, MAX_LIST_LIMIT,
};
use crate::distribution::normalize_text;
use crate::distribution::notify::{DistributionEvent, NotificationDispatcher};
use crate::distribution::payment::{
    plan_failure, plan_form16, plan_initiation, plan_payment, PaymentConfirmation,
    PaymentFailure, PaymentInitiation, PaymentPlan, PaymentWrite,
};
use crate::models::{
    Approvals, Deductions, Distribution, DistributionFilter, DistributionStatus,
    DistributionType, FeeItem, Money, PageRequest, PlatformFees, ShareholdingSnapshot,
    TaxWithholding,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

const MAX_ID_LEN: usize = 128;

/// Creation request from the SPV workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDistribution {
    pub project_id: String,
    pub spv_id: String,
    /// Defaults to the caller when an asset manager creates the distribution
    #[serde(default)]
    pub asset_manager_id: Option<String>,
    pub distribution_type: DistributionType,
    pub gross_proceeds: Money,
    #[serde(default)]
    pub deductions: Vec<FeeItem>,
    #[serde(default)]
    pub platform_fees: Vec<FeeItem>,
    pub tds_rate_bps: u32,
    pub snapshot: ShareholdingSnapshot,
    /// Run the allocation immediately; `false` stores a draft
    #[serde(default = "default_calculate")]
    pub calculate: bool,
}

fn default_calculate() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub distribution: Distribution,
    /// True when the confirmation was already recorded and nothing changed
    pub replayed: bool,
}

#[derive(Clone)]
pub struct DistributionService {
    ledger: Arc<DistributionLedger>,
    notifications: NotificationDispatcher,
}

impl DistributionService {
    pub fn new(ledger: Arc<DistributionLedger>, notifications: NotificationDispatcher) -> Self {
        Self {
            ledger,
            notifications,
        }
    }

    async fn load(&self, id: &str) -> DistributionResult<Distribution> {
        self.ledger
            .load(id)
            .await?
            .ok_or_else(|| DistributionError::distribution_not_found(id))
    }

    fn notify_awaiting(&self, dist: &Distribution, stage: ApprovalRole) {
        self.notifications
            .dispatch(DistributionEvent::AwaitingApproval {
                distribution_id: dist.id.clone(),
                distribution_number: dist.distribution_number.clone(),
                asset_manager_id: dist.asset_manager_id.clone(),
                stage,
            });
    }

    fn notify_payment(&self, dist: &Distribution, write: &PaymentWrite) {
        self.notifications
            .dispatch(DistributionEvent::PaymentUpdated {
                distribution_id: dist.id.clone(),
                distribution_number: dist.distribution_number.clone(),
                investor_id: write.investor_id.clone(),
                payment_status: write.new_status,
                net_amount: write.net_amount,
            });
    }

    // ========================================================================
    // Creation & calculation
    // ========================================================================

    pub async fn create(
        &self,
        principal: &Principal,
        request: NewDistribution,
    ) -> DistributionResult<Distribution> {
        let asset_manager_id = match principal.role {
            Role::AssetManager => match request.asset_manager_id.as_deref() {
                None => principal.id.clone(),
                Some(id) if id == principal.id => principal.id.clone(),
                Some(_) => {
                    return Err(DistributionError::Forbidden(
                        "asset managers may only create their own distributions".to_string(),
                    ))
                }
            },
            Role::Admin => normalize_text(request.asset_manager_id, "assetManagerId", MAX_ID_LEN)?
                .ok_or_else(|| {
                    DistributionError::Validation("assetManagerId is required".to_string())
                })?,
            _ => {
                return Err(DistributionError::Forbidden(
                    "only asset managers and admins may create distributions".to_string(),
                ))
            }
        };
        let project_id = normalize_text(Some(request.project_id), "projectId", MAX_ID_LEN)?
            .ok_or_else(|| DistributionError::Validation("projectId is required".to_string()))?;
        let spv_id = normalize_text(Some(request.spv_id), "spvId", MAX_ID_LEN)?
            .ok_or_else(|| DistributionError::Validation("spvId is required".to_string()))?;
        let total_deductions = validate_items(&request.deductions, "deductions")?;
        let total_platform_fees = validate_items(&request.platform_fees, "platformFees")?;

        let input = AllocationInput {
            gross_proceeds: request.gross_proceeds,
            total_deductions,
            total_platform_fees,
            tds_rate_bps: request.tds_rate_bps,
            snapshot: request.snapshot,
        };

        let now = Utc::now();
        let mut dist = Distribution {
            id: uuid::Uuid::new_v4().to_string(),
            distribution_number: String::new(),
            project_id,
            spv_id,
            asset_manager_id,
            distribution_type: request.distribution_type,
            gross_proceeds: input.gross_proceeds,
            deductions: Deductions {
                items: request.deductions,
                total_deductions,
            },
            platform_fees: PlatformFees {
                items: request.platform_fees,
                total_platform_fees,
            },
            tax_withholding: TaxWithholding {
                tds_rate_bps: input.tds_rate_bps,
                tds_amount: Money::ZERO,
            },
            net_distributable_amount: Money::ZERO,
            status: DistributionStatus::Draft,
            approvals: Approvals::default(),
            investor_distributions: Vec::new(),
            record_date: input.snapshot.record_date,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
            approved_at: None,
            completed_at: None,
            cancelled_at: None,
            version: 0,
        };

        if request.calculate {
            let allocation = allocate(&input)?;
            dist.tax_withholding.tds_amount = allocation.total_tds;
            dist.net_distributable_amount = allocation.net_distributable_amount;
            dist.investor_distributions = allocation.investors;
            dist.status = DistributionStatus::Calculated;
        }

        let stored = self.ledger.insert(&dist, &input.snapshot).await?;
        info!(
            distribution_id = %stored.id,
            status = %stored.status,
            "✅ Created distribution {} ({} investors, net {})",
            stored.distribution_number,
            stored.investor_distributions.len(),
            stored.net_distributable_amount
        );
        if stored.status == DistributionStatus::Calculated {
            self.notify_awaiting(&stored, ApprovalRole::AssetManager);
        }
        Ok(stored)
    }

    /// draft → calculated using the snapshot captured at creation.
    pub async fn calculate(&self, principal: &Principal, id: &str) -> DistributionResult<Distribution> {
        let dist = self.load(id).await?;
        let allowed = match principal.role {
            Role::Admin => true,
            Role::AssetManager => dist.asset_manager_id == principal.id,
            _ => false,
        };
        if !allowed {
            return Err(DistributionError::Forbidden(
                "only the assigned asset manager or an admin may calculate".to_string(),
            ));
        }
        if dist.status != DistributionStatus::Draft {
            return Err(DistributionError::invalid_status(dist.status, "calculate"));
        }

        let snapshot = self
            .ledger
            .load_snapshot(id)
            .await?
            .ok_or_else(|| DistributionError::distribution_not_found(id))?;
        let input = AllocationInput {
            gross_proceeds: dist.gross_proceeds,
            total_deductions: dist.deductions.total_deductions,
            total_platform_fees: dist.platform_fees.total_platform_fees,
            tds_rate_bps: dist.tax_withholding.tds_rate_bps,
            snapshot,
        };
        let allocation = allocate(&input)?;

        if !self
            .ledger
            .store_calculation(id, &allocation, Utc::now())
            .await?
        {
            return Err(DistributionError::conflict(ConflictKind::StaleWrite));
        }

        let updated = self.load(id).await?;
        info!(
            distribution_id = %updated.id,
            "🧮 Calculated {}: net {} over {} investors (remainder to {})",
            updated.distribution_number,
            updated.net_distributable_amount,
            updated.investor_distributions.len(),
            allocation.remainder_investor
        );
        self.notify_awaiting(&updated, ApprovalRole::AssetManager);
        Ok(updated)
    }

    // ========================================================================
    // Approval chain
    // ========================================================================

    pub async fn submit_for_review(
        &self,
        principal: &Principal,
        id: &str,
    ) -> DistributionResult<Distribution> {
        let dist = self.load(id).await?;
        plan_submit_for_review(&dist, principal)?;

        if !self
            .ledger
            .transition_status(
                id,
                DistributionStatus::Calculated,
                DistributionStatus::UnderReview,
                None,
                Utc::now(),
            )
            .await?
        {
            let fresh = self.load(id).await?;
            return Err(DistributionError::invalid_status(
                fresh.status,
                "submit for review",
            ));
        }

        let updated = self.load(id).await?;
        info!(distribution_id = %updated.id, "📝 {} submitted for review", updated.distribution_number);
        Ok(updated)
    }

    pub async fn approve(
        &self,
        principal: &Principal,
        id: &str,
        role: ApprovalRole,
        comments: Option<String>,
    ) -> DistributionResult<Distribution> {
        let dist = self.load(id).await?;
        let decision = plan_approval(&dist, role, principal, comments.clone(), Utc::now())?;

        if !self
            .ledger
            .record_approval(id, &decision, Utc::now())
            .await?
        {
            // Lost a race: explain the refusal from the state that won.
            let fresh = self.load(id).await?;
            return match plan_approval(&fresh, role, principal, comments, Utc::now()) {
                Err(err) => Err(err),
                Ok(_) => Err(DistributionError::conflict(ConflictKind::StaleWrite)),
            };
        }

        let updated = self.load(id).await?;
        info!(
            distribution_id = %updated.id,
            role = role.as_str(),
            status = %updated.status,
            "✅ {} approval recorded on {} by {}",
            role.as_str(),
            updated.distribution_number,
            principal.id
        );

        match decision.next_reviewer {
            Some(next) => self.notify_awaiting(&updated, next),
            None => self.notifications.dispatch(DistributionEvent::Approved {
                distribution_id: updated.id.clone(),
                distribution_number: updated.distribution_number.clone(),
            }),
        }
        Ok(updated)
    }

    pub async fn cancel(
        &self,
        principal: &Principal,
        id: &str,
        reason: Option<String>,
    ) -> DistributionResult<Distribution> {
        let dist = self.load(id).await?;
        let reason = plan_cancel(&dist, principal, reason)?;

        if !self
            .ledger
            .transition_status(
                id,
                dist.status,
                DistributionStatus::Cancelled,
                Some(&reason),
                Utc::now(),
            )
            .await?
        {
            return Err(DistributionError::conflict(ConflictKind::StaleWrite));
        }

        let updated = self.load(id).await?;
        warn!(
            distribution_id = %updated.id,
            "🛑 {} cancelled by {}: {}",
            updated.distribution_number,
            principal.id,
            reason
        );
        self.notifications.dispatch(DistributionEvent::Cancelled {
            distribution_id: updated.id.clone(),
            distribution_number: updated.distribution_number.clone(),
            reason,
        });
        Ok(updated)
    }

    // ========================================================================
    // Payments
    // ========================================================================

    async fn apply_payment(
        &self,
        principal: &Principal,
        id: &str,
        write: &PaymentWrite,
    ) -> DistributionResult<Option<Distribution>> {
        match self
            .ledger
            .commit_payment(id, write, &principal.id, Utc::now())
            .await?
        {
            PaymentCommit::Stale => Ok(None),
            PaymentCommit::Applied {
                advanced_to_processing,
                completed,
            } => {
                let updated = self.load(id).await?;
                info!(
                    distribution_id = %updated.id,
                    investor_id = %write.investor_id,
                    status = %updated.status,
                    "💸 {} investor {} → {}",
                    updated.distribution_number,
                    write.investor_id,
                    write.new_status
                );
                if advanced_to_processing {
                    info!(distribution_id = %updated.id, "{} is now processing", updated.distribution_number);
                }
                self.notify_payment(&updated, write);
                if completed {
                    info!(distribution_id = %updated.id, "🏁 {} completed", updated.distribution_number);
                    self.notifications.dispatch(DistributionEvent::Completed {
                        distribution_id: updated.id.clone(),
                        distribution_number: updated.distribution_number.clone(),
                    });
                }
                Ok(Some(updated))
            }
        }
    }

    /// Confirm one investor payout. A stale write is re-planned once, so a concurrent
    /// identical confirmation resolves to a replay instead of a conflict.
    pub async fn mark_investor_paid(
        &self,
        principal: &Principal,
        id: &str,
        investor_id: &str,
        confirmation: PaymentConfirmation,
    ) -> DistributionResult<PaymentReceipt> {
        for _ in 0..2 {
            let dist = self.load(id).await?;
            match plan_payment(&dist, investor_id, principal, confirmation.clone())? {
                PaymentPlan::Replay => {
                    info!(
                        distribution_id = %dist.id,
                        investor_id = %investor_id,
                        "Payment confirmation replayed, nothing to store"
                    );
                    return Ok(PaymentReceipt {
                        distribution: dist,
                        replayed: true,
                    });
                }
                PaymentPlan::Apply(write) => {
                    if let Some(updated) = self.apply_payment(principal, id, &write).await? {
                        return Ok(PaymentReceipt {
                            distribution: updated,
                            replayed: false,
                        });
                    }
                }
            }
        }
        Err(DistributionError::conflict(ConflictKind::StaleWrite))
    }

    pub async fn mark_investor_failed(
        &self,
        principal: &Principal,
        id: &str,
        investor_id: &str,
        failure: PaymentFailure,
    ) -> DistributionResult<Distribution> {
        for _ in 0..2 {
            let dist = self.load(id).await?;
            let write = plan_failure(&dist, investor_id, principal, failure.clone())?;
            if let Some(updated) = self.apply_payment(principal, id, &write).await? {
                return Ok(updated);
            }
        }
        Err(DistributionError::conflict(ConflictKind::StaleWrite))
    }

    pub async fn initiate_payment(
        &self,
        principal: &Principal,
        id: &str,
        investor_id: &str,
        initiation: PaymentInitiation,
    ) -> DistributionResult<Distribution> {
        for _ in 0..2 {
            let dist = self.load(id).await?;
            let write = plan_initiation(&dist, investor_id, principal, initiation.clone())?;
            if let Some(updated) = self.apply_payment(principal, id, &write).await? {
                return Ok(updated);
            }
        }
        Err(DistributionError::conflict(ConflictKind::StaleWrite))
    }

    pub async fn attach_form16(
        &self,
        principal: &Principal,
        id: &str,
        investor_id: &str,
        document: String,
    ) -> DistributionResult<Distribution> {
        let dist = self.load(id).await?;
        let document = plan_form16(&dist, investor_id, principal, document)?;
        if !self
            .ledger
            .set_form16(id, investor_id, &document, Utc::now())
            .await?
        {
            return Err(DistributionError::conflict(ConflictKind::StaleWrite));
        }
        info!(distribution_id = %id, investor_id = %investor_id, "📄 Form 16 attached");
        self.load(id).await
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Investors only see distributions they hold, restricted to their own line; asset
    /// managers only their assigned ones.
    pub async fn get_distribution(
        &self,
        principal: &Principal,
        id: &str,
    ) -> DistributionResult<Distribution> {
        let dist = self.load(id).await?;
        if principal.role.sees_all() {
            return Ok(dist);
        }
        match principal.role {
            Role::AssetManager if dist.asset_manager_id == principal.id => Ok(dist),
            Role::AssetManager => Err(DistributionError::Forbidden(format!(
                "distribution {} is not assigned to {}",
                id, principal.id
            ))),
            Role::Investor if dist.holds(&principal.id) => Ok(dist.restricted_to(&principal.id)),
            _ => Err(DistributionError::distribution_not_found(id)),
        }
    }

    pub async fn my_distributions(
        &self,
        principal: &Principal,
        page: PageRequest,
    ) -> DistributionResult<Vec<Distribution>> {
        let list = self
            .ledger
            .list(&DistributionQuery {
                investor_id: Some(principal.id.clone()),
                limit: page.limit,
                offset: page.offset,
                ..Default::default()
            })
            .await?;
        Ok(list
            .iter()
            .map(|d| d.restricted_to(&principal.id))
            .collect())
    }

    pub async fn by_asset_manager(
        &self,
        principal: &Principal,
        manager_id: &str,
    ) -> DistributionResult<Vec<Distribution>> {
        self.list(
            principal,
            DistributionFilter {
                asset_manager: Some(manager_id.to_string()),
                ..Default::default()
            },
        )
        .await
    }

    /// Asset managers without an explicit manager filter get their own distributions.
    pub async fn list(
        &self,
        principal: &Principal,
        filter: DistributionFilter,
    ) -> DistributionResult<Vec<Distribution>> {
        let asset_manager_id = if principal.role.sees_all() {
            filter.asset_manager
        } else if principal.role == Role::AssetManager {
            match filter.asset_manager {
                Some(id) if id != principal.id => {
                    return Err(DistributionError::Forbidden(
                        "asset managers may only list their own distributions".to_string(),
                    ))
                }
                _ => Some(principal.id.clone()),
            }
        } else {
            return Err(DistributionError::Forbidden(
                "investors may only list their own payouts".to_string(),
            ));
        };

        let query = DistributionQuery {
            statuses: filter.status.into_iter().collect(),
            project_id: filter.project_id,
            spv_id: filter.spv_id,
            asset_manager_id,
            distribution_type: filter.distribution_type,
            investor_id: None,
            limit: filter.limit,
            offset: filter.offset,
        };
        Ok(self.ledger.list(&query).await?)
    }

    /// Distributions whose next approval stage belongs to the caller. The stage predicate runs
    /// in memory, so every candidate page is scanned before the caller's window is applied.
    pub async fn pending_review(
        &self,
        principal: &Principal,
        page: PageRequest,
    ) -> DistributionResult<Vec<Distribution>> {
        let asset_manager_id = match principal.role {
            Role::Investor => return Ok(Vec::new()),
            Role::AssetManager => Some(principal.id.clone()),
            Role::Compliance | Role::Admin => None,
        };

        let mut awaiting = Vec::new();
        let mut offset = 0;
        loop {
            let batch = self
                .ledger
                .list(&DistributionQuery {
                    statuses: vec![DistributionStatus::Calculated, DistributionStatus::UnderReview],
                    asset_manager_id: asset_manager_id.clone(),
                    limit: Some(MAX_LIST_LIMIT),
                    offset: Some(offset),
                    ..Default::default()
                })
                .await?;
            let fetched = batch.len();
            awaiting.extend(batch.into_iter().filter(|d| awaiting_review_by(d, principal)));
            if fetched < MAX_LIST_LIMIT {
                break;
            }
            offset += fetched;
        }

        Ok(awaiting
            .into_iter()
            .skip(page.offset.unwrap_or(0))
            .take(clamp_limit(page.limit))
            .collect())
    }

    /// Payment audit trail for one investor line. Investors may read their own.
    pub async fn payment_history(
        &self,
        principal: &Principal,
        id: &str,
        investor_id: &str,
    ) -> DistributionResult<Vec<PaymentRecord>> {
        let dist = self.get_distribution(principal, id).await?;
        if principal.role == Role::Investor && principal.id != investor_id {
            return Err(DistributionError::Forbidden(
                "investors may only read their own payment history".to_string(),
            ));
        }
        if !dist.holds(investor_id) {
            return Err(DistributionError::investor_not_found(id, investor_id));
        }
        Ok(self.ledger.payment_history(id, investor_id).await?)
    }
}

/// Item descriptions must be present and amounts non-negative. Returns the checked total.
fn validate_items(items: &[FeeItem], field: &str) -> DistributionResult<Money> {
    let mut total = Money::ZERO;
    for item in items {
        if item.description.trim().is_empty() {
            return Err(DistributionError::Validation(format!(
                "{} item description is required",
                field
            )));
        }
        if item.amount.is_negative() {
            return Err(DistributionError::Validation(format!(
                "{} item {} has a negative amount",
                field, item.description
            )));
        }
        total = total.checked_add(item.amount).ok_or_else(|| {
            DistributionError::Validation(format!("{} total overflows", field))
        })?;
    }
    Ok(total)
}
