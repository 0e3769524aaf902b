//! Approval State Machine
//! Mission: Enforce asset manager → compliance → admin sign-off before funds move
//!
//! The three stored approval records are read through [`ApprovalStage`], a single tagged
//! view of where the chain stands. Every ordering decision goes through it instead of
//! checking the booleans ad hoc.

use crate::auth::models::{Principal, Role};
use crate::distribution::error::{ConflictKind, DistributionError, DistributionResult};
use crate::distribution::normalize_text;
use crate::models::{ApprovalRecord, Approvals, Distribution, DistributionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_COMMENT_LEN: usize = 1000;

/// A sign-off stage in the approval chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalRole {
    AssetManager,
    Compliance,
    Admin,
}

impl ApprovalRole {
    pub const CHAIN: [ApprovalRole; 3] = [
        ApprovalRole::AssetManager,
        ApprovalRole::Compliance,
        ApprovalRole::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalRole::AssetManager => "asset_manager",
            ApprovalRole::Compliance => "compliance",
            ApprovalRole::Admin => "admin",
        }
    }

    /// Caller role that may sign this stage
    pub fn required_role(&self) -> Role {
        match self {
            ApprovalRole::AssetManager => Role::AssetManager,
            ApprovalRole::Compliance => Role::Compliance,
            ApprovalRole::Admin => Role::Admin,
        }
    }

    pub fn prerequisite(&self) -> Option<ApprovalRole> {
        match self {
            ApprovalRole::AssetManager => None,
            ApprovalRole::Compliance => Some(ApprovalRole::AssetManager),
            ApprovalRole::Admin => Some(ApprovalRole::Compliance),
        }
    }

    pub fn next(&self) -> Option<ApprovalRole> {
        match self {
            ApprovalRole::AssetManager => Some(ApprovalRole::Compliance),
            ApprovalRole::Compliance => Some(ApprovalRole::Admin),
            ApprovalRole::Admin => None,
        }
    }
}

/// Where the approval chain stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStage {
    AwaitingAssetManager,
    AwaitingCompliance,
    AwaitingAdmin,
    Approved,
}

impl ApprovalStage {
    pub fn awaiting(&self) -> Option<ApprovalRole> {
        match self {
            ApprovalStage::AwaitingAssetManager => Some(ApprovalRole::AssetManager),
            ApprovalStage::AwaitingCompliance => Some(ApprovalRole::Compliance),
            ApprovalStage::AwaitingAdmin => Some(ApprovalRole::Admin),
            ApprovalStage::Approved => None,
        }
    }
}

impl Approvals {
    pub fn record(&self, role: ApprovalRole) -> &ApprovalRecord {
        match role {
            ApprovalRole::AssetManager => &self.asset_manager_approval,
            ApprovalRole::Compliance => &self.compliance_approval,
            ApprovalRole::Admin => &self.admin_approval,
        }
    }

    pub fn record_mut(&mut self, role: ApprovalRole) -> &mut ApprovalRecord {
        match role {
            ApprovalRole::AssetManager => &mut self.asset_manager_approval,
            ApprovalRole::Compliance => &mut self.compliance_approval,
            ApprovalRole::Admin => &mut self.admin_approval,
        }
    }

    /// First stage in the chain that has not signed.
    pub fn stage(&self) -> ApprovalStage {
        match ApprovalRole::CHAIN
            .iter()
            .find(|role| !self.record(**role).approved)
        {
            Some(ApprovalRole::AssetManager) => ApprovalStage::AwaitingAssetManager,
            Some(ApprovalRole::Compliance) => ApprovalStage::AwaitingCompliance,
            Some(ApprovalRole::Admin) => ApprovalStage::AwaitingAdmin,
            None => ApprovalStage::Approved,
        }
    }

    /// compliance ⇒ asset manager, admin ⇒ compliance
    pub fn is_consistent(&self) -> bool {
        ApprovalRole::CHAIN.iter().all(|role| {
            !self.record(*role).approved
                || role
                    .prerequisite()
                    .map_or(true, |prev| self.record(prev).approved)
        })
    }
}

/// Outcome of a permitted approval, ready for a conditional write
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalDecision {
    pub role: ApprovalRole,
    pub record: ApprovalRecord,
    pub expected_status: DistributionStatus,
    pub next_status: DistributionStatus,
    pub next_reviewer: Option<ApprovalRole>,
}

/// Blank comments are stored as absent; oversized or control-laden comments are rejected.
pub fn normalize_comments(comments: Option<String>) -> DistributionResult<Option<String>> {
    normalize_text(comments, "comments", MAX_COMMENT_LEN)
}

/// Role gate for a stage. Asset managers may only sign distributions assigned to them.
pub fn authorize_approval(
    dist: &Distribution,
    role: ApprovalRole,
    principal: &Principal,
) -> DistributionResult<()> {
    if principal.role != role.required_role() {
        return Err(DistributionError::Forbidden(format!(
            "{} approval requires role {}",
            role.as_str(),
            role.required_role().as_str()
        )));
    }
    if role == ApprovalRole::AssetManager && dist.asset_manager_id != principal.id {
        return Err(DistributionError::Forbidden(format!(
            "distribution {} is not assigned to asset manager {}",
            dist.id, principal.id
        )));
    }
    Ok(())
}

/// Decide whether `principal` may sign `role` on `dist` right now.
pub fn plan_approval(
    dist: &Distribution,
    role: ApprovalRole,
    principal: &Principal,
    comments: Option<String>,
    now: DateTime<Utc>,
) -> DistributionResult<ApprovalDecision> {
    authorize_approval(dist, role, principal)?;
    let comments = normalize_comments(comments)?;

    let current = dist.approvals.record(role);
    if current.approved {
        return Err(DistributionError::conflict(ConflictKind::AlreadyApproved {
            role,
            record: current.clone(),
        }));
    }

    if !dist.status.accepts_approvals() {
        return Err(DistributionError::invalid_status(dist.status, "approve"));
    }

    match dist.approvals.stage().awaiting() {
        Some(awaiting) if awaiting == role => {}
        Some(missing) => {
            return Err(DistributionError::conflict(
                ConflictKind::MissingPrerequisite { missing },
            ))
        }
        // Unreachable while the record above is unapproved.
        None => return Err(DistributionError::conflict(ConflictKind::StaleWrite)),
    }

    let next_status = if role == ApprovalRole::Admin {
        DistributionStatus::Approved
    } else {
        dist.status
    };

    Ok(ApprovalDecision {
        role,
        record: ApprovalRecord {
            approved: true,
            approved_by: Some(principal.id.clone()),
            approved_at: Some(now),
            comments,
        },
        expected_status: dist.status,
        next_status,
        next_reviewer: role.next(),
    })
}

/// The one place that decides whether a distribution is waiting on this caller.
pub fn awaiting_review_by(dist: &Distribution, principal: &Principal) -> bool {
    if !dist.status.accepts_approvals() {
        return false;
    }
    let Some(awaiting) = dist.approvals.stage().awaiting() else {
        return false;
    };
    if awaiting.required_role() != principal.role {
        return false;
    }
    awaiting != ApprovalRole::AssetManager || dist.asset_manager_id == principal.id
}

/// calculated → under_review, by the assigned asset manager or an admin.
pub fn plan_submit_for_review(dist: &Distribution, principal: &Principal) -> DistributionResult<()> {
    let allowed = match principal.role {
        Role::Admin => true,
        Role::AssetManager => dist.asset_manager_id == principal.id,
        _ => false,
    };
    if !allowed {
        return Err(DistributionError::Forbidden(
            "only the assigned asset manager or an admin may submit for review".to_string(),
        ));
    }
    if dist.status != DistributionStatus::Calculated {
        return Err(DistributionError::invalid_status(
            dist.status,
            "submit for review",
        ));
    }
    Ok(())
}

/// Admin-only cancellation from any non-terminal status. Returns the normalized reason.
pub fn plan_cancel(
    dist: &Distribution,
    principal: &Principal,
    reason: Option<String>,
) -> DistributionResult<String> {
    if principal.role != Role::Admin {
        return Err(DistributionError::Forbidden(
            "only an admin may cancel a distribution".to_string(),
        ));
    }
    let reason = normalize_text(reason, "reason", MAX_COMMENT_LEN)?.ok_or_else(|| {
        DistributionError::Validation("a cancellation reason is required".to_string())
    })?;
    if !dist.status.can_transition_to(DistributionStatus::Cancelled) {
        return Err(DistributionError::invalid_status(dist.status, "cancel"));
    }
    Ok(reason)
}
