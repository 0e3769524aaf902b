//! Allocation Calculator
//! Mission: Split a proceeds pool pro-rata across a shareholding snapshot in integer minor units
//!
//! Intermediate products are carried in checked `i128` arithmetic. Lines are floored, so the
//! remainders are never negative. The gross remainder goes to a single designated investor, the
//! largest holder. The withholding remainder goes there too, up to that line's gross; any excess
//! spills to the next largest holders. Totals reconcile exactly and no minor unit is dropped.

use crate::distribution::error::AllocationError;
use crate::models::{Holding, InvestorDistribution, Money, PaymentStatus, ShareholdingSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const BPS_DENOMINATOR: i128 = 10_000;

/// Everything the calculator needs; supplied by the SPV workflow at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationInput {
    pub gross_proceeds: Money,
    pub total_deductions: Money,
    pub total_platform_fees: Money,
    pub tds_rate_bps: u32,
    pub snapshot: ShareholdingSnapshot,
}

/// Result of a successful allocation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub net_distributable_amount: Money,
    pub total_tds: Money,
    /// Investor who absorbed the rounding remainders
    pub remainder_investor: String,
    pub gross_remainder: Money,
    pub tds_remainder: Money,
    pub investors: Vec<InvestorDistribution>,
}

impl Allocation {
    pub fn total_net(&self) -> Money {
        self.investors.iter().map(|i| i.net_amount).sum()
    }
}

/// `value × multiplier / denominator` rounded half-up. Operands must be non-negative.
fn mul_div_round(value: i128, multiplier: i128, denominator: i128) -> Result<i128, AllocationError> {
    value
        .checked_mul(multiplier)
        .and_then(|n| n.checked_mul(2))
        .and_then(|n| n.checked_add(denominator))
        .map(|n| n / (denominator * 2))
        .ok_or(AllocationError::Overflow)
}

/// `value × multiplier / denominator` rounded down. Operands must be non-negative.
fn mul_div_floor(value: i128, multiplier: i128, denominator: i128) -> Result<i128, AllocationError> {
    value
        .checked_mul(multiplier)
        .map(|n| n / denominator)
        .ok_or(AllocationError::Overflow)
}

/// Designated holder first, then the rest by shares descending, snapshot order on ties.
fn absorb_order(eligible: &[&Holding], designated: usize) -> Vec<usize> {
    let mut rest: Vec<usize> = (0..eligible.len()).filter(|i| *i != designated).collect();
    rest.sort_by(|a, b| eligible[*b].shares.cmp(&eligible[*a].shares).then(a.cmp(b)));
    std::iter::once(designated).chain(rest).collect()
}

fn to_money(value: i128) -> Result<Money, AllocationError> {
    i64::try_from(value)
        .map(Money)
        .map_err(|_| AllocationError::Overflow)
}

/// Reject snapshots that cannot back a pro-rata split. Returns the designated remainder index
/// into the eligible (nonzero) holdings.
fn validate_snapshot(snapshot: &ShareholdingSnapshot) -> Result<usize, AllocationError> {
    if snapshot.total_shares == 0 {
        return Err(AllocationError::ZeroTotalShares);
    }

    let mut seen = HashSet::with_capacity(snapshot.holdings.len());
    let mut holdings_total: u128 = 0;
    for holding in &snapshot.holdings {
        if !seen.insert(holding.investor_id.as_str()) {
            return Err(AllocationError::DuplicateInvestor(
                holding.investor_id.clone(),
            ));
        }
        holdings_total += holding.shares as u128;
    }

    if holdings_total != snapshot.total_shares as u128 {
        return Err(AllocationError::SnapshotMismatch {
            holdings_total: u64::try_from(holdings_total).unwrap_or(u64::MAX),
            total_shares: snapshot.total_shares,
        });
    }

    // Largest holder, first in snapshot order on ties.
    let mut designated: Option<(usize, u64)> = None;
    for (idx, holding) in snapshot
        .holdings
        .iter()
        .filter(|h| h.shares > 0)
        .enumerate()
    {
        match designated {
            Some((_, best)) if holding.shares <= best => {}
            _ => designated = Some((idx, holding.shares)),
        }
    }

    designated
        .map(|(idx, _)| idx)
        .ok_or(AllocationError::NoEligibleHolders)
}

/// Compute the net pool and per-investor breakdown.
pub fn allocate(input: &AllocationInput) -> Result<Allocation, AllocationError> {
    if input.gross_proceeds.is_negative() {
        return Err(AllocationError::NegativeAmount("grossProceeds"));
    }
    if input.total_deductions.is_negative() {
        return Err(AllocationError::NegativeAmount("totalDeductions"));
    }
    if input.total_platform_fees.is_negative() {
        return Err(AllocationError::NegativeAmount("totalPlatformFees"));
    }
    if (input.tds_rate_bps as i128) > BPS_DENOMINATOR {
        return Err(AllocationError::InvalidTdsRate(input.tds_rate_bps));
    }

    let required = input
        .total_deductions
        .checked_add(input.total_platform_fees)
        .ok_or(AllocationError::Overflow)?;
    if input.gross_proceeds < required {
        return Err(AllocationError::InsufficientProceeds {
            gross: input.gross_proceeds,
            required,
        });
    }
    let net = input.gross_proceeds - required;

    let designated = validate_snapshot(&input.snapshot)?;
    let eligible: Vec<_> = input
        .snapshot
        .holdings
        .iter()
        .filter(|h| h.shares > 0)
        .collect();

    let pool = net.minor() as i128;
    let total_shares = input.snapshot.total_shares as i128;
    let rate = input.tds_rate_bps as i128;

    // Step 3: pro-rata gross floored, remainder to the designated holder.
    let mut gross: Vec<i128> = eligible
        .iter()
        .map(|h| mul_div_floor(pool, h.shares as i128, total_shares))
        .collect::<Result<_, _>>()?;
    let gross_remainder = pool - gross.iter().sum::<i128>();
    gross[designated] += gross_remainder;

    // Step 4: withholding floored per line, reconciled against withholding on the whole pool.
    // A line never withholds more than its gross; rate <= 100% keeps enough room overall.
    let mut tds: Vec<i128> = gross
        .iter()
        .map(|g| mul_div_floor(*g, rate, BPS_DENOMINATOR))
        .collect::<Result<_, _>>()?;
    let tds_target = mul_div_round(pool, rate, BPS_DENOMINATOR)?;
    let tds_remainder = tds_target - tds.iter().sum::<i128>();
    let mut outstanding = tds_remainder;
    for idx in absorb_order(&eligible, designated) {
        if outstanding == 0 {
            break;
        }
        let take = (gross[idx] - tds[idx]).min(outstanding);
        tds[idx] += take;
        outstanding -= take;
    }

    let mut investors = Vec::with_capacity(eligible.len());
    for ((holding, g), t) in eligible.iter().zip(&gross).zip(&tds) {
        let gross_amount = to_money(*g)?;
        let tds_amount = to_money(*t)?;
        investors.push(InvestorDistribution {
            investor_id: holding.investor_id.clone(),
            number_of_shares: holding.shares,
            ownership_percentage: ownership_percentage(holding.shares, input.snapshot.total_shares),
            gross_amount,
            tds_amount,
            net_amount: gross_amount - tds_amount,
            payment_status: PaymentStatus::Pending,
            utr: None,
            transaction_id: None,
            payment_date: None,
            payment_method: None,
            failure_reason: None,
            form16_document: None,
        });
    }

    let allocation = Allocation {
        net_distributable_amount: net,
        total_tds: to_money(tds_target)?,
        remainder_investor: eligible[designated].investor_id.clone(),
        gross_remainder: to_money(gross_remainder)?,
        tds_remainder: to_money(tds_remainder)?,
        investors,
    };
    verify_reconciliation(&allocation)?;

    Ok(allocation)
}

/// Final guard: the breakdown must sum back to the pool exactly.
pub fn verify_reconciliation(allocation: &Allocation) -> Result<(), AllocationError> {
    let gross_total: Money = allocation.investors.iter().map(|i| i.gross_amount).sum();
    let tds_total: Money = allocation.investors.iter().map(|i| i.tds_amount).sum();
    let net_total = allocation.total_net();

    if gross_total != allocation.net_distributable_amount {
        return Err(AllocationError::ReconciliationMismatch(format!(
            "gross lines sum to {} but pool is {}",
            gross_total, allocation.net_distributable_amount
        )));
    }
    if tds_total != allocation.total_tds {
        return Err(AllocationError::ReconciliationMismatch(format!(
            "tds lines sum to {} but withholding is {}",
            tds_total, allocation.total_tds
        )));
    }
    if net_total != allocation.net_distributable_amount - tds_total {
        return Err(AllocationError::ReconciliationMismatch(format!(
            "net lines sum to {} but pool less tds is {}",
            net_total,
            allocation.net_distributable_amount - tds_total
        )));
    }
    if let Some(line) = allocation
        .investors
        .iter()
        .find(|i| i.net_amount.is_negative() || i.tds_amount.is_negative())
    {
        return Err(AllocationError::ReconciliationMismatch(format!(
            "investor {} has a negative payout line",
            line.investor_id
        )));
    }

    Ok(())
}

fn ownership_percentage(shares: u64, total_shares: u64) -> f64 {
    let pct = shares as f64 * 100.0 / total_shares as f64;
    (pct * 10_000.0).round() / 10_000.0
}
