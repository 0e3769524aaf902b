//! Distribution Ledger - SQLite persistence for distribution aggregates
//! Mission: Store every distribution and apply state changes as conditional writes
//!
//! Tables:
//! - `distributions`: header, approval records, status and version
//! - `investor_distributions`: one payout line per (distribution, investor), in snapshot order
//! - `payment_records`: append-only audit of payment initiations, confirmations and failures
//! - `distribution_sequences`: per-year counter behind `DIST-<year>-<seq>` numbers
//!
//! Every mutating method re-checks the state it was planned against inside the write and
//! returns `false` / [`PaymentCommit::Stale`] when someone else got there first.

use crate::distribution::allocation::Allocation;
use crate::distribution::approval::ApprovalDecision;
use crate::distribution::payment::{PaymentOutcome, PaymentWrite};
use crate::models::{
    ApprovalRecord, Approvals, Deductions, Distribution, DistributionStatus, DistributionType,
    InvestorDistribution, Money, PaymentStatus, PlatformFees, ShareholdingSnapshot,
    TaxWithholding,
};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Datelike, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

pub const DEFAULT_LIST_LIMIT: usize = 100;
pub const MAX_LIST_LIMIT: usize = 500;

/// Requested page size, defaulted and capped.
pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

const DISTRIBUTION_COLUMNS: &str = "id, distribution_number, project_id, spv_id, \
     asset_manager_id, distribution_type, gross_proceeds, deductions_json, platform_fees_json, \
     tds_rate_bps, tds_amount, net_distributable_amount, record_date, status, \
     asset_manager_approved, asset_manager_approved_by, asset_manager_approved_at, asset_manager_comments, \
     compliance_approved, compliance_approved_by, compliance_approved_at, compliance_comments, \
     admin_approved, admin_approved_by, admin_approved_at, admin_comments, \
     cancellation_reason, created_at, updated_at, approved_at, completed_at, cancelled_at, version";

/// Filter for list queries. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct DistributionQuery {
    pub statuses: Vec<DistributionStatus>,
    pub project_id: Option<String>,
    pub spv_id: Option<String>,
    pub asset_manager_id: Option<String>,
    pub distribution_type: Option<DistributionType>,
    pub investor_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Result of a conditional payment write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentCommit {
    /// Investor line or parent status changed since planning; nothing written
    Stale,
    Applied {
        advanced_to_processing: bool,
        completed: bool,
    },
}

/// Audit row for one payment event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub id: String,
    pub distribution_id: String,
    pub investor_id: String,
    pub outcome: String,
    pub reference: Option<String>,
    pub transaction_id: Option<String>,
    pub utr: Option<String>,
    pub payment_date: Option<NaiveDate>,
    pub payment_method: Option<String>,
    pub failure_reason: Option<String>,
    pub amount: Money,
    pub recorded_by: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct DistributionLedger {
    conn: Arc<Mutex<Connection>>,
}

impl DistributionLedger {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open distribution db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("enable foreign keys")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS distributions (
                id TEXT PRIMARY KEY,
                distribution_number TEXT NOT NULL UNIQUE,
                project_id TEXT NOT NULL,
                spv_id TEXT NOT NULL,
                asset_manager_id TEXT NOT NULL,
                distribution_type TEXT NOT NULL,
                gross_proceeds INTEGER NOT NULL,
                deductions_json TEXT NOT NULL,
                platform_fees_json TEXT NOT NULL,
                tds_rate_bps INTEGER NOT NULL,
                tds_amount INTEGER NOT NULL,
                net_distributable_amount INTEGER NOT NULL,
                snapshot_json TEXT NOT NULL,
                record_date TEXT,
                status TEXT NOT NULL,
                asset_manager_approved INTEGER NOT NULL DEFAULT 0,
                asset_manager_approved_by TEXT,
                asset_manager_approved_at TEXT,
                asset_manager_comments TEXT,
                compliance_approved INTEGER NOT NULL DEFAULT 0,
                compliance_approved_by TEXT,
                compliance_approved_at TEXT,
                compliance_comments TEXT,
                admin_approved INTEGER NOT NULL DEFAULT 0,
                admin_approved_by TEXT,
                admin_approved_at TEXT,
                admin_comments TEXT,
                cancellation_reason TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                approved_at TEXT,
                completed_at TEXT,
                cancelled_at TEXT,
                version INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_distributions_manager ON distributions(asset_manager_id, created_at DESC)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_distributions_status ON distributions(status, created_at DESC)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS investor_distributions (
                distribution_id TEXT NOT NULL REFERENCES distributions(id),
                investor_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                number_of_shares INTEGER NOT NULL,
                ownership_percentage REAL NOT NULL,
                gross_amount INTEGER NOT NULL,
                tds_amount INTEGER NOT NULL,
                net_amount INTEGER NOT NULL,
                payment_status TEXT NOT NULL,
                utr TEXT,
                transaction_id TEXT,
                payment_date TEXT,
                payment_method TEXT,
                failure_reason TEXT,
                form16_document TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (distribution_id, investor_id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_investor_distributions_investor ON investor_distributions(investor_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS payment_records (
                id TEXT PRIMARY KEY,
                distribution_id TEXT NOT NULL REFERENCES distributions(id),
                investor_id TEXT NOT NULL,
                outcome TEXT NOT NULL,
                reference TEXT,
                transaction_id TEXT,
                utr TEXT,
                payment_date TEXT,
                payment_method TEXT,
                failure_reason TEXT,
                amount INTEGER NOT NULL,
                recorded_by TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_payment_records_reference \
             ON payment_records(distribution_id, investor_id, outcome, reference) \
             WHERE reference IS NOT NULL",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS distribution_sequences (
                year INTEGER PRIMARY KEY,
                next_value INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Persist a new aggregate. The distribution number is assigned inside the same
    /// transaction; the returned copy carries it.
    pub async fn insert(
        &self,
        dist: &Distribution,
        snapshot: &ShareholdingSnapshot,
    ) -> Result<Distribution> {
        let deductions_json = serde_json::to_string(&dist.deductions)?;
        let platform_fees_json = serde_json::to_string(&dist.platform_fees)?;
        let snapshot_json = serde_json::to_string(snapshot)?;

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let year = dist.created_at.year();
        tx.execute(
            "INSERT INTO distribution_sequences (year, next_value) VALUES (?1, 1)
             ON CONFLICT(year) DO UPDATE SET next_value = next_value + 1",
            params![year],
        )?;
        let seq: i64 = tx.query_row(
            "SELECT next_value FROM distribution_sequences WHERE year = ?1",
            params![year],
            |row| row.get(0),
        )?;

        let mut stored = dist.clone();
        stored.distribution_number = format!("DIST-{}-{:05}", year, seq);

        let am = &stored.approvals.asset_manager_approval;
        let co = &stored.approvals.compliance_approval;
        let ad = &stored.approvals.admin_approval;
        tx.execute(
            "INSERT INTO distributions (
                id, distribution_number, project_id, spv_id, asset_manager_id, distribution_type,
                gross_proceeds, deductions_json, platform_fees_json, tds_rate_bps, tds_amount,
                net_distributable_amount, snapshot_json, record_date, status,
                asset_manager_approved, asset_manager_approved_by, asset_manager_approved_at, asset_manager_comments,
                compliance_approved, compliance_approved_by, compliance_approved_at, compliance_comments,
                admin_approved, admin_approved_by, admin_approved_at, admin_comments,
                cancellation_reason, created_at, updated_at, approved_at, completed_at, cancelled_at, version
             ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27,
                ?28, ?29, ?30, ?31, ?32, ?33, ?34
             )",
            params![
                &stored.id,
                &stored.distribution_number,
                &stored.project_id,
                &stored.spv_id,
                &stored.asset_manager_id,
                stored.distribution_type.as_str(),
                stored.gross_proceeds.minor(),
                deductions_json,
                platform_fees_json,
                i64::from(stored.tax_withholding.tds_rate_bps),
                stored.tax_withholding.tds_amount.minor(),
                stored.net_distributable_amount.minor(),
                snapshot_json,
                stored.record_date.map(|d| d.to_string()),
                stored.status.as_str(),
                am.approved,
                am.approved_by.as_deref(),
                am.approved_at.map(to_ts),
                am.comments.as_deref(),
                co.approved,
                co.approved_by.as_deref(),
                co.approved_at.map(to_ts),
                co.comments.as_deref(),
                ad.approved,
                ad.approved_by.as_deref(),
                ad.approved_at.map(to_ts),
                ad.comments.as_deref(),
                stored.cancellation_reason.as_deref(),
                to_ts(stored.created_at),
                to_ts(stored.updated_at),
                stored.approved_at.map(to_ts),
                stored.completed_at.map(to_ts),
                stored.cancelled_at.map(to_ts),
                stored.version,
            ],
        )?;

        insert_investors(&tx, &stored.id, &stored.investor_distributions, stored.updated_at)?;
        tx.commit().context("commit distribution insert")?;

        debug!(
            "Stored distribution {} ({} investors)",
            stored.distribution_number,
            stored.investor_distributions.len()
        );
        Ok(stored)
    }

    /// draft → calculated with the allocation's investor lines. `false` if no longer draft.
    pub async fn store_calculation(
        &self,
        id: &str,
        allocation: &Allocation,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let changed = tx.execute(
            "UPDATE distributions SET status = 'calculated', tds_amount = ?1,
                net_distributable_amount = ?2, updated_at = ?3, version = version + 1
             WHERE id = ?4 AND status = 'draft'",
            params![
                allocation.total_tds.minor(),
                allocation.net_distributable_amount.minor(),
                to_ts(now),
                id
            ],
        )?;
        if changed == 0 {
            return Ok(false);
        }

        tx.execute(
            "DELETE FROM investor_distributions WHERE distribution_id = ?1",
            params![id],
        )?;
        insert_investors(&tx, id, &allocation.investors, now)?;
        tx.commit().context("commit calculation")?;
        Ok(true)
    }

    pub async fn load(&self, id: &str) -> Result<Option<Distribution>> {
        let conn = self.conn.lock().await;
        read_distribution(&conn, id)
    }

    pub async fn load_snapshot(&self, id: &str) -> Result<Option<ShareholdingSnapshot>> {
        let conn = self.conn.lock().await;
        let raw: Option<String> = conn
            .query_row(
                "SELECT snapshot_json FROM distributions WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|json| serde_json::from_str(&json).context("decode shareholding snapshot"))
            .transpose()
    }

    /// Newest first, one page at a time.
    pub async fn list(&self, query: &DistributionQuery) -> Result<Vec<Distribution>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if !query.statuses.is_empty() {
            let marks = vec!["?"; query.statuses.len()].join(", ");
            clauses.push(format!("status IN ({})", marks));
            values.extend(
                query
                    .statuses
                    .iter()
                    .map(|s| Value::Text(s.as_str().to_string())),
            );
        }
        if let Some(project_id) = &query.project_id {
            clauses.push("project_id = ?".to_string());
            values.push(Value::Text(project_id.clone()));
        }
        if let Some(spv_id) = &query.spv_id {
            clauses.push("spv_id = ?".to_string());
            values.push(Value::Text(spv_id.clone()));
        }
        if let Some(manager) = &query.asset_manager_id {
            clauses.push("asset_manager_id = ?".to_string());
            values.push(Value::Text(manager.clone()));
        }
        if let Some(kind) = query.distribution_type {
            clauses.push("distribution_type = ?".to_string());
            values.push(Value::Text(kind.as_str().to_string()));
        }
        if let Some(investor_id) = &query.investor_id {
            clauses.push(
                "id IN (SELECT distribution_id FROM investor_distributions WHERE investor_id = ?)"
                    .to_string(),
            );
            values.push(Value::Text(investor_id.clone()));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let limit = clamp_limit(query.limit);
        let offset = query.offset.unwrap_or(0);
        let sql = format!(
            "SELECT {} FROM distributions{} ORDER BY created_at DESC, distribution_number DESC \
             LIMIT {} OFFSET {}",
            DISTRIBUTION_COLUMNS, where_sql, limit, offset
        );

        let conn = self.conn.lock().await;
        let headers = {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), header_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut out = Vec::with_capacity(headers.len());
        for header in headers {
            let investors = read_investors(&conn, &header.id)?;
            out.push(header.into_distribution(investors)?);
        }
        Ok(out)
    }

    /// Sign one approval stage. The row must still be unsigned for `role`, its prerequisite
    /// must be signed and the status must match what the decision was planned against.
    pub async fn record_approval(
        &self,
        id: &str,
        decision: &ApprovalDecision,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let col = decision.role.as_str();
        let prerequisite = decision
            .role
            .prerequisite()
            .map(|prev| format!(" AND {}_approved = 1", prev.as_str()))
            .unwrap_or_default();
        let sql = format!(
            "UPDATE distributions SET
                {col}_approved = 1, {col}_approved_by = ?1, {col}_approved_at = ?2, {col}_comments = ?3,
                status = ?4,
                approved_at = CASE WHEN ?4 = 'approved' THEN ?2 ELSE approved_at END,
                updated_at = ?5, version = version + 1
             WHERE id = ?6 AND {col}_approved = 0 AND status = ?7{prerequisite}"
        );

        let conn = self.conn.lock().await;
        let changed = conn.execute(
            &sql,
            params![
                decision.record.approved_by.as_deref(),
                decision.record.approved_at.map(to_ts),
                decision.record.comments.as_deref(),
                decision.next_status.as_str(),
                to_ts(now),
                id,
                decision.expected_status.as_str(),
            ],
        )?;
        Ok(changed == 1)
    }

    /// Conditional status edge. `reason` is stored as the cancellation reason.
    pub async fn transition_status(
        &self,
        id: &str,
        from: DistributionStatus,
        to: DistributionStatus,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if !from.can_transition_to(to) {
            return Err(anyhow!("illegal transition {} -> {}", from, to));
        }
        let now = to_ts(now);
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE distributions SET status = ?1,
                cancelled_at = CASE WHEN ?1 = 'cancelled' THEN ?2 ELSE cancelled_at END,
                cancellation_reason = COALESCE(?3, cancellation_reason),
                updated_at = ?2, version = version + 1
             WHERE id = ?4 AND status = ?5",
            params![to.as_str(), now, reason, id, from.as_str()],
        )?;
        Ok(changed == 1)
    }

    /// Apply a planned payment write and roll the parent status forward, all in one
    /// transaction: approved → processing on first activity, processing → completed once
    /// no line is left unpaid.
    pub async fn commit_payment(
        &self,
        id: &str,
        write: &PaymentWrite,
        recorded_by: &str,
        now: DateTime<Utc>,
    ) -> Result<PaymentCommit> {
        let now_ts = to_ts(now);
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM distributions WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(status) = status.as_deref().map(parse_status).transpose()? else {
            return Ok(PaymentCommit::Stale);
        };
        if !status.accepts_payments() {
            return Ok(PaymentCommit::Stale);
        }

        let changed = tx.execute(
            "UPDATE investor_distributions SET payment_status = ?1, utr = ?2, transaction_id = ?3,
                payment_date = ?4, payment_method = ?5, failure_reason = ?6, updated_at = ?7
             WHERE distribution_id = ?8 AND investor_id = ?9 AND payment_status = ?10",
            params![
                write.new_status.as_str(),
                write.utr.as_deref(),
                write.transaction_id.as_deref(),
                write.payment_date.map(|d| d.to_string()),
                write.payment_method.as_deref(),
                write.failure_reason.as_deref(),
                &now_ts,
                id,
                &write.investor_id,
                write.expected_status.as_str(),
            ],
        )?;
        if changed == 0 {
            return Ok(PaymentCommit::Stale);
        }

        tx.execute(
            "INSERT OR IGNORE INTO payment_records (
                id, distribution_id, investor_id, outcome, reference, transaction_id, utr,
                payment_date, payment_method, failure_reason, amount, recorded_by, recorded_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                uuid::Uuid::new_v4().to_string(),
                id,
                &write.investor_id,
                write.outcome.as_str(),
                write.reference(),
                write.transaction_id.as_deref(),
                write.utr.as_deref(),
                write.payment_date.map(|d| d.to_string()),
                write.payment_method.as_deref(),
                write.failure_reason.as_deref(),
                write.net_amount.minor(),
                recorded_by,
                &now_ts,
            ],
        )?;

        let advanced_to_processing = status == DistributionStatus::Approved;
        tx.execute(
            "UPDATE distributions SET
                status = CASE WHEN status = 'approved' THEN 'processing' ELSE status END,
                updated_at = ?1, version = version + 1
             WHERE id = ?2",
            params![&now_ts, id],
        )?;

        let mut completed = false;
        if write.new_status == PaymentStatus::Completed {
            let unpaid: i64 = tx.query_row(
                "SELECT COUNT(*) FROM investor_distributions
                 WHERE distribution_id = ?1 AND payment_status != 'completed'",
                params![id],
                |row| row.get(0),
            )?;
            if unpaid == 0 {
                completed = tx.execute(
                    "UPDATE distributions SET status = 'completed', completed_at = ?1, updated_at = ?1
                     WHERE id = ?2 AND status = 'processing'",
                    params![&now_ts, id],
                )? == 1;
            }
        }

        tx.commit().context("commit payment")?;
        Ok(PaymentCommit::Applied {
            advanced_to_processing,
            completed,
        })
    }

    /// Attach a Form 16 reference to a settled investor line.
    pub async fn set_form16(
        &self,
        id: &str,
        investor_id: &str,
        document: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE investor_distributions SET form16_document = ?1, updated_at = ?2
             WHERE distribution_id = ?3 AND investor_id = ?4 AND payment_status = 'completed'",
            params![document, to_ts(now), id, investor_id],
        )?;
        Ok(changed == 1)
    }

    pub async fn payment_history(
        &self,
        id: &str,
        investor_id: &str,
    ) -> Result<Vec<PaymentRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, distribution_id, investor_id, outcome, reference, transaction_id, utr,
                    payment_date, payment_method, failure_reason, amount, recorded_by, recorded_at
             FROM payment_records WHERE distribution_id = ?1 AND investor_id = ?2
             ORDER BY recorded_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![id, investor_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, Option<String>>(9)?,
                row.get::<_, i64>(10)?,
                row.get::<_, String>(11)?,
                row.get::<_, String>(12)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (
                id,
                distribution_id,
                investor_id,
                outcome,
                reference,
                transaction_id,
                utr,
                payment_date,
                payment_method,
                failure_reason,
                amount,
                recorded_by,
                recorded_at,
            ) = row?;
            if PaymentOutcome::from_str(&outcome).is_none() {
                return Err(anyhow!("unknown payment outcome {}", outcome));
            }
            out.push(PaymentRecord {
                id,
                distribution_id,
                investor_id,
                outcome,
                reference,
                transaction_id,
                utr,
                payment_date: parse_date(payment_date)?,
                payment_method,
                failure_reason,
                amount: Money(amount),
                recorded_by,
                recorded_at: parse_ts(&recorded_at)?,
            });
        }
        Ok(out)
    }
}

fn to_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid timestamp {}", raw))?
        .with_timezone(&Utc))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

fn parse_date(raw: Option<String>) -> Result<Option<NaiveDate>> {
    raw.map(|s| {
        NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| format!("invalid date {}", s))
    })
    .transpose()
}

fn parse_status(raw: &str) -> Result<DistributionStatus> {
    DistributionStatus::from_str(raw).ok_or_else(|| anyhow!("unknown distribution status {}", raw))
}

fn insert_investors(
    conn: &Connection,
    distribution_id: &str,
    investors: &[InvestorDistribution],
    now: DateTime<Utc>,
) -> Result<()> {
    let now = to_ts(now);
    let mut stmt = conn.prepare_cached(
        "INSERT INTO investor_distributions (
            distribution_id, investor_id, position, number_of_shares, ownership_percentage,
            gross_amount, tds_amount, net_amount, payment_status, utr, transaction_id,
            payment_date, payment_method, failure_reason, form16_document, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
    )?;
    for (position, line) in investors.iter().enumerate() {
        let shares =
            i64::try_from(line.number_of_shares).context("share count exceeds storage range")?;
        stmt.execute(params![
            distribution_id,
            &line.investor_id,
            position as i64,
            shares,
            line.ownership_percentage,
            line.gross_amount.minor(),
            line.tds_amount.minor(),
            line.net_amount.minor(),
            line.payment_status.as_str(),
            line.utr.as_deref(),
            line.transaction_id.as_deref(),
            line.payment_date.map(|d| d.to_string()),
            line.payment_method.as_deref(),
            line.failure_reason.as_deref(),
            line.form16_document.as_deref(),
            &now,
        ])?;
    }
    Ok(())
}

fn read_distribution(conn: &Connection, id: &str) -> Result<Option<Distribution>> {
    let sql = format!("SELECT {} FROM distributions WHERE id = ?1", DISTRIBUTION_COLUMNS);
    let header = conn
        .query_row(&sql, params![id], header_from_row)
        .optional()?;
    match header {
        Some(header) => {
            let investors = read_investors(conn, id)?;
            Ok(Some(header.into_distribution(investors)?))
        }
        None => Ok(None),
    }
}

fn read_investors(conn: &Connection, distribution_id: &str) -> Result<Vec<InvestorDistribution>> {
    let mut stmt = conn.prepare_cached(
        "SELECT investor_id, number_of_shares, ownership_percentage, gross_amount, tds_amount,
                net_amount, payment_status, utr, transaction_id, payment_date, payment_method,
                failure_reason, form16_document
         FROM investor_distributions WHERE distribution_id = ?1 ORDER BY position ASC",
    )?;
    let rows = stmt.query_map(params![distribution_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, f64>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, i64>(4)?,
            row.get::<_, i64>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, Option<String>>(7)?,
            row.get::<_, Option<String>>(8)?,
            row.get::<_, Option<String>>(9)?,
            row.get::<_, Option<String>>(10)?,
            row.get::<_, Option<String>>(11)?,
            row.get::<_, Option<String>>(12)?,
        ))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (
            investor_id,
            shares,
            ownership_percentage,
            gross,
            tds,
            net,
            payment_status,
            utr,
            transaction_id,
            payment_date,
            payment_method,
            failure_reason,
            form16_document,
        ) = row?;
        out.push(InvestorDistribution {
            investor_id,
            number_of_shares: u64::try_from(shares).context("negative share count in ledger")?,
            ownership_percentage,
            gross_amount: Money(gross),
            tds_amount: Money(tds),
            net_amount: Money(net),
            payment_status: PaymentStatus::from_str(&payment_status)
                .ok_or_else(|| anyhow!("unknown payment status {}", payment_status))?,
            utr,
            transaction_id,
            payment_date: parse_date(payment_date)?,
            payment_method,
            failure_reason,
            form16_document,
        });
    }
    Ok(out)
}

struct RawApproval {
    approved: bool,
    approved_by: Option<String>,
    approved_at: Option<String>,
    comments: Option<String>,
}

impl RawApproval {
    fn read(row: &Row<'_>, start: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            approved: row.get(start)?,
            approved_by: row.get(start + 1)?,
            approved_at: row.get(start + 2)?,
            comments: row.get(start + 3)?,
        })
    }

    fn into_record(self) -> Result<ApprovalRecord> {
        Ok(ApprovalRecord {
            approved: self.approved,
            approved_by: self.approved_by,
            approved_at: parse_opt_ts(self.approved_at)?,
            comments: self.comments,
        })
    }
}

/// Header columns as stored; decoded into the domain type outside the row callback.
struct DistributionHeader {
    id: String,
    distribution_number: String,
    project_id: String,
    spv_id: String,
    asset_manager_id: String,
    distribution_type: String,
    gross_proceeds: i64,
    deductions_json: String,
    platform_fees_json: String,
    tds_rate_bps: i64,
    tds_amount: i64,
    net_distributable_amount: i64,
    record_date: Option<String>,
    status: String,
    asset_manager: RawApproval,
    compliance: RawApproval,
    admin: RawApproval,
    cancellation_reason: Option<String>,
    created_at: String,
    updated_at: String,
    approved_at: Option<String>,
    completed_at: Option<String>,
    cancelled_at: Option<String>,
    version: i64,
}

fn header_from_row(row: &Row<'_>) -> rusqlite::Result<DistributionHeader> {
    Ok(DistributionHeader {
        id: row.get(0)?,
        distribution_number: row.get(1)?,
        project_id: row.get(2)?,
        spv_id: row.get(3)?,
        asset_manager_id: row.get(4)?,
        distribution_type: row.get(5)?,
        gross_proceeds: row.get(6)?,
        deductions_json: row.get(7)?,
        platform_fees_json: row.get(8)?,
        tds_rate_bps: row.get(9)?,
        tds_amount: row.get(10)?,
        net_distributable_amount: row.get(11)?,
        record_date: row.get(12)?,
        status: row.get(13)?,
        asset_manager: RawApproval::read(row, 14)?,
        compliance: RawApproval::read(row, 18)?,
        admin: RawApproval::read(row, 22)?,
        cancellation_reason: row.get(26)?,
        created_at: row.get(27)?,
        updated_at: row.get(28)?,
        approved_at: row.get(29)?,
        completed_at: row.get(30)?,
        cancelled_at: row.get(31)?,
        version: row.get(32)?,
    })
}

impl DistributionHeader {
    fn into_distribution(self, investors: Vec<InvestorDistribution>) -> Result<Distribution> {
        let deductions: Deductions =
            serde_json::from_str(&self.deductions_json).context("decode deductions")?;
        let platform_fees: PlatformFees =
            serde_json::from_str(&self.platform_fees_json).context("decode platform fees")?;

        Ok(Distribution {
            distribution_type: DistributionType::from_str(&self.distribution_type)
                .ok_or_else(|| anyhow!("unknown distribution type {}", self.distribution_type))?,
            status: parse_status(&self.status)?,
            tax_withholding: TaxWithholding {
                tds_rate_bps: u32::try_from(self.tds_rate_bps)
                    .context("TDS rate out of range in ledger")?,
                tds_amount: Money(self.tds_amount),
            },
            approvals: Approvals {
                asset_manager_approval: self.asset_manager.into_record()?,
                compliance_approval: self.compliance.into_record()?,
                admin_approval: self.admin.into_record()?,
            },
            record_date: parse_date(self.record_date)?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            approved_at: parse_opt_ts(self.approved_at)?,
            completed_at: parse_opt_ts(self.completed_at)?,
            cancelled_at: parse_opt_ts(self.cancelled_at)?,
            id: self.id,
            distribution_number: self.distribution_number,
            project_id: self.project_id,
            spv_id: self.spv_id,
            asset_manager_id: self.asset_manager_id,
            gross_proceeds: Money(self.gross_proceeds),
            deductions,
            platform_fees,
            net_distributable_amount: Money(self.net_distributable_amount),
            investor_distributions: investors,
            cancellation_reason: self.cancellation_reason,
            version: self.version,
        })
    }
}
