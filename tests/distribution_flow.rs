//! End-to-end distribution flows against a real SQLite ledger.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::NaiveDate;
use spv_distributions::auth::{Principal, Role};
use spv_distributions::distribution::{
    ApprovalRole, ConflictKind, DistributionError, DistributionEvent, DistributionLedger,
    DistributionService, NewDistribution, NotificationDispatcher, Notifier, PaymentConfirmation,
    PaymentFailure,
};
use spv_distributions::models::{
    Distribution, DistributionStatus, DistributionType, FeeItem, Holding, Money, PageRequest,
    PaymentStatus, ShareholdingSnapshot,
};
use tempfile::NamedTempFile;

#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<DistributionEvent>>,
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &DistributionEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

struct FailingNotifier;

#[async_trait::async_trait]
impl Notifier for FailingNotifier {
    async fn notify(&self, _event: &DistributionEvent) -> Result<()> {
        anyhow::bail!("notification service unavailable")
    }
}

struct Harness {
    service: Arc<DistributionService>,
    _db: NamedTempFile,
}

fn harness_with(notifier: Arc<dyn Notifier>) -> Harness {
    let db = NamedTempFile::new().unwrap();
    let ledger = DistributionLedger::new(db.path().to_str().unwrap()).unwrap();
    let service = DistributionService::new(Arc::new(ledger), NotificationDispatcher::new(notifier));
    Harness {
        service: Arc::new(service),
        _db: db,
    }
}

fn harness() -> Harness {
    harness_with(Arc::new(RecordingNotifier::default()))
}

fn manager() -> Principal {
    Principal::new("am-1", Role::AssetManager)
}

fn compliance() -> Principal {
    Principal::new("co-1", Role::Compliance)
}

fn admin() -> Principal {
    Principal::new("ad-1", Role::Admin)
}

fn snapshot(holdings: &[(&str, u64)]) -> ShareholdingSnapshot {
    ShareholdingSnapshot {
        record_date: NaiveDate::from_ymd_opt(2026, 3, 31),
        total_shares: holdings.iter().map(|(_, s)| s).sum(),
        holdings: holdings
            .iter()
            .map(|(id, shares)| Holding {
                investor_id: id.to_string(),
                shares: *shares,
            })
            .collect(),
    }
}

/// Scenario A inputs: 1,000,000 gross, 50,000 deductions, 20,000 fees, 20% TDS, 60/40.
fn scenario_a() -> NewDistribution {
    NewDistribution {
        project_id: "proj-1".to_string(),
        spv_id: "spv-1".to_string(),
        asset_manager_id: None,
        distribution_type: DistributionType::SaleProceeds,
        gross_proceeds: Money(1_000_000),
        deductions: vec![FeeItem {
            description: "brokerage".to_string(),
            amount: Money(50_000),
        }],
        platform_fees: vec![FeeItem {
            description: "platform fee".to_string(),
            amount: Money(20_000),
        }],
        tds_rate_bps: 2_000,
        snapshot: snapshot(&[("A", 60), ("B", 40)]),
        calculate: true,
    }
}

fn utr(reference: &str) -> PaymentConfirmation {
    PaymentConfirmation {
        transaction_id: None,
        utr: Some(reference.to_string()),
        payment_date: NaiveDate::from_ymd_opt(2026, 4, 15).unwrap(),
        payment_method: Some("NEFT".to_string()),
    }
}

fn txn(reference: &str) -> PaymentConfirmation {
    PaymentConfirmation {
        transaction_id: Some(reference.to_string()),
        utr: None,
        payment_date: NaiveDate::from_ymd_opt(2026, 4, 15).unwrap(),
        payment_method: None,
    }
}

async fn approve_all(service: &DistributionService, id: &str) -> Distribution {
    service
        .approve(&manager(), id, ApprovalRole::AssetManager, Some("numbers tie out".into()))
        .await
        .unwrap();
    service
        .approve(&compliance(), id, ApprovalRole::Compliance, None)
        .await
        .unwrap();
    service
        .approve(&admin(), id, ApprovalRole::Admin, None)
        .await
        .unwrap()
}

fn assert_reconciles(dist: &Distribution) {
    assert_eq!(
        dist.total_net(),
        dist.net_distributable_amount - dist.total_tds(),
        "net lines must equal pool minus withholding"
    );
    assert_eq!(dist.total_tds(), dist.tax_withholding.tds_amount);
    assert!(dist.approvals.is_consistent());
}

#[tokio::test]
async fn test_scenario_a_breakdown() {
    let h = harness();
    let dist = h.service.create(&manager(), scenario_a()).await.unwrap();

    assert_eq!(dist.net_distributable_amount, Money(930_000));
    let a = dist.investor("A").unwrap();
    assert_eq!((a.gross_amount, a.tds_amount, a.net_amount), (Money(558_000), Money(111_600), Money(446_400)));
    let b = dist.investor("B").unwrap();
    assert_eq!((b.gross_amount, b.tds_amount, b.net_amount), (Money(372_000), Money(74_400), Money(297_600)));
    assert_eq!(dist.total_net(), Money(744_000));
    assert!(dist.distribution_number.starts_with("DIST-"));
    assert_reconciles(&dist);
}

#[tokio::test]
async fn test_scenario_b_compliance_before_manager() {
    let h = harness();
    let dist = h.service.create(&manager(), scenario_a()).await.unwrap();

    let err = h
        .service
        .approve(&compliance(), &dist.id, ApprovalRole::Compliance, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DistributionError::Conflict(ConflictKind::MissingPrerequisite {
            missing: ApprovalRole::AssetManager
        })
    ));

    let reloaded = h.service.get_distribution(&admin(), &dist.id).await.unwrap();
    assert_eq!(reloaded.status, DistributionStatus::Calculated);
    assert!(!reloaded.approvals.compliance_approval.approved);
}

#[tokio::test]
async fn test_scenario_c_status_flips_on_admin_approval() {
    let h = harness();
    let dist = h.service.create(&manager(), scenario_a()).await.unwrap();

    let after_manager = h
        .service
        .approve(&manager(), &dist.id, ApprovalRole::AssetManager, None)
        .await
        .unwrap();
    assert_eq!(after_manager.status, DistributionStatus::Calculated);

    let after_compliance = h
        .service
        .approve(&compliance(), &dist.id, ApprovalRole::Compliance, Some("  ".into()))
        .await
        .unwrap();
    assert_eq!(after_compliance.status, DistributionStatus::Calculated);
    assert_eq!(after_compliance.approvals.compliance_approval.comments, None);
    assert!(after_compliance.approved_at.is_none());

    let after_admin = h
        .service
        .approve(&admin(), &dist.id, ApprovalRole::Admin, None)
        .await
        .unwrap();
    assert_eq!(after_admin.status, DistributionStatus::Approved);
    assert!(after_admin.approved_at.is_some());
    assert_reconciles(&after_admin);
}

#[tokio::test]
async fn test_duplicate_approval_returns_existing_record() {
    let h = harness();
    let dist = h.service.create(&manager(), scenario_a()).await.unwrap();
    h.service
        .approve(&manager(), &dist.id, ApprovalRole::AssetManager, Some("first".into()))
        .await
        .unwrap();

    let err = h
        .service
        .approve(&manager(), &dist.id, ApprovalRole::AssetManager, Some("second".into()))
        .await
        .unwrap_err();
    match err {
        DistributionError::Conflict(ConflictKind::AlreadyApproved { record, .. }) => {
            assert_eq!(record.comments.as_deref(), Some("first"));
            assert_eq!(record.approved_by.as_deref(), Some("am-1"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_unassigned_manager_cannot_approve() {
    let h = harness();
    let dist = h.service.create(&manager(), scenario_a()).await.unwrap();
    let other = Principal::new("am-2", Role::AssetManager);

    let err = h
        .service
        .approve(&other, &dist.id, ApprovalRole::AssetManager, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DistributionError::Forbidden(_)));
}

#[tokio::test]
async fn test_scenario_d_utr_only_completes_and_promotes() {
    let h = harness();
    let dist = h.service.create(&manager(), scenario_a()).await.unwrap();
    approve_all(&h.service, &dist.id).await;

    let first = h
        .service
        .mark_investor_paid(&admin(), &dist.id, "A", utr("UTR-A-1"))
        .await
        .unwrap();
    assert!(!first.replayed);
    assert_eq!(
        first.distribution.investor("A").unwrap().payment_status,
        PaymentStatus::Completed
    );
    assert_eq!(first.distribution.status, DistributionStatus::Processing);

    let last = h
        .service
        .mark_investor_paid(&admin(), &dist.id, "B", txn("TXN-B-1"))
        .await
        .unwrap();
    assert_eq!(last.distribution.status, DistributionStatus::Completed);
    assert!(last.distribution.completed_at.is_some());
    assert!(last.distribution.all_investors_paid());
}

#[tokio::test]
async fn test_scenario_e_thirds_reconcile() {
    let h = harness();
    let mut request = scenario_a();
    request.gross_proceeds = Money(100);
    request.deductions.clear();
    request.platform_fees.clear();
    request.tds_rate_bps = 0;
    request.snapshot = snapshot(&[("X", 3_333), ("Y", 3_333), ("Z", 3_334)]);

    let dist = h.service.create(&manager(), request).await.unwrap();
    let gross: Money = dist.investor_distributions.iter().map(|i| i.gross_amount).sum();
    assert_eq!(gross, Money(100));
    assert_eq!(dist.investor("Z").unwrap().gross_amount, Money(34));
    assert_reconciles(&dist);
}

#[tokio::test]
async fn test_mark_paid_is_idempotent() {
    let h = harness();
    let dist = h.service.create(&manager(), scenario_a()).await.unwrap();
    approve_all(&h.service, &dist.id).await;

    h.service
        .mark_investor_paid(&admin(), &dist.id, "A", txn("TXN-1"))
        .await
        .unwrap();
    let replay = h
        .service
        .mark_investor_paid(&admin(), &dist.id, "A", txn("TXN-1"))
        .await
        .unwrap();
    assert!(replay.replayed);

    let history = h
        .service
        .payment_history(&admin(), &dist.id, "A")
        .await
        .unwrap();
    assert_eq!(history.len(), 1);

    let err = h
        .service
        .mark_investor_paid(&admin(), &dist.id, "A", txn("TXN-2"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DistributionError::Conflict(ConflictKind::AlreadyPaid { .. })
    ));
}

#[tokio::test]
async fn test_resend_with_only_utr_is_a_replay() {
    let h = harness();
    let dist = h.service.create(&manager(), scenario_a()).await.unwrap();
    approve_all(&h.service, &dist.id).await;

    let mut both = txn("TXN-A");
    both.utr = Some("UTR-A".to_string());
    h.service
        .mark_investor_paid(&admin(), &dist.id, "A", both)
        .await
        .unwrap();

    let resend = h
        .service
        .mark_investor_paid(&admin(), &dist.id, "A", utr("UTR-A"))
        .await
        .unwrap();
    assert!(resend.replayed);
    assert_eq!(
        h.service
            .payment_history(&admin(), &dist.id, "A")
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_payment_requires_reference_and_approval() {
    let h = harness();
    let dist = h.service.create(&manager(), scenario_a()).await.unwrap();

    let err = h
        .service
        .mark_investor_paid(&admin(), &dist.id, "A", txn("TXN-1"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DistributionError::Conflict(ConflictKind::InvalidStatus { .. })
    ));

    approve_all(&h.service, &dist.id).await;
    let mut blank = utr("");
    blank.transaction_id = Some("   ".into());
    let err = h
        .service
        .mark_investor_paid(&admin(), &dist.id, "A", blank)
        .await
        .unwrap_err();
    assert!(matches!(err, DistributionError::Validation(_)));
}

#[tokio::test]
async fn test_failed_payment_can_be_retried() {
    let h = harness();
    let dist = h.service.create(&manager(), scenario_a()).await.unwrap();
    approve_all(&h.service, &dist.id).await;

    let failed = h
        .service
        .mark_investor_failed(
            &admin(),
            &dist.id,
            "B",
            PaymentFailure {
                reason: "beneficiary account frozen".to_string(),
                transaction_id: None,
                utr: Some("UTR-B-BOUNCE".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(failed.investor("B").unwrap().payment_status, PaymentStatus::Failed);
    assert_eq!(failed.status, DistributionStatus::Processing);

    h.service
        .mark_investor_paid(&admin(), &dist.id, "A", txn("TXN-A"))
        .await
        .unwrap();
    let retried = h
        .service
        .mark_investor_paid(&admin(), &dist.id, "B", txn("TXN-B-RETRY"))
        .await
        .unwrap();
    let line = retried.distribution.investor("B").unwrap();
    assert_eq!(line.payment_status, PaymentStatus::Completed);
    assert_eq!(line.failure_reason, None);
    assert_eq!(retried.distribution.status, DistributionStatus::Completed);

    let history = h
        .service
        .payment_history(&admin(), &dist.id, "B")
        .await
        .unwrap();
    let outcomes: Vec<_> = history.iter().map(|r| r.outcome.as_str()).collect();
    assert_eq!(outcomes, vec!["failed", "confirmed"]);
}

#[tokio::test]
async fn test_cancel_blocks_further_work() {
    let h = harness();
    let dist = h.service.create(&manager(), scenario_a()).await.unwrap();

    let err = h
        .service
        .cancel(&manager(), &dist.id, Some("wrong snapshot".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, DistributionError::Forbidden(_)));

    let cancelled = h
        .service
        .cancel(&admin(), &dist.id, Some("wrong snapshot".into()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, DistributionStatus::Cancelled);
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("wrong snapshot"));

    let err = h
        .service
        .approve(&manager(), &dist.id, ApprovalRole::AssetManager, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DistributionError::Conflict(ConflictKind::InvalidStatus {
            status: DistributionStatus::Cancelled,
            ..
        })
    ));
}

#[tokio::test]
async fn test_submit_for_review_then_approve() {
    let h = harness();
    let dist = h.service.create(&manager(), scenario_a()).await.unwrap();

    let submitted = h.service.submit_for_review(&manager(), &dist.id).await.unwrap();
    assert_eq!(submitted.status, DistributionStatus::UnderReview);

    let approved = approve_all(&h.service, &dist.id).await;
    assert_eq!(approved.status, DistributionStatus::Approved);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_manager_approvals_single_winner() {
    let h = harness();
    let dist = h.service.create(&manager(), scenario_a()).await.unwrap();

    let tasks: Vec<_> = (0..4)
        .map(|i| {
            let service = h.service.clone();
            let id = dist.id.clone();
            tokio::spawn(async move {
                service
                    .approve(&manager(), &id, ApprovalRole::AssetManager, Some(format!("attempt {i}")))
                    .await
            })
        })
        .collect();

    let mut wins = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => wins += 1,
            Err(DistributionError::Conflict(ConflictKind::AlreadyApproved { .. })) => {}
            Err(other) => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(wins, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_confirmations_store_once() {
    let h = harness();
    let dist = h.service.create(&manager(), scenario_a()).await.unwrap();
    approve_all(&h.service, &dist.id).await;

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let service = h.service.clone();
            let id = dist.id.clone();
            tokio::spawn(async move {
                service
                    .mark_investor_paid(&admin(), &id, "A", txn("TXN-SAME"))
                    .await
            })
        })
        .collect();

    let mut applied = 0;
    for task in tasks {
        let receipt = task.await.unwrap().unwrap();
        if !receipt.replayed {
            applied += 1;
        }
    }
    assert_eq!(applied, 1);

    let history = h
        .service
        .payment_history(&admin(), &dist.id, "A")
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_payments_for_different_investors_complete() {
    let h = harness();
    let mut request = scenario_a();
    request.snapshot = snapshot(&[("A", 25), ("B", 25), ("C", 25), ("D", 25)]);
    let dist = h.service.create(&manager(), request).await.unwrap();
    approve_all(&h.service, &dist.id).await;

    let tasks: Vec<_> = ["A", "B", "C", "D"]
        .into_iter()
        .map(|investor| {
            let service = h.service.clone();
            let id = dist.id.clone();
            tokio::spawn(async move {
                service
                    .mark_investor_paid(&admin(), &id, investor, txn(&format!("TXN-{investor}")))
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let done = h.service.get_distribution(&admin(), &dist.id).await.unwrap();
    assert_eq!(done.status, DistributionStatus::Completed);
    assert!(done.all_investors_paid());
}

#[tokio::test]
async fn test_notifier_failure_does_not_block_writes() {
    let h = harness_with(Arc::new(FailingNotifier));
    let dist = h.service.create(&manager(), scenario_a()).await.unwrap();
    let approved = approve_all(&h.service, &dist.id).await;
    assert_eq!(approved.status, DistributionStatus::Approved);
}

#[tokio::test]
async fn test_notifications_follow_the_chain() {
    let notifier = Arc::new(RecordingNotifier::default());
    let h = harness_with(notifier.clone());
    let dist = h.service.create(&manager(), scenario_a()).await.unwrap();
    approve_all(&h.service, &dist.id).await;

    // Dispatch is spawned; give the tasks a moment to run
    for _ in 0..50 {
        if notifier.events.lock().unwrap().len() >= 4 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let events = notifier.events.lock().unwrap().clone();
    let stages: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            DistributionEvent::AwaitingApproval { stage, .. } => Some(*stage),
            _ => None,
        })
        .collect();
    assert_eq!(stages.len(), 3);
    for role in ApprovalRole::CHAIN {
        assert!(stages.contains(&role), "missing {:?}", role);
    }
    assert!(events
        .iter()
        .any(|e| matches!(e, DistributionEvent::Approved { .. })));
}

#[tokio::test]
async fn test_visibility_rules() {
    let h = harness();
    let dist = h.service.create(&manager(), scenario_a()).await.unwrap();

    let other_manager = Principal::new("am-2", Role::AssetManager);
    assert!(matches!(
        h.service.get_distribution(&other_manager, &dist.id).await,
        Err(DistributionError::Forbidden(_))
    ));
    assert!(h
        .service
        .by_asset_manager(&other_manager, "am-1")
        .await
        .is_err());
    assert_eq!(
        h.service.by_asset_manager(&compliance(), "am-1").await.unwrap().len(),
        1
    );

    let investor = Principal::new("A", Role::Investor);
    let mine = h.service.my_distributions(&investor, PageRequest::default()).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].investor_distributions.len(), 1);
    assert!(h
        .service
        .list(&investor, Default::default())
        .await
        .is_err());
}
