//! Award computation and cap enforcement.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use moeda_shared::types::StudentId;

use super::types::{AwardOutcome, AwardRequest, CapExceededNotice};
use crate::ledger::{AccountStore, LedgerError, LedgerResult};
use crate::policy::PolicyStore;

/// Computes and credits coin awards.
#[derive(Debug)]
pub struct RulesEngine {
    accounts: AccountStore,
    policies: Arc<PolicyStore>,
    student_locks: DashMap<StudentId, Arc<Mutex<()>>>,
}

impl RulesEngine {
    /// Creates an engine crediting through `accounts`.
    pub fn new(accounts: AccountStore, policies: Arc<PolicyStore>) -> Self {
        Self {
            accounts,
            policies,
            student_locks: DashMap::new(),
        }
    }

    /// Awards coins for a qualifying event.
    ///
    /// The amount comes from the active rule and is clipped to what is left
    /// of the student's cap over the rule's trailing window; clipping is
    /// reported through [`AwardOutcome::cap_notice`], never as an error.
    /// Every processed `origin_event_id` is recorded, including awards the
    /// cap reduced to nothing, and resubmitting it returns the original
    /// outcome with its notice.
    pub async fn award(&self, request: &AwardRequest) -> LedgerResult<AwardOutcome> {
        if request.student_id.is_system() {
            return Err(LedgerError::InvalidKind(
                "the fee pool cannot receive awards".to_string(),
            ));
        }

        if let Some(prior) = self.replay(request).await? {
            return Ok(prior);
        }

        let lock = self.student_lock(request.student_id);
        let outcome = {
            let _guard = lock.lock().await;
            self.award_locked(request).await
        };
        drop(lock);
        self.student_locks
            .remove_if(&request.student_id, |_, lock| Arc::strong_count(lock) == 1);
        outcome
    }

    async fn award_locked(&self, request: &AwardRequest) -> LedgerResult<AwardOutcome> {
        let key = request.account();

        // a concurrent resubmission may have landed while we waited
        if let Some(prior) = self.replay(request).await? {
            return Ok(prior);
        }
        if self
            .accounts
            .find_by_origin(key, &request.origin_event_id)
            .await?
            .is_some()
        {
            return Err(LedgerError::DuplicateEvent {
                account: key,
                origin_event_id: request.origin_event_id.clone(),
            });
        }

        let policy = self.policies.current();
        let rule = policy.rule(request.event_type)?;
        let requested = rule.amount_for(request.grade)?;

        let since = self.accounts.now() - rule.period();
        let earned_in_period = self.accounts.earned_since(request.student_id, since).await?;
        let headroom = (rule.per_period_cap - earned_in_period).max(0);
        let granted = requested.min(headroom);

        let cap_notice = (granted < requested).then(|| CapExceededNotice {
            student_id: request.student_id,
            event_type: request.event_type,
            requested,
            granted,
            cap: rule.per_period_cap,
            period_days: rule.period_days,
            earned_in_period,
        });
        if cap_notice.is_some() {
            info!(
                student_id = %request.student_id,
                event_type = %request.event_type,
                requested,
                granted,
                "Award clipped by period cap"
            );
        }

        let recorded = self
            .accounts
            .record_award(
                key,
                granted,
                &request.origin_event_id,
                policy.lot_duration_for(request.discipline_id),
                cap_notice.clone(),
            )
            .await;
        match recorded {
            Ok((transaction, _)) => Ok(AwardOutcome {
                transaction,
                cap_notice,
            }),
            Err(LedgerError::DuplicateEvent {
                account,
                origin_event_id,
            }) => self.replay(request).await?.ok_or(LedgerError::DuplicateEvent {
                account,
                origin_event_id,
            }),
            Err(err) => Err(err),
        }
    }

    /// Rebuilds the outcome recorded for the request's origin event.
    async fn replay(&self, request: &AwardRequest) -> LedgerResult<Option<AwardOutcome>> {
        let key = request.account();
        let Some(record) = self
            .accounts
            .find_award(key, &request.origin_event_id)
            .await?
        else {
            return Ok(None);
        };
        let transaction = match record.transaction_id {
            Some(id) => Some(self.accounts.transaction(id).await?),
            None => None,
        };
        debug!(account = %key, origin_event_id = %request.origin_event_id, "Replaying award");
        Ok(Some(AwardOutcome {
            transaction,
            cap_notice: record.cap_notice,
        }))
    }

    fn student_lock(&self, student_id: StudentId) -> Arc<Mutex<()>> {
        Arc::clone(self.student_locks.entry(student_id).or_default().value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::ledger::{AccountKey, InMemoryLedgerStore, TransactionKind};
    use crate::policy::{EventType, PolicySnapshot};
    use chrono::{Duration, TimeZone, Utc};
    use moeda_shared::config::PolicyConfig;
    use moeda_shared::types::DisciplineId;
    use rust_decimal_macros::dec;

    struct Fixture {
        clock: Arc<ManualClock>,
        accounts: AccountStore,
        policies: Arc<PolicyStore>,
        engine: Arc<RulesEngine>,
    }

    fn fixture_with(configure: impl FnOnce(&mut PolicySnapshot)) -> Fixture {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).unwrap(),
        ));
        let accounts = AccountStore::new(Arc::new(InMemoryLedgerStore::new()), clock.clone());
        let mut snapshot = PolicySnapshot::from_config(&PolicyConfig::default()).unwrap();
        configure(&mut snapshot);
        let policies = Arc::new(PolicyStore::new(snapshot).unwrap());
        let engine = Arc::new(RulesEngine::new(accounts.clone(), Arc::clone(&policies)));
        Fixture {
            clock,
            accounts,
            policies,
            engine,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(|_| {})
    }

    fn request(student_id: StudentId, discipline_id: DisciplineId, origin: &str) -> AwardRequest {
        AwardRequest {
            student_id,
            discipline_id,
            event_type: EventType::ActivityDelivered,
            origin_event_id: origin.to_string(),
            grade: None,
        }
    }

    fn set_cap(snapshot: &mut PolicySnapshot, cap: i64) {
        for rule in snapshot.rules.values_mut() {
            rule.per_period_cap = cap;
        }
    }

    #[tokio::test]
    async fn test_award_credits_base_amount() {
        let fx = fixture();
        let req = request(StudentId::new(), DisciplineId::new(), "delivery-1");

        let outcome = fx.engine.award(&req).await.unwrap();

        assert_eq!(outcome.granted(), 10);
        assert!(outcome.cap_notice.is_none());
        assert_eq!(fx.accounts.balance(req.account()).await.unwrap(), 10);

        let snapshot = fx.accounts.account(req.account()).await.unwrap();
        assert_eq!(snapshot.lots.len(), 1);
        assert_eq!(snapshot.lots[0].expires_at, fx.clock.now() + Duration::days(180));
    }

    #[tokio::test]
    async fn test_award_is_idempotent() {
        let fx = fixture();
        let req = request(StudentId::new(), DisciplineId::new(), "delivery-1");

        let first = fx.engine.award(&req).await.unwrap();
        let second = fx.engine.award(&req).await.unwrap();

        assert_eq!(first.transaction, second.transaction);
        assert_eq!(fx.accounts.balance(req.account()).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_graded_award_uses_formula() {
        let fx = fixture_with(|snapshot| {
            let rule = snapshot.rules.get_mut(&EventType::MaxGrade).unwrap();
            rule.base_amount = 5;
            rule.grade_multiplier = Some(dec!(2));
            rule.perfect_score_bonus = 10;
        });
        let req = AwardRequest {
            event_type: EventType::MaxGrade,
            grade: Some(dec!(10)),
            ..request(StudentId::new(), DisciplineId::new(), "grade-sync-1")
        };

        assert_eq!(fx.engine.award(&req).await.unwrap().granted(), 35);
    }

    #[tokio::test]
    async fn test_cap_clips_award_across_disciplines() {
        let fx = fixture_with(|snapshot| set_cap(snapshot, 25));
        let student = StudentId::new();

        fx.engine
            .award(&request(student, DisciplineId::new(), "a"))
            .await
            .unwrap();
        fx.engine
            .award(&request(student, DisciplineId::new(), "b"))
            .await
            .unwrap();
        let clipped = fx
            .engine
            .award(&request(student, DisciplineId::new(), "c"))
            .await
            .unwrap();

        assert_eq!(clipped.granted(), 5);
        let notice = clipped.cap_notice.unwrap();
        assert_eq!(notice.requested, 10);
        assert_eq!(notice.granted, 5);
        assert_eq!(notice.earned_in_period, 20);

        let exhausted = fx
            .engine
            .award(&request(student, DisciplineId::new(), "d"))
            .await
            .unwrap();
        assert!(exhausted.transaction.is_none());
        assert_eq!(exhausted.cap_notice.unwrap().granted, 0);
    }

    #[tokio::test]
    async fn test_cap_window_slides() {
        let fx = fixture_with(|snapshot| set_cap(snapshot, 10));
        let student = StudentId::new();
        let discipline = DisciplineId::new();

        fx.engine.award(&request(student, discipline, "a")).await.unwrap();
        assert_eq!(
            fx.engine.award(&request(student, discipline, "b")).await.unwrap().granted(),
            0
        );

        fx.clock.advance(Duration::days(31));
        assert_eq!(
            fx.engine.award(&request(student, discipline, "c")).await.unwrap().granted(),
            10
        );
    }

    #[tokio::test]
    async fn test_resubmitted_award_keeps_original_outcome_after_window_slides() {
        let fx = fixture_with(|snapshot| set_cap(snapshot, 10));
        let student = StudentId::new();
        let discipline = DisciplineId::new();

        fx.engine.award(&request(student, discipline, "a")).await.unwrap();
        let capped = fx.engine.award(&request(student, discipline, "b")).await.unwrap();
        assert_eq!(capped.granted(), 0);
        assert_eq!(capped.cap_notice.as_ref().unwrap().earned_in_period, 10);

        fx.clock.advance(Duration::days(31));
        let resubmitted = fx.engine.award(&request(student, discipline, "b")).await.unwrap();

        assert_eq!(resubmitted, capped);
        assert_eq!(fx.accounts.balance(AccountKey::new(student, discipline)).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_replayed_clipped_award_carries_notice() {
        let fx = fixture_with(|snapshot| set_cap(snapshot, 15));
        let student = StudentId::new();
        let discipline = DisciplineId::new();

        fx.engine.award(&request(student, discipline, "a")).await.unwrap();
        let clipped = fx.engine.award(&request(student, discipline, "b")).await.unwrap();
        let replayed = fx.engine.award(&request(student, discipline, "b")).await.unwrap();

        assert_eq!(clipped.granted(), 5);
        assert_eq!(replayed, clipped);
        assert_eq!(replayed.cap_notice.unwrap().requested, 10);
    }

    #[tokio::test]
    async fn test_award_origin_taken_by_other_credit_is_duplicate() {
        let fx = fixture();
        let req = request(StudentId::new(), DisciplineId::new(), "shared-origin");
        fx.accounts
            .credit(req.account(), 3, TransactionKind::Adjust, "shared-origin", None)
            .await
            .unwrap();

        assert!(matches!(
            fx.engine.award(&req).await,
            Err(LedgerError::DuplicateEvent { .. })
        ));
        assert_eq!(fx.accounts.balance(req.account()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_awards_share_headroom() {
        let fx = fixture_with(|snapshot| set_cap(snapshot, 30));
        let student = StudentId::new();

        let tasks: Vec<_> = (0..6)
            .map(|i| {
                let engine = Arc::clone(&fx.engine);
                tokio::spawn(async move {
                    engine
                        .award(&request(student, DisciplineId::new(), &format!("evt-{i}")))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let since = fx.clock.now() - Duration::days(30);
        assert_eq!(fx.accounts.earned_since(student, since).await.unwrap(), 30);
    }

    #[tokio::test]
    async fn test_unknown_rule_rejected() {
        let fx = fixture();
        let mut snapshot = (*fx.policies.current()).clone();
        snapshot.rules.remove(&EventType::SummaryPosted);
        fx.policies.replace(snapshot).unwrap();

        let req = AwardRequest {
            event_type: EventType::SummaryPosted,
            ..request(StudentId::new(), DisciplineId::new(), "summary-1")
        };
        assert_eq!(
            fx.engine.award(&req).await.unwrap_err(),
            LedgerError::RuleNotFound("summary_posted".to_string())
        );
    }

    #[tokio::test]
    async fn test_fee_pool_cannot_earn() {
        let fx = fixture();
        let req = request(
            AccountKey::FEE_POOL.student_id,
            AccountKey::FEE_POOL.discipline_id,
            "x",
        );
        assert!(fx.engine.award(&req).await.is_err());
    }
}
