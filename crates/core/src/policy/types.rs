//! Distribution rules, expiration and transfer policies.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use moeda_shared::config::PolicyConfig;
use moeda_shared::types::DisciplineId;

use super::error::PolicyError;
use crate::ledger::LedgerError;

/// Highest grade on the school scale; earns the perfect-score bonus.
pub const MAX_GRADE: Decimal = Decimal::TEN;

/// Student events that can earn coins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// An activity was delivered.
    ActivityDelivered,
    /// The student got the maximum grade.
    MaxGrade,
    /// A class summary was posted.
    SummaryPosted,
    /// A quiz was completed.
    QuizCompleted,
}

impl EventType {
    /// All event types.
    pub const ALL: [Self; 4] = [
        Self::ActivityDelivered,
        Self::MaxGrade,
        Self::SummaryPosted,
        Self::QuizCompleted,
    ];

    /// Returns the wire name of the event type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ActivityDelivered => "activity_delivered",
            Self::MaxGrade => "max_grade",
            Self::SummaryPosted => "summary_posted",
            Self::QuizCompleted => "quiz_completed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| PolicyError::UnknownEventType(s.to_string()))
    }
}

/// How many coins an event earns and how much a student may earn per period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionRule {
    /// The event the rule pays for.
    pub event_type: EventType,
    /// Coins per qualifying event.
    pub base_amount: i64,
    /// Most coins a student may earn inside the trailing window.
    pub per_period_cap: i64,
    /// Length of the trailing window.
    pub period_days: u32,
    /// Coins per grade point, for events that carry a grade.
    #[serde(default)]
    pub grade_multiplier: Option<Decimal>,
    /// Extra coins for a maximum grade.
    #[serde(default)]
    pub perfect_score_bonus: i64,
}

impl DistributionRule {
    /// Checks that amounts are non-negative and the window is at least a day.
    pub fn validate(&self) -> Result<(), PolicyError> {
        let invalid = |msg: &str| Err(PolicyError::InvalidPolicy(format!("{}: {msg}", self.event_type)));
        if self.base_amount < 0 {
            return invalid("base_amount must not be negative");
        }
        if self.per_period_cap < 0 {
            return invalid("per_period_cap must not be negative");
        }
        if self.period_days == 0 {
            return invalid("period_days must be at least 1");
        }
        if self.grade_multiplier.is_some_and(|m| m.is_sign_negative()) {
            return invalid("grade_multiplier must not be negative");
        }
        if self.perfect_score_bonus < 0 {
            return invalid("perfect_score_bonus must not be negative");
        }
        Ok(())
    }

    /// The trailing cap window.
    #[must_use]
    pub fn period(&self) -> Duration {
        Duration::days(i64::from(self.period_days))
    }

    /// Coins earned by one event.
    ///
    /// `base_amount`, plus `floor(grade × grade_multiplier)` when both are
    /// present, plus `perfect_score_bonus` for a grade of [`MAX_GRADE`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidGrade` for grades outside `0..=10`.
    pub fn amount_for(&self, grade: Option<Decimal>) -> Result<i64, LedgerError> {
        let Some(grade) = grade else {
            return Ok(self.base_amount);
        };
        if grade.is_sign_negative() || grade > MAX_GRADE {
            return Err(LedgerError::InvalidGrade(grade));
        }

        let graded = match self.grade_multiplier {
            Some(multiplier) => grade
                .checked_mul(multiplier)
                .and_then(|product| product.floor().to_i64())
                .ok_or(LedgerError::InvalidGrade(grade))?,
            None => 0,
        };
        let bonus = if grade == MAX_GRADE {
            self.perfect_score_bonus
        } else {
            0
        };

        self.base_amount
            .checked_add(graded)
            .and_then(|amount| amount.checked_add(bonus))
            .ok_or(LedgerError::InvalidGrade(grade))
    }
}

/// How long earned coins stay spendable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirationPolicy {
    /// Lifetime of a lot.
    pub validity_days: u32,
    /// Warning period before expiry.
    pub notice_days: u32,
}

impl ExpirationPolicy {
    /// Checks that lots live at least a day and the notice fits inside.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.validity_days == 0 {
            return Err(PolicyError::InvalidPolicy(
                "validity_days must be at least 1".to_string(),
            ));
        }
        if self.notice_days > self.validity_days {
            return Err(PolicyError::InvalidPolicy(
                "notice_days must not exceed validity_days".to_string(),
            ));
        }
        Ok(())
    }

    /// Lifetime of a new lot.
    #[must_use]
    pub fn lot_duration(&self) -> Duration {
        Duration::days(i64::from(self.validity_days))
    }

    /// How far ahead of expiry the owner is warned.
    #[must_use]
    pub fn notice_window(&self) -> Duration {
        Duration::days(i64::from(self.notice_days))
    }
}

/// Whether discipline balances are isolated, and what moving coins costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPolicy {
    /// Isolated discipline balances when true, one shared pool when false.
    pub separation_enabled: bool,
    /// Fee in percent, `0..100`.
    pub fee_percent: u8,
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self {
            separation_enabled: true,
            fee_percent: 10,
        }
    }
}

impl TransferPolicy {
    /// Checks that the fee leaves something to deliver.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.fee_percent >= 100 {
            return Err(PolicyError::InvalidPolicy(
                "fee_percent must be below 100".to_string(),
            ));
        }
        Ok(())
    }

    /// `floor(amount × fee_percent / 100)`.
    #[must_use]
    pub fn fee_for(&self, amount: i64) -> i64 {
        let fee = i128::from(amount) * i128::from(self.fee_percent) / 100;
        i64::try_from(fee).unwrap_or(0)
    }
}

/// The complete, versioned policy set read by every component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    /// Bumped on every replacement.
    #[serde(default)]
    pub version: u64,
    /// One rule per event type.
    pub rules: BTreeMap<EventType, DistributionRule>,
    /// Global expiration policy; `None` means coins never expire.
    pub expiration: Option<ExpirationPolicy>,
    /// Per-discipline expiration overrides.
    #[serde(default)]
    pub expiration_overrides: BTreeMap<DisciplineId, ExpirationPolicy>,
    /// Transfer policy.
    pub transfer: TransferPolicy,
}

impl PolicySnapshot {
    /// Builds a snapshot from configuration.
    pub fn from_config(config: &PolicyConfig) -> Result<Self, PolicyError> {
        let mut rules = BTreeMap::new();
        for rule in &config.rules {
            let event_type: EventType = rule.event_type.parse()?;
            rules.insert(
                event_type,
                DistributionRule {
                    event_type,
                    base_amount: rule.base_amount,
                    per_period_cap: rule.per_period_cap,
                    period_days: rule.period_days,
                    grade_multiplier: rule.grade_multiplier,
                    perfect_score_bonus: rule.perfect_score_bonus,
                },
            );
        }

        let snapshot = Self {
            version: 1,
            rules,
            expiration: config.expiration.map(|e| ExpirationPolicy {
                validity_days: e.validity_days,
                notice_days: e.notice_days,
            }),
            expiration_overrides: config
                .expiration_overrides
                .iter()
                .map(|o| {
                    (
                        DisciplineId::from_uuid(o.discipline_id),
                        ExpirationPolicy {
                            validity_days: o.validity_days,
                            notice_days: o.notice_days,
                        },
                    )
                })
                .collect(),
            transfer: TransferPolicy {
                separation_enabled: config.transfer.separation_enabled,
                fee_percent: config.transfer.fee_percent,
            },
        };
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Validates every rule and policy in the snapshot.
    pub fn validate(&self) -> Result<(), PolicyError> {
        for (event_type, rule) in &self.rules {
            if *event_type != rule.event_type {
                return Err(PolicyError::InvalidPolicy(format!(
                    "rule keyed as {event_type} is for {}",
                    rule.event_type
                )));
            }
            rule.validate()?;
        }
        if let Some(expiration) = &self.expiration {
            expiration.validate()?;
        }
        for expiration in self.expiration_overrides.values() {
            expiration.validate()?;
        }
        self.transfer.validate()
    }

    /// The rule for `event_type`.
    pub fn rule(&self, event_type: EventType) -> Result<&DistributionRule, LedgerError> {
        self.rules
            .get(&event_type)
            .ok_or_else(|| LedgerError::RuleNotFound(event_type.to_string()))
    }

    /// Effective expiration policy for a discipline.
    #[must_use]
    pub fn expiration_for(&self, discipline_id: DisciplineId) -> Option<ExpirationPolicy> {
        self.expiration_overrides
            .get(&discipline_id)
            .copied()
            .or(self.expiration)
    }

    /// Lot lifetime for new coins in a discipline.
    #[must_use]
    pub fn lot_duration_for(&self, discipline_id: DisciplineId) -> Option<Duration> {
        self.expiration_for(discipline_id)
            .map(|policy| policy.lot_duration())
    }

    /// Widest notice window across all expiration policies.
    #[must_use]
    pub fn max_notice_window(&self) -> Duration {
        self.expiration
            .iter()
            .chain(self.expiration_overrides.values())
            .map(ExpirationPolicy::notice_window)
            .max()
            .unwrap_or_else(Duration::zero)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn graded_rule() -> DistributionRule {
        DistributionRule {
            event_type: EventType::MaxGrade,
            base_amount: 5,
            per_period_cap: 500,
            period_days: 30,
            grade_multiplier: Some(dec!(1.5)),
            perfect_score_bonus: 20,
        }
    }

    #[rstest]
    #[case(None, 5)]
    #[case(Some(dec!(7)), 15)]
    #[case(Some(dec!(7.5)), 16)]
    #[case(Some(dec!(0)), 5)]
    #[case(Some(dec!(10)), 40)]
    fn test_award_formula(#[case] grade: Option<Decimal>, #[case] expected: i64) {
        assert_eq!(graded_rule().amount_for(grade).unwrap(), expected);
    }

    #[rstest]
    #[case(dec!(-0.5))]
    #[case(dec!(10.01))]
    fn test_grade_out_of_range(#[case] grade: Decimal) {
        assert_eq!(
            graded_rule().amount_for(Some(grade)),
            Err(LedgerError::InvalidGrade(grade))
        );
    }

    #[test]
    fn test_bonus_without_multiplier() {
        let rule = DistributionRule {
            grade_multiplier: None,
            ..graded_rule()
        };
        assert_eq!(rule.amount_for(Some(dec!(10))).unwrap(), 25);
        assert_eq!(rule.amount_for(Some(dec!(9.9))).unwrap(), 5);
    }

    #[rstest]
    #[case(10, 100, 10)]
    #[case(10, 15, 1)]
    #[case(10, 9, 0)]
    #[case(0, 100, 0)]
    #[case(99, 100, 99)]
    fn test_fee_is_floored(#[case] fee_percent: u8, #[case] amount: i64, #[case] fee: i64) {
        let policy = TransferPolicy {
            separation_enabled: true,
            fee_percent,
        };
        assert_eq!(policy.fee_for(amount), fee);
    }

    #[test]
    fn test_full_fee_rejected() {
        let policy = TransferPolicy {
            separation_enabled: true,
            fee_percent: 100,
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_snapshot_from_default_config() {
        let snapshot = PolicySnapshot::from_config(&PolicyConfig::default()).unwrap();
        assert_eq!(snapshot.rules.len(), 4);
        assert_eq!(
            snapshot.rule(EventType::ActivityDelivered).unwrap().base_amount,
            10
        );
        assert_eq!(snapshot.max_notice_window(), Duration::days(15));
        assert_eq!(
            snapshot.lot_duration_for(DisciplineId::new()),
            Some(Duration::days(180))
        );
    }

    #[test]
    fn test_discipline_override_wins() {
        let mut snapshot = PolicySnapshot::from_config(&PolicyConfig::default()).unwrap();
        let discipline = DisciplineId::new();
        snapshot.expiration_overrides.insert(
            discipline,
            ExpirationPolicy {
                validity_days: 30,
                notice_days: 20,
            },
        );
        assert_eq!(snapshot.lot_duration_for(discipline), Some(Duration::days(30)));
        assert_eq!(snapshot.max_notice_window(), Duration::days(20));
    }

    #[test]
    fn test_missing_rule() {
        let mut snapshot = PolicySnapshot::from_config(&PolicyConfig::default()).unwrap();
        snapshot.rules.remove(&EventType::QuizCompleted);
        assert_eq!(
            snapshot.rule(EventType::QuizCompleted).unwrap_err(),
            LedgerError::RuleNotFound("quiz_completed".to_string())
        );
    }

    #[test]
    fn test_mismatched_rule_key_rejected() {
        let mut snapshot = PolicySnapshot::from_config(&PolicyConfig::default()).unwrap();
        snapshot.rules.insert(EventType::SummaryPosted, graded_rule());
        assert!(matches!(snapshot.validate(), Err(PolicyError::InvalidPolicy(_))));
    }

    #[test]
    fn test_snapshot_json_round_trip() {
        let snapshot = PolicySnapshot::from_config(&PolicyConfig::default()).unwrap();
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: PolicySnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}
