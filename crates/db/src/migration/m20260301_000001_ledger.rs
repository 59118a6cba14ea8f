//! Ledger schema.
//!
//! Creates accounts, lots, the append-only transaction log, award outcomes
//! and the audit log.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        // ============================================================
        // PART 1: ACCOUNTS
        // ============================================================
        db.execute_unprepared(ACCOUNTS_SQL).await?;

        // ============================================================
        // PART 2: TRANSACTION LOG & LOTS
        // ============================================================
        db.execute_unprepared(LEDGER_TRANSACTIONS_SQL).await?;
        db.execute_unprepared(LOTS_SQL).await?;
        db.execute_unprepared(AWARD_OUTCOMES_SQL).await?;

        // ============================================================
        // PART 3: AUDIT
        // ============================================================
        db.execute_unprepared(AUDIT_LOG_SQL).await?;

        // ============================================================
        // PART 4: TRIGGERS
        // ============================================================
        db.execute_unprepared(TRIGGERS_SQL).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(DROP_ALL_SQL).await?;
        Ok(())
    }
}

// ============================================================
// SQL CONSTANTS
// ============================================================

const ACCOUNTS_SQL: &str = r"
-- One row per (student, discipline); the nil/nil row is the fee pool
CREATE TABLE accounts (
    student_id UUID NOT NULL,
    discipline_id UUID NOT NULL,
    balance BIGINT NOT NULL DEFAULT 0,
    version BIGINT NOT NULL DEFAULT 0,
    allow_negative BOOLEAN NOT NULL DEFAULT false,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (student_id, discipline_id),
    CONSTRAINT chk_balance_non_negative CHECK (balance >= 0 OR allow_negative),
    CONSTRAINT chk_version_positive CHECK (version > 0)
);

CREATE INDEX idx_accounts_student ON accounts(student_id);
";

const LEDGER_TRANSACTIONS_SQL: &str = r"
CREATE TABLE ledger_transactions (
    id UUID PRIMARY KEY,
    student_id UUID NOT NULL,
    discipline_id UUID NOT NULL,
    kind VARCHAR(16) NOT NULL,
    amount BIGINT NOT NULL,
    origin_event_id TEXT NOT NULL,
    lot_id UUID,
    account_version BIGINT NOT NULL,
    allocations JSONB NOT NULL DEFAULT '[]',
    reverses UUID REFERENCES ledger_transactions(id),
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    FOREIGN KEY (student_id, discipline_id) REFERENCES accounts(student_id, discipline_id),
    CONSTRAINT chk_kind CHECK (kind IN ('earn', 'spend', 'adjust', 'transfer_in', 'transfer_out', 'expire')),
    CONSTRAINT chk_amount_non_zero CHECK (amount <> 0),
    CONSTRAINT chk_credit_sign CHECK (kind NOT IN ('earn', 'transfer_in') OR amount > 0),
    CONSTRAINT chk_debit_sign CHECK (kind NOT IN ('spend', 'transfer_out', 'expire') OR amount < 0),
    -- Idempotency: one transaction per origin event per account
    CONSTRAINT uq_origin_event UNIQUE (student_id, discipline_id, origin_event_id),
    CONSTRAINT uq_account_version UNIQUE (student_id, discipline_id, account_version),
    -- A transaction can be reversed at most once
    CONSTRAINT uq_reverses UNIQUE (reverses)
);

-- History pages and time-range queries
CREATE INDEX idx_ledger_tx_account_time ON ledger_transactions(student_id, discipline_id, created_at);

-- Per-period cap lookups
CREATE INDEX idx_ledger_tx_student_earn ON ledger_transactions(student_id, created_at) WHERE kind = 'earn';
";

const LOTS_SQL: &str = r"
CREATE TABLE lots (
    id UUID PRIMARY KEY,
    student_id UUID NOT NULL,
    discipline_id UUID NOT NULL,
    source_transaction_id UUID NOT NULL REFERENCES ledger_transactions(id),
    earned_at TIMESTAMPTZ NOT NULL,
    expires_at TIMESTAMPTZ NOT NULL,
    amount BIGINT NOT NULL,
    remaining BIGINT NOT NULL,
    state VARCHAR(16) NOT NULL DEFAULT 'active',
    FOREIGN KEY (student_id, discipline_id) REFERENCES accounts(student_id, discipline_id),
    CONSTRAINT chk_lot_amount CHECK (amount > 0),
    CONSTRAINT chk_lot_remaining CHECK (remaining >= 0 AND remaining <= amount),
    CONSTRAINT chk_lot_dates CHECK (expires_at > earned_at),
    CONSTRAINT chk_lot_state CHECK (state IN ('active', 'nearing_expiry', 'expired', 'consumed'))
);

-- FIFO order within an account
CREATE INDEX idx_lots_account_fifo ON lots(student_id, discipline_id, earned_at, id)
    WHERE state IN ('active', 'nearing_expiry');

-- Expiration sweeps
CREATE INDEX idx_lots_live_expiry ON lots(expires_at)
    WHERE state IN ('active', 'nearing_expiry');
";

const AWARD_OUTCOMES_SQL: &str = r"
CREATE TABLE award_outcomes (
    student_id UUID NOT NULL,
    discipline_id UUID NOT NULL,
    origin_event_id TEXT NOT NULL,
    -- NULL when the period cap left nothing to pay
    transaction_id UUID REFERENCES ledger_transactions(id),
    cap_notice JSONB,
    recorded_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (student_id, discipline_id, origin_event_id)
);
";

const AUDIT_LOG_SQL: &str = r"
CREATE TABLE audit_log (
    id UUID PRIMARY KEY,
    actor_id UUID NOT NULL,
    actor_role VARCHAR(32) NOT NULL,
    action VARCHAR(32) NOT NULL,
    student_id UUID NOT NULL,
    discipline_id UUID NOT NULL,
    amount BIGINT NOT NULL,
    justification TEXT,
    transaction_id UUID NOT NULL REFERENCES ledger_transactions(id),
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_actor_role CHECK (actor_role IN ('administrador', 'coordenador', 'professor')),
    CONSTRAINT chk_action CHECK (action IN ('credit', 'debit', 'cancel_purchase'))
);

CREATE INDEX idx_audit_log_account ON audit_log(student_id, discipline_id, created_at);
";

const TRIGGERS_SQL: &str = r"
-- ============================================================
-- FUNCTION: prevent_append_only_modification
-- The transaction log and audit log are append-only
-- ============================================================
CREATE OR REPLACE FUNCTION prevent_append_only_modification()
RETURNS TRIGGER AS $$
BEGIN
    RAISE EXCEPTION '% is append-only', TG_TABLE_NAME;
END;
$$ LANGUAGE plpgsql;

CREATE TRIGGER trg_ledger_transactions_append_only
BEFORE UPDATE OR DELETE ON ledger_transactions
FOR EACH ROW
EXECUTE FUNCTION prevent_append_only_modification();

CREATE TRIGGER trg_award_outcomes_append_only
BEFORE UPDATE OR DELETE ON award_outcomes
FOR EACH ROW
EXECUTE FUNCTION prevent_append_only_modification();

CREATE TRIGGER trg_audit_log_append_only
BEFORE UPDATE OR DELETE ON audit_log
FOR EACH ROW
EXECUTE FUNCTION prevent_append_only_modification();

-- ============================================================
-- FUNCTION: check_lot_update
-- Lots only shrink, and a settled lot never comes back
-- ============================================================
CREATE OR REPLACE FUNCTION check_lot_update()
RETURNS TRIGGER AS $$
BEGIN
    IF NEW.amount <> OLD.amount OR NEW.earned_at <> OLD.earned_at OR NEW.expires_at <> OLD.expires_at THEN
        RAISE EXCEPTION 'Lot % is immutable except for remaining and state', OLD.id;
    END IF;
    IF NEW.remaining > OLD.remaining THEN
        RAISE EXCEPTION 'Lot % cannot grow', OLD.id;
    END IF;
    IF OLD.state IN ('expired', 'consumed') AND NEW.state <> OLD.state THEN
        RAISE EXCEPTION 'Lot % is already settled', OLD.id;
    END IF;
    RETURN NEW;
END;
$$ LANGUAGE plpgsql;

CREATE TRIGGER trg_lots_update
BEFORE UPDATE ON lots
FOR EACH ROW
EXECUTE FUNCTION check_lot_update();
";

const DROP_ALL_SQL: &str = r"
DROP TABLE IF EXISTS audit_log CASCADE;
DROP TABLE IF EXISTS award_outcomes CASCADE;
DROP TABLE IF EXISTS lots CASCADE;
DROP TABLE IF EXISTS ledger_transactions CASCADE;
DROP TABLE IF EXISTS accounts CASCADE;
DROP FUNCTION IF EXISTS prevent_append_only_modification();
DROP FUNCTION IF EXISTS check_lot_update();
";
