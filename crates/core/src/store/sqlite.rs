//! SQLite store backend.
//!
//! A single database file holds three tables:
//! - `nodes`: one row per `(federation_id, node_id)`, rewritten on trust updates
//! - `proofs`: append-only proof records, guarded by triggers that abort any
//!   UPDATE or DELETE
//! - `audit_cycles`: one row per cycle; a trigger rejects writes to rows whose
//!   `completed` flag is set
//!
//! The connection runs in WAL mode so a crash between transactions loses no
//! committed record.

use super::{CycleStore, NodeStore, ProofStore, Result, StoreError};
use crate::types::{AuditCycle, Digest, Node, NodeStatus, Proof, DIGEST_LEN, PUBLIC_KEY_LEN};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Durable store backed by a single SQLite database
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Create or open a store at the specified path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        info!(path = %path.display(), "Opening relay store");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database (tests, dry runs)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                federation_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                public_key BLOB NOT NULL,
                stake_amount INTEGER NOT NULL,
                trust_score INTEGER NOT NULL,
                status TEXT NOT NULL,
                uptime_percentage REAL NOT NULL,
                proof_success_rate REAL NOT NULL,
                avg_latency_ms INTEGER NOT NULL,
                last_updated INTEGER NOT NULL,
                administratively_suspended INTEGER NOT NULL DEFAULT 0,
                metadata_json TEXT NOT NULL,
                UNIQUE(federation_id, node_id)
            );

            CREATE TABLE IF NOT EXISTS proofs (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                federation_id TEXT NOT NULL,
                proof_id TEXT NOT NULL,
                origin_federation_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                digest BLOB NOT NULL,
                signature BLOB NOT NULL,
                timestamp INTEGER NOT NULL,
                nonce TEXT NOT NULL,
                payload_fields TEXT NOT NULL,
                recorded_at INTEGER NOT NULL,
                UNIQUE(federation_id, proof_id)
            );

            CREATE INDEX IF NOT EXISTS idx_proofs_recorded
                ON proofs(federation_id, recorded_at);

            CREATE UNIQUE INDEX IF NOT EXISTS idx_proofs_nonce
                ON proofs(federation_id, nonce);

            CREATE TRIGGER IF NOT EXISTS proofs_no_update
            BEFORE UPDATE ON proofs
            BEGIN
                SELECT RAISE(ABORT, 'proof records are append-only');
            END;

            CREATE TRIGGER IF NOT EXISTS proofs_no_delete
            BEFORE DELETE ON proofs
            BEGIN
                SELECT RAISE(ABORT, 'proof records are append-only');
            END;

            CREATE TABLE IF NOT EXISTS audit_cycles (
                cycle_number INTEGER PRIMARY KEY,
                started_at INTEGER NOT NULL,
                completed INTEGER NOT NULL,
                cycle_json TEXT NOT NULL
            );

            CREATE TRIGGER IF NOT EXISTS audit_cycles_sealed_update
            BEFORE UPDATE ON audit_cycles
            WHEN OLD.completed = 1
            BEGIN
                SELECT RAISE(ABORT, 'sealed audit cycles are immutable');
            END;

            CREATE TRIGGER IF NOT EXISTS audit_cycles_sealed_delete
            BEFORE DELETE ON audit_cycles
            WHEN OLD.completed = 1
            BEGIN
                SELECT RAISE(ABORT, 'sealed audit cycles are immutable');
            END;
            "#,
        )?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

/// Millisecond bound as an SQLite integer; values past `i64::MAX` saturate
fn sql_ms(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

const NODE_COLUMNS: &str = "federation_id, node_id, public_key, stake_amount, trust_score, \
     status, uptime_percentage, proof_success_rate, avg_latency_ms, last_updated, \
     administratively_suspended, metadata_json";

const PROOF_COLUMNS: &str = "proof_id, federation_id, origin_federation_id, node_id, digest, \
     signature, timestamp, nonce, payload_fields";

/// Column values as SQLite returns them, before domain validation
struct NodeRow {
    federation_id: String,
    node_id: String,
    public_key: Vec<u8>,
    stake_amount: i64,
    trust_score: i64,
    status: String,
    uptime_percentage: f64,
    proof_success_rate: f64,
    avg_latency_ms: i64,
    last_updated: i64,
    administratively_suspended: bool,
    metadata_json: String,
}

impl NodeRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            federation_id: row.get(0)?,
            node_id: row.get(1)?,
            public_key: row.get(2)?,
            stake_amount: row.get(3)?,
            trust_score: row.get(4)?,
            status: row.get(5)?,
            uptime_percentage: row.get(6)?,
            proof_success_rate: row.get(7)?,
            avg_latency_ms: row.get(8)?,
            last_updated: row.get(9)?,
            administratively_suspended: row.get(10)?,
            metadata_json: row.get(11)?,
        })
    }

    fn into_node(self) -> Result<Node> {
        let public_key: [u8; PUBLIC_KEY_LEN] =
            self.public_key.as_slice().try_into().map_err(|_| {
                StoreError::Corrupt(format!(
                    "public key of {}/{} has {} bytes",
                    self.federation_id,
                    self.node_id,
                    self.public_key.len()
                ))
            })?;
        let status: NodeStatus = self.status.parse().map_err(StoreError::Corrupt)?;
        let metadata: BTreeMap<String, String> = serde_json::from_str(&self.metadata_json)?;

        Ok(Node {
            node_id: self.node_id,
            federation_id: self.federation_id,
            public_key,
            stake_amount: self.stake_amount as u64,
            trust_score: self.trust_score as u64,
            status,
            uptime_percentage: self.uptime_percentage,
            proof_success_rate: self.proof_success_rate,
            avg_latency_ms: self.avg_latency_ms as u64,
            last_updated: self.last_updated as u64,
            administratively_suspended: self.administratively_suspended,
            metadata,
        })
    }
}

struct ProofRow {
    proof_id: String,
    federation_id: String,
    origin_federation_id: String,
    node_id: String,
    digest: Vec<u8>,
    signature: Vec<u8>,
    timestamp: i64,
    nonce: String,
    payload_fields: String,
}

impl ProofRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            proof_id: row.get(0)?,
            federation_id: row.get(1)?,
            origin_federation_id: row.get(2)?,
            node_id: row.get(3)?,
            digest: row.get(4)?,
            signature: row.get(5)?,
            timestamp: row.get(6)?,
            nonce: row.get(7)?,
            payload_fields: row.get(8)?,
        })
    }

    fn into_proof(self) -> Result<Proof> {
        let digest: Digest = self.digest.as_slice().try_into().map_err(|_| {
            StoreError::Corrupt(format!(
                "digest of proof {} has {} bytes, expected {}",
                self.proof_id,
                self.digest.len(),
                DIGEST_LEN
            ))
        })?;
        let payload_fields: Vec<String> = serde_json::from_str(&self.payload_fields)?;

        Ok(Proof {
            proof_id: self.proof_id,
            federation_id: self.federation_id,
            origin_federation_id: self.origin_federation_id,
            node_id: self.node_id,
            digest,
            signature: self.signature,
            timestamp: self.timestamp as u64,
            nonce: self.nonce,
            payload_fields,
        })
    }
}

impl NodeStore for SqliteStore {
    fn insert_node(&self, node: &Node) -> Result<()> {
        let conn = self.conn()?;
        let metadata_json = serde_json::to_string(&node.metadata)?;

        let result = conn.execute(
            &format!(
                "INSERT INTO nodes ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                NODE_COLUMNS
            ),
            params![
                node.federation_id,
                node.node_id,
                node.public_key.as_slice(),
                node.stake_amount as i64,
                node.trust_score as i64,
                node.status.as_str(),
                node.uptime_percentage,
                node.proof_success_rate,
                node.avg_latency_ms as i64,
                node.last_updated as i64,
                node.administratively_suspended,
                metadata_json,
            ],
        );

        match result {
            Ok(_) => {
                debug!(
                    federation_id = %node.federation_id,
                    node_id = %node.node_id,
                    "Node inserted"
                );
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateKey(format!(
                    "{}/{}",
                    node.federation_id, node.node_id
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn update_node(&self, node: &Node) -> Result<()> {
        let conn = self.conn()?;
        let metadata_json = serde_json::to_string(&node.metadata)?;

        let changed = conn.execute(
            r#"
            UPDATE nodes SET
                public_key = ?3,
                stake_amount = ?4,
                trust_score = ?5,
                status = ?6,
                uptime_percentage = ?7,
                proof_success_rate = ?8,
                avg_latency_ms = ?9,
                last_updated = ?10,
                administratively_suspended = ?11,
                metadata_json = ?12
            WHERE federation_id = ?1 AND node_id = ?2
            "#,
            params![
                node.federation_id,
                node.node_id,
                node.public_key.as_slice(),
                node.stake_amount as i64,
                node.trust_score as i64,
                node.status.as_str(),
                node.uptime_percentage,
                node.proof_success_rate,
                node.avg_latency_ms as i64,
                node.last_updated as i64,
                node.administratively_suspended,
                metadata_json,
            ],
        )?;

        if changed == 0 {
            return Err(StoreError::NotFound(format!(
                "{}/{}",
                node.federation_id, node.node_id
            )));
        }
        Ok(())
    }

    fn load_node(&self, federation_id: &str, node_id: &str) -> Result<Option<Node>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM nodes WHERE federation_id = ?1 AND node_id = ?2",
            NODE_COLUMNS
        ))?;

        let row = stmt
            .query_row(params![federation_id, node_id], NodeRow::read)
            .optional()?;

        row.map(NodeRow::into_node).transpose()
    }

    fn load_nodes(&self, federation_id: &str) -> Result<Vec<Node>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM nodes WHERE federation_id = ?1 ORDER BY seq ASC",
            NODE_COLUMNS
        ))?;

        let rows = stmt
            .query_map([federation_id], NodeRow::read)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(NodeRow::into_node).collect()
    }

    fn federations(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT federation_id FROM nodes GROUP BY federation_id ORDER BY MIN(seq) ASC",
        )?;

        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(ids)
    }
}

impl ProofStore for SqliteStore {
    fn append_proof(&self, proof: &Proof, recorded_at: u64) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let existing = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {} FROM proofs WHERE federation_id = ?1 AND proof_id = ?2",
                PROOF_COLUMNS
            ))?;
            stmt.query_row(params![proof.federation_id, proof.proof_id], ProofRow::read)
                .optional()?
        };

        if let Some(row) = existing {
            let stored = row.into_proof()?;
            if &stored == proof {
                return Ok(false);
            }
            return Err(StoreError::ImmutableRecord(format!(
                "{}/{}",
                proof.federation_id, proof.proof_id
            )));
        }

        let nonce_holder: Option<String> = tx
            .query_row(
                "SELECT proof_id FROM proofs WHERE federation_id = ?1 AND nonce = ?2",
                params![proof.federation_id, proof.nonce],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(holder) = nonce_holder {
            return Err(StoreError::DuplicateNonce(format!(
                "{}/{} (held by {})",
                proof.federation_id, proof.nonce, holder
            )));
        }

        let payload_fields = serde_json::to_string(&proof.payload_fields)?;
        tx.execute(
            &format!(
                "INSERT INTO proofs ({}, recorded_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                PROOF_COLUMNS
            ),
            params![
                proof.proof_id,
                proof.federation_id,
                proof.origin_federation_id,
                proof.node_id,
                proof.digest.as_slice(),
                proof.signature,
                sql_ms(proof.timestamp),
                proof.nonce,
                payload_fields,
                sql_ms(recorded_at),
            ],
        )?;
        tx.commit()?;

        debug!(
            federation_id = %proof.federation_id,
            proof_id = %proof.proof_id,
            "Proof appended"
        );

        Ok(true)
    }

    fn get_proof(&self, federation_id: &str, proof_id: &str) -> Result<Option<Proof>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM proofs WHERE federation_id = ?1 AND proof_id = ?2",
            PROOF_COLUMNS
        ))?;

        let row = stmt
            .query_row(params![federation_id, proof_id], ProofRow::read)
            .optional()?;

        row.map(ProofRow::into_proof).transpose()
    }

    fn proofs_recorded_between(
        &self,
        federation_id: &str,
        from_ms: u64,
        to_ms: u64,
    ) -> Result<Vec<Proof>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM proofs
             WHERE federation_id = ?1 AND recorded_at >= ?2 AND recorded_at < ?3
             ORDER BY seq ASC",
            PROOF_COLUMNS
        ))?;

        let rows = stmt
            .query_map(
                params![federation_id, sql_ms(from_ms), sql_ms(to_ms)],
                ProofRow::read,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(ProofRow::into_proof).collect()
    }

    fn proof_count(&self, federation_id: &str) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM proofs WHERE federation_id = ?1",
            [federation_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn federations_with_proofs(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT federation_id FROM proofs GROUP BY federation_id ORDER BY MIN(seq) ASC",
        )?;

        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(ids)
    }
}

impl CycleStore for SqliteStore {
    fn save_cycle(&self, cycle: &AuditCycle) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let stored_completed: Option<bool> = tx
            .query_row(
                "SELECT completed FROM audit_cycles WHERE cycle_number = ?1",
                [cycle.cycle_number as i64],
                |row| row.get(0),
            )
            .optional()?;

        if stored_completed == Some(true) {
            return Err(StoreError::SealedCycle(cycle.cycle_number));
        }

        let cycle_json = serde_json::to_string(cycle)?;
        tx.execute(
            r#"
            INSERT INTO audit_cycles (cycle_number, started_at, completed, cycle_json)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(cycle_number) DO UPDATE SET
                started_at = excluded.started_at,
                completed = excluded.completed,
                cycle_json = excluded.cycle_json
            "#,
            params![
                cycle.cycle_number as i64,
                cycle.started_at as i64,
                cycle.completed,
                cycle_json,
            ],
        )?;
        tx.commit()?;

        debug!(
            cycle_number = cycle.cycle_number,
            completed = cycle.completed,
            "Audit cycle saved"
        );

        Ok(())
    }

    fn load_cycles(&self) -> Result<Vec<AuditCycle>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT cycle_number, cycle_json FROM audit_cycles ORDER BY cycle_number ASC",
        )?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(number, json)| {
                let cycle: AuditCycle = serde_json::from_str(&json)?;
                if cycle.cycle_number != number as u64 {
                    return Err(StoreError::Corrupt(format!(
                        "row {} holds cycle {}",
                        number, cycle.cycle_number
                    )));
                }
                Ok(cycle)
            })
            .collect()
    }
}
