//! Crash-safe wallet
//!
//! The wallet persists claim codes in a SQLite database beside an
//! append-only recovery log.  Every secret the wallet ever accepts is
//! written to the log *before* the database learns about it, so a corrupt
//! database can always be reconstructed by replaying the log.
//!
//! Inserting a secret performs a **sweep**: the incoming claim code is
//! treated as compromised and atomically replaced on the server for a
//! wallet-internal change secret of identical value before the wallet
//! counts it as balance.

use crate::core::{PublicWebcash, SecretWebcash};
use crate::error::{Error, Result};
use crate::protocol::ServerClient;
use crate::utils::{self, rng};
use fs2::FileExt;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Recovery-log entry kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    /// Produced by our own mining.
    Mining,
    /// Received from a third party.
    Receive,
    /// Wallet-internal change from a sweep.
    Change,
}

impl SecretKind {
    fn as_str(self) -> &'static str {
        match self {
            SecretKind::Mining => "mining",
            SecretKind::Receive => "receive",
            SecretKind::Change => "change",
        }
    }
}

/// Handle to an open wallet.
///
/// Field order is load-bearing: drop releases the database connection,
/// then the advisory lock, then the recovery-log handle.
#[derive(Debug)]
pub struct Wallet {
    conn: Mutex<Connection>,
    lock_file: File,
    log: Mutex<File>,
    log_path: PathBuf,
}

impl Wallet {
    /// Open (creating if necessary) the wallet at `<path>.db` with its
    /// recovery log at `<path>.bak`.
    ///
    /// Takes an exclusive OS advisory lock on the database file; fails if
    /// another process holds the wallet open.
    pub fn open(path: &Path) -> Result<Wallet> {
        let db_path = path.with_extension("db");
        let log_path = path.with_extension("bak");

        // The file must exist before it can be locked; an empty file is a
        // valid, albeit empty, SQLite database.
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&db_path)?;
        lock_file.try_lock_exclusive().map_err(|_| {
            Error::wallet("unable to lock wallet database; wallet is in use by another process")
        })?;

        let conn = Connection::open(&db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::upgrade_schema(&conn)?;

        let log = OpenOptions::new().append(true).create(true).open(&log_path)?;

        Ok(Wallet {
            conn: Mutex::new(conn),
            lock_file,
            log: Mutex::new(log),
            log_path,
        })
    }

    fn upgrade_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS terms (
                 id INTEGER PRIMARY KEY NOT NULL,
                 body TEXT UNIQUE NOT NULL,
                 timestamp INTEGER NOT NULL
             );
             CREATE TABLE IF NOT EXISTS secret (
                 id INTEGER PRIMARY KEY NOT NULL,
                 timestamp INTEGER NOT NULL,
                 secret TEXT UNIQUE NOT NULL,
                 mine INTEGER NOT NULL,
                 sweep INTEGER NOT NULL
             );
             CREATE TABLE IF NOT EXISTS output (
                 id INTEGER PRIMARY KEY NOT NULL,
                 timestamp INTEGER NOT NULL,
                 hash BLOB NOT NULL,
                 secret_id INTEGER REFERENCES secret(id),
                 amount INTEGER NOT NULL,
                 spent INTEGER NOT NULL
             );",
        )?;
        Ok(())
    }

    /// Path of the recovery log.
    pub fn recovery_log_path(&self) -> &Path {
        &self.log_path
    }

    /// Have *any* terms of service been accepted?
    pub fn have_accepted_terms(&self) -> Result<bool> {
        let conn = self.conn.lock();
        let any: bool =
            conn.query_row("SELECT EXISTS(SELECT 1 FROM terms)", [], |row| row.get(0))?;
        Ok(any)
    }

    /// Have these specific terms of service been accepted?
    pub fn are_terms_accepted(&self, terms: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let have: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM terms WHERE body = ?1)",
            [terms],
            |row| row.get(0),
        )?;
        Ok(have)
    }

    /// Record acceptance of the given terms.  Accepting the same text twice
    /// is a no-op; different revisions coexist.
    pub fn accept_terms(&self, terms: &str) -> Result<()> {
        if self.are_terms_accepted(terms)? {
            return Ok(());
        }
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO terms (body, timestamp) VALUES (?1, ?2)",
            params![terms, utils::unix_seconds()],
        )?;
        Ok(())
    }

    /// Total unspent value held by the wallet, in 1e-8 units.
    pub fn balance(&self) -> Result<i64> {
        let conn = self.conn.lock();
        let balance: i64 = conn.query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM output WHERE spent = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(balance)
    }

    /// Spend state of the output with the given public hash: `None` when
    /// the wallet has never seen it.
    pub fn is_output_spent(&self, public: &PublicWebcash) -> Result<Option<bool>> {
        let conn = self.conn.lock();
        let spent: Option<bool> = conn
            .query_row(
                "SELECT spent FROM output WHERE hash = ?1",
                params![public.pk.as_slice()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(spent)
    }

    /// Accept a secret into the wallet, sweeping it into a fresh change
    /// secret on the server.
    ///
    /// Order of operations, each step durable before the next is tried:
    ///
    /// 1. append the incoming secret to the recovery log,
    /// 2. insert its `secret` row,
    /// 3. insert its `output` row,
    /// 4. generate + log + insert a change secret of identical value,
    /// 5. call the server's replace endpoint,
    /// 6. mark the input spent and record the change output.
    ///
    /// A recovery-log write failure does not abort the sweep (the server
    /// call is what protects the value) but fails the overall result so
    /// the caller can fall back to flat-file logging.  A server failure
    /// leaves the staged rows in place; replacement is idempotent on the
    /// input hash, so they can be replayed safely on a later run.
    pub fn insert(
        &self,
        client: &ServerClient,
        secret: &SecretWebcash,
        mine: bool,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let now = utils::unix_seconds();

        let kind = if mine { SecretKind::Mining } else { SecretKind::Receive };
        let mut log_ok = self.append_recovery(kind, secret);

        let secret_id = Self::stage_secret(&conn, now, secret, mine, true)?;
        let public = secret.to_public();
        Self::stage_output(&conn, now, &public, Some(secret_id))?;

        let change = SecretWebcash { amount: secret.amount, sk: rng::fresh_secret_hex() };
        log_ok &= self.append_recovery(SecretKind::Change, &change);
        let change_id = Self::stage_secret(&conn, now, &change, true, false)?;

        client.replace(
            std::slice::from_ref(secret),
            std::slice::from_ref(&change),
        )?;

        conn.execute(
            "UPDATE output SET spent = 1 WHERE hash = ?1",
            params![public.pk.as_slice()],
        )?;
        let change_public = change.to_public();
        Self::stage_output(&conn, now, &change_public, Some(change_id))?;

        info!(amount = %secret.amount, mine, "swept secret into wallet");

        if !log_ok {
            return Err(Error::wallet("recovery log write failed"));
        }
        Ok(())
    }

    /// Insert a `secret` row if absent and return its id.
    fn stage_secret(
        conn: &Connection,
        now: i64,
        secret: &SecretWebcash,
        mine: bool,
        sweep: bool,
    ) -> Result<i64> {
        let text = secret.to_string();
        conn.execute(
            "INSERT OR IGNORE INTO secret (timestamp, secret, mine, sweep)
             VALUES (?1, ?2, ?3, ?4)",
            params![now, text, mine, sweep],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM secret WHERE secret = ?1",
            [text],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Insert an unspent `output` row if no row with this hash exists yet.
    fn stage_output(
        conn: &Connection,
        now: i64,
        public: &PublicWebcash,
        secret_id: Option<i64>,
    ) -> Result<()> {
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM output WHERE hash = ?1",
                params![public.pk.as_slice()],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Ok(());
        }
        conn.execute(
            "INSERT INTO output (timestamp, hash, secret_id, amount, spent)
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![now, public.pk.as_slice(), secret_id, public.amount.0],
        )?;
        Ok(())
    }

    /// Append `<unix_seconds> <kind> <claim-code>` to the recovery log,
    /// flushed immediately.  Returns whether the write fully succeeded.
    fn append_recovery(&self, kind: SecretKind, secret: &SecretWebcash) -> bool {
        let line = format!("{} {} {}\n", utils::unix_seconds(), kind.as_str(), secret);
        let mut log = self.log.lock();
        let result = log.write_all(line.as_bytes()).and_then(|()| log.flush());
        if let Err(err) = &result {
            warn!(%err, "recovery log write failed");
        }
        result.is_ok()
    }
}

impl Drop for Wallet {
    fn drop(&mut self) {
        // Wait for any in-flight operation before the connection goes away.
        let _guard = self.conn.lock();
    }
}
