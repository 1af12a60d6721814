//! Connection to a record store.
//!
//! The connection is the only component that calls into the engine, and it
//! brackets every engine touch with the store's coarse read or write lock.
//! Each public operation is one self-contained lock scope; there is no
//! multi-statement transaction.

use std::cell::Cell;

use serde_derive::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::mem::MemStore;
use crate::engine::{Engine, LockToken, QuerySpec, RecHandle, WireField, WirePredicate};
use crate::errors::{DbError, Result};
use crate::query::{Cursor, MatchSpec, Predicate, Query};
use crate::record::Record;
use crate::value::{self, FieldArg, FieldValue};

/// How to attach to a store: a named store shared within the process, the
/// anonymous default store (no name), or a process-private local store.
/// `size` is a byte hint for initial capacity.
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct ConnectConfig {
    pub name: Option<String>,
    pub size: usize,
    pub local: bool,
}

/// Attaches to (or creates) a store and returns a connection to it.
pub fn connect(cfg: &ConnectConfig) -> Result<Connection> {
    let engine = MemStore::attach(cfg.name.as_deref(), cfg.size, cfg.local)?;
    Ok(Connection::with_engine(Box::new(engine)))
}

pub struct Connection {
    engine: Box<dyn Engine>,
    closed: Cell<bool>,
    locking: Cell<bool>,
    lock_token: Cell<Option<LockToken>>,
}

impl Connection {
    /// Wrap an already-attached engine. Locking is enabled by default.
    pub fn with_engine(engine: Box<dyn Engine>) -> Connection {
        Connection {
            engine,
            closed: Cell::new(false),
            locking: Cell::new(true),
            lock_token: Cell::new(None),
        }
    }

    /// Shorthand for a process-private store.
    pub fn local(size: usize) -> Result<Connection> {
        connect(&ConnectConfig {
            name: None,
            size,
            local: true,
        })
    }

    /// Close the connection. Idempotent; record and query operations fail
    /// afterwards, record and cursor wrappers detect it when delegating.
    pub fn close(&self) {
        if !self.closed.get() {
            self.engine.detach();
            self.closed.set(true);
            debug!("connection closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.get() {
            return Err(DbError::internal("Connection is closed."));
        }
        Ok(())
    }

    // Locking support
    //
    /// Enable or disable lock bracketing. With locking disabled the caller
    /// accepts responsibility for external synchronization.
    pub fn set_locking(&self, enabled: bool) {
        self.locking.set(enabled);
    }

    /// Start a reading transaction.
    pub fn start_read(&self) -> Result<()> {
        self.ensure_open()?;
        if self.lock_token.get().is_some() {
            return Err(DbError::usage("Transaction already started."));
        }
        self.lock_token.set(Some(self.engine.acquire_read()?));
        Ok(())
    }

    /// Finish a reading transaction.
    pub fn end_read(&self) -> Result<()> {
        self.ensure_open()?;
        let token = self
            .lock_token
            .get()
            .ok_or_else(|| DbError::usage("No current transaction."))?;
        self.engine.release(token)?;
        self.lock_token.set(None);
        Ok(())
    }

    /// Start a writing transaction.
    pub fn start_write(&self) -> Result<()> {
        self.ensure_open()?;
        if self.lock_token.get().is_some() {
            return Err(DbError::usage("Transaction already started."));
        }
        self.lock_token.set(Some(self.engine.acquire_write()?));
        Ok(())
    }

    /// Finish a writing transaction.
    pub fn end_write(&self) -> Result<()> {
        self.ensure_open()?;
        let token = self
            .lock_token
            .get()
            .ok_or_else(|| DbError::usage("No current transaction."))?;
        self.engine.release(token)?;
        self.lock_token.set(None);
        Ok(())
    }

    /// Run `op` inside a read lock. The lock is released on every exit
    /// path; a release failure takes precedence over `op`'s failure.
    fn with_read<R>(&self, op: impl FnOnce(&dyn Engine) -> Result<R>) -> Result<R> {
        self.ensure_open()?;
        if !self.locking.get() {
            return op(self.engine.as_ref());
        }
        self.start_read()?;
        let out = op(self.engine.as_ref());
        self.end_read()?;
        out
    }

    /// Run `op` inside a write lock; release is unconditional as with
    /// [`Connection::with_read`].
    fn with_write<R>(&self, op: impl FnOnce(&dyn Engine) -> Result<R>) -> Result<R> {
        self.ensure_open()?;
        if !self.locking.get() {
            return op(self.engine.as_ref());
        }
        self.start_write()?;
        let out = op(self.engine.as_ref());
        self.end_write()?;
        out
    }

    // Record operations
    //
    pub(crate) fn wrap_record(&self, rec: RecHandle) -> Result<Record<'_>> {
        let size = self.with_read(|eng| eng.record_length(rec))?;
        Ok(Record::new(self, rec, size))
    }

    /// Get the first record of the store scan, or `None` when the store is
    /// empty. Scan order is engine-defined.
    pub fn first_record(&self) -> Result<Option<Record<'_>>> {
        let rec = self.with_read(|eng| Ok(eng.first_record().unwrap_or(None)))?;
        match rec {
            Some(rec) => Ok(Some(self.wrap_record(rec)?)),
            None => Ok(None),
        }
    }

    /// Get the scan successor of `rec`, or `None` at the end of the scan.
    pub fn next_record(&self, rec: &Record<'_>) -> Result<Option<Record<'_>>> {
        let handle = rec.handle()?;
        let next = self.with_read(|eng| Ok(eng.next_record(handle).unwrap_or(None)))?;
        match next {
            Some(rec) => Ok(Some(self.wrap_record(rec)?)),
            None => Ok(None),
        }
    }

    /// Create a record with `size` null fields.
    pub fn create_record(&self, size: usize) -> Result<Record<'_>> {
        if size == 0 {
            return Err(DbError::data("Invalid record size."));
        }
        let rec = self.with_write(|eng| eng.create_record(size))?;
        self.wrap_record(rec)
    }

    /// Delete a record and invalidate the wrapper so further access through
    /// it fails instead of touching reclaimed storage.
    pub fn delete_record(&self, rec: &Record<'_>) -> Result<()> {
        let handle = rec.handle()?;
        self.with_write(|eng| eng.delete_record(handle))?;
        rec.invalidate();
        Ok(())
    }

    /// Create a record and fill every field in one write-lock scope.
    pub fn atomic_create_record(&self, fields: &[FieldArg<'_>]) -> Result<Record<'_>> {
        if fields.is_empty() {
            return Err(DbError::data("Cannot create an empty record."));
        }
        let rec = self.with_write(|eng| {
            let rec = eng.create_raw_record(fields.len())?;
            for (i, field) in fields.iter().enumerate() {
                let data = value::encode(&field.value, &field.opts)?;
                eng.set_new_field(rec, i, data)?;
            }
            Ok(rec)
        })?;
        self.wrap_record(rec)
    }

    /// Alias for [`Connection::atomic_create_record`].
    pub fn insert(&self, fields: &[FieldArg<'_>]) -> Result<Record<'_>> {
        self.atomic_create_record(fields)
    }

    /// Overwrite the whole record in one write-lock scope. Missing trailing
    /// values become null. When `fields` is longer than the record, every
    /// value that fits is written first and the excess then reports a data
    /// error; the partial write is not rolled back.
    pub fn atomic_update_record(&self, rec: &Record<'_>, fields: &[FieldArg<'_>]) -> Result<()> {
        let handle = rec.handle()?;
        let size = rec.len();
        self.with_write(|eng| {
            for (i, field) in fields.iter().enumerate() {
                if i >= size {
                    return Err(DbError::data("Update does not fit in the record."));
                }
                let data = value::encode(&field.value, &field.opts)?;
                eng.set_field(handle, i, data)?;
            }
            for i in fields.len()..size {
                eng.set_field(handle, i, WireField::Null)?;
            }
            Ok(())
        })
    }

    // Field operations
    //
    /// Read one field under a read lock and decode it.
    pub fn get_field(&self, rec: &Record<'_>, fieldnr: usize) -> Result<FieldValue<'_>> {
        let handle = rec.handle()?;
        let data = self.with_read(|eng| eng.get_field(handle, fieldnr))?;
        value::decode(self, data)
    }

    /// Encode and write one field under a write lock.
    pub fn set_field(&self, rec: &Record<'_>, fieldnr: usize, data: &FieldArg<'_>) -> Result<()> {
        let handle = rec.handle()?;
        let wire = value::encode(&data.value, &data.opts)?;
        self.with_write(|eng| eng.set_field(handle, fieldnr, wire))
    }

    // Query operations
    //
    /// Return an unexecuted cursor over this connection.
    pub fn cursor(&self) -> Result<Cursor<'_>> {
        self.ensure_open()?;
        Ok(Cursor::new(self))
    }

    /// Compile and execute a query from exactly one of the two forms.
    /// Runs under a write lock: parameter encoding may allocate shared
    /// state in a real engine.
    pub fn make_query(
        &self,
        matchrec: Option<&MatchSpec<'_>>,
        arglist: Option<&[Predicate<'_>]>,
    ) -> Result<Query> {
        self.ensure_open()?;
        if matchrec.is_some() == arglist.is_some() {
            return Err(DbError::usage(
                "Exactly one of matchrec and arglist is required.",
            ));
        }
        self.with_write(|eng| {
            let spec = match (matchrec, arglist) {
                (Some(MatchSpec::Template(args)), None) => QuerySpec::Match(
                    args.iter()
                        .map(|f| value::encode(&f.value, &f.opts))
                        .collect::<Result<Vec<_>>>()?,
                ),
                (Some(MatchSpec::Record(rec)), None) => {
                    let handle = rec.handle()?;
                    QuerySpec::Match(
                        (0..rec.len())
                            .map(|i| eng.get_field(handle, i))
                            .collect::<Result<Vec<_>>>()?,
                    )
                }
                (None, Some(preds)) => QuerySpec::Predicates(
                    preds
                        .iter()
                        .map(|p| {
                            Ok(WirePredicate {
                                field: p.field,
                                cond: p.cond,
                                value: value::encode(&p.value, &p.opts)?,
                            })
                        })
                        .collect::<Result<Vec<_>>>()?,
                ),
                _ => unreachable!(),
            };
            let (handle, res_count) = eng.build_query(spec)?;
            Ok(Query::new(handle, res_count))
        })
    }

    /// Get the next record of the query's result set, or `None` once the
    /// set is exhausted. Exhaustion is never an error, so callers can loop
    /// until empty.
    pub fn fetch(&self, query: &Query) -> Result<Option<Record<'_>>> {
        let handle = query
            .raw()
            .ok_or_else(|| DbError::usage("Query is already freed."))?;
        let rec = self.with_read(|eng| eng.fetch_next(handle))?;
        match rec {
            Some(rec) => Ok(Some(self.wrap_record(rec)?)),
            None => Ok(None),
        }
    }

    /// Release the engine state behind `query`. Must happen before the
    /// connection is closed.
    pub fn free_query(&self, query: &mut Query) -> Result<()> {
        if self.closed.get() {
            return Err(DbError::usage(
                "Database closed before freeing query \
                 (hint: close the cursor before the connection).",
            ));
        }
        let handle = query
            .raw()
            .ok_or_else(|| DbError::usage("Query is already freed."))?;
        self.with_write(|eng| eng.free_query(handle))?;
        query.clear();
        Ok(())
    }
}
