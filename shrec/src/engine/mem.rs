//! In-process reference engine.
//!
//! Records live in a generation-checked slab with a free list; the coarse
//! read/write lock is a token-handing lock table; queries are materialized
//! at build time so the result count is exact. Named stores are shared
//! through a process-wide registry, playing the role named shared segments
//! play for a cross-process engine. The cross-process engine itself is out
//! of scope here; this implementation exists so the access layer is fully
//! exercisable behind the same [`Engine`] seam.

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use super::{
    matches_template, predicate_holds, Engine, LockToken, QueryHandle, QuerySpec, RecHandle,
    WireField,
};
use crate::errors::{DbError, Result};

/// Registry key used when attaching without a store name.
const DEFAULT_NAME: &str = "1000";

/// Rough per-record cost used to turn the attach size hint (bytes) into a
/// slab capacity.
const REC_HINT_BYTES: usize = 64;

static REGISTRY: Lazy<Mutex<HashMap<String, Arc<StoreShared>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

struct Slot {
    gen: u64,
    fields: Option<Vec<WireField>>,
}

struct QueryState {
    pending: VecDeque<RecHandle>,
}

struct StoreState {
    slots: Vec<Slot>,
    free: Vec<usize>,
    queries: HashMap<u64, QueryState>,
    next_query: u64,
}

#[derive(Clone, Copy)]
enum LockKind {
    Read,
    Write,
}

struct LockState {
    writer: bool,
    readers: usize,
    next_token: u64,
    held: HashMap<u64, LockKind>,
}

struct StoreShared {
    state: Mutex<StoreState>,
    lock: Mutex<LockState>,
    cond: Condvar,
}

impl StoreShared {
    fn with_capacity(size_hint: usize) -> StoreShared {
        StoreShared {
            state: Mutex::new(StoreState {
                slots: Vec::with_capacity(size_hint / REC_HINT_BYTES),
                free: Vec::new(),
                queries: HashMap::new(),
                next_query: 0,
            }),
            lock: Mutex::new(LockState {
                writer: false,
                readers: 0,
                next_token: 1,
                held: HashMap::new(),
            }),
            cond: Condvar::new(),
        }
    }
}

/// One attachment to an in-process store.
pub struct MemStore {
    shared: Arc<StoreShared>,
    detached: Cell<bool>,
}

impl MemStore {
    /// Attach to (or create) a store. `local` yields a process-private
    /// store; otherwise the name (or the default key when omitted) selects
    /// an entry in the process-wide registry. `size` is a byte hint for
    /// initial capacity.
    pub fn attach(name: Option<&str>, size: usize, local: bool) -> Result<MemStore> {
        let shared = if local {
            Arc::new(StoreShared::with_capacity(size))
        } else {
            let key = name.unwrap_or(DEFAULT_NAME);
            let mut registry = REGISTRY.lock();
            registry
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(StoreShared::with_capacity(size)))
                .clone()
        };
        debug!(name = name.unwrap_or(DEFAULT_NAME), size, local, "attached store");
        Ok(MemStore {
            shared,
            detached: Cell::new(false),
        })
    }

    fn ensure_attached(&self) -> Result<()> {
        if self.detached.get() {
            return Err(DbError::engine("Store is detached."));
        }
        Ok(())
    }
}

fn live_fields<'a>(state: &'a StoreState, rec: RecHandle) -> Result<&'a Vec<WireField>> {
    state
        .slots
        .get(rec.slot)
        .filter(|slot| slot.gen == rec.gen)
        .and_then(|slot| slot.fields.as_ref())
        .ok_or_else(|| DbError::engine("No such record."))
}

fn live_fields_mut<'a>(state: &'a mut StoreState, rec: RecHandle) -> Result<&'a mut Vec<WireField>> {
    state
        .slots
        .get_mut(rec.slot)
        .filter(|slot| slot.gen == rec.gen)
        .and_then(|slot| slot.fields.as_mut())
        .ok_or_else(|| DbError::engine("No such record."))
}

fn alloc_record(state: &mut StoreState, fields: Vec<WireField>) -> RecHandle {
    match state.free.pop() {
        Some(slot) => {
            let entry = &mut state.slots[slot];
            entry.gen += 1;
            entry.fields = Some(fields);
            RecHandle {
                slot,
                gen: entry.gen,
            }
        }
        None => {
            state.slots.push(Slot {
                gen: 0,
                fields: Some(fields),
            });
            RecHandle {
                slot: state.slots.len() - 1,
                gen: 0,
            }
        }
    }
}

fn scan_from(state: &StoreState, start: usize) -> Option<RecHandle> {
    (start..state.slots.len())
        .find(|&slot| state.slots[slot].fields.is_some())
        .map(|slot| RecHandle {
            slot,
            gen: state.slots[slot].gen,
        })
}

impl Engine for MemStore {
    fn detach(&self) {
        self.detached.set(true);
        trace!("detached store");
    }

    fn acquire_read(&self) -> Result<LockToken> {
        self.ensure_attached()?;
        let mut lock = self.shared.lock.lock();
        while lock.writer {
            self.shared.cond.wait(&mut lock);
        }
        lock.readers += 1;
        let token = lock.next_token;
        lock.next_token += 1;
        lock.held.insert(token, LockKind::Read);
        Ok(LockToken(token))
    }

    fn acquire_write(&self) -> Result<LockToken> {
        self.ensure_attached()?;
        let mut lock = self.shared.lock.lock();
        while lock.writer || lock.readers > 0 {
            self.shared.cond.wait(&mut lock);
        }
        lock.writer = true;
        let token = lock.next_token;
        lock.next_token += 1;
        lock.held.insert(token, LockKind::Write);
        Ok(LockToken(token))
    }

    fn release(&self, token: LockToken) -> Result<()> {
        self.ensure_attached()?;
        let mut lock = self.shared.lock.lock();
        match lock.held.remove(&token.0) {
            Some(LockKind::Read) => lock.readers -= 1,
            Some(LockKind::Write) => lock.writer = false,
            None => return Err(DbError::engine("Unknown lock token.")),
        }
        self.shared.cond.notify_all();
        Ok(())
    }

    fn create_record(&self, fields: usize) -> Result<RecHandle> {
        self.ensure_attached()?;
        let mut state = self.shared.state.lock();
        Ok(alloc_record(&mut state, vec![WireField::Null; fields]))
    }

    fn create_raw_record(&self, fields: usize) -> Result<RecHandle> {
        // No bookkeeping distinction in this engine; raw records start
        // null-filled as well.
        self.create_record(fields)
    }

    fn delete_record(&self, rec: RecHandle) -> Result<()> {
        self.ensure_attached()?;
        let mut state = self.shared.state.lock();
        live_fields(&state, rec)?;
        state.slots[rec.slot].fields = None;
        state.free.push(rec.slot);
        Ok(())
    }

    fn record_length(&self, rec: RecHandle) -> Result<usize> {
        self.ensure_attached()?;
        let state = self.shared.state.lock();
        Ok(live_fields(&state, rec)?.len())
    }

    fn get_field(&self, rec: RecHandle, index: usize) -> Result<WireField> {
        self.ensure_attached()?;
        let state = self.shared.state.lock();
        live_fields(&state, rec)?
            .get(index)
            .cloned()
            .ok_or_else(|| DbError::engine("Field index out of range."))
    }

    fn set_field(&self, rec: RecHandle, index: usize, data: WireField) -> Result<()> {
        self.ensure_attached()?;
        let mut state = self.shared.state.lock();
        let fields = live_fields_mut(&mut state, rec)?;
        match fields.get_mut(index) {
            Some(slot) => {
                *slot = data;
                Ok(())
            }
            None => Err(DbError::engine("Field index out of range.")),
        }
    }

    fn set_new_field(&self, rec: RecHandle, index: usize, data: WireField) -> Result<()> {
        self.set_field(rec, index, data)
    }

    fn first_record(&self) -> Result<Option<RecHandle>> {
        self.ensure_attached()?;
        let state = self.shared.state.lock();
        Ok(scan_from(&state, 0))
    }

    fn next_record(&self, rec: RecHandle) -> Result<Option<RecHandle>> {
        self.ensure_attached()?;
        let state = self.shared.state.lock();
        live_fields(&state, rec)?;
        Ok(scan_from(&state, rec.slot + 1))
    }

    fn build_query(&self, spec: QuerySpec) -> Result<(QueryHandle, Option<i64>)> {
        self.ensure_attached()?;
        let mut state = self.shared.state.lock();
        let mut pending = VecDeque::new();
        for slot in 0..state.slots.len() {
            if let Some(fields) = &state.slots[slot].fields {
                let hit = match &spec {
                    QuerySpec::Match(template) => matches_template(template, fields),
                    QuerySpec::Predicates(preds) => {
                        preds.iter().all(|p| predicate_holds(p, fields))
                    }
                };
                if hit {
                    pending.push_back(RecHandle {
                        slot,
                        gen: state.slots[slot].gen,
                    });
                }
            }
        }
        let count = pending.len() as i64;
        let id = state.next_query;
        state.next_query += 1;
        state.queries.insert(id, QueryState { pending });
        trace!(query = id, count, "built query");
        Ok((QueryHandle(id), Some(count)))
    }

    fn fetch_next(&self, query: QueryHandle) -> Result<Option<RecHandle>> {
        self.ensure_attached()?;
        let mut state = self.shared.state.lock();
        loop {
            let rec = {
                let q = state
                    .queries
                    .get_mut(&query.0)
                    .ok_or_else(|| DbError::engine("No such query."))?;
                match q.pending.pop_front() {
                    Some(rec) => rec,
                    None => return Ok(None),
                }
            };
            // results deleted since build time are skipped
            if live_fields(&state, rec).is_ok() {
                return Ok(Some(rec));
            }
        }
    }

    fn free_query(&self, query: QueryHandle) -> Result<()> {
        self.ensure_attached()?;
        let mut state = self.shared.state.lock();
        state
            .queries
            .remove(&query.0)
            .map(|_| ())
            .ok_or_else(|| DbError::engine("No such query."))
    }
}
