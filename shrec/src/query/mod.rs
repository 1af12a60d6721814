//! Queries and the caller-facing cursor over their result sets.

use crate::conn::Connection;
use crate::engine::{Cond, QueryHandle};
use crate::errors::{DbError, Result};
use crate::record::Record;
use crate::value::{EncodeOpts, FieldArg, FieldValue};

/// The match-record form of a query: a template whose fields either must
/// equal the candidate's field or, for [`FieldValue::wildcard`] entries,
/// match anything. Either a list of values or an existing record (whose
/// `Var` fields act as wildcards).
#[derive(Clone, Debug)]
pub enum MatchSpec<'c> {
    Template(Vec<FieldArg<'c>>),
    Record(Record<'c>),
}

/// One `(field, comparator, value)` triple of a predicate-list query. The
/// value may carry explicit encoding options, exactly as in field writes,
/// so queries can target type-disambiguated values.
#[derive(Clone, Debug)]
pub struct Predicate<'c> {
    pub field: usize,
    pub cond: Cond,
    pub value: FieldValue<'c>,
    pub opts: EncodeOpts,
}

impl<'c> Predicate<'c> {
    pub fn new(field: usize, cond: Cond, value: impl Into<FieldValue<'c>>) -> Predicate<'c> {
        Predicate {
            field,
            cond,
            value: value.into(),
            opts: EncodeOpts::default(),
        }
    }

    pub fn with_opts(
        field: usize,
        cond: Cond,
        value: impl Into<FieldValue<'c>>,
        opts: EncodeOpts,
    ) -> Predicate<'c> {
        Predicate {
            field,
            cond,
            value: value.into(),
            opts,
        }
    }
}

/// A compiled, executing query. Freed explicitly through the cursor (or
/// [`Connection::free_query`]); the handle cell is cleared on free so a
/// stale `Query` fails instead of reaching the engine.
#[derive(Debug)]
pub struct Query {
    handle: Option<QueryHandle>,
    res_count: Option<i64>,
}

impl Query {
    pub(crate) fn new(handle: QueryHandle, res_count: Option<i64>) -> Query {
        Query {
            handle: Some(handle),
            res_count,
        }
    }

    /// Result-count estimate, when the engine supplied one.
    pub fn res_count(&self) -> Option<i64> {
        self.res_count
    }

    pub(crate) fn raw(&self) -> Option<QueryHandle> {
        self.handle
    }

    pub(crate) fn clear(&mut self) {
        self.handle = None;
    }
}

/// Cursor over a query's result set.
///
/// State machine: unexecuted → (execute) → active → (fetch*) → exhausted or
/// active → (close) → closed. Fetching while unexecuted or closed is a
/// usage error; closing twice is a no-op.
pub struct Cursor<'c> {
    conn: &'c Connection,
    query: Option<Query>,
    rowcount: i64,
}

impl<'c> Cursor<'c> {
    pub(crate) fn new(conn: &'c Connection) -> Cursor<'c> {
        Cursor {
            conn,
            query: None,
            rowcount: -1,
        }
    }

    /// Result count of the last executed query, or -1 when unknown.
    pub fn rowcount(&self) -> i64 {
        self.rowcount
    }

    /// Execute a query from exactly one of the two forms. A previously
    /// executed query is replaced without being freed; close the cursor
    /// first to release it, otherwise its engine state lives until the
    /// engine reclaims it.
    pub fn execute(
        &mut self,
        matchrec: Option<&MatchSpec<'c>>,
        arglist: Option<&[Predicate<'c>]>,
    ) -> Result<()> {
        let query = self.conn.make_query(matchrec, arglist)?;
        if let Some(n) = query.res_count() {
            self.rowcount = n;
        }
        self.query = Some(query);
        Ok(())
    }

    /// Fetch the next record of the result set, or `None` once exhausted.
    pub fn fetchone(&self) -> Result<Option<Record<'c>>> {
        let query = self
            .query
            .as_ref()
            .filter(|q| q.raw().is_some())
            .ok_or_else(|| DbError::usage("No results to fetch."))?;
        self.conn.fetch(query)
    }

    /// Fetch all remaining records of the result set in order.
    pub fn fetchall(&self) -> Result<Vec<Record<'c>>> {
        let mut result = Vec::new();
        while let Some(rec) = self.fetchone()? {
            result.push(rec);
        }
        Ok(result)
    }

    /// Free the query state held by this cursor. Idempotent; fetching
    /// afterwards is a usage error.
    pub fn close(&mut self) -> Result<()> {
        if let Some(query) = self.query.as_mut() {
            self.conn.free_query(query)?;
        }
        self.query = None;
        Ok(())
    }
}
