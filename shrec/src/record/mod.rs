//! Typed view over one stored record.
//!
//! A `Record` borrows its connection, holds the raw engine handle behind a
//! validity cell and caches the field count fetched at wrap time. Deleting
//! the record clears the cell, so later access through this wrapper fails
//! deterministically instead of touching reclaimed storage.

use std::cell::Cell;
use std::fmt;

use crate::conn::Connection;
use crate::engine::RecHandle;
use crate::errors::{DbError, Result};
use crate::value::{FieldArg, FieldValue};

#[derive(Clone)]
pub struct Record<'c> {
    conn: &'c Connection,
    rec: Cell<Option<RecHandle>>,
    size: usize,
}

impl<'c> Record<'c> {
    pub(crate) fn new(conn: &'c Connection, rec: RecHandle, size: usize) -> Record<'c> {
        Record {
            conn,
            rec: Cell::new(Some(rec)),
            size,
        }
    }

    pub(crate) fn handle(&self) -> Result<RecHandle> {
        self.rec
            .get()
            .ok_or_else(|| DbError::usage("Record is no longer valid."))
    }

    pub(crate) fn invalidate(&self) {
        self.rec.set(None);
    }

    /// Field count, cached at wrap time.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Read field `fieldnr`. Out-of-bounds indexes are a data error.
    pub fn get_field(&self, fieldnr: usize) -> Result<FieldValue<'c>> {
        if fieldnr >= self.size {
            return Err(DbError::data("Field number out of bounds."));
        }
        self.conn.get_field(self, fieldnr)
    }

    /// Write field `fieldnr`; accepts a plain value or a [`FieldArg`] with
    /// explicit encoding options. Same bounds failure mode as
    /// [`Record::get_field`].
    pub fn set_field(&self, fieldnr: usize, data: impl Into<FieldArg<'c>>) -> Result<()> {
        if fieldnr >= self.size {
            return Err(DbError::data("Field number out of bounds."));
        }
        self.conn.set_field(self, fieldnr, &data.into())
    }

    /// Overwrite the whole record atomically; see
    /// [`Connection::atomic_update_record`] for the size-mismatch policy.
    pub fn update(&self, fields: &[FieldArg<'c>]) -> Result<()> {
        self.conn.atomic_update_record(self, fields)
    }

    /// Delete the record from the store and invalidate this wrapper.
    pub fn delete(&self) -> Result<()> {
        self.conn.delete_record(self)
    }

    /// Iterate over the fields in index order. One pass per iterator;
    /// restart by calling `fields()` again.
    pub fn fields(&self) -> Fields<'_, 'c> {
        Fields { rec: self, pos: 0 }
    }
}

/// Records compare equal when they are views of the same engine record on
/// the same connection.
impl<'c> PartialEq for Record<'c> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.conn, other.conn) && self.rec.get() == other.rec.get()
    }
}

impl<'c> fmt::Debug for Record<'c> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("rec", &self.rec.get())
            .field("size", &self.size)
            .finish()
    }
}

pub struct Fields<'r, 'c> {
    rec: &'r Record<'c>,
    pos: usize,
}

impl<'r, 'c> Iterator for Fields<'r, 'c> {
    type Item = Result<FieldValue<'c>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.rec.size {
            return None;
        }
        let i = self.pos;
        self.pos += 1;
        Some(self.rec.get_field(i))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.rec.size - self.pos;
        (left, Some(left))
    }
}

impl<'r, 'c> IntoIterator for &'r Record<'c> {
    type Item = Result<FieldValue<'c>>;
    type IntoIter = Fields<'r, 'c>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields()
    }
}
