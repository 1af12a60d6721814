//! The capability surface of the underlying record-store engine.
//!
//! The access layer never touches storage directly; everything goes through
//! the [`Engine`] trait: attach/detach, the coarse read/write lock primitive,
//! record allocation and field access, linear scans, and compiled queries.
//! [`MemStore`](mem::MemStore) is the bundled in-process implementation; a
//! real shared-segment engine would plug in at the same seam.
//!
//! Locking discipline is the caller's duty. Engine operations do not acquire
//! the store lock themselves; the connection brackets every call.

use std::cmp::Ordering;

use crate::errors::Result;
use crate::value::{Date, Time};

pub mod mem;

/// Checked handle to one stored record: slot index plus a generation that
/// changes when the slot is reused, so stale handles are detected instead of
/// resolving to an unrelated record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecHandle {
    pub(crate) slot: usize,
    pub(crate) gen: u64,
}

/// Opaque handle to a compiled query held by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueryHandle(pub(crate) u64);

/// Token returned by a successful lock acquisition; required for release.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockToken(pub(crate) u64);

/// Comparison operator of one query predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cond {
    Equal,
    NotEqual,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
}

/// The type-tagged representation the engine stores and exchanges for one
/// field. `Str`, `Uri` and `XmlLiteral` carry the optional second string
/// written alongside the payload.
#[derive(Clone, Debug, PartialEq)]
pub enum WireField {
    Null,
    Record(RecHandle),
    Int(i64),
    Double(f64),
    Str { val: String, lang: Option<String> },
    Uri { val: String, prefix: Option<String> },
    XmlLiteral { val: String, dtype: Option<String> },
    Char(char),
    Fixpoint(f64),
    Date(Date),
    Time(Time),
    Var(i64),
}

/// One already-encoded predicate of a predicate-list query.
#[derive(Clone, Debug)]
pub struct WirePredicate {
    pub field: usize,
    pub cond: Cond,
    pub value: WireField,
}

/// A compiled query's input: either a match template (wire values, with
/// `Var` as the wildcard) or a conjunction of predicates.
#[derive(Clone, Debug)]
pub enum QuerySpec {
    Match(Vec<WireField>),
    Predicates(Vec<WirePredicate>),
}

/// Everything the access layer needs from a record-store engine.
///
/// All operations are synchronous. Handle arguments may be stale (deleted
/// records, freed queries); implementations must fail such calls instead of
/// resolving them.
pub trait Engine {
    /// Drop the attachment. Further calls fail at the engine level; the
    /// connection's own closed check normally fires first.
    fn detach(&self);

    fn acquire_read(&self) -> Result<LockToken>;
    fn acquire_write(&self) -> Result<LockToken>;
    fn release(&self, token: LockToken) -> Result<()>;

    /// Allocate a record with `fields` null-initialized fields.
    fn create_record(&self, fields: usize) -> Result<RecHandle>;
    /// Allocate a record that will be filled immediately via
    /// [`Engine::set_new_field`] before becoming visible to the caller.
    fn create_raw_record(&self, fields: usize) -> Result<RecHandle>;
    fn delete_record(&self, rec: RecHandle) -> Result<()>;
    fn record_length(&self, rec: RecHandle) -> Result<usize>;

    fn get_field(&self, rec: RecHandle, index: usize) -> Result<WireField>;
    fn set_field(&self, rec: RecHandle, index: usize, data: WireField) -> Result<()>;
    /// Write into a freshly allocated, still-private record, skipping the
    /// bookkeeping for previous field contents.
    fn set_new_field(&self, rec: RecHandle, index: usize, data: WireField) -> Result<()>;

    fn first_record(&self) -> Result<Option<RecHandle>>;
    fn next_record(&self, rec: RecHandle) -> Result<Option<RecHandle>>;

    /// Compile and execute a query, returning its handle and an exact
    /// result count when the engine can supply one.
    fn build_query(&self, spec: QuerySpec) -> Result<(QueryHandle, Option<i64>)>;
    fn fetch_next(&self, query: QueryHandle) -> Result<Option<RecHandle>>;
    fn free_query(&self, query: QueryHandle) -> Result<()>;
}

/// Same-type ordering between wire values. Differently-typed values are
/// unordered, so ordered comparators never match across types.
fn wire_ord(a: &WireField, b: &WireField) -> Option<Ordering> {
    match (a, b) {
        (WireField::Int(x), WireField::Int(y)) => Some(x.cmp(y)),
        (WireField::Double(x), WireField::Double(y)) => x.partial_cmp(y),
        (WireField::Fixpoint(x), WireField::Fixpoint(y)) => x.partial_cmp(y),
        (WireField::Str { val: x, .. }, WireField::Str { val: y, .. }) => Some(x.cmp(y)),
        (WireField::Char(x), WireField::Char(y)) => Some(x.cmp(y)),
        (WireField::Date(x), WireField::Date(y)) => Some(x.cmp(y)),
        (WireField::Time(x), WireField::Time(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Match-record semantics: a template longer than the candidate never
/// matches; `Var` fields match anything; other fields must be equal by
/// value and type (null is a concrete matcher). A shorter template leaves
/// the candidate's trailing fields unconstrained.
pub(crate) fn matches_template(template: &[WireField], rec: &[WireField]) -> bool {
    if template.len() > rec.len() {
        return false;
    }
    template
        .iter()
        .zip(rec)
        .all(|(t, f)| matches!(t, WireField::Var(_)) || t == f)
}

/// Predicate semantics: equality is typed (`Int(5)` never equals
/// `Double(5.0)`), `NotEqual` is its exact complement, and the ordered
/// comparators only hold between same-typed values. A predicate on an index
/// the record does not have never holds.
pub(crate) fn predicate_holds(p: &WirePredicate, rec: &[WireField]) -> bool {
    let field = match rec.get(p.field) {
        Some(f) => f,
        None => return false,
    };
    match p.cond {
        Cond::Equal => field == &p.value,
        Cond::NotEqual => field != &p.value,
        Cond::LessThan => wire_ord(field, &p.value) == Some(Ordering::Less),
        Cond::LessOrEqual => matches!(
            wire_ord(field, &p.value),
            Some(Ordering::Less) | Some(Ordering::Equal)
        ),
        Cond::GreaterThan => wire_ord(field, &p.value) == Some(Ordering::Greater),
        Cond::GreaterOrEqual => matches!(
            wire_ord(field, &p.value),
            Some(Ordering::Greater) | Some(Ordering::Equal)
        ),
    }
}
