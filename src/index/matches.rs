use std::ops::RangeInclusive;

use crate::error::Result;
use crate::types::TupleId;

use super::IndexMatch;

/// Lazy, single-pass sequence of [`IndexMatch`]es.
///
/// `lookup(i)` resolves the tuple ids for query `i`; it runs only once the
/// matches of query `i - 1` are exhausted. After the first error the
/// sequence ends.
pub(crate) struct LazyMatches<F> {
    lookup: F,
    queries: usize,
    next_query: usize,
    current: usize,
    pending: std::vec::IntoIter<TupleId>,
    range: Option<RangeInclusive<TupleId>>,
    failed: bool,
}

impl<F> LazyMatches<F>
where
    F: FnMut(usize) -> Result<Vec<TupleId>>,
{
    pub(crate) fn new(queries: usize, range: Option<RangeInclusive<TupleId>>, lookup: F) -> Self {
        Self {
            lookup,
            queries,
            next_query: 0,
            current: 0,
            pending: Vec::new().into_iter(),
            range,
            failed: false,
        }
    }
}

impl<F> Iterator for LazyMatches<F>
where
    F: FnMut(usize) -> Result<Vec<TupleId>>,
{
    type Item = Result<IndexMatch>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            for tuple_id in self.pending.by_ref() {
                if self.range.as_ref().map_or(true, |r| r.contains(&tuple_id)) {
                    return Some(Ok(IndexMatch {
                        tuple_id,
                        query_index: self.current,
                    }));
                }
            }

            if self.failed || self.next_query >= self.queries {
                return None;
            }

            let query = self.next_query;
            self.next_query += 1;
            match (self.lookup)(query) {
                Ok(ids) => {
                    self.current = query;
                    self.pending = ids.into_iter();
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
