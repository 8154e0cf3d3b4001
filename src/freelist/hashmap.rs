//! Span map free page strategy
//!
//! Free ids kept as runs ("spans") indexed three ways:
//! - `forward`:  first id → span length
//! - `backward`: last id → span length
//! - `freemaps`: span length → first ids
//!
//! A freed id joins its left and right neighbours in O(1) map lookups, and
//! allocation picks a span by length instead of scanning every id.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::page::Pgid;

use super::FreePages;

#[derive(Debug, Default, Clone)]
pub struct HashMapFreePages {
    forward: HashMap<Pgid, u64>,
    backward: HashMap<Pgid, u64>,
    freemaps: BTreeMap<u64, BTreeSet<Pgid>>,
}

impl HashMapFreePages {
    /// All spans as (start, size), ordered by start
    pub fn spans(&self) -> Vec<(Pgid, u64)> {
        let mut spans: Vec<(Pgid, u64)> = self.forward.iter().map(|(&s, &n)| (s, n)).collect();
        spans.sort_unstable();
        spans
    }

    fn add_span(&mut self, start: Pgid, size: u64) {
        self.backward.insert(start + size - 1, size);
        self.forward.insert(start, size);
        self.freemaps.entry(size).or_default().insert(start);
    }

    fn del_span(&mut self, start: Pgid, size: u64) {
        self.forward.remove(&start);
        self.backward.remove(&(start + size - 1));
        if let Some(starts) = self.freemaps.get_mut(&size) {
            starts.remove(&start);
            if starts.is_empty() {
                self.freemaps.remove(&size);
            }
        }
    }

    /// Insert one id, coalescing with the spans ending just before it and
    /// starting just after it
    fn merge_with_existing_span(&mut self, pid: Pgid) {
        let mut start = pid;
        let mut size = 1;

        if let Some(prev) = pid.checked_sub(1) {
            if let Some(&prev_size) = self.backward.get(&prev) {
                let prev_start = prev + 1 - prev_size;
                self.del_span(prev_start, prev_size);
                start = prev_start;
                size += prev_size;
            }
        }

        let next = pid + 1;
        if let Some(&next_size) = self.forward.get(&next) {
            self.del_span(next, next_size);
            size += next_size;
        }

        self.add_span(start, size);
    }
}

impl FreePages for HashMapFreePages {
    /// Exact-size span first, otherwise the smallest larger span; lowest
    /// start wins within a size
    fn allocate(&mut self, n: usize) -> Pgid {
        if n == 0 {
            return 0;
        }
        let n = n as u64;

        if let Some(start) = self.freemaps.get(&n).and_then(|s| s.first().copied()) {
            self.del_span(start, n);
            return start;
        }

        let larger = self
            .freemaps
            .range(n + 1..)
            .find_map(|(&size, starts)| starts.first().map(|&start| (start, size)));
        match larger {
            Some((start, size)) => {
                self.del_span(start, size);
                self.add_span(start + n, size - n);
                start
            }
            None => 0,
        }
    }

    fn free_count(&self) -> usize {
        self.forward.values().map(|&size| size as usize).sum()
    }

    fn merge_spans(&mut self, ids: &[Pgid]) {
        for &id in ids {
            self.merge_with_existing_span(id);
        }
    }

    fn free_page_ids(&self) -> Vec<Pgid> {
        let mut ids = Vec::with_capacity(self.free_count());
        for (&start, &size) in &self.forward {
            ids.extend(start..start + size);
        }
        ids.sort_unstable();
        ids
    }

    fn read_ids(&mut self, ids: Vec<Pgid>) {
        self.forward.clear();
        self.backward.clear();
        self.freemaps.clear();

        let mut iter = ids.into_iter();
        let Some(first) = iter.next() else {
            return;
        };
        let (mut start, mut size) = (first, 1u64);
        for id in iter {
            if id == start + size {
                size += 1;
            } else {
                self.add_span(start, size);
                start = id;
                size = 1;
            }
        }
        self.add_span(start, size);
    }
}
