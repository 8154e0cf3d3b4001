//! Array free page strategy
//!
//! Free ids kept as one sorted vector. Allocation is a first-fit scan in
//! ascending page order, merging is a sorted merge.

use crate::page::Pgid;

use super::FreePages;

#[derive(Debug, Default, Clone)]
pub struct ArrayFreePages {
    ids: Vec<Pgid>,
}

impl FreePages for ArrayFreePages {
    fn allocate(&mut self, n: usize) -> Pgid {
        if n == 0 || self.ids.is_empty() {
            return 0;
        }

        let mut initial: Pgid = 0;
        let mut previd: Pgid = 0;
        let mut found = None;
        for (i, &id) in self.ids.iter().enumerate() {
            debug_assert!(id > 1, "invalid page allocation: {}", id);

            // start of a new run
            if previd == 0 || id - previd != 1 {
                initial = id;
            }

            if id - initial + 1 == n as Pgid {
                found = Some(i);
                break;
            }

            previd = id;
        }

        match found {
            Some(last) => {
                self.ids.drain(last + 1 - n..=last);
                initial
            }
            None => 0,
        }
    }

    fn free_count(&self) -> usize {
        self.ids.len()
    }

    fn merge_spans(&mut self, ids: &[Pgid]) {
        if ids.is_empty() {
            return;
        }
        let mut incoming = ids.to_vec();
        incoming.sort_unstable();

        let mut merged = Vec::with_capacity(self.ids.len() + incoming.len());
        let (mut i, mut j) = (0, 0);
        while i < self.ids.len() && j < incoming.len() {
            if self.ids[i] <= incoming[j] {
                merged.push(self.ids[i]);
                i += 1;
            } else {
                merged.push(incoming[j]);
                j += 1;
            }
        }
        merged.extend_from_slice(&self.ids[i..]);
        merged.extend_from_slice(&incoming[j..]);
        self.ids = merged;
    }

    fn free_page_ids(&self) -> Vec<Pgid> {
        self.ids.clone()
    }

    fn read_ids(&mut self, ids: Vec<Pgid>) {
        self.ids = ids;
    }
}
