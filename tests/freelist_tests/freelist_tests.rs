//! Tests for the FreeList
//!
//! These tests verify, for both allocation strategies:
//! - Allocation of contiguous runs
//! - Deferred reclamation (free → pending → release)
//! - Rollback of frees and provisional allocations
//! - Range release around open readers
//! - Freelist page serialization, including the overflow count

use boltkv::freelist::{FreeList, FreePages, HashMapFreePages};
use boltkv::page::{Page, PageFlags, PageHeader, Pgid};
use boltkv::{BoltError, FreeListType};

// =============================================================================
// Helper Functions
// =============================================================================

const STRATEGIES: [FreeListType; 2] = [FreeListType::Array, FreeListType::HashMap];

fn freelist(typ: FreeListType, ids: &[Pgid]) -> FreeList {
    let mut f = FreeList::new(typ);
    f.read_ids(ids.to_vec());
    f
}

fn leaf(id: Pgid, overflow: u32) -> PageHeader {
    PageHeader {
        id,
        flags: PageFlags::LEAF,
        count: 0,
        overflow,
    }
}

/// Freelist page large enough for `f`
fn page_for(f: &FreeList) -> Page {
    let page_size = 4096;
    Page::new(2, page_size, f.size() / page_size + 1)
}

// =============================================================================
// Allocation Tests
// =============================================================================

#[test]
fn test_allocate_contiguous_runs() {
    for typ in STRATEGIES {
        let mut f = freelist(typ, &[3, 4, 5, 6, 7, 9, 12, 13, 18]);
        assert_eq!(f.freelist_type(), typ);

        assert_eq!(f.allocate(1, 3), 3, "{:?}", typ);
        assert_eq!(f.allocate(1, 6), 0, "{:?}", typ);
        assert_eq!(f.allocate(1, 2), 6, "{:?}", typ);
        assert_eq!(f.free_count(), 4, "{:?}", typ);
        assert_eq!(f.allocate(1, 0), 0, "{:?}", typ);
    }
}

#[test]
fn test_allocate_records_owner() {
    for typ in STRATEGIES {
        let mut f = freelist(typ, &[10, 11]);
        assert_eq!(f.allocate(8, 2), 10);
        assert_eq!(f.allocs().get(&10), Some(&8));
        assert_eq!(f.allocs().get(&11), Some(&8));
        assert!(!f.freed(10));
        assert!(!f.freed(11));
    }
}

#[test]
fn test_empty_freelist_allocates_nothing() {
    for typ in STRATEGIES {
        let mut f = FreeList::new(typ);
        assert_eq!(f.allocate(1, 1), 0);
        assert_eq!(f.count(), 0);
    }
}

// =============================================================================
// Free / Release Tests
// =============================================================================

#[test]
fn test_freed_pages_wait_for_release() {
    for typ in STRATEGIES {
        let mut f = FreeList::new(typ);
        f.free(100, &leaf(12, 0)).unwrap();
        f.free(100, &leaf(9, 2)).unwrap();

        assert_eq!(f.pending_count(), 4);
        assert_eq!(f.free_count(), 0);
        assert_eq!(f.count(), 4);
        assert!(f.freed(10));
        assert_eq!(f.allocate(101, 1), 0, "pending pages must not be handed out");

        f.release(99);
        assert_eq!(f.free_count(), 0);

        f.release(100);
        assert_eq!(f.free_page_ids(), vec![9, 10, 11, 12]);
        assert!(f.pending().is_empty());
        assert_eq!(f.allocate(101, 4), 9);
    }
}

#[test]
fn test_free_meta_pages_is_invalid() {
    for typ in STRATEGIES {
        let mut f = FreeList::new(typ);
        assert!(matches!(f.free(5, &leaf(0, 0)), Err(BoltError::Invalid)));
        assert!(matches!(f.free(5, &leaf(1, 3)), Err(BoltError::Invalid)));
    }
}

#[test]
fn test_double_free_is_corruption() {
    for typ in STRATEGIES {
        let mut f = freelist(typ, &[20]);
        assert!(matches!(f.free(5, &leaf(20, 0)), Err(BoltError::Corrupted(_))));

        f.free(5, &leaf(30, 1)).unwrap();
        assert!(matches!(f.free(6, &leaf(31, 0)), Err(BoltError::Corrupted(_))));
        assert_eq!(f.pending_count(), 2);
    }
}

#[test]
fn test_release_range_respects_reader_window() {
    for typ in STRATEGIES {
        // pages allocated by tx 2 and 5, both freed by tx 6
        let mut f = freelist(typ, &[40, 41]);
        assert_eq!(f.allocate(2, 1), 40);
        assert_eq!(f.allocate(5, 1), 41);
        f.free(6, &leaf(40, 0)).unwrap();
        f.free(6, &leaf(41, 0)).unwrap();

        // a reader is open on snapshot 3: only tx 4.. can be reclaimed
        f.release_range(4, u64::MAX);
        assert_eq!(f.free_page_ids(), vec![41], "{:?}", typ);
        assert_eq!(f.pending()[&6].ids, vec![40]);

        // same window again is a no-op
        f.release_range(4, u64::MAX);
        assert_eq!(f.pending()[&6].ids, vec![40]);

        // reader gone
        f.release(6);
        assert_eq!(f.free_page_ids(), vec![40, 41]);
    }
}

// =============================================================================
// Rollback Tests
// =============================================================================

#[test]
fn test_rollback_restores_prior_state() {
    for typ in STRATEGIES {
        let mut f = freelist(typ, &[5, 6]);
        let free_before = f.free_page_ids();

        f.free(10, &leaf(12, 1)).unwrap();
        assert!(f.freed(12));
        f.rollback(10);

        assert_eq!(f.free_page_ids(), free_before);
        assert!(f.pending().is_empty());
        assert!(!f.freed(12));
        assert!(!f.freed(13));
        assert!(f.freed(5));
    }
}

#[test]
fn test_rollback_returns_owner_of_freed_pages() {
    for typ in STRATEGIES {
        let mut f = freelist(typ, &[50]);
        assert_eq!(f.allocate(3, 1), 50);

        f.free(4, &leaf(50, 0)).unwrap();
        assert!(f.allocs().is_empty());

        f.rollback(4);
        assert_eq!(f.allocs().get(&50), Some(&3));
        assert!(!f.freed(50));
    }
}

#[test]
fn test_rollback_reclaims_provisional_allocations() {
    for typ in STRATEGIES {
        let mut f = freelist(typ, &[7, 8, 9]);
        assert_eq!(f.allocate(12, 2), 7);
        f.rollback(12);
        assert_eq!(f.free_page_ids(), vec![7, 8, 9]);
        assert!(f.allocs().is_empty());
    }
}

// =============================================================================
// Serialization Tests
// =============================================================================

#[test]
fn test_write_includes_pending_pages() {
    for typ in STRATEGIES {
        let mut f = freelist(typ, &[3, 8]);
        f.free(4, &leaf(5, 1)).unwrap();

        let mut page = page_for(&f);
        f.write(&mut page).unwrap();
        assert!(page.flags().contains(PageFlags::FREELIST));
        assert_eq!(page.count(), 4);

        for read_typ in STRATEGIES {
            let mut g = FreeList::new(read_typ);
            g.read(&page).unwrap();
            assert_eq!(g.free_page_ids(), vec![3, 5, 6, 8]);
            assert_eq!(g.pending_count(), 0);
        }
    }
}

#[test]
fn test_read_rejects_non_freelist_page() {
    let mut page = Page::new(2, 4096, 1);
    page.set_flags(PageFlags::LEAF);
    let mut f = FreeList::new(FreeListType::Array);
    assert!(matches!(f.read(&page), Err(BoltError::Invalid)));
}

#[test]
fn test_read_rejects_meta_page_ids() {
    for bad in [vec![1u64], vec![0, 1], vec![0, 7, 9]] {
        let mut page = Page::new(2, 4096, 1);
        page.set_flags(PageFlags::FREELIST);
        page.set_count(bad.len() as u16);
        let bytes: Vec<u8> = bad.iter().flat_map(|id| id.to_le_bytes()).collect();
        page.write_at(16, &bytes).unwrap();

        for typ in STRATEGIES {
            let mut f = freelist(typ, &[20]);
            assert!(
                matches!(f.read(&page), Err(BoltError::Corrupted(_))),
                "{:?} accepted {:?}",
                typ,
                bad
            );
            assert!(matches!(f.reload(&page), Err(BoltError::Corrupted(_))));
            // a rejected page leaves the free set alone
            assert_eq!(f.free_page_ids(), vec![20]);
            assert_eq!(f.allocate(9, 1), 20);
        }
    }
}

#[test]
fn test_page_ids_are_sorted() {
    let mut page = Page::new(2, 4096, 1);
    page.set_flags(PageFlags::FREELIST);
    page.set_count(3);
    let bytes: Vec<u8> = [9u64, 4, 6].iter().flat_map(|id| id.to_le_bytes()).collect();
    page.write_at(16, &bytes).unwrap();
    assert_eq!(FreeList::page_ids(&page).unwrap(), vec![4, 6, 9]);
}

#[test]
fn test_large_freelist_uses_overflow_count() {
    let ids: Vec<Pgid> = (2..2 + 70_000).collect();
    for typ in STRATEGIES {
        let f = freelist(typ, &ids);
        assert_eq!(f.size(), 16 + 8 * (70_000 + 1));

        let mut page = page_for(&f);
        f.write(&mut page).unwrap();
        assert_eq!(page.count(), 0xFFFF);
        assert_eq!(&page.data()[0..8], &70_000u64.to_le_bytes());
        assert!(page.overflow() > 0);

        let mut g = FreeList::new(typ);
        g.read(&page).unwrap();
        assert_eq!(g.free_count(), 70_000);
        assert_eq!(g.allocate(1, 5), 2);
    }
}

#[test]
fn test_reload_excludes_pending() {
    for typ in STRATEGIES {
        let mut f = freelist(typ, &[3]);
        f.free(9, &leaf(4, 0)).unwrap();

        let mut page = page_for(&f);
        f.write(&mut page).unwrap();
        f.reload(&page).unwrap();

        assert_eq!(f.free_page_ids(), vec![3]);
        assert_eq!(f.pending_count(), 1);

        f.no_sync_reload(vec![3, 4, 6]);
        assert_eq!(f.free_page_ids(), vec![3, 6]);
        assert_eq!(f.copy_all(), vec![3, 4, 6]);
    }
}

// =============================================================================
// Span Strategy Tests
// =============================================================================

#[test]
fn test_hashmap_coalesces_released_pages() {
    let mut f = freelist(FreeListType::HashMap, &[10, 14]);
    f.free(3, &leaf(11, 2)).unwrap();
    f.release(3);
    assert_eq!(f.free_page_ids(), vec![10, 11, 12, 13, 14]);
    assert_eq!(f.allocate(4, 5), 10);

    let mut spans = HashMapFreePages::default();
    spans.read_ids(vec![2, 3, 4, 9]);
    assert_eq!(spans.spans(), vec![(2, 3), (9, 1)]);
}
