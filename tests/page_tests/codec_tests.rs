//! Tests for the page codec
//!
//! These tests verify:
//! - Header layout and element offsets
//! - Page type classification
//! - Bound-checked element, key and value access

use boltkv::page::{
    branch_element_offset, leaf_element_offset, page_type, BranchPageElement, LeafPageElement,
    Page, PageFlags, PageHeader, PAGE_HEADER_SIZE,
};
use boltkv::BoltError;

// =============================================================================
// Helper Functions
// =============================================================================

/// Leaf page holding `entries`, elements first then key/value data
fn leaf_page(entries: &[(&str, &str)]) -> Page {
    let mut page = Page::new(9, 4096, 1);
    page.set_flags(PageFlags::LEAF);
    page.set_count(entries.len() as u16);

    let mut data = leaf_element_offset(entries.len());
    for (i, (key, value)) in entries.iter().enumerate() {
        let elem = LeafPageElement {
            flags: 0,
            pos: (data - leaf_element_offset(i)) as u32,
            ksize: key.len() as u32,
            vsize: value.len() as u32,
        };
        page.write_leaf_element(i, &elem).unwrap();
        page.write_at(data, key.as_bytes()).unwrap();
        page.write_at(data + key.len(), value.as_bytes()).unwrap();
        data += key.len() + value.len();
    }
    page
}

// =============================================================================
// Header Tests
// =============================================================================

#[test]
fn test_header_is_sixteen_bytes_little_endian() {
    let mut page = Page::new(0x0102030405060708, 4096, 3);
    page.set_flags(PageFlags::BRANCH);
    page.set_count(0x0a0b);

    let bytes = page.as_bytes();
    assert_eq!(PAGE_HEADER_SIZE, 16);
    assert_eq!(&bytes[0..8], &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
    assert_eq!(&bytes[8..10], &[0x01, 0x00]);
    assert_eq!(&bytes[10..12], &[0x0b, 0x0a]);
    assert_eq!(&bytes[12..16], &[0x02, 0x00, 0x00, 0x00]);
    assert_eq!(page.len(), 3 * 4096);
}

#[test]
fn test_header_decode_matches_page_accessors() {
    let mut page = Page::new(42, 4096, 2);
    page.set_flags(PageFlags::FREELIST);
    page.set_count(17);

    let header = PageHeader::decode(page.as_bytes()).unwrap();
    assert_eq!(header, page.header());
    assert_eq!(header.id, 42);
    assert_eq!(header.count, 17);
    assert_eq!(header.overflow, 1);
    assert_eq!(header.typ(), "freelist");
}

#[test]
fn test_header_encode_into_page() {
    let header = PageHeader {
        id: 7,
        flags: PageFlags::META,
        count: 0,
        overflow: 0,
    };
    let mut buf = vec![0xffu8; 64];
    header.encode(&mut buf).unwrap();

    let page = Page::from_bytes(buf).unwrap();
    assert_eq!(page.header(), header);
    assert_eq!(page.typ(), "meta");
    assert!(header.encode(&mut [0u8; 8]).is_err());
}

#[test]
fn test_header_decode_short_buffer() {
    let result = PageHeader::decode(&[0u8; 10]);
    assert!(matches!(result, Err(BoltError::Corrupted(_))));
}

#[test]
fn test_element_offsets_step_by_sixteen() {
    assert_eq!(branch_element_offset(0), PAGE_HEADER_SIZE);
    assert_eq!(leaf_element_offset(0), PAGE_HEADER_SIZE);
    for i in 0..8 {
        assert_eq!(branch_element_offset(i + 1) - branch_element_offset(i), 16);
        assert_eq!(leaf_element_offset(i + 1) - leaf_element_offset(i), 16);
    }
}

// =============================================================================
// Type Classification Tests
// =============================================================================

#[test]
fn test_page_type_checks_run_in_order() {
    assert_eq!(page_type(PageFlags::BRANCH | PageFlags::LEAF), "branch");
    assert_eq!(page_type(PageFlags::LEAF | PageFlags::META), "leaf");
    assert_eq!(page_type(PageFlags::META | PageFlags::FREELIST), "meta");
    assert_eq!(page_type(PageFlags::FREELIST), "freelist");
    assert_eq!(page_type(PageFlags::from_bits_retain(0x20)), "unknown<20>");
    assert_eq!(page_type(PageFlags::empty()), "unknown<00>");
}

#[test]
fn test_page_info() {
    let mut page = Page::new(5, 4096, 4);
    page.set_flags(PageFlags::LEAF);
    page.set_count(12);

    let info = page.info();
    assert_eq!(info.id, 5);
    assert_eq!(info.typ, "leaf");
    assert_eq!(info.count, 12);
    assert_eq!(info.overflow_count, 3);
}

#[test]
fn test_as_meta_requires_meta_flag() {
    let mut page = Page::new(0, 4096, 1);
    page.set_flags(PageFlags::LEAF);
    assert!(matches!(page.as_meta(), Err(BoltError::Invalid)));
}

// =============================================================================
// Element Access Tests
// =============================================================================

#[test]
fn test_leaf_keys_and_values() {
    let page = leaf_page(&[("apple", "red"), ("banana", ""), ("cherry", "dark")]);

    let elems = page.leaf_elements().unwrap();
    assert_eq!(elems.len(), 3);
    assert_eq!(page.leaf_key(0).unwrap(), b"apple");
    assert_eq!(page.leaf_value(0).unwrap(), b"red");
    assert_eq!(page.leaf_key(1).unwrap(), b"banana");
    assert!(page.leaf_value(1).unwrap().is_empty());
    assert_eq!(page.leaf_value(2).unwrap(), b"dark");
}

#[test]
fn test_branch_keys_and_children() {
    let mut page = Page::new(11, 4096, 1);
    page.set_flags(PageFlags::BRANCH);
    page.set_count(2);

    let data = branch_element_offset(2);
    let first = BranchPageElement {
        pos: (data - branch_element_offset(0)) as u32,
        ksize: 3,
        pgid: 20,
    };
    let second = BranchPageElement {
        pos: (data + 3 - branch_element_offset(1)) as u32,
        ksize: 4,
        pgid: 21,
    };
    page.write_branch_element(0, &first).unwrap();
    page.write_branch_element(1, &second).unwrap();
    page.write_at(data, b"antbird").unwrap();

    assert_eq!(page.branch_key(0).unwrap(), b"ant");
    assert_eq!(page.branch_key(1).unwrap(), b"bird");
    let children: Vec<u64> = page.branch_elements().unwrap().iter().map(|e| e.pgid).collect();
    assert_eq!(children, vec![20, 21]);
}

#[test]
fn test_out_of_range_access_is_corruption() {
    let mut page = leaf_page(&[("k", "v")]);

    // value claims to run past the end of the page
    let elem = LeafPageElement {
        flags: 0,
        pos: 16,
        ksize: 1,
        vsize: 5000,
    };
    page.write_leaf_element(0, &elem).unwrap();
    assert!(matches!(page.leaf_value(0), Err(BoltError::Corrupted(_))));

    // element index past the buffer
    assert!(matches!(page.leaf_element(300), Err(BoltError::Corrupted(_))));
    assert!(matches!(page.write_at(4090, &[0u8; 10]), Err(BoltError::Corrupted(_))));
}

#[test]
fn test_bucket_flag() {
    let elem = LeafPageElement {
        flags: boltkv::page::BUCKET_LEAF_FLAG,
        ..Default::default()
    };
    assert!(elem.is_bucket());
    assert!(!LeafPageElement::default().is_bucket());
}
