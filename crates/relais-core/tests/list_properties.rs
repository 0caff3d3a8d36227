#![allow(clippy::unwrap_used)]

//! Property tests for the list-page header codec and the
//! selective-invalidation predicate.

use proptest::prelude::*;
use relais_core::list::{Cursor, ListBoundsHeader, SortBounds, LIST_BOUNDS_HEADER_SIZE};

fn header_strategy() -> impl Strategy<Value = ListBoundsHeader> {
    (
        any::<i64>(),
        any::<i64>(),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(|(first, last, desc, first_page, incomplete, cursor_mode)| {
            ListBoundsHeader {
                bounds: SortBounds::new(first, last),
                desc,
                first_page,
                incomplete,
                cursor_mode,
            }
        })
}

proptest! {
    #[test]
    fn header_roundtrips(header in header_strategy()) {
        let encoded = header.encode();
        prop_assert_eq!(encoded.len(), LIST_BOUNDS_HEADER_SIZE);
        prop_assert_eq!(ListBoundsHeader::decode(&encoded), Some(header));
    }

    #[test]
    fn cursor_roundtrips(sort_value in any::<i64>(), primary_key in any::<i64>()) {
        let cursor = Cursor { sort_value, primary_key };
        prop_assert_eq!(Cursor::decode(&cursor.encode()).unwrap(), cursor);
    }

    // A complete, non-first cursor page is affected exactly when the value
    // lies inside its bounds interval under the page's direction.
    #[test]
    fn middle_cursor_page_is_pure_interval_containment(
        lo in -1000i64..1000,
        span in 0i64..1000,
        v in -2000i64..2000,
        desc in any::<bool>(),
    ) {
        let hi = lo + span;
        let bounds = if desc { SortBounds::new(hi, lo) } else { SortBounds::new(lo, hi) };
        let header = ListBoundsHeader {
            bounds,
            desc,
            first_page: false,
            incomplete: false,
            cursor_mode: true,
        };
        prop_assert_eq!(header.affected_by(v), v >= lo && v <= hi);
    }

    // Incomplete offset pages absorb any value.
    #[test]
    fn incomplete_offset_page_is_always_affected(
        header in header_strategy(),
        v in any::<i64>(),
    ) {
        let header = ListBoundsHeader { incomplete: true, cursor_mode: false, ..header };
        prop_assert!(header.affected_by(v));
    }

    // Update invalidation is symmetric in (old, new) for offset pages
    // (interval overlap) and for cursor pages (containment of either).
    #[test]
    fn update_predicate_is_symmetric(
        header in header_strategy(),
        old in any::<i64>(),
        new in any::<i64>(),
    ) {
        prop_assert_eq!(
            header.affected_by_update(old, new),
            header.affected_by_update(new, old)
        );
    }

    // An update that keeps the sort value is equivalent to testing that
    // single value in cursor mode.
    #[test]
    fn no_move_update_matches_single_value_in_cursor_mode(
        header in header_strategy(),
        v in any::<i64>(),
    ) {
        let header = ListBoundsHeader { cursor_mode: true, ..header };
        prop_assert_eq!(header.affected_by_update(v, v), header.affected_by(v));
    }

    // Widening a page's interval never un-affects a value (monotonicity),
    // for complete middle cursor pages.
    #[test]
    fn wider_interval_covers_no_less(
        lo in -500i64..500,
        span in 0i64..500,
        grow in 0i64..500,
        v in -2000i64..2000,
    ) {
        let narrow = ListBoundsHeader {
            bounds: SortBounds::new(lo, lo + span),
            desc: false,
            first_page: false,
            incomplete: false,
            cursor_mode: true,
        };
        let wide = ListBoundsHeader {
            bounds: SortBounds::new(lo - grow, lo + span + grow),
            ..narrow
        };
        prop_assert!(!narrow.affected_by(v) || wide.affected_by(v));
    }
}
