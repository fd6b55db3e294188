//! Multi-page listing walker.
//!
//! Listings (a user's works, a series' work list, a session's
//! subscriptions and bookmarks) span several pages. [`walk_pages`] fetches
//! pages `1..=total` and flattens their decoded rows, either one page at a
//! time or fanned out across tasks.
//!
//! Fan-out spawns one task per page with no cap of its own: in-flight
//! requests are bounded only by the rate gate. That mirrors the observed
//! behavior of the archive's other clients; for very large collections it
//! may be a resource-exhaustion hazard, so sequential mode is the default
//! everywhere.

use std::collections::HashSet;
use std::hash::Hash;

use crate::Result;

/// How a paginated collection fetch walks its pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// One page at a time, in increasing page order.
    #[default]
    Sequential,
    /// All pages at once, joined before returning. Order across pages is
    /// unspecified; order within a page is preserved.
    FanOut,
}

/// Fetches pages `1..=total` with `fetch` and concatenates their rows.
///
/// The first failing page aborts the walk and surfaces its error.
pub(crate) fn walk_pages<T, F>(total: u32, mode: FetchMode, fetch: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(u32) -> Result<Vec<T>> + Sync,
{
    match mode {
        FetchMode::Sequential => {
            let mut rows = Vec::new();
            for page in 1..=total {
                rows.extend(fetch(page)?);
            }
            Ok(rows)
        }
        FetchMode::FanOut => std::thread::scope(|scope| {
            let fetch = &fetch;
            let handles: Vec<_> = (1..=total)
                .map(|page| scope.spawn(move || fetch(page)))
                .collect();
            let mut rows = Vec::new();
            for handle in handles {
                let page_rows = match handle.join() {
                    Ok(result) => result?,
                    Err(panic) => std::panic::resume_unwind(panic),
                };
                rows.extend(page_rows);
            }
            Ok(rows)
        }),
    }
}

/// Like [`walk_pages`], but page 1 was already fetched by the caller (to
/// read the page count off it); its rows are passed in and `fetch` is only
/// called for pages 2 and up.
pub(crate) fn walk_pages_with_first<T, F>(
    first_rows: Vec<T>,
    total: u32,
    mode: FetchMode,
    fetch: F,
) -> Result<Vec<T>>
where
    T: Send + Sync + Clone,
    F: Fn(u32) -> Result<Vec<T>> + Sync,
{
    walk_pages(total, mode, |page| {
        if page == 1 { Ok(first_rows.clone()) } else { fetch(page) }
    })
}

/// Drops rows whose key was already seen, preserving first-seen order.
pub(crate) fn dedup_by_key<T, K, F>(rows: Vec<T>, key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::new();
    rows.into_iter().filter(|row| seen.insert(key(row))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ArchiveError;
    use rstest::rstest;

    fn fake_pages(total: u32, per_page: usize, last_page: usize) -> impl Fn(u32) -> Result<Vec<u32>> + Sync {
        move |page| {
            let count = if page == total { last_page } else { per_page };
            Ok((0..count as u32).map(|i| (page - 1) * per_page as u32 + i).collect())
        }
    }

    #[rstest]
    #[case(FetchMode::Sequential)]
    #[case(FetchMode::FanOut)]
    fn test_walk_collects_all_pages(#[case] mode: FetchMode) {
        let rows = walk_pages(4, mode, fake_pages(4, 20, 7)).unwrap();
        assert_eq!(rows.len(), 3 * 20 + 7);
        let unique: std::collections::HashSet<_> = rows.iter().collect();
        assert_eq!(unique.len(), rows.len());
    }

    #[test]
    fn test_sequential_preserves_page_order() {
        let rows = walk_pages(3, FetchMode::Sequential, fake_pages(3, 2, 2)).unwrap();
        assert_eq!(rows, vec![0, 1, 2, 3, 4, 5]);
    }

    #[rstest]
    #[case(FetchMode::Sequential)]
    #[case(FetchMode::FanOut)]
    fn test_walk_propagates_page_errors(#[case] mode: FetchMode) {
        let result = walk_pages(3, mode, |page| {
            if page == 2 {
                Err(ArchiveError::UnexpectedResponse { status: 500, body: String::new() })
            } else {
                Ok(vec![page])
            }
        });
        assert!(matches!(result, Err(ArchiveError::UnexpectedResponse { status: 500, .. })));
    }

    #[test]
    fn test_single_page_walk() {
        let rows = walk_pages(1, FetchMode::Sequential, fake_pages(1, 20, 3)).unwrap();
        assert_eq!(rows, vec![0, 1, 2]);
    }

    #[rstest]
    #[case(FetchMode::Sequential)]
    #[case(FetchMode::FanOut)]
    fn test_walk_with_first_never_refetches_page_one(#[case] mode: FetchMode) {
        let rows = walk_pages_with_first(vec![0, 1], 3, mode, |page| {
            assert_ne!(page, 1);
            Ok(vec![page * 10])
        })
        .unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows.contains(&0) && rows.contains(&1));
        assert!(rows.contains(&20) && rows.contains(&30));
    }

    #[test]
    fn test_walk_with_first_single_page_makes_no_requests() {
        let rows = walk_pages_with_first(vec![7, 8], 1, FetchMode::Sequential, |_| {
            panic!("no page beyond the first")
        })
        .unwrap();
        assert_eq!(rows, vec![7, 8]);
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let rows = vec![("a", 1), ("b", 2), ("a", 3)];
        let deduped = dedup_by_key(rows, |row| row.0);
        assert_eq!(deduped, vec![("a", 1), ("b", 2)]);
    }
}
