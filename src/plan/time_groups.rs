//! Partition an acquisition list into contiguous time groups.

use chrono::{DateTime, Utc};

/// A contiguous run of acquisitions processed together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeGroup {
    pub index: usize,

    /// Acquisitions in traversal order (newest first when the algorithm reverses time)
    pub acquisitions: Vec<DateTime<Utc>>,
}

impl TimeGroup {
    pub fn len(&self) -> usize {
        self.acquisitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.acquisitions.is_empty()
    }
}

/// Split `acquisitions` (ascending) into `count` balanced groups.
///
/// With `reverse` the list is walked newest to oldest before grouping, so group 0
/// always holds the most recent acquisitions. `None` yields a single group.
pub fn partition(
    acquisitions: &[DateTime<Utc>],
    count: Option<usize>,
    reverse: bool,
) -> Vec<TimeGroup> {
    let mut ordered = acquisitions.to_vec();
    if reverse {
        ordered.reverse();
    }

    let n = ordered.len();
    if n == 0 {
        return Vec::new();
    }

    let groups = count.unwrap_or(1).clamp(1, n);
    let base = n / groups;
    let extra = n % groups;

    let mut out = Vec::with_capacity(groups);
    let mut start = 0;
    for index in 0..groups {
        let size = base + usize::from(index < extra);
        out.push(TimeGroup {
            index,
            acquisitions: ordered[start..start + size].to_vec(),
        });
        start += size;
    }
    out
}
