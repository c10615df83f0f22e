//! Visiting order and bookkeeping for "download everything" mode.

/// Indices of `0..len` spiralling out from `start`: start, +1, -1, +2, -2, ...
///
/// Once one side runs out the remaining side continues in order.
pub fn spiral_order(len: usize, start: usize) -> Vec<usize> {
    if len == 0 {
        return Vec::new();
    }
    let start = start.min(len - 1);

    let mut order = Vec::with_capacity(len);
    order.push(start);
    for distance in 1..len {
        if start + distance < len {
            order.push(start + distance);
        }
        if let Some(index) = start.checked_sub(distance) {
            order.push(index);
        }
    }
    order
}

/// Outcome of a completed bulk download.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkSummary {
    pub total: usize,
    /// Frames that were already cached when the run started
    pub cached: usize,
    pub rendered: usize,
    pub failed: usize,
}

impl BulkSummary {
    pub fn completed(&self) -> usize {
        self.cached + self.rendered + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spiral_from_middle() {
        assert_eq!(spiral_order(10, 3), vec![3, 4, 2, 5, 1, 6, 0, 7, 8, 9]);
    }

    #[test]
    fn test_spiral_edges() {
        assert_eq!(spiral_order(4, 0), vec![0, 1, 2, 3]);
        assert_eq!(spiral_order(4, 3), vec![3, 2, 1, 0]);
        assert_eq!(spiral_order(3, 99), vec![2, 1, 0]);
        assert!(spiral_order(0, 0).is_empty());
    }

    #[test]
    fn test_spiral_visits_each_index_once() {
        let mut order = spiral_order(37, 11);
        order.sort_unstable();
        assert_eq!(order, (0..37).collect::<Vec<_>>());
    }
}
