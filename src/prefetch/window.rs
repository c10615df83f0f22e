//! Priority window around the playback position.

/// One timeline index the scheduler should keep prefetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSlot {
    pub index: usize,
    /// Lower runs first; the current frame is 0
    pub priority: u32,
}

/// Timeline indices around `current`, ordered by priority.
///
/// The current frame comes first, then `look_ahead` frames by increasing
/// distance, then `look_behind` frames by increasing distance. Indices outside
/// `0..len` are left out.
pub fn compute_window(current: usize, len: usize, look_ahead: usize, look_behind: usize) -> Vec<WindowSlot> {
    if current >= len {
        return Vec::new();
    }

    let ahead = (1..=look_ahead)
        .map(|d| current + d)
        .take_while(|&index| index < len);
    let behind = (1..=look_behind).map_while(|d| current.checked_sub(d));

    std::iter::once(current)
        .chain(ahead)
        .chain(behind)
        .enumerate()
        .map(|(priority, index)| WindowSlot {
            index,
            priority: priority as u32,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indices(slots: &[WindowSlot]) -> Vec<usize> {
        slots.iter().map(|s| s.index).collect()
    }

    #[test]
    fn test_window_order() {
        let window = compute_window(5, 20, 3, 2);
        assert_eq!(indices(&window), vec![5, 6, 7, 8, 4, 3]);
        assert_eq!(window[0].priority, 0);
        assert!(window.windows(2).all(|w| w[0].priority < w[1].priority));
    }

    #[test]
    fn test_window_clipped_at_edges() {
        assert_eq!(indices(&compute_window(0, 3, 10, 3)), vec![0, 1, 2]);
        assert_eq!(indices(&compute_window(2, 3, 10, 1)), vec![2, 1]);
    }

    #[test]
    fn test_window_out_of_range() {
        assert!(compute_window(3, 3, 10, 3).is_empty());
        assert!(compute_window(0, 0, 10, 3).is_empty());
    }
}
