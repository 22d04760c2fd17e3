//! Utility functions

use std::sync::atomic::{AtomicU64, Ordering};

/// Caller-owned source of process-unique ids for volumes and slices
///
/// Ids start at 1 and only ever increase. The generator is meant to be owned
/// by whichever thread creates volumes (normally the UI thread); it is
/// `Sync`, so sharing it behind an `Arc` is also fine.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Start counting at `first`, e.g. to continue after restored sessions
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Hand out the next id
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Format byte size in human-readable form
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Reverse the byte order of every `unit`-wide word in `data`
///
/// A unit of 0 or 1 leaves the data untouched; trailing bytes that do not
/// fill a whole unit are left as they are.
pub fn swap_bytes(data: &mut [u8], unit: usize) {
    if unit <= 1 {
        return;
    }
    for word in data.chunks_exact_mut(unit) {
        word.reverse();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generator() {
        let ids = IdGenerator::new();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);

        let resumed = IdGenerator::starting_at(100);
        assert_eq!(resumed.next_id(), 100);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_swap_bytes() {
        let mut data = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
        swap_bytes(&mut data, 4);
        assert_eq!(data, vec![4, 3, 2, 1, 8, 7, 6, 5]);

        swap_bytes(&mut data, 1);
        assert_eq!(data, vec![4, 3, 2, 1, 8, 7, 6, 5]);

        let mut odd = vec![1u8, 2, 3];
        swap_bytes(&mut odd, 2);
        assert_eq!(odd, vec![2, 1, 3]);
    }
}
