//! Chunk planning: turning a total size into an aligned work list.
//!
//! The plan is deterministic given `(total_size, constants)`: chunk count is
//! `ceil(total_size / TARGET_CHUNK)` clamped so the average chunk stays in
//! `[MIN_CHUNK, MAX_CHUNK]`, the first `n-1` chunks share a 4 KiB-aligned
//! base length, and the last chunk takes the remainder.

use serde::{Deserialize, Serialize};

use super::constants::{ALIGN, MAX_CHUNK, MIN_CHUNK, TARGET_CHUNK};

/// One chunk of work: fetch `[offset, offset + length)` into the
/// destination file.
///
/// Immutable once created except `attempt`, which increments each time the
/// task re-enters the queue after a failure. `mirror_hint` pins a retried
/// task to a specific source after failover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Index into the chunk plan (and `chunk_progress`).
    pub chunk_index: usize,
    /// Absolute byte offset in the destination file.
    pub offset: u64,
    /// Bytes remaining for this chunk.
    pub length: u64,
    /// Retry attempt counter, 0 for the first try.
    pub attempt: u32,
    /// Index into the mirror list when the task has failed over.
    pub mirror_hint: Option<usize>,
}

impl Task {
    /// Creates a first-attempt task for a planned chunk.
    #[must_use]
    pub fn new(chunk_index: usize, offset: u64, length: u64) -> Self {
        Self {
            chunk_index,
            offset,
            length,
            attempt: 0,
            mirror_hint: None,
        }
    }

    /// The task covering what is left of this one after `written` bytes
    /// landed on disk, carrying an incremented attempt counter.
    #[must_use]
    pub fn remainder_after(&self, written: u64) -> Self {
        let written = written.min(self.length);
        Self {
            chunk_index: self.chunk_index,
            offset: self.offset + written,
            length: self.length - written,
            attempt: self.attempt + 1,
            mirror_hint: self.mirror_hint,
        }
    }

    /// Inclusive HTTP Range header value for this task.
    #[must_use]
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.offset, self.offset + self.length - 1)
    }
}

/// An ordered chunk list covering `[0, total_size)` with no gaps or
/// overlap.
pub type ChunkPlan = Vec<(u64, u64)>;

/// Computes the chunk plan for `total_size` bytes.
///
/// Every offset except possibly the tail is aligned to [`ALIGN`]; every
/// length except possibly the last is in `[MIN_CHUNK, MAX_CHUNK]`. Files
/// smaller than [`MIN_CHUNK`] get a single chunk. A zero-size file gets an
/// empty plan.
#[must_use]
pub fn plan_chunks(total_size: u64) -> ChunkPlan {
    if total_size == 0 {
        return Vec::new();
    }
    if total_size < MIN_CHUNK {
        return vec![(0, total_size)];
    }

    let mut n = total_size.div_ceil(TARGET_CHUNK);
    // Clamp so the average chunk stays inside [MIN_CHUNK, MAX_CHUNK].
    if total_size / n < MIN_CHUNK {
        n = total_size / MIN_CHUNK;
    }
    if total_size / n > MAX_CHUNK {
        n = total_size.div_ceil(MAX_CHUNK);
    }
    let n = n.max(1);

    let base = (total_size / n) / ALIGN * ALIGN;

    let mut plan = Vec::with_capacity(n as usize);
    let mut offset = 0u64;
    for _ in 0..n - 1 {
        plan.push((offset, base));
        offset += base;
    }
    plan.push((offset, total_size - offset));
    plan
}

/// Builds first-attempt tasks for a full plan.
#[must_use]
pub fn tasks_for_plan(plan: &ChunkPlan) -> Vec<Task> {
    plan.iter()
        .enumerate()
        .map(|(index, &(offset, length))| Task::new(index, offset, length))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::download::constants::MIB;

    /// Contiguous non-overlapping cover of `[0, total_size)`.
    fn assert_covers(plan: &ChunkPlan, total_size: u64) {
        let mut expected_offset = 0u64;
        for &(offset, length) in plan {
            assert_eq!(offset, expected_offset, "gap or overlap at {offset}");
            assert!(length > 0, "zero-length chunk at {offset}");
            expected_offset += length;
        }
        assert_eq!(expected_offset, total_size, "plan does not cover the file");
    }

    #[test]
    fn test_plan_zero_size_is_empty() {
        assert!(plan_chunks(0).is_empty());
    }

    #[test]
    fn test_plan_below_min_chunk_is_single() {
        let plan = plan_chunks(MIN_CHUNK - 1);
        assert_eq!(plan, vec![(0, MIN_CHUNK - 1)]);
    }

    #[test]
    fn test_plan_100_mib_shape() {
        let total = 100 * MIB;
        let plan = plan_chunks(total);

        assert_covers(&plan, total);
        assert!(
            (7..=13).contains(&plan.len()),
            "plan length {} outside [7, 13]",
            plan.len()
        );
        for &(offset, length) in &plan {
            assert_eq!(offset % ALIGN, 0, "offset {offset} unaligned");
            assert!(
                (MIN_CHUNK..=MAX_CHUNK).contains(&length),
                "length {length} outside [MIN_CHUNK, MAX_CHUNK]"
            );
        }
    }

    #[test]
    fn test_plan_is_deterministic() {
        for total in [MIN_CHUNK, 10 * MIB, 100 * MIB, 999 * MIB + 12345] {
            assert_eq!(plan_chunks(total), plan_chunks(total));
        }
    }

    #[test]
    fn test_plan_covers_awkward_sizes() {
        for total in [
            1,
            MIN_CHUNK,
            MIN_CHUNK + 1,
            TARGET_CHUNK - 1,
            TARGET_CHUNK,
            TARGET_CHUNK + ALIGN + 7,
            MAX_CHUNK * 3 + 1,
            1024 * MIB + 4095,
        ] {
            let plan = plan_chunks(total);
            assert_covers(&plan, total);
            for &(offset, _) in &plan[..plan.len().saturating_sub(1)] {
                assert_eq!(offset % ALIGN, 0, "offset {offset} unaligned for {total}");
            }
        }
    }

    #[test]
    fn test_plan_non_tail_lengths_within_bounds() {
        for total in [17 * MIB, 64 * MIB, 200 * MIB + 999] {
            let plan = plan_chunks(total);
            for &(_, length) in &plan[..plan.len() - 1] {
                assert!(
                    (MIN_CHUNK..=MAX_CHUNK).contains(&length),
                    "non-tail length {length} out of bounds for {total}"
                );
            }
        }
    }

    #[test]
    fn test_tasks_parallel_to_plan() {
        let plan = plan_chunks(20 * MIB);
        let tasks = tasks_for_plan(&plan);
        assert_eq!(tasks.len(), plan.len());
        for (index, task) in tasks.iter().enumerate() {
            assert_eq!(task.chunk_index, index);
            assert_eq!((task.offset, task.length), plan[index]);
            assert_eq!(task.attempt, 0);
            assert!(task.mirror_hint.is_none());
        }
    }

    #[test]
    fn test_range_header_inclusive_bounds() {
        let task = Task::new(0, 4096, 1024);
        assert_eq!(task.range_header(), "bytes=4096-5119");
    }

    #[test]
    fn test_remainder_after_partial_write() {
        let task = Task::new(3, 1000, 500);
        let rest = task.remainder_after(200);
        assert_eq!(rest.chunk_index, 3);
        assert_eq!(rest.offset, 1200);
        assert_eq!(rest.length, 300);
        assert_eq!(rest.attempt, 1);
    }

    #[test]
    fn test_remainder_clamps_overshoot() {
        let task = Task::new(0, 0, 100);
        let rest = task.remainder_after(400);
        assert_eq!(rest.length, 0);
        assert_eq!(rest.offset, 100);
    }
}
