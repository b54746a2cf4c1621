//! Pure chunk planner: file size + chunk size → ordered part ranges.
//!
//! Used at session creation and again when re-attaching a recovered
//! session, to verify the persisted part layout still matches the plan.

use crate::types::{ByteRange, UploadPart};

/// Backend minimum part size (all parts except the last).
pub const MIN_CHUNK_BYTES: u64 = 5 * 1024 * 1024;

/// Rejected configuration — never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidConfig {
    #[error("source is empty; multipart upload requires at least one byte")]
    EmptySource,

    #[error("chunk size {chunk_bytes} below backend minimum {min}")]
    ChunkTooSmall { chunk_bytes: u64, min: u64 },
}

/// Number of parts for a file of `total_bytes` split into `chunk_bytes` chunks.
pub fn part_count(total_bytes: u64, chunk_bytes: u64) -> u32 {
    u32::try_from(total_bytes.div_ceil(chunk_bytes)).unwrap_or(u32::MAX)
}

/// Computes the ordered, disjoint byte ranges covering `[0, total_bytes)`.
///
/// Deterministic and side-effect free. Fails if `total_bytes` is zero or
/// `chunk_bytes` is below [`MIN_CHUNK_BYTES`].
pub fn plan_parts(total_bytes: u64, chunk_bytes: u64) -> Result<Vec<ByteRange>, InvalidConfig> {
    if total_bytes == 0 {
        return Err(InvalidConfig::EmptySource);
    }
    if chunk_bytes < MIN_CHUNK_BYTES {
        return Err(InvalidConfig::ChunkTooSmall {
            chunk_bytes,
            min: MIN_CHUNK_BYTES,
        });
    }

    let count = part_count(total_bytes, chunk_bytes);
    let mut ranges = Vec::with_capacity(count as usize);
    let mut start = 0u64;
    while start < total_bytes {
        let end = (start + chunk_bytes).min(total_bytes);
        ranges.push(ByteRange::new(start, end));
        start = end;
    }
    Ok(ranges)
}

/// Checks that a persisted part layout matches the plan for its session.
///
/// Part numbers must be exactly `1..=count` in order, each with the planned
/// range. Returns false on any gap, duplicate, or drifted range.
pub fn verify_plan(total_bytes: u64, chunk_bytes: u64, parts: &[UploadPart]) -> bool {
    let Ok(ranges) = plan_parts(total_bytes, chunk_bytes) else {
        return false;
    };
    if parts.len() != ranges.len() {
        return false;
    }
    parts
        .iter()
        .zip(ranges.iter())
        .enumerate()
        .all(|(i, (part, range))| part.part_number == (i + 1) as u32 && part.range == *range)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn plan_covers_file_exactly() {
        for (total, chunk) in [
            (23 * MB, 5 * MB),
            (5 * MB, 5 * MB),
            (5 * MB + 1, 5 * MB),
            (100 * MB + 37, 8 * MB),
            (1, 5 * MB),
        ] {
            let ranges = plan_parts(total, chunk).unwrap();
            assert_eq!(ranges.len() as u64, total.div_ceil(chunk));
            // Contiguous and disjoint, covering [0, total).
            assert_eq!(ranges[0].start, 0);
            for pair in ranges.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
            }
            assert_eq!(ranges.last().unwrap().end, total);
            assert_eq!(ranges.iter().map(ByteRange::len).sum::<u64>(), total);
        }
    }

    #[test]
    fn twenty_three_mb_in_five_mb_chunks() {
        let ranges = plan_parts(23 * MB, 5 * MB).unwrap();
        assert_eq!(ranges.len(), 5);
        for range in &ranges[..4] {
            assert_eq!(range.len(), 5 * MB);
        }
        assert_eq!(ranges[4].len(), 3 * MB);
    }

    #[test]
    fn rejects_empty_source() {
        assert_eq!(plan_parts(0, 5 * MB), Err(InvalidConfig::EmptySource));
    }

    #[test]
    fn rejects_small_chunks() {
        let err = plan_parts(23 * MB, MB).unwrap_err();
        assert!(matches!(err, InvalidConfig::ChunkTooSmall { .. }));
    }

    #[test]
    fn planning_is_deterministic() {
        let a = plan_parts(42 * MB + 7, 5 * MB).unwrap();
        let b = plan_parts(42 * MB + 7, 5 * MB).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn verify_plan_accepts_matching_layout() {
        let ranges = plan_parts(23 * MB, 5 * MB).unwrap();
        let parts: Vec<UploadPart> = ranges
            .iter()
            .enumerate()
            .map(|(i, r)| UploadPart::new("s1", (i + 1) as u32, *r))
            .collect();
        assert!(verify_plan(23 * MB, 5 * MB, &parts));
    }

    #[test]
    fn verify_plan_rejects_gaps_and_drift() {
        let ranges = plan_parts(23 * MB, 5 * MB).unwrap();
        let mut parts: Vec<UploadPart> = ranges
            .iter()
            .enumerate()
            .map(|(i, r)| UploadPart::new("s1", (i + 1) as u32, *r))
            .collect();

        let mut missing = parts.clone();
        missing.remove(2);
        assert!(!verify_plan(23 * MB, 5 * MB, &missing));

        parts[1].part_number = 5;
        assert!(!verify_plan(23 * MB, 5 * MB, &parts));
    }
}
