//! Chunk planning from server range-reports.
//!
//! The server answers every chunk with either a comma-separated list of
//! `start-end/total` ranges it has received so far, or with some other
//! success payload once the file is complete. The planner turns that text
//! into the next byte range to send.

use std::fmt;

use crate::UploadPolicy;

/// An inclusive byte range `[start, end]` of the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub start: u64,
    pub end: u64,
}

impl ChunkRange {
    /// Number of bytes covered by the range.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl fmt::Display for ChunkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// One `start-end/total` triple from a range-report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportedRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

impl ReportedRange {
    fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Result of planning: the next range to send (if any) and the number of
/// bytes the server has already confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub range: Option<ChunkRange>,
    pub confirmed: u64,
}

impl ChunkPlan {
    /// Whether the confirmed byte count has reached the file length.
    pub fn is_complete(&self, file_length: u64) -> bool {
        self.confirmed >= file_length
    }
}

/// Chunk size for a file: `length / (100 / precision)` clamped to the
/// policy's bounds.
pub fn chunk_size(file_length: u64, policy: &UploadPolicy) -> u64 {
    let divisor = 100.0 / policy.percent_precision;
    let raw = (file_length as f64 / divisor) as u64;
    raw.max(policy.min_chunk_size).min(policy.max_chunk_size)
}

/// Parses a range-report.
///
/// Returns `None` unless the whole text is a comma-separated list of
/// `start-end/total` triples with `start <= end`.
pub fn parse_range_report(text: &str) -> Option<Vec<ReportedRange>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    text.split(',').map(parse_triple).collect()
}

fn parse_triple(token: &str) -> Option<ReportedRange> {
    let (span, total) = token.trim().split_once('/')?;
    let (start, end) = span.split_once('-')?;
    let range = ReportedRange {
        start: parse_digits(start)?,
        end: parse_digits(end)?,
        total: parse_digits(total)?,
    };
    (range.start <= range.end).then_some(range)
}

fn parse_digits(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Computes the next range to send.
///
/// - No report: the first chunk of the file.
/// - A range-list: the first hole in the reported coverage, capped at
///   `chunk_size` bytes. Later holes are not considered.
/// - Anything else: the server considers the file complete.
pub fn next_range(file_length: u64, chunk_size: u64, prior_report: Option<&str>) -> ChunkPlan {
    if file_length == 0 {
        return ChunkPlan {
            range: None,
            confirmed: 0,
        };
    }
    let chunk_size = chunk_size.max(1);

    let report = match prior_report.map(str::trim) {
        None | Some("") => {
            return ChunkPlan {
                range: Some(ChunkRange {
                    start: 0,
                    end: chunk_size.min(file_length) - 1,
                }),
                confirmed: 0,
            };
        }
        Some(text) => text,
    };

    let Some(mut ranges) = parse_range_report(report) else {
        return ChunkPlan {
            range: None,
            confirmed: file_length,
        };
    };

    let confirmed = ranges
        .iter()
        .fold(0u64, |acc, r| acc.saturating_add(r.len()));

    ranges.sort_by_key(|r| r.start);
    let mut gap_start = 0u64;
    let mut gap_end = None;
    for r in &ranges {
        if r.start > gap_start {
            gap_end = Some(r.start - 1);
            break;
        }
        gap_start = gap_start.max(r.end.saturating_add(1));
    }

    if gap_start >= file_length {
        return ChunkPlan {
            range: None,
            confirmed,
        };
    }

    let gap_end = gap_end.unwrap_or(file_length - 1).min(file_length - 1);
    let end = gap_start.saturating_add(chunk_size - 1).min(gap_end);
    ChunkPlan {
        range: Some(ChunkRange {
            start: gap_start,
            end,
        }),
        confirmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEN: u64 = 1_000_000;
    const CHUNK: u64 = 51_200;

    fn range(start: u64, end: u64) -> Option<ChunkRange> {
        Some(ChunkRange { start, end })
    }

    #[test]
    fn fresh_upload_starts_at_zero() {
        let plan = next_range(LEN, CHUNK, None);
        assert_eq!(plan.range, range(0, 51_199));
        assert_eq!(plan.confirmed, 0);
    }

    #[test]
    fn empty_report_is_fresh() {
        assert_eq!(next_range(LEN, CHUNK, Some("")), next_range(LEN, CHUNK, None));
    }

    #[test]
    fn fresh_upload_of_small_file_covers_whole_file() {
        let plan = next_range(1000, CHUNK, None);
        assert_eq!(plan.range, range(0, 999));
    }

    #[test]
    fn single_range_continues_after_it() {
        let plan = next_range(LEN, CHUNK, Some("0-51199/1000000"));
        assert_eq!(plan.confirmed, 51_200);
        assert_eq!(plan.range, range(51_200, 102_399));
    }

    #[test]
    fn unordered_ranges_find_gap_after_covered_prefix() {
        let plan = next_range(LEN, CHUNK, Some("51200-102399/1000000,0-51199/1000000"));
        assert_eq!(plan.confirmed, 102_400);
        assert_eq!(plan.range, range(102_400, 153_599));
    }

    #[test]
    fn leading_hole_is_filled_first() {
        let plan = next_range(LEN, CHUNK, Some("51200-102399/1000000"));
        assert_eq!(plan.confirmed, 51_200);
        assert_eq!(plan.range, range(0, 51_199));
    }

    #[test]
    fn gap_is_bounded_by_next_range() {
        let plan = next_range(LEN, CHUNK, Some("0-99/1000000,200-299/1000000"));
        assert_eq!(plan.range, range(100, 199));
        assert_eq!(plan.confirmed, 200);
    }

    #[test]
    fn only_first_gap_is_used() {
        let report = "0-9/1000000,20-29/1000000,40-49/1000000";
        let plan = next_range(LEN, CHUNK, Some(report));
        assert_eq!(plan.range, range(10, 19));
    }

    #[test]
    fn last_chunk_is_clipped_to_file_end() {
        let plan = next_range(LEN, CHUNK, Some("0-989999/1000000"));
        assert_eq!(plan.range, range(990_000, 999_999));
    }

    #[test]
    fn non_range_body_means_complete() {
        let plan = next_range(LEN, CHUNK, Some("OK"));
        assert_eq!(plan.confirmed, LEN);
        assert!(plan.range.is_none());
        assert!(plan.is_complete(LEN));
    }

    #[test]
    fn fully_covered_report_has_no_range() {
        let plan = next_range(LEN, CHUNK, Some("0-999999/1000000"));
        assert!(plan.range.is_none());
        assert!(plan.is_complete(LEN));
    }

    #[test]
    fn replaying_a_report_is_idempotent() {
        let report = Some("51200-102399/1000000,0-51199/1000000");
        assert_eq!(next_range(LEN, CHUNK, report), next_range(LEN, CHUNK, report));
    }

    #[test]
    fn trailing_newline_still_parses() {
        let plan = next_range(LEN, CHUNK, Some("0-51199/1000000\n"));
        assert_eq!(plan.range, range(51_200, 102_399));
    }

    #[test]
    fn malformed_reports_are_not_range_lists() {
        for text in ["0-10", "a-b/c", "10-5/100", "+1-5/100", "0-5/100,", "0-5/100;6-9/100"] {
            assert!(parse_range_report(text).is_none(), "{text:?} should not parse");
        }
    }

    #[test]
    fn parse_keeps_every_triple() {
        let parsed = parse_range_report("0-9/100, 20-29/100").unwrap();
        assert_eq!(
            parsed,
            vec![
                ReportedRange { start: 0, end: 9, total: 100 },
                ReportedRange { start: 20, end: 29, total: 100 },
            ]
        );
    }

    #[test]
    fn zero_length_file_has_nothing_to_send() {
        let plan = next_range(0, CHUNK, None);
        assert!(plan.range.is_none());
    }

    #[test]
    fn chunk_size_is_clamped() {
        let policy = UploadPolicy::default();
        for len in [0, 1, 5_119_999, 10_000_000, 52_428_800, 10_000_000_000] {
            let size = chunk_size(len, &policy);
            assert!(size >= policy.min_chunk_size && size <= policy.max_chunk_size);
        }
        assert_eq!(chunk_size(1_000_000, &policy), policy.min_chunk_size);
        assert_eq!(chunk_size(10_000_000, &policy), 100_000);
        assert_eq!(chunk_size(10_000_000_000, &policy), policy.max_chunk_size);
    }

    #[test]
    fn chunk_size_respects_precision() {
        let policy = UploadPolicy {
            percent_precision: 2.0,
            ..UploadPolicy::default()
        };
        assert_eq!(chunk_size(10_000_000, &policy), 200_000);
    }

    #[test]
    fn chunk_range_display_and_len() {
        let r = ChunkRange { start: 10, end: 19 };
        assert_eq!(r.len(), 10);
        assert_eq!(r.to_string(), "10-19");
    }
}
