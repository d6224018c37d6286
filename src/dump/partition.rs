use chrono::{DateTime, Duration, Utc};

/// Practical upper bound on the number of points Prometheus returns for a
/// single range query.
pub const PROMETHEUS_DEFAULT_MAX_RESOLUTION: i64 = 11_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Widest window one range query may cover at `step` without exceeding the
/// scaled point budget. `None` when the span overflows.
pub fn max_span(step: Duration, memory_ratio: f64) -> Option<Duration> {
    let points = (PROMETHEUS_DEFAULT_MAX_RESOLUTION as f64 * memory_ratio).floor() as i32;
    step.checked_mul(points)
}

/// Splits `[start, end]` into sub-ranges that each stay within the point
/// budget.
///
/// Upper bounds are inclusive, so every range after the first starts one
/// `step` past the previous range's end. Only the final (or sole) range keeps
/// its cursor unshifted. Returns nothing when the budget works out to a
/// non-positive span; callers validate `step` and `memory_ratio` first.
pub fn partition(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    step: Duration,
    memory_ratio: f64,
) -> Vec<TimeRange> {
    let Some(span) = max_span(step, memory_ratio).filter(|span| *span > Duration::zero()) else {
        return Vec::new();
    };

    let mut ranges = Vec::new();
    let mut cursor = start;
    while end - cursor >= span {
        ranges.push(TimeRange {
            start: cursor + step,
            end: cursor + span,
        });
        cursor += span;
    }
    ranges.push(TimeRange { start: cursor, end });
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_704_067_200 + secs, 0).unwrap()
    }

    #[test]
    fn three_hours_at_one_second_is_a_single_range() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap();
        let ranges = partition(start, end, Duration::seconds(1), 1.0);
        assert_eq!(ranges, vec![TimeRange { start, end }]);
    }

    #[test]
    fn long_window_shifts_every_chunk_but_the_last_tail() {
        let step = Duration::seconds(1);
        let ranges = partition(at(0), at(25_000), step, 1.0);
        assert_eq!(
            ranges,
            vec![
                TimeRange { start: at(1), end: at(11_000) },
                TimeRange { start: at(11_001), end: at(22_000) },
                TimeRange { start: at(22_000), end: at(25_000) },
            ]
        );
    }

    #[test]
    fn ranges_are_contiguous_and_cover_the_window() {
        let cases = [
            (0, 86_400, 15, 1.0),
            (0, 3_600, 1, 0.1),
            (0, 100_000, 7, 0.37),
            (0, 22_000, 1, 1.0),
            (0, 1, 1, 0.5),
        ];
        for (s, e, step_secs, ratio) in cases {
            let step = Duration::seconds(step_secs);
            let ranges = partition(at(s), at(e), step, ratio);
            assert!(!ranges.is_empty());
            assert!(ranges[0].start <= at(s) + step);
            assert_eq!(ranges.last().unwrap().end, at(e));
            let last = ranges.len() - 1;
            for i in 1..ranges.len() {
                let (prev, next) = (ranges[i - 1], ranges[i]);
                assert!(prev.start <= prev.end);
                if i < last {
                    // Interior chunks resume one step after the inclusive end.
                    assert_eq!(next.start, prev.end + step);
                } else {
                    assert_eq!(next.start, prev.end);
                }
            }

            let total_points: i64 = ranges
                .iter()
                .map(|r| (r.end - r.start).num_seconds() / step_secs)
                .sum();
            let expected = (e - s) / step_secs;
            assert!(
                (expected - total_points).abs() <= ranges.len() as i64,
                "points {total_points} vs expected {expected}"
            );
        }
    }

    #[test]
    fn window_of_exactly_one_span_gets_a_trailing_empty_range() {
        let ranges = partition(at(0), at(11_000), Duration::seconds(1), 1.0);
        assert_eq!(
            ranges,
            vec![
                TimeRange { start: at(1), end: at(11_000) },
                TimeRange { start: at(11_000), end: at(11_000) },
            ]
        );
    }

    #[test]
    fn non_positive_budget_yields_nothing() {
        assert!(partition(at(0), at(100), Duration::seconds(1), 0.0).is_empty());
        assert!(partition(at(0), at(100), Duration::zero(), 1.0).is_empty());
        assert!(partition(at(0), at(100), Duration::seconds(1), 0.00001).is_empty());
        assert!(partition(at(0), at(100), Duration::days(365 * 30_000), 1.0).is_empty());
    }

    #[test]
    fn memory_ratio_scales_the_span() {
        assert_eq!(max_span(Duration::seconds(1), 1.0), Some(Duration::seconds(11_000)));
        assert_eq!(max_span(Duration::seconds(15), 0.5), Some(Duration::seconds(82_500)));
        assert_eq!(max_span(Duration::seconds(1), 0.33333), Some(Duration::seconds(3_666)));
    }

    #[test]
    fn oversized_step_has_no_span() {
        assert_eq!(max_span(Duration::days(365 * 30_000), 1.0), None);
    }
}
