//! Traffic source quality scoring.
//!
//! One pure function used by both the ingestion pipeline (stored per row)
//! and query-time ranking. The two call sites must never diverge, so this is
//! the only place the formula exists.

/// Session duration that earns a full duration score (10 minutes).
const MAX_DURATION_SECS: f64 = 600.0;

/// Pages per session that earn a full depth score.
const MAX_PAGES_PER_SESSION: f64 = 10.0;

/// Score a traffic source's engagement on a 0-100 scale.
///
/// Weighted blend of four signals:
/// - session duration (30%), saturating at 10 minutes
/// - inverse bounce rate (30%)
/// - pages per session (20%), saturating at 10 pages
/// - conversion rate (20%), where a 10% rate earns the full score
///
/// `bounce_rate_pct` is a percentage (0-100), not a fraction. Deterministic:
/// identical inputs produce the identical integer on every call.
pub fn quality_score(
    avg_duration_secs: f64,
    bounce_rate_pct: f64,
    pages_per_session: f64,
    conversions: i64,
    sessions: i64,
) -> i32 {
    let duration_score = (avg_duration_secs / MAX_DURATION_SECS).min(1.0) * 100.0;

    let bounce_score = (100.0 - bounce_rate_pct).max(0.0);

    let pages_score = (pages_per_session / MAX_PAGES_PER_SESSION).min(1.0) * 100.0;

    let conversion_rate = if sessions > 0 {
        conversions as f64 / sessions as f64 * 100.0
    } else {
        0.0
    };
    let conversion_score = (conversion_rate * 10.0).min(100.0);

    let score = duration_score * 0.3
        + bounce_score * 0.3
        + pages_score * 0.2
        + conversion_score * 0.2;

    (score.round() as i32).clamp(0, 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_is_deterministic() {
        let first = quality_score(300.0, 20.0, 3.0, 5, 100);
        for _ in 0..10 {
            assert_eq!(quality_score(300.0, 20.0, 3.0, 5, 100), first);
        }
        // 0.3*50 + 0.3*80 + 0.2*30 + 0.2*50 = 55
        assert_eq!(first, 55);
    }

    #[test]
    fn floor_case_scores_zero() {
        assert_eq!(quality_score(0.0, 100.0, 0.0, 0, 0), 0);
    }

    #[test]
    fn saturated_case_scores_one_hundred() {
        assert_eq!(quality_score(600.0, 0.0, 10.0, 100, 100), 100);
    }

    #[test]
    fn signals_saturate_instead_of_overflowing() {
        // Absurd inputs still land inside 0-100.
        let score = quality_score(1e9, 0.0, 1e9, 1_000_000, 1);
        assert_eq!(score, 100);
    }

    #[test]
    fn bounce_above_one_hundred_is_floored() {
        // A provider glitch reporting >100% bounce must not go negative.
        assert_eq!(quality_score(0.0, 250.0, 0.0, 0, 10), 0);
    }

    #[test]
    fn zero_sessions_means_zero_conversion_rate() {
        // Only the bounce component contributes here.
        assert_eq!(quality_score(0.0, 0.0, 0.0, 50, 0), 30);
    }
}
