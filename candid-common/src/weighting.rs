//! Vote weighting and ranking math
//!
//! Pure, total functions over the 2D ideological coordinate space:
//! vote weights scale with the ideological distance between voter and
//! author, and the ranking scores (Wilson, hot, controversial) consume
//! the weighted up/down sums.
//!
//! None of these functions fail or touch I/O. Cold-start policy: missing
//! coordinates or a missing normalization scale always yield the baseline
//! weight of 1.0, never a penalty.

use serde::{Deserialize, Serialize};

/// Wilson score confidence level: z for a 95% one-sided interval.
const WILSON_Z: f64 = 1.96;

/// A point in the 2D ideological coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coords {
    pub x: f64,
    pub y: f64,
}

impl Coords {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Euclidean distance between two coordinate points.
pub fn ideological_distance(a: Coords, b: Coords) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    (dx * dx + dy * dy).sqrt()
}

/// Maximum pairwise distance among cluster centroids.
///
/// Returns `None` for fewer than two centroids: with a single opinion
/// group there is no normalization scale, and weighting falls back to
/// baseline.
pub fn compute_max_distance(centroids: &[Coords]) -> Option<f64> {
    if centroids.len() < 2 {
        return None;
    }

    let mut max = 0.0_f64;
    for (i, a) in centroids.iter().enumerate() {
        for b in &centroids[i + 1..] {
            let d = ideological_distance(*a, *b);
            if d > max {
                max = d;
            }
        }
    }
    Some(max)
}

/// Weight applied to a vote based on voter/author ideological distance.
///
/// Weight is `1.0 + min(distance / max_distance, 1.0)`, so it is linear
/// in normalized distance and capped at 2.0. Any missing input (cold
/// start, single cluster) yields exactly 1.0.
pub fn vote_weight(
    voter: Option<Coords>,
    author: Option<Coords>,
    max_distance: Option<f64>,
) -> f64 {
    match (voter, author, max_distance) {
        (Some(v), Some(a), Some(max)) if max > 0.0 => {
            let normalized = ideological_distance(v, a) / max;
            1.0 + normalized.min(1.0)
        }
        _ => 1.0,
    }
}

/// Lower bound of the 95% Wilson score interval over weighted vote sums.
///
/// Returns 0.0 when the total weight is zero. Output is always in [0, 1].
pub fn wilson_score(up: f64, down: f64) -> f64 {
    let n = up + down;
    if n <= 0.0 {
        return 0.0;
    }

    let z = WILSON_Z;
    let z2 = z * z;
    let p_hat = up / n;

    let numerator = p_hat + z2 / (2.0 * n)
        - z * ((p_hat * (1.0 - p_hat) + z2 / (4.0 * n)) / n).sqrt();
    let score = numerator / (1.0 + z2 / n);

    score.clamp(0.0, 1.0)
}

/// Time-decayed ranking score.
///
/// `sign(score) * log10(max(|score|, 1)) / (age_hours + 2)^1.5` where
/// `score = up - down`. The logarithm compresses magnitude so viral items
/// do not dominate indefinitely; the sign is preserved so negative-net
/// items rank below zero.
pub fn hot_score(
    up: f64,
    down: f64,
    created_time: chrono::DateTime<chrono::Utc>,
    now: chrono::DateTime<chrono::Utc>,
) -> f64 {
    let score = up - down;
    let sign = if score > 0.0 {
        1.0
    } else if score < 0.0 {
        -1.0
    } else {
        0.0
    };

    let order = score.abs().max(1.0).log10();
    let age_hours = ((now - created_time).num_seconds() as f64 / 3600.0).max(0.0);

    sign * order / (age_hours + 2.0).powf(1.5)
}

/// Controversy score: total weight scaled by the min/max vote ratio.
///
/// Rewards both volume and a near-even split; one-sided or empty items
/// score 0.
pub fn controversial_score(up: f64, down: f64) -> f64 {
    let total = up + down;
    if total <= 0.0 {
        return 0.0;
    }

    let max = up.max(down);
    let min = up.min(down);
    if max <= 0.0 {
        return 0.0;
    }

    total * (min / max)
}

/// Geometric centroid of a point set. `None` for an empty set.
pub fn centroid(points: &[Coords]) -> Option<Coords> {
    if points.is_empty() {
        return None;
    }

    let n = points.len() as f64;
    let sum_x: f64 = points.iter().map(|p| p.x).sum();
    let sum_y: f64 = points.iter().map(|p| p.y).sum();
    Some(Coords::new(sum_x / n, sum_y / n))
}

/// Convex hull via Andrew's monotone chain.
///
/// Returns vertices in counter-clockwise order without repeating the
/// first point. Degenerate inputs (fewer than 3 distinct points) return
/// the distinct points sorted.
pub fn convex_hull(points: &[Coords]) -> Vec<Coords> {
    let mut sorted: Vec<Coords> = points.to_vec();
    sorted.sort_by(|a, b| {
        a.x.partial_cmp(&b.x)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.y.partial_cmp(&b.y).unwrap_or(std::cmp::Ordering::Equal))
    });
    sorted.dedup_by(|a, b| a.x == b.x && a.y == b.y);

    if sorted.len() < 3 {
        return sorted;
    }

    fn cross(o: Coords, a: Coords, b: Coords) -> f64 {
        (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
    }

    let mut lower: Vec<Coords> = Vec::new();
    for &p in &sorted {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }

    let mut upper: Vec<Coords> = Vec::new();
    for &p in sorted.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }

    // Last point of each half is the first point of the other
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn distance_is_euclidean() {
        let a = Coords::new(0.0, 0.0);
        let b = Coords::new(3.0, 4.0);
        assert!((ideological_distance(a, b) - 5.0).abs() < 1e-12);
        assert_eq!(ideological_distance(a, a), 0.0);
    }

    #[test]
    fn max_distance_requires_two_centroids() {
        assert_eq!(compute_max_distance(&[]), None);
        assert_eq!(compute_max_distance(&[Coords::new(1.0, 1.0)]), None);
    }

    #[test]
    fn max_distance_is_true_max_pairwise() {
        let centroids = [
            Coords::new(0.0, 0.0),
            Coords::new(1.0, 0.0),
            Coords::new(0.0, 7.0),
            Coords::new(-3.0, -4.0), // distance to (0,7) = sqrt(9+121)
        ];
        let expected = ideological_distance(centroids[3], centroids[2]);
        let max = compute_max_distance(&centroids).unwrap();
        assert!((max - expected).abs() < 1e-12);
    }

    #[test]
    fn vote_weight_baseline_on_missing_inputs() {
        let c = Coords::new(1.0, 2.0);
        assert_eq!(vote_weight(None, Some(c), Some(4.0)), 1.0);
        assert_eq!(vote_weight(Some(c), None, Some(4.0)), 1.0);
        assert_eq!(vote_weight(Some(c), Some(c), None), 1.0);
        assert_eq!(vote_weight(Some(c), Some(c), Some(0.0)), 1.0);
        assert_eq!(vote_weight(Some(c), Some(c), Some(-1.0)), 1.0);
    }

    #[test]
    fn vote_weight_monotonic_in_distance() {
        let author = Coords::new(0.0, 0.0);
        let max = 10.0;

        let mut last = 0.0;
        for step in 0..=20 {
            let voter = Coords::new(step as f64, 0.0);
            let w = vote_weight(Some(voter), Some(author), Some(max));
            assert!(w >= last, "weight decreased at distance {}", step);
            assert!((1.0..=2.0).contains(&w));
            last = w;
        }
    }

    #[test]
    fn vote_weight_caps_at_two() {
        let author = Coords::new(0.0, 0.0);
        let voter = Coords::new(100.0, 0.0);
        assert_eq!(vote_weight(Some(voter), Some(author), Some(1.0)), 2.0);
    }

    #[test]
    fn wilson_score_zero_votes_is_zero() {
        assert_eq!(wilson_score(0.0, 0.0), 0.0);
    }

    #[test]
    fn wilson_score_stays_in_unit_interval() {
        let cases = [
            (0.0, 0.0),
            (1.0, 0.0),
            (0.0, 1.0),
            (10.0, 0.0),
            (100.0, 100.0),
            (1.5, 2.5), // weighted sums are fractional
            (10000.0, 3.0),
        ];
        for (up, down) in cases {
            let s = wilson_score(up, down);
            assert!((0.0..=1.0).contains(&s), "wilson({}, {}) = {}", up, down, s);
        }
    }

    #[test]
    fn wilson_score_rewards_volume() {
        // Same ratio, more votes: higher confidence lower bound
        assert!(wilson_score(100.0, 10.0) > wilson_score(10.0, 1.0));
    }

    #[test]
    fn hot_score_decays_with_age() {
        let now = Utc::now();
        let fresh = hot_score(10.0, 0.0, now - Duration::hours(1), now);
        let stale = hot_score(10.0, 0.0, now - Duration::hours(10), now);
        assert!(fresh > stale);
        assert!(stale > 0.0);
    }

    #[test]
    fn hot_score_preserves_sign() {
        let now = Utc::now();
        let created = now - Duration::hours(3);
        assert!(hot_score(10.0, 0.0, created, now) > 0.0);
        assert!(hot_score(0.0, 10.0, created, now) < 0.0);
        assert_eq!(hot_score(5.0, 5.0, created, now), 0.0);
    }

    #[test]
    fn controversial_score_rewards_even_split() {
        assert_eq!(controversial_score(0.0, 0.0), 0.0);
        assert_eq!(controversial_score(10.0, 0.0), 0.0);
        // Even split beats a lopsided one at the same volume
        assert!(controversial_score(10.0, 10.0) > controversial_score(18.0, 2.0));
        // More volume beats less at the same split
        assert!(controversial_score(20.0, 20.0) > controversial_score(10.0, 10.0));
    }

    #[test]
    fn centroid_averages_points() {
        assert_eq!(centroid(&[]), None);
        let c = centroid(&[
            Coords::new(0.0, 0.0),
            Coords::new(2.0, 0.0),
            Coords::new(1.0, 3.0),
        ])
        .unwrap();
        assert!((c.x - 1.0).abs() < 1e-12);
        assert!((c.y - 1.0).abs() < 1e-12);
    }

    #[test]
    fn convex_hull_drops_interior_points() {
        let square = [
            Coords::new(0.0, 0.0),
            Coords::new(4.0, 0.0),
            Coords::new(4.0, 4.0),
            Coords::new(0.0, 4.0),
            Coords::new(2.0, 2.0), // interior
            Coords::new(1.0, 0.0), // on an edge
        ];
        let hull = convex_hull(&square);
        assert_eq!(hull.len(), 4);
        assert!(!hull.contains(&Coords::new(2.0, 2.0)));
    }

    #[test]
    fn convex_hull_degenerate_inputs() {
        assert!(convex_hull(&[]).is_empty());

        let two = [Coords::new(1.0, 1.0), Coords::new(0.0, 0.0)];
        let hull = convex_hull(&two);
        assert_eq!(hull.len(), 2);

        // Duplicates collapse
        let dup = [Coords::new(1.0, 1.0), Coords::new(1.0, 1.0)];
        assert_eq!(convex_hull(&dup).len(), 1);
    }
}
