use serde::{Deserialize, Serialize};

/// Distance metric, fixed when an index is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// `1 - cos(a, b)`, clamped to `[0, 2]`.
    #[default]
    Cosine,
    /// Euclidean distance.
    L2,
}

impl Metric {
    /// Exact distance between two equal-length vectors. Never negative and
    /// never NaN; a result that is not finite becomes [`max_distance`](Self::max_distance).
    #[inline]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        let distance = match self {
            Metric::Cosine => cosine_distance(a, b),
            Metric::L2 => l2_distance(a, b),
        };
        if distance.is_finite() {
            distance
        } else {
            self.max_distance()
        }
    }

    /// Largest distance the metric reports.
    pub fn max_distance(self) -> f32 {
        match self {
            Metric::Cosine => 2.0,
            Metric::L2 => f32::MAX,
        }
    }

    /// Map a distance onto a `[0, 1]` similarity, higher meaning closer.
    #[inline]
    pub fn similarity(self, distance: f32) -> f32 {
        if distance.is_nan() {
            return 0.0;
        }
        match self {
            Metric::Cosine => (1.0 - distance).clamp(0.0, 1.0),
            Metric::L2 => 1.0 / (1.0 + distance.max(0.0)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::L2 => "l2",
        }
    }
}

// Accumulate in f64: f32 norms overflow for components near f32::MAX.

/// Zero-norm input is treated as orthogonal (distance 1).
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }

    let similarity = (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0);
    (1.0 - similarity).clamp(0.0, 2.0) as f32
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = f64::from(x) - f64::from(y);
            d * d
        })
        .sum::<f64>()
        .sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_distance_range() {
        let d = Metric::Cosine.distance(&[1.0, 0.0, 0.0], &[1.0, 0.0, 0.0]);
        assert!(d.abs() < 1e-6);

        let d = Metric::Cosine.distance(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert!((d - 1.0).abs() < 1e-6);

        let d = Metric::Cosine.distance(&[1.0, 0.0, 0.0], &[-1.0, 0.0, 0.0]);
        assert!((d - 2.0).abs() < 1e-6);

        let d = Metric::Cosine.distance(&[0.0, 0.0], &[1.0, 0.0]);
        assert_eq!(d, 1.0);
    }

    #[test]
    fn l2_distance_matches_pythagoras() {
        let d = Metric::L2.distance(&[0.0, 0.0], &[3.0, 4.0]);
        assert!((d - 5.0).abs() < 1e-6);
    }

    #[test]
    fn similarity_is_bounded() {
        assert_eq!(Metric::Cosine.similarity(0.0), 1.0);
        assert_eq!(Metric::Cosine.similarity(1.5), 0.0);
        assert_eq!(Metric::L2.similarity(0.0), 1.0);
        assert!((Metric::L2.similarity(1.0) - 0.5).abs() < 1e-6);
        assert_eq!(Metric::Cosine.similarity(f32::NAN), 0.0);
    }

    #[test]
    fn huge_components_do_not_look_identical() {
        let big = [3.0e38_f32, 3.0e38, 0.0];
        let other = [0.0_f32, 3.0e38, 3.0e38];

        let d = Metric::Cosine.distance(&big, &other);
        assert!(d.is_finite());
        assert!((d - 0.5).abs() < 1e-6);
        assert!(Metric::Cosine.similarity(d) < 0.6);

        let d = Metric::L2.distance(&big, &other);
        assert!(d.is_finite());
        assert!(Metric::L2.similarity(d) < 1e-6);

        let same = Metric::Cosine.distance(&big, &big);
        assert!(same.abs() < 1e-6);
    }

    #[test]
    fn metric_serde_names() {
        assert_eq!(serde_json::to_string(&Metric::L2).unwrap(), "\"l2\"");
        let m: Metric = serde_json::from_str("\"cosine\"").unwrap();
        assert_eq!(m, Metric::Cosine);
    }
}
