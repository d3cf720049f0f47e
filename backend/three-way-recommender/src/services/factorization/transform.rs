use crate::services::rating_store::RatingBounds;
use std::fmt::Debug;

/// Keeps generalized-logistic inputs strictly inside the open rating interval.
pub const BOUNDARY_VARIATION: f64 = 1e-4;

/// Rescaling applied to ratings before fitting and inverted at prediction time.
pub trait RatingTransform: Send + Sync + Debug {
    /// Rating space to model space.
    fn forward(&self, rating: f64) -> f64;

    /// Model space back to rating space.
    fn inverse(&self, value: f64) -> f64;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl RatingTransform for Identity {
    fn forward(&self, rating: f64) -> f64 {
        rating
    }

    fn inverse(&self, value: f64) -> f64 {
        value
    }

    fn name(&self) -> &'static str {
        "identity"
    }
}

/// Generalized logistic curve between `lower` and `upper`:
///
/// ```text
/// inverse(y) = L + (U - L) / (1 + exp(-B·y))^(1/v)
/// forward(x) = -(1/B) · ln(((U - L) / (x - L))^v - 1)
/// ```
///
/// The journal form fixes `B = 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneralizedLogistic {
    lower: f64,
    upper: f64,
    steepness: f64,
    shape: f64,
}

impl GeneralizedLogistic {
    pub fn new(bounds: RatingBounds, steepness: f64, shape: f64) -> Self {
        Self {
            lower: bounds.lower,
            upper: bounds.upper,
            steepness,
            shape,
        }
    }

    pub fn journal(bounds: RatingBounds, shape: f64) -> Self {
        Self::new(bounds, 1.0, shape)
    }

    pub fn conference(bounds: RatingBounds, steepness: f64, shape: f64) -> Self {
        Self::new(bounds, steepness, shape)
    }

    pub fn shape(&self) -> f64 {
        self.shape
    }

    pub fn steepness(&self) -> f64 {
        self.steepness
    }
}

impl RatingTransform for GeneralizedLogistic {
    fn forward(&self, rating: f64) -> f64 {
        let x = rating.clamp(
            self.lower + BOUNDARY_VARIATION,
            self.upper - BOUNDARY_VARIATION,
        );
        let ratio = (self.upper - self.lower) / (x - self.lower);
        -(ratio.powf(self.shape) - 1.0).ln() / self.steepness
    }

    fn inverse(&self, value: f64) -> f64 {
        let denominator = (1.0 + (-self.steepness * value).exp()).powf(1.0 / self.shape);
        self.lower + (self.upper - self.lower) / denominator
    }

    fn name(&self) -> &'static str {
        if self.steepness == 1.0 {
            "gl_journal"
        } else {
            "gl_conference"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> RatingBounds {
        RatingBounds::new(-10.0, 10.0)
    }

    #[test]
    fn test_identity() {
        assert_eq!(Identity.forward(3.5), 3.5);
        assert_eq!(Identity.inverse(-2.0), -2.0);
    }

    #[test]
    fn test_journal_inverts_forward() {
        let gl = GeneralizedLogistic::journal(bounds(), 1.5);
        for x in [-9.5, -3.0, 0.0, 2.25, 9.9] {
            let y = gl.forward(x);
            assert!((gl.inverse(y) - x).abs() < 1e-9, "x = {}", x);
        }
    }

    #[test]
    fn test_conference_inverts_forward() {
        let gl = GeneralizedLogistic::conference(bounds(), 1000.0, 1.5);
        for x in [-8.0, -1.0, 0.5, 7.0] {
            let y = gl.forward(x);
            assert!((gl.inverse(y) - x).abs() < 1e-6, "x = {}", x);
        }
        assert_eq!(gl.name(), "gl_conference");
    }

    #[test]
    fn test_forward_clamps_boundaries() {
        let gl = GeneralizedLogistic::journal(bounds(), 1.5);
        assert!(gl.forward(-10.0).is_finite());
        assert!(gl.forward(10.0).is_finite());
        assert!(gl.forward(25.0).is_finite());
        assert_eq!(gl.forward(10.0), gl.forward(25.0));
    }

    #[test]
    fn test_inverse_stays_within_bounds() {
        let gl = GeneralizedLogistic::journal(bounds(), 1.5);
        for y in [-50.0, -1.0, 0.0, 1.0, 50.0] {
            let x = gl.inverse(y);
            assert!((-10.0..=10.0).contains(&x));
        }
        assert!(gl.inverse(1.0) > gl.inverse(0.0));
    }
}
