//! Activation functions and the derivative multipliers used by backpropagation.
//!
//! Layers report their activation as a raw `af_type` code. The six known codes
//! map onto [`Activation`]; any other code is treated as the identity, so its
//! derivative multiplier is `1` and the raw error signal passes through as is.
//!
//! | code | kind            | forward `f(s)`  | multiplier                              |
//! |------|-----------------|-----------------|-----------------------------------------|
//! | 1    | sigmoid         | `σ(s)`          | `e⁻ˢ / (1+e⁻ˢ)²`                         |
//! | 2    | bipolar sigmoid | `2σ(s) − 1`     | `2e⁻ˢ / (1+e⁻ˢ)²`                        |
//! | 3    | softplus        | `ln(1+eˢ)`      | `σ(s)`                                  |
//! | 4    | ReLU            | `max(0, s)`     | `1` if `s > 0` else `0`                 |
//! | 5    | leaky ReLU      | `s` or `0.01s`  | `1` if `s > 0` else `0.01`              |
//! | 6    | SiLU            | `s·σ(s)`        | `((s+1)e⁻ˢ + 1) / (1+e⁻ˢ)²`              |
//!
//! Everything is evaluated in `f64` and narrowed to `f32` at the end. The
//! exponential is always taken as `e⁻|ˢ|`, so every multiplier stays finite for
//! finite sums; values too small for `f32` underflow to zero. The `layer_error`
//! shader uses the same forms.

/// Slope of the leaky ReLU for non-positive sums.
pub const LEAKY_SLOPE: f32 = 0.01;

/// Known activation kinds, numbered by their `af_type` code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Activation {
    /// Logistic sigmoid.
    Sigmoid = 1,
    /// Sigmoid rescaled to `(-1, 1)`.
    BipolarSigmoid = 2,
    /// Softplus, whose multiplier is the logistic function itself.
    Softplus = 3,
    /// Rectified linear unit.
    Relu = 4,
    /// Leaky rectified linear unit.
    LeakyRelu = 5,
    /// Sigmoid-weighted linear unit.
    Silu = 6,
}

impl TryFrom<u8> for Activation {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Sigmoid),
            2 => Ok(Self::BipolarSigmoid),
            3 => Ok(Self::Softplus),
            4 => Ok(Self::Relu),
            5 => Ok(Self::LeakyRelu),
            6 => Ok(Self::Silu),
            _ => Err(()),
        }
    }
}

impl From<Activation> for u8 {
    fn from(kind: Activation) -> Self {
        kind as u8
    }
}

#[inline]
fn e_neg_abs(s: f64) -> f64 {
    (-s.abs()).exp()
}

#[inline]
fn logistic(s: f64) -> f64 {
    let e = e_neg_abs(s);
    if s >= 0.0 { 1.0 / (1.0 + e) } else { e / (1.0 + e) }
}

impl Activation {
    /// Applies the activation to a weighted sum.
    pub fn activate(self, s: f32) -> f32 {
        let x = s as f64;
        let y = match self {
            Activation::Sigmoid => logistic(x),
            Activation::BipolarSigmoid => 2.0 * logistic(x) - 1.0,
            Activation::Softplus => x.max(0.0) + e_neg_abs(x).ln_1p(),
            Activation::Relu => x.max(0.0),
            Activation::LeakyRelu => {
                if x > 0.0 {
                    x
                } else {
                    LEAKY_SLOPE as f64 * x
                }
            }
            Activation::Silu => x * logistic(x),
        };
        y as f32
    }

    /// Multiplier applied to the raw error signal of a neuron whose weighted
    /// sum is `s`.
    ///
    /// For softplus this is `σ(s)`, the derivative of `ln(1+eˢ)`.
    pub fn derivative(self, s: f32) -> f32 {
        let x = s as f64;
        // e⁻|ˢ| stays finite; negative sums use the form rescaled by e²ˢ
        let e = e_neg_abs(x);
        let denom = (1.0 + e).powi(2);
        let d = match self {
            Activation::Sigmoid => e / denom,
            Activation::BipolarSigmoid => 2.0 * e / denom,
            Activation::Softplus => logistic(x),
            Activation::Relu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::LeakyRelu => {
                if x > 0.0 {
                    1.0
                } else {
                    LEAKY_SLOPE as f64
                }
            }
            Activation::Silu if x >= 0.0 => ((x + 1.0) * e + 1.0) / denom,
            Activation::Silu => (x + 1.0 + e) * e / denom,
        };
        d as f32
    }
}

/// Applies the activation identified by `af_type`; unknown codes are the identity.
pub fn activate(af_type: u8, s: f32) -> f32 {
    Activation::try_from(af_type).map_or(s, |kind| kind.activate(s))
}

/// Derivative multiplier for `af_type`; unknown codes yield `1`.
pub fn derivative(af_type: u8, s: f32) -> f32 {
    Activation::try_from(af_type).map_or(1.0, |kind| kind.derivative(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sigma(s: f64) -> f64 {
        1.0 / (1.0 + (-s).exp())
    }

    #[test]
    fn sigmoid_multiplier_matches_closed_form() {
        for s in [-3.0f32, -0.5, 0.0, 0.25, 4.0] {
            let x = s as f64;
            let expected = sigma(x) * (1.0 - sigma(x));
            assert_abs_diff_eq!(derivative(1, s), expected as f32, epsilon = 1e-6);
        }
        assert_abs_diff_eq!(derivative(1, 0.0), 0.25, epsilon = 1e-7);
    }

    #[test]
    fn bipolar_is_twice_sigmoid() {
        for s in [-2.0f32, 0.0, 1.5] {
            assert_abs_diff_eq!(derivative(2, s), 2.0 * derivative(1, s), epsilon = 1e-6);
        }
        assert_abs_diff_eq!(derivative(2, 0.0), 0.5, epsilon = 1e-7);
    }

    #[test]
    fn softplus_yields_logistic_value() {
        assert_abs_diff_eq!(derivative(3, 0.0), 0.5, epsilon = 1e-7);
        assert_abs_diff_eq!(derivative(3, 2.0), sigma(2.0) as f32, epsilon = 1e-6);
        assert_abs_diff_eq!(derivative(3, 60.0), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(derivative(3, -60.0), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn rectifiers_switch_at_zero() {
        assert_eq!(derivative(4, 0.0), 0.0);
        assert_eq!(derivative(4, 1e-3), 1.0);
        assert_eq!(derivative(4, -50.0), 0.0);
        assert_eq!(derivative(5, 0.0), 0.01);
        assert_eq!(derivative(5, 75.0), 1.0);
        assert_eq!(derivative(5, -75.0), 0.01);
    }

    #[test]
    fn silu_multiplier_matches_closed_form() {
        assert_abs_diff_eq!(derivative(6, 0.0), 0.5, epsilon = 1e-7);
        for s in [-1.0f32, 0.7, 3.0] {
            let x = s as f64;
            let expected = sigma(x) + x * sigma(x) * (1.0 - sigma(x));
            assert_abs_diff_eq!(derivative(6, s), expected as f32, epsilon = 1e-6);
        }
        assert_abs_diff_eq!(derivative(6, 40.0), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn saturates_at_large_magnitudes() {
        assert_abs_diff_eq!(derivative(1, 100.0), 0.0, epsilon = 1e-30);
        assert_abs_diff_eq!(derivative(1, -100.0), 0.0, epsilon = 1e-30);
        assert_abs_diff_eq!(derivative(2, -100.0), 0.0, epsilon = 1e-30);
        assert_abs_diff_eq!(derivative(6, -100.0), 0.0, epsilon = 1e-30);
    }

    #[test]
    fn extreme_sums_stay_finite() {
        for af_type in 1..=6u8 {
            for s in [-1.0e4f32, -1000.0, -100.0, -90.0, -50.0, 50.0, 90.0, 100.0, 1000.0, 1.0e4] {
                let d = derivative(af_type, s);
                assert!(d.is_finite(), "af_type {af_type} at {s} gave {d}");
                assert!(activate(af_type, s).is_finite(), "af_type {af_type} at {s}");
            }
        }
    }

    #[test]
    fn large_negative_sums_match_closed_forms() {
        for s in [-50.0f32, -90.0, -100.0] {
            let x = s as f64;
            let logistic_prime = x.exp() / (1.0 + x.exp()).powi(2);
            assert_abs_diff_eq!(derivative(1, s), logistic_prime as f32, epsilon = 1e-30);
            assert_abs_diff_eq!(derivative(2, s), (2.0 * logistic_prime) as f32, epsilon = 1e-30);
            assert_abs_diff_eq!(derivative(3, s), sigma(x) as f32, epsilon = 1e-30);
            let silu = sigma(x) + x * logistic_prime;
            assert_abs_diff_eq!(derivative(6, s), silu as f32, epsilon = 1e-30);
        }
        assert!(derivative(6, -90.0) < 0.0);
    }

    #[test]
    fn unknown_kind_is_identity() {
        assert_eq!(derivative(0, 3.5), 1.0);
        assert_eq!(derivative(42, -3.5), 1.0);
        assert_eq!(activate(9, -3.5), -3.5);
    }

    #[test]
    fn forward_functions() {
        assert_abs_diff_eq!(activate(1, 0.0), 0.5, epsilon = 1e-7);
        assert_abs_diff_eq!(activate(2, 0.0), 0.0, epsilon = 1e-7);
        assert_abs_diff_eq!(activate(3, 0.0), 2f32.ln(), epsilon = 1e-6);
        assert_eq!(activate(4, -2.0), 0.0);
        assert_abs_diff_eq!(activate(5, -2.0), -0.02, epsilon = 1e-7);
        assert_abs_diff_eq!(activate(6, 1.0), sigma(1.0) as f32, epsilon = 1e-6);
    }
}
