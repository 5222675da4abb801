//! Growth curves for animated impacts.
//!
//! [`EasingCurve`] maps normalized progress `t ∈ [0, 1]` to a normalized
//! value. Every curve is monotonic non-decreasing; custom curves are built
//! from keyframes and rejected if their values ever decrease.

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

// ---------------------------------------------------------------------------
// KeyframeCurve
// ---------------------------------------------------------------------------

/// Piecewise-linear curve over `[0, 1]`.
///
/// Keys are `(t, value)` pairs sorted by `t`. Sampling before the first key
/// or after the last clamps to the end values.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyframeCurve {
    keys: Vec<(f32, f32)>,
}

impl KeyframeCurve {
    /// Build a curve from unsorted keys.
    ///
    /// Fails on an empty key list, non-finite keys, or values that decrease
    /// with `t`.
    pub fn new(mut keys: Vec<(f32, f32)>) -> Result<Self> {
        if keys.is_empty() {
            return Err(Error::InvalidCurve("curve needs at least one key".to_string()));
        }
        if keys.iter().any(|(t, v)| !t.is_finite() || !v.is_finite()) {
            return Err(Error::InvalidCurve("curve keys must be finite".to_string()));
        }
        keys.sort_by(|a, b| a.0.total_cmp(&b.0));
        if let Some(w) = keys.windows(2).find(|w| w[1].1 < w[0].1) {
            return Err(Error::InvalidCurve(format!(
                "curve decreases between t={} and t={}",
                w[0].0, w[1].0
            )));
        }
        Ok(Self { keys })
    }

    /// Sample at `t`, clamping outside the key range.
    pub fn sample(&self, t: f32) -> f32 {
        let n = self.keys.len();
        let (first_t, first_v) = self.keys[0];
        let (last_t, last_v) = self.keys[n - 1];
        if n == 1 || t <= first_t {
            return first_v;
        }
        if t >= last_t {
            return last_v;
        }

        // First key strictly after t; guaranteed to exist and be > 0 here
        let upper = self.keys.iter().position(|k| k.0 > t).unwrap_or(n - 1);
        let (t_a, v_a) = self.keys[upper - 1];
        let (t_b, v_b) = self.keys[upper];
        let span = t_b - t_a;
        if span < 1e-6 {
            return v_a;
        }
        v_a + (v_b - v_a) * ((t - t_a) / span)
    }

    /// Keys in ascending `t` order.
    pub fn keys(&self) -> &[(f32, f32)] {
        &self.keys
    }
}

impl Serialize for KeyframeCurve {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.keys.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for KeyframeCurve {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let keys = Vec::<(f32, f32)>::deserialize(deserializer)?;
        Self::new(keys).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// EasingCurve
// ---------------------------------------------------------------------------

/// Monotonic easing used for impact growth and the impact density kernel.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EasingCurve {
    Linear,
    EaseIn,
    EaseOut,
    #[default]
    EaseInOut,
    Keyframes(KeyframeCurve),
}

impl EasingCurve {
    /// Evaluate at `t`, clamped to `[0, 1]`. NaN is treated as 0.
    pub fn evaluate(&self, t: f32) -> f32 {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        match self {
            EasingCurve::Linear => t,
            EasingCurve::EaseIn => t * t,
            EasingCurve::EaseOut => t * (2.0 - t),
            EasingCurve::EaseInOut => t * t * (3.0 - 2.0 * t),
            EasingCurve::Keyframes(curve) => curve.sample(t),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_builtin_endpoints() {
        for curve in [EasingCurve::Linear, EasingCurve::EaseIn, EasingCurve::EaseOut, EasingCurve::EaseInOut] {
            assert!(approx_eq(curve.evaluate(0.0), 0.0), "{curve:?} at 0");
            assert!(approx_eq(curve.evaluate(1.0), 1.0), "{curve:?} at 1");
        }
    }

    #[test]
    fn test_builtin_monotonic() {
        for curve in [EasingCurve::Linear, EasingCurve::EaseIn, EasingCurve::EaseOut, EasingCurve::EaseInOut] {
            let mut last = curve.evaluate(0.0);
            for i in 1..=100 {
                let v = curve.evaluate(i as f32 / 100.0);
                assert!(v >= last, "{curve:?} decreased at step {i}");
                last = v;
            }
        }
    }

    #[test]
    fn test_ease_in_out_midpoint() {
        assert!(approx_eq(EasingCurve::EaseInOut.evaluate(0.5), 0.5));
        assert!(EasingCurve::EaseInOut.evaluate(0.25) < 0.25);
    }

    #[test]
    fn test_evaluate_clamps_input() {
        let c = EasingCurve::Linear;
        assert_eq!(c.evaluate(-3.0), 0.0);
        assert_eq!(c.evaluate(7.0), 1.0);
        assert_eq!(c.evaluate(f32::NAN), 0.0);
    }

    #[test]
    fn test_keyframes_interpolate_and_clamp() {
        let curve = KeyframeCurve::new(vec![(1.0, 1.0), (0.0, 0.0), (0.5, 0.8)]).unwrap();
        assert!(approx_eq(curve.sample(0.25), 0.4));
        assert!(approx_eq(curve.sample(0.75), 0.9));
        assert_eq!(curve.sample(-1.0), 0.0);
        assert_eq!(curve.sample(2.0), 1.0);
        assert_eq!(curve.keys()[0], (0.0, 0.0));
    }

    #[test]
    fn test_single_key_is_constant() {
        let curve = KeyframeCurve::new(vec![(0.3, 0.6)]).unwrap();
        assert_eq!(curve.sample(0.0), 0.6);
        assert_eq!(curve.sample(1.0), 0.6);
    }

    #[test]
    fn test_decreasing_keys_rejected() {
        let err = KeyframeCurve::new(vec![(0.0, 0.0), (0.5, 1.0), (1.0, 0.5)]).unwrap_err();
        assert!(matches!(err, Error::InvalidCurve(_)));
        assert!(KeyframeCurve::new(Vec::new()).is_err());
        assert!(KeyframeCurve::new(vec![(0.0, f32::NAN)]).is_err());
    }

    #[test]
    fn test_keyframes_deserialize_validates() {
        let ok: EasingCurve = serde_json::from_str(r#"{"keyframes":[[0.0,0.0],[1.0,1.0]]}"#).unwrap();
        assert!(approx_eq(ok.evaluate(0.5), 0.5));
        let bad = serde_json::from_str::<EasingCurve>(r#"{"keyframes":[[0.0,1.0],[1.0,0.0]]}"#);
        assert!(bad.is_err());
        let named: EasingCurve = serde_json::from_str(r#""ease_out""#).unwrap();
        assert_eq!(named, EasingCurve::EaseOut);
    }
}
