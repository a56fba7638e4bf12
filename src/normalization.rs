//! # Parameter-Vector Normalization
//!
//! Feature standardization is usually applied to the data; here it is instead
//! folded into the objective by transforming the parameter vector before each
//! evaluation, so the dataset itself stays untouched. The context is shared
//! across worker tasks as a plain `Arc` — a value read by every task without
//! per-task re-transmission.

use ndarray::Array1;

/// An optional per-coordinate affine transform of the parameter vector.
///
/// With factors `f` and shifts `s`, coordinate `i` maps to
/// `c[i] * f[i] - s[i]`. An intercept coordinate, when present, is scaled but
/// never shifted. The default context is the identity.
#[derive(Debug, Clone, Default)]
pub struct NormalizationContext {
    factors: Option<Array1<f64>>,
    shifts: Option<Array1<f64>>,
    intercept_index: Option<usize>,
}

impl NormalizationContext {
    /// The identity transform.
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn new(
        factors: Option<Array1<f64>>,
        shifts: Option<Array1<f64>>,
        intercept_index: Option<usize>,
    ) -> Self {
        Self {
            factors,
            shifts,
            intercept_index,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.factors.is_none() && self.shifts.is_none()
    }

    /// Applies the transform to a parameter vector, returning the vector the
    /// per-record contributions should be evaluated at. Identity contexts
    /// return an unchanged copy.
    pub fn transform_coefficients(&self, coefficients: &Array1<f64>) -> Array1<f64> {
        let mut transformed = coefficients.clone();
        if let Some(factors) = &self.factors {
            transformed *= factors;
        }
        if let Some(shifts) = &self.shifts {
            for (index, value) in transformed.iter_mut().enumerate() {
                if Some(index) != self.intercept_index {
                    *value -= shifts[index];
                }
            }
        }
        transformed
    }

    /// Pulls a gradient computed at the transformed point back to the
    /// original parameterization (chain rule: shifts contribute nothing to
    /// the Jacobian, factors scale per coordinate).
    pub fn transform_gradient(&self, gradient: &Array1<f64>) -> Array1<f64> {
        match &self.factors {
            Some(factors) => gradient * factors,
            None => gradient.clone(),
        }
    }

    /// Pushes a direction vector forward through the transform's Jacobian,
    /// for Hessian-vector products evaluated at the transformed point.
    pub fn transform_direction(&self, direction: &Array1<f64>) -> Array1<f64> {
        match &self.factors {
            Some(factors) => direction * factors,
            None => direction.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn identity_returns_input_unchanged() {
        let context = NormalizationContext::identity();
        assert!(context.is_identity());
        let coefficients = array![1.5, -2.0, 0.25];
        assert_eq!(context.transform_coefficients(&coefficients), coefficients);
    }

    #[test]
    fn factors_and_shifts_apply_per_coordinate() {
        let context = NormalizationContext::new(
            Some(array![2.0, 0.5, 1.0]),
            Some(array![0.0, 1.0, 3.0]),
            Some(0),
        );
        let transformed = context.transform_coefficients(&array![1.0, 4.0, 2.0]);
        // Intercept (index 0) is scaled but not shifted.
        assert_eq!(transformed, array![2.0, 1.0, -1.0]);
    }

    #[test]
    fn gradient_pullback_scales_by_factors_only() {
        let context =
            NormalizationContext::new(Some(array![2.0, 0.5]), Some(array![1.0, 1.0]), None);
        assert_eq!(context.transform_gradient(&array![1.0, 4.0]), array![2.0, 2.0]);
        assert_eq!(context.transform_direction(&array![3.0, 2.0]), array![6.0, 1.0]);
    }
}
