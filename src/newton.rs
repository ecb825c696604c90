//! Scalar helpers shared by the limiters.

/// max(x, 0)
pub fn positive_part(x: f64) -> f64 {
    x.max(0.0)
}

/// max(-x, 0)
pub fn negative_part(x: f64) -> f64 {
    (-x).max(0.0)
}

/**
 * One step of a quadratic Newton iteration for a scalar function `phi` with
 * a root in `[p1, p2]`. The bracket values `phi1, phi2` and derivatives
 * `dphi1, dphi2` are evaluated at the ends. `sign` is `+1` for a convex and
 * `-1` for a concave function. Both ends move toward the root and the
 * bracket is preserved: on return `p1 <= p2`, still inside the original
 * interval.
 */
pub fn quadratic_newton_step(
    p1: &mut f64,
    p2: &mut f64,
    phi1: f64,
    phi2: f64,
    dphi1: f64,
    dphi2: f64,
    sign: f64,
) {
    let eps = f64::EPSILON;
    let scaling = 1.0 / (*p2 - *p1 + eps);

    let dd11 = dphi1;
    let dd12 = (phi2 - phi1) * scaling;
    let dd22 = dphi2;

    let dd112 = (dd12 - dd11) * scaling;
    let dd122 = (dd22 - dd12) * scaling;

    let discriminant1 = (dphi1 * dphi1 - 4.0 * phi1 * dd112).abs();
    let discriminant2 = (dphi2 * dphi2 - 4.0 * phi2 * dd122).abs();

    let denominator1 = dphi1 + sign * discriminant1.sqrt();
    let denominator2 = dphi2 + sign * discriminant2.sqrt();

    let t1 = *p1 - if denominator1.abs() < eps { 0.0 } else { 2.0 * phi1 / denominator1 };
    let t2 = *p2 - if denominator2.abs() < eps { 0.0 } else { 2.0 * phi2 / denominator2 };

    let t1 = t1.max(*p1).min(*p2);
    let t2 = t2.max(*p1).min(*p2);

    *p1 = t1.min(t2);
    *p2 = t1.max(t2);
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::quadratic_newton_step;

    #[test]
    fn bracket_shrinks_around_root_of_concave_function() {
        // phi(t) = 1 - 4 t^2 is concave with a root at 0.5
        let phi = |t: f64| 1.0 - 4.0 * t * t;
        let dphi = |t: f64| -8.0 * t;
        let (mut p1, mut p2) = (0.0, 1.0);

        for _ in 0..4 {
            let (f1, f2, d1, d2) = (phi(p1), phi(p2), dphi(p1), dphi(p2));
            quadratic_newton_step(&mut p1, &mut p2, f1, f2, d1, d2, -1.0);
            assert!(p1 <= p2);
            assert!(phi(p1) >= -1e-12);
        }
        assert!((p1 - 0.5).abs() < 1e-8);
        assert!((p2 - 0.5).abs() < 1e-8);
    }

    #[test]
    fn degenerate_bracket_stays_put() {
        let (mut p1, mut p2) = (0.25, 0.25);
        quadratic_newton_step(&mut p1, &mut p2, 0.0, 0.0, 0.0, 0.0, 1.0);
        assert_eq!((p1, p2), (0.25, 0.25));
    }
}
