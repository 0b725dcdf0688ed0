use crate::error::{Error, Result};

const GOLDEN: f64 = 0.618_033_988_749_894_9;
const MAX_EXPANSIONS: usize = 200;
const MAX_SECTIONS: usize = 500;

/// Location and value of a scalar minimum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Minimum {
    pub x: f64,
    pub value: f64,
}

/// Minimize `f` starting from `seed`.
///
/// The minimum is first bracketed by walking downhill with a doubling step,
/// then refined by golden-section search until the bracket is narrower than
/// `tol` (relative to `|x|`, absolute near zero).
pub fn minimize_scalar<F>(f: F, seed: f64, step: f64, tol: f64) -> Result<Minimum>
where
    F: Fn(f64) -> f64,
{
    if !seed.is_finite() || !step.is_finite() || step == 0.0 {
        return Err(Error::Convergence(format!(
            "invalid start (seed {seed}, step {step})"
        )));
    }

    let (mut a, mut b) = (seed, seed + step);
    let (mut fa, mut fb) = (f(a), f(b));
    if !fa.is_finite() || !fb.is_finite() {
        return Err(Error::Convergence(format!("objective not finite near {seed}")));
    }
    if fb > fa {
        std::mem::swap(&mut a, &mut b);
        std::mem::swap(&mut fa, &mut fb);
    }

    // Downhill walk until the objective rises again: a > b < c.
    let mut h = b - a;
    let mut c = b + h;
    let mut fc = f(c);
    let mut expansions = 0;
    while fc <= fb {
        expansions += 1;
        if expansions > MAX_EXPANSIONS || !fc.is_finite() {
            return Err(Error::Convergence(format!(
                "could not bracket a minimum starting from {seed}"
            )));
        }
        a = b;
        b = c;
        fb = fc;
        h *= 2.0;
        c = b + h;
        fc = f(c);
    }

    let (mut lo, mut hi) = if a < c { (a, c) } else { (c, a) };
    let mut x1 = hi - GOLDEN * (hi - lo);
    let mut x2 = lo + GOLDEN * (hi - lo);
    let mut f1 = f(x1);
    let mut f2 = f(x2);
    for _ in 0..MAX_SECTIONS {
        if (hi - lo).abs() <= tol * (1.0_f64).max(lo.abs().max(hi.abs())) {
            let x = 0.5 * (lo + hi);
            return Ok(Minimum { x, value: f(x) });
        }
        if f1 < f2 {
            hi = x2;
            x2 = x1;
            f2 = f1;
            x1 = hi - GOLDEN * (hi - lo);
            f1 = f(x1);
        } else {
            lo = x1;
            x1 = x2;
            f1 = f2;
            x2 = lo + GOLDEN * (hi - lo);
            f2 = f(x2);
        }
    }
    Err(Error::Convergence(format!(
        "golden-section search did not narrow below {tol} from seed {seed}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_parabola_vertex() {
        let m = minimize_scalar(|x| (x - 3.0).powi(2) + 1.0, 0.1, 0.1, 1e-10).unwrap();
        assert!((m.x - 3.0).abs() < 1e-6);
        assert!((m.value - 1.0).abs() < 1e-10);
    }

    #[test]
    fn walks_downhill_in_either_direction() {
        let m = minimize_scalar(|x| (x + 40.0).abs(), 0.1, 0.1, 1e-12).unwrap();
        assert!((m.x + 40.0).abs() < 1e-8);
    }

    #[test]
    fn unbounded_objective_fails() {
        assert!(matches!(
            minimize_scalar(|x| -x, 0.0, 1.0, 1e-8),
            Err(Error::Convergence(_))
        ));
    }
}
