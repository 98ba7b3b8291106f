use num::abs;

use crate::error::{RcfError, Result};

/// Streaming fold over per-tree scalar results with an early stop.
///
/// The accumulator watches the running mean; once at least
/// `min_values_accepted` trees have voted and the mean moved by less than
/// `precision` (as a fraction of its magnitude) across the trailing window,
/// further trees add nothing and the fold reports convergence. The one-sided
/// variant refuses to converge while the mean sits on the uninteresting side
/// of its threshold, so suspicious queries always collect the full vote.
pub struct ConvergingAccumulator {
    precision: f64,
    min_values_accepted: usize,
    max_values_accepted: usize,
    one_sided_above: Option<f64>,
    means: Vec<f64>,
    total: f64,
    converged: bool,
}

impl ConvergingAccumulator {
    pub fn new(
        precision: f64,
        min_values_accepted: usize,
        max_values_accepted: usize,
    ) -> Result<Self> {
        if precision < 0.0 || min_values_accepted == 0 || max_values_accepted < min_values_accepted
        {
            return Err(RcfError::InvalidConfig {
                msg: "accumulator requires precision >= 0 and 0 < min <= max",
            });
        }
        Ok(ConvergingAccumulator {
            precision,
            min_values_accepted,
            max_values_accepted,
            one_sided_above: None,
            means: Vec::new(),
            total: 0.0,
            converged: false,
        })
    }

    /// Converges only while the running mean exceeds `threshold`.
    pub fn one_sided(
        precision: f64,
        threshold: f64,
        min_values_accepted: usize,
        max_values_accepted: usize,
    ) -> Result<Self> {
        let mut accumulator =
            ConvergingAccumulator::new(precision, min_values_accepted, max_values_accepted)?;
        accumulator.one_sided_above = Some(threshold);
        Ok(accumulator)
    }

    pub fn accept(&mut self, value: f64) {
        debug_assert!(!self.converged, "accepting into a converged accumulator");
        self.total += value;
        let count = self.means.len() + 1;
        let mean = self.total / count as f64;
        self.means.push(mean);

        if count >= self.max_values_accepted {
            self.converged = true;
            return;
        }
        if count < self.min_values_accepted {
            return;
        }
        if let Some(threshold) = self.one_sided_above {
            if mean <= threshold {
                return;
            }
        }
        let window = self.min_values_accepted.min(count - 1);
        if window == 0 {
            // a single value carries no drift evidence yet
            return;
        }
        let drift = abs(mean - self.means[count - 1 - window]);
        if drift <= self.precision * abs(mean) {
            self.converged = true;
        }
    }

    pub fn is_converged(&self) -> bool {
        self.converged
    }

    pub fn values_accepted(&self) -> usize {
        self.means.len()
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    /// The accumulated total scaled up as if all `witnesses` trees had
    /// voted.
    pub fn scaled_total(&self, witnesses: usize) -> f64 {
        if self.means.is_empty() {
            0.0
        } else {
            self.total * witnesses as f64 / self.means.len() as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_parameters() {
        assert!(ConvergingAccumulator::new(0.1, 0, 10).is_err());
        assert!(ConvergingAccumulator::new(0.1, 5, 4).is_err());
        assert!(ConvergingAccumulator::new(-0.1, 5, 10).is_err());
    }

    #[test]
    fn stable_values_converge_near_the_minimum() {
        let mut acc = ConvergingAccumulator::new(0.1, 5, 100).unwrap();
        let mut fed = 0;
        for i in 0..100 {
            if acc.is_converged() {
                break;
            }
            acc.accept(1.0 + 0.01 * (i % 2) as f64);
            fed += 1;
        }
        assert!(acc.is_converged());
        assert!((5..=20).contains(&fed), "converged after {}", fed);
        let estimate = acc.scaled_total(100) / 100.0;
        assert!(abs(estimate - 1.005) < 0.1);
    }

    #[test]
    fn wildly_varying_values_take_longer() {
        let mut acc = ConvergingAccumulator::new(0.001, 5, 50).unwrap();
        let mut fed = 0;
        for i in 0..50 {
            if acc.is_converged() {
                break;
            }
            acc.accept(if i % 2 == 0 { 10.0 } else { 1.0 });
            fed += 1;
        }
        assert_eq!(fed, 50);
    }

    #[test]
    fn one_sided_holds_out_below_threshold() {
        let mut acc = ConvergingAccumulator::one_sided(0.5, 2.0, 3, 30).unwrap();
        for _ in 0..30 {
            if acc.is_converged() {
                break;
            }
            acc.accept(1.0);
        }
        // the mean never crosses the threshold, so only the cap stops it
        assert_eq!(acc.values_accepted(), 30);

        let mut above = ConvergingAccumulator::one_sided(0.5, 2.0, 3, 30).unwrap();
        for _ in 0..30 {
            if above.is_converged() {
                break;
            }
            above.accept(5.0);
        }
        assert!(above.values_accepted() < 10);
    }
}
