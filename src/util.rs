use crate::error::{RcfError, Result};

/// If the test condition is false, return an InvalidInput error with the
/// given message. Otherwise return Ok.
pub(crate) fn check_argument(test: bool, msg: &'static str) -> Result<()> {
    if test {
        Ok(())
    } else {
        Err(RcfError::InvalidInput { msg })
    }
}

/// Like `check_argument`, but for internal consistency conditions; a failure
/// here means the model state is corrupt.
pub(crate) fn check_state(test: bool, msg: &'static str) -> Result<()> {
    if test {
        Ok(())
    } else {
        Err(RcfError::Invariant { msg })
    }
}

pub fn l1_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| f64::abs(x as f64 - y as f64))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_check_reports_invalid_input() {
        assert!(check_argument(true, "ok").is_ok());
        assert_eq!(
            check_argument(false, "bad"),
            Err(RcfError::InvalidInput { msg: "bad" })
        );
    }

    #[test]
    fn l1_distance_sums_coordinates() {
        assert_eq!(l1_distance(&[1.0, -2.0], &[0.0, 2.0]), 5.0);
    }
}
