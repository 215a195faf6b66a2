use std::{fmt::Display, ops::Deref};

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Percentage(f64);

impl Display for Percentage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.0}%", self.0)
    }
}

impl Percentage {
    pub fn new_opt(value: f64) -> Option<Percentage> {
        if value < 0. || value.is_nan() {
            None
        } else {
            Some(Percentage(value))
        }
    }

    pub fn zero() -> Percentage {
        Percentage(0.)
    }
}

impl Deref for Percentage {
    type Target = f64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// How much of `whole` has been covered by `value`. Values past the whole are not clamped, a goal
/// can be 130% done.
pub fn progress_percentage(value_ms: i64, whole_ms: i64) -> Percentage {
    if whole_ms <= 0 {
        return Percentage::zero();
    }
    Percentage::new_opt(value_ms.max(0) as f64 / whole_ms as f64 * 100.)
        .unwrap_or_else(Percentage::zero)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress() {
        assert_eq!(*progress_percentage(1_800_000, 3_600_000), 50.);
        assert_eq!(*progress_percentage(10, 0), 0.);
        assert_eq!(progress_percentage(4_680_000, 3_600_000).to_string(), "130%");
    }
}
