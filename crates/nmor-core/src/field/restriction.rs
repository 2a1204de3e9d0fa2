//! Rectangular sub-window of a grid.
//!
//! Solutions are often computed on an enlarged domain; the restriction marks
//! the part that enters error norms and registration energies.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Index window `[axis0] x [axis1]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restriction {
    pub axis0: Range<usize>,
    pub axis1: Range<usize>,
}

impl Restriction {
    /// The whole grid.
    pub fn full(shape: [usize; 2]) -> Self {
        Self {
            axis0: 0..shape[0],
            axis1: 0..shape[1],
        }
    }

    /// Drop `margin` nodes on every side of the grid.
    pub fn from_margin(shape: [usize; 2], margin: usize) -> Result<Self> {
        if 2 * margin >= shape[0] || 2 * margin >= shape[1] {
            return Err(CoreError::invalid_configuration(format!(
                "Margin {margin} leaves no interior on a {shape:?} grid"
            )));
        }
        Ok(Self {
            axis0: margin..shape[0] - margin,
            axis1: margin..shape[1] - margin,
        })
    }

    /// Check that the window lies inside a grid of the given shape.
    pub fn validate(&self, shape: [usize; 2]) -> Result<()> {
        let fits = |r: &Range<usize>, n: usize| r.start < r.end && r.end <= n;
        if !fits(&self.axis0, shape[0]) || !fits(&self.axis1, shape[1]) {
            return Err(CoreError::invalid_configuration(format!(
                "Restriction {:?} x {:?} does not fit a {shape:?} grid",
                self.axis0, self.axis1
            )));
        }
        Ok(())
    }

    /// Number of nodes in the window.
    pub fn len(&self) -> usize {
        self.axis0.len() * self.axis1.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_margin() {
        let r = Restriction::from_margin([10, 8], 2).unwrap();
        assert_eq!(r.axis0, 2..8);
        assert_eq!(r.axis1, 2..6);
        assert_eq!(r.len(), 24);
    }

    #[test]
    fn test_margin_too_large() {
        assert!(Restriction::from_margin([4, 4], 2).is_err());
    }

    #[test]
    fn test_validate() {
        let r = Restriction::full([4, 4]);
        assert!(r.validate([4, 4]).is_ok());
        assert!(r.validate([3, 4]).is_err());
    }
}
