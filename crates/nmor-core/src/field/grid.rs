//! Regular space-time sampling grid.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::ScalarField;
use crate::error::{CoreError, Result};

/// Uniform grid over `[x_min, x_max] x [t_min, t_max]`.
///
/// `shape = [n_x, n_t]`; node `(i, j)` sits at
/// `(x_min + i * dx, t_min + j * dt)` with both end points included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceTimeGrid {
    shape: [usize; 2],
    space: (f64, f64),
    time: (f64, f64),
}

impl SpaceTimeGrid {
    /// Create a grid with `n_x` spatial and `n_t` temporal nodes.
    pub fn new(n_x: usize, n_t: usize, space: (f64, f64), time: (f64, f64)) -> Result<Self> {
        if n_x == 0 || n_t == 0 {
            return Err(CoreError::invalid_configuration(format!(
                "Grid needs at least one node per axis, got [{n_x}, {n_t}]"
            )));
        }
        if space.0 > space.1 || time.0 > time.1 {
            return Err(CoreError::invalid_configuration(format!(
                "Grid bounds must be ordered, got space {space:?} and time {time:?}"
            )));
        }
        Ok(Self {
            shape: [n_x, n_t],
            space,
            time,
        })
    }

    /// Unit square grid.
    pub fn unit(n_x: usize, n_t: usize) -> Result<Self> {
        Self::new(n_x, n_t, (0.0, 1.0), (0.0, 1.0))
    }

    pub fn shape(&self) -> [usize; 2] {
        self.shape
    }

    pub fn space(&self) -> (f64, f64) {
        self.space
    }

    pub fn time(&self) -> (f64, f64) {
        self.time
    }

    /// Spatial coordinate of node `i`.
    pub fn x(&self, i: usize) -> f64 {
        node(self.space, self.shape[0], i)
    }

    /// Temporal coordinate of node `j`.
    pub fn t(&self, j: usize) -> f64 {
        node(self.time, self.shape[1], j)
    }

    /// Evaluate `f(x, t)` at every node.
    pub fn sample<F>(&self, f: F) -> ScalarField
    where
        F: Fn(f64, f64) -> f64,
    {
        let data = Array2::from_shape_fn((self.shape[0], self.shape[1]), |(i, j)| {
            f(self.x(i), self.t(j))
        });
        ScalarField::new(data)
    }
}

fn node(bounds: (f64, f64), count: usize, index: usize) -> f64 {
    if count < 2 {
        return bounds.0;
    }
    bounds.0 + (bounds.1 - bounds.0) * index as f64 / (count - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_nodes_include_end_points() {
        let grid = SpaceTimeGrid::new(5, 3, (0.0, 2.0), (0.0, 1.0)).unwrap();
        assert_eq!(grid.x(0), 0.0);
        assert_eq!(grid.x(4), 2.0);
        assert_eq!(grid.t(1), 0.5);
    }

    #[test]
    fn test_sample_shape() {
        let grid = SpaceTimeGrid::unit(4, 6).unwrap();
        let field = grid.sample(|x, t| x + t);
        assert_eq!(field.shape(), [4, 6]);
        assert_eq!(field.data()[[3, 5]], 2.0);
    }

    #[test]
    fn test_invalid_grid() {
        assert!(SpaceTimeGrid::unit(0, 4).is_err());
        assert!(SpaceTimeGrid::new(2, 2, (1.0, 0.0), (0.0, 1.0)).is_err());
    }
}
