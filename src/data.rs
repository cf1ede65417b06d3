//! Training data
use nalgebra::{DMatrix, DVector};

use crate::result::{GpError, Result};

/// Inputs and targets a Gaussian process is conditioned on.
///
/// Inputs are stored as an `N x D` matrix whose rows are points. Training
/// data is validated once on construction and is immutable afterward; models
/// share it through an `Arc` rather than copying it.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingData {
    x: DMatrix<f64>,
    y: DVector<f64>,
}

impl TrainingData {
    /// Create training data from an input matrix and a target vector
    pub fn new(x: DMatrix<f64>, y: DVector<f64>) -> Result<Self> {
        if x.nrows() == 0 || y.is_empty() {
            return Err(GpError::InvalidInput(
                "training set must not be empty".into(),
            ));
        }
        if x.nrows() != y.len() {
            return Err(GpError::InvalidInput(format!(
                "x_train has {} points but y_train has {} targets",
                x.nrows(),
                y.len()
            )));
        }
        if x.ncols() == 0 {
            return Err(GpError::InvalidInput(
                "input points must have at least one dimension".into(),
            ));
        }
        check_finite("x_train", x.iter())?;
        check_finite("y_train", y.iter())?;
        Ok(Self { x, y })
    }

    /// Create training data from a sequence of input points
    ///
    /// # Example
    ///
    /// ```
    /// use gpfit::TrainingData;
    ///
    /// let data = TrainingData::from_rows(
    ///     &[vec![0.0, 1.0], vec![1.0, 0.0]],
    ///     &[0.5, -0.5],
    /// ).unwrap();
    /// assert_eq!(data.len(), 2);
    /// assert_eq!(data.dims(), 2);
    ///
    /// // Lengths must agree
    /// assert!(TrainingData::from_rows(&[vec![0.0]], &[1.0, 2.0]).is_err());
    /// ```
    pub fn from_rows(x: &[Vec<f64>], y: &[f64]) -> Result<Self> {
        if x.len() != y.len() {
            return Err(GpError::InvalidInput(format!(
                "x_train has {} points but y_train has {} targets",
                x.len(),
                y.len()
            )));
        }
        let x = rows_to_matrix("x_train", x)?;
        Self::new(x, DVector::from_column_slice(y))
    }

    /// Create training data for one-dimensional inputs
    pub fn from_scalars(x: &[f64], y: &[f64]) -> Result<Self> {
        Self::new(
            DMatrix::from_column_slice(x.len(), 1, x),
            DVector::from_column_slice(y),
        )
    }

    /// Input points, one per row
    pub fn x(&self) -> &DMatrix<f64> {
        &self.x
    }

    /// Targets
    pub fn y(&self) -> &DVector<f64> {
        &self.y
    }

    /// Number of training points
    pub fn len(&self) -> usize {
        self.y.len()
    }

    /// Always `false`; empty training sets are rejected on construction
    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// Dimension of the input points
    pub fn dims(&self) -> usize {
        self.x.ncols()
    }
}

/// Stack a sequence of points into a row-per-point matrix
pub(crate) fn rows_to_matrix(
    name: &str,
    rows: &[Vec<f64>],
) -> Result<DMatrix<f64>> {
    let dims = match rows.first() {
        Some(row) => row.len(),
        None => {
            return Err(GpError::InvalidInput(format!("{name} is empty")))
        }
    };

    if let Some(ix) = rows.iter().position(|row| row.len() != dims) {
        return Err(GpError::InvalidInput(format!(
            "{name}[{ix}] has {} dimensions, expected {dims}",
            rows[ix].len()
        )));
    }

    let x = DMatrix::from_row_iterator(
        rows.len(),
        dims,
        rows.iter().flat_map(|row| row.iter().copied()),
    );
    check_finite(name, x.iter())?;
    Ok(x)
}

fn check_finite<'a>(
    name: &str,
    mut values: impl Iterator<Item = &'a f64>,
) -> Result<()> {
    if values.all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(GpError::InvalidInput(format!(
            "{name} contains non-finite values"
        )))
    }
}
