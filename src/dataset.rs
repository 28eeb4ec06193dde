//! Labeled training rows.
//!
//! A [`DataSet`] declares its input and output widths up front; every row must
//! match them. Rows are iterated in insertion order and never reshuffled.

use briny::prelude::*;

/// One training example.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub input: Vec<f32>,
    pub output: Vec<f32>,
}

impl Row {
    /// A row mapping `input` to the expected `output`.
    pub fn new(input: Vec<f32>, output: Vec<f32>) -> Self {
        Self { input, output }
    }
}

/// An ordered collection of rows with fixed widths.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSet {
    input_size: usize,
    output_size: usize,
    rows: Vec<Row>,
}

impl Validate for DataSet {
    fn validate(&self) -> Result<(), ValidationError> {
        let consistent = self
            .rows
            .iter()
            .all(|row| row.input.len() == self.input_size && row.output.len() == self.output_size);
        if !consistent {
            return Err(ValidationError);
        }
        Ok(())
    }
}

impl DataSet {
    /// An empty data set with the given row widths.
    pub fn new(input_size: usize, output_size: usize) -> Self {
        Self { input_size, output_size, rows: Vec::new() }
    }

    /// Builds a data set from rows, checking every row against the widths.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] if any row has the wrong width.
    pub fn from_rows(
        input_size: usize,
        output_size: usize,
        rows: Vec<Row>,
    ) -> Result<Self, ValidationError> {
        let trusted = TrustedData::new(Self { input_size, output_size, rows })?;
        Ok(trusted.into_inner())
    }

    /// Appends a row.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] if the row has the wrong width; the data set
    /// is left unchanged.
    pub fn add_row(&mut self, row: Row) -> Result<(), ValidationError> {
        if row.input.len() != self.input_size || row.output.len() != self.output_size {
            return Err(ValidationError);
        }
        self.rows.push(row);
        Ok(())
    }

    /// Width of every input vector.
    pub fn input_size(&self) -> usize {
        self.input_size
    }

    /// Width of every expected-output vector.
    pub fn output_size(&self) -> usize {
        self.output_size
    }

    /// Rows in insertion order.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rows_rejects_ragged_rows() {
        let rows = vec![Row::new(vec![0.0, 1.0], vec![1.0]), Row::new(vec![1.0], vec![0.0])];
        assert!(DataSet::from_rows(2, 1, rows).is_err());
    }

    #[test]
    fn add_row_keeps_order() {
        let mut set = DataSet::new(1, 1);
        set.add_row(Row::new(vec![1.0], vec![0.0])).unwrap();
        set.add_row(Row::new(vec![2.0], vec![1.0])).unwrap();
        assert!(set.add_row(Row::new(vec![3.0], Vec::new())).is_err());
        assert_eq!(set.len(), 2);
        assert_eq!(set.rows()[1].input, vec![2.0]);
    }
}
