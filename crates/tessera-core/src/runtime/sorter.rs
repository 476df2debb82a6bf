//! Materializing sort buffer for ORDER BY

use crate::error::{Error, Result};
use crate::proxy::Tuple;
use rayon::slice::ParallelSliceMut;
use std::cmp::Ordering;

/// Buffers rows and sorts them on a list of key columns
///
/// Nulls sort first in ascending order. Appends from parallel scan tasks
/// are serialized by the state slot's write lock.
#[derive(Debug, Default)]
pub struct Sorter {
    key_columns: Vec<u32>,
    descending: Vec<bool>,
    rows: Vec<Tuple>,
    sorted: bool,
}

crate::proxy_opaque!(Sorter => "Sorter");

impl Sorter {
    /// Set the sort keys; `descending[i]` applies to `key_columns[i]`
    pub fn init(&mut self, key_columns: Vec<u32>, descending: Vec<bool>) -> Result<()> {
        if key_columns.len() != descending.len() {
            return Err(Error::codegen("every sort key needs a direction"));
        }
        self.key_columns = key_columns;
        self.descending = descending;
        self.rows.clear();
        self.sorted = false;
        Ok(())
    }

    /// Buffer one row
    pub fn append(&mut self, row: Tuple) -> Result<()> {
        if let Some(&column) = self
            .key_columns
            .iter()
            .find(|&&c| c as usize >= row.values().len())
        {
            return Err(Error::codegen(format!(
                "sort key column {column} is outside a row of {} columns",
                row.values().len()
            )));
        }
        self.rows.push(row);
        self.sorted = false;
        Ok(())
    }

    fn compare(&self, a: &Tuple, b: &Tuple) -> Ordering {
        for (&column, &desc) in self.key_columns.iter().zip(&self.descending) {
            let column = column as usize;
            let ordering = a.values()[column].sort_cmp(&b.values()[column]);
            let ordering = if desc { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Sort the buffered rows (stable)
    pub fn sort(&mut self) {
        let mut rows = std::mem::take(&mut self.rows);
        rows.par_sort_by(|a, b| self.compare(a, b));
        self.rows = rows;
        self.sorted = true;
    }

    /// Buffered rows
    pub fn num_rows(&self) -> u32 {
        self.rows.len() as u32
    }

    /// The `index`-th row; the buffer must have been sorted
    pub fn row(&self, index: u32) -> Result<Tuple> {
        if !self.sorted {
            return Err(Error::codegen("sorter read before sort"));
        }
        self.rows
            .get(index as usize)
            .cloned()
            .ok_or_else(|| Error::internal(format!("sorter has no row {index}")))
    }

    /// Free the buffer
    pub fn destroy(&mut self) {
        self.rows = Vec::new();
        self.sorted = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TypeId, Value};

    fn row(a: Value, b: i32) -> Tuple {
        Tuple::new(vec![a, Value::integer(b)])
    }

    #[test]
    fn test_multi_key_sort_with_nulls_first() {
        let mut sorter = Sorter::default();
        sorter.init(vec![0, 1], vec![false, true]).unwrap();
        sorter.append(row(Value::integer(2), 1)).unwrap();
        sorter.append(row(Value::integer(1), 1)).unwrap();
        sorter.append(row(Value::integer(1), 7)).unwrap();
        sorter.append(row(Value::null(TypeId::Integer), 0)).unwrap();
        sorter.sort();

        let firsts: Vec<_> = (0..sorter.num_rows())
            .map(|i| sorter.row(i).unwrap().values()[1].clone())
            .collect();
        assert_eq!(
            firsts,
            vec![Value::integer(0), Value::integer(7), Value::integer(1), Value::integer(1)]
        );
        assert!(sorter.row(0).unwrap().values()[0].is_null());
    }

    #[test]
    fn test_read_before_sort_fails() {
        let mut sorter = Sorter::default();
        sorter.init(vec![0], vec![false]).unwrap();
        sorter.append(row(Value::integer(1), 1)).unwrap();
        assert!(sorter.row(0).is_err());
        assert!(sorter.append(Tuple::new(Vec::new())).is_err());
        assert!(sorter.init(vec![0], Vec::new()).is_err());
    }
}
