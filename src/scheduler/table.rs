//! Index-keyed result table.

use crate::{Error, ErrorContext, Result};

/// Fixed-size table with one slot per request, filled in completion order
/// and read back in index order.
#[derive(Debug)]
pub struct ResultTable<T> {
    slots: Vec<Option<T>>,
    filled: usize,
}

impl<T> ResultTable<T> {
    pub fn new(len: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(len).collect(),
            filled: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    /// Store the result for `index`. Each index may be written once.
    pub fn insert(&mut self, index: usize, value: T) -> Result<()> {
        let len = self.slots.len();
        let slot = self.slots.get_mut(index).ok_or_else(|| {
            Error::runtime_with_context(
                "result index out of range",
                ErrorContext::new()
                    .with_details(format!("index {} of {}", index, len))
                    .with_source("scheduler"),
            )
        })?;
        if slot.is_some() {
            return Err(Error::runtime_with_context(
                "duplicate result for request",
                ErrorContext::new()
                    .with_details(format!("index {}", index))
                    .with_source("scheduler"),
            ));
        }
        *slot = Some(value);
        self.filled += 1;
        Ok(())
    }

    /// Results in index order; fails if any slot is still empty.
    pub fn into_ordered(self) -> Result<Vec<T>> {
        self.slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| {
                    Error::runtime_with_context(
                        "batch result missing",
                        ErrorContext::new()
                            .with_details(format!("index {}", index))
                            .with_source("scheduler"),
                    )
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_order_inserts_read_back_in_order() {
        let mut table = ResultTable::new(4);
        for i in [2, 0, 3, 1] {
            table.insert(i, i * 10).unwrap();
        }
        assert_eq!(table.filled(), 4);
        assert_eq!(table.into_ordered().unwrap(), vec![0, 10, 20, 30]);
    }

    #[test]
    fn test_gap_is_an_error() {
        let mut table = ResultTable::new(3);
        table.insert(0, "a").unwrap();
        table.insert(2, "c").unwrap();
        let err = table.into_ordered().unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.details.as_deref()),
            Some("index 1")
        );
    }

    #[test]
    fn test_duplicate_and_out_of_range() {
        let mut table = ResultTable::new(1);
        table.insert(0, ()).unwrap();
        assert!(table.insert(0, ()).is_err());
        assert!(table.insert(1, ()).is_err());
        assert_eq!(table.filled(), 1);
    }

    #[test]
    fn test_empty_table() {
        let table: ResultTable<u8> = ResultTable::new(0);
        assert!(table.is_empty());
        assert!(table.into_ordered().unwrap().is_empty());
    }
}
