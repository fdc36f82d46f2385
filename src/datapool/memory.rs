use std::collections::VecDeque;

use super::{Row, RowFetch};

#[derive(Debug)]
pub(super) struct MemoryState {
    rows: VecDeque<Row>,
    recycle: bool,
}

impl MemoryState {
    pub(super) fn new(rows: Vec<Row>, recycle: bool) -> Self {
        MemoryState {
            rows: rows.into(),
            recycle,
        }
    }

    pub(super) fn next_row(&mut self) -> RowFetch {
        match self.rows.pop_front() {
            Some(row) => {
                if self.recycle {
                    self.rows.push_back(row.clone());
                }
                RowFetch::Row(row)
            }
            None => RowFetch::Exhausted,
        }
    }
}
