//! Rectangular cell ranges with optionally unbounded ends.
//!
//! The start corner is always finite; either end component may be `None`,
//! meaning +∞. That representation covers whole columns (`A:A`), whole rows
//! (`1:1`), one-sided ranges (`A5:A`, `A5:10`) and the fully open
//! `A5:INFINITY`.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::coord::CellAddr;
use crate::{EngineError, ErrorKind};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct RangeAddr {
    pub start: CellAddr,
    /// Inclusive end row; `None` = +∞.
    pub end_row: Option<u32>,
    /// Inclusive end column; `None` = +∞.
    pub end_col: Option<u32>,
}

impl RangeAddr {
    pub fn new(start: CellAddr, end_row: Option<u32>, end_col: Option<u32>) -> Self {
        RangeAddr {
            start,
            end_row,
            end_col,
        }
    }

    /// Fully bounded range from two corners (normalised so start ≤ end).
    pub fn finite(a: CellAddr, b: CellAddr) -> Self {
        let start = CellAddr::new(a.row.min(b.row), a.col.min(b.col));
        RangeAddr {
            start,
            end_row: Some(a.row.max(b.row)),
            end_col: Some(a.col.max(b.col)),
        }
    }

    /// 1×1 range covering a single cell.
    pub fn single(addr: CellAddr) -> Self {
        RangeAddr {
            start: addr,
            end_row: Some(addr.row),
            end_col: Some(addr.col),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.end_row.is_some() && self.end_col.is_some()
    }

    /// Row count; `None` when the range is row-unbounded.
    pub fn height(&self) -> Option<u32> {
        self.end_row.map(|er| er - self.start.row + 1)
    }

    /// Column count; `None` when the range is column-unbounded.
    pub fn width(&self) -> Option<u32> {
        self.end_col.map(|ec| ec - self.start.col + 1)
    }

    pub fn contains(&self, addr: CellAddr) -> bool {
        if addr.row < self.start.row || addr.col < self.start.col {
            return false;
        }
        if let Some(er) = self.end_row {
            if addr.row > er {
                return false;
            }
        }
        if let Some(ec) = self.end_col {
            if addr.col > ec {
                return false;
            }
        }
        true
    }

    /// Intersection of two ranges, `None` when they are disjoint.
    pub fn intersect(&self, other: &RangeAddr) -> Option<RangeAddr> {
        let start_row = self.start.row.max(other.start.row);
        let start_col = self.start.col.max(other.start.col);
        let end_row = min_opt(self.end_row, other.end_row);
        let end_col = min_opt(self.end_col, other.end_col);

        if let Some(er) = end_row {
            if start_row > er {
                return None;
            }
        }
        if let Some(ec) = end_col {
            if start_col > ec {
                return None;
            }
        }
        Some(RangeAddr {
            start: CellAddr::new(start_row, start_col),
            end_row,
            end_col,
        })
    }

    /// Smallest range covering both inputs.
    pub fn union_bounding(&self, other: &RangeAddr) -> RangeAddr {
        RangeAddr {
            start: CellAddr::new(
                self.start.row.min(other.start.row),
                self.start.col.min(other.start.col),
            ),
            end_row: max_opt(self.end_row, other.end_row),
            end_col: max_opt(self.end_col, other.end_col),
        }
    }

    /// Bound any infinite end components to the given inclusive maxima.
    /// The result may still be empty if the maxima fall before the start;
    /// callers check with `is_empty_after_clip`.
    pub fn clip_to(&self, max_row: u32, max_col: u32) -> RangeAddr {
        RangeAddr {
            start: self.start,
            end_row: Some(self.end_row.unwrap_or(max_row).min(max_row.max(self.start.row))),
            end_col: Some(self.end_col.unwrap_or(max_col).min(max_col.max(self.start.col))),
        }
    }

    /// Row-major iteration over every cell; fails loudly on infinite input.
    pub fn iter_finite(&self) -> Result<RangeIter, EngineError> {
        match (self.end_row, self.end_col) {
            (Some(end_row), Some(end_col)) => Ok(RangeIter {
                start_col: self.start.col,
                end_row,
                end_col,
                next: Some(self.start),
            }),
            _ => Err(EngineError::new(ErrorKind::Error)
                .with_message("cannot enumerate an unbounded range")),
        }
    }

    /// Number of cells, `None` when unbounded.
    pub fn cell_count(&self) -> Option<u64> {
        Some(self.height()? as u64 * self.width()? as u64)
    }
}

fn min_opt(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) | (None, Some(a)) => Some(a),
        (None, None) => None,
    }
}

fn max_opt(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        _ => None,
    }
}

/// Row-major cell iterator produced by [`RangeAddr::iter_finite`].
pub struct RangeIter {
    start_col: u32,
    end_row: u32,
    end_col: u32,
    next: Option<CellAddr>,
}

impl Iterator for RangeIter {
    type Item = CellAddr;

    fn next(&mut self) -> Option<CellAddr> {
        let current = self.next?;
        self.next = if current.col < self.end_col {
            Some(CellAddr::new(current.row, current.col + 1))
        } else if current.row < self.end_row {
            Some(CellAddr::new(current.row + 1, self.start_col))
        } else {
            None
        };
        Some(current)
    }
}
