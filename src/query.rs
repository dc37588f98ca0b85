//! The query specification consumed by the script builder and the
//! primary-key planner.

use crate::error::{RedluaError, RedluaResult};
use crate::filter::Filter;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }

    /// Orient an ascending comparison.
    pub fn apply(&self, ordering: std::cmp::Ordering) -> std::cmp::Ordering {
        match self {
            Direction::Asc => ordering,
            Direction::Desc => ordering.reverse(),
        }
    }
}

/// One ordering term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub direction: Direction,
}

/// The pagination window over matching rows, 1-based positions
/// `(offset, offset + limit]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window {
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Window {
    /// Last position inside the window, when bounded. Saturates, so a
    /// limit of `usize::MAX` reads as unbounded in practice.
    pub fn end(&self) -> Option<usize> {
        self.limit.map(|limit| self.offset.saturating_add(limit))
    }

    /// Whether the `position`-th match (1-based) is inside the window.
    pub fn contains(&self, position: usize) -> bool {
        position > self.offset && self.end().is_none_or(|end| position <= end)
    }

    /// Whether every position from `position` onward is past the window.
    pub fn exhausted(&self, position: usize) -> bool {
        self.end().is_some_and(|end| position >= end)
    }
}

/// Filter, ordering and pagination of one query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Option<Filter>,
    pub order_by: Vec<OrderBy>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn window(&self) -> Window {
        Window {
            offset: self.offset.unwrap_or(0),
            limit: self.limit,
        }
    }

    /// The single ordering term, if any. Ordering by more than one column
    /// is rejected.
    pub fn single_order(&self) -> RedluaResult<Option<&OrderBy>> {
        match self.order_by.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(only)),
            _ => Err(RedluaError::not_supported(
                "ordering by multiple columns is not supported",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_bounds() {
        let w = Query::new().offset(2).limit(3).window();
        let inside: Vec<usize> = (1..=8).filter(|p| w.contains(*p)).collect();
        assert_eq!(inside, vec![3, 4, 5]);
        assert!(!w.exhausted(4));
        assert!(w.exhausted(5));

        let open = Query::new().offset(1).window();
        assert!(!open.contains(1));
        assert!(open.contains(1000));
        assert!(!open.exhausted(1000));
    }

    #[test]
    fn test_huge_limit_does_not_overflow() {
        let w = Query::new().offset(1).limit(usize::MAX).window();
        assert_eq!(w.end(), Some(usize::MAX));
        assert!(!w.contains(1));
        assert!(w.contains(2));
        assert!(!w.exhausted(1_000_000));
    }

    #[test]
    fn test_single_order() {
        let q = Query::new().order_by("age", Direction::Desc);
        assert_eq!(q.single_order().unwrap().map(|o| o.direction), Some(Direction::Desc));

        let multi = q.order_by("name", Direction::Asc);
        assert!(matches!(multi.single_order(), Err(RedluaError::NotSupported(_))));
        assert!(Query::new().single_order().unwrap().is_none());
    }
}
