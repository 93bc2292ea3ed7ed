use serde::Serialize;

/// Inclusive index range of a period series that contains data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    first: usize,
    last: usize,
}

#[allow(clippy::len_without_is_empty)]
impl TimeWindow {
    /// `None` unless `first <= last`, so a window always holds at least one period.
    pub fn new(first: usize, last: usize) -> Option<Self> {
        (first <= last).then_some(Self { first, last })
    }

    pub fn first(&self) -> usize {
        self.first
    }

    pub fn last(&self) -> usize {
        self.last
    }

    pub fn len(&self) -> usize {
        self.last - self.first + 1
    }

    pub fn contains(&self, idx: usize) -> bool {
        (self.first..=self.last).contains(&idx)
    }

    pub fn slice<'a, T>(&self, values: &'a [T]) -> &'a [T] {
        let last = self.last.min(values.len().saturating_sub(1));
        values.get(self.first..=last).unwrap_or(&[])
    }
}

/// Returns `None` when every period is zero; callers then show the full range.
pub fn trim(totals: &[usize]) -> Option<TimeWindow> {
    let first = totals.iter().position(|total| *total > 0)?;
    let last = totals.iter().rposition(|total| *total > 0)?;
    TimeWindow::new(first, last)
}
