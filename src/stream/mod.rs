//! Ordered pull/push streams
//!
//! Scanners, groupers and mergers all speak [`InputIterator`]: a cursor with
//! an explicit lifecycle. `has_next` may be called any number of times,
//! `next` moves exactly one element forward, and `current` borrows the
//! element `next` landed on until the following `next`. Calls out of that
//! sequence are [`CubeError::IteratorProtocol`] errors.

pub mod grouping;
pub mod merge;

pub use grouping::{GroupingIterator, GroupingStrategy};
pub use merge::{HeapMergeStrategy, MergeStep, MergeStrategy, NWayMergingIterator};

use crate::error::{CubeError, CubeResult};

/// Pull side of an ordered stream
pub trait InputIterator {
    type Item;

    /// True when a following `next` will succeed. Does not move `current`.
    fn has_next(&mut self) -> CubeResult<bool>;

    /// Advance to the next element, failing past the end
    fn next(&mut self) -> CubeResult<()>;

    /// Element the last successful `next` landed on
    fn current(&self) -> CubeResult<&Self::Item>;

    /// Release resources; any later call is a protocol error
    fn close(&mut self) -> CubeResult<()>;
}

impl<I> InputIterator for Box<I>
where
    I: InputIterator + ?Sized,
{
    type Item = I::Item;

    fn has_next(&mut self) -> CubeResult<bool> {
        self.as_mut().has_next()
    }

    fn next(&mut self) -> CubeResult<()> {
        self.as_mut().next()
    }

    fn current(&self) -> CubeResult<&Self::Item> {
        self.as_ref().current()
    }

    fn close(&mut self) -> CubeResult<()> {
        self.as_mut().close()
    }
}

/// Push side of an ordered stream
pub trait OutputIterator {
    type Item;

    fn write(&mut self, item: Self::Item) -> CubeResult<()>;

    fn close(&mut self) -> CubeResult<()>;
}

/// Close every source, last acquired first.
///
/// A failure does not stop the cascade; the last error seen is returned
/// once every source has been closed.
pub fn close_all<I: InputIterator>(sources: &mut [I]) -> CubeResult<()> {
    let mut last_error = None;
    for (index, source) in sources.iter_mut().enumerate().rev() {
        if let Err(e) = source.close() {
            tracing::warn!("Failed to close source {}: {}", index, e);
            last_error = Some(e);
        }
    }
    match last_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Pull every remaining element, cloning each one out of the cursor
pub fn drain<I>(input: &mut I) -> CubeResult<Vec<I::Item>>
where
    I: InputIterator,
    I::Item: Clone,
{
    let mut out = Vec::new();
    while input.has_next()? {
        input.next()?;
        out.push(input.current()?.clone());
    }
    Ok(out)
}

/// In-memory input, mostly for tests and small materialized results
#[derive(Debug, Clone)]
pub struct VecInput<T> {
    items: Vec<T>,
    /// Index of `current`, `None` before the first `next`
    position: Option<usize>,
    closed: bool,
}

impl<T> VecInput<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            position: None,
            closed: false,
        }
    }

    fn check_open(&self) -> CubeResult<()> {
        if self.closed {
            return Err(CubeError::protocol("input used after close()"));
        }
        Ok(())
    }
}

impl<T> InputIterator for VecInput<T> {
    type Item = T;

    fn has_next(&mut self) -> CubeResult<bool> {
        self.check_open()?;
        let next = self.position.map(|p| p + 1).unwrap_or(0);
        Ok(next < self.items.len())
    }

    fn next(&mut self) -> CubeResult<()> {
        if !self.has_next()? {
            return Err(CubeError::protocol("next() past the end of input"));
        }
        self.position = Some(self.position.map(|p| p + 1).unwrap_or(0));
        Ok(())
    }

    fn current(&self) -> CubeResult<&T> {
        self.check_open()?;
        self.position
            .and_then(|p| self.items.get(p))
            .ok_or_else(|| CubeError::protocol("current() before next()"))
    }

    fn close(&mut self) -> CubeResult<()> {
        self.closed = true;
        Ok(())
    }
}

/// In-memory output collecting everything written to it
#[derive(Debug, Clone, Default)]
pub struct VecOutput<T> {
    items: Vec<T>,
    closed: bool,
}

impl<T> VecOutput<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            closed: false,
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

impl<T> OutputIterator for VecOutput<T> {
    type Item = T;

    fn write(&mut self, item: T) -> CubeResult<()> {
        if self.closed {
            return Err(CubeError::protocol("write() after close()"));
        }
        self.items.push(item);
        Ok(())
    }

    fn close(&mut self) -> CubeResult<()> {
        self.closed = true;
        Ok(())
    }
}
