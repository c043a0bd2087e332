//! N-way merge of ordered inputs
//!
//! The engine owns the sources and their lifecycle; a [`MergeStrategy`]
//! decides at every step which sources are emitted and which are advanced.
//! Sources chosen for advancing are moved lazily, at the start of the
//! following `next`, so `current` stays valid until then.

use std::cmp::Ordering;

use super::{close_all, InputIterator};
use crate::error::{CubeError, CubeResult};

/// Selection made by a strategy for one step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStep {
    /// Sources whose current item is emitted, first one is `current()`
    pub output: Vec<usize>,
    /// Sources moved forward before the next step
    pub advance: Vec<usize>,
}

impl MergeStep {
    pub fn clear(&mut self) {
        self.output.clear();
        self.advance.clear();
    }
}

pub trait MergeStrategy<T> {
    /// Fill `step` for the current heads.
    ///
    /// `heads[i]` is the current item of source `i`, `None` once it is
    /// exhausted. `changed` lists the sources advanced since the previous
    /// call; on the first call it lists every source.
    fn select(
        &mut self,
        heads: &[Option<&T>],
        changed: &[usize],
        step: &mut MergeStep,
    ) -> CubeResult<()>;
}

/// Stable sort-merge over an index heap.
///
/// Exhausted sources compare greater than any live one and sink to the
/// bottom; equal items come out in source order.
pub struct HeapMergeStrategy<C> {
    compare: C,
    heap: Vec<usize>,
    /// Heap slot of every source
    slots: Vec<usize>,
}

impl<C> HeapMergeStrategy<C> {
    pub fn new(compare: C) -> Self {
        Self {
            compare,
            heap: Vec::new(),
            slots: Vec::new(),
        }
    }
}

impl<C> HeapMergeStrategy<C> {
    fn less<T>(&self, heads: &[Option<&T>], a: usize, b: usize) -> bool
    where
        C: Fn(&T, &T) -> Ordering,
    {
        let order = match (heads[a], heads[b]) {
            (Some(x), Some(y)) => (self.compare)(x, y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        order.then(a.cmp(&b)) == Ordering::Less
    }

    fn sift_down<T>(&mut self, heads: &[Option<&T>], mut slot: usize)
    where
        C: Fn(&T, &T) -> Ordering,
    {
        let len = self.heap.len();
        loop {
            let left = 2 * slot + 1;
            let right = left + 1;
            let mut smallest = slot;
            if left < len && self.less(heads, self.heap[left], self.heap[smallest]) {
                smallest = left;
            }
            if right < len && self.less(heads, self.heap[right], self.heap[smallest]) {
                smallest = right;
            }
            if smallest == slot {
                return;
            }
            self.heap.swap(slot, smallest);
            self.slots[self.heap[slot]] = slot;
            self.slots[self.heap[smallest]] = smallest;
            slot = smallest;
        }
    }
}

impl<T, C> MergeStrategy<T> for HeapMergeStrategy<C>
where
    C: Fn(&T, &T) -> Ordering,
{
    fn select(
        &mut self,
        heads: &[Option<&T>],
        changed: &[usize],
        step: &mut MergeStep,
    ) -> CubeResult<()> {
        if self.heap.len() != heads.len() {
            self.heap = (0..heads.len()).collect();
            self.slots = (0..heads.len()).collect();
            for slot in (0..heads.len() / 2).rev() {
                self.sift_down(heads, slot);
            }
        } else {
            // Advanced items only grow, so sinking them restores the heap
            for source in changed {
                let slot = self.slots[*source];
                self.sift_down(heads, slot);
            }
        }

        step.clear();
        if let Some(&root) = self.heap.first() {
            if heads[root].is_some() {
                step.output.push(root);
                step.advance.push(root);
            }
        }
        Ok(())
    }
}

/// Merges k ordered sources into one ordered stream
pub struct NWayMergingIterator<I, S> {
    sources: Vec<I>,
    /// Source is positioned on an item
    live: Vec<bool>,
    strategy: S,
    step: MergeStep,
    changed: Vec<usize>,
    primed: bool,
    /// `step` describes the current item
    positioned: bool,
    /// A call failed; source positions are no longer consistent
    failed: bool,
    closed: bool,
}

impl<I, S> NWayMergingIterator<I, S>
where
    I: InputIterator,
    S: MergeStrategy<I::Item>,
{
    pub fn new(sources: Vec<I>, strategy: S) -> Self {
        let count = sources.len();
        Self {
            sources,
            live: vec![false; count],
            strategy,
            step: MergeStep::default(),
            changed: Vec::with_capacity(count),
            primed: false,
            positioned: false,
            failed: false,
            closed: false,
        }
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Every source emitted at the current step
    pub fn outputs(&self) -> CubeResult<Vec<&I::Item>> {
        if !self.positioned {
            return Err(CubeError::protocol("outputs() before next()"));
        }
        self.step
            .output
            .iter()
            .map(|i| self.sources[*i].current())
            .collect()
    }

    fn check_open(&self) -> CubeResult<()> {
        if self.closed {
            return Err(CubeError::protocol("merge used after close()"));
        }
        if self.failed {
            return Err(CubeError::protocol("merge used after a failed call"));
        }
        Ok(())
    }

    fn prime(&mut self) -> CubeResult<()> {
        if self.primed {
            return Ok(());
        }
        for (index, source) in self.sources.iter_mut().enumerate() {
            if source.has_next()? {
                source.next()?;
                self.live[index] = true;
            }
            self.changed.push(index);
        }
        self.primed = true;
        Ok(())
    }

    fn fail(&mut self) {
        self.failed = true;
        self.positioned = false;
    }

    fn any_remaining(&mut self) -> CubeResult<bool> {
        self.prime()?;
        if !self.positioned {
            return Ok(self.live.iter().any(|l| *l));
        }
        let others_live = self
            .live
            .iter()
            .enumerate()
            .any(|(i, live)| *live && !self.step.advance.contains(&i));
        if others_live {
            return Ok(true);
        }
        for index in self.step.advance.clone() {
            if self.sources[index].has_next()? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn merge_step(&mut self) -> CubeResult<()> {
        self.prime()?;

        if self.positioned {
            self.positioned = false;
            for &index in &self.step.advance {
                let source = &mut self.sources[index];
                if source.has_next()? {
                    source.next()?;
                } else {
                    self.live[index] = false;
                }
                self.changed.push(index);
            }
        }
        if !self.live.iter().any(|l| *l) {
            return Err(CubeError::protocol("next() past the end of merge"));
        }

        let heads = self
            .sources
            .iter()
            .zip(&self.live)
            .map(|(source, live)| if *live { source.current().map(Some) } else { Ok(None) })
            .collect::<CubeResult<Vec<_>>>()?;
        self.strategy.select(&heads, &self.changed, &mut self.step)?;
        self.changed.clear();

        if self.step.output.is_empty() || self.step.advance.is_empty() {
            return Err(CubeError::protocol(
                "merge strategy must emit and advance at least one live source",
            ));
        }
        if let Some(bad) = self
            .step
            .output
            .iter()
            .chain(&self.step.advance)
            .find(|i| !self.live.get(**i).copied().unwrap_or(false))
        {
            return Err(CubeError::protocol(format!(
                "merge strategy selected exhausted source {}",
                bad
            )));
        }
        self.positioned = true;
        Ok(())
    }
}

impl<I, S> InputIterator for NWayMergingIterator<I, S>
where
    I: InputIterator,
    S: MergeStrategy<I::Item>,
{
    type Item = I::Item;

    fn has_next(&mut self) -> CubeResult<bool> {
        self.check_open()?;
        let result = self.any_remaining();
        if result.is_err() {
            self.fail();
        }
        result
    }

    /// A failure ends the merge: every later call except `close` errors
    fn next(&mut self) -> CubeResult<()> {
        self.check_open()?;
        let result = self.merge_step();
        if result.is_err() {
            self.fail();
        }
        result
    }

    fn current(&self) -> CubeResult<&Self::Item> {
        self.check_open()?;
        match self.step.output.first() {
            Some(index) if self.positioned => self.sources[*index].current(),
            _ => Err(CubeError::protocol("current() before next()")),
        }
    }

    fn close(&mut self) -> CubeResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.positioned = false;
        close_all(&mut self.sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{drain, VecInput};
    use proptest::prelude::*;

    fn by_key(a: &Tagged, b: &Tagged) -> Ordering {
        a.0.cmp(&b.0)
    }

    type Tagged = (u32, usize);
    type ByKey = fn(&Tagged, &Tagged) -> Ordering;

    fn merge_of(inputs: Vec<Vec<u32>>) -> NWayMergingIterator<VecInput<Tagged>, HeapMergeStrategy<ByKey>> {
        let sources = inputs
            .into_iter()
            .enumerate()
            .map(|(src, items)| VecInput::new(items.into_iter().map(|v| (v, src)).collect()))
            .collect();
        NWayMergingIterator::new(sources, HeapMergeStrategy::new(by_key as ByKey))
    }

    #[test]
    fn test_zero_inputs_complete_immediately() {
        let mut merge = merge_of(vec![]);
        assert!(!merge.has_next().unwrap());
        assert!(matches!(merge.next(), Err(CubeError::IteratorProtocol(_))));
        merge.close().unwrap();
    }

    #[test]
    fn test_empty_sources_are_skipped() {
        let mut merge = merge_of(vec![vec![], vec![2], vec![]]);
        assert_eq!(drain(&mut merge).unwrap(), vec![(2, 1)]);
    }

    #[test]
    fn test_ties_come_out_in_source_order() {
        let mut merge = merge_of(vec![vec![1, 3], vec![1, 2, 3], vec![3]]);
        assert_eq!(
            drain(&mut merge).unwrap(),
            vec![(1, 0), (1, 1), (2, 1), (3, 0), (3, 1), (3, 2)]
        );
    }

    #[test]
    fn test_current_survives_has_next() {
        let mut merge = merge_of(vec![vec![1], vec![2]]);
        merge.next().unwrap();
        assert_eq!(*merge.current().unwrap(), (1, 0));
        assert!(merge.has_next().unwrap());
        assert_eq!(*merge.current().unwrap(), (1, 0));
        merge.next().unwrap();
        assert!(!merge.has_next().unwrap());
        assert_eq!(*merge.current().unwrap(), (2, 1));
    }

    #[test]
    fn test_closed_merge_rejects_calls() {
        let mut merge = merge_of(vec![vec![1]]);
        merge.close().unwrap();
        assert!(matches!(merge.has_next(), Err(CubeError::IteratorProtocol(_))));
    }

    struct NoAdvance;

    impl MergeStrategy<(u32, usize)> for NoAdvance {
        fn select(
            &mut self,
            _heads: &[Option<&(u32, usize)>],
            _changed: &[usize],
            step: &mut MergeStep,
        ) -> CubeResult<()> {
            step.clear();
            step.output.push(0);
            Ok(())
        }
    }

    #[test]
    fn test_strategy_must_advance() {
        let mut merge = NWayMergingIterator::new(vec![VecInput::new(vec![(1u32, 0usize)])], NoAdvance);
        assert!(matches!(merge.next(), Err(CubeError::IteratorProtocol(_))));
    }

    /// Errors when asked to move past `fail_at` items
    struct FailAt {
        inner: VecInput<Tagged>,
        fail_at: usize,
        moved: usize,
    }

    impl FailAt {
        fn new(items: Vec<Tagged>, fail_at: usize) -> Self {
            Self {
                inner: VecInput::new(items),
                fail_at,
                moved: 0,
            }
        }
    }

    impl InputIterator for FailAt {
        type Item = Tagged;

        fn has_next(&mut self) -> CubeResult<bool> {
            self.inner.has_next()
        }

        fn next(&mut self) -> CubeResult<()> {
            if self.moved == self.fail_at {
                return Err(CubeError::StoreIo("read failed".to_string()));
            }
            self.moved += 1;
            self.inner.next()
        }

        fn current(&self) -> CubeResult<&Tagged> {
            self.inner.current()
        }

        fn close(&mut self) -> CubeResult<()> {
            self.inner.close()
        }
    }

    #[test]
    fn test_source_failure_ends_the_merge() {
        let sources = vec![
            FailAt::new(vec![(1, 0), (3, 0)], 1),
            FailAt::new(vec![(2, 1), (4, 1)], usize::MAX),
        ];
        let mut merge = NWayMergingIterator::new(sources, HeapMergeStrategy::new(by_key as ByKey));

        merge.next().unwrap();
        assert_eq!(merge.current().unwrap(), &(1, 0));
        assert!(matches!(merge.next(), Err(CubeError::StoreIo(_))));

        assert!(matches!(merge.has_next(), Err(CubeError::IteratorProtocol(_))));
        assert!(matches!(merge.next(), Err(CubeError::IteratorProtocol(_))));
        assert!(matches!(merge.current(), Err(CubeError::IteratorProtocol(_))));
        merge.close().unwrap();
    }

    proptest! {
        #[test]
        fn prop_merge_is_total_sorted_and_stable(
            mut inputs in prop::collection::vec(prop::collection::vec(0u32..20, 0..12), 0..6)
        ) {
            for input in inputs.iter_mut() {
                input.sort_unstable();
            }
            let mut expected: Vec<(u32, usize)> = inputs
                .iter()
                .enumerate()
                .flat_map(|(src, items)| items.iter().map(move |v| (*v, src)))
                .collect();
            // Stable sort by value keeps source order for ties
            expected.sort_by_key(|(v, _)| *v);

            let mut merge = merge_of(inputs);
            let merged = drain(&mut merge).unwrap();
            prop_assert_eq!(merged, expected);
        }
    }
}
