use super::InputIterator;
use crate::error::{CubeError, CubeResult};

/// Folding rules for [`GroupingIterator`]
pub trait GroupingStrategy<T> {
    type Group;

    /// Start a group keyed by `first`, reusing `recycled` when given.
    /// `first` is folded in afterwards through [`aggregate`](Self::aggregate).
    fn new_group_holder(&mut self, first: &T, recycled: Option<Self::Group>) -> CubeResult<Self::Group>;

    fn is_item_in_group(&self, group: &Self::Group, item: &T) -> bool;

    fn aggregate(&mut self, group: &mut Self::Group, item: &T) -> CubeResult<()>;
}

/// Folds runs of contiguous items that belong to the same group.
///
/// The input must be ordered so that members of a group are adjacent. The
/// item that ends a group stays as the input's current element and seeds the
/// following group; no item is read twice.
pub struct GroupingIterator<I, S>
where
    I: InputIterator,
    S: GroupingStrategy<I::Item>,
{
    input: I,
    strategy: S,
    current: Option<S::Group>,
    /// `input.current()` has not been folded yet
    pending: bool,
    /// A call failed; the half-built group is gone
    failed: bool,
    closed: bool,
}

impl<I, S> GroupingIterator<I, S>
where
    I: InputIterator,
    S: GroupingStrategy<I::Item>,
{
    pub fn new(input: I, strategy: S) -> Self {
        Self {
            input,
            strategy,
            current: None,
            pending: false,
            failed: false,
            closed: false,
        }
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    fn check_open(&self) -> CubeResult<()> {
        if self.closed {
            return Err(CubeError::protocol("grouping used after close()"));
        }
        if self.failed {
            return Err(CubeError::protocol("grouping used after a failed call"));
        }
        Ok(())
    }

    fn fail(&mut self) {
        self.failed = true;
        self.pending = false;
        self.current = None;
    }

    fn fold_next_group(&mut self) -> CubeResult<()> {
        if !self.pending {
            if !self.input.has_next()? {
                return Err(CubeError::protocol("next() past the end of grouping"));
            }
            self.input.next()?;
        }
        self.pending = false;

        let recycled = self.current.take();
        let first = self.input.current()?;
        let mut group = self.strategy.new_group_holder(first, recycled)?;
        self.strategy.aggregate(&mut group, first)?;

        while self.input.has_next()? {
            self.input.next()?;
            let item = self.input.current()?;
            if !self.strategy.is_item_in_group(&group, item) {
                self.pending = true;
                break;
            }
            self.strategy.aggregate(&mut group, item)?;
        }

        self.current = Some(group);
        Ok(())
    }
}

impl<I, S> InputIterator for GroupingIterator<I, S>
where
    I: InputIterator,
    S: GroupingStrategy<I::Item>,
{
    type Item = S::Group;

    fn has_next(&mut self) -> CubeResult<bool> {
        self.check_open()?;
        if self.pending {
            return Ok(true);
        }
        let result = self.input.has_next();
        if result.is_err() {
            self.fail();
        }
        result
    }

    /// A failure ends the grouping: every later call except `close` errors
    fn next(&mut self) -> CubeResult<()> {
        self.check_open()?;
        let result = self.fold_next_group();
        if result.is_err() {
            self.fail();
        }
        result
    }

    fn current(&self) -> CubeResult<&Self::Item> {
        self.check_open()?;
        self.current
            .as_ref()
            .ok_or_else(|| CubeError::protocol("current() before next()"))
    }

    fn close(&mut self) -> CubeResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.current = None;
        self.input.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{drain, VecInput};

    /// Groups (key, value) pairs by key, summing the values
    #[derive(Default)]
    struct SumByKey {
        recycled: usize,
    }

    impl GroupingStrategy<(char, i32)> for SumByKey {
        type Group = (char, i32);

        fn new_group_holder(
            &mut self,
            first: &(char, i32),
            recycled: Option<(char, i32)>,
        ) -> CubeResult<(char, i32)> {
            if recycled.is_some() {
                self.recycled += 1;
            }
            Ok((first.0, 0))
        }

        fn is_item_in_group(&self, group: &(char, i32), item: &(char, i32)) -> bool {
            group.0 == item.0
        }

        fn aggregate(&mut self, group: &mut (char, i32), item: &(char, i32)) -> CubeResult<()> {
            group.1 += item.1;
            Ok(())
        }
    }

    #[test]
    fn test_contiguous_runs_are_folded() {
        let input = VecInput::new(vec![('a', 1), ('a', 2), ('b', 3), ('c', 4), ('c', 5)]);
        let mut grouping = GroupingIterator::new(input, SumByKey::default());
        assert_eq!(
            drain(&mut grouping).unwrap(),
            vec![('a', 3), ('b', 3), ('c', 9)]
        );
        assert_eq!(grouping.strategy().recycled, 2);
    }

    #[test]
    fn test_one_row_per_group_is_unchanged() {
        let rows = vec![('a', 1), ('b', 2), ('c', 3)];
        let mut grouping = GroupingIterator::new(VecInput::new(rows.clone()), SumByKey::default());
        assert_eq!(drain(&mut grouping).unwrap(), rows);
    }

    #[test]
    fn test_non_contiguous_keys_stay_apart() {
        let input = VecInput::new(vec![('a', 1), ('b', 1), ('a', 1)]);
        let mut grouping = GroupingIterator::new(input, SumByKey::default());
        assert_eq!(drain(&mut grouping).unwrap(), vec![('a', 1), ('b', 1), ('a', 1)]);
    }

    #[test]
    fn test_grouping_protocol() {
        let mut grouping = GroupingIterator::new(VecInput::new(vec![('a', 1)]), SumByKey::default());
        assert!(matches!(grouping.current(), Err(CubeError::IteratorProtocol(_))));
        grouping.next().unwrap();
        assert!(!grouping.has_next().unwrap());
        assert!(matches!(grouping.next(), Err(CubeError::IteratorProtocol(_))));
        grouping.close().unwrap();
        assert!(matches!(grouping.has_next(), Err(CubeError::IteratorProtocol(_))));
    }

    #[test]
    fn test_empty_input() {
        let mut grouping = GroupingIterator::new(VecInput::<(char, i32)>::new(vec![]), SumByKey::default());
        assert!(!grouping.has_next().unwrap());
    }

    /// Refuses to fold one key
    struct FailOn(char);

    impl GroupingStrategy<(char, i32)> for FailOn {
        type Group = (char, i32);

        fn new_group_holder(
            &mut self,
            first: &(char, i32),
            _recycled: Option<(char, i32)>,
        ) -> CubeResult<(char, i32)> {
            Ok((first.0, 0))
        }

        fn is_item_in_group(&self, group: &(char, i32), item: &(char, i32)) -> bool {
            group.0 == item.0
        }

        fn aggregate(&mut self, group: &mut (char, i32), item: &(char, i32)) -> CubeResult<()> {
            if item.0 == self.0 {
                return Err(CubeError::Codec(format!("cannot fold '{}'", item.0)));
            }
            group.1 += item.1;
            Ok(())
        }
    }

    #[test]
    fn test_failure_ends_the_grouping() {
        let input = VecInput::new(vec![('a', 1), ('b', 2), ('c', 3)]);
        let mut grouping = GroupingIterator::new(input, FailOn('b'));

        grouping.next().unwrap();
        assert_eq!(grouping.current().unwrap(), &('a', 1));
        assert!(matches!(grouping.next(), Err(CubeError::Codec(_))));

        // 'c' is never handed out after the lost 'b' group
        assert!(matches!(grouping.has_next(), Err(CubeError::IteratorProtocol(_))));
        assert!(matches!(grouping.next(), Err(CubeError::IteratorProtocol(_))));
        assert!(matches!(grouping.current(), Err(CubeError::IteratorProtocol(_))));
        grouping.close().unwrap();
    }
}
