//! The fluent pipeline builder and its terminal operations.
//!
//! Chaining methods consume the pipeline and return a new one wrapping one
//! more [`Stage`]; they never run a step. Terminal methods take `&self` and
//! perform exactly one traversal each, so the same pipeline can be
//! evaluated repeatedly.

use std::cmp::Ordering;
use std::fmt::Display;
use std::hash::Hash;

use indexmap::IndexMap;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::stage::{
    Distinct, Filter, FlatMap, Inspect, IterSource, Map, Order, Skip, Sorted, Source, Stage, Take,
    TryMap,
};

/// A lazy chain of steps over a borrowed or restartable source.
#[derive(Clone)]
pub struct Pipeline<S> {
    stage: S,
}

impl<'a, T> Pipeline<Source<'a, T>> {
    /// Start a pipeline over a borrowed slice. Elements are yielded as `&T`.
    pub fn new(items: &'a [T]) -> Self {
        Pipeline {
            stage: Source::new(items),
        }
    }
}

impl<I: Iterator + Clone> Pipeline<IterSource<I>> {
    /// Start a pipeline over a restartable iterator.
    pub fn from_source(iter: I) -> Self {
        Pipeline {
            stage: IterSource::new(iter),
        }
    }
}

/// Create a pipeline over the lines of a text.
pub fn from_lines(text: &str) -> Pipeline<IterSource<std::str::Lines<'_>>> {
    Pipeline::from_source(text.lines())
}

/// Create a pipeline over string slices.
pub fn from_strings<'a>(
    strings: &'a [&'a str],
) -> Pipeline<IterSource<std::iter::Copied<std::slice::Iter<'a, &'a str>>>> {
    Pipeline::from_source(strings.iter().copied())
}

fn log_abort(err: &PipelineError) {
    debug!(error = %err, "pipeline traversal aborted");
}

impl<S: Stage> Pipeline<S> {
    fn then<N: Stage>(self, build: impl FnOnce(S) -> N) -> Pipeline<N> {
        Pipeline {
            stage: build(self.stage),
        }
    }

    /// Step names joined the way pipeline text writes them.
    pub fn describe(&self) -> String {
        self.stage.names().join(" | ")
    }

    /// Borrow the outermost stage.
    pub fn stage(&self) -> &S {
        &self.stage
    }

    pub fn map<R, F>(self, f: F) -> Pipeline<Map<S, F>>
    where
        F: Fn(S::Output) -> R,
    {
        self.then(|s| Map::new(s, f))
    }

    /// Map with a fallible function. The first error aborts the traversal
    /// and is reported with the source position of the failing element.
    pub fn try_map<R, E, F>(self, f: F) -> Pipeline<TryMap<S, F>>
    where
        F: Fn(S::Output) -> Result<R, E>,
        E: Into<anyhow::Error>,
    {
        self.then(|s| TryMap::new(s, f))
    }

    pub fn filter<P>(self, predicate: P) -> Pipeline<Filter<S, P>>
    where
        P: Fn(&S::Output) -> bool,
    {
        self.then(|s| Filter::new(s, predicate))
    }

    /// Replace each element with the elements of `f(element)`, one level deep.
    pub fn flat_map<U, F>(self, f: F) -> Pipeline<FlatMap<S, F>>
    where
        F: Fn(S::Output) -> U,
        U: IntoIterator,
    {
        self.then(|s| FlatMap::new(s, f))
    }

    pub fn inspect<F>(self, f: F) -> Pipeline<Inspect<S, F>>
    where
        F: Fn(&S::Output),
    {
        self.then(|s| Inspect::new(s, f))
    }

    /// Keep the first occurrence of each value.
    pub fn distinct(self) -> Pipeline<Distinct<S>>
    where
        S::Output: Eq + Hash + Clone,
    {
        self.then(Distinct::new)
    }

    /// Stable sort by comparator.
    pub fn sorted_by<C>(self, compare: C) -> Pipeline<Sorted<S, C>>
    where
        C: Fn(&S::Output, &S::Output) -> Ordering,
    {
        self.then(|s| Sorted::new(s, compare))
    }

    /// Stable sort by key. Equal keys keep their relative order in both directions.
    pub fn sort_by_key<K, F>(
        self,
        key: F,
        order: Order,
    ) -> Pipeline<Sorted<S, impl Fn(&S::Output, &S::Output) -> Ordering>>
    where
        K: Ord,
        F: Fn(&S::Output) -> K,
    {
        self.sorted_by(move |a: &S::Output, b: &S::Output| {
            order.apply(key(a).cmp(&key(b)))
        })
    }

    pub fn take(self, n: usize) -> Pipeline<Take<S>> {
        self.then(|s| Take::new(s, n))
    }

    pub fn skip(self, n: usize) -> Pipeline<Skip<S>> {
        self.then(|s| Skip::new(s, n))
    }

    /// Map every element, then keep the mapped values accepted by `keep`.
    pub fn custom_map<R, F, P>(self, mapper: F, keep: P) -> Pipeline<Filter<Map<S, F>, P>>
    where
        F: Fn(S::Output) -> R,
        P: Fn(&R) -> bool,
    {
        self.map(mapper).filter(keep)
    }

    // -----------------------------------------------------------------------
    // Terminal operations
    // -----------------------------------------------------------------------

    fn values(&self, op: &'static str) -> impl Iterator<Item = PipelineResult<S::Output>> + '_ {
        debug!(op, stages = %self.describe(), "traversing pipeline");
        self.stage.open().map(|item| item.map(|(_, value)| value))
    }

    pub fn collect(&self) -> PipelineResult<Vec<S::Output>> {
        self.values("collect")
            .collect::<PipelineResult<Vec<_>>>()
            .inspect_err(log_abort)
    }

    /// Left fold. An empty pipeline yields `identity` unchanged.
    pub fn reduce<R, F>(&self, identity: R, combine: F) -> PipelineResult<R>
    where
        F: Fn(R, S::Output) -> R,
    {
        self.values("reduce")
            .try_fold(identity, |acc, item| item.map(|value| combine(acc, value)))
            .inspect_err(log_abort)
    }

    /// Left fold without identity. `None` when the pipeline is empty.
    pub fn reduce_optional<F>(&self, combine: F) -> PipelineResult<Option<S::Output>>
    where
        F: Fn(S::Output, S::Output) -> S::Output,
    {
        self.values("reduce_optional")
            .try_fold(None, |acc, item| {
                let value = item?;
                Ok::<_, PipelineError>(Some(match acc {
                    Some(acc) => combine(acc, value),
                    None => value,
                }))
            })
            .inspect_err(log_abort)
    }

    /// Group values by key. Keys keep first-seen order; each group keeps element order.
    pub fn group_by<K, V, KF, VF>(&self, key: KF, value: VF) -> PipelineResult<IndexMap<K, Vec<V>>>
    where
        K: Hash + Eq,
        KF: Fn(&S::Output) -> K,
        VF: Fn(S::Output) -> V,
    {
        self.values("group_by")
            .try_fold(IndexMap::new(), |mut groups: IndexMap<K, Vec<V>>, item| {
                let item = item?;
                groups.entry(key(&item)).or_default().push(value(item));
                Ok::<_, PipelineError>(groups)
            })
            .inspect_err(log_abort)
    }

    pub fn count(&self) -> PipelineResult<usize> {
        self.values("count")
            .try_fold(0, |n, item| item.map(|_| n + 1))
            .inspect_err(log_abort)
    }

    /// First element. Stops the traversal after it.
    pub fn first(&self) -> PipelineResult<Option<S::Output>> {
        self.values("first")
            .next()
            .transpose()
            .inspect_err(log_abort)
    }

    pub fn any<P>(&self, predicate: P) -> PipelineResult<bool>
    where
        P: Fn(&S::Output) -> bool,
    {
        for item in self.values("any") {
            if predicate(&item.inspect_err(log_abort)?) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn all<P>(&self, predicate: P) -> PipelineResult<bool>
    where
        P: Fn(&S::Output) -> bool,
    {
        for item in self.values("all") {
            if !predicate(&item.inspect_err(log_abort)?) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn sum<T>(&self) -> PipelineResult<T>
    where
        T: std::iter::Sum<S::Output>,
    {
        self.values("sum")
            .sum::<PipelineResult<T>>()
            .inspect_err(log_abort)
    }

    /// Arithmetic mean, `None` when empty.
    pub fn average(&self) -> PipelineResult<Option<f64>>
    where
        S::Output: Into<f64>,
    {
        let (total, n) = self
            .values("average")
            .try_fold((0.0, 0usize), |(total, n), item| {
                item.map(|value| (total + value.into(), n + 1))
            })
            .inspect_err(log_abort)?;
        Ok((n > 0).then(|| total / n as f64))
    }

    /// Element with the greatest key. The earliest one wins a tie.
    pub fn max_by_key<K, F>(&self, key: F) -> PipelineResult<Option<S::Output>>
    where
        K: Ord,
        F: Fn(&S::Output) -> K,
    {
        self.reduce_optional(|best, next| {
            if key(&next) > key(&best) { next } else { best }
        })
    }

    /// Element with the smallest key. The earliest one wins a tie.
    pub fn min_by_key<K, F>(&self, key: F) -> PipelineResult<Option<S::Output>>
    where
        K: Ord,
        F: Fn(&S::Output) -> K,
    {
        self.reduce_optional(|best, next| {
            if key(&next) < key(&best) { next } else { best }
        })
    }

    pub fn join(&self, separator: &str) -> PipelineResult<String>
    where
        S::Output: Display,
    {
        let parts = self.collect()?;
        Ok(parts
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(separator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug, Clone, PartialEq)]
    struct Employee {
        name: &'static str,
        dept: &'static str,
        salary: u32,
    }

    fn employee(name: &'static str, dept: &'static str, salary: u32) -> Employee {
        Employee { name, dept, salary }
    }

    fn employees() -> Vec<Employee> {
        vec![
            employee("Raj", "IT", 50000),
            employee("Aman", "HR", 40000),
            employee("Priya", "IT", 45000),
            employee("Kumar", "Sales", 35000),
        ]
    }

    #[test]
    fn test_map_composition() {
        let data = [1, 2, 3, 4];
        let f = |n: i32| n + 1;
        let g = |n: i32| n * 10;
        let chained = Pipeline::new(&data).map(|n| f(*n)).map(g).collect();
        let composed = Pipeline::new(&data).map(|n| g(f(*n))).collect();
        let chained = chained.unwrap();
        assert_eq!(chained, composed.unwrap());
        assert_eq!(chained, vec![20, 30, 40, 50]);
    }

    #[test]
    fn test_filter_idempotent() {
        let data = [3, 8, 1, 9, 12];
        let once = Pipeline::new(&data).filter(|n| **n > 5).collect().unwrap();
        let twice = Pipeline::new(&data)
            .filter(|n| **n > 5)
            .filter(|n| **n > 5)
            .collect()
            .unwrap();
        assert_eq!(once, twice);
        assert_eq!(once, vec![&8, &9, &12]);
    }

    #[test]
    fn test_flat_map_singleton_identity() {
        let data = ["a", "b", "c"];
        let result = Pipeline::new(&data).flat_map(|s| [*s]).collect().unwrap();
        assert_eq!(result, data.to_vec());
    }

    #[test]
    fn test_flat_map_csv_numbers() {
        let data = ["1,2,3", "4,5"];
        let numbers = Pipeline::new(&data)
            .flat_map(|s| s.split(','))
            .try_map(|p| p.trim().parse::<i32>())
            .collect()
            .unwrap();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_reduce_empty_returns_identity() {
        let data: [i32; 0] = [];
        let total = Pipeline::new(&data).reduce(42, |acc, n| acc * n).unwrap();
        assert_eq!(total, 42);
    }

    #[test]
    fn test_reduce_optional_empty_is_none() {
        let data: [&str; 0] = [];
        let longest = Pipeline::new(&data)
            .reduce_optional(|a, b| if a.len() > b.len() { a } else { b })
            .unwrap();
        assert_eq!(longest, None);
    }

    #[test]
    fn test_longest_word_consistent_across_terminals() {
        let sentence = "Java is a programming language";
        let words = Pipeline::from_source(sentence.split(' '));

        let by_reduce = words
            .reduce_optional(|a, b| if a.len() > b.len() { a } else { b })
            .unwrap();
        let by_max = words.max_by_key(|w| w.len()).unwrap();
        let by_sort = words
            .clone()
            .sort_by_key(|w| w.len(), Order::Descending)
            .first()
            .unwrap();

        assert_eq!(by_reduce, Some("programming"));
        assert_eq!(by_max, Some("programming"));
        assert_eq!(by_sort, Some("programming"));
        assert_eq!(by_max.map(str::len), Some(11));
    }

    #[test]
    fn test_max_and_min_keep_earliest_on_tie() {
        let words = ["ab", "cd", "e", "f"];
        let pipeline = Pipeline::new(&words);
        assert_eq!(pipeline.max_by_key(|w| w.len()).unwrap(), Some(&"ab"));
        assert_eq!(pipeline.min_by_key(|w| w.len()).unwrap(), Some(&"e"));
    }

    #[test]
    fn test_distinct_keeps_first_occurrence() {
        let data = [1, 1, 2, 3, 3, 3];
        let result = Pipeline::new(&data).distinct().collect().unwrap();
        assert_eq!(result, vec![&1, &2, &3]);
    }

    #[test]
    fn test_unique_uppercase_departments() {
        let depts = ["IT", "HR", "it", "Finance", "hr", "IT"];
        let result = Pipeline::new(&depts)
            .map(|d| d.to_uppercase())
            .distinct()
            .collect()
            .unwrap();
        assert_eq!(result, vec!["IT", "HR", "FINANCE"]);
    }

    #[test]
    fn test_sort_descending_is_stable() {
        let salaries = [50000, 40000, 45000];
        let sorted = Pipeline::new(&salaries)
            .sort_by_key(|s| **s, Order::Descending)
            .collect()
            .unwrap();
        assert_eq!(sorted, vec![&50000, &45000, &40000]);

        let staff = employees();
        let by_dept = Pipeline::new(&staff)
            .sort_by_key(|e| e.dept, Order::Descending)
            .map(|e| e.name)
            .collect()
            .unwrap();
        // IT ties keep Raj before Priya
        assert_eq!(by_dept, vec!["Kumar", "Raj", "Priya", "Aman"]);
    }

    #[test]
    fn test_group_by_department() {
        let staff = employees();
        let groups = Pipeline::new(&staff)
            .group_by(|e| e.dept, |e| e.salary)
            .unwrap();

        let keys: Vec<&str> = groups.keys().copied().collect();
        assert_eq!(keys, vec!["IT", "HR", "Sales"]);
        assert_eq!(groups["IT"], vec![50000, 45000]);
        assert_eq!(groups["HR"], vec![40000]);
        assert_eq!(groups["Sales"], vec![35000]);
    }

    #[test]
    fn test_custom_map_squares_over_ten() {
        let data = [2, 3, 4, 5, 6];
        let result = Pipeline::new(&data)
            .custom_map(|n| n * n, |n| *n > 10)
            .collect()
            .unwrap();
        assert_eq!(result, vec![16, 25, 36]);
    }

    #[test]
    fn test_building_runs_no_step() {
        let calls = Cell::new(0);
        let data = [1, 2, 3];
        let _pipeline = Pipeline::new(&data)
            .map(|n| {
                calls.set(calls.get() + 1);
                n * 2
            })
            .filter(|n| *n > 2);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_each_terminal_traverses_once() {
        let calls = Cell::new(0);
        let data = [1, 2, 3];
        let pipeline = Pipeline::new(&data).map(|n| {
            calls.set(calls.get() + 1);
            n * 2
        });

        assert_eq!(pipeline.collect().unwrap(), vec![2, 4, 6]);
        assert_eq!(calls.get(), 3);
        assert_eq!(pipeline.count().unwrap(), 3);
        assert_eq!(calls.get(), 6);
    }

    #[test]
    fn test_first_stops_early() {
        let calls = Cell::new(0);
        let data = [1, 2, 3, 4];
        let first_even = Pipeline::new(&data)
            .inspect(|_| calls.set(calls.get() + 1))
            .filter(|n| **n % 2 == 0)
            .first()
            .unwrap();
        assert_eq!(first_even, Some(&2));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_failure_aborts_with_index() {
        let visited = Cell::new(0);
        let data = ["10", "20", "abc", "40"];
        let result = Pipeline::new(&data)
            .inspect(|_| visited.set(visited.get() + 1))
            .try_map(|s| s.parse::<u32>())
            .collect();

        let err = result.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ElementTransformFailure { index: 2, .. }
        ));
        assert_eq!(visited.get(), 3);
    }

    #[test]
    fn test_failure_index_after_filter_is_source_position() {
        let data = ["x", "1", "skip", "y"];
        let err = Pipeline::new(&data)
            .filter(|s| **s != "x" && **s != "skip")
            .try_map(|s| s.parse::<i32>())
            .sum::<i32>()
            .unwrap_err();
        assert_eq!(err.element_index(), Some(3));
    }

    #[test]
    fn test_numeric_terminals() {
        let prices = [840.0, 1680.0, 4200.0];
        let usd = Pipeline::new(&prices).map(|p| p / 84.0).collect().unwrap();
        assert_eq!(usd, vec![10.0, 20.0, 50.0]);

        let discounted = Pipeline::new(&[50000.0]).map(|p| p * 0.9).first().unwrap();
        assert_eq!(discounted, Some(45000.0));

        let avg = Pipeline::new(&prices).map(|p| *p).average().unwrap();
        assert!((avg.unwrap() - 2240.0).abs() < 1e-9);

        let total: f64 = Pipeline::new(&prices).map(|p| *p).sum().unwrap();
        assert!((total - 6720.0).abs() < 1e-9);

        let empty: [f64; 0] = [];
        assert_eq!(Pipeline::new(&empty).map(|p| *p).average().unwrap(), None);
    }

    #[test]
    fn test_any_all_count() {
        let data = [2, 4, 6];
        let pipeline = Pipeline::new(&data);
        assert!(pipeline.all(|n| **n % 2 == 0).unwrap());
        assert!(pipeline.any(|n| **n > 5).unwrap());
        assert!(!pipeline.any(|n| **n > 6).unwrap());
        assert_eq!(pipeline.skip(1).take(1).count().unwrap(), 1);
    }

    #[test]
    fn test_from_lines_and_join() {
        let text = "raj@gmail.com\npriya@yahoo.com\nneha@gmail.com";
        let gmail = from_lines(text)
            .filter(|l| l.ends_with("@gmail.com"))
            .map(|l| l.split('@').next().unwrap_or(l))
            .join(", ")
            .unwrap();
        assert_eq!(gmail, "raj, neha");
    }

    #[test]
    fn test_from_strings_lengths() {
        let words = ["Java", "Stream", "API"];
        let lengths = from_strings(&words).map(str::len).collect().unwrap();
        assert_eq!(lengths, vec![4, 6, 3]);
    }

    #[test]
    fn test_prefix_can_be_extended_twice() {
        let data = [1, 2, 3, 4];
        let doubled = Pipeline::new(&data).map(|n| n * 2);
        let big = doubled.clone().filter(|n| *n > 4).collect().unwrap();
        let small = doubled.filter(|n| *n <= 4).collect().unwrap();
        assert_eq!(big, vec![6, 8]);
        assert_eq!(small, vec![2, 4]);
    }

    #[test]
    fn test_describe() {
        let data = [1];
        let pipeline = Pipeline::new(&data).map(|n| n + 1).distinct().take(1);
        assert_eq!(pipeline.describe(), "source | map | distinct | take");
    }
}
