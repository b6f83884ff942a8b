//! One-call helpers over borrowed slices.
//!
//! Each function builds a single-step [`Pipeline`] over `source` and runs
//! one terminal operation on it. Use [`Pipeline`] directly to chain steps.

use std::hash::Hash;

use indexmap::IndexMap;

use crate::error::PipelineResult;
use crate::pipeline::Pipeline;
use crate::stage::Order;

pub fn map<T, R>(source: &[T], f: impl Fn(&T) -> R) -> PipelineResult<Vec<R>> {
    Pipeline::new(source).map(f).collect()
}

pub fn filter<'a, T>(
    source: &'a [T],
    predicate: impl Fn(&T) -> bool,
) -> PipelineResult<Vec<&'a T>> {
    Pipeline::new(source).filter(|x| predicate(x)).collect()
}

pub fn flat_map<T, U>(source: &[T], f: impl Fn(&T) -> U) -> PipelineResult<Vec<U::Item>>
where
    U: IntoIterator,
{
    Pipeline::new(source).flat_map(f).collect()
}

pub fn reduce<T, R>(source: &[T], identity: R, combine: impl Fn(R, &T) -> R) -> PipelineResult<R> {
    Pipeline::new(source).reduce(identity, combine)
}

/// Pairwise reduction without identity. `None` for an empty slice.
pub fn reduce_optional<T: Clone>(
    source: &[T],
    combine: impl Fn(T, T) -> T,
) -> PipelineResult<Option<T>> {
    Pipeline::new(source).map(T::clone).reduce_optional(combine)
}

pub fn distinct<T>(source: &[T]) -> PipelineResult<Vec<&T>>
where
    T: Eq + Hash,
{
    Pipeline::new(source).distinct().collect()
}

/// Stable sort by key.
pub fn sort_by<'a, T, K: Ord>(
    source: &'a [T],
    key: impl Fn(&T) -> K,
    order: Order,
) -> PipelineResult<Vec<&'a T>> {
    Pipeline::new(source)
        .sort_by_key(|x| key(x), order)
        .collect()
}

pub fn group_by<T, K, V>(
    source: &[T],
    key: impl Fn(&T) -> K,
    value: impl Fn(&T) -> V,
) -> PipelineResult<IndexMap<K, Vec<V>>>
where
    K: Hash + Eq,
{
    Pipeline::new(source).group_by(|x| key(x), value)
}

/// Apply `mapper` to every element and keep the results accepted by `keep`.
pub fn custom_map<T, R>(
    source: &[T],
    mapper: impl Fn(&T) -> R,
    keep: impl Fn(&R) -> bool,
) -> PipelineResult<Vec<R>> {
    Pipeline::new(source).custom_map(mapper, keep).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_map() {
        let squares = custom_map(&[2, 3, 4, 5, 6], |n| n * n, |n| *n > 10);
        assert_eq!(squares.unwrap(), vec![16, 25, 36]);
    }

    #[test]
    fn test_map_names_to_greetings() {
        let names = ["Raj", "Priya"];
        let greetings = map(&names, |n| format!("Hello, {n}")).unwrap();
        assert_eq!(greetings, vec!["Hello, Raj", "Hello, Priya"]);
    }

    #[test]
    fn test_filter_and_distinct() {
        let evens = filter(&[1, 2, 3, 4], |n| n % 2 == 0).unwrap();
        assert_eq!(evens, vec![&2, &4]);
        assert_eq!(distinct(&[1, 1, 2, 3, 3, 3]).unwrap(), vec![&1, &2, &3]);
    }

    #[test]
    fn test_flat_map_sentences_to_words() {
        let sentences = ["java streams", "are lazy"];
        let split = |s: &&str| s.split(' ').map(str::to_string).collect::<Vec<_>>();
        let words = flat_map(&sentences, split).unwrap();
        assert_eq!(words, vec!["java", "streams", "are", "lazy"]);
    }

    #[test]
    fn test_reductions() {
        assert_eq!(reduce(&[1, 2, 3], 0, |acc, n| acc + n).unwrap(), 6);
        let empty: [i32; 0] = [];
        assert_eq!(reduce(&empty, 7, |acc, n| acc + n).unwrap(), 7);
        assert_eq!(reduce_optional(&empty, |a, b| a.max(b)).unwrap(), None);
        assert_eq!(
            reduce_optional(&[3, 9, 2], |a, b| a.max(b)).unwrap(),
            Some(9)
        );
    }

    #[test]
    fn test_sort_and_group() {
        let salaries = [50000, 40000, 45000];
        let sorted = sort_by(&salaries, |s| *s, Order::Descending).unwrap();
        assert_eq!(sorted, vec![&50000, &45000, &40000]);

        let staff = [("Raj", "IT"), ("Aman", "HR"), ("Priya", "IT")];
        let groups = group_by(&staff, |e| e.1, |e| e.0).unwrap();
        assert_eq!(groups["IT"], vec!["Raj", "Priya"]);
        assert_eq!(groups.get_index(1).map(|(k, _)| *k), Some("HR"));
    }
}
