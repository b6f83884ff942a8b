//! Pipeline stages.
//!
//! A stage is a value describing one step of a pipeline together with
//! everything upstream of it. Stages do no work on their own: [`Stage::open`]
//! creates a fresh iterator for a single traversal, borrowing the stage's
//! functions. Per-traversal state (seen sets, sort buffers, flat-map cursors)
//! lives in that iterator, never in the stage, so a stage can be opened any
//! number of times.
//!
//! Every element travels together with the 0-based index of the source
//! element it came from, so a failing step can report where it failed.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::hash::Hash;

use crate::error::{PipelineError, PipelineResult};

/// An element tagged with its source position, or the failure that ended the traversal.
pub type Indexed<T> = PipelineResult<(usize, T)>;

/// One composed step of a pipeline.
pub trait Stage {
    /// Element type produced by this stage.
    type Output;

    /// Iterator for a single traversal.
    type Iter<'s>: Iterator<Item = Indexed<Self::Output>>
    where
        Self: 's;

    /// Start a new traversal from the source.
    fn open(&self) -> Self::Iter<'_>;

    /// Names of the steps from the source up to and including this stage.
    fn names(&self) -> Vec<&'static str>;
}

/// Sort direction for [`crate::Pipeline::sort_by_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Ascending,
    Descending,
}

impl Order {
    /// Orient an ascending comparison result.
    pub fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            Order::Ascending => ordering,
            Order::Descending => ordering.reverse(),
        }
    }
}

fn push_name<S: Stage>(upstream: &S, name: &'static str) -> Vec<&'static str> {
    let mut names = upstream.names();
    names.push(name);
    names
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Iterator shared by both sources: enumerates the underlying elements.
pub struct SourceIter<I> {
    inner: std::iter::Enumerate<I>,
}

impl<I: Iterator> Iterator for SourceIter<I> {
    type Item = Indexed<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(Ok)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// A borrowed slice. Yields `&T`.
#[derive(Debug)]
pub struct Source<'a, T> {
    items: &'a [T],
}

impl<'a, T> Source<'a, T> {
    pub fn new(items: &'a [T]) -> Self {
        Self { items }
    }
}

impl<T> Clone for Source<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Source<'_, T> {}

impl<'a, T> Stage for Source<'a, T> {
    type Output = &'a T;
    type Iter<'s>
        = SourceIter<std::slice::Iter<'a, T>>
    where
        Self: 's;

    fn open(&self) -> Self::Iter<'_> {
        SourceIter {
            inner: self.items.iter().enumerate(),
        }
    }

    fn names(&self) -> Vec<&'static str> {
        vec!["source"]
    }
}

/// A restartable iterator. Each traversal starts from a clone of the
/// iterator as it was when the pipeline was built.
#[derive(Debug, Clone)]
pub struct IterSource<I> {
    iter: I,
}

impl<I: Iterator + Clone> IterSource<I> {
    pub fn new(iter: I) -> Self {
        Self { iter }
    }
}

impl<I: Iterator + Clone> Stage for IterSource<I> {
    type Output = I::Item;
    type Iter<'s>
        = SourceIter<I>
    where
        Self: 's;

    fn open(&self) -> Self::Iter<'_> {
        SourceIter {
            inner: self.iter.clone().enumerate(),
        }
    }

    fn names(&self) -> Vec<&'static str> {
        vec!["source"]
    }
}

// ---------------------------------------------------------------------------
// Element-wise steps
// ---------------------------------------------------------------------------

/// Applies a function to every element.
#[derive(Clone)]
pub struct Map<S, F> {
    upstream: S,
    f: F,
}

impl<S, F> Map<S, F> {
    pub fn new(upstream: S, f: F) -> Self {
        Self { upstream, f }
    }
}

pub struct MapIter<'s, I, F> {
    inner: I,
    f: &'s F,
}

impl<I, F, T, R> Iterator for MapIter<'_, I, F>
where
    I: Iterator<Item = Indexed<T>>,
    F: Fn(T) -> R,
{
    type Item = Indexed<R>;

    fn next(&mut self) -> Option<Self::Item> {
        let f = self.f;
        self.inner
            .next()
            .map(|item| item.map(|(index, value)| (index, f(value))))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<S, F, R> Stage for Map<S, F>
where
    S: Stage,
    F: Fn(S::Output) -> R,
{
    type Output = R;
    type Iter<'s>
        = MapIter<'s, S::Iter<'s>, F>
    where
        Self: 's;

    fn open(&self) -> Self::Iter<'_> {
        MapIter {
            inner: self.upstream.open(),
            f: &self.f,
        }
    }

    fn names(&self) -> Vec<&'static str> {
        push_name(&self.upstream, "map")
    }
}

/// Applies a fallible function to every element. The first failure ends
/// the traversal.
#[derive(Clone)]
pub struct TryMap<S, F> {
    upstream: S,
    f: F,
}

impl<S, F> TryMap<S, F> {
    pub fn new(upstream: S, f: F) -> Self {
        Self { upstream, f }
    }
}

pub struct TryMapIter<'s, I, F> {
    inner: I,
    f: &'s F,
}

impl<I, F, T, R, E> Iterator for TryMapIter<'_, I, F>
where
    I: Iterator<Item = Indexed<T>>,
    F: Fn(T) -> Result<R, E>,
    E: Into<anyhow::Error>,
{
    type Item = Indexed<R>;

    fn next(&mut self) -> Option<Self::Item> {
        let f = self.f;
        self.inner.next().map(|item| -> Indexed<R> {
            let (index, value) = item?;
            match f(value) {
                Ok(mapped) => Ok((index, mapped)),
                Err(e) => Err(PipelineError::ElementTransformFailure {
                    index,
                    source: e.into(),
                }),
            }
        })
    }
}

impl<S, F, R, E> Stage for TryMap<S, F>
where
    S: Stage,
    F: Fn(S::Output) -> Result<R, E>,
    E: Into<anyhow::Error>,
{
    type Output = R;
    type Iter<'s>
        = TryMapIter<'s, S::Iter<'s>, F>
    where
        Self: 's;

    fn open(&self) -> Self::Iter<'_> {
        TryMapIter {
            inner: self.upstream.open(),
            f: &self.f,
        }
    }

    fn names(&self) -> Vec<&'static str> {
        push_name(&self.upstream, "try_map")
    }
}

/// Keeps elements matching a predicate.
#[derive(Clone)]
pub struct Filter<S, P> {
    upstream: S,
    predicate: P,
}

impl<S, P> Filter<S, P> {
    pub fn new(upstream: S, predicate: P) -> Self {
        Self {
            upstream,
            predicate,
        }
    }
}

pub struct FilterIter<'s, I, P> {
    inner: I,
    predicate: &'s P,
}

impl<I, P, T> Iterator for FilterIter<'_, I, P>
where
    I: Iterator<Item = Indexed<T>>,
    P: Fn(&T) -> bool,
{
    type Item = Indexed<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok((index, value)) => {
                    if (self.predicate)(&value) {
                        return Some(Ok((index, value)));
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl<S, P> Stage for Filter<S, P>
where
    S: Stage,
    P: Fn(&S::Output) -> bool,
{
    type Output = S::Output;
    type Iter<'s>
        = FilterIter<'s, S::Iter<'s>, P>
    where
        Self: 's;

    fn open(&self) -> Self::Iter<'_> {
        FilterIter {
            inner: self.upstream.open(),
            predicate: &self.predicate,
        }
    }

    fn names(&self) -> Vec<&'static str> {
        push_name(&self.upstream, "filter")
    }
}

/// Replaces each element with zero or more elements, flattening one level.
#[derive(Clone)]
pub struct FlatMap<S, F> {
    upstream: S,
    f: F,
}

impl<S, F> FlatMap<S, F> {
    pub fn new(upstream: S, f: F) -> Self {
        Self { upstream, f }
    }
}

pub struct FlatMapIter<'s, I, F, U: IntoIterator> {
    inner: I,
    f: &'s F,
    front: Option<(usize, U::IntoIter)>,
}

impl<I, F, T, U> Iterator for FlatMapIter<'_, I, F, U>
where
    I: Iterator<Item = Indexed<T>>,
    F: Fn(T) -> U,
    U: IntoIterator,
{
    type Item = Indexed<U::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((index, current)) = &mut self.front {
                if let Some(value) = current.next() {
                    return Some(Ok((*index, value)));
                }
                self.front = None;
            }
            match self.inner.next()? {
                Ok((index, value)) => self.front = Some((index, (self.f)(value).into_iter())),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl<S, F, U> Stage for FlatMap<S, F>
where
    S: Stage,
    F: Fn(S::Output) -> U,
    U: IntoIterator,
{
    type Output = U::Item;
    type Iter<'s>
        = FlatMapIter<'s, S::Iter<'s>, F, U>
    where
        Self: 's;

    fn open(&self) -> Self::Iter<'_> {
        FlatMapIter {
            inner: self.upstream.open(),
            f: &self.f,
            front: None,
        }
    }

    fn names(&self) -> Vec<&'static str> {
        push_name(&self.upstream, "flat_map")
    }
}

/// Calls a function with a reference to each element as it passes.
#[derive(Clone)]
pub struct Inspect<S, F> {
    upstream: S,
    f: F,
}

impl<S, F> Inspect<S, F> {
    pub fn new(upstream: S, f: F) -> Self {
        Self { upstream, f }
    }
}

pub struct InspectIter<'s, I, F> {
    inner: I,
    f: &'s F,
}

impl<I, F, T> Iterator for InspectIter<'_, I, F>
where
    I: Iterator<Item = Indexed<T>>,
    F: Fn(&T),
{
    type Item = Indexed<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        if let Ok((_, value)) = &item {
            (self.f)(value);
        }
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<S, F> Stage for Inspect<S, F>
where
    S: Stage,
    F: Fn(&S::Output),
{
    type Output = S::Output;
    type Iter<'s>
        = InspectIter<'s, S::Iter<'s>, F>
    where
        Self: 's;

    fn open(&self) -> Self::Iter<'_> {
        InspectIter {
            inner: self.upstream.open(),
            f: &self.f,
        }
    }

    fn names(&self) -> Vec<&'static str> {
        push_name(&self.upstream, "inspect")
    }
}

// ---------------------------------------------------------------------------
// Stateful steps
// ---------------------------------------------------------------------------

/// Drops elements equal to one seen earlier in the same traversal.
#[derive(Clone)]
pub struct Distinct<S> {
    upstream: S,
}

impl<S> Distinct<S> {
    pub fn new(upstream: S) -> Self {
        Self { upstream }
    }
}

pub struct DistinctIter<I, T> {
    inner: I,
    seen: HashSet<T>,
}

impl<I, T> Iterator for DistinctIter<I, T>
where
    I: Iterator<Item = Indexed<T>>,
    T: Eq + Hash + Clone,
{
    type Item = Indexed<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok((index, value)) => {
                    if self.seen.insert(value.clone()) {
                        return Some(Ok((index, value)));
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl<S> Stage for Distinct<S>
where
    S: Stage,
    S::Output: Eq + Hash + Clone,
{
    type Output = S::Output;
    type Iter<'s>
        = DistinctIter<S::Iter<'s>, S::Output>
    where
        Self: 's;

    fn open(&self) -> Self::Iter<'_> {
        DistinctIter {
            inner: self.upstream.open(),
            seen: HashSet::new(),
        }
    }

    fn names(&self) -> Vec<&'static str> {
        push_name(&self.upstream, "distinct")
    }
}

/// Stable sort by comparator. Upstream is drained on the first pull.
#[derive(Clone)]
pub struct Sorted<S, C> {
    upstream: S,
    compare: C,
}

impl<S, C> Sorted<S, C> {
    pub fn new(upstream: S, compare: C) -> Self {
        Self { upstream, compare }
    }
}

pub struct SortedIter<'s, I, T, C> {
    upstream: Option<I>,
    compare: &'s C,
    buffer: std::vec::IntoIter<(usize, T)>,
}

impl<I, T, C> Iterator for SortedIter<'_, I, T, C>
where
    I: Iterator<Item = Indexed<T>>,
    C: Fn(&T, &T) -> Ordering,
{
    type Item = Indexed<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(upstream) = self.upstream.take() {
            let mut buffered = Vec::new();
            for item in upstream {
                match item {
                    Ok(pair) => buffered.push(pair),
                    Err(e) => return Some(Err(e)),
                }
            }
            let compare = self.compare;
            // slice::sort_by is stable
            buffered.sort_by(|(_, a), (_, b)| compare(a, b));
            self.buffer = buffered.into_iter();
        }
        self.buffer.next().map(Ok)
    }
}

impl<S, C> Stage for Sorted<S, C>
where
    S: Stage,
    C: Fn(&S::Output, &S::Output) -> Ordering,
{
    type Output = S::Output;
    type Iter<'s>
        = SortedIter<'s, S::Iter<'s>, S::Output, C>
    where
        Self: 's;

    fn open(&self) -> Self::Iter<'_> {
        SortedIter {
            upstream: Some(self.upstream.open()),
            compare: &self.compare,
            buffer: Vec::new().into_iter(),
        }
    }

    fn names(&self) -> Vec<&'static str> {
        push_name(&self.upstream, "sort")
    }
}

/// Passes at most `n` elements, then stops pulling from upstream.
#[derive(Clone)]
pub struct Take<S> {
    upstream: S,
    n: usize,
}

impl<S> Take<S> {
    pub fn new(upstream: S, n: usize) -> Self {
        Self { upstream, n }
    }
}

pub struct TakeIter<I> {
    inner: I,
    remaining: usize,
}

impl<I, T> Iterator for TakeIter<I>
where
    I: Iterator<Item = Indexed<T>>,
{
    type Item = Indexed<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let item = self.inner.next()?;
        if item.is_ok() {
            self.remaining -= 1;
        }
        Some(item)
    }
}

impl<S: Stage> Stage for Take<S> {
    type Output = S::Output;
    type Iter<'s>
        = TakeIter<S::Iter<'s>>
    where
        Self: 's;

    fn open(&self) -> Self::Iter<'_> {
        TakeIter {
            inner: self.upstream.open(),
            remaining: self.n,
        }
    }

    fn names(&self) -> Vec<&'static str> {
        push_name(&self.upstream, "take")
    }
}

/// Drops the first `n` elements.
#[derive(Clone)]
pub struct Skip<S> {
    upstream: S,
    n: usize,
}

impl<S> Skip<S> {
    pub fn new(upstream: S, n: usize) -> Self {
        Self { upstream, n }
    }
}

pub struct SkipIter<I> {
    inner: I,
    remaining: usize,
}

impl<I, T> Iterator for SkipIter<I>
where
    I: Iterator<Item = Indexed<T>>,
{
    type Item = Indexed<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let item = self.inner.next()?;
            if self.remaining > 0 && item.is_ok() {
                self.remaining -= 1;
                continue;
            }
            return Some(item);
        }
    }
}

impl<S: Stage> Stage for Skip<S> {
    type Output = S::Output;
    type Iter<'s>
        = SkipIter<S::Iter<'s>>
    where
        Self: 's;

    fn open(&self) -> Self::Iter<'_> {
        SkipIter {
            inner: self.upstream.open(),
            remaining: self.n,
        }
    }

    fn names(&self) -> Vec<&'static str> {
        push_name(&self.upstream, "skip")
    }
}
