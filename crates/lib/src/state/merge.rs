//! Merging several `DataState`s into one.
//!
//! Precedence, first match wins:
//!
//! 1. any `Error` → `Error` (cause of the first error encountered)
//! 2. any `NoNetwork` → `NoNetwork`
//! 3. any `Loading` while no input holds a value → `Loading`
//! 4. any `Pending` → `Pending`
//! 5. otherwise → `Loaded`
//!
//! A `Loading` input does not hold the aggregate back once another facet has
//! data; it simply contributes its facet's empty value. The same goes for
//! failure states that carry no value.

use super::{DataState, StateError};

/// Outcome of inspecting every facet's variant, before any value is built.
enum Resolved {
    Loading,
    Pending,
    Loaded,
    NoNetwork,
    Error(StateError),
}

#[derive(Default)]
struct Resolver {
    first_error: Option<StateError>,
    no_network: bool,
    loading: bool,
    pending: bool,
    any_data: bool,
}

impl Resolver {
    fn observe<T>(&mut self, state: &DataState<T>) {
        self.any_data |= state.has_data();
        match state {
            DataState::Error { error, .. } => {
                if self.first_error.is_none() {
                    self.first_error = Some(error.clone());
                }
            }
            DataState::NoNetwork(_) => self.no_network = true,
            DataState::Loading => self.loading = true,
            DataState::Pending(_) => self.pending = true,
            DataState::Loaded(_) => {}
        }
    }

    fn resolve(self) -> (Resolved, bool) {
        let resolved = if let Some(error) = self.first_error {
            Resolved::Error(error)
        } else if self.no_network {
            Resolved::NoNetwork
        } else if self.loading && !self.any_data {
            Resolved::Loading
        } else if self.pending {
            Resolved::Pending
        } else {
            Resolved::Loaded
        };
        (resolved, self.any_data)
    }
}

fn build<R>(resolved: Resolved, any_data: bool, value: impl FnOnce() -> R) -> DataState<R> {
    match resolved {
        Resolved::Loading => DataState::Loading,
        // Loaded/Pending are only reachable when at least one facet holds data
        Resolved::Pending => DataState::Pending(value()),
        Resolved::Loaded => DataState::Loaded(value()),
        Resolved::NoNetwork => DataState::NoNetwork(any_data.then(value)),
        Resolved::Error(error) => DataState::Error {
            error,
            data: any_data.then(value),
        },
    }
}

/// Merge two facets into one state.
///
/// Facets without a value contribute `Default::default()` to `f`.
pub fn combine<A, B, R>(
    a: DataState<A>,
    b: DataState<B>,
    f: impl FnOnce(A, B) -> R,
) -> DataState<R>
where
    A: Default,
    B: Default,
{
    let mut resolver = Resolver::default();
    resolver.observe(&a);
    resolver.observe(&b);
    let (resolved, any_data) = resolver.resolve();
    build(resolved, any_data, || {
        f(
            a.into_data().unwrap_or_default(),
            b.into_data().unwrap_or_default(),
        )
    })
}

/// Merge three facets into one state.
///
/// Facets without a value contribute `Default::default()` to `f`.
pub fn combine3<A, B, C, R>(
    a: DataState<A>,
    b: DataState<B>,
    c: DataState<C>,
    f: impl FnOnce(A, B, C) -> R,
) -> DataState<R>
where
    A: Default,
    B: Default,
    C: Default,
{
    let mut resolver = Resolver::default();
    resolver.observe(&a);
    resolver.observe(&b);
    resolver.observe(&c);
    let (resolved, any_data) = resolver.resolve();
    build(resolved, any_data, || {
        f(
            a.into_data().unwrap_or_default(),
            b.into_data().unwrap_or_default(),
            c.into_data().unwrap_or_default(),
        )
    })
}

/// Merge any number of same-shaped facets.
///
/// The aggregate keeps input order; facets without a value contribute
/// `T::default()`. An empty input merges to `Loaded(vec![])`.
pub fn merge_all<T: Default>(states: impl IntoIterator<Item = DataState<T>>) -> DataState<Vec<T>> {
    let states: Vec<DataState<T>> = states.into_iter().collect();
    let mut resolver = Resolver::default();
    for state in &states {
        resolver.observe(state);
    }
    let (resolved, any_data) = resolver.resolve();
    build(resolved, any_data, || {
        states
            .into_iter()
            .map(|s| s.into_data().unwrap_or_default())
            .collect()
    })
}
