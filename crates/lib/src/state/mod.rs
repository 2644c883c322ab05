//! The `DataState` primitive.
//!
//! Every decrypted value the coordinator publishes is wrapped in a
//! [`DataState`], which tells an observer both *what* the latest value is and
//! *how fresh* it is. Failure states keep the last known value so consumers
//! never regress from "some data" to "no data" without cause.

use std::sync::Arc;

use crate::{Error, FailureKind};

mod merge;

pub use merge::{combine, combine3, merge_all};

/// Shared, cloneable failure cause carried by [`DataState::Error`].
pub type StateError = Arc<Error>;

/// Freshness and availability of an asynchronously produced value.
#[derive(Clone, Debug)]
pub enum DataState<T> {
    /// No usable value yet.
    Loading,

    /// A refresh is in progress; the carried value is the stale one still shown.
    Pending(T),

    /// Fresh value.
    Loaded(T),

    /// The last network attempt failed for lack of connectivity.
    NoNetwork(Option<T>),

    /// The last attempt failed for any other reason.
    Error {
        error: StateError,
        data: Option<T>,
    },
}

/// The variant of a [`DataState`] without its payload.
///
/// Ordered by merge precedence, lowest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StateKind {
    Loaded,
    Pending,
    Loading,
    NoNetwork,
    Error,
}

impl<T> Default for DataState<T> {
    fn default() -> Self {
        DataState::Loading
    }
}

impl<T> DataState<T> {
    pub fn error(error: impl Into<StateError>, data: Option<T>) -> Self {
        DataState::Error {
            error: error.into(),
            data,
        }
    }

    pub fn kind(&self) -> StateKind {
        match self {
            DataState::Loading => StateKind::Loading,
            DataState::Pending(_) => StateKind::Pending,
            DataState::Loaded(_) => StateKind::Loaded,
            DataState::NoNetwork(_) => StateKind::NoNetwork,
            DataState::Error { .. } => StateKind::Error,
        }
    }

    /// The carried value, fresh or stale.
    pub fn data(&self) -> Option<&T> {
        match self {
            DataState::Loading => None,
            DataState::Pending(data) | DataState::Loaded(data) => Some(data),
            DataState::NoNetwork(data) | DataState::Error { data, .. } => data.as_ref(),
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            DataState::Loading => None,
            DataState::Pending(data) | DataState::Loaded(data) => Some(data),
            DataState::NoNetwork(data) | DataState::Error { data, .. } => data,
        }
    }

    pub fn has_data(&self) -> bool {
        self.data().is_some()
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, DataState::Loading)
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, DataState::Loaded(_))
    }

    /// The failure cause, if this is an `Error` state.
    pub fn error_cause(&self) -> Option<&StateError> {
        match self {
            DataState::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn as_ref(&self) -> DataState<&T> {
        match self {
            DataState::Loading => DataState::Loading,
            DataState::Pending(data) => DataState::Pending(data),
            DataState::Loaded(data) => DataState::Loaded(data),
            DataState::NoNetwork(data) => DataState::NoNetwork(data.as_ref()),
            DataState::Error { error, data } => DataState::Error {
                error: error.clone(),
                data: data.as_ref(),
            },
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> DataState<U> {
        match self {
            DataState::Loading => DataState::Loading,
            DataState::Pending(data) => DataState::Pending(f(data)),
            DataState::Loaded(data) => DataState::Loaded(f(data)),
            DataState::NoNetwork(data) => DataState::NoNetwork(data.map(f)),
            DataState::Error { error, data } => DataState::Error {
                error,
                data: data.map(f),
            },
        }
    }

    /// Mark a refresh as started.
    ///
    /// A state holding data becomes `Pending(data)`; one without becomes `Loading`.
    pub fn into_pending(self) -> Self {
        match self.into_data() {
            Some(data) => DataState::Pending(data),
            None => DataState::Loading,
        }
    }

    /// Record a failed refresh, keeping whatever value was held.
    ///
    /// Connectivity failures become `NoNetwork`; everything else becomes `Error`.
    pub fn into_failed(self, error: StateError) -> Self {
        let connectivity = error.failure_kind() == FailureKind::Connectivity;
        let data = self.into_data();
        if connectivity {
            DataState::NoNetwork(data)
        } else {
            DataState::Error { error, data }
        }
    }
}

impl<T: PartialEq> PartialEq for DataState<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DataState::Loading, DataState::Loading) => true,
            (DataState::Pending(a), DataState::Pending(b)) => a == b,
            (DataState::Loaded(a), DataState::Loaded(b)) => a == b,
            (DataState::NoNetwork(a), DataState::NoNetwork(b)) => a == b,
            (
                DataState::Error { error: ea, data: a },
                DataState::Error { error: eb, data: b },
            ) => (Arc::ptr_eq(ea, eb) || ea.to_string() == eb.to_string()) && a == b,
            _ => false,
        }
    }
}
