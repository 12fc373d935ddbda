//! The error type shared by sources, units and the bridging operators.

use std::{error::Error as StdError, fmt, sync::Arc};

/// An error signaled by a source, a unit, a mapper, or one of the operators in this crate.
///
/// [`Error`] is cheap to clone: user-provided errors are stored behind an [`Arc`], so the same
/// error object can be handed to a downstream observer and compared by identity later (see
/// [`Error::ptr_eq`]).
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An error raised by user code.
    #[error(transparent)]
    Custom(Arc<dyn StdError + Send + Sync + 'static>),

    /// Several errors collected by a delay-error operator, in the order they arrived.
    #[error(transparent)]
    Composite(#[from] CompositeError),

    /// A source pushed more items than were requested from it.
    #[error("source emitted more items than requested (prefetch window of {0})")]
    Overflow(usize),

    /// A [`Promise`][crate::Promise] was dropped without being settled.
    #[error("promise was dropped without being settled")]
    PromiseDropped,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Message(String);

impl Error {
    /// Wraps a user error.
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(error))
    }

    /// Creates an error carrying just a message.
    pub fn msg<M: fmt::Display>(message: M) -> Self {
        Self::new(Message(message.to_string()))
    }

    /// Builds the error reported for a list of collected errors.
    ///
    /// Returns [`None`] for an empty list, the error itself when there is exactly one, and an
    /// [`Error::Composite`] otherwise.
    pub fn from_errors(mut errors: Vec<Error>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Composite(CompositeError { errors })),
        }
    }

    /// Returns `true` if this is a user error of type `E`.
    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.downcast_ref::<E>().is_some()
    }

    /// Returns a reference to the wrapped user error if it is of type `E`.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            Self::Custom(error) => error.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Returns the collected errors if this is an [`Error::Composite`].
    pub fn as_composite(&self) -> Option<&CompositeError> {
        match self {
            Self::Composite(composite) => Some(composite),
            _ => None,
        }
    }

    /// Returns `true` if both values wrap the very same user error object.
    pub fn ptr_eq(&self, other: &Error) -> bool {
        match (self, other) {
            (Self::Custom(a), Self::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// An aggregate of two or more errors, in arrival order.
#[derive(Debug, Clone)]
pub struct CompositeError {
    errors: Vec<Error>,
}

impl CompositeError {
    /// Returns the collected errors, oldest first.
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_errors(self) -> Vec<Error> {
        self.errors
    }
}

impl fmt::Display for CompositeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred", self.errors.len())?;
        for (i, error) in self.errors.iter().enumerate() {
            write!(f, "\n  {}: {error}", i + 1)?;
        }
        Ok(())
    }
}

impl StdError for CompositeError {}
