//! Fan-out joins.

use std::time::{Duration, Instant};

use crate::error::PortsError;
use crate::future::PortsFuture;

/// Non-blocking outcome of one future of a [`Fork`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The call completed with a value.
    Value(T),
    /// The call failed.
    Failure(PortsError),
    /// The call has not completed yet.
    NotYetAvailable,
}

impl<T> Outcome<T> {
    /// Returns `true` for [`Outcome::Value`].
    pub fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    /// Returns `true` for [`Outcome::Failure`].
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}

/// A join point over requests issued concurrently.
///
/// A fork is typically obtained from [`Request::fork`], which issues one
/// asynchronous call per payload. The results are retrieved in issue order.
/// A fork cannot be cancelled: the calls run to completion whether or not
/// their results are retrieved.
///
/// [`Request::fork`]: crate::ports::Request::fork
#[derive(Debug)]
pub struct Fork<T> {
    futures: Vec<PortsFuture<T>>,
}

impl<T> Fork<T> {
    pub(crate) fn new() -> Self {
        Self {
            futures: Vec::new(),
        }
    }

    pub(crate) fn add(&mut self, future: PortsFuture<T>) {
        self.futures.push(future);
    }

    /// Number of joined futures.
    pub fn len(&self) -> usize {
        self.futures.len()
    }

    /// Returns `true` if the fork joins no future.
    pub fn is_empty(&self) -> bool {
        self.futures.is_empty()
    }

    /// Returns `true` if every future has completed.
    pub fn is_done(&self) -> bool {
        self.futures.iter().all(PortsFuture::is_done)
    }

    /// Always returns `false`: forks cannot be cancelled.
    pub fn cancel(&self) -> bool {
        false
    }

    /// Always returns `false`: forks cannot be cancelled.
    pub fn is_cancelled(&self) -> bool {
        false
    }

    /// Waits for every future in order and returns all values.
    ///
    /// The first failure met in order is returned; the futures that follow it
    /// are not waited for.
    pub fn get_all(self) -> Result<Vec<T>, PortsError> {
        self.futures.into_iter().map(PortsFuture::get).collect()
    }

    /// Like [`get_all`](Fork::get_all), within a time budget shared by all
    /// futures.
    ///
    /// Exhausting the budget fails the whole join with
    /// [`PortsError::TimeoutExceeded`].
    pub fn get_all_timeout(self, timeout: Duration) -> Result<Vec<T>, PortsError> {
        let deadline = Instant::now() + timeout;

        self.futures
            .into_iter()
            .map(|mut future| {
                let remaining = deadline.saturating_duration_since(Instant::now());
                future.get_timeout(remaining)
            })
            .collect()
    }

    /// Waits for every future in order and returns one result per future.
    pub fn get_either_all(self) -> Vec<Result<T, PortsError>> {
        self.futures.into_iter().map(PortsFuture::get).collect()
    }

    /// Like [`get_either_all`](Fork::get_either_all), waiting at most
    /// `timeout` for each future.
    pub fn get_either_all_timeout(self, timeout: Duration) -> Vec<Result<T, PortsError>> {
        self.futures
            .into_iter()
            .map(|mut future| future.get_timeout(timeout))
            .collect()
    }

    /// Returns the current outcome of every future without blocking.
    pub fn get_now_either_all(&self) -> Vec<Outcome<T>>
    where
        T: Clone,
    {
        self.futures
            .iter()
            .map(|future| match future.get_now() {
                None => Outcome::NotYetAvailable,
                Some(Ok(value)) => Outcome::Value(value),
                Some(Err(err)) => Outcome::Failure(err),
            })
            .collect()
    }
}

impl<T> Default for Fork<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<PortsFuture<T>> for Fork<T> {
    fn from_iter<I: IntoIterator<Item = PortsFuture<T>>>(iter: I) -> Self {
        let mut fork = Self::new();
        for future in iter {
            fork.add(future);
        }

        fork
    }
}
