use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

/// Error from a collapsed computation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FlightError<E> {
    /// The leader task was dropped or panicked before producing a result.
    #[error("single-flight leader dropped before completing")]
    LeaderFailed,
    #[error("{0}")]
    Inner(E),
}

/// Collapses concurrent duplicate computations for the same key into one
/// in-flight execution; every waiter observes the leader's result (or its
/// error).
#[derive(Clone)]
pub struct SingleFlight<K, V, E>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    group: Arc<async_singleflight::Group<K, V, E>>,
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            group: Arc::new(async_singleflight::Group::new()),
        }
    }

    /// Run `fut` for `key` unless an identical computation is already in
    /// flight, in which case wait for that one instead.
    pub async fn run<Fut>(&self, key: K, fut: Fut) -> Result<V, FlightError<E>>
    where
        Fut: std::future::Future<Output = Result<V, E>> + Send,
    {
        // Group::work returns Err(Some(e)) for an inner error and Err(None)
        // when the leader was dropped after the library's retry attempts.
        self.group.work(&key, fut).await.map_err(|opt| match opt {
            Some(inner) => FlightError::Inner(inner),
            None => FlightError::LeaderFailed,
        })
    }
}

impl<K, V, E> Default for SingleFlight<K, V, E>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
