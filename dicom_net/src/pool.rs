use crate::link::{DimseLink, LinkFactory};
use crate::tls::TlsParams;
use crate::{Error, Result};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;
use xrc_config::{Destination, PoolSettings};

struct IdleLink {
    link: Box<dyn DimseLink>,
    since: Instant,
}

/// Bounded per-destination association pool.
///
/// At most `max_size` associations exist at once; acquisition waits up to
/// the configured timeout and then reports pool exhaustion, which the retry
/// queue treats as a transient failure. Idle associations past their
/// deadline are dropped on the next acquisition.
pub struct AssociationPool {
    destination: Destination,
    tls: Option<TlsParams>,
    factory: Arc<dyn LinkFactory>,
    settings: PoolSettings,
    abstract_syntaxes: Vec<String>,
    semaphore: Arc<Semaphore>,
    idle: Mutex<Vec<IdleLink>>,
}

impl AssociationPool {
    pub fn new(
        destination: Destination,
        tls: Option<TlsParams>,
        factory: Arc<dyn LinkFactory>,
        settings: PoolSettings,
        abstract_syntaxes: Vec<String>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(settings.max_size));
        Self {
            destination,
            tls,
            factory,
            settings,
            abstract_syntaxes,
            semaphore,
            idle: Mutex::new(vec![]),
        }
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Takes an association, reusing an idle one when possible.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledAssociation> {
        let timeout = Duration::from_millis(self.settings.acquisition_timeout_ms);
        let permit = tokio::time::timeout(
            timeout,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await
        .map_err(|_| Error::PoolExhausted(self.destination.name.clone()))?
        .map_err(|_| Error::PoolExhausted(self.destination.name.clone()))?;

        if let Some(link) = self.take_idle() {
            return Ok(PooledAssociation {
                pool: Arc::clone(self),
                link: Some(link),
                permit,
            });
        }
        let link = self
            .factory
            .connect(
                &self.destination,
                self.tls.as_ref(),
                &self.abstract_syntaxes,
            )
            .await?;
        Ok(PooledAssociation {
            pool: Arc::clone(self),
            link: Some(link),
            permit,
        })
    }

    fn take_idle(&self) -> Option<Box<dyn DimseLink>> {
        let deadline = Duration::from_millis(self.settings.idle_eviction_ms);
        let mut idle = self.idle.lock().unwrap();
        let before = idle.len();
        idle.retain(|entry| entry.since.elapsed() < deadline);
        if idle.len() != before {
            debug!(
                "Evicted {} idle association(s) to {}",
                before - idle.len(),
                self.destination.name
            );
        }
        idle.pop().map(|entry| entry.link)
    }

    fn put_back(&self, link: Box<dyn DimseLink>) {
        self.idle.lock().unwrap().push(IdleLink {
            link,
            since: Instant::now(),
        });
    }

    /// Idle associations currently parked, for monitoring.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap().len()
    }
}

/// Exclusive hold on one association.
///
/// Dropping the hold parks the association for reuse. [`PooledAssociation::discard`]
/// closes it instead, for links whose state is no longer trustworthy.
pub struct PooledAssociation {
    pool: Arc<AssociationPool>,
    link: Option<Box<dyn DimseLink>>,
    #[allow(dead_code)]
    permit: OwnedSemaphorePermit,
}

impl PooledAssociation {
    pub fn link(&mut self) -> &mut Box<dyn DimseLink> {
        self.link.as_mut().expect("link taken")
    }

    /// Closes the association instead of returning it to the pool.
    pub async fn discard(mut self) {
        if let Some(link) = self.link.take() {
            let _ = link.release().await;
        }
    }
}

impl Drop for PooledAssociation {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            self.pool.put_back(link);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockFactory;
    use xrc_config::Destination;

    fn destination() -> Destination {
        Destination {
            name: "pacs1".to_string(),
            aet: "PACS".to_string(),
            host: "10.0.0.5".to_string(),
            port: 11112,
            tls: false,
            mutual_tls: false,
            send_gsps: false,
        }
    }

    fn settings(max: usize, timeout_ms: u64) -> PoolSettings {
        PoolSettings {
            max_size: max,
            acquisition_timeout_ms: timeout_ms,
            idle_eviction_ms: 60_000,
        }
    }

    fn pool(max: usize, timeout_ms: u64) -> Arc<AssociationPool> {
        Arc::new(AssociationPool::new(
            destination(),
            None,
            Arc::new(MockFactory::default()),
            settings(max, timeout_ms),
            vec!["1.2.840.10008.5.1.4.1.1.1.1".to_string()],
        ))
    }

    #[tokio::test]
    async fn released_associations_are_reused() {
        let pool = pool(2, 1000);
        {
            let _held = pool.acquire().await.unwrap();
            assert_eq!(pool.idle_count(), 0);
        }
        assert_eq!(pool.idle_count(), 1);
        let _again = pool.acquire().await.unwrap();
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn exhausted_pool_times_out_with_pool_exhausted() {
        let pool = pool(1, 50);
        let _held = pool.acquire().await.unwrap();
        let result = pool.acquire().await;
        assert!(matches!(result, Err(Error::PoolExhausted(_))));
    }

    #[tokio::test]
    async fn discard_closes_instead_of_parking() {
        let pool = pool(1, 1000);
        let held = pool.acquire().await.unwrap();
        held.discard().await;
        assert_eq!(pool.idle_count(), 0);
        // The permit freed up, so a fresh association can be opened.
        let _again = pool.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn stale_idle_links_are_evicted() {
        let pool = Arc::new(AssociationPool::new(
            destination(),
            None,
            Arc::new(MockFactory::default()),
            PoolSettings {
                max_size: 2,
                acquisition_timeout_ms: 1000,
                idle_eviction_ms: 0,
            },
            vec![],
        ));
        {
            let _held = pool.acquire().await.unwrap();
        }
        assert_eq!(pool.idle_count(), 1);
        // With a zero idle deadline the parked link is dropped on the next
        // acquisition instead of being reused.
        let _fresh = pool.acquire().await.unwrap();
        assert_eq!(pool.idle_count(), 0);
    }
}
