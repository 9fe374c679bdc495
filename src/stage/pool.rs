//! Pool of engine handles owned by one activation
//!
//! Each handle is checked out by at most one `process` call at a time, so no
//! two recognize calls ever run on the same handle.

use parking_lot::{Condvar, Mutex};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, warn};

use crate::config::EngineConfig;
use crate::engine::{EngineFactory, EngineHandle};
use crate::error::EngineError;

struct PoolState {
    idle: Vec<EngineHandle>,
    /// Handles that exist, idle or checked out
    live: usize,
    closed: bool,
    next_id: usize,
}

pub(crate) struct EnginePool {
    state: Mutex<PoolState>,
    available: Condvar,
    factory: Arc<dyn EngineFactory>,
    config: EngineConfig,
}

impl EnginePool {
    /// Build `size` handles; on any failure the ones already built are released
    pub fn open(
        factory: Arc<dyn EngineFactory>,
        config: EngineConfig,
        size: usize,
    ) -> Result<Arc<Self>, EngineError> {
        let mut handles = Vec::with_capacity(size);
        for id in 0..size {
            match EngineHandle::open(factory.as_ref(), &config, id) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    for handle in handles {
                        handle.release();
                    }
                    return Err(err);
                }
            }
        }

        Ok(Arc::new(Self {
            state: Mutex::new(PoolState {
                idle: handles,
                live: size,
                closed: false,
                next_id: size,
            }),
            available: Condvar::new(),
            factory,
            config,
        }))
    }

    /// Take an idle handle, blocking until one is returned
    #[cfg(test)]
    pub fn checkout(self: &Arc<Self>) -> Result<PooledHandle, EngineError> {
        self.checkout_until(None)
    }

    /// Take an idle handle, giving up with `TimedOut` once `deadline` passes.
    /// The deadline is `(instant, budget)`; the budget is what gets reported.
    pub fn checkout_until(
        self: &Arc<Self>,
        deadline: Option<(Instant, Duration)>,
    ) -> Result<PooledHandle, EngineError> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(EngineError::backend("engine pool has been released"));
            }
            if let Some(handle) = state.idle.pop() {
                return Ok(PooledHandle {
                    handle: Some(handle),
                    pool: Arc::clone(self),
                });
            }
            if state.live == 0 {
                return Err(EngineError::backend("no engine handles left in the pool"));
            }
            match deadline {
                Some((at, budget)) => {
                    let waited = self.available.wait_until(&mut state, at);
                    if waited.timed_out() && state.idle.is_empty() && !state.closed {
                        return Err(EngineError::TimedOut(budget.as_millis() as u64));
                    }
                }
                None => self.available.wait(&mut state),
            }
        }
    }

    fn checkin(&self, handle: EngineHandle) {
        let handle = if handle.is_poisoned() {
            self.replace(handle)
        } else {
            Some(handle)
        };

        let mut state = self.state.lock();
        match handle {
            Some(handle) => state.idle.push(handle),
            None => state.live -= 1,
        }
        self.available.notify_all();
    }

    /// Release a poisoned handle and build a fresh one in its place
    fn replace(&self, handle: EngineHandle) -> Option<EngineHandle> {
        let old_id = handle.id();
        handle.release();

        let id = {
            let mut state = self.state.lock();
            if state.closed {
                return None;
            }
            state.next_id += 1;
            state.next_id - 1
        };

        warn!("Rebuilding ALPR engine #{} as #{}", old_id, id);
        match EngineHandle::open(self.factory.as_ref(), &self.config, id) {
            Ok(fresh) => Some(fresh),
            Err(err) => {
                error!("Failed to rebuild ALPR engine #{}: {}", old_id, err);
                None
            }
        }
    }

    /// Close the pool, wait for every checked-out handle and release them all.
    /// Returns the number of handles released.
    pub fn drain(&self) -> usize {
        let handles = {
            let mut state = self.state.lock();
            state.closed = true;
            while state.idle.len() < state.live {
                self.available.wait(&mut state);
            }
            state.live = 0;
            std::mem::take(&mut state.idle)
        };

        let count = handles.len();
        for handle in handles {
            handle.release();
        }
        count
    }

    #[cfg(test)]
    pub fn live(&self) -> usize {
        self.state.lock().live
    }
}

/// Checked-out handle, returned to its pool on drop
pub(crate) struct PooledHandle {
    handle: Option<EngineHandle>,
    pool: Arc<EnginePool>,
}

impl Deref for PooledHandle {
    type Target = EngineHandle;

    fn deref(&self) -> &Self::Target {
        self.handle.as_ref().expect("handle present until drop")
    }
}

impl DerefMut for PooledHandle {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.handle.as_mut().expect("handle present until drop")
    }
}

impl Drop for PooledHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.checkin(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::ScriptedFactory;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn pool_with(factory: ScriptedFactory, size: usize) -> Arc<EnginePool> {
        EnginePool::open(Arc::new(factory), EngineConfig::default(), size).unwrap()
    }

    #[test]
    fn test_open_builds_all_handles() {
        let factory = ScriptedFactory::default();
        let probe = factory.probe();
        let pool = pool_with(factory, 3);

        assert_eq!(pool.live(), 3);
        assert_eq!(probe.created.load(Ordering::SeqCst), 3);
        assert_eq!(pool.drain(), 3);
        assert_eq!(probe.unloads.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_failed_open_releases_built_handles() {
        let factory = ScriptedFactory::default().fail_on_create(2);
        let probe = factory.probe();

        let result = EnginePool::open(Arc::new(factory), EngineConfig::default(), 3);
        assert!(result.is_err());
        assert_eq!(probe.unloads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_checkout_returns_on_drop() {
        let pool = pool_with(ScriptedFactory::default(), 1);
        {
            let handle = pool.checkout().unwrap();
            assert_eq!(handle.id(), 0);
        }
        let again = pool.checkout().unwrap();
        assert_eq!(again.id(), 0);
    }

    #[test]
    fn test_checkout_blocks_until_returned() {
        let pool = pool_with(ScriptedFactory::default(), 1);
        let held = pool.checkout().unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || pool.checkout().map(|h| h.id()))
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        drop(held);
        assert_eq!(waiter.join().unwrap().unwrap(), 0);
    }

    #[test]
    fn test_checkout_until_gives_up_at_deadline() {
        let pool = pool_with(ScriptedFactory::default(), 1);
        let held = pool.checkout().unwrap();

        let budget = Duration::from_millis(30);
        let start = Instant::now();
        let err = pool.checkout_until(Some((start + budget, budget))).err().unwrap();

        assert!(matches!(err, EngineError::TimedOut(30)));
        assert!(start.elapsed() >= budget);
        assert!(start.elapsed() < Duration::from_secs(1));

        drop(held);
        let handle = pool
            .checkout_until(Some((Instant::now() + budget, budget)))
            .unwrap();
        assert_eq!(handle.id(), 0);
    }

    #[test]
    fn test_poisoned_handle_is_rebuilt() {
        let factory = ScriptedFactory::default();
        let probe = factory.probe();
        let pool = pool_with(factory, 1);

        {
            let mut handle = pool.checkout().unwrap();
            handle.poison();
        }

        let handle = pool.checkout().unwrap();
        assert_eq!(handle.id(), 1);
        assert!(!handle.is_poisoned());
        assert_eq!(probe.created.load(Ordering::SeqCst), 2);
        assert_eq!(probe.unloads.load(Ordering::SeqCst), 1);
        drop(handle);
        assert_eq!(pool.drain(), 1);
    }

    #[test]
    fn test_failed_rebuild_shrinks_pool() {
        // creation #1 is the rebuild
        let pool = pool_with(ScriptedFactory::default().fail_on_create(1), 1);
        {
            let mut handle = pool.checkout().unwrap();
            handle.poison();
        }

        assert_eq!(pool.live(), 0);
        assert!(pool.checkout().is_err());
        assert_eq!(pool.drain(), 0);
    }

    #[test]
    fn test_drain_waits_for_checked_out_handles() {
        let factory = ScriptedFactory::default();
        let probe = factory.probe();
        let pool = pool_with(factory, 2);
        let held = pool.checkout().unwrap();

        let drainer = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || pool.drain())
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!drainer.is_finished());
        drop(held);

        assert_eq!(drainer.join().unwrap(), 2);
        assert_eq!(probe.unloads.load(Ordering::SeqCst), 2);
        assert!(pool.checkout().is_err());
    }
}
