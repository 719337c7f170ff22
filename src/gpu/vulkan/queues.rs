use ash::vk;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::gpu::queue_family::{PlannedPool, QueueCaps};

use super::Result;

/// Caller-supplied queue locking, used when the device's queues are shared
/// with an outer application that has its own synchronization. When
/// installed, the backend creates no internal mutexes and brackets every
/// queue submission with these callbacks instead.
pub trait QueueLock: Send + Sync {
    fn lock(&self, family: u32, index: u32);
    fn unlock(&self, family: u32, index: u32);
}

/// One command pool per distinct queue family, plus the queues taken from
/// that family and (unless locking is external) one mutex per queue.
pub struct QueuePool {
    device: ash::Device,
    family: u32,
    caps: QueueCaps,
    pool: vk::CommandPool,
    queues: Vec<vk::Queue>,
    locks: Vec<Mutex<()>>,
}

impl QueuePool {
    pub(crate) fn new(
        device: &ash::Device,
        planned: &PlannedPool,
        external_lock: bool,
    ) -> Result<Self> {
        let pool_ci = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(planned.family)
            .flags(
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                    | vk::CommandPoolCreateFlags::TRANSIENT,
            );
        let pool = unsafe { device.create_command_pool(&pool_ci, None) }?;

        let queues = (0..planned.queue_count)
            .map(|index| unsafe { device.get_device_queue(planned.family, index) })
            .collect();

        let locks = if external_lock {
            Vec::new()
        } else {
            (0..planned.queue_count).map(|_| Mutex::new(())).collect()
        };

        Ok(Self {
            device: device.clone(),
            family: planned.family,
            caps: planned.caps,
            pool,
            queues,
            locks,
        })
    }

    pub fn family(&self) -> u32 {
        self.family
    }

    pub fn caps(&self) -> QueueCaps {
        self.caps
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.pool
    }

    pub fn queue(&self, index: usize) -> Option<vk::Queue> {
        self.queues.get(index).copied()
    }

    pub(crate) fn lock_index(&self, index: usize) -> Option<MutexGuard<'_, ()>> {
        self.locks
            .get(index)
            .map(|lock| lock.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Drop for QueuePool {
    fn drop(&mut self) {
        unsafe { self.device.destroy_command_pool(self.pool, None) };
    }
}

enum GuardInner<'a> {
    Internal(#[allow(dead_code)] MutexGuard<'a, ()>),
    External(&'a dyn QueueLock),
}

/// Exclusive access to one `(family, index)` queue slot. Submissions to the
/// underlying queue are only safe while a guard for that slot is held.
pub struct QueueGuard<'a> {
    queue: vk::Queue,
    family: u32,
    index: u32,
    inner: GuardInner<'a>,
}

impl<'a> QueueGuard<'a> {
    pub(crate) fn internal(
        queue: vk::Queue,
        family: u32,
        index: u32,
        guard: MutexGuard<'a, ()>,
    ) -> Self {
        Self {
            queue,
            family,
            index,
            inner: GuardInner::Internal(guard),
        }
    }

    pub(crate) fn external(
        queue: vk::Queue,
        family: u32,
        index: u32,
        lock: &'a dyn QueueLock,
    ) -> Self {
        lock.lock(family, index);
        Self {
            queue,
            family,
            index,
            inner: GuardInner::External(lock),
        }
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn family(&self) -> u32 {
        self.family
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        if let GuardInner::External(lock) = &self.inner {
            lock.unlock(self.family, self.index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingLock {
        locks: AtomicU32,
        unlocks: AtomicU32,
    }

    impl QueueLock for CountingLock {
        fn lock(&self, _family: u32, _index: u32) {
            self.locks.fetch_add(1, Ordering::SeqCst);
        }

        fn unlock(&self, _family: u32, _index: u32) {
            self.unlocks.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn external_guard_brackets_the_slot_with_callbacks() {
        let lock = CountingLock::default();
        {
            let guard = QueueGuard::external(vk::Queue::null(), 2, 1, &lock);
            assert_eq!(guard.family(), 2);
            assert_eq!(guard.index(), 1);
            assert_eq!(lock.locks.load(Ordering::SeqCst), 1);
            assert_eq!(lock.unlocks.load(Ordering::SeqCst), 0);
        }
        assert_eq!(lock.unlocks.load(Ordering::SeqCst), 1);
    }
}
