use parking_lot::{Condvar, Mutex};

/// Counting semaphore bounding simultaneous disk operations independently
/// of the worker pool size.
pub struct DiskSemaphore {
    available: Mutex<usize>,
    released: Condvar,
    capacity: usize,
}

/// Returned by [`DiskSemaphore::acquire`]; the permit goes back on drop.
pub struct DiskPermit<'a> {
    semaphore: &'a DiskSemaphore,
}

impl DiskSemaphore {
    pub fn new(permits: usize) -> Self {
        let capacity = permits.max(1);
        Self {
            available: Mutex::new(capacity),
            released: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        *self.available.lock()
    }

    /// Block until a permit is free.
    pub fn acquire(&self) -> DiskPermit<'_> {
        let mut available = self.available.lock();
        while *available == 0 {
            self.released.wait(&mut available);
        }
        *available -= 1;
        DiskPermit { semaphore: self }
    }
}

impl Drop for DiskPermit<'_> {
    fn drop(&mut self) {
        let mut available = self.semaphore.available.lock();
        *available += 1;
        self.semaphore.released.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_permits_are_returned_on_drop() {
        let sem = DiskSemaphore::new(2);
        let a = sem.acquire();
        let b = sem.acquire();
        assert_eq!(sem.available(), 0);
        drop(a);
        assert_eq!(sem.available(), 1);
        drop(b);
        assert_eq!(sem.available(), 2);
    }

    #[test]
    fn test_zero_permits_means_one() {
        assert_eq!(DiskSemaphore::new(0).capacity(), 1);
    }

    #[test]
    fn test_bounds_concurrency() {
        let sem = DiskSemaphore::new(2);
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    let _permit = sem.acquire();
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(10));
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(sem.available(), 2);
    }
}
