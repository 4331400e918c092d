use std::sync::atomic::{AtomicBool, Ordering};

/// Semaphore that is a no-op until configured with a non-zero capacity.
pub struct Semaphore {
    enabled: AtomicBool,
    sem: tokio::sync::Semaphore,
}

impl Semaphore {
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            sem: tokio::sync::Semaphore::const_new(0),
        }
    }

    /// Sets the capacity; 0 disables the semaphore. Values above
    /// [`tokio::sync::Semaphore::MAX_PERMITS`] are capped to it.
    pub fn setup(&self, value: usize) {
        self.enabled.store(value > 0, Ordering::Release);
        if value == 0 {
            return;
        }
        let value = value.min(tokio::sync::Semaphore::MAX_PERMITS);
        self.sem.forget_permits(self.sem.available_permits());
        self.sem.add_permits(value);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Waits for a permit that is returned when the guard is dropped.
    pub async fn acquire(&self) -> Option<tokio::sync::SemaphorePermit<'_>> {
        if !self.is_enabled() {
            return None;
        }
        // the semaphore is never closed so acquire can only fail if it was
        self.sem.acquire().await.ok()
    }

    /// Waits for a single token and burns it; tokens come back only through replenishment.
    pub async fn consume(&self) {
        if !self.is_enabled() {
            return;
        }
        if let Ok(permit) = self.sem.acquire().await {
            permit.forget();
        }
    }

    pub async fn run_replenish_thread(&self, replenish: usize, interval: std::time::Duration) {
        if !self.is_enabled() {
            return;
        }
        loop {
            tokio::time::sleep(interval).await;
            let curr_permits = self.sem.available_permits();
            if curr_permits >= replenish {
                continue;
            }
            tracing::trace!("replenishing {} tokens", replenish - curr_permits);
            self.sem.add_permits(replenish - curr_permits);
        }
    }
}
