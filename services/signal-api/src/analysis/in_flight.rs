use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Number of analysis runs currently executing.
///
/// Observational only; nothing is refused when it grows.
#[derive(Debug, Clone, Default)]
pub struct InFlightGauge {
    count: Arc<AtomicUsize>,
}

impl InFlightGauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one run until the returned guard is dropped
    pub fn enter(&self) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            count: self.count.clone(),
        }
    }

    pub fn current(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct InFlightGuard {
    count: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_counts_while_alive() {
        let gauge = InFlightGauge::new();
        let a = gauge.enter();
        let b = gauge.enter();
        assert_eq!(gauge.current(), 2);
        drop(a);
        assert_eq!(gauge.current(), 1);
        drop(b);
        assert_eq!(gauge.current(), 0);
    }

    #[tokio::test]
    async fn test_guard_released_when_task_panics() {
        let gauge = InFlightGauge::new();
        let inner = gauge.clone();
        let handle = tokio::spawn(async move {
            let _guard = inner.enter();
            panic!("analysis blew up");
        });
        assert!(handle.await.is_err());
        assert_eq!(gauge.current(), 0);
    }
}
