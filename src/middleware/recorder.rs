//! Per-request response observation.
//!
//! A [`ResponseRecorder`] watches the response a service produces: the head (status) and
//! the data frames of its body. Recorders are checked out of a shared [`RecorderPool`]
//! and handed back when the [`PooledRecorder`] guard is dropped, so every exit path of a
//! request (completion, error, cancellation, panic unwind) returns exactly one recorder.

use axum::http::StatusCode;
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const DEFAULT_POOL_CAPACITY: usize = 1024;

/// Status and body observations for a single response.
#[derive(Debug)]
pub struct ResponseRecorder {
    status: StatusCode,
    observed: bool,
    bytes_written: u64,
    // Scratch space for the exit attribute set; keeps its capacity between requests.
    attributes: Vec<KeyValue>,
}

impl Default for ResponseRecorder {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            observed: false,
            bytes_written: 0,
            attributes: Vec::new(),
        }
    }
}

impl ResponseRecorder {
    /// Captures `status` if nothing has been written yet.
    ///
    /// Later calls are ignored: once a head has gone out its status cannot change.
    pub fn write_header(&mut self, status: StatusCode) {
        if !self.observed {
            self.status = status;
            self.observed = true;
        }
    }

    /// Records a body write of `len` bytes.
    ///
    /// A write before any header implies `200 OK`.
    pub fn write(&mut self, len: usize) {
        if !self.observed {
            self.write_header(StatusCode::OK);
        }
        self.bytes_written = self.bytes_written.saturating_add(len as u64);
    }

    /// The captured status, or `200 OK` if nothing was written.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn is_observed(&self) -> bool {
        self.observed
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Builds the exit attribute set: a copy of `base` followed by `extra`.
    ///
    /// `base` is only read. The returned slice borrows the recorder's own buffer.
    pub fn final_attributes<I>(&mut self, base: &[KeyValue], extra: I) -> &[KeyValue]
    where
        I: IntoIterator<Item = KeyValue>,
    {
        self.attributes.clear();
        self.attributes.extend_from_slice(base);
        self.attributes.extend(extra);
        &self.attributes
    }

    fn reset(&mut self) {
        self.status = StatusCode::OK;
        self.observed = false;
        self.bytes_written = 0;
        self.attributes.clear();
    }
}

#[derive(Debug)]
struct PoolInner {
    idle: Mutex<Vec<ResponseRecorder>>,
    capacity: usize,
    outstanding: AtomicUsize,
}

/// Shared pool of [`ResponseRecorder`]s.
///
/// Clones share the same pool. At most `capacity` idle recorders are kept; recorders
/// released beyond that are dropped.
#[derive(Clone, Debug)]
pub struct RecorderPool {
    inner: Arc<PoolInner>,
}

impl Default for RecorderPool {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_POOL_CAPACITY)
    }
}

impl RecorderPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::new()),
                capacity,
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    /// Checks out a recorder with nothing observed.
    pub fn acquire(&self) -> PooledRecorder {
        let recorder = self.inner.idle.lock().pop().unwrap_or_default();
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);

        PooledRecorder {
            recorder,
            pool: self.clone(),
        }
    }

    fn release(&self, mut recorder: ResponseRecorder) {
        recorder.reset();
        {
            let mut idle = self.inner.idle.lock();
            if idle.len() < self.inner.capacity {
                idle.push(recorder);
            }
        }
        self.inner.outstanding.fetch_sub(1, Ordering::AcqRel);
    }

    /// Number of recorders currently checked out.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Number of idle recorders waiting for reuse.
    pub fn idle(&self) -> usize {
        self.inner.idle.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

/// A checked-out recorder. Dropping it resets the recorder and returns it to the pool.
#[derive(Debug)]
pub struct PooledRecorder {
    recorder: ResponseRecorder,
    pool: RecorderPool,
}

impl Deref for PooledRecorder {
    type Target = ResponseRecorder;

    fn deref(&self) -> &ResponseRecorder {
        &self.recorder
    }
}

impl DerefMut for PooledRecorder {
    fn deref_mut(&mut self) -> &mut ResponseRecorder {
        &mut self.recorder
    }
}

impl Drop for PooledRecorder {
    fn drop(&mut self) {
        let recorder = std::mem::take(&mut self.recorder);
        self.pool.release(recorder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_ok_when_nothing_written() {
        let pool = RecorderPool::new();
        let recorder = pool.acquire();
        assert_eq!(recorder.status(), StatusCode::OK);
        assert!(!recorder.is_observed());
    }

    #[test]
    fn test_body_write_implies_ok() {
        let pool = RecorderPool::new();
        let mut recorder = pool.acquire();
        recorder.write(5);
        recorder.write_header(StatusCode::NOT_FOUND);

        assert!(recorder.is_observed());
        assert_eq!(recorder.status(), StatusCode::OK);
        assert_eq!(recorder.bytes_written(), 5);
    }

    #[test]
    fn test_first_header_wins() {
        let pool = RecorderPool::new();
        let mut recorder = pool.acquire();
        recorder.write_header(StatusCode::CREATED);
        recorder.write_header(StatusCode::INTERNAL_SERVER_ERROR);
        recorder.write(3);

        assert_eq!(recorder.status(), StatusCode::CREATED);
    }

    #[test]
    fn test_release_resets_state() {
        let pool = RecorderPool::with_capacity(1);
        {
            let mut recorder = pool.acquire();
            recorder.write_header(StatusCode::BAD_GATEWAY);
            recorder.write(10);
            let _ = recorder.final_attributes(&[KeyValue::new("k", "v")], []);
            assert_eq!(pool.outstanding(), 1);
        }
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.idle(), 1);

        let mut recorder = pool.acquire();
        assert_eq!(pool.idle(), 0);
        assert!(!recorder.is_observed());
        assert_eq!(recorder.status(), StatusCode::OK);
        assert_eq!(recorder.bytes_written(), 0);
        assert!(recorder.final_attributes(&[], []).is_empty());
    }

    #[test]
    fn test_idle_bounded_by_capacity() {
        let pool = RecorderPool::with_capacity(2);
        let held: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
        assert_eq!(pool.outstanding(), 5);
        drop(held);

        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn test_final_attributes_leave_base_untouched() {
        let pool = RecorderPool::new();
        let mut recorder = pool.acquire();
        let base = vec![KeyValue::new("http.request.method", "GET")];

        let final_attrs = recorder
            .final_attributes(&base, [KeyValue::new("http.status_code", 200_i64)])
            .to_vec();

        assert_eq!(base.len(), 1);
        assert_eq!(final_attrs.len(), 2);
        assert_eq!(final_attrs[0], base[0]);
    }

    #[test]
    fn test_release_after_panic() {
        let pool = RecorderPool::new();
        let cloned = pool.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _recorder = cloned.acquire();
            panic!("handler blew up");
        }));

        assert!(result.is_err());
        assert_eq!(pool.outstanding(), 0);
    }
}
