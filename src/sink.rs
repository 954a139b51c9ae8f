//! Shared output destinations.
//!
//! `SharedSink` lets any number of tasks write to one stream (stdout or stderr)
//! without their bytes tearing into each other. Each `write` call holds the lock
//! for the whole underlying write, so a complete line written in one call always
//! lands contiguously.
//!
//! Those writes block. Async callers go through [`write_blocking`] so a slow
//! terminal stalls only the writing task, not the runtime worker under it.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::{Handle, RuntimeFlavor};

/// A byte destination that can be written to and closed.
///
/// Implemented by the colorizer and by plain sinks, so per-task destinations can
/// be handled uniformly.
pub trait Sink: Write {
    /// Finishes the stream. Closing more than once must be harmless.
    fn close(&mut self) -> io::Result<()>;
}

/// A cloneable handle to one destination guarded by a mutex.
#[derive(Debug)]
pub struct SharedSink<W> {
    inner: Arc<Mutex<W>>,
}

impl<W> Clone for SharedSink<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W: Write> SharedSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    // A writer that panicked mid-write leaves the stream itself intact, so the
    // guard stays usable for everyone else.
    fn lock(&self) -> MutexGuard<'_, W> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SharedSink<Vec<u8>> {
    /// Copy of everything written so far.
    #[cfg(test)]
    pub fn contents(&self) -> Vec<u8> {
        self.lock().clone()
    }
}

impl<W: Write> Write for SharedSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut writer = self.lock();
        writer.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock().flush()
    }
}

impl<W: Write> Sink for SharedSink<W> {
    fn close(&mut self) -> io::Result<()> {
        self.flush()
    }
}

/// Runs a blocking write from async code.
///
/// On a multi-threaded runtime the worker's other tasks are handed off before
/// `f` runs. Elsewhere, including outside any runtime, `f` is called directly.
pub fn write_blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if matches!(handle.runtime_flavor(), RuntimeFlavor::MultiThread) => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_forwards_bytes() {
        let mut sink = SharedSink::new(Vec::new());
        let written = sink.write(b"abc").unwrap();
        assert_eq!(written, 3);
        assert_eq!(sink.contents(), b"abc".to_vec());
    }

    #[test]
    fn clones_share_destination() {
        let sink = SharedSink::new(Vec::new());
        let mut a = sink.clone();
        let mut b = sink.clone();
        a.write_all(b"one\n").unwrap();
        b.write_all(b"two\n").unwrap();
        assert_eq!(sink.contents(), b"one\ntwo\n".to_vec());
    }

    #[test]
    fn write_errors_are_forwarded() {
        let mut sink = SharedSink::new(BrokenPipe);
        let err = sink.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        // the guard is still usable afterwards
        assert!(sink.flush().is_ok());
    }

    #[test]
    fn survives_panicking_writer() {
        let sink = SharedSink::new(Vec::new());
        let poisoner = sink.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock();
            panic!("writer died");
        })
        .join();
        let mut after = sink.clone();
        after.write_all(b"still here").unwrap();
        assert_eq!(sink.contents(), b"still here".to_vec());
    }

    #[test]
    fn concurrent_writes_never_tear() {
        const WRITERS: usize = 8;
        const WRITES: usize = 200;
        let sink = SharedSink::new(Vec::new());
        let handles = (0..WRITERS)
            .map(|id| {
                let mut sink = sink.clone();
                std::thread::spawn(move || {
                    let marker = char::from(b'a' + id as u8);
                    let record = format!("<{}>\n", marker.to_string().repeat(64));
                    for _ in 0..WRITES {
                        sink.write_all(record.as_bytes()).unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        let contents = String::from_utf8(sink.contents()).unwrap();
        let records = contents.lines().collect::<Vec<_>>();
        assert_eq!(records.len(), WRITERS * WRITES);
        for record in records {
            let body = record
                .strip_prefix('<')
                .and_then(|rest| rest.strip_suffix('>'))
                .expect("record framing intact");
            assert_eq!(body.len(), 64);
            let first = body.as_bytes()[0];
            assert!(body.bytes().all(|b| b == first), "torn record: {}", record);
        }
    }

    #[test]
    fn write_blocking_runs_inline_outside_runtime() {
        let mut sink = SharedSink::new(Vec::new());
        write_blocking(|| sink.write_all(b"x")).unwrap();
        assert_eq!(sink.contents(), b"x".to_vec());
    }

    // A writer stuck on a full pipe must not starve the task that would unblock it.
    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn blocked_writer_leaves_runtime_responsive() {
        struct Gate(mpsc::Receiver<()>);

        impl Write for Gate {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0
                    .recv()
                    .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "gate dropped"))?;
                Ok(buf.len())
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let (release, gate) = mpsc::channel();
        let sink = SharedSink::new(Gate(gate));
        let writer = {
            let mut sink = sink.clone();
            tokio::spawn(async move { write_blocking(|| sink.write_all(b"line\n")) })
        };
        tokio::task::yield_now().await;
        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            release.send(()).unwrap();
        });
        tokio::time::timeout(Duration::from_secs(5), releaser)
            .await
            .expect("runtime kept running")
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), writer)
            .await
            .expect("write finished")
            .unwrap()
            .unwrap();
    }
}
