fn main() {
    println!("Run `cargo test -p rivulet-scenarios` to execute the download scenarios.");
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor, Read};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use rivulet_protocol::DownloadStatus;
    use rivulet_transfer::{
        Download, DownloadConfig, DownloadCtrl, Failure, InlineExecutor, ThreadExecutor,
        TokioExecutor, TransferError, calculate_file_checksum, checksum_bytes, resume_offset_of,
    };
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(5);

    // --- Readers ---

    enum Feed {
        Data(&'static [u8]),
        Fail(io::ErrorKind),
    }

    /// Input stream fed by the test: each read blocks until the test sends
    /// the next piece. Dropping the [`Gate`] ends the stream.
    struct GatedReader {
        rx: mpsc::Receiver<Feed>,
        pending: &'static [u8],
        blocked: Arc<AtomicUsize>,
    }

    impl Read for GatedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pending.is_empty() {
                self.blocked.fetch_add(1, Ordering::SeqCst);
                match self.rx.recv() {
                    Ok(Feed::Data(data)) => self.pending = data,
                    Ok(Feed::Fail(kind)) => return Err(io::Error::new(kind, "injected")),
                    Err(_) => return Ok(0),
                }
            }
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending = &self.pending[n..];
            Ok(n)
        }
    }

    /// Test side of a [`GatedReader`].
    struct Gate {
        tx: mpsc::Sender<Feed>,
        blocked: Arc<AtomicUsize>,
    }

    impl Gate {
        fn send(&self, feed: Feed) -> Result<(), mpsc::SendError<Feed>> {
            self.tx.send(feed)
        }

        /// Waits until the reader has blocked for input `n` times, i.e. the
        /// engine is inside its `n`-th waiting read and past its status check.
        fn wait_blocked(&self, n: usize) {
            let deadline = Instant::now() + WAIT;
            while self.blocked.load(Ordering::SeqCst) < n {
                assert!(Instant::now() < deadline, "reader never blocked");
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    fn gated() -> (Gate, GatedReader) {
        let (tx, rx) = mpsc::channel();
        let blocked = Arc::new(AtomicUsize::new(0));
        let reader = GatedReader {
            rx,
            pending: &[],
            blocked: Arc::clone(&blocked),
        };
        (Gate { tx, blocked }, reader)
    }

    /// Yields `data`, then fails instead of reporting end-of-stream.
    struct FailAfter {
        data: Cursor<&'static [u8]>,
    }

    impl Read for FailAfter {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.data.read(buf)? {
                0 => Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer reset")),
                n => Ok(n),
            }
        }
    }

    // --- Outcome recording ---

    #[derive(Default)]
    struct Outcomes {
        successes: Mutex<Vec<PathBuf>>,
        failures: Mutex<Vec<(PathBuf, u64, io::ErrorKind)>>,
    }

    impl Outcomes {
        fn successes(&self) -> Vec<PathBuf> {
            self.successes.lock().unwrap().clone()
        }

        fn failures(&self) -> Vec<(PathBuf, u64, io::ErrorKind)> {
            self.failures.lock().unwrap().clone()
        }

        fn total(&self) -> usize {
            self.successes().len() + self.failures().len()
        }
    }

    fn recorded(download: Download, outcomes: &Arc<Outcomes>) -> Download {
        let s = Arc::clone(outcomes);
        let f = Arc::clone(outcomes);
        download
            .on_success(move |path| s.successes.lock().unwrap().push(path))
            .on_failure(move |failure: Failure| {
                f.failures.lock().unwrap().push((
                    failure.path().to_path_buf(),
                    failure.done_bytes(),
                    failure.error().kind(),
                ))
            })
    }

    fn inline(path: &Path, input: impl Read + Send + 'static, skip: u64) -> Download {
        Download::new(path, input, Arc::new(InlineExecutor), skip)
    }

    fn join(ctrl: &DownloadCtrl) -> DownloadStatus {
        ctrl.join().unwrap()
    }

    // --- Scenarios ---

    #[test]
    fn scenario_a_uninterrupted_transfer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        let outcomes = Arc::new(Outcomes::default());

        let ctrl = recorded(inline(&path, Cursor::new(b"HELLO WORLD"), 0), &outcomes)
            .chunk_size(4)
            .start()
            .unwrap();

        assert_eq!(join(&ctrl), DownloadStatus::Done);
        assert_eq!(ctrl.done_bytes(), 11);
        assert_eq!(std::fs::read(&path).unwrap(), b"HELLO WORLD");
        assert_eq!(outcomes.successes(), vec![path]);
        assert!(outcomes.failures().is_empty());
    }

    #[test]
    fn scenario_b_resume_from_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"HELLO").unwrap();
        let outcomes = Arc::new(Outcomes::default());

        let ctrl = recorded(inline(&path, Cursor::new(b" WORLD"), 5), &outcomes)
            .resume_breakpoint()
            .start()
            .unwrap();

        assert_eq!(join(&ctrl), DownloadStatus::Done);
        assert_eq!(ctrl.done_bytes(), 11);
        assert_eq!(std::fs::read(&path).unwrap(), b"HELLO WORLD");
        assert_eq!(outcomes.successes().len(), 1);
    }

    #[test]
    fn scenario_b_via_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"HELLO").unwrap();
        let config = DownloadConfig::from_json(
            r#"{"chunkSize":2,"resumeFromOffset":true,"filePointer":5}"#,
        )
        .unwrap();

        let ctrl = inline(&path, Cursor::new(b" WORLD"), 0)
            .with_config(&config)
            .start()
            .unwrap();

        assert_eq!(join(&ctrl), DownloadStatus::Done);
        assert_eq!(std::fs::read(&path).unwrap(), b"HELLO WORLD");
    }

    #[test]
    fn scenario_c_offset_clamped_to_length() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"HELLO").unwrap();
        let (tx, reader) = gated();

        let ctrl = inline(&path, reader, 100)
            .resume_breakpoint()
            .start()
            .unwrap();

        // The engine seeks before its first read, which blocks on the gate.
        assert_eq!(ctrl.wait_for_bytes(5, WAIT), 5);
        assert_eq!(ctrl.done_bytes(), 5);

        tx.send(Feed::Data(b" WORLD")).unwrap();
        drop(tx);
        assert_eq!(join(&ctrl), DownloadStatus::Done);
        assert_eq!(ctrl.done_bytes(), 11);
        assert_eq!(std::fs::read(&path).unwrap(), b"HELLO WORLD");
    }

    #[test]
    fn resume_offset_equal_to_length_is_noop_seek() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"HELLO").unwrap();

        let ctrl = inline(&path, Cursor::new(b""), 5)
            .resume_breakpoint()
            .start()
            .unwrap();

        assert_eq!(join(&ctrl), DownloadStatus::Done);
        assert_eq!(ctrl.done_bytes(), 5);
        assert_eq!(std::fs::read(&path).unwrap(), b"HELLO");
    }

    #[test]
    fn scenario_d_cancel_mid_transfer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        let outcomes = Arc::new(Outcomes::default());
        let (tx, reader) = gated();

        let ctrl = recorded(inline(&path, reader, 0), &outcomes)
            .chunk_size(4)
            .start()
            .unwrap();

        tx.send(Feed::Data(b"HEL")).unwrap();
        assert_eq!(ctrl.wait_for_bytes(3, WAIT), 3);

        assert!(ctrl.cancel());
        assert!(!ctrl.cancel());
        assert_eq!(ctrl.status(), DownloadStatus::Canceled);

        drop(tx);
        assert_eq!(join(&ctrl), DownloadStatus::Canceled);
        assert!(!path.exists());
        assert_eq!(outcomes.total(), 0);
    }

    #[test]
    fn scenario_e_read_error_keeps_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        let outcomes = Arc::new(Outcomes::default());
        let input = FailAfter {
            data: Cursor::new(&b"HELLO W"[..]),
        };

        let ctrl = recorded(inline(&path, input, 0), &outcomes)
            .chunk_size(4)
            .start()
            .unwrap();

        assert_eq!(join(&ctrl), DownloadStatus::Error);
        assert_eq!(
            outcomes.failures(),
            vec![(path.clone(), 7, io::ErrorKind::ConnectionReset)]
        );
        assert!(outcomes.successes().is_empty());
        assert_eq!(std::fs::read(&path).unwrap(), b"HELLO W");
    }

    #[test]
    fn caller_restarts_after_error_with_resume_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");

        let first = inline(&path, FailAfter { data: Cursor::new(&b"HELLO W"[..]) }, 0)
            .on_failure(|_| {})
            .start()
            .unwrap();
        assert_eq!(join(&first), DownloadStatus::Error);

        // The caller asks the server for the remaining range.
        let offset = resume_offset_of(&path).unwrap();
        assert_eq!(offset, 7);
        let second = inline(&path, Cursor::new(b"ORLD"), offset)
            .resume_breakpoint()
            .start()
            .unwrap();

        assert_eq!(join(&second), DownloadStatus::Done);
        assert_eq!(second.done_bytes(), 11);
        assert_eq!(std::fs::read(&path).unwrap(), b"HELLO WORLD");
    }

    #[test]
    fn unhandled_failure_is_escalated_through_join() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        let (tx, reader) = gated();

        let ctrl = inline(&path, reader, 0).start().unwrap();
        tx.send(Feed::Data(b"HELLO")).unwrap();
        tx.send(Feed::Fail(io::ErrorKind::TimedOut)).unwrap();

        match ctrl.join() {
            Err(TransferError::Unhandled(failure)) => {
                assert_eq!(failure.path(), path.as_path());
                assert_eq!(failure.done_bytes(), 5);
                assert_eq!(failure.error().kind(), io::ErrorKind::TimedOut);
            }
            other => panic!("expected unhandled failure, got {other:?}"),
        }
        assert_eq!(ctrl.status(), DownloadStatus::Error);
        assert!(path.exists());

        // Only the first join sees the escalated error.
        assert_eq!(join(&ctrl), DownloadStatus::Error);
    }

    #[test]
    fn unjoined_unhandled_failure_reaches_panic_hook() {
        static REPORTS: Mutex<Vec<String>> = Mutex::new(Vec::new());
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            REPORTS.lock().unwrap().push(info.to_string());
            previous(info);
        }));

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("unjoined.txt");
        let input = FailAfter {
            data: Cursor::new(&b"HEL"[..]),
        };
        let ctrl = inline(&path, input, 0).start().unwrap();
        assert_eq!(ctrl.wait_terminal(), DownloadStatus::Error);
        drop(ctrl);

        let needle = path.display().to_string();
        let deadline = Instant::now() + WAIT;
        let report = loop {
            let found = REPORTS
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.contains(&needle))
                .cloned();
            if let Some(report) = found {
                break report;
            }
            assert!(Instant::now() < deadline, "failure was never reported");
            std::thread::sleep(Duration::from_millis(5));
        };
        assert!(report.contains("unhandled download failure"));
        assert!(report.contains("after 3 bytes"));
    }

    // --- Pause / resume ---

    #[test]
    fn pause_then_resume_matches_uninterrupted_run() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        let outcomes = Arc::new(Outcomes::default());
        let (tx, reader) = gated();

        let ctrl = recorded(inline(&path, reader, 0), &outcomes).start().unwrap();

        tx.send(Feed::Data(b"HELLO")).unwrap();
        assert_eq!(ctrl.wait_for_bytes(5, WAIT), 5);

        tx.wait_blocked(2);
        assert!(ctrl.pause());
        assert!(!ctrl.pause());
        assert_eq!(ctrl.status(), DownloadStatus::Paused);

        // The read in flight when pausing completes and is kept.
        tx.send(Feed::Data(b" WORLD")).unwrap();
        assert_eq!(ctrl.wait_for_bytes(11, WAIT), 11);
        drop(tx);

        // End-of-stream is not observed while paused.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(ctrl.status(), DownloadStatus::Paused);
        assert_eq!(ctrl.done_bytes(), 11);
        assert!(outcomes.successes().is_empty());

        assert!(ctrl.resume());
        assert!(!ctrl.resume());
        assert_eq!(join(&ctrl), DownloadStatus::Done);
        assert_eq!(ctrl.done_bytes(), 11);
        assert_eq!(
            calculate_file_checksum(&path).unwrap(),
            checksum_bytes(b"HELLO WORLD")
        );
        assert_eq!(outcomes.successes().len(), 1);
    }

    #[test]
    fn paused_engine_does_not_consume_input() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc.bin");
        let (tx, reader) = gated();

        let ctrl = inline(&path, reader, 0).chunk_size(4).start().unwrap();

        tx.send(Feed::Data(b"AAAA")).unwrap();
        assert_eq!(ctrl.wait_for_bytes(4, WAIT), 4);
        tx.wait_blocked(2);
        ctrl.pause();

        tx.send(Feed::Data(b"BBBB")).unwrap();
        assert_eq!(ctrl.wait_for_bytes(8, WAIT), 8);

        tx.send(Feed::Data(b"CCCC")).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(ctrl.done_bytes(), 8);

        ctrl.resume();
        assert_eq!(ctrl.wait_for_bytes(12, WAIT), 12);
        drop(tx);
        assert_eq!(join(&ctrl), DownloadStatus::Done);
        assert_eq!(std::fs::read(&path).unwrap(), b"AAAABBBBCCCC");
    }

    #[test]
    fn read_error_while_paused_keeps_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        let outcomes = Arc::new(Outcomes::default());
        let (tx, reader) = gated();

        let ctrl = recorded(inline(&path, reader, 0), &outcomes).start().unwrap();
        tx.send(Feed::Data(b"HELLO")).unwrap();
        assert_eq!(ctrl.wait_for_bytes(5, WAIT), 5);

        // Pause while the engine is blocked in `read`, then fail that read.
        tx.wait_blocked(2);
        assert!(ctrl.pause());
        tx.send(Feed::Fail(io::ErrorKind::ConnectionReset)).unwrap();

        assert_eq!(join(&ctrl), DownloadStatus::Error);
        assert_eq!(
            outcomes.failures(),
            vec![(path.clone(), 5, io::ErrorKind::ConnectionReset)]
        );
        assert!(outcomes.successes().is_empty());
        assert_eq!(std::fs::read(&path).unwrap(), b"HELLO");
        assert!(!ctrl.resume());
    }

    #[test]
    fn cancel_while_paused_deletes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        let outcomes = Arc::new(Outcomes::default());
        let (tx, reader) = gated();

        let ctrl = recorded(inline(&path, reader, 0), &outcomes).start().unwrap();
        tx.send(Feed::Data(b"HELLO")).unwrap();
        assert_eq!(ctrl.wait_for_bytes(5, WAIT), 5);

        tx.wait_blocked(2);
        ctrl.pause();
        tx.send(Feed::Data(b" WORLD")).unwrap();
        assert_eq!(ctrl.wait_for_bytes(11, WAIT), 11);

        // The engine is now parked; cancel must wake it.
        assert!(ctrl.cancel());
        assert_eq!(join(&ctrl), DownloadStatus::Canceled);
        assert!(!path.exists());
        assert_eq!(outcomes.total(), 0);
        drop(tx);
    }

    #[test]
    fn cancel_latency_is_bounded_by_blocking_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        let (tx, reader) = gated();

        let ctrl = inline(&path, reader, 0).start().unwrap();
        tx.send(Feed::Data(b"HELLO")).unwrap();
        assert_eq!(ctrl.wait_for_bytes(5, WAIT), 5);

        ctrl.cancel();
        // The engine is still blocked in `read` and holds the file.
        std::thread::sleep(Duration::from_millis(50));
        assert!(path.exists());

        // Once the read returns the cancel is observed.
        tx.send(Feed::Data(b" WORLD")).unwrap();
        assert_eq!(join(&ctrl), DownloadStatus::Canceled);
        assert!(!path.exists());
    }

    #[test]
    fn illegal_transitions_leave_status_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        let (tx, reader) = gated();

        let ctrl = inline(&path, reader, 0).start().unwrap();
        assert!(!ctrl.resume());
        assert_eq!(ctrl.status(), DownloadStatus::Downloading);

        drop(tx);
        assert_eq!(join(&ctrl), DownloadStatus::Done);
        assert!(!ctrl.pause());
        assert!(!ctrl.resume());
        assert!(!ctrl.cancel());
        assert_eq!(ctrl.status(), DownloadStatus::Done);
        assert!(path.exists());
    }

    // --- Outcomes and executors ---

    #[test]
    fn exactly_one_outcome_per_transfer() {
        let dir = TempDir::new().unwrap();
        let outcomes = Arc::new(Outcomes::default());

        let ok = recorded(
            inline(&dir.path().join("ok"), Cursor::new(b"data"), 0),
            &outcomes,
        )
        .start()
        .unwrap();
        let failed = recorded(
            inline(
                &dir.path().join("failed"),
                FailAfter {
                    data: Cursor::new(&b"da"[..]),
                },
                0,
            ),
            &outcomes,
        )
        .start()
        .unwrap();

        join(&ok);
        join(&failed);
        assert_eq!(outcomes.successes().len(), 1);
        assert_eq!(outcomes.failures().len(), 1);
        assert_eq!(outcomes.total(), 2);
    }

    #[test]
    fn large_transfer_through_thread_executor() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("large.bin");
        let data: Vec<u8> = (0..1_000_003u32).map(|i| (i % 251) as u8).collect();
        let expected = checksum_bytes(&data);
        let (done_tx, done_rx) = mpsc::channel();

        let ctrl = Download::new(&path, Cursor::new(data), Arc::new(ThreadExecutor), 0)
            .chunk_size(1000)
            .total_bytes(1_000_003)
            .on_success(move |p| done_tx.send(p).unwrap())
            .start()
            .unwrap();

        let delivered = done_rx.recv_timeout(WAIT).unwrap();
        assert_eq!(delivered, path);
        assert_eq!(join(&ctrl), DownloadStatus::Done);
        assert_eq!(ctrl.done_bytes(), 1_000_003);
        assert_eq!(calculate_file_checksum(&path).unwrap(), expected);
        assert!((ctrl.progress().percentage() - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn outcome_delivered_on_tokio_runtime() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        let (tx, rx) = tokio::sync::oneshot::channel();
        let executor = TokioExecutor::current().unwrap();

        let _ctrl = Download::new(&path, Cursor::new(b"HELLO WORLD"), Arc::new(executor), 0)
            .on_success(move |p| {
                let _ = tx.send(p);
            })
            .start()
            .unwrap();

        let delivered = tokio::time::timeout(WAIT, rx).await.unwrap().unwrap();
        assert_eq!(delivered, path);
        assert_eq!(std::fs::read(&path).unwrap(), b"HELLO WORLD");
    }
}
