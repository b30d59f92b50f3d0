// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The concurrent multi-archive driver.
//!
//! Independent archives are distributed over a bounded worker pool; each
//! archive is signed by exactly one worker. The first fatal error wins a
//! shared slot and cancels the remaining work best-effort, including
//! workers sleeping out a retry backoff. Per-archive attempts back off
//! exponentially, and a time-stamp authority failure rotates the
//! selector before the next attempt.

use {
    crate::{
        engine::{sign_jar, SignOptions, Timestamper},
        error::JarSignError,
    },
    crossbeam_queue::SegQueue,
    pkcs7::{
        timestamp::{TimeStampClient, TimeStampError, TimeStampTransport, TsaSelector},
        ContentInfo,
    },
    std::{
        path::PathBuf,
        sync::{Arc, Condvar, Mutex},
        time::Duration,
    },
};

/// The exchange half of time-stamping: URL plus message to token.
///
/// [`TimeStampClient`] implements it for any transport; tests install
/// in-memory authorities.
pub trait TsaExchange: Send + Sync {
    fn timestamp(&self, url: &str, message: &[u8]) -> Result<ContentInfo, TimeStampError>;
}

impl<T: TimeStampTransport> TsaExchange for TimeStampClient<T> {
    fn timestamp(&self, url: &str, message: &[u8]) -> Result<ContentInfo, TimeStampError> {
        TimeStampClient::timestamp(self, url, message)
    }
}

/// One attempt's timestamper: the exchange bound to the endpoint the
/// selector chose for this attempt.
struct AttemptTimestamper<'a> {
    exchange: &'a dyn TsaExchange,
    url: String,
}

impl Timestamper for AttemptTimestamper<'_> {
    fn timestamp(&self, message: &[u8]) -> Result<ContentInfo, TimeStampError> {
        self.exchange.timestamp(&self.url, message)
    }
}

const MAX_BACKOFF_EXPONENT: u32 = 20;

/// Signs batches of archives in parallel with retry and TSA failover.
pub struct SigningDriver {
    options: SignOptions,
    thread_count: usize,
    max_tries: u32,
    max_retry_delay: Duration,
    tsa: Option<(Arc<dyn TsaExchange>, Arc<TsaSelector>)>,
}

impl SigningDriver {
    pub fn new(options: SignOptions) -> Self {
        Self {
            options,
            thread_count: num_cpus::get(),
            max_tries: 1,
            max_retry_delay: Duration::from_secs(60),
            tsa: None,
        }
    }

    /// Worker pool size; clamped to at least one.
    pub fn thread_count(mut self, threads: usize) -> Self {
        self.thread_count = threads.max(1);
        self
    }

    /// Attempts per archive; clamped to at least one.
    pub fn max_tries(mut self, tries: u32) -> Self {
        self.max_tries = tries.max(1);
        self
    }

    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    /// Enables time-stamping through a set of authorities.
    pub fn timestamping(
        mut self,
        exchange: Arc<dyn TsaExchange>,
        selector: Arc<TsaSelector>,
    ) -> Self {
        self.tsa = Some((exchange, selector));
        self
    }

    /// Signs every archive, waiting for all workers.
    ///
    /// Completion order is unspecified. On any archive's final failure
    /// the first error is kept, the remaining work is cancelled
    /// best-effort, and that first error is returned.
    pub fn execute(&self, archives: &[PathBuf]) -> Result<(), JarSignError> {
        if archives.is_empty() {
            return Ok(());
        }

        let queue = SegQueue::new();
        for archive in archives {
            queue.push(archive.clone());
        }

        let cancel = CancelFlag::new();
        let first_error: Mutex<Option<JarSignError>> = Mutex::new(None);
        let workers = self.thread_count.min(archives.len()).max(1);

        log::info!(
            "signing {} archives with {} workers",
            archives.len(),
            workers
        );

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    while let Some(archive) = queue.pop() {
                        if cancel.is_set() {
                            break;
                        }
                        if let Err(error) = self.sign_with_retries(&archive, &cancel) {
                            log::error!("{}", error);
                            let mut slot = match first_error.lock() {
                                Ok(slot) => slot,
                                Err(_) => break,
                            };
                            if slot.is_none() {
                                *slot = Some(error);
                            }
                            drop(slot);
                            cancel.set();
                            break;
                        }
                    }
                });
            }
        });

        match first_error.into_inner() {
            Ok(Some(error)) => Err(error),
            _ => Ok(()),
        }
    }

    fn sign_with_retries(
        &self,
        archive: &PathBuf,
        cancel: &CancelFlag,
    ) -> Result<(), JarSignError> {
        let mut last_error = None;

        for attempt in 1..=self.max_tries {
            if cancel.is_set() {
                return Err(JarSignError::Cancelled);
            }
            if attempt > 1 {
                // Sleep min(2^k, cap) between attempts k and k+1; the
                // wait aborts early when a peer cancels the batch.
                let exponent = (attempt - 1).min(MAX_BACKOFF_EXPONENT);
                let delay = Duration::from_secs(1u64 << exponent).min(self.max_retry_delay);
                log::debug!(
                    "retrying {} (attempt {}) after {:?}",
                    archive.display(),
                    attempt,
                    delay
                );
                if cancel.wait_timeout(delay) {
                    return Err(JarSignError::Cancelled);
                }
            }

            let result = match &self.tsa {
                Some((exchange, selector)) => {
                    let url = selector.current().ok_or_else(|| {
                        JarSignError::TimeStamp(TimeStampError::Transport(
                            "no time-stamp authorities configured".into(),
                        ))
                    })?;
                    let timestamper = AttemptTimestamper {
                        exchange: exchange.as_ref(),
                        url,
                    };
                    sign_jar(archive, &self.options, Some(&timestamper))
                }
                None => sign_jar(archive, &self.options, None),
            };

            match result {
                Ok(()) => return Ok(()),
                Err(error) => {
                    // Only authority failures advance the selector.
                    if error.is_tsa_failure() {
                        if let Some((_, selector)) = &self.tsa {
                            selector.record_failure();
                        }
                    }
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or(JarSignError::Cancelled))
    }
}

/// Shared cancellation flag whose waiters wake on cancellation.
struct CancelFlag {
    state: Mutex<bool>,
    signal: Condvar,
}

impl CancelFlag {
    fn new() -> Self {
        Self {
            state: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    fn set(&self) {
        if let Ok(mut state) = self.state.lock() {
            *state = true;
        }
        self.signal.notify_all();
    }

    fn is_set(&self) -> bool {
        self.state.lock().map(|state| *state).unwrap_or(true)
    }

    /// Waits out `delay` unless cancelled first; returns whether the
    /// flag was set.
    fn wait_timeout(&self, delay: Duration) -> bool {
        let guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(_) => return true,
        };
        match self
            .signal
            .wait_timeout_while(guard, delay, |cancelled| !*cancelled)
        {
            Ok((state, _)) => *state,
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{engine, testutil},
        pkcs7::{
            oids,
            timestamp::{PkiFailureInfo, PkiStatusInfo, TimeStampResponse},
            SignedData,
        },
        std::sync::atomic::{AtomicUsize, Ordering},
    };

    fn batch(dir: &std::path::Path, count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|index| {
                let jar = dir.join(format!("app-{}.jar", index));
                let payload = format!("payload {}", index);
                let entries: &[(&str, &[u8])] = &[("a.class", payload.as_bytes())];
                testutil::write_jar(&jar, entries);
                jar
            })
            .collect()
    }

    #[test]
    fn batch_signs_all_archives() {
        let dir = tempfile::tempdir().unwrap();
        let archives = batch(dir.path(), 6);

        let driver = SigningDriver::new(SignOptions::new(Arc::new(testutil::identity())))
            .thread_count(2);
        driver.execute(&archives).unwrap();

        for archive in &archives {
            assert!(engine::is_signed(archive).unwrap());
            engine::verify_jar(archive, None).unwrap();
        }
    }

    #[test]
    fn first_error_wins_and_batch_reports_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut archives = batch(dir.path(), 9);
        // One archive is not a zip at all.
        let broken = dir.path().join("broken.jar");
        std::fs::write(&broken, b"not a zip").unwrap();
        archives.insert(4, broken.clone());

        let driver = SigningDriver::new(SignOptions::new(Arc::new(testutil::identity())))
            .thread_count(2)
            .max_tries(1);
        let error = driver.execute(&archives).unwrap_err();
        assert!(error.to_string().contains("broken.jar"));

        // The broken archive is untouched; every other archive either
        // completed or was cancelled before its rewrite.
        assert_eq!(std::fs::read(&broken).unwrap(), b"not a zip");
        for archive in archives.iter().filter(|a| *a != &broken) {
            if engine::is_signed(archive).unwrap() {
                engine::verify_jar(archive, None).unwrap();
            }
        }
    }

    /// Authority A always rejects, authority B grants; selection decides
    /// by URL.
    struct SplitAuthority {
        rejections: AtomicUsize,
    }

    impl TsaExchange for SplitAuthority {
        fn timestamp(&self, url: &str, message: &[u8]) -> Result<ContentInfo, TimeStampError> {
            if url.contains("tsa-a") {
                self.rejections.fetch_add(1, Ordering::SeqCst);
                return Err(TimeStampError::Rejected {
                    status: pkcs7::timestamp::PkiStatus::Rejection,
                    fail_info: Some(PkiFailureInfo::SystemFailure),
                });
            }
            testutil::granting_authority().timestamp(url, message)
        }
    }

    #[test]
    fn tsa_rejection_rotates_to_next_authority() {
        let dir = tempfile::tempdir().unwrap();
        let archives = batch(dir.path(), 1);

        let selector = Arc::new(TsaSelector::new(vec![
            "http://tsa-a.example".into(),
            "http://tsa-b.example".into(),
        ]));
        let authority = Arc::new(SplitAuthority {
            rejections: AtomicUsize::new(0),
        });

        let driver = SigningDriver::new(SignOptions::new(Arc::new(testutil::identity())))
            .thread_count(1)
            .max_tries(2)
            .max_retry_delay(Duration::from_millis(10))
            .timestamping(authority.clone(), selector.clone());
        driver.execute(&archives).unwrap();

        assert_eq!(authority.rejections.load(Ordering::SeqCst), 1);
        assert_eq!(selector.failure_count("http://tsa-a.example"), 1);

        // The block carries the token from the second authority.
        let mut archive =
            zip::ZipArchive::new(std::fs::File::open(&archives[0]).unwrap()).unwrap();
        let mut block = Vec::new();
        std::io::Read::read_to_end(
            &mut archive.by_name("META-INF/CODESIGN.RSA").unwrap(),
            &mut block,
        )
        .unwrap();
        let signed_data = SignedData::parse_ber(&block).unwrap();
        let unsigned = signed_data.signer_infos()[0]
            .unsigned_attributes
            .as_ref()
            .unwrap();
        assert!(unsigned.contains(&oids::OID_TIME_STAMP_TOKEN));
    }

    #[test]
    fn tsa_failures_exhaust_max_tries() {
        let dir = tempfile::tempdir().unwrap();
        let archives = batch(dir.path(), 1);

        struct AlwaysDown;
        impl TsaExchange for AlwaysDown {
            fn timestamp(&self, _: &str, _: &[u8]) -> Result<ContentInfo, TimeStampError> {
                Err(TimeStampError::Timeout)
            }
        }

        let selector = Arc::new(TsaSelector::new(vec!["http://tsa.example".into()]));
        let driver = SigningDriver::new(SignOptions::new(Arc::new(testutil::identity())))
            .max_tries(3)
            .max_retry_delay(Duration::from_millis(5))
            .timestamping(Arc::new(AlwaysDown), selector.clone());

        let error = driver.execute(&archives).unwrap_err();
        assert!(error.is_tsa_failure());
        assert_eq!(selector.failure_count("http://tsa.example"), 3);
        // The archive was never rewritten.
        assert!(!engine::is_signed(&archives[0]).unwrap());
    }

    #[test]
    fn backoff_exponent_is_clamped() {
        // Attempt 25 sleeps the same as attempt 21: min(2^20, cap).
        let cap = Duration::from_secs(3);
        for attempt in [21u32, 25u32] {
            let exponent = (attempt - 1).min(MAX_BACKOFF_EXPONENT);
            assert_eq!(exponent, 20);
            let delay = Duration::from_secs(1u64 << exponent).min(cap);
            assert_eq!(delay, cap);
        }
    }

    #[test]
    fn rejection_responses_round_trip_fail_info() {
        let rejection = TimeStampResponse {
            status: PkiStatusInfo::rejection(PkiFailureInfo::SystemFailure, "down"),
            token: None,
        };
        let der = rejection.to_der().unwrap();
        let back = TimeStampResponse::parse_der(&der).unwrap();
        assert!(!back.status.status.is_granted());
        assert_eq!(back.status.fail_info, Some(PkiFailureInfo::SystemFailure));
    }
}
