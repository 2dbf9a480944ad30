use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, field, info, instrument, warn, Span};
use uuid::Uuid;

use crate::error::{ResolutionError, ScanFailure};
use crate::models::{
    DecodeOutcome, InterpretedIdentifier, ResolvedScan, ScanConfig, ScanMode, ScanSessionState,
};
use crate::services::camera::{CameraSource, VideoDevice};
use crate::services::decoder::{decode_blocking, QrDecoder};
use crate::services::interpreter::PayloadInterpreter;
use crate::services::resolver::PatientResolver;
use crate::services::source::{AcquisitionSource, Candidate, FileUpload, ManualEntry};

/// Cancel handle for the periodic frame sampler.
struct SamplingTimer {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl SamplingTimer {
    fn cancel(self) {
        // Never abort: the sampler task may be the caller, mid-resolution.
        self.token.cancel();
        drop(self.handle);
    }
}

struct SessionInner {
    /// Bumped whenever the session is replaced; results carrying an older
    /// generation are discarded.
    generation: u64,
    session_id: Uuid,
    source: Option<Box<dyn AcquisitionSource>>,
    sampler: Option<SamplingTimer>,
}

enum SampleStep {
    Continue,
    Stop,
    Resolve(String),
}

struct SessionCore {
    decoder: Arc<dyn QrDecoder>,
    interpreter: PayloadInterpreter,
    resolver: Arc<dyn PatientResolver>,
    config: ScanConfig,
    inner: Mutex<SessionInner>,
    state: watch::Sender<ScanSessionState>,
}

impl SessionCore {
    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> ScanSessionState {
        self.state.borrow().clone()
    }

    /// Stops sampling and releases the active source. Idempotent.
    fn teardown(&self, inner: &mut SessionInner) {
        if let Some(sampler) = inner.sampler.take() {
            sampler.cancel();
        }
        if let Some(mut source) = inner.source.take() {
            source.release();
            debug!("Session {} released {:?} source", inner.session_id, source.mode());
        }
    }

    /// Tears down the current session and opens a fresh one in `Idle`.
    fn begin(&self) -> (u64, Uuid) {
        let mut inner = self.lock();
        self.teardown(&mut inner);
        inner.generation += 1;
        inner.session_id = Uuid::new_v4();
        self.state.send_replace(ScanSessionState::Idle);
        (inner.generation, inner.session_id)
    }

    fn shutdown(&self) {
        let mut inner = self.lock();
        self.teardown(&mut inner);
        inner.generation += 1;
    }

    /// Applies `next` if `generation` is still current and the edge is legal.
    fn transition(&self, inner: &SessionInner, generation: u64, next: ScanSessionState) -> bool {
        if inner.generation != generation {
            debug!(
                "Ignoring {} from superseded session generation {}",
                next.name(),
                generation
            );
            return false;
        }

        let from = self.state.borrow().name();
        let allowed = self.state.borrow().can_transition_to(&next);
        if !allowed {
            warn!(
                "Session {} refused transition {} -> {}",
                inner.session_id,
                from,
                next.name()
            );
            return false;
        }

        debug!("Session {}: {} -> {}", inner.session_id, from, next.name());
        self.state.send_replace(next);
        true
    }

    /// Moves the session to `Failed`. Returns whether the failure was applied.
    fn fail(&self, generation: u64, failure: ScanFailure) -> bool {
        let mut inner = self.lock();
        if inner.generation == generation {
            self.teardown(&mut inner);
        }
        self.apply_failure(&inner, generation, failure)
    }

    fn apply_failure(&self, inner: &SessionInner, generation: u64, failure: ScanFailure) -> bool {
        let (kind, message) = (failure.kind(), failure.to_string());
        let applied = self.transition(inner, generation, ScanSessionState::Failed(failure));
        if applied {
            info!("Scan failed ({}): {}", kind, message);
        }
        applied
    }

    /// True while `generation` is current and still sampling.
    fn is_acquiring(&self, inner: &SessionInner, generation: u64) -> bool {
        inner.generation == generation
            && matches!(*self.state.borrow(), ScanSessionState::Acquiring { .. })
    }

    /// Runs one candidate through decoder and interpreter. `Ok(None)` means
    /// no symbol was found. Decoding happens on the blocking pool; callers
    /// must not hold the session lock across this.
    async fn evaluate(
        &self,
        candidate: Candidate,
    ) -> Result<Option<InterpretedIdentifier>, ScanFailure> {
        match candidate {
            Candidate::Identifier(patient_id) => Ok(Some(InterpretedIdentifier::new(patient_id))),
            Candidate::Frame(frame) => match decode_blocking(Arc::clone(&self.decoder), frame).await {
                DecodeOutcome::NotFound => Ok(None),
                DecodeOutcome::Found(payload) => {
                    debug!("Decoded QR payload of {} bytes", payload.text.len());
                    self.interpreter
                        .interpret(&payload.text)
                        .map(Some)
                        .map_err(ScanFailure::from)
                }
            },
        }
    }

    fn take_candidate(
        source: &mut Box<dyn AcquisitionSource>,
    ) -> Result<Option<Candidate>, ScanFailure> {
        source.next_candidate().map_err(ScanFailure::from)
    }

    /// One tick of the camera sampler. The frame is taken under the lock and
    /// decoded after the lock is released.
    async fn sample(&self, generation: u64) -> SampleStep {
        let candidate = {
            let mut inner = self.lock();
            if !self.is_acquiring(&inner, generation) {
                return SampleStep::Stop;
            }
            match inner.source.as_mut() {
                Some(source) => Self::take_candidate(source),
                None => return SampleStep::Stop,
            }
        };

        let outcome = match candidate {
            Ok(Some(candidate)) => self.evaluate(candidate).await,
            Ok(None) => Ok(None),
            Err(failure) => Err(failure),
        };

        let mut inner = self.lock();
        if !self.is_acquiring(&inner, generation) {
            debug!("Dropping sample from superseded session generation {}", generation);
            return SampleStep::Stop;
        }

        match outcome {
            Ok(None) => SampleStep::Continue,
            Ok(Some(identifier)) => {
                // First hit wins: stop sampling before anything else can fire.
                self.teardown(&mut inner);
                let detected = ScanSessionState::Detected {
                    patient_id: identifier.patient_id.clone(),
                };
                if self.transition(&inner, generation, detected) {
                    info!("Session {} detected a patient code", inner.session_id);
                    SampleStep::Resolve(identifier.patient_id)
                } else {
                    SampleStep::Stop
                }
            }
            Err(failure) => {
                self.teardown(&mut inner);
                self.apply_failure(&inner, generation, failure);
                SampleStep::Stop
            }
        }
    }

    async fn resolve_and_apply(&self, generation: u64, patient_id: String) -> ScanSessionState {
        let lookup = self.resolver.resolve(&patient_id);
        let result = match self.config.resolve_timeout {
            Some(limit) => time::timeout(limit, lookup).await.unwrap_or_else(|_| {
                Err(ResolutionError::Transient(format!(
                    "lookup timed out after {}ms",
                    limit.as_millis()
                )))
            }),
            None => lookup.await,
        };

        let next = match result {
            Ok(summary) => ScanSessionState::Resolved(ResolvedScan {
                patient_id,
                summary,
                resolved_at: Utc::now(),
            }),
            Err(e) => {
                info!("Patient lookup failed: {}", e);
                ScanSessionState::Failed(ScanFailure::Resolution(e))
            }
        };

        let mut inner = self.lock();
        if inner.generation == generation {
            self.teardown(&mut inner);
        }
        self.transition(&inner, generation, next);
        self.current()
    }
}

async fn run_sampler(core: Arc<SessionCore>, generation: u64, token: CancellationToken) {
    let period = core.config.sample_interval;
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("Sampler for generation {} cancelled", generation);
                return;
            }
            _ = ticker.tick() => {}
        }

        match core.sample(generation).await {
            SampleStep::Continue => {}
            SampleStep::Stop => return,
            SampleStep::Resolve(patient_id) => {
                core.resolve_and_apply(generation, patient_id).await;
                return;
            }
        }
    }
}

/// Drives one scan session at a time: acquisition, decoding, interpretation
/// and resolution.
///
/// Starting a new source, calling [`reset`](Self::reset) or dropping the
/// controller tears the previous session down, stopping the sampler and
/// releasing the camera. Every transition is published on a watch channel.
pub struct ScanSessionController {
    core: Arc<SessionCore>,
}

impl ScanSessionController {
    pub fn new(
        decoder: Arc<dyn QrDecoder>,
        interpreter: PayloadInterpreter,
        resolver: Arc<dyn PatientResolver>,
        config: ScanConfig,
    ) -> Self {
        let (state, _) = watch::channel(ScanSessionState::Idle);
        Self {
            core: Arc::new(SessionCore {
                decoder,
                interpreter,
                resolver,
                config,
                inner: Mutex::new(SessionInner {
                    generation: 0,
                    session_id: Uuid::new_v4(),
                    source: None,
                    sampler: None,
                }),
                state,
            }),
        }
    }

    pub fn state(&self) -> ScanSessionState {
        self.core.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanSessionState> {
        self.core.state.subscribe()
    }

    pub fn session_id(&self) -> Uuid {
        self.core.lock().session_id
    }

    pub fn is_sampling(&self) -> bool {
        self.core.lock().sampler.is_some()
    }

    /// Starts a new session on `source`, replacing any active one.
    ///
    /// Single-shot sources run to a terminal state before this returns.
    /// Continuous sources return once acquired (`Acquiring`) and are then
    /// sampled in the background.
    #[instrument(skip_all, fields(mode = ?source.mode(), session = field::Empty))]
    pub async fn start(&self, mut source: Box<dyn AcquisitionSource>) -> ScanSessionState {
        let (generation, session_id) = self.core.begin();
        Span::current().record("session", field::display(session_id));
        let mode = source.mode();
        info!("Starting scan session");

        if mode != ScanMode::Manual {
            let inner = self.core.lock();
            self.core
                .transition(&inner, generation, ScanSessionState::Acquiring { mode });
        }

        if let Err(e) = source.acquire().await {
            source.release();
            self.core.fail(generation, ScanFailure::Acquisition(e));
            return self.state();
        }

        if source.is_continuous() {
            return self.arm_sampler(generation, source);
        }

        let outcome = match SessionCore::take_candidate(&mut source) {
            Ok(Some(candidate)) => self.core.evaluate(candidate).await,
            Ok(None) => Ok(None),
            Err(failure) => Err(failure),
        };
        source.release();

        match outcome {
            Ok(Some(identifier)) => {
                let detected = {
                    let inner = self.core.lock();
                    self.core.transition(
                        &inner,
                        generation,
                        ScanSessionState::Detected {
                            patient_id: identifier.patient_id.clone(),
                        },
                    )
                };
                if !detected {
                    return self.state();
                }
                self.core
                    .resolve_and_apply(generation, identifier.patient_id)
                    .await
            }
            Ok(None) => {
                self.core.fail(generation, ScanFailure::NoCodeFound);
                self.state()
            }
            Err(failure) => {
                self.core.fail(generation, failure);
                self.state()
            }
        }
    }

    fn arm_sampler(&self, generation: u64, mut source: Box<dyn AcquisitionSource>) -> ScanSessionState {
        let mut inner = self.core.lock();
        if inner.generation != generation {
            // Superseded while the device was being opened.
            source.release();
            return self.core.current();
        }

        inner.source = Some(source);
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_sampler(
            Arc::clone(&self.core),
            generation,
            token.clone(),
        ));
        inner.sampler = Some(SamplingTimer { token, handle });
        debug!(
            "Sampling every {}ms for session {}",
            self.core.config.sample_interval.as_millis(),
            inner.session_id
        );
        self.core.current()
    }

    pub async fn submit_manual(&self, input: &str) -> ScanSessionState {
        self.start(Box::new(ManualEntry::new(input))).await
    }

    pub async fn scan_file(&self, upload: FileUpload) -> ScanSessionState {
        self.start(Box::new(upload)).await
    }

    pub async fn start_camera(&self, device: Arc<dyn VideoDevice>) -> ScanSessionState {
        let camera = CameraSource::new(device, self.core.config.camera);
        self.start(Box::new(camera)).await
    }

    /// "Scan another": abandons the current session and returns to `Idle`.
    pub fn reset(&self) {
        let (_, session_id) = self.core.begin();
        info!("Scan session reset, new session {}", session_id);
    }
}

impl Drop for ScanSessionController {
    fn drop(&mut self) {
        self.core.shutdown();
    }
}
