use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use crate::analyzer::{AnalyzerBinding, AnalyzerHandle, AnalyzerId};
use crate::error::{HarnessError, Result};
use crate::export::{self, DecodedFrame, DigitalTrace, ExportArtifact, Radix};

/// Number of digital inputs on the capture device
pub const MAX_CHANNELS: u8 = 16;

/// Identifies a capture inside the capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CaptureId(pub u64);

impl fmt::Display for CaptureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What to capture: which lines, how fast, at which logic level, for how long
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub channels: BTreeSet<u8>,
    pub sample_rate_hz: u32,
    pub threshold_volts: f64,
    pub duration: Duration,
}

impl CaptureRequest {
    pub fn new(
        channels: impl IntoIterator<Item = u8>,
        sample_rate_hz: u32,
        threshold_volts: f64,
        duration: Duration,
    ) -> Self {
        Self {
            channels: channels.into_iter().collect(),
            sample_rate_hz,
            threshold_volts,
            duration,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(HarnessError::invalid("capture needs at least one channel"));
        }
        if let Some(channel) = self.channels.iter().find(|&&ch| ch >= MAX_CHANNELS) {
            return Err(HarnessError::invalid(format!(
                "channel {channel} does not exist (device has {MAX_CHANNELS} channels)"
            )));
        }
        if self.sample_rate_hz == 0 {
            return Err(HarnessError::invalid("sample rate must be positive"));
        }
        if !self.threshold_volts.is_finite() || self.threshold_volts <= 0.0 {
            return Err(HarnessError::invalid(format!(
                "logic threshold {} V must be positive",
                self.threshold_volts
            )));
        }
        if self.duration.is_zero() {
            return Err(HarnessError::invalid("capture duration must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Unconfigured,
    Configured,
    Armed,
    Running,
    Completed,
    Released,
    Failed,
}

/// The capture device's automation interface.
///
/// Implementations talk to the actual logic analyzer software; the harness
/// only sequences these calls and never decodes protocols itself.
pub trait CaptureBackend {
    /// Arm the device and start sampling
    fn start_capture(&mut self, request: &CaptureRequest) -> Result<CaptureId>;

    /// Whether the device finished sampling
    fn is_complete(&mut self, capture: CaptureId) -> Result<bool>;

    fn stop_capture(&mut self, capture: CaptureId) -> Result<()>;

    /// Free the capture and everything attached to it
    fn close_capture(&mut self, capture: CaptureId) -> Result<()>;

    fn digital_samples(
        &mut self,
        capture: CaptureId,
        channels: &BTreeSet<u8>,
    ) -> Result<DigitalTrace>;

    fn add_analyzer(&mut self, capture: CaptureId, binding: &AnalyzerBinding)
        -> Result<AnalyzerId>;

    fn decoded_frames(
        &mut self,
        capture: CaptureId,
        analyzer: AnalyzerId,
    ) -> Result<Vec<DecodedFrame>>;
}

impl<B: CaptureBackend + ?Sized> CaptureBackend for Box<B> {
    fn start_capture(&mut self, request: &CaptureRequest) -> Result<CaptureId> {
        (**self).start_capture(request)
    }

    fn is_complete(&mut self, capture: CaptureId) -> Result<bool> {
        (**self).is_complete(capture)
    }

    fn stop_capture(&mut self, capture: CaptureId) -> Result<()> {
        (**self).stop_capture(capture)
    }

    fn close_capture(&mut self, capture: CaptureId) -> Result<()> {
        (**self).close_capture(capture)
    }

    fn digital_samples(
        &mut self,
        capture: CaptureId,
        channels: &BTreeSet<u8>,
    ) -> Result<DigitalTrace> {
        (**self).digital_samples(capture, channels)
    }

    fn add_analyzer(
        &mut self,
        capture: CaptureId,
        binding: &AnalyzerBinding,
    ) -> Result<AnalyzerId> {
        (**self).add_analyzer(capture, binding)
    }

    fn decoded_frames(
        &mut self,
        capture: CaptureId,
        analyzer: AnalyzerId,
    ) -> Result<Vec<DecodedFrame>> {
        (**self).decoded_frames(capture, analyzer)
    }
}

/// Runs captures on one device, one at a time.
pub struct CaptureManager<B: CaptureBackend> {
    backend: B,
    grace_period: Duration,
    poll_interval: Duration,
    state: CaptureState,
}

impl<B: CaptureBackend> CaptureManager<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            grace_period: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            state: CaptureState::Unconfigured,
        }
    }

    /// Time granted past the capture duration before `wait` gives up
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// State of the most recent capture
    pub fn state(&self) -> CaptureState {
        self.state
    }

    fn transition(&mut self, to: CaptureState) {
        log::debug!("Capture state {:?} -> {:?}", self.state, to);
        self.state = to;
    }

    pub fn configure(&mut self, request: CaptureRequest) -> Result<ConfiguredCapture> {
        if let Err(err) = request.validate() {
            self.transition(CaptureState::Failed);
            return Err(err);
        }
        self.transition(CaptureState::Configured);
        Ok(ConfiguredCapture { request })
    }

    /// Arm the device and start sampling
    pub fn start(&mut self, configured: ConfiguredCapture) -> Result<RunningCapture<'_, B>> {
        let _span = tracing::debug_span!("capture_start", channels = ?configured.request.channels)
            .entered();
        let request = configured.request;

        self.transition(CaptureState::Armed);
        let id = match self.backend.start_capture(&request) {
            Ok(id) => id,
            Err(err) => {
                self.transition(CaptureState::Failed);
                return Err(err);
            }
        };
        log::info!(
            "Capture {id} running: channels {:?} at {} Sa/s, {} V, {:?}",
            request.channels,
            request.sample_rate_hz,
            request.threshold_volts,
            request.duration
        );
        self.transition(CaptureState::Running);

        let grace_period = self.grace_period;
        let poll_interval = self.poll_interval;
        Ok(RunningCapture {
            session: Session {
                manager: self,
                id,
                request,
            },
            started: Instant::now(),
            grace_period,
            poll_interval,
        })
    }

    /// Run one capture inside a scope.
    ///
    /// `f` gets the running capture; it issues the stimulus, waits, attaches
    /// analyzers and exports. The capture is released when `f` returns, on
    /// success and on error alike.
    pub fn run<T>(
        &mut self,
        request: CaptureRequest,
        f: impl FnOnce(RunningCapture<'_, B>) -> Result<T>,
    ) -> Result<T> {
        let configured = self.configure(request)?;
        let running = self.start(configured)?;
        f(running)
    }
}

/// A validated request, not yet sent to the device
#[derive(Debug, Clone, PartialEq)]
pub struct ConfiguredCapture {
    request: CaptureRequest,
}

impl ConfiguredCapture {
    pub fn request(&self) -> &CaptureRequest {
        &self.request
    }
}

/// Owns the device handle of one capture and closes it exactly once
struct Session<'a, B: CaptureBackend> {
    manager: &'a mut CaptureManager<B>,
    id: CaptureId,
    request: CaptureRequest,
}

impl<B: CaptureBackend> Session<'_, B> {
    fn backend(&mut self) -> &mut B {
        &mut self.manager.backend
    }

    fn release(&mut self) -> Result<()> {
        if self.manager.state == CaptureState::Released {
            return Ok(());
        }
        log::debug!("Releasing capture {}", self.id);
        self.manager.transition(CaptureState::Released);
        let id = self.id;
        self.backend().close_capture(id)
    }
}

impl<B: CaptureBackend> Drop for Session<'_, B> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            log::warn!("Failed to release capture {}: {err}", self.id);
        }
    }
}

pub struct RunningCapture<'a, B: CaptureBackend> {
    session: Session<'a, B>,
    started: Instant,
    grace_period: Duration,
    poll_interval: Duration,
}

impl<'a, B: CaptureBackend> RunningCapture<'a, B> {
    pub fn id(&self) -> CaptureId {
        self.session.id
    }

    pub fn request(&self) -> &CaptureRequest {
        &self.session.request
    }

    /// Block until the device reports completion.
    ///
    /// Gives up once the capture duration plus the manager's grace period has
    /// passed since the capture started.
    pub fn wait(self) -> Result<CompletedCapture<'a, B>> {
        let deadline = self.started + self.session.request.duration + self.grace_period;
        self.wait_until(deadline)
    }

    /// Block until the device reports completion, for at most `limit`
    pub fn wait_timeout(self, limit: Duration) -> Result<CompletedCapture<'a, B>> {
        self.wait_until(Instant::now() + limit)
    }

    fn wait_until(mut self, deadline: Instant) -> Result<CompletedCapture<'a, B>> {
        let id = self.session.id;
        let _span = tracing::debug_span!("capture_wait", capture = id.0).entered();

        loop {
            match self.session.backend().is_complete(id) {
                Ok(true) => break,
                Ok(false) => {}
                Err(err) => {
                    log::error!("Capture {id} failed while waiting: {err}");
                    self.session.manager.transition(CaptureState::Failed);
                    return Err(err);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                self.session.manager.transition(CaptureState::Failed);
                if let Err(err) = self.session.backend().stop_capture(id) {
                    log::warn!("Could not stop capture {id}: {err}");
                }
                return Err(HarnessError::unavailable(format!(
                    "capture {id} did not complete within {:?}",
                    self.started.elapsed()
                )));
            }

            thread::sleep(self.poll_interval.min(deadline - now));
        }

        log::info!("Capture {id} completed after {:?}", self.started.elapsed());
        self.session.manager.transition(CaptureState::Completed);
        Ok(CompletedCapture {
            session: self.session,
        })
    }
}

/// A finished capture whose samples are still held by the device
pub struct CompletedCapture<'a, B: CaptureBackend> {
    session: Session<'a, B>,
}

impl<B: CaptureBackend> CompletedCapture<'_, B> {
    pub fn id(&self) -> CaptureId {
        self.session.id
    }

    pub fn request(&self) -> &CaptureRequest {
        &self.session.request
    }

    /// Attach a protocol analyzer to the captured channels
    pub fn attach(&mut self, binding: &AnalyzerBinding) -> Result<AnalyzerHandle> {
        binding.validate()?;
        binding.check_channels(&self.session.request.channels)?;

        let capture = self.session.id;
        let id = self.session.backend().add_analyzer(capture, binding)?;
        log::debug!(
            "Attached {} analyzer '{}' to capture {capture} on {:?}",
            binding.kind,
            binding.label,
            binding.pin_roles
        );

        Ok(AnalyzerHandle {
            id,
            capture,
            kind: binding.kind,
            label: binding.label.clone(),
        })
    }

    /// Export raw samples of `channels` to `destination_dir/digital.csv`
    pub fn export_raw(
        &mut self,
        channels: &BTreeSet<u8>,
        destination_dir: &Path,
    ) -> Result<ExportArtifact> {
        if channels.is_empty() {
            return Err(HarnessError::invalid("no channels selected for export"));
        }
        let enabled = &self.session.request.channels;
        if let Some(&channel) = channels.iter().find(|&&ch| !enabled.contains(&ch)) {
            return Err(HarnessError::UnknownChannel {
                channel,
                enabled: enabled.iter().copied().collect(),
            });
        }

        let capture = self.session.id;
        let trace = self.session.backend().digital_samples(capture, channels)?;
        export::write_raw(&trace, destination_dir)
    }

    /// Export the frames decoded by `analyzer`
    pub fn export_decoded(
        &mut self,
        analyzer: &AnalyzerHandle,
        destination_path: &Path,
        radix: Radix,
    ) -> Result<ExportArtifact> {
        let capture = self.session.id;
        if analyzer.capture != capture {
            return Err(HarnessError::invalid(format!(
                "analyzer '{}' belongs to capture {}, not {capture}",
                analyzer.label, analyzer.capture
            )));
        }

        let frames = self.session.backend().decoded_frames(capture, analyzer.id)?;
        log::debug!(
            "Analyzer '{}' decoded {} frames",
            analyzer.label,
            frames.len()
        );
        export::write_decoded(
            analyzer.kind,
            &analyzer.label,
            &frames,
            destination_path,
            radix,
        )
    }

    /// Release the capture now, reporting a failed release to the caller
    pub fn close(mut self) -> Result<()> {
        self.session.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{Completion, SimulatedLogic};

    fn request(channels: &[u8]) -> CaptureRequest {
        CaptureRequest::new(
            channels.iter().copied(),
            10_000_000,
            3.3,
            Duration::from_millis(5),
        )
    }

    fn manager(backend: SimulatedLogic) -> CaptureManager<SimulatedLogic> {
        CaptureManager::new(backend)
            .with_grace_period(Duration::from_millis(50))
            .with_poll_interval(Duration::from_millis(1))
    }

    #[test]
    fn test_request_validation() {
        assert!(request(&[0]).validate().is_ok());
        assert!(request(&[]).validate().is_err());
        assert!(request(&[16]).validate().is_err());

        let mut bad_rate = request(&[0]);
        bad_rate.sample_rate_hz = 0;
        assert!(bad_rate.validate().is_err());

        let mut bad_threshold = request(&[0]);
        bad_threshold.threshold_volts = f64::NAN;
        assert!(bad_threshold.validate().is_err());

        let mut no_duration = request(&[0]);
        no_duration.duration = Duration::ZERO;
        assert!(no_duration.validate().is_err());
    }

    #[test]
    fn test_empty_channel_set_never_starts() {
        let mut manager = manager(SimulatedLogic::new(DigitalTrace::default()));

        let err = manager
            .run(request(&[]), |_running| Ok(()))
            .unwrap_err();

        assert!(matches!(err, HarnessError::InvalidConfiguration(_)));
        assert_eq!(manager.state(), CaptureState::Failed);
        assert_eq!(manager.backend().start_count(), 0);
    }

    #[test]
    fn test_unreachable_device() {
        let backend = SimulatedLogic::new(DigitalTrace::default()).unreachable();
        let mut manager = manager(backend);

        let configured = manager.configure(request(&[0])).unwrap();
        assert_eq!(manager.state(), CaptureState::Configured);

        let err = manager.start(configured).err().unwrap();
        assert!(matches!(err, HarnessError::DeviceUnavailable(_)));
        assert_eq!(manager.state(), CaptureState::Failed);
    }

    #[test]
    fn test_completed_capture_is_released_once() {
        let trace = DigitalTrace::toggle_train(0, false, 0.001, 4);
        let mut manager = manager(SimulatedLogic::new(trace));

        let id = manager
            .run(request(&[0]), |running| {
                let completed = running.wait()?;
                Ok(completed.id())
            })
            .unwrap();

        assert_eq!(manager.state(), CaptureState::Released);
        assert_eq!(manager.backend().release_count(id), 1);
        assert_eq!(manager.backend().open_captures(), 0);
    }

    #[test]
    fn test_failure_during_wait_releases_once() {
        let backend = SimulatedLogic::new(DigitalTrace::default()).completion(Completion::Fails);
        let mut manager = manager(backend);

        let mut seen = None;
        let err = manager
            .run(request(&[0]), |running| {
                seen = Some(running.id());
                running.wait().map(|_| ())
            })
            .unwrap_err();

        assert!(matches!(err, HarnessError::DeviceUnavailable(_)));
        let id = seen.unwrap();
        assert_eq!(manager.backend().release_count(id), 1);
        assert_eq!(manager.state(), CaptureState::Released);
    }

    #[test]
    fn test_hung_capture_times_out() {
        let backend = SimulatedLogic::new(DigitalTrace::default()).completion(Completion::Never);
        let mut manager = manager(backend);

        let configured = manager.configure(request(&[0])).unwrap();
        let running = manager.start(configured).unwrap();
        let id = running.id();

        let start = Instant::now();
        let err = running.wait_timeout(Duration::from_millis(20)).err().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(matches!(err, HarnessError::DeviceUnavailable(_)));

        let backend = manager.backend();
        assert!(backend.was_stopped(id));
        assert_eq!(backend.release_count(id), 1);
    }

    #[test]
    fn test_explicit_close_does_not_release_twice() {
        let trace = DigitalTrace::toggle_train(3, true, 0.001, 2);
        let mut manager = manager(SimulatedLogic::new(trace));

        let id = manager
            .run(request(&[3]), |running| {
                let completed = running.wait()?;
                let id = completed.id();
                completed.close()?;
                Ok(id)
            })
            .unwrap();

        assert_eq!(manager.backend().release_count(id), 1);
    }

    #[test]
    fn test_export_rejects_channels_outside_capture() {
        let trace = DigitalTrace::toggle_train(0, true, 0.001, 2);
        let mut manager = manager(SimulatedLogic::new(trace));
        let dir = tempfile::tempdir().unwrap();

        let err = manager
            .run(request(&[0]), |running| {
                let mut completed = running.wait()?;
                completed.export_raw(&BTreeSet::from([0, 1]), dir.path())
            })
            .unwrap_err();

        assert!(matches!(err, HarnessError::UnknownChannel { channel: 1, .. }));
        assert!(!dir.path().join(export::RAW_EXPORT_FILE).exists());
    }
}
