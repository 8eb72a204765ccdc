//! In-process stand-in for the capture device
//!
//! Replays a prepared digital trace and prepared decoder output, so the whole
//! capture pipeline can run on a machine without a logic analyzer attached.
//! It also keeps score of how often each capture was started, stopped and
//! closed.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use crate::analyzer::{AnalyzerBinding, AnalyzerId, AnalyzerKind};
use crate::capture::{CaptureBackend, CaptureId, CaptureRequest};
use crate::error::{HarnessError, Result};
use crate::export::{DecodedFrame, DigitalTrace};

/// How a simulated capture finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Completion {
    /// Complete once the requested duration has elapsed
    #[default]
    AfterDuration,
    /// Never report completion
    Never,
    /// Lose the connection while the caller waits
    Fails,
}

#[derive(Debug)]
struct SimulatedCapture {
    request: CaptureRequest,
    started: Instant,
    stopped: bool,
    open: bool,
    releases: usize,
}

#[derive(Debug)]
pub struct SimulatedLogic {
    trace: DigitalTrace,
    frames: BTreeMap<AnalyzerKind, Vec<DecodedFrame>>,
    reachable: bool,
    completion: Completion,
    captures: BTreeMap<CaptureId, SimulatedCapture>,
    analyzers: BTreeMap<u64, (CaptureId, AnalyzerBinding)>,
    next_id: u64,
}

impl SimulatedLogic {
    pub fn new(trace: DigitalTrace) -> Self {
        Self {
            trace,
            frames: BTreeMap::new(),
            reachable: true,
            completion: Completion::default(),
            captures: BTreeMap::new(),
            analyzers: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Frames any analyzer of `kind` will report
    pub fn with_frames(mut self, kind: AnalyzerKind, frames: Vec<DecodedFrame>) -> Self {
        self.frames.insert(kind, frames);
        self
    }

    /// Behave like an automation endpoint that is not listening
    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    pub fn completion(mut self, completion: Completion) -> Self {
        self.completion = completion;
        self
    }

    pub fn start_count(&self) -> usize {
        self.captures.len()
    }

    pub fn release_count(&self, capture: CaptureId) -> usize {
        self.captures
            .get(&capture)
            .map_or(0, |capture| capture.releases)
    }

    pub fn was_stopped(&self, capture: CaptureId) -> bool {
        self.captures
            .get(&capture)
            .is_some_and(|capture| capture.stopped)
    }

    pub fn open_captures(&self) -> usize {
        self.captures.values().filter(|capture| capture.open).count()
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn open_capture(&mut self, capture: CaptureId) -> Result<&mut SimulatedCapture> {
        match self.captures.get_mut(&capture) {
            Some(sim) if sim.open => Ok(sim),
            Some(_) => Err(HarnessError::invalid(format!(
                "capture {capture} is already closed"
            ))),
            None => Err(HarnessError::invalid(format!("no capture {capture}"))),
        }
    }

    /// Edges on the analyzer's input pin, the way a GPIO analyzer reports them
    fn gpio_edges(&self, binding: &AnalyzerBinding) -> Vec<DecodedFrame> {
        let Some(&pin) = binding.pin_roles.get("Input") else {
            return Vec::new();
        };

        let mut edges = Vec::new();
        let mut previous = None;
        for (row, sample) in self.trace.samples().iter().enumerate() {
            let level = self.trace.level(row, pin).unwrap_or(false);
            if previous.is_some_and(|previous| previous != level) {
                edges.push(DecodedFrame::Gpio {
                    time_s: sample.time_s,
                    level,
                });
            }
            previous = Some(level);
        }
        edges
    }
}

impl CaptureBackend for SimulatedLogic {
    fn start_capture(&mut self, request: &CaptureRequest) -> Result<CaptureId> {
        if !self.reachable {
            return Err(HarnessError::unavailable(
                "automation endpoint is not listening",
            ));
        }

        let id = CaptureId(self.next_id());
        self.captures.insert(
            id,
            SimulatedCapture {
                request: request.clone(),
                started: Instant::now(),
                stopped: false,
                open: true,
                releases: 0,
            },
        );
        log::debug!("Simulated capture {id} started");
        Ok(id)
    }

    fn is_complete(&mut self, capture: CaptureId) -> Result<bool> {
        let completion = self.completion;
        let sim = self.open_capture(capture)?;
        match completion {
            Completion::AfterDuration => {
                Ok(sim.stopped || sim.started.elapsed() >= sim.request.duration)
            }
            Completion::Never => Ok(false),
            Completion::Fails => Err(HarnessError::unavailable(
                "connection to the capture device was lost",
            )),
        }
    }

    fn stop_capture(&mut self, capture: CaptureId) -> Result<()> {
        self.open_capture(capture)?.stopped = true;
        Ok(())
    }

    fn close_capture(&mut self, capture: CaptureId) -> Result<()> {
        let sim = self
            .captures
            .get_mut(&capture)
            .ok_or_else(|| HarnessError::invalid(format!("no capture {capture}")))?;
        sim.releases += 1;
        if !sim.open {
            return Err(HarnessError::invalid(format!(
                "capture {capture} closed twice"
            )));
        }
        sim.open = false;
        self.analyzers.retain(|_, (owner, _)| *owner != capture);
        Ok(())
    }

    fn digital_samples(
        &mut self,
        capture: CaptureId,
        channels: &BTreeSet<u8>,
    ) -> Result<DigitalTrace> {
        let enabled = &self.open_capture(capture)?.request.channels;
        if let Some(&channel) = channels.iter().find(|&&ch| !enabled.contains(&ch)) {
            return Err(HarnessError::UnknownChannel {
                channel,
                enabled: enabled.iter().copied().collect(),
            });
        }
        Ok(self.trace.project(channels))
    }

    fn add_analyzer(
        &mut self,
        capture: CaptureId,
        binding: &AnalyzerBinding,
    ) -> Result<AnalyzerId> {
        self.open_capture(capture)?;
        let id = self.next_id();
        self.analyzers.insert(id, (capture, binding.clone()));
        Ok(AnalyzerId(id))
    }

    fn decoded_frames(
        &mut self,
        capture: CaptureId,
        analyzer: AnalyzerId,
    ) -> Result<Vec<DecodedFrame>> {
        self.open_capture(capture)?;
        let (owner, binding) = self
            .analyzers
            .get(&analyzer.0)
            .ok_or_else(|| HarnessError::invalid(format!("no analyzer {}", analyzer.0)))?;
        if *owner != capture {
            return Err(HarnessError::invalid(format!(
                "analyzer {} is not attached to capture {capture}",
                analyzer.0
            )));
        }

        Ok(match self.frames.get(&binding.kind) {
            Some(frames) => frames.clone(),
            None if binding.kind == AnalyzerKind::Gpio => self.gpio_edges(binding),
            None => Vec::new(),
        })
    }
}
