//! The recognition loop: frames in, at most one ledger call per identity out.

use chrono::NaiveDateTime;
use image::GrayImage;
use rollcall_core::{BoundingBox, EmbeddingOracle, Identity, MatchOutcome, Matcher, OracleError, RegistryEntry};
use rollcall_hw::FrameStream;
use rollcall_store::{Attendance, MarkResult};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Camera buffers tried before a dark frame is handed over anyway.
const MAX_DARK_RETRIES: usize = 30;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("frame source failed: {0}")]
    Source(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),
}

/// Supplies frames to a session. `Ok(None)` means the source is exhausted.
pub trait FrameSource {
    type Error: std::error::Error + Send + Sync + 'static;

    fn next_frame(&mut self) -> Result<Option<GrayImage>, Self::Error>;
}

impl FrameSource for FrameStream<'_> {
    type Error = rollcall_hw::CameraError;

    fn next_frame(&mut self) -> Result<Option<GrayImage>, Self::Error> {
        let frame = match self.next_lit_frame(MAX_DARK_RETRIES)? {
            Some(frame) => frame,
            None => FrameStream::next_frame(self)?,
        };
        Ok(Some(frame.into_image()?))
    }
}

/// Ctrl-C plumbing between the signal task and a blocking session.
///
/// A request only counts while a session is armed; otherwise the caller is
/// expected to exit the process.
#[derive(Debug, Default)]
pub struct StopSignal {
    armed: AtomicBool,
    requested: AtomicBool,
}

impl StopSignal {
    /// Arm for one session; disarmed again when the guard drops.
    pub fn arm(&self) -> ArmedStop<'_> {
        self.requested.store(false, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
        ArmedStop { signal: self }
    }

    /// Ask the running session to stop. Returns false if none is armed.
    pub fn request(&self) -> bool {
        self.requested.store(true, Ordering::SeqCst);
        self.armed.load(Ordering::SeqCst)
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

pub struct ArmedStop<'a> {
    signal: &'a StopSignal,
}

impl Drop for ArmedStop<'_> {
    fn drop(&mut self) {
        self.signal.armed.store(false, Ordering::SeqCst);
    }
}

/// Identities already sent to the ledger during this session.
#[derive(Debug, Default)]
pub struct RecognitionSet {
    seen: HashSet<Identity>,
}

impl RecognitionSet {
    pub fn contains(&self, identity: &Identity) -> bool {
        self.seen.contains(identity)
    }

    pub fn insert(&mut self, identity: Identity) -> bool {
        self.seen.insert(identity)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// What happened on the ledger side for one face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerAction {
    /// Face did not resolve to an identity.
    None,
    Recorded,
    AlreadyMarkedToday,
    /// Identity was already handled earlier in this session.
    SkippedSeen,
    /// The ledger call failed; a later frame will retry.
    Failed,
}

#[derive(Debug, Clone)]
pub struct FaceReport {
    pub bbox: BoundingBox,
    pub outcome: MatchOutcome,
    pub action: LedgerAction,
}

#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    pub faces: Vec<FaceReport>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSummary {
    pub frames: usize,
    pub faces: usize,
    pub unknown_faces: usize,
    pub recorded: Vec<Identity>,
    pub already_marked: Vec<Identity>,
}

pub struct Session<'a, O: ?Sized, M, L: ?Sized> {
    oracle: &'a mut O,
    matcher: M,
    registry: &'a [RegistryEntry],
    ledger: &'a L,
    threshold: f32,
    seen: RecognitionSet,
    summary: SessionSummary,
}

impl<'a, O, M, L> Session<'a, O, M, L>
where
    O: EmbeddingOracle + ?Sized,
    M: Matcher,
    L: Attendance + ?Sized,
{
    pub fn new(
        oracle: &'a mut O,
        matcher: M,
        registry: &'a [RegistryEntry],
        ledger: &'a L,
        threshold: f32,
    ) -> Self {
        Self {
            oracle,
            matcher,
            registry,
            ledger,
            threshold,
            seen: RecognitionSet::default(),
            summary: SessionSummary::default(),
        }
    }

    pub fn recognized(&self) -> &RecognitionSet {
        &self.seen
    }

    /// Detect, match and (if new this session) mark every face in one frame.
    pub fn process_frame(
        &mut self,
        image: &GrayImage,
        now: NaiveDateTime,
    ) -> Result<FrameReport, SessionError> {
        self.summary.frames += 1;
        let faces = self.oracle.detect_faces(image)?;
        let mut report = FrameReport::default();

        for face in faces {
            self.summary.faces += 1;
            let outcome = self
                .matcher
                .compare(&face.embedding, self.registry, self.threshold);
            let action = match outcome.identity() {
                None => {
                    self.summary.unknown_faces += 1;
                    LedgerAction::None
                }
                Some(identity) => self.resolve(identity, now),
            };
            report.faces.push(FaceReport {
                bbox: face.bbox,
                outcome,
                action,
            });
        }

        Ok(report)
    }

    fn resolve(&mut self, identity: &Identity, now: NaiveDateTime) -> LedgerAction {
        if self.seen.contains(identity) {
            return LedgerAction::SkippedSeen;
        }
        match self.ledger.mark(identity, now) {
            Ok(result) => {
                self.seen.insert(identity.clone());
                match result {
                    MarkResult::Recorded => {
                        self.summary.recorded.push(identity.clone());
                        LedgerAction::Recorded
                    }
                    MarkResult::AlreadyMarkedToday => {
                        self.summary.already_marked.push(identity.clone());
                        LedgerAction::AlreadyMarkedToday
                    }
                }
            }
            Err(e) => {
                tracing::warn!(%identity, error = %e, "attendance not recorded; will retry");
                LedgerAction::Failed
            }
        }
    }

    /// Pull frames until `stop` is raised, the source ends, or `max_frames` is hit.
    ///
    /// An oracle failure on one frame is logged and the loop moves on.
    pub fn run<S, C>(
        &mut self,
        source: &mut S,
        stop: &StopSignal,
        max_frames: Option<usize>,
        mut clock: C,
    ) -> Result<SessionSummary, SessionError>
    where
        S: FrameSource + ?Sized,
        C: FnMut() -> NaiveDateTime,
    {
        tracing::info!(registry = self.registry.len(), threshold = self.threshold, "session started");

        let mut pulled = 0usize;
        while !stop.is_requested() && max_frames.map_or(true, |max| pulled < max) {
            let Some(image) = source
                .next_frame()
                .map_err(|e| SessionError::Source(Box::new(e)))?
            else {
                tracing::info!("frame source exhausted");
                break;
            };
            pulled += 1;

            match self.process_frame(&image, clock()) {
                Ok(report) => {
                    for face in &report.faces {
                        if let Some(identity) = face.outcome.identity() {
                            tracing::debug!(%identity, bbox = ?face.bbox, action = ?face.action, "face resolved");
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "frame skipped"),
            }
        }

        tracing::info!(
            frames = self.summary.frames,
            recorded = self.summary.recorded.len(),
            already_marked = self.summary.already_marked.len(),
            "session ended"
        );
        Ok(self.summary.clone())
    }
}
