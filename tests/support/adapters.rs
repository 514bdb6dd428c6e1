//! In-process source adapters for engine-level properties.
//!
//! [`ScriptedSource`] replays a fixed list of outcomes; [`GatedSource`]
//! holds every attempt for a while and tracks how many run at once.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use paperfetch_core::request::AcquisitionRequest;
use paperfetch_core::source::{
    AccessTier, AttemptContext, ProtocolKind, RawArtifact, SourceAdapter, SourceDescriptor,
    SourceError,
};

/// Bytes that pass the default validator.
pub fn pdf_bytes() -> Vec<u8> {
    let mut bytes = b"%PDF-1.7\n".to_vec();
    bytes.resize(4096, b'x');
    bytes.extend_from_slice(b"\n%%EOF\n");
    bytes
}

pub fn pdf_artifact() -> RawArtifact {
    RawArtifact {
        bytes: pdf_bytes(),
        content_type: Some("application/pdf".to_string()),
        url: "https://source.test/article.pdf".to_string(),
    }
}

pub fn html_artifact() -> RawArtifact {
    RawArtifact {
        bytes: b"<!DOCTYPE html><html><body>Sign in</body></html>".repeat(64),
        content_type: Some("text/html; charset=utf-8".to_string()),
        url: "https://source.test/login".to_string(),
    }
}

pub fn descriptor(name: &str, host: &str, priority: i32, tier: AccessTier) -> SourceDescriptor {
    SourceDescriptor::new(name, host, ProtocolKind::DirectHttp, tier).with_priority(priority)
}

/// Replays scripted outcomes in order; `not_found` once the script runs out.
pub struct ScriptedSource {
    descriptor: SourceDescriptor,
    script: Mutex<Vec<Result<RawArtifact, SourceError>>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(
        descriptor: SourceDescriptor,
        script: Vec<Result<RawArtifact, SourceError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            descriptor,
            script: Mutex::new(script.into_iter().rev().collect()),
            calls: AtomicUsize::new(0),
        })
    }

    /// Always fails with the same error.
    pub fn failing(descriptor: SourceDescriptor, error: fn() -> SourceError) -> Arc<Self> {
        Self::new(descriptor, (0..32).map(|_| Err(error())).collect())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for ScriptedSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn attempt(
        &self,
        _request: &AcquisitionRequest,
        _ctx: &AttemptContext,
    ) -> Result<RawArtifact, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Err(SourceError::not_found("script exhausted")))
    }
}

/// Concurrency probe shared by several adapters.
#[derive(Debug, Default)]
pub struct InFlight {
    current: AtomicUsize,
    high_water: AtomicUsize,
}

impl InFlight {
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Succeeds after `hold`, recording overlap in a shared [`InFlight`].
pub struct GatedSource {
    descriptor: SourceDescriptor,
    hold: Duration,
    in_flight: Arc<InFlight>,
    outcome: fn() -> Result<RawArtifact, SourceError>,
}

impl GatedSource {
    pub fn new(
        descriptor: SourceDescriptor,
        hold: Duration,
        in_flight: Arc<InFlight>,
        outcome: fn() -> Result<RawArtifact, SourceError>,
    ) -> Arc<Self> {
        Arc::new(Self {
            descriptor,
            hold,
            in_flight,
            outcome,
        })
    }
}

#[async_trait]
impl SourceAdapter for GatedSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn attempt(
        &self,
        _request: &AcquisitionRequest,
        ctx: &AttemptContext,
    ) -> Result<RawArtifact, SourceError> {
        self.in_flight.enter();
        let result = tokio::select! {
            () = ctx.cancel.cancelled() => Err(SourceError::Cancelled),
            () = tokio::time::sleep(self.hold) => (self.outcome)(),
        };
        self.in_flight.exit();
        result
    }
}
