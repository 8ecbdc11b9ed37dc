//! Detector call with a deadline.
//!
//! The wrapped backend lives on a dedicated worker thread. A call that misses
//! its deadline is reported as "no detections"; its late reply is discarded
//! when it eventually arrives.

use anyhow::{anyhow, Result};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::error::EngineError;
use crate::ingest::SampledFrame;
use crate::RawDetection;

const KNOWN_CAPABILITIES: [DetectionCapability; 2] = [
    DetectionCapability::ObjectDetection,
    DetectionCapability::PersonDetection,
];

enum Request {
    WarmUp(u64),
    Detect(u64, SampledFrame),
}

type Reply = (u64, Result<Vec<RawDetection>>);

pub struct TimedDetector {
    name: &'static str,
    capabilities: Vec<DetectionCapability>,
    timeout: Duration,
    requests: Sender<Request>,
    replies: Receiver<Reply>,
    next_seq: u64,
    timeouts: u64,
}

impl TimedDetector {
    pub fn new<B: DetectorBackend + 'static>(backend: B, timeout: Duration) -> Result<Self> {
        let name = backend.name();
        let capabilities = KNOWN_CAPABILITIES
            .iter()
            .copied()
            .filter(|capability| backend.supports(*capability))
            .collect();
        let (request_tx, request_rx) = mpsc::channel::<Request>();
        let (reply_tx, reply_rx) = mpsc::channel::<Reply>();
        thread::Builder::new()
            .name(format!("detector-{}", name))
            .spawn(move || worker(backend, request_rx, reply_tx))
            .map_err(|e| anyhow!("failed to spawn detector worker: {}", e))?;
        Ok(Self {
            name,
            capabilities,
            timeout,
            requests: request_tx,
            replies: reply_rx,
            next_seq: 0,
            timeouts: 0,
        })
    }

    /// Number of calls that missed their deadline.
    pub fn timeouts(&self) -> u64 {
        self.timeouts
    }

    fn call(&mut self, request: Request, seq: u64) -> Result<Option<Vec<RawDetection>>> {
        self.requests.send(request).map_err(|_| {
            EngineError::detector_unavailable(format!("detector {} worker has stopped", self.name))
        })?;
        loop {
            match self.replies.recv_timeout(self.timeout) {
                Ok((reply_seq, result)) if reply_seq == seq => return result.map(Some),
                Ok((stale_seq, _)) => {
                    log::debug!("discarding late reply {} from {}", stale_seq, self.name);
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.timeouts += 1;
                    return Ok(None);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(EngineError::detector_unavailable(format!(
                        "detector {} worker has stopped",
                        self.name
                    ))
                    .into())
                }
            }
        }
    }

    fn seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

fn worker<B: DetectorBackend>(mut backend: B, requests: Receiver<Request>, replies: Sender<Reply>) {
    for request in requests {
        let reply = match request {
            Request::WarmUp(seq) => (seq, backend.warm_up().map(|_| Vec::new())),
            Request::Detect(seq, frame) => (seq, backend.detect(&frame)),
        };
        if replies.send(reply).is_err() {
            break;
        }
    }
}

impl DetectorBackend for TimedDetector {
    fn name(&self) -> &'static str {
        self.name
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        self.capabilities.contains(&capability)
    }

    fn detect(&mut self, frame: &SampledFrame) -> Result<Vec<RawDetection>> {
        let seq = self.seq();
        match self.call(Request::Detect(seq, frame.clone()), seq)? {
            Some(detections) => Ok(detections),
            None => {
                log::warn!(
                    "detector {} timed out after {:?} on frame {}; treating as no detections",
                    self.name,
                    self.timeout,
                    frame.frame_number
                );
                Ok(Vec::new())
            }
        }
    }

    fn warm_up(&mut self) -> Result<()> {
        let seq = self.seq();
        match self.call(Request::WarmUp(seq), seq) {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(EngineError::detector_unavailable(format!(
                "detector {} did not finish warm-up within {:?}",
                self.name, self.timeout
            ))
            .into()),
            Err(err) => Err(err),
        }
    }
}
