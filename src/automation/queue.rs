//! Work queue between the loop controller and the OCR worker thread.
//!
//! Jobs go over a std::sync::mpsc channel (the worker is a plain thread);
//! results come back over a tokio unbounded channel so the controller can
//! await them without blocking.

use chrono::{DateTime, Local};
use image::RgbaImage;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::ocr::{Normalizer, OcrMode, OcrResult};

/// Who asked for a piece of work.
///
/// Loop work carries the run generation it was issued under, so results that
/// arrive after a stop (or a stop and restart) can be recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Loop(u64),
    Manual,
}

/// A captured frame waiting for OCR.
#[derive(Debug, Clone)]
pub struct OcrJob {
    pub origin: Origin,
    pub image: RgbaImage,
    pub mode: OcrMode,
    /// Normalizer snapshot for the cycle that captured the frame
    pub normalizer: Normalizer,
    pub captured_at: DateTime<Local>,
}

impl OcrJob {
    pub fn new(origin: Origin, image: RgbaImage, mode: OcrMode, normalizer: Normalizer) -> Self {
        Self {
            origin,
            image,
            mode,
            normalizer,
            captured_at: Local::now(),
        }
    }
}

/// The worker's answer to one job.
#[derive(Debug, Clone)]
pub struct OcrDone {
    pub origin: Origin,
    pub result: OcrResult,
    pub captured_at: DateTime<Local>,
}

impl OcrDone {
    /// Time from the frame being captured until `now`.
    pub fn latency(&self, now: DateTime<Local>) -> Duration {
        (now - self.captured_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Creates the job queue: the controller keeps the sender, the worker thread
/// owns the receiver. Unbounded, but the controller never has more than one
/// loop job and one manual job outstanding.
pub fn create_work_queue() -> (Sender<OcrJob>, Receiver<OcrJob>) {
    channel()
}

/// Creates the result channel the worker replies on.
pub fn create_result_channel() -> (UnboundedSender<OcrDone>, UnboundedReceiver<OcrDone>) {
    unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn job(origin: Origin) -> OcrJob {
        OcrJob::new(
            origin,
            RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255])),
            OcrMode::Sparse,
            Normalizer::new(3, &[], "Reply to"),
        )
    }

    #[test]
    fn test_work_queue_preserves_order() {
        let (sender, receiver) = create_work_queue();
        for generation in 1..=3 {
            sender.send(job(Origin::Loop(generation))).unwrap();
        }
        sender.send(job(Origin::Manual)).unwrap();

        for generation in 1..=3 {
            assert_eq!(receiver.recv().unwrap().origin, Origin::Loop(generation));
        }
        assert_eq!(receiver.recv().unwrap().origin, Origin::Manual);
    }

    #[test]
    fn test_latency_from_capture_time() {
        let job = job(Origin::Manual);
        let done = OcrDone {
            origin: job.origin,
            result: OcrResult::capture_failed(crate::error::AutomationError::CaptureFailure(
                "x".into(),
            )),
            captured_at: job.captured_at,
        };
        let later = job.captured_at + chrono::Duration::milliseconds(250);
        assert_eq!(done.latency(later), Duration::from_millis(250));

        // A clock that went backwards reads as zero
        let earlier = job.captured_at - chrono::Duration::seconds(1);
        assert_eq!(done.latency(earlier), Duration::ZERO);
    }

    #[test]
    fn test_channel_closes_when_sender_dropped() {
        let (sender, receiver) = create_work_queue();
        sender.send(job(Origin::Manual)).unwrap();
        drop(sender);

        assert!(receiver.recv().is_ok());
        assert!(receiver.recv().is_err());
    }
}
