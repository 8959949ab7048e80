//! OCR worker thread.
//!
//! Runs the CPU-bound preprocess → extract → normalize pipeline off the
//! controller's task. The only data shared with the controller is the job
//! going in and the result coming out.

use std::sync::mpsc::Receiver;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::automation::queue::{OcrDone, OcrJob};
use crate::ocr::{ocr_capture, TextExtractor};

/// Runs the OCR worker loop.
///
/// Processes jobs until the job channel closes or the controller stops
/// listening for results. Blocks, so run it on a dedicated thread.
pub fn run_ocr_worker(
    receiver: Receiver<OcrJob>,
    extractor: Box<dyn TextExtractor>,
    results: UnboundedSender<OcrDone>,
) {
    info!("OCR worker started");

    while let Ok(job) = receiver.recv() {
        let started = Instant::now();
        debug!(
            "OCR worker: {:?} job, {}x{} frame, {:?} mode",
            job.origin,
            job.image.width(),
            job.image.height(),
            job.mode
        );

        let result = ocr_capture(job.image, job.mode, extractor.as_ref(), &job.normalizer);
        debug!("OCR worker: done in {:?}", started.elapsed());

        let done = OcrDone {
            origin: job.origin,
            result,
            captured_at: job.captured_at,
        };
        if results.send(done).is_err() {
            warn!("OCR worker: result channel closed, exiting");
            break;
        }
    }

    info!("OCR worker finished");
}

/// Spawns [`run_ocr_worker`] on a named thread.
pub fn spawn_ocr_worker(
    receiver: Receiver<OcrJob>,
    extractor: Box<dyn TextExtractor>,
    results: UnboundedSender<OcrDone>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("ocr-worker".to_string())
        .spawn(move || run_ocr_worker(receiver, extractor, results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::queue::{create_result_channel, create_work_queue, Origin};
    use crate::error::OcrError;
    use crate::ocr::{Normalizer, OcrMode, Token};
    use image::{GrayImage, Rgba, RgbaImage};

    struct Echo(&'static str);

    impl TextExtractor for Echo {
        fn extract(&self, _img: &GrayImage, _mode: OcrMode) -> Result<String, OcrError> {
            Ok(self.0.to_string())
        }
    }

    fn job(origin: Origin) -> OcrJob {
        OcrJob::new(
            origin,
            RgbaImage::from_pixel(20, 10, Rgba([255, 255, 255, 255])),
            OcrMode::Sparse,
            Normalizer::new(3, &[], "Reply to"),
        )
    }

    #[test]
    fn test_worker_exits_when_channel_closes() {
        let (sender, receiver) = create_work_queue();
        let (results, _results_rx) = create_result_channel();
        let handle = spawn_ocr_worker(receiver, Box::new(Echo("x")), results).unwrap();

        drop(sender);
        handle.join().expect("Worker thread panicked");
    }

    #[test]
    fn test_worker_replies_with_origin() {
        let (sender, receiver) = create_work_queue();
        let (results, mut results_rx) = create_result_channel();
        let handle =
            spawn_ocr_worker(receiver, Box::new(Echo("Reply to zoe99...")), results).unwrap();

        sender.send(job(Origin::Loop(7))).unwrap();
        drop(sender);
        handle.join().unwrap();

        let done = results_rx.try_recv().unwrap();
        assert_eq!(done.origin, Origin::Loop(7));
        assert_eq!(done.result.token, Token::Text("zoe99".to_string()));
    }

    #[test]
    fn test_worker_exits_when_results_dropped() {
        let (sender, receiver) = create_work_queue();
        let (results, results_rx) = create_result_channel();
        drop(results_rx);
        let handle = spawn_ocr_worker(receiver, Box::new(Echo("abc")), results).unwrap();

        sender.send(job(Origin::Manual)).unwrap();
        handle.join().unwrap();
    }
}
