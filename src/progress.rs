//! Progress-callback trait for pipeline events.
//!
//! Attach an [`Arc<dyn GuideProgressCallback>`] with
//! [`crate::generate::GuidePipeline::with_progress`] to observe a run: page
//! extraction, escalations, the refinement pass and each illustration. Events
//! are emitted from the single task driving the job, in order.
//!
//! # Example
//!
//! ```rust
//! use guidegen::GuideProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct EscalationCounter(AtomicUsize);
//!
//! impl GuideProgressCallback for EscalationCounter {
//!     fn on_page_complete(&self, _page: usize, _total: usize, _steps: usize, escalated: bool) {
//!         if escalated {
//!             self.0.fetch_add(1, Ordering::SeqCst);
//!         }
//!     }
//! }
//! ```

use std::sync::Arc;

/// Called by the pipeline as it progresses. Every method defaults to a no-op.
pub trait GuideProgressCallback: Send + Sync {
    /// Called once the PDF is rendered, before Pass 1.
    fn on_generation_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called before the first model call for a page (1-indexed).
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page has a usable extraction.
    ///
    /// * `step_count` — steps found on the page
    /// * `escalated`  — whether the expensive tier was consulted for this page
    fn on_page_complete(&self, page_num: usize, total_pages: usize, step_count: usize, escalated: bool) {
        let _ = (page_num, total_pages, step_count, escalated);
    }

    /// Called when a page degraded to an empty extraction.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called before the single Pass-2 call.
    fn on_refinement_start(&self, step_count: usize) {
        let _ = step_count;
    }

    /// Called after Pass 2, whether or not the response was usable.
    fn on_refinement_complete(&self, steps_before: usize, steps_after: usize) {
        let _ = (steps_before, steps_after);
    }

    fn on_illustration_start(&self, step_number: u32, total_steps: usize) {
        let _ = (step_number, total_steps);
    }

    /// `error` is `Some` when the image call failed and a flag was recorded.
    fn on_illustration_complete(&self, step_number: u32, total_steps: usize, error: Option<&str>) {
        let _ = (step_number, total_steps, error);
    }

    /// Called once with the final step count and overall confidence.
    fn on_generation_complete(&self, step_count: usize, overall_confidence: f64) {
        let _ = (step_count, overall_confidence);
    }
}

/// Default when no callback is attached.
pub struct NoopProgressCallback;

impl GuideProgressCallback for NoopProgressCallback {}

pub type ProgressCallback = Arc<dyn GuideProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        pages: AtomicUsize,
        escalated: AtomicUsize,
        errors: Mutex<Vec<String>>,
    }

    impl GuideProgressCallback for Recorder {
        fn on_page_complete(&self, _page: usize, _total: usize, _steps: usize, escalated: bool) {
            self.pages.fetch_add(1, Ordering::SeqCst);
            if escalated {
                self.escalated.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn on_illustration_complete(&self, step: u32, _total: usize, error: Option<&str>) {
            if let Some(e) = error {
                self.errors.lock().unwrap().push(format!("{step}: {e}"));
            }
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_generation_start(5);
        cb.on_page_start(1, 5);
        cb.on_page_complete(1, 5, 2, false);
        cb.on_page_error(2, 5, "unparseable");
        cb.on_refinement_start(9);
        cb.on_refinement_complete(9, 8);
        cb.on_illustration_start(1, 8);
        cb.on_illustration_complete(1, 8, None);
        cb.on_generation_complete(8, 0.91);
    }

    #[test]
    fn recorder_receives_events_through_arc_dyn() {
        let rec = Arc::new(Recorder::default());
        let cb: ProgressCallback = rec.clone();
        cb.on_page_complete(1, 3, 2, false);
        cb.on_page_complete(2, 3, 1, true);
        cb.on_illustration_complete(4, 6, Some("HTTP 500"));
        assert_eq!(rec.pages.load(Ordering::SeqCst), 2);
        assert_eq!(rec.escalated.load(Ordering::SeqCst), 1);
        assert_eq!(rec.errors.lock().unwrap().as_slice(), ["4: HTTP 500"]);
    }
}
