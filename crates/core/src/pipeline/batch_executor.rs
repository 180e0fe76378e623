use crate::cache::encoding_cache::ExtractionResult;
use crate::media::domain::image_source::ImageSource;

/// Per-image work run by an executor; must be callable from many threads.
pub type ImageTask<'a> = dyn Fn(&ImageSource) -> ExtractionResult + Sync + 'a;

/// Abstracts how a batch of independent images is processed.
///
/// This is a port (application-layer interface). Infrastructure provides
/// concrete implementations (e.g. threaded, sequential).
pub trait BatchExecutor: Send + Sync {
    /// Runs `task` once per job and returns the outcomes in job order.
    ///
    /// `on_progress(completed, total)` is called on the calling thread after
    /// each image finishes, in completion order.
    fn execute(
        &self,
        jobs: &[ImageSource],
        task: &ImageTask<'_>,
        on_progress: &mut dyn FnMut(usize, usize),
    ) -> Vec<ExtractionResult>;
}

/// Processes images one at a time on the calling thread.
pub struct SequentialBatchExecutor;

impl BatchExecutor for SequentialBatchExecutor {
    fn execute(
        &self,
        jobs: &[ImageSource],
        task: &ImageTask<'_>,
        on_progress: &mut dyn FnMut(usize, usize),
    ) -> Vec<ExtractionResult> {
        let total = jobs.len();
        jobs.iter()
            .enumerate()
            .map(|(i, job)| {
                let outcome = task(job);
                on_progress(i + 1, total);
                outcome
            })
            .collect()
    }
}
