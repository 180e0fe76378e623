use crate::cache::encoding_cache::ExtractionResult;
use crate::detection::domain::embedding_extractor::ExtractionError;
use crate::media::domain::image_source::ImageSource;
use crate::pipeline::batch_executor::{BatchExecutor, ImageTask};

/// Fans a batch out over a bounded pool of scoped worker threads.
///
/// Layout: `job queue → N workers → main [collect/report progress]`
///
/// Workers pull job indices from a shared channel, so a slow image never
/// stalls the others. Outcomes are put back in job order before returning.
pub struct ThreadedBatchExecutor {
    workers: usize,
}

impl ThreadedBatchExecutor {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

impl Default for ThreadedBatchExecutor {
    fn default() -> Self {
        Self::new(
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        )
    }
}

impl BatchExecutor for ThreadedBatchExecutor {
    fn execute(
        &self,
        jobs: &[ImageSource],
        task: &ImageTask<'_>,
        on_progress: &mut dyn FnMut(usize, usize),
    ) -> Vec<ExtractionResult> {
        let total = jobs.len();
        if total == 0 {
            return Vec::new();
        }
        let workers = self.workers.min(total);

        let (job_tx, job_rx) = crossbeam_channel::bounded::<usize>(total);
        for index in 0..total {
            // Capacity equals the job count, so this never blocks or fails.
            let _ = job_tx.send(index);
        }
        drop(job_tx);

        let (done_tx, done_rx) = crossbeam_channel::unbounded::<(usize, ExtractionResult)>();
        let mut outcomes: Vec<Option<ExtractionResult>> = (0..total).map(|_| None).collect();

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let done_tx = done_tx.clone();
                scope.spawn(move || {
                    for index in job_rx {
                        let outcome = task(&jobs[index]);
                        if done_tx.send((index, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(done_tx);

            let mut completed = 0;
            for (index, outcome) in done_rx {
                outcomes[index] = Some(outcome);
                completed += 1;
                on_progress(completed, total);
            }
        });

        outcomes
            .into_iter()
            .zip(jobs)
            .map(|(outcome, job)| {
                outcome.unwrap_or_else(|| {
                    Err(ExtractionError::inference(&job.id, "worker stopped before finishing"))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::batch_executor::SequentialBatchExecutor;
    use crate::shared::face_embedding::FaceEmbedding;
    use crate::shared::image_id::ImageId;
    use crate::shared::region::Region;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    fn jobs(n: usize) -> Vec<ImageSource> {
        (0..n)
            .map(|i| ImageSource {
                id: ImageId::new(format!("{i:03}.png")),
                path: PathBuf::from(format!("/tmp/{i:03}.png")),
            })
            .collect()
    }

    /// Encodes the job index as a one-element embedding; later jobs finish
    /// first to exercise reordering.
    fn indexed_task(source: &ImageSource) -> ExtractionResult {
        let index: usize = source.id.as_str()[..3].parse().unwrap();
        std::thread::sleep(Duration::from_millis((20 - index as u64 % 20) * 2));
        Ok(vec![FaceEmbedding::new(
            source.id.clone(),
            Region::new(0, 0, 1, 1),
            vec![index as f32],
        )])
    }

    fn indices(outcomes: &[ExtractionResult]) -> Vec<usize> {
        outcomes
            .iter()
            .map(|o| o.as_ref().unwrap()[0].vector()[0] as usize)
            .collect()
    }

    #[test]
    fn test_outcomes_are_in_job_order() {
        let executor = ThreadedBatchExecutor::new(4);
        let batch = jobs(20);
        let outcomes = executor.execute(&batch, &indexed_task, &mut |_, _| {});
        assert_eq!(indices(&outcomes), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_matches_sequential_executor() {
        let batch = jobs(8);
        let threaded = ThreadedBatchExecutor::new(3).execute(&batch, &indexed_task, &mut |_, _| {});
        let sequential = SequentialBatchExecutor.execute(&batch, &indexed_task, &mut |_, _| {});
        assert_eq!(threaded, sequential);
    }

    #[test]
    fn test_progress_reports_every_completion() {
        let batch = jobs(6);
        let mut seen = Vec::new();
        ThreadedBatchExecutor::new(2).execute(&batch, &indexed_task, &mut |done, total| {
            seen.push((done, total));
        });
        assert_eq!(seen, (1..=6).map(|d| (d, 6)).collect::<Vec<_>>());
    }

    #[test]
    fn test_uses_multiple_threads() {
        let batch = jobs(8);
        let threads = Mutex::new(HashSet::new());
        let task = |source: &ImageSource| {
            threads.lock().unwrap().insert(std::thread::current().id());
            std::thread::sleep(Duration::from_millis(20));
            indexed_task(source)
        };
        ThreadedBatchExecutor::new(4).execute(&batch, &task, &mut |_, _| {});
        assert!(threads.lock().unwrap().len() > 1);
    }

    #[test]
    fn test_errors_stay_with_their_job() {
        let batch = jobs(3);
        let task = |source: &ImageSource| {
            if source.id.as_str().starts_with("001") {
                Err(ExtractionError::inference(&source.id, "bad"))
            } else {
                indexed_task(source)
            }
        };
        let outcomes = ThreadedBatchExecutor::new(2).execute(&batch, &task, &mut |_, _| {});
        assert!(outcomes[0].is_ok());
        assert!(outcomes[1].is_err());
        assert!(outcomes[2].is_ok());
    }

    #[test]
    fn test_empty_batch() {
        let outcomes = ThreadedBatchExecutor::new(4).execute(&[], &indexed_task, &mut |_, _| {
            panic!("no progress expected")
        });
        assert!(outcomes.is_empty());
    }

    #[test]
    fn test_zero_workers_clamped_to_one() {
        assert_eq!(ThreadedBatchExecutor::new(0).workers(), 1);
    }
}
