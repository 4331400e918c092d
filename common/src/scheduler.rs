use tracing::instrument;

use crate::chunk::ChunkDescriptor;
use crate::error::{ChunkError, Error};
use crate::progress::Progress;
use crate::reader::ChunkResult;

/// Runs `reader` for every descriptor with at most `concurrency_limit` reads in flight.
///
/// Descriptors are admitted in index order through a sliding window: a new read starts as
/// soon as any running one finishes. Completion order is arbitrary, the returned results are
/// index-aligned with `descriptors`. Every completion is recorded in `progress` right away.
///
/// A read task that panics is reported as [`ChunkError::Aborted`] for its descriptor, so
/// there's always exactly one result per descriptor. Note that the `rchunk` binary is built
/// with `panic = "abort"`, there a panicking read ends the process instead.
#[instrument(skip_all, fields(chunks = descriptors.len(), concurrency_limit = concurrency_limit))]
pub async fn run<R, Fut>(
    descriptors: &[ChunkDescriptor],
    concurrency_limit: usize,
    progress: &Progress,
    reader: R,
) -> Result<Vec<ChunkResult>, Error>
where
    R: Fn(ChunkDescriptor) -> Fut + Clone + Send + Sync + 'static,
    Fut: std::future::Future<Output = ChunkResult> + Send + 'static,
{
    if concurrency_limit == 0 {
        return Err(Error::InvalidConfiguration(
            "concurrency limit must be at least 1".to_string(),
        ));
    }
    let mut results: Vec<Option<ChunkResult>> = descriptors.iter().map(|_| None).collect();
    let mut in_flight = std::collections::HashMap::new();
    let mut join_set = tokio::task::JoinSet::new();
    for descriptor in descriptors {
        if join_set.len() >= concurrency_limit {
            if let Some(res) = join_set.join_next_with_id().await {
                store(&mut results, &mut in_flight, progress, res);
            }
        }
        let reader = reader.clone();
        let descriptor = *descriptor;
        let handle = join_set.spawn(async move { reader(descriptor).await });
        in_flight.insert(handle.id(), descriptor);
    }
    while let Some(res) = join_set.join_next_with_id().await {
        store(&mut results, &mut in_flight, progress, res);
    }
    Ok(results
        .into_iter()
        .zip(descriptors)
        .map(|(slot, descriptor)| {
            slot.unwrap_or_else(|| {
                tracing::error!("no result for chunk {}", descriptor.index);
                let result = ChunkResult::failed(*descriptor, ChunkError::Aborted);
                progress.record(&result);
                result
            })
        })
        .collect())
}

fn store(
    results: &mut [Option<ChunkResult>],
    in_flight: &mut std::collections::HashMap<tokio::task::Id, ChunkDescriptor>,
    progress: &Progress,
    res: Result<(tokio::task::Id, ChunkResult), tokio::task::JoinError>,
) {
    let result = match res {
        Ok((id, result)) => {
            in_flight.remove(&id);
            result
        }
        Err(error) => {
            tracing::error!("chunk read task failed: {}", &error);
            match in_flight.remove(&error.id()) {
                Some(descriptor) => ChunkResult::failed(descriptor, ChunkError::Aborted),
                None => return,
            }
        }
    };
    let index = result.index();
    match results.get_mut(index) {
        Some(slot) if slot.is_none() => {
            progress.record(&result);
            *slot = Some(result);
        }
        _ => tracing::error!("dropping unexpected result for chunk {}", index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    fn payload_for(descriptor: &ChunkDescriptor) -> bytes::Bytes {
        bytes::Bytes::from(vec![descriptor.index as u8; descriptor.length as usize])
    }

    #[tokio::test]
    #[traced_test]
    async fn results_are_index_aligned_despite_completion_order() -> Result<(), anyhow::Error> {
        let descriptors = chunk::plan(64 * 10, 64)?;
        let progress = Progress::new();
        progress.start(64 * 10, descriptors.len());
        let completed = Arc::new(std::sync::Mutex::new(Vec::new()));
        let reader = {
            let completed = completed.clone();
            move |descriptor: ChunkDescriptor| {
                let completed = completed.clone();
                async move {
                    // later chunks finish first
                    let delay = 5 * (10 - descriptor.index as u64);
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                    completed.lock().unwrap().push(descriptor.index);
                    ChunkResult::ok(descriptor, payload_for(&descriptor))
                }
            }
        };
        let results = run(&descriptors, 10, &progress, reader).await?;
        assert_eq!(results.len(), descriptors.len());
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.index(), i);
            assert!(result.is_ok());
        }
        let completed = completed.lock().unwrap();
        assert_ne!(*completed, (0..10).collect::<Vec<_>>());
        assert_eq!(progress.snapshot().read_chunks_ok, 10);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn in_flight_reads_never_exceed_limit() -> Result<(), anyhow::Error> {
        let descriptors = chunk::plan(40 * 16, 16)?;
        let progress = Progress::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let high_water_mark = Arc::new(AtomicUsize::new(0));
        let reader = {
            let in_flight = in_flight.clone();
            let high_water_mark = high_water_mark.clone();
            move |descriptor: ChunkDescriptor| {
                let in_flight = in_flight.clone();
                let high_water_mark = high_water_mark.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    high_water_mark.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    ChunkResult::ok(descriptor, payload_for(&descriptor))
                }
            }
        };
        let results = run(&descriptors, 4, &progress, reader).await?;
        assert_eq!(results.len(), 40);
        assert_eq!(high_water_mark.load(Ordering::SeqCst), 4);
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn failures_are_recorded_not_propagated() -> Result<(), anyhow::Error> {
        let descriptors = chunk::plan(1000, 100)?;
        let progress = Progress::new();
        progress.start(1000, descriptors.len());
        let reader = |descriptor: ChunkDescriptor| async move {
            if descriptor.index % 3 == 0 {
                ChunkResult::failed(
                    descriptor,
                    ChunkError::ShortRead {
                        expected: descriptor.length,
                        actual: 0,
                    },
                )
            } else {
                ChunkResult::ok(descriptor, payload_for(&descriptor))
            }
        };
        let results = run(&descriptors, 3, &progress, reader).await?;
        let failed: Vec<usize> = results
            .iter()
            .filter(|result| !result.is_ok())
            .map(ChunkResult::index)
            .collect();
        assert_eq!(failed, vec![0, 3, 6, 9]);
        let status = progress.snapshot();
        assert_eq!(status.read_chunks_error, 4);
        assert_eq!(status.read_bytes_error, 400);
        assert_eq!(status.processed_bytes, 1000);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn panicking_read_becomes_aborted_result() -> Result<(), anyhow::Error> {
        let descriptors = chunk::plan(30, 10)?;
        let progress = Progress::new();
        let reader = |descriptor: ChunkDescriptor| async move {
            if descriptor.index == 1 {
                panic!("injected failure");
            }
            ChunkResult::ok(descriptor, payload_for(&descriptor))
        };
        let results = run(&descriptors, 2, &progress, reader).await?;
        assert!(!logs_contain("no result for chunk"));
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1].outcome, Err(ChunkError::Aborted)));
        assert_eq!(results[1].index(), 1);
        assert!(results[2].is_ok());
        assert_eq!(progress.snapshot().read_chunks_error, 1);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn panicked_read_is_recorded_when_it_completes() -> Result<(), anyhow::Error> {
        let descriptors = chunk::plan(20, 10)?;
        let progress = Arc::new(Progress::new());
        progress.start(20, descriptors.len());
        let reader = {
            let progress = progress.clone();
            move |descriptor: ChunkDescriptor| {
                let progress = progress.clone();
                async move {
                    if descriptor.index == 0 {
                        panic!("injected failure");
                    }
                    // only succeed once the panicked chunk shows up in the progress
                    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
                    while progress.snapshot().read_chunks_error == 0 {
                        if tokio::time::Instant::now() > deadline {
                            return ChunkResult::failed(descriptor, ChunkError::Aborted);
                        }
                        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                    }
                    ChunkResult::ok(descriptor, payload_for(&descriptor))
                }
            }
        };
        let results = run(&descriptors, 2, &progress, reader).await?;
        assert!(matches!(results[0].outcome, Err(ChunkError::Aborted)));
        assert!(results[1].is_ok());
        let status = progress.snapshot();
        assert_eq!(status.read_chunks_error, 1);
        assert_eq!(status.read_chunks_ok, 1);
        Ok(())
    }

    #[tokio::test]
    async fn zero_limit_is_rejected() {
        let progress = Progress::new();
        let reader = |descriptor: ChunkDescriptor| async move {
            ChunkResult::ok(descriptor, bytes::Bytes::new())
        };
        assert!(matches!(
            run(&[], 0, &progress, reader).await,
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn no_descriptors_no_results() -> Result<(), anyhow::Error> {
        let progress = Progress::new();
        let reader = |descriptor: ChunkDescriptor| async move {
            ChunkResult::ok(descriptor, bytes::Bytes::new())
        };
        assert!(run(&[], 1, &progress, reader).await?.is_empty());
        Ok(())
    }
}
