//! A fixed pool of model instances shared by request handlers.
//!
//! Each instance is leased to exactly one caller at a time, so the stateful
//! set-image/predict sequence of a model never interleaves with another
//! request. Waiting callers are bounded by `queue_depth` and by
//! `acquire_timeout`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::RgbImage;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, error, warn};

use segd_core::{BoundingBox, Error, Mask, MaskPredictor, Result, SegmentationModel};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Callers allowed to wait for an instance once all are busy.
    pub queue_depth: usize,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            queue_depth: 8,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

type Idle = Arc<Mutex<Vec<Box<dyn SegmentationModel>>>>;

pub struct Segmentor {
    idle: Idle,
    permits: Arc<Semaphore>,
    waiting: AtomicUsize,
    size: Arc<AtomicUsize>,
    config: PoolConfig,
}

impl Segmentor {
    pub fn new(models: Vec<Box<dyn SegmentationModel>>, config: PoolConfig) -> Result<Self> {
        if models.is_empty() {
            return Err(Error::Config("segmentor needs at least one model instance".to_string()));
        }
        let size = models.len();
        Ok(Self {
            idle: Arc::new(Mutex::new(models)),
            permits: Arc::new(Semaphore::new(size)),
            waiting: AtomicUsize::new(0),
            size: Arc::new(AtomicUsize::new(size)),
            config,
        })
    }

    /// Live model instances, idle or leased.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    /// Instances free right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    async fn admit(&self) -> Result<OwnedSemaphorePermit> {
        match self.permits.clone().try_acquire_owned() {
            Ok(permit) => return Ok(permit),
            Err(TryAcquireError::Closed) => return Err(retired()),
            Err(TryAcquireError::NoPermits) => {}
        }

        let _slot = QueueSlot::join(&self.waiting, self.config.queue_depth).ok_or_else(|| {
            warn!(queue_depth = self.config.queue_depth, "segmentation queue is full");
            Error::Busy("all model instances are busy and the queue is full".to_string())
        })?;

        match tokio::time::timeout(self.config.acquire_timeout, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(retired()),
            Err(_) => Err(Error::Busy(format!(
                "no model instance became free within {:?}",
                self.config.acquire_timeout
            ))),
        }
    }
}

#[async_trait]
impl MaskPredictor for Segmentor {
    async fn get_mask(&self, image: RgbImage, bbox: BoundingBox) -> Result<Mask> {
        let permit = self.admit().await?;
        let model = self
            .idle
            .lock()
            .pop()
            .ok_or_else(|| Error::Inference("no idle model instance".to_string()))?;
        let lease = Lease {
            model: Some(model),
            idle: self.idle.clone(),
            permit: Some(permit),
            permits: self.permits.clone(),
            size: self.size.clone(),
        };

        // The lease travels with the blocking job, so the instance comes back
        // even if this future is dropped before the job finishes.
        let job = tokio::task::spawn_blocking(move || {
            let mut lease = lease;
            let (width, height) = image.dimensions();
            let model = lease
                .model
                .as_mut()
                .ok_or_else(|| Error::Inference("lease holds no model".to_string()))?;
            debug!(model = model.name(), width, height, %bbox, "running inference");
            let mask = model.segment(&image, &bbox)?;
            if mask.dimensions() != (width, height) {
                return Err(Error::Inference(format!(
                    "model returned a {}x{} mask for a {}x{} image",
                    mask.width(),
                    mask.height(),
                    width,
                    height
                )));
            }
            Ok(mask)
        });

        match job.await {
            Ok(result) => result,
            Err(err) => {
                error!(error = %err, "inference task failed");
                Err(Error::Inference(format!("inference task failed: {}", err)))
            }
        }
    }
}

fn retired() -> Error {
    Error::Inference("every model instance has been retired after a failure".to_string())
}

/// Exclusive use of one model instance plus the permit that accounts for it.
struct Lease {
    model: Option<Box<dyn SegmentationModel>>,
    idle: Idle,
    permit: Option<OwnedSemaphorePermit>,
    permits: Arc<Semaphore>,
    size: Arc<AtomicUsize>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        let Some(model) = self.model.take() else {
            return;
        };
        let permit = self.permit.take();

        if std::thread::panicking() {
            // Its internal state can no longer be trusted; retire it for good.
            if let Some(permit) = permit {
                permit.forget();
            }
            let remaining = self.size.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
            error!(model = model.name(), pool_size = remaining, "discarding model instance after panic");
            if remaining == 0 {
                // No instance left to wait for.
                self.permits.close();
            }
            return;
        }

        self.idle.lock().push(model);
        drop(permit);
    }
}

/// A place in the wait queue, released on drop.
struct QueueSlot<'a> {
    waiting: &'a AtomicUsize,
}

impl<'a> QueueSlot<'a> {
    fn join(waiting: &'a AtomicUsize, depth: usize) -> Option<Self> {
        waiting
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < depth).then_some(current + 1)
            })
            .ok()
            .map(|_| Self { waiting })
    }
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    /// Blocks in `predict` until told to continue.
    #[derive(Debug)]
    struct GatedModel {
        gate: Arc<Mutex<mpsc::Receiver<()>>>,
    }

    impl SegmentationModel for GatedModel {
        fn name(&self) -> &str {
            "Gated"
        }

        fn set_image(&mut self, _image: &RgbImage) -> Result<()> {
            Ok(())
        }

        fn predict(&mut self, _bbox: &BoundingBox) -> Result<Mask> {
            let _ = self.gate.lock().recv();
            Ok(Mask::filled(2, 2, true))
        }
    }

    #[derive(Debug)]
    struct PanickingModel;

    impl SegmentationModel for PanickingModel {
        fn name(&self) -> &str {
            "Panicking"
        }

        fn set_image(&mut self, _image: &RgbImage) -> Result<()> {
            Ok(())
        }

        fn predict(&mut self, _bbox: &BoundingBox) -> Result<Mask> {
            panic!("model state corrupted");
        }
    }

    #[derive(Debug)]
    struct WrongShapeModel;

    impl SegmentationModel for WrongShapeModel {
        fn name(&self) -> &str {
            "WrongShape"
        }

        fn set_image(&mut self, _image: &RgbImage) -> Result<()> {
            Ok(())
        }

        fn predict(&mut self, _bbox: &BoundingBox) -> Result<Mask> {
            Ok(Mask::filled(1, 1, true))
        }
    }

    fn bbox() -> BoundingBox {
        BoundingBox::new(0, 0, 2, 2).unwrap()
    }

    async fn wait_until_busy(segmentor: &Segmentor) {
        while segmentor.available() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[test]
    fn test_empty_pool_is_rejected() {
        assert!(Segmentor::new(vec![], PoolConfig::default()).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_full_queue_is_busy() {
        let (tx, rx) = mpsc::channel();
        let model = GatedModel {
            gate: Arc::new(Mutex::new(rx)),
        };
        let config = PoolConfig {
            queue_depth: 0,
            acquire_timeout: Duration::from_secs(5),
        };
        let segmentor = Arc::new(Segmentor::new(vec![Box::new(model)], config).unwrap());

        let running = {
            let segmentor = segmentor.clone();
            tokio::spawn(async move { segmentor.get_mask(RgbImage::new(2, 2), bbox()).await })
        };
        wait_until_busy(&segmentor).await;

        let err = segmentor.get_mask(RgbImage::new(2, 2), bbox()).await.unwrap_err();
        assert!(matches!(err, Error::Busy(_)));

        tx.send(()).unwrap();
        let mask = running.await.unwrap().unwrap();
        assert_eq!(mask.area(), 4);
        assert_eq!(segmentor.available(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_acquire_timeout_is_busy() {
        let (tx, rx) = mpsc::channel();
        let model = GatedModel {
            gate: Arc::new(Mutex::new(rx)),
        };
        let config = PoolConfig {
            queue_depth: 4,
            acquire_timeout: Duration::from_millis(50),
        };
        let segmentor = Arc::new(Segmentor::new(vec![Box::new(model)], config).unwrap());

        let running = {
            let segmentor = segmentor.clone();
            tokio::spawn(async move { segmentor.get_mask(RgbImage::new(2, 2), bbox()).await })
        };
        wait_until_busy(&segmentor).await;

        let err = segmentor.get_mask(RgbImage::new(2, 2), bbox()).await.unwrap_err();
        assert!(matches!(err, Error::Busy(_)));

        tx.send(()).unwrap();
        assert!(running.await.unwrap().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_queued_request_runs_after_release() {
        let (tx, rx) = mpsc::channel();
        let model = GatedModel {
            gate: Arc::new(Mutex::new(rx)),
        };
        let segmentor = Arc::new(Segmentor::new(vec![Box::new(model)], PoolConfig::default()).unwrap());

        let first = {
            let segmentor = segmentor.clone();
            tokio::spawn(async move { segmentor.get_mask(RgbImage::new(2, 2), bbox()).await })
        };
        wait_until_busy(&segmentor).await;
        let second = {
            let segmentor = segmentor.clone();
            tokio::spawn(async move { segmentor.get_mask(RgbImage::new(2, 2), bbox()).await })
        };

        tx.send(()).unwrap();
        tx.send(()).unwrap();
        assert!(first.await.unwrap().is_ok());
        assert!(second.await.unwrap().is_ok());
        assert_eq!(segmentor.available(), 1);
    }

    #[tokio::test]
    async fn test_panicking_model_is_retired() {
        let segmentor = Segmentor::new(vec![Box::new(PanickingModel)], PoolConfig::default()).unwrap();

        let err = segmentor.get_mask(RgbImage::new(2, 2), bbox()).await.unwrap_err();
        assert!(matches!(err, Error::Inference(_)));
        assert_eq!(segmentor.size(), 0);
        assert_eq!(segmentor.available(), 0);
    }

    #[tokio::test]
    async fn test_pool_without_instances_fails_fast() {
        let config = PoolConfig {
            queue_depth: 8,
            acquire_timeout: Duration::from_secs(30),
        };
        let segmentor = Segmentor::new(vec![Box::new(PanickingModel)], config).unwrap();
        assert!(segmentor.get_mask(RgbImage::new(2, 2), bbox()).await.is_err());

        for _ in 0..2 {
            let result = tokio::time::timeout(
                Duration::from_secs(1),
                segmentor.get_mask(RgbImage::new(2, 2), bbox()),
            )
            .await
            .expect("a retired pool must not wait for an instance");
            let err = result.unwrap_err();
            assert!(matches!(err, Error::Inference(_)), "got {err:?}");
        }
    }

    #[tokio::test]
    async fn test_surviving_instance_keeps_serving() {
        use crate::BoxModel;

        // The last instance is leased first.
        let models: Vec<Box<dyn SegmentationModel>> = vec![Box::new(BoxModel::new()), Box::new(PanickingModel)];
        let segmentor = Segmentor::new(models, PoolConfig::default()).unwrap();

        assert!(segmentor.get_mask(RgbImage::new(2, 2), bbox()).await.is_err());
        assert_eq!(segmentor.size(), 1);

        let mask = segmentor.get_mask(RgbImage::new(2, 2), bbox()).await.unwrap();
        assert_eq!(mask.area(), 4);
        assert_eq!(segmentor.available(), 1);
    }

    #[tokio::test]
    async fn test_mask_shape_is_checked() {
        let segmentor = Segmentor::new(vec![Box::new(WrongShapeModel)], PoolConfig::default()).unwrap();

        let err = segmentor.get_mask(RgbImage::new(2, 2), bbox()).await.unwrap_err();
        assert!(err.to_string().contains("1x1 mask"));
        // A bad answer is not a broken instance.
        assert_eq!(segmentor.available(), 1);
        assert_eq!(segmentor.size(), 1);
    }
}
