//! OCR adapter: a lazily started, serialized wrapper around an [`OcrEngine`].

mod engine;
mod geom;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use engine::{
    DEFAULT_OCR_LANGUAGES, DEFAULT_PSM, TesseractEngine, TesseractSession, list_tesseract_languages,
};
pub use geom::BBox;

/// A recognized word with a usable bounding box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub text: String,
    pub confidence: f32,
    pub bbox: BBox,
}

impl Word {
    pub fn new(text: impl Into<String>, confidence: f32, bbox: BBox) -> Self {
        Self {
            text: text.into(),
            confidence,
            bbox,
        }
    }
}

/// A word as reported by an engine, before filtering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawWord {
    pub text: String,
    pub confidence: f32,
    pub bbox: Option<BBox>,
}

#[derive(Debug, Clone, Default)]
pub struct RawRecognition {
    pub text: String,
    pub words: Vec<RawWord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Recognition {
    pub text: String,
    pub words: Vec<Word>,
}

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("ocr engine failed to initialize: {0:#}")]
    Initialization(anyhow::Error),
    #[error("ocr recognition failed: {0:#}")]
    Recognition(anyhow::Error),
}

pub type OcrFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// Starts engine sessions. A session is the expensive, process-wide resource.
pub trait OcrEngine: Send + Sync {
    type Session: OcrSession + 'static;

    fn start(&self) -> OcrFuture<'_, Self::Session>;
}

/// A running engine instance. Sessions are not assumed to be safe for
/// concurrent use; [`OcrService`] never calls one from two tasks at once.
pub trait OcrSession: Send + Sync {
    fn recognize<'a>(&'a self, image_bytes: &'a [u8]) -> OcrFuture<'a, RawRecognition>;

    fn terminate(&self) -> OcrFuture<'_, ()>;
}

/// Lazily starts its engine on first use and serializes every call through one
/// async mutex: a second concurrent `recognize` waits for the first to finish.
pub struct OcrService<E: OcrEngine> {
    engine: E,
    session: Mutex<Option<E::Session>>,
}

impl<E: OcrEngine> OcrService<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            session: Mutex::new(None),
        }
    }

    pub async fn is_initialized(&self) -> bool {
        self.session.lock().await.is_some()
    }

    pub async fn initialize(&self) -> Result<(), OcrError> {
        let mut slot = self.session.lock().await;
        self.ensure_started(&mut slot).await.map(|_| ())
    }

    pub async fn recognize(&self, image_bytes: &[u8]) -> Result<Recognition, OcrError> {
        let mut slot = self.session.lock().await;
        let session = self.ensure_started(&mut slot).await?;
        debug!(bytes = image_bytes.len(), "running ocr");
        let raw = session
            .recognize(image_bytes)
            .await
            .map_err(OcrError::Recognition)?;
        let recognition = filter_recognition(raw);
        debug!(words = recognition.words.len(), "ocr finished");
        Ok(recognition)
    }

    pub async fn recognize_text(&self, image_bytes: &[u8]) -> Result<String, OcrError> {
        Ok(self.recognize(image_bytes).await?.text)
    }

    /// Releases the engine session. Safe to call when nothing was started; the
    /// next `recognize` starts a fresh session.
    pub async fn dispose(&self) {
        let mut slot = self.session.lock().await;
        let Some(session) = slot.take() else {
            return;
        };
        if let Err(err) = session.terminate().await {
            warn!("failed to terminate ocr engine cleanly: {:#}", err);
        }
        info!("ocr engine released");
    }

    async fn ensure_started<'s>(
        &self,
        slot: &'s mut Option<E::Session>,
    ) -> Result<&'s E::Session, OcrError> {
        if slot.is_none() {
            info!("starting ocr engine");
            let session = self
                .engine
                .start()
                .await
                .map_err(OcrError::Initialization)?;
            *slot = Some(session);
        }
        slot.as_ref()
            .ok_or_else(|| OcrError::Initialization(anyhow!("ocr engine session missing")))
    }
}

fn filter_recognition(raw: RawRecognition) -> Recognition {
    let words = raw
        .words
        .into_iter()
        .filter_map(|word| {
            let text = word.text.trim();
            if text.is_empty() {
                return None;
            }
            let bbox = word.bbox.filter(BBox::is_valid)?;
            Some(Word::new(text, word.confidence, bbox))
        })
        .collect();
    Recognition {
        text: raw.text.trim().to_string(),
        words,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Counters {
        starts: AtomicUsize,
        terminations: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fail_next_start: AtomicBool,
    }

    struct FakeEngine {
        counters: Arc<Counters>,
        words: Vec<RawWord>,
    }

    struct FakeSession {
        counters: Arc<Counters>,
        words: Vec<RawWord>,
    }

    impl OcrEngine for FakeEngine {
        type Session = FakeSession;

        fn start(&self) -> OcrFuture<'_, FakeSession> {
            Box::pin(async move {
                if self.counters.fail_next_start.swap(false, Ordering::SeqCst) {
                    return Err(anyhow!("traineddata missing"));
                }
                self.counters.starts.fetch_add(1, Ordering::SeqCst);
                Ok(FakeSession {
                    counters: self.counters.clone(),
                    words: self.words.clone(),
                })
            })
        }
    }

    impl OcrSession for FakeSession {
        fn recognize<'a>(&'a self, _image_bytes: &'a [u8]) -> OcrFuture<'a, RawRecognition> {
            Box::pin(async move {
                let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.counters.max_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(RawRecognition {
                    text: "  HELLO WORLD \n".to_string(),
                    words: self.words.clone(),
                })
            })
        }

        fn terminate(&self) -> OcrFuture<'_, ()> {
            Box::pin(async move {
                self.counters.terminations.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    fn raw(text: &str, bbox: Option<BBox>) -> RawWord {
        RawWord {
            text: text.to_string(),
            confidence: 90.0,
            bbox,
        }
    }

    fn service(words: Vec<RawWord>) -> (OcrService<FakeEngine>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let engine = FakeEngine {
            counters: counters.clone(),
            words,
        };
        (OcrService::new(engine), counters)
    }

    #[tokio::test]
    async fn starts_engine_once_across_calls() {
        let (service, counters) = service(vec![raw("HELLO", Some(BBox::new(0.0, 0.0, 5.0, 5.0)))]);
        service.recognize(b"png").await.expect("first");
        service.recognize(b"png").await.expect("second");
        service.initialize().await.expect("init");
        assert_eq!(counters.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn drops_blank_and_boxless_words() {
        let (service, _) = service(vec![
            raw("HELLO", Some(BBox::new(0.0, 0.0, 50.0, 10.0))),
            raw("   ", Some(BBox::new(0.0, 0.0, 5.0, 5.0))),
            raw("floating", None),
            raw("flat", Some(BBox::new(3.0, 3.0, 3.0, 9.0))),
            raw(" WORLD ", Some(BBox::new(55.0, 0.0, 100.0, 10.0))),
        ]);
        let result = service.recognize(b"png").await.expect("recognize");
        assert_eq!(result.text, "HELLO WORLD");
        let texts: Vec<_> = result.words.iter().map(|word| word.text.as_str()).collect();
        assert_eq!(texts, vec!["HELLO", "WORLD"]);
    }

    #[tokio::test]
    async fn init_failure_is_reported_and_retryable() {
        let (service, counters) = service(Vec::new());
        counters.fail_next_start.store(true, Ordering::SeqCst);
        let err = service.recognize(b"png").await.expect_err("init must fail");
        assert!(matches!(err, OcrError::Initialization(_)));
        assert!(!service.is_initialized().await);

        service.recognize(b"png").await.expect("retry succeeds");
        assert_eq!(counters.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispose_is_safe_and_allows_restart() {
        let (service, counters) = service(Vec::new());
        service.dispose().await;
        assert_eq!(counters.terminations.load(Ordering::SeqCst), 0);

        service.initialize().await.expect("init");
        service.dispose().await;
        assert!(!service.is_initialized().await);
        assert_eq!(counters.terminations.load(Ordering::SeqCst), 1);

        service.recognize(b"png").await.expect("restart");
        assert_eq!(counters.starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_calls_queue_on_one_session() {
        let (service, counters) = service(Vec::new());
        let service = Arc::new(service);
        let mut handles = Vec::new();
        for _ in 0..4 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service.recognize(b"png").await.map(|_| ())
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("recognize");
        }
        assert_eq!(counters.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(counters.starts.load(Ordering::SeqCst), 1);
    }
}
