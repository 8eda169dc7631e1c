use crate::ocr::{OcrEngine, OcrService};
use crate::providers::TranslationProvider;

/// Collaborators reachable through the boundary server.
pub struct ServerState<E: OcrEngine, P: TranslationProvider> {
    pub ocr: OcrService<E>,
    pub translator: P,
}

impl<E: OcrEngine, P: TranslationProvider> ServerState<E, P> {
    pub fn new(engine: E, translator: P) -> Self {
        Self {
            ocr: OcrService::new(engine),
            translator,
        }
    }
}
