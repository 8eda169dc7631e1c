mod parse;
mod preprocess;
mod tesseract;

pub use tesseract::{
    DEFAULT_OCR_LANGUAGES, DEFAULT_PSM, TesseractEngine, TesseractSession, list_tesseract_languages,
};
