use std::sync::Arc;

use image::{Rgba, RgbaImage};
use screenshot_translator_rust::ocr::{
    BBox, OcrEngine, OcrFuture, OcrService, OcrSession, RawRecognition, RawWord,
};
use screenshot_translator_rust::overlay::{
    Compositor, MemoryHistory, OverlayFont, Region, RunOutcome, TextPainter, LAYER_NAME,
};
use screenshot_translator_rust::providers::{
    LanguageItem, LanguagesResponse, ProviderFuture, RemoteBoundary, TranslateRequest,
    TranslateResponse, TranslationProvider,
};
use screenshot_translator_rust::server::{ServerState, router};
use screenshot_translator_rust::{LanguageMenu, Translator};
use usvg::fontdb;

struct StaticEngine;
struct StaticSession;

impl OcrEngine for StaticEngine {
    type Session = StaticSession;

    fn start(&self) -> OcrFuture<'_, StaticSession> {
        Box::pin(async { Ok(StaticSession) })
    }
}

impl OcrSession for StaticSession {
    fn recognize<'a>(&'a self, _image_bytes: &'a [u8]) -> OcrFuture<'a, RawRecognition> {
        Box::pin(async {
            Ok(RawRecognition {
                text: "HELLO WORLD\nBYE".to_string(),
                words: vec![
                    RawWord {
                        text: "HELLO".to_string(),
                        confidence: 95.0,
                        bbox: Some(BBox::new(10.0, 10.0, 60.0, 30.0)),
                    },
                    RawWord {
                        text: "WORLD".to_string(),
                        confidence: 93.0,
                        bbox: Some(BBox::new(70.0, 11.0, 130.0, 31.0)),
                    },
                    RawWord {
                        text: "BYE".to_string(),
                        confidence: 90.0,
                        bbox: Some(BBox::new(10.0, 40.0, 45.0, 58.0)),
                    },
                ],
            })
        })
    }

    fn terminate(&self) -> OcrFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

struct UppercaseProvider;

impl TranslationProvider for UppercaseProvider {
    fn translate(&self, request: TranslateRequest) -> ProviderFuture<'_, TranslateResponse> {
        Box::pin(async move {
            Ok(TranslateResponse::translated(format!(
                "{} {}",
                request.target_language_code, request.text
            )))
        })
    }

    fn list_languages(&self) -> ProviderFuture<'_, LanguagesResponse> {
        Box::pin(async {
            Ok(LanguagesResponse::listed(vec![LanguageItem {
                code: "ja".to_string(),
                display_name_local: "日本語".to_string(),
                display_name_english: "Japanese".to_string(),
                channel: "gpt".to_string(),
                channel_language_code: None,
            }]))
        })
    }
}

async fn spawn_boundary() -> String {
    let state = Arc::new(ServerState::new(StaticEngine, UppercaseProvider));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router(state)).await;
    });
    format!("http://{}", addr)
}

fn painter() -> TextPainter {
    TextPainter::with_database(fontdb::Database::new(), OverlayFont::default())
}

#[tokio::test]
async fn remote_boundary_drives_a_full_run() {
    let boundary = RemoteBoundary::new(spawn_boundary().await);
    let menu = LanguageMenu::load(&boundary).await.expect("languages");
    assert_eq!(menu.selected().expect("default").code, "ja");

    let history = Arc::new(MemoryHistory::default());
    let compositor = Compositor::new(
        Arc::new(OcrService::new(boundary.clone())),
        boundary,
        history.clone(),
        painter(),
    );
    let translator = Translator::with_menu(compositor, menu);

    let source = RgbaImage::from_pixel(400, 120, Rgba([250, 250, 250, 255]));
    let region = Region::new(100.0, 30.0, 150.0, 60.0).with_display_size((400, 120), (200.0, 60.0));
    let outcome = translator.translate(&source, &region).await.expect("run");

    let RunOutcome::Committed {
        translation, lines, ..
    } = outcome
    else {
        panic!("expected a committed run");
    };
    assert_eq!(translation.original_full_text, "HELLO WORLD BYE");
    assert_eq!(translation.translated_full_text, "ja HELLO WORLD BYE");
    assert_eq!(lines.len(), 2);
    let rendered: Vec<&str> = lines.iter().map(|line| line.translated_text.as_str()).collect();
    assert_eq!(rendered.join(" "), "ja HELLO WORLD BYE");
    assert!(lines.iter().all(|line| line.font_size_px >= 8.0));

    let layers = history.layers();
    assert_eq!(layers.len(), 1);
    assert_eq!(layers[0].name, LAYER_NAME);
    assert_eq!(layers[0].placement, region.placement);
    assert_eq!(layers[0].image.dimensions(), (300, 120));
}

#[tokio::test]
async fn unreachable_boundary_fails_at_recognition_start() {
    let boundary = RemoteBoundary::new("http://127.0.0.1:9");
    let history = Arc::new(MemoryHistory::default());
    let compositor = Compositor::new(
        Arc::new(OcrService::new(boundary.clone())),
        boundary,
        history.clone(),
        painter(),
    );
    let menu = LanguageMenu::new(vec![LanguageItem {
        code: "ja".to_string(),
        display_name_local: "日本語".to_string(),
        display_name_english: "Japanese".to_string(),
        channel: "gpt".to_string(),
        channel_language_code: None,
    }]);
    let translator = Translator::with_menu(compositor, menu);
    let source = RgbaImage::from_pixel(40, 20, Rgba([0, 0, 0, 255]));
    let err = translator
        .translate(&source, &Region::new(0.0, 0.0, 40.0, 20.0))
        .await
        .expect_err("must fail");
    assert!(err.to_string().contains("initialize"));
    assert!(history.is_empty());
}
