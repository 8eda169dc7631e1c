use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tracing::{info, warn};

use super::models::{ErrorResponse, OcrRequest, OcrResponse};
use super::state::ServerState;
use super::util::decode_image_payload;
use crate::ocr::OcrEngine;
use crate::providers::{LanguagesResponse, TranslateRequest, TranslateResponse, TranslationProvider};

type Rejection = (StatusCode, Json<ErrorResponse>);

pub fn router<E, P>(state: Arc<ServerState<E, P>>) -> Router
where
    E: OcrEngine + 'static,
    P: TranslationProvider + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route("/ocr", post(ocr::<E, P>))
        .route("/translate", post(translate::<E, P>))
        .route("/languages", get(languages::<E, P>))
        .with_state(state)
        .layer(axum::middleware::from_fn(cors_middleware))
}

pub async fn run_server<E, P>(state: ServerState<E, P>, addr: &str) -> Result<()>
where
    E: OcrEngine + 'static,
    P: TranslationProvider + 'static,
{
    let state = Arc::new(state);
    let app = router(state.clone());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind server address {}", addr))?;
    info!("boundary server listening on {}", addr);
    axum::serve(listener, app).await?;
    state.ocr.dispose().await;
    Ok(())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

pub(crate) async fn ocr<E, P>(
    State(state): State<Arc<ServerState<E, P>>>,
    payload: Result<Json<OcrRequest>, JsonRejection>,
) -> Result<Json<OcrResponse>, Rejection>
where
    E: OcrEngine,
    P: TranslationProvider,
{
    let Json(request) = payload.map_err(reject)?;
    let bytes = decode_image_payload(&request.image).map_err(|err| bad_request(format!("{:#}", err)))?;
    let response = match state.ocr.recognize(&bytes).await {
        Ok(recognition) => OcrResponse::recognized(recognition.text, recognition.words),
        Err(err) => {
            warn!("ocr request failed: {}", err);
            OcrResponse::failed(err.to_string())
        }
    };
    Ok(Json(response))
}

pub(crate) async fn translate<E, P>(
    State(state): State<Arc<ServerState<E, P>>>,
    payload: Result<Json<TranslateRequest>, JsonRejection>,
) -> Result<Json<TranslateResponse>, Rejection>
where
    E: OcrEngine,
    P: TranslationProvider,
{
    let Json(request) = payload.map_err(reject)?;
    let response = match state.translator.translate(request).await {
        Ok(response) => response,
        Err(err) => {
            warn!("translate request failed: {:#}", err);
            TranslateResponse::failed(format!("{:#}", err))
        }
    };
    Ok(Json(response))
}

pub(crate) async fn languages<E, P>(
    State(state): State<Arc<ServerState<E, P>>>,
) -> Json<LanguagesResponse>
where
    E: OcrEngine,
    P: TranslationProvider,
{
    let response = match state.translator.list_languages().await {
        Ok(response) => response,
        Err(err) => {
            warn!("language list request failed: {:#}", err);
            LanguagesResponse::failed(format!("{:#}", err))
        }
    };
    Json(response)
}

fn reject(rejection: JsonRejection) -> Rejection {
    bad_request(rejection.body_text())
}

fn bad_request(error: String) -> Rejection {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error }))
}

async fn cors_middleware(req: Request<Body>, next: Next) -> Result<Response<Body>, StatusCode> {
    if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return Ok(response);
    }
    let mut response = next.run(req).await;
    apply_cors_headers(response.headers_mut());
    Ok(response)
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("content-type"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{BBox, OcrFuture, OcrSession, RawRecognition, RawWord};
    use crate::providers::{LanguageItem, ProviderFuture};
    use anyhow::anyhow;
    use insta::assert_json_snapshot;

    struct StaticEngine {
        fail: bool,
    }

    struct StaticSession;

    impl OcrEngine for StaticEngine {
        type Session = StaticSession;

        fn start(&self) -> OcrFuture<'_, StaticSession> {
            let fail = self.fail;
            Box::pin(async move {
                if fail {
                    return Err(anyhow!("chi_sim.traineddata missing"));
                }
                Ok(StaticSession)
            })
        }
    }

    impl OcrSession for StaticSession {
        fn recognize<'a>(&'a self, _image_bytes: &'a [u8]) -> OcrFuture<'a, RawRecognition> {
            Box::pin(async {
                Ok(RawRecognition {
                    text: "HELLO".to_string(),
                    words: vec![RawWord {
                        text: "HELLO".to_string(),
                        confidence: 96.0,
                        bbox: Some(BBox::new(0.0, 0.0, 50.0, 10.0)),
                    }],
                })
            })
        }

        fn terminate(&self) -> OcrFuture<'_, ()> {
            Box::pin(async { Ok(()) })
        }
    }

    struct TestProvider {
        reachable: bool,
    }

    impl TranslationProvider for TestProvider {
        fn translate(&self, request: TranslateRequest) -> ProviderFuture<'_, TranslateResponse> {
            let reachable = self.reachable;
            Box::pin(async move {
                if !reachable {
                    return Err(anyhow!("connection refused"));
                }
                Ok(TranslateResponse::translated(format!(
                    "[{}] {}",
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

    fn state(fail_ocr: bool, reachable: bool) -> Arc<ServerState<StaticEngine, TestProvider>> {
        Arc::new(ServerState::new(
            StaticEngine { fail: fail_ocr },
            TestProvider { reachable },
        ))
    }

    #[tokio::test]
    async fn ocr_returns_words() {
        let request = OcrRequest {
            image: "data:image/png;base64,aGk=".to_string(),
        };
        let Json(response) = ocr(State(state(false, true)), Ok(Json(request)))
            .await
            .expect("ocr");
        assert_json_snapshot!(response, @r#"
        {
          "success": true,
          "text": "HELLO",
          "words": [
            {
              "text": "HELLO",
              "confidence": 96.0,
              "bbox": {
                "x0": 0.0,
                "y0": 0.0,
                "x1": 50.0,
                "y1": 10.0
              }
            }
          ]
        }
        "#);
    }

    #[tokio::test]
    async fn ocr_engine_failure_is_an_envelope() {
        let request = OcrRequest {
            image: "aGk=".to_string(),
        };
        let Json(response) = ocr(State(state(true, true)), Ok(Json(request)))
            .await
            .expect("ocr");
        assert!(!response.success);
        assert!(response.error.unwrap().contains("traineddata"));
    }

    #[tokio::test]
    async fn bad_image_is_a_bad_request() {
        let request = OcrRequest {
            image: "data:image/png,raw".to_string(),
        };
        let (status, Json(body)) = ocr(State(state(false, true)), Ok(Json(request)))
            .await
            .expect_err("must reject");
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.error.contains("base64"));
    }

    #[tokio::test]
    async fn unreachable_translator_reports_failure() {
        let request = TranslateRequest {
            text: "HELLO".to_string(),
            target_language_code: "ja".to_string(),
            channel: "gpt".to_string(),
        };
        let Json(ok) = translate(State(state(false, true)), Ok(Json(request.clone())))
            .await
            .expect("translate");
        assert_eq!(ok, TranslateResponse::translated("[ja] HELLO"));

        let Json(failed) = translate(State(state(false, false)), Ok(Json(request)))
            .await
            .expect("translate");
        assert_json_snapshot!(failed, @r#"
        {
          "success": false,
          "error": "connection refused"
        }
        "#);
    }

    #[tokio::test]
    async fn lists_languages() {
        let Json(response) = languages(State(state(false, true))).await;
        assert!(response.success);
        assert_eq!(response.languages.unwrap()[0].code, "ja");
    }
}
