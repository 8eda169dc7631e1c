//! Boundary server: exposes OCR, translation and the language list as
//! single-shot JSON request/response calls.

mod handlers;
pub mod models;
mod state;
mod util;

pub use handlers::{router, run_server};
pub use state::ServerState;
pub(crate) use util::{decode_image_payload, encode_image_payload};
