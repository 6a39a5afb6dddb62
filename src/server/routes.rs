use axum::http::header;
use axum::response::IntoResponse;

pub const ACKNOWLEDGMENT: &str = "tootfeed is running";

pub async fn acknowledge() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        ACKNOWLEDGMENT,
    )
}
