use crate::error::EngineError;
use crate::recognizer::{Deadline, Recognizer};
use crate::types::RecognitionResult;
use bytes::Buf;
use futures::{pin_mut, Stream, StreamExt};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

/// Per-request bounds applied by the upload handler.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_payload_bytes: usize,
    pub request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct UploadParams {
    topn: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TopNUpdate {
    top_n: usize,
}

/// Category for failures outside the recognition path.
const INTERNAL: &str = "Internal";

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

#[derive(Debug)]
enum BodyError {
    TooLarge,
    Transport(warp::Error),
}

pub fn routes(
    recognizer: Arc<Recognizer>,
    limits: Limits,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let upload = warp::path!("upload")
        .and(warp::post())
        .and(warp::header::optional::<String>("content-type"))
        .and(warp::header::optional::<u64>("content-length"))
        .and(warp::query::<UploadParams>())
        .and(warp::body::stream())
        .and(with_recognizer(recognizer.clone()))
        .and(warp::any().map(move || limits))
        .and_then(handle_upload);

    let status = warp::path!("status")
        .and(warp::get())
        .and(with_recognizer(recognizer.clone()))
        .map(|recognizer: Arc<Recognizer>| warp::reply::json(&recognizer.status()));

    let top_n = warp::path!("topn")
        .and(warp::put())
        .and(warp::body::content_length_limit(1024))
        .and(warp::body::json())
        .and(with_recognizer(recognizer))
        .map(|update: TopNUpdate, recognizer: Arc<Recognizer>| {
            match recognizer.set_top_n(update.top_n) {
                Ok(()) => warp::reply::json(&recognizer.status()).into_response(),
                Err(e) => {
                    warn!("Rejected top-N update: {}", e);
                    engine_error_reply(&e)
                }
            }
        });

    upload
        .or(status)
        .or(top_n)
        .recover(handle_rejection)
        .with(warp::log("plate_reader"))
}

/// Binds the service to `addr`. The returned future serves until `shutdown`
/// resolves and then until open connections have finished.
pub fn bind(
    recognizer: Arc<Recognizer>,
    limits: Limits,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(SocketAddr, impl Future<Output = ()>), warp::Error> {
    warp::serve(routes(recognizer, limits)).try_bind_with_graceful_shutdown(addr, shutdown)
}

/// Unloads the engine on the blocking pool, waiting at most `budget` for a
/// running recognition to release it. Returns whether the engine was
/// released.
pub async fn release_engine(recognizer: Arc<Recognizer>, budget: Duration) -> bool {
    let task = tokio::task::spawn_blocking(move || recognizer.shutdown());
    match tokio::time::timeout(budget, task).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!("Engine release task failed: {}", e);
            false
        }
        Err(_) => false,
    }
}

fn with_recognizer(
    recognizer: Arc<Recognizer>,
) -> impl Filter<Extract = (Arc<Recognizer>,), Error = Infallible> + Clone {
    warp::any().map(move || recognizer.clone())
}

async fn handle_upload<S, B>(
    content_type: Option<String>,
    content_length: Option<u64>,
    params: UploadParams,
    body: S,
    recognizer: Arc<Recognizer>,
    limits: Limits,
) -> Result<Response, Rejection>
where
    S: Stream<Item = Result<B, warp::Error>> + Send,
    B: Buf + Send,
{
    let request_id = Uuid::new_v4().simple().to_string();

    if let Some(content_type) = &content_type {
        if !is_raw_image_type(content_type) {
            warn!("[{}] Unsupported content type {}", request_id, content_type);
            return Ok(error_reply(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "UnsupportedMediaType",
            ));
        }
    }
    if content_length.map_or(false, |len| len > limits.max_payload_bytes as u64) {
        warn!(
            "[{}] Declared body of {:?} bytes exceeds limit",
            request_id, content_length
        );
        return Ok(payload_too_large());
    }

    let payload = match read_body(body, limits.max_payload_bytes).await {
        Ok(payload) => payload,
        Err(BodyError::TooLarge) => {
            warn!("[{}] Body exceeds {} bytes", request_id, limits.max_payload_bytes);
            return Ok(payload_too_large());
        }
        Err(BodyError::Transport(e)) => {
            warn!("[{}] Error reading body: {}", request_id, e);
            return Ok(error_reply(StatusCode::BAD_REQUEST, "InvalidPayload"));
        }
    };
    if payload.is_empty() {
        warn!("[{}] Empty body", request_id);
        return Ok(error_reply(StatusCode::BAD_REQUEST, "InvalidPayload"));
    }
    if params.topn == Some(0) {
        warn!("[{}] Rejected topn=0", request_id);
        return Ok(error_reply(StatusCode::BAD_REQUEST, "InvalidArgument"));
    }

    debug!("[{}] Recognizing {} bytes", request_id, payload.len());
    match recognize(recognizer, payload, params.topn, limits.request_timeout).await {
        Ok(result) => {
            info!(
                "[{}] Recognized {} plate(s)",
                request_id,
                result.detections.len()
            );
            Ok(warp::reply::json(&result).into_response())
        }
        Err(e) => {
            match &e {
                EngineError::InvalidPayload(_) | EngineError::InvalidArgument(_) => {
                    warn!("[{}] {}", request_id, e)
                }
                _ => error!("[{}] Recognition failed: {}", request_id, e),
            }
            Ok(engine_error_reply(&e))
        }
    }
}

/// Runs the blocking recognition on the blocking pool, bounded by `timeout`.
/// A call still queued at the deadline is dropped before reaching the
/// engine; one already running is left to finish in the background.
async fn recognize(
    recognizer: Arc<Recognizer>,
    payload: Vec<u8>,
    top_n: Option<usize>,
    timeout: Duration,
) -> Result<RecognitionResult, EngineError> {
    let deadline = Deadline::after(timeout);
    let task = tokio::task::spawn_blocking(move || {
        recognizer.recognize_within(&payload, top_n, Some(deadline))
    });
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(EngineError::Internal(format!(
            "recognition task failed: {}",
            e
        ))),
        Err(_) => Err(EngineError::Timeout(timeout)),
    }
}

async fn read_body<S, B>(body: S, limit: usize) -> Result<Vec<u8>, BodyError>
where
    S: Stream<Item = Result<B, warp::Error>>,
    B: Buf,
{
    pin_mut!(body);
    let mut data: Vec<u8> = vec![];
    while let Some(buf) = body.next().await {
        let mut buf = buf.map_err(BodyError::Transport)?;
        if data.len() + buf.remaining() > limit {
            return Err(BodyError::TooLarge);
        }
        while buf.has_remaining() {
            let chunk = buf.chunk();
            let len = chunk.len();
            data.extend_from_slice(chunk);
            buf.advance(len);
        }
    }
    Ok(data)
}

fn is_raw_image_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    essence == "application/octet-stream" || essence.starts_with("image/")
}

fn status_for(e: &EngineError) -> StatusCode {
    match e {
        EngineError::InvalidArgument(_) | EngineError::InvalidPayload(_) => {
            StatusCode::BAD_REQUEST
        }
        EngineError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::AlreadyInitialized => StatusCode::CONFLICT,
        EngineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn engine_error_reply(e: &EngineError) -> Response {
    error_reply(status_for(e), e.category())
}

fn payload_too_large() -> Response {
    error_reply(StatusCode::PAYLOAD_TOO_LARGE, "InvalidPayload")
}

fn error_reply(status: StatusCode, category: &str) -> Response {
    warp::reply::with_status(warp::reply::json(&ErrorBody { error: category }), status)
        .into_response()
}

async fn handle_rejection(rejection: Rejection) -> Result<Response, Infallible> {
    let reply = if rejection.is_not_found() {
        error_reply(StatusCode::NOT_FOUND, "NotFound")
    } else if rejection.find::<warp::reject::InvalidQuery>().is_some()
        || rejection
            .find::<warp::filters::body::BodyDeserializeError>()
            .is_some()
    {
        error_reply(StatusCode::BAD_REQUEST, "InvalidArgument")
    } else if rejection.find::<warp::reject::InvalidHeader>().is_some() {
        error_reply(StatusCode::BAD_REQUEST, "InvalidPayload")
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        payload_too_large()
    } else if rejection.find::<warp::reject::LengthRequired>().is_some() {
        error_reply(StatusCode::LENGTH_REQUIRED, "LengthRequired")
    } else if rejection.find::<warp::reject::UnsupportedMediaType>().is_some() {
        error_reply(StatusCode::UNSUPPORTED_MEDIA_TYPE, "UnsupportedMediaType")
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        error_reply(StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed")
    } else {
        error!("Unhandled rejection: {:?}", rejection);
        error_reply(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL)
    };
    Ok(reply)
}
