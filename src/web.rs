//! Axum-based HTTP control panel for the rover.
//!
//! Provides:
//! - GET `/` - control panel page
//! - GET `/video_feed` - MJPEG camera stream
//! - POST `/api/control` - `{"command": "forward", "speed": 60}`
//! - POST `/api/speed` - `{"speed": 70}` sets the default speed
//! - POST `/api/vision` - describe the current camera frame
//!
//! Every collaborator the handlers need lives in [`AppState`], handed to the
//! router at construction. The rover sits behind a single mutex so that the
//! duty-cycle and pin writes of one request never interleave with another's.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::State,
    http::{Method, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::de::DeserializeOwned;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::beep::ReversingBeeper;
use crate::camera::{FrameFeed, multipart_content_type};
use crate::messages::{Command, ControlRequest, Reply, SpeedRequest};
use crate::motor::{PwmDevice, Rover};
use crate::vision::VisionClient;

/// Rover shared between request handlers
pub type SharedRover<D> = Arc<Mutex<Rover<D>>>;

type ApiResult = (StatusCode, Json<Reply>);

fn reply(status: StatusCode, body: Reply) -> ApiResult {
    (status, Json(body))
}

fn error(status: StatusCode, message: impl Into<String>) -> ApiResult {
    reply(status, Reply::error(message))
}

/// Everything the handlers talk to
pub struct AppState<D: PwmDevice> {
    rover: SharedRover<D>,
    camera: Option<FrameFeed>,
    beeper: Option<Arc<ReversingBeeper>>,
    vision: Option<VisionClient>,
}

impl<D: PwmDevice> AppState<D> {
    pub fn new(rover: Rover<D>) -> Self {
        Self {
            rover: Arc::new(Mutex::new(rover)),
            camera: None,
            beeper: None,
            vision: None,
        }
    }

    pub fn with_camera(mut self, feed: FrameFeed) -> Self {
        self.camera = Some(feed);
        self
    }

    pub fn with_beeper(mut self, beeper: Arc<ReversingBeeper>) -> Self {
        self.beeper = Some(beeper);
        self
    }

    pub fn with_vision(mut self, client: VisionClient) -> Self {
        self.vision = Some(client);
        self
    }

    pub fn rover(&self) -> &SharedRover<D> {
        &self.rover
    }

    /// Run a command with the rover locked for its whole write sequence
    pub fn drive(&self, command: Command, speed: Option<i32>) -> Result<(), String> {
        let mut rover = self
            .rover
            .lock()
            .map_err(|_| "Rover lock poisoned".to_string())?;
        rover.apply(command, speed).map_err(|e| e.to_string())
    }

    pub fn set_speed(&self, speed: i32) -> Result<u8, String> {
        let mut rover = self
            .rover
            .lock()
            .map_err(|_| "Rover lock poisoned".to_string())?;
        Ok(rover.set_speed(speed))
    }

    fn update_beeper(&self, command: Command) {
        if let Some(beeper) = &self.beeper {
            match command {
                Command::Backward => beeper.start(),
                _ => beeper.stop(),
            }
        }
    }

    /// Silence the beeper and stop the motors; used on shutdown
    pub fn halt(&self) {
        if let Some(beeper) = &self.beeper {
            beeper.stop();
        }
        let mut rover = self.rover.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = rover.stop() {
            warn!("Failed to stop motors: {}", e);
        }
    }
}

// An empty body reads as `{}`
fn parse_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, ApiResult> {
    if body.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|_| error(StatusCode::BAD_REQUEST, "Invalid JSON"))
}

// ============================================================================
// Route Handlers
// ============================================================================

/// GET / - control panel
async fn index() -> impl IntoResponse {
    Html(include_str!("../www/index.html"))
}

/// GET /video_feed - multipart JPEG stream
async fn video_feed<D: PwmDevice + Send + 'static>(
    State(state): State<Arc<AppState<D>>>,
) -> Response {
    let Some(feed) = &state.camera else {
        return error(StatusCode::SERVICE_UNAVAILABLE, "Camera not available").into_response();
    };

    (
        [
            (header::CONTENT_TYPE, multipart_content_type()),
            (header::CACHE_CONTROL, "no-cache, private".to_string()),
            (header::PRAGMA, "no-cache".to_string()),
            (header::AGE, "0".to_string()),
        ],
        Body::from_stream(feed.multipart()),
    )
        .into_response()
}

/// POST /api/control - drive command
async fn control<D: PwmDevice + Send + 'static>(
    State(state): State<Arc<AppState<D>>>,
    body: Bytes,
) -> ApiResult {
    let request: ControlRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let Ok(command) = request.parse_command() else {
        return error(StatusCode::BAD_REQUEST, "Invalid command");
    };

    info!("{} (speed {:?})", command, request.speed);
    if let Err(message) = state.drive(command, request.speed) {
        warn!("Command {} failed: {}", command, message);
        return error(StatusCode::INTERNAL_SERVER_ERROR, message);
    }
    state.update_beeper(command);

    reply(StatusCode::OK, Reply::command(command))
}

/// POST /api/speed - set the default speed
async fn set_speed<D: PwmDevice + Send + 'static>(
    State(state): State<Arc<AppState<D>>>,
    body: Bytes,
) -> ApiResult {
    let request: SpeedRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let Some(speed) = request.speed else {
        return error(StatusCode::BAD_REQUEST, "Missing speed");
    };

    match state.set_speed(speed) {
        Ok(stored) => {
            info!("Default speed {}", stored);
            reply(StatusCode::OK, Reply::speed(stored))
        }
        Err(message) => error(StatusCode::INTERNAL_SERVER_ERROR, message),
    }
}

/// POST /api/vision - describe what the camera sees
async fn vision<D: PwmDevice + Send + 'static>(
    State(state): State<Arc<AppState<D>>>,
) -> ApiResult {
    let Some(client) = &state.vision else {
        return error(StatusCode::SERVICE_UNAVAILABLE, "Gemini not configured");
    };
    let Some(frame) = state.camera.as_ref().and_then(FrameFeed::latest) else {
        return error(StatusCode::SERVICE_UNAVAILABLE, "No frame available");
    };

    match client.describe(&frame).await {
        Ok(text) => reply(StatusCode::OK, Reply::description(text)),
        Err(e) => {
            warn!("Vision request failed: {}", e);
            error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Fallback handler for 404
async fn not_found() -> ApiResult {
    error(StatusCode::NOT_FOUND, "Not found")
}

// ============================================================================
// Server
// ============================================================================

/// Build the router with all routes
pub fn build_router<D: PwmDevice + Send + 'static>(state: Arc<AppState<D>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(index))
        .route("/index.html", get(index))
        .route("/video_feed", get(video_feed::<D>))
        .route("/api/control", post(control::<D>))
        .route("/api/speed", post(set_speed::<D>))
        .route("/api/vision", post(vision::<D>))
        .fallback(not_found)
        .with_state(state)
        .layer(cors)
}

/// Serve until `shutdown` resolves, then stop the rover.
///
/// Long-lived `/video_feed` responses only end once the camera stops, so the
/// shutdown future should stop the camera before resolving.
pub async fn serve<D, F>(state: Arc<AppState<D>>, addr: SocketAddr, shutdown: F) -> std::io::Result<()>
where
    D: PwmDevice + Send + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    let router = build_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Rover web control running at http://{}", addr);

    let halt_state = Arc::clone(&state);
    let result = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.await;
            halt_state.halt();
        })
        .await;

    state.halt();
    result
}
