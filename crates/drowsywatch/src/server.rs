//! HTTP interface: the page, the video feed and the contact form.

use std::future::Future;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Form, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::alert::AlertDispatcher;
use crate::config::{CameraBackend, Config, DetectionConfig};
use crate::contact::{ContactInfo, ContactStore};
use crate::error::{Error, Result};
use crate::model;
use crate::multipart::STREAM_CONTENT_TYPE;
use crate::pipeline::video_stream;
use crate::vision::{backend_from_config, VisionBackend};

const INDEX_TEMPLATE: &str = include_str!("../templates/index.html");

/// Shared state behind every route.
#[derive(Debug, Clone)]
pub struct AppState {
    contacts: ContactStore,
    backend: Arc<dyn VisionBackend>,
    dispatcher: AlertDispatcher,
    detection: DetectionConfig,
}

impl AppState {
    /// Assemble state from its parts. The contact store is the dispatcher's.
    #[must_use]
    pub fn new(
        backend: Arc<dyn VisionBackend>,
        dispatcher: AlertDispatcher,
        detection: DetectionConfig,
    ) -> Self {
        Self {
            contacts: dispatcher.contacts().clone(),
            backend,
            dispatcher,
            detection,
        }
    }

    /// Build the backend and alert channels selected in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend or an alert channel cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend = backend_from_config(config)?;
        let dispatcher = AlertDispatcher::from_config(config, ContactStore::new())?;
        Ok(Self::new(backend, dispatcher, config.detection.clone()))
    }

    /// The contact store.
    #[must_use]
    pub fn contacts(&self) -> &ContactStore {
        &self.contacts
    }
}

/// Escape text for inclusion in HTML content or attribute values.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// What the page reports below the form.
#[derive(Debug, Clone, Copy)]
pub enum Notice<'a> {
    /// Nothing.
    None,
    /// A contact was saved.
    Saved(&'a ContactInfo),
    /// The submission was rejected.
    Rejected(&'a str),
}

/// Render the page.
#[must_use]
pub fn render_index(notice: Notice<'_>) -> String {
    let block = match notice {
        Notice::None => String::new(),
        Notice::Saved(contact) => format!(
            "    <p class=\"notice saved\">Emergency contact saved: {} ({})</p>",
            escape_html(&contact.name),
            escape_html(&contact.phone)
        ),
        Notice::Rejected(message) => format!(
            "    <p class=\"notice error\">{}</p>",
            escape_html(message)
        ),
    };
    INDEX_TEMPLATE.replace("{{notice}}", &block)
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/video_feed", get(video_feed))
        .route("/save_contact", post(save_contact))
        .with_state(state)
}

async fn index() -> Html<String> {
    Html(render_index(Notice::None))
}

async fn video_feed(State(state): State<AppState>) -> Response {
    info!(backend = state.backend.name(), "Video feed requested");
    let stream = video_stream(
        Arc::clone(&state.backend),
        state.detection.clone(),
        state.dispatcher.clone(),
    );
    ([(header::CONTENT_TYPE, STREAM_CONTENT_TYPE)], Body::from_stream(stream)).into_response()
}

#[derive(Debug, Deserialize)]
struct ContactForm {
    #[serde(default)]
    name: String,
    #[serde(default)]
    phone: String,
}

async fn save_contact(
    State(state): State<AppState>,
    Form(form): Form<ContactForm>,
) -> Response {
    match ContactInfo::new(&form.name, &form.phone) {
        Ok(contact) => {
            let page = render_index(Notice::Saved(&contact));
            state.contacts.save(contact);
            Html(page).into_response()
        }
        Err(e) => {
            warn!(error = %e, "Rejected contact form");
            let message = match &e {
                Error::InvalidContact { message } => message.clone(),
                other => other.to_string(),
            };
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Html(render_index(Notice::Rejected(&message))),
            )
                .into_response()
        }
    }
}

/// Serve on an already bound listener until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve_on<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Server(e.to_string()))
}

/// Run the service described by `config` until Ctrl-C.
///
/// The landmark model is fetched first when the camera backend needs it.
///
/// # Errors
///
/// Returns an error if the model cannot be obtained, the state cannot be
/// built, or the listener cannot bind.
pub async fn serve(config: &Config) -> Result<()> {
    if config.camera.backend == CameraBackend::Opencv {
        model::ensure_model(&config.model).await?;
    }

    let state = AppState::from_config(config)?;
    let address = config.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| Error::Server(format!("cannot bind {address}: {e}")))?;
    info!(address = %address, backend = %config.camera.backend, "Serving drowsiness detection");

    serve_on(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        info!("Shutting down");
    })
    .await
}
