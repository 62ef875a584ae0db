use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{Html, Response},
    Json,
    routing::get,
    Router,
};
use futures::{future, SinkExt, StreamExt};
use libhead_storm::{CacheStats, Prober, RepeatPolicy, Session, SessionError};
use std::net::SocketAddr;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub prober: Prober,
    pub repeat_policy: RepeatPolicy,
}

pub async fn start_web_server(bind_addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    info!(
        bind_address = %bind_addr,
        page_url = format!("http://{}", bind_addr),
        socket_url = format!("ws://{}/ask", bind_addr),
        tlds = state.prober.tlds().len(),
        "Starting web server"
    );

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/ask", get(ask_handler))
        .with_state(state)
}

async fn index_handler() -> Html<&'static str> {
    Html(include_str!("../web/index.html"))
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn stats_handler(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.prober.cache().stats())
}

async fn ask_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    debug!("session opened");

    let (sink, stream) = socket.split();
    let incoming = Box::pin(stream.filter_map(|frame| future::ready(decode_frame(frame))));
    let outgoing = sink.with(|text: String| future::ready(Ok::<_, axum::Error>(Message::Text(text.into()))));

    let mut session = Session::new(state.prober, state.repeat_policy);
    match session.run(incoming, Box::pin(outgoing)).await {
        Ok(()) => debug!("session closed by client"),
        Err(SessionError::Protocol(reason)) => warn!(reason = %reason, "session closed: malformed query"),
        Err(e) => debug!(error = %e, "session ended"),
    }
}

/// Text and binary frames carry queries; control frames carry nothing for the session.
fn decode_frame(frame: Result<Message, axum::Error>) -> Option<Result<String, String>> {
    match frame {
        Ok(Message::Text(text)) => Some(Ok(text.as_str().to_string())),
        Ok(Message::Binary(bytes)) => Some(
            String::from_utf8(bytes.to_vec()).map_err(|_| "binary frame is not valid UTF-8".to_string()),
        ),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Close(_)) => None,
        Err(e) => Some(Err(e.to_string())),
    }
}
