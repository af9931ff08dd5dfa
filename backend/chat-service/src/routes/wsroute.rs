use crate::state::AppState;
use crate::websocket::{SessionId, SessionRegistry};
use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_middleware::{bearer_token, AuthError};
use actix_web::{get, web, Error, HttpRequest, HttpResponse, ResponseError};
use actix_web_actors::ws;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// One relay connection. Inbound client text is ignored; the socket only
/// carries server events.
struct WsSession {
    user_id: Uuid,
    session_id: SessionId,
    sessions: SessionRegistry,
    outbound: Option<UnboundedReceiver<String>>,
    hb: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl WsSession {
    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let timeout = self.client_timeout;
        ctx.run_interval(self.heartbeat_interval, move |act, ctx| {
            if Instant::now().duration_since(act.hb) > timeout {
                tracing::warn!(
                    user_id = %act.user_id,
                    "WebSocket heartbeat failed, disconnecting"
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            user_id = %self.user_id,
            session_id = ?self.session_id,
            "WebSocket session started"
        );
        self.hb(ctx);

        if let Some(rx) = self.outbound.take() {
            ctx.add_stream(UnboundedReceiverStream::new(rx));
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(
            user_id = %self.user_id,
            session_id = ?self.session_id,
            "WebSocket session stopped"
        );

        let sessions = self.sessions.clone();
        let user_id = self.user_id;
        let session_id = self.session_id;
        actix::spawn(async move {
            sessions.unregister(user_id, session_id).await;
        });
    }
}

// Frames queued by the relay dispatcher
impl StreamHandler<String> for WsSession {
    fn handle(&mut self, frame: String, ctx: &mut Self::Context) {
        ctx.text(frame);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(_)) | Ok(ws::Message::Binary(_)) => {
                self.hb = Instant::now();
                tracing::debug!(user_id = %self.user_id, "ignoring inbound WebSocket payload");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!(user_id = %self.user_id, ?reason, "WebSocket close received");
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                tracing::warn!(user_id = %self.user_id, error = %e, "WebSocket protocol error");
                ctx.stop();
            }
            _ => {}
        }
    }
}

/// Token from `?token=` or the `Authorization` header
fn authenticate(params: &WsParams, req: &HttpRequest) -> Result<Uuid, AuthError> {
    match params.token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => AuthError::check(token),
        None => bearer_token(req.headers()).and_then(AuthError::check),
    }
}

#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, Error> {
    let user_id = match authenticate(&query, &req) {
        Ok(user_id) => user_id,
        Err(e) => {
            tracing::warn!(error = %e, "WebSocket connection rejected");
            return Ok(e.error_response());
        }
    };

    let (session_id, rx) = state.sessions.register(user_id).await;
    let session = WsSession {
        user_id,
        session_id,
        sessions: state.sessions.clone(),
        outbound: Some(rx),
        hb: Instant::now(),
        heartbeat_interval: state.config.ws_heartbeat_interval,
        client_timeout: state.config.ws_client_timeout,
    };

    match ws::start(session, &req, stream) {
        Ok(resp) => Ok(resp),
        Err(e) => {
            state.sessions.unregister(user_id, session_id).await;
            Err(e)
        }
    }
}
