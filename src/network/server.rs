//! WebSocket Game Server
//!
//! Accepts player connections, validates their access token, prepares the
//! game context, and runs one engine per connection. The receive loop drops
//! malformed JSON without closing the channel and refreshes the player's
//! TTL and heartbeat on every successful message.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::content::ContentGenerator;
use crate::game::context::{prepare_game_context, ContextStatus};
use crate::game::engine::{EngineState, GameEngine};
use crate::network::auth::validate_token;
use crate::network::protocol::{ClientAction, ServerEvent};
use crate::network::session::ConnectionManager;
use crate::store::kv::MemoryStore;
use crate::store::repo::PlayerRepository;
use crate::store::save::SaveStore;
use crate::world::balance::Balance;
use crate::world::catalog::WorldCatalog;

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// Shared process-wide collaborators handed to every connection.
pub struct AppContext {
    pub settings: Settings,
    pub store: MemoryStore,
    pub manager: Arc<ConnectionManager>,
    pub catalog: Arc<WorldCatalog>,
    pub balance: Arc<Balance>,
    pub content: Arc<dyn ContentGenerator>,
    pub saves: Arc<SaveStore>,
}

/// The game server.
pub struct GameServer {
    ctx: Arc<AppContext>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a server over shared application context.
    pub fn new(ctx: AppContext) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            ctx: Arc::new(ctx),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.ctx.settings.bind_addr).await?;
        info!("Game server listening on {}", self.ctx.settings.bind_addr);
        self.run_on(listener).await
    }

    /// Serve on an existing listener (lets tests bind port 0 themselves).
    pub async fn run_on(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let reaper = self.ctx.manager.spawn_reaper(
            self.ctx.settings.reaper_interval,
            self.ctx.settings.heartbeat_timeout,
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.ctx.manager.connection_count().await
                                >= self.ctx.settings.max_connections
                            {
                                warn!("Connection limit reached, rejecting {addr}");
                                continue;
                            }
                            debug!("New connection from {addr}");
                            let ctx = self.ctx.clone();
                            let shutdown_rx = self.shutdown_tx.subscribe();
                            tokio::spawn(async move {
                                handle_connection(ctx, stream, addr, shutdown_rx).await;
                            });
                        }
                        Err(e) => error!("Accept error: {e}"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    self.ctx
                        .manager
                        .broadcast(ServerEvent::log("The server is shutting down. Your progress is kept safe."))
                        .await;
                    break;
                }
            }
        }

        reaper.abort();
        Ok(())
    }

    /// Signal the server to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Number of registered player channels.
    pub async fn connection_count(&self) -> usize {
        self.ctx.manager.connection_count().await
    }
}

/// Pull the access token out of a handshake request's query string.
fn extract_token(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
}

async fn handle_connection(
    ctx: Arc<AppContext>,
    stream: TcpStream,
    addr: SocketAddr,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut token: Option<String> = None;
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        token = extract_token(req.uri().query());
        Ok(resp)
    };

    let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("WebSocket handshake failed for {addr}: {e}");
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Authentication gate: no engine is ever constructed on failure.
    let claims = match token.as_deref().map(|t| validate_token(t, &ctx.settings)) {
        Some(Ok(claims)) => claims,
        other => {
            let reason = match other {
                Some(Err(e)) => e.to_string(),
                _ => "missing token".to_string(),
            };
            warn!("Auth failed for {addr}: {reason}");
            let payload = ServerEvent::AuthError {
                reason: reason.clone(),
            };
            if let Ok(text) = payload.to_json() {
                let _ = ws_sender.send(Message::Text(text)).await;
            }
            let _ = ws_sender
                .send(Message::Close(Some(CloseFrame {
                    code: CloseCode::Policy,
                    reason: reason.into(),
                })))
                .await;
            return;
        }
    };

    let player_id = claims.sub.clone();
    let username = if claims.username.is_empty() {
        player_id.clone()
    } else {
        claims.username.clone()
    };
    info!(player = %player_id, %username, "Player authenticated from {addr}");

    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerEvent>(64);
    let (close_tx, mut close_rx) = watch::channel(None);
    let conn_id = ctx.manager.connect(&player_id, msg_tx, close_tx).await;

    // Outbound pump: serialize events onto the socket.
    let sender_task = tokio::spawn(async move {
        while let Some(event) = msg_rx.recv().await {
            let text = match event.to_json() {
                Ok(t) => t,
                Err(e) => {
                    error!("Failed to serialize event: {e}");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        ws_sender
    });

    ctx.manager
        .send_personal(
            ServerEvent::AuthOk {
                username: username.clone(),
                server_version: ctx.settings.version.clone(),
            },
            &player_id,
        )
        .await;

    // Prepare state (fresh / repaired / rehydrated) and greet accordingly.
    let repo = PlayerRepository::new(ctx.store.clone(), &player_id, ctx.settings.player_ttl);
    let game_ctx =
        prepare_game_context(&repo, &ctx.saves, &ctx.catalog, &username, &claims.tier).await;
    ctx.manager
        .send_personal(
            ServerEvent::Init {
                data: game_ctx.snapshot.stats.clone(),
            },
            &player_id,
        )
        .await;
    let greeting = match game_ctx.status {
        ContextStatus::New => Some(format!(
            "Welcome to campus! You have been assigned to the {} program.",
            game_ctx.snapshot.stats.major
        )),
        ContextStatus::Loaded => Some("Your last save has been restored.".to_string()),
        ContextStatus::Repaired => {
            Some("Your save was damaged; your course plan has been rebuilt.".to_string())
        }
        ContextStatus::Existing => None,
    };
    if let Some(greeting) = greeting {
        ctx.manager
            .send_personal(ServerEvent::log(greeting), &player_id)
            .await;
    }

    let engine = GameEngine::new(
        player_id.clone(),
        username,
        claims.tier.clone(),
        repo,
        ctx.manager.clone(),
        ctx.catalog.clone(),
        ctx.balance.clone(),
        ctx.content.clone(),
        ctx.saves.clone(),
    );
    engine.start().await;

    // Inbound loop: decode actions, drop garbage, keep the channel open.
    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let action = match ClientAction::from_json(&text) {
                            Ok(action) => action,
                            Err(e) => {
                                debug!(player = %player_id, "Dropping malformed message: {e}");
                                continue;
                            }
                        };
                        ctx.manager.heartbeat(&player_id).await;
                        engine.process_action(action).await;
                        if engine.state().await.closes_channel() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(_))) => {
                        ctx.manager.heartbeat(&player_id).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(player = %player_id, "Client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(player = %player_id, "WebSocket error: {e}");
                        break;
                    }
                    _ => {}
                }
            }
            changed = close_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(reason) = *close_rx.borrow_and_update() {
                    info!(player = %player_id, reason = reason.as_str(), "Channel force-closed");
                    break;
                }
            }
            _ = shutdown_rx.recv() => {
                break;
            }
        }
    }

    // Teardown: cancel the engine's tasks and release the channel mapping.
    let final_state = match engine.state().await {
        EngineState::Running | EngineState::Paused => EngineState::Disconnected,
        other => other,
    };
    engine.shutdown(final_state).await;
    sender_task.abort();
    ctx.manager.disconnect(&player_id, conn_id).await;
    info!(player = %player_id, "Connection cleaned up");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::StaticContentGenerator;
    use crate::network::auth::TokenClaims;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use std::io::Write;
    use std::path::Path;
    use std::time::Duration;

    const SECRET: &str = "server-test-secret-key!!";

    fn write_world(dir: &Path) {
        std::fs::create_dir_all(dir.join("courses")).unwrap();
        let mut f = std::fs::File::create(dir.join("majors.json")).unwrap();
        f.write_all(
            br#"{"TIER_1": [{"name": "Computer Science", "abbr": "CS", "iq_buff": 5}]}"#,
        )
        .unwrap();
        let mut f = std::fs::File::create(dir.join("courses/CS.json")).unwrap();
        f.write_all(
            br#"{"semesters": [{"courses": [{"id": "cs101", "name": "Intro", "credits": 4.0}]}]}"#,
        )
        .unwrap();
        let mut f = std::fs::File::create(dir.join("achievements.json")).unwrap();
        f.write_all(b"[]").unwrap();
    }

    fn make_token(sub: &str) -> String {
        let claims = TokenClaims {
            sub: sub.to_string(),
            username: "alice".to_string(),
            tier: "TIER_1".to_string(),
            exp: crate::game::stats::unix_now() as u64 + 3600,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    struct TestServer {
        addr: SocketAddr,
        server: Arc<GameServer>,
        _world: tempfile::TempDir,
        _saves: tempfile::TempDir,
    }

    async fn start_server() -> TestServer {
        let world = tempfile::tempdir().unwrap();
        write_world(world.path());
        let saves_dir = tempfile::tempdir().unwrap();

        let settings = Settings {
            auth_secret: SECRET.to_string(),
            world_dir: world.path().to_path_buf(),
            save_dir: saves_dir.path().to_path_buf(),
            ..Default::default()
        };
        let ctx = AppContext {
            store: MemoryStore::new(),
            manager: Arc::new(ConnectionManager::new()),
            catalog: Arc::new(WorldCatalog::new(&settings.world_dir)),
            balance: Arc::new(Balance::default()),
            content: Arc::new(StaticContentGenerator),
            saves: Arc::new(SaveStore::new(settings.save_dir.clone())),
            settings,
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(GameServer::new(ctx));
        let run_server = server.clone();
        tokio::spawn(async move {
            let _ = run_server.run_on(listener).await;
        });

        TestServer {
            addr,
            server,
            _world: world,
            _saves: saves_dir,
        }
    }

    async fn recv_event(
        ws: &mut tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<TcpStream>,
        >,
    ) -> Option<ServerEvent> {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .ok()??;
            match msg.ok()? {
                Message::Text(text) => return ServerEvent::from_json(&text).ok(),
                Message::Close(_) => return None,
                _ => continue,
            }
        }
    }

    #[test]
    fn test_extract_token() {
        assert_eq!(
            extract_token(Some("token=abc&x=1")).as_deref(),
            Some("abc")
        );
        assert_eq!(extract_token(Some("x=1&token=zzz")).as_deref(), Some("zzz"));
        assert_eq!(extract_token(Some("x=1")), None);
        assert_eq!(extract_token(Some("token=")), None);
        assert_eq!(extract_token(None), None);
    }

    #[tokio::test]
    async fn test_full_connection_flow() {
        let ts = start_server().await;
        let url = format!("ws://{}/ws/game?token={}", ts.addr, make_token("77"));
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        // auth_ok, then init with the prepared stats.
        match recv_event(&mut ws).await {
            Some(ServerEvent::AuthOk { username, .. }) => assert_eq!(username, "alice"),
            other => panic!("expected auth_ok, got {other:?}"),
        }
        match recv_event(&mut ws).await {
            Some(ServerEvent::Init { data }) => {
                assert_eq!(data.username, "alice");
                assert_eq!(data.major_abbr, "CS");
            }
            other => panic!("expected init, got {other:?}"),
        }

        // App-level heartbeat round trip.
        ws.send(Message::Text(r#"{"action": "ping"}"#.to_string()))
            .await
            .unwrap();
        let mut saw_pong = false;
        for _ in 0..10 {
            match recv_event(&mut ws).await {
                Some(ServerEvent::Pong { .. }) => {
                    saw_pong = true;
                    break;
                }
                Some(_) => continue,
                None => break,
            }
        }
        assert!(saw_pong, "no pong received");

        ts.server.shutdown();
    }

    #[tokio::test]
    async fn test_malformed_json_keeps_channel_open() {
        let ts = start_server().await;
        let url = format!("ws://{}/ws/game?token={}", ts.addr, make_token("78"));
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        assert!(matches!(
            recv_event(&mut ws).await,
            Some(ServerEvent::AuthOk { .. })
        ));

        ws.send(Message::Text("{broken json".to_string()))
            .await
            .unwrap();
        ws.send(Message::Text(r#"{"action": "ping"}"#.to_string()))
            .await
            .unwrap();

        let mut saw_pong = false;
        for _ in 0..10 {
            match recv_event(&mut ws).await {
                Some(ServerEvent::Pong { .. }) => {
                    saw_pong = true;
                    break;
                }
                Some(_) => continue,
                None => break,
            }
        }
        assert!(saw_pong, "channel closed on malformed input");

        ts.server.shutdown();
    }

    #[tokio::test]
    async fn test_invalid_token_gets_auth_error() {
        let ts = start_server().await;
        let url = format!("ws://{}/ws/game?token=not-a-real-token", ts.addr);
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        match recv_event(&mut ws).await {
            Some(ServerEvent::AuthError { .. }) => {}
            other => panic!("expected auth_error, got {other:?}"),
        }
        // The server closes after the error.
        assert!(recv_event(&mut ws).await.is_none());

        ts.server.shutdown();
    }

    #[tokio::test]
    async fn test_missing_token_gets_auth_error() {
        let ts = start_server().await;
        let url = format!("ws://{}/ws/game", ts.addr);
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        assert!(matches!(
            recv_event(&mut ws).await,
            Some(ServerEvent::AuthError { .. })
        ));

        ts.server.shutdown();
    }

    #[tokio::test]
    async fn test_second_session_supersedes_first() {
        let ts = start_server().await;
        let url = format!("ws://{}/ws/game?token={}", ts.addr, make_token("79"));

        let (mut ws1, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        assert!(matches!(
            recv_event(&mut ws1).await,
            Some(ServerEvent::AuthOk { .. })
        ));

        let (mut ws2, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        assert!(matches!(
            recv_event(&mut ws2).await,
            Some(ServerEvent::AuthOk { .. })
        ));

        // The first channel drains its backlog and then closes.
        let mut closed = false;
        for _ in 0..20 {
            if recv_event(&mut ws1).await.is_none() {
                closed = true;
                break;
            }
        }
        assert!(closed, "superseded channel never closed");

        ts.server.shutdown();
    }
}
