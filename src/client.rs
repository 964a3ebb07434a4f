use std::sync::{Arc, Weak};

use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use crate::codec::FrameCodec;
use crate::session::{Session, SessionEvents, SessionState};
use crate::{AppResult, ClientConfig};

/// The client side of the engine: zero or one live session, reconnectable.
///
/// Connect and disconnect are serialized by one async mutex, so two
/// concurrent `connect` calls can never create two sessions. When the
/// session closes, locally or because the peer went away, an internal
/// hook clears the session slot so a later `connect` starts fresh.
pub struct Client<C: FrameCodec> {
    config: ClientConfig,
    codec: Arc<C>,
    events: Arc<dyn SessionEvents<C>>,
    shared: Arc<ClientShared<C>>,
    connect_lock: AsyncMutex<()>,
}

struct ClientShared<C: FrameCodec> {
    session: parking_lot::Mutex<Option<Arc<Session<C>>>>,
}

impl<C: FrameCodec> Client<C> {
    pub fn new(
        config: ClientConfig,
        codec: Arc<C>,
        events: Arc<dyn SessionEvents<C>>,
    ) -> Client<C> {
        Client {
            config,
            codec,
            events,
            shared: Arc::new(ClientShared {
                session: parking_lot::Mutex::new(None),
            }),
            connect_lock: AsyncMutex::new(()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared
            .session
            .lock()
            .as_ref()
            .is_some_and(|session| {
                matches!(
                    session.state(),
                    SessionState::Created | SessionState::Receiving
                )
            })
    }

    /// The current session, if any.
    pub fn session(&self) -> Option<Arc<Session<C>>> {
        self.shared.session.lock().clone()
    }

    /// Establishes the connection and starts receiving. A no-op when
    /// already connected; concurrent calls are serialized.
    pub async fn connect(&self) -> AppResult<()> {
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        let addr = format!("{}:{}", self.config.ip, self.config.port);
        self.events.on_log(&format!(
            "try connect to {{ ip: {}, port: {} }}",
            self.config.ip, self.config.port
        ));
        let stream = TcpStream::connect(&addr).await?;

        let hooks: Arc<dyn SessionEvents<C>> = Arc::new(ClientHooks {
            app: self.events.clone(),
            shared: Arc::downgrade(&self.shared),
        });
        let session = Session::new(stream, self.config.read_buffer_size, self.codec.clone(), hooks)?;
        *self.shared.session.lock() = Some(session.clone());

        info!(session = %session, "connected to {}", addr);
        self.events.on_log(&format!(
            "connected {{ ip: {}, port: {} }}",
            self.config.ip, self.config.port
        ));
        session.start_receiving();
        Ok(())
    }

    /// Closes and releases the current session, if any. Serialized with
    /// `connect`.
    pub async fn disconnect(&self) {
        let _guard = self.connect_lock.lock().await;
        let session = self.shared.session.lock().take();
        if let Some(session) = session {
            session.close().await;
            debug!(session = %session, "disconnected");
        }
    }

    /// Pass-through to the current session. `Ok(0)` when disconnected.
    pub async fn send(&self, frame: &C::Frame) -> AppResult<usize> {
        let session = self.shared.session.lock().clone();
        match session {
            Some(session) => session.send(frame).await,
            None => Ok(0),
        }
    }
}

/// Forwards everything to the application and clears the client's session
/// slot when the session closes, making room for a reconnect.
struct ClientHooks<C: FrameCodec> {
    app: Arc<dyn SessionEvents<C>>,
    shared: Weak<ClientShared<C>>,
}

impl<C: FrameCodec> SessionEvents<C> for ClientHooks<C> {
    fn on_received(&self, session: &Arc<Session<C>>, frame: C::Frame) {
        self.app.on_received(session, frame);
    }

    fn on_sent(&self, session: &Arc<Session<C>>, frame: &C::Frame) {
        self.app.on_sent(session, frame);
    }

    fn on_closed(&self, session: &Arc<Session<C>>) {
        if let Some(shared) = self.shared.upgrade() {
            let mut slot = shared.session.lock();
            if slot.as_ref().is_some_and(|current| current.id() == session.id()) {
                *slot = None;
            }
        }
        self.app.on_closed(session);
    }

    fn on_error(&self, error: &crate::AppError) {
        self.app.on_error(error);
    }

    fn on_log(&self, line: &str) {
        self.app.on_log(line);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout};

    use super::*;
    use crate::codec::{Packet, PacketCodec};
    use crate::session::NoopEvents;
    use crate::{Server, ServerConfig};

    /// Server-side callbacks that answer every frame with its reply.
    struct EchoBack;

    impl SessionEvents<PacketCodec> for EchoBack {
        fn on_received(&self, session: &Arc<Session<PacketCodec>>, frame: Packet) {
            let session = session.clone();
            tokio::spawn(async move {
                let _ = session.send(&Packet::reply(&frame)).await;
            });
        }
    }

    struct ClientProbe {
        received: mpsc::UnboundedSender<Packet>,
        closed: mpsc::UnboundedSender<()>,
    }

    impl SessionEvents<PacketCodec> for ClientProbe {
        fn on_received(&self, _session: &Arc<Session<PacketCodec>>, frame: Packet) {
            let _ = self.received.send(frame);
        }

        fn on_closed(&self, _session: &Arc<Session<PacketCodec>>) {
            let _ = self.closed.send(());
        }
    }

    async fn echo_server() -> Server<PacketCodec> {
        let config = ServerConfig {
            ip: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        };
        let server = Server::new(config, Arc::new(PacketCodec::default()), Arc::new(EchoBack));
        server.start().await.unwrap();
        server
    }

    fn probe_client(
        port: u16,
    ) -> (
        Client<PacketCodec>,
        mpsc::UnboundedReceiver<Packet>,
        mpsc::UnboundedReceiver<()>,
    ) {
        let (received_tx, received_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let config = ClientConfig {
            ip: "127.0.0.1".to_string(),
            port,
            ..ClientConfig::default()
        };
        let client = Client::new(
            config,
            Arc::new(PacketCodec::default()),
            Arc::new(ClientProbe {
                received: received_tx,
                closed: closed_tx,
            }),
        );
        (client, received_rx, closed_rx)
    }

    #[tokio::test]
    async fn request_and_reply_round_trip() {
        let server = echo_server().await;
        let (client, mut received, _closed) = probe_client(server.local_port());

        client.connect().await.unwrap();
        assert!(client.is_connected());

        let request = Packet::new(11, 2, "ping");
        let sent = client.send(&request).await.unwrap();
        assert_eq!(sent, request.wire_size());

        let reply = timeout(Duration::from_secs(5), received.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.sequence_id, 2);
        assert_eq!(reply.payload, "ping");

        client.disconnect().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn send_when_disconnected_is_zero() {
        let (client, _received, _closed) = probe_client(1);
        let frame = Packet::new(11, 2, "nope");
        assert_eq!(client.send(&frame).await.unwrap(), 0);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn concurrent_connects_create_one_session() {
        let server = echo_server().await;
        let port = server.local_port();
        let (client, _received, _closed) = probe_client(port);
        let client = Arc::new(client);

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let client = client.clone();
            tasks.push(tokio::spawn(async move { client.connect().await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert!(client.is_connected());
        timeout(Duration::from_secs(5), async {
            while server.session_count() != 1 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("server should see exactly one session");

        client.disconnect().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn reconnect_after_disconnect() {
        let server = echo_server().await;
        let (client, mut received, _closed) = probe_client(server.local_port());

        client.connect().await.unwrap();
        let first_id = client.session().unwrap().id();
        client.disconnect().await;
        assert!(!client.is_connected());
        assert!(client.session().is_none());

        client.connect().await.unwrap();
        let second_id = client.session().unwrap().id();
        assert_ne!(first_id, second_id);

        client.send(&Packet::new(11, 4, "again")).await.unwrap();
        let reply = timeout(Duration::from_secs(5), received.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.payload, "again");

        client.disconnect().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn server_going_away_clears_the_session_slot() {
        let server = echo_server().await;
        let (client, _received, mut closed) = probe_client(server.local_port());

        client.connect().await.unwrap();
        server.stop().await;

        timeout(Duration::from_secs(5), closed.recv())
            .await
            .unwrap()
            .unwrap();
        // the closed hook has run by the time on_closed fires
        assert!(client.session().is_none());
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn connect_while_connected_is_a_noop() {
        let server = echo_server().await;
        let (client, _received, _closed) = probe_client(server.local_port());

        client.connect().await.unwrap();
        let id = client.session().unwrap().id();
        client.connect().await.unwrap();
        assert_eq!(client.session().unwrap().id(), id);

        client.disconnect().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn connect_to_a_dead_port_fails() {
        let server = echo_server().await;
        let port = server.local_port();
        server.stop().await;
        // the port is released now
        let (client, _received, _closed) = probe_client(port);
        assert!(client.connect().await.is_err());
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn noop_events_compile_for_any_codec() {
        // NoopEvents is the default callback set for apps that only poll
        let config = ClientConfig::default();
        let client: Client<PacketCodec> = Client::new(
            config,
            Arc::new(PacketCodec::default()),
            Arc::new(NoopEvents),
        );
        assert!(!client.is_connected());
    }
}
