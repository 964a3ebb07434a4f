use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::codec::FrameCodec;
use crate::session::{Session, SessionEvents, SessionRegistry};
use crate::{AppError, AppResult, ServerConfig};

/// The server side of the engine: a listening socket, an accept loop, and
/// the registry of live sessions.
///
/// Admission backpressure: when `accept_limit` sessions are registered the
/// accept loop exits and the listening socket is dropped. Once a session
/// closes and the count falls back under the limit, a single debounced timer
/// relaunches the loop after `accept_restart_delay_ms`.
pub struct Server<C: FrameCodec> {
    shared: Arc<ServerShared<C>>,
    // serializes start/stop so two callers cannot double-bind the socket
    control: AsyncMutex<Control>,
}

struct Control {
    started: bool,
}

struct ServerShared<C: FrameCodec> {
    config: ServerConfig,
    codec: Arc<C>,
    events: Arc<dyn SessionEvents<C>>,
    registry: SessionRegistry<C>,
    started: AtomicBool,
    accepting: AtomicBool,
    restart_pending: AtomicBool,
    // the actual port after binding; matters when the configured port is 0
    bound_port: AtomicU16,
    cancel: parking_lot::Mutex<CancellationToken>,
    accept_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl<C: FrameCodec> Server<C> {
    pub fn new(
        config: ServerConfig,
        codec: Arc<C>,
        events: Arc<dyn SessionEvents<C>>,
    ) -> Server<C> {
        let bound_port = AtomicU16::new(config.port);
        Server {
            shared: Arc::new(ServerShared {
                config,
                codec,
                events,
                registry: SessionRegistry::new(),
                started: AtomicBool::new(false),
                accepting: AtomicBool::new(false),
                restart_pending: AtomicBool::new(false),
                bound_port,
                cancel: parking_lot::Mutex::new(CancellationToken::new()),
                accept_task: parking_lot::Mutex::new(None),
            }),
            control: AsyncMutex::new(Control { started: false }),
        }
    }

    /// Binds the listening socket and launches the accept loop. Idempotent.
    pub async fn start(&self) -> AppResult<()> {
        let mut control = self.control.lock().await;
        if control.started {
            return Ok(());
        }

        *self.shared.cancel.lock() = CancellationToken::new();
        self.shared.started.store(true, Ordering::SeqCst);
        if let Err(e) = launch_accept_loop(self.shared.clone()).await {
            self.shared.started.store(false, Ordering::SeqCst);
            return Err(e);
        }
        control.started = true;

        info!("server started");
        self.shared.events.on_log("server started");
        Ok(())
    }

    /// Cancels the accept loop, waits for it, then closes every registered
    /// session. Idempotent.
    pub async fn stop(&self) {
        let mut control = self.control.lock().await;
        if !control.started {
            return;
        }
        control.started = false;
        self.shared.started.store(false, Ordering::SeqCst);
        self.shared.cancel.lock().cancel();

        let task = self.shared.accept_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.shared.registry.clear().await;

        info!("server stopped");
        self.shared.events.on_log("server stopped");
    }

    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::SeqCst)
    }

    pub fn session_count(&self) -> usize {
        self.shared.registry.count()
    }

    /// The port the listening socket actually bound to.
    pub fn local_port(&self) -> u16 {
        self.shared.bound_port.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> Vec<Arc<Session<C>>> {
        self.shared.registry.sessions()
    }

    /// Best-effort fan-out to every registered session. A failing session is
    /// logged and skipped; the rest still get the frame. Returns how many
    /// sessions the frame was written to.
    pub async fn broadcast(&self, frame: &C::Frame) -> usize {
        let mut delivered = 0;
        for session in self.shared.registry.sessions() {
            match session.send(frame).await {
                Ok(n) if n > 0 => delivered += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(session = %session, error = %e, "broadcast send failed");
                    self.shared
                        .events
                        .on_log(&format!("broadcast send failed for {}: {}", session, e));
                }
            }
        }
        delivered
    }

    /// Targeted send. `Ok(0)` when no session with that id is registered.
    pub async fn send_to(&self, id: &Uuid, frame: &C::Frame) -> AppResult<usize> {
        match self.shared.registry.get(id) {
            Some(session) => session.send(frame).await,
            None => Ok(0),
        }
    }
}

impl<C: FrameCodec> Drop for Server<C> {
    fn drop(&mut self) {
        debug!("server dropped");
    }
}

/// Binds and spawns one accept loop, guarded so only a single loop can run
/// at a time (start and the backpressure restart timer both come through
/// here).
async fn launch_accept_loop<C: FrameCodec>(shared: Arc<ServerShared<C>>) -> AppResult<()> {
    if shared
        .accepting
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Ok(());
    }

    let addr = format!("{}:{}", shared.config.ip, shared.bound_port.load(Ordering::SeqCst));
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            shared.accepting.store(false, Ordering::SeqCst);
            let err = AppError::IllegalState(format!("failed to bind {}: {}", addr, e));
            error!("{}", err);
            return Err(err);
        }
    };
    if let Ok(local) = listener.local_addr() {
        shared.bound_port.store(local.port(), Ordering::SeqCst);
    }

    info!(%addr, "server listening");
    shared.events.on_log(&format!(
        "server listening... {{ ip: {}, port: {} }}",
        shared.config.ip,
        shared.bound_port.load(Ordering::SeqCst)
    ));

    let cancel = shared.cancel.lock().clone();
    let task = tokio::spawn(accept_loop(shared.clone(), listener, cancel));
    *shared.accept_task.lock() = Some(task);
    Ok(())
}

async fn accept_loop<C: FrameCodec>(
    shared: Arc<ServerShared<C>>,
    listener: TcpListener,
    cancel: CancellationToken,
) {
    shared.events.on_log("start accept task...");
    let hooks: Arc<dyn SessionEvents<C>> = Arc::new(ServerHooks {
        app: shared.events.clone(),
        shared: Arc::downgrade(&shared),
    });

    loop {
        let socket = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("accept loop cancelled");
                break;
            }
            res = accept(&listener) => match res {
                Ok(socket) => socket,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    shared.events.on_error(&e);
                    break;
                }
            },
        };

        let session = match Session::new(
            socket,
            shared.config.read_buffer_size,
            shared.codec.clone(),
            hooks.clone(),
        ) {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "failed to set up accepted connection");
                shared.events.on_error(&e);
                continue;
            }
        };

        if shared.registry.add(session.clone()) {
            shared.events.on_log(&format!(
                "session added: {}, total session count: {}",
                session,
                shared.registry.count()
            ));
            shared.events.on_accepted(&session);
            session.start_receiving();
        } else {
            // identity collision; dispose without ever starting the loop
            warn!(session = %session, "duplicate session id, dropping connection");
            shared
                .events
                .on_log(&format!("duplicate session id, dropped: {}", session));
            session.close().await;
            continue;
        }

        if let Some(limit) = shared.config.accept_limit {
            if shared.registry.count() >= limit {
                info!(limit, "accept limit reached, pausing accept loop");
                shared.events.on_log(&format!(
                    "session accept limited... limit session count: {}",
                    limit
                ));
                break;
            }
        }
    }

    // release the socket before clearing the guard, so a relaunch that wins
    // the guard can always rebind the port
    drop(listener);
    shared.accepting.store(false, Ordering::SeqCst);
    shared.events.on_log("stop accept task...");
    debug!("accept task exited");
}

/// One accept with the bounded exponential backoff retry for transient
/// failures (fd exhaustion and the like). Past the bound the error is
/// surfaced and the loop stops accepting.
async fn accept(listener: &TcpListener) -> AppResult<TcpStream> {
    let mut backoff = 1;
    loop {
        match listener.accept().await {
            Ok((socket, _)) => return Ok(socket),
            Err(err) => {
                if backoff > 64 {
                    return Err(AppError::Accept(format!("accept tcp server error: {}", err)));
                }
            }
        }
        time::sleep(Duration::from_secs(backoff)).await;
        backoff *= 2;
    }
}

impl<C: FrameCodec> ServerShared<C> {
    /// Debounced relaunch of the accept loop after a session closes below
    /// the limit. The pending flag guarantees a single outstanding timer no
    /// matter how many sessions close in a burst.
    fn schedule_accept_restart(self: &Arc<Self>) {
        if self
            .restart_pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let shared = self.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(shared.config.accept_restart_delay_ms)).await;
            shared.restart_pending.store(false, Ordering::SeqCst);
            // the limit-break loop may still hold the accepting guard while
            // it unwinds; wait it out instead of losing the relaunch
            let mut attempts = 0;
            while shared.accepting.load(Ordering::SeqCst) {
                attempts += 1;
                if attempts > 50 {
                    warn!("accept loop still running, relaunch abandoned");
                    return;
                }
                time::sleep(Duration::from_millis(10)).await;
            }
            if !shared.started.load(Ordering::SeqCst) {
                return;
            }
            if let Err(e) = launch_accept_loop(shared.clone()).await {
                error!(error = %e, "failed to relaunch accept loop");
                shared.events.on_error(&e);
            }
        });
    }
}

/// Per-session callback layer the server slips between a session and the
/// application: forwards everything, and on close removes the session from
/// the registry and drives the backpressure restart check.
struct ServerHooks<C: FrameCodec> {
    app: Arc<dyn SessionEvents<C>>,
    shared: Weak<ServerShared<C>>,
}

impl<C: FrameCodec> SessionEvents<C> for ServerHooks<C> {
    fn on_received(&self, session: &Arc<Session<C>>, frame: C::Frame) {
        self.app.on_received(session, frame);
    }

    fn on_sent(&self, session: &Arc<Session<C>>, frame: &C::Frame) {
        self.app.on_sent(session, frame);
    }

    fn on_accepted(&self, session: &Arc<Session<C>>) {
        self.app.on_accepted(session);
    }

    fn on_closed(&self, session: &Arc<Session<C>>) {
        let Some(shared) = self.shared.upgrade() else {
            self.app.on_closed(session);
            return;
        };
        let app = self.app.clone();
        let session = session.clone();
        tokio::spawn(async move {
            // during stop() the registry clear handles disposal wholesale
            if !shared.started.load(Ordering::SeqCst) {
                return;
            }
            shared.registry.remove(&session.id()).await;
            shared.events.on_log(&format!(
                "session removed: {}, total session count: {}",
                session,
                shared.registry.count()
            ));
            if let Some(limit) = shared.config.accept_limit {
                if shared.registry.count() < limit {
                    shared.schedule_accept_restart();
                }
            }
            app.on_closed(&session);
        });
    }

    fn on_error(&self, error: &AppError) {
        self.app.on_error(error);
    }

    fn on_log(&self, line: &str) {
        self.app.on_log(line);
    }
}
