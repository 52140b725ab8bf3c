//! Gateway bootstrap - the composition root.
//!
//! This module is the ONLY place where the runtime pieces are wired
//! together: serial link → fan-out ingest loop, TCP broadcaster, audio hub
//! and capture supervisor, input sequencer, screen timer, and the link-event
//! loop that restarts audio capture after a reconnect.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use m8link_runtime::{
    AudioCapture, AudioHub, Fanout, GatewayConfig, InputSequencer, LinkEvent, SerialLink,
    TcpBroadcaster,
};

/// Application context for the gateway.
///
/// Holds every initialized service the handlers need. Built once at startup
/// by [`bootstrap`] and shared as [`crate::state::AppState`].
pub struct GatewayContext {
    pub config: GatewayConfig,
    pub link: Arc<SerialLink>,
    pub fanout: Arc<Fanout>,
    pub hub: Arc<AudioHub>,
    pub capture: Option<Arc<AudioCapture>>,
    pub sequencer: Arc<InputSequencer>,
    pub tcp: Option<Arc<TcpBroadcaster>>,

    tasks: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl GatewayContext {
    /// Start audio capture if it is configured and not yet running. Called
    /// lazily by the first `/audio` consumer.
    pub async fn ensure_capture(&self) {
        if let Some(capture) = &self.capture {
            if !capture.is_running() {
                if let Err(e) = capture.start().await {
                    warn!(error = %e, "audio capture failed to start");
                }
            }
        }
    }

    /// Orderly shutdown: screen timer, audio, TCP (with batch flush), then
    /// the serial link with its disconnect sentinel. Idempotent.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("gateway shutting down");
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        if let Some(capture) = &self.capture {
            capture.stop().await;
        }
        self.hub.stop_recording();
        if let Some(tcp) = &self.tcp {
            tcp.shutdown();
        }
        self.link.stop();
        self.link.shutdown().await;
    }
}

/// Wire the gateway together. The HTTP listener is NOT bound here; that is
/// [`start_server`]'s job, so tests can exercise the full context without a
/// socket.
pub async fn bootstrap(config: GatewayConfig) -> Result<Arc<GatewayContext>> {
    info!(
        http_port = config.http_port,
        tcp_port = config.tcp_port,
        baud = config.baud,
        audio = config.audio,
        "gateway bootstrap"
    );

    let (link, mut chunk_rx) = SerialLink::new(&config);
    let fanout = Arc::new(Fanout::new());

    // Ingest loop: the single consumer of the link's chunk stream.
    let ingest = {
        let fanout = Arc::clone(&fanout);
        tokio::spawn(async move {
            while let Some(chunk) = chunk_rx.recv().await {
                fanout.ingest_chunk(&chunk);
            }
        })
    };

    // TCP broadcaster: port 0 disables it. A bind failure here is
    // unrecoverable and propagates to the caller.
    let tcp = if config.tcp_port == 0 {
        None
    } else {
        let broadcaster = TcpBroadcaster::new();
        broadcaster.start(config.tcp_port, Arc::clone(&link)).await?;
        fanout.attach_tcp(Arc::clone(&broadcaster));
        Some(broadcaster)
    };

    let hub = Arc::new(AudioHub::new());
    if let Some(tcp) = &tcp {
        hub.attach_tcp(Arc::clone(tcp));
    }

    let capture = config
        .audio
        .then(|| AudioCapture::new(config.audio_command.clone(), Arc::clone(&hub)));

    let sequencer = InputSequencer::new(Arc::clone(&link), Some(Arc::clone(&fanout)));

    let screen_timer = fanout.spawn_screen_timer();

    // Link events: a reconnect means the capture helper's USB handle is
    // stale; restart it if anything is consuming audio.
    let events = {
        let mut events = link.events();
        let capture = capture.clone();
        let hub = Arc::clone(&hub);
        let feeds_tcp = tcp.is_some();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if let LinkEvent::Connected { path } = event {
                    info!(port = %path, "link connected");
                    if let Some(capture) = &capture {
                        if feeds_tcp || hub.consumer_count() > 0 {
                            if let Err(e) = capture.restart().await {
                                warn!(error = %e, "audio capture restart failed");
                            }
                        }
                    }
                }
            }
        })
    };

    // Initial device acquisition. An absent device is not an error: the
    // server binds everything and waits for the reconnect loop.
    match link.connect().await {
        Ok(path) => info!(port = %path, "device connected at startup"),
        Err(e) => {
            info!(error = %e, "no device at startup, waiting");
            if config.auto_reconnect {
                link.spawn_reconnect_loop();
            }
        }
    }

    Ok(Arc::new(GatewayContext {
        config,
        link,
        fanout,
        hub,
        capture,
        sequencer,
        tcp,
        tasks: Mutex::new(vec![ingest, screen_timer, events]),
        stopped: AtomicBool::new(false),
    }))
}

/// Bootstrap and serve HTTP until ctrl-c, then shut the gateway down.
pub async fn start_server(config: GatewayConfig) -> Result<()> {
    use tokio::net::TcpListener;

    let http_port = config.http_port;
    let ctx = bootstrap(config).await?;
    let app = crate::routes::create_router(Arc::clone(&ctx));

    let addr = format!("0.0.0.0:{http_port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("gateway listening on http://{addr}");

    let shutdown_ctx = Arc::clone(&ctx);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown_ctx.shutdown().await;
        })
        .await?;

    // Covers non-signal exits; shutdown() itself is idempotent.
    ctx.shutdown().await;
    Ok(())
}
