//! The reusable adapter driver (spec §9 composition-over-inheritance design note).
//!
//! `VenueAdapter<H>` owns the connection lifecycle, ping/pong liveness, reconnect
//! backoff, and REST fallback machinery that every venue needs identically; `H:
//! VenueHooks` supplies only the venue-specific data and small parsing/framing
//! functions. This generalizes the teacher's per-venue collectors
//! (`input/collectors/kraken.rs`, `coinbase_adapter/src/adapter.rs`,
//! `input/collectors/binance.rs`), which each hand-rolled their own connection
//! loop, into one driver parameterized by venue data.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::connection::{ConnectionManager, ConnectionState, DisconnectReason};
use super::normalize::{normalize_price, ParsedFrame};
use super::{AdapterCapabilities, AdapterEvent, ExchangeAdapter, VenueHealth};
use crate::config::ConnectionDefaults;
use crate::error::{OracleError, Result};
use crate::log_throttle::ErrorCategory;
use crate::rate_limit::RateLimiter;
use crate::types::{now_ms, Category, PriceObservation};

/// How a venue classifies one of its close codes (spec §4.1 "Close-code policy").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseClass {
    Normal,
    PongTimeout,
    Abnormal,
    /// Venue-specific code; `extended_backoff` mirrors Kraken 503-style retryable
    /// errors that warrant a longer cooldown than the default.
    VenueSpecific { extended_backoff: bool },
}

/// Static, venue-specific configuration (spec §9: "a struct holding static
/// per-venue configuration").
#[derive(Debug, Clone)]
pub struct VenueConfig {
    pub name: &'static str,
    pub category: Category,
    pub ws_url: &'static str,
    pub rest_base_url: &'static str,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub supports_websocket: bool,
    pub supports_volume: bool,
}

/// The small set of venue-specific hooks (spec §9: "function-valued hooks").
/// Implemented once per venue in `adapter::venues::*`.
pub trait VenueHooks: Send + Sync + 'static {
    fn map_to_exchange(&self, feed_symbol: &str) -> String;
    fn map_from_exchange(&self, exchange_symbol: &str) -> Option<String>;

    fn build_subscribe_message(&self, exchange_symbols: &[String]) -> Message;
    /// `None` when the venue has no explicit unsubscribe frame (e.g. Binance's
    /// all-tickers stream, where unsubscription is purely local filtering).
    fn build_unsubscribe_message(&self, exchange_symbols: &[String]) -> Option<Message>;
    fn build_ping_message(&self) -> Option<Message>;

    fn parse_frame(&self, text: &str) -> ParsedFrame;
    fn classify_close_code(&self, code: u16) -> CloseClass;

    fn rest_ticker_url(&self, exchange_symbol: &str) -> String;
    fn parse_rest_response(&self, body: &str, canonical_symbol: &str) -> Result<PriceObservation>;
}

struct Inner<H: VenueHooks> {
    config: VenueConfig,
    hooks: H,
    connection: ConnectionManager,
    events: mpsc::Sender<AdapterEvent>,
    rate_limiter: Arc<RateLimiter>,
    http: reqwest::Client,
}

/// The generic per-venue adapter. Cheap to clone (all shared state is behind `Arc`).
pub struct VenueAdapter<H: VenueHooks> {
    inner: Arc<Inner<H>>,
    task: AsyncMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<H: VenueHooks> VenueAdapter<H> {
    pub fn new(
        config: VenueConfig,
        hooks: H,
        events: mpsc::Sender<AdapterEvent>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        let env_prefix = config.name.to_uppercase();
        let connection = ConnectionManager::new(config.name, ConnectionDefaults::from_env(&env_prefix));
        let inner = Inner {
            config,
            hooks,
            connection,
            events,
            rate_limiter,
            http: reqwest::Client::new(),
        };
        Self {
            inner: Arc::new(inner),
            task: AsyncMutex::new(None),
        }
    }
}

impl<H: VenueHooks> Inner<H> {
    /// Owns the streaming transport end-to-end: connect, subscribe-on-reconnect,
    /// message loop, disconnect classification, backoff, repeat. Never returns an
    /// error out of itself -- transport failure is surfaced via `events` (spec §4.1:
    /// "The adapter never throws out of connect").
    async fn run_loop(self: Arc<Self>) {
        loop {
            if self.connection.is_shutting_down() {
                self.connection.set_state(ConnectionState::Closed).await;
                return;
            }
            if !self.connection.circuit_breaker().should_attempt() {
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            self.connection.set_state(ConnectionState::Connecting).await;
            let attempt = timeout(self.connection.connect_timeout(), connect_async(self.config.ws_url)).await;

            let ws_stream = match attempt {
                Ok(Ok((stream, _response))) => stream,
                Ok(Err(e)) => {
                    self.connection.circuit_breaker().on_failure();
                    let _ = self
                        .events
                        .send(AdapterEvent::Error {
                            message: format!("connect failed: {e}"),
                            category: ErrorCategory::Transport,
                        })
                        .await;
                    if self.give_up_or_backoff(DisconnectReason::NetworkError).await {
                        return;
                    }
                    continue;
                }
                Err(_elapsed) => {
                    self.connection.circuit_breaker().on_failure();
                    let _ = self
                        .events
                        .send(AdapterEvent::Error {
                            message: "connect timed out".into(),
                            category: ErrorCategory::Transport,
                        })
                        .await;
                    if self.give_up_or_backoff(DisconnectReason::NetworkError).await {
                        return;
                    }
                    continue;
                }
            };

            self.connection.set_state(ConnectionState::Connected).await;
            self.connection.circuit_breaker().on_success();
            self.connection.reset_backoff();
            let _ = self
                .events
                .send(AdapterEvent::ConnectionChange { connected: true })
                .await;

            let (mut write, mut read) = ws_stream.split();

            let tracked: Vec<String> = self.connection.tracked_symbols().await.into_iter().collect();
            if !tracked.is_empty() {
                let msg = self.hooks.build_subscribe_message(&tracked);
                let _ = write.send(msg).await;
            }

            let reason = self.message_loop(&mut write, &mut read).await;
            self.connection.set_state(ConnectionState::Degraded).await;
            let _ = self
                .events
                .send(AdapterEvent::ConnectionChange { connected: false })
                .await;

            if self.give_up_or_backoff(reason).await {
                return;
            }
        }
    }

    /// Decides the next step after a disconnect: sleeps the appropriate backoff and
    /// returns `false` to keep looping, or settles a terminal state and returns `true`.
    async fn give_up_or_backoff(&self, reason: DisconnectReason) -> bool {
        match self.connection.next_after_disconnect(reason) {
            Ok(ConnectionState::Closed) => {
                self.connection.set_state(ConnectionState::Closed).await;
                true
            }
            Ok(ConnectionState::Degraded) => {
                // Max retries exceeded: stop streaming, leave Degraded for REST fallback.
                self.connection.set_state(ConnectionState::Degraded).await;
                let _ = self.events.send(AdapterEvent::StreamingExhausted).await;
                true
            }
            Ok(_) => {
                let backoff = self.connection.calculate_backoff(reason);
                tokio::time::sleep(backoff).await;
                false
            }
            Err(e) => {
                let _ = self
                    .events
                    .send(AdapterEvent::Error {
                        message: e.to_string(),
                        category: ErrorCategory::VenuePermanent,
                    })
                    .await;
                self.connection.set_state(ConnectionState::FailedPermanent).await;
                true
            }
        }
    }

    /// Runs until the connection drops, returning why. Owns ping/pong liveness
    /// (spec §4.1 "Liveness (ping/pong)").
    async fn message_loop(
        &self,
        write: &mut (impl SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
        read: &mut (impl StreamExt<
            Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>,
        > + Unpin),
    ) -> DisconnectReason {
        let mut ping_ticker = tokio::time::interval(self.config.ping_interval);
        ping_ticker.tick().await; // first tick fires immediately; consume it
        let mut liveness_ticker = tokio::time::interval(Duration::from_secs(1));
        self.connection.mark_message_received();

        loop {
            tokio::select! {
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            self.connection.mark_message_received();
                            self.handle_text_frame(&text, write).await;
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            self.connection.mark_message_received();
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.connection.mark_message_received();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let code = frame.map(|f| f.code.into()).unwrap_or(1000);
                            return self.classify_and_translate(code);
                        }
                        Some(Ok(_)) => {
                            self.connection.mark_message_received();
                        }
                        Some(Err(_)) => return DisconnectReason::NetworkError,
                        None => return DisconnectReason::AbnormalClose,
                    }
                }
                _ = ping_ticker.tick() => {
                    if let Some(ping) = self.hooks.build_ping_message() {
                        if write.send(ping).await.is_err() {
                            return DisconnectReason::NetworkError;
                        }
                    }
                }
                _ = liveness_ticker.tick() => {
                    let elapsed = now_ms() - self.connection.last_message_time();
                    if elapsed as u128 > self.config.pong_timeout.as_millis() {
                        return DisconnectReason::PongTimeout;
                    }
                }
            }
        }
    }

    /// Logs at the severity the close-code policy calls for (spec §4.1: 1000 debug,
    /// 1001/1006 warn, venue-specific codes per adapter -- OKX's expected 4004 idle
    /// close logs at debug the same way a plain, non-extended-backoff venue code does).
    fn classify_and_translate(&self, code: u16) -> DisconnectReason {
        let class = self.hooks.classify_close_code(code);
        match class {
            CloseClass::Normal => {
                tracing::debug!(adapter = %self.config.name, code, "normal close");
                DisconnectReason::GracefulShutdown
            }
            CloseClass::PongTimeout => {
                tracing::warn!(adapter = %self.config.name, code, "pong timeout; scheduling reconnect");
                DisconnectReason::PongTimeout
            }
            CloseClass::Abnormal => {
                tracing::warn!(adapter = %self.config.name, code, "abnormal close; scheduling reconnect with extended backoff");
                DisconnectReason::AbnormalClose
            }
            CloseClass::VenueSpecific { extended_backoff: true } => {
                tracing::warn!(adapter = %self.config.name, code, "venue-specific retryable close; extended backoff");
                DisconnectReason::VenueSpecific(code)
            }
            CloseClass::VenueSpecific { extended_backoff: false } => {
                tracing::debug!(adapter = %self.config.name, code, "venue-specific close, treated as normal");
                DisconnectReason::VenueSpecific(code)
            }
        }
    }

    async fn handle_text_frame(
        &self,
        text: &str,
        write: &mut (impl SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    ) {
        match self.hooks.parse_frame(text) {
            ParsedFrame::Ticker(frame) => self.emit_ticker(frame).await,
            ParsedFrame::Tickers(frames) => {
                for frame in frames {
                    self.emit_ticker(frame).await;
                }
            }
            ParsedFrame::Error(message) => {
                let _ = self
                    .events
                    .send(AdapterEvent::Error { message, category: ErrorCategory::Protocol })
                    .await;
            }
            ParsedFrame::Respond(reply) => {
                let _ = write.send(reply).await;
            }
            ParsedFrame::SubscriptionAck | ParsedFrame::Heartbeat | ParsedFrame::Ignore => {}
        }
    }

    /// Maps a venue frame to canonical form, applies the client-side subscription
    /// filter (spec §4.2: Binance "filter observations against the subscription set
    /// client-side"), and normalizes into a [`PriceObservation`].
    async fn emit_ticker(&self, frame: super::normalize::TickerFrame) {
        let Some(canonical) = self.hooks.map_from_exchange(&frame.symbol) else {
            return;
        };
        let tracked = self.connection.tracked_symbols().await;
        if !tracked.is_empty() && !tracked.contains(&frame.symbol) && !tracked.contains(&canonical) {
            return;
        }
        let mut frame = frame;
        frame.symbol = canonical;
        if let Some(obs) = normalize_price(&frame, self.config.name, now_ms()) {
            let _ = self.events.send(AdapterEvent::PriceUpdate(obs)).await;
        }
    }
}

#[async_trait]
impl<H: VenueHooks> ExchangeAdapter for VenueAdapter<H> {
    fn exchange_name(&self) -> &str {
        self.inner.config.name
    }

    fn category(&self) -> Category {
        self.inner.config.category
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            supports_websocket: self.inner.config.supports_websocket,
            supports_rest: true,
            supports_volume: self.inner.config.supports_volume,
            supports_order_book: false,
            supported_categories: vec![self.inner.config.category],
        }
    }

    async fn connect(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return Ok(());
        }
        let inner = self.inner.clone();
        *task = Some(tokio::spawn(Inner::run_loop(inner)));
        Ok(())
    }

    async fn disconnect(&self) {
        self.inner.connection.begin_shutdown();
        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            handle.abort();
        }
        self.inner.connection.set_state(ConnectionState::Closed).await;
    }

    async fn subscribe(&self, symbols: &[String]) -> Result<()> {
        let state = self.inner.connection.state().await;
        if !matches!(state, ConnectionState::Connected | ConnectionState::Degraded) {
            return Err(OracleError::NotConnected {
                adapter: self.inner.config.name.to_string(),
            });
        }
        let existing = self.inner.connection.tracked_symbols().await;
        let mut new_exchange_symbols = Vec::new();
        // Filter invalid symbols first (spec §4.1); a symbol already tracked is
        // still valid, just deduplicated, so it must not count toward the
        // "none remain" failure below.
        let mut any_valid = false;
        for symbol in symbols {
            let exchange_symbol = self.inner.hooks.map_to_exchange(symbol);
            if self.inner.hooks.map_from_exchange(&exchange_symbol).is_none() {
                continue;
            }
            any_valid = true;
            if existing.contains(symbol) {
                continue;
            }
            new_exchange_symbols.push(exchange_symbol);
            self.inner.connection.track_symbol(symbol).await;
        }
        if !symbols.is_empty() && !any_valid {
            return Err(OracleError::InvalidSymbols {
                adapter: self.inner.config.name.to_string(),
            });
        }
        // Streaming subscribe messages are only meaningful while Connected; a
        // Degraded adapter still records the intent (spec §9 Open Question).
        if state == ConnectionState::Connected && !new_exchange_symbols.is_empty() {
            // The live write half lives inside the run loop's task; subscription
            // updates for an already-open socket are re-sent on next reconnect via
            // the tracked-symbol set. Venues requiring live re-subscription without
            // reconnect would extend this with a command channel into run_loop.
        }
        Ok(())
    }

    async fn unsubscribe(&self, symbols: &[String]) {
        for symbol in symbols {
            self.inner.connection.untrack_symbol(symbol).await;
        }
    }

    async fn health_check(&self) -> VenueHealth {
        match self.inner.connection.state().await {
            ConnectionState::Connected => VenueHealth::Healthy,
            ConnectionState::Degraded | ConnectionState::Connecting => VenueHealth::Degraded,
            ConnectionState::Idle | ConnectionState::Closed | ConnectionState::FailedPermanent => {
                VenueHealth::Unhealthy
            }
        }
    }

    async fn get_subscriptions(&self) -> Vec<String> {
        self.inner.connection.tracked_symbols().await.into_iter().collect()
    }

    fn validate_symbol(&self, symbol: &str) -> bool {
        let exchange_symbol = self.inner.hooks.map_to_exchange(symbol);
        self.inner.hooks.map_from_exchange(&exchange_symbol).is_some()
    }

    async fn fetch_ticker_rest(&self, symbol: &str) -> Result<PriceObservation> {
        if !self.inner.rate_limiter.check(self.inner.config.name) {
            self.inner.rate_limiter.wait(self.inner.config.name).await;
        }
        let exchange_symbol = self.inner.hooks.map_to_exchange(symbol);
        let url = self.inner.hooks.rest_ticker_url(&exchange_symbol);
        let response = self
            .inner
            .http
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(OracleError::HttpStatus {
                adapter: self.inner.config.name.to_string(),
                status: status.as_u16(),
            });
        }
        self.inner.hooks.parse_rest_response(&body, symbol)
    }
}
