//! Exchange adapter base contract (spec §4.1).
//!
//! Per spec §9 "Deep inheritance with optional overrides -> composition", the base
//! is not a trait every venue implements from scratch. Instead [`driver::VenueAdapter`]
//! is a single reusable driver generic over a [`driver::VenueHooks`] implementation
//! holding only the venue-specific data and small parsing/framing functions (mirrors
//! the teacher's `Adapter`/`SafeAdapter` traits in `services/adapters/src/common.rs`,
//! generalized from one-trait-per-venue to one-driver-many-hooks).
//!
//! [`ExchangeAdapter`] is the object-safe handle the registry and data manager hold;
//! `VenueAdapter<H>` implements it generically for any hooks type.

pub mod connection;
pub mod driver;
pub mod normalize;
pub mod venues;

use async_trait::async_trait;

use crate::error::Result;
use crate::log_throttle::ErrorCategory;
use crate::types::{Category, PriceObservation};

/// Capabilities a venue adapter declares (spec §4.1 read-only property).
#[derive(Debug, Clone)]
pub struct AdapterCapabilities {
    pub supports_websocket: bool,
    pub supports_rest: bool,
    pub supports_volume: bool,
    pub supports_order_book: bool,
    pub supported_categories: Vec<Category>,
}

/// Events an adapter publishes to the Data Manager's observation channel (spec §9:
/// "replace per-listener callback fields with typed one-way channels").
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    PriceUpdate(PriceObservation),
    ConnectionChange { connected: bool },
    /// `category` lets the data manager rate-limit warning logs per adapter per
    /// error kind (spec §4.1: "at most one per 30s") instead of per raw message.
    Error { message: String, category: ErrorCategory },
    /// Streaming reconnect attempts are exhausted; the adapter has settled into
    /// Degraded (REST-only) mode rather than retrying further (spec §4.4: "After
    /// max attempts, the adapter is left degraded and `sourceFailover` is emitted").
    StreamingExhausted,
}

/// Health snapshot an adapter can report beyond its connection state (spec §4.1
/// "if adapter exposes a venue-level health check, invoke it and respect the result").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VenueHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

/// The uniform, object-safe surface the registry and data manager operate on.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn exchange_name(&self) -> &str;
    fn category(&self) -> Category;
    fn capabilities(&self) -> AdapterCapabilities;

    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self);

    /// Subscribe to a set of canonical feed symbols (e.g. `"BTC/USDT"`). See spec
    /// §4.1 "Subscription semantics" for filtering/dedup/failure rules.
    async fn subscribe(&self, symbols: &[String]) -> Result<()>;
    async fn unsubscribe(&self, symbols: &[String]);

    async fn health_check(&self) -> VenueHealth;
    async fn get_subscriptions(&self) -> Vec<String>;

    /// Whether `symbol` maps to a valid exchange instrument for this venue (used by
    /// the registry's `findBestAdapter`, spec §4.3).
    fn validate_symbol(&self, symbol: &str) -> bool;

    /// REST fallback single-symbol fetch (spec §4.2: "Each also exposes a
    /// request/response fallback").
    async fn fetch_ticker_rest(&self, symbol: &str) -> Result<PriceObservation>;
}
