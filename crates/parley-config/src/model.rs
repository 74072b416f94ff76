// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Parley orchestration engine.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level Parley configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ParleyConfig {
    /// HTTP listener and process settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Conversation history and commit settings.
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Processed-event deduplication settings.
    #[serde(default)]
    pub idempotency: IdempotencyConfig,

    /// Customer memory settings.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Domain routing settings.
    #[serde(default)]
    pub router: RouterConfig,

    /// Flow engine settings.
    #[serde(default)]
    pub flows: FlowsConfig,

    /// Outbound domain hooks.
    #[serde(default)]
    pub hooks: HooksConfig,

    /// LLM and embedding provider settings.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Async job subsystem settings.
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Inbound channel gateways, keyed by channel name (e.g. `whatsapp`).
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelConfig>,
}

/// HTTP listener and process configuration.
#[derive(Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to bind the HTTP server to.
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Bearer token required on conversation, job and memory routes. `None` leaves them open.
    #[serde(default)]
    pub bearer_token: Option<String>,

    /// Seconds to wait for in-flight work on shutdown.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            bearer_token: None,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("log_level", &self.log_level)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "[REDACTED]"))
            .field("shutdown_timeout_secs", &self.shutdown_timeout_secs)
            .finish()
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

/// Which storage engine backs the stores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("parley").join("parley.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("parley.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

/// Conversation history and commit configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConversationConfig {
    /// Maximum messages kept per conversation (user and assistant combined).
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,

    /// Automatic whole-turn retries after a version conflict.
    #[serde(default = "default_max_cas_retries")]
    pub max_cas_retries: u32,

    /// Project used when a request carries no project header.
    #[serde(default = "default_project_id")]
    pub default_project_id: String,

    /// History entries handed to planners and the LLM router.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            history_cap: default_history_cap(),
            max_cas_retries: default_max_cas_retries(),
            default_project_id: default_project_id(),
            context_window: default_context_window(),
        }
    }
}

fn default_history_cap() -> usize {
    50
}

fn default_max_cas_retries() -> u32 {
    3
}

fn default_project_id() -> String {
    "default".to_string()
}

fn default_context_window() -> usize {
    10
}

/// Processed-event deduplication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct IdempotencyConfig {
    /// Processed events kept per project before oldest-first eviction.
    #[serde(default = "default_idempotency_capacity")]
    pub capacity: usize,

    /// Floor on retained events; eviction never goes below this.
    #[serde(default = "default_min_retention")]
    pub min_retention: usize,

    /// How long a duplicate waits for the winner's outcome before being told to retry.
    #[serde(default = "default_in_flight_wait_ms")]
    pub in_flight_wait_ms: u64,

    #[serde(default = "default_in_flight_poll_ms")]
    pub in_flight_poll_ms: u64,

    /// Unfinished claims older than this may be taken over by a new delivery.
    #[serde(default = "default_stale_claim_secs")]
    pub stale_claim_secs: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            capacity: default_idempotency_capacity(),
            min_retention: default_min_retention(),
            in_flight_wait_ms: default_in_flight_wait_ms(),
            in_flight_poll_ms: default_in_flight_poll_ms(),
            stale_claim_secs: default_stale_claim_secs(),
        }
    }
}

fn default_idempotency_capacity() -> usize {
    10_000
}

fn default_min_retention() -> usize {
    1_000
}

fn default_in_flight_wait_ms() -> u64 {
    2_000
}

fn default_in_flight_poll_ms() -> u64 {
    50
}

fn default_stale_claim_secs() -> u64 {
    300
}

/// How vector memory embeds text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingMode {
    /// Local feature-hashing embedder, no network.
    #[default]
    Hashing,
    /// The configured embedding provider.
    Provider,
}

/// Customer memory configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    /// TTL for slots without a specific entry in `slot_ttls`.
    #[serde(default = "default_slot_ttl_secs")]
    pub default_slot_ttl_secs: u64,

    /// Per-slot TTL overrides in seconds.
    #[serde(default = "default_slot_ttls")]
    pub slot_ttls: BTreeMap<String, u64>,

    /// Vector entries kept per customer before oldest-first eviction.
    #[serde(default = "default_vector_capacity")]
    pub vector_capacity: usize,

    /// Minimum cosine similarity for recall results.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    #[serde(default)]
    pub embedding: EmbeddingMode,

    /// Vector size of the hashing embedder.
    #[serde(default = "default_hashing_dimensions")]
    pub hashing_dimensions: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            default_slot_ttl_secs: default_slot_ttl_secs(),
            slot_ttls: default_slot_ttls(),
            vector_capacity: default_vector_capacity(),
            similarity_threshold: default_similarity_threshold(),
            default_top_k: default_top_k(),
            embedding: EmbeddingMode::default(),
            hashing_dimensions: default_hashing_dimensions(),
        }
    }
}

fn default_slot_ttl_secs() -> u64 {
    86_400
}

fn default_slot_ttls() -> BTreeMap<String, u64> {
    BTreeMap::from([
        ("last_order_id".to_string(), 7 * 86_400),
        ("last_tracking_id".to_string(), 7 * 86_400),
    ])
}

fn default_vector_capacity() -> usize {
    200
}

fn default_similarity_threshold() -> f32 {
    0.3
}

fn default_top_k() -> usize {
    3
}

fn default_hashing_dimensions() -> usize {
    256
}

/// Routing rules for one domain.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DomainRoutingConfig {
    /// Uppercase token that binds a conversation to this domain.
    #[serde(default)]
    pub activation_code: Option<String>,

    /// Case-insensitive keywords; any hit votes for this domain.
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Regular expressions; any match votes for this domain.
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// Domain routing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RouterConfig {
    /// Phrases that reset to the domain menu.
    #[serde(default = "default_menu_phrases")]
    pub menu_phrases: Vec<String>,

    /// Phrases that end the active flow.
    #[serde(default = "default_exit_phrases")]
    pub exit_phrases: Vec<String>,

    /// Ask the LLM provider when keyword rules are inconclusive.
    #[serde(default)]
    pub llm_fallback: bool,

    #[serde(default = "default_bookings_routing")]
    pub bookings: DomainRoutingConfig,

    #[serde(default = "default_purchases_routing")]
    pub purchases: DomainRoutingConfig,

    #[serde(default = "default_claims_routing")]
    pub claims: DomainRoutingConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            menu_phrases: default_menu_phrases(),
            exit_phrases: default_exit_phrases(),
            llm_fallback: false,
            bookings: default_bookings_routing(),
            purchases: default_purchases_routing(),
            claims: default_claims_routing(),
        }
    }
}

fn default_menu_phrases() -> Vec<String> {
    ["menu", "main menu", "start over"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_exit_phrases() -> Vec<String> {
    ["exit", "quit", "bye"].into_iter().map(String::from).collect()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_bookings_routing() -> DomainRoutingConfig {
    DomainRoutingConfig {
        activation_code: Some("BOOK".to_string()),
        keywords: strings(&["book", "booking", "appointment", "schedule", "reschedule"]),
        patterns: strings(&[r"(?i)\bBK-\d+\b"]),
    }
}

fn default_purchases_routing() -> DomainRoutingConfig {
    DomainRoutingConfig {
        activation_code: Some("SHOP".to_string()),
        keywords: strings(&["order", "orders", "shipment", "tracking", "delivery", "package"]),
        patterns: strings(&[r"(?i)\bORDER-\d+\b", r"(?i)\bTRK-[A-Z0-9]+\b"]),
    }
}

fn default_claims_routing() -> DomainRoutingConfig {
    DomainRoutingConfig {
        activation_code: Some("CLAIM".to_string()),
        keywords: strings(&["claim", "complaint", "broken", "damaged", "refund", "defective"]),
        patterns: Vec::new(),
    }
}

/// Planner used by planning-state flows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlannerMode {
    #[default]
    Rules,
    Llm,
}

/// Flow engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FlowsConfig {
    #[serde(default)]
    pub purchases_planner: PlannerMode,

    /// Upper bound on propose/execute rounds in one turn.
    #[serde(default = "default_max_planner_steps")]
    pub max_planner_steps: usize,

    /// Services offered by the bookings flow.
    #[serde(default = "default_booking_services")]
    pub booking_services: Vec<String>,
}

impl Default for FlowsConfig {
    fn default() -> Self {
        Self {
            purchases_planner: PlannerMode::default(),
            max_planner_steps: default_max_planner_steps(),
            booking_services: default_booking_services(),
        }
    }
}

fn default_max_planner_steps() -> usize {
    4
}

fn default_booking_services() -> Vec<String> {
    strings(&["consultation", "haircut", "repair"])
}

/// An outbound domain hook endpoint.
#[derive(Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HookConfig {
    /// Hook endpoint. `None` disables hook-backed tools.
    #[serde(default)]
    pub url: Option<String>,

    /// HMAC secret for outbound signatures. `None` sends unsigned requests.
    #[serde(default)]
    pub secret: Option<String>,

    #[serde(default = "default_hook_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries after the first attempt, transient failures only.
    #[serde(default = "default_hook_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_hook_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            url: None,
            secret: None,
            timeout_ms: default_hook_timeout_ms(),
            max_retries: default_hook_max_retries(),
            backoff_ms: default_hook_backoff_ms(),
        }
    }
}

impl std::fmt::Debug for HookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookConfig")
            .field("url", &self.url)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_ms", &self.timeout_ms)
            .field("max_retries", &self.max_retries)
            .field("backoff_ms", &self.backoff_ms)
            .finish()
    }
}

fn default_hook_timeout_ms() -> u64 {
    5_000
}

fn default_hook_max_retries() -> u32 {
    2
}

fn default_hook_backoff_ms() -> u64 {
    200
}

/// Outbound domain hooks.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HooksConfig {
    /// Order and shipment lookups.
    #[serde(default)]
    pub purchases: HookConfig,
}

/// OpenAI-compatible LLM and embedding provider configuration.
#[derive(Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// API base URL, e.g. `https://api.openai.com/v1`. `None` disables the provider.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_provider_max_retries")]
    pub max_retries: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            model: default_model(),
            embedding_model: default_embedding_model(),
            timeout_ms: default_provider_timeout_ms(),
            max_retries: default_provider_max_retries(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("embedding_model", &self.embedding_model)
            .field("timeout_ms", &self.timeout_ms)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_provider_timeout_ms() -> u64 {
    15_000
}

fn default_provider_max_retries() -> u32 {
    2
}

/// Async job subsystem configuration.
#[derive(Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct JobsConfig {
    /// Size of the fixed worker pool.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Idle workers re-check the queue at this interval.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_callback_timeout_ms")]
    pub callback_timeout_ms: u64,

    #[serde(default = "default_callback_max_retries")]
    pub callback_max_retries: u32,

    /// Base delay between callback attempts; doubles per attempt.
    #[serde(default = "default_callback_backoff_ms")]
    pub callback_backoff_ms: u64,

    /// Signing secret for callbacks that do not bring their own.
    #[serde(default)]
    pub callback_secret: Option<String>,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            callback_timeout_ms: default_callback_timeout_ms(),
            callback_max_retries: default_callback_max_retries(),
            callback_backoff_ms: default_callback_backoff_ms(),
            callback_secret: None,
        }
    }
}

impl std::fmt::Debug for JobsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobsConfig")
            .field("workers", &self.workers)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("callback_timeout_ms", &self.callback_timeout_ms)
            .field("callback_max_retries", &self.callback_max_retries)
            .field("callback_backoff_ms", &self.callback_backoff_ms)
            .field(
                "callback_secret",
                &self.callback_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

fn default_workers() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_callback_timeout_ms() -> u64 {
    5_000
}

fn default_callback_max_retries() -> u32 {
    3
}

fn default_callback_backoff_ms() -> u64 {
    500
}

/// Inbound channel gateway configuration.
#[derive(Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    /// HMAC secret for inbound verification. `None` accepts unsigned requests.
    #[serde(default)]
    pub secret: Option<String>,

    /// Maximum accepted distance between the signed timestamp and now.
    #[serde(default = "default_max_clock_drift_secs")]
    pub max_clock_drift_secs: u64,

    /// Project this channel's conversations belong to.
    #[serde(default)]
    pub project_id: Option<String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            secret: None,
            max_clock_drift_secs: default_max_clock_drift_secs(),
            project_id: None,
        }
    }
}

impl std::fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("max_clock_drift_secs", &self.max_clock_drift_secs)
            .field("project_id", &self.project_id)
            .finish()
    }
}

fn default_max_clock_drift_secs() -> u64 {
    300
}
