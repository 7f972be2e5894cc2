//! Policy reconciliation and FUP enforcement for a fleet of NAS routers.
//!
//! This crate owns the engine between the policy store and the routers:
//!
//! - **[`Engine`]**: Produced surface. Reconciles traffic classes and
//!   service bindings, applies bandwidth rules, resets and accounts
//!   subscriber usage. Every call plans synchronously and queues device
//!   work; none waits on a router.
//!
//! - **[`Dispatcher`]**: One bounded queue and worker per device. Jobs for
//!   a device run in order with retry and backoff; a full queue drops
//!   new jobs instead of blocking the caller.
//!
//! - **Planners** ([`sync`]): Pure diffs from (desired, previous) policy
//!   to ordered [`PlannedOp`]s, removals first.
//!
//! - **[`FallbackChain`]**: Ordered live-rate strategies (RADIUS CoA, then
//!   the management API) tried until one applies.
//!
//! - **[`BandwidthScheduler`]**: Interval-driven rule evaluation that
//!   re-applies only the scopes whose rate changed.
//!
//! - **[`PolicyStore`]**: Narrow boundary to the external policy store,
//!   with [`MemoryStore`] as the in-process implementation.

pub mod bandwidth;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod fup;
pub mod keyset;
pub mod model;
pub mod store;
pub mod sync;
pub mod usage;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bandwidth::scheduler::{BandwidthScheduler, TickReport};
pub use bandwidth::{Evaluation, RuleFilter, Scope};
pub use client::{CoaClient, DeviceClient, DeviceConnector, RouterConnector};
pub use config::{CoaSettings, DispatchConfig, EngineConfig};
pub use dispatch::{DeviceOp, DispatchStats, Dispatcher, PlannedOp};
pub use engine::{Engine, ResetReport};
pub use error::CoreError;
pub use fup::{Attempt, ChainOutcome, FallbackChain, RateStrategy, RateTarget};
pub use store::{MemoryStore, PolicySnapshot, PolicyStore, PushKey, PushLedger};
pub use sync::ReconcileOutcome;
pub use usage::UsageReport;

pub use model::{
    BandwidthRule, BindingId, CdnBandwidthRule, DaySet, Device, DeviceId, FupTier, Multiplier,
    Rate, ResetKind, RuleId, Service, ServiceId, ServiceTrafficBinding, Subscriber, SubscriberId,
    TimeWindow, TrafficClass, TrafficClassId, Trigger,
};
