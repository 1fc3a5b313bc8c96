//! wattline — UPS/PDU fleet telemetry agent with persistent energy accounting
//!
//! This crate polls a fleet of power-protection devices through a vendor
//! data source at a fixed cadence, converts each poll into structured
//! per-device telemetry, and maintains a running cumulative watt-hour total
//! per device that survives process restarts.
//!
//! ## Modules
//!
//! * `config` — Configuration structures, loading, validation, and defaults.
//!   Supports TOML configuration files with validation via the `validator` crate.
//!
//! * `core` — Core runtime components:
//!   - Energy accounting engine (sample-to-watt-hour integration)
//!   - Collection coordinator (per-device fan-out with failure isolation)
//!   - Scheduler (recurring cycles, at most one in flight)
//!   - Result publisher abstraction
//!
//! * `source` — The device snapshot source boundary. Vendor session
//!   management and wire parsing live behind the `DeviceSource` trait;
//!   a deterministic simulated fleet is provided for local operation.
//!
//! * `store` — The persistent state store boundary. Per-device
//!   last-sample records live behind the `StateStore` trait, with
//!   in-memory and JSON-file-backed implementations.
//!
//! * `logger` — Centralized logging initialization using `tracing`.
//!   Supports console output in multiple formats (compact, pretty, JSON)
//!   and optional systemd journald integration.

pub mod config;
pub mod core;
pub mod logger;
pub mod source;
pub mod store;
