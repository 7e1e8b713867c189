//! Pay-per-request HTTP API gateway: x402 micropayments, AP2 mandates, and proxying in
//! front of upstream REST APIs.
//!
//! # Modules
//!
//! - [`route_table`] — route compilation and matching (spec `§4.1`).
//! - [`replay_store`] — idempotency-key replay suppression (spec `§4.2`).
//! - [`spend_tracker`] — per-mandate daily/lifetime spend accounting (spec `§4.3`).
//! - [`mandate`] — AP2 mandate verification (spec `§4.4`).
//! - [`payment`] — facilitator client and payment coordinator (spec `§4.5`).
//! - [`proxy`] — upstream header hygiene and forwarding (spec `§4.6`).
//! - [`receipt`] — receipt construction and in-memory store (spec `§4.7`).
//! - [`pipeline`] — fixed-order admission pipeline controller (spec `§4.8`).
//! - [`admission`] — SSRF guard, x402-upstream probe, blocklist, API-key check (spec `§4.9`).
//! - [`config`] — environment-driven bootstrap (spec `§4.10`).
//! - [`handlers`], [`admin`] — HTTP surface (spec `§6.1`).

pub mod admin;
pub mod admission;
pub mod config;
pub mod error;
pub mod handlers;
pub mod mandate;
pub mod network;
pub mod payment;
pub mod pipeline;
pub mod proxy;
pub mod receipt;
pub mod replay_store;
pub mod route_table;
pub mod sig_down;
pub mod spend_tracker;
pub mod telemetry;
pub mod types;
