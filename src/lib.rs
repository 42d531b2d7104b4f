// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Gig Gossip Node - relay-based marketplace matching engine
//!
//! A node broadcasts signed topics (for example ride requests) over a set of
//! independent, untrusted pub/sub relays, relays other nodes' topics when it
//! can afford to, and collects certified, encrypted replies. Trust comes from
//! certificates issued by an external settler; relay work is paid through
//! hash-locked invoices from an external wallet.
//!
//! ## Modules
//!
//! - `node` - Gossip protocol state machine and event loop
//! - `index` - Relay/message association index
//! - `frame` - Signed frames and their positional wire codec
//! - `crypto` - Keys, signing, encryption, mnemonics, timed tokens
//! - `certificate` - Settler certificates and their validation
//! - `payment` - Hash-locked relay payments
//! - `transport` - Per-relay connection workers
//! - `settler` / `wallet` - External service clients
//! - `topic` - Topic kinds and acceptance policies

pub mod certificate;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod frame;
pub mod index;
pub mod logging;
pub mod node;
pub mod payment;
mod service;
pub mod settler;
pub mod topic;
pub mod transport;
pub mod wallet;
