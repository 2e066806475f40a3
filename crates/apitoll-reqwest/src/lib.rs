//! Buyer-side agent wallet.
//!
//! [`AgentWallet`] drives a paid call end to end: it issues the bare
//! request, parses the 402 challenge, runs the spend policies, signs an
//! ERC-3009 authorization for the exact amount, submits it to the
//! facilitator with a deterministic idempotency key, polls until the
//! payment is terminal and finally replays the original request through
//! `POST /forward/{id}`.
//!
//! A policy deny aborts *before* any facilitator I/O. Cancellation stops
//! polling but never an already-submitted on-chain transfer; orphaned
//! payment ids are handed to the [`SpendLedger`] for reconciliation.

pub mod client;
pub mod ledger;
pub mod signing;
pub mod wallet;

pub use client::{FacilitatorApi, FacilitatorApiError};
pub use ledger::{MemoryLedger, SpendLedger};
pub use signing::AuthorizationSigner;
pub use wallet::{AgentWallet, OutboundRequest, PaidResponse, WalletError, derive_idempotency_key};
