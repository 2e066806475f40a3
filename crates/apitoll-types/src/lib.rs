//! Core types for the APIToll payment gateway.
//!
//! This crate holds everything the platform's services must agree on:
//!
//! - [`proto`]: the x402 wire format: 402 challenge bodies, payment
//!   requirements, signed authorizations and receipts.
//! - [`fees`]: the platform fee split, exact in smallest token units.
//! - [`policy`]: buyer-side spend policy rules and their evaluation.
//! - [`address`]: chain-specific wallet address validation.
//! - [`chain`]: supported networks and their CAIP-2 identifiers and USDC
//!   deployments.
//! - [`money`]: human-readable amounts and smallest-unit token amounts.
//! - [`netguard`]: private/loopback IP classification for outbound URL
//!   validation.
//!
//! Everything in this crate is pure: no I/O, no clocks other than explicit
//! timestamp arguments, no global state.

pub mod address;
pub mod chain;
pub mod facilitator;
pub mod fees;
pub mod money;
pub mod netguard;
pub mod policy;
pub mod proto;
pub mod timestamp;
pub mod util;

pub use address::{AddressError, EvmAddress, SolanaAddress, WalletAddress};
pub use chain::{Chain, ChainParseError, UsdcDeployment};
pub use fees::{FeeBreakdown, FeeConfig};
pub use money::{MoneyAmount, MoneyAmountParseError, TokenAmount};
pub use policy::{
    ActivePolicy, DenyReason, PolicyDecision, PolicyScope, PolicyRule, ProposedPayment,
    SpendSnapshot,
};
pub use timestamp::UnixTimestamp;
