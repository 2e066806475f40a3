//! The APIToll facilitator.
//!
//! A standalone HTTP service that moves money for the 402 handshake:
//!
//! - `POST /pay`: accept a signed authorization plus the captured original
//!   request, persist an idempotent payment record, and execute the USDC
//!   transfer asynchronously.
//! - `GET /pay/{id}`: current state of a payment.
//! - `POST /forward/{id}`: replay the original request to the origin once
//!   the payment completed, receipt attached.
//! - `POST /verify`: verify-only inspection of an authorization against a
//!   requirement; never submits.
//!
//! Payment state transitions are monotonic
//! (`pending → processing → completed | failed`) and every transition is a
//! compare-and-set inside one store mutation. At startup the service
//! reloads unfinished payments and resumes them.

pub mod config;
pub mod guard;
pub mod handlers;
pub mod ledger;
pub mod run;
pub mod state;
pub mod transfer;
pub mod verify;
pub mod worker;
