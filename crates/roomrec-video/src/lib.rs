//! Video platform REST client.
//!
//! This crate provides:
//! - The `SessionProvider` seam used to validate rooms and steer the recorder identity
//! - A Twilio Video REST implementation (basic auth, paging, metrics)
//! - Access token minting for the capture surface

pub mod client;
pub mod error;
pub mod metrics;
pub mod provider;
pub mod token;


pub use client::{VideoApiClient, VideoApiConfig};
pub use error::{VideoError, VideoResult};
pub use provider::SessionProvider;
pub use token::{AccessTokenClaims, AccessTokenSigner};
