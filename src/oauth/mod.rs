// SPDX-License-Identifier: MIT OR Apache-2.0

//! OAuth token vault (C5): encrypted storage, refresh, and revocation of
//! third-party credentials.

pub mod provider_client;
pub mod vault;

pub use provider_client::{OAuthProviderClient, TokenBundle};
pub use vault::OAuthVault;
