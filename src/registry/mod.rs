//! Reference-counted provider cache.
//!
//! The registry is the single owner of all providers. A consumer obtains a provider
//! with [`CredentialProviderRegistry::find_or_create`] and gives it back with
//! [`CredentialProviderRegistry::release`]; the provider is shut down the moment its
//! count reaches zero. Most consumers should use a
//! [`ProviderHandle`](crate::ProviderHandle), which pairs the two calls for them.

mod builder;
mod cache;

#[cfg(test)]
mod tests;

pub use builder::{RegistryBuilder, DEFAULT_INITIAL_FETCH_TIMEOUT};
pub use cache::{CredentialProviderRegistry, ProviderOf};
