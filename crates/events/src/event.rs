use serde::Serialize;
use serde::de::DeserializeOwned;

/// A domain event that can travel over a message channel.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - identified on the wire by a **discriminator**, a stable logical name
///   agreed between producers and consumers (e.g. `"CartItemAdded"`)
///
/// The discriminator is declared explicitly and must never be derived from
/// the Rust type path, so types can be renamed or moved without breaking
/// consumers.
pub trait Event: Serialize + DeserializeOwned + Clone + core::fmt::Debug + Send + Sync + 'static {
    const DISCRIMINATOR: &'static str;
}
