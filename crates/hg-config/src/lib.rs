//! hg-config
//!
//! Layered YAML configuration: merge, secret-literal guard, canonical hash,
//! unused-key report, and typed extraction of the verifier settings.
//!
//! # Invariants
//!
//! - Later layers win. Mappings merge key by key; sequences and scalars are
//!   replaced wholesale.
//! - The hash is SHA-256 over the canonical (key-sorted, compact) JSON of the
//!   merged tree, so formatting and key order in the YAML never change it.
//! - A leaf that looks like a credential aborts loading; files carry env var
//!   names only.

mod guard;
mod layered;
pub mod secrets;
mod verifier;

pub use guard::{report_unused_keys, UnusedKeyPolicy, UnusedKeyReport};
pub use layered::{load_layered_yaml, load_layered_yaml_from_strings, LoadedConfig};
pub use verifier::{DirectorySettings, VerifierConfig};
