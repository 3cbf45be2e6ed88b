//! Chat completion backends for wardclaw.
//!
//! All backends implement the `wardclaw_core::Provider` trait. The router
//! builds the configured set and selects one by name; every backend is
//! wrapped in retry handling for transient failures.

pub mod anthropic;
pub mod openai_compat;
pub mod process;
pub mod retry;
pub mod router;

pub use anthropic::AnthropicProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use process::ProcessProvider;
pub use retry::{RetryPolicy, RetryingProvider};
pub use router::{build_from_config, ProviderRouter};
