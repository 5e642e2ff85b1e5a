//! Boundary to the generation capabilities of the surrounding agent runtime.
//!
//! The context core never talks to a model API directly. It consumes two
//! capabilities, [`TextGenerator`] and [`StructuredGenerator`], which the
//! agent loop implements on top of whatever client it already owns.
//!
//! # Example
//!
//! ```ignore
//! use workset::provider::{TextGenerator, TextRequest, GenerationError};
//!
//! struct MyClient;
//!
//! #[async_trait::async_trait]
//! impl TextGenerator for MyClient {
//!     async fn generate_text(&self, request: TextRequest) -> Result<String, GenerationError> {
//!         call_my_model(request).await.map_err(|e| GenerationError::Provider(e.to_string()))
//!     }
//! }
//! ```

mod error;
mod generator;
#[cfg(test)]
pub(crate) mod testing;
mod types;

use std::time::Duration;

pub use error::GenerationError;
pub use generator::{StructuredGenerator, StructuredRequest, TextGenerator, TextRequest, with_deadline};
pub use types::*;

/// Default deadline for a single generation call.
pub const GENERATION_TIMEOUT: Duration = Duration::from_secs(30);
