//! Structured output validation and recovery.
//!
//! Model replies that were asked to follow a schema are not always clean JSON:
//! they arrive wrapped in code fences, followed by prose, or with the identity
//! lock directive echoed into a field. [`recover_structured`] turns such text
//! into a value that passes the schema, or gives up.
//!
//! # Usage
//!
//! ```ignore
//! use troupe_llm::validation::{SchemaValidator, recover_structured};
//!
//! let validator = SchemaValidator::compile(&schema)?;
//! match recover_structured(&reply_text, &validator) {
//!     Some(value) => handle(value),
//!     None => tracing::warn!("model reply did not match schema"),
//! }
//! ```

mod recover;
mod schema;

pub use recover::{recover_structured, scrub_identity_artifacts, strip_code_fences};
pub use schema::{SchemaError, SchemaValidator, ValidationError, ValidationResult};
