//! # warden-validate
//!
//! Boundary validation for action requests arriving as raw JSON.
//!
//! [`RequestValidator`] checks a document against the request JSON Schema,
//! then against the field rules every `ActionRequest` must meet, then against
//! any per-tool payload schema the host registered. Failures come back as a
//! [`ValidationReport`] listing all of them, or folded into
//! `WardenError::RequestInvalid` by [`RequestValidator::parse`].
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use warden_validate::RequestValidator;
//!
//! let mut validator = RequestValidator::new()?;
//! validator.register_tool_schema("Edit", &json!({
//!     "type": "object",
//!     "required": ["file_path", "old_string", "new_string"]
//! }))?;
//! let request = validator.parse_str(&body)?;
//! let receipt = kernel.decide(&request)?;
//! ```

pub mod schema;
pub mod validator;

pub use schema::{request_schema, REQUEST_SCHEMA_RULE};
pub use validator::{RequestValidator, ValidationFailure, ValidationReport};
