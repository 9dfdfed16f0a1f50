//! Model backend adapters for cogito.
//!
//! All adapters implement the `cogito_core::Provider` trait; the loop
//! never sees a wire format.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
