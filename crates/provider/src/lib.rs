//! Transform provider integration.
//!
//! The dispatcher depends only on the [`TransformProvider`] trait. The
//! [`http`] module adapts a remote image-generation service speaking plain
//! HTTP/multipart to that trait.

pub mod http;
pub mod provider;

pub use http::{HttpTransformProvider, ProviderConfig};
pub use provider::{ProviderFailure, TransformProvider};
