//! Portable scaled dot-product attention.
//!
//! The reference kernel favours clarity over speed and is what
//! [`MultiHeadAttention`](crate::multihead::MultiHeadAttention) runs per head.

pub mod exact;

pub use exact::ExactAttention;
