//! Route modules for the litreview API server.

pub mod health;
pub mod research;
pub mod stream;
