//! Runtime helpers

pub mod logging;
