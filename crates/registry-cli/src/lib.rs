//! Library components shared by the registry CLI binary.

pub mod logging;
