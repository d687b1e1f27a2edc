//! Client-side services built on top of the transports.

pub mod client;
