//! aioclient - asynchronous HTTP/1.1 and WebSocket client
//!
//! This crate provides a callback-driven HTTP/1.1 client, plain or over
//! TLS, that runs on a single-threaded `poll(2)` reactor and can upgrade
//! its connection to the WebSocket protocol. Independent actors sharing the
//! reactor stop it through a [`shutdown::ShutdownCoordinator`] once the
//! last of them is done.

pub mod config;
pub mod http;
pub mod reactor;
pub mod reader;
pub mod shutdown;
