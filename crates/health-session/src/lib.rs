//! health-session — keeps an authenticated client session alive
//!
//! All outbound calls go through [`SessionClient`], which is transparent on
//! success. On a 401 it refreshes the session once (shared by every request
//! that failed in the same burst), replays the request once, and sends the
//! application to sign-in if the refresh itself fails.
//!
//! # Module layout
//! - `transport` — request/response types and the `Transport` trait
//! - `http`      — reqwest transport with a cookie jar
//! - `client`    — `SessionClient` and the single-flight refresh protocol
//! - `redirect`  — the sign-in side effect
//! - `config`    — client configuration
//! - `error`     — unified error type

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod redirect;
pub mod transport;

pub use client::SessionClient;
pub use config::ClientConfig;
pub use error::ClientError;
pub use http::HttpTransport;
pub use redirect::{LogRedirect, SignInRedirect};
pub use transport::{ApiRequest, ApiResponse, Transport};

pub use reqwest::{Method, StatusCode};
