//! Client for the M-Pesa (Daraja) API: cached OAuth tokens, encrypted security
//! credentials, bearer-signed requests with uniform error classification, and
//! decoding of the callbacks M-Pesa posts back.

pub mod mpesa;
pub mod settings;
pub mod webhook_server;

pub use mpesa::errors::MpesaError;
pub use mpesa::{Environment, ErrorKind, MpesaClient, MpesaClientBuilder};
