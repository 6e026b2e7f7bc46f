// Provider public-key certificates used to encrypt initiator passwords, one per environment.
// Embedded at build time from `certs/` under the package root. A build without them
// still works when a certificate is supplied through `MpesaClientBuilder::certificate`.

use crate::mpesa::Environment;

const SANDBOX_CERT: &[u8] = include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/certs/sandbox.cer"));
const PRODUCTION_CERT: &[u8] =
    include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/certs/production.cer"));

/// Raw certificate bundle (PEM or DER) for the given environment. Empty when the
/// build carries no certificate for it.
pub fn certificate(env: Environment) -> &'static [u8] {
    match env {
        Environment::Sandbox => SANDBOX_CERT,
        Environment::Production => PRODUCTION_CERT,
    }
}
