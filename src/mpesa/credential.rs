// Security credential generation: RSA PKCS#1 v1.5 encryption of the initiator password
// with the provider's public-key certificate.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use openssl::pkey::Public;
use openssl::rsa::{Padding, Rsa};
use openssl::x509::X509;
use tracing::{debug, warn};

use crate::mpesa::certs;
use crate::mpesa::errors::{CredentialError, MpesaError};
use crate::mpesa::Environment;

/// Encrypts `initiator_password` with the certificate embedded for `env`.
pub fn encrypt_security_credential(
    initiator_password: &str,
    env: Environment,
) -> Result<String, MpesaError> {
    match encrypt_with_certificate(certs::certificate(env), initiator_password) {
        Err(MpesaError::Credential(CredentialError::MissingCertificate)) => {
            warn!(target: "mpesa", environment = env.as_str(), "no embedded certificate");
            Err(CredentialError::NotEmbedded(env.as_str()).into())
        }
        other => other,
    }
}

/// Encrypts `initiator_password` into the base64 `SecurityCredential` field using the
/// RSA key of `bundle` (a PEM or DER X.509 certificate).
///
/// The padding is randomized, so two calls with the same input produce different
/// ciphertexts that decrypt to the same password.
pub fn encrypt_with_certificate(
    bundle: &[u8],
    initiator_password: &str,
) -> Result<String, MpesaError> {
    if initiator_password.is_empty() {
        return Err(MpesaError::InvalidInitiatorPassword);
    }

    let rsa = rsa_public_key(bundle)?;
    let mut ciphertext = vec![0u8; rsa.size() as usize];
    let len = rsa
        .public_encrypt(initiator_password.as_bytes(), &mut ciphertext, Padding::PKCS1)
        .map_err(|e| CredentialError::Encryption(e.to_string()))?;
    ciphertext.truncate(len);

    debug!(target: "mpesa", "generated security credential");
    Ok(STANDARD.encode(ciphertext))
}

/// Parses `bundle` and extracts its RSA public key.
pub fn rsa_public_key(bundle: &[u8]) -> Result<Rsa<Public>, CredentialError> {
    if bundle.iter().all(u8::is_ascii_whitespace) {
        return Err(CredentialError::MissingCertificate);
    }

    let cert = X509::from_pem(bundle)
        .or_else(|_| X509::from_der(bundle))
        .map_err(|e| CredentialError::CorruptCertificate(e.to_string()))?;
    let public_key = cert
        .public_key()
        .map_err(|e| CredentialError::CorruptCertificate(e.to_string()))?;
    public_key.rsa().map_err(|_| CredentialError::NonRsaKey)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpesa::errors::ErrorKind;

    const RSA_CERT: &[u8] = include_bytes!("../../tests/fixtures/rsa_a.cer");
    const EC_CERT: &[u8] = include_bytes!("../../tests/fixtures/ec.cer");

    #[test]
    fn test_credential_is_base64_and_randomized() {
        let first = encrypt_with_certificate(RSA_CERT, "secret").unwrap();
        let second = encrypt_with_certificate(RSA_CERT, "secret").unwrap();

        assert!(!first.is_empty());
        let raw = STANDARD.decode(&first).unwrap();
        assert_eq!(raw.len(), 256);
        assert_ne!(first, second);
    }

    #[test]
    fn test_credential_accepts_der() {
        let der = X509::from_pem(RSA_CERT).unwrap().to_der().unwrap();
        assert!(encrypt_with_certificate(&der, "secret").is_ok());
    }

    #[test]
    fn test_credential_empty_password() {
        let err = encrypt_with_certificate(RSA_CERT, "").unwrap_err();
        assert!(matches!(err, MpesaError::InvalidInitiatorPassword));

        let err = encrypt_security_credential("", Environment::Production).unwrap_err();
        assert!(matches!(err, MpesaError::InvalidInitiatorPassword));
    }

    #[test]
    fn test_unusable_certificates_are_configuration_errors() {
        let err = encrypt_with_certificate(b"definitely not a certificate", "secret").unwrap_err();
        assert!(matches!(err, MpesaError::Credential(CredentialError::CorruptCertificate(_))));
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = encrypt_with_certificate(EC_CERT, "secret").unwrap_err();
        assert!(matches!(err, MpesaError::Credential(CredentialError::NonRsaKey)));
        assert_eq!(err.kind(), ErrorKind::Configuration);

        for empty in [&b""[..], &b" \n"[..]] {
            let err = encrypt_with_certificate(empty, "secret").unwrap_err();
            assert!(matches!(err, MpesaError::Credential(CredentialError::MissingCertificate)));
            assert_eq!(err.kind(), ErrorKind::Configuration);
        }
    }

    #[test]
    fn test_embedded_certificates_are_absent_or_usable() {
        for env in [Environment::Sandbox, Environment::Production] {
            match encrypt_security_credential("secret", env) {
                Ok(credential) => assert!(!credential.is_empty()),
                Err(MpesaError::Credential(CredentialError::NotEmbedded(name))) => {
                    assert_eq!(name, env.as_str())
                }
                Err(e) => panic!("embedded {env} certificate is unusable: {e}"),
            }
        }
    }
}
