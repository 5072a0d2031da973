//! HMAC-SHA256 signature generation and constant-time validation for inbound
//! webhook bodies.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use webhook_common::error::SecurityError;

type HmacSha256 = Hmac<Sha256>;

/// Compute the lowercase hex HMAC-SHA256 digest of `body` under `secret`.
pub fn generate(body: &[u8], secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts key of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Validate that `supplied` (the raw `X-Signature` header value, if present) matches
/// the HMAC-SHA256 digest of `body` under `secret`.
///
/// Comparison is constant-time in the digest bytes to avoid leaking timing
/// information about how many leading bytes matched.
pub fn validate(
    body: &[u8],
    supplied: Option<&str>,
    secret: &str,
) -> Result<(), SecurityError> {
    let supplied = supplied.ok_or(SecurityError::MissingSignature)?;

    let expected = generate(body, secret);

    let supplied_bytes = supplied.as_bytes();
    let expected_bytes = expected.as_bytes();

    let matches = supplied_bytes.len() == expected_bytes.len()
        && supplied_bytes.ct_eq(expected_bytes).into();

    if matches {
        Ok(())
    } else {
        Err(SecurityError::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trips() {
        let body = b"{\"order_id\":1}";
        let secret = "top-secret";
        let sig = generate(body, secret);
        assert!(validate(body, Some(&sig), secret).is_ok());
    }

    #[test]
    fn missing_header_is_rejected() {
        let err = validate(b"{}", None, "secret").unwrap_err();
        assert!(matches!(err, SecurityError::MissingSignature));
    }

    #[test]
    fn wrong_signature_is_rejected() {
        let body = b"{}";
        let err = validate(body, Some("0000"), "secret").unwrap_err();
        assert!(matches!(err, SecurityError::InvalidSignature));
    }

    proptest! {
        #[test]
        fn any_mutation_of_body_breaks_validation(
            body in ".{0,64}",
            secret in ".{1,32}",
            extra_byte in any::<u8>(),
        ) {
            let body_bytes = body.as_bytes();
            let sig = generate(body_bytes, &secret);

            let mut mutated = body_bytes.to_vec();
            mutated.push(extra_byte);

            prop_assert!(validate(&mutated, Some(&sig), &secret).is_err());
        }

        #[test]
        fn any_mutation_of_secret_breaks_validation(
            body in ".{0,64}",
            secret in ".{1,32}",
            suffix in ".{1,8}",
        ) {
            let body_bytes = body.as_bytes();
            let sig = generate(body_bytes, &secret);
            let mutated_secret = format!("{secret}{suffix}");

            prop_assert!(validate(body_bytes, Some(&sig), &mutated_secret).is_err());
        }
    }
}
