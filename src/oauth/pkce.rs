//! PKCE (RFC 7636) challenge verification

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// The only challenge method this server accepts
pub const S256: &str = "S256";

/// Compute the S256 challenge for a verifier: `BASE64URL(SHA256(verifier))`
#[must_use]
pub fn s256_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Why a PKCE check failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkceFailure {
    /// The code was issued with a challenge but no verifier was sent
    MissingVerifier,
    /// Method other than S256 (including `plain`)
    UnsupportedMethod,
    /// Verifier does not hash to the challenge
    Mismatch,
}

impl PkceFailure {
    /// Description returned to the client
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::MissingVerifier => "code_verifier is required",
            Self::UnsupportedMethod => "unsupported code_challenge_method",
            Self::Mismatch => "code_verifier does not match code_challenge",
        }
    }
}

/// Check a verifier against the challenge recorded at `/authorize`.
///
/// An empty challenge means the client did not use PKCE and anything passes.
/// A missing method is treated as S256 (clients that send a challenge without
/// a method are asking for the only method we advertise).
pub fn verify(
    challenge: &str,
    method: Option<&str>,
    verifier: Option<&str>,
) -> Result<(), PkceFailure> {
    if challenge.is_empty() {
        return Ok(());
    }
    let Some(verifier) = verifier.filter(|v| !v.is_empty()) else {
        return Err(PkceFailure::MissingVerifier);
    };
    if method.is_some_and(|m| m != S256) {
        return Err(PkceFailure::UnsupportedMethod);
    }

    let computed = s256_challenge(verifier);
    if computed.as_bytes().ct_eq(challenge.as_bytes()).into() {
        Ok(())
    } else {
        Err(PkceFailure::Mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7636 Appendix B
    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn rfc7636_appendix_b_vector() {
        assert_eq!(s256_challenge(VERIFIER), CHALLENGE);
    }

    #[test]
    fn verify_accepts_matching_verifier() {
        assert_eq!(verify(CHALLENGE, Some("S256"), Some(VERIFIER)), Ok(()));
        assert_eq!(verify(CHALLENGE, None, Some(VERIFIER)), Ok(()));
    }

    #[test]
    fn verify_rejects_other_verifier() {
        assert_eq!(
            verify(CHALLENGE, Some("S256"), Some("not-the-verifier")),
            Err(PkceFailure::Mismatch)
        );
    }

    #[test]
    fn verify_requires_verifier_when_challenged() {
        assert_eq!(
            verify(CHALLENGE, Some("S256"), None),
            Err(PkceFailure::MissingVerifier)
        );
        assert_eq!(
            verify(CHALLENGE, Some("S256"), Some("")),
            Err(PkceFailure::MissingVerifier)
        );
    }

    #[test]
    fn verify_rejects_plain_method() {
        // Even when the verifier equals the challenge verbatim
        assert_eq!(
            verify(CHALLENGE, Some("plain"), Some(CHALLENGE)),
            Err(PkceFailure::UnsupportedMethod)
        );
    }

    #[test]
    fn verify_without_challenge_passes() {
        assert_eq!(verify("", None, None), Ok(()));
        assert_eq!(verify("", None, Some("anything")), Ok(()));
    }
}
