use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::ssl::SslRef;
use openssl::x509::{X509Ref, X509VerifyResult, X509};

use crate::error::Result;

/// The peer's X.509 certificate as captured after the handshake.
#[derive(Debug, Clone)]
pub struct PeerCertificate {
    x509: X509,
}

impl PeerCertificate {
    pub(crate) fn new(x509: X509) -> PeerCertificate {
        PeerCertificate { x509 }
    }

    /// Subject Common Name, if the DN carries one.
    pub fn common_name(&self) -> Option<String> {
        self.x509
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .and_then(|entry| entry.data().as_utf8().ok())
            .map(|cn| cn.to_string())
    }

    /// SHA-256 over the DER encoding, rendered as lowercase hex pairs
    /// separated by colons. This is the value a TOFU store keys on.
    pub fn fingerprint(&self) -> Result<String> {
        let digest = self.x509.digest(MessageDigest::sha256())?;
        let hex = hex::encode(&digest);
        let mut out = String::with_capacity(hex.len() + hex.len() / 2);
        for (i, ch) in hex.chars().enumerate() {
            if i > 0 && i % 2 == 0 {
                out.push(':');
            }
            out.push(ch);
        }
        Ok(out)
    }

    /// Human-readable dump of the whole certificate.
    pub fn to_text(&self) -> Result<String> {
        let text = self.x509.to_text()?;
        Ok(String::from_utf8_lossy(&text).into_owned())
    }

    pub fn as_x509(&self) -> &X509Ref {
        &self.x509
    }
}

/// Outcome of certificate chain verification for one session.
///
/// The raw openssl verify result is preserved; 0 means the full chain
/// validated against the trust store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    result: X509VerifyResult,
}

impl Verification {
    pub(crate) fn new(result: X509VerifyResult) -> Verification {
        Verification { result }
    }

    /// Chain validation succeeded with no defect recorded.
    pub fn is_ok(self) -> bool {
        self.result == X509VerifyResult::OK
    }

    /// The only recorded defect is that the peer vouched for itself.
    pub fn is_self_signed(self) -> bool {
        matches!(
            self.result.as_raw(),
            openssl_sys::X509_V_ERR_DEPTH_ZERO_SELF_SIGNED_CERT
                | openssl_sys::X509_V_ERR_SELF_SIGNED_CERT_IN_CHAIN
        )
    }

    /// The numeric verify result, 0 when clean.
    pub fn raw(self) -> i32 {
        self.result.as_raw()
    }

    pub fn message(self) -> &'static str {
        self.result.error_string()
    }
}

/// What the handshake established about the peer: an optional certificate
/// plus the verification verdict, with the trust-on-first-use predicates
/// derived from both.
#[derive(Debug, Clone)]
pub struct Peer {
    certificate: Option<PeerCertificate>,
    verification: Verification,
}

impl Peer {
    pub(crate) fn from_ssl(ssl: &SslRef) -> Peer {
        Peer {
            certificate: ssl.peer_certificate().map(PeerCertificate::new),
            verification: Verification::new(ssl.verify_result()),
        }
    }

    #[cfg(test)]
    pub(crate) fn new(certificate: Option<PeerCertificate>, verification: Verification) -> Peer {
        Peer {
            certificate,
            verification,
        }
    }

    pub fn has_certificate(&self) -> bool {
        self.certificate.is_some()
    }

    /// A certificate was presented and the full chain validated.
    pub fn is_verified(&self) -> bool {
        self.certificate.is_some() && self.verification.is_ok()
    }

    /// A certificate was presented and its only defect is being
    /// self-signed; the usual state of a Gemini server under TOFU.
    pub fn is_self_signed(&self) -> bool {
        self.certificate.is_some() && self.verification.is_self_signed()
    }

    pub fn certificate(&self) -> Option<&PeerCertificate> {
        self.certificate.as_ref()
    }

    pub fn verification(&self) -> Verification {
        self.verification
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::asn1::Asn1Time;
    use openssl::bn::{BigNum, MsbOption};
    use openssl::ec::{EcGroup, EcKey};
    use openssl::pkey::PKey;
    use openssl::x509::{X509Builder, X509NameBuilder};

    fn self_signed(cn: &str) -> X509 {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();

        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
        let name = name.build();

        let mut serial = BigNum::new().unwrap();
        serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder
            .set_serial_number(&serial.to_asn1_integer().unwrap())
            .unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(30).unwrap())
            .unwrap();
        builder.set_pubkey(&key).unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        builder.build()
    }

    #[test]
    fn common_name_is_extracted() {
        let cert = PeerCertificate::new(self_signed("gem.example"));
        assert_eq!(cert.common_name().as_deref(), Some("gem.example"));
    }

    #[test]
    fn fingerprint_shape() {
        let cert = PeerCertificate::new(self_signed("gem.example"));
        let fp = cert.fingerprint().unwrap();
        // 32 bytes as hex pairs joined by colons.
        assert_eq!(fp.len(), 32 * 2 + 31);
        assert_eq!(fp.matches(':').count(), 31);
        assert!(fp
            .chars()
            .all(|c| c == ':' || c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn fingerprint_is_stable() {
        let x509 = self_signed("gem.example");
        let a = PeerCertificate::new(x509.clone()).fingerprint().unwrap();
        let b = PeerCertificate::new(x509).fingerprint().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn text_dump_mentions_subject() {
        let cert = PeerCertificate::new(self_signed("gem.example"));
        assert!(cert.to_text().unwrap().contains("gem.example"));
    }

    #[test]
    fn predicates_without_certificate() {
        let peer = Peer::new(None, Verification::new(X509VerifyResult::OK));
        assert!(!peer.has_certificate());
        assert!(!peer.is_verified());
        assert!(!peer.is_self_signed());
    }

    #[test]
    fn predicates_with_self_signed() {
        let verification = Verification::new(unsafe {
            X509VerifyResult::from_raw(openssl_sys::X509_V_ERR_DEPTH_ZERO_SELF_SIGNED_CERT)
        });
        let peer = Peer::new(
            Some(PeerCertificate::new(self_signed("gem.example"))),
            verification,
        );
        assert!(peer.has_certificate());
        assert!(!peer.is_verified());
        assert!(peer.is_self_signed());
    }

    #[test]
    fn verified_and_self_signed_are_exclusive() {
        let ok = Verification::new(X509VerifyResult::OK);
        assert!(ok.is_ok() && !ok.is_self_signed());
        let ss = Verification::new(unsafe {
            X509VerifyResult::from_raw(openssl_sys::X509_V_ERR_SELF_SIGNED_CERT_IN_CHAIN)
        });
        assert!(!ss.is_ok() && ss.is_self_signed());
    }
}
