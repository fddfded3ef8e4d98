use std::fmt;
use std::net::IpAddr;

use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::{Error, Result};

/// Port used when the URL does not carry one.
pub const DEFAULT_PORT: u16 = 1965;

/// A parsed Gemini URL.
///
/// Wraps [`url::Url`] and layers the Gemini rules on top: the `gemini`
/// scheme, the 1965 default port, and the bracket handling that separates
/// the URL form of an IPv6 host from what the socket layer consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiUrl {
    inner: Url,
}

impl GeminiUrl {
    /// Parse an absolute URL. The scheme is not restricted here so that
    /// redirect targets can be inspected before being rejected.
    pub fn parse(input: &str) -> Result<GeminiUrl> {
        let inner = Url::parse(input)
            .map_err(|e| Error::InvalidUrl(format!("{}: {}", input, e)))?;
        Ok(GeminiUrl { inner })
    }

    /// True iff the scheme is `gemini` and a host is present.
    pub fn is_gemini(&self) -> bool {
        self.inner.scheme() == "gemini" && self.inner.host_str().is_some_and(|h| !h.is_empty())
    }

    /// Fail unless this URL can be the subject of a Gemini transaction.
    pub fn expect_gemini(&self) -> Result<()> {
        if self.inner.scheme() != "gemini" {
            return Err(Error::UnsupportedScheme(self.inner.scheme().to_string()));
        }
        match self.inner.host_str() {
            Some(h) if !h.is_empty() => Ok(()),
            _ => Err(Error::InvalidUrl(format!("{}: missing host", self.inner))),
        }
    }

    /// Resolve `target` against this URL. An absolute target replaces the
    /// base wholesale; a relative one inherits scheme, userinfo, host and
    /// port, resolves its path against the base path up to the last `/`,
    /// and replaces query and fragment.
    pub fn combine(&self, target: &str) -> Result<GeminiUrl> {
        let inner = self
            .inner
            .join(target)
            .map_err(|e| Error::InvalidUrl(format!("{}: {}", target, e)))?;
        Ok(GeminiUrl { inner })
    }

    pub fn scheme(&self) -> &str {
        self.inner.scheme()
    }

    /// Host exactly as it appears in the URL; IPv6 literals keep their
    /// brackets.
    pub fn host(&self) -> &str {
        self.inner.host_str().unwrap_or("")
    }

    /// Host with IPv6 brackets stripped, suitable for the socket layer.
    pub fn raw_host(&self) -> &str {
        self.host().trim_start_matches('[').trim_end_matches(']')
    }

    /// The hostname to put in SNI: DNS names only, never IP literals.
    pub(crate) fn sni_hostname(&self) -> Option<&str> {
        let raw = self.raw_host();
        if raw.is_empty() || raw.parse::<IpAddr>().is_ok() {
            None
        } else {
            Some(raw)
        }
    }

    pub fn userinfo(&self) -> Option<&str> {
        let user = self.inner.username();
        if user.is_empty() {
            None
        } else {
            Some(user)
        }
    }

    pub fn port(&self) -> Option<u16> {
        self.inner.port()
    }

    pub fn effective_port(&self) -> u16 {
        self.inner.port().unwrap_or(DEFAULT_PORT)
    }

    /// Path in its raw, still percent-encoded form, as it re-emits on the
    /// wire.
    pub fn path(&self) -> &str {
        self.inner.path()
    }

    /// Percent-decoded path for filesystem use.
    pub fn decoded_path(&self) -> String {
        percent_decode_str(self.inner.path())
            .decode_utf8_lossy()
            .into_owned()
    }

    pub fn query(&self) -> Option<&str> {
        self.inner.query()
    }

    pub fn fragment(&self) -> Option<&str> {
        self.inner.fragment()
    }

    pub fn as_str(&self) -> &str {
        self.inner.as_str()
    }
}

impl fmt::Display for GeminiUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::str::FromStr for GeminiUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<GeminiUrl> {
        GeminiUrl::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_form() {
        let url = GeminiUrl::parse("gemini://user@example.org:1966/a/b?q=1#frag").unwrap();
        assert_eq!(url.scheme(), "gemini");
        assert_eq!(url.userinfo(), Some("user"));
        assert_eq!(url.host(), "example.org");
        assert_eq!(url.port(), Some(1966));
        assert_eq!(url.path(), "/a/b");
        assert_eq!(url.query(), Some("q=1"));
        assert_eq!(url.fragment(), Some("frag"));
        assert!(url.is_gemini());
    }

    #[test]
    fn parse_emit_round_trip() {
        for input in [
            "gemini://example.org/",
            "gemini://example.org:1966/path?x=y",
            "gemini://[::1]:1965/ipv6",
            "gemini://example.org/%20spaced",
        ] {
            let url = GeminiUrl::parse(input).unwrap();
            assert_eq!(GeminiUrl::parse(url.as_str()).unwrap(), url);
        }
    }

    #[test]
    fn scheme_is_canonicalized_lowercase() {
        let url = GeminiUrl::parse("GEMINI://example.org/").unwrap();
        assert_eq!(url.scheme(), "gemini");
        assert!(url.is_gemini());
    }

    #[test]
    fn default_port() {
        let url = GeminiUrl::parse("gemini://example.org/").unwrap();
        assert_eq!(url.port(), None);
        assert_eq!(url.effective_port(), DEFAULT_PORT);
    }

    #[test]
    fn ipv6_brackets() {
        let url = GeminiUrl::parse("gemini://[2001:db8::7]/x").unwrap();
        assert_eq!(url.host(), "[2001:db8::7]");
        assert_eq!(url.raw_host(), "2001:db8::7");
        assert_eq!(url.sni_hostname(), None);
    }

    #[test]
    fn ipv4_literal_gets_no_sni() {
        let url = GeminiUrl::parse("gemini://127.0.0.1:1967/").unwrap();
        assert_eq!(url.sni_hostname(), None);
        let named = GeminiUrl::parse("gemini://localhost:1967/").unwrap();
        assert_eq!(named.sni_hostname(), Some("localhost"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            GeminiUrl::parse("no scheme here"),
            Err(Error::InvalidUrl(_))
        ));
        assert!(matches!(
            GeminiUrl::parse("/relative/only"),
            Err(Error::InvalidUrl(_))
        ));
    }

    #[test]
    fn expect_gemini_rejects_other_schemes() {
        let url = GeminiUrl::parse("https://example.org/").unwrap();
        assert!(!url.is_gemini());
        assert!(matches!(
            url.expect_gemini(),
            Err(Error::UnsupportedScheme(s)) if s == "https"
        ));
    }

    #[test]
    fn combine_absolute_target_wins() {
        let base = GeminiUrl::parse("gemini://a.example/dir/page").unwrap();
        let out = base.combine("gemini://b.example/other").unwrap();
        assert_eq!(out.as_str(), "gemini://b.example/other");
    }

    #[test]
    fn combine_relative_path() {
        let base = GeminiUrl::parse("gemini://a.example/dir/page").unwrap();
        let out = base.combine("sibling").unwrap();
        assert_eq!(out.as_str(), "gemini://a.example/dir/sibling");
        assert_eq!(out.host(), base.host());
        assert_eq!(out.scheme(), base.scheme());
    }

    #[test]
    fn combine_absolute_path() {
        let base = GeminiUrl::parse("gemini://a.example:1966/dir/page?old=1").unwrap();
        let out = base.combine("/new?fresh=1").unwrap();
        assert_eq!(out.as_str(), "gemini://a.example:1966/new?fresh=1");
    }

    #[test]
    fn combine_replaces_query_and_fragment() {
        let base = GeminiUrl::parse("gemini://a.example/p?old=1#top").unwrap();
        let out = base.combine("p2#bottom").unwrap();
        assert_eq!(out.query(), None);
        assert_eq!(out.fragment(), Some("bottom"));
    }

    #[test]
    fn decoded_path() {
        let url = GeminiUrl::parse("gemini://h/docs/a%20file.gmi").unwrap();
        assert_eq!(url.path(), "/docs/a%20file.gmi");
        assert_eq!(url.decoded_path(), "/docs/a file.gmi");
    }
}
