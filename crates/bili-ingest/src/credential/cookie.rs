//! Session credential parsed from a browser cookie string.

use std::fmt;
use std::str::FromStr;

use crate::error::CredentialError;

/// Session cookie carrying the login token.
pub const SESSDATA: &str = "SESSDATA";
/// CSRF token paired with the session.
pub const BILI_JCT: &str = "bili_jct";
/// Logged-in user id.
pub const DEDE_USER_ID: &str = "DedeUserID";
/// Device fingerprint cookie.
pub const BUVID3: &str = "buvid3";
/// Pseudo-cookie used to keep the refresh token next to the cookies. Never sent.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

const PRIORITY_COOKIES: [&str; 5] = [SESSDATA, BILI_JCT, DEDE_USER_ID, "DedeUserID__ckMd5", BUVID3];

/// Immutable set of session cookies.
///
/// Pairs keep their original order, except that the well-known session
/// cookies are rendered first by [`Credential::to_header_value`].
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pairs: Vec<(String, String)>,
}

impl Credential {
    /// Parse a cookie string (`"a=1; b=2"`, newline separated copy/paste is accepted too).
    ///
    /// Later duplicates of the same name override earlier ones.
    pub fn parse(cookies: &str) -> Result<Self, CredentialError> {
        let mut pairs: Vec<(String, String)> = Vec::new();
        for part in cookies.split([';', '\n']) {
            let Some((name, value)) = part.trim().split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let value = value.trim().to_string();
            match pairs.iter_mut().find(|(k, _)| k == name) {
                Some(existing) => existing.1 = value,
                None => pairs.push((name.to_string(), value)),
            }
        }

        if pairs.is_empty() {
            return Err(CredentialError::Empty);
        }
        Ok(Self { pairs })
    }

    /// Anonymous credential carrying only a generated device id.
    pub fn anonymous() -> Self {
        Self {
            pairs: vec![(BUVID3.to_string(), generate_fake_buvid3())],
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[inline]
    pub fn session_id(&self) -> Option<&str> {
        self.get(SESSDATA)
    }

    #[inline]
    pub fn csrf_token(&self) -> Option<&str> {
        self.get(BILI_JCT)
    }

    #[inline]
    pub fn user_id(&self) -> Option<&str> {
        self.get(DEDE_USER_ID)
    }

    #[inline]
    pub fn device_id(&self) -> Option<&str> {
        self.get(BUVID3)
    }

    #[inline]
    pub fn refresh_token(&self) -> Option<&str> {
        self.get(REFRESH_TOKEN_KEY)
    }

    /// Whether the cookie set looks like a logged-in session.
    pub fn is_logged_in(&self) -> bool {
        self.session_id().is_some_and(|s| !s.is_empty())
    }

    /// Render as a single `Cookie` header value.
    pub fn to_header_value(&self) -> String {
        let mut out = Vec::with_capacity(self.pairs.len());
        for key in PRIORITY_COOKIES {
            if let Some(value) = self.get(key) {
                out.push(format!("{key}={value}"));
            }
        }
        for (key, value) in &self.pairs {
            if PRIORITY_COOKIES.contains(&key.as_str()) || key == REFRESH_TOKEN_KEY {
                continue;
            }
            out.push(format!("{key}={value}"));
        }
        out.join("; ")
    }

    /// Number of cookies held.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl FromStr for Credential {
    type Err = CredentialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// Session tokens must not end up in logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user_id", &self.user_id())
            .field("logged_in", &self.is_logged_in())
            .field("cookies", &self.pairs.len())
            .finish()
    }
}

/// Generates a fake BUVID3 device identifier.
///
/// Format: `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXXinfoc` with uppercase hex digits.
pub fn generate_fake_buvid3() -> String {
    let u = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
    format!(
        "{}-{}-{}-{}-{}infoc",
        &u[0..8],
        &u[8..12],
        &u[12..16],
        &u[16..20],
        &u[20..]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_accessors() {
        let cred =
            Credential::parse("SESSDATA=abc123; bili_jct=xyz789; DedeUserID=12345; buvid3=dev")
                .unwrap();

        assert_eq!(cred.session_id(), Some("abc123"));
        assert_eq!(cred.csrf_token(), Some("xyz789"));
        assert_eq!(cred.user_id(), Some("12345"));
        assert_eq!(cred.device_id(), Some("dev"));
        assert!(cred.is_logged_in());
        assert_eq!(cred.get("nonexistent"), None);
    }

    #[test]
    fn test_parse_accepts_newlines_and_duplicates() {
        let cred = Credential::parse("a=1\nSESSDATA=old\n b = 2 ;SESSDATA=new").unwrap();
        assert_eq!(cred.session_id(), Some("new"));
        assert_eq!(cred.get("b"), Some("2"));
        assert_eq!(cred.len(), 3);
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert_eq!(Credential::parse(""), Err(CredentialError::Empty));
        assert_eq!(Credential::parse(" ; novalue ;"), Err(CredentialError::Empty));
    }

    #[test]
    fn test_header_value_orders_priority_cookies_and_strips_refresh_token() {
        let cred =
            Credential::parse("theme=dark; refresh_token=tok; bili_jct=x; SESSDATA=s").unwrap();
        let header = cred.to_header_value();
        assert_eq!(header, "SESSDATA=s; bili_jct=x; theme=dark");
        assert_eq!(cred.refresh_token(), Some("tok"));
    }

    #[test]
    fn test_debug_hides_tokens() {
        let cred = Credential::parse("SESSDATA=secret-session").unwrap();
        let rendered = format!("{cred:?}");
        assert!(!rendered.contains("secret-session"));
    }

    #[test]
    fn test_fake_buvid3_format() {
        let buvid = generate_fake_buvid3();
        assert!(buvid.ends_with("infoc"));
        let parts: Vec<&str> = buvid.trim_end_matches("infoc").split('-').collect();
        assert_eq!(
            parts.iter().map(|p| p.len()).collect::<Vec<_>>(),
            vec![8, 4, 4, 4, 12]
        );
        assert!(!Credential::anonymous().is_logged_in());
    }
}
