//! Netscape cookie-file parsing (§6) and the in-memory cookie jar the API
//! client and WebSocket channel read from.
//!
//! FC2's `reqwest` client is built without the `cookies` feature (mirroring
//! the teacher's `platforms` crate, which manages its own cookie store rather
//! than relying on a reqwest-managed jar), so requests attach a `Cookie`
//! header built from this jar by hand.

use std::collections::HashMap;
use std::path::Path;

/// A single parsed cookie (only the fields the engine actually needs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
}

/// Read-only after load (§5 "Shared resources": "The cookie jar is
/// read-only after load").
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    by_name: HashMap<String, Cookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a Netscape tab-separated cookie file (§6): one cookie per line,
    /// 7 fields `domain, flag, path, secure, expiration, name, value`. A
    /// `#HttpOnly_` domain prefix sets `http_only` and is stripped from the
    /// domain. Malformed lines are skipped.
    pub fn load_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        let mut jar = Self::new();
        for line in text.lines() {
            if let Some(cookie) = parse_line(line) {
                jar.by_name.insert(cookie.name.clone(), cookie);
            }
        }
        jar
    }

    pub fn get(&self, name: &str) -> Option<&Cookie> {
        self.by_name.get(name)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.by_name.get(name).map(|c| c.value.as_str())
    }

    /// Render every cookie as a single `Cookie:` header value.
    pub fn header_value(&self) -> Option<String> {
        if self.by_name.is_empty() {
            return None;
        }
        let mut s = String::new();
        for cookie in self.by_name.values() {
            if !s.is_empty() {
                s.push_str("; ");
            }
            s.push_str(&cookie.name);
            s.push('=');
            s.push_str(&cookie.value);
        }
        Some(s)
    }
}

fn parse_line(line: &str) -> Option<Cookie> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') && !line.starts_with("#HttpOnly_") {
        return None;
    }
    let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
    if fields.len() != 7 {
        return None;
    }
    let [domain, _flag, path, secure, _expiration, name, value] = fields.try_into().ok()?;
    let http_only = domain.starts_with("#HttpOnly_");
    let domain = domain.trim_start_matches("#HttpOnly_").to_string();
    Some(Cookie {
        name: name.to_string(),
        value: value.to_string(),
        domain,
        path: path.to_string(),
        secure: secure.eq_ignore_ascii_case("TRUE"),
        http_only,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_regular_line() {
        let jar = CookieJar::parse("live.fc2.com\tTRUE\t/\tTRUE\t0\tl_ortkn\tabc123\n");
        let c = jar.get("l_ortkn").unwrap();
        assert_eq!(c.value, "abc123");
        assert_eq!(c.domain, "live.fc2.com");
        assert!(c.secure);
        assert!(!c.http_only);
    }

    #[test]
    fn strips_httponly_prefix() {
        let jar = CookieJar::parse("#HttpOnly_.fc2.com\tTRUE\t/\tFALSE\t0\tsid\txyz\n");
        let c = jar.get("sid").unwrap();
        assert_eq!(c.domain, ".fc2.com");
        assert!(c.http_only);
    }

    #[test]
    fn skips_malformed_lines() {
        let jar = CookieJar::parse("not a cookie line\nlive.fc2.com\tTRUE\t/\tTRUE\t0\tfoo\tbar\n");
        assert!(jar.get("foo").is_some());
        assert_eq!(jar.by_name.len(), 1);
    }

    #[test]
    fn header_value_joins_all_cookies() {
        let jar = CookieJar::parse(
            "live.fc2.com\tTRUE\t/\tTRUE\t0\ta\t1\nlive.fc2.com\tTRUE\t/\tTRUE\t0\tb\t2\n",
        );
        let header = jar.header_value().unwrap();
        assert!(header.contains("a=1"));
        assert!(header.contains("b=2"));
    }
}
