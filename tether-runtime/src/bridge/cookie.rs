//! Cookie header parsing and `Set-Cookie` serialisation

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Parse every `Cookie` header value into a flat name→value map
///
/// Later duplicates overwrite earlier ones; surrounding quotes are removed.
pub fn parse_cookies<'a>(headers: impl IntoIterator<Item = &'a str>) -> BTreeMap<String, String> {
    let mut cookies = BTreeMap::new();

    for header in headers {
        for pair in header.split(';') {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            cookies.insert(name.to_string(), value.to_string());
        }
    }

    cookies
}

/// Attributes accepted by `res.cookie(name, value, options)`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CookieOptions {
    pub path: Option<String>,
    pub domain: Option<String>,
    /// Lifetime in milliseconds
    pub max_age: Option<i64>,
    /// RFC 1123 date string
    pub expires: Option<String>,
    pub http_only: bool,
    pub secure: bool,
    /// `Strict`, `Lax` or `None`
    pub same_site: Option<String>,
}

/// Render a `Set-Cookie` header value
pub fn serialize_cookie(name: &str, value: &str, options: &CookieOptions) -> String {
    let mut cookie = format!("{name}={value}");

    cookie.push_str("; Path=");
    cookie.push_str(options.path.as_deref().unwrap_or("/"));

    if let Some(domain) = &options.domain {
        cookie.push_str("; Domain=");
        cookie.push_str(domain);
    }
    if let Some(max_age) = options.max_age {
        cookie.push_str(&format!("; Max-Age={}", max_age.div_euclid(1000)));
    }
    if let Some(expires) = &options.expires {
        cookie.push_str("; Expires=");
        cookie.push_str(expires);
    }
    if options.http_only {
        cookie.push_str("; HttpOnly");
    }
    if options.secure {
        cookie.push_str("; Secure");
    }
    if let Some(same_site) = &options.same_site {
        cookie.push_str("; SameSite=");
        cookie.push_str(same_site);
    }

    cookie
}

/// `Set-Cookie` value that makes the browser drop `name`
pub fn expired_cookie(name: &str, options: &CookieOptions) -> String {
    let options = CookieOptions {
        max_age: Some(0),
        expires: Some("Thu, 01 Jan 1970 00:00:00 GMT".to_string()),
        ..options.clone()
    };
    serialize_cookie(name, "", &options)
}
