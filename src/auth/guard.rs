//! Caller resolution and store-backed role checks
//!
//! Tokens carry identity only. The caller's platform role is read from the
//! profile store on every call, so a role change or a ban takes effect on
//! the next request rather than at token expiry.

use hyper::HeaderMap;

use crate::auth::{Claims, Role};
use crate::db::ProfileRepository;
use crate::types::{AtrioError, Result};

/// The authenticated caller of one request
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    pub email: Option<String>,
    pub ip: String,
}

impl Caller {
    pub fn from_claims(claims: &Claims, headers: &HeaderMap) -> Self {
        Self {
            user_id: claims.sub.clone(),
            email: claims.email.clone(),
            ip: client_ip(headers),
        }
    }
}

/// Best-effort client address for the audit trail. First hop of the
/// forwarded chain, then the proxy's real-ip header, then "unknown".
pub fn client_ip(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }
    "unknown".to_string()
}

/// The caller's platform role as stored right now
pub async fn current_role(profiles: &ProfileRepository, user_id: &str) -> Result<Role> {
    profiles
        .get_role(user_id)
        .await?
        .ok_or_else(|| AtrioError::Unauthorized(format!("no profile for caller {user_id}")))
}

/// Require the caller to hold the platform admin role
pub async fn require_admin_role(profiles: &ProfileRepository, user_id: &str) -> Result<Role> {
    let role = current_role(profiles, user_id).await?;
    if !role.is_admin() {
        return Err(AtrioError::Forbidden("admin role required".to_string()));
    }
    Ok(role)
}

#[cfg(test)]
mod tests {
    use hyper::header::HeaderValue;

    use super::*;

    #[test]
    fn forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.2, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));

        assert_eq!(client_ip(&headers), "203.0.113.9");
    }

    #[test]
    fn real_ip_is_the_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));

        assert_eq!(client_ip(&headers), "198.51.100.4");
    }

    #[test]
    fn no_proxy_headers_reads_unknown() {
        assert_eq!(client_ip(&HeaderMap::new()), "unknown");
    }

    #[test]
    fn empty_forwarded_entry_falls_through() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("  ,10.0.0.2"));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));

        assert_eq!(client_ip(&headers), "198.51.100.4");
    }
}
