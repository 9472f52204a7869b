//! Session, device and impersonation cookies

use chrono::{DateTime, Utc};
use tower_cookies::{
    cookie::{time::OffsetDateTime, SameSite},
    Cookie, Cookies,
};

pub const SESSION_COOKIE: &str = "session";
pub const DEVICE_COOKIE: &str = "device";
pub const IMPERSONATION_COOKIE: &str = "impersonation";

/// Build a site-wide `HttpOnly; SameSite=Lax` cookie expiring with its record
pub fn build_cookie(
    name: &'static str,
    value: String,
    expires_at: DateTime<Utc>,
    secure: bool,
) -> Cookie<'static> {
    let mut builder = Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure);

    if let Ok(expires) = OffsetDateTime::from_unix_timestamp(expires_at.timestamp()) {
        builder = builder.expires(expires);
    }

    builder.build()
}

/// Removal cookie with the same scope as the original
pub fn removal_cookie(name: &'static str, secure: bool) -> Cookie<'static> {
    Cookie::build((name, ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(tower_cookies::cookie::time::Duration::ZERO)
        .build()
}

pub fn set_cookie(
    cookies: &Cookies,
    name: &'static str,
    value: String,
    expires_at: DateTime<Utc>,
    secure: bool,
) {
    cookies.add(build_cookie(name, value, expires_at, secure));
}

pub fn clear_cookie(cookies: &Cookies, name: &'static str, secure: bool) {
    cookies.add(removal_cookie(name, secure));
}

pub fn read_cookie(cookies: &Cookies, name: &str) -> Option<String> {
    cookies
        .get(name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_cookie_attributes() {
        let expires_at = Utc::now() + Duration::hours(12);
        let cookie = build_cookie(SESSION_COOKIE, "token".to_string(), expires_at, true);

        assert_eq!(cookie.name(), "session");
        assert_eq!(cookie.value(), "token");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(
            cookie.expires_datetime().map(|t| t.unix_timestamp()),
            Some(expires_at.timestamp())
        );
    }

    #[test]
    fn test_insecure_cookie_for_local_development() {
        let cookie = build_cookie(DEVICE_COOKIE, "t".to_string(), Utc::now(), false);
        assert_ne!(cookie.secure(), Some(true));
    }

    #[test]
    fn test_removal_cookie_expires_immediately() {
        let cookie = removal_cookie(IMPERSONATION_COOKIE, true);
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(
            cookie.max_age(),
            Some(tower_cookies::cookie::time::Duration::ZERO)
        );
    }
}
