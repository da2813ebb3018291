//! Client IP extraction utilities.

use std::net::SocketAddr;

use axum::{extract::ConnectInfo, http::request::Parts};

/// Trait for types that provide access to HTTP headers and extensions.
/// Implemented for both `Parts` and `Request` to allow flexible IP extraction.
pub trait HasHeadersAndExtensions {
    fn headers(&self) -> &axum::http::HeaderMap;
    fn extensions(&self) -> &axum::http::Extensions;
}

impl HasHeadersAndExtensions for Parts {
    fn headers(&self) -> &axum::http::HeaderMap {
        &self.headers
    }
    fn extensions(&self) -> &axum::http::Extensions {
        &self.extensions
    }
}

impl<B> HasHeadersAndExtensions for axum::extract::Request<B> {
    fn headers(&self) -> &axum::http::HeaderMap {
        axum::extract::Request::headers(self)
    }
    fn extensions(&self) -> &axum::http::Extensions {
        axum::extract::Request::extensions(self)
    }
}

/// Extract the client IP address.
///
/// If `ip_header` is set (running behind a proxy), the first address in
/// that header is used and the socket address is ignored. Otherwise the
/// peer address from `ConnectInfo` is used.
pub fn extract_client_ip<T: HasHeadersAndExtensions>(
    source: &T,
    ip_header: Option<&str>,
) -> Option<String> {
    match ip_header {
        Some(name) => source
            .headers()
            .get(name)?
            .to_str()
            .ok()?
            .split(',')
            .next()
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(str::to_string),
        None => source
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[test]
    fn test_header_takes_first_address() {
        let request = Request::builder()
            .header("x-forwarded-for", "10.0.0.1, 192.168.1.1")
            .body(())
            .unwrap();
        assert_eq!(
            extract_client_ip(&request, Some("x-forwarded-for")),
            Some("10.0.0.1".to_string())
        );
    }

    #[test]
    fn test_missing_header_yields_none() {
        let request = Request::builder().body(()).unwrap();
        assert_eq!(extract_client_ip(&request, Some("x-real-ip")), None);
    }

    #[test]
    fn test_connect_info_used_without_header() {
        let mut request = Request::builder().body(()).unwrap();
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        assert_eq!(
            extract_client_ip(&request, None),
            Some("127.0.0.1".to_string())
        );
    }
}
