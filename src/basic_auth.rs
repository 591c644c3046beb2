use actix_web::{HttpRequest, HttpResponse};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::config::BasicAuthConfig;

/// True when no credentials are configured or the request carries matching
/// `Authorization: Basic` credentials.
pub fn check_basic_auth(req: &HttpRequest, config: Option<&BasicAuthConfig>) -> bool {
    let Some(config) = config else {
        return true;
    };

    req.headers()
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Basic "))
        .and_then(|encoded| STANDARD.decode(encoded.trim()).ok())
        .and_then(|decoded| String::from_utf8(decoded).ok())
        .map(|credentials| match credentials.split_once(':') {
            Some((user, pass)) => user == config.username && pass == config.password,
            None => false,
        })
        .unwrap_or(false)
}

pub fn unauthorized_response() -> HttpResponse {
    HttpResponse::Unauthorized()
        .append_header(("WWW-Authenticate", r#"Basic realm="linkqueue""#))
        .finish()
}
