use reqwest::Url;

/// Pieces of an endpoint as written, before any URL normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RawEndpoint<'a> {
    scheme: Option<&'a str>,
    host: &'a str,
    port: Option<&'a str>,
    path: &'a str,
}

/// Returns true when `endpoint` is an absolute `scheme://host/...` URL.
///
/// Scheme-relative forms (`//host/path`) are rejected here even though
/// [`endpoint_key`] accepts them.
pub fn validate_endpoint(endpoint: &str) -> bool {
    if endpoint.is_empty() || !has_url_syntax(endpoint) {
        return false;
    }
    let Ok(parsed) = Url::parse(endpoint) else {
        return false;
    };
    if parsed.cannot_be_a_base() {
        return false;
    }
    parsed
        .host_str()
        .is_some_and(|host| !host.trim().is_empty())
}

/// Normalized identity of an endpoint: `host + path` exactly as written,
/// with trailing slashes removed. Scheme, userinfo, port, query and
/// fragment do not participate.
pub fn endpoint_key(endpoint: &str) -> Option<String> {
    let raw = split_endpoint(endpoint.trim())?;
    let key = format!("{}{}", raw.host, raw.path);
    Some(key.trim_end_matches('/').to_string())
}

fn has_url_syntax(endpoint: &str) -> bool {
    if endpoint
        .chars()
        .any(|ch| ch.is_whitespace() || ch.is_control() || ch == '\\')
    {
        return false;
    }
    let Some(raw) = split_endpoint(endpoint) else {
        return false;
    };
    let Some(scheme) = raw.scheme else {
        return false;
    };
    if !is_valid_scheme(scheme) {
        return false;
    }
    if let Some(port) = raw.port
        && (port.is_empty() || !port.bytes().all(|byte| byte.is_ascii_digit()))
    {
        return false;
    }
    is_valid_host(raw.host)
}

fn split_endpoint(endpoint: &str) -> Option<RawEndpoint<'_>> {
    let (scheme, rest) = match endpoint.strip_prefix("//") {
        Some(rest) => (None, rest),
        None => {
            let (scheme, rest) = endpoint.split_once("://")?;
            if scheme.is_empty() || scheme.contains(['/', '?', '#']) {
                return None;
            }
            (Some(scheme), rest)
        }
    };
    let rest = rest.split(['?', '#']).next().unwrap_or("");
    let (authority, path) = match rest.find('/') {
        Some(index) => rest.split_at(index),
        None => (rest, ""),
    };
    let host_port = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host_port)| host_port);
    let (host, port) = split_port(host_port);
    if host.is_empty() {
        return None;
    }
    Some(RawEndpoint {
        scheme,
        host,
        port,
        path,
    })
}

fn split_port(host_port: &str) -> (&str, Option<&str>) {
    if host_port.starts_with('[') {
        return match host_port.find(']') {
            Some(end) => {
                let (host, tail) = host_port.split_at(end + 1);
                (host, tail.strip_prefix(':'))
            }
            None => (host_port, None),
        };
    }
    match host_port.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (host_port, None),
    }
}

fn is_valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    chars.next().is_some_and(|first| first.is_ascii_alphabetic())
        && chars.all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '+' | '-' | '.'))
}

fn is_valid_host(host: &str) -> bool {
    if let Some(inner) = host.strip_prefix('[') {
        return inner.strip_suffix(']').is_some_and(|address| {
            !address.is_empty()
                && address
                    .chars()
                    .all(|ch| ch.is_ascii_hexdigit() || matches!(ch, ':' | '.'))
        });
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
    })
}
