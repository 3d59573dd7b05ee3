//! Small request/hostname helpers used across the pipeline and DNS layers.

use once_cell::sync::Lazy;
use regex::Regex;

static DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?(\.[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?)*$")
        .expect("domain regex")
});

/// True if `name` is a syntactically valid hostname (no trailing dot).
pub fn is_valid_hostname(name: &str) -> bool {
    !name.is_empty() && name.len() <= 253 && DOMAIN_RE.is_match(name)
}

/// Lower-cases a `Host` header value and strips any port suffix.
pub fn host_without_port(host: &str) -> String {
    let host = host.trim().to_ascii_lowercase();
    if let Some(stripped) = host.strip_prefix('[') {
        // Bracketed IPv6 literal, e.g. "[::1]:443"
        if let Some(end) = stripped.find(']') {
            return stripped[..end].to_string();
        }
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
            name.to_string()
        }
        _ => host,
    }
}

/// The client address: first entry of `X-Forwarded-For` when present,
/// otherwise the socket peer.
pub fn client_ip(forwarded_for: Option<&str>, peer: Option<&str>) -> String {
    if let Some(xff) = forwarded_for {
        if let Some(first) = xff.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    peer.map(host_without_port).unwrap_or_default()
}

/// The root zone of a hostname: its last two labels.
pub fn root_domain(name: &str) -> String {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() < 2 {
        return name.to_string();
    }
    format!("{}.{}", parts[parts.len() - 2], parts[parts.len() - 1])
}

/// Lenient percent-decoding with `+` treated as space. Malformed escape
/// sequences are passed through untouched.
pub fn url_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hex = &input[i + 1..i + 3];
                if let Ok(v) = u8::from_str_radix(hex, 16) {
                    out.push(v);
                    i += 3;
                } else {
                    out.push(b'%');
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
