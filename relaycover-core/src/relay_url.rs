//! Relay URL normalization and filtering
//!
//! Two endpoints are the same relay iff their normalized forms are equal.
//! Normalization is deliberately shallow: trim, lowercase, strip trailing
//! slashes. The normalized form is the key for health tracking, status
//! entries and coverage comparison.
//!
//! Relays on loopback or private networks are dropped when relay lists are
//! parsed; they are never queried and never displayed.

/// Normalize a relay URL for comparison and map keys.
pub fn normalize_relay_url(url: &str) -> String {
    let mut normalized = url.trim().to_lowercase();
    while normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

/// Check that a URL uses a websocket scheme and names a public host.
pub fn is_acceptable_relay_url(url: &str) -> bool {
    let normalized = normalize_relay_url(url);
    if !normalized.starts_with("wss://") && !normalized.starts_with("ws://") {
        return false;
    }
    !is_local_host(extract_host(&normalized))
}

/// Deduplicate relay URLs by normalized form, keeping the first spelling.
pub fn dedup_relay_urls<I, S>(urls: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for url in urls {
        let url = url.as_ref();
        if seen.insert(normalize_relay_url(url)) {
            out.push(url.to_string());
        }
    }
    out
}

/// Relay name without the websocket scheme.
pub fn format_relay_name(url: &str) -> &str {
    url.strip_prefix("wss://")
        .or_else(|| url.strip_prefix("ws://"))
        .unwrap_or(url)
}

/// Relay name folded into roughly square lines for compact status chips.
pub fn format_relay_name_folded(url: &str) -> String {
    let name: Vec<char> = format_relay_name(url).chars().collect();
    if name.is_empty() {
        return String::new();
    }
    let width = (name.len() as f64).sqrt().ceil() as usize;
    name.chunks(width.max(1))
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Host (with port) portion of a websocket URL.
fn extract_host(url: &str) -> &str {
    let without_scheme = url
        .strip_prefix("wss://")
        .or_else(|| url.strip_prefix("ws://"))
        .unwrap_or(url);
    without_scheme.split('/').next().unwrap_or(without_scheme)
}

fn is_local_host(host: &str) -> bool {
    if host.is_empty() {
        return true;
    }

    // IPv6 literals keep their brackets
    if host.starts_with('[') {
        return host.starts_with("[::1]")
            || host.starts_with("[fe80:")
            || host.starts_with("[fc")
            || host.starts_with("[fd")
            || host.starts_with("[::ffff:")
            || host.starts_with("[::]");
    }

    let name = host.split(':').next().unwrap_or(host);

    if name == "localhost" || name.ends_with(".localhost") || name.ends_with(".local") {
        return true;
    }

    match name.parse::<std::net::Ipv4Addr>() {
        Ok(ip) => {
            let [a, b, ..] = ip.octets();
            ip.is_loopback()
                || ip.is_private()
                || ip.is_link_local()
                || ip.is_unspecified()
                || (a == 100 && (64..=127).contains(&b))
        }
        Err(_) => false,
    }
}
