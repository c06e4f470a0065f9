//! Derive the device credential context from a page URL.
//!
//! The context is the registrable part of the host: the last two
//! dot-separated labels of an `http` or `https` URL, so
//! `https://accounts.example.com/login` and `http://example.com` share the
//! context `example.com`.

/// Characters allowed in the two context labels.
fn is_label_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

/// Subdomain labels may additionally contain `+`.
fn is_prefix_byte(b: u8) -> bool {
    is_label_byte(b) || b == b'+'
}

/// Return the context for `url`, or `None` when the URL has no dotted host.
pub fn context_from_url(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let bytes = rest.as_bytes();

    // Offsets where the last-two-labels match may begin: the start of the
    // host and the byte after every dot reachable through subdomain labels.
    let mut starts = vec![0usize];
    let mut pos = 0usize;
    loop {
        let label = bytes[pos..].iter().take_while(|&&b| is_prefix_byte(b)).count();
        let dot = pos + label;
        if label == 0 || bytes.get(dot) != Some(&b'.') {
            break;
        }
        pos = dot + 1;
        starts.push(pos);
    }

    // Prefer the deepest start so the result is the rightmost pair.
    starts
        .into_iter()
        .rev()
        .find_map(|start| last_two_labels(&rest[start..]))
}

fn last_two_labels(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let first = bytes.iter().take_while(|&&b| is_label_byte(b)).count();
    if first == 0 || bytes.get(first) != Some(&b'.') {
        return None;
    }
    let second = bytes[first + 1..]
        .iter()
        .take_while(|&&b| is_label_byte(b))
        .count();
    if second == 0 {
        return None;
    }
    Some(s[..first + 1 + second].to_string())
}
