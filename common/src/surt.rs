use lazy_regex::regex;
use url::{form_urlencoded, Host, Url};

/// Convert a URL to its SURT form: reversed comma-joined host labels, an
/// optional non-default port, `)`, the path, and the query with lowercased
/// pairs in sorted order. A leading `www`/`www2`/... host label is dropped.
///
/// The output is used as a raw sort key; lexicographic byte order over SURTs
/// approximates DNS-hierarchy order.
pub fn surt(url: &Url) -> String {
    let mut key = String::with_capacity(url.as_str().len());

    if let Some(host) = url.host() {
        push_host_key(&mut key, &host);
    }

    if let Some(port) = url.port() {
        key.push(':');
        key.push_str(itoa::Buffer::new().format(port));
    }

    key.push(')');
    key.push_str(url.path());

    let query = canonical_query(url);
    if !query.is_empty() {
        key.push('?');
        key.push_str(&query);
    }

    key
}

fn push_host_key(key: &mut String, host: &Host<&str>) {
    let Host::Domain(domain) = host else {
        // ip hosts sort as-is
        key.push_str(&host.to_string());
        return;
    };

    let domain = match regex!(r#"^www\d*\."#).find(domain) {
        Some(mat) => &domain[mat.end()..],
        None => domain,
    };

    for (i, label) in domain.rsplit('.').enumerate() {
        if i > 0 {
            key.push(',');
        }
        key.push_str(label);
    }
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.to_lowercase(), v.to_lowercase()))
        .collect();

    if pairs.is_empty() {
        return String::new();
    }

    pairs.sort();

    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}
