//! Built-in DNS provider table, carried verbatim from the original
//! `network.py` hardcoded list (§4.2 supplement).

#[derive(Debug, Clone, Copy)]
pub struct Provider {
    pub name: &'static str,
    pub nameservers: &'static [&'static str],
    pub doh_endpoint: Option<&'static str>,
}

pub static PROVIDERS: &[Provider] = &[
    Provider {
        name: "cloudflare",
        nameservers: &["1.1.1.1", "1.0.0.1"],
        doh_endpoint: Some("cloudflare-dns.com"),
    },
    Provider {
        name: "google",
        nameservers: &["8.8.8.8", "8.8.4.4"],
        doh_endpoint: Some("dns.google"),
    },
    Provider {
        name: "quad9",
        nameservers: &["9.9.9.9", "149.112.112.112"],
        doh_endpoint: Some("dns.quad9.net"),
    },
    Provider {
        name: "opendns",
        nameservers: &["208.67.222.222", "208.67.220.220"],
        doh_endpoint: None,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_providers_in_table() {
        assert_eq!(PROVIDERS.len(), 4);
    }

    #[test]
    fn every_provider_has_two_nameservers() {
        for p in PROVIDERS {
            assert_eq!(p.nameservers.len(), 2, "{} should have 2 nameservers", p.name);
        }
    }
}
