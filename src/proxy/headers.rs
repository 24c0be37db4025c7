use rand::Rng;
use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrowserFamily {
    Chrome,
    Firefox,
    Safari,
    Edge,
}

impl BrowserFamily {
    pub const ALL: [BrowserFamily; 4] = [
        BrowserFamily::Chrome,
        BrowserFamily::Firefox,
        BrowserFamily::Safari,
        BrowserFamily::Edge,
    ];

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }

    /// Chromium-based browsers send client hints and fetch metadata.
    pub fn is_chromium(self) -> bool {
        matches!(self, BrowserFamily::Chrome | BrowserFamily::Edge)
    }

    fn template(self) -> &'static BrowserTemplate {
        match self {
            BrowserFamily::Chrome => &CHROME,
            BrowserFamily::Firefox => &FIREFOX,
            BrowserFamily::Safari => &SAFARI,
            BrowserFamily::Edge => &EDGE,
        }
    }
}

impl fmt::Display for BrowserFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrowserFamily::Chrome => write!(f, "chrome"),
            BrowserFamily::Firefox => write!(f, "firefox"),
            BrowserFamily::Safari => write!(f, "safari"),
            BrowserFamily::Edge => write!(f, "edge"),
        }
    }
}

struct BrowserTemplate {
    user_agents: &'static [&'static str],
    accept: &'static str,
    accept_encoding: &'static str,
    accept_languages: &'static [&'static str],
    extras: &'static [(&'static str, &'static str)],
}

const FETCH_METADATA: [(&str, &str); 4] = [
    ("Sec-Fetch-Dest", "document"),
    ("Sec-Fetch-Mode", "navigate"),
    ("Sec-Fetch-Site", "none"),
    ("Sec-Fetch-User", "?1"),
];

static CHROME: BrowserTemplate = BrowserTemplate {
    user_agents: &[
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    ],
    accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7",
    accept_encoding: "gzip, deflate, br",
    accept_languages: &[
        "en-US,en;q=0.9",
        "en-GB,en-US;q=0.9,en;q=0.8",
        "en-US,en;q=0.9,es;q=0.8",
    ],
    extras: &[
        (
            "sec-ch-ua",
            "\"Not_A Brand\";v=\"8\", \"Chromium\";v=\"120\", \"Google Chrome\";v=\"120\"",
        ),
        ("sec-ch-ua-mobile", "?0"),
        ("sec-ch-ua-platform", "\"Windows\""),
        FETCH_METADATA[0],
        FETCH_METADATA[1],
        FETCH_METADATA[2],
        FETCH_METADATA[3],
    ],
};

static FIREFOX: BrowserTemplate = BrowserTemplate {
    user_agents: &[
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:120.0) Gecko/20100101 Firefox/120.0",
        "Mozilla/5.0 (X11; Linux x86_64; rv:120.0) Gecko/20100101 Firefox/120.0",
    ],
    accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
    accept_encoding: "gzip, deflate, br",
    accept_languages: &["en-US,en;q=0.5", "en-GB,en;q=0.5", "en-US,en;q=0.5,es;q=0.3"],
    extras: &[("TE", "trailers")],
};

static SAFARI: BrowserTemplate = BrowserTemplate {
    user_agents: &[
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Safari/605.1.15",
    ],
    accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
    accept_encoding: "gzip, deflate, br",
    accept_languages: &["en-US,en;q=0.9", "en-GB,en-US;q=0.9,en;q=0.8"],
    extras: &[],
};

static EDGE: BrowserTemplate = BrowserTemplate {
    user_agents: &[
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
    ],
    accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7",
    accept_encoding: "gzip, deflate, br",
    accept_languages: &["en-US,en;q=0.9", "en-GB,en-US;q=0.9,en;q=0.8"],
    extras: &[
        (
            "sec-ch-ua",
            "\"Not_A Brand\";v=\"8\", \"Chromium\";v=\"120\", \"Microsoft Edge\";v=\"120\"",
        ),
        ("sec-ch-ua-mobile", "?0"),
        ("sec-ch-ua-platform", "\"Windows\""),
        FETCH_METADATA[0],
        FETCH_METADATA[1],
        FETCH_METADATA[2],
        FETCH_METADATA[3],
    ],
};

const REFERERS: &[&str] = &[
    "https://www.google.com/",
    "https://www.bing.com/",
    "https://duckduckgo.com/",
    "https://www.google.co.uk/",
    "https://search.yahoo.com/",
];

const CACHE_CONTROLS: &[&str] = &["no-cache", "max-age=0", "no-cache, no-store, must-revalidate"];

/// Header set for exactly one request attempt.
#[derive(Debug, Clone)]
pub struct RequestProfile {
    family: BrowserFamily,
    headers: BTreeMap<String, String>,
}

impl RequestProfile {
    /// Fresh profile from a uniformly chosen browser family.
    pub fn random() -> Self {
        Self::random_with(&mut rand::thread_rng())
    }

    pub fn random_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let family = BrowserFamily::random(rng);
        Self::for_family(family, rng)
    }

    /// Build from one family's template, then toggle each optional header independently.
    pub fn for_family<R: Rng + ?Sized>(family: BrowserFamily, rng: &mut R) -> Self {
        let template = family.template();
        let mut headers = BTreeMap::new();

        let pick = |options: &'static [&'static str], rng: &mut R| -> String {
            options.choose(rng).copied().unwrap_or_default().to_string()
        };

        headers.insert("User-Agent".to_string(), pick(template.user_agents, rng));
        headers.insert("Accept".to_string(), template.accept.to_string());
        headers.insert(
            "Accept-Encoding".to_string(),
            template.accept_encoding.to_string(),
        );
        headers.insert(
            "Accept-Language".to_string(),
            pick(template.accept_languages, rng),
        );
        headers.insert("Connection".to_string(), "keep-alive".to_string());
        headers.insert("Upgrade-Insecure-Requests".to_string(), "1".to_string());

        for (name, value) in template.extras {
            headers.insert((*name).to_string(), (*value).to_string());
        }

        if rng.gen_bool(0.6) {
            headers.insert("Referer".to_string(), pick(REFERERS, rng));
        }
        if rng.gen_bool(0.5) {
            headers.insert("Cache-Control".to_string(), pick(CACHE_CONTROLS, rng));
        }
        if rng.gen_bool(0.7) {
            headers.insert("DNT".to_string(), "1".to_string());
        }
        if rng.gen_bool(0.3) {
            headers.insert("Pragma".to_string(), "no-cache".to_string());
        }

        Self { family, headers }
    }

    pub fn family(&self) -> BrowserFamily {
        self.family
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                map.insert(name, value);
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_profiles_never_mix_families() {
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..500 {
            let profile = RequestProfile::random_with(&mut rng);
            let ua = profile.get("user-agent").unwrap();

            match profile.family() {
                BrowserFamily::Chrome => {
                    assert!(ua.contains("Chrome/") && !ua.contains("Edg/"));
                    assert!(profile.get("sec-ch-ua").unwrap().contains("Google Chrome"));
                    assert!(profile.get("Sec-Fetch-Mode").is_some());
                }
                BrowserFamily::Edge => {
                    assert!(ua.contains("Edg/"));
                    assert!(profile.get("sec-ch-ua").unwrap().contains("Microsoft Edge"));
                }
                BrowserFamily::Firefox => {
                    assert!(ua.contains("Firefox/"));
                    assert!(profile.get("sec-ch-ua").is_none());
                    assert!(profile.get("Sec-Fetch-Mode").is_none());
                }
                BrowserFamily::Safari => {
                    assert!(ua.contains("Safari/") && !ua.contains("Chrome/"));
                    assert!(profile.get("sec-ch-ua").is_none());
                    assert!(profile.get("TE").is_none());
                }
            }
        }
    }

    #[test]
    fn test_every_family_gets_picked() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.insert(RequestProfile::random_with(&mut rng).family());
        }
        assert_eq!(seen.len(), BrowserFamily::ALL.len());
    }

    #[test]
    fn test_optional_headers_roughly_follow_their_odds() {
        let mut rng = StdRng::seed_from_u64(1234);
        let runs = 2000;
        let mut referer = 0;
        let mut dnt = 0;
        let mut pragma = 0;

        for _ in 0..runs {
            let profile = RequestProfile::for_family(BrowserFamily::Firefox, &mut rng);
            referer += profile.get("Referer").is_some() as usize;
            dnt += profile.get("DNT").is_some() as usize;
            pragma += profile.get("Pragma").is_some() as usize;
        }

        let ratio = |count: usize| count as f64 / runs as f64;
        assert!((ratio(referer) - 0.6).abs() < 0.06);
        assert!((ratio(dnt) - 0.7).abs() < 0.06);
        assert!((ratio(pragma) - 0.3).abs() < 0.06);
    }

    #[test]
    fn test_header_map_conversion_keeps_required_headers() {
        let mut rng = StdRng::seed_from_u64(3);
        let profile = RequestProfile::for_family(BrowserFamily::Chrome, &mut rng);
        let map = profile.to_header_map();

        assert!(map.contains_key("user-agent"));
        assert!(map.contains_key("accept"));
        assert!(map.contains_key("accept-language"));
        assert!(map.contains_key("sec-fetch-dest"));
        assert_eq!(map.len(), profile.headers().len());
    }
}
