use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use std::collections::BTreeMap;
use tracing::debug;

/// Browser user agents rotated across requests
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
];

/// Mobile user agents, which the site tends to challenge less often
pub const MOBILE_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Android 14; Mobile; rv:109.0) Gecko/118.0 Firefox/118.0",
    "Mozilla/5.0 (Linux; Android 13; SM-G991B) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36",
];

pub const DEFAULT_ACCEPT_LANGUAGE: &str = "he-IL,he;q=0.9,en-US;q=0.8,en;q=0.7";

const BROWSER_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8";
const API_ACCEPT: &str = "application/json, text/plain, */*";

/// Set of request headers a strategy presents, with a rotated user agent
#[derive(Debug, Clone)]
pub struct HeaderProfile {
    user_agents: Vec<String>,
    accept: String,
    accept_language: String,
    extra: BTreeMap<String, String>,
}

impl HeaderProfile {
    /// Desktop browser navigation headers
    pub fn browser() -> Self {
        let mut extra = BTreeMap::new();
        for (name, value) in [
            ("dnt", "1"),
            ("upgrade-insecure-requests", "1"),
            ("sec-fetch-dest", "document"),
            ("sec-fetch-mode", "navigate"),
            ("sec-fetch-site", "none"),
            ("cache-control", "max-age=0"),
        ] {
            extra.insert(name.to_string(), value.to_string());
        }

        Self {
            user_agents: DEFAULT_USER_AGENTS.iter().map(|ua| ua.to_string()).collect(),
            accept: BROWSER_ACCEPT.to_string(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
            extra,
        }
    }

    pub fn mobile() -> Self {
        Self {
            user_agents: MOBILE_USER_AGENTS.iter().map(|ua| ua.to_string()).collect(),
            ..Self::browser()
        }
    }

    /// XHR-style headers for JSON endpoints
    pub fn api(referer: &str) -> Self {
        let mut extra = BTreeMap::new();
        extra.insert("x-requested-with".to_string(), "XMLHttpRequest".to_string());
        extra.insert("referer".to_string(), referer.to_string());

        Self {
            user_agents: DEFAULT_USER_AGENTS.iter().map(|ua| ua.to_string()).collect(),
            accept: API_ACCEPT.to_string(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
            extra,
        }
    }

    /// Replace the rotation pool; an empty list keeps the current pool
    pub fn with_user_agents(mut self, user_agents: &[String]) -> Self {
        if !user_agents.is_empty() {
            self.user_agents = user_agents.to_vec();
        }
        self
    }

    pub fn with_accept_language(mut self, accept_language: Option<&str>) -> Self {
        if let Some(lang) = accept_language {
            self.accept_language = lang.to_string();
        }
        self
    }

    pub fn accept_language(&self) -> &str {
        &self.accept_language
    }

    /// Pick the next user agent at random
    pub fn pick_user_agent(&self) -> &str {
        self.user_agents
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or(DEFAULT_USER_AGENTS[0])
    }

    /// Headers for one request; the user agent is drawn fresh each call
    pub fn build(&self) -> HeaderMap {
        let user_agent = self.pick_user_agent();
        let mut headers = HeaderMap::new();

        insert(&mut headers, USER_AGENT, user_agent);
        insert(&mut headers, ACCEPT, &self.accept);
        insert(&mut headers, ACCEPT_LANGUAGE, &self.accept_language);

        if let Some(hints) = client_hints(user_agent) {
            for (name, value) in hints {
                if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
                    insert(&mut headers, name, &value);
                }
            }
        }

        for (name, value) in &self.extra {
            if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
                insert(&mut headers, name, value);
            }
        }

        debug!(user_agent, "built request headers");
        headers
    }

    /// Same headers as plain strings, for services that forward them
    pub fn build_map(&self) -> BTreeMap<String, String> {
        self.build()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect()
    }
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

/// Sec-CH-UA hints consistent with the chosen user agent; only Chromium sends them
fn client_hints(user_agent: &str) -> Option<Vec<(&'static str, String)>> {
    if !user_agent.contains("Chrome/") && !user_agent.contains("Chromium/") {
        return None;
    }
    let brand = if user_agent.contains("Chrome/") {
        r#""Not_A Brand";v="8", "Chromium";v="120", "Google Chrome";v="120""#
    } else {
        r#""Not_A Brand";v="8", "Chromium";v="120""#
    };

    let mobile = user_agent.contains("Mobile");
    let platform = if user_agent.contains("Android") {
        "\"Android\""
    } else if user_agent.contains("Macintosh") {
        "\"macOS\""
    } else if user_agent.contains("Linux") {
        "\"Linux\""
    } else {
        "\"Windows\""
    };

    Some(vec![
        ("sec-ch-ua", brand.to_string()),
        ("sec-ch-ua-mobile", if mobile { "?1" } else { "?0" }.to_string()),
        ("sec-ch-ua-platform", platform.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browser_profile_rotates_from_its_pool() {
        let profile = HeaderProfile::browser();
        let headers = profile.build();
        let ua = headers.get(USER_AGENT).unwrap().to_str().unwrap();
        assert!(DEFAULT_USER_AGENTS.contains(&ua));
        assert_eq!(headers.get(ACCEPT_LANGUAGE).unwrap(), DEFAULT_ACCEPT_LANGUAGE);
        assert_eq!(headers.get("sec-fetch-mode").unwrap(), "navigate");
    }

    #[test]
    fn configured_pool_and_language_override_defaults() {
        let profile = HeaderProfile::browser()
            .with_user_agents(&["custom-agent/1.0".to_string()])
            .with_accept_language(Some("en-US"));
        let headers = profile.build();
        assert_eq!(headers.get(USER_AGENT).unwrap(), "custom-agent/1.0");
        assert_eq!(headers.get(ACCEPT_LANGUAGE).unwrap(), "en-US");
    }

    #[test]
    fn firefox_sends_no_client_hints() {
        assert!(client_hints("Mozilla/5.0 (X11; rv:109.0) Gecko/20100101 Firefox/121.0").is_none());
        let hints = client_hints(MOBILE_USER_AGENTS[2]).unwrap();
        assert!(hints.contains(&("sec-ch-ua-mobile", "?1".to_string())));
        assert!(hints.contains(&("sec-ch-ua-platform", "\"Android\"".to_string())));
    }

    #[test]
    fn safari_sends_no_client_hints() {
        assert!(client_hints(MOBILE_USER_AGENTS[0]).is_none());
        assert!(client_hints(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_1) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15"
        )
        .is_none());
        assert!(client_hints(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) CriOS/120.0.6099.119 Mobile/15E148 Safari/604.1"
        )
        .is_none());
    }

    #[test]
    fn api_profile_asks_for_json() {
        let headers = HeaderProfile::api("https://www.yad2.co.il/").build();
        assert_eq!(headers.get(ACCEPT).unwrap(), API_ACCEPT);
        assert_eq!(headers.get("x-requested-with").unwrap(), "XMLHttpRequest");
    }
}
