// Media-link validation against a configurable host allow-list.

/// Decides whether submitted content is an accepted media link.
pub trait LinkValidator: Send + Sync {
    fn is_accepted_link(&self, content: &str) -> bool;
}

pub const DEFAULT_LINK_HOSTS: &[&str] = &["youtube.com", "youtu.be", "spotify.com", "soundcloud.com"];

/// Accepts `http(s)` links whose host is an allowed host or one of its subdomains.
#[derive(Debug, Clone)]
pub struct LinkPolicy {
    hosts: Vec<String>,
}

impl LinkPolicy {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts = hosts
            .into_iter()
            .map(|h| h.as_ref().trim().trim_start_matches("www.").to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        Self { hosts }
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    fn allows_host(&self, host: &str) -> bool {
        self.hosts.iter().any(|allowed| {
            host == allowed
                || host
                    .strip_suffix(allowed.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_LINK_HOSTS)
    }
}

impl LinkValidator for LinkPolicy {
    fn is_accepted_link(&self, content: &str) -> bool {
        host_of(content).is_some_and(|host| self.allows_host(&host))
    }
}

/// Extract the lowercased host of an `http`/`https` link.
fn host_of(link: &str) -> Option<String> {
    let link = link.trim();
    if link.is_empty() || link.contains(char::is_whitespace) {
        return None;
    }
    let lower = link.to_ascii_lowercase();
    let rest = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))?;

    let authority = rest.split(['/', '?', '#']).next()?;
    // Userinfo makes the apparent host ambiguous (`youtube.com@evil.example`).
    if authority.contains('@') {
        return None;
    }
    let host = authority.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_hosts_accept_music_links() {
        let policy = LinkPolicy::default();
        assert!(policy.is_accepted_link("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(policy.is_accepted_link("https://youtu.be/dQw4w9WgXcQ"));
        assert!(policy.is_accepted_link("https://open.spotify.com/track/abc"));
        assert!(policy.is_accepted_link("http://soundcloud.com/artist/track"));
        assert!(policy.is_accepted_link("  HTTPS://YOUTU.BE/xyz  "));
    }

    #[test]
    fn test_rejects_other_hosts() {
        let policy = LinkPolicy::default();
        assert!(!policy.is_accepted_link("https://example.com/song.mp3"));
        assert!(!policy.is_accepted_link("https://notyoutube.com/watch"));
        assert!(!policy.is_accepted_link("https://example.com/?q=youtube.com"));
        assert!(!policy.is_accepted_link("https://youtube.com@evil.example/"));
    }

    #[test]
    fn test_rejects_non_links() {
        let policy = LinkPolicy::default();
        assert!(!policy.is_accepted_link(""));
        assert!(!policy.is_accepted_link("youtube.com/watch?v=1"));
        assert!(!policy.is_accepted_link("ftp://youtube.com/x"));
        assert!(!policy.is_accepted_link("https://youtube.com/watch this"));
    }

    #[test]
    fn test_custom_allow_list() {
        let policy = LinkPolicy::new(["bandcamp.com", " www.Tidal.com "]);
        assert_eq!(policy.hosts(), &["bandcamp.com", "tidal.com"]);
        assert!(policy.is_accepted_link("https://artist.bandcamp.com/track/x"));
        assert!(policy.is_accepted_link("https://tidal.com:443/track/1"));
        assert!(!policy.is_accepted_link("https://youtube.com/watch?v=1"));
    }
}
