use std::hash::{Hash, Hasher};

/// Fixed pool of current desktop browser user agents. Rotated per request so
/// no single UA accumulates an unusual request pattern.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0) Gecko/20100101 Firefox/127.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
];

/// Pick a user agent for this request. Hash-based selection over the host and
/// clock keeps the pool rotating without an RNG dependency.
pub fn pick_user_agent(host: &str) -> &'static str {
    USER_AGENTS[(entropy(host) % USER_AGENTS.len() as u64) as usize]
}

/// Politeness delay before a page load, in milliseconds, uniform-ish over
/// [min, max].
pub fn politeness_delay_ms(host: &str, min_ms: u64, max_ms: u64) -> u64 {
    if max_ms <= min_ms {
        return min_ms;
    }
    min_ms + entropy(host) % (max_ms - min_ms)
}

fn entropy(seed: &str) -> u64 {
    let mut hasher = std::hash::DefaultHasher::new();
    seed.hash(&mut hasher);
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos()
        .hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_comes_from_pool() {
        let ua = pick_user_agent("example.com");
        assert!(USER_AGENTS.contains(&ua));
        assert!(!ua.to_lowercase().contains("headless"));
    }

    #[test]
    fn test_delay_within_bounds() {
        for _ in 0..50 {
            let delay = politeness_delay_ms("example.com", 500, 2000);
            assert!((500..2000).contains(&delay));
        }
    }

    #[test]
    fn test_delay_degenerate_range() {
        assert_eq!(politeness_delay_ms("example.com", 100, 100), 100);
    }
}
