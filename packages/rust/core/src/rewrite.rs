//! Media URL rewriting onto the image proxy.

use pixivbot_shared::ProxyConfig;

/// Rewrites CDN image URLs so chat clients can load them through a proxy domain.
#[derive(Debug, Clone)]
pub struct UrlRewriter {
    proxy_base: String,
    origins: Vec<String>,
}

impl UrlRewriter {
    pub fn new(proxy_base: &str, cdn_hosts: &[String]) -> Self {
        let origins = cdn_hosts
            .iter()
            .flat_map(|host| [format!("https://{host}"), format!("http://{host}")])
            .collect();
        Self {
            proxy_base: proxy_base.trim_end_matches('/').to_string(),
            origins,
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(&config.image_proxy_url, &config.cdn_hosts)
    }

    /// Rewrite `url`. Applying it twice gives the same result as once.
    pub fn rewrite(&self, url: &str) -> String {
        let mut url = url
            .replace("%2F", "/")
            .replace("%2f", "/")
            .replace("%3A", ":")
            .replace("%3a", ":");

        if url.starts_with("//") {
            url.insert_str(0, "https:");
        }

        if let Some(origin) = self.origins.iter().find(|origin| has_origin(&url, origin)) {
            url = format!("{}{}", self.proxy_base, &url[origin.len()..]);
        }

        url = url.replace(".webp", ".jpg");
        if !url.contains("ugoira") {
            url = url.replace(".gif", ".jpg");
        }

        url.replace(' ', "%20").replace('&', "%26").replace('?', "%3F")
    }
}

/// `url` starts with `origin` followed by a path or nothing.
fn has_origin(url: &str, origin: &str) -> bool {
    url.strip_prefix(origin)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewriter() -> UrlRewriter {
        UrlRewriter::from_config(&ProxyConfig::default())
    }

    #[test]
    fn cdn_origin_replaced() {
        let r = rewriter();
        assert_eq!(
            r.rewrite("https://i.pximg.net/img-original/img/2024/05/01/00/00/00/1_p0.png"),
            "https://i.pixiv.re/img-original/img/2024/05/01/00/00/00/1_p0.png"
        );
        assert_eq!(
            r.rewrite("http://pixiv.cat/1.jpg"),
            "https://i.pixiv.re/1.jpg"
        );
    }

    #[test]
    fn protocol_relative_and_encoded() {
        let r = rewriter();
        assert_eq!(r.rewrite("//i.pximg.net/a/b.jpg"), "https://i.pixiv.re/a/b.jpg");
        assert_eq!(
            r.rewrite("https%3A%2F%2Fi.pximg.net%2Fa%2Fb.jpg"),
            "https://i.pixiv.re/a/b.jpg"
        );
        assert_eq!(
            r.rewrite("%2F%2Fi.pximg.net%2Fimg-original%2Fa.png"),
            "https://i.pixiv.re/img-original/a.png"
        );
    }

    #[test]
    fn lookalike_host_untouched() {
        let r = rewriter();
        assert_eq!(
            r.rewrite("https://i.pximg.net.example.com/a.jpg"),
            "https://i.pximg.net.example.com/a.jpg"
        );
    }

    #[test]
    fn extension_rules() {
        let r = rewriter();
        assert_eq!(r.rewrite("https://i.pximg.net/a.webp"), "https://i.pixiv.re/a.jpg");
        assert_eq!(r.rewrite("https://i.pximg.net/a.gif"), "https://i.pixiv.re/a.jpg");
        assert_eq!(
            r.rewrite("https://i.pximg.net/img-zip-ugoira/a.gif"),
            "https://i.pixiv.re/img-zip-ugoira/a.gif"
        );
    }

    #[test]
    fn special_characters_encoded() {
        let r = rewriter();
        assert_eq!(
            r.rewrite("https://i.pximg.net/a b&c?.jpg"),
            "https://i.pixiv.re/a%20b%26c%3F.jpg"
        );
    }

    #[test]
    fn idempotent() {
        let r = rewriter();
        for url in [
            "https://i.pximg.net/img-original/img/1_p0.png",
            "//pixiv.cat/x y.webp",
            "https%3A%2F%2Fi.pximg.net%2Fa.gif",
            "%2F%2Fi.pximg.net%2Fimg-original%2Fa.png",
            "https://i.pximg.net/ugoira/a.gif?x=1&y=2",
            "https://other.example/a.png",
            "",
        ] {
            let once = r.rewrite(url);
            assert_eq!(r.rewrite(&once), once, "not idempotent for {url}");
        }
    }
}
