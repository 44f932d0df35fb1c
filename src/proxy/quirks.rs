use url::Url;

use crate::config::{QuirkRule, RedirectQuirkConfig};

/// Table of known upstream redirect oddities applied to every redirect target.
#[derive(Debug, Clone, Default)]
pub struct RedirectQuirks {
    entries: Vec<RedirectQuirkConfig>,
}

impl RedirectQuirks {
    pub fn new(entries: Vec<RedirectQuirkConfig>) -> Self {
        Self { entries }
    }

    /// Rewrites `url` with the first matching entry, if any.
    pub fn apply(&self, mut url: Url) -> Url {
        for quirk in &self.entries {
            if !host_matches(&url, &quirk.host) {
                continue;
            }
            let Some(rest) = url.path().strip_prefix(quirk.path_prefix.as_str()) else {
                continue;
            };
            match quirk.rule {
                QuirkRule::AppendTrailingSlash => {
                    // Single segment, no slash yet, nothing after the path
                    if rest.is_empty()
                        || rest.contains('/')
                        || url.query().is_some()
                        || url.fragment().is_some()
                    {
                        continue;
                    }
                    let path = format!("{}/", url.path());
                    url.set_path(&path);
                    tracing::debug!(url = %url, host = %quirk.host, "applied redirect quirk");
                    return url;
                }
            }
        }
        url
    }
}

fn host_matches(url: &Url, host: &str) -> bool {
    url.host_str()
        .is_some_and(|candidate| candidate.eq_ignore_ascii_case(host))
}
