//! The Jenkins server a session talks to, and how build references map onto it.

use std::fmt;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use url::Url;

/// Per-request timeout used when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Basic-auth pair. Jenkins accepts an API token in place of the password.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// The active server, handed to whoever needs it instead of living in a global.
#[derive(Debug, Clone)]
pub struct ServerContext {
    pub base_url: Option<Url>,
    pub credentials: Option<Credentials>,
    pub request_timeout: Duration,
}

impl Default for ServerContext {
    fn default() -> Self {
        Self {
            base_url: None,
            credentials: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Turns a user supplied build reference into the build's absolute URL.
///
/// Accepted forms:
/// - an absolute `http(s)` build URL; when a server is configured and the URL
///   points at a different origin (Jenkins often reports its own root URL), the
///   path is moved onto the configured server
/// - a path relative to the server, e.g. `job/app/42`
/// - `folder/app#42`, expanded to `job/folder/job/app/42/`
///
/// The result always ends with `/` so endpoint paths can be joined onto it.
pub fn resolve_build(base: Option<&Url>, reference: &str) -> Result<Url> {
    let reference = reference.trim();
    if reference.is_empty() {
        bail!("empty build reference");
    }

    if let Ok(url) = Url::parse(reference) {
        if url.scheme() != "http" && url.scheme() != "https" {
            bail!("unsupported URL scheme `{}` in `{reference}`", url.scheme());
        }
        let url = match base {
            Some(base) if base.origin() != url.origin() => rebase(base, &url),
            _ => url,
        };
        return Ok(directory(url));
    }

    let Some(base) = base else {
        bail!("relative build reference `{reference}` needs a server URL (--server or JENKINS_URL)");
    };

    let path = match reference.split_once('#') {
        Some((job, number)) => {
            let number: u64 = number
                .trim()
                .parse()
                .with_context(|| format!("invalid build number in `{reference}`"))?;
            let mut path = String::new();
            for name in job.split('/').filter(|s| !s.is_empty()) {
                path.push_str("job/");
                path.push_str(name);
                path.push('/');
            }
            if path.is_empty() {
                bail!("missing job name in `{reference}`");
            }
            format!("{path}{number}/")
        }
        None => reference.trim_start_matches('/').to_string(),
    };

    let url = directory(base.clone())
        .join(&path)
        .with_context(|| format!("cannot resolve `{reference}` against {base}"))?;
    Ok(directory(url))
}

/// Short display name for a build URL: `folder/app #42`.
pub fn build_label(url: &Url) -> String {
    let Some(segments) = url.path_segments() else {
        return url.to_string();
    };
    let mut names = Vec::new();
    let mut number = None;
    let mut segments = segments.filter(|s| !s.is_empty());
    while let Some(segment) = segments.next() {
        if segment == "job" {
            if let Some(name) = segments.next() {
                names.push(name.replace("%20", " "));
            }
        } else if segment.parse::<u64>().is_ok() {
            number = Some(segment.to_string());
        }
    }
    match (names.is_empty(), number) {
        (false, Some(n)) => format!("{} #{n}", names.join("/")),
        (false, None) => names.join("/"),
        (true, _) => url.to_string(),
    }
}

fn rebase(base: &Url, url: &Url) -> Url {
    let mut rebased = base.clone();
    rebased.set_path(url.path());
    rebased.set_query(None);
    rebased.set_fragment(None);
    rebased
}

fn directory(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://ci.example.com").unwrap()
    }

    #[test]
    fn absolute_url_gets_trailing_slash() {
        let url = resolve_build(None, "https://ci.example.com/job/app/42").unwrap();
        assert_eq!(url.as_str(), "https://ci.example.com/job/app/42/");
    }

    #[test]
    fn foreign_origin_is_rebased_onto_server() {
        let url = resolve_build(Some(&base()), "http://jenkins:8080/job/app/7/").unwrap();
        assert_eq!(url.as_str(), "https://ci.example.com/job/app/7/");
    }

    #[test]
    fn same_origin_is_left_alone() {
        let url = resolve_build(Some(&base()), "https://ci.example.com/job/app/7/?x=1").unwrap();
        assert_eq!(url.as_str(), "https://ci.example.com/job/app/7/?x=1");
    }

    #[test]
    fn relative_path_joins_server() {
        let base = Url::parse("https://ci.example.com/jenkins").unwrap();
        let url = resolve_build(Some(&base), "/job/app/3").unwrap();
        assert_eq!(url.as_str(), "https://ci.example.com/jenkins/job/app/3/");
    }

    #[test]
    fn shorthand_expands_folders() {
        let url = resolve_build(Some(&base()), "team/app#42").unwrap();
        assert_eq!(url.as_str(), "https://ci.example.com/job/team/job/app/42/");
    }

    #[test]
    fn shorthand_rejects_bad_number() {
        assert!(resolve_build(Some(&base()), "app#latest").is_err());
        assert!(resolve_build(Some(&base()), "#3").is_err());
    }

    #[test]
    fn relative_without_server_fails() {
        let err = resolve_build(None, "job/app/1").unwrap_err();
        assert!(err.to_string().contains("needs a server URL"));
    }

    #[test]
    fn non_http_scheme_fails() {
        assert!(resolve_build(None, "ftp://ci.example.com/job/app/1").is_err());
        assert!(resolve_build(None, "   ").is_err());
    }

    #[test]
    fn labels() {
        let url = Url::parse("https://ci.example.com/job/team/job/my%20app/42/").unwrap();
        assert_eq!(build_label(&url), "team/my app #42");
        let url = Url::parse("https://ci.example.com/job/app/").unwrap();
        assert_eq!(build_label(&url), "app");
        let url = Url::parse("https://ci.example.com/other/").unwrap();
        assert_eq!(build_label(&url), "https://ci.example.com/other/");
    }

    #[test]
    fn credentials_debug_hides_token() {
        let c = Credentials { username: "bob".into(), token: "s3cret".into() };
        let shown = format!("{c:?}");
        assert!(shown.contains("bob"));
        assert!(!shown.contains("s3cret"));
    }
}
