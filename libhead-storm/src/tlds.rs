use reqwest::Client;
use std::collections::HashSet;
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

const IANA_TLD_LIST_URL: &str = "https://data.iana.org/TLD/tlds-alpha-by-domain.txt";

#[derive(Debug, Error)]
pub enum TldError {
    #[error("Failed to read TLD list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to fetch TLD list: {0}")]
    FetchError(#[from] reqwest::Error),
    #[error("TLD list is empty")]
    Empty,
}

/// Where the TLD list comes from: a newline-delimited file or the IANA registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TldSource {
    File(PathBuf),
    Iana,
}

impl TldSource {
    pub async fn load(&self, client: &Client) -> Result<Vec<String>, TldError> {
        let tlds = match self {
            TldSource::File(path) => load_tld_file(path)?,
            TldSource::Iana => fetch_iana_tlds(client).await?,
        };

        if tlds.is_empty() {
            return Err(TldError::Empty);
        }
        Ok(tlds)
    }
}

impl FromStr for TldSource {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("iana") {
            Ok(TldSource::Iana)
        } else {
            Ok(TldSource::File(PathBuf::from(s)))
        }
    }
}

impl std::fmt::Display for TldSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TldSource::File(path) => write!(f, "{}", path.display()),
            TldSource::Iana => f.write_str(IANA_TLD_LIST_URL),
        }
    }
}

pub fn load_tld_file(path: &Path) -> Result<Vec<String>, TldError> {
    let content = std::fs::read_to_string(path).map_err(|source| TldError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_tld_list(&content))
}

pub fn parse_tld_list(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();

    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.trim_start_matches('.').to_lowercase())
        .filter(|tld| !tld.is_empty())
        .filter(|tld| seen.insert(tld.clone()))
        .collect()
}

pub async fn fetch_iana_tlds(client: &Client) -> Result<Vec<String>, TldError> {
    let response = client
        .get(IANA_TLD_LIST_URL)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    let tlds = parse_tld_list(&response)
        .into_iter()
        .filter(|tld| !tld.starts_with("xn--"))
        .collect();

    Ok(tlds)
}

/// Drops `never` entries and puts missing `always` entries first, keeping their order.
pub fn apply_tld_filters(mut tlds: Vec<String>, always: &[String], never: &[String]) -> Vec<String> {
    let never_set: HashSet<_> = never.iter().map(|s| s.to_lowercase()).collect();

    tlds.retain(|tld| !never_set.contains(&tld.to_lowercase()));

    for always_tld in always.iter().rev() {
        let lower = always_tld.trim().trim_start_matches('.').to_lowercase();
        if lower.is_empty() || never_set.contains(&lower) {
            continue;
        }
        if !tlds.iter().any(|t| t.eq_ignore_ascii_case(&lower)) {
            tlds.insert(0, lower);
        }
    }

    tlds
}

pub fn expand_tlds<'a>(name: &'a str, tlds: &'a [String]) -> impl Iterator<Item = String> + 'a {
    tlds.iter().map(move |tld| format!("{}.{}", name, tld))
}

pub fn probe_url(domain: &str) -> String {
    format!("http://{}", domain)
}
