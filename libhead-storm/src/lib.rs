mod cache;
mod http;
mod prober;
mod render;
pub mod session;
pub mod tlds;
mod transport;
mod types;

pub use cache::{CacheStats, VerdictCache};
pub use http::create_http_pool;
pub use prober::{is_live_status, Prober, Round};
pub use render::{LinkTemplate, Renderer, TemplateError};
pub use session::{RepeatPolicy, Session, SessionError, SessionState};
pub use tlds::{apply_tld_filters, expand_tlds, fetch_iana_tlds, TldError, TldSource};
pub use transport::{HttpTransport, Transport, TransportError};
pub use types::{Outcome, ProbeConfig};

use futures::StreamExt;

/// Probes `label` across `tlds` with a fresh prober; each call gets its own verdict cache.
pub async fn probe_label(label: &str, tlds: Vec<String>) -> Result<Vec<Outcome>, reqwest::Error> {
    let prober = Prober::new(&ProbeConfig::default(), tlds, LinkTemplate::builtin().into_renderer())?;
    Ok(prober.probe_stream(label).collect().await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_label_probes_nothing() {
        let outcomes = probe_label("", vec!["com".to_string(), "io".to_string()]).await.unwrap();
        assert!(outcomes.is_empty());
    }
}
