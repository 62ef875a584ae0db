use crate::{
    cache::VerdictCache,
    render::Renderer,
    tlds::{expand_tlds, probe_url},
    transport::{HttpTransport, Transport},
    types::{Outcome, ProbeConfig},
};
use futures::stream::{self, Stream};
use std::{sync::Arc, time::Instant};
use tokio::sync::mpsc;
use tracing::debug;

pub fn is_live_status(status: u16) -> bool {
    (200..400).contains(&status)
}

/// Outcomes of one label fanned out over every TLD, in completion order.
pub struct Round {
    label: String,
    expected: usize,
    received: usize,
    outcomes: mpsc::UnboundedReceiver<Outcome>,
}

impl Round {
    fn empty(label: &str) -> Self {
        let (_, outcomes) = mpsc::unbounded_channel();
        Self {
            label: label.to_string(),
            expected: 0,
            received: 0,
            outcomes,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn remaining(&self) -> usize {
        self.expected - self.received
    }

    /// Waits for the next finished probe. Returns `None` once `expected`
    /// outcomes have been handed out.
    pub async fn next(&mut self) -> Option<Outcome> {
        if self.received >= self.expected {
            return None;
        }
        let outcome = self.outcomes.recv().await?;
        self.received += 1;
        Some(outcome)
    }
}

pub struct Prober {
    transport: Arc<dyn Transport>,
    cache: Arc<VerdictCache>,
    render: Renderer,
    tlds: Arc<[String]>,
}

impl Prober {
    pub fn new(config: &ProbeConfig, tlds: Vec<String>, render: Renderer) -> Result<Self, reqwest::Error> {
        let transport = HttpTransport::new(config.timeout)?;
        let cache = VerdictCache::new(config.cache_max_cost, config.negative_ttl);
        Ok(Self::with_parts(Arc::new(transport), Arc::new(cache), render, tlds))
    }

    pub fn with_parts(
        transport: Arc<dyn Transport>,
        cache: Arc<VerdictCache>,
        render: Renderer,
        tlds: Vec<String>,
    ) -> Self {
        Self {
            transport,
            cache,
            render,
            tlds: tlds.into(),
        }
    }

    pub fn cache(&self) -> &Arc<VerdictCache> {
        &self.cache
    }

    pub fn tlds(&self) -> &[String] {
        &self.tlds
    }

    pub async fn probe_one(&self, url: &str) -> Outcome {
        let display = (self.render)(url);

        if let Some(valid) = self.cache.get(url) {
            debug!(url = %url, valid, "verdict cache hit");
            return Outcome {
                url: display,
                probe_url: url.to_string(),
                valid,
            };
        }

        let start = Instant::now();
        let valid = match self.transport.head(url).await {
            Ok(status) => is_live_status(status),
            Err(e) => {
                debug!(url = %url, error = %e, "probe failed");
                false
            }
        };
        self.cache.set(url, valid);

        debug!(
            url = %url,
            valid,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "probed"
        );

        Outcome {
            url: display,
            probe_url: url.to_string(),
            valid,
        }
    }

    /// Spawns one probe per TLD for `label`. An empty label yields an empty round.
    ///
    /// Probes are not cancelled when the returned round is dropped; they run
    /// until their timeout and their results are discarded.
    pub fn run(&self, label: &str) -> Round {
        if label.is_empty() {
            return Round::empty(label);
        }

        let (tx, outcomes) = mpsc::unbounded_channel();
        let mut expected = 0;

        for domain in expand_tlds(label, &self.tlds) {
            let url = probe_url(&domain);
            let prober = self.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let outcome = prober.probe_one(&url).await;
                let _ = tx.send(outcome);
            });
            expected += 1;
        }

        debug!(label = %label, candidates = expected, "round started");

        Round {
            label: label.to_string(),
            expected,
            received: 0,
            outcomes,
        }
    }

    pub fn probe_stream(&self, label: &str) -> impl Stream<Item = Outcome> + Send + 'static {
        stream::unfold(self.run(label), |mut round| async move {
            let outcome = round.next().await?;
            Some((outcome, round))
        })
    }
}

impl Clone for Prober {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            cache: Arc::clone(&self.cache),
            render: Arc::clone(&self.render),
            tlds: Arc::clone(&self.tlds),
        }
    }
}
