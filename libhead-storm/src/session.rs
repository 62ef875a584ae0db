//! One client connection cycling through query rounds.
//!
//! A client sends `{"site-name": "<label>"}`; every valid outcome of the
//! resulting round is sent back as its rendered display string, in the order
//! the probes finish. Nothing marks the end of a round. Anything that is not
//! such a JSON object ends the session.

use crate::prober::{Prober, Round};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

pub const SITE_NAME_FIELD: &str = "site-name";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Malformed query: {0}")]
    Protocol(String),
    #[error("Failed to deliver result: {0}")]
    Send(String),
    #[error("Connection error: {0}")]
    Connection(String),
}

/// What to do with a label identical to the one handled just before it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatPolicy {
    #[default]
    Skip,
    Rerun,
}

impl FromStr for RepeatPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(RepeatPolicy::Skip),
            "rerun" => Ok(RepeatPolicy::Rerun),
            other => Err(format!("unknown repeat policy '{}', expected 'skip' or 'rerun'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingRequest,
    Probing,
    Closed,
}

pub fn parse_query(text: &str) -> Result<String, SessionError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| SessionError::Protocol(e.to_string()))?;

    value
        .get(SITE_NAME_FIELD)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SessionError::Protocol(format!("missing string field '{}'", SITE_NAME_FIELD)))
}

pub struct Session {
    prober: Prober,
    policy: RepeatPolicy,
    last_label: Option<String>,
    state: SessionState,
}

impl Session {
    pub fn new(prober: Prober, policy: RepeatPolicy) -> Self {
        Self {
            prober,
            policy,
            last_label: None,
            state: SessionState::AwaitingRequest,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Decodes one client message and starts its round. `Ok(None)` means the
    /// label repeats the previous one and the repeat policy says to skip it.
    pub fn accept(&mut self, text: &str) -> Result<Option<Round>, SessionError> {
        let label = match parse_query(text) {
            Ok(label) => label,
            Err(e) => {
                self.state = SessionState::Closed;
                return Err(e);
            }
        };

        if self.policy == RepeatPolicy::Skip && self.last_label.as_deref() == Some(label.as_str()) {
            debug!(label = %label, "repeated label skipped");
            return Ok(None);
        }

        let round = self.prober.run(&label);
        self.last_label = Some(label);
        self.state = SessionState::Probing;
        Ok(Some(round))
    }

    /// Serves the connection until the client goes away or misbehaves.
    pub async fn run<S, E, K>(&mut self, mut incoming: S, mut outgoing: K) -> Result<(), SessionError>
    where
        S: Stream<Item = Result<String, E>> + Unpin,
        E: Display,
        K: Sink<String> + Unpin,
        K::Error: Display,
    {
        let result = self.serve(&mut incoming, &mut outgoing).await;
        self.state = SessionState::Closed;
        let _ = outgoing.close().await;
        result
    }

    async fn serve<S, E, K>(&mut self, incoming: &mut S, outgoing: &mut K) -> Result<(), SessionError>
    where
        S: Stream<Item = Result<String, E>> + Unpin,
        E: Display,
        K: Sink<String> + Unpin,
        K::Error: Display,
    {
        loop {
            self.state = SessionState::AwaitingRequest;

            let text = match incoming.next().await {
                Some(Ok(text)) => text,
                Some(Err(e)) => return Err(SessionError::Connection(e.to_string())),
                None => return Ok(()),
            };

            if let Some(round) = self.accept(&text)? {
                drain(round, outgoing).await?;
            }
        }
    }
}

async fn drain<K>(mut round: Round, outgoing: &mut K) -> Result<(), SessionError>
where
    K: Sink<String> + Unpin,
    K::Error: Display,
{
    let mut forwarded = 0usize;

    while let Some(outcome) = round.next().await {
        if outcome.is_valid() {
            outgoing
                .send(outcome.url)
                .await
                .map_err(|e| SessionError::Send(e.to_string()))?;
            forwarded += 1;
        }
    }

    info!(
        label = %round.label(),
        probed = round.expected(),
        live = forwarded,
        "round complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prober::tests::{prober_with, MockTransport};
    use crate::render::LinkTemplate;
    use futures::channel::mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    type Incoming = mpsc::UnboundedSender<Result<String, String>>;

    fn query(label: &str) -> Result<String, String> {
        Ok(serde_json::json!({ "site-name": label }).to_string())
    }

    fn link(url: &str) -> String {
        LinkTemplate::builtin().render(url)
    }

    async fn serve(session: &mut Session, messages: Vec<Result<String, String>>) -> (Result<(), SessionError>, Vec<String>) {
        let (tx, rx): (Incoming, _) = mpsc::unbounded();
        for message in messages {
            tx.unbounded_send(message).unwrap();
        }
        drop(tx);

        let (out_tx, out_rx) = mpsc::unbounded::<String>();
        let result = session.run(rx, out_tx).await;
        (result, out_rx.collect().await)
    }

    #[test]
    fn parse_query_accepts_site_name() {
        assert_eq!(parse_query(r#"{"site-name":"example"}"#).unwrap(), "example");
        assert_eq!(parse_query(r#"{"site-name":"","extra":1}"#).unwrap(), "");
    }

    #[test]
    fn parse_query_rejects_malformed_input() {
        for bad in ["not json", "[\"example\"]", r#"{"site":"example"}"#, r#"{"site-name":42}"#, "null"] {
            assert!(matches!(parse_query(bad), Err(SessionError::Protocol(_))), "{}", bad);
        }
    }

    #[test]
    fn repeat_policy_from_str() {
        assert_eq!("skip".parse::<RepeatPolicy>().unwrap(), RepeatPolicy::Skip);
        assert_eq!("ReRun".parse::<RepeatPolicy>().unwrap(), RepeatPolicy::Rerun);
        assert!("sometimes".parse::<RepeatPolicy>().is_err());
    }

    #[tokio::test]
    async fn forwards_only_live_results() {
        let transport = Arc::new(
            MockTransport::new()
                .status("http://example.com", 200)
                .error(
                    "http://example.io",
                    crate::TransportError::Connect("connection refused".to_string()),
                ),
        );
        let mut session = Session::new(prober_with(transport, &["com", "io"]), RepeatPolicy::Skip);

        let (result, sent) = serve(&mut session, vec![query("example")]).await;

        assert!(result.is_ok());
        assert_eq!(sent, vec![link("http://example.com")]);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn empty_label_sends_nothing() {
        let transport = Arc::new(MockTransport::new().status("http://.com", 200));
        let mut session = Session::new(prober_with(Arc::clone(&transport), &["com"]), RepeatPolicy::Rerun);

        let (result, sent) = serve(&mut session, vec![query("")]).await;

        assert!(result.is_ok());
        assert!(sent.is_empty());
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn malformed_message_closes_session() {
        let transport = Arc::new(MockTransport::new().status("http://ok.com", 200));
        let mut session = Session::new(prober_with(Arc::clone(&transport), &["com"]), RepeatPolicy::Skip);

        let messages = vec![Ok("{not json".to_string()), query("ok")];
        let (result, sent) = serve(&mut session, messages).await;

        assert!(matches!(result, Err(SessionError::Protocol(_))));
        assert!(sent.is_empty());
        assert_eq!(transport.calls(), 0);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn missing_field_closes_session_after_earlier_rounds() {
        let transport = Arc::new(MockTransport::new().status("http://ok.com", 200));
        let mut session = Session::new(prober_with(transport, &["com"]), RepeatPolicy::Skip);

        let messages = vec![query("ok"), Ok(r#"{"name":"ok"}"#.to_string())];
        let (result, sent) = serve(&mut session, messages).await;

        assert!(matches!(result, Err(SessionError::Protocol(_))));
        assert_eq!(sent, vec![link("http://ok.com")]);
    }

    #[tokio::test]
    async fn one_bad_session_leaves_others_alone() {
        let transport = Arc::new(MockTransport::new().status("http://ok.com", 200));
        let prober = prober_with(transport, &["com"]);
        let mut broken = Session::new(prober.clone(), RepeatPolicy::Skip);
        let mut healthy = Session::new(prober, RepeatPolicy::Skip);

        let (bad, good) = tokio::join!(
            serve(&mut broken, vec![Ok("garbage".to_string())]),
            serve(&mut healthy, vec![query("ok")]),
        );

        assert!(bad.0.is_err());
        assert!(good.0.is_ok());
        assert_eq!(good.1, vec![link("http://ok.com")]);
    }

    #[tokio::test]
    async fn skip_policy_ignores_immediate_repeat() {
        let transport = Arc::new(MockTransport::new().status("http://ok.com", 200));
        let prober = prober_with(transport, &["com"]);
        let mut session = Session::new(prober, RepeatPolicy::Skip);

        let (_, sent) = serve(&mut session, vec![query("ok"), query("ok"), query("other"), query("ok")]).await;

        assert_eq!(sent, vec![link("http://ok.com"), link("http://ok.com")]);
    }

    #[tokio::test]
    async fn rerun_policy_repeats_rounds() {
        let transport = Arc::new(MockTransport::new().status("http://ok.com", 200));
        let prober = prober_with(Arc::clone(&transport), &["com"]);
        let mut session = Session::new(prober, RepeatPolicy::Rerun);

        let (_, sent) = serve(&mut session, vec![query("ok"), query("ok")]).await;

        assert_eq!(sent.len(), 2);
        // second round is answered by the verdict cache
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn accept_reports_round_size() {
        let transport = Arc::new(MockTransport::new());
        let mut session = Session::new(prober_with(transport, &["com", "io", "net"]), RepeatPolicy::Skip);

        let round = session.accept(&query("x").unwrap()).unwrap().unwrap();
        assert_eq!(round.expected(), 3);
        assert_eq!(session.state(), SessionState::Probing);
        assert!(session.accept(&query("x").unwrap()).unwrap().is_none());
    }

    #[tokio::test]
    async fn connection_error_ends_session() {
        let transport = Arc::new(MockTransport::new());
        let mut session = Session::new(prober_with(transport, &["com"]), RepeatPolicy::Skip);

        let (result, _) = serve(&mut session, vec![Err("reset by peer".to_string())]).await;
        assert!(matches!(result, Err(SessionError::Connection(_))));
    }

    #[tokio::test]
    async fn closed_client_stops_the_round() {
        let transport = Arc::new(
            MockTransport::new()
                .status("http://gone.com", 200)
                .status("http://gone.io", 200)
                .delay("http://gone.io", Duration::from_millis(100)),
        );
        let mut session = Session::new(prober_with(transport, &["com", "io"]), RepeatPolicy::Skip);

        let (tx, rx) = mpsc::unbounded::<Result<String, String>>();
        tx.unbounded_send(query("gone")).unwrap();
        let (out_tx, out_rx) = mpsc::unbounded::<String>();
        drop(out_rx);

        let result = session.run(rx, out_tx).await;
        assert!(matches!(result, Err(SessionError::Send(_))));
    }
}
