//! Purpose: Public broker operations: publish, online listing, and event watch.
//! Exports: `Client`.
//! Role: Composes request building, transport, and response parsing per call.
//! Invariants: Identifier/cursor validation finishes before any network I/O.
//! Invariants: Every call opens, uses, and closes exactly one connection.
//! Invariants: Results and failures are returned per call; no shared error slot.
#![allow(clippy::result_large_err)]

use super::Config;
use super::transport::{Connection, Endpoint, TcpTransport, Transport};
use crate::core::error::Error;
use crate::core::lines::{OnlineCounts, WatchBatch, WatchEvent, parse_online_body, parse_watch_body};
use crate::core::namespace::Namespace;
use crate::core::request::{Envelope, Request, Targets};
use crate::core::response::read_body;
use serde::Serialize;

type ApiResult<T> = Result<T, Error>;

pub struct Client<T = TcpTransport> {
    config: Config,
    namespace: Namespace,
    transport: T,
}

impl Client<TcpTransport> {
    pub fn new(config: Config) -> ApiResult<Self> {
        let transport = TcpTransport::from_config(&config)?;
        Self::with_transport(config, transport)
    }
}

impl<T: Transport> Client<T> {
    pub fn with_transport(config: Config, transport: T) -> ApiResult<Self> {
        let namespace = config.validate()?;
        Ok(Self {
            config,
            namespace,
            transport,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends `payload` as JSON to every target.
    ///
    /// `visible_to` limits delivery to subscribers that also listen on at
    /// least one of those ids.
    pub fn publish<P>(
        &self,
        targets: impl Into<Targets>,
        payload: &P,
        visible_to: &[&str],
    ) -> ApiResult<()>
    where
        P: Serialize + ?Sized,
    {
        let request = Request::publish(&self.namespace, &targets.into(), payload, visible_to)?;
        self.execute(&request)?;
        Ok(())
    }

    /// Online ids (namespace stripped) with their approximate connection counters.
    pub fn list_online_with_counts(&self, prefixes: &[&str]) -> ApiResult<OnlineCounts> {
        let request = Request::online(&self.namespace, prefixes)?;
        let body = self.execute(&request)?;
        Ok(parse_online_body(&body, &self.namespace))
    }

    pub fn list_online(&self, prefixes: &[&str]) -> ApiResult<Vec<String>> {
        Ok(self.list_online_with_counts(prefixes)?.ids())
    }

    /// Subscriber online/offline events that happened after `from`.
    pub fn watch_events(
        &self,
        from: Option<&str>,
        prefixes: &[&str],
    ) -> ApiResult<Vec<WatchEvent>> {
        Ok(self.watch_batch(from, prefixes)?.events)
    }

    /// Like [`Client::watch_events`] but also returns the lines that could not be parsed.
    pub fn watch_batch(&self, from: Option<&str>, prefixes: &[&str]) -> ApiResult<WatchBatch> {
        let request = Request::watch(&self.namespace, from, prefixes)?;
        let body = self.execute(&request)?;
        Ok(parse_watch_body(&body, &self.namespace))
    }

    fn execute(&self, request: &Request) -> ApiResult<String> {
        let config = &self.config;
        let bytes = request.encode(&Envelope {
            host: &config.host,
            login: &config.login,
            password: &config.password,
            charset: config.charset,
        })?;
        let endpoint = Endpoint {
            host: &config.host,
            port: config.port,
            tls: config.uses_tls(),
            timeout: config.timeout,
        };
        tracing::debug!(
            host = endpoint.host,
            port = endpoint.port,
            kind = %request.kind(),
            bytes = bytes.len(),
            "sending broker request"
        );

        let mut conn = self.transport.open(&endpoint)?;
        conn.write_all(&bytes)?;
        conn.half_close_write()?;
        let raw = conn.read_all()?;
        conn.close()?;

        read_body(&raw, config.charset).map_err(|err| err.with_endpoint(&config.host, config.port))
    }
}

#[cfg(test)]
mod tests {
    use super::Client;
    use crate::api::Config;
    use crate::api::transport::{Connection, Endpoint, Transport};
    use crate::core::error::{Error, ErrorKind};
    use crate::core::request::Targets;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    struct SpyLog {
        opens: Vec<(String, u16, bool)>,
        written: Vec<u8>,
        half_closed: bool,
        closed: bool,
    }

    #[derive(Clone)]
    struct SpyTransport {
        log: Arc<Mutex<SpyLog>>,
        response: Vec<u8>,
        fail_open: bool,
    }

    impl SpyTransport {
        fn replying(response: &str) -> Self {
            Self {
                log: Arc::default(),
                response: response.as_bytes().to_vec(),
                fail_open: false,
            }
        }

        fn ok(body: &str) -> Self {
            Self::replying(&format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{body}",
                body.chars().count()
            ))
        }

        fn opens(&self) -> usize {
            self.log.lock().expect("log").opens.len()
        }

        fn written(&self) -> String {
            String::from_utf8(self.log.lock().expect("log").written.clone()).expect("utf8")
        }
    }

    struct SpyConnection {
        log: Arc<Mutex<SpyLog>>,
        response: Vec<u8>,
    }

    impl Transport for SpyTransport {
        type Connection = SpyConnection;

        fn open(&self, endpoint: &Endpoint<'_>) -> Result<SpyConnection, Error> {
            self.log.lock().expect("log").opens.push((
                endpoint.host.to_string(),
                endpoint.port,
                endpoint.tls,
            ));
            if self.fail_open {
                return Err(Error::new(ErrorKind::Connect)
                    .with_endpoint(endpoint.host, endpoint.port));
            }
            Ok(SpyConnection {
                log: self.log.clone(),
                response: self.response.clone(),
            })
        }
    }

    impl Connection for SpyConnection {
        fn write_all(&mut self, bytes: &[u8]) -> Result<(), Error> {
            self.log.lock().expect("log").written.extend_from_slice(bytes);
            Ok(())
        }

        fn half_close_write(&mut self) -> Result<(), Error> {
            self.log.lock().expect("log").half_closed = true;
            Ok(())
        }

        fn read_all(&mut self) -> Result<Vec<u8>, Error> {
            assert!(self.log.lock().expect("log").half_closed);
            Ok(std::mem::take(&mut self.response))
        }

        fn close(self) -> Result<(), Error> {
            self.log.lock().expect("log").closed = true;
            Ok(())
        }
    }

    fn client(config: Config, transport: SpyTransport) -> Client<SpyTransport> {
        Client::with_transport(config, transport).expect("client")
    }

    #[test]
    fn publish_sends_identifier_and_json_body() {
        let spy = SpyTransport::replying("");
        let client = client(Config::new(), spy.clone());
        client
            .publish("5", &json!({"msg": 1}), &[])
            .expect("publish");

        let written = spy.written();
        assert!(written.contains("X-Realplexor: identifier=5\r\n"));
        assert!(written.ends_with("\r\n\r\n{\"msg\":1}"));
        let log = spy.log.lock().expect("log");
        assert_eq!(log.opens, vec![("127.0.0.1".to_string(), 10010, false)]);
        assert!(log.closed);
    }

    #[test]
    fn publish_with_cursor() {
        let spy = SpyTransport::replying("");
        let client = client(Config::new(), spy.clone());
        client
            .publish(Targets::with_cursors([("5", 10)]), &json!({"msg": 1}), &[])
            .expect("publish");
        assert!(spy.written().contains("identifier=10:5\r\n"));
    }

    #[test]
    fn invalid_identifier_never_touches_network() {
        let spy = SpyTransport::replying("");
        let client = client(Config::new(), spy.clone());
        let err = client.publish("bad id", &1, &[]).expect_err("invalid");
        assert_eq!(err.kind(), ErrorKind::InvalidIdentifier);
        assert_eq!(spy.opens(), 0);
    }

    #[test]
    fn invalid_watch_position_never_touches_network() {
        let spy = SpyTransport::replying("");
        let client = client(Config::new(), spy.clone());
        let err = client.watch_events(Some("1;2"), &[]).expect_err("invalid");
        assert_eq!(err.kind(), ErrorKind::InvalidCursor);
        assert_eq!(spy.opens(), 0);
    }

    #[test]
    fn online_with_counts_strips_namespace() {
        let spy = SpyTransport::ok("ns_a 3\nns_b 1\n");
        let client = client(Config::new().with_namespace("ns_"), spy.clone());
        let counts = client.list_online_with_counts(&[]).expect("online");
        let pairs: Vec<_> = counts
            .iter()
            .map(|record| (record.id.clone(), record.counter.clone()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), "3".to_string()),
                ("b".to_string(), "1".to_string())
            ]
        );
        assert!(spy.written().ends_with("\r\n\r\nonline ns_\n"));
    }

    #[test]
    fn online_ids_preserve_order() {
        let spy = SpyTransport::ok("z 1\na 2\n");
        let client = client(Config::new(), spy);
        assert_eq!(
            client.list_online(&["z", "a"]).expect("online"),
            vec!["z".to_string(), "a".to_string()]
        );
    }

    #[test]
    fn empty_response_is_empty_result() {
        let client = client(Config::new(), SpyTransport::replying(""));
        assert!(client.list_online(&[]).expect("online").is_empty());
        assert!(client.watch_events(None, &[]).expect("watch").is_empty());
    }

    #[test]
    fn watch_events_parse_and_skip_malformed() {
        let spy = SpyTransport::ok("online ns_1.5:ns_foo\nbroken\noffline ns_2.0:ns_bar\n");
        let client = client(Config::new().with_namespace("ns_"), spy.clone());
        let batch = client.watch_batch(Some("1"), &[]).expect("watch");
        assert_eq!(batch.events.len(), 2);
        assert_eq!(batch.events[0].event, "online");
        assert_eq!(batch.events[0].pos, "1.5");
        assert_eq!(batch.events[0].id, "foo");
        assert_eq!(batch.events[1].event, "offline");
        assert_eq!(batch.events[1].pos, "2.0");
        assert_eq!(batch.events[1].id, "bar");
        assert_eq!(batch.malformed, vec!["broken".to_string()]);
        assert!(spy.written().ends_with("watch 1 ns_\n"));
    }

    #[test]
    fn non_200_response_fails() {
        let spy = SpyTransport::replying("HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n");
        let client = client(Config::new(), spy);
        let err = client.list_online(&[]).expect_err("404");
        assert_eq!(err.kind(), ErrorKind::RequestFailed);
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.endpoint(), Some("127.0.0.1:10010"));
    }

    #[test]
    fn truncated_response_fails() {
        let spy = SpyTransport::replying("HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nhello");
        let client = client(Config::new(), spy);
        let err = client.publish("a", &1, &[]).expect_err("truncated");
        assert_eq!(err.kind(), ErrorKind::TruncatedResponse);
    }

    #[test]
    fn connect_failure_propagates() {
        let mut spy = SpyTransport::replying("");
        spy.fail_open = true;
        let client = client(Config::new(), spy);
        let err = client.publish("a", &1, &[]).expect_err("connect");
        assert_eq!(err.kind(), ErrorKind::Connect);
    }

    #[test]
    fn tls_is_requested_on_port_443() {
        let spy = SpyTransport::replying("");
        let client = client(Config::new().with_port(443), spy.clone());
        client.publish("a", &1, &[]).expect("publish");
        assert!(spy.log.lock().expect("log").opens[0].2);
    }

    #[test]
    fn credentials_are_embedded() {
        let spy = SpyTransport::replying("");
        let client = client(
            Config::new().with_credentials("user", "pw").with_namespace("ns_"),
            spy.clone(),
        );
        client.publish("a", &1, &["b"]).expect("publish");
        assert!(spy.written().contains("identifier=user:pw@ns_a,*ns_b\r\n"));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = Client::with_transport(
            Config::new().with_namespace("bad ns"),
            SpyTransport::replying(""),
        )
        .err()
        .expect("invalid namespace");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
