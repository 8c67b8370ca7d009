//! Newline-delimited JSON transport to the quiz server over TCP.
//!
//! One reader task owns the read half and routes every incoming line. Pings
//! and question streams carry ids the server echoes back: a pong completes
//! the waiter for its `seq`, and stream items reach the open stream only
//! when their `stream` id matches it.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gru_core::duration::serde_go;
use gru_core::{AnswerSubmission, Handshake, Question, QuestionEvent};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::server::{QuizServer, ServerError};

/// Buffered question stream items before the reader applies backpressure.
const STREAM_BUFFER: usize = 32;

/// Longest server line accepted. Longer lines are skipped.
const MAX_LINE: usize = 64 * 1024;

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage<'a> {
    Hello {
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<&'a str>,
    },
    Ping {
        seq: u64,
    },
    StartDemo {
        stream: u64,
        #[serde(with = "serde_go")]
        duration: Duration,
    },
    StartTest {
        stream: u64,
        #[serde(with = "serde_go")]
        duration: Duration,
    },
    Answer {
        question_id: &'a str,
        answers: &'a [String],
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Welcome {
        demo_duration: Option<String>,
        test_duration: Option<String>,
    },
    Pong {
        seq: u64,
        at: DateTime<Utc>,
    },
    Question {
        stream: u64,
        question: Question,
    },
    Score {
        stream: u64,
        total: f64,
        last: f64,
    },
    End {
        stream: u64,
    },
    Error {
        message: String,
        #[serde(default)]
        stream: Option<u64>,
    },
}

fn encode(msg: &ClientMessage<'_>) -> Result<Vec<u8>, ServerError> {
    let mut buf = serde_json::to_vec(msg).map_err(|e| ServerError::Protocol(e.to_string()))?;
    buf.push(b'\n');
    Ok(buf)
}

fn decode(line: &str) -> Result<ServerMessage, ServerError> {
    serde_json::from_str(line).map_err(|e| ServerError::Protocol(format!("{e}: {line}")))
}

type Pending<T> = oneshot::Sender<Result<T, ServerError>>;

struct OpenStream {
    id: u64,
    tx: mpsc::Sender<QuestionEvent>,
}

#[derive(Default)]
struct Routes {
    welcome: Option<Pending<Handshake>>,
    pongs: HashMap<u64, Pending<DateTime<Utc>>>,
    stream: Option<OpenStream>,
}

impl Routes {
    /// Register a pong waiter, dropping waiters whose ping was abandoned.
    fn await_pong(&mut self, seq: u64, tx: Pending<DateTime<Utc>>) {
        self.pongs.retain(|_, waiter| !waiter.is_closed());
        self.pongs.insert(seq, tx);
    }

    fn fail_pending(&mut self) {
        if let Some(tx) = self.welcome.take() {
            let _ = tx.send(Err(ServerError::Closed));
        }
        for (_, tx) in self.pongs.drain() {
            let _ = tx.send(Err(ServerError::Closed));
        }
        self.stream = None;
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Outcome of reading one line into the caller's buffer.
enum Line {
    Complete,
    TooLong,
    Eof,
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Line> {
    buf.clear();
    let limit = u64::try_from(MAX_LINE).unwrap_or(u64::MAX).saturating_add(1);
    let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(Line::Eof);
    }
    if buf.last() == Some(&b'\n') || buf.len() <= MAX_LINE {
        return Ok(Line::Complete);
    }
    // Drain the remainder up to and including the next newline.
    loop {
        let (consumed, done) = {
            let chunk = reader.fill_buf().await?;
            match chunk.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (chunk.len(), chunk.is_empty()),
            }
        };
        reader.consume(consumed);
        if done {
            return Ok(Line::TooLong);
        }
    }
}

async fn read_loop<R: AsyncRead + Unpin>(reader: R, routes: Arc<Mutex<Routes>>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        match read_line(&mut reader, &mut buf).await {
            Ok(Line::Complete) => {
                let line = String::from_utf8_lossy(&buf);
                if let Cow::Owned(_) = line {
                    warn!("server line is not valid UTF-8; decoding with replacements");
                }
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match decode(line) {
                    Ok(msg) => route(&routes, msg).await,
                    Err(e) => warn!(error = %e, "ignoring undecodable server line"),
                }
            }
            Ok(Line::TooLong) => warn!(max = MAX_LINE, "skipping oversized server line"),
            Ok(Line::Eof) => {
                info!("server closed the connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "read from server failed");
                break;
            }
        }
    }
    lock(&routes).fail_pending();
}

async fn route(routes: &Mutex<Routes>, msg: ServerMessage) {
    let (stream, event) = match msg {
        ServerMessage::Welcome {
            demo_duration,
            test_duration,
        } => {
            let pending = lock(routes).welcome.take();
            match pending {
                Some(tx) => {
                    let _ = tx.send(Ok(Handshake {
                        demo_duration,
                        test_duration,
                    }));
                }
                None => warn!("unexpected welcome from server"),
            }
            return;
        }
        ServerMessage::Pong { seq, at } => {
            let pending = lock(routes).pongs.remove(&seq);
            match pending {
                Some(tx) => {
                    if tx.send(Ok(at)).is_err() {
                        debug!(seq, "pong arrived after its ping was abandoned");
                    }
                }
                None => debug!(seq, "pong for no pending ping"),
            }
            return;
        }
        ServerMessage::Error { message, stream } => {
            let mut r = lock(routes);
            if let Some(tx) = r.welcome.take() {
                let _ = tx.send(Err(ServerError::Rejected(message)));
                return;
            }
            let current = r.stream.as_ref().map(|open| open.id);
            match (stream, current) {
                (Some(id), Some(open)) if id != open => {
                    debug!(stream = id, message = %message, "error for a replaced stream");
                }
                (_, Some(_)) => {
                    r.stream = None;
                    warn!(message = %message, "server aborted the question stream");
                }
                (_, None) => warn!(message = %message, "server reported an error"),
            }
            return;
        }
        ServerMessage::Question { stream, question } => (stream, QuestionEvent::Question(question)),
        ServerMessage::Score { stream, total, last } => (stream, QuestionEvent::Score { total, last }),
        ServerMessage::End { stream } => (stream, QuestionEvent::End),
    };

    // The end marker closes the stream after delivery.
    let tx = {
        let mut r = lock(routes);
        match &r.stream {
            Some(open) if open.id == stream => {
                let tx = open.tx.clone();
                if event == QuestionEvent::End {
                    r.stream = None;
                }
                Some(tx)
            }
            _ => None,
        }
    };
    match tx {
        Some(tx) => {
            if tx.send(event).await.is_err() {
                debug!(stream, "question stream receiver dropped");
            }
        }
        None => debug!(stream, "dropping item for a stream that is not open"),
    }
}

/// [`QuizServer`] over a single TCP connection.
pub struct TcpQuizServer {
    addr: String,
    token: Option<String>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    routes: Arc<Mutex<Routes>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    next_ping: AtomicU64,
    next_stream: AtomicU64,
    closed: AtomicBool,
}

impl TcpQuizServer {
    pub fn new(addr: impl Into<String>, token: Option<String>) -> Self {
        Self {
            addr: addr.into(),
            token,
            writer: tokio::sync::Mutex::new(None),
            routes: Arc::new(Mutex::new(Routes::default())),
            reader: Mutex::new(None),
            next_ping: AtomicU64::new(1),
            next_stream: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    async fn send(&self, msg: &ClientMessage<'_>) -> Result<(), ServerError> {
        let buf = encode(msg)?;
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ServerError::Closed)?;
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn open_stream(
        &self,
        request: impl FnOnce(u64) -> ClientMessage<'static>,
    ) -> Result<mpsc::Receiver<QuestionEvent>, ServerError> {
        let id = self.next_stream.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        // Replacing the sender ends any previous stream for its receiver.
        lock(&self.routes).stream = Some(OpenStream { id, tx });
        if let Err(e) = self.send(&request(id)).await {
            let mut r = lock(&self.routes);
            if r.stream.as_ref().is_some_and(|open| open.id == id) {
                r.stream = None;
            }
            return Err(e);
        }
        debug!(stream = id, "question stream opened");
        Ok(rx)
    }
}

#[async_trait]
impl QuizServer for TcpQuizServer {
    async fn connect(&self) -> Result<Handshake, ServerError> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();

        let (tx, rx) = oneshot::channel();
        lock(&self.routes).welcome = Some(tx);
        let handle = tokio::spawn(read_loop(read, Arc::clone(&self.routes)));
        if let Some(old) = lock(&self.reader).replace(handle) {
            old.abort();
        }
        *self.writer.lock().await = Some(write);

        self.send(&ClientMessage::Hello {
            token: self.token.as_deref(),
        })
        .await?;
        let handshake = rx.await.map_err(|_| ServerError::Closed)??;
        info!(addr = %self.addr, "connected to quiz server");
        Ok(handshake)
    }

    async fn ping(&self) -> Result<DateTime<Utc>, ServerError> {
        let seq = self.next_ping.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.routes).await_pong(seq, tx);
        if let Err(e) = self.send(&ClientMessage::Ping { seq }).await {
            lock(&self.routes).pongs.remove(&seq);
            return Err(e);
        }
        rx.await.map_err(|_| ServerError::Closed)?
    }

    async fn start_demo(&self, duration: Duration) -> Result<mpsc::Receiver<QuestionEvent>, ServerError> {
        self.open_stream(|stream| ClientMessage::StartDemo { stream, duration }).await
    }

    async fn start_test(&self, duration: Duration) -> Result<mpsc::Receiver<QuestionEvent>, ServerError> {
        self.open_stream(|stream| ClientMessage::StartTest { stream, duration }).await
    }

    async fn submit_answer(&self, submission: &AnswerSubmission) -> Result<(), ServerError> {
        self.send(&ClientMessage::Answer {
            question_id: &submission.question_id,
            answers: &submission.answer_ids,
        })
        .await
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "shutdown of write half failed");
            }
        }
        if let Some(handle) = lock(&self.reader).take() {
            handle.abort();
        }
        lock(&self.routes).fail_pending();
        info!(addr = %self.addr, "connection to quiz server closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn client_messages_are_tagged_lines() {
        let buf = encode(&ClientMessage::StartTest {
            stream: 2,
            duration: Duration::from_secs(3600),
        })
        .unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "{\"type\":\"start_test\",\"stream\":2,\"duration\":\"1h0m0s\"}\n"
        );

        let ping = encode(&ClientMessage::Ping { seq: 7 }).unwrap();
        assert_eq!(String::from_utf8(ping).unwrap(), "{\"type\":\"ping\",\"seq\":7}\n");

        let answers = vec!["a1".to_string()];
        let buf = encode(&ClientMessage::Answer {
            question_id: "q1",
            answers: &answers,
        })
        .unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "{\"type\":\"answer\",\"question_id\":\"q1\",\"answers\":[\"a1\"]}\n"
        );

        let hello = encode(&ClientMessage::Hello { token: None }).unwrap();
        assert_eq!(String::from_utf8(hello).unwrap(), "{\"type\":\"hello\"}\n");
    }

    #[test]
    fn welcome_durations_are_optional() {
        match decode(r#"{"type":"welcome","test_duration":"45m"}"#).unwrap() {
            ServerMessage::Welcome {
                demo_duration,
                test_duration,
            } => {
                assert_eq!(demo_duration, None);
                assert_eq!(test_duration.as_deref(), Some("45m"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn undecodable_line_is_a_protocol_error() {
        let err = decode("not json").unwrap_err();
        assert!(matches!(err, ServerError::Protocol(_)));
        assert!(matches!(
            decode(r#"{"type":"bogus"}"#).unwrap_err(),
            ServerError::Protocol(_)
        ));
    }

    /// Scripted server: answers each request line with the canned replies.
    async fn spawn_server(replies: Vec<(&'static str, Vec<&'static str>)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            for (expect, answer) in replies {
                let line = lines.next_line().await.unwrap().unwrap();
                assert!(line.contains(expect), "expected {expect} in {line}");
                for reply in answer {
                    write.write_all(reply.as_bytes()).await.unwrap();
                    write.write_all(b"\n").await.unwrap();
                }
            }
            // Hold the connection until the client hangs up.
            while let Ok(Some(_)) = lines.next_line().await {}
        });
        addr
    }

    #[tokio::test]
    async fn handshake_ping_and_stream() {
        let addr = spawn_server(vec![
            ("\"hello\"", vec![r#"{"type":"welcome","demo_duration":"1m"}"#]),
            ("\"ping\"", vec![r#"{"type":"pong","seq":1,"at":"2026-01-01T00:00:00Z"}"#]),
            (
                "\"start_demo\"",
                vec![
                    r#"{"type":"question","stream":1,"question":{"id":"q1","text":"?","options":[{"id":"o1","text":"yes"}]}}"#,
                    r#"{"type":"score","stream":1,"total":1.0,"last":1.0}"#,
                    r#"{"type":"end","stream":1}"#,
                ],
            ),
        ])
        .await;

        let server = TcpQuizServer::new(addr, Some("secret".into()));
        let handshake = server.connect().await.unwrap();
        assert_eq!(handshake.demo_duration.as_deref(), Some("1m"));

        let at = server.ping().await.unwrap();
        assert_eq!(at.to_rfc3339(), "2026-01-01T00:00:00+00:00");

        let mut rx = server.start_demo(Duration::from_secs(60)).await.unwrap();
        assert!(matches!(rx.recv().await, Some(QuestionEvent::Question(q)) if q.id == "q1"));
        assert_eq!(
            rx.recv().await,
            Some(QuestionEvent::Score {
                total: 1.0,
                last: 1.0
            })
        );
        assert_eq!(rx.recv().await, Some(QuestionEvent::End));
        assert_eq!(rx.recv().await, None);

        server.close().await;
        server.close().await;
        assert!(matches!(server.ping().await, Err(ServerError::Closed)));
    }

    #[tokio::test]
    async fn rejected_hello() {
        let addr = spawn_server(vec![(
            "\"hello\"",
            vec![r#"{"type":"error","message":"bad token"}"#],
        )])
        .await;
        let server = TcpQuizServer::new(addr, None);
        let err = server.connect().await.unwrap_err();
        assert!(matches!(err, ServerError::Rejected(m) if m == "bad token"));
        server.close().await;
    }

    #[tokio::test]
    async fn connect_refused_is_io_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let server = TcpQuizServer::new(addr, None);
        assert!(matches!(server.connect().await, Err(ServerError::Io(_))));
    }

    /// Accept one client and consume its hello with a bare welcome.
    async fn accept_after_welcome(
        listener: TcpListener,
    ) -> (tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>, OwnedWriteHalf) {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        let hello = lines.next_line().await.unwrap().unwrap();
        assert!(hello.contains("\"hello\""), "expected hello in {hello}");
        write.write_all(b"{\"type\":\"welcome\"}\n").await.unwrap();
        (lines, write)
    }

    fn request(line: &str) -> serde_json::Value {
        serde_json::from_str(line).unwrap()
    }

    #[tokio::test]
    async fn unanswered_ping_does_not_shift_later_pongs() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut lines, mut write) = accept_after_welcome(listener).await;
            let mut pings = 0;
            while let Ok(Some(line)) = lines.next_line().await {
                let msg = request(&line);
                assert_eq!(msg["type"], "ping");
                pings += 1;
                // The first pong is lost.
                if pings == 1 {
                    continue;
                }
                let pong = format!("{{\"type\":\"pong\",\"seq\":{},\"at\":\"2026-01-01T00:00:00Z\"}}\n", msg["seq"]);
                write.write_all(pong.as_bytes()).await.unwrap();
            }
        });

        let server = TcpQuizServer::new(addr, None);
        server.connect().await.unwrap();
        assert!(
            tokio::time::timeout(Duration::from_millis(200), server.ping())
                .await
                .is_err()
        );
        for _ in 0..3 {
            let pong = tokio::time::timeout(Duration::from_secs(5), server.ping())
                .await
                .expect("later pings are answered");
            assert!(pong.is_ok());
        }
        assert!(lock(&server.routes).pongs.is_empty());
        server.close().await;
    }

    #[tokio::test]
    async fn items_for_a_replaced_stream_are_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut lines, mut write) = accept_after_welcome(listener).await;
            let demo = request(&lines.next_line().await.unwrap().unwrap());
            assert_eq!(demo["type"], "start_demo");
            let test = request(&lines.next_line().await.unwrap().unwrap());
            assert_eq!(test["type"], "start_test");
            assert_ne!(demo["stream"], test["stream"]);
            let script = [
                // Still in flight from the demo when the test started.
                format!("{{\"type\":\"end\",\"stream\":{}}}", demo["stream"]),
                format!("{{\"type\":\"error\",\"stream\":{},\"message\":\"demo over\"}}", demo["stream"]),
                format!(
                    "{{\"type\":\"question\",\"stream\":{},\"question\":{{\"id\":\"t1\",\"text\":\"?\",\"options\":[]}}}}",
                    test["stream"]
                ),
                format!("{{\"type\":\"end\",\"stream\":{}}}", test["stream"]),
            ];
            for line in script {
                write.write_all(line.as_bytes()).await.unwrap();
                write.write_all(b"\n").await.unwrap();
            }
            while let Ok(Some(_)) = lines.next_line().await {}
        });

        let server = TcpQuizServer::new(addr, None);
        server.connect().await.unwrap();
        let demo = server.start_demo(Duration::from_secs(60)).await.unwrap();
        drop(demo);
        let mut test = server.start_test(Duration::from_secs(600)).await.unwrap();
        assert!(matches!(test.recv().await, Some(QuestionEvent::Question(q)) if q.id == "t1"));
        assert_eq!(test.recv().await, Some(QuestionEvent::End));
        assert_eq!(test.recv().await, None);
        server.close().await;
    }

    #[tokio::test]
    async fn bad_lines_are_skipped_without_dropping_the_connection() {
        let routes = Arc::new(Mutex::new(Routes::default()));
        let (tx, rx) = oneshot::channel();
        lock(&routes).await_pong(1, tx);

        let mut input = Vec::new();
        input.extend_from_slice(b"{\"type\":\"pong\",\"seq\":9,\"at\":\"\xff\xfe\"}\n");
        input.extend(std::iter::repeat_n(b'x', MAX_LINE + 10));
        input.push(b'\n');
        input.extend_from_slice(b"{\"type\":\"pong\",\"seq\":1,\"at\":\"2026-01-01T00:00:00Z\"}\n");

        read_loop(input.as_slice(), Arc::clone(&routes)).await;
        let at = rx.await.unwrap().unwrap();
        assert_eq!(at.to_rfc3339(), "2026-01-01T00:00:00+00:00");
    }
}
