//! In-process servers the integration tests talk to.
#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use rfd_client::{ClientConfig, ClientConfigBuilder, Reply};
use rfd_codec::{encode_reply, ReplyDecoder};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Awaits `future`, panicking if it takes longer than [`TEST_TIMEOUT`].
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(TEST_TIMEOUT, future)
        .await
        .expect("operation timed out")
}

/// How a test server answers.
#[derive(Clone)]
pub enum Behavior {
    /// Small in-memory key-value store with MULTI/EXEC.
    Kv,
    /// Like `Kv`, but replies leave the socket one byte at a time.
    Trickle,
    /// Reads everything, answers nothing.
    BlackHole,
    /// Answers the n-th command with the n-th canned response.
    Scripted(Vec<&'static [u8]>),
    /// First connection closes after reading this many commands, unanswered.
    /// Later connections behave like `Kv`.
    DropFirstAfter(usize),
}

type Store = Arc<Mutex<HashMap<Bytes, Bytes>>>;

pub struct TestServer {
    pub addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(behavior: Behavior) -> TestServer {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let connections = Arc::new(AtomicUsize::new(0));
        let store: Store = Arc::default();

        let accepted = connections.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let index = accepted.fetch_add(1, Ordering::SeqCst);
                let behavior = behavior.clone();
                let store = store.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, behavior, store, index).await;
                });
            }
        });

        TestServer {
            addr,
            connections,
            task,
        }
    }

    /// Builder pointed at this server with test-friendly timeouts.
    pub fn config(&self) -> ClientConfigBuilder {
        ClientConfig::builder()
            .host("127.0.0.1")
            .port(self.addr.port())
            .connect_timeout_ms(1_000)
            .drain_timeout_ms(1_000)
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Serves one connection of any stream type until EOF.
pub async fn serve<S>(
    mut stream: S,
    behavior: Behavior,
    store: Store,
    index: usize,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut decoder = ReplyDecoder::new();
    let mut session = Session::default();
    let mut script = match &behavior {
        Behavior::Scripted(responses) => responses.clone().into_iter(),
        _ => Vec::new().into_iter(),
    };
    let mut seen = 0usize;

    loop {
        if stream.read_buf(decoder.buffer_mut()).await? == 0 {
            return Ok(());
        }
        let mut out = BytesMut::new();
        while let Some(frame) = decoder
            .next_reply()
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?
        {
            seen += 1;
            match &behavior {
                Behavior::BlackHole => {}
                Behavior::Scripted(_) => {
                    if let Some(response) = script.next() {
                        out.extend_from_slice(response);
                    }
                }
                Behavior::DropFirstAfter(limit) if index == 0 => {
                    if seen >= *limit {
                        return Ok(());
                    }
                }
                _ => encode_reply(&session.execute(&store, frame), &mut out),
            }
        }

        if matches!(behavior, Behavior::Trickle) {
            for byte in out.iter() {
                stream.write_all(std::slice::from_ref(byte)).await?;
                stream.flush().await?;
                tokio::task::yield_now().await;
            }
        } else if !out.is_empty() {
            stream.write_all(&out).await?;
        }
    }
}

#[derive(Default)]
struct Session {
    queued: Option<Vec<Vec<Bytes>>>,
    dirty: bool,
}

impl Session {
    fn execute(&mut self, store: &Store, frame: Reply) -> Reply {
        let args: Vec<Bytes> = match frame.into_array() {
            Some(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    Reply::Bulk(data) => Some(data),
                    _ => None,
                })
                .collect(),
            None => return Reply::error("ERR Protocol error: expected array"),
        };
        let name = command_name(&args);

        match (name.as_str(), self.queued.is_some()) {
            ("MULTI", true) => Reply::error("ERR MULTI calls can not be nested"),
            ("MULTI", false) => {
                self.queued = Some(Vec::new());
                self.dirty = false;
                Reply::simple("OK")
            }
            ("EXEC", false) => Reply::error("ERR EXEC without MULTI"),
            ("EXEC", true) => {
                let queued = self.queued.take().unwrap_or_default();
                if std::mem::take(&mut self.dirty) {
                    Reply::error("EXECABORT Transaction discarded because of previous errors.")
                } else {
                    Reply::Array(queued.iter().map(|command| run(store, command)).collect())
                }
            }
            ("DISCARD", true) => {
                self.queued = None;
                self.dirty = false;
                Reply::simple("OK")
            }
            (_, true) => {
                if !is_known(&name) {
                    self.dirty = true;
                    return unknown(&name);
                }
                if let Some(queued) = self.queued.as_mut() {
                    queued.push(args);
                }
                Reply::simple("QUEUED")
            }
            _ => run(store, &args),
        }
    }
}

fn command_name(args: &[Bytes]) -> String {
    args.first()
        .map(|name| String::from_utf8_lossy(name).to_ascii_uppercase())
        .unwrap_or_default()
}

fn is_known(name: &str) -> bool {
    matches!(name, "PING" | "ECHO" | "SET" | "GET" | "INCR" | "DEL")
}

fn unknown(name: &str) -> Reply {
    Reply::error(&format!("ERR unknown command '{}'", name))
}

fn wrong_arity(name: &str) -> Reply {
    Reply::error(&format!(
        "ERR wrong number of arguments for '{}' command",
        name.to_ascii_lowercase()
    ))
}

fn run(store: &Store, args: &[Bytes]) -> Reply {
    let name = command_name(args);
    match (name.as_str(), args.len()) {
        ("PING", 1) => Reply::simple("PONG"),
        ("PING", 2) | ("ECHO", 2) => Reply::Bulk(args[1].clone()),
        ("SET", 3) => {
            store.lock().insert(args[1].clone(), args[2].clone());
            Reply::simple("OK")
        }
        ("GET", 2) => match store.lock().get(&args[1]) {
            Some(value) => Reply::Bulk(value.clone()),
            None => Reply::Nil,
        },
        ("INCR", 2) => {
            let mut store = store.lock();
            let current = match store.get(&args[1]) {
                Some(value) => match std::str::from_utf8(value).ok().and_then(|v| v.parse::<i64>().ok()) {
                    Some(number) => number,
                    None => return Reply::error("ERR value is not an integer or out of range"),
                },
                None => 0,
            };
            let next = current + 1;
            store.insert(args[1].clone(), Bytes::from(next.to_string()));
            Reply::Integer(next)
        }
        ("DEL", n) if n >= 2 => {
            let mut store = store.lock();
            let removed = args[1..].iter().filter(|key| store.remove(*key).is_some()).count();
            Reply::Integer(removed as i64)
        }
        (name, _) if is_known(name) => wrong_arity(name),
        (name, _) => unknown(name),
    }
}
