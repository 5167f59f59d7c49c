//! A small FastCGI application for tests, speaking the protocol through this crate's own codec

use crate::connection::Connection;
use crate::record::{self, pairs, BeginRequest, EndRequest, ProtocolStatus, RecordType};
use crate::target::Target;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::net::TcpListener;
use std::os::unix::net::UnixListener;
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(10);

/// A request as the application saw it
pub(crate) struct Received {
    pub id: u16,
    pub begin: BeginRequest,
    pub params: BTreeMap<String, String>,
    pub stdin: Vec<u8>,
    /// Number of `FCGI_STDIN` records, the terminator included
    pub stdin_records: usize,
}

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Starts an application on a free local port. Each connection is served on its own thread by
/// `handler`, which is called once per request.
pub(crate) fn spawn_app<F>(handler: F) -> Target
where
    F: Fn(Received, &mut Connection) + Send + Sync + 'static,
{
    init_logger();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handler = Arc::new(handler);

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            serve(Connection::from(stream), handler.clone());
        }
    });

    Target::tcp("127.0.0.1", port)
}

/// Like [`spawn_app`], but listening on a Unix domain socket in the temp directory
pub(crate) fn spawn_unix_app<F>(handler: F) -> Target
where
    F: Fn(Received, &mut Connection) + Send + Sync + 'static,
{
    static NEXT: AtomicUsize = AtomicUsize::new(0);

    init_logger();

    let path = env::temp_dir().join(format!(
        "relic-{}-{}.sock",
        process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    ));
    let _ = fs::remove_file(&path);
    let listener = UnixListener::bind(&path).unwrap();
    let handler = Arc::new(handler);

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            serve(Connection::from(stream), handler.clone());
        }
    });

    Target::unix(path)
}

fn serve<F>(mut connection: Connection, handler: Arc<F>)
where
    F: Fn(Received, &mut Connection) + Send + Sync + 'static,
{
    thread::spawn(move || {
        while let Some(received) = read_request(&mut connection) {
            let keep_alive = received.begin.keep_alive();
            handler(received, &mut connection);
            if !keep_alive {
                break;
            }
        }
    });
}

fn read_request(connection: &mut Connection) -> Option<Received> {
    let deadline = Instant::now() + TIMEOUT;

    let mut id = 0;
    let mut begin = None;
    let mut params = vec![];
    let mut stdin = vec![];
    let mut stdin_records = 0;

    loop {
        let record = connection.read_record(deadline).ok()?;
        match record.record_type {
            RecordType::BeginRequest => {
                id = record.request_id;
                begin = Some(BeginRequest::from_record_bytes(&record.content).ok()?);
            }
            RecordType::Params => params.extend(record.content),
            RecordType::Stdin => {
                stdin_records += 1;
                if record.content.is_empty() {
                    break;
                }
                stdin.extend(record.content);
            }
            _ => {}
        }
    }

    let params = pairs::decode(&params)
        .ok()?
        .into_iter()
        .map(|(k, v)| {
            (
                String::from_utf8_lossy(&k).into_owned(),
                String::from_utf8_lossy(&v).into_owned(),
            )
        })
        .collect();

    Some(Received {
        id,
        begin: begin?,
        params,
        stdin,
        stdin_records,
    })
}

/// Writes a complete response: the stdout stream, the stderr stream if any, and the end record
pub(crate) fn respond(connection: &mut Connection, id: u16, stdout: &[u8], stderr: &[u8]) {
    let mut out = vec![];
    record::encode_stream(RecordType::Stdout, id, stdout, &mut out).unwrap();
    if !stderr.is_empty() {
        record::encode_stream(RecordType::Stderr, id, stderr, &mut out).unwrap();
    }
    let _ = connection.write_all(&out, TIMEOUT);
    end(connection, id, 0, ProtocolStatus::RequestComplete);
}

pub(crate) fn end(connection: &mut Connection, id: u16, app_status: i32, status: ProtocolStatus) {
    let mut out = vec![];
    let end = EndRequest::new(app_status, status);
    record::encode_record(RecordType::EndRequest, id, &end.to_record_bytes(), &mut out).unwrap();
    let _ = connection.write_all(&out, TIMEOUT);
}

/// Responds with the request body as a plain text document
pub(crate) fn echo(received: Received, connection: &mut Connection) {
    let mut stdout = b"Content-Type: text/plain\r\n\r\n".to_vec();
    stdout.extend_from_slice(&received.stdin);
    respond(connection, received.id, &stdout, b"");
}

/// Like [`echo`], but waits for the duration given in the `HTTP_X_DELAY_MS` parameter first
pub(crate) fn delayed_echo(received: Received, connection: &mut Connection) {
    let delay = received
        .params
        .get("HTTP_X_DELAY_MS")
        .and_then(|ms| ms.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or_default();
    thread::sleep(delay);
    echo(received, connection);
}
