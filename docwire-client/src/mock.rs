//! In-process server speaking the wire protocol, for tests.
//!
//! Serves an in-memory set of collections with equality filters, single-key
//! sorting, skip and server-side cursors. Faults can be queued to corrupt
//! the next reply.

use crate::config::{ConnectionConfig, PoolConfig};
use crate::pool::Pool;
use bson::{doc, Bson, Document};
use docwire_protocol::{
    MessageHeader, Reply, ReplyFlags, Request, UpdateFlags, HEADER_SIZE,
};
use parking_lot::{Mutex, MutexGuard};
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Batch size the server uses when the client asks for 0.
pub(crate) const DEFAULT_BATCH: usize = 101;

/// A corruption applied to the next reply the server sends.
#[derive(Debug, Clone)]
pub(crate) enum Fault {
    /// Declare the message this many bytes shorter than it is.
    ShortLength(usize),
    /// Append this many junk bytes and declare them.
    TrailingBytes(usize),
    /// Answer with a `response_to` that does not match the request.
    WrongResponseTo,
    /// Replace the reply with a query failure carrying this message.
    QueryFailure(String),
}

struct MockCursor {
    remaining: VecDeque<Document>,
    offset: i32,
}

#[derive(Default)]
pub(crate) struct MockState {
    pub collections: HashMap<String, Vec<Document>>,
    cursors: HashMap<i64, MockCursor>,
    next_cursor_id: i64,
    faults: VecDeque<Fault>,
    /// Error reported by the next `getLastError`.
    pub write_error: Option<String>,
    pub accepted: usize,
    pub queries: usize,
    pub get_mores: usize,
    /// `number_to_return` of every query and get-more, in order.
    pub requested: Vec<i32>,
    pub killed: Vec<i64>,
    pub commands: Vec<Document>,
}

impl MockState {
    pub fn open_cursors(&self) -> usize {
        self.cursors.len()
    }

    pub fn command_count(&self, name: &str) -> usize {
        self.commands
            .iter()
            .filter(|c| c.keys().next().map(String::as_str) == Some(name))
            .count()
    }

    fn handle(&mut self, request: Request) -> Option<Reply> {
        match request {
            Request::Query {
                collection,
                number_to_skip,
                number_to_return,
                query,
                return_fields,
                ..
            } => {
                if let Some(db) = collection.strip_suffix(".$cmd") {
                    return Some(self.command(db, query));
                }
                self.queries += 1;
                self.requested.push(number_to_return);
                Some(self.query(
                    &collection,
                    number_to_skip,
                    number_to_return,
                    query,
                    return_fields,
                ))
            }
            Request::GetMore {
                number_to_return,
                cursor_id,
                ..
            } => {
                self.get_mores += 1;
                self.requested.push(number_to_return);
                Some(self.get_more(number_to_return, cursor_id))
            }
            Request::KillCursors { cursor_ids } => {
                for id in &cursor_ids {
                    self.cursors.remove(id);
                }
                self.killed.extend(cursor_ids);
                None
            }
            Request::Insert {
                collection,
                documents,
                ..
            } => {
                self.collections
                    .entry(collection)
                    .or_default()
                    .extend(documents);
                None
            }
            Request::Update {
                collection,
                flags,
                selector,
                update,
            } => {
                self.update(&collection, flags, &selector, &update);
                None
            }
            Request::Delete {
                collection,
                flags,
                selector,
            } => {
                let docs = self.collections.entry(collection).or_default();
                if flags.is_single_remove() {
                    if let Some(pos) = docs.iter().position(|d| matches(d, &selector)) {
                        docs.remove(pos);
                    }
                } else {
                    docs.retain(|d| !matches(d, &selector));
                }
                None
            }
        }
    }

    fn command(&mut self, _db: &str, command: Document) -> Reply {
        self.commands.push(command.clone());
        let name = command.keys().next().cloned().unwrap_or_default();
        let result = match name.as_str() {
            "getLastError" => match self.write_error.take() {
                Some(err) => doc! { "err": err, "code": 11000, "ok": 1.0 },
                None => doc! { "err": Bson::Null, "n": 0, "ok": 1.0 },
            },
            "saslStart" => doc! { "conversationId": 1, "done": true, "ok": 1.0 },
            "ping" => doc! { "ok": 1.0 },
            other => doc! { "ok": 0.0, "errmsg": format!("no such command: {other}"), "code": 59 },
        };
        single(result)
    }

    fn query(
        &mut self,
        collection: &str,
        skip: i32,
        number_to_return: i32,
        query: Document,
        fields: Option<Document>,
    ) -> Reply {
        let (filter, order) = if query.contains_key("$query") {
            (
                query.get_document("$query").cloned().unwrap_or_default(),
                query.get_document("$orderby").ok().cloned(),
            )
        } else {
            (query, None)
        };

        let mut matched: Vec<Document> = self
            .collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| matches(d, &filter)).cloned().collect())
            .unwrap_or_default();

        if let Some(order) = order {
            if let Some((key, dir)) = order.iter().next() {
                let descending = dir.as_i32().map(|d| d < 0).unwrap_or(false);
                matched.sort_by(|a, b| {
                    let ord = compare(a.get(key), b.get(key));
                    if descending {
                        ord.reverse()
                    } else {
                        ord
                    }
                });
            }
        }

        let mut remaining: VecDeque<Document> = matched
            .into_iter()
            .skip(skip.max(0) as usize)
            .map(|d| project(d, fields.as_ref()))
            .collect();

        let (batch, close) = batch_size(number_to_return);
        let documents: Vec<Document> = drain(&mut remaining, batch);

        let cursor_id = if close || remaining.is_empty() {
            0
        } else {
            self.open_cursor(remaining, documents.len() as i32)
        };

        Reply {
            flags: ReplyFlags::new(),
            cursor_id,
            starting_from: 0,
            documents,
        }
    }

    fn get_more(&mut self, number_to_return: i32, cursor_id: i64) -> Reply {
        let Some(cursor) = self.cursors.get_mut(&cursor_id) else {
            return Reply {
                flags: ReplyFlags::new().with_cursor_not_found(),
                cursor_id: 0,
                starting_from: 0,
                documents: Vec::new(),
            };
        };

        let (batch, close) = batch_size(number_to_return);
        let starting_from = cursor.offset;
        let documents = drain(&mut cursor.remaining, batch);
        cursor.offset += documents.len() as i32;

        let exhausted = close || cursor.remaining.is_empty();
        if exhausted {
            self.cursors.remove(&cursor_id);
        }

        Reply {
            flags: ReplyFlags::new(),
            cursor_id: if exhausted { 0 } else { cursor_id },
            starting_from,
            documents,
        }
    }

    fn update(
        &mut self,
        collection: &str,
        flags: UpdateFlags,
        selector: &Document,
        update: &Document,
    ) {
        let docs = self.collections.entry(collection.to_string()).or_default();
        let mut touched = 0;
        for doc in docs.iter_mut().filter(|d| matches(d, selector)) {
            apply_update(doc, update);
            touched += 1;
            if !flags.is_multi() {
                break;
            }
        }

        if touched == 0 && flags.is_upsert() {
            let mut doc = selector.clone();
            apply_update(&mut doc, update);
            docs.push(doc);
        }
    }

    fn open_cursor(&mut self, remaining: VecDeque<Document>, offset: i32) -> i64 {
        self.next_cursor_id += 1;
        let id = 1000 + self.next_cursor_id;
        self.cursors.insert(id, MockCursor { remaining, offset });
        id
    }
}

fn single(doc: Document) -> Reply {
    Reply {
        flags: ReplyFlags::new(),
        cursor_id: 0,
        starting_from: 0,
        documents: vec![doc],
    }
}

/// Returns the batch to send and whether the cursor closes after it.
/// A request for exactly one document, or a negative count, is a single batch.
fn batch_size(number_to_return: i32) -> (usize, bool) {
    match number_to_return {
        0 => (DEFAULT_BATCH, false),
        1 => (1, true),
        n if n < 0 => (n.unsigned_abs() as usize, true),
        n => (n as usize, false),
    }
}

fn drain(docs: &mut VecDeque<Document>, n: usize) -> Vec<Document> {
    let n = n.min(docs.len());
    docs.drain(..n).collect()
}

fn matches(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(k, v)| doc.get(k) == Some(v))
}

fn compare(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    fn number(v: &Bson) -> Option<f64> {
        match v {
            Bson::Int32(n) => Some(*n as f64),
            Bson::Int64(n) => Some(*n as f64),
            Bson::Double(n) => Some(*n),
            _ => None,
        }
    }

    match (a, b) {
        (Some(a), Some(b)) => match (number(a), number(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => a.to_string().cmp(&b.to_string()),
        },
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn project(doc: Document, fields: Option<&Document>) -> Document {
    let Some(fields) = fields else {
        return doc;
    };
    doc.into_iter()
        .filter(|(k, _)| k == "_id" || fields.contains_key(k))
        .collect()
}

fn apply_update(doc: &mut Document, update: &Document) {
    match update.get_document("$set") {
        Ok(set) => {
            for (k, v) in set {
                doc.insert(k.clone(), v.clone());
            }
        }
        Err(_) => {
            let id = doc.get("_id").cloned();
            *doc = update.clone();
            if let Some(id) = id {
                doc.insert("_id", id);
            }
        }
    }
}

/// A running mock server bound to a loopback port.
pub(crate) struct MockServer {
    addr: SocketAddr,
    state: Arc<Mutex<MockState>>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(MockState::default()));

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accept_state.lock().accepted += 1;
                tokio::spawn(serve(socket, accept_state.clone()));
            }
        });

        Self { addr, state }
    }

    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::new(self.addr.ip().to_string(), self.addr.port())
    }

    pub fn pool(&self) -> Pool {
        Pool::from_config(self.config(), PoolConfig::default())
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock()
    }

    pub fn seed(&self, collection: &str, count: i32) {
        let docs = (0..count).map(|n| doc! { "_id": n, "n": n }).collect();
        self.state().collections.insert(collection.to_string(), docs);
    }

    pub fn push_fault(&self, fault: Fault) {
        self.state().faults.push_back(fault);
    }

    /// Waits until at least `count` cursors have been killed.
    pub async fn wait_for_kills(&self, count: usize) -> Vec<i64> {
        for _ in 0..200 {
            {
                let state = self.state();
                if state.killed.len() >= count {
                    return state.killed.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.state().killed.clone()
    }
}

async fn serve(mut socket: TcpStream, state: Arc<Mutex<MockState>>) {
    loop {
        let mut head = [0u8; HEADER_SIZE];
        if socket.read_exact(&mut head).await.is_err() {
            return;
        }
        let Ok(header) = MessageHeader::decode(&head) else {
            return;
        };
        let mut body = vec![0u8; header.body_len()];
        if socket.read_exact(&mut body).await.is_err() {
            return;
        }
        let Ok(request) = Request::<Document>::decode(&header, &body) else {
            return;
        };

        let response = {
            let mut state = state.lock();
            state
                .handle(request)
                .map(|reply| (reply, state.faults.pop_front()))
        };

        if let Some((reply, fault)) = response {
            let bytes = encode_with_fault(reply, header.request_id, fault);
            if socket.write_all(&bytes).await.is_err() {
                return;
            }
        }
    }
}

fn encode_with_fault(reply: Reply, response_to: i32, fault: Option<Fault>) -> Vec<u8> {
    let (reply, response_to) = match &fault {
        Some(Fault::QueryFailure(message)) => (
            Reply {
                flags: ReplyFlags::new().with_query_failure(),
                cursor_id: 0,
                starting_from: 0,
                documents: vec![doc! { "$err": message.as_str(), "code": 2 }],
            },
            response_to,
        ),
        Some(Fault::WrongResponseTo) => (reply, response_to.wrapping_add(1000)),
        _ => (reply, response_to),
    };

    let mut bytes = reply.encode(1, response_to).unwrap().to_vec();
    let declared = match fault {
        Some(Fault::ShortLength(n)) => bytes.len() - n,
        Some(Fault::TrailingBytes(n)) => {
            bytes.extend(std::iter::repeat(0xEE).take(n));
            bytes.len()
        }
        _ => bytes.len(),
    };
    bytes[0..4].copy_from_slice(&(declared as i32).to_le_bytes());
    bytes
}
