//! Connection management.
//!
//! A [`Connection`] owns one TCP socket and speaks strictly sequential
//! request/reply: every reply must answer the request just sent. Any I/O
//! or framing failure closes the socket before the error is returned, and
//! the next write opens a fresh one.

use crate::config::{AuthContext, ConnectionConfig};
use crate::error::ClientError;
use bson::{doc, Bson, Document};
use docwire_protocol::{
    ensure_id, DeleteFlags, DocumentCodec, InsertFlags, Message, MessageHeader, OpCode,
    ProtocolError, QueryFlags, Reply, UpdateFlags, HEADER_SIZE, MAX_MESSAGE_SIZE,
    REPLY_PREFIX_SIZE,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;

/// A connection to a document database server.
pub struct Connection {
    config: ConnectionConfig,
    stream: Option<BufStream<TcpStream>>,
    /// Total bytes read from the server over this connection's lifetime.
    bytes_read: u64,
    next_request_id: i32,
    /// Auth context last sent on the current socket.
    selected_auth: Option<AuthContext>,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            stream: None,
            bytes_read: 0,
            next_request_id: 1,
            selected_auth: None,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn addr(&self) -> String {
        self.config.addr()
    }

    /// Returns whether a socket is currently open.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn selected_auth(&self) -> Option<&AuthContext> {
        self.selected_auth.as_ref()
    }

    /// Opens the socket. Does nothing if already connected.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let addr = self.config.addr();
        tracing::debug!("Connecting to {}...", addr);

        let tcp_stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect((self.config.host.as_str(), self.config.port)),
        )
        .await
        .map_err(|_| {
            tracing::debug!("Connection to {} timed out", addr);
            ClientError::Timeout(addr.clone())
        })?
        .map_err(|source| {
            tracing::debug!("Connection to {} failed: {}", addr, source);
            ClientError::Connect {
                addr: addr.clone(),
                source,
            }
        })?;

        if self.config.nodelay {
            tcp_stream.set_nodelay(true).ok();
        }

        self.stream = Some(BufStream::new(tcp_stream));
        self.selected_auth = None;
        tracing::debug!("Connected to {}", addr);
        Ok(())
    }

    /// Closes the socket. Safe to call when already disconnected.
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            tracing::debug!("Disconnecting from {}", self.config.addr());
            let _ = stream.shutdown().await;
        }
        self.selected_auth = None;
    }

    /// Drops the socket without a graceful shutdown.
    fn close_socket(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("Closed connection to {}", self.config.addr());
        }
        self.selected_auth = None;
    }

    // =========================================================================
    // Wire operations
    // =========================================================================

    /// Runs a query and returns the first batch.
    pub async fn query<D: DocumentCodec>(
        &mut self,
        collection: &str,
        flags: QueryFlags,
        number_to_skip: i32,
        number_to_return: i32,
        query: &Document,
        return_fields: Option<&Document>,
    ) -> Result<Reply<D>, ClientError> {
        self.select_configured_auth().await?;
        let msg = Message::query(
            collection,
            flags,
            number_to_skip,
            number_to_return,
            query,
            return_fields,
        )?;
        let request_id = self.send(&msg).await?;
        self.recv_reply(request_id).await
    }

    /// Fetches the next batch of an open server cursor.
    pub async fn get_more<D: DocumentCodec>(
        &mut self,
        collection: &str,
        number_to_return: i32,
        cursor_id: i64,
    ) -> Result<Reply<D>, ClientError> {
        self.select_configured_auth().await?;
        let msg = Message::get_more(collection, number_to_return, cursor_id)?;
        let request_id = self.send(&msg).await?;
        let reply: Reply<D> = self.recv_reply(request_id).await?;

        if reply.flags.is_cursor_not_found() {
            return Err(ClientError::CursorNotFound(cursor_id));
        }
        Ok(reply)
    }

    /// Inserts documents, generating `_id` where missing.
    ///
    /// Returns the documents as sent, ids included.
    pub async fn insert(
        &mut self,
        collection: &str,
        flags: InsertFlags,
        documents: &[Document],
    ) -> Result<Vec<Document>, ClientError> {
        self.select_configured_auth().await?;
        let documents: Vec<Document> = documents.iter().map(ensure_id).collect();
        let msg = Message::insert(collection, flags, &documents)?;
        self.send(&msg).await?;
        self.check_write(collection).await?;
        Ok(documents)
    }

    pub async fn update(
        &mut self,
        collection: &str,
        flags: UpdateFlags,
        selector: &Document,
        update: &Document,
    ) -> Result<(), ClientError> {
        self.select_configured_auth().await?;
        let msg = Message::update(collection, flags, selector, update)?;
        self.send(&msg).await?;
        self.check_write(collection).await
    }

    pub async fn delete(
        &mut self,
        collection: &str,
        flags: DeleteFlags,
        selector: &Document,
    ) -> Result<(), ClientError> {
        self.select_configured_auth().await?;
        let msg = Message::delete(collection, flags, selector)?;
        self.send(&msg).await?;
        self.check_write(collection).await
    }

    /// Releases server cursors. The server sends no reply.
    pub async fn kill_cursors(&mut self, cursor_ids: &[i64]) -> Result<(), ClientError> {
        if cursor_ids.is_empty() {
            return Ok(());
        }
        self.select_configured_auth().await?;
        let msg = Message::kill_cursors(cursor_ids);
        self.send(&msg).await?;
        tracing::debug!("Killed cursors {:?}", cursor_ids);
        Ok(())
    }

    /// Runs a database command and returns its result document.
    ///
    /// A result whose `ok` field is not set is returned as
    /// [`ClientError::Server`]; the connection stays open.
    pub async fn command(
        &mut self,
        database: &str,
        command: &Document,
    ) -> Result<Document, ClientError> {
        self.select_configured_auth().await?;
        self.run_command(database, command).await
    }

    /// Makes `ctx` the active auth context, sending its command if it
    /// differs from the one already selected on this socket.
    pub async fn authenticate(&mut self, ctx: &AuthContext) -> Result<(), ClientError> {
        self.connect().await?;
        if self.selected_auth.as_ref() == Some(ctx) {
            return Ok(());
        }

        if let Some(command) = &ctx.command {
            tracing::debug!(
                "Authenticating on {} as {}",
                ctx.database,
                ctx.username.as_deref().unwrap_or("<anonymous>")
            );
            self.run_command(&ctx.database, command).await?;
        }
        self.selected_auth = Some(ctx.clone());
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn select_configured_auth(&mut self) -> Result<(), ClientError> {
        match self.config.auth.clone() {
            Some(ctx) => self.authenticate(&ctx).await,
            None => Ok(()),
        }
    }

    async fn run_command(
        &mut self,
        database: &str,
        command: &Document,
    ) -> Result<Document, ClientError> {
        let namespace = format!("{database}.$cmd");
        let msg = Message::query(&namespace, QueryFlags::new(), 0, -1, command, None)?;
        let request_id = self.send(&msg).await?;
        let reply: Reply<Document> = self.recv_reply(request_id).await?;

        let result = reply
            .documents
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::Server {
                code: None,
                message: "empty command reply".into(),
            })?;

        if !result.get("ok").map(is_truthy).unwrap_or(false) {
            return Err(ClientError::from_error_document(&result));
        }
        Ok(result)
    }

    /// In safe mode, asks the server whether the last write succeeded.
    async fn check_write(&mut self, collection: &str) -> Result<(), ClientError> {
        if !self.config.safe {
            return Ok(());
        }

        let result = self
            .run_command(database_of(collection), &doc! { "getLastError": 1 })
            .await?;
        match result.get("err") {
            None | Some(Bson::Null) => Ok(()),
            Some(_) => Err(ClientError::from_error_document(&result)),
        }
    }

    fn allocate_request_id(&mut self) -> i32 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        id
    }

    fn stream(&mut self) -> Result<&mut BufStream<TcpStream>, ClientError> {
        self.stream.as_mut().ok_or_else(|| {
            ClientError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "not connected",
            ))
        })
    }

    /// Writes a message, reconnecting first if the socket was closed.
    async fn send(&mut self, msg: &Message) -> Result<i32, ClientError> {
        let request_id = self.allocate_request_id();
        let frame = msg.encode(request_id)?;

        self.connect().await?;
        let stream = self.stream()?;
        let result = match stream.write_all(&frame).await {
            Ok(()) => stream.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            tracing::debug!("Write to {} failed: {}", self.config.addr(), e);
            self.close_socket();
            return Err(ClientError::Io(e));
        }

        tracing::trace!(
            "Sent {:?} request {} ({} bytes)",
            msg.op_code(),
            request_id,
            frame.len()
        );
        Ok(request_id)
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ClientError> {
        let stream = self.stream()?;
        let result = stream.read_exact(buf).await;
        match result {
            Ok(n) => {
                self.bytes_read += n as u64;
                Ok(())
            }
            Err(e) => {
                tracing::debug!("Read from {} failed: {}", self.config.addr(), e);
                self.close_socket();
                Err(ClientError::Io(e))
            }
        }
    }

    fn protocol_failure(&mut self, err: ProtocolError) -> ClientError {
        tracing::warn!(
            "Protocol error on {}, closing connection: {}",
            self.config.addr(),
            err
        );
        self.close_socket();
        ClientError::Protocol(err)
    }

    /// Reads the reply to `request_id`.
    async fn recv_reply<D: DocumentCodec>(
        &mut self,
        request_id: i32,
    ) -> Result<Reply<D>, ClientError> {
        let mut head = [0u8; HEADER_SIZE];
        self.read_exact(&mut head).await?;
        let header = match MessageHeader::decode(&head) {
            Ok(header) => header,
            Err(e) => return Err(self.protocol_failure(e)),
        };

        if header.response_to != request_id {
            return Err(self.protocol_failure(ProtocolError::ResponseToMismatch {
                expected: request_id,
                actual: header.response_to,
            }));
        }
        if header.op_code != OpCode::Reply {
            return Err(self.protocol_failure(ProtocolError::UnexpectedOpCode {
                expected: OpCode::Reply,
                actual: header.op_code,
            }));
        }

        let message_length = header.message_length as usize;
        if message_length > MAX_MESSAGE_SIZE {
            return Err(self.protocol_failure(ProtocolError::MessageTooLarge {
                size: message_length,
                max: MAX_MESSAGE_SIZE,
            }));
        }
        if header.body_len() < REPLY_PREFIX_SIZE {
            return Err(
                self.protocol_failure(ProtocolError::InvalidMessageLength(header.message_length))
            );
        }

        let mut body = vec![0u8; header.body_len()];
        self.read_exact(&mut body).await?;

        let flags = match Reply::<D>::peek_flags(&body) {
            Ok(flags) => flags,
            Err(e) => return Err(self.protocol_failure(e)),
        };

        if flags.is_query_failure() {
            let (failure, _) = match Reply::<Document>::decode(message_length, &body) {
                Ok(decoded) => decoded,
                Err(e) => return Err(self.protocol_failure(e)),
            };
            let err = match failure.documents.first() {
                Some(doc) => ClientError::from_error_document(doc),
                None => ClientError::Server {
                    code: None,
                    message: "query failure".into(),
                },
            };
            tracing::debug!("Request {} failed on server: {}", request_id, err);
            return Err(err);
        }

        let (reply, trailing) = match Reply::<D>::decode(message_length, &body) {
            Ok(decoded) => decoded,
            Err(e) => return Err(self.protocol_failure(e)),
        };

        if trailing > 0 {
            tracing::warn!(
                "Discarding {} unread bytes at the end of reply to request {}",
                trailing,
                request_id
            );
        }

        tracing::trace!(
            "Reply to {}: cursor={} from={} docs={}",
            request_id,
            reply.cursor_id,
            reply.starting_from,
            reply.documents.len()
        );
        Ok(reply)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.config.addr())
            .field("connected", &self.is_connected())
            .field("bytes_read", &self.bytes_read)
            .finish()
    }
}

/// The database part of a `database.collection` namespace.
pub fn database_of(namespace: &str) -> &str {
    namespace
        .split_once('.')
        .map(|(db, _)| db)
        .unwrap_or(namespace)
}

fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0,
        _ => false,
    }
}
