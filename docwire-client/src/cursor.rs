//! Lazy, shared query cursors.
//!
//! A [`Cursor`] issues its query on first access and pages through results
//! with get-more as the local buffer drains. Clones share one state; the
//! server cursor is released when the last clone is dropped, or earlier
//! through [`Cursor::close`]. Each round-trip leases its own connection from
//! the pool and returns it before the call completes.

use crate::error::ClientError;
use crate::pool::Pool;
use bson::{doc, Document};
use docwire_protocol::{DocumentCodec, QueryFlags, Reply};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

const ALREADY_ITERATING: &str = "cursor already iterating";

struct CursorState<D> {
    query: Document,
    sort: Option<Document>,
    fields: Option<Document>,
    flags: QueryFlags,
    skip: i32,
    /// 0 = unlimited.
    limit: i32,
    /// 0 = server default.
    batch_size: i32,
    /// Set by the first access; modifiers are rejected from then on.
    started: bool,
    /// Set once the initial query has succeeded.
    queried: bool,
    exhausted: bool,
    cursor_id: i64,
    buffer: VecDeque<D>,
    /// Size of the batch currently in `buffer`.
    batch_len: usize,
    /// Index of the first document of the current batch.
    offset: i64,
}

impl<D> CursorState<D> {
    fn new(query: Document) -> Self {
        Self {
            query,
            sort: None,
            fields: None,
            flags: QueryFlags::new(),
            skip: 0,
            limit: 0,
            batch_size: 0,
            started: false,
            queried: false,
            exhausted: false,
            cursor_id: 0,
            buffer: VecDeque::new(),
            batch_len: 0,
            offset: 0,
        }
    }

    /// Absolute index of the next unread document.
    fn position(&self) -> i64 {
        self.offset + (self.batch_len - self.buffer.len()) as i64
    }

    fn limit_reached(&self) -> bool {
        self.limit > 0 && self.position() >= self.limit as i64
    }

    /// `number_to_return` for the next query or get-more.
    ///
    /// Capped to what the limit still allows. A request for exactly one
    /// document closes the server cursor, so 1 becomes 2 unless one
    /// document is all that is left to fetch.
    fn number_to_return(&self) -> i32 {
        let received = self.offset + self.batch_len as i64;
        let wanted = (self.limit > 0).then(|| (self.limit as i64 - received).max(0) as i32);

        let n = match wanted {
            Some(rest) if self.batch_size == 0 || self.batch_size > rest => rest,
            _ => self.batch_size,
        };
        if n == 1 && wanted.map_or(true, |rest| rest > 1) {
            2
        } else {
            n
        }
    }

    fn selector(&self) -> Document {
        match &self.sort {
            Some(sort) => doc! { "$query": self.query.clone(), "$orderby": sort.clone() },
            None => self.query.clone(),
        }
    }

    fn load(&mut self, reply: Reply<D>) {
        self.cursor_id = reply.cursor_id;
        self.offset = reply.starting_from as i64;
        self.batch_len = reply.documents.len();
        self.buffer = reply.documents.into();
    }
}

struct CursorShared<D> {
    pool: Pool,
    collection: String,
    state: Mutex<CursorState<D>>,
}

impl<D> Drop for CursorShared<D> {
    fn drop(&mut self) {
        let cursor_id = std::mem::take(&mut self.state.get_mut().cursor_id);
        if cursor_id == 0 {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pool = self.pool.clone();
                handle.spawn(async move {
                    if let Err(e) = kill_cursor(&pool, cursor_id).await {
                        tracing::warn!("Failed to kill cursor {}: {}", cursor_id, e);
                    }
                });
            }
            Err(_) => tracing::warn!(
                "Cursor {} on {} dropped outside a runtime; server cursor left open",
                cursor_id,
                self.collection
            ),
        }
    }
}

async fn kill_cursor(pool: &Pool, cursor_id: i64) -> Result<(), ClientError> {
    let mut conn = pool.lease().await?;
    conn.kill_cursors(&[cursor_id]).await
}

/// A forward-only cursor over the results of a query.
///
/// Cloning is cheap; all clones read from the same position.
pub struct Cursor<D = Document> {
    shared: Arc<CursorShared<D>>,
}

impl<D> Clone for Cursor<D> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<D> Cursor<D> {
    /// Creates a cursor over `query` on `collection` (`db.collection`).
    /// Nothing is sent until the cursor is first read.
    pub fn new(pool: Pool, collection: impl Into<String>, query: Document) -> Self {
        Self {
            shared: Arc::new(CursorShared {
                pool,
                collection: collection.into(),
                state: Mutex::new(CursorState::new(query)),
            }),
        }
    }

    pub fn collection(&self) -> &str {
        &self.shared.collection
    }

    /// Number of live handles sharing this cursor.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.shared)
    }

    fn modify(&self, f: impl FnOnce(&mut CursorState<D>)) -> Result<&Self, ClientError> {
        let mut state = self
            .shared
            .state
            .try_lock()
            .map_err(|_| ClientError::Usage(ALREADY_ITERATING))?;
        if state.started {
            return Err(ClientError::Usage(ALREADY_ITERATING));
        }
        f(&mut *state);
        Ok(self)
    }

    /// Orders results by `order`, e.g. `{ "age": -1 }`.
    pub fn sort(&self, order: Document) -> Result<&Self, ClientError> {
        self.modify(|s| s.sort = Some(order))
    }

    /// Caps the number of documents returned. 0 means unlimited.
    pub fn limit(&self, count: u32) -> Result<&Self, ClientError> {
        self.modify(|s| s.limit = saturate(count))
    }

    pub fn skip(&self, count: u32) -> Result<&Self, ClientError> {
        self.modify(|s| s.skip = saturate(count))
    }

    /// Documents requested per round-trip. 0 leaves it to the server.
    pub fn batch_size(&self, size: u32) -> Result<&Self, ClientError> {
        self.modify(|s| s.batch_size = saturate(size))
    }

    /// Restricts returned documents to the fields in `selector`.
    pub fn fields(&self, selector: Document) -> Result<&Self, ClientError> {
        self.modify(|s| s.fields = Some(selector))
    }

    pub fn flags(&self, flags: QueryFlags) -> Result<&Self, ClientError> {
        self.modify(|s| s.flags = flags)
    }
}

impl<D: DocumentCodec> Cursor<D> {
    /// Returns whether no unread document remains.
    ///
    /// This may suspend on a round-trip: the first call issues the query,
    /// and a drained buffer with a live server cursor triggers a get-more.
    pub async fn is_empty(&self) -> Result<bool, ClientError> {
        let mut state = self.shared.state.lock().await;
        self.fill(&mut state).await
    }

    /// Advances past the current document.
    pub async fn advance(&self) -> Result<(), ClientError> {
        let mut state = self.shared.state.lock().await;
        if self.fill(&mut state).await? {
            return Err(ClientError::Usage("advance past end of cursor"));
        }
        state.buffer.pop_front();
        Ok(())
    }

    /// Returns the next document and advances past it, or `None` at the end.
    pub async fn try_next(&self) -> Result<Option<D>, ClientError> {
        let mut state = self.shared.state.lock().await;
        if self.fill(&mut state).await? {
            return Ok(None);
        }
        Ok(state.buffer.pop_front())
    }

    /// Reads every remaining document.
    pub async fn collect(&self) -> Result<Vec<D>, ClientError> {
        let mut docs = Vec::new();
        while let Some(doc) = self.try_next().await? {
            docs.push(doc);
        }
        Ok(docs)
    }

    /// Server cursor id, 0 once nothing is left on the server.
    pub async fn id(&self) -> i64 {
        self.shared.state.lock().await.cursor_id
    }

    /// Releases the server cursor now. Later reads report the cursor empty.
    pub async fn close(&self) -> Result<(), ClientError> {
        let mut state = self.shared.state.lock().await;
        state.started = true;
        state.queried = true;
        state.exhausted = true;
        state.buffer.clear();

        let cursor_id = std::mem::take(&mut state.cursor_id);
        if cursor_id != 0 {
            kill_cursor(&self.shared.pool, cursor_id).await?;
        }
        Ok(())
    }

    /// Makes sure the buffer holds the next document if there is one.
    /// Returns whether the cursor is empty.
    async fn fill(&self, state: &mut CursorState<D>) -> Result<bool, ClientError> {
        state.started = true;
        if !state.queried {
            self.initial_query(state).await?;
        }

        loop {
            if state.exhausted {
                return Ok(true);
            }

            if state.limit_reached() {
                state.exhausted = true;
                state.buffer.clear();
                let cursor_id = std::mem::take(&mut state.cursor_id);
                if cursor_id != 0 {
                    if let Err(e) = kill_cursor(&self.shared.pool, cursor_id).await {
                        tracing::warn!("Failed to kill cursor {} at limit: {}", cursor_id, e);
                    }
                }
                return Ok(true);
            }

            if !state.buffer.is_empty() {
                return Ok(false);
            }

            if state.cursor_id == 0 {
                state.exhausted = true;
                return Ok(true);
            }

            self.get_more(state).await?;
            if state.buffer.is_empty() && state.cursor_id != 0 {
                // Tailable cursor with no new data yet.
                return Ok(true);
            }
        }
    }

    async fn initial_query(&self, state: &mut CursorState<D>) -> Result<(), ClientError> {
        let number_to_return = state.number_to_return();
        let reply: Reply<D> = {
            let mut conn = self.shared.pool.lease().await?;
            conn.query(
                &self.shared.collection,
                state.flags,
                state.skip,
                number_to_return,
                &state.selector(),
                state.fields.as_ref(),
            )
            .await?
        };

        tracing::debug!(
            "Query on {} returned {} documents, cursor {}",
            self.shared.collection,
            reply.documents.len(),
            reply.cursor_id
        );
        state.queried = true;
        state.load(reply);
        Ok(())
    }

    async fn get_more(&self, state: &mut CursorState<D>) -> Result<(), ClientError> {
        let number_to_return = state.number_to_return();
        let result = {
            let mut conn = self.shared.pool.lease().await?;
            conn.get_more::<D>(&self.shared.collection, number_to_return, state.cursor_id)
                .await
        };

        match result {
            Ok(reply) => {
                tracing::debug!(
                    "Get-more on cursor {} returned {} documents",
                    state.cursor_id,
                    reply.documents.len()
                );
                state.load(reply);
                Ok(())
            }
            Err(e @ ClientError::CursorNotFound(_)) => {
                state.cursor_id = 0;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

impl<D: DocumentCodec + Clone> Cursor<D> {
    /// Returns a copy of the document at the read position.
    pub async fn current(&self) -> Result<D, ClientError> {
        let mut state = self.shared.state.lock().await;
        if self.fill(&mut state).await? {
            return Err(ClientError::Usage("no current document: cursor is empty"));
        }
        state
            .buffer
            .front()
            .cloned()
            .ok_or(ClientError::Usage("no current document: cursor is empty"))
    }
}

impl<D> std::fmt::Debug for Cursor<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("collection", &self.shared.collection)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

fn saturate(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}
