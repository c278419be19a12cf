//! Flag bitfields carried by request and reply bodies.

/// Flags for OP_QUERY.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryFlags(i32);

impl QueryFlags {
    /// Cursor is not closed when the last data is retrieved.
    pub const TAILABLE_CURSOR: i32 = 1 << 1;
    /// Allow query of replica secondaries.
    pub const SLAVE_OK: i32 = 1 << 2;
    /// Server does not time out idle cursors.
    pub const NO_CURSOR_TIMEOUT: i32 = 1 << 4;
    /// Block at the end of a tailable cursor instead of returning no data.
    pub const AWAIT_DATA: i32 = 1 << 5;
    /// Stream all data down in multiple replies.
    pub const EXHAUST: i32 = 1 << 6;
    /// Return partial results if some shards are down.
    pub const PARTIAL: i32 = 1 << 7;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with_tailable_cursor(mut self) -> Self {
        self.0 |= Self::TAILABLE_CURSOR;
        self
    }

    pub fn with_slave_ok(mut self) -> Self {
        self.0 |= Self::SLAVE_OK;
        self
    }

    pub fn with_no_cursor_timeout(mut self) -> Self {
        self.0 |= Self::NO_CURSOR_TIMEOUT;
        self
    }

    pub fn with_await_data(mut self) -> Self {
        self.0 |= Self::AWAIT_DATA;
        self
    }

    pub fn with_partial(mut self) -> Self {
        self.0 |= Self::PARTIAL;
        self
    }

    pub fn is_tailable(&self) -> bool {
        self.0 & Self::TAILABLE_CURSOR != 0
    }

    pub fn bits(&self) -> i32 {
        self.0
    }

    pub fn from_bits(bits: i32) -> Self {
        Self(bits)
    }
}

/// Flags for OP_UPDATE.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateFlags(i32);

impl UpdateFlags {
    pub const UPSERT: i32 = 1 << 0;
    pub const MULTI_UPDATE: i32 = 1 << 1;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with_upsert(mut self) -> Self {
        self.0 |= Self::UPSERT;
        self
    }

    pub fn with_multi(mut self) -> Self {
        self.0 |= Self::MULTI_UPDATE;
        self
    }

    pub fn is_upsert(&self) -> bool {
        self.0 & Self::UPSERT != 0
    }

    pub fn is_multi(&self) -> bool {
        self.0 & Self::MULTI_UPDATE != 0
    }

    pub fn bits(&self) -> i32 {
        self.0
    }

    pub fn from_bits(bits: i32) -> Self {
        Self(bits)
    }
}

/// Flags for OP_INSERT.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertFlags(i32);

impl InsertFlags {
    pub const CONTINUE_ON_ERROR: i32 = 1 << 0;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with_continue_on_error(mut self) -> Self {
        self.0 |= Self::CONTINUE_ON_ERROR;
        self
    }

    pub fn bits(&self) -> i32 {
        self.0
    }

    pub fn from_bits(bits: i32) -> Self {
        Self(bits)
    }
}

/// Flags for OP_DELETE.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteFlags(i32);

impl DeleteFlags {
    pub const SINGLE_REMOVE: i32 = 1 << 0;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with_single_remove(mut self) -> Self {
        self.0 |= Self::SINGLE_REMOVE;
        self
    }

    pub fn is_single_remove(&self) -> bool {
        self.0 & Self::SINGLE_REMOVE != 0
    }

    pub fn bits(&self) -> i32 {
        self.0
    }

    pub fn from_bits(bits: i32) -> Self {
        Self(bits)
    }
}

/// Flags for OP_REPLY.
///
/// Unknown bits are preserved; newer servers may set bits this client does
/// not interpret.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplyFlags(i32);

impl ReplyFlags {
    /// The cursor id sent with get-more is not valid on the server.
    pub const CURSOR_NOT_FOUND: i32 = 1 << 0;
    /// The query failed; the single returned document describes the error.
    pub const QUERY_FAILURE: i32 = 1 << 1;
    pub const SHARD_CONFIG_STALE: i32 = 1 << 2;
    pub const AWAIT_CAPABLE: i32 = 1 << 3;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with_cursor_not_found(mut self) -> Self {
        self.0 |= Self::CURSOR_NOT_FOUND;
        self
    }

    pub fn with_query_failure(mut self) -> Self {
        self.0 |= Self::QUERY_FAILURE;
        self
    }

    pub fn is_cursor_not_found(&self) -> bool {
        self.0 & Self::CURSOR_NOT_FOUND != 0
    }

    pub fn is_query_failure(&self) -> bool {
        self.0 & Self::QUERY_FAILURE != 0
    }

    pub fn is_shard_config_stale(&self) -> bool {
        self.0 & Self::SHARD_CONFIG_STALE != 0
    }

    pub fn bits(&self) -> i32 {
        self.0
    }

    pub fn from_bits(bits: i32) -> Self {
        Self(bits)
    }
}
