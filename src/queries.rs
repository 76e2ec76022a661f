//! Typed queries a request handler hands to its script runner.
//!
//! A handler fills a [`Query`] and passes it to [`ScriptRunner::ask_query`],
//! which may suspend the handler for as long as the operation takes and
//! returns once an answer has been written back into the query.

use crate::context::QueryContext;
use crate::error::Result;
use crate::memory::AnswerRef;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Flag OR-ed into a memcached packet's `extra_type` when no callback will
/// consume the reply.
pub const NETQ_FLAG_IMMEDIATE: i32 = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Memcached,
    Sql,
    Rpc,
}

#[derive(Debug)]
pub enum QueryRequest<'a> {
    /// Read at least `min_len` bytes of the request body into `buf`.
    HttpLoad { buf: &'a mut [u8], min_len: usize },
    /// Diagnostic round-trip: the runner answers with `val * val`.
    X2 { val: i32 },
    Connect {
        host: &'a str,
        port: i32,
        protocol: Protocol,
    },
    NetPacket {
        connection_id: i32,
        data: &'a [u8],
        timeout: Duration,
        protocol: Protocol,
        extra_type: i32,
    },
    Wait { timeout_ms: u64 },
    RpcAnswer { data: &'a [u8] },
}

impl QueryRequest<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            QueryRequest::HttpLoad { .. } => "http_load",
            QueryRequest::X2 { .. } => "x2",
            QueryRequest::Connect { .. } => "connect",
            QueryRequest::NetPacket { .. } => "net_packet",
            QueryRequest::Wait { .. } => "wait",
            QueryRequest::RpcAnswer { .. } => "rpc_answer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryAnswer {
    HttpLoad { loaded_bytes: usize },
    X2 { x2: i64 },
    Connect { connection_id: i32 },
    /// The answer record lives in the request's arena.
    NetPacket(AnswerRef),
    Done,
}

#[derive(Debug)]
pub struct Query<'a> {
    pub request: QueryRequest<'a>,
    pub answer: Option<QueryAnswer>,
}

impl<'a> Query<'a> {
    pub fn new(request: QueryRequest<'a>) -> Self {
        Self {
            request,
            answer: None,
        }
    }
}

/// Final output of a request handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptResult<'a> {
    pub exit_code: i32,
    pub headers: Option<&'a [u8]>,
    pub body: &'a [u8],
}

/// The collaborator that owns request execution and performs the actual
/// network work behind each query.
pub trait ScriptRunner {
    /// Executes `query` and stores its answer in `query.answer`.
    fn ask_query(&mut self, ctx: &mut QueryContext, query: &mut Query<'_>) -> Result<()>;

    fn set_script_result(&mut self, result: &ScriptResult<'_>);

    /// Seconds spent waiting on the network during this request.
    fn net_time(&self) -> f64 {
        0.0
    }

    /// Seconds since the request started.
    fn script_time(&self) -> f64 {
        0.0
    }

    fn net_queries_count(&self) -> u64 {
        0
    }
}
