//! Synchronous-looking query functions for request handler code.
//!
//! Each call builds a typed [`Query`], hands it to the [`ScriptRunner`] and
//! unpacks the answer. Net packet answers point into the request arena and
//! stay readable until the request ends.

use crate::ansgen::NetAnswer;
use crate::context::QueryContext;
use crate::error::{Error, Result};
use crate::logging::QueryTimer;
use crate::memory::AnswerRef;
use crate::net::{NetEvent, NetQueryKind, SlotId};
use crate::queries::{
    Protocol, Query, QueryAnswer, QueryRequest, ScriptResult, ScriptRunner, NETQ_FLAG_IMMEDIATE,
};
use crate::QueryRuntimeConfig;
use bytes::Bytes;
use std::borrow::Cow;
use std::time::Duration;
use tracing::{debug, warn};

pub struct QueryEngine<R: ScriptRunner> {
    ctx: QueryContext,
    runner: R,
    last_net_error: String,
}

impl<R: ScriptRunner> std::fmt::Debug for QueryEngine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("ctx", &self.ctx)
            .field("last_net_error", &self.last_net_error)
            .finish()
    }
}

impl<R: ScriptRunner> QueryEngine<R> {
    pub fn new(config: QueryRuntimeConfig, runner: R) -> Result<Self> {
        Ok(Self::with_context(QueryContext::new(config)?, runner))
    }

    pub fn with_context(ctx: QueryContext, runner: R) -> Self {
        Self {
            ctx,
            runner,
            last_net_error: String::new(),
        }
    }

    pub fn context(&self) -> &QueryContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut QueryContext {
        &mut self.ctx
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn runner_mut(&mut self) -> &mut R {
        &mut self.runner
    }

    pub fn start_request(&mut self) -> Result<()> {
        self.ctx.on_request_start()
    }

    pub fn finish_request(&mut self) -> Result<()> {
        self.ctx.on_request_end()
    }

    pub fn between_requests(&mut self) {
        self.ctx.between_requests()
    }

    /// Hands `request` to the runner and waits for its answer.
    pub fn ask(&mut self, request: QueryRequest<'_>) -> Result<QueryAnswer> {
        if !self.ctx.is_running() {
            return Err(Error::NotRunning);
        }
        let name = request.name();
        let timer = QueryTimer::new(name);
        let mut query = Query::new(request);
        let result = self.runner.ask_query(&mut self.ctx, &mut query).and_then(|()| {
            query
                .answer
                .ok_or_else(|| Error::Protocol(format!("{} query left unanswered", name)))
        });
        timer.complete(&result);
        result
    }

    /// Loads request body bytes into `buf`; returns how many were read.
    pub fn http_load(&mut self, buf: &mut [u8], min_len: usize) -> Result<usize> {
        let max_len = buf.len();
        match self.ask(QueryRequest::HttpLoad { buf, min_len })? {
            QueryAnswer::HttpLoad { loaded_bytes } if min_len <= loaded_bytes && loaded_bytes <= max_len => {
                Ok(loaded_bytes)
            }
            QueryAnswer::HttpLoad { loaded_bytes } => Err(Error::Protocol(format!(
                "http load returned {} bytes, expected {}..={}",
                loaded_bytes, min_len, max_len
            ))),
            other => Err(unexpected("http_load", other)),
        }
    }

    pub fn query_x2(&mut self, val: i32) -> Result<i64> {
        match self.ask(QueryRequest::X2 { val })? {
            QueryAnswer::X2 { x2 } => Ok(x2),
            other => Err(unexpected("x2", other)),
        }
    }

    pub fn connect(&mut self, host: &str, port: i32, protocol: Protocol) -> Result<i32> {
        match self.ask(QueryRequest::Connect {
            host,
            port,
            protocol,
        })? {
            QueryAnswer::Connect { connection_id } => Ok(connection_id),
            other => Err(unexpected("connect", other)),
        }
    }

    pub fn mc_connect_to(&mut self, host: &str, port: i32) -> Result<i32> {
        self.connect(host, port, Protocol::Memcached)
    }

    pub fn db_proxy_connect(&mut self) -> Result<i32> {
        self.connect("unknown", -1, Protocol::Sql)
    }

    pub fn rpc_connect_to(&mut self, host: &str, port: i32) -> Result<i32> {
        self.connect(host, port, Protocol::Rpc)
    }

    pub fn net_query_packet(
        &mut self,
        connection_id: i32,
        data: &[u8],
        timeout: Duration,
        protocol: Protocol,
        extra_type: i32,
    ) -> Result<AnswerRef> {
        match self.ask(QueryRequest::NetPacket {
            connection_id,
            data,
            timeout,
            protocol,
            extra_type,
        })? {
            QueryAnswer::NetPacket(answer) => Ok(answer),
            other => Err(unexpected("net_packet", other)),
        }
    }

    /// Runs a memcached request. Without a callback the query is sent in
    /// immediate mode and the reply is not read back.
    pub fn mc_run_query(
        &mut self,
        host_num: i32,
        request: &[u8],
        timeout_ms: u64,
        query_type: i32,
        callback: Option<&mut dyn FnMut(&[u8])>,
    ) -> Result<()> {
        let extra_type = if callback.is_none() {
            query_type | NETQ_FLAG_IMMEDIATE
        } else {
            query_type
        };
        let answer = self.net_query_packet(
            host_num,
            request,
            Duration::from_millis(timeout_ms),
            Protocol::Memcached,
            extra_type,
        )?;

        let answer = self.finished_answer(answer, "mc", callback.is_some())?;
        let Some(callback) = callback else {
            return Ok(());
        };
        let result = answer
            .result
            .ok_or_else(|| Error::Protocol("memcached answer without result".into()))?;
        callback(self.ctx.arena.bytes(result)?);
        Ok(())
    }

    /// Runs an SQL request, calling `callback` once per result row in order.
    pub fn sql_run_query(
        &mut self,
        host_num: i32,
        request: &[u8],
        timeout_ms: u64,
        callback: &mut dyn FnMut(&[u8]),
    ) -> Result<()> {
        let answer = self.net_query_packet(
            host_num,
            request,
            Duration::from_millis(timeout_ms),
            Protocol::Sql,
            0,
        )?;

        let answer = self.finished_answer(answer, "sql", true)?;
        let chain = answer
            .chain
            .ok_or_else(|| Error::Protocol("sql answer without rows".into()))?;
        for row in chain.iter(&self.ctx.arena) {
            callback(row?);
        }
        Ok(())
    }

    /// Queues an RPC request for the network side and returns the slot id its
    /// answer event will carry.
    pub fn rpc_send_query(&mut self, host_num: i32, request: Bytes, timeout_ms: i32) -> Result<SlotId> {
        let exchange = &mut self.ctx.exchange;
        let slot = exchange.create_net_query(NetQueryKind::RpcSend)?;
        let slot_id = match exchange.create_slot() {
            Ok(slot_id) => slot_id,
            Err(e) => {
                exchange.unalloc_net_query(slot)?;
                warn!(host_num, "rpc query dropped, slot ids exhausted");
                return Err(e);
            }
        };

        let query = exchange
            .net_query_mut(slot)
            .ok_or_else(|| Error::Memory("net query slot vanished".into()))?;
        query.slot_id = slot_id;
        query.host_num = host_num;
        query.request = request;
        query.timeout_ms = timeout_ms;
        debug!(slot_id, host_num, "rpc query queued");
        Ok(slot_id)
    }

    pub fn wait_net_events(&mut self, timeout_ms: u64) -> Result<()> {
        self.ask(QueryRequest::Wait { timeout_ms }).map(|_| ())
    }

    pub fn pop_net_event(&mut self) -> Option<NetEvent> {
        self.ctx.exchange.pop_net_event()
    }

    pub fn rpc_answer(&mut self, data: &[u8]) -> Result<()> {
        self.ask(QueryRequest::RpcAnswer { data }).map(|_| ())
    }

    pub fn http_set_result(&mut self, headers: &[u8], body: &[u8], exit_code: i32) {
        self.runner.set_script_result(&ScriptResult {
            exit_code,
            headers: Some(headers),
            body,
        });
    }

    pub fn rpc_set_result(&mut self, body: &[u8], exit_code: i32) {
        self.runner.set_script_result(&ScriptResult {
            exit_code,
            headers: None,
            body,
        });
    }

    pub fn net_time(&self) -> f64 {
        self.runner.net_time()
    }

    pub fn script_time(&self) -> f64 {
        self.runner.script_time()
    }

    pub fn net_queries_count(&self) -> u64 {
        self.runner.net_queries_count()
    }

    /// Error text of the most recent failed memcached or SQL query.
    pub fn last_net_error(&self) -> &str {
        &self.last_net_error
    }

    fn save_last_net_error(&mut self, message: &str) {
        self.last_net_error.clear();
        let mut len = message.len().min(self.ctx.config().max_net_error_len);
        while !message.is_char_boundary(len) {
            len -= 1;
        }
        self.last_net_error.push_str(&message[..len]);
    }

    /// Looks up an answer, turning an error status into `Err`. Immediate
    /// queries are not waited on, so they may still be pending.
    fn finished_answer(&mut self, answer: AnswerRef, kind: &'static str, waited: bool) -> Result<NetAnswer> {
        let answer = self
            .ctx
            .arena
            .answer(answer)
            .cloned()
            .ok_or(Error::DanglingSpan)?;
        if answer.is_error() {
            let arena = &self.ctx.arena;
            let message = answer
                .error_text(arena)
                .map(Cow::into_owned)
                .unwrap_or_default();
            let description = answer.description_text(arena).map(Cow::into_owned);
            if waited {
                warn!(
                    kind,
                    description = description.as_deref().unwrap_or(""),
                    %message,
                    "net query failed"
                );
            }
            self.save_last_net_error(&message);
            return Err(Error::NetQuery {
                message,
                description,
            });
        }
        if waited && !answer.is_ok() {
            return Err(Error::Protocol(format!("{} answer still pending", kind)));
        }
        Ok(answer)
    }
}

fn unexpected(query: &'static str, answer: QueryAnswer) -> Error {
    Error::Protocol(format!("{} query got {:?}", query, answer))
}
