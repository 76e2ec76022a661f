use crate::ansgen::{
    AnswerGen, AnswerGenerator, McAnswerGen, McEvent, NetAnsGen, SqlAnswerGen,
    MC_QUERY_TYPE_VERSION,
};
use crate::context::QueryContext;
use crate::error::{Error, Result};
use crate::net::NetEventKind;
use crate::queries::{
    Protocol, Query, QueryAnswer, QueryRequest, ScriptResult, ScriptRunner, NETQ_FLAG_IMMEDIATE,
};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Owned form of a memcached reply event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McReply {
    Value(Vec<u8>),
    End,
    Stored(bool),
    Version(Vec<u8>),
    Other(Vec<u8>),
}

impl McReply {
    pub fn as_event(&self) -> McEvent<'_> {
        match self {
            McReply::Value(data) => McEvent::Value(data),
            McReply::End => McEvent::End,
            McReply::Stored(stored) => McEvent::Stored(*stored),
            McReply::Version(data) => McEvent::Version(data),
            McReply::Other(data) => McEvent::Other(data),
        }
    }
}

/// What the network side "receives" for the next net packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    Memcached(Vec<McReply>),
    Sql { ready: Vec<u8>, rows: Vec<Vec<u8>> },
    Error(String),
    Timeout,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordedResult {
    pub exit_code: i32,
    pub headers: Option<Vec<u8>>,
    pub body: Vec<u8>,
}

/// In-process [`ScriptRunner`] that answers queries from a script instead of
/// the network.
///
/// Net packets consume [`ScriptedReply`] entries in order and drive the
/// matching answer generator with them. Waiting for net events echoes every
/// queued RPC request back as its own answer.
#[derive(Debug)]
pub struct LoopbackRunner {
    replies: VecDeque<ScriptedReply>,
    http_body: Vec<u8>,
    http_offset: usize,
    next_connection_id: i32,
    latency: Duration,
    net_time: Duration,
    net_queries: u64,
    started: Instant,
    rpc_answers: Vec<Vec<u8>>,
    results: Vec<RecordedResult>,
    last_extra_type: Option<i32>,
}

impl Default for LoopbackRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackRunner {
    pub fn new() -> Self {
        Self {
            replies: VecDeque::new(),
            http_body: Vec::new(),
            http_offset: 0,
            next_connection_id: 0,
            latency: Duration::from_micros(250),
            net_time: Duration::ZERO,
            net_queries: 0,
            started: Instant::now(),
            rpc_answers: Vec::new(),
            results: Vec::new(),
            last_extra_type: None,
        }
    }

    pub fn with_http_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.http_body = body.into();
        self.http_offset = 0;
        self
    }

    /// Simulated network time charged per net packet.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn push_reply(&mut self, reply: ScriptedReply) -> &mut Self {
        self.replies.push_back(reply);
        self
    }

    pub fn pending_replies(&self) -> usize {
        self.replies.len()
    }

    pub fn rpc_answers(&self) -> &[Vec<u8>] {
        &self.rpc_answers
    }

    pub fn results(&self) -> &[RecordedResult] {
        &self.results
    }

    /// `extra_type` of the most recent net packet.
    pub fn last_extra_type(&self) -> Option<i32> {
        self.last_extra_type
    }

    fn load_http(&mut self, buf: &mut [u8]) -> usize {
        let rest = &self.http_body[self.http_offset..];
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.http_offset += n;
        n
    }

    fn run_packet(
        &mut self,
        ctx: &mut QueryContext,
        connection_id: i32,
        protocol: Protocol,
        extra_type: i32,
    ) -> Result<QueryAnswer> {
        self.net_queries += 1;
        self.net_time += self.latency;
        self.last_extra_type = Some(extra_type);

        let arena = &mut ctx.arena;
        let mut generator: AnswerGenerator = match protocol {
            Protocol::Memcached => {
                let mut mc = McAnswerGen::new(arena)?;
                if extra_type & !NETQ_FLAG_IMMEDIATE == MC_QUERY_TYPE_VERSION {
                    mc.set_query_type(arena, MC_QUERY_TYPE_VERSION);
                }
                mc.into()
            }
            Protocol::Sql => {
                let mut sql = SqlAnswerGen::new(arena)?;
                sql.set_writer(None)?;
                sql.into()
            }
            Protocol::Rpc => AnswerGenerator::Net(NetAnsGen::new(arena)?),
        };

        let reply = self.replies.pop_front().unwrap_or(ScriptedReply::Timeout);
        trace!(connection_id, ?protocol, "loopback reply for net packet");
        match (&mut generator, reply) {
            (AnswerGenerator::Memcached(mc), ScriptedReply::Memcached(events)) => {
                for event in &events {
                    mc.feed(arena, event.as_event())?;
                }
            }
            (AnswerGenerator::Sql(sql), ScriptedReply::Sql { ready, rows }) => {
                sql.ready(&ready)?;
                for row in &rows {
                    sql.add_row(arena, row)?;
                }
                sql.done(arena)?;
            }
            (generator, ScriptedReply::Error(message)) => {
                generator.error_fmt(arena, format_args!("{}", message))?;
                generator.set_description_fmt(
                    arena,
                    format_args!("{:?} connection {}", protocol, connection_id),
                )?;
            }
            (generator, ScriptedReply::Timeout) => generator.timeout(arena),
            (_, reply) => {
                return Err(Error::Protocol(format!(
                    "scripted reply {:?} does not match a {:?} packet",
                    reply, protocol
                )))
            }
        }
        Ok(QueryAnswer::NetPacket(generator.answer()))
    }

    /// Answers every queued RPC request with a copy of its own bytes.
    fn echo_rpc_queries(&mut self, ctx: &mut QueryContext) -> Result<()> {
        while let Some(query) = ctx.exchange.pop_net_query() {
            let event = ctx
                .exchange
                .create_rpc_answer_event(query.slot_id, query.request.len())?;
            if let NetEventKind::RpcAnswer { result } = &mut event.kind {
                result.copy_from_slice(&query.request);
            }
            self.net_queries += 1;
            self.net_time += self.latency;
            ctx.exchange.free_net_query(query);
        }
        Ok(())
    }
}

impl ScriptRunner for LoopbackRunner {
    fn ask_query(&mut self, ctx: &mut QueryContext, query: &mut Query<'_>) -> Result<()> {
        let answer = match &mut query.request {
            QueryRequest::HttpLoad { buf, .. } => QueryAnswer::HttpLoad {
                loaded_bytes: self.load_http(buf),
            },
            QueryRequest::X2 { val } => QueryAnswer::X2 {
                x2: i64::from(*val) * i64::from(*val),
            },
            QueryRequest::Connect { host, port, .. } => {
                self.next_connection_id += 1;
                debug!(host = *host, port = *port, id = self.next_connection_id, "loopback connect");
                QueryAnswer::Connect {
                    connection_id: self.next_connection_id,
                }
            }
            QueryRequest::NetPacket {
                connection_id,
                protocol,
                extra_type,
                ..
            } => self.run_packet(ctx, *connection_id, *protocol, *extra_type)?,
            QueryRequest::Wait { .. } => {
                self.echo_rpc_queries(ctx)?;
                QueryAnswer::Done
            }
            QueryRequest::RpcAnswer { data } => {
                self.rpc_answers.push(data.to_vec());
                QueryAnswer::Done
            }
        };
        query.answer = Some(answer);
        Ok(())
    }

    fn set_script_result(&mut self, result: &ScriptResult<'_>) {
        self.results.push(RecordedResult {
            exit_code: result.exit_code,
            headers: result.headers.map(<[u8]>::to_vec),
            body: result.body.to_vec(),
        });
    }

    fn net_time(&self) -> f64 {
        self.net_time.as_secs_f64()
    }

    fn script_time(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn net_queries_count(&self) -> u64 {
        self.net_queries
    }
}
