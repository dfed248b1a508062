//! One ICAP request/response exchange over a byte stream.
//!
//! [`IcapConnection`] owns its transport exclusively and is generic over any
//! `AsyncRead + AsyncWrite + Unpin` stream: a `TcpStream`, a TLS-wrapped
//! socket, or `tokio::io::duplex` in tests. The engine never opens sockets
//! or resolves names; transport setup stays with the caller.
//!
//! One connection processes exactly one in-flight exchange; concurrent
//! exchanges require separate stream + connection pairs. After
//! `Complete`/`Failed` the connection goes back to `Idle` via
//! [`IcapConnection::reset`], allowing further exchanges on the same stream.
//!
//! The timeout is a *forward progress* deadline: it restarts after every
//! successful read or write, so chunked bodies that legitimately arrive in
//! bursts do not trip it.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::builder::{Authority, MessageBuilder};
use crate::error::ConnError;
use crate::parser::wire::{encode_chunk, encode_terminal};
use crate::parser::{ParseEvent, ResponseParser};
use crate::request::{Method, Request};
use crate::response::{Response, StatusCode};

/// Progress deadline matching the classic ICAP client default.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

const READ_CHUNK: usize = 4096;

/// Lifecycle of one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Idle,
    Sending,
    AwaitingResponse,
    /// A preview was sent and body bytes were withheld; the server will
    /// answer `100 Continue` or short-circuit (204/error).
    AwaitingContinue,
    /// Writing the withheld body after a `100 Continue`.
    SendingRemainder,
    ReceivingHeaders,
    ReceivingBody,
    Complete,
    Failed,
}

impl ConnState {
    fn name(self) -> &'static str {
        match self {
            ConnState::Idle => "Idle",
            ConnState::Sending => "Sending",
            ConnState::AwaitingResponse => "AwaitingResponse",
            ConnState::AwaitingContinue => "AwaitingContinue",
            ConnState::SendingRemainder => "SendingRemainder",
            ConnState::ReceivingHeaders => "ReceivingHeaders",
            ConnState::ReceivingBody => "ReceivingBody",
            ConnState::Complete => "Complete",
            ConnState::Failed => "Failed",
        }
    }
}

/// Orchestrates one ICAP exchange over an owned byte stream.
#[derive(Debug)]
pub struct IcapConnection<S> {
    stream: S,
    authority: Authority,
    deadline: Duration,
    state: ConnState,
    method: Option<Method>,
    parser: Option<ResponseParser>,
    /// Body bytes withheld by the preview, written after `100 Continue`.
    remainder: Option<Vec<u8>>,
}

impl<S> IcapConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, authority: Authority) -> Self {
        Self {
            stream,
            authority,
            deadline: DEFAULT_TIMEOUT,
            state: ConnState::Idle,
            method: None,
            parser: None,
            remainder: None,
        }
    }

    /// Override the forward-progress deadline.
    pub fn with_timeout(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Give back the transport, discarding any exchange state.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Build and write one request. The connection must be `Idle`.
    pub async fn send(&mut self, request: &Request) -> Result<(), ConnError> {
        if self.state != ConnState::Idle {
            return Err(ConnError::NotIdle(self.state.name()));
        }

        // Build errors leave the connection untouched: nothing was written.
        let built = MessageBuilder::new(request, &self.authority).build()?;
        debug!(
            method = %request.method,
            bytes = built.bytes.len(),
            expect_continue = built.expect_continue,
            "sending request"
        );

        self.state = ConnState::Sending;
        self.write_all_deadline(&built.bytes).await?;

        self.method = Some(request.method);
        self.parser = Some(ResponseParser::new(request.method));
        self.remainder = built.remaining_body;
        self.state = if built.expect_continue {
            ConnState::AwaitingContinue
        } else {
            ConnState::AwaitingResponse
        };
        Ok(())
    }

    /// Read, parse, and return the server's response, driving preview
    /// continuation when the server asks for the rest of the body.
    ///
    /// Body chunks are accumulated into [`Response::body`]; callers that
    /// need streaming delivery use [`ResponseParser`] directly.
    pub async fn receive(&mut self) -> Result<Response, ConnError> {
        if !matches!(
            self.state,
            ConnState::AwaitingResponse | ConnState::AwaitingContinue
        ) {
            return Err(ConnError::NotIdle(self.state.name()));
        }

        let mut body = Vec::new();
        // Bytes buffered past a 100 Continue, replayed into the next parser.
        let mut carry: Vec<u8> = Vec::new();

        loop {
            let input = if carry.is_empty() {
                let mut tmp = [0u8; READ_CHUNK];
                let n = match timeout(self.deadline, self.stream.read(&mut tmp)).await {
                    Err(_) => return Err(self.fail(ConnError::Timeout(self.deadline))),
                    Ok(Err(e)) => return Err(self.fail(ConnError::ReadFailed(e))),
                    Ok(Ok(n)) => n,
                };
                if n == 0 {
                    let source = self
                        .parser
                        .as_mut()
                        .and_then(|p| p.finish().err());
                    return Err(self.fail(ConnError::ConnectionClosed { source }));
                }
                trace!(n, "read");
                tmp[..n].to_vec()
            } else {
                std::mem::take(&mut carry)
            };

            let parser = self.parser.as_mut().expect("receive implies parser");
            let events = match parser.feed(&input) {
                Ok(ev) => ev,
                Err(e) => return Err(self.fail(ConnError::ProtocolViolation(e))),
            };

            for event in events {
                match event {
                    ParseEvent::StatusReady { code, ref reason } => {
                        debug!(%code, reason, "response status");
                        self.state = ConnState::ReceivingHeaders;
                    }
                    ParseEvent::HeadersReady => {
                        self.state = ConnState::ReceivingBody;
                    }
                    ParseEvent::BodyChunk(chunk) => {
                        body.extend_from_slice(&chunk);
                    }
                    ParseEvent::Done => {
                        let parser = self.parser.take().expect("Done implies parser");
                        if parser.status() == Some(StatusCode::Continue100) {
                            let Some(rest) = self.remainder.take() else {
                                return Err(self.fail(ConnError::UnexpectedContinue));
                            };
                            debug!(bytes = rest.len(), "100 Continue, sending remainder");
                            carry = parser.into_remaining();
                            self.state = ConnState::SendingRemainder;
                            let mut out = Vec::with_capacity(rest.len() + 16);
                            encode_chunk(&mut out, &rest);
                            encode_terminal(&mut out, false);
                            self.write_all_deadline(&out).await?;
                            let method = self.method.expect("send stored method");
                            self.parser = Some(ResponseParser::new(method));
                            self.state = ConnState::AwaitingResponse;
                            break;
                        }
                        let mut response = parser
                            .into_response()
                            .map_err(|e| self.fail(ConnError::ProtocolViolation(e)))?;
                        response.body = body;
                        self.state = ConnState::Complete;
                        debug!(status = %response.status_code, "exchange complete");
                        return Ok(response);
                    }
                }
            }
        }
    }

    /// One full exchange: [`send`](Self::send) then
    /// [`receive`](Self::receive).
    pub async fn exchange(&mut self, request: &Request) -> Result<Response, ConnError> {
        self.send(request).await?;
        self.receive().await
    }

    /// Return a completed or failed connection to `Idle` for reuse on the
    /// same stream, clearing parser and preview state.
    pub fn reset(&mut self) -> Result<(), ConnError> {
        match self.state {
            ConnState::Idle | ConnState::Complete | ConnState::Failed => {
                self.parser = None;
                self.remainder = None;
                self.method = None;
                self.state = ConnState::Idle;
                Ok(())
            }
            other => Err(ConnError::NotIdle(other.name())),
        }
    }

    async fn write_all_deadline(&mut self, bytes: &[u8]) -> Result<(), ConnError> {
        let io = async {
            self.stream.write_all(bytes).await?;
            self.stream.flush().await
        };
        match timeout(self.deadline, io).await {
            Err(_) => {
                self.state = ConnState::Failed;
                Err(ConnError::Timeout(self.deadline))
            }
            Ok(Err(e)) => {
                self.state = ConnState::Failed;
                Err(ConnError::WriteFailed(e))
            }
            Ok(Ok(())) => Ok(()),
        }
    }

    fn fail(&mut self, err: ConnError) -> ConnError {
        self.state = ConnState::Failed;
        err
    }
}
