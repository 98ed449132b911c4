//! Minimal PostgreSQL v3 frontend for the replication-mode connection.
//!
//! tokio-postgres cannot enter CopyBoth mode, so the streaming side speaks the
//! protocol directly: startup and authentication, simple queries, and framed
//! reads that are safe to cancel at any await point.

use std::collections::HashMap;

use bytes::{Buf, Bytes, BytesMut};
use fallible_iterator::FallibleIterator;
use postgres_protocol::authentication::{
    md5_hash,
    sasl::{ChannelBinding, ScramSha256, SCRAM_SHA_256},
};
use postgres_protocol::message::backend::{self, ErrorFields, Message};
use postgres_protocol::message::frontend;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_postgres::tls::{MakeTlsConnect, TlsConnect};
use tokio_postgres_rustls_improved::MakeRustlsConnect;
use tracing::{debug, info, warn};

use crate::connect::{tls_config, ConnectionParams};
use crate::error::{PgError, PgResult, ServerError};

/// Largest backend message accepted; guards against a corrupt length prefix.
const MAX_MESSAGE_LEN: usize = 1 << 30;

/// CopyBothResponse, which `backend::Message` does not model.
const COPY_BOTH_RESPONSE_TAG: u8 = b'W';

pub(crate) trait Io: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

/// Authentication request from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthRequest {
    Ok,
    Cleartext,
    Md5([u8; 4]),
    Sasl(Vec<String>),
    SaslContinue(Bytes),
    SaslFinal(Bytes),
    Unsupported(&'static str),
}

/// A backend message, reduced to what this client acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    Authentication(AuthRequest),
    ParameterStatus { name: String, value: String },
    ReadyForQuery,
    DataRow(Vec<Option<Bytes>>),
    CommandComplete(String),
    CopyBothResponse,
    CopyData(Bytes),
    CopyDone,
    Error(ServerError),
    Notice(ServerError),
    Other,
}

impl BackendMessage {
    /// Split one complete message off the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched when the message is not
    /// fully buffered yet.
    pub fn parse(buf: &mut BytesMut) -> PgResult<Option<Self>> {
        let header = match backend::Header::parse(&buf[..]).map_err(protocol_error)? {
            Some(header) => header,
            None => return Ok(None),
        };
        let len = header.len() as usize;
        if len > MAX_MESSAGE_LEN {
            return Err(PgError::Protocol(format!(
                "invalid message length {} for '{}'",
                len,
                header.tag() as char
            )));
        }

        if header.tag() == COPY_BOTH_RESPONSE_TAG {
            if buf.len() < len + 1 {
                return Ok(None);
            }
            buf.advance(len + 1);
            return Ok(Some(BackendMessage::CopyBothResponse));
        }

        match backend::Message::parse(buf).map_err(protocol_error)? {
            Some(msg) => Self::from_backend(msg).map(Some),
            None => Ok(None),
        }
    }

    fn from_backend(msg: backend::Message) -> PgResult<Self> {
        let msg = match msg {
            Message::AuthenticationOk => BackendMessage::Authentication(AuthRequest::Ok),
            Message::AuthenticationCleartextPassword => {
                BackendMessage::Authentication(AuthRequest::Cleartext)
            }
            Message::AuthenticationMd5Password(body) => {
                BackendMessage::Authentication(AuthRequest::Md5(body.salt()))
            }
            Message::AuthenticationSasl(body) => {
                let mut mechanisms = Vec::new();
                let mut iter = body.mechanisms();
                while let Some(mechanism) = iter.next().map_err(protocol_error)? {
                    mechanisms.push(mechanism.to_string());
                }
                BackendMessage::Authentication(AuthRequest::Sasl(mechanisms))
            }
            Message::AuthenticationSaslContinue(body) => BackendMessage::Authentication(
                AuthRequest::SaslContinue(Bytes::copy_from_slice(body.data())),
            ),
            Message::AuthenticationSaslFinal(body) => BackendMessage::Authentication(
                AuthRequest::SaslFinal(Bytes::copy_from_slice(body.data())),
            ),
            Message::AuthenticationKerberosV5 => {
                BackendMessage::Authentication(AuthRequest::Unsupported("KerberosV5"))
            }
            Message::AuthenticationScmCredential => {
                BackendMessage::Authentication(AuthRequest::Unsupported("SCM credential"))
            }
            Message::AuthenticationGss | Message::AuthenticationGssContinue(_) => {
                BackendMessage::Authentication(AuthRequest::Unsupported("GSS"))
            }
            Message::AuthenticationSspi => {
                BackendMessage::Authentication(AuthRequest::Unsupported("SSPI"))
            }
            Message::ParameterStatus(body) => BackendMessage::ParameterStatus {
                name: body.name().map_err(protocol_error)?.to_string(),
                value: body.value().map_err(protocol_error)?.to_string(),
            },
            Message::ReadyForQuery(_) => BackendMessage::ReadyForQuery,
            Message::DataRow(body) => {
                let mut values = Vec::new();
                let mut ranges = body.ranges();
                while let Some(range) = ranges.next().map_err(protocol_error)? {
                    values.push(range.map(|r| body.buffer_bytes().slice(r)));
                }
                BackendMessage::DataRow(values)
            }
            Message::CommandComplete(body) => {
                BackendMessage::CommandComplete(body.tag().map_err(protocol_error)?.to_string())
            }
            Message::CopyData(body) => BackendMessage::CopyData(body.into_bytes()),
            Message::CopyDone => BackendMessage::CopyDone,
            Message::ErrorResponse(body) => BackendMessage::Error(server_error(body.fields())?),
            Message::NoticeResponse(body) => BackendMessage::Notice(server_error(body.fields())?),
            _ => BackendMessage::Other,
        };
        Ok(msg)
    }
}

fn server_error(mut fields: ErrorFields<'_>) -> PgResult<ServerError> {
    let mut err = ServerError::default();
    while let Some(field) = fields.next().map_err(protocol_error)? {
        let value = String::from_utf8_lossy(field.value_bytes()).into_owned();
        match field.type_() {
            b'S' => err.severity = value,
            b'C' => err.code = value,
            b'M' => err.message = value,
            b'D' => err.detail = Some(value),
            _ => {}
        }
    }
    Ok(err)
}

fn protocol_error(e: std::io::Error) -> PgError {
    PgError::Protocol(e.to_string())
}

/// An authenticated connection in replication mode.
pub struct WireConnection {
    stream: Box<dyn Io>,
    buf: BytesMut,
    parameters: HashMap<String, String>,
}

impl std::fmt::Debug for WireConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireConnection")
            .field("buffered", &self.buf.len())
            .field("parameters", &self.parameters)
            .finish()
    }
}

impl WireConnection {
    /// Open a connection with `replication=database` and authenticate.
    pub async fn connect(params: &ConnectionParams) -> PgResult<Self> {
        info!(host = %params.host, port = params.port, user = %params.user, "Opening replication connection");

        let tcp = TcpStream::connect((params.host.as_str(), params.port))
            .await
            .map_err(|e| PgError::Connection(format!("{}:{}: {}", params.host, params.port, e)))?;
        tcp.set_nodelay(true)?;

        let stream = if params.requires_tls() {
            upgrade_tls(tcp, &params.host).await?
        } else {
            Box::new(tcp) as Box<dyn Io>
        };

        let mut conn = Self::from_stream(stream);

        let mut out = BytesMut::new();
        frontend::startup_message(
            [
                ("user", params.user.as_str()),
                ("database", params.database.as_str()),
                ("replication", "database"),
                ("application_name", "walcap"),
            ],
            &mut out,
        )?;
        conn.write(&out).await?;

        conn.authenticate(params).await?;
        conn.wait_ready().await?;
        debug!(
            server_version = conn.parameter("server_version").unwrap_or("unknown"),
            "Replication connection ready"
        );
        Ok(conn)
    }

    fn from_stream(stream: Box<dyn Io>) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(8 * 1024),
            parameters: HashMap::new(),
        }
    }

    /// A `ParameterStatus` value reported by the server.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// Read the next message. Cancel-safe: no partially read message is lost
    /// when the future is dropped.
    pub async fn read_message(&mut self) -> PgResult<BackendMessage> {
        loop {
            if let Some(msg) = BackendMessage::parse(&mut self.buf)? {
                match msg {
                    BackendMessage::ParameterStatus { name, value } => {
                        self.parameters.insert(name, value);
                    }
                    BackendMessage::Notice(notice) => {
                        debug!(notice = %notice, "Server notice");
                    }
                    other => return Ok(other),
                }
                continue;
            }
            if self.stream.read_buf(&mut self.buf).await? == 0 {
                return Err(PgError::Closed);
            }
        }
    }

    pub async fn write(&mut self, bytes: &[u8]) -> PgResult<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Send a CopyData message carrying `payload`.
    pub async fn write_copy_data(&mut self, payload: &[u8]) -> PgResult<()> {
        let mut out = BytesMut::with_capacity(payload.len() + 5);
        frontend::CopyData::new(payload)?.write(&mut out);
        self.write(&out).await
    }

    /// Run a simple query and collect its rows as text.
    pub async fn simple_query(&mut self, sql: &str) -> PgResult<Vec<Vec<Option<String>>>> {
        let mut out = BytesMut::new();
        frontend::query(sql, &mut out)?;
        self.write(&out).await?;

        let mut rows = Vec::new();
        let mut error = None;
        loop {
            match self.read_message().await? {
                BackendMessage::DataRow(values) => rows.push(
                    values
                        .into_iter()
                        .map(|v| v.map(|b| String::from_utf8_lossy(&b).into_owned()))
                        .collect(),
                ),
                BackendMessage::Error(e) => error = Some(e),
                BackendMessage::ReadyForQuery => break,
                _ => {}
            }
        }

        match error {
            Some(e) => Err(PgError::Server(e)),
            None => Ok(rows),
        }
    }

    /// Send a query expected to switch the connection into CopyBoth mode.
    pub async fn start_copy_both(&mut self, sql: &str) -> PgResult<()> {
        let mut out = BytesMut::new();
        frontend::query(sql, &mut out)?;
        self.write(&out).await?;

        loop {
            match self.read_message().await? {
                BackendMessage::CopyBothResponse => return Ok(()),
                BackendMessage::Error(e) => {
                    // The server follows an error with ReadyForQuery.
                    if let Err(drain) = self.drain_until_ready().await {
                        debug!(error = %drain, "Connection lost after START_REPLICATION failed");
                    }
                    return Err(PgError::Server(e));
                }
                BackendMessage::ReadyForQuery => {
                    return Err(PgError::Protocol(
                        "server did not enter copy mode".to_string(),
                    ))
                }
                _ => {}
            }
        }
    }

    /// Send Terminate and shut the socket down.
    pub async fn terminate(&mut self) -> PgResult<()> {
        let mut out = BytesMut::new();
        frontend::terminate(&mut out);
        self.write(&out).await?;
        self.stream.shutdown().await?;
        Ok(())
    }

    async fn authenticate(&mut self, params: &ConnectionParams) -> PgResult<()> {
        let mut scram: Option<ScramSha256> = None;

        loop {
            let request = match self.read_message().await? {
                BackendMessage::Authentication(request) => request,
                BackendMessage::Error(e) => return Err(PgError::Server(e)),
                other => {
                    return Err(PgError::Protocol(format!(
                        "unexpected message during authentication: {:?}",
                        other
                    )))
                }
            };

            let mut out = BytesMut::new();
            match request {
                AuthRequest::Ok => {
                    debug!("Authentication successful");
                    return Ok(());
                }
                AuthRequest::Cleartext => {
                    frontend::password_message(params.password.as_bytes(), &mut out)?;
                }
                AuthRequest::Md5(salt) => {
                    let hash = md5_hash(params.user.as_bytes(), params.password.as_bytes(), salt);
                    frontend::password_message(hash.as_bytes(), &mut out)?;
                }
                AuthRequest::Sasl(mechanisms) => {
                    if !mechanisms.iter().any(|m| m == SCRAM_SHA_256) {
                        return Err(PgError::Connection(format!(
                            "unsupported SASL mechanisms: {}",
                            mechanisms.join(", ")
                        )));
                    }
                    let state = ScramSha256::new(params.password.as_bytes(), ChannelBinding::unsupported());
                    frontend::sasl_initial_response(SCRAM_SHA_256, state.message(), &mut out)?;
                    scram = Some(state);
                }
                AuthRequest::SaslContinue(data) => {
                    let state = scram
                        .as_mut()
                        .ok_or_else(|| PgError::Protocol("unexpected SASL continue".to_string()))?;
                    state.update(&data)?;
                    frontend::sasl_response(state.message(), &mut out)?;
                }
                AuthRequest::SaslFinal(data) => {
                    let state = scram
                        .as_mut()
                        .ok_or_else(|| PgError::Protocol("unexpected SASL final".to_string()))?;
                    state.finish(&data)?;
                    continue;
                }
                AuthRequest::Unsupported(method) => {
                    return Err(PgError::Connection(format!(
                        "unsupported authentication method {}",
                        method
                    )))
                }
            }
            self.write(&out).await?;
        }
    }

    async fn wait_ready(&mut self) -> PgResult<()> {
        loop {
            match self.read_message().await? {
                BackendMessage::ReadyForQuery => return Ok(()),
                BackendMessage::Error(e) => return Err(PgError::Server(e)),
                _ => {}
            }
        }
    }

    async fn drain_until_ready(&mut self) -> PgResult<()> {
        loop {
            if let BackendMessage::ReadyForQuery = self.read_message().await? {
                return Ok(());
            }
        }
    }
}

/// Negotiate TLS with an SSLRequest, then hand the socket to rustls.
async fn upgrade_tls(mut tcp: TcpStream, host: &str) -> PgResult<Box<dyn Io>> {
    let mut out = BytesMut::new();
    frontend::ssl_request(&mut out);
    tcp.write_all(&out).await?;

    match tcp.read_u8().await? {
        b'S' => {}
        b'N' => {
            return Err(PgError::Connection(
                "server does not support TLS but sslmode requires it".to_string(),
            ))
        }
        other => {
            return Err(PgError::Protocol(format!(
                "unexpected SSLRequest response '{}'",
                other as char
            )))
        }
    }

    let mut make = MakeRustlsConnect::new(tls_config()?);
    let connector = <MakeRustlsConnect as MakeTlsConnect<TcpStream>>::make_tls_connect(&mut make, host)
        .map_err(tls_error)?;
    let stream = connector.connect(tcp).await.map_err(tls_error)?;
    debug!("TLS established");
    Ok(Box::new(stream))
}

fn tls_error<E: Into<Box<dyn std::error::Error + Send + Sync>>>(e: E) -> PgError {
    let e = e.into();
    warn!(error = %e, "TLS negotiation failed");
    PgError::Connection(format!("TLS error: {}", e))
}
