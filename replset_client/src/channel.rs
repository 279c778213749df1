//! The transport boundary. A [`Channel`] is a cheap, cloneable handle to one
//! socket; the socket itself lives in a task owned by the channel.
use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};

use dyn_clone::DynClone;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::mpsc,
    task::JoinHandle,
};
use tracing::Instrument;

use crate::{
    connection::ChannelId,
    error_chain_fmt,
    protocol::{ChannelEvent, EventSender, Request},
    wire_codec::WireCodec,
};

/// Requests made through a channel are asynchronous: they are queued and
/// their outcome is reported later as a [`ChannelEvent`].
pub trait Channel: DynClone + Debug + Send + Sync {
    fn id(&self) -> ChannelId;

    fn is_connected(&self) -> bool;

    /// False once the channel was closed for good.
    fn is_open(&self) -> bool;

    fn connect(&self, host: &str, port: u16) -> Result<(), ChannelError>;

    fn disconnect(&self) -> Result<(), ChannelError>;

    fn close(&self) -> Result<(), ChannelError>;

    /// Queues `requests` as one contiguous write. Fails if any of them
    /// cannot be encoded, in which case nothing is queued.
    fn write(&self, requests: Vec<Request>) -> Result<(), ChannelError>;
}

dyn_clone::clone_trait_object!(Channel);

#[derive(thiserror::Error)]
pub enum ChannelError {
    #[error("Channel `{0}` is closed")]
    Closed(ChannelId),
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}
impl std::fmt::Debug for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

const NOT_CONNECTED: u8 = 0;
const CONNECTED: u8 = 1;
const CLOSED: u8 = 2;

#[derive(Debug)]
enum ChannelCommand {
    Connect { host: String, port: u16 },
    Write(Vec<u8>),
    Disconnect,
    Close,
}

/// TCP implementation of [`Channel`].
///
/// Commands are processed in order by a background task, which is what keeps
/// writes from interleaving.
#[derive(Clone, Debug)]
pub struct TcpChannel {
    id: ChannelId,
    commands: mpsc::UnboundedSender<ChannelCommand>,
    status: Arc<AtomicU8>,
    codec: Arc<dyn WireCodec>,
}

impl TcpChannel {
    /// Starts the channel task. Must be called from within a tokio runtime.
    pub fn spawn(codec: Arc<dyn WireCodec>, events: EventSender) -> Self {
        let id = ChannelId::new();
        let (commands, receiver) = mpsc::unbounded_channel();
        let status = Arc::new(AtomicU8::new(NOT_CONNECTED));

        let task = ChannelTask {
            id,
            status: status.clone(),
            events,
            codec: codec.clone(),
            writer: None,
            reader: None,
        };
        tokio::spawn(
            task.run(receiver)
                .instrument(tracing::debug_span!("Channel Task", channel = %id)),
        );

        Self {
            id,
            commands,
            status,
            codec,
        }
    }

    fn submit(&self, command: ChannelCommand) -> Result<(), ChannelError> {
        self.commands
            .send(command)
            .map_err(|_| ChannelError::Closed(self.id))
    }
}

impl Channel for TcpChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn is_connected(&self) -> bool {
        self.status.load(Ordering::Acquire) == CONNECTED
    }

    fn is_open(&self) -> bool {
        self.status.load(Ordering::Acquire) != CLOSED
    }

    fn connect(&self, host: &str, port: u16) -> Result<(), ChannelError> {
        self.submit(ChannelCommand::Connect {
            host: host.to_string(),
            port,
        })
    }

    fn disconnect(&self) -> Result<(), ChannelError> {
        self.submit(ChannelCommand::Disconnect)
    }

    fn close(&self) -> Result<(), ChannelError> {
        self.submit(ChannelCommand::Close)
    }

    fn write(&self, requests: Vec<Request>) -> Result<(), ChannelError> {
        let mut buf = Vec::new();
        for request in &requests {
            self.codec.encode(request, &mut buf).map_err(|e| {
                anyhow::anyhow!("Unable to encode request on {}. Caused by: {}", self.id, e)
            })?;
        }
        self.submit(ChannelCommand::Write(buf))
    }
}

struct ChannelTask {
    id: ChannelId,
    status: Arc<AtomicU8>,
    events: EventSender,
    codec: Arc<dyn WireCodec>,
    writer: Option<OwnedWriteHalf>,
    reader: Option<JoinHandle<()>>,
}

impl ChannelTask {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<ChannelCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                ChannelCommand::Connect { host, port } => self.connect(&host, port).await,
                ChannelCommand::Write(buf) => self.write(buf).await,
                ChannelCommand::Disconnect => {
                    self.release().await;
                    self.status.store(NOT_CONNECTED, Ordering::Release);
                    self.notify(ChannelEvent::Disconnected(self.id)).await;
                }
                ChannelCommand::Close => break,
            }
        }
        drop(commands);

        self.release().await;
        self.status.store(CLOSED, Ordering::Release);
        self.notify(ChannelEvent::Closed(self.id)).await;
        tracing::debug!("Channel closed");
    }

    async fn connect(&mut self, host: &str, port: u16) {
        if self.status.load(Ordering::Acquire) == CONNECTED {
            tracing::trace!("Already connected, ignoring connect request");
            return;
        }

        match TcpStream::connect((host, port)).await {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::warn!("Could not enable TCP_NODELAY. Caused by: {}", e);
                }
                self.release().await;

                let (read_half, write_half) = stream.into_split();
                self.reader = Some(tokio::spawn(read_replies(
                    self.id,
                    read_half,
                    self.codec.clone(),
                    self.events.clone(),
                    self.status.clone(),
                )));
                self.writer = Some(write_half);
                self.status.store(CONNECTED, Ordering::Release);

                tracing::debug!("Connected to {}:{}", host, port);
                self.notify(ChannelEvent::Connected(self.id)).await;
            }
            Err(e) => {
                tracing::warn!("Unable to connect to {}:{}. Caused by: {}", host, port, e);
                self.notify(ChannelEvent::Disconnected(self.id)).await;
            }
        }
    }

    async fn write(&mut self, buf: Vec<u8>) {
        let writer = match self.writer.as_mut() {
            Some(writer) if self.status.load(Ordering::Acquire) == CONNECTED => writer,
            _ => {
                tracing::warn!(
                    "Dropping {} byte(s) written to a disconnected channel",
                    buf.len()
                );
                return;
            }
        };

        let written = writer.write_all(&buf).await;
        if let Err(e) = written {
            tracing::warn!("Write failed, dropping the socket. Caused by: {}", e);
            self.release().await;
            self.status.store(NOT_CONNECTED, Ordering::Release);
            self.notify(ChannelEvent::Disconnected(self.id)).await;
        }
    }

    async fn release(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
    }

    async fn notify(&self, event: ChannelEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!("Event receiver is gone, dropping channel event");
        }
    }
}

async fn read_replies(
    id: ChannelId,
    mut reader: OwnedReadHalf,
    codec: Arc<dyn WireCodec>,
    events: EventSender,
    status: Arc<AtomicU8>,
) {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                loop {
                    match codec.decode(&mut buf) {
                        Ok(Some(reply)) => {
                            let event = ChannelEvent::Reply { channel: id, reply };
                            if events.send(event).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!(channel = %id, "Discarding undecodable frame. Caused by: {}", e);
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(channel = %id, "Read failed. Caused by: {}", e);
                break;
            }
        }
    }

    // A close in progress owns the status from here on.
    let _ = status.compare_exchange(CONNECTED, NOT_CONNECTED, Ordering::AcqRel, Ordering::Acquire);
    let _ = events.send(ChannelEvent::Disconnected(id)).await;
}
