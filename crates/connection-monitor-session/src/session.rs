//! Live cluster session: synchronous establish, request routing,
//! indefinite reconnection, deterministic shutdown.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use connection_monitor_core::{DatasetError, EntryEvent, Row, Subscription, SubscriptionFilter};
use connection_monitor_transport::{
    ClientRequest, Link, LinkReader, LinkWriter, ServerFrame, TlsConnector, TlsError,
    TransportError, tls,
};

use crate::config::{BootstrapConfig, ConfigError, Discovery, ProcessEnv, resolve};
use crate::dataset::RemoteDataset;
use crate::discovery;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const EVENT_CHANNEL_CAPACITY: usize = 256;
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Session error.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("tls setup failed: {0}")]
    Tls(#[from] TlsError),
    #[error("cloud discovery failed: {0}")]
    Discovery(#[from] reqwest::Error),
    #[error("no members available to connect to")]
    NoMembers,
    #[error("cluster rejected the session: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// A request from the dataset surface, carrying its reply channel.
pub(crate) enum Request {
    Get {
        collection: String,
        key: String,
        reply: oneshot::Sender<Result<Option<String>, DatasetError>>,
    },
    Query {
        sql: String,
        reply: oneshot::Sender<Result<Vec<Row>, DatasetError>>,
    },
    Subscribe {
        collection: String,
        filter: SubscriptionFilter,
        reply: oneshot::Sender<Result<Subscription, DatasetError>>,
    },
}

impl Request {
    fn fail(self, error: DatasetError) {
        match self {
            Self::Get { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Self::Query { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Self::Subscribe { reply, .. } => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

pub(crate) enum Command {
    Request(Request),
    Shutdown { done: oneshot::Sender<()> },
}

enum PendingReply {
    Value(oneshot::Sender<Result<Option<String>, DatasetError>>),
    Rows(oneshot::Sender<Result<Vec<Row>, DatasetError>>),
    Subscribed {
        reply: oneshot::Sender<Result<Subscription, DatasetError>>,
        receiver: mpsc::Receiver<EntryEvent>,
    },
}

/// A request in flight. The original frame is kept so an interrupted
/// request can be replayed on the next link.
struct PendingRequest {
    request: ClientRequest,
    reply: PendingReply,
}

impl PendingRequest {
    fn fail(self, error: DatasetError) {
        match self.reply {
            PendingReply::Value(reply) => {
                let _ = reply.send(Err(error));
            }
            PendingReply::Rows(reply) => {
                let _ = reply.send(Err(error));
            }
            PendingReply::Subscribed { reply, .. } => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

struct ActiveSubscription {
    collection: String,
    filter: SubscriptionFilter,
    sender: mpsc::Sender<EntryEvent>,
}

enum ServeOutcome {
    /// The link died; reconnect and carry on.
    Relink,
    /// Shutdown was requested (or every handle is gone).
    Stop(Option<oneshot::Sender<()>>),
}

/// An opaque handle to the backing store. Owned by the process that
/// created it; one lifecycle: connect, active, explicit shutdown.
#[derive(Debug)]
pub struct Session {
    commands: mpsc::Sender<Command>,
}

impl Session {
    /// Resolve the bootstrap configuration and establish a session.
    ///
    /// A supplied cluster name selects the local vault; otherwise the
    /// environment decides between the cloud and plain modes. Mode
    /// selection is one-shot; see [`crate::config::resolve`].
    ///
    /// # Errors
    /// `ConfigError` for missing or invalid credentials, a session error
    /// if the cluster turns the client away.
    pub async fn connect(cluster_name: Option<&str>) -> Result<Self, SessionError> {
        let config = resolve(cluster_name, &ProcessEnv)?;
        Self::establish(config).await
    }

    /// Establish a session from an already-resolved configuration.
    ///
    /// Startup is synchronous: the call blocks until at least one member
    /// is reachable and has accepted the session, then prints the
    /// one-line confirmation.
    ///
    /// # Errors
    /// `Rejected` when a member refuses the session, `Tls`/`Discovery`
    /// for unusable key material or a dead token.
    pub async fn establish(config: BootstrapConfig) -> Result<Self, SessionError> {
        let BootstrapConfig {
            cluster,
            members,
            discovery,
            tls,
            confirmation,
        } = config;

        let tls = tls.as_ref().map(tls::connector).transpose()?;
        let token = discovery.as_ref().map(|d| d.token.clone());
        let mut driver = Driver {
            cluster,
            token,
            discovery,
            members,
            tls,
            pending: HashMap::new(),
            subscriptions: HashMap::new(),
        };

        let link = driver.connect_blocking().await?;
        println!("{confirmation}");

        let (commands, receiver) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        tokio::spawn(driver.run(receiver, link));
        Ok(Self { commands })
    }

    /// Capability surface bound to this session.
    #[must_use]
    pub fn dataset(&self) -> RemoteDataset {
        RemoteDataset::new(self.commands.clone())
    }

    /// Tear the session down: deregister listeners and close the link.
    /// Returns once the release has completed.
    pub async fn shutdown(self) {
        let (done, released) = oneshot::channel();
        if self.commands.send(Command::Shutdown { done }).await.is_ok() {
            let _ = released.await;
        }
    }
}

struct Driver {
    cluster: String,
    token: Option<String>,
    discovery: Option<Discovery>,
    members: Vec<String>,
    tls: Option<TlsConnector>,
    pending: HashMap<Uuid, PendingRequest>,
    subscriptions: HashMap<Uuid, ActiveSubscription>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>, link: Link) {
        let (reader, mut writer) = link.split();
        let mut frames = spawn_reader(reader);

        loop {
            match self.serve(&mut commands, &mut frames, &mut writer).await {
                ServeOutcome::Relink => {
                    match self.reestablish(&mut commands).await {
                        Some((new_frames, new_writer)) => {
                            frames = new_frames;
                            writer = new_writer;
                        }
                        None => return,
                    }
                }
                ServeOutcome::Stop(ack) => {
                    self.teardown();
                    drop(writer);
                    drop(frames);
                    if let Some(ack) = ack {
                        let _ = ack.send(());
                    }
                    return;
                }
            }
        }
    }

    async fn serve(
        &mut self,
        commands: &mut mpsc::Receiver<Command>,
        frames: &mut mpsc::Receiver<Result<ServerFrame, TransportError>>,
        writer: &mut LinkWriter,
    ) -> ServeOutcome {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    None => return ServeOutcome::Stop(None),
                    Some(Command::Shutdown { done }) => return ServeOutcome::Stop(Some(done)),
                    Some(Command::Request(request)) => {
                        if let Err(error) = self.submit(writer, request).await {
                            tracing::warn!("link write failed: {error}");
                            return ServeOutcome::Relink;
                        }
                    }
                },
                frame = frames.recv() => match frame {
                    Some(Ok(frame)) => self.handle_frame(frame),
                    Some(Err(error)) => {
                        tracing::warn!("link lost: {error}");
                        return ServeOutcome::Relink;
                    }
                    None => return ServeOutcome::Relink,
                },
            }
        }
    }

    /// Register the request as pending, then put it on the wire. A write
    /// failure leaves it pending; the reconnect path replays it.
    async fn submit(
        &mut self,
        writer: &mut LinkWriter,
        request: Request,
    ) -> Result<(), TransportError> {
        let id = Uuid::new_v4();
        let (request, reply) = match request {
            Request::Get {
                collection,
                key,
                reply,
            } => (
                ClientRequest::Get {
                    id,
                    collection,
                    key,
                },
                PendingReply::Value(reply),
            ),
            Request::Query { sql, reply } => {
                (ClientRequest::Query { id, sql }, PendingReply::Rows(reply))
            }
            Request::Subscribe {
                collection,
                filter,
                reply,
            } => {
                let (sender, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
                self.subscriptions.insert(
                    id,
                    ActiveSubscription {
                        collection: collection.clone(),
                        filter: filter.clone(),
                        sender,
                    },
                );
                (
                    ClientRequest::Subscribe {
                        id,
                        collection,
                        filter,
                    },
                    PendingReply::Subscribed { reply, receiver },
                )
            }
        };

        self.pending.insert(
            id,
            PendingRequest {
                request: request.clone(),
                reply,
            },
        );
        writer.send(&request).await
    }

    fn handle_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::Value { id, value } => {
                if let Some(PendingRequest {
                    reply: PendingReply::Value(reply),
                    ..
                }) = self.pending.remove(&id)
                {
                    let _ = reply.send(Ok(value));
                }
            }
            ServerFrame::Rows { id, rows } => {
                if let Some(PendingRequest {
                    reply: PendingReply::Rows(reply),
                    ..
                }) = self.pending.remove(&id)
                {
                    let _ = reply.send(Ok(rows));
                }
            }
            ServerFrame::Subscribed { id } => {
                // Acks for re-registered subscriptions have no pending
                // entry and fall through silently.
                if let Some(PendingRequest {
                    reply: PendingReply::Subscribed { reply, receiver },
                    ..
                }) = self.pending.remove(&id)
                {
                    let _ = reply.send(Ok(Subscription::new(id, receiver)));
                }
            }
            ServerFrame::Event {
                subscription,
                kind,
                key,
                value,
            } => self.deliver(subscription, EntryEvent { kind, key, value }),
            ServerFrame::Error {
                id: Some(id),
                message,
            } => {
                self.subscriptions.remove(&id);
                if let Some(pending) = self.pending.remove(&id) {
                    pending.fail(DatasetError::Backend(message));
                }
            }
            ServerFrame::Error { id: None, message } => {
                tracing::warn!("cluster error: {message}");
            }
            ServerFrame::Welcome { .. } | ServerFrame::Pong => {}
        }
    }

    fn deliver(&mut self, id: Uuid, event: EntryEvent) {
        let Some(subscription) = self.subscriptions.get(&id) else {
            return;
        };
        match subscription.sender.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(key = %event.key, "subscriber lagging, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.subscriptions.remove(&id);
            }
        }
    }

    /// Reconnect loop: runs until a new link is up (subscriptions
    /// re-registered, interrupted requests replayed) or shutdown wins.
    async fn reestablish(
        &mut self,
        commands: &mut mpsc::Receiver<Command>,
    ) -> Option<(mpsc::Receiver<Result<ServerFrame, TransportError>>, LinkWriter)> {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    None => {
                        self.teardown();
                        return None;
                    }
                    Some(Command::Shutdown { done }) => {
                        self.teardown();
                        let _ = done.send(());
                        return None;
                    }
                    Some(Command::Request(request)) => {
                        request.fail(DatasetError::Backend("session is reconnecting".into()));
                    }
                },
                () = tokio::time::sleep(RECONNECT_DELAY) => {
                    if self.refresh_members().await.is_err() {
                        tracing::error!("discovery token rejected, giving up on this session");
                        self.teardown();
                        return None;
                    }
                    match self.connect_any().await {
                        Ok(link) => {
                            let (reader, mut writer) = link.split();
                            match self.replay(&mut writer).await {
                                Ok(()) => {
                                    tracing::info!("session re-established");
                                    return Some((spawn_reader(reader), writer));
                                }
                                Err(error) => tracing::warn!("replay failed: {error}"),
                            }
                        }
                        Err(error) => tracing::warn!("reconnect attempt failed: {error}"),
                    }
                }
            }
        }
    }

    async fn replay(&mut self, writer: &mut LinkWriter) -> Result<(), TransportError> {
        for (id, subscription) in &self.subscriptions {
            writer
                .send(&ClientRequest::Subscribe {
                    id: *id,
                    collection: subscription.collection.clone(),
                    filter: subscription.filter.clone(),
                })
                .await?;
        }
        for pending in self.pending.values() {
            // Interrupted subscribes were just re-sent from the
            // subscription registry.
            if !matches!(pending.reply, PendingReply::Subscribed { .. }) {
                writer.send(&pending.request).await?;
            }
        }
        Ok(())
    }

    /// Blocks until one member is reachable. Only a rejected session or
    /// a dead discovery token aborts.
    async fn connect_blocking(&mut self) -> Result<Link, SessionError> {
        if self.members.is_empty() && self.discovery.is_none() {
            return Err(SessionError::NoMembers);
        }
        loop {
            self.refresh_members().await?;
            match self.connect_any().await {
                Ok(link) => return Ok(link),
                Err(error @ SessionError::Rejected(_)) => return Err(error),
                Err(error) => {
                    tracing::warn!("no member reachable ({error}), retrying");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    /// Re-run cloud discovery when configured. Transient failures keep
    /// the previous member list; a client error means the token is dead.
    async fn refresh_members(&mut self) -> Result<(), SessionError> {
        let Some(config) = &self.discovery else {
            return Ok(());
        };
        match discovery::discover_members(config).await {
            Ok(members) if !members.is_empty() => {
                self.members = members;
                Ok(())
            }
            Ok(_) => {
                tracing::warn!("cloud discovery returned no members");
                Ok(())
            }
            Err(error) if error.status().is_some_and(|s| s.is_client_error()) => {
                Err(SessionError::Discovery(error))
            }
            Err(error) => {
                tracing::warn!("cloud discovery failed: {error}");
                Ok(())
            }
        }
    }

    async fn connect_any(&self) -> Result<Link, SessionError> {
        let mut last = SessionError::NoMembers;
        for member in &self.members {
            match self.connect_member(member).await {
                Ok(link) => return Ok(link),
                Err(error @ SessionError::Rejected(_)) => return Err(error),
                Err(error) => {
                    tracing::warn!(member = %member, "connect failed: {error}");
                    last = error;
                }
            }
        }
        Err(last)
    }

    async fn connect_member(&self, member: &str) -> Result<Link, SessionError> {
        let mut link = Link::open(member, self.tls.as_ref()).await?;
        link.send(&ClientRequest::Hello {
            cluster: self.cluster.clone(),
            token: self.token.clone(),
        })
        .await?;
        loop {
            match link.recv().await? {
                ServerFrame::Welcome { member: answered } => {
                    tracing::info!(member = %answered, "session established");
                    return Ok(link);
                }
                ServerFrame::Error { message, .. } => {
                    return Err(SessionError::Rejected(message));
                }
                _ => {}
            }
        }
    }

    fn teardown(&mut self) {
        for (_, pending) in self.pending.drain() {
            pending.fail(DatasetError::Closed);
        }
        // Dropping the senders ends every delivery stream.
        self.subscriptions.clear();
    }
}

fn spawn_reader(mut reader: LinkReader) -> mpsc::Receiver<Result<ServerFrame, TransportError>> {
    let (frames, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        loop {
            let frame = reader.recv().await;
            let failed = frame.is_err();
            if frames.send(frame).await.is_err() || failed {
                break;
            }
        }
    });
    receiver
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    use connection_monitor_core::{EventKind, KeyedDataset, SubscriptionFilter};

    use super::*;

    fn plain_config(addr: &str) -> BootstrapConfig {
        BootstrapConfig {
            cluster: "dev".into(),
            members: vec![addr.to_owned()],
            discovery: None,
            tls: None,
            confirmation: format!("Connected to cluster [dev] at {addr}"),
        }
    }

    async fn fake_member(listener: TcpListener) {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();

        let hello: serde_json::Value =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(hello["type"], "hello");
        assert_eq!(hello["cluster"], "dev");
        write
            .write_all(b"{\"type\":\"welcome\",\"member\":\"member-1\"}\n")
            .await
            .unwrap();

        while let Ok(Some(line)) = lines.next_line().await {
            let request: serde_json::Value = serde_json::from_str(&line).unwrap();
            match request["type"].as_str().unwrap() {
                "get" => {
                    let frame = json!({"type": "value", "id": request["id"], "value": null});
                    write
                        .write_all(format!("{frame}\n").as_bytes())
                        .await
                        .unwrap();
                }
                "subscribe" => {
                    let ack = json!({"type": "subscribed", "id": request["id"]});
                    write.write_all(format!("{ack}\n").as_bytes()).await.unwrap();
                    let event = json!({
                        "type": "event",
                        "subscription": request["id"],
                        "kind": "added",
                        "key": "AA100BB200",
                        "value": "{}",
                    });
                    write
                        .write_all(format!("{event}\n").as_bytes())
                        .await
                        .unwrap();
                }
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn establish_routes_requests_and_events() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(fake_member(listener));

        let session = Session::establish(plain_config(&addr)).await.unwrap();
        let dataset = session.dataset();

        // Absent key is a lookup miss, not an error.
        assert!(
            dataset
                .get("live_connections", "AA100BB200")
                .await
                .unwrap()
                .is_none()
        );

        let mut subscription = dataset
            .subscribe("live_connections", SubscriptionFilter::key("AA100BB200"))
            .await
            .unwrap();
        let event = subscription.next_event().await.unwrap();
        assert_eq!(event.kind, EventKind::Added);
        assert_eq!(event.key, "AA100BB200");

        session.shutdown().await;
        server.abort();
    }

    #[tokio::test]
    async fn rejected_hello_fails_establish() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            lines.next_line().await.unwrap();
            write
                .write_all(b"{\"type\":\"error\",\"id\":null,\"message\":\"unknown cluster\"}\n")
                .await
                .unwrap();
        });

        let error = Session::establish(plain_config(&addr)).await.unwrap_err();
        assert!(matches!(error, SessionError::Rejected(_)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_ends_active_subscriptions() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(fake_member(listener));

        let session = Session::establish(plain_config(&addr)).await.unwrap();
        let dataset = session.dataset();
        let mut subscription = dataset
            .subscribe("live_connections", SubscriptionFilter::key("AA100BB200"))
            .await
            .unwrap();
        // Drain the event the fake member pushes on subscribe.
        subscription.next_event().await.unwrap();

        session.shutdown().await;
        assert!(subscription.next_event().await.is_none());
        server.abort();
    }
}
