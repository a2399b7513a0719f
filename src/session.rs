//! Client session engine
//!
//! Talks the wire protocol to a running server over three cooperating
//! tasks:
//!
//! - a **sender** draining the outgoing request queue onto the socket,
//! - a **receiver** decoding inbound frames, completing the pending
//!   synchronous request on a terminal reply and filing everything else
//!   as a background event,
//! - a **dispatcher** draining background events into the local room
//!   cache and the registered user callbacks whenever no request is in
//!   flight and the session is logged in.
//!
//! A synchronous-looking [`Session::request`] rides on this machinery by
//! parking the caller on a one-shot completion channel keyed to the next
//! terminal reply; the caller blocks without spinning and unwinds cleanly
//! when the session dies.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::frame::FrameCodec;
use crate::message::{Request, Response};
use crate::types::{AccountId, RoomId};

/// Channel buffer size for outgoing requests
const OUTGOING_BUFFER_SIZE: usize = 32;

/// Callback fired on room-joined and room-left events: (room id, room name)
pub type RoomEventFn = dyn Fn(RoomId, &str) + Send + Sync;
/// Callback fired on delivered messages: (room id, sender id, text)
pub type MessageEventFn = dyn Fn(RoomId, AccountId, &str) + Send + Sync;

/// Locally cached view of the logged-in account
#[derive(Debug, Clone, Default)]
pub struct AccountInfo {
    pub id: Option<AccountId>,
    pub name: String,
    pub key: String,
}

/// Locally cached view of one joined room
#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub id: RoomId,
    pub name: String,
    /// Messages seen in this room: (sender id, text)
    pub messages: Vec<(AccountId, String)>,
}

/// State shared by the three session tasks and the caller.
struct Shared {
    /// Completion slot for the one in-flight synchronous request
    pending: Mutex<Option<oneshot::Sender<Response>>>,
    /// Background (pushed) responses in pop order
    backlog: Mutex<VecDeque<Response>>,
    /// Wakes the dispatcher after a push or a completed request
    wake: Notify,
    /// Unparks the sender when the session is torn down
    stop_wake: Notify,
    /// Set once; observed by every loop
    stopped: AtomicBool,
    /// Gates background dispatch, mirroring the server-side login state
    logged_in: AtomicBool,
    account: Mutex<AccountInfo>,
    rooms: Mutex<Vec<RoomInfo>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            pending: Mutex::new(None),
            backlog: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            stop_wake: Notify::new(),
            stopped: AtomicBool::new(false),
            logged_in: AtomicBool::new(false),
            account: Mutex::new(AccountInfo::default()),
            rooms: Mutex::new(Vec::new()),
        }
    }

    /// Route one inbound response: complete the waiting caller on a
    /// terminal reply, otherwise queue it for the dispatcher. A terminal
    /// reply nobody is waiting for jumps the pop order so it is drained
    /// (and discarded) soonest.
    fn route_inbound(&self, response: Response) {
        let mut pending = self.pending.lock().unwrap();
        if pending.is_some() && response.is_terminal() {
            if let Some(tx) = pending.take() {
                let _ = tx.send(response);
            }
            return;
        }
        drop(pending);
        if response.is_terminal() {
            self.push_background_front(response);
        } else {
            self.push_background(response);
        }
    }

    /// File a background response, suppressing duplicates so a repeated
    /// push never fires a callback twice.
    fn push_background(&self, response: Response) {
        let mut backlog = self.backlog.lock().unwrap();
        if backlog.iter().any(|queued| *queued == response) {
            return;
        }
        backlog.push_back(response);
        drop(backlog);
        self.wake.notify_one();
    }

    /// Urgent variant of [`Shared::push_background`]: jumps the pop order.
    fn push_background_front(&self, response: Response) {
        let mut backlog = self.backlog.lock().unwrap();
        if backlog.iter().any(|queued| *queued == response) {
            return;
        }
        backlog.push_front(response);
        drop(backlog);
        self.wake.notify_one();
    }

    /// Abort a blocked `request()` caller, if any.
    fn fail_pending(&self) {
        // Dropping the sender makes the caller's await resolve to an
        // error.
        self.pending.lock().unwrap().take();
    }

    fn shut_down(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.fail_pending();
        self.wake.notify_one();
        self.stop_wake.notify_one();
    }
}

/// Asynchronous connection to a chat server
///
/// Consumed by a front end (e.g. a terminal UI): register callbacks, call
/// [`Session::start`], then drive it with blocking [`Session::request`]
/// calls while pushed events arrive through the callbacks.
pub struct Session {
    shared: Arc<Shared>,
    out_tx: Option<mpsc::Sender<Request>>,
    out_rx: Option<mpsc::Receiver<Request>>,
    stream: Option<TcpStream>,
    tasks: Vec<JoinHandle<()>>,
    joined_cb: Option<Arc<RoomEventFn>>,
    left_cb: Option<Arc<RoomEventFn>>,
    message_cb: Option<Arc<MessageEventFn>>,
}

impl Session {
    /// Connect to a server at `addr` (`host:port`). The pumps are not
    /// running yet; call [`Session::start`] once callbacks are registered.
    pub async fn connect(addr: &str) -> Result<Self, AppError> {
        let stream = TcpStream::connect(addr).await?;
        info!("connected to {}", addr);
        let (out_tx, out_rx) = mpsc::channel(OUTGOING_BUFFER_SIZE);
        Ok(Self {
            shared: Arc::new(Shared::new()),
            out_tx: Some(out_tx),
            out_rx: Some(out_rx),
            stream: Some(stream),
            tasks: Vec::new(),
            joined_cb: None,
            left_cb: None,
            message_cb: None,
        })
    }

    /// Register the room-joined callback. Must precede [`Session::start`].
    pub fn on_room_joined<F>(&mut self, callback: F)
    where
        F: Fn(RoomId, &str) + Send + Sync + 'static,
    {
        self.joined_cb = Some(Arc::new(callback));
    }

    /// Register the room-left callback. Must precede [`Session::start`].
    pub fn on_room_left<F>(&mut self, callback: F)
    where
        F: Fn(RoomId, &str) + Send + Sync + 'static,
    {
        self.left_cb = Some(Arc::new(callback));
    }

    /// Register the message-received callback. Must precede
    /// [`Session::start`].
    pub fn on_message<F>(&mut self, callback: F)
    where
        F: Fn(RoomId, AccountId, &str) + Send + Sync + 'static,
    {
        self.message_cb = Some(Arc::new(callback));
    }

    /// Spawn the sender, receiver and dispatcher tasks.
    pub fn start(&mut self) {
        let (Some(stream), Some(mut out_rx)) = (self.stream.take(), self.out_rx.take()) else {
            warn!("session already started");
            return;
        };

        let framed = Framed::new(stream, FrameCodec);
        let (mut sink, mut frames) = framed.split();

        // Sender: outgoing queue -> socket. Ends when the queue closes or
        // the session is torn down, then half-closes the socket so the
        // server sees EOF. The biased order drains queued requests (the
        // final Terminate included) before honoring the stop signal.
        let shared = self.shared.clone();
        self.tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    request = out_rx.recv() => {
                        let Some(request) = request else { break };
                        let frame = request.to_frame(0);
                        if let Err(err) = sink.send(frame).await {
                            error!("send failed: {}", err);
                            break;
                        }
                    }
                    _ = shared.stop_wake.notified() => break,
                }
            }
            let _ = sink.close().await;
            debug!("sender task ended");
        }));

        // Receiver: socket -> pending slot or background queue. EOF or a
        // read error unwinds the whole session.
        let shared = self.shared.clone();
        self.tasks.push(tokio::spawn(async move {
            while let Some(item) = frames.next().await {
                match item {
                    Ok(frame) => match Response::from_frame(&frame) {
                        Ok(response) => shared.route_inbound(response),
                        Err(err) => warn!("dropping response: {}", err),
                    },
                    Err(err) => {
                        error!("read error: {}", err);
                        break;
                    }
                }
            }
            shared.shut_down();
            debug!("receiver task ended");
        }));

        // Dispatcher: background queue -> caches and callbacks.
        let shared = self.shared.clone();
        let joined_cb = self.joined_cb.clone();
        let left_cb = self.left_cb.clone();
        let message_cb = self.message_cb.clone();
        self.tasks.push(tokio::spawn(async move {
            loop {
                while shared.pending.lock().unwrap().is_none()
                    && shared.logged_in.load(Ordering::SeqCst)
                {
                    let next = shared.backlog.lock().unwrap().pop_front();
                    let Some(response) = next else { break };
                    dispatch(&shared, response, &joined_cb, &left_cb, &message_cb);
                }
                if shared.stopped.load(Ordering::SeqCst) {
                    break;
                }
                shared.wake.notified().await;
            }
            debug!("dispatcher task ended");
        }));
    }

    /// Send a request and block until its terminal reply arrives.
    ///
    /// One request may be in flight at a time; a reply that never comes
    /// blocks the caller until the session is stopped or the peer closes
    /// the socket.
    pub async fn request(&self, request: Request) -> Result<Response, AppError> {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(AppError::SessionClosed);
        }
        let out_tx = self.out_tx.as_ref().ok_or(AppError::SessionClosed)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock().unwrap();
            if pending.is_some() {
                return Err(AppError::RequestInFlight);
            }
            *pending = Some(tx);
        }

        if out_tx.send(request.clone()).await.is_err() {
            self.shared.fail_pending();
            return Err(AppError::SessionClosed);
        }

        // The receiver may have torn the session down between the entry
        // check and parking the completion slot; its fail_pending would
        // then have run against an empty slot.
        if self.shared.stopped.load(Ordering::SeqCst) {
            self.shared.fail_pending();
            return Err(AppError::SessionClosed);
        }

        let response = rx.await.map_err(|_| AppError::SessionClosed)?;
        self.note_outcome(&request, &response);
        self.shared.wake.notify_one();
        Ok(response)
    }

    /// Update the local caches from a completed request.
    fn note_outcome(&self, request: &Request, response: &Response) {
        let Response::Success { data } = response else {
            return;
        };
        match request {
            Request::Register { name, key } => {
                let mut account = self.shared.account.lock().unwrap();
                account.id = data.parse().ok();
                account.name = name.clone();
                account.key = key.clone();
            }
            Request::Login { account: id, key } => {
                {
                    let mut account = self.shared.account.lock().unwrap();
                    account.id = Some(*id);
                    account.key = key.clone();
                }
                self.shared.logged_in.store(true, Ordering::SeqCst);
            }
            Request::Logout { .. } => {
                self.shared.logged_in.store(false, Ordering::SeqCst);
            }
            Request::CreateRoom { name, .. } => {
                // The server never pushes JoinRoom to the creator; record
                // the hosted room directly from the reply.
                if let Ok(room) = data.parse::<RoomId>() {
                    let mut rooms = self.shared.rooms.lock().unwrap();
                    if !rooms.iter().any(|cached| cached.id == room) {
                        rooms.push(RoomInfo {
                            id: room,
                            name: name.clone(),
                            messages: Vec::new(),
                        });
                    }
                }
            }
            _ => {}
        }
    }

    /// Graceful teardown: request termination, close the outgoing queue,
    /// and join all three tasks. The server's reply-then-close unblocks
    /// the receiver.
    pub async fn stop(&mut self) {
        if let Some(out_tx) = self.out_tx.take() {
            let _ = out_tx.send(Request::Terminate).await;
        }
        self.shared.shut_down();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        info!("session stopped");
    }

    /// Snapshot of the cached account identity.
    pub fn account(&self) -> AccountInfo {
        self.shared.account.lock().unwrap().clone()
    }

    /// Snapshot of the cached joined-rooms view.
    pub fn rooms(&self) -> Vec<RoomInfo> {
        self.shared.rooms.lock().unwrap().clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.shared.logged_in.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }
}

/// Apply one background response to the caches and fire its callback.
fn dispatch(
    shared: &Shared,
    response: Response,
    joined_cb: &Option<Arc<RoomEventFn>>,
    left_cb: &Option<Arc<RoomEventFn>>,
    message_cb: &Option<Arc<MessageEventFn>>,
) {
    match response {
        Response::JoinRoom { room, name } => {
            {
                let mut rooms = shared.rooms.lock().unwrap();
                if !rooms.iter().any(|cached| cached.id == room) {
                    rooms.push(RoomInfo {
                        id: room,
                        name: name.clone(),
                        messages: Vec::new(),
                    });
                }
            }
            if let Some(callback) = joined_cb {
                callback(room, &name);
            }
        }
        Response::LeaveRoom { room, name } => {
            shared.rooms.lock().unwrap().retain(|cached| cached.id != room);
            if let Some(callback) = left_cb {
                callback(room, &name);
            }
        }
        Response::MessageIn { room, sender, text } => {
            {
                let mut rooms = shared.rooms.lock().unwrap();
                if let Some(cached) = rooms.iter_mut().find(|cached| cached.id == room) {
                    cached.messages.push((sender, text.clone()));
                }
            }
            if let Some(callback) = message_cb {
                callback(room, sender, &text);
            }
        }
        // Stray terminal replies and sentinels are discarded.
        Response::None | Response::Success { .. } | Response::Failure { .. } => {}
    }
}
