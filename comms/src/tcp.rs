//! A star-shaped group over TCP: rank 0 relays every exchange.

use std::{borrow::Cow, net::SocketAddr, num::NonZeroUsize, time::Duration};

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::{
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    runtime::{Builder, Runtime},
};

use crate::{
    Collective, CommErr, OnoReceiver, OnoSender, Result,
    msg::{Command, Msg, Payload},
};

type NetRx = OnoReceiver<OwnedReadHalf>;
type NetTx = OnoSender<OwnedWriteHalf>;

const CONNECT_ATTEMPTS: usize = 50;
const CONNECT_BACKOFF: Duration = Duration::from_millis(100);

struct Link {
    rx: NetRx,
    tx: NetTx,
}

enum Links {
    /// The links to ranks `1..world_size`, in rank order.
    Root(Vec<Link>),
    Leaf(Link),
}

struct State {
    links: Links,
    buf: Vec<u64>,
}

/// A member of a group whose ranks are separate processes connected through rank 0.
///
/// Every exchange sends the local part to the root, which collects all of them in rank order
/// and sends the whole set back to every peer. The API is blocking, the transport owns a
/// single threaded runtime and drives each exchange to completion.
pub struct TcpCollective {
    rank: usize,
    world_size: usize,
    runtime: Runtime,
    state: Mutex<State>,
}

/// A bound root that still has to wait for its peers.
pub struct PendingRoot {
    runtime: Runtime,
    listener: TcpListener,
    world_size: usize,
}

impl PendingRoot {
    /// The address the peers have to join, useful when binding to port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Waits until every other rank has joined.
    ///
    /// # Returns
    /// The root member of the group, or a rendezvous error if a peer announced itself with a
    /// duplicated rank or a different group size.
    pub fn accept(self) -> Result<TcpCollective> {
        let Self {
            runtime,
            listener,
            world_size,
        } = self;

        let peers = runtime.block_on(accept_peers(&listener, world_size))?;
        info!(world_size = world_size; "every peer joined the group");

        Ok(TcpCollective {
            rank: 0,
            world_size,
            runtime,
            state: Mutex::new(State {
                links: Links::Root(peers),
                buf: Vec::new(),
            }),
        })
    }
}

impl TcpCollective {
    /// Binds the root of a new group.
    ///
    /// # Arguments
    /// * `addr` - The address to listen at.
    /// * `world_size` - The amount of members in the group, including the root.
    pub fn listen(addr: SocketAddr, world_size: NonZeroUsize) -> Result<PendingRoot> {
        let runtime = new_runtime()?;
        let listener = runtime.block_on(TcpListener::bind(addr))?;
        debug!("group root listening at {addr}");

        Ok(PendingRoot {
            runtime,
            listener,
            world_size: world_size.get(),
        })
    }

    /// Joins a group whose root listens at `root`.
    ///
    /// # Arguments
    /// * `rank` - This member's rank, must be in `1..world_size`.
    /// * `world_size` - The amount of members in the group.
    /// * `root` - The address of rank 0.
    pub fn join(rank: usize, world_size: NonZeroUsize, root: SocketAddr) -> Result<Self> {
        let world_size = world_size.get();
        if rank == 0 || rank >= world_size {
            return Err(CommErr::Rendezvous(format!(
                "cannot join as rank {rank} a group of size {world_size}"
            )));
        }

        let runtime = new_runtime()?;
        let link = runtime.block_on(async {
            let stream = connect_with_retry(root).await?;
            stream.set_nodelay(true)?;

            let (rx, tx) = stream.into_split();
            let (rx, mut tx) = crate::channel(rx, tx);
            tx.send(&Msg::Control(Command::Hello { rank, world_size }))
                .await?;

            Ok::<_, CommErr>(Link { rx, tx })
        })?;

        debug!(rank = rank; "joined group at {root}");

        Ok(Self {
            rank,
            world_size,
            runtime,
            state: Mutex::new(State {
                links: Links::Leaf(link),
                buf: Vec::new(),
            }),
        })
    }

    /// Creates the member for `rank`, listening if it is the root or joining otherwise.
    pub fn connect(rank: usize, world_size: NonZeroUsize, root: SocketAddr) -> Result<Self> {
        match rank {
            0 => Self::listen(root, world_size)?.accept(),
            _ => Self::join(rank, world_size, root),
        }
    }

    /// Leaves the group in an orderly fashion.
    ///
    /// Peers announce their departure and the root waits until every peer did so.
    pub fn disconnect(self) -> Result<()> {
        let Self { runtime, state, .. } = self;
        let State { links, mut buf } = state.into_inner();

        runtime.block_on(async move {
            match links {
                Links::Leaf(mut link) => {
                    link.tx.send(&Msg::Control(Command::Disconnect)).await?;
                }
                Links::Root(mut peers) => {
                    for peer in peers.iter_mut() {
                        match peer.rx.recv_into(&mut buf).await? {
                            Msg::Control(Command::Disconnect) => {}
                            other => return Err(CommErr::UnexpectedMessage { got: other.kind() }),
                        }
                    }
                }
            }

            Ok::<_, CommErr>(())
        })
    }

    /// Leaves the group after a local failure.
    ///
    /// The root forwards `detail` to every peer, so the ranks still waiting on an exchange fail
    /// with `CommErr::Remote` instead of blocking forever.
    pub fn abort(self, detail: &str) -> Result<()> {
        let Self { runtime, state, .. } = self;
        let State { links, .. } = state.into_inner();

        runtime.block_on(async move {
            match links {
                Links::Leaf(mut link) => {
                    link.tx.send(&Msg::Err(Cow::Borrowed(detail))).await?;
                }
                Links::Root(mut peers) => relay_failure(&mut peers, detail).await,
            }

            Ok::<_, CommErr>(())
        })
    }
}

impl Collective for TcpCollective {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_gather_parts(&self, local: &[f64]) -> Result<Vec<Vec<f64>>> {
        let mut state = self.state.lock();
        let State { links, buf } = &mut *state;

        match links {
            Links::Root(peers) => self.runtime.block_on(root_exchange(peers, buf, local)),
            Links::Leaf(link) => {
                let world_size = self.world_size;
                self.runtime
                    .block_on(leaf_exchange(link, buf, local, world_size))
            }
        }
    }
}

fn new_runtime() -> Result<Runtime> {
    Ok(Builder::new_current_thread().enable_all().build()?)
}

async fn connect_with_retry(addr: SocketAddr) -> Result<TcpStream> {
    let mut attempt = 1;

    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) if attempt < CONNECT_ATTEMPTS => {
                warn!(attempt = attempt; "failed to reach group root at {addr}: {e}, retrying");
                tokio::time::sleep(CONNECT_BACKOFF).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(CommErr::Rendezvous(format!(
                    "group root at {addr} unreachable after {attempt} attempts: {e}"
                )));
            }
        }
    }
}

async fn accept_peers(listener: &TcpListener, world_size: usize) -> Result<Vec<Link>> {
    let mut peers: Vec<Option<Link>> = (1..world_size).map(|_| None).collect();
    let mut buf: Vec<u64> = Vec::new();

    for _ in 1..world_size {
        let (stream, addr) = listener.accept().await?;
        stream.set_nodelay(true)?;

        let (rx, tx) = stream.into_split();
        let (mut rx, tx) = crate::channel(rx, tx);

        let (rank, announced) = match rx.recv_into(&mut buf).await? {
            Msg::Control(Command::Hello { rank, world_size }) => (rank, world_size),
            other => return Err(CommErr::UnexpectedMessage { got: other.kind() }),
        };

        if announced != world_size {
            return Err(CommErr::Rendezvous(format!(
                "peer at {addr} expects a group of size {announced}, root has {world_size}"
            )));
        }

        if rank == 0 || rank >= world_size {
            return Err(CommErr::Rendezvous(format!(
                "peer at {addr} announced an invalid rank {rank}"
            )));
        }

        let slot = &mut peers[rank - 1];
        if slot.is_some() {
            return Err(CommErr::Rendezvous(format!(
                "rank {rank} joined twice, last from {addr}"
            )));
        }

        debug!(rank = rank; "peer joined from {addr}");
        *slot = Some(Link { rx, tx });
    }

    Ok(peers.into_iter().flatten().collect())
}

async fn recv_part(rx: &mut NetRx, buf: &mut Vec<u64>) -> Result<Vec<f64>> {
    match rx.recv_into(buf).await? {
        Msg::Data(Payload::Part(nums)) => Ok(nums.to_vec()),
        Msg::Err(detail) => Err(CommErr::Remote(detail.into_owned())),
        other => Err(CommErr::UnexpectedMessage { got: other.kind() }),
    }
}

async fn root_exchange(
    peers: &mut [Link],
    buf: &mut Vec<u64>,
    local: &[f64],
) -> Result<Vec<Vec<f64>>> {
    let mut parts = Vec::with_capacity(peers.len() + 1);
    parts.push(local.to_vec());

    for i in 0..peers.len() {
        match recv_part(&mut peers[i].rx, buf).await {
            Ok(part) => parts.push(part),
            Err(CommErr::Remote(detail)) => {
                relay_failure(peers, &detail).await;
                return Err(CommErr::Remote(format!("rank {}: {detail}", i + 1)));
            }
            Err(e) => return Err(e),
        }
    }

    for peer in peers.iter_mut() {
        for part in &parts {
            peer.tx.send(&Msg::Data(Payload::Part(part))).await?;
        }
    }

    Ok(parts)
}

async fn leaf_exchange(
    link: &mut Link,
    buf: &mut Vec<u64>,
    local: &[f64],
    world_size: usize,
) -> Result<Vec<Vec<f64>>> {
    link.tx.send(&Msg::Data(Payload::Part(local))).await?;

    let mut parts = Vec::with_capacity(world_size);
    for _ in 0..world_size {
        parts.push(recv_part(&mut link.rx, buf).await?);
    }

    Ok(parts)
}

async fn relay_failure(peers: &mut [Link], detail: &str) {
    for (i, peer) in peers.iter_mut().enumerate() {
        if let Err(e) = peer.tx.send(&Msg::Err(Cow::Borrowed(detail))).await {
            warn!(rank = i + 1; "couldn't forward a failure: {e}");
        }
    }
}
