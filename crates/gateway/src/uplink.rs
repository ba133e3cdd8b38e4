//! Uplink delivery: retry queue and the dedicated sender worker

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};

use loragate_proto::is_push_ack;

use crate::shutdown::ShutdownFlag;

/// Re-delivery attempts granted to every fresh uplink datagram.
pub const RETRY_BUDGET: u8 = 4;
/// Queued datagrams beyond this push the oldest one out.
pub const QUEUE_CAP: usize = 1024;
/// Pause between sender iterations while the gateway is running.
const SENDER_PAUSE: Duration = Duration::from_millis(150);

/// One upstream destination and how long to wait for its acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerTarget {
    pub addr: SocketAddr,
    pub receive_timeout: Duration,
}

/// A datagram owned by the queue until delivered or dropped.
#[derive(Debug, Clone)]
pub struct OutboundPacket {
    pub destination: ServerTarget,
    pub payload: Vec<u8>,
    pub retries_left: u8,
}

impl OutboundPacket {
    pub fn new(destination: ServerTarget, payload: Vec<u8>) -> Self {
        Self {
            destination,
            payload,
            retries_left: RETRY_BUDGET,
        }
    }
}

/// Shared FIFO between the orchestrator (producer) and the sender
/// worker (consumer). Enqueueing never waits on network I/O.
#[derive(Clone, Default)]
pub struct UplinkQueue {
    inner: Arc<Mutex<VecDeque<OutboundPacket>>>,
}

impl UplinkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enqueue(&self, packet: OutboundPacket) {
        let mut queue = self.inner.lock().await;
        if queue.len() >= QUEUE_CAP {
            queue.pop_front();
            warn!("uplink queue full, dropping the oldest datagram");
        }
        queue.push_back(packet);
    }

    async fn pop(&self) -> Option<OutboundPacket> {
        self.inner.lock().await.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

/// Send one datagram and wait for a validated acknowledgment. A send
/// error, a timeout and a malformed response all count the same way.
async fn deliver(packet: &OutboundPacket) -> bool {
    match try_deliver(packet).await {
        Ok(acked) => acked,
        Err(e) => {
            debug!("uplink send to {} failed: {}", packet.destination.addr, e);
            false
        }
    }
}

async fn try_deliver(packet: &OutboundPacket) -> std::io::Result<bool> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(packet.destination.addr).await?;
    socket.send(&packet.payload).await?;

    let mut buf = [0u8; 64];
    match timeout(packet.destination.receive_timeout, socket.recv(&mut buf)).await {
        Ok(Ok(n)) => Ok(is_push_ack(&packet.payload, &buf[..n])),
        Ok(Err(e)) => Err(e),
        Err(_) => Ok(false),
    }
}

/// Consumer side of the queue. Runs until shutdown is requested and a
/// dequeue observes the queue empty, so everything enqueued before the
/// flag cleared still gets its delivery attempts (drain mode); the
/// inter-iteration pause is skipped while draining.
pub async fn sender_worker(queue: UplinkQueue, shutdown: ShutdownFlag) {
    loop {
        let packet = queue.pop().await;
        let had_packet = packet.is_some();
        if let Some(mut packet) = packet {
            if deliver(&packet).await {
                debug!("uplink datagram acknowledged by {}", packet.destination.addr);
            } else {
                warn!("no uplink ACK received from {}", packet.destination.addr);
                if packet.retries_left > 0 {
                    packet.retries_left -= 1;
                    queue.enqueue(packet).await;
                    info!("requeued the uplink datagram");
                }
            }
        }

        if shutdown.is_running() {
            sleep(SENDER_PAUSE).await;
        } else if !had_packet {
            break;
        }
    }
}
