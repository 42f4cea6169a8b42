//! Simulated radio UDP task
//!
//! Owns a UDP socket and answers every datagram through a shared
//! [`SimRadio`]. The task uses a select! loop to:
//! - Read request datagrams and send back echo and reply datagrams
//! - Stop when the shutdown channel fires or its sender is dropped

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, SimError};
use crate::radio::{SimConfig, SimRadio};

/// Largest request datagram accepted
const MAX_DATAGRAM: usize = 65_507;

/// Run the simulated radio on `socket` until `shutdown` fires
pub async fn run_sim_task(
    socket: UdpSocket,
    radio: Arc<Mutex<SimRadio>>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    info!("Simulated radio listening on {}", socket.local_addr()?);

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                let (n, peer) = match result {
                    Ok(r) => r,
                    Err(e) => {
                        // ICMP port-unreachable from a vanished client surfaces here
                        warn!("Simulated radio receive error: {}", e);
                        continue;
                    }
                };
                trace!("sim recv {} bytes from {}", n, peer);
                let responses = match radio.lock() {
                    Ok(mut radio) => radio.handle_datagram(&buf[..n]),
                    Err(_) => {
                        warn!("Simulated radio state poisoned, stopping");
                        return Err(SimError::Poisoned);
                    }
                };
                for datagram in responses {
                    if let Err(e) = socket.send_to(datagram.as_bytes(), peer).await {
                        warn!("Simulated radio send to {} failed: {}", peer, e);
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Simulated radio shutting down");
                    break;
                }
            }
        }
    }
    Ok(())
}

/// A running simulated radio
///
/// Dropping the handle stops the task.
#[derive(Debug)]
pub struct SimHandle {
    addr: SocketAddr,
    radio: Arc<Mutex<SimRadio>>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<Result<()>>>,
}

impl SimHandle {
    /// Address the radio answers on
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shared radio state, for inspection and fault injection
    pub fn radio(&self) -> Arc<Mutex<SimRadio>> {
        Arc::clone(&self.radio)
    }

    /// Run `f` against the radio state
    pub fn with_radio<R>(&self, f: impl FnOnce(&mut SimRadio) -> R) -> Option<R> {
        self.radio.lock().ok().map(|mut radio| f(&mut radio))
    }

    /// Stop the task and wait for it to finish
    pub async fn shutdown(mut self) -> Result<()> {
        let _ = self.shutdown.send(true);
        match self.task.take() {
            Some(task) => task.await?,
            None => Ok(()),
        }
    }
}

impl Drop for SimHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Bind `bind` and serve a radio built from `config` in a background task
pub async fn spawn_sim(config: SimConfig, bind: SocketAddr) -> Result<SimHandle> {
    let socket = UdpSocket::bind(bind).await?;
    let addr = socket.local_addr()?;
    let radio = Arc::new(Mutex::new(SimRadio::new(config)));
    let (shutdown, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(run_sim_task(socket, Arc::clone(&radio), shutdown_rx));
    Ok(SimHandle {
        addr,
        radio,
        shutdown,
        task: Some(task),
    })
}

/// Serve a radio on an ephemeral loopback port
pub async fn spawn_local(config: SimConfig) -> Result<SimHandle> {
    spawn_sim(config, SocketAddr::from(([127, 0, 0, 1], 0))).await
}
