// ABOUTME: TCP listeners that carry traffic into the pools.
// ABOUTME: Production follows the router weight, test reaches standby, pool ports reach one pool.

use std::net::{IpAddr, SocketAddr};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::pool::TrafficPool;
use super::router::{Role, Router, Slot};

/// Which pool a listener's connections go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Active pool, plus the standby weight of new connections.
    Production,
    /// Standby pool only, for pre-cutover verification.
    Test,
    /// One pool regardless of role.
    Pool(Slot),
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::Production => f.write_str("production"),
            Route::Test => f.write_str("test"),
            Route::Pool(slot) => write!(f, "pool:{slot}"),
        }
    }
}

/// Running listeners. Dropping the handle stops accepting new connections;
/// connections already forwarded run to completion.
pub struct ProxyHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    bound: Vec<(Route, SocketAddr)>,
}

impl ProxyHandle {
    /// Address a route's listener actually bound (port 0 resolves here).
    pub fn local_addr(&self, route: Route) -> Option<SocketAddr> {
        self.bound
            .iter()
            .find(|(r, _)| *r == route)
            .map(|(_, addr)| *addr)
    }

    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

impl Drop for ProxyHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Bind every `(route, port)` on `bind` and start forwarding.
///
/// # Errors
///
/// Returns the bind error of the first listener that fails; listeners
/// bound before it are shut down.
pub async fn start_proxy(
    router: Router,
    bind: IpAddr,
    listeners: &[(Route, u16)],
) -> std::io::Result<ProxyHandle> {
    let (shutdown, _) = watch::channel(false);
    let mut handle = ProxyHandle {
        shutdown,
        tasks: Vec::new(),
        bound: Vec::new(),
    };

    for (route, port) in listeners {
        let listener = TcpListener::bind((bind, *port)).await?;
        let addr = listener.local_addr()?;
        tracing::info!(%route, %addr, "listening");

        let task = tokio::spawn(accept_loop(
            listener,
            *route,
            router.clone(),
            handle.shutdown.subscribe(),
        ));
        handle.tasks.push(task);
        handle.bound.push((*route, addr));
    }

    Ok(handle)
}

async fn accept_loop(
    listener: TcpListener,
    route: Route,
    router: Router,
    mut stopped: watch::Receiver<bool>,
) {
    let mut rolls: u64 = 0;

    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            changed = stopped.changed() => {
                if changed.is_err() || *stopped.borrow() {
                    break;
                }
                continue;
            }
        };

        match accepted {
            Ok((stream, peer)) => {
                let pool = resolve(&router, route, rolls);
                rolls = rolls.wrapping_add(1);
                tokio::spawn(async move {
                    if let Err(e) = forward(stream, &pool).await {
                        tracing::debug!(%peer, pool = %pool.id(), "forward failed: {}", e);
                    }
                });
            }
            Err(e) => {
                tracing::warn!(%route, "accept failed: {}", e);
            }
        }
    }

    tracing::debug!(%route, "listener stopped");
}

fn resolve(router: &Router, route: Route, roll: u64) -> TrafficPool {
    match route {
        Route::Production => router.pick(roll).clone(),
        Route::Test => router.pool_for(Role::Standby).clone(),
        Route::Pool(slot) => router.pool(slot).clone(),
    }
}

async fn forward(mut inbound: TcpStream, pool: &TrafficPool) -> std::io::Result<()> {
    let Some(member) = pool.next_member() else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            "pool has no members",
        ));
    };

    let mut outbound = TcpStream::connect((member.host(), member.port())).await?;
    tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await?;
    Ok(())
}
