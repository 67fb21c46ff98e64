use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use crate::common::types::{RequestContext, Selection, ServiceInstance};
use crate::configuration::RetrySettings;
use crate::selection_method::ServiceSelector;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("no instance available for service {0}")]
    NoInstance(String),
    #[error("gave up on service {service} after {attempts} attempts")]
    Exhausted {
        service: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("service task failed: {0}")]
    Task(#[from] JoinError),
}

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct Server {
    pub services: Vec<Service>,
}

/// Forwards TCP connections on `listen_addr` to instances of `name`.
#[derive(Clone)]
pub struct Service {
    pub name: String,
    pub listen_addr: SocketAddr,
    selector: Arc<dyn ServiceSelector>,
    retry: RetrySettings,
}

impl Service {
    pub fn new(
        name: String,
        listen_addr: SocketAddr,
        selector: Arc<dyn ServiceSelector>,
        retry: RetrySettings,
    ) -> Self {
        Self {
            name,
            listen_addr,
            selector,
            retry,
        }
    }

    /// Connects to an instance, moving on to a different one when the
    /// connect fails. Each retry carries the failed instance as the
    /// previous-instance hint.
    pub async fn connect(&self) -> Result<(TcpStream, Arc<ServiceInstance>), ProxyError> {
        let mut previous: Option<Arc<ServiceInstance>> = None;
        let mut last_error = None;

        for attempt in 1..=self.retry.max_attempts {
            let context = RequestContext::new(&self.name).with_previous(previous.take());
            let instance = match self.selector.choose(&context) {
                Selection::Chosen(instance) => instance,
                Selection::Empty => return Err(ProxyError::NoInstance(self.name.clone())),
            };

            let connect = TcpStream::connect((instance.host(), instance.port()));
            let err = match timeout(self.retry.connect_timeout, connect).await {
                Ok(Ok(stream)) => return Ok((stream, instance)),
                Ok(Err(e)) => e,
                Err(_) => io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
            };

            warn!(
                "Attempt {}/{} to {} failed: {}",
                attempt, self.retry.max_attempts, instance, err
            );
            previous = Some(instance);
            last_error = Some(err);
        }

        Err(ProxyError::Exhausted {
            service: self.name.clone(),
            attempts: self.retry.max_attempts,
            source: last_error
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "no attempts made")),
        })
    }

    #[tracing::instrument(name = "Run service", skip_all, fields(service = %self.name), err(Debug))]
    pub async fn run(&self) -> Result<(), ProxyError> {
        let listener = TcpListener::bind(self.listen_addr).await?;
        info!("Listening on {}", self.listen_addr);

        self.serve(listener).await;
        Ok(())
    }

    pub async fn serve(&self, listener: TcpListener) {
        let listener = &listener;
        self.accept_loop(move || listener.accept()).await
    }

    /// Accept errors such as EMFILE are per-connection; the loop backs off
    /// briefly and keeps listening.
    async fn accept_loop<F, Fut>(&self, mut accept: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = io::Result<(TcpStream, SocketAddr)>>,
    {
        loop {
            let client_stream = match accept().await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    warn!("Error accepting connection for {}: {}", self.name, e);
                    sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            let service = self.clone();

            tokio::spawn(async move {
                if let Err(e) = service.handle_connection(client_stream).await {
                    error!("Error handling connection for {}: {}", service.name, e);
                }
            });
        }
    }

    async fn handle_connection(&self, mut client_stream: TcpStream) -> Result<(), ProxyError> {
        let (mut backend_stream, instance) = self.connect().await?;
        info!("Forwarding connection to {}", instance);

        let (from_client, from_server) =
            copy_bidirectional(&mut client_stream, &mut backend_stream).await?;
        info!(
            "Client wrote {} bytes and received {} bytes",
            from_client, from_server
        );

        Ok(())
    }
}

impl Server {
    pub fn new(services: Vec<Service>) -> Self {
        Self { services }
    }

    /// Runs every service until one of them fails, then stops the rest and
    /// returns that failure.
    pub async fn run(&self) -> Result<(), ProxyError> {
        let mut tasks = JoinSet::new();
        for service in self.services.iter() {
            let service = service.clone();
            tasks.spawn(async move {
                service.run().await.map_err(|err| {
                    error!("Service {:?} failed: {}", service.name, err);
                    err
                })
            });
        }

        while let Some(joined) = tasks.join_next().await {
            joined??;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::selection_method::{AvoidPreviousRoundRobin, InitialPosition};
    use crate::supplier::StaticSupplier;

    const SERVICE: &str = "echo";

    fn retry(max_attempts: u32) -> RetrySettings {
        RetrySettings {
            max_attempts,
            connect_timeout: Duration::from_millis(500),
        }
    }

    fn service(instances: Vec<ServiceInstance>, max_attempts: u32) -> Service {
        let selector = AvoidPreviousRoundRobin::new(
            StaticSupplier::single(SERVICE, instances),
            InitialPosition::Zero,
        );
        Service::new(
            SERVICE.to_string(),
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(selector),
            retry(max_attempts),
        )
    }

    async fn echo_backend() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let (mut rd, mut wr) = stream.split();
                    let _ = tokio::io::copy(&mut rd, &mut wr).await;
                });
            }
        });
        addr
    }

    /// An address nothing listens on.
    async fn dead_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    fn instance(id: &str, addr: SocketAddr) -> ServiceInstance {
        ServiceInstance::new(SERVICE, id, addr.ip().to_string(), addr.port(), false)
    }

    #[tokio::test]
    async fn test_empty_pool_reports_no_instance() {
        let err = service(vec![], 2).connect().await.unwrap_err();
        assert!(matches!(err, ProxyError::NoInstance(name) if name == SERVICE));
    }

    #[tokio::test]
    async fn test_retry_moves_to_other_instance() {
        let dead = dead_addr().await;
        let live = echo_backend().await;
        let svc = service(vec![instance("dead", dead), instance("live", live)], 2);

        let (_, chosen) = svc.connect().await.unwrap();
        assert_eq!(chosen.instance_id(), "live");
    }

    #[tokio::test]
    async fn test_exhausted_after_max_attempts() {
        let dead = dead_addr().await;
        let svc = service(vec![instance("dead", dead)], 3);

        let err = svc.connect().await.unwrap_err();
        assert!(matches!(err, ProxyError::Exhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_forwards_bytes() {
        let live = echo_backend().await;
        let svc = service(vec![instance("live", live)], 1);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let front = listener.local_addr().unwrap();
        tokio::spawn(async move { svc.serve(listener).await });

        assert_eq!(round_trip(front).await, *b"ping");
    }

    async fn round_trip(front: SocketAddr) -> [u8; 4] {
        let mut client = TcpStream::connect(front).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_accept_error_does_not_stop_listener() {
        let live = echo_backend().await;
        let svc = service(vec![instance("live", live)], 1);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let front = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let listener = &listener;
            let mut failures = 2;
            svc.accept_loop(move || {
                let fail = failures > 0;
                failures -= usize::from(fail);
                async move {
                    if fail {
                        Err(io::Error::new(io::ErrorKind::Other, "too many open files"))
                    } else {
                        listener.accept().await
                    }
                }
            })
            .await
        });

        assert_eq!(round_trip(front).await, *b"ping");
    }

    #[tokio::test]
    async fn test_server_run_reports_bind_failure() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut svc = service(vec![], 1);
        svc.listen_addr = taken.local_addr().unwrap();

        let err = Server::new(vec![svc]).run().await.unwrap_err();

        assert!(matches!(err, ProxyError::Io(ref e) if e.kind() == io::ErrorKind::AddrInUse));
    }
}
