use crate::{
    message::{Request, Response},
    peer::MutexPeer,
    transport::{frame, Transport},
    *,
};
use color_print::cformat;
use futures::{SinkExt, StreamExt};
use std::{error::Error, net::SocketAddr, sync::Arc};
use tokio::net::{TcpListener, TcpStream};

/// Inbound endpoint of a peer: answers every request line with a response line.
pub struct Listener {
    listener: TcpListener,
}

impl Listener {
    /// Function that binds the listening socket. Failing here is fatal for the peer.
    pub async fn bind(address: SocketAddr) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| format!("failed to start the listener on {address}: {e}"))?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Box<dyn Error + Send + Sync>> {
        Ok(self.listener.local_addr()?)
    }

    async fn handle<T: Transport>(
        stream: TcpStream,
        address: SocketAddr,
        peer: Arc<MutexPeer<T>>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut lines = frame(stream);

        // one request at a time per connection: a requester never has two in flight
        while let Some(line) = lines.next().await {
            let line = line?;
            let request = match Request::from_json_string(&line) {
                Ok(request) => request,
                Err(e) => {
                    log::warning(&cformat!(
                        "Dropping <bold>{address}</bold>: the request had <bold>incorrect formatting</bold> ({e})."
                    ));
                    return Ok(());
                }
            };

            let response: Response = match peer.handle_request(request).await {
                Ok(response) => response,
                Err(e) => {
                    log::warning(&cformat!("Dropping <bold>{address}</bold>: {e}."));
                    return Ok(());
                }
            };
            lines.send(response.to_json_string()?).await?;
        }

        Ok(())
    }

    /// Function that accepts connections forever, one task per connection.
    pub async fn serve<T: Transport>(
        self,
        peer: Arc<MutexPeer<T>>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        log::info(&cformat!(
            "Node <bold>{}</bold> started server at <bold>{}</bold>.",
            peer.id(),
            self.listener.local_addr()?
        ));

        loop {
            let (stream, address) = self.listener.accept().await?;
            log::debug(&format!("Accepted a connection from {address}."));

            let peer = Arc::clone(&peer);
            tokio::spawn(async move {
                if let Err(e) = Self::handle(stream, address, peer).await {
                    log::error(&format!("{e}"));
                }
            });
        }
    }
}
