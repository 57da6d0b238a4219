//! HTTP trigger server
//!
//! A blocking accept loop with one thread per connection. Each request is
//! routed by [`routes::handle`]; a sync runs to completion inside the
//! request.

mod http;
mod routes;

use anyhow::{Context, Result};
use std::io::BufReader;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

pub use http::{Request, Response};
pub use routes::{ORGANIZATION_HEADER, handle};

use crate::sync::SyncEngine;

/// Time allowed for a client to send its request
const READ_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SyncServer {
    listener: TcpListener,
    engine: Arc<SyncEngine>,
}

impl SyncServer {
    pub fn bind(addr: &str, engine: Arc<SyncEngine>) -> Result<Self> {
        let listener =
            TcpListener::bind(addr).with_context(|| format!("Could not bind to {}", addr))?;
        Ok(Self { listener, engine })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the listener fails
    pub fn serve(self) -> Result<()> {
        log::info!("Listening on {}", self.local_addr()?);

        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    log::warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let engine = self.engine.clone();
            std::thread::spawn(move || {
                if let Err(e) = handle_connection(stream, &engine) {
                    log::warn!("Connection error: {:#}", e);
                }
            });
        }
        Ok(())
    }
}

fn handle_connection(mut stream: TcpStream, engine: &SyncEngine) -> Result<()> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    let mut reader = BufReader::new(stream.try_clone()?);
    let response = match Request::read_from(&mut reader) {
        Ok(request) => {
            log::info!("{} {}", request.method, request.path);
            handle(engine, &request)
        }
        Err(e) => Response::error(400, format!("{:#}", e)),
    };

    response.write_to(&mut stream)
}
