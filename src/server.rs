use crate::cli::Args;
use crate::history::resolve_conversation_id;
use crate::service::ChatService;
use crate::websocket::handle_connection;
use std::error::Error;
use std::sync::Arc;
use std::fs::File;
use std::io::BufReader;
use std::num::NonZeroU32;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::io::{ AsyncRead, AsyncWrite };
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ Request, Response };
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::http::response::Response as HttpResponse;
use tokio_rustls::TlsAcceptor;
use rustls::ServerConfig;
use rustls::pki_types::{ CertificateDer, PrivateKeyDer };
use rustls_pemfile::{ certs, pkcs8_private_keys };
use lazy_static::lazy_static;
use governor::{ RateLimiter, Quota, state::{ InMemoryState, NotKeyed }, clock::DefaultClock };

use log::{ info, warn, error, debug };

const CONNECTIONS_PER_SECOND: u32 = 10;

lazy_static! {
    static ref CONNECTION_LIMITER: RateLimiter<NotKeyed, InMemoryState, DefaultClock> = RateLimiter::direct(
        Quota::per_second(NonZeroU32::new(CONNECTIONS_PER_SECOND).unwrap_or(NonZeroU32::MIN))
    );
}

pub struct Server {
    addr: String,
    service: Arc<ChatService>,
    api_key: Option<String>,
    args: Args,
}

fn load_tls_config(
    cert_path: &str,
    key_path: &str
) -> Result<Arc<ServerConfig>, Box<dyn Error + Send + Sync>> {
    let cert_file = File::open(cert_path).map_err(|e|
        format!("Failed to open TLS certificate file '{}': {}", cert_path, e)
    )?;
    let key_file = File::open(key_path).map_err(|e|
        format!("Failed to open TLS key file '{}': {}", key_path, e)
    )?;

    let mut cert_reader = BufReader::new(cert_file);
    let mut key_reader = BufReader::new(key_file);
    let cert_chain: Vec<CertificateDer<'static>> = certs(&mut cert_reader)
        .collect::<Result<_, _>>()
        .map_err(|e| format!("Failed to read certificate(s): {}", e))?;

    let mut keys = pkcs8_private_keys(&mut key_reader);
    let key = match keys.next() {
        Some(Ok(k)) => PrivateKeyDer::Pkcs8(k),
        Some(Err(e)) => {
            return Err(format!("Error reading private key: {}", e).into());
        }
        None => {
            return Err("No PKCS8 private key found in key file".into());
        }
    };

    let config = ServerConfig::builder().with_no_client_auth().with_single_cert(cert_chain, key)?;

    Ok(Arc::new(config))
}

fn query_param(req: &Request, name: &str) -> Option<String> {
    req.uri()
        .query()?
        .split('&')
        .find_map(|pair| {
            let mut kv = pair.splitn(2, '=');
            match (kv.next(), kv.next()) {
                (Some(key), Some(value)) if key == name => Some(value.to_string()),
                _ => None,
            }
        })
}

/// Pulls the client key from the `X-API-Key` header, falling back to the
/// `api_key` query parameter.
fn provided_api_key(req: &Request) -> Option<String> {
    let header = req
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    if header.is_some() {
        return header;
    }
    query_param(req, "api_key")
}

fn unauthorized() -> HttpResponse<Option<String>> {
    let mut resp = HttpResponse::new(Some("Unauthorized".to_string()));
    *resp.status_mut() = StatusCode::UNAUTHORIZED;
    resp
}

impl Server {
    pub fn new(addr: String, service: Arc<ChatService>, api_key: Option<String>, args: Args) -> Self {
        let api_key = api_key.filter(|k| !k.trim().is_empty());

        if api_key.is_some() {
            info!("Server configured with API Key authentication.");
        } else {
            warn!("Server configured WITHOUT API Key authentication. Connections are open.");
        }

        Self { addr, service, api_key, args }
    }

    fn tls_acceptor(&self) -> Result<Option<TlsAcceptor>, Box<dyn Error + Send + Sync>> {
        if !self.args.enable_tls {
            info!("TLS not enabled. Running plain WebSocket (WS) server.");
            return Ok(None);
        }
        match (&self.args.tls_cert_path, &self.args.tls_key_path) {
            (Some(cert_path), Some(key_path)) => {
                info!(
                    "TLS enabled. Loading certificate from '{}' and key from '{}'",
                    cert_path,
                    key_path
                );
                let config = load_tls_config(cert_path, key_path)?;
                Ok(Some(TlsAcceptor::from(config)))
            }
            (Some(_), None) | (None, Some(_)) => {
                error!("Both --tls-cert-path and --tls-key-path must be provided to enable TLS.");
                Err("Missing TLS certificate or key path".into())
            }
            (None, None) => {
                error!("--enable-tls was set but no certificate/key paths provided.");
                Err("TLS enabled without cert/key".into())
            }
        }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.addr).await?;
        self.serve(listener).await
    }

    /// Accepts connections on an already bound listener until it fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn Error + Send + Sync>> {
        let tls_acceptor = self.tls_acceptor()?;
        let protocol = if tls_acceptor.is_some() { "wss" } else { "ws" };
        info!("{} server listening on: {}", protocol.to_uppercase(), listener.local_addr()?);

        loop {
            let (stream, peer) = listener.accept().await?;

            if CONNECTION_LIMITER.check().is_err() {
                warn!("Global connection rate limit exceeded for {}. Dropping connection.", peer);
                continue;
            }

            info!("Incoming connection from: {}", peer);
            let service = Arc::clone(&self.service);
            let required_api_key = self.api_key.clone();
            let tls_acceptor_clone = tls_acceptor.clone();

            tokio::spawn(async move {
                let process_result = if let Some(acceptor) = tls_acceptor_clone {
                    match acceptor.accept(stream).await {
                        Ok(tls_stream) => {
                            info!("TLS handshake successful for {}", peer);
                            Self::process_connection(
                                peer,
                                tls_stream,
                                service,
                                required_api_key
                            ).await
                        }
                        Err(e) => {
                            error!("TLS handshake error for {}: {}", peer, e);
                            Err(Box::new(e) as Box<dyn Error + Send + Sync>)
                        }
                    }
                } else {
                    Self::process_connection(peer, stream, service, required_api_key).await
                };

                if let Err(e) = process_result {
                    error!("Failed to process connection for {}: {}", peer, e);
                }
            });
        }
    }

    async fn process_connection<S>(
        peer: SocketAddr,
        stream: S,
        service: Arc<ChatService>,
        required_api_key: Option<String>
    ) -> Result<(), Box<dyn Error + Send + Sync>>
        where S: AsyncRead + AsyncWrite + Unpin + Send + 'static
    {
        let mut requested_session: Option<String> = None;
        let auth_callback = |
            req: &Request,
            response: Response
        | -> Result<Response, HttpResponse<Option<String>>> {
            info!("Handshake from {}", peer);
            requested_session = query_param(req, "session");
            let provided = provided_api_key(req);
            debug!("Client provided API key: {}", provided.is_some());

            if let Some(ref required) = required_api_key {
                if provided.as_deref() != Some(required.as_str()) {
                    warn!("{}: bad or missing API key", peer);
                    return Err(unauthorized());
                }
                info!("{} authenticated", peer);
            } else {
                info!("{} no API key required", peer);
            }

            Ok(response)
        };

        let accepted = accept_hdr_async(stream, auth_callback).await;
        match accepted {
            Ok(ws) => {
                let conversation_id = resolve_conversation_id(requested_session.as_deref());
                handle_connection(peer, ws, service, conversation_id).await;
                Ok(())
            }
            Err(e) => {
                error!("Handshake failed for {}: {}", peer, e);
                Err(Box::new(e) as _)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    #[test]
    fn api_key_is_read_from_header_first() {
        let mut req = "ws://localhost/chat?api_key=query".into_client_request().unwrap();
        req.headers_mut().insert("X-API-Key", "header".parse().unwrap());
        assert_eq!(provided_api_key(&req).as_deref(), Some("header"));
    }

    #[test]
    fn api_key_falls_back_to_query() {
        let req = "ws://localhost/chat?x=1&api_key=secret".into_client_request().unwrap();
        assert_eq!(provided_api_key(&req).as_deref(), Some("secret"));

        let req = "ws://localhost/chat".into_client_request().unwrap();
        assert_eq!(provided_api_key(&req), None);
    }

    #[test]
    fn session_is_read_from_query() {
        let req = "ws://localhost/chat?api_key=k&session=abc-123".into_client_request().unwrap();
        assert_eq!(query_param(&req, "session").as_deref(), Some("abc-123"));
        assert_eq!(query_param(&req, "sess"), None);

        let req = "ws://localhost/chat".into_client_request().unwrap();
        assert_eq!(query_param(&req, "session"), None);
    }

    #[test]
    fn unauthorized_response_carries_status() {
        assert_eq!(unauthorized().status(), StatusCode::UNAUTHORIZED);
    }
}
