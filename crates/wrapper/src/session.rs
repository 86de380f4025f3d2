//! Per-connection SMTP relay (spec §4.3): everything before and after
//! `DATA` is forwarded verbatim in both directions; `DATA` is intercepted
//! so the body can be parsed, stamped, and (when tracking is configured)
//! rewritten before being handed to the upstream MTA. `STARTTLS` is
//! terminated at the proxy on both legs independently rather than
//! tunneled, matching a wrapping proxy that needs to read the plaintext
//! body.
//!
//! Grounded on `kumod::smtp_server`'s accept-loop/session shape, trimmed
//! of everything Lua- and policy-engine-coupled since this proxy has a
//! single, fixed relay policy.

use crate::smtp_io::{SmtpIo, Stream};
use sp_mime::TrackingConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{info, warn};

/// The synthesized response used whenever the upstream leg fails outright
/// (connect failure, I/O error, or protocol desync) so the sender always
/// gets a terminal status rather than a hang (spec §5: "on any upstream
/// transport failure, the proxy replies 599 to the sender and closes").
const UPSTREAM_FAILURE_RESPONSE: &str = "599 Internal error: upstream transport failure";

pub struct SessionConfig {
    pub hostname: String,
    pub upstream_addr: String,
    pub upstream_starttls: bool,
    pub tracking: Option<TrackingConfig>,
    pub server_tls: Option<Arc<rustls::ServerConfig>>,
    pub client_tls: Option<Arc<rustls::ClientConfig>>,
    pub io_timeout: Duration,
}

pub async fn handle_session(downstream: TcpStream, peer: SocketAddr, cfg: Arc<SessionConfig>) {
    info!(%peer, "accepted connection");

    let upstream = match TcpStream::connect(&cfg.upstream_addr).await {
        Ok(s) => s,
        Err(e) => {
            warn!(%peer, upstream = %cfg.upstream_addr, error = %e, "failed to connect upstream");
            let mut down = SmtpIo::new(Box::new(downstream), cfg.io_timeout);
            let _ = down.write_line(UPSTREAM_FAILURE_RESPONSE).await;
            let _ = down.flush().await;
            return;
        }
    };

    let mut down = SmtpIo::new(Box::new(downstream) as Box<dyn Stream>, cfg.io_timeout);
    let mut up = SmtpIo::new(Box::new(upstream) as Box<dyn Stream>, cfg.io_timeout);

    // The upstream greeting (and, when `--upstream-starttls` is set, the
    // EHLO/STARTTLS dance that follows it) is consumed here but never
    // relayed verbatim: the proxy terminates both SMTP dialogs
    // independently, so the sender gets the proxy's own greeting rather
    // than the upstream MTA's.
    let upstream_ready = if cfg.upstream_starttls {
        upgrade_upstream_tls(&mut up, &cfg).await.map_err(|e| e.to_string())
    } else {
        up.read_response().await.map(|_| ()).map_err(|e| e.to_string())
    };

    if let Err(e) = upstream_ready {
        warn!(%peer, error = %e, "upstream not ready after connect");
        let _ = down.write_line(UPSTREAM_FAILURE_RESPONSE).await;
        let _ = down.flush().await;
        return;
    }

    if down.write_line(&format!("220 {} ESMTP", cfg.hostname)).await.is_err() {
        return;
    }
    if down.flush().await.is_err() {
        return;
    }

    loop {
        let line = match down.read_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(%peer, error = %e, "downstream read error");
                break;
            }
        };

        let verb = line
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();

        match verb.as_str() {
            "DATA" => {
                if handle_data(&mut down, &mut up, &cfg, peer).await.is_err() {
                    break;
                }
            }
            "STARTTLS" if cfg.server_tls.is_some() => {
                if handle_downstream_starttls(&mut down, &cfg).await.is_err() {
                    break;
                }
            }
            "STARTTLS" => {
                if down.write_line("502 Command not implemented").await.is_err()
                    || down.flush().await.is_err()
                {
                    break;
                }
            }
            "QUIT" => {
                if forward_and_relay(&mut down, &mut up, &line).await.is_err() {
                    let _ = down.write_line(UPSTREAM_FAILURE_RESPONSE).await;
                    let _ = down.flush().await;
                }
                break;
            }
            _ => {
                if forward_and_relay(&mut down, &mut up, &line).await.is_err() {
                    let _ = down.write_line(UPSTREAM_FAILURE_RESPONSE).await;
                    let _ = down.flush().await;
                    break;
                }
            }
        }
    }

    info!(%peer, "session closed");
}

/// Writes `line` to upstream and relays its response downstream verbatim.
async fn forward_and_relay(down: &mut SmtpIo, up: &mut SmtpIo, line: &str) -> std::io::Result<()> {
    up.write_line(line).await?;
    up.flush().await?;
    let (_code, lines) = up.read_response().await?;
    relay_lines(down, &lines).await
}

async fn relay_lines(down: &mut SmtpIo, lines: &[String]) -> std::io::Result<()> {
    for line in lines {
        down.write_line(line).await?;
    }
    down.flush().await
}

/// Intercepts `DATA` (spec §4.3 steps 1-7): the proxy always issues its
/// own `354` (rather than relaying upstream's) because the single
/// recipient rule can only be checked once the full body is in hand, and
/// that check must happen before upstream's `DATA` transaction opens at
/// all (spec §8 scenario 4: "upstream DATA never opened").
async fn handle_data(
    down: &mut SmtpIo,
    up: &mut SmtpIo,
    cfg: &SessionConfig,
    peer: SocketAddr,
) -> std::io::Result<()> {
    down.write_line("354 Start mail input; end with <CRLF>.<CRLF>").await?;
    down.flush().await?;

    let raw = down.read_dot_body().await?;

    match sp_mime::process_message(&raw, cfg.tracking.as_ref()) {
        Ok(processed) => {
            up.write_line("DATA").await?;
            up.flush().await?;
            let (code, lines) = up.read_response().await?;
            if code != 354 {
                return relay_lines(down, &lines).await;
            }
            up.write_dot_body(&processed.bytes).await?;
            up.flush().await?;
            let (_code, final_lines) = up.read_response().await?;
            relay_lines(down, &final_lines).await
        }
        Err(sp_mime::MimeError::MultiRecipientUnsupported) => {
            warn!(%peer, "rejecting multi-recipient message, upstream DATA not opened");
            down.write_line("550 5.7.1 this tracking implementation only supports single-recipient messages")
                .await?;
            down.flush().await
        }
        Err(e) => {
            warn!(%peer, error = %e, "rejecting malformed message, upstream DATA not opened");
            down.write_line("550 5.6.0 malformed message").await?;
            down.flush().await
        }
    }
}

/// Terminates downstream STARTTLS at the proxy (spec §4.3: TLS ends at
/// the proxy on both legs independently). On success the connection's
/// remaining commands run over the upgraded stream.
async fn handle_downstream_starttls(down: &mut SmtpIo, cfg: &SessionConfig) -> std::io::Result<()> {
    let server_config = cfg.server_tls.clone().expect("checked by caller");
    down.write_line("220 2.0.0 Ready to start TLS").await?;
    down.flush().await?;

    let raw = down.take_inner();
    let acceptor = TlsAcceptor::from(server_config);
    let tls_stream = acceptor.accept(raw).await?;
    down.replace_stream(Box::new(tls_stream));
    Ok(())
}

/// Negotiates STARTTLS with the upstream MTA immediately after connect
/// (spec §6: `--upstream-starttls`), before any greeting is read.
async fn upgrade_upstream_tls(up: &mut SmtpIo, cfg: &SessionConfig) -> anyhow::Result<()> {
    let (_code, _lines) = up.read_response().await?;
    up.write_line(&format!("EHLO {}", cfg.hostname)).await?;
    up.flush().await?;
    up.read_response().await?;
    up.write_line("STARTTLS").await?;
    up.flush().await?;
    let (code, _lines) = up.read_response().await?;
    anyhow::ensure!(code == 220, "upstream refused STARTTLS: {code}");

    let client_config = cfg
        .client_tls
        .clone()
        .expect("caller guarantees client_tls is set when upstream_starttls is true");
    let connector = TlsConnector::from(client_config);
    let server_name = rustls::pki_types::ServerName::try_from(cfg.hostname.clone())
        .map_err(|_| anyhow::anyhow!("invalid upstream TLS server name: {}", cfg.hostname))?;

    let raw = up.take_inner();
    let tls_stream = connector.connect(server_name, raw).await?;
    up.replace_stream(Box::new(tls_stream));
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn pair() -> (SmtpIo, SmtpIo) {
        let (a, b) = duplex(8192);
        (
            SmtpIo::new(Box::new(a), Duration::from_secs(5)),
            SmtpIo::new(Box::new(b), Duration::from_secs(5)),
        )
    }

    #[tokio::test]
    async fn forward_and_relay_passes_command_and_response_through() {
        let (mut down, mut fake_downstream_peer) = pair();
        let (mut up, mut fake_upstream_peer) = pair();

        let relay = tokio::spawn(async move {
            forward_and_relay(&mut down, &mut up, "RCPT TO:<a@example.com>").await.unwrap();
        });

        let mut buf = vec![0u8; 128];
        let n = fake_upstream_peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"RCPT TO:<a@example.com>\r\n");
        fake_upstream_peer.write_all(b"250 2.1.5 OK\r\n").await.unwrap();

        relay.await.unwrap();

        let mut buf = vec![0u8; 128];
        let n = fake_downstream_peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"250 2.1.5 OK\r\n");
    }

    #[tokio::test]
    async fn handle_data_rejects_multi_recipient_without_opening_upstream_data() {
        let (mut down, mut fake_downstream_peer) = pair();
        let (mut up, fake_upstream_peer) = pair();
        let cfg = SessionConfig {
            hostname: "proxy.example".to_string(),
            upstream_addr: String::new(),
            upstream_starttls: false,
            tracking: None,
            server_tls: None,
            client_tls: None,
            io_timeout: Duration::from_secs(5),
        };

        let body = b"From: sender@example.com\r\n\
To: a@example.com\r\n\
Cc: b@example.com\r\n\
Subject: hi\r\n\
\r\n\
body\r\n\
.\r\n";

        let writer = tokio::spawn(async move {
            fake_downstream_peer.write_all(body).await.unwrap();
            fake_downstream_peer
        });

        handle_data(&mut down, &mut up, &cfg, "127.0.0.1:1".parse().unwrap())
            .await
            .unwrap();
        let mut fake_downstream_peer = writer.await.unwrap();

        let mut buf = vec![0u8; 256];
        let n = fake_downstream_peer.read(&mut buf).await.unwrap();
        let reply = String::from_utf8_lossy(&buf[..n]);
        assert!(reply.starts_with("354"));
        assert!(reply.contains("550 5.7.1"));

        // The upstream leg never saw a DATA command.
        drop(fake_upstream_peer);
    }
}
