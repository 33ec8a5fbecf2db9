//! TLS helpers for explicit and implicit FTPS (RFC 4217).

use crate::error::FtpResult;
use crate::types::TlsOptions;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_native_tls::{TlsConnector, TlsStream};

/// Build a `TlsConnector` according to the configured options.
pub fn build_tls_connector(options: &TlsOptions) -> FtpResult<TlsConnector> {
    let mut builder = native_tls::TlsConnector::builder();
    if options.accept_invalid_certs {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    }
    let connector = builder.build()?;
    Ok(TlsConnector::from(connector))
}

/// Perform a TLS handshake over an established stream.
///
/// Used for the control channel (after `AUTH TLS`, or from byte zero for
/// implicit FTPS) and for every data channel of a secured session. The
/// data-channel handshake is always fresh: `native-tls` has no way to
/// resume the control channel's session on a second socket.
pub async fn wrap_stream<S>(stream: S, host: &str, options: &TlsOptions) -> FtpResult<TlsStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let connector = build_tls_connector(options)?;
    let sni = options.sni_host.as_deref().unwrap_or(host);
    connector
        .connect(sni, stream)
        .await
        .map_err(|e| crate::error::FtpError::tls_failed(format!("TLS handshake: {}", e)))
}
