use crate::config::{get_namespaced_optional_string, get_namespaced_string};
use crate::error::Error;
use crate::psk::PskResolver;
use ::config::Config;
use openssl::ssl::{SslContext, SslContextBuilder, SslFiletype, SslMethod, SslVersion};
use std::ffi::{c_char, c_int, CString};
use tracing::{info, warn};

/// The only cipher suite the server offers unless configured otherwise.
pub const DEFAULT_CIPHER_LIST: &str = "PSK-AES128-CBC-SHA256";

/// Identity hint advertised to clients unless configured otherwise.
pub const DEFAULT_IDENTITY_HINT: &str = "cyassl server";

/// Builds the process-wide server context from configuration.
///
/// # Configuration Keys
///
/// - `psk_identity`, `psk_key`: see [`PskResolver::from_config()`]
/// - `cipher_list`: OpenSSL cipher list (defaults to [`DEFAULT_CIPHER_LIST`])
/// - `psk_identity_hint`: defaults to [`DEFAULT_IDENTITY_HINT`]
/// - `tls_server_cert`, `tls_server_key`: optional PEM files, only used when
///   both are present
pub fn build_server_context(config: &Config, name: &str) -> Result<SslContext, Error> {
    let resolver = PskResolver::from_config(config, name)?;
    let cipher_list = get_namespaced_string(config, name, "cipher_list")
        .unwrap_or_else(|_| DEFAULT_CIPHER_LIST.to_string());
    let identity_hint = get_namespaced_string(config, name, "psk_identity_hint")
        .unwrap_or_else(|_| DEFAULT_IDENTITY_HINT.to_string());

    let cert_path = get_namespaced_optional_string(config, name, "tls_server_cert")?;
    let key_path = get_namespaced_optional_string(config, name, "tls_server_key")?;
    let certificate = match (&cert_path, &key_path) {
        (Some(cert), Some(key)) => Some((cert.as_str(), key.as_str())),
        (None, None) => None,
        _ => {
            warn!("Only one of tls_server_cert and tls_server_key is set, ignoring both");
            None
        }
    };

    load_psk_server_context(resolver, &cipher_list, &identity_hint, certificate)
}

/// Creates an immutable server context that authenticates clients with
/// `resolver`.
///
/// The context is limited to TLS 1.2, since the PSK cipher suites it is meant
/// for do not exist in TLS 1.3. `certificate` is an optional
/// `(cert_path, key_path)` pair of PEM files.
pub fn load_psk_server_context(
    resolver: PskResolver,
    cipher_list: &str,
    identity_hint: &str,
    certificate: Option<(&str, &str)>,
) -> Result<SslContext, Error> {
    let mut builder = SslContext::builder(SslMethod::tls_server())?;
    builder.set_max_proto_version(Some(SslVersion::TLS1_2))?;
    builder
        .set_cipher_list(cipher_list)
        .map_err(|source| Error::TlsCipherList {
            list: cipher_list.to_string(),
            source,
        })?;

    builder.set_psk_server_callback(move |_ssl, identity, key| Ok(resolver.resolve(identity, key)));
    set_psk_identity_hint(&mut builder, identity_hint)?;

    if let Some((cert_path, key_path)) = certificate {
        builder
            .set_certificate_chain_file(cert_path)
            .map_err(|source| Error::TlsCertificateLoad {
                path: cert_path.to_string(),
                source,
            })?;
        builder
            .set_private_key_file(key_path, SslFiletype::PEM)
            .and_then(|()| builder.check_private_key())
            .map_err(|source| Error::TlsKeyLoad {
                path: key_path.to_string(),
                source,
            })?;
        info!(cert_path, "Loaded server certificate");
    }

    info!(cipher_list, identity_hint, "Built PSK server context");
    Ok(builder.build())
}

// Exported by libssl but not bound by openssl-sys.
extern "C" {
    fn SSL_CTX_use_psk_identity_hint(ctx: *mut openssl_sys::SSL_CTX, hint: *const c_char) -> c_int;
}

fn set_psk_identity_hint(builder: &mut SslContextBuilder, hint: &str) -> Result<(), Error> {
    let c_hint = CString::new(hint).map_err(|_| Error::TlsIdentityHint(hint.to_string()))?;
    // SAFETY: builder owns a live SSL_CTX and OpenSSL copies the hint before
    // returning.
    let ret = unsafe { SSL_CTX_use_psk_identity_hint(builder.as_ptr(), c_hint.as_ptr()) };
    if ret != 1 {
        return Err(Error::TlsIdentityHint(hint.to_string()));
    }
    Ok(())
}
