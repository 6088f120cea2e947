//! TLS material loading, client configuration and up-front verification
//! for the ingestion socket.

use super::config::{SenderTlsConfig, VerifyMode};
use super::error::SenderError;
use crate::domain::{CertificateKind, ConfigError};
use parking_lot::Mutex;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{verify_server_cert_signed_by_trust_anchor, verify_server_name};
use rustls::crypto::{CryptoProvider, aws_lc_rs, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::{ParsedCertificate, WebPkiClientVerifier};
use rustls::sign::CertifiedKey;
use rustls::{
    ClientConfig, DigitallySignedStruct, InconsistentKeys, RootCertStore, SignatureScheme,
    SupportedProtocolVersion,
};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

const PEER_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(aws_lc_rs::default_provider())
}

fn certificate_error(kind: CertificateKind, path: &Path, reason: impl ToString) -> ConfigError {
    ConfigError::CertificateFile {
        kind,
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn open_pem(path: &Path, kind: CertificateKind) -> Result<BufReader<File>, ConfigError> {
    let file = File::open(path).map_err(|e| certificate_error(kind, path, e))?;
    Ok(BufReader::new(file))
}

/// Loads every certificate from a PEM file.
pub fn load_certs(
    path: &Path,
    kind: CertificateKind,
) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let mut reader = open_pem(path, kind)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| certificate_error(kind, path, e))?;

    if certs.is_empty() {
        return Err(certificate_error(kind, path, "no certificates found"));
    }
    Ok(certs)
}

/// Loads the first PKCS#8, PKCS#1 or SEC1 private key from a PEM file.
pub fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConfigError> {
    let mut reader = open_pem(path, CertificateKind::Key)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| certificate_error(CertificateKind::Key, path, e))?
        .ok_or_else(|| certificate_error(CertificateKind::Key, path, "no private key found"))
}

fn root_store(chain: &[CertificateDer<'static>]) -> Result<RootCertStore, ConfigError> {
    let mut roots = RootCertStore::empty();
    for cert in chain {
        roots
            .add(cert.clone())
            .map_err(|e| ConfigError::ChainMismatch(format!("unusable chain certificate: {e}")))?;
    }
    Ok(roots)
}

/// Server certificate check honouring `verify_mode` and `check_hostname`.
///
/// Handshake signatures are always verified. The certificates presented by
/// the peer are kept for inspection.
#[derive(Debug)]
pub struct PeerVerifier {
    roots: Option<Arc<RootCertStore>>,
    mode: VerifyMode,
    check_hostname: bool,
    provider: Arc<CryptoProvider>,
    presented: Mutex<Vec<CertificateDer<'static>>>,
}

impl PeerVerifier {
    pub fn new(
        mode: VerifyMode,
        check_hostname: bool,
        chain: Option<&[CertificateDer<'static>]>,
        provider: Arc<CryptoProvider>,
    ) -> Result<Self, ConfigError> {
        let roots = match chain {
            Some(chain) => Some(Arc::new(root_store(chain)?)),
            None if mode == VerifyMode::None => None,
            None => {
                return Err(ConfigError::Invalid(
                    "server verification needs a chain file".to_string(),
                ));
            }
        };

        Ok(Self {
            roots,
            mode,
            check_hostname,
            provider,
            presented: Mutex::new(Vec::new()),
        })
    }

    /// Accepts any server certificate; used to look at what a peer presents.
    pub fn recording(provider: Arc<CryptoProvider>) -> Self {
        Self {
            roots: None,
            mode: VerifyMode::None,
            check_hostname: false,
            provider,
            presented: Mutex::new(Vec::new()),
        }
    }

    /// Certificates presented during the last handshake, leaf first.
    pub fn presented(&self) -> Vec<CertificateDer<'static>> {
        self.presented.lock().clone()
    }
}

impl ServerCertVerifier for PeerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        {
            let mut presented = self.presented.lock();
            presented.clear();
            presented.push(end_entity.clone().into_owned());
            presented.extend(intermediates.iter().map(|c| c.clone().into_owned()));
        }

        if self.mode == VerifyMode::None {
            return Ok(ServerCertVerified::assertion());
        }

        let Some(roots) = &self.roots else {
            return Err(rustls::Error::General("no trust roots configured".to_string()));
        };

        let cert = ParsedCertificate::try_from(end_entity)?;
        verify_server_cert_signed_by_trust_anchor(
            &cert,
            roots,
            intermediates,
            now,
            self.provider.signature_verification_algorithms.all,
        )?;
        if self.check_hostname {
            verify_server_name(&cert, server_name)?;
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn protocol_versions(security_level: u8) -> Vec<&'static SupportedProtocolVersion> {
    if security_level >= 4 {
        vec![&rustls::version::TLS13]
    } else {
        rustls::DEFAULT_VERSIONS.to_vec()
    }
}

fn client_config(
    verifier: Arc<dyn ServerCertVerifier>,
    security_level: u8,
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    provider: Arc<CryptoProvider>,
) -> Result<ClientConfig, SenderError> {
    ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&protocol_versions(security_level))
        .map_err(|e| SenderError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_client_auth_cert(certs, key)
        .map_err(|e| SenderError::Tls(format!("client certificate rejected: {e}")))
}

/// Builds the client configuration: client certificate plus chain, and a
/// server verifier matching the configured mode.
pub fn build_client_config(config: &SenderTlsConfig) -> Result<Arc<ClientConfig>, SenderError> {
    let provider = crypto_provider();
    let mut certs = load_certs(&config.cert, CertificateKind::Cert)?;
    let key = load_key(&config.key)?;
    let chain = config
        .chain
        .as_deref()
        .map(|path| load_certs(path, CertificateKind::Chain))
        .transpose()?;

    let verifier = PeerVerifier::new(
        config.verify_mode,
        config.check_hostname,
        chain.as_deref(),
        provider.clone(),
    )?;
    certs.extend(chain.unwrap_or_default());

    let client = client_config(
        Arc::new(verifier),
        config.security_level,
        certs,
        key,
        provider,
    )?;
    debug!(
        address = %config.address,
        verify_mode = ?config.verify_mode,
        check_hostname = config.check_hostname,
        "TLS client configuration ready"
    );
    Ok(Arc::new(client))
}

pub fn server_name(host: &str) -> Result<ServerName<'static>, ConfigError> {
    ServerName::try_from(host.to_string())
        .map_err(|e| ConfigError::InvalidAddress(format!("{host}: {e}")))
}

/// Checks the TLS material before any event is sent.
///
/// Each file must be readable, the key must belong to the certificate, the
/// chain must validate the certificate, and the peer at the configured
/// address must present certificates related to the chain.
pub async fn verify_config(config: &SenderTlsConfig) -> Result<(), ConfigError> {
    let provider = crypto_provider();

    check_file(&config.key, CertificateKind::Key)?;
    check_file(&config.cert, CertificateKind::Cert)?;
    if let Some(chain) = &config.chain {
        check_file(chain, CertificateKind::Chain)?;
    }

    let certs = load_certs(&config.cert, CertificateKind::Cert)?;
    let key = load_key(&config.key)?;
    check_key_matches(&certs, key.clone_key(), &provider)?;

    if let Some(chain_path) = &config.chain {
        let chain = load_certs(chain_path, CertificateKind::Chain)?;
        check_chain(&certs, &chain, &provider)?;
        check_peer(config, &certs, key, &chain, provider).await?;
    }

    info!(address = %config.address, "TLS configuration verified");
    Ok(())
}

fn check_file(path: &Path, kind: CertificateKind) -> Result<(), ConfigError> {
    let metadata = std::fs::metadata(path).map_err(|e| certificate_error(kind, path, e))?;
    if !metadata.is_file() {
        return Err(certificate_error(kind, path, "not a regular file"));
    }
    Ok(())
}

pub fn check_key_matches(
    certs: &[CertificateDer<'static>],
    key: PrivateKeyDer<'static>,
    provider: &CryptoProvider,
) -> Result<(), ConfigError> {
    let signing_key = provider
        .key_provider
        .load_private_key(key)
        .map_err(|e| ConfigError::KeyMismatch(format!("unusable private key: {e}")))?;

    match CertifiedKey::new(certs.to_vec(), signing_key).keys_match() {
        Ok(()) => Ok(()),
        Err(rustls::Error::InconsistentKeys(InconsistentKeys::Unknown)) => {
            warn!("cannot tell whether the private key matches the certificate");
            Ok(())
        }
        Err(e) => Err(ConfigError::KeyMismatch(e.to_string())),
    }
}

pub fn check_chain(
    certs: &[CertificateDer<'static>],
    chain: &[CertificateDer<'static>],
    provider: &Arc<CryptoProvider>,
) -> Result<(), ConfigError> {
    let roots = root_store(chain)?;
    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .build()
        .map_err(|e| ConfigError::ChainMismatch(e.to_string()))?;

    let (end_entity, intermediates) = certs
        .split_first()
        .ok_or_else(|| ConfigError::ChainMismatch("certificate file is empty".to_string()))?;
    verifier
        .verify_client_cert(end_entity, intermediates, UnixTime::now())
        .map_err(|e| ConfigError::ChainMismatch(e.to_string()))?;
    Ok(())
}

async fn check_peer(
    config: &SenderTlsConfig,
    certs: &[CertificateDer<'static>],
    key: PrivateKeyDer<'static>,
    chain: &[CertificateDer<'static>],
    provider: Arc<CryptoProvider>,
) -> Result<(), ConfigError> {
    let address = config.address.to_string();
    let incompatible = |reason: String| ConfigError::IncompatiblePeer {
        address: address.clone(),
        reason,
    };

    let recorder = Arc::new(PeerVerifier::recording(provider.clone()));
    let mut client_chain = certs.to_vec();
    client_chain.extend_from_slice(chain);
    let client = client_config(
        recorder.clone(),
        config.security_level,
        client_chain,
        key,
        provider,
    )
    .map_err(|e| incompatible(e.to_string()))?;

    let probe = async {
        let tcp = TcpStream::connect((config.address.host.as_str(), config.address.port)).await?;
        // The handshake result does not matter; the verifier has already
        // captured whatever the peer presented.
        let _ = TlsConnector::from(Arc::new(client))
            .connect(server_name(&config.address.host).map_err(std::io::Error::other)?, tcp)
            .await;
        Ok::<_, std::io::Error>(())
    };
    tokio::time::timeout(PEER_PROBE_TIMEOUT, probe)
        .await
        .map_err(|_| incompatible("timed out probing peer".to_string()))?
        .map_err(|e| incompatible(format!("unreachable: {e}")))?;

    let presented = recorder.presented();
    if presented.is_empty() {
        return Err(incompatible("peer presented no certificate".to_string()));
    }

    if peers_compatible(&presented, chain) {
        Ok(())
    } else {
        Err(incompatible(
            "no issuer or subject common name shared with the local chain".to_string(),
        ))
    }
}

fn common_names(der: &CertificateDer<'_>) -> (Vec<String>, Vec<String>) {
    let Ok((_, cert)) = x509_parser::parse_x509_certificate(der.as_ref()) else {
        return (Vec::new(), Vec::new());
    };
    let collect = |name: &x509_parser::x509::X509Name<'_>| {
        name.iter_common_name()
            .filter_map(|cn| cn.as_str().ok().map(str::to_string))
            .collect::<Vec<_>>()
    };
    (collect(cert.subject()), collect(cert.issuer()))
}

/// True when some peer certificate's subject or issuer CN names a
/// certificate of the local chain.
pub fn peers_compatible(peer: &[CertificateDer<'_>], chain: &[CertificateDer<'_>]) -> bool {
    let local: Vec<String> = chain
        .iter()
        .flat_map(|cert| common_names(cert).0)
        .collect();

    peer.iter().any(|cert| {
        let (subject, issuer) = common_names(cert);
        subject
            .iter()
            .chain(issuer.iter())
            .any(|cn| local.contains(cn))
    })
}
