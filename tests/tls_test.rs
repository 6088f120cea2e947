use devo_sdk::domain::{CertificateKind, ConfigError};
use devo_sdk::sender::tls::{crypto_provider, verify_config};
use devo_sdk::sender::{
    Address, Sender, SenderConfig, SenderError, SenderOptions, SenderTlsConfig, VerifyMode,
};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose,
};
use rustls::ServerConfig;
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;

struct Authority {
    cert: Certificate,
    key: KeyPair,
}

impl Authority {
    fn new(common_name: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let cert = params.self_signed(&key).unwrap();
        Self { cert, key }
    }

    fn issue(&self, common_name: &str, names: &[&str], usage: ExtendedKeyUsagePurpose) -> Leaf {
        let key = KeyPair::generate().unwrap();
        let mut params =
            CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>())
                .unwrap();
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        params.extended_key_usages = vec![usage];
        let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();
        Leaf { cert, key }
    }
}

struct Leaf {
    cert: Certificate,
    key: KeyPair,
}

fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

/// Client material on disk: key, certificate and the CA used as chain.
struct ClientFiles {
    _dir: TempDir,
    key: PathBuf,
    cert: PathBuf,
    chain: PathBuf,
}

fn client_files(client: &Leaf, chain: &Authority) -> ClientFiles {
    let dir = TempDir::new().unwrap();
    ClientFiles {
        key: write(dir.path(), "client.key", &client.key.serialize_pem()),
        cert: write(dir.path(), "client.crt", &client.cert.pem()),
        chain: write(dir.path(), "chain.crt", &chain.cert.pem()),
        _dir: dir,
    }
}

/// TLS listener on loopback; every accepted connection's plaintext is sent
/// on the returned channel once the client closes it.
async fn tls_server(
    authority: &Authority,
    server: &Leaf,
    client_roots: Option<&Authority>,
) -> (u16, mpsc::UnboundedReceiver<Vec<u8>>) {
    let provider = crypto_provider();
    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .unwrap();
    let builder = match client_roots {
        Some(roots) => {
            let mut store = rustls::RootCertStore::empty();
            store.add(roots.cert.der().clone()).unwrap();
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(store), provider)
                .build()
                .unwrap();
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };
    let config = builder
        .with_single_cert(
            vec![server.cert.der().clone(), authority.cert.der().clone()],
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(server.key.serialize_der())),
        )
        .unwrap();

    let acceptor = TlsAcceptor::from(Arc::new(config));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((tcp, _)) = listener.accept().await else {
                break;
            };
            let acceptor = acceptor.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let Ok(mut stream) = acceptor.accept(tcp).await else {
                    return;
                };
                let mut received = Vec::new();
                let _ = stream.read_to_end(&mut received).await;
                let _ = tx.send(received);
            });
        }
    });
    (port, rx)
}

fn tls_config(port: u16, files: &ClientFiles) -> SenderTlsConfig {
    SenderTlsConfig::new(
        Address::new("127.0.0.1", port),
        &files.key,
        &files.cert,
        Some(files.chain.clone()),
    )
}

fn options() -> SenderOptions {
    SenderOptions {
        hostname: Some("tls-host".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn events_travel_over_mutual_tls() {
    let ca = Authority::new("Devo Test CA");
    let server = ca.issue("collector", &["127.0.0.1"], ExtendedKeyUsagePurpose::ServerAuth);
    let client = ca.issue("client", &[], ExtendedKeyUsagePurpose::ClientAuth);
    let files = client_files(&client, &ca);
    let (port, mut received) = tls_server(&ca, &server, Some(&ca)).await;

    let config = tls_config(port, &files).with_verify_config(true);
    let sender = Sender::new(SenderConfig::Tls(config), options())
        .await
        .unwrap();
    sender.send("test.keep.free", "over tls").await.unwrap();
    sender.close().await.unwrap();

    // The verification probe connects first and sends nothing.
    let expected = b"<14>Jan  1 00:00:00 tls-host test.keep.free: over tls\n".to_vec();
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(payload) = received.recv().await {
            if payload == expected {
                return true;
            }
        }
        false
    })
    .await
    .unwrap();
    assert!(found);
}

#[tokio::test]
async fn untrusted_server_fails_the_handshake() {
    let ca = Authority::new("Devo Test CA");
    let rogue = Authority::new("Rogue CA");
    let server = rogue.issue("collector", &["127.0.0.1"], ExtendedKeyUsagePurpose::ServerAuth);
    let client = ca.issue("client", &[], ExtendedKeyUsagePurpose::ClientAuth);
    let files = client_files(&client, &ca);
    let (port, _received) = tls_server(&rogue, &server, None).await;

    let result = Sender::new(SenderConfig::Tls(tls_config(port, &files)), options()).await;
    assert!(matches!(result, Err(SenderError::Tls(_))), "{:?}", result.err());
}

#[tokio::test]
async fn verify_none_accepts_any_server() {
    let ca = Authority::new("Devo Test CA");
    let rogue = Authority::new("Rogue CA");
    let server = rogue.issue("collector", &["elsewhere.invalid"], ExtendedKeyUsagePurpose::ServerAuth);
    let client = ca.issue("client", &[], ExtendedKeyUsagePurpose::ClientAuth);
    let files = client_files(&client, &ca);
    let (port, mut received) = tls_server(&rogue, &server, None).await;

    let config = SenderTlsConfig::new(
        Address::new("127.0.0.1", port),
        &files.key,
        &files.cert,
        None,
    )
    .with_verify_mode(VerifyMode::None);
    let sender = Sender::new(SenderConfig::Tls(config), options())
        .await
        .unwrap();
    sender.send("test.keep.free", "anyway").await.unwrap();
    sender.close().await.unwrap();

    let payload = received.recv().await.unwrap();
    assert!(payload.ends_with(b"test.keep.free: anyway\n"));
}

#[tokio::test]
async fn hostname_mismatch_is_rejected_unless_disabled() {
    let ca = Authority::new("Devo Test CA");
    let server = ca.issue("collector", &["collector.invalid"], ExtendedKeyUsagePurpose::ServerAuth);
    let client = ca.issue("client", &[], ExtendedKeyUsagePurpose::ClientAuth);
    let files = client_files(&client, &ca);
    let (port, _received) = tls_server(&ca, &server, Some(&ca)).await;

    let strict = Sender::new(SenderConfig::Tls(tls_config(port, &files)), options()).await;
    assert!(matches!(strict, Err(SenderError::Tls(_))), "{:?}", strict.err());

    let relaxed = tls_config(port, &files).with_check_hostname(false);
    let sender = Sender::new(SenderConfig::Tls(relaxed), options())
        .await
        .unwrap();
    sender.close().await.unwrap();
}

#[tokio::test]
async fn missing_key_file_is_reported() {
    let ca = Authority::new("Devo Test CA");
    let client = ca.issue("client", &[], ExtendedKeyUsagePurpose::ClientAuth);
    let files = client_files(&client, &ca);

    let mut config = tls_config(1, &files);
    config.key = files.key.with_file_name("absent.key");

    match verify_config(&config).await {
        Err(ConfigError::CertificateFile { kind, .. }) => assert_eq!(kind, CertificateKind::Key),
        other => panic!("expected a certificate file error, got {other:?}"),
    }

    let result = Sender::new(SenderConfig::Tls(config.with_verify_config(true)), options()).await;
    assert!(matches!(
        result,
        Err(SenderError::Config(ConfigError::CertificateFile { .. }))
    ));
}

#[tokio::test]
async fn key_from_another_certificate_is_a_mismatch() {
    let ca = Authority::new("Devo Test CA");
    let client = ca.issue("client", &[], ExtendedKeyUsagePurpose::ClientAuth);
    let other = ca.issue("other", &[], ExtendedKeyUsagePurpose::ClientAuth);
    let files = client_files(&client, &ca);
    std::fs::write(&files.key, other.key.serialize_pem()).unwrap();

    let result = verify_config(&tls_config(1, &files)).await;
    assert!(matches!(result, Err(ConfigError::KeyMismatch(_))), "{result:?}");
}

#[tokio::test]
async fn chain_from_another_authority_is_a_mismatch() {
    let ca = Authority::new("Devo Test CA");
    let rogue = Authority::new("Rogue CA");
    let client = ca.issue("client", &[], ExtendedKeyUsagePurpose::ClientAuth);
    let files = client_files(&client, &rogue);

    let result = verify_config(&tls_config(1, &files)).await;
    assert!(matches!(result, Err(ConfigError::ChainMismatch(_))), "{result:?}");
}

#[tokio::test]
async fn peer_from_unrelated_authority_is_incompatible() {
    let ca = Authority::new("Devo Test CA");
    let rogue = Authority::new("Rogue CA");
    let server = rogue.issue("collector", &["127.0.0.1"], ExtendedKeyUsagePurpose::ServerAuth);
    let client = ca.issue("client", &[], ExtendedKeyUsagePurpose::ClientAuth);
    let files = client_files(&client, &ca);
    let (port, _received) = tls_server(&rogue, &server, None).await;

    let result = verify_config(&tls_config(port, &files)).await;
    assert!(
        matches!(result, Err(ConfigError::IncompatiblePeer { .. })),
        "{result:?}"
    );
}

#[tokio::test]
async fn matching_material_and_peer_verify() {
    let ca = Authority::new("Devo Test CA");
    let server = ca.issue("collector", &["127.0.0.1"], ExtendedKeyUsagePurpose::ServerAuth);
    let client = ca.issue("client", &[], ExtendedKeyUsagePurpose::ClientAuth);
    let files = client_files(&client, &ca);
    let (port, _received) = tls_server(&ca, &server, Some(&ca)).await;

    verify_config(&tls_config(port, &files)).await.unwrap();
}
