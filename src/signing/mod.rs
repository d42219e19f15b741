// src/signing/mod.rs

//! OpenPGP signing of Release manifests
//!
//! Two artifacts are produced from the same Release bytes:
//! - `Release.gpg`: an armored detached binary signature
//! - `InRelease`: a clear-signed document with the Release text embedded
//!
//! Keys come from a [`KeyProvider`], which looks up secret certificates by
//! identity. The lookup must resolve to exactly one certificate: none fails
//! with [`Error::NoSigningKey`], several with [`Error::AmbiguousSigningKey`].
//!
//! The clear-signed framing is written here rather than by the OpenPGP
//! library so that stripping the signature gives back the Release bytes
//! exactly. The embedded signature is a text-mode signature over the
//! canonical form of the text (CRLF line endings, trailing whitespace
//! removed, no final line ending).

use crate::error::{Error, Result};
use openpgp::armor;
use openpgp::cert::CertParser;
use openpgp::packet::key::{SecretParts, UnspecifiedRole};
use openpgp::packet::signature::SignatureBuilder;
use openpgp::packet::Key;
use openpgp::parse::Parse;
use openpgp::policy::StandardPolicy;
use openpgp::serialize::stream::{Armorer, Message, Signer};
use openpgp::types::{HashAlgorithm as PgpHashAlgorithm, SignatureType};
use openpgp::{Cert, Packet, PacketPile};
use sequoia_openpgp as openpgp;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Detached signature file name
pub const DETACHED_SIGNATURE_FILE: &str = "Release.gpg";

/// Clear-signed Release file name
pub const INLINE_SIGNED_FILE: &str = "InRelease";

const SIGNED_MESSAGE_HEADER: &str = "-----BEGIN PGP SIGNED MESSAGE-----";
const SIGNATURE_HEADER: &str = "-----BEGIN PGP SIGNATURE-----";

/// A store of secret certificates
pub trait KeyProvider: Send + Sync {
    /// Every certificate in the store that carries secret key material
    fn secret_certs(&self) -> Result<Vec<Cert>>;

    /// The single certificate matching `identity` that can sign
    ///
    /// `identity` matches a certificate when it is a case-insensitive
    /// substring of one of its user IDs, or equals its fingerprint or key ID.
    fn find_signing_cert(&self, identity: &str) -> Result<Cert> {
        let policy = StandardPolicy::new();
        let mut matches: BTreeMap<String, Cert> = BTreeMap::new();

        for cert in self.secret_certs()? {
            if matches_identity(&cert, identity) && signing_key(&cert, &policy).is_some() {
                matches.insert(cert.fingerprint().to_hex(), cert);
            }
        }

        match matches.len() {
            0 => Err(Error::NoSigningKey(identity.to_string())),
            1 => Ok(matches.into_values().next().ok_or_else(|| {
                Error::NoSigningKey(identity.to_string())
            })?),
            count => Err(Error::AmbiguousSigningKey {
                identity: identity.to_string(),
                count,
            }),
        }
    }
}

fn matches_identity(cert: &Cert, identity: &str) -> bool {
    let wanted = identity.trim().to_lowercase();
    if wanted.is_empty() {
        return false;
    }

    let hex = wanted.trim_start_matches("0x").replace(' ', "");
    if cert.fingerprint().to_hex().to_lowercase() == hex
        || cert.keyid().to_hex().to_lowercase() == hex
    {
        return true;
    }

    cert.userids().any(|ua| {
        String::from_utf8_lossy(ua.userid().value())
            .to_lowercase()
            .contains(&wanted)
    })
}

/// First usable secret signing key of a certificate
fn signing_key(cert: &Cert, policy: &StandardPolicy) -> Option<Key<SecretParts, UnspecifiedRole>> {
    cert.keys()
        .with_policy(policy, None)
        .supported()
        .alive()
        .revoked(false)
        .for_signing()
        .secret()
        .next()
        .map(|ka| ka.key().clone())
}

/// Secret keys stored as files in a directory (or a single keyring file)
///
/// Files ending in `.asc`, `.key`, `.gpg` or `.pgp` are read; each may hold
/// several armored or binary certificates.
#[derive(Debug, Clone)]
pub struct KeyringDir {
    path: PathBuf,
}

impl KeyringDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn key_files(&self) -> Result<Vec<PathBuf>> {
        if self.path.is_file() {
            return Ok(vec![self.path.clone()]);
        }
        if !self.path.is_dir() {
            return Err(Error::NotFoundError(format!(
                "Keyring {} does not exist",
                self.path.display()
            )));
        }

        let mut files: Vec<PathBuf> = fs::read_dir(&self.path)
            .map_err(|e| Error::IoError(format!("Failed to read keyring directory: {}", e)))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| matches!(e, "asc" | "key" | "gpg" | "pgp"))
            })
            .collect();
        files.sort();
        Ok(files)
    }
}

impl KeyProvider for KeyringDir {
    fn secret_certs(&self) -> Result<Vec<Cert>> {
        let mut certs = Vec::new();
        for file in self.key_files()? {
            let data = fs::read(&file)
                .map_err(|e| Error::IoError(format!("Failed to read {}: {}", file.display(), e)))?;
            let parser = match CertParser::from_bytes(&data) {
                Ok(parser) => parser,
                Err(e) => {
                    warn!("Ignoring unreadable keyring file {}: {}", file.display(), e);
                    continue;
                }
            };
            for cert in parser {
                match cert {
                    Ok(cert) if cert.is_tsk() => certs.push(cert),
                    Ok(cert) => debug!("{} has no secret key material", cert.fingerprint()),
                    Err(e) => warn!("Ignoring bad certificate in {}: {}", file.display(), e),
                }
            }
        }
        debug!("Loaded {} secret certificates from {}", certs.len(), self.path.display());
        Ok(certs)
    }
}

/// Secret certificates held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyring {
    certs: Vec<Cert>,
}

impl MemoryKeyring {
    pub fn new(certs: Vec<Cert>) -> Self {
        Self { certs }
    }

    /// Generate a fresh signing certificate with the given user ID
    pub fn generate(user_id: &str) -> Result<Cert> {
        let (cert, _revocation) =
            openpgp::cert::CertBuilder::general_purpose(None, Some(user_id))
                .generate()
                .map_err(|e| Error::SigningFailed(format!("Failed to generate key: {}", e)))?;
        Ok(cert)
    }

    pub fn add(&mut self, cert: Cert) {
        self.certs.push(cert);
    }
}

impl KeyProvider for MemoryKeyring {
    fn secret_certs(&self) -> Result<Vec<Cert>> {
        Ok(self.certs.iter().filter(|c| c.is_tsk()).cloned().collect())
    }
}

/// Release bytes with both signature forms
#[derive(Debug, Clone)]
pub struct SignedRelease {
    pub release: Vec<u8>,
    /// Armored detached signature (`Release.gpg`)
    pub detached: Vec<u8>,
    /// Clear-signed document (`InRelease`)
    pub inline: Vec<u8>,
}

/// Signs Release manifests with one resolved key
pub struct ReleaseSigner {
    cert: Cert,
    key: Key<SecretParts, UnspecifiedRole>,
}

impl ReleaseSigner {
    /// Resolve the signing key for `identity`
    pub fn resolve(provider: &dyn KeyProvider, identity: &str) -> Result<Self> {
        let cert = provider.find_signing_cert(identity)?;
        let signer = Self::from_cert(cert)?;
        info!("Signing with key {}", signer.fingerprint());
        Ok(signer)
    }

    pub fn from_cert(cert: Cert) -> Result<Self> {
        let policy = StandardPolicy::new();
        let key = signing_key(&cert, &policy)
            .ok_or_else(|| Error::NoSigningKey(cert.fingerprint().to_hex()))?;
        Ok(Self { cert, key })
    }

    pub fn fingerprint(&self) -> String {
        self.cert.fingerprint().to_hex()
    }

    /// The certificate without secret key material, for verification
    pub fn public_cert(&self) -> Cert {
        self.cert.clone().strip_secret_key_material()
    }

    /// Produce both signature forms for the Release bytes
    pub fn sign(&self, release: &[u8]) -> Result<SignedRelease> {
        let detached = self.detached_signature(release)?;
        let inline = self.clearsign(release)?;
        Ok(SignedRelease {
            release: release.to_vec(),
            detached,
            inline,
        })
    }

    /// Armored detached binary signature over the exact bytes
    pub fn detached_signature(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.armored_signature(data, SignatureType::Binary)
    }

    /// Clear-signed document embedding `text`, which must end with a newline
    pub fn clearsign(&self, text: &[u8]) -> Result<Vec<u8>> {
        let body = std::str::from_utf8(text)
            .map_err(|e| Error::SigningFailed(format!("Release is not UTF-8: {}", e)))?;
        if !body.ends_with('\n') {
            return Err(Error::SigningFailed(
                "clear-signed text must end with a newline".to_string(),
            ));
        }

        let signature = self.armored_signature(&canonical_text(text), SignatureType::Text)?;

        let mut out = String::with_capacity(body.len() + signature.len() + 64);
        out.push_str(SIGNED_MESSAGE_HEADER);
        out.push_str("\nHash: SHA256\n\n");
        for line in body.split_inclusive('\n') {
            if line.starts_with('-') {
                out.push_str("- ");
            }
            out.push_str(line);
        }
        out.push_str(&String::from_utf8_lossy(&signature));
        Ok(out.into_bytes())
    }

    fn armored_signature(&self, data: &[u8], typ: SignatureType) -> Result<Vec<u8>> {
        let failed = |e: anyhow::Error| Error::SigningFailed(e.to_string());

        let keypair = self.key.clone().into_keypair().map_err(failed)?;
        let mut sink = Vec::new();
        {
            let message = Message::new(&mut sink);
            let message = Armorer::new(message)
                .kind(armor::Kind::Signature)
                .build()
                .map_err(failed)?;
            let mut signer = Signer::with_template(message, keypair, SignatureBuilder::new(typ))
                .hash_algo(PgpHashAlgorithm::SHA256)
                .map_err(failed)?
                .detached()
                .build()
                .map_err(failed)?;
            signer.write_all(data)?;
            signer.finalize().map_err(failed)?;
        }
        Ok(sink)
    }
}

/// Canonical form of text for a text-mode signature
fn canonical_text(data: &[u8]) -> Vec<u8> {
    let text = data.strip_suffix(b"\n").unwrap_or(data);
    let mut out = Vec::with_capacity(text.len() + text.len() / 32);
    for (i, line) in text.split(|b| *b == b'\n').enumerate() {
        if i > 0 {
            out.extend_from_slice(b"\r\n");
        }
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let end = line
            .iter()
            .rposition(|b| *b != b' ' && *b != b'\t')
            .map_or(0, |p| p + 1);
        out.extend_from_slice(&line[..end]);
    }
    out
}

/// Split a clear-signed document into its text and armored signature
pub fn split_inline(inline: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let malformed = |why: &str| Error::VerificationFailed(format!("malformed InRelease: {}", why));

    let text = std::str::from_utf8(inline).map_err(|_| malformed("not UTF-8"))?;
    let mut lines = text.split_inclusive('\n');

    match lines.next() {
        Some(first) if first.trim_end() == SIGNED_MESSAGE_HEADER => {}
        _ => return Err(malformed("missing signed message header")),
    }

    // Armor headers (`Hash: ...`) run up to the first empty line
    loop {
        match lines.next() {
            Some(line) if line.trim_end().is_empty() => break,
            Some(_) => continue,
            None => return Err(malformed("no text after headers")),
        }
    }

    let mut body = String::new();
    let mut signature = String::new();
    for line in lines.by_ref() {
        if line.trim_end() == SIGNATURE_HEADER {
            signature.push_str(line);
            break;
        }
        body.push_str(line.strip_prefix("- ").unwrap_or(line));
    }
    if signature.is_empty() {
        return Err(malformed("no signature block"));
    }
    for line in lines {
        signature.push_str(line);
    }

    Ok((body.into_bytes(), signature.into_bytes()))
}

/// Recover the embedded text of a clear-signed document without verifying it
pub fn strip_inline_signature(inline: &[u8]) -> Result<Vec<u8>> {
    split_inline(inline).map(|(body, _)| body)
}

/// Verify a detached signature over `data`
pub fn verify_detached(cert: &Cert, data: &[u8], signature: &[u8]) -> Result<()> {
    verify_signature(cert, data, signature)
}

/// Verify a clear-signed document and return the embedded text
pub fn verify_inline(cert: &Cert, inline: &[u8]) -> Result<Vec<u8>> {
    let (body, signature) = split_inline(inline)?;
    verify_signature(cert, &canonical_text(&body), &signature)?;
    Ok(body)
}

fn verify_signature(cert: &Cert, data: &[u8], signature: &[u8]) -> Result<()> {
    let policy = StandardPolicy::new();
    let pile = PacketPile::from_bytes(signature)
        .map_err(|e| Error::VerificationFailed(format!("Failed to parse signature: {}", e)))?;

    for packet in pile.descendants() {
        if let Packet::Signature(sig) = packet {
            for key in cert.keys().with_policy(&policy, None) {
                if key.for_signing() && sig.verify_message(key.key(), data).is_ok() {
                    return Ok(());
                }
            }
        }
    }

    Err(Error::VerificationFailed(format!(
        "no valid signature by {}",
        cert.fingerprint()
    )))
}
