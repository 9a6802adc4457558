// SPDX-FileCopyrightText: 2026 otainstall contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Whole-file package signature verification.
//!
//! Recovery packages carry their signature in the zip archive comment,
//! referenced by a 6-byte footer at the end of the file. The envelope is a
//! CMS `SignedData` structure used for nothing more than raw signature
//! transport: no signed attributes, a single `SignerInfo`, and a signature
//! covering the file up to (but excluding) the archive comment and its
//! length field.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use cms::{content_info::ContentInfo, signed_data::SignedData};
use const_oid::{db::rfc5912, ObjectIdentifier};
use memchr::memmem;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};
use x509_cert::{
    der::{referenced::OwnedToRef, Decode},
    Certificate,
};

pub const ZIP_EOCD_MAGIC: &[u8; 4] = b"PK\x05\x06";

/// Hash this many bytes between checks of the cancel signal.
const DIGEST_CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Cannot find signature footer magic")]
    FooterMagicNotFound,
    #[error("Cannot find EOCD magic")]
    EocdMagicNotFound,
    #[error("EOCD magic found in archive comment")]
    EocdMagicInComment,
    #[error("Zip is too small to contain EOCD")]
    ZipTooSmall,
    #[error("Signature offset exceeds archive comment size")]
    SignatureOffsetTooLarge,
    #[error("Expected exactly one CMS SignerInfo, but found {0}")]
    NotOneCmsSignerInfo(usize),
    #[error("Unsupported digest algorithm: {0}")]
    UnsupportedDigestAlgorithm(ObjectIdentifier),
    #[error("Unsupported signature algorithm: {0}")]
    UnsupportedSignatureAlgorithm(ObjectIdentifier),
    #[error("No trusted certificates loaded from {0:?}")]
    NoTrustedCerts(PathBuf),
    #[error("Package signature does not match any trusted key")]
    UntrustedSignature,
    #[error("Verification cancelled")]
    Cancelled,
    #[error("SPKI error")]
    Spki(#[from] x509_cert::spki::Error),
    #[error("x509 DER error")]
    Der(#[from] x509_cert::der::Error),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// The seam between the install driver and the signature verifier. Tests
/// substitute a stub; production uses [`TrustedKeyVerifier`].
pub trait PackageVerifier {
    fn verify(&self, package: &[u8]) -> Result<()>;
}

/// Verifies packages against a fixed set of trusted certificates.
pub struct TrustedKeyVerifier {
    certs: Vec<Certificate>,
    cancel_signal: std::sync::Arc<AtomicBool>,
}

impl TrustedKeyVerifier {
    pub fn new(certs: Vec<Certificate>, cancel_signal: std::sync::Arc<AtomicBool>) -> Self {
        Self {
            certs,
            cancel_signal,
        }
    }
}

impl PackageVerifier for TrustedKeyVerifier {
    fn verify(&self, package: &[u8]) -> Result<()> {
        verify_package(package, &self.certs, &self.cancel_signal)
    }
}

/// Load the trusted certificate list from a concatenated-PEM file. An empty
/// list is an error: it would make every package unverifiable.
pub fn load_trusted_certs(path: &Path) -> Result<Vec<Certificate>> {
    let data = fs::read(path)?;
    let certs = Certificate::load_pem_chain(&data)?;

    if certs.is_empty() {
        return Err(Error::NoTrustedCerts(path.to_owned()));
    }

    info!("{} key(s) loaded from {path:?}", certs.len());

    Ok(certs)
}

/// Get the RSA public key from a certificate.
pub fn get_public_key(cert: &Certificate) -> Result<RsaPublicKey> {
    let public_key =
        RsaPublicKey::try_from(cert.tbs_certificate.subject_public_key_info.owned_to_ref())?;

    Ok(public_key)
}

/// Parse a CMS [`SignedData`] structure from raw DER-encoded data.
pub fn parse_cms(data: &[u8]) -> Result<SignedData> {
    let ci = ContentInfo::from_der(data)?;
    let sd = ci.content.decode_as::<SignedData>()?;

    Ok(sd)
}

/// Parse the CMS signature from the package's archive comment. Returns the
/// decoded CMS [`SignedData`] structure and the length of the file (from the
/// beginning) that's covered by the signature. This does not perform any
/// parsing of zip data structures.
fn parse_package_footer(data: &[u8]) -> Result<(SignedData, u64)> {
    if data.len() < 6 {
        return Err(Error::ZipTooSmall);
    }

    let footer = &data[data.len() - 6..];
    let abs_eoc_offset = u16::from_le_bytes(footer[0..2].try_into().unwrap());
    let sig_magic = u16::from_le_bytes(footer[2..4].try_into().unwrap());
    let comment_size = u16::from_le_bytes(footer[4..6].try_into().unwrap());

    if sig_magic != 0xffff {
        return Err(Error::FooterMagicNotFound);
    }

    // The framework's verifier always assumes a non-zip64 EOCD, so we do the
    // same.
    let eocd_size = u64::from(comment_size) + 22;
    if (data.len() as u64) < eocd_size {
        return Err(Error::ZipTooSmall);
    } else if !(6..=eocd_size).contains(&u64::from(abs_eoc_offset)) {
        return Err(Error::SignatureOffsetTooLarge);
    }

    let eocd = &data[data.len() - eocd_size as usize..];

    let mut eocd_magic_iter = memmem::find_iter(eocd, ZIP_EOCD_MAGIC);
    if eocd_magic_iter.next() != Some(0) {
        return Err(Error::EocdMagicNotFound);
    }
    if eocd_magic_iter.next().is_some() {
        return Err(Error::EocdMagicInComment);
    }

    let sig_offset = eocd.len() - usize::from(abs_eoc_offset);
    let sd = parse_cms(&eocd[sig_offset..eocd.len() - 6])?;

    // The signature covers everything aside from the archive comment and its
    // length field.
    let hashed_size = data.len() as u64 - 2 - u64::from(comment_size);

    Ok((sd, hashed_size))
}

/// Verify the whole-file signature of a mapped package against a set of
/// trusted certificates. Succeeds if the signature validates against at
/// least one of them; certificates whose key cannot be extracted are
/// skipped.
pub fn verify_package(
    data: &[u8],
    certs: &[Certificate],
    cancel_signal: &AtomicBool,
) -> Result<()> {
    let (sd, hashed_size) = parse_package_footer(data)?;

    if sd.signer_infos.0.len() != 1 {
        return Err(Error::NotOneCmsSignerInfo(sd.signer_infos.0.len()));
    }

    let signer = sd.signer_infos.0.get(0).unwrap();
    if signer.digest_alg.oid != rfc5912::ID_SHA_256 {
        return Err(Error::UnsupportedDigestAlgorithm(signer.digest_alg.oid));
    } else if signer.signature_algorithm.oid != rfc5912::RSA_ENCRYPTION
        && signer.signature_algorithm.oid != rfc5912::SHA_256_WITH_RSA_ENCRYPTION
    {
        return Err(Error::UnsupportedSignatureAlgorithm(
            signer.signature_algorithm.oid,
        ));
    }

    let mut context = Sha256::new();
    for chunk in data[..hashed_size as usize].chunks(DIGEST_CHUNK_SIZE) {
        if cancel_signal.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }

        context.update(chunk);
    }
    let digest = context.finalize();

    let scheme = Pkcs1v15Sign::new::<Sha256>();
    let signature = signer.signature.as_bytes();

    for cert in certs {
        let public_key = match get_public_key(cert) {
            Ok(key) => key,
            Err(e) => {
                debug!("Skipping trusted certificate without RSA key: {e}");
                continue;
            }
        };

        if public_key
            .verify(scheme.clone(), &digest, signature)
            .is_ok()
        {
            return Ok(());
        }
    }

    Err(Error::UntrustedSignature)
}
