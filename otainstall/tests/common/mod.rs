// SPDX-FileCopyrightText: 2026 otainstall contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Shared fixtures: throwaway signing keys and signed package construction.

#![allow(dead_code)]

use std::{
    io::{Cursor, Write},
    sync::OnceLock,
    time::Duration,
};

use cms::{
    cert::{CertificateChoices, IssuerAndSerialNumber},
    content_info::{CmsVersion, ContentInfo},
    signed_data::{
        DigestAlgorithmIdentifiers, EncapsulatedContentInfo, SignatureValue, SignedData,
        SignerIdentifier, SignerInfo,
    },
};
use rsa::{pkcs1v15::SigningKey, pkcs8::EncodePublicKey, Pkcs1v15Sign, RsaPrivateKey};
use sha2::{Digest, Sha256};
use x509_cert::{
    builder::{Builder, CertificateBuilder, Profile},
    der::{asn1::SetOfVec, Any, Decode, Encode},
    serial_number::SerialNumber,
    spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned},
    time::Validity,
    Certificate,
};
use zip::{write::FileOptions, CompressionMethod, ZipWriter};

/// One signing identity for the whole test binary; RSA key generation is too
/// slow to repeat per test.
pub fn test_keypair() -> &'static (RsaPrivateKey, Certificate) {
    static KEYPAIR: OnceLock<(RsaPrivateKey, Certificate)> = OnceLock::new();

    KEYPAIR.get_or_init(|| {
        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let cert = generate_cert(&key);

        (key, cert)
    })
}

/// A second identity, for untrusted-signature scenarios.
pub fn other_keypair() -> &'static (RsaPrivateKey, Certificate) {
    static KEYPAIR: OnceLock<(RsaPrivateKey, Certificate)> = OnceLock::new();

    KEYPAIR.get_or_init(|| {
        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let cert = generate_cert(&key);

        (key, cert)
    })
}

fn generate_cert(key: &RsaPrivateKey) -> Certificate {
    let public_key_der = key.to_public_key().to_public_key_der().unwrap();
    let signing_key = SigningKey::<Sha256>::new(key.clone());

    let builder = CertificateBuilder::new(
        Profile::Root,
        SerialNumber::from(519u32),
        Validity::from_now(Duration::from_secs(3600)).unwrap(),
        "CN=otainstall test".parse().unwrap(),
        SubjectPublicKeyInfoOwned::from_der(public_key_der.as_bytes()).unwrap(),
        &signing_key,
    )
    .unwrap();

    let mut rng = rand::thread_rng();
    builder.build_with_rng(&mut rng).unwrap()
}

/// Build an unsigned zip package with stored entries.
pub fn build_package(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Stored);

    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }

    writer.finish().unwrap().into_inner()
}

/// Append the whole-file signature envelope to a zip: the signature goes
/// into the archive comment, referenced by the 6-byte footer the verifier
/// looks for.
pub fn sign_package(data: &mut Vec<u8>, key: &RsaPrivateKey, cert: &Certificate) {
    // The signature covers everything up to the comment size field, which
    // currently holds a zero-length comment.
    let digest = Sha256::digest(&data[..data.len() - 2]);

    let cms_signature = cms_sign_external(key, cert, &digest);
    let cms_signature_der = cms_signature.to_der().unwrap();

    // Placeholder for the EOCD comment size field.
    let mut buf = vec![0u8; 2];

    // NULL-terminated readable message and actual signature.
    buf.extend(b"signed by otainstall\0");
    buf.extend(&cms_signature_der);

    let comment_size = buf.len() - 2 + 6;

    // Absolute value of the offset of the signature from the end of the
    // archive comment.
    buf.extend(((cms_signature_der.len() + 6) as u16).to_le_bytes());

    // Magic value.
    buf.extend(b"\xff\xff");

    // Archive comment size (for use by the signature verifier).
    buf.extend((comment_size as u16).to_le_bytes());

    // Archive comment size (for the EOCD comment size field).
    buf[..2].copy_from_slice(&(comment_size as u16).to_le_bytes());

    // Replace the original comment size field with the new comment.
    data.truncate(data.len() - 2);
    data.extend(&buf);
}

/// Create a CMS signature from an external digest, with no signed
/// attributes: the verifier expects the `SignedData` structure to be nothing
/// more than a raw signature transport mechanism.
fn cms_sign_external(key: &RsaPrivateKey, cert: &Certificate, digest: &[u8]) -> ContentInfo {
    let scheme = Pkcs1v15Sign::new::<Sha256>();
    let signature = key.sign(scheme, digest).unwrap();

    let digest_algorithm = AlgorithmIdentifierOwned {
        oid: const_oid::db::rfc5912::ID_SHA_256,
        parameters: None,
    };

    let signed_data = SignedData {
        version: CmsVersion::V1,
        digest_algorithms: DigestAlgorithmIdentifiers::try_from(vec![digest_algorithm.clone()])
            .unwrap(),
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: const_oid::db::rfc5911::ID_DATA,
            econtent: None,
        },
        certificates: Some(
            SetOfVec::try_from(vec![CertificateChoices::Certificate(cert.clone())])
                .unwrap()
                .into(),
        ),
        crls: None,
        signer_infos: SetOfVec::try_from(vec![SignerInfo {
            version: CmsVersion::V1,
            sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
                issuer: cert.tbs_certificate.issuer.clone(),
                serial_number: cert.tbs_certificate.serial_number.clone(),
            }),
            digest_alg: digest_algorithm,
            signed_attrs: None,
            signature_algorithm: AlgorithmIdentifierOwned {
                oid: const_oid::db::rfc5912::SHA_256_WITH_RSA_ENCRYPTION,
                parameters: None,
            },
            signature: SignatureValue::new(signature).unwrap(),
            unsigned_attrs: None,
        }])
        .unwrap()
        .into(),
    };

    ContentInfo {
        content_type: const_oid::db::rfc5911::ID_SIGNED_DATA,
        content: Any::encode_from(&signed_data).unwrap(),
    }
}
