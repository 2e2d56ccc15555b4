use std::fs;
use std::io;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::diagnostics::{Diagnostic, DiagnosticKind, StageResult};
use crate::error::{Error, Result};
use crate::exec::BuildCtx;

pub const MANIFEST_ENTRY: &str = "META-INF/MANIFEST.MF";
pub const SIGNATURE_V1_ENTRY: &str = "META-INF/SIGNATURE.SF";
pub const SIGNATURE_V2_ENTRY: &str = "META-INF/SIGNATURE.V2";
pub const CERT_CHAIN_ENTRY: &str = "META-INF/CERT.CHAIN";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeystoreFile {
    alias: String,
    /// base64-encoded 32-byte ed25519 seed.
    key: String,
    #[serde(default)]
    cert_chain: Vec<String>,
}

/// Signing identity: key plus certificate chain, loaded from a JSON
/// keystore produced by project tooling.
#[derive(Debug)]
pub struct SigningIdentity {
    pub alias: String,
    key: SigningKey,
    cert_chain: Vec<Vec<u8>>,
}

impl SigningIdentity {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .map_err(|e| Error::msg(format!("failed to read keystore {}: {e}", path.display())))?;
        let ks: KeystoreFile = serde_json::from_str(&data)
            .map_err(|e| Error::msg(format!("invalid keystore {}: {e}", path.display())))?;

        let seed = BASE64
            .decode(ks.key.trim())
            .map_err(|e| Error::msg(format!("keystore key is not valid base64: {e}")))?;
        let seed: [u8; 32] = seed
            .try_into()
            .map_err(|_| Error::msg("keystore key must decode to exactly 32 bytes"))?;
        let mut cert_chain = Vec::with_capacity(ks.cert_chain.len());
        for (i, cert) in ks.cert_chain.iter().enumerate() {
            let der = BASE64
                .decode(cert.trim())
                .map_err(|e| Error::msg(format!("certificate {i} is not valid base64: {e}")))?;
            cert_chain.push(der);
        }
        if cert_chain.is_empty() {
            return Err(Error::msg("keystore carries no certificate chain"));
        }

        Ok(Self {
            alias: ks.alias,
            key: SigningKey::from_bytes(&seed),
            cert_chain,
        })
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }
}

/// Signs the unsigned archive into the final output path with both
/// signature scheme versions.
///
/// Fallback policy, deliberate and load-bearing: signing failure of any
/// kind (no keystore configured, unreadable or invalid keystore, signer
/// error) does NOT fail the build. The unsigned archive is copied through
/// unchanged and a single warning notes the artifact is unsigned. An
/// unsigned package still installs on permissive targets; losing a whole
/// build over a missing key is the worse failure mode.
pub fn sign(
    unsigned: &Path,
    output: &Path,
    keystore: Option<&Path>,
    ctx: &BuildCtx,
) -> Result<StageResult> {
    let identity = match keystore {
        None => {
            return fallback_copy(unsigned, output, "no signing identity configured");
        }
        Some(path) => match SigningIdentity::load(path) {
            Ok(id) => id,
            Err(e) => {
                return fallback_copy(unsigned, output, &format!("signing identity unusable: {e}"));
            }
        },
    };

    ctx.log(&format!("signing as '{}'", identity.alias));
    match write_signed(unsigned, output, &identity) {
        Ok(()) => Ok(StageResult::ok_with_artifact(output.to_path_buf())),
        Err(e) => {
            let _ = fs::remove_file(output);
            fallback_copy(unsigned, output, &format!("signer failed: {e}"))
        }
    }
}

fn fallback_copy(unsigned: &Path, output: &Path, reason: &str) -> Result<StageResult> {
    tracing::warn!(reason, "falling back to unsigned artifact");
    fs::copy(unsigned, output).map_err(|e| {
        Error::msg(format!(
            "failed to copy unsigned archive to {}: {e}",
            output.display()
        ))
    })?;
    Ok(
        StageResult::ok_with_artifact(output.to_path_buf()).with_warning(Diagnostic::warning(
            DiagnosticKind::Signing,
            format!("package is NOT signed ({reason}); installers may reject it"),
        )),
    )
}

fn write_signed(unsigned: &Path, output: &Path, identity: &SigningIdentity) -> Result<()> {
    // Scheme v1 material: per-entry digests collected into a manifest.
    let entries = digest_entries(unsigned)?;
    let archive_digest = digest_file(unsigned)?;

    let mut manifest = String::new();
    manifest.push_str("Manifest-Version: 1.0\n");
    manifest.push_str("Created-By: apkforge\n");
    manifest.push_str(&format!("Signer: {}\n", identity.alias));
    manifest.push_str(&format!("Created-At: {}\n", chrono::Utc::now().to_rfc3339()));
    manifest.push_str(&format!("SHA-256-Archive: {}\n\n", hex::encode(archive_digest)));
    for (name, digest) in &entries {
        manifest.push_str(&format!("Name: {name}\n"));
        manifest.push_str(&format!("SHA-256-Digest: {}\n\n", BASE64.encode(digest)));
    }

    let v1_sig = identity.key.sign(manifest.as_bytes());
    // Scheme v2 signs the whole unsigned container, not its entries.
    let v2_sig = identity.key.sign(&archive_digest);

    let reader = fs::File::open(unsigned)
        .map_err(|e| Error::msg(format!("failed to open {}: {e}", unsigned.display())))?;
    let mut archive = ZipArchive::new(reader)?;
    let out = fs::File::create(output)
        .map_err(|e| Error::msg(format!("failed to create {}: {e}", output.display())))?;
    let mut writer = ZipWriter::new(out);
    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i)?;
        writer.raw_copy_file(entry)?;
    }

    let options = SimpleFileOptions::default();
    write_entry(&mut writer, MANIFEST_ENTRY, manifest.as_bytes(), options)?;
    write_entry(
        &mut writer,
        SIGNATURE_V1_ENTRY,
        BASE64.encode(v1_sig.to_bytes()).as_bytes(),
        options,
    )?;
    write_entry(
        &mut writer,
        SIGNATURE_V2_ENTRY,
        BASE64.encode(v2_sig.to_bytes()).as_bytes(),
        options,
    )?;
    let mut chain = String::new();
    for cert in &identity.cert_chain {
        chain.push_str(&BASE64.encode(cert));
        chain.push('\n');
    }
    write_entry(&mut writer, CERT_CHAIN_ENTRY, chain.as_bytes(), options)?;

    writer.finish()?;
    Ok(())
}

fn write_entry(
    writer: &mut ZipWriter<fs::File>,
    name: &str,
    data: &[u8],
    options: SimpleFileOptions,
) -> Result<()> {
    writer.start_file(name, options)?;
    io::Write::write_all(writer, data).map_err(|e| Error::msg(format!("write {name}: {e}")))?;
    Ok(())
}

fn digest_entries(archive_path: &Path) -> Result<Vec<(String, [u8; 32])>> {
    let reader = fs::File::open(archive_path)
        .map_err(|e| Error::msg(format!("failed to open {}: {e}", archive_path.display())))?;
    let mut archive = ZipArchive::new(reader)?;
    let mut out = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let mut hasher = Sha256::new();
        io::copy(&mut entry, &mut hasher)
            .map_err(|e| Error::msg(format!("failed to digest entry {name}: {e}")))?;
        out.push((name, hasher.finalize().into()));
    }
    Ok(out)
}

fn digest_file(path: &Path) -> Result<[u8; 32]> {
    let mut f = fs::File::open(path)
        .map_err(|e| Error::msg(format!("failed to open {}: {e}", path.display())))?;
    let mut hasher = Sha256::new();
    io::copy(&mut f, &mut hasher)
        .map_err(|e| Error::msg(format!("failed to digest {}: {e}", path.display())))?;
    Ok(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_keystore_with_short_key() {
        let tmp = tempfile::tempdir().unwrap();
        let ks = tmp.path().join("ks.json");
        fs::write(
            &ks,
            format!(
                r#"{{"alias": "debug", "key": "{}", "certChain": ["{}"]}}"#,
                BASE64.encode([7u8; 16]),
                BASE64.encode(b"cert")
            ),
        )
        .unwrap();
        let err = SigningIdentity::load(&ks).unwrap_err().to_string();
        assert!(err.contains("32 bytes"), "unexpected err: {err}");
    }

    #[test]
    fn rejects_keystore_without_certs() {
        let tmp = tempfile::tempdir().unwrap();
        let ks = tmp.path().join("ks.json");
        fs::write(
            &ks,
            format!(r#"{{"alias": "debug", "key": "{}"}}"#, BASE64.encode([7u8; 32])),
        )
        .unwrap();
        let err = SigningIdentity::load(&ks).unwrap_err().to_string();
        assert!(err.contains("certificate"), "unexpected err: {err}");
    }

    #[test]
    fn loads_wellformed_keystore() {
        let tmp = tempfile::tempdir().unwrap();
        let ks = tmp.path().join("ks.json");
        fs::write(
            &ks,
            format!(
                r#"{{"alias": "debug", "key": "{}", "certChain": ["{}"]}}"#,
                BASE64.encode([7u8; 32]),
                BASE64.encode(b"cert-der")
            ),
        )
        .unwrap();
        let id = SigningIdentity::load(&ks).expect("load");
        assert_eq!(id.alias, "debug");
    }
}
