mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signature, Verifier};

use apkforge::diagnostics::{DiagnosticKind, Severity};
use apkforge::exec::{BuildCtx, StdoutSink};
use apkforge::stages::sign::{
    self, SigningIdentity, CERT_CHAIN_ENTRY, MANIFEST_ENTRY, SIGNATURE_V1_ENTRY,
    SIGNATURE_V2_ENTRY,
};

use common::*;

fn ctx() -> BuildCtx {
    BuildCtx::new(Arc::new(StdoutSink))
}

fn write_keystore(dir: &Path) -> PathBuf {
    let path = dir.join("debug.keystore.json");
    fs::write(
        &path,
        format!(
            r#"{{"alias": "debug", "key": "{}", "certChain": ["{}"]}}"#,
            BASE64.encode([42u8; 32]),
            BASE64.encode(b"cert-der")
        ),
    )
    .unwrap();
    path
}

fn unsigned_fixture(dir: &Path) -> PathBuf {
    let path = dir.join("app-unsigned.apk");
    write_zip(
        &path,
        &[("classes.dex", b"dex"), ("resources.arsc", b"tbl")],
    );
    path
}

#[test]
fn signed_archive_carries_manifest_and_both_signatures() {
    let tmp = tempfile::tempdir().unwrap();
    let unsigned = unsigned_fixture(tmp.path());
    let keystore = write_keystore(tmp.path());
    let output = tmp.path().join("app-debug.apk");

    let res = sign::sign(&unsigned, &output, Some(&keystore), &ctx()).unwrap();
    assert!(res.success);
    assert!(res.diagnostics.is_empty(), "a real signing run warns nothing");

    let names = zip_entry_names(&output);
    for entry in [
        MANIFEST_ENTRY,
        SIGNATURE_V1_ENTRY,
        SIGNATURE_V2_ENTRY,
        CERT_CHAIN_ENTRY,
    ] {
        assert!(names.contains(entry), "missing {entry}");
    }
    // Original entries are carried over untouched.
    assert!(names.contains("classes.dex"));
    assert_eq!(zip_entry_bytes(&output, "resources.arsc"), b"tbl");

    let manifest = zip_entry_bytes(&output, MANIFEST_ENTRY);
    let text = String::from_utf8(manifest.clone()).unwrap();
    assert!(text.contains("Signer: debug"));
    assert!(text.contains("Name: classes.dex"));

    // The v1 signature must verify against the manifest bytes.
    let identity = SigningIdentity::load(&keystore).unwrap();
    let sig_b64 = zip_entry_bytes(&output, SIGNATURE_V1_ENTRY);
    let sig_bytes = BASE64.decode(sig_b64).unwrap();
    let sig = Signature::from_slice(&sig_bytes).unwrap();
    identity
        .verifying_key()
        .verify(&manifest, &sig)
        .expect("v1 signature must verify");
}

#[test]
fn unusable_keystore_falls_back_to_verbatim_copy() {
    let tmp = tempfile::tempdir().unwrap();
    let unsigned = unsigned_fixture(tmp.path());
    let keystore = tmp.path().join("broken.json");
    fs::write(&keystore, "{not json").unwrap();
    let output = tmp.path().join("app-debug.apk");

    let res = sign::sign(&unsigned, &output, Some(&keystore), &ctx()).unwrap();
    assert!(res.success, "signing trouble never fails the build");
    assert_eq!(res.diagnostics.len(), 1);
    assert_eq!(res.diagnostics[0].kind, DiagnosticKind::Signing);
    assert_eq!(res.diagnostics[0].severity, Severity::Warning);

    // Byte-identical copy of the unsigned archive.
    assert_eq!(fs::read(&output).unwrap(), fs::read(&unsigned).unwrap());
}

#[test]
fn absent_keystore_falls_back_with_one_warning() {
    let tmp = tempfile::tempdir().unwrap();
    let unsigned = unsigned_fixture(tmp.path());
    let output = tmp.path().join("app-debug.apk");

    let res = sign::sign(&unsigned, &output, None, &ctx()).unwrap();
    assert!(res.success);
    assert_eq!(res.diagnostics.len(), 1);
    assert_eq!(res.diagnostics[0].severity, Severity::Warning);
    assert_eq!(fs::read(&output).unwrap(), fs::read(&unsigned).unwrap());
    assert!(!zip_entry_names(&output).contains(MANIFEST_ENTRY));
}
