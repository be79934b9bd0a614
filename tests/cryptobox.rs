use std::fs;

use anyhow::Result;
use assert_matches2::assert_matches;
use cryptobox_client::{
    ClientId, CryptoBox, CryptoFailure, CryptoSessionId, EngineConfig, JsonFileLedger, KeyIdLedger,
    PickleKey, PreKey, SessionCryptoEngine, UserId,
};
use tempfile::TempDir;

type Engine = SessionCryptoEngine<CryptoBox, JsonFileLedger>;

struct Device {
    engine: Engine,
    // Keeps the store directory alive.
    _dir: TempDir,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn device(owner: &str) -> Result<Device> {
    init_tracing();

    let dir = TempDir::new()?;
    let config = EngineConfig::new(dir.path(), UserId::new(owner)).with_prekey_batch_size(10);
    let ledger = JsonFileLedger::new(dir.path().join("ledger.json"));
    let engine =
        SessionCryptoEngine::with_cryptobox(config, PickleKey::from_bytes([7; 32]), ledger);

    Ok(Device { engine, _dir: dir })
}

fn session_id(user: &str) -> CryptoSessionId {
    CryptoSessionId::new(UserId::new(user), ClientId::new("device"))
}

fn first_message(sender: &str, prekey: &PreKey) -> Result<Vec<u8>> {
    let mut device = device(sender)?;
    device.engine.assert_session(&session_id("bob"), prekey)?;

    Ok(device.engine.encrypt(&session_id("bob"), b"Hello")?.commit()?.into_bytes())
}

fn session_file(engine: &Engine, session_id: &CryptoSessionId) -> std::path::PathBuf {
    engine.config().store_path().join("sessions").join(session_id.value())
}

#[test]
fn conversation() -> Result<()> {
    let mut alice = device("alice")?;
    let mut bob = device("bob")?;

    let prekeys = bob.engine.create_initial_prekeys()?;
    assert_eq!(prekeys.created_keys.len(), 10);
    assert_eq!(bob.engine.ledger().last_prekey_id(&UserId::new("bob"))?, Some(9));

    alice.engine.assert_session(&session_id("bob"), &prekeys.created_keys[0])?;
    let first = alice.engine.encrypt(&session_id("bob"), b"Hi Bob")?.commit()?;

    let plaintext = bob.engine.decrypt(&session_id("alice"), first.as_bytes())?.commit()?;
    assert_eq!(plaintext.as_bytes(), b"Hi Bob");

    let reply = bob.engine.encrypt(&session_id("alice"), b"Hi Alice")?.commit()?;
    let plaintext = alice.engine.decrypt(&session_id("bob"), reply.as_bytes())?.commit()?;
    assert_eq!(plaintext.as_bytes(), b"Hi Alice");

    for i in 0..5 {
        let text = format!("Message {i}");
        let message = alice.engine.encrypt(&session_id("bob"), text.as_bytes())?.commit()?;
        let plaintext = bob.engine.decrypt(&session_id("alice"), message.as_bytes())?.commit()?;
        assert_eq!(plaintext.as_bytes(), text.as_bytes());
    }

    Ok(())
}

#[test]
fn callbacks_drive_the_commit() -> Result<()> {
    let mut alice = device("alice")?;
    let mut bob = device("bob")?;

    let prekeys = bob.engine.create_initial_prekeys()?;
    alice.engine.assert_session(&session_id("bob"), &prekeys.last_key)?;

    let mut ciphertext = None;
    let committed = alice.engine.encrypt_message(&session_id("bob"), b"Hello", |result| {
        ciphertext = result.ok();
        ciphertext.is_some()
    })?;
    assert!(committed);

    let ciphertext = ciphertext.expect("the message should have been encrypted");
    let committed =
        bob.engine.decrypt_message(&session_id("alice"), ciphertext.as_bytes(), |result| {
            result.is_ok_and(|plaintext| plaintext.as_bytes() == b"Hello")
        })?;
    assert!(committed);
    assert!(bob.engine.session_exists(&session_id("alice"))?);

    Ok(())
}

#[test]
fn uncommitted_decryption_can_be_retried() -> Result<()> {
    let mut alice = device("alice")?;
    let mut bob = device("bob")?;

    let prekeys = bob.engine.create_initial_prekeys()?;
    alice.engine.assert_session(&session_id("bob"), &prekeys.created_keys[3])?;
    let message = alice.engine.encrypt(&session_id("bob"), b"Are you there?")?.commit()?;

    let plaintext = bob.engine.decrypt(&session_id("alice"), message.as_bytes())?.discard();
    assert_eq!(plaintext.as_bytes(), b"Are you there?");
    assert!(!bob.engine.session_exists(&session_id("alice"))?);

    let plaintext = bob.engine.decrypt(&session_id("alice"), message.as_bytes())?.commit()?;
    assert_eq!(plaintext.as_bytes(), b"Are you there?");

    assert_matches!(
        bob.engine.decrypt(&session_id("alice"), message.as_bytes()).err(),
        Some(CryptoFailure::DuplicateMessage)
    );

    Ok(())
}

#[test]
fn discarded_encryption_leaves_the_session_untouched() -> Result<()> {
    let mut alice = device("alice")?;
    let mut bob = device("bob")?;

    let prekeys = bob.engine.create_initial_prekeys()?;
    alice.engine.assert_session(&session_id("bob"), &prekeys.created_keys[0])?;

    let path = session_file(&alice.engine, &session_id("bob"));
    let before = fs::read(&path)?;

    let committed = alice.engine.encrypt_message(&session_id("bob"), b"Never sent", |_| false)?;
    assert!(!committed);

    assert_eq!(fs::read(&path)?, before);

    Ok(())
}

#[test]
fn prekeys_are_used_once_except_the_last_resort() -> Result<()> {
    let mut bob = device("bob")?;
    let prekeys = bob.engine.create_initial_prekeys()?;

    let from_alice = first_message("alice", &prekeys.created_keys[0])?;
    let from_carol = first_message("carol", &prekeys.created_keys[0])?;
    bob.engine.decrypt(&session_id("alice"), &from_alice)?.commit()?;

    assert_matches!(
        bob.engine.decrypt(&session_id("carol"), &from_carol).err(),
        Some(CryptoFailure::PreKeyNotFound(0))
    );

    for sender in ["dave", "erin"] {
        let message = first_message(sender, &prekeys.last_key)?;
        let plaintext = bob.engine.decrypt(&session_id(sender), &message)?.commit()?;
        assert_eq!(plaintext.as_bytes(), b"Hello");
    }

    assert_eq!(bob.engine.new_last_prekey()?, prekeys.last_key);

    Ok(())
}

#[test]
fn fingerprints_match_across_devices() -> Result<()> {
    let mut alice = device("alice")?;
    let mut bob = device("bob")?;

    let prekeys = bob.engine.create_initial_prekeys()?;
    alice.engine.assert_session(&session_id("bob"), &prekeys.created_keys[0])?;
    let message = alice.engine.encrypt(&session_id("bob"), b"Hi")?.commit()?;
    bob.engine.decrypt(&session_id("alice"), message.as_bytes())?.commit()?;

    assert_eq!(
        alice.engine.remote_fingerprint(&session_id("bob"))?,
        bob.engine.local_fingerprint()?
    );
    assert_eq!(
        bob.engine.remote_fingerprint(&session_id("alice"))?,
        alice.engine.local_fingerprint()?
    );

    Ok(())
}

#[test]
fn deleting_the_store_creates_a_new_identity() -> Result<()> {
    let mut alice = device("alice")?;
    let mut bob = device("bob")?;

    let prekeys = bob.engine.create_initial_prekeys()?;
    alice.engine.assert_session(&session_id("bob"), &prekeys.created_keys[0])?;
    let fingerprint = alice.engine.local_fingerprint()?;

    alice.engine.delete()?;
    assert!(!alice.engine.config().store_path().exists());

    assert_ne!(alice.engine.local_fingerprint()?, fingerprint);
    assert!(!alice.engine.session_exists(&session_id("bob"))?);

    Ok(())
}

#[test]
fn tampered_prekeys_are_rejected() -> Result<()> {
    let mut alice = device("alice")?;
    let mut bob = device("bob")?;

    let mut prekey = bob.engine.create_initial_prekeys()?.created_keys.remove(0);
    let last = prekey.data.len() - 1;
    prekey.data[last] ^= 0xff;

    assert_matches!(
        alice.engine.assert_session(&session_id("bob"), &prekey),
        Err(CryptoFailure::InvalidPreKey(_) | CryptoFailure::Decode(_))
    );
    assert!(!alice.engine.session_exists(&session_id("bob"))?);

    Ok(())
}
