// Copyright 2021 Damir Jelić
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The session crypto engine.

mod pending;

use std::{fs, io, path::PathBuf};

pub use pending::{EncryptedMessage, Pending, PlainMessage, SessionCommit};
use tracing::{debug, info, warn};

use crate::{
    CryptoFailure, CryptoSessionId, EngineConfig, FailureMapper, KeyIdLedger, NativeSession,
    NativeStore,
    cryptobox::{CryptoBox, CryptoBoxOptions, PickleKey, PreKeyId},
    failure::map_cryptobox_error,
    prekeys::{CryptoBoxPreKeyMapper, PreKey, PreKeyInitialization, PreKeyMapper},
};

/// The outcome of looking up a session.
///
/// A missing session is an expected state, not an error: the session still
/// needs to be initialized from a pre-key or from a received pre-key message.
#[derive(Debug)]
pub enum SessionLookup<T> {
    /// The session exists.
    Established(T),
    /// No session was saved under the id yet.
    NeedsInit,
}

/// Holds the store handle, opening it on first use.
struct StoreSlot<S: NativeStore> {
    path: PathBuf,
    owner_is_valid: bool,
    options: S::Options,
    store: Option<S>,
}

impl<S: NativeStore> StoreSlot<S> {
    fn get_or_open(
        &mut self,
        failure_mapper: &dyn FailureMapper<S::Error>,
    ) -> Result<&mut S, CryptoFailure> {
        let store = match self.store.take() {
            Some(store) => store,
            None => self.open(failure_mapper)?,
        };

        Ok(self.store.insert(store))
    }

    fn open(&self, failure_mapper: &dyn FailureMapper<S::Error>) -> Result<S, CryptoFailure> {
        let initialization_failure =
            |reason: String| CryptoFailure::Initialization { path: self.path.clone(), reason };

        if !self.owner_is_valid {
            return Err(initialization_failure("the owner isn't a valid directory name".to_owned()));
        }

        if self.path.exists() && !self.path.is_dir() {
            return Err(initialization_failure("the path exists but isn't a directory".to_owned()));
        }

        fs::create_dir_all(&self.path).map_err(|e| initialization_failure(e.to_string()))?;

        let store = S::open(&self.path, &self.options).map_err(|e| failure_mapper.map_failure(e))?;
        debug!(path = %self.path.display(), "Opened the crypto store");

        Ok(store)
    }

    fn close(&mut self) {
        if let Some(store) = self.store.take() {
            store.close();
            debug!(path = %self.path.display(), "Closed the crypto store");
        }
    }
}

fn lookup<S: NativeStore>(
    store: &mut S,
    failure_mapper: &dyn FailureMapper<S::Error>,
    session_id: &CryptoSessionId,
) -> Result<SessionLookup<S::Session>, CryptoFailure> {
    match store.session_load(&session_id.value()).map_err(|e| failure_mapper.map_failure(e))? {
        Some(session) => Ok(SessionLookup::Established(session)),
        None => Ok(SessionLookup::NeedsInit),
    }
}

/// Encrypts and decrypts messages for one local user, on top of a
/// [`NativeStore`].
///
/// The store is opened lazily by the first operation and stays open until
/// [`delete()`](Self::delete). Every operation takes `&mut self`: one engine
/// is the single writer of its store directory. Share it behind a mutex if
/// several tasks need it.
pub struct SessionCryptoEngine<S: NativeStore, L> {
    config: EngineConfig,
    slot: StoreSlot<S>,
    ledger: L,
    failure_mapper: Box<dyn FailureMapper<S::Error> + Send + Sync>,
    prekey_mapper: Box<dyn PreKeyMapper<S::PreKey> + Send + Sync>,
}

impl<L: KeyIdLedger> SessionCryptoEngine<CryptoBox, L> {
    /// An engine on top of a [`CryptoBox`] whose files are encrypted with the
    /// given pickle key.
    pub fn with_cryptobox(config: EngineConfig, pickle_key: PickleKey, ledger: L) -> Self {
        Self::new(
            config,
            CryptoBoxOptions::new(pickle_key),
            ledger,
            map_cryptobox_error,
            CryptoBoxPreKeyMapper,
        )
    }
}

impl<S: NativeStore, L: KeyIdLedger> SessionCryptoEngine<S, L> {
    /// Create an engine. Nothing touches the disk before the first
    /// operation.
    pub fn new(
        config: EngineConfig,
        options: S::Options,
        ledger: L,
        failure_mapper: impl FailureMapper<S::Error> + Send + Sync + 'static,
        prekey_mapper: impl PreKeyMapper<S::PreKey> + Send + Sync + 'static,
    ) -> Self {
        let slot = StoreSlot {
            path: config.store_path(),
            owner_is_valid: config.has_valid_owner(),
            options,
            store: None,
        };

        Self {
            config,
            slot,
            ledger,
            failure_mapper: Box::new(failure_mapper),
            prekey_mapper: Box::new(prekey_mapper),
        }
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The key-id ledger.
    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// The key-id ledger, mutably.
    pub fn ledger_mut(&mut self) -> &mut L {
        &mut self.ledger
    }

    /// Look up a session.
    ///
    /// The returned session is detached from the engine: advancing it can't be
    /// committed. Use [`encrypt()`](Self::encrypt) and
    /// [`decrypt()`](Self::decrypt) for that.
    pub fn session(
        &mut self,
        session_id: &CryptoSessionId,
    ) -> Result<SessionLookup<S::Session>, CryptoFailure> {
        let failure_mapper = self.failure_mapper.as_ref();
        let store = self.slot.get_or_open(failure_mapper)?;

        lookup(store, failure_mapper, session_id)
    }

    /// Does a session with the given id exist.
    pub fn session_exists(&mut self, session_id: &CryptoSessionId) -> Result<bool, CryptoFailure> {
        Ok(matches!(self.session(session_id)?, SessionLookup::Established(_)))
    }

    /// Generate the pre-keys of a new device: the last-resort pre-key and
    /// [`EngineConfig::prekey_batch_size`] ordinary pre-keys starting at id 0.
    ///
    /// The id of the last ordinary pre-key is written to the ledger before
    /// the keys are returned. If the ledger can't be written the generated keys
    /// stay in the store but are not returned.
    pub fn create_initial_prekeys(&mut self) -> Result<PreKeyInitialization, CryptoFailure> {
        let failure_mapper = self.failure_mapper.as_ref();
        let store = self.slot.get_or_open(failure_mapper)?;

        let last_key = store.new_last_prekey().map_err(|e| failure_mapper.map_failure(e))?;
        let created_keys = store
            .new_prekeys(0, self.config.prekey_batch_size)
            .map_err(|e| failure_mapper.map_failure(e))?;

        let last_key = self.prekey_mapper.from_native(last_key);
        let created_keys: Vec<PreKey> =
            created_keys.into_iter().map(|prekey| self.prekey_mapper.from_native(prekey)).collect();

        let Some(last_created_id) = created_keys.last().map(|prekey| prekey.id) else {
            return Err(CryptoFailure::Unknown("the store didn't generate any pre-keys".to_owned()));
        };

        self.ledger.update_last_prekey_id(&self.config.owner, last_created_id)?;
        info!(
            owner = %self.config.owner,
            count = created_keys.len(),
            last_created_id,
            "Created the initial pre-keys"
        );

        Ok(PreKeyInitialization { created_keys, last_key })
    }

    /// Generate `count` more ordinary pre-keys, continuing after the id in the
    /// ledger, and record the new last id.
    pub fn refill_prekeys(&mut self, count: u16) -> Result<Vec<PreKey>, CryptoFailure> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let start = match self.ledger.last_prekey_id(&self.config.owner)? {
            Some(last_id) => PreKeyId::nth_after(last_id, 1).value(),
            None => 0,
        };

        let failure_mapper = self.failure_mapper.as_ref();
        let store = self.slot.get_or_open(failure_mapper)?;

        let prekeys: Vec<PreKey> = store
            .new_prekeys(start, count)
            .map_err(|e| failure_mapper.map_failure(e))?
            .into_iter()
            .map(|prekey| self.prekey_mapper.from_native(prekey))
            .collect();

        if let Some(last) = prekeys.last() {
            self.ledger.update_last_prekey_id(&self.config.owner, last.id)?;
            debug!(owner = %self.config.owner, start, last_id = last.id, "Refilled pre-keys");
        }

        Ok(prekeys)
    }

    /// The last-resort pre-key.
    pub fn new_last_prekey(&mut self) -> Result<PreKey, CryptoFailure> {
        let failure_mapper = self.failure_mapper.as_ref();
        let store = self.slot.get_or_open(failure_mapper)?;

        let prekey = store.new_last_prekey().map_err(|e| failure_mapper.map_failure(e))?;

        Ok(self.prekey_mapper.from_native(prekey))
    }

    /// Encrypt a message. The session advance is persisted by
    /// [`Pending::commit()`].
    pub fn encrypt(
        &mut self,
        session_id: &CryptoSessionId,
        plaintext: &[u8],
    ) -> Result<Pending<'_, S, EncryptedMessage>, CryptoFailure> {
        let failure_mapper = self.failure_mapper.as_ref();
        let store = self.slot.get_or_open(failure_mapper)?;

        let SessionLookup::Established(mut session) = lookup(store, failure_mapper, session_id)?
        else {
            return Err(CryptoFailure::SessionNotFound(session_id.clone()));
        };

        let ciphertext = session.encrypt(plaintext).map_err(|e| failure_mapper.map_failure(e))?;

        Ok(Pending {
            output: EncryptedMessage::from(ciphertext),
            commit: SessionCommit {
                store,
                failure_mapper,
                session,
                session_id: session_id.clone(),
            },
        })
    }

    /// Decrypt a message. If no session exists yet, one is created from the
    /// message, which then has to be a pre-key message. The session advance
    /// (or the new session) is persisted by [`Pending::commit()`].
    pub fn decrypt(
        &mut self,
        session_id: &CryptoSessionId,
        ciphertext: &[u8],
    ) -> Result<Pending<'_, S, PlainMessage>, CryptoFailure> {
        let failure_mapper = self.failure_mapper.as_ref();
        let store = self.slot.get_or_open(failure_mapper)?;

        let (session, plaintext) = match lookup(store, failure_mapper, session_id)? {
            SessionLookup::Established(mut session) => {
                let plaintext =
                    session.decrypt(ciphertext).map_err(|e| failure_mapper.map_failure(e))?;
                (session, plaintext)
            }
            SessionLookup::NeedsInit => {
                debug!(%session_id, "No session found, initializing one from the message");
                store
                    .session_from_message(&session_id.value(), ciphertext)
                    .map_err(|e| failure_mapper.map_failure(e))?
            }
        };

        Ok(Pending {
            output: PlainMessage::from(plaintext),
            commit: SessionCommit {
                store,
                failure_mapper,
                session,
                session_id: session_id.clone(),
            },
        })
    }

    /// Encrypt a message and hand the result to `on_encrypted`. The session
    /// advance is persisted only if the callback returns `true`.
    ///
    /// Returns whether the session was committed. Failures to encrypt are
    /// reported to the callback; only a failed commit is returned as an error.
    pub fn encrypt_message<F>(
        &mut self,
        session_id: &CryptoSessionId,
        plaintext: &[u8],
        on_encrypted: F,
    ) -> Result<bool, CryptoFailure>
    where
        F: FnOnce(Result<EncryptedMessage, CryptoFailure>) -> bool,
    {
        match self.encrypt(session_id, plaintext) {
            Ok(pending) => commit_if(pending, on_encrypted),
            Err(failure) => {
                on_encrypted(Err(failure));
                Ok(false)
            }
        }
    }

    /// Decrypt a message and hand the result to `on_decrypted`. The session
    /// advance, or the session created from the message, is persisted only if
    /// the callback returns `true`.
    ///
    /// Returns whether the session was committed. Failures to decrypt are
    /// reported to the callback; only a failed commit is returned as an error.
    pub fn decrypt_message<F>(
        &mut self,
        session_id: &CryptoSessionId,
        ciphertext: &[u8],
        on_decrypted: F,
    ) -> Result<bool, CryptoFailure>
    where
        F: FnOnce(Result<PlainMessage, CryptoFailure>) -> bool,
    {
        match self.decrypt(session_id, ciphertext) {
            Ok(pending) => commit_if(pending, on_decrypted),
            Err(failure) => {
                on_decrypted(Err(failure));
                Ok(false)
            }
        }
    }

    /// Make sure a session exists, creating and persisting one from the given
    /// pre-key if it doesn't. Calling this for an existing session does
    /// nothing.
    pub fn assert_session(
        &mut self,
        session_id: &CryptoSessionId,
        prekey: &PreKey,
    ) -> Result<(), CryptoFailure> {
        let failure_mapper = self.failure_mapper.as_ref();
        let store = self.slot.get_or_open(failure_mapper)?;

        if let SessionLookup::NeedsInit = lookup(store, failure_mapper, session_id)? {
            let native_prekey = self.prekey_mapper.to_native(prekey);
            let mut session = store
                .session_from_prekey(&session_id.value(), &native_prekey)
                .map_err(|e| failure_mapper.map_failure(e))?;

            store.session_save(&mut session).map_err(|e| failure_mapper.map_failure(e))?;
            debug!(%session_id, prekey_id = prekey.id, "Created a session from a pre-key");
        }

        Ok(())
    }

    /// Remove a single session.
    pub fn delete_session(&mut self, session_id: &CryptoSessionId) -> Result<(), CryptoFailure> {
        let failure_mapper = self.failure_mapper.as_ref();
        let store = self.slot.get_or_open(failure_mapper)?;

        store.session_delete(&session_id.value()).map_err(|e| failure_mapper.map_failure(e))
    }

    /// The fingerprint of the local device.
    pub fn local_fingerprint(&mut self) -> Result<String, CryptoFailure> {
        let store = self.slot.get_or_open(self.failure_mapper.as_ref())?;
        Ok(store.local_fingerprint())
    }

    /// The fingerprint of the remote device of a session.
    pub fn remote_fingerprint(
        &mut self,
        session_id: &CryptoSessionId,
    ) -> Result<String, CryptoFailure> {
        match self.session(session_id)? {
            SessionLookup::Established(session) => Ok(session.remote_fingerprint()),
            SessionLookup::NeedsInit => Err(CryptoFailure::SessionNotFound(session_id.clone())),
        }
    }

    /// Close the store and remove its directory with every session and
    /// pre-key in it.
    ///
    /// An engine that never opened its store opens it first. The next
    /// operation after this starts over with a new, empty store.
    pub fn delete(&mut self) -> Result<(), CryptoFailure> {
        self.slot.get_or_open(self.failure_mapper.as_ref())?;
        self.slot.close();

        match fs::remove_dir_all(&self.slot.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }

        info!(owner = %self.config.owner, "Deleted the crypto store");

        Ok(())
    }
}

fn commit_if<S, T, F>(pending: Pending<'_, S, T>, confirm: F) -> Result<bool, CryptoFailure>
where
    S: NativeStore,
    F: FnOnce(Result<T, CryptoFailure>) -> bool,
{
    let (output, commit) = pending.into_parts();

    if confirm(Ok(output)) {
        commit.commit()?;
        Ok(true)
    } else {
        warn!(
            session_id = %commit.session_id(),
            "The message wasn't confirmed, not committing the session"
        );
        commit.discard();
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        fs, io,
        path::Path,
        sync::{Arc, Mutex},
    };

    use assert_matches2::{assert_let, assert_matches};
    use tempfile::TempDir;
    use thiserror::Error;

    use super::{SessionCryptoEngine, SessionLookup};
    use crate::{
        ClientId, CryptoFailure, CryptoSessionId, EngineConfig, KeyIdLedger, LedgerError,
        MemoryLedger, NativeSession, NativeStore, UserId,
        cryptobox::PreKeyId,
        prekeys::{PreKey, PreKeyMapper},
    };

    #[derive(Debug, Error)]
    enum SpyError {
        #[error("the message didn't authenticate")]
        Invalid,
        #[error("not a pre-key message")]
        NotAPreKeyMessage,
        #[error("pre-key generation failed")]
        Generation,
    }

    fn map_spy_error(error: SpyError) -> CryptoFailure {
        match error {
            SpyError::Invalid => CryptoFailure::InvalidMessage,
            e @ SpyError::NotAPreKeyMessage => CryptoFailure::Decode(e.to_string()),
            e @ SpyError::Generation => CryptoFailure::Unknown(e.to_string()),
        }
    }

    #[derive(Default)]
    struct SpyState {
        opens: usize,
        closes: usize,
        saved: HashMap<String, u32>,
        saves: usize,
        decrypts: usize,
        from_message: usize,
        from_prekey: usize,
        prekey_batches: Vec<(u16, u16)>,
        fail_generation: bool,
        fail_from_message: bool,
    }

    #[derive(Clone, Default)]
    struct SpyOptions(Arc<Mutex<SpyState>>);

    impl SpyOptions {
        fn state(&self) -> std::sync::MutexGuard<'_, SpyState> {
            self.0.lock().unwrap()
        }
    }

    struct SpyStore {
        state: Arc<Mutex<SpyState>>,
    }

    struct SpySession {
        id: String,
        counter: u32,
        state: Arc<Mutex<SpyState>>,
    }

    impl NativeSession for SpySession {
        type Error = SpyError;

        fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, Self::Error> {
            self.counter += 1;
            Ok(plaintext.to_vec())
        }

        fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, Self::Error> {
            self.state.lock().unwrap().decrypts += 1;

            if ciphertext == b"garbage" {
                return Err(SpyError::Invalid);
            }

            self.counter += 1;
            Ok(ciphertext.to_vec())
        }

        fn remote_fingerprint(&self) -> String {
            format!("remote-{}", self.id)
        }
    }

    impl NativeStore for SpyStore {
        type Options = SpyOptions;
        type Session = SpySession;
        type PreKey = u16;
        type Error = SpyError;

        fn open(path: &Path, options: &Self::Options) -> Result<Self, Self::Error> {
            assert!(path.is_dir());
            options.state().opens += 1;

            Ok(Self { state: options.0.clone() })
        }

        fn close(self) {
            self.state.lock().unwrap().closes += 1;
        }

        fn local_fingerprint(&self) -> String {
            "local".to_owned()
        }

        fn session_load(&mut self, session_id: &str) -> Result<Option<Self::Session>, Self::Error> {
            let counter = self.state.lock().unwrap().saved.get(session_id).copied();

            Ok(counter.map(|counter| SpySession {
                id: session_id.to_owned(),
                counter,
                state: self.state.clone(),
            }))
        }

        fn session_save(&mut self, session: &mut Self::Session) -> Result<(), Self::Error> {
            let mut state = self.state.lock().unwrap();
            state.saves += 1;
            state.saved.insert(session.id.clone(), session.counter);

            Ok(())
        }

        fn session_delete(&mut self, session_id: &str) -> Result<(), Self::Error> {
            self.state.lock().unwrap().saved.remove(session_id);
            Ok(())
        }

        fn session_from_prekey(
            &mut self,
            session_id: &str,
            prekey: &[u8],
        ) -> Result<Self::Session, Self::Error> {
            assert_eq!(prekey.len(), 2);
            self.state.lock().unwrap().from_prekey += 1;

            Ok(SpySession { id: session_id.to_owned(), counter: 0, state: self.state.clone() })
        }

        fn session_from_message(
            &mut self,
            session_id: &str,
            message: &[u8],
        ) -> Result<(Self::Session, Vec<u8>), Self::Error> {
            let mut state = self.state.lock().unwrap();
            state.from_message += 1;

            if state.fail_from_message {
                return Err(SpyError::NotAPreKeyMessage);
            }

            let session =
                SpySession { id: session_id.to_owned(), counter: 1, state: self.state.clone() };

            Ok((session, message.to_vec()))
        }

        fn new_prekeys(
            &mut self,
            start: u16,
            count: u16,
        ) -> Result<Vec<Self::PreKey>, Self::Error> {
            let mut state = self.state.lock().unwrap();

            if state.fail_generation {
                return Err(SpyError::Generation);
            }

            state.prekey_batches.push((start, count));

            Ok((0..count).map(|offset| PreKeyId::nth_after(start, offset).value()).collect())
        }

        fn new_last_prekey(&mut self) -> Result<Self::PreKey, Self::Error> {
            Ok(PreKeyId::LAST.value())
        }
    }

    struct SpyPreKeyMapper;

    impl PreKeyMapper<u16> for SpyPreKeyMapper {
        fn from_native(&self, native: u16) -> PreKey {
            PreKey { id: native, data: native.to_be_bytes().to_vec() }
        }

        fn to_native(&self, prekey: &PreKey) -> Vec<u8> {
            prekey.data.clone()
        }
    }

    struct FailingLedger;

    impl KeyIdLedger for FailingLedger {
        fn last_prekey_id(&self, _: &UserId) -> Result<Option<u16>, LedgerError> {
            Ok(None)
        }

        fn update_last_prekey_id(&mut self, _: &UserId, _: u16) -> Result<(), LedgerError> {
            Err(io::Error::other("disk full").into())
        }
    }

    #[derive(Default)]
    struct CountingLedger {
        inner: MemoryLedger,
        updates: usize,
    }

    impl KeyIdLedger for CountingLedger {
        fn last_prekey_id(&self, owner: &UserId) -> Result<Option<u16>, LedgerError> {
            self.inner.last_prekey_id(owner)
        }

        fn update_last_prekey_id(&mut self, owner: &UserId, id: u16) -> Result<(), LedgerError> {
            self.updates += 1;
            self.inner.update_last_prekey_id(owner, id)
        }
    }

    fn engine_with<L: KeyIdLedger>(
        dir: &TempDir,
        ledger: L,
    ) -> (SessionCryptoEngine<SpyStore, L>, SpyOptions) {
        let options = SpyOptions::default();
        let config = EngineConfig::new(dir.path(), UserId::new("alice"));
        let engine = SessionCryptoEngine::new(
            config,
            options.clone(),
            ledger,
            map_spy_error,
            SpyPreKeyMapper,
        );

        (engine, options)
    }

    fn engine(dir: &TempDir) -> (SessionCryptoEngine<SpyStore, MemoryLedger>, SpyOptions) {
        engine_with(dir, MemoryLedger::default())
    }

    fn bob() -> CryptoSessionId {
        CryptoSessionId::new(UserId::new("bob"), ClientId::new("phone"))
    }

    #[test]
    fn initial_prekeys() {
        let dir = TempDir::new().unwrap();
        let (mut engine, _) = engine(&dir);

        let prekeys = engine.create_initial_prekeys().unwrap();

        let ids: Vec<u16> = prekeys.created_keys.iter().map(|prekey| prekey.id).collect();
        assert_eq!(ids, (0..100).collect::<Vec<u16>>());
        assert_eq!(prekeys.last_key.id, u16::MAX);
        assert_eq!(engine.ledger().last_prekey_id(&UserId::new("alice")).unwrap(), Some(99));
    }

    #[test]
    fn prekey_batch_size_is_configurable() {
        let dir = TempDir::new().unwrap();
        let options = SpyOptions::default();
        let config = EngineConfig::new(dir.path(), UserId::new("alice")).with_prekey_batch_size(5);
        let mut engine: SessionCryptoEngine<SpyStore, _> = SessionCryptoEngine::new(
            config,
            options.clone(),
            MemoryLedger::default(),
            map_spy_error,
            SpyPreKeyMapper,
        );

        let prekeys = engine.create_initial_prekeys().unwrap();

        assert_eq!(prekeys.created_keys.len(), 5);
        assert_eq!(options.state().prekey_batches, vec![(0, 5)]);
    }

    #[test]
    fn the_ledger_is_updated_once_per_batch() {
        let dir = TempDir::new().unwrap();
        let (mut engine, _) = engine_with(&dir, CountingLedger::default());

        engine.create_initial_prekeys().unwrap();
        assert_eq!(engine.ledger().updates, 1);
        assert_eq!(engine.ledger().last_prekey_id(&UserId::new("alice")).unwrap(), Some(99));

        engine.refill_prekeys(10).unwrap();
        assert_eq!(engine.ledger().updates, 2);
    }

    #[test]
    fn failed_generation_leaves_the_ledger_untouched() {
        let dir = TempDir::new().unwrap();
        let (mut engine, options) = engine(&dir);
        options.state().fail_generation = true;

        assert_matches!(engine.create_initial_prekeys(), Err(CryptoFailure::Unknown(_)));
        assert_eq!(engine.ledger().last_prekey_id(&UserId::new("alice")).unwrap(), None);
    }

    #[test]
    fn failed_ledger_update_keeps_the_generated_keys() {
        let dir = TempDir::new().unwrap();
        let (mut engine, options) = engine_with(&dir, FailingLedger);

        assert_matches!(engine.create_initial_prekeys(), Err(CryptoFailure::Ledger(_)));
        assert_eq!(options.state().prekey_batches, vec![(0, 100)]);
    }

    #[test]
    fn refill_continues_after_the_ledger() {
        let dir = TempDir::new().unwrap();
        let (mut engine, options) = engine(&dir);

        engine.create_initial_prekeys().unwrap();
        let refill = engine.refill_prekeys(10).unwrap();

        assert_eq!(refill.first().map(|prekey| prekey.id), Some(100));
        assert_eq!(refill.last().map(|prekey| prekey.id), Some(109));
        assert_eq!(engine.ledger().last_prekey_id(&UserId::new("alice")).unwrap(), Some(109));
        assert_eq!(options.state().prekey_batches, vec![(0, 100), (100, 10)]);
    }

    #[test]
    fn refill_wraps_before_the_last_resort_id() {
        let dir = TempDir::new().unwrap();
        let (mut engine, _) = engine(&dir);
        engine.ledger_mut().update_last_prekey_id(&UserId::new("alice"), u16::MAX - 2).unwrap();

        let ids: Vec<u16> =
            engine.refill_prekeys(3).unwrap().into_iter().map(|prekey| prekey.id).collect();

        assert_eq!(ids, vec![u16::MAX - 1, 0, 1]);
    }

    #[test]
    fn store_is_opened_once_and_lazily() {
        let dir = TempDir::new().unwrap();
        let (mut engine, options) = engine(&dir);

        assert_eq!(options.state().opens, 0);
        assert!(!engine.config().store_path().exists());

        engine.local_fingerprint().unwrap();
        engine.session_exists(&bob()).unwrap();
        engine.new_last_prekey().unwrap();

        assert_eq!(options.state().opens, 1);
        assert!(engine.config().store_path().is_dir());
    }

    #[test]
    fn a_file_in_place_of_the_store_fails_initialization() {
        let dir = TempDir::new().unwrap();
        let (mut engine, options) = engine(&dir);

        let path = engine.config().store_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"not a directory").unwrap();

        assert_let!(
            Err(CryptoFailure::Initialization { path: reported, .. }) = engine.local_fingerprint()
        );
        assert_eq!(reported, path);
        assert_eq!(options.state().opens, 0);
    }

    #[test]
    fn owners_that_escape_the_store_folder_are_rejected() {
        let dir = TempDir::new().unwrap();
        let neighbour = dir.path().join("cryptobox").join("carol");
        let outside = dir.path().join("bob");
        fs::create_dir_all(&neighbour).unwrap();
        fs::create_dir_all(&outside).unwrap();

        for owner in ["", ".", "..", "../bob"] {
            let options = SpyOptions::default();
            let config = EngineConfig::new(dir.path(), UserId::new(owner));
            let mut engine: SessionCryptoEngine<SpyStore, _> = SessionCryptoEngine::new(
                config,
                options.clone(),
                MemoryLedger::default(),
                map_spy_error,
                SpyPreKeyMapper,
            );

            assert_matches!(engine.delete(), Err(CryptoFailure::Initialization { .. }));
            assert_matches!(engine.local_fingerprint(), Err(CryptoFailure::Initialization { .. }));
            assert_eq!(options.state().opens, 0);
        }

        assert!(neighbour.is_dir());
        assert!(outside.is_dir());
    }

    #[test]
    fn encrypting_without_a_session() {
        let dir = TempDir::new().unwrap();
        let (mut engine, _) = engine(&dir);

        let failure = engine.encrypt(&bob(), b"hi").err();
        assert!(failure.is_some_and(|failure| failure.is_session_not_found()));
        assert_matches!(engine.remote_fingerprint(&bob()), Err(CryptoFailure::SessionNotFound(_)));
    }

    #[test]
    fn assert_session_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (mut engine, options) = engine(&dir);
        let prekey = PreKey { id: 4, data: vec![0, 4] };

        assert!(matches!(engine.session(&bob()).unwrap(), SessionLookup::NeedsInit));

        engine.assert_session(&bob(), &prekey).unwrap();
        engine.assert_session(&bob(), &prekey).unwrap();

        assert_eq!(options.state().from_prekey, 1);
        assert_eq!(options.state().saves, 1);
        assert!(matches!(engine.session(&bob()).unwrap(), SessionLookup::Established(_)));
        assert_eq!(engine.remote_fingerprint(&bob()).unwrap(), "remote-bob_phone");
    }

    #[test]
    fn encryption_is_persisted_only_on_commit() {
        let dir = TempDir::new().unwrap();
        let (mut engine, options) = engine(&dir);
        engine.assert_session(&bob(), &PreKey { id: 1, data: vec![0, 1] }).unwrap();

        let message = engine.encrypt(&bob(), b"first").unwrap().discard();
        assert_eq!(message.as_bytes(), b"first");
        assert_eq!(options.state().saved["bob_phone"], 0);

        engine.encrypt(&bob(), b"second").unwrap().commit().unwrap();
        assert_eq!(options.state().saved["bob_phone"], 1);
    }

    #[test]
    fn encryption_callbacks_decide_about_the_commit() {
        let dir = TempDir::new().unwrap();
        let (mut engine, options) = engine(&dir);
        engine.assert_session(&bob(), &PreKey { id: 1, data: vec![0, 1] }).unwrap();
        let saves = options.state().saves;

        let committed = engine
            .encrypt_message(&bob(), b"first", |result| {
                assert_eq!(result.unwrap().as_bytes(), b"first");
                false
            })
            .unwrap();
        assert!(!committed);
        assert_eq!(options.state().saves, saves);
        assert_eq!(options.state().saved["bob_phone"], 0);

        let committed = engine.encrypt_message(&bob(), b"second", |result| result.is_ok()).unwrap();
        assert!(committed);
        assert_eq!(options.state().saves, saves + 1);
        assert_eq!(options.state().saved["bob_phone"], 1);

        let mut reported = None;
        let unknown = CryptoSessionId::new(UserId::new("carol"), ClientId::new("laptop"));
        let committed = engine
            .encrypt_message(&unknown, b"hi", |result| {
                reported = result.err();
                true
            })
            .unwrap();
        assert!(!committed);
        assert_eq!(options.state().saves, saves + 1);
        assert!(reported.is_some_and(|failure| failure.is_session_not_found()));
    }

    #[test]
    fn callbacks_decide_about_the_commit() {
        let dir = TempDir::new().unwrap();
        let (mut engine, options) = engine(&dir);
        engine.assert_session(&bob(), &PreKey { id: 1, data: vec![0, 1] }).unwrap();

        let committed = engine
            .decrypt_message(&bob(), b"hello", |result| {
                assert_eq!(result.unwrap().as_bytes(), b"hello");
                false
            })
            .unwrap();
        assert!(!committed);
        assert_eq!(options.state().saved["bob_phone"], 0);

        let committed = engine.decrypt_message(&bob(), b"hello", |result| result.is_ok()).unwrap();
        assert!(committed);
        assert_eq!(options.state().saved["bob_phone"], 1);

        let mut reported = None;
        let committed = engine
            .decrypt_message(&bob(), b"garbage", |result| {
                reported = result.err();
                true
            })
            .unwrap();
        assert!(!committed);
        assert_matches!(reported, Some(CryptoFailure::InvalidMessage));
    }

    #[test]
    fn missing_session_falls_back_to_the_message_once() {
        let dir = TempDir::new().unwrap();
        let (mut engine, options) = engine(&dir);

        let plaintext = engine.decrypt(&bob(), b"prekey message").unwrap().commit().unwrap();

        assert_eq!(plaintext.as_bytes(), b"prekey message");
        assert_eq!(options.state().from_message, 1);
        assert_eq!(options.state().decrypts, 0);
        assert_eq!(options.state().saved["bob_phone"], 1);

        engine.decrypt(&bob(), b"normal message").unwrap().commit().unwrap();

        assert_eq!(options.state().from_message, 1);
        assert_eq!(options.state().decrypts, 1);
    }

    #[test]
    fn failed_fallback_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let (mut engine, options) = engine(&dir);
        options.state().fail_from_message = true;

        assert_matches!(
            engine.decrypt(&bob(), b"normal message").err(),
            Some(CryptoFailure::Decode(_))
        );
        assert_eq!(options.state().from_message, 1);
        assert_eq!(options.state().decrypts, 0);
        assert!(options.state().saved.is_empty());
    }

    #[test]
    fn sessions_can_be_deleted() {
        let dir = TempDir::new().unwrap();
        let (mut engine, _) = engine(&dir);
        engine.assert_session(&bob(), &PreKey { id: 1, data: vec![0, 1] }).unwrap();

        engine.delete_session(&bob()).unwrap();

        assert!(!engine.session_exists(&bob()).unwrap());
    }

    #[test]
    fn delete_removes_the_store_and_reopens_lazily() {
        let dir = TempDir::new().unwrap();
        let (mut engine, options) = engine(&dir);
        let path = engine.config().store_path();

        engine.delete().unwrap();
        assert!(!path.exists());
        assert_eq!(options.state().opens, 1);
        assert_eq!(options.state().closes, 1);

        engine.local_fingerprint().unwrap();
        assert!(path.is_dir());
        assert_eq!(options.state().opens, 2);
    }
}
