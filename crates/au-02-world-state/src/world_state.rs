//! # World State Implementation
//!
//! One root trie plus one sub-trie per entity kind, fronted by a typed
//! in-memory overlay. Reads fall through the overlay into the tries; writes
//! only touch the overlay until `calculate_root_hash` flushes them.
//!
//! Sub-trie roots are stored inside the root trie under fixed keys, so the
//! root-trie root authenticates the whole forest and is the block's
//! `state_root_hash`.

use crate::errors::StateError;
use crate::journal::{SnapshotToken, UndoRecord};
use au_01_state_trie::{NodeStorage, Trie, EMPTY_TRIE_NODE_HASH};
use shared_types::codec::StateValue;
use shared_types::storage::{ColumnStore, WriteBatch};
use shared_types::{
    balance_key, Address, AddressAliasState, AuthorityState, BalanceChange, BalanceState,
    BipChange, BipState, Hash, NetworkParamsState, NonceChange, NonceState, StateDiff,
    TokenChange, TokenState, Wei,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Root-trie keys of the sub-trie roots.
const BALANCE_ROOT_KEY: &[u8] = b"balance";
const NONCE_ROOT_KEY: &[u8] = b"nonce";
const AUTHORITY_ROOT_KEY: &[u8] = b"authority";
const ALIAS_ROOT_KEY: &[u8] = b"address_alias";
const BIP_ROOT_KEY: &[u8] = b"bipstate";
const PARAMS_ROOT_KEY: &[u8] = b"network_params";
const TOKEN_ROOT_KEY: &[u8] = b"token";

/// Singleton key inside the params sub-trie.
const PARAMS_SINGLETON_KEY: &[u8] = b"params";

/// Execution mode of a world-state instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateMode {
    /// Fail-fast block validation with pre-block value capture for diffs.
    Validation,
    /// Template assembly with a per-transaction undo journal.
    Mining,
}

/// Pre-block values captured in validation mode, keyed like the overlay.
#[derive(Default)]
struct InitialValues {
    balances: HashMap<(Address, Address), Wei>,
    nonces: HashMap<Address, i64>,
    tokens: HashMap<Address, Option<TokenState>>,
    authorities: HashMap<Address, bool>,
    aliases: HashMap<String, bool>,
}

/// World state of one block under evaluation.
pub struct WorldState {
    mode: StateMode,
    storage: NodeStorage,

    root_trie: Trie,
    balance_trie: Trie,
    nonce_trie: Trie,
    authority_trie: Trie,
    alias_trie: Trie,
    token_trie: Trie,
    bip_trie: Trie,
    params_trie: Trie,

    balances: HashMap<(Address, Address), BalanceState>,
    nonces: HashMap<Address, NonceState>,
    authorities: HashMap<Address, AuthorityState>,
    removed_authorities: HashSet<Address>,
    aliases: HashMap<String, AddressAliasState>,
    removed_aliases: HashSet<String>,
    tokens: HashMap<Address, TokenState>,
    tokens_touched: HashSet<Address>,
    bips: HashMap<Hash, BipState>,
    params: Option<NetworkParamsState>,
    params_changed: bool,

    journal: Vec<UndoRecord>,
    initial: InitialValues,

    block_height: u64,
    block_timestamp_ms: u64,
}

impl WorldState {
    /// Open the state as of `parent_state_root` (or empty for genesis).
    pub fn open(
        store: Arc<dyn ColumnStore>,
        parent_state_root: Option<Hash>,
        mode: StateMode,
    ) -> Result<Self, StateError> {
        let storage = NodeStorage::new(store);
        let mut root_trie = match parent_state_root {
            Some(root) => Trie::new(root),
            None => Trie::empty(),
        };

        let balance_trie = Trie::new(sub_root(&mut root_trie, &storage, BALANCE_ROOT_KEY)?);
        let nonce_trie = Trie::new(sub_root(&mut root_trie, &storage, NONCE_ROOT_KEY)?);
        let authority_trie = Trie::new(sub_root(&mut root_trie, &storage, AUTHORITY_ROOT_KEY)?);
        let alias_trie = Trie::new(sub_root(&mut root_trie, &storage, ALIAS_ROOT_KEY)?);
        let token_trie = Trie::new(sub_root(&mut root_trie, &storage, TOKEN_ROOT_KEY)?);
        let bip_trie = Trie::new(sub_root(&mut root_trie, &storage, BIP_ROOT_KEY)?);
        let params_trie = Trie::new(sub_root(&mut root_trie, &storage, PARAMS_ROOT_KEY)?);

        Ok(Self {
            mode,
            storage,
            root_trie,
            balance_trie,
            nonce_trie,
            authority_trie,
            alias_trie,
            token_trie,
            bip_trie,
            params_trie,
            balances: HashMap::new(),
            nonces: HashMap::new(),
            authorities: HashMap::new(),
            removed_authorities: HashSet::new(),
            aliases: HashMap::new(),
            removed_aliases: HashSet::new(),
            tokens: HashMap::new(),
            tokens_touched: HashSet::new(),
            bips: HashMap::new(),
            params: None,
            params_changed: false,
            journal: Vec::new(),
            initial: InitialValues::default(),
            block_height: 0,
            block_timestamp_ms: 0,
        })
    }

    pub fn mode(&self) -> StateMode {
        self.mode
    }

    /// Set the block the following mutations belong to; stamps every
    /// written entity.
    pub fn set_block_context(&mut self, height: u64, timestamp_ms: u64) {
        self.block_height = height;
        self.block_timestamp_ms = timestamp_ms;
    }

    // =========================================================================
    // BALANCES
    // =========================================================================

    pub fn get_balance(&mut self, address: &Address, token: &Address) -> Result<Wei, StateError> {
        if let Some(state) = self.balances.get(&(*address, *token)) {
            return Ok(state.balance);
        }
        Ok(self
            .read_balance_trie(address, token)?
            .map(|s| s.balance)
            .unwrap_or_default())
    }

    pub fn set_balance(
        &mut self,
        address: &Address,
        token: &Address,
        balance: Wei,
    ) -> Result<(), StateError> {
        let key = (*address, *token);
        let prev_overlay = self.balances.get(&key).cloned();

        if self.mode == StateMode::Validation && !self.initial.balances.contains_key(&key) {
            let pre = match &prev_overlay {
                Some(state) => state.balance,
                None => self
                    .read_balance_trie(address, token)?
                    .map(|s| s.balance)
                    .unwrap_or_default(),
            };
            self.initial.balances.insert(key, pre);
        }
        if self.mode == StateMode::Mining {
            self.journal.push(UndoRecord::Balance {
                address: *address,
                token_address: *token,
                prev: prev_overlay.clone(),
            });
        }

        self.balances.insert(
            key,
            BalanceState {
                balance,
                updated_at_height: self.block_height,
                updated_at_ms: self.block_timestamp_ms,
            },
        );
        Ok(())
    }

    /// Add to a balance.
    pub fn credit_balance(
        &mut self,
        address: &Address,
        token: &Address,
        amount: Wei,
    ) -> Result<(), StateError> {
        let current = self.get_balance(address, token)?;
        self.set_balance(address, token, current.saturating_add(amount))
    }

    /// Subtract from a balance; fails without mutating when short.
    pub fn debit_balance(
        &mut self,
        address: &Address,
        token: &Address,
        amount: Wei,
    ) -> Result<(), StateError> {
        let current = self.get_balance(address, token)?;
        if current < amount {
            return Err(StateError::InsufficientBalance {
                required: amount,
                available: current,
            });
        }
        self.set_balance(address, token, current - amount)
    }

    fn read_balance_trie(
        &mut self,
        address: &Address,
        token: &Address,
    ) -> Result<Option<BalanceState>, StateError> {
        let key = balance_key(address, token);
        match self.balance_trie.get(&self.storage, &key)? {
            Some(bytes) => Ok(Some(BalanceState::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    // =========================================================================
    // NONCES
    // =========================================================================

    pub fn get_nonce(&mut self, address: &Address) -> Result<NonceState, StateError> {
        if let Some(state) = self.nonces.get(address) {
            return Ok(state.clone());
        }
        match self.nonce_trie.get(&self.storage, address)? {
            Some(bytes) => Ok(NonceState::decode(&bytes)?),
            None => Ok(NonceState::default()),
        }
    }

    pub fn set_nonce(&mut self, address: &Address, nonce: i64) -> Result<(), StateError> {
        let prev_overlay = self.nonces.get(address).cloned();

        if self.mode == StateMode::Validation && !self.initial.nonces.contains_key(address) {
            let pre = match &prev_overlay {
                Some(state) => state.nonce,
                None => self.get_nonce(address)?.nonce,
            };
            self.initial.nonces.insert(*address, pre);
        }
        if self.mode == StateMode::Mining {
            self.journal.push(UndoRecord::Nonce {
                address: *address,
                prev: prev_overlay,
            });
        }

        self.nonces.insert(
            *address,
            NonceState {
                nonce,
                updated_at_height: self.block_height,
                updated_at_ms: self.block_timestamp_ms,
            },
        );
        Ok(())
    }

    // =========================================================================
    // AUTHORITIES
    // =========================================================================

    pub fn get_authority(&mut self, address: &Address) -> Result<Option<AuthorityState>, StateError> {
        if self.removed_authorities.contains(address) {
            return Ok(None);
        }
        if let Some(state) = self.authorities.get(address) {
            return Ok(Some(state.clone()));
        }
        match self.authority_trie.get(&self.storage, address)? {
            Some(bytes) => Ok(Some(AuthorityState::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn is_authority(&mut self, address: &Address) -> Result<bool, StateError> {
        Ok(self.get_authority(address)?.is_some())
    }

    pub fn add_authority(
        &mut self,
        address: &Address,
        origin_tx_hash: Hash,
    ) -> Result<(), StateError> {
        self.capture_authority_initial(address)?;
        if self.mode == StateMode::Mining {
            self.journal.push(UndoRecord::Authority {
                address: *address,
                prev_entry: self.authorities.get(address).cloned(),
                prev_removed: self.removed_authorities.contains(address),
            });
        }

        self.removed_authorities.remove(address);
        self.authorities.insert(
            *address,
            AuthorityState {
                origin_tx_hash,
                created_at_height: self.block_height,
                updated_at_height: self.block_height,
                updated_at_ms: self.block_timestamp_ms,
            },
        );
        Ok(())
    }

    pub fn remove_authority(&mut self, address: &Address) -> Result<(), StateError> {
        self.capture_authority_initial(address)?;
        if self.mode == StateMode::Mining {
            self.journal.push(UndoRecord::Authority {
                address: *address,
                prev_entry: self.authorities.get(address).cloned(),
                prev_removed: self.removed_authorities.contains(address),
            });
        }

        self.authorities.remove(address);
        self.removed_authorities.insert(*address);
        Ok(())
    }

    fn capture_authority_initial(&mut self, address: &Address) -> Result<(), StateError> {
        if self.mode == StateMode::Validation && !self.initial.authorities.contains_key(address) {
            let existed = self.get_authority(address)?.is_some();
            self.initial.authorities.insert(*address, existed);
        }
        Ok(())
    }

    // =========================================================================
    // ADDRESS ALIASES
    // =========================================================================

    pub fn get_alias(&mut self, name: &str) -> Result<Option<AddressAliasState>, StateError> {
        if self.removed_aliases.contains(name) {
            return Ok(None);
        }
        if let Some(state) = self.aliases.get(name) {
            return Ok(Some(state.clone()));
        }
        match self.alias_trie.get(&self.storage, name.as_bytes())? {
            Some(bytes) => Ok(Some(AddressAliasState::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn add_alias(
        &mut self,
        name: &str,
        address: Address,
        origin_tx_hash: Hash,
    ) -> Result<(), StateError> {
        self.capture_alias_initial(name)?;
        if self.mode == StateMode::Mining {
            self.journal.push(UndoRecord::Alias {
                name: name.to_string(),
                prev_entry: self.aliases.get(name).cloned(),
                prev_removed: self.removed_aliases.contains(name),
            });
        }

        self.removed_aliases.remove(name);
        self.aliases.insert(
            name.to_string(),
            AddressAliasState {
                address,
                origin_tx_hash,
                created_at_height: self.block_height,
                updated_at_height: self.block_height,
                updated_at_ms: self.block_timestamp_ms,
            },
        );
        Ok(())
    }

    pub fn remove_alias(&mut self, name: &str) -> Result<(), StateError> {
        self.capture_alias_initial(name)?;
        if self.mode == StateMode::Mining {
            self.journal.push(UndoRecord::Alias {
                name: name.to_string(),
                prev_entry: self.aliases.get(name).cloned(),
                prev_removed: self.removed_aliases.contains(name),
            });
        }

        self.aliases.remove(name);
        self.removed_aliases.insert(name.to_string());
        Ok(())
    }

    fn capture_alias_initial(&mut self, name: &str) -> Result<(), StateError> {
        if self.mode == StateMode::Validation && !self.initial.aliases.contains_key(name) {
            let existed = self.get_alias(name)?.is_some();
            self.initial.aliases.insert(name.to_string(), existed);
        }
        Ok(())
    }

    // =========================================================================
    // TOKENS
    // =========================================================================

    pub fn get_token(&mut self, address: &Address) -> Result<Option<TokenState>, StateError> {
        if let Some(state) = self.tokens.get(address) {
            return Ok(Some(state.clone()));
        }
        match self.token_trie.get(&self.storage, address)? {
            Some(bytes) => Ok(Some(TokenState::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set_token(&mut self, address: &Address, mut token: TokenState) -> Result<(), StateError> {
        let prev_overlay = self.tokens.get(address).cloned();

        if self.mode == StateMode::Validation && !self.initial.tokens.contains_key(address) {
            let pre = match &prev_overlay {
                Some(state) => Some(state.clone()),
                None => self.get_token(address)?,
            };
            self.initial.tokens.insert(*address, pre);
        }
        if self.mode == StateMode::Mining {
            self.journal.push(UndoRecord::Token {
                address: *address,
                prev: prev_overlay,
            });
        }

        token.updated_at_height = self.block_height;
        token.updated_at_ms = self.block_timestamp_ms;
        self.tokens.insert(*address, token);
        Ok(())
    }

    /// True the first time a token address is touched in this block; false
    /// on every further attempt. Guards against creating or updating the
    /// same token twice in one block.
    pub fn check_and_mark_token_as_updated(&mut self, address: &Address) -> bool {
        if self.tokens_touched.contains(address) {
            return false;
        }
        if self.mode == StateMode::Mining {
            self.journal
                .push(UndoRecord::TokenTouched { address: *address });
        }
        self.tokens_touched.insert(*address);
        true
    }

    // =========================================================================
    // BIPS
    // =========================================================================

    pub fn get_bip(&mut self, bip_hash: &Hash) -> Result<Option<BipState>, StateError> {
        if let Some(state) = self.bips.get(bip_hash) {
            return Ok(Some(state.clone()));
        }
        match self.bip_trie.get(&self.storage, bip_hash)? {
            Some(bytes) => Ok(Some(BipState::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set_bip(&mut self, bip_hash: &Hash, mut bip: BipState) -> Result<(), StateError> {
        if self.mode == StateMode::Mining {
            self.journal.push(UndoRecord::Bip {
                bip_hash: *bip_hash,
                prev: self.bips.get(bip_hash).cloned(),
            });
        }

        bip.updated_at_height = self.block_height;
        bip.updated_at_ms = self.block_timestamp_ms;
        self.bips.insert(*bip_hash, bip);
        Ok(())
    }

    // =========================================================================
    // NETWORK PARAMS
    // =========================================================================

    pub fn get_params(&mut self) -> Result<NetworkParamsState, StateError> {
        if let Some(params) = &self.params {
            return Ok(params.clone());
        }
        match self.params_trie.get(&self.storage, PARAMS_SINGLETON_KEY)? {
            Some(bytes) => Ok(NetworkParamsState::decode(&bytes)?),
            None => Err(StateError::MissingParams),
        }
    }

    pub fn set_params(&mut self, mut params: NetworkParamsState) -> Result<(), StateError> {
        if self.mode == StateMode::Mining {
            self.journal.push(UndoRecord::Params {
                prev: self.params.clone(),
                prev_changed: self.params_changed,
            });
        }
        params.updated_at_height = self.block_height;
        params.updated_at_ms = self.block_timestamp_ms;
        self.params = Some(params);
        Ok(())
    }

    /// Params may change at most once per block; the handler checks this
    /// before applying a params action.
    pub fn is_params_changed_this_block(&self) -> bool {
        self.params_changed
    }

    pub fn mark_params_changed(&mut self) {
        self.params_changed = true;
    }

    // =========================================================================
    // SNAPSHOT / ROLLBACK
    // =========================================================================

    /// Snapshot the journal position. A no-op token in validation mode.
    pub fn create_snapshot(&self) -> SnapshotToken {
        match self.mode {
            StateMode::Mining => SnapshotToken(self.journal.len()),
            StateMode::Validation => SnapshotToken(0),
        }
    }

    /// Replay undo records in reverse until the journal matches the token.
    pub fn revert_to_snapshot(&mut self, token: SnapshotToken) -> Result<(), StateError> {
        if self.mode == StateMode::Validation {
            return Err(StateError::SnapshotUnsupported);
        }
        if token.0 > self.journal.len() {
            return Err(StateError::InvalidSnapshot);
        }

        while self.journal.len() > token.0 {
            let record = self.journal.pop().expect("length checked above");
            self.apply_undo(record);
        }
        Ok(())
    }

    fn apply_undo(&mut self, record: UndoRecord) {
        match record {
            UndoRecord::Balance {
                address,
                token_address,
                prev,
            } => {
                let key = (address, token_address);
                match prev {
                    Some(state) => self.balances.insert(key, state),
                    None => self.balances.remove(&key),
                };
            }
            UndoRecord::Nonce { address, prev } => {
                match prev {
                    Some(state) => self.nonces.insert(address, state),
                    None => self.nonces.remove(&address),
                };
            }
            UndoRecord::Authority {
                address,
                prev_entry,
                prev_removed,
            } => {
                match prev_entry {
                    Some(state) => self.authorities.insert(address, state),
                    None => self.authorities.remove(&address),
                };
                if prev_removed {
                    self.removed_authorities.insert(address);
                } else {
                    self.removed_authorities.remove(&address);
                }
            }
            UndoRecord::Alias {
                name,
                prev_entry,
                prev_removed,
            } => {
                match prev_entry {
                    Some(state) => self.aliases.insert(name.clone(), state),
                    None => self.aliases.remove(&name),
                };
                if prev_removed {
                    self.removed_aliases.insert(name);
                } else {
                    self.removed_aliases.remove(&name);
                }
            }
            UndoRecord::Token { address, prev } => {
                match prev {
                    Some(state) => self.tokens.insert(address, state),
                    None => self.tokens.remove(&address),
                };
            }
            UndoRecord::TokenTouched { address } => {
                self.tokens_touched.remove(&address);
            }
            UndoRecord::Bip { bip_hash, prev } => {
                match prev {
                    Some(state) => self.bips.insert(bip_hash, state),
                    None => self.bips.remove(&bip_hash),
                };
            }
            UndoRecord::Params { prev, prev_changed } => {
                self.params = prev;
                self.params_changed = prev_changed;
            }
        }
    }

    // =========================================================================
    // COMMIT / ROLLBACK
    // =========================================================================

    /// Flush the overlay into the sub-tries, commit them, write their roots
    /// into the root trie and return its root. Stable when called again
    /// without intervening mutations.
    pub fn calculate_root_hash(&mut self) -> Result<Hash, StateError> {
        for ((address, token), state) in &self.balances {
            let key = balance_key(address, token);
            self.balance_trie.put(&self.storage, &key, state.encode())?;
        }
        for (address, state) in &self.nonces {
            self.nonce_trie.put(&self.storage, address, state.encode())?;
        }
        for address in &self.removed_authorities {
            self.authority_trie.remove(&self.storage, address)?;
        }
        for (address, state) in &self.authorities {
            self.authority_trie
                .put(&self.storage, address, state.encode())?;
        }
        for name in &self.removed_aliases {
            self.alias_trie.remove(&self.storage, name.as_bytes())?;
        }
        for (name, state) in &self.aliases {
            self.alias_trie
                .put(&self.storage, name.as_bytes(), state.encode())?;
        }
        for (address, state) in &self.tokens {
            self.token_trie.put(&self.storage, address, state.encode())?;
        }
        for (bip_hash, state) in &self.bips {
            self.bip_trie.put(&self.storage, bip_hash, state.encode())?;
        }
        if let Some(params) = &self.params {
            self.params_trie
                .put(&self.storage, PARAMS_SINGLETON_KEY, params.encode())?;
        }

        self.balance_trie.commit(&mut self.storage);
        self.nonce_trie.commit(&mut self.storage);
        self.authority_trie.commit(&mut self.storage);
        self.alias_trie.commit(&mut self.storage);
        self.token_trie.commit(&mut self.storage);
        self.bip_trie.commit(&mut self.storage);
        self.params_trie.commit(&mut self.storage);

        let roots = [
            (BALANCE_ROOT_KEY, self.balance_trie.root_hash()),
            (NONCE_ROOT_KEY, self.nonce_trie.root_hash()),
            (AUTHORITY_ROOT_KEY, self.authority_trie.root_hash()),
            (ALIAS_ROOT_KEY, self.alias_trie.root_hash()),
            (BIP_ROOT_KEY, self.bip_trie.root_hash()),
            (PARAMS_ROOT_KEY, self.params_trie.root_hash()),
            (TOKEN_ROOT_KEY, self.token_trie.root_hash()),
        ];
        for (key, root) in roots {
            self.root_trie.put(&self.storage, key, root.to_vec())?;
        }
        self.root_trie.commit(&mut self.storage);

        Ok(self.root_trie.root_hash())
    }

    /// Compute the root and stage every new trie node into the outer batch.
    pub fn persist_to_batch(&mut self, batch: &mut WriteBatch) -> Result<Hash, StateError> {
        let root = self.calculate_root_hash()?;
        self.storage.stage_to_batch(batch);
        Ok(root)
    }

    /// Discard all in-memory mutations, including memoized trie nodes.
    pub fn rollback(&mut self) {
        self.reset_working_state();
        self.root_trie.clear_cache();
        self.balance_trie.clear_cache();
        self.nonce_trie.clear_cache();
        self.authority_trie.clear_cache();
        self.alias_trie.clear_cache();
        self.token_trie.clear_cache();
        self.bip_trie.clear_cache();
        self.params_trie.clear_cache();
    }

    /// Re-point the working copy at a (new) parent root for the next block,
    /// keeping memoized trie nodes warm.
    pub fn prepare_for_next_block(
        &mut self,
        parent_state_root: Option<Hash>,
    ) -> Result<(), StateError> {
        self.reset_working_state();

        let root = parent_state_root.unwrap_or(EMPTY_TRIE_NODE_HASH);
        self.root_trie.reset(root);

        let balance = sub_root(&mut self.root_trie, &self.storage, BALANCE_ROOT_KEY)?;
        let nonce = sub_root(&mut self.root_trie, &self.storage, NONCE_ROOT_KEY)?;
        let authority = sub_root(&mut self.root_trie, &self.storage, AUTHORITY_ROOT_KEY)?;
        let alias = sub_root(&mut self.root_trie, &self.storage, ALIAS_ROOT_KEY)?;
        let bip = sub_root(&mut self.root_trie, &self.storage, BIP_ROOT_KEY)?;
        let params = sub_root(&mut self.root_trie, &self.storage, PARAMS_ROOT_KEY)?;
        let token = sub_root(&mut self.root_trie, &self.storage, TOKEN_ROOT_KEY)?;

        self.balance_trie.reset(balance);
        self.nonce_trie.reset(nonce);
        self.authority_trie.reset(authority);
        self.alias_trie.reset(alias);
        self.bip_trie.reset(bip);
        self.params_trie.reset(params);
        self.token_trie.reset(token);
        Ok(())
    }

    fn reset_working_state(&mut self) {
        self.storage.rollback();
        self.balances.clear();
        self.nonces.clear();
        self.authorities.clear();
        self.removed_authorities.clear();
        self.aliases.clear();
        self.removed_aliases.clear();
        self.tokens.clear();
        self.tokens_touched.clear();
        self.bips.clear();
        self.params = None;
        self.params_changed = false;
        self.journal.clear();
        self.initial = InitialValues::default();
    }

    // =========================================================================
    // DIFFS
    // =========================================================================

    /// Assemble the per-block diff from the captured initial values and the
    /// overlay. Meaningful in validation mode only.
    pub fn build_diff(&mut self) -> StateDiff {
        let mut diff = StateDiff::default();

        let mut balances: Vec<_> = self.balances.iter().collect();
        balances.sort_by_key(|((a, t), _)| (*a, *t));
        for ((address, token_address), state) in balances {
            let previous = self
                .initial
                .balances
                .get(&(*address, *token_address))
                .copied()
                .unwrap_or_default();
            diff.balances.push(BalanceChange {
                address: *address,
                token_address: *token_address,
                previous,
                current: state.balance,
            });
        }

        let mut nonces: Vec<_> = self.nonces.iter().collect();
        nonces.sort_by_key(|(a, _)| **a);
        for (address, state) in nonces {
            let previous = self.initial.nonces.get(address).copied().unwrap_or(-1);
            diff.nonces.push(NonceChange {
                address: *address,
                previous,
                current: state.nonce,
            });
        }

        let mut tokens: Vec<_> = self.tokens.iter().collect();
        tokens.sort_by_key(|(a, _)| **a);
        for (address, state) in tokens {
            diff.tokens.push(TokenChange {
                token_address: *address,
                previous: self.initial.tokens.get(address).cloned().flatten(),
                current: state.clone(),
            });
        }

        let mut bips: Vec<_> = self.bips.iter().collect();
        bips.sort_by_key(|(h, _)| **h);
        for (bip_hash, state) in bips {
            diff.bips.push(BipChange {
                bip_hash: *bip_hash,
                current: state.clone(),
            });
        }

        if self.params_changed {
            diff.params = self.params.clone();
        }

        let mut added: Vec<Address> = self
            .authorities
            .keys()
            .filter(|a| !self.initial.authorities.get(*a).copied().unwrap_or(false))
            .copied()
            .collect();
        added.sort();
        diff.authorities_added = added;

        let mut removed: Vec<Address> = self
            .removed_authorities
            .iter()
            .filter(|a| self.initial.authorities.get(*a).copied().unwrap_or(false))
            .copied()
            .collect();
        removed.sort();
        diff.authorities_removed = removed;

        let mut aliases_added: Vec<(String, Address)> = self
            .aliases
            .iter()
            .filter(|(name, _)| !self.initial.aliases.get(*name).copied().unwrap_or(false))
            .map(|(name, state)| (name.clone(), state.address))
            .collect();
        aliases_added.sort();
        diff.aliases_added = aliases_added;

        let mut aliases_removed: Vec<String> = self
            .removed_aliases
            .iter()
            .filter(|name| self.initial.aliases.get(*name).copied().unwrap_or(false))
            .cloned()
            .collect();
        aliases_removed.sort();
        diff.aliases_removed = aliases_removed;

        diff
    }
}

/// Read one sub-trie root out of the root trie.
fn sub_root(root_trie: &mut Trie, storage: &NodeStorage, key: &[u8]) -> Result<Hash, StateError> {
    if root_trie.is_empty() {
        return Ok(EMPTY_TRIE_NODE_HASH);
    }
    match root_trie.get(storage, key)? {
        Some(bytes) if bytes.len() == 32 => {
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&bytes);
            Ok(hash)
        }
        _ => Ok(EMPTY_TRIE_NODE_HASH),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::storage::MemoryColumnStore;
    use shared_types::{NATIVE_TOKEN_ADDRESS, ZERO_HASH};

    fn open(mode: StateMode) -> WorldState {
        let store = Arc::new(MemoryColumnStore::new());
        let mut ws = WorldState::open(store, None, mode).unwrap();
        ws.set_block_context(1, 1_000);
        ws
    }

    fn open_shared(store: Arc<MemoryColumnStore>, root: Option<Hash>, mode: StateMode) -> WorldState {
        let mut ws = WorldState::open(store, root, mode).unwrap();
        ws.set_block_context(1, 1_000);
        ws
    }

    const ALICE: Address = [0xA1; 20];
    const BOB: Address = [0xB0; 20];

    #[test]
    fn balances_default_to_zero() {
        let mut ws = open(StateMode::Validation);
        assert_eq!(
            ws.get_balance(&ALICE, &NATIVE_TOKEN_ADDRESS).unwrap(),
            Wei::zero()
        );
    }

    #[test]
    fn credit_and_debit() {
        let mut ws = open(StateMode::Validation);
        ws.credit_balance(&ALICE, &NATIVE_TOKEN_ADDRESS, Wei::from(100u64))
            .unwrap();
        ws.debit_balance(&ALICE, &NATIVE_TOKEN_ADDRESS, Wei::from(30u64))
            .unwrap();
        assert_eq!(
            ws.get_balance(&ALICE, &NATIVE_TOKEN_ADDRESS).unwrap(),
            Wei::from(70u64)
        );
    }

    #[test]
    fn debit_beyond_balance_fails_without_mutation() {
        let mut ws = open(StateMode::Validation);
        ws.set_balance(&ALICE, &NATIVE_TOKEN_ADDRESS, Wei::from(10u64))
            .unwrap();

        let err = ws
            .debit_balance(&ALICE, &NATIVE_TOKEN_ADDRESS, Wei::from(11u64))
            .unwrap_err();
        assert!(matches!(err, StateError::InsufficientBalance { .. }));
        assert_eq!(
            ws.get_balance(&ALICE, &NATIVE_TOKEN_ADDRESS).unwrap(),
            Wei::from(10u64)
        );
    }

    #[test]
    fn snapshot_revert_restores_everything() {
        let mut ws = open(StateMode::Mining);
        ws.set_balance(&ALICE, &NATIVE_TOKEN_ADDRESS, Wei::from(100u64))
            .unwrap();
        ws.set_nonce(&ALICE, 0).unwrap();

        let snapshot = ws.create_snapshot();

        ws.set_balance(&ALICE, &NATIVE_TOKEN_ADDRESS, Wei::from(5u64))
            .unwrap();
        ws.set_nonce(&ALICE, 1).unwrap();
        ws.add_authority(&BOB, ZERO_HASH).unwrap();
        assert!(ws.check_and_mark_token_as_updated(&BOB));

        ws.revert_to_snapshot(snapshot).unwrap();

        assert_eq!(
            ws.get_balance(&ALICE, &NATIVE_TOKEN_ADDRESS).unwrap(),
            Wei::from(100u64)
        );
        assert_eq!(ws.get_nonce(&ALICE).unwrap().nonce, 0);
        assert!(!ws.is_authority(&BOB).unwrap());
        // The touched mark was rolled back, so marking succeeds again.
        assert!(ws.check_and_mark_token_as_updated(&BOB));
    }

    #[test]
    fn revert_is_rejected_in_validation_mode() {
        let mut ws = open(StateMode::Validation);
        let snapshot = ws.create_snapshot();
        assert!(matches!(
            ws.revert_to_snapshot(snapshot),
            Err(StateError::SnapshotUnsupported)
        ));
    }

    #[test]
    fn removed_authority_can_be_readded() {
        let mut ws = open(StateMode::Validation);
        ws.add_authority(&ALICE, ZERO_HASH).unwrap();
        ws.remove_authority(&ALICE).unwrap();
        assert!(!ws.is_authority(&ALICE).unwrap());

        ws.add_authority(&ALICE, ZERO_HASH).unwrap();
        assert!(ws.is_authority(&ALICE).unwrap());
    }

    #[test]
    fn token_double_touch_is_detected() {
        let mut ws = open(StateMode::Validation);
        assert!(ws.check_and_mark_token_as_updated(&ALICE));
        assert!(!ws.check_and_mark_token_as_updated(&ALICE));
    }

    #[test]
    fn missing_params_is_an_error() {
        let mut ws = open(StateMode::Validation);
        assert!(matches!(ws.get_params(), Err(StateError::MissingParams)));
    }

    #[test]
    fn root_is_stable_across_repeated_calculation() {
        let mut ws = open(StateMode::Validation);
        ws.set_balance(&ALICE, &NATIVE_TOKEN_ADDRESS, Wei::from(42u64))
            .unwrap();
        let first = ws.calculate_root_hash().unwrap();
        let second = ws.calculate_root_hash().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn persisted_state_is_visible_from_new_instance() {
        let store = Arc::new(MemoryColumnStore::new());

        let mut ws = open_shared(store.clone(), None, StateMode::Validation);
        ws.set_balance(&ALICE, &NATIVE_TOKEN_ADDRESS, Wei::from(777u64))
            .unwrap();
        ws.set_nonce(&ALICE, 4).unwrap();
        ws.add_alias("alice", ALICE, ZERO_HASH).unwrap();

        let mut batch = WriteBatch::new();
        let root = ws.persist_to_batch(&mut batch).unwrap();
        store.write(batch).unwrap();

        let mut reopened = open_shared(store, Some(root), StateMode::Validation);
        assert_eq!(
            reopened.get_balance(&ALICE, &NATIVE_TOKEN_ADDRESS).unwrap(),
            Wei::from(777u64)
        );
        assert_eq!(reopened.get_nonce(&ALICE).unwrap().nonce, 4);
        assert_eq!(reopened.get_alias("alice").unwrap().unwrap().address, ALICE);
        assert_eq!(reopened.get_alias("nobody").unwrap(), None);
    }

    #[test]
    fn alias_removal_persists() {
        let store = Arc::new(MemoryColumnStore::new());

        let mut ws = open_shared(store.clone(), None, StateMode::Validation);
        ws.add_alias("gone", BOB, ZERO_HASH).unwrap();
        let mut batch = WriteBatch::new();
        let root = ws.persist_to_batch(&mut batch).unwrap();
        store.write(batch).unwrap();

        let mut next = open_shared(store.clone(), Some(root), StateMode::Validation);
        next.remove_alias("gone").unwrap();
        let mut batch = WriteBatch::new();
        let root2 = next.persist_to_batch(&mut batch).unwrap();
        store.write(batch).unwrap();
        assert_ne!(root, root2);

        let mut last = open_shared(store, Some(root2), StateMode::Validation);
        assert_eq!(last.get_alias("gone").unwrap(), None);
    }

    #[test]
    fn diff_captures_previous_and_current() {
        let store = Arc::new(MemoryColumnStore::new());

        let mut ws = open_shared(store.clone(), None, StateMode::Validation);
        ws.set_balance(&ALICE, &NATIVE_TOKEN_ADDRESS, Wei::from(100u64))
            .unwrap();
        let mut batch = WriteBatch::new();
        let root = ws.persist_to_batch(&mut batch).unwrap();
        store.write(batch).unwrap();

        let mut next = open_shared(store, Some(root), StateMode::Validation);
        next.set_balance(&ALICE, &NATIVE_TOKEN_ADDRESS, Wei::from(60u64))
            .unwrap();
        next.set_balance(&BOB, &NATIVE_TOKEN_ADDRESS, Wei::from(40u64))
            .unwrap();
        next.set_nonce(&ALICE, 0).unwrap();
        next.add_authority(&BOB, ZERO_HASH).unwrap();

        let diff = next.build_diff();

        assert_eq!(diff.balances.len(), 2);
        let alice_change = diff
            .balances
            .iter()
            .find(|c| c.address == ALICE)
            .unwrap();
        assert_eq!(alice_change.previous, Wei::from(100u64));
        assert_eq!(alice_change.current, Wei::from(60u64));

        assert_eq!(diff.nonces.len(), 1);
        assert_eq!(diff.nonces[0].previous, -1);
        assert_eq!(diff.nonces[0].current, 0);

        assert_eq!(diff.authorities_added, vec![BOB]);
        assert!(diff.authorities_removed.is_empty());
    }

    #[test]
    fn prepare_for_next_block_rebases_cleanly() {
        let store = Arc::new(MemoryColumnStore::new());

        let mut ws = open_shared(store.clone(), None, StateMode::Mining);
        ws.set_balance(&ALICE, &NATIVE_TOKEN_ADDRESS, Wei::from(9u64))
            .unwrap();
        let mut batch = WriteBatch::new();
        let root = ws.persist_to_batch(&mut batch).unwrap();
        store.write(batch).unwrap();

        // Scribble some uncommitted state, then rebase onto the saved root.
        ws.set_balance(&BOB, &NATIVE_TOKEN_ADDRESS, Wei::from(1u64))
            .unwrap();
        ws.prepare_for_next_block(Some(root)).unwrap();

        assert_eq!(
            ws.get_balance(&ALICE, &NATIVE_TOKEN_ADDRESS).unwrap(),
            Wei::from(9u64)
        );
        assert_eq!(
            ws.get_balance(&BOB, &NATIVE_TOKEN_ADDRESS).unwrap(),
            Wei::zero()
        );
        assert_eq!(ws.calculate_root_hash().unwrap(), root);
    }
}
