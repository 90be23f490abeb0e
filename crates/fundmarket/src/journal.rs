//! Append-only journal of exchange events
//!
//! Every successful mutation appends an entry whose hash covers the
//! previous entry's hash, so rewriting history breaks the chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::{Address, Amount, AssetId, ContractId, ListingId, Settlement};

/// Previous hash of the first entry
pub const GENESIS_HASH: &str = "genesis";

/// Errors found while verifying the journal
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JournalError {
    #[error("Hash mismatch at entry {seq}: expected {expected}, got {actual}")]
    HashMismatch {
        seq: u64,
        expected: String,
        actual: String,
    },

    #[error("Broken link at entry {seq}: previous hash {previous_hash} does not match")]
    BrokenLink { seq: u64, previous_hash: String },

    #[error("Sequence gap: expected {expected}, got {actual}")]
    SequenceGap { expected: u64, actual: u64 },
}

/// Something that happened on the exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    Minted {
        to: Address,
        amount: Amount,
    },
    Approval {
        owner: Address,
        spender: Address,
        amount: Amount,
    },
    Transfer {
        from: Address,
        to: Address,
        amount: Amount,
    },
    AssetIssued {
        contract: ContractId,
        asset_id: AssetId,
        publisher: Address,
        supply: Amount,
    },
    WrapperCreated {
        asset_id: AssetId,
        address: Address,
    },
    OperatorApproval {
        contract: ContractId,
        owner: Address,
        operator: Address,
        approved: bool,
    },
    AssetTransfer {
        contract: ContractId,
        asset_id: AssetId,
        from: Address,
        to: Address,
        amount: Amount,
    },
    PublisherAdded {
        publisher: Address,
    },
    PublisherRemoved {
        publisher: Address,
    },
    ListingCreated {
        listing_id: ListingId,
        publisher: Address,
        contract: ContractId,
        asset_id: AssetId,
        quantity: Amount,
        unit_price: Amount,
    },
    ListingCancelled {
        listing_id: ListingId,
        returned: Amount,
    },
    ItemBought {
        listing_id: ListingId,
        buyer: Address,
        quantity: Amount,
        settlement: Settlement,
    },
    SoldNow {
        seller: Address,
        contract: ContractId,
        asset_id: AssetId,
        quantity: Amount,
        settlement: Settlement,
    },
}

/// Kind of journal event, for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Minted,
    Approval,
    Transfer,
    AssetIssued,
    WrapperCreated,
    OperatorApproval,
    AssetTransfer,
    PublisherAdded,
    PublisherRemoved,
    ListingCreated,
    ListingCancelled,
    ItemBought,
    SoldNow,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Minted { .. } => EventKind::Minted,
            Self::Approval { .. } => EventKind::Approval,
            Self::Transfer { .. } => EventKind::Transfer,
            Self::AssetIssued { .. } => EventKind::AssetIssued,
            Self::WrapperCreated { .. } => EventKind::WrapperCreated,
            Self::OperatorApproval { .. } => EventKind::OperatorApproval,
            Self::AssetTransfer { .. } => EventKind::AssetTransfer,
            Self::PublisherAdded { .. } => EventKind::PublisherAdded,
            Self::PublisherRemoved { .. } => EventKind::PublisherRemoved,
            Self::ListingCreated { .. } => EventKind::ListingCreated,
            Self::ListingCancelled { .. } => EventKind::ListingCancelled,
            Self::ItemBought { .. } => EventKind::ItemBought,
            Self::SoldNow { .. } => EventKind::SoldNow,
        }
    }

    /// Whether `account` is a party to this event
    pub fn involves(&self, account: &Address) -> bool {
        match self {
            Self::Minted { to, .. } => to == account,
            Self::Approval { owner, spender, .. } => owner == account || spender == account,
            Self::Transfer { from, to, .. } | Self::AssetTransfer { from, to, .. } => {
                from == account || to == account
            }
            Self::AssetIssued { publisher, .. } => publisher == account,
            Self::WrapperCreated { address, .. } => address == account,
            Self::OperatorApproval { owner, operator, .. } => {
                owner == account || operator == account
            }
            Self::PublisherAdded { publisher } | Self::PublisherRemoved { publisher } => {
                publisher == account
            }
            Self::ListingCreated { publisher, .. } => publisher == account,
            Self::ListingCancelled { .. } => false,
            Self::ItemBought { buyer, .. } => buyer == account,
            Self::SoldNow { seller, .. } => seller == account,
        }
    }
}

/// Immutable journal entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Position in the journal, starting at 0
    pub seq: u64,

    /// When the entry was appended
    pub timestamp: DateTime<Utc>,

    pub event: Event,

    /// Hash of previous entry (for chain integrity)
    pub previous_hash: String,

    /// Hash of this entry
    pub entry_hash: String,
}

impl JournalEntry {
    fn new(seq: u64, event: Event, previous_hash: impl Into<String>) -> Self {
        let mut entry = Self {
            seq,
            timestamp: Utc::now(),
            event,
            previous_hash: previous_hash.into(),
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.calculate_hash();
        entry
    }

    /// SHA-256 over sequence, timestamp, event and previous hash
    pub fn calculate_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.seq.to_be_bytes());
        hasher.update(self.timestamp.timestamp_micros().to_be_bytes());
        // Serializing a plain data enum cannot fail
        hasher.update(serde_json::to_vec(&self.event).unwrap_or_default());
        hasher.update(self.previous_hash.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Verify the entry hash
    pub fn verify_hash(&self) -> Result<(), JournalError> {
        let expected = self.calculate_hash();
        if self.entry_hash != expected {
            return Err(JournalError::HashMismatch {
                seq: self.seq,
                expected,
                actual: self.entry_hash.clone(),
            });
        }
        Ok(())
    }
}

/// Journal filters for querying
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JournalFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<EventKind>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<Address>,

    /// Limit number of results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl JournalFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind(mut self, kind: EventKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_account(mut self, account: impl Into<Address>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check if an entry matches these filters
    pub fn matches(&self, entry: &JournalEntry) -> bool {
        if let Some(kind) = self.kind {
            if entry.event.kind() != kind {
                return false;
            }
        }

        if let Some(account) = &self.account {
            if !entry.event.involves(account) {
                return false;
            }
        }

        true
    }
}

/// Hash-chained event journal
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Journal {
    entries: Vec<JournalEntry>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event and return its entry
    pub fn append(&mut self, event: Event) -> &JournalEntry {
        let previous_hash = self
            .entries
            .last()
            .map(|entry| entry.entry_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let seq = self.entries.len() as u64;
        self.entries.push(JournalEntry::new(seq, event, previous_hash));
        &self.entries[self.entries.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    pub fn last_hash(&self) -> &str {
        self.entries
            .last()
            .map(|entry| entry.entry_hash.as_str())
            .unwrap_or(GENESIS_HASH)
    }

    /// Entries matching `filters`, oldest first
    pub fn query(&self, filters: &JournalFilters) -> Vec<&JournalEntry> {
        let matching = self.entries.iter().filter(|entry| filters.matches(entry));
        match filters.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    /// Re-check every hash and link
    pub fn verify(&self) -> Result<(), JournalError> {
        let mut previous = GENESIS_HASH;
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.seq != index as u64 {
                return Err(JournalError::SequenceGap {
                    expected: index as u64,
                    actual: entry.seq,
                });
            }
            if entry.previous_hash != previous {
                return Err(JournalError::BrokenLink {
                    seq: entry.seq,
                    previous_hash: entry.previous_hash.clone(),
                });
            }
            entry.verify_hash()?;
            previous = &entry.entry_hash;
        }
        Ok(())
    }
}
