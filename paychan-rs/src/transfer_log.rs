use crate::{
    decimal::{parse_amount, parse_signed},
    error::Error,
    store::Store,
    types::{Transfer, TransferRecord, TransferState},
};
use bigdecimal::BigDecimal;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct State {
    records: HashMap<Uuid, TransferRecord>,
    incoming_fulfilled: BigDecimal,
    incoming_fulfilled_and_prepared: BigDecimal,
    outgoing_fulfilled: BigDecimal,
    outgoing_fulfilled_and_prepared: BigDecimal,
    maximum: Option<BigDecimal>,
    minimum: Option<BigDecimal>,
}

impl State {
    fn insert(&mut self, record: TransferRecord) -> Result<(), Error> {
        let amount = parse_amount(&record.transfer.amount)?;
        match record.state {
            TransferState::Prepared => {
                if record.is_incoming {
                    self.incoming_fulfilled_and_prepared += amount;
                } else {
                    self.outgoing_fulfilled_and_prepared += amount;
                }
            }
            TransferState::Fulfilled => {
                if record.is_incoming {
                    self.incoming_fulfilled += amount.clone();
                    self.incoming_fulfilled_and_prepared += amount;
                } else {
                    self.outgoing_fulfilled += amount.clone();
                    self.outgoing_fulfilled_and_prepared += amount;
                }
            }
            TransferState::Cancelled => {}
        }
        self.records.insert(record.transfer.id, record);
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Default)]
struct Bounds {
    maximum: Option<String>,
    minimum: Option<String>,
}

/// The authoritative ledger of conditional transfers on one side of the
/// channel. Keeps every record ever prepared along with cached balance
/// aggregates that are refreshed under the same lock as the record change.
///
/// When bound to a `key`, every record mutation is written through to the
/// store guarded by a compare-and-swap from the record's previous serialized
/// form, so re-delivered mutations cannot regress persisted state.
#[derive(Clone)]
pub struct TransferLog(Arc<TransferLogInner>);

impl std::ops::Deref for TransferLog {
    type Target = TransferLogInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

pub struct TransferLogInner {
    key: Option<String>,
    store: Arc<dyn Store>,
    state: Mutex<State>,
}

impl TransferLog {
    /// An unkeyed log: fully functional, nothing written through.
    pub fn ephemeral(store: Arc<dyn Store>) -> Self {
        Self(Arc::new(TransferLogInner { key: None, store, state: Default::default() }))
    }

    /// Open the log bound to `key`, restoring any previously persisted
    /// records and bounds and recomputing the aggregates from them.
    pub async fn open(store: Arc<dyn Store>, key: &str) -> Result<Self, Error> {
        let mut state = State::default();

        if let Some(index) = store.get(&format!("{key}/index")).await? {
            let ids: Vec<Uuid> = serde_json::from_str(&index).map_err(crate::StoreError::Codec)?;
            for id in ids {
                let Some(raw) = store.get(&record_key(key, &id)).await? else { continue };
                let record: TransferRecord =
                    serde_json::from_str(&raw).map_err(crate::StoreError::Codec)?;
                state.insert(record)?;
            }
        }
        if let Some(raw) = store.get(&format!("{key}/bounds")).await? {
            let bounds: Bounds = serde_json::from_str(&raw).map_err(crate::StoreError::Codec)?;
            state.maximum = bounds.maximum.as_deref().map(parse_signed).transpose()?;
            state.minimum = bounds.minimum.as_deref().map(parse_signed).transpose()?;
        }

        Ok(Self(Arc::new(TransferLogInner {
            key: Some(key.to_string()),
            store,
            state: Mutex::new(state),
        })))
    }

    /// Record a transfer in `prepared` state. Re-preparing an identical
    /// transfer is a no-op; same id with different contents is a duplicate.
    /// Fails without mutating anything if the transfer would drive an
    /// aggregate past its bound. Returns whether the record is new.
    pub async fn prepare(&self, transfer: &Transfer, is_incoming: bool) -> Result<bool, Error> {
        let amount = parse_amount(&transfer.amount)?;
        let record = {
            let mut state = self.state.lock();
            if let Some(existing) = state.records.get(&transfer.id) {
                if existing.transfer == *transfer && existing.is_incoming == is_incoming {
                    return Ok(false)
                }
                return Err(Error::Duplicate(transfer.id))
            }

            if is_incoming {
                let next = &state.incoming_fulfilled_and_prepared + &amount;
                if let Some(maximum) = &state.maximum {
                    if &next > maximum {
                        return Err(Error::NotAccepted(format!(
                            "transfer {} would exceed maximum balance {maximum}",
                            transfer.id
                        )))
                    }
                }
                state.incoming_fulfilled_and_prepared = next;
            } else {
                let next = &state.outgoing_fulfilled_and_prepared + &amount;
                if let Some(minimum) = &state.minimum {
                    let feasible = &state.incoming_fulfilled - &next;
                    if &feasible < minimum {
                        return Err(Error::NotAccepted(format!(
                            "transfer {} would drop balance below minimum {minimum}",
                            transfer.id
                        )))
                    }
                }
                state.outgoing_fulfilled_and_prepared = next;
            }

            let record = TransferRecord {
                transfer: transfer.clone(),
                is_incoming,
                state: TransferState::Prepared,
                fulfillment: None,
                cancellation_reason: None,
            };
            state.records.insert(transfer.id, record.clone());
            record
        };
        self.persist(None, &record).await?;
        Ok(true)
    }

    /// Transition `prepared -> fulfilled` and store the fulfillment. Already
    /// fulfilled is a no-op; cancelled fails. The caller is responsible for
    /// checking the fulfillment against the condition. Returns whether this
    /// call performed the transition.
    pub async fn fulfill(&self, id: Uuid, fulfillment: &str) -> Result<bool, Error> {
        let (previous, record) = {
            let mut state = self.state.lock();
            let record = state
                .records
                .get_mut(&id)
                .ok_or_else(|| Error::NotAccepted(format!("no transfer with id {id}")))?;
            match record.state {
                TransferState::Fulfilled => return Ok(false),
                TransferState::Cancelled => return Err(Error::AlreadyRejected(id)),
                TransferState::Prepared => {}
            }
            let previous = serde_json::to_string(record).map_err(crate::StoreError::Codec)?;
            let amount = parse_amount(&record.transfer.amount)?;
            let is_incoming = record.is_incoming;
            record.state = TransferState::Fulfilled;
            record.fulfillment = Some(fulfillment.to_string());
            let record = record.clone();
            if is_incoming {
                state.incoming_fulfilled += amount;
            } else {
                state.outgoing_fulfilled += amount;
            }
            (previous, record)
        };
        self.persist(Some(previous), &record).await?;
        Ok(true)
    }

    /// Transition `prepared -> cancelled` and release the amount from the
    /// prepared aggregates. Already cancelled is a no-op; fulfilled fails.
    /// Returns whether this call performed the transition.
    pub async fn cancel(&self, id: Uuid, reason: Option<Value>) -> Result<bool, Error> {
        let (previous, record) = {
            let mut state = self.state.lock();
            let record = state
                .records
                .get_mut(&id)
                .ok_or_else(|| Error::NotAccepted(format!("no transfer with id {id}")))?;
            match record.state {
                TransferState::Cancelled => return Ok(false),
                TransferState::Fulfilled => return Err(Error::AlreadyFulfilled(id)),
                TransferState::Prepared => {}
            }
            let previous = serde_json::to_string(record).map_err(crate::StoreError::Codec)?;
            let amount = parse_amount(&record.transfer.amount)?;
            let is_incoming = record.is_incoming;
            record.state = TransferState::Cancelled;
            record.cancellation_reason = reason;
            let record = record.clone();
            if is_incoming {
                state.incoming_fulfilled_and_prepared -= amount;
            } else {
                state.outgoing_fulfilled_and_prepared -= amount;
            }
            (previous, record)
        };
        self.persist(Some(previous), &record).await?;
        Ok(true)
    }

    pub fn get(&self, id: Uuid) -> Option<TransferRecord> {
        self.state.lock().records.get(&id).cloned()
    }

    /// Signed net position: incoming fulfilled raises it, outgoing fulfilled
    /// lowers it.
    pub fn get_balance(&self) -> String {
        let state = self.state.lock();
        (&state.incoming_fulfilled - &state.outgoing_fulfilled).to_string()
    }

    pub fn get_incoming_fulfilled(&self) -> String {
        self.state.lock().incoming_fulfilled.to_string()
    }

    pub fn get_incoming_fulfilled_and_prepared(&self) -> String {
        self.state.lock().incoming_fulfilled_and_prepared.to_string()
    }

    pub fn get_outgoing_fulfilled(&self) -> String {
        self.state.lock().outgoing_fulfilled.to_string()
    }

    pub fn get_outgoing_fulfilled_and_prepared(&self) -> String {
        self.state.lock().outgoing_fulfilled_and_prepared.to_string()
    }

    pub fn get_maximum(&self) -> Option<String> {
        self.state.lock().maximum.as_ref().map(|v| v.to_string())
    }

    pub fn get_minimum(&self) -> Option<String> {
        self.state.lock().minimum.as_ref().map(|v| v.to_string())
    }

    pub async fn set_maximum(&self, value: &str) -> Result<(), Error> {
        let maximum = parse_signed(value)?;
        self.state.lock().maximum = Some(maximum);
        self.persist_bounds().await
    }

    pub async fn set_minimum(&self, value: &str) -> Result<(), Error> {
        let minimum = parse_signed(value)?;
        self.state.lock().minimum = Some(minimum);
        self.persist_bounds().await
    }

    async fn persist(&self, previous: Option<String>, record: &TransferRecord) -> Result<(), Error> {
        let Some(key) = &self.key else { return Ok(()) };
        let id = record.transfer.id;
        let serialized = serde_json::to_string(record).map_err(crate::StoreError::Codec)?;
        let swapped = self
            .store
            .compare_and_swap(&record_key(key, &id), previous.as_deref(), &serialized)
            .await?;
        if !swapped {
            // a replay already advanced this record past `previous`
            debug!(%id, "skipping stale write for transfer record");
            return Ok(())
        }
        if previous.is_none() {
            self.index_insert(key, &id).await?;
        }
        Ok(())
    }

    async fn index_insert(&self, key: &str, id: &Uuid) -> Result<(), Error> {
        let index_key = format!("{key}/index");
        loop {
            let current = self.store.get(&index_key).await?;
            let mut ids: Vec<Uuid> = match &current {
                Some(raw) => serde_json::from_str(raw).map_err(crate::StoreError::Codec)?,
                None => vec![],
            };
            if ids.contains(id) {
                return Ok(())
            }
            ids.push(*id);
            let serialized = serde_json::to_string(&ids).map_err(crate::StoreError::Codec)?;
            if self.store.compare_and_swap(&index_key, current.as_deref(), &serialized).await? {
                return Ok(())
            }
        }
    }

    async fn persist_bounds(&self) -> Result<(), Error> {
        let Some(key) = &self.key else { return Ok(()) };
        let bounds = {
            let state = self.state.lock();
            Bounds {
                maximum: state.maximum.as_ref().map(|v| v.to_string()),
                minimum: state.minimum.as_ref().map(|v| v.to_string()),
            }
        };
        let serialized = serde_json::to_string(&bounds).map_err(crate::StoreError::Codec)?;
        self.store.put(&format!("{key}/bounds"), &serialized).await?;
        Ok(())
    }
}

fn record_key(key: &str, id: &Uuid) -> String {
    format!("{key}/t/{id}")
}
