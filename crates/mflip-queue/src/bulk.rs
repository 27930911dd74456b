//! Bulk list and bulk item persistence.
//!
//! Layout per list:
//! - `prefix:bulklist:<id>` list record, indexed in `prefix:bulklist:timeindex`
//! - `prefix:bulkitem:<itemId>` one record per item
//! - `prefix:bulklist:<id>:state:<n>` sorted set of item ids, scored by priority
//! - `prefix:bulklist:<id>:filepathindex` set of `path|itemId`
//! - `prefix:bulklist:<id>:actions` set of running [`BulkListAction`]s
//!
//! Item reads stream through bounded channels so callers never hold a
//! whole list in memory.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use mflip_models::{BulkItem, BulkItemState, BulkList, BulkListAction};
use mflip_store::{escape_glob, KeySpace, Pipeline, Store};

use crate::error::{QueueError, QueueResult};

/// Records fetched per round trip.
pub const FETCH_PAGE: usize = 100;

/// Capacity of item stream channels.
pub const STREAM_BUFFER: usize = 10;

/// Items arrive in order; a store failure is sent as the last message.
pub type BulkItemStream = mpsc::Receiver<QueueResult<BulkItem>>;

#[derive(Clone)]
pub struct BulkListStore {
    store: Arc<dyn Store>,
    keys: KeySpace,
}

fn path_index_member(item: &BulkItem) -> String {
    format!("{}|{}", item.source_path, item.id)
}

fn decode_item(id: impl std::fmt::Display, raw: &str) -> QueueResult<BulkItem> {
    serde_json::from_str(raw)
        .map_err(|e| QueueError::data_integrity(format!("bulk item {} is unreadable: {}", id, e)))
}

impl BulkListStore {
    pub fn new(store: Arc<dyn Store>, keys: KeySpace) -> Self {
        Self { store, keys }
    }

    pub async fn store_list(&self, list: &BulkList) -> QueueResult<()> {
        let mut pipe = Pipeline::new();
        pipe.set(self.keys.bulk_list(list.id), serde_json::to_string(list)?)
            .zadd(
                self.keys.bulk_list_time_index(),
                list.id.to_string(),
                list.creation_time.timestamp_millis() as f64,
            );
        self.store.exec(pipe).await?;
        Ok(())
    }

    pub async fn load_list(&self, list_id: Uuid) -> QueueResult<BulkList> {
        let raw = self
            .store
            .get(&self.keys.bulk_list(list_id))
            .await?
            .ok_or_else(|| QueueError::not_found(format!("bulk list {}", list_id)))?;
        serde_json::from_str(&raw).map_err(|e| {
            QueueError::data_integrity(format!("bulk list {} is unreadable: {}", list_id, e))
        })
    }

    /// Lists newest first.
    pub async fn scan_lists(&self, start: isize, stop: isize) -> QueueResult<Vec<BulkList>> {
        let ids = self
            .store
            .zrevrange(&self.keys.bulk_list_time_index(), start, stop)
            .await?;
        let mut out = Vec::with_capacity(ids.len());
        for raw in ids {
            let Ok(id) = Uuid::parse_str(&raw) else {
                warn!(raw = %raw, "Malformed id in bulk list index");
                continue;
            };
            match self.load_list(id).await {
                Ok(list) => out.push(list),
                Err(e) if e.is_store_failure() => return Err(e),
                Err(e) => warn!(bulk_list_id = %id, "Skipping bulk list: {}", e),
            }
        }
        Ok(out)
    }

    /// Remove the list, its items and all of its indices.
    pub async fn delete_list(&self, list: &BulkList) -> QueueResult<()> {
        let mut rx = self.stream_all_records(list.id);
        let mut pipe = Pipeline::new();
        while let Some(item) = rx.recv().await {
            pipe.del(self.keys.bulk_item(item?.id));
            if pipe.len() >= FETCH_PAGE {
                self.store.exec(std::mem::take(&mut pipe)).await?;
            }
        }
        for state in BulkItemState::ALL {
            pipe.del(self.keys.bulk_list_state_index(list.id, state.code()));
        }
        pipe.del(self.keys.bulk_list_path_index(list.id))
            .del(self.keys.bulk_list_actions(list.id))
            .del(self.keys.bulk_list(list.id))
            .zrem(self.keys.bulk_list_time_index(), list.id.to_string());
        self.store.exec(pipe).await?;
        debug!(bulk_list_id = %list.id, "Deleted bulk list");
        Ok(())
    }

    fn check_membership(list_id: Uuid, item: &BulkItem) -> QueueResult<()> {
        if item.bulk_list_id != list_id {
            return Err(QueueError::validation(format!(
                "item {} belongs to bulk list {}, not {}",
                item.id, item.bulk_list_id, list_id
            )));
        }
        Ok(())
    }

    /// Queue writes for an item record and its index entries onto `pipe`.
    pub fn stage_record(&self, pipe: &mut Pipeline, item: &BulkItem) -> QueueResult<()> {
        pipe.set(self.keys.bulk_item(item.id), serde_json::to_string(item)?)
            .zadd(
                self.keys.bulk_list_state_index(item.bulk_list_id, item.state.code()),
                item.id.to_string(),
                item.priority as f64,
            )
            .sadd(
                self.keys.bulk_list_path_index(item.bulk_list_id),
                path_index_member(item),
            );
        Ok(())
    }

    /// Queue index moves from `old` to `updated` onto `pipe`.
    pub fn stage_reindex(&self, pipe: &mut Pipeline, updated: &BulkItem, old: &BulkItem) {
        if updated.state != old.state || updated.priority != old.priority {
            pipe.zrem(
                self.keys.bulk_list_state_index(old.bulk_list_id, old.state.code()),
                old.id.to_string(),
            )
            .zadd(
                self.keys.bulk_list_state_index(updated.bulk_list_id, updated.state.code()),
                updated.id.to_string(),
                updated.priority as f64,
            );
        }
        if updated.source_path != old.source_path {
            pipe.srem(self.keys.bulk_list_path_index(old.bulk_list_id), path_index_member(old))
                .sadd(
                    self.keys.bulk_list_path_index(updated.bulk_list_id),
                    path_index_member(updated),
                );
        }
    }

    /// Queue a state change for `item` onto `pipe`, returning the updated item.
    pub fn stage_state_change(
        &self,
        pipe: &mut Pipeline,
        item: &BulkItem,
        state: BulkItemState,
    ) -> QueueResult<BulkItem> {
        let updated = item.with_state(state);
        pipe.set(self.keys.bulk_item(updated.id), serde_json::to_string(&updated)?);
        self.stage_reindex(pipe, &updated, item);
        Ok(updated)
    }

    /// Execute writes staged with the `stage_*` methods.
    pub async fn commit(&self, pipe: Pipeline) -> QueueResult<()> {
        if pipe.is_empty() {
            return Ok(());
        }
        self.store.exec(pipe).await?;
        Ok(())
    }

    pub async fn add_record(&self, list: &BulkList, item: &BulkItem) -> QueueResult<()> {
        Self::check_membership(list.id, item)?;
        let mut pipe = Pipeline::new();
        self.stage_record(&mut pipe, item)?;
        self.store.exec(pipe).await?;
        Ok(())
    }

    pub async fn remove_record(&self, list: &BulkList, item: &BulkItem) -> QueueResult<()> {
        Self::check_membership(list.id, item)?;
        let mut pipe = Pipeline::new();
        pipe.del(self.keys.bulk_item(item.id))
            .zrem(
                self.keys.bulk_list_state_index(list.id, item.state.code()),
                item.id.to_string(),
            )
            .srem(self.keys.bulk_list_path_index(list.id), path_index_member(item));
        self.store.exec(pipe).await?;
        Ok(())
    }

    pub async fn record_for_id(&self, item_id: Uuid) -> QueueResult<BulkItem> {
        match self.store.get(&self.keys.bulk_item(item_id)).await? {
            Some(raw) => decode_item(item_id, &raw),
            None => Err(QueueError::not_found(format!("bulk item {}", item_id))),
        }
    }

    /// Load an item, change its state and reindex it.
    pub async fn update_state(&self, item_id: Uuid, state: BulkItemState) -> QueueResult<BulkItem> {
        let item = self.record_for_id(item_id).await?;
        let mut pipe = Pipeline::new();
        let updated = self.stage_state_change(&mut pipe, &item, state)?;
        self.store.exec(pipe).await?;
        Ok(updated)
    }

    pub async fn count_for_state(&self, list_id: Uuid, state: BulkItemState) -> QueueResult<u64> {
        Ok(self
            .store
            .zcard(&self.keys.bulk_list_state_index(list_id, state.code()))
            .await?)
    }

    pub async fn count_for_all_states(
        &self,
        list_id: Uuid,
    ) -> QueueResult<HashMap<BulkItemState, u64>> {
        let mut counts = HashMap::new();
        for state in BulkItemState::ALL {
            counts.insert(state, self.count_for_state(list_id, state).await?);
        }
        Ok(counts)
    }

    pub async fn set_action_running(&self, list_id: Uuid, action: BulkListAction) -> QueueResult<()> {
        self.store
            .sadd(&self.keys.bulk_list_actions(list_id), action.as_str())
            .await?;
        Ok(())
    }

    pub async fn clear_action_running(
        &self,
        list_id: Uuid,
        action: BulkListAction,
    ) -> QueueResult<()> {
        self.store
            .srem(&self.keys.bulk_list_actions(list_id), action.as_str())
            .await?;
        Ok(())
    }

    pub async fn actions_running(&self, list_id: Uuid) -> QueueResult<Vec<BulkListAction>> {
        let key = self.keys.bulk_list_actions(list_id);
        let mut actions = Vec::new();
        let mut cursor = 0;
        loop {
            let (next, page) = self.store.sscan(&key, cursor, None, FETCH_PAGE).await?;
            for raw in page {
                match raw.parse() {
                    Ok(action) => actions.push(action),
                    Err(e) => warn!(bulk_list_id = %list_id, "Ignoring unknown action: {}", e),
                }
            }
            if next == 0 {
                return Ok(actions);
            }
            cursor = next;
        }
    }

    /// Stream every item in one state, in priority order.
    pub fn stream_records_by_state(&self, list_id: Uuid, state: BulkItemState) -> BulkItemStream {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let this = self.clone();
        tokio::spawn(async move {
            // ids are read in one go so reindexing during the stream can't shift pages
            let index = this.keys.bulk_list_state_index(list_id, state.code());
            match this.store.zrange(&index, 0, -1).await {
                Ok(ids) => {
                    this.send_records(parse_ids(&ids), &tx).await;
                }
                Err(e) => {
                    let _ = tx.send(Err(e.into())).await;
                }
            }
        });
        rx
    }

    /// Stream a single item, for callers that accept either one item or a filter.
    pub fn stream_record(&self, item_id: Uuid) -> BulkItemStream {
        let (tx, rx) = mpsc::channel(1);
        let this = self.clone();
        tokio::spawn(async move {
            let _ = tx.send(this.record_for_id(item_id).await).await;
        });
        rx
    }

    /// Stream items whose source path starts with `prefix`.
    pub fn stream_records_by_path_prefix(&self, list_id: Uuid, prefix: &str) -> BulkItemStream {
        let pattern = format!("{}*", escape_glob(prefix));
        self.stream_path_index(list_id, Some(pattern))
    }

    /// Stream every item in the list, in no particular order.
    pub fn stream_all_records(&self, list_id: Uuid) -> BulkItemStream {
        self.stream_path_index(list_id, None)
    }

    fn stream_path_index(&self, list_id: Uuid, pattern: Option<String>) -> BulkItemStream {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let this = self.clone();
        tokio::spawn(async move {
            let key = this.keys.bulk_list_path_index(list_id);
            let mut cursor = 0;
            loop {
                let page = this
                    .store
                    .sscan(&key, cursor, pattern.as_deref(), FETCH_PAGE)
                    .await;
                let (next, members) = match page {
                    Ok(page) => page,
                    Err(e) => {
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                };
                let ids: Vec<String> = members
                    .iter()
                    .filter_map(|m| m.rsplit_once('|').map(|(_, id)| id.to_string()))
                    .collect();
                if !this.send_records(parse_ids(&ids), &tx).await {
                    return;
                }
                if next == 0 {
                    return;
                }
                cursor = next;
            }
        });
        rx
    }

    /// Fetch records page by page and send them. Returns false once the
    /// receiver is gone or a store error has been sent.
    async fn send_records(&self, ids: Vec<Uuid>, tx: &mpsc::Sender<QueueResult<BulkItem>>) -> bool {
        for chunk in ids.chunks(FETCH_PAGE) {
            let record_keys: Vec<String> = chunk.iter().map(|id| self.keys.bulk_item(*id)).collect();
            let records = match self.store.mget(&record_keys).await {
                Ok(records) => records,
                Err(e) => {
                    let _ = tx.send(Err(e.into())).await;
                    return false;
                }
            };
            for (id, raw) in chunk.iter().zip(records) {
                let item = match raw {
                    None => {
                        warn!(item_id = %id, "Index refers to a bulk item that no longer exists");
                        continue;
                    }
                    Some(raw) => match decode_item(id, &raw) {
                        Ok(item) => item,
                        Err(e) => {
                            warn!(item_id = %id, "Skipping bulk item: {}", e);
                            continue;
                        }
                    },
                };
                if tx.send(Ok(item)).await.is_err() {
                    return false;
                }
            }
        }
        true
    }
}

fn parse_ids(raw: &[String]) -> Vec<Uuid> {
    raw.iter()
        .filter_map(|s| match Uuid::parse_str(s) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(raw = %s, "Skipping malformed id in bulk index: {}", e);
                None
            }
        })
        .collect()
}

/// Drain a stream into a vector, stopping at the first error.
pub async fn collect_items(mut rx: BulkItemStream) -> QueueResult<Vec<BulkItem>> {
    let mut out = Vec::new();
    while let Some(item) = rx.recv().await {
        out.push(item?);
    }
    Ok(out)
}
